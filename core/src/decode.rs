//! Turns a buffered `HttpResponse` into the `Decoded` shape the caller asked
//! for.
//!
//! # Design
//! Status is checked before anything else: a response outside 200..=299 is
//! an error for every shape and the body is never parsed. Custom decoding is
//! a strategy object passed in by the caller, so this module holds no state.

use serde_json::{Map, Value};

use crate::error::{BoxError, HttpError};
use crate::http::HttpResponse;
use crate::types::{Decoded, ReturnShape};

/// Caller-supplied decoder for `ReturnShape::Custom`.
///
/// Implemented for any `Fn(&[u8]) -> Result<Value, BoxError>`, so a closure
/// can be registered directly.
pub trait BodyDecoder: Send + Sync {
    fn decode(&self, body: &[u8]) -> Result<Value, BoxError>;
}

impl<F> BodyDecoder for F
where
    F: Fn(&[u8]) -> Result<Value, BoxError> + Send + Sync,
{
    fn decode(&self, body: &[u8]) -> Result<Value, BoxError> {
        self(body)
    }
}

/// Map non-success status codes to `HttpError::Status`.
pub fn check_status(response: &HttpResponse) -> Result<(), HttpError> {
    if response.is_success() {
        return Ok(());
    }
    Err(HttpError::Status {
        status: response.status,
        reason: response.reason.clone(),
        body: response.body_text(),
    })
}

/// Decode `response` as `shape`.
pub fn decode_response(
    response: HttpResponse,
    shape: ReturnShape,
    decoder: Option<&dyn BodyDecoder>,
) -> Result<Decoded, HttpError> {
    check_status(&response)?;
    let body = response.body;

    match shape {
        ReturnShape::Map => serde_json::from_slice::<Map<String, Value>>(&body)
            .map(Decoded::Map)
            .map_err(|source| decode_error(shape, source, &body)),
        ReturnShape::List => serde_json::from_slice::<Vec<Value>>(&body)
            .map(Decoded::List)
            .map_err(|source| decode_error(shape, source, &body)),
        ReturnShape::Text => Ok(Decoded::Text(match String::from_utf8(body) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })),
        ReturnShape::Bytes => Ok(Decoded::Bytes(body)),
        ReturnShape::Custom => match decoder {
            Some(decoder) => decoder
                .decode(&body)
                .map(Decoded::Custom)
                .map_err(HttpError::CustomDecode),
            None => Err(HttpError::MissingDecoder {
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        },
    }
}

fn decode_error(shape: ReturnShape, source: serde_json::Error, body: &[u8]) -> HttpError {
    HttpError::Decode {
        shape,
        source,
        body: String::from_utf8_lossy(body).into_owned(),
    }
}
