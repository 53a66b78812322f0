//! Small shared value types: body encodings, return shapes, decoded values
//! and proxy credentials.
//!
//! # Design
//! `ReturnShape` keeps the numeric codes 1..=5 so shapes stored in external
//! configuration as integers still map onto the same variants. Everything
//! serializes lowercase for the same reason.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HttpError;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Encoding of a request body. Only these two are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    #[default]
    Json,
    Form,
}

impl BodyKind {
    pub fn content_type(self) -> &'static str {
        match self {
            BodyKind::Json => CONTENT_TYPE_JSON,
            BodyKind::Form => CONTENT_TYPE_FORM,
        }
    }
}

/// How a response body is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnShape {
    /// A JSON object.
    Map,
    /// A JSON array.
    List,
    /// The body as a string.
    Text,
    /// The body bytes untouched.
    Bytes,
    /// Whatever the registered `BodyDecoder` produces.
    Custom,
}

impl ReturnShape {
    pub fn code(self) -> u8 {
        match self {
            ReturnShape::Map => 1,
            ReturnShape::List => 2,
            ReturnShape::Text => 3,
            ReturnShape::Bytes => 4,
            ReturnShape::Custom => 5,
        }
    }
}

impl TryFrom<u8> for ReturnShape {
    type Error = HttpError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ReturnShape::Map),
            2 => Ok(ReturnShape::List),
            3 => Ok(ReturnShape::Text),
            4 => Ok(ReturnShape::Bytes),
            5 => Ok(ReturnShape::Custom),
            other => Err(HttpError::UnknownShape(other)),
        }
    }
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnShape::Map => "map",
            ReturnShape::List => "list",
            ReturnShape::Text => "text",
            ReturnShape::Bytes => "bytes",
            ReturnShape::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A decoded response body. The variant always matches the requested shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Map(Map<String, Value>),
    List(Vec<Value>),
    Text(String),
    Bytes(Vec<u8>),
    Custom(Value),
}

impl Decoded {
    pub fn shape(&self) -> ReturnShape {
        match self {
            Decoded::Map(_) => ReturnShape::Map,
            Decoded::List(_) => ReturnShape::List,
            Decoded::Text(_) => ReturnShape::Text,
            Decoded::Bytes(_) => ReturnShape::Bytes,
            Decoded::Custom(_) => ReturnShape::Custom,
        }
    }

    pub fn into_map(self) -> Option<Map<String, Value>> {
        match self {
            Decoded::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Decoded::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Decoded::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Decoded::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_custom(self) -> Option<Value> {
        match self {
            Decoded::Custom(value) => Some(value),
            _ => None,
        }
    }
}

/// SOCKS5 username/password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs.
impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
