//! Test endpoints for exercising the HTTP layer over real sockets.
//!
//! - `POST /echo` replies with the request body and content-type.
//! - `GET|POST /inspect` replies with the method, headers and body it saw.
//! - `GET /json/object`, `/json/list`, `/text`, `/malformed` return fixed bodies.
//! - `GET /status/{code}` replies with that status and a short text body.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::Path,
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// What `/inspect` saw. Header names are lowercase; repeated headers keep
/// every value in arrival order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inspection {
    pub method: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/echo", post(echo))
        .route("/inspect", get(inspect).post(inspect))
        .route("/json/object", get(json_object))
        .route("/json/list", get(json_list))
        .route("/text", get(text))
        .route("/malformed", get(malformed))
        .route("/status/{code}", get(status))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

async fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    ([(CONTENT_TYPE, content_type)], body)
}

async fn inspect(method: Method, headers: HeaderMap, body: String) -> Json<Inspection> {
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        seen.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    Json(Inspection {
        method: method.to_string(),
        headers: seen,
        body,
    })
}

async fn json_object() -> Json<Value> {
    Json(json!({"a": 1, "b": "two", "nested": {"ok": true}}))
}

async fn json_list() -> Json<Value> {
    Json(json!([1, "two", {"three": 3}]))
}

async fn text() -> &'static str {
    "abc"
}

async fn malformed() -> ([(axum::http::HeaderName, &'static str); 1], &'static str) {
    ([(CONTENT_TYPE, "application/json")], "{\"a\": 1,")
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspection_serializes_to_json() {
        let inspection = Inspection {
            method: "POST".to_string(),
            headers: BTreeMap::from([("content-type".to_string(), vec!["application/json".to_string()])]),
            body: "{}".to_string(),
        };
        let json = serde_json::to_value(&inspection).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["headers"]["content-type"][0], "application/json");
        assert_eq!(json["body"], "{}");
    }

    #[test]
    fn inspection_roundtrips_through_json() {
        let inspection = Inspection {
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: String::new(),
        };
        let json = serde_json::to_string(&inspection).unwrap();
        let back: Inspection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inspection);
    }
}
