//! Error types for the HTTP convenience layer.
//!
//! # Design
//! Every variant names the operation that failed so a caller can log the
//! error without extra context. Non-2xx responses land in `Status` with the
//! raw status code, reason phrase and body for debugging; JSON decode
//! failures carry the body verbatim for the same reason.
//!
//! Transport failures on a held client trigger a client rebuild. The rebuild
//! outcome travels with the error as a `Recovery` instead of being a hidden
//! side effect, and the original failure always stays the primary error.

use std::fmt;
use std::io;

use crate::types::ReturnShape;

/// Boxed error returned by custom body decoders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What the session did to its held client after a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// The held client was replaced by a fresh one built from the same recipe.
    ClientRebuilt { timeout_secs: Option<u64> },

    /// Building the replacement failed; the old client is still held.
    RebuildFailed { reason: String },
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recovery::ClientRebuilt { timeout_secs: Some(secs) } => {
                write!(f, "client rebuilt with {secs}s timeout")
            }
            Recovery::ClientRebuilt { timeout_secs: None } => write!(f, "client rebuilt"),
            Recovery::RebuildFailed { reason } => write!(f, "client rebuild failed: {reason}"),
        }
    }
}

/// Errors returned by the client factory, the session and the decoder.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The address could not be parsed as an absolute URL.
    #[error("address `{address}` is not a valid URL: {source}")]
    InvalidUrl {
        address: String,
        #[source]
        source: url::ParseError,
    },

    /// Raw connections only speak `http` and `https`.
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    /// The SOCKS5 proxy address or credentials were rejected.
    #[error("SOCKS5 proxy setup for `{address}` failed: {reason}")]
    ProxySetup { address: String, reason: String },

    /// Dialing the remote host failed.
    #[error("connect to `{address}` failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// TLS session setup failed before any byte was exchanged.
    #[error("TLS setup for `{host}` failed: {reason}")]
    Tls { host: String, reason: String },

    /// A header name or value was not valid HTTP.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Sending the request or receiving the response head failed.
    #[error("[{op}] transport failure: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: ureq::Error,
        recovery: Option<Recovery>,
    },

    /// Writing to or reading from a persistent connection failed.
    #[error("[{op}] connection I/O failure: {source}")]
    ConnectionIo {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A persistent-connection call was made with no connection set.
    #[error("[{0}] no persistent connection set")]
    NoConnection(&'static str),

    /// `conn_response` was called before any request was written.
    #[error("no request has been written to the persistent connection")]
    NoPendingRequest,

    /// The peer sent something that is not an HTTP/1.x response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The response head arrived but reading the body failed.
    #[error("reading response body failed: {source}")]
    BodyRead {
        #[source]
        source: ureq::Error,
    },

    /// The server answered outside 200..=299.
    #[error("HTTP status {status} {reason}; body: {body}")]
    Status {
        status: u16,
        reason: String,
        body: String,
    },

    /// The body was not the JSON shape that was asked for.
    #[error("decoding body as {shape} failed: {source}; body: {body}")]
    Decode {
        shape: ReturnShape,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// `ReturnShape::Custom` was requested without a registered decoder.
    #[error("no decoder registered for custom return shape; body: {body}")]
    MissingDecoder { body: String },

    /// The registered custom decoder rejected the body.
    #[error("custom decoder failed: {0}")]
    CustomDecode(#[source] BoxError),

    /// A numeric return-shape code outside 1..=5.
    #[error("unknown return shape code {0}")]
    UnknownShape(u8),
}

impl HttpError {
    /// The recovery action taken alongside a transport failure, if any.
    pub fn recovery(&self) -> Option<&Recovery> {
        match self {
            HttpError::Transport { recovery, .. } => recovery.as_ref(),
            _ => None,
        }
    }

    /// HTTP status code for `Status` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_mentions_code_reason_and_body() {
        let err = HttpError::Status {
            status: 404,
            reason: "Not Found".to_string(),
            body: "nothing here".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("Not Found"));
        assert!(msg.contains("nothing here"));
        assert_eq!(err.status(), Some(404));
        assert!(err.recovery().is_none());
    }

    #[test]
    fn recovery_display() {
        let rebuilt = Recovery::ClientRebuilt { timeout_secs: Some(30) };
        assert_eq!(rebuilt.to_string(), "client rebuilt with 30s timeout");
        let failed = Recovery::RebuildFailed {
            reason: "bad proxy".to_string(),
        };
        assert_eq!(failed.to_string(), "client rebuild failed: bad proxy");
    }
}
