//! Blocking HTTP convenience layer over `ureq`.
//!
//! # Overview
//! Builds clients with clamped timeouts and optional SOCKS5 proxying, opens
//! raw persistent HTTP/1.1 connections, issues GET/POST calls with JSON or
//! form bodies, and decodes responses into a fixed set of shapes.
//!
//! # Design
//! - `client` builds `Client` values; each remembers its recipe so it can be
//!   rebuilt after a transport failure.
//! - `connection` is the write-then-read path over one socket, plain or TLS.
//! - `session::HttpSession` is the facade: it holds the client, connection,
//!   decoder and timing, and routes every response through `decode`.
//! - `params::RequestParams` is the serde-loadable description of one call.
//! - Nothing here spawns threads or holds shared mutable state.

pub mod client;
pub mod connection;
pub mod decode;
pub mod error;
pub mod http;
pub mod params;
pub mod session;
pub mod types;

pub use client::{
    clamp_timeout, default_client, proxy_client, raw_connection, timeout_client, Client, ClientRecipe,
    MIN_TIMEOUT_SECS,
};
pub use connection::Connection;
pub use decode::{decode_response, BodyDecoder};
pub use error::{BoxError, HttpError, Recovery};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use params::RequestParams;
pub use session::{HttpSession, Timing};
pub use types::{BodyKind, Decoded, ProxyAuth, ReturnShape};
