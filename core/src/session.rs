//! Request/decode facade.
//!
//! # Design
//! `HttpSession` composes the pieces a caller reuses across calls: the held
//! `Client`, an optional persistent `Connection`, the optional custom
//! decoder, the last request built and the timing of the last
//! persistent-connection round trip. All calls are blocking and take
//! `&mut self`; one session is meant for one thread at a time.
//!
//! Three call paths share one request builder:
//! - one-shot calls through the package default client,
//! - calls through the held client, which is rebuilt after a transport
//!   failure (reported as a `Recovery` on the returned error),
//! - write-then-read calls on the persistent connection.
//!
//! Body-bearing requests always end with the content-type of their
//! encoding, whatever the caller's header map said.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::{self, Client};
use crate::connection::Connection;
use crate::decode::{self, BodyDecoder};
use crate::error::{HttpError, Recovery};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::params::RequestParams;
use crate::types::{BodyKind, Decoded, ReturnShape};

/// Send-start and send-complete instants of the last persistent-connection
/// call. Overwritten on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub start_send: Option<Instant>,
    pub complete_send: Option<Instant>,
}

impl Timing {
    /// Time between writing the request and receiving the response.
    pub fn round_trip(&self) -> Option<Duration> {
        self.complete_send?.checked_duration_since(self.start_send?)
    }
}

pub struct HttpSession {
    client: Client,
    connection: Option<Connection>,
    pending: Option<HttpMethod>,
    last_request: Option<HttpRequest>,
    decoder: Option<Arc<dyn BodyDecoder>>,
    timing: Timing,
}

impl HttpSession {
    /// A session holding the default client.
    pub fn new() -> Self {
        Self::with_client(client::default_client())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            connection: None,
            pending: None,
            last_request: None,
            decoder: None,
            timing: Timing::default(),
        }
    }

    pub fn set_client(&mut self, client: Client) {
        self.client = client;
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Hold `connection` for the `conn_*` calls, dropping any previous one.
    pub fn set_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
        self.pending = None;
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn take_connection(&mut self) -> Option<Connection> {
        self.pending = None;
        self.connection.take()
    }

    /// Register the decoder used for `ReturnShape::Custom`.
    pub fn set_decoder(&mut self, decoder: impl BodyDecoder + 'static) {
        self.decoder = Some(Arc::new(decoder));
    }

    pub fn clear_decoder(&mut self) {
        self.decoder = None;
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn last_request(&self) -> Option<&HttpRequest> {
        self.last_request.as_ref()
    }

    // -----------------------------------------------------------------------
    // One-shot calls through the package default client
    // -----------------------------------------------------------------------

    pub fn get(&mut self, address: &str, shape: ReturnShape) -> Result<Decoded, HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Get, address, None, None)?;
        self.send_one_shot("get", request, shape)
    }

    pub fn post_form(&mut self, address: &str, shape: ReturnShape, data: &str) -> Result<Decoded, HttpError> {
        self.post(BodyKind::Form, address, shape, data)
    }

    pub fn post_json(&mut self, address: &str, shape: ReturnShape, data: &str) -> Result<Decoded, HttpError> {
        self.post(BodyKind::Json, address, shape, data)
    }

    pub fn post(
        &mut self,
        kind: BodyKind,
        address: &str,
        shape: ReturnShape,
        data: &str,
    ) -> Result<Decoded, HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Post, address, Some((kind, data)), None)?;
        let op = match kind {
            BodyKind::Json => "post_json",
            BodyKind::Form => "post_form",
        };
        self.send_one_shot(op, request, shape)
    }

    // -----------------------------------------------------------------------
    // Calls through the held client
    // -----------------------------------------------------------------------

    pub fn client_get(&mut self, address: &str, shape: ReturnShape) -> Result<Decoded, HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Get, address, None, None)?;
        self.send_held("client_get", request, shape)
    }

    pub fn client_post_form(
        &mut self,
        address: &str,
        shape: ReturnShape,
        data: &str,
    ) -> Result<Decoded, HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Post, address, Some((BodyKind::Form, data)), None)?;
        self.send_held("client_post_form", request, shape)
    }

    pub fn client_post_json(
        &mut self,
        address: &str,
        shape: ReturnShape,
        data: &str,
    ) -> Result<Decoded, HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Post, address, Some((BodyKind::Json, data)), None)?;
        self.send_held("client_post_json", request, shape)
    }

    pub fn client_post_form_with_headers(
        &mut self,
        address: &str,
        shape: ReturnShape,
        data: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Decoded, HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Post, address, Some((BodyKind::Form, data)), Some(headers))?;
        self.send_held("client_post_form_with_headers", request, shape)
    }

    pub fn client_post_json_with_headers(
        &mut self,
        address: &str,
        shape: ReturnShape,
        data: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Decoded, HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Post, address, Some((BodyKind::Json, data)), Some(headers))?;
        self.send_held("client_post_json_with_headers", request, shape)
    }

    /// Install the client `params` describes and issue `method` with the
    /// params' headers (and body, for POST) through it.
    pub fn execute(
        &mut self,
        params: &RequestParams,
        method: HttpMethod,
        shape: ReturnShape,
    ) -> Result<Decoded, HttpError> {
        self.client = params.build_client()?;
        let body = match method {
            HttpMethod::Get => None,
            HttpMethod::Post => Some((params.body_kind, params.body.as_str())),
        };
        let request = HttpRequest::prepare(method, &params.address, body, Some(&params.headers))?;
        self.send_held("execute", request, shape)
    }

    // -----------------------------------------------------------------------
    // Persistent connection: write now, read with `conn_response`
    // -----------------------------------------------------------------------

    pub fn conn_get(&mut self, address: &str, headers: &HashMap<String, String>) -> Result<(), HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Get, address, None, Some(headers))?;
        self.write_conn("conn_get", request)
    }

    pub fn conn_post_form(
        &mut self,
        address: &str,
        data: &str,
        headers: &HashMap<String, String>,
    ) -> Result<(), HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Post, address, Some((BodyKind::Form, data)), Some(headers))?;
        self.write_conn("conn_post_form", request)
    }

    pub fn conn_post_json(
        &mut self,
        address: &str,
        data: &str,
        headers: &HashMap<String, String>,
    ) -> Result<(), HttpError> {
        let request = HttpRequest::prepare(HttpMethod::Post, address, Some((BodyKind::Json, data)), Some(headers))?;
        self.write_conn("conn_post_json", request)
    }

    /// Block until the response to the last `conn_*` write arrives, then
    /// decode it.
    pub fn conn_response(&mut self, shape: ReturnShape) -> Result<Decoded, HttpError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(HttpError::NoConnection("conn_response"))?;
        let method = self.pending.take().ok_or(HttpError::NoPendingRequest)?;
        let result = connection.read_response(method);
        self.timing.complete_send = Some(Instant::now());
        self.decode(result?, shape)
    }

    fn write_conn(&mut self, op: &'static str, request: HttpRequest) -> Result<(), HttpError> {
        let connection = self.connection.as_mut().ok_or(HttpError::NoConnection(op))?;
        tracing::debug!(op, method = %request.method, url = %request.url, peer = connection.peer(), "writing request");

        self.timing.start_send = Some(Instant::now());
        let result = connection.write_request(&request);
        self.pending = result.is_ok().then_some(request.method);
        self.last_request = Some(request);
        result
    }

    fn send_one_shot(
        &mut self,
        op: &'static str,
        request: HttpRequest,
        shape: ReturnShape,
    ) -> Result<Decoded, HttpError> {
        let result = client::default_client().send(&request, op);
        self.last_request = Some(request);
        self.decode(result?, shape)
    }

    fn send_held(&mut self, op: &'static str, request: HttpRequest, shape: ReturnShape) -> Result<Decoded, HttpError> {
        let result = self.client.send(&request, op);
        self.last_request = Some(request);
        match result {
            Ok(response) => self.decode(response, shape),
            Err(HttpError::Transport { op, source, .. }) => {
                let recovery = self.rebuild_client(op, &source);
                Err(HttpError::Transport {
                    op,
                    source,
                    recovery: Some(recovery),
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Replace the held client after a transport failure. The failed call
    /// itself is never retried.
    fn rebuild_client(&mut self, op: &'static str, cause: &ureq::Error) -> Recovery {
        match self.client.rebuild() {
            Ok(client) => {
                let timeout_secs = client.timeout_secs();
                self.client = client;
                tracing::warn!(op, error = %cause, ?timeout_secs, "transport failure, held client rebuilt");
                Recovery::ClientRebuilt { timeout_secs }
            }
            Err(e) => {
                tracing::warn!(op, error = %cause, rebuild_error = %e, "transport failure, client rebuild failed");
                Recovery::RebuildFailed { reason: e.to_string() }
            }
        }
    }

    fn decode(&self, response: HttpResponse, shape: ReturnShape) -> Result<Decoded, HttpError> {
        decode::decode_response(response, shape, self.decoder.as_deref())
    }
}

impl Default for HttpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSession")
            .field("client", &self.client)
            .field("connection", &self.connection)
            .field("pending", &self.pending)
            .field("last_request", &self.last_request)
            .field("has_decoder", &self.decoder.is_some())
            .field("timing", &self.timing)
            .finish()
    }
}
