//! Client factory: default, timeout-bound and SOCKS5-bound clients, plus raw
//! persistent connections.
//!
//! # Design
//! A `Client` is a `ureq::Agent` paired with the recipe it was built from.
//! The recipe is what lets the session rebuild an equivalent client after a
//! transport failure without the caller re-supplying proxy details.
//!
//! Every agent is configured with `http_status_as_error(false)` so non-2xx
//! responses come back as data and the decoder can report status, reason
//! and body together.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use url::Url;

use crate::connection::Connection;
use crate::error::HttpError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::ProxyAuth;

/// Timeouts below this many seconds are raised to it.
pub const MIN_TIMEOUT_SECS: u64 = 30;

/// Agent behind `default_client`: library defaults, environment proxy
/// settings honoured, no timeouts.
static DEFAULT_AGENT: LazyLock<ureq::Agent> = LazyLock::new(|| {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent()
});

/// Apply the timeout floor.
pub fn clamp_timeout(timeout_secs: u64) -> u64 {
    timeout_secs.max(MIN_TIMEOUT_SECS)
}

/// How a `Client` was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRecipe {
    Default,
    Timeout {
        timeout_secs: u64,
    },
    Socks5 {
        timeout_secs: u64,
        host: String,
        port: u16,
        auth: Option<ProxyAuth>,
    },
}

/// A configured HTTP client. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Client {
    agent: ureq::Agent,
    recipe: ClientRecipe,
}

/// The library's default client.
pub fn default_client() -> Client {
    Client {
        agent: DEFAULT_AGENT.clone(),
        recipe: ClientRecipe::Default,
    }
}

/// A client whose connect, response-header and overall timeouts are all
/// `max(timeout_secs, 30)` seconds.
pub fn timeout_client(timeout_secs: u64) -> Client {
    let timeout_secs = clamp_timeout(timeout_secs);
    tracing::debug!(timeout_secs, "building timeout client");
    Client {
        agent: build_agent(timeout_secs, None),
        recipe: ClientRecipe::Timeout { timeout_secs },
    }
}

/// A client that dials every connection through the SOCKS5 proxy at
/// `host:port`, with the same clamped timeouts as `timeout_client`.
pub fn proxy_client(
    timeout_secs: u64,
    host: &str,
    port: &str,
    auth: Option<ProxyAuth>,
) -> Result<Client, HttpError> {
    let timeout_secs = clamp_timeout(timeout_secs);
    let address = format!("{host}:{port}");
    let setup_error = |reason: String| HttpError::ProxySetup {
        address: address.clone(),
        reason,
    };

    if host.trim().is_empty() {
        return Err(setup_error("proxy host is empty".to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|e| setup_error(format!("invalid proxy port: {e}")))?;
    let proxy = socks5_proxy(host, port, auth.as_ref()).map_err(setup_error)?;

    tracing::debug!(timeout_secs, proxy = %address, with_auth = auth.is_some(), "building SOCKS5 client");
    Ok(Client {
        agent: build_agent(timeout_secs, Some(proxy)),
        recipe: ClientRecipe::Socks5 {
            timeout_secs,
            host: host.to_string(),
            port,
            auth,
        },
    })
}

/// Open a raw persistent connection to the host named by `address`.
///
/// `https` addresses get a TLS session, optionally without certificate
/// verification; `http` addresses get plain TCP. Both use the clamped
/// timeout for connect, read and write.
pub fn raw_connection(
    address: &str,
    timeout_secs: u64,
    skip_tls_verify: bool,
) -> Result<Connection, HttpError> {
    Connection::open(address, clamp_timeout(timeout_secs), skip_tls_verify)
}

fn build_agent(timeout_secs: u64, proxy: Option<ureq::Proxy>) -> ureq::Agent {
    let timeout = Some(Duration::from_secs(timeout_secs));
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(timeout)
        .timeout_connect(timeout)
        .timeout_recv_response(timeout)
        .proxy(proxy)
        .build()
        .new_agent()
}

fn socks5_proxy(host: &str, port: u16, auth: Option<&ProxyAuth>) -> Result<ureq::Proxy, String> {
    let mut url = Url::parse(&format!("socks5://{host}:{port}")).map_err(|e| e.to_string())?;
    if let Some(auth) = auth {
        url.set_username(&auth.username)
            .map_err(|()| "proxy URL cannot carry a username".to_string())?;
        url.set_password(Some(&auth.password))
            .map_err(|()| "proxy URL cannot carry a password".to_string())?;
    }
    ureq::Proxy::new(url.as_str()).map_err(|e| e.to_string())
}

impl Client {
    pub fn recipe(&self) -> &ClientRecipe {
        &self.recipe
    }

    /// The clamped timeout, or `None` for the default client.
    pub fn timeout_secs(&self) -> Option<u64> {
        match &self.recipe {
            ClientRecipe::Default => None,
            ClientRecipe::Timeout { timeout_secs } | ClientRecipe::Socks5 { timeout_secs, .. } => {
                Some(*timeout_secs)
            }
        }
    }

    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout_secs().map(Duration::from_secs)
    }

    /// A fresh client built from the same recipe.
    pub fn rebuild(&self) -> Result<Client, HttpError> {
        match &self.recipe {
            ClientRecipe::Default => Ok(default_client()),
            ClientRecipe::Timeout { timeout_secs } => Ok(timeout_client(*timeout_secs)),
            ClientRecipe::Socks5 {
                timeout_secs,
                host,
                port,
                auth,
            } => proxy_client(*timeout_secs, host, &port.to_string(), auth.clone()),
        }
    }

    /// Issue `request` and buffer the whole response.
    ///
    /// Transport errors come back without a recovery attached; the session
    /// decides whether to rebuild.
    pub fn send(&self, request: &HttpRequest, op: &'static str) -> Result<HttpResponse, HttpError> {
        let url = request.url.as_str();
        tracing::debug!(op, method = %request.method, url, "sending request");

        let result = match request.method {
            HttpMethod::Get => with_headers(self.agent.get(url), &request.headers).call(),
            HttpMethod::Post => {
                with_headers(self.agent.post(url), &request.headers).send(request.body.as_slice())
            }
        };
        let mut response = result.map_err(|source| HttpError::Transport {
            op,
            source,
            recovery: None,
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|source| HttpError::BodyRead { source })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("recipe", &self.recipe).finish_non_exhaustive()
    }
}
