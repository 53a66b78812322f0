//! Request parameters: everything needed to issue one call, in a form that
//! can be loaded from configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::client::{self, Client};
use crate::error::HttpError;
use crate::types::{BodyKind, ProxyAuth};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.2; WOW64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/55.0.2883.87 Safari/537.36";

/// Parameters for one request. Every field has a default, so a partial
/// JSON document deserializes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestParams {
    pub address: String,
    pub body: String,
    pub body_kind: BodyKind,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: u64,
}

impl RequestParams {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Replace the header map with a desktop-browser header set.
    pub fn apply_browser_headers(&mut self) {
        self.headers = HashMap::from([
            ("accept".to_string(), "application/json, text/plain, */*".to_string()),
            ("accept-encoding".to_string(), "gzip, deflate".to_string()),
            ("accept-language".to_string(), "zh-CN,zh;q=0.8".to_string()),
            ("cache-control".to_string(), "no-cache".to_string()),
            ("pragma".to_string(), "no-cache".to_string()),
            ("user-agent".to_string(), BROWSER_USER_AGENT.to_string()),
        ]);
    }

    /// Timeout after the 30 second floor is applied.
    pub fn effective_timeout_secs(&self) -> u64 {
        client::clamp_timeout(self.timeout_secs)
    }

    /// Credentials, if a username is set. A missing password is empty.
    pub fn proxy_auth(&self) -> Option<ProxyAuth> {
        self.proxy_username.as_ref().filter(|name| !name.is_empty()).map(|username| {
            ProxyAuth::new(username.clone(), self.proxy_password.clone().unwrap_or_default())
        })
    }

    /// The client these parameters describe: SOCKS5 when a proxy host is
    /// set, otherwise a timeout client.
    pub fn build_client(&self) -> Result<Client, HttpError> {
        match self.proxy_host.as_deref().filter(|host| !host.is_empty()) {
            Some(host) => client::proxy_client(
                self.timeout_secs,
                host,
                self.proxy_port.as_deref().unwrap_or("1080"),
                self.proxy_auth(),
            ),
            None => Ok(client::timeout_client(self.timeout_secs)),
        }
    }
}
