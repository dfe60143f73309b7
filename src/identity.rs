//! Client identity and rate-limit key construction.
//!
//! [`RequestIdentity`] is the explicit request-scoped context value supplied
//! by the boundary layer (router/auth middleware) and threaded as an argument
//! — never ambient thread-local state. [`KeyStrategy`] turns an identity into
//! a namespaced counter key.

use serde::{Deserialize, Serialize};

/// Header names the boundary layer reads the client address from.
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Request-scoped identity resolved by the boundary layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Raw `X-Forwarded-For` header value, possibly comma-separated.
    pub forwarded_for: Option<String>,
    /// Raw `X-Real-IP` header value.
    pub real_ip: Option<String>,
    /// Peer socket address.
    pub remote_addr: Option<String>,
    /// Authenticated user id, when present.
    pub user_id: Option<String>,
    /// Endpoint descriptor, conventionally `METHOD:/path`.
    pub endpoint: Option<String>,
}

impl RequestIdentity {
    /// Identity known only by its socket address.
    pub fn from_remote_addr(addr: impl Into<String>) -> Self {
        Self { remote_addr: Some(addr.into()), ..Self::default() }
    }

    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    pub fn with_real_ip(mut self, value: impl Into<String>) -> Self {
        self.real_ip = Some(value.into());
        self
    }

    pub fn with_user_id(mut self, value: impl Into<String>) -> Self {
        self.user_id = Some(value.into());
        self
    }

    pub fn with_endpoint(mut self, value: impl Into<String>) -> Self {
        self.endpoint = Some(value.into());
        self
    }

    /// Resolve the client IP through the deterministic fallback chain:
    /// first `X-Forwarded-For` entry, then `X-Real-IP`, then the socket
    /// address. Empty and `unknown` values are skipped; the IPv6 loopback is
    /// normalized to its IPv4 form.
    pub fn client_ip(&self) -> String {
        if let Some(forwarded) = &self.forwarded_for {
            let first = forwarded.split(',').next().unwrap_or("").trim();
            if is_usable(first) {
                return first.to_string();
            }
        }
        if let Some(real_ip) = &self.real_ip {
            let real_ip = real_ip.trim();
            if is_usable(real_ip) {
                return real_ip.to_string();
            }
        }
        match self.remote_addr.as_deref().map(str::trim) {
            Some("0:0:0:0:0:0:0:1") | Some("::1") => "127.0.0.1".to_string(),
            Some(addr) if !addr.is_empty() => addr.to_string(),
            _ => "unknown".to_string(),
        }
    }
}

fn is_usable(value: &str) -> bool {
    !value.is_empty() && !value.eq_ignore_ascii_case("unknown")
}

/// How a rate-limit counter key is derived from the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStrategy {
    /// `ip:<addr>` — one window per client address.
    ByIp,
    /// `user:<id>` — one window per authenticated user; falls back to the
    /// IP key when the request is unauthenticated.
    ByUser,
    /// `endpoint:<method:path>:<addr>` — one window per endpoint per client.
    ByEndpoint,
    /// `<prefix>:<addr>` — caller-chosen scope, still per client.
    Custom(String),
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self::ByIp
    }
}

impl KeyStrategy {
    /// Build the namespaced counter key for a request.
    pub fn key_for(&self, identity: &RequestIdentity) -> String {
        match self {
            Self::ByIp => format!("ip:{}", identity.client_ip()),
            Self::ByUser => match &identity.user_id {
                Some(user) => format!("user:{user}"),
                None => format!("ip:{}", identity.client_ip()),
            },
            Self::ByEndpoint => {
                let endpoint = identity.endpoint.as_deref().unwrap_or("*");
                format!("endpoint:{}:{}", endpoint, identity.client_ip())
            }
            Self::Custom(prefix) => format!("{}:{}", prefix, identity.client_ip()),
        }
    }
}
