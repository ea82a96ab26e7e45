//! Configuration schema definitions.
//!
//! This module defines the structure of the hostgate configuration files.
//! Every key lives under a `[proxy]` table:
//!
//! ```toml
//! [proxy]
//! listen = ":8080"
//! allow = ["*.example.com", "api.github.com"]
//! verbose = false
//! connect_timeout_secs = 30
//! request_timeout_secs = 60
//! shutdown_timeout_secs = 10
//! ```
//!
//! Files deserialize into [`Config`], which only records what was set.
//! After merging, [`Config::resolve`] applies defaults and validates
//! everything into [`Settings`].

use crate::proxy::server::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_LISTEN_ADDR, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::proxy::{HostMatcher, ProxyConfig};
use serde::{Deserialize, Serialize};
use std::net::{Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use super::error::ConfigError;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Proxy settings.
    #[serde(default)]
    pub proxy: ProxySection,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Lists (allow) are merged (appended).
    /// Scalars (listen, timeouts, etc.) are overridden when set.
    pub fn merge(&mut self, other: Config) {
        self.proxy.merge(other.proxy);
    }

    /// Apply defaults, validate, and compile the allowlist.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let proxy = &self.proxy;

        let listen_addr = match proxy.listen.as_deref() {
            Some(listen) => parse_listen_addr(listen)?,
            None => DEFAULT_LISTEN_ADDR,
        };

        let connect_timeout = nonzero_secs(
            "proxy.connect_timeout_secs",
            proxy.connect_timeout_secs,
            DEFAULT_CONNECT_TIMEOUT,
        )?;
        let request_timeout = nonzero_secs(
            "proxy.request_timeout_secs",
            proxy.request_timeout_secs,
            DEFAULT_REQUEST_TIMEOUT,
        )?;

        // Zero is allowed here: close everything immediately.
        let shutdown_timeout = proxy
            .shutdown_timeout_secs
            .map_or(DEFAULT_SHUTDOWN_TIMEOUT, Duration::from_secs);

        let matcher = HostMatcher::compile(&proxy.allow)?;

        Ok(Settings {
            listen_addr,
            matcher,
            verbose: proxy.verbose.unwrap_or(false),
            connect_timeout,
            request_timeout,
            shutdown_timeout,
        })
    }
}

/// The `[proxy]` table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxySection {
    /// Listen address, `HOST:PORT` or `:PORT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Allowed hostname glob patterns.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Log per-request detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    /// Upstream connect timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Upstream response timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Shutdown grace period in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_secs: Option<u64>,
}

impl ProxySection {
    fn merge(&mut self, other: ProxySection) {
        self.allow.extend(other.allow);

        // Scalars are overridden if set
        if other.listen.is_some() {
            self.listen = other.listen;
        }
        if other.verbose.is_some() {
            self.verbose = other.verbose;
        }
        if other.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.shutdown_timeout_secs.is_some() {
            self.shutdown_timeout_secs = other.shutdown_timeout_secs;
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Compiled allowlist.
    pub matcher: HostMatcher,
    /// Log per-request detail.
    pub verbose: bool,
    /// Upstream connect timeout.
    pub connect_timeout: Duration,
    /// Upstream response timeout.
    pub request_timeout: Duration,
    /// Shutdown grace period.
    pub shutdown_timeout: Duration,
}

impl Settings {
    /// The proxy server configuration these settings describe.
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            listen_addr: self.listen_addr,
            matcher: Arc::new(self.matcher.clone()),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Parse a listen address.
///
/// Examples:
/// - `:8080` -> `[::]:8080` (all interfaces, IPv4 included)
/// - `127.0.0.1:3128` -> `127.0.0.1:3128`
/// - `[::1]:8080` -> `[::1]:8080`
/// - `localhost:8080` -> first address `localhost` resolves to
pub fn parse_listen_addr(listen: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: "listen".to_string(),
        message,
    };

    if let Some(port) = listen.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid(format!("invalid port in '{}'", listen)))?;
        return Ok(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)));
    }

    if let Ok(addr) = listen.parse::<SocketAddr>() {
        return Ok(addr);
    }

    listen
        .to_socket_addrs()
        .map_err(|e| invalid(format!("'{}': {}", listen, e)))?
        .next()
        .ok_or_else(|| invalid(format!("'{}' resolved to no addresses", listen)))
}

fn nonzero_secs(
    field: &str,
    value: Option<u64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}
