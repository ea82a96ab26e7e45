//! Access decision for proxied destinations.
//!
//! Both the plain HTTP path and the CONNECT path call [`is_allowed`] with the
//! raw `host[:port]` string they received, so the two protocols can never
//! disagree on a verdict.
//!
//! # Host Extraction
//!
//! Any `user[:password]@` prefix is dropped first; userinfo never names the
//! destination. The hostname is then everything before the first `:`. That rule cannot handle
//! IPv6 literals, so a bracketed literal is special-cased:
//!
//! - `api.example.com:443` -> `api.example.com`
//! - `api.example.com` -> `api.example.com`
//! - `[::1]:8080` -> `::1`
//! - `user@api.example.com:443` -> `api.example.com`
//! - `::1` (unbracketed) -> `` (empty, matched only by patterns such as `*`)
//!
//! Matching is ASCII case-insensitive (see [`HostMatcher`]).

use super::error::ProxyError;
use super::matcher::HostMatcher;
use std::fmt;

/// Decide whether a `host[:port]` destination is on the allowlist.
pub fn is_allowed(matcher: &HostMatcher, host_header: &str) -> bool {
    matcher.matches(hostname(host_header))
}

/// Drop a `user[:password]@` prefix from an authority.
pub fn strip_userinfo(authority: &str) -> &str {
    authority.rsplit_once('@').map_or(authority, |(_, host)| host)
}

/// The hostname part of a `host[:port]` string.
pub fn hostname(host_header: &str) -> &str {
    let host_header = strip_userinfo(host_header);
    if let Some(rest) = host_header.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }

    match host_header.split_once(':') {
        Some((host, _)) => host,
        None => host_header,
    }
}

/// A destination the proxy connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hostname or IP literal, without IPv6 brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Target {
    /// Parse a `host[:port]` authority, using `default_port` when no port
    /// is given.
    ///
    /// Examples:
    /// - `api.example.com:8443` -> ("api.example.com", 8443)
    /// - `api.example.com` -> ("api.example.com", default_port)
    /// - `[::1]:443` -> ("::1", 443)
    pub fn parse(authority: &str, default_port: u16) -> Result<Self, ProxyError> {
        let invalid = || ProxyError::InvalidTarget(authority.to_string());
        let authority = strip_userinfo(authority);

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            match after {
                "" => (host, None),
                _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match authority.rsplit_once(':') {
                // More than one colon and no brackets: not a valid authority
                Some((host, _)) if host.contains(':') => return Err(invalid()),
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` in a form `TcpStream::connect` accepts.
    pub fn connect_addr(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
