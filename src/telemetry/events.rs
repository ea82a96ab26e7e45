//! Audit record types.
//!
//! Every access decision produces exactly one record, rendered as
//! `<PROTOCOL> <DECISION> <host>`, for example `CONNECT REJECTED evil.io`.

use std::fmt;

/// Which proxy path handled the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain HTTP forwarding.
    Http,
    /// CONNECT tunneling.
    Connect,
}

impl Protocol {
    /// Upper-case label used in audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Connect => "CONNECT",
        }
    }
}

/// Outcome of an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Destination matched the allowlist.
    Allowed,
    /// Destination matched nothing on the allowlist.
    Rejected,
}

impl Decision {
    /// Upper-case label used in audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "ALLOWED",
            Decision::Rejected => "REJECTED",
        }
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allowed
        } else {
            Decision::Rejected
        }
    }
}

/// A single access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Proxy path that made the decision.
    pub protocol: Protocol,
    /// The verdict.
    pub decision: Decision,
    /// Hostname the verdict applies to, without port.
    pub host: String,
}

impl AuditEvent {
    /// Create a record for `host`.
    pub fn new(protocol: Protocol, decision: Decision, host: impl Into<String>) -> Self {
        Self {
            protocol,
            decision,
            host: host.into(),
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.protocol.as_str(),
            self.decision.as_str(),
            self.host
        )
    }
}
