//! Telemetry and audit logging for hostgate.
//!
//! Audit records and diagnostic logs both flow through `tracing`. Audit
//! records use the `hostgate::audit` target so they can be filtered apart
//! from the rest, e.g. `RUST_LOG=hostgate::audit=info`.
//!
//! # Usage
//!
//! ```
//! use hostgate::telemetry::{self, AuditEvent, Decision, Protocol};
//!
//! telemetry::audit(&AuditEvent::new(Protocol::Connect, Decision::Rejected, "evil.io"));
//! ```
//!
//! # Record Format
//!
//! ```text
//! HTTP ALLOWED api.example.com
//! CONNECT REJECTED evil.io
//! ```

mod events;

pub use events::{AuditEvent, Decision, Protocol};

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tracing target for audit records.
pub const AUDIT_TARGET: &str = "hostgate::audit";

/// Emit an audit record.
pub fn audit(event: &AuditEvent) {
    tracing::info!(target: AUDIT_TARGET, "{}", event);
}

/// Install the global tracing subscriber, writing to stdout.
///
/// `verbose` forces `debug`; otherwise `RUST_LOG` applies, falling back to
/// `info`.
pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
