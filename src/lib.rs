//! hostgate: forward HTTP proxy with a hostname allowlist
//!
//! This crate provides a forward proxy that only lets clients reach
//! destinations whose hostname matches an operator-defined list of glob
//! patterns. Plain HTTP requests are forwarded; HTTPS goes through CONNECT
//! tunnels that are relayed byte-for-byte without inspection.
//!
//! # Security Model
//!
//! The model is **fail-closed**: an empty allowlist rejects everything, and
//! a denied CONNECT never causes an outbound connection attempt.
//!
//! # Architecture
//!
//! - **Proxy**: hostname matching, the allow/deny decision, HTTP
//!   forwarding, CONNECT tunneling, and the connection lifecycle
//! - **Config**: Hierarchical TOML configuration merged with CLI flags
//! - **Telemetry**: `tracing`-based audit records and diagnostics
//! - **systemd**: readiness notification

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod proxy;
pub mod systemd;
pub mod telemetry;
