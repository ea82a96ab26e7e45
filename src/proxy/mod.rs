//! Forward proxy with hostname allowlist enforcement.
//!
//! This module provides the proxy core:
//! - Glob hostname matching (`matcher`)
//! - The single allow/deny decision shared by both protocol paths (`policy`)
//! - Plain HTTP forwarding (`http`)
//! - HTTP CONNECT tunneling (`connect`)
//! - Listener, dispatch and graceful shutdown (`server`)
//!
//! # Architecture
//!
//! ```text
//!   client ──► ProxyServer ──► CONNECT? ──yes──► handle_connect ──► TCP relay ──► origin
//!                                 │
//!                                 no
//!                                 ▼
//!                            handle_http ──► pooled HTTP client ──► origin
//!
//!   both paths: policy::is_allowed(matcher, "host[:port]")
//!               denied ──► 403 Forbidden, origin never contacted
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hostgate::proxy::{HostMatcher, ProxyServerBuilder, ShutdownHandle};
//!
//! let matcher = HostMatcher::compile(["*.example.com", "api.github.com"])?;
//! let (shutdown, shutdown_rx) = ShutdownHandle::new();
//!
//! let server = ProxyServerBuilder::new()
//!     .matcher(matcher)
//!     .bind(shutdown_rx)
//!     .await?;
//! server.run(|addr| println!("ready on {addr}")).await?;
//! ```

pub mod connect;
pub mod error;
pub mod http;
pub mod matcher;
pub mod policy;
pub mod response;
pub mod server;

// Re-export main types for convenient access
pub use error::{ProxyError, ProxyResult};
pub use matcher::{HostMatcher, PatternError};
pub use policy::{is_allowed, Target};
pub use server::{ProxyConfig, ProxyServer, ProxyServerBuilder, ServerState, ShutdownHandle};
