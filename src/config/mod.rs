//! Configuration system for hostgate.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/hostgate/config.toml`
//! 2. User config: `~/.config/hostgate/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! No file is required; with none present the proxy listens on `:8080`
//! with an empty allowlist, rejecting everything.
//!
//! # Merge Behavior
//!
//! - **Lists** (`allow`) are **merged** (appended)
//! - **Scalars** (`listen`, timeouts, `verbose`) are **overridden**

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{parse_listen_addr, Config, ProxySection, Settings};
