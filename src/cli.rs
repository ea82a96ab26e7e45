//! Command-line interface definitions for hostgate.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Forward HTTP proxy restricted to an allowlist of hostnames.
///
/// hostgate forwards plain HTTP requests and tunnels CONNECT requests, but
/// only to destinations whose hostname matches one of the `--allow` glob
/// patterns. Everything else is answered with 403 Forbidden.
#[derive(Parser, Debug, Default)]
#[command(name = "hostgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    ///
    /// Accepts `HOST:PORT`, or `:PORT` to listen on all interfaces.
    /// Defaults to `:8080`.
    #[arg(short = 'l', long = "listen", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Allowed destination hostname pattern (repeatable).
    ///
    /// Glob syntax: `*` matches any run of characters, `?` one character,
    /// `[a-z]` a class, `{a,b}` alternatives. Several patterns may be given
    /// comma-separated, e.g. `--allow '*.example.com,api.github.com'`;
    /// commas inside `{...}` or `[...]` stay part of the pattern.
    #[arg(short = 'a', long = "allow", value_name = "PATTERN")]
    pub allow: Vec<String>,

    /// Log per-request detail (debug level).
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seconds to wait for open connections on shutdown before closing them.
    #[arg(long = "shutdown-timeout", value_name = "SECS")]
    pub shutdown_timeout: Option<u64>,
}

impl Cli {
    /// The `--allow` patterns, with comma-separated lists expanded.
    pub fn allow_patterns(&self) -> Vec<String> {
        self.allow
            .iter()
            .flat_map(|value| split_patterns(value))
            .collect()
    }
}

/// Split on commas that are not inside `{...}`, `[...]` or escaped.
fn split_patterns(value: &str) -> Vec<String> {
    let mut patterns = Vec::new();
    let mut current = String::new();
    let mut braces = 0usize;
    let mut in_class = false;
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                continue;
            }
            '[' if !in_class => in_class = true,
            ']' if in_class && !current.ends_with('[') && !current.ends_with("[!") => {
                in_class = false
            }
            '{' if !in_class => braces += 1,
            '}' if !in_class => braces = braces.saturating_sub(1),
            ',' if !in_class && braces == 0 => {
                patterns.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    patterns.push(current);

    patterns.retain(|p| !p.is_empty());
    patterns
}
