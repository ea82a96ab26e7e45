//! HTTP CONNECT method handling for HTTPS tunneling.
//!
//! This module handles the HTTP CONNECT method used by clients to establish
//! tunnels through the proxy. The flow is:
//!
//! 1. Client sends: `CONNECT api.example.com:443 HTTP/1.1`
//! 2. Proxy checks the host against the allowlist
//! 3. If denied: Return `403 Forbidden` and close; nothing is dialed
//! 4. If allowed: Connect to the target, return `200`, upgrade to a tunnel
//! 5. Relay bytes in both directions until both sides are done
//!
//! The proxy never looks inside the tunnel. TLS, if any, runs end to end
//! between the client and the origin.
//!
//! # Example
//!
//! ```ignore
//! use hostgate::proxy::connect::handle_connect;
//!
//! // Called from the proxy server when a CONNECT request is received
//! let response = handle_connect(
//!     request,
//!     &matcher,
//!     connect_timeout,
//!     &tunnels,
//!     &terminate,
//! ).await?;
//! ```

use super::error::{ProxyError, ProxyResult};
use super::matcher::HostMatcher;
use super::policy::{self, Target};
use super::response::{empty_body, forbidden_close_response, ProxyBody};
use crate::telemetry::{self, AuditEvent, Decision, Protocol};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Port used when a CONNECT target names none.
pub const DEFAULT_CONNECT_PORT: u16 = 443;

/// Handle HTTP CONNECT request for HTTPS tunneling.
///
/// On approval the upstream connection is opened before answering, so a
/// `200` always means the tunnel is live. The relay task is spawned on
/// `tunnels` and stops early when `terminate` is cancelled.
///
/// # Arguments
///
/// * `req` - The HTTP CONNECT request.
/// * `matcher` - The compiled allowlist.
/// * `connect_timeout` - Bound on the upstream TCP connect.
/// * `tunnels` - Tracker that owns the relay task.
/// * `terminate` - Force-close signal for the relay task.
pub async fn handle_connect(
    req: Request<Incoming>,
    matcher: &HostMatcher,
    connect_timeout: Duration,
    tunnels: &TaskTracker,
    terminate: &CancellationToken,
) -> ProxyResult<Response<ProxyBody>> {
    let authority = req
        .uri()
        .authority()
        .map(|a| policy::strip_userinfo(a.as_str()).to_string())
        .ok_or(ProxyError::MissingHost)?;

    let allowed = policy::is_allowed(matcher, &authority);
    telemetry::audit(&AuditEvent::new(
        Protocol::Connect,
        Decision::from(allowed),
        policy::hostname(&authority),
    ));

    if !allowed {
        return Ok(forbidden_close_response());
    }

    let target = Target::parse(&authority, DEFAULT_CONNECT_PORT)?;
    if let Some(pattern) = matcher.matching_pattern(&target.host) {
        debug!("{} matched pattern '{}'", target.host, pattern);
    }

    let upstream = connect_upstream(&target, connect_timeout).await?;
    debug!("Connected to upstream {}", target);

    let terminate = terminate.clone();
    tunnels.spawn(async move {
        tokio::select! {
            result = tunnel(req, upstream) => {
                match result {
                    Ok((sent, received)) => {
                        debug!("Tunnel to {} closed ({} bytes up, {} bytes down)", target, sent, received);
                    }
                    Err(e) if e.is_disconnect() => debug!("Tunnel to {} ended: {}", target, e),
                    Err(e) => warn!("Tunnel to {} failed: {}", target, e),
                }
            }
            _ = terminate.cancelled() => {
                debug!("Tunnel to {} force-closed", target);
            }
        }
    });

    // Return 200 to initiate the upgrade
    Ok(Response::new(empty_body()))
}

/// Open the upstream TCP connection within `timeout`.
pub async fn connect_upstream(target: &Target, timeout: Duration) -> ProxyResult<TcpStream> {
    let addr = target.connect_addr();

    match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
            Err(ProxyError::UpstreamTimeout { addr, timeout })
        }
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            addr,
            message: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamTimeout { addr, timeout }),
    }
}

/// Wait for the client's upgrade, then relay until the tunnel is done.
async fn tunnel(req: Request<Incoming>, upstream: TcpStream) -> ProxyResult<(u64, u64)> {
    let upgraded = hyper::upgrade::on(req)
        .await
        .map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?;

    relay(TokioIo::new(upgraded), upstream)
        .await
        .map_err(ProxyError::Relay)
}

/// Copy bytes between `client` and `upstream` in both directions.
///
/// EOF on one side shuts down the write half of the other and lets the
/// opposite direction run on. The first I/O error tears down both.
/// Returns `(client -> upstream, upstream -> client)` byte counts.
pub async fn relay<C, U>(client: C, upstream: U) -> io::Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let client_to_upstream = async {
        let n = tokio::io::copy(&mut client_read, &mut upstream_write).await?;
        // Peer may already be gone
        let _ = upstream_write.shutdown().await;
        Ok::<_, io::Error>(n)
    };

    let upstream_to_client = async {
        let n = tokio::io::copy(&mut upstream_read, &mut client_write).await?;
        let _ = client_write.shutdown().await;
        Ok::<_, io::Error>(n)
    };

    tokio::try_join!(client_to_upstream, upstream_to_client)
}
