//! HTTP proxy server implementation.
//!
//! This module provides the main proxy server that:
//! - Listens for client connections on a TCP socket
//! - Dispatches CONNECT requests to the tunnel handler
//! - Dispatches every other request to the plain HTTP forwarder
//! - Coordinates graceful shutdown
//!
//! # Architecture
//!
//! The proxy uses hyper's HTTP/1.1 server with upgrade support for CONNECT.
//! Each connection, and each tunnel it opens, runs in its own Tokio task
//! tracked by a [`TaskTracker`].
//!
//! Shutdown moves the server `Serving -> Draining -> Stopped`:
//!
//! 1. The listener is dropped, so no new connections are accepted
//! 2. Open HTTP connections are asked to close after their current request
//! 3. After the grace period, whatever is still open is cancelled
//!
//! # Example
//!
//! ```ignore
//! use hostgate::proxy::{ProxyServerBuilder, ShutdownHandle};
//!
//! let (shutdown, shutdown_rx) = ShutdownHandle::new();
//! let server = ProxyServerBuilder::new()
//!     .listen_addr("127.0.0.1:8080".parse()?)
//!     .matcher(matcher)
//!     .bind(shutdown_rx)
//!     .await?;
//!
//! tokio::spawn(server.run(|addr| println!("listening on {addr}")));
//!
//! // To shutdown:
//! shutdown.shutdown();
//! ```

use super::connect::handle_connect;
use super::error::{ProxyError, ProxyResult};
use super::http::{build_client, handle_http, HttpClient};
use super::matcher::HostMatcher;
use super::response::{status_response, ProxyBody};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default listen address (all interfaces, port 8080).
///
/// The unspecified IPv6 address is bound dual-stack, so IPv4 clients are
/// served too. Hosts without IPv6 fall back to `0.0.0.0`.
pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V6(Ipv6Addr::UNSPECIFIED), 8080);

/// Pending connection queue length.
const LISTEN_BACKLOG: i32 = 1024;

/// Default upstream connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for an upstream HTTP response to start.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default grace period for draining on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// First delay after a transient accept error.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Ceiling for the accept error delay.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Compiled allowlist, shared read-only by every connection.
    pub matcher: Arc<HostMatcher>,
    /// Bound on opening an upstream TCP connection.
    pub connect_timeout: Duration,
    /// Bound on an upstream HTTP response starting to arrive.
    pub request_timeout: Duration,
    /// Grace period between "stop accepting" and force-closing.
    pub shutdown_timeout: Duration,
}

/// Lifecycle of a [`ProxyServer`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting and serving connections.
    Serving,
    /// Listener closed; waiting for open connections to finish.
    Draining,
    /// Every connection and tunnel is gone.
    Stopped,
}

/// Requests shutdown of every server subscribed to it.
///
/// Cloning is cheap. Dropping every handle also shuts the server down.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Create a handle and the receiver to pass to [`ProxyServer::bind`].
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Begin shutdown. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        let already = self.tx.send_replace(true);
        if !already {
            info!("Shutdown requested");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another receiver for the same signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// State shared by every connection task.
struct Shared {
    matcher: Arc<HostMatcher>,
    client: HttpClient,
    connect_timeout: Duration,
    request_timeout: Duration,
    tasks: TaskTracker,
    terminate: CancellationToken,
}

/// The main proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    listener: TcpListener,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ServerState>,
}

impl ProxyServer {
    /// Bind the listening socket.
    ///
    /// # Arguments
    ///
    /// * `config` - Proxy configuration.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub async fn bind(config: ProxyConfig, shutdown_rx: watch::Receiver<bool>) -> ProxyResult<Self> {
        let listener = bind_listener(config.listen_addr).map_err(|source| ProxyError::Bind {
            addr: config.listen_addr.to_string(),
            source,
        })?;

        let (state_tx, _) = watch::channel(ServerState::Serving);

        Ok(Self {
            config,
            listener,
            shutdown_rx,
            state_tx,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Watch the server's lifecycle state.
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// Serve until shutdown, then drain.
    ///
    /// `ready` is called exactly once with the bound address before the
    /// first connection is accepted. Returns `Ok` after a clean shutdown,
    /// or `Err` if accepting failed with a non-transient error (open
    /// connections are still drained first).
    pub async fn run<F>(self, ready: F) -> ProxyResult<()>
    where
        F: FnOnce(SocketAddr),
    {
        let ProxyServer {
            config,
            listener,
            mut shutdown_rx,
            state_tx,
        } = self;

        let local_addr = listener.local_addr()?;
        let tasks = TaskTracker::new();
        let draining = CancellationToken::new();
        let terminate = CancellationToken::new();

        let shared = Arc::new(Shared {
            matcher: config.matcher.clone(),
            client: build_client(config.connect_timeout),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            tasks: tasks.clone(),
            terminate: terminate.clone(),
        });

        info!(
            "Proxy listening on {} ({} allowlist patterns)",
            local_addr,
            config.matcher.len()
        );
        ready(local_addr);

        let mut backoff = AcceptBackoff::new();
        let result = loop {
            if *shutdown_rx.borrow_and_update() {
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        debug!("All shutdown handles dropped");
                        break Ok(());
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            backoff.reset();
                            debug!("Accepted connection from {}", peer);
                            spawn_connection_handler(&tasks, stream, shared.clone(), draining.clone());
                        }
                        Err(e) if is_transient_accept_error(&e) => {
                            let delay = backoff.next_delay();
                            warn!("Transient accept error, retrying in {:?}: {}", delay, e);
                            pause_unless_shutdown(delay, &mut shutdown_rx).await;
                        }
                        Err(e) => break Err(ProxyError::Accept(e)),
                    }
                }
            }
        };

        info!("Proxy shutting down");
        drop(listener);

        let _ = state_tx.send_replace(ServerState::Draining);
        draining.cancel();
        tasks.close();

        if tokio::time::timeout(config.shutdown_timeout, tasks.wait())
            .await
            .is_err()
        {
            warn!(
                "ShutdownTimeoutExceeded: {} tasks still open after {:?}, closing them",
                tasks.len(),
                config.shutdown_timeout
            );
            terminate.cancel();
            tasks.wait().await;
        }

        let _ = state_tx.send_replace(ServerState::Stopped);
        info!("Proxy stopped");

        result
    }
}

/// Spawn a task to handle a single connection.
fn spawn_connection_handler(
    tasks: &TaskTracker,
    stream: TcpStream,
    shared: Arc<Shared>,
    draining: CancellationToken,
) {
    tasks.spawn(async move {
        if let Err(e) = handle_connection(stream, shared, draining).await {
            // Don't log connection resets as errors - they're common
            if e.is_disconnect() {
                debug!("Connection ended: {}", e);
            } else {
                warn!("Connection error: {}", e);
            }
        }
    });
}

/// Handle a single client connection.
async fn handle_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    draining: CancellationToken,
) -> ProxyResult<()> {
    let io = TokioIo::new(stream);
    let terminate = shared.terminate.clone();

    // Create the service that handles each request
    let service = service_fn(move |req: Request<Incoming>| {
        let shared = shared.clone();
        async move { Ok::<_, Infallible>(proxy_request(req, &shared).await) }
    });

    // Serve HTTP/1.1 with support for upgrades (needed for CONNECT)
    let conn = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => return result.map_err(ProxyError::from),
        _ = draining.cancelled() => {}
    }

    conn.as_mut().graceful_shutdown();

    tokio::select! {
        result = conn.as_mut() => result.map_err(ProxyError::from),
        _ = terminate.cancelled() => {
            debug!("Connection force-closed");
            Ok(())
        }
    }
}

/// Process a single proxy request.
async fn proxy_request(req: Request<Incoming>, shared: &Shared) -> Response<ProxyBody> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let result = if method == Method::CONNECT {
        // HTTPS tunneling via CONNECT
        handle_connect(
            req,
            &shared.matcher,
            shared.connect_timeout,
            &shared.tasks,
            &shared.terminate,
        )
        .await
    } else {
        // Plain HTTP proxying
        handle_http(req, &shared.matcher, &shared.client, shared.request_timeout).await
    };

    match result {
        Ok(response) => {
            debug!("{} {} -> {}", method, uri, response.status());
            response
        }
        Err(e) => {
            let status = e.status();
            if status == StatusCode::BAD_REQUEST {
                debug!("{} {} rejected as malformed: {}", method, uri, e);
            } else {
                warn!("{} {} upstream failure: {}", method, uri, e);
            }
            status_response(status)
        }
    }
}

/// Accept errors that say nothing about the listener itself.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

/// Sleep for `delay`, returning early if shutdown is requested.
async fn pause_unless_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown_rx.changed() => {}
    }
}

/// Bind a non-blocking listener.
///
/// An unspecified IPv6 address accepts IPv4 clients as well. If IPv6 is
/// unavailable on the host, the same port is bound on `0.0.0.0` instead.
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    match listen_on(addr) {
        Err(e) if is_unspecified_v6(addr) && e.kind() != io::ErrorKind::AddrInUse => {
            debug!("IPv6 listen on {} failed ({}), using IPv4", addr, e);
            listen_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, addr.port())))
        }
        result => result,
    }
}

fn listen_on(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

fn is_unspecified_v6(addr: SocketAddr) -> bool {
    matches!(addr, SocketAddr::V6(v6) if v6.ip().is_unspecified())
}

/// Exponential delay between retries of a failing accept.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self {
            next: ACCEPT_BACKOFF_MIN,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = ACCEPT_BACKOFF_MIN;
    }
}

/// Builder for ProxyServer configuration.
pub struct ProxyServerBuilder {
    listen_addr: SocketAddr,
    matcher: Arc<HostMatcher>,
    connect_timeout: Duration,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ProxyServerBuilder {
    /// Create a new builder with defaults.
    ///
    /// The default allowlist is empty, which rejects everything.
    pub fn new() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR,
            matcher: Arc::new(HostMatcher::empty()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the listen address.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the allowlist.
    pub fn matcher(mut self, matcher: impl Into<Arc<HostMatcher>>) -> Self {
        self.matcher = matcher.into();
        self
    }

    /// Set the upstream connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the upstream response timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyConfig {
        ProxyConfig {
            listen_addr: self.listen_addr,
            matcher: self.matcher,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Build the configuration and bind the server.
    ///
    /// # Arguments
    ///
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub async fn bind(self, shutdown_rx: watch::Receiver<bool>) -> ProxyResult<ProxyServer> {
        ProxyServer::bind(self.build(), shutdown_rx).await
    }
}

impl Default for ProxyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let config = ProxyServerBuilder::new().build();

        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.listen_addr.to_string(), "[::]:8080");
        assert!(config.matcher.is_empty());
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder_overrides() {
        let matcher = HostMatcher::compile(["*.example.com"]).unwrap();
        let config = ProxyServerBuilder::new()
            .listen_addr(loopback())
            .matcher(matcher)
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(2))
            .shutdown_timeout(Duration::from_secs(3))
            .build();

        assert_eq!(config.matcher.len(), 1);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_shutdown_handle_is_idempotent() {
        let (handle, rx) = ShutdownHandle::new();
        assert!(!handle.is_shutdown());

        handle.shutdown();
        handle.clone().shutdown();

        assert!(handle.is_shutdown());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_accept_backoff_doubles_and_caps() {
        let mut backoff = AcceptBackoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));

        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MAX);

        backoff.reset();
        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MIN);
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(is_transient_accept_error(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_transient_accept_error(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }

    #[tokio::test]
    async fn test_accept_pause_ends_on_shutdown() {
        let (handle, mut rx) = ShutdownHandle::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.shutdown();
        });

        let paused = tokio::time::timeout(
            Duration::from_secs(5),
            pause_unless_shutdown(Duration::from_secs(60), &mut rx),
        )
        .await;
        assert!(paused.is_ok(), "pause outlived the shutdown request");
    }

    #[tokio::test]
    async fn test_unspecified_listen_accepts_ipv4_clients() {
        let listener = bind_listener(SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))).unwrap();
        let port = listener.local_addr().unwrap().port();

        let (accepted, connected) = tokio::join!(
            listener.accept(),
            TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        );
        assert!(accepted.is_ok());
        assert!(connected.is_ok());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind(loopback()).await.unwrap();
        let addr = taken.local_addr().unwrap();
        let (_handle, rx) = ShutdownHandle::new();

        let result = ProxyServerBuilder::new().listen_addr(addr).bind(rx).await;
        assert!(matches!(result, Err(ProxyError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_ready_called_once_and_state_reaches_stopped() {
        let (handle, rx) = ShutdownHandle::new();
        let server = ProxyServerBuilder::new()
            .listen_addr(loopback())
            .bind(rx)
            .await
            .unwrap();
        let bound = server.local_addr().unwrap();
        let mut state = server.state();
        assert_eq!(*state.borrow(), ServerState::Serving);

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let run = tokio::spawn(server.run(move |addr| {
            let _ = ready_tx.send(addr);
        }));

        assert_eq!(ready_rx.await.unwrap(), bound);

        handle.shutdown();
        run.await.unwrap().unwrap();

        state.wait_for(|s| *s == ServerState::Stopped).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_immediately() {
        let (handle, rx) = ShutdownHandle::new();
        let server = ProxyServerBuilder::new()
            .listen_addr(loopback())
            .bind(rx)
            .await
            .unwrap();

        handle.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), server.run(|_| {})).await;
        assert!(result.unwrap().is_ok());
    }
}
