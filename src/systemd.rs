//! systemd readiness notification.
//!
//! When run as a `Type=notify` unit, systemd passes a datagram socket in
//! `NOTIFY_SOCKET`. A path starting with `@` names a Linux abstract socket.
//! Outside systemd the variable is unset and notifying does nothing.

use std::env;
use std::os::unix::net::UnixDatagram;

use thiserror::Error;

/// Environment variable carrying the notify socket address.
pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

const READY_MESSAGE: &str = "READY=1";

/// Errors talking to the systemd notify socket.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Could not create the client socket.
    #[error("Failed to create an unbound UNIX domain socket: {0}")]
    FailedCreate(std::io::Error),
    /// Could not connect to the notify socket.
    #[error("Failed to connect to the systemd notify socket: {0}")]
    FailedConnect(std::io::Error),
    /// Could not send the notification.
    #[error("Failed to send a notification to the systemd notify socket: {0}")]
    FailedSend(std::io::Error),
}

/// Send `state` to the socket named by `NOTIFY_SOCKET`.
///
/// Returns `Ok(false)` when the variable is unset or empty.
pub fn sd_notify(state: &str) -> Result<bool, NotifyError> {
    match env::var(NOTIFY_SOCKET_ENV) {
        Ok(addr) if !addr.is_empty() => {
            notify_socket(&addr, state)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Tell systemd the service is ready.
#[inline]
pub fn sd_notify_ready() -> Result<bool, NotifyError> {
    sd_notify(READY_MESSAGE)
}

/// Send `state` to the notify socket at `addr`.
pub fn notify_socket(addr: &str, state: &str) -> Result<(), NotifyError> {
    let sock = UnixDatagram::unbound().map_err(NotifyError::FailedCreate)?;
    connect(&sock, addr).map_err(NotifyError::FailedConnect)?;

    sock.send(state.as_bytes()).map_err(NotifyError::FailedSend)?;

    Ok(())
}

#[cfg(target_os = "linux")]
fn connect(sock: &UnixDatagram, addr: &str) -> std::io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    match addr.strip_prefix('@') {
        Some(name) => sock.connect_addr(&SocketAddr::from_abstract_name(name.as_bytes())?),
        None => sock.connect(addr),
    }
}

#[cfg(not(target_os = "linux"))]
fn connect(sock: &UnixDatagram, addr: &str) -> std::io::Result<()> {
    sock.connect(addr)
}
