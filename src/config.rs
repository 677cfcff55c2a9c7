//! Relay server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Port used when neither `--port` nor `PORT` is set.
pub const DEFAULT_PORT: u16 = 3000;

/// Default capacity of each connection's outbound queue.
const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default capacity of the relay actor's command queue.
const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Default timeout for the graceful shutdown of the relay actor.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the relay server.
///
/// # Example
///
/// ```
/// use watch_party_relay::config::RelayConfig;
///
/// let config = RelayConfig::default()
///     .with_port(8080)
///     .with_static_dir("public");
/// assert_eq!(config.socket_addr().port(), 8080);
/// assert_eq!(config.ws_path, "/ws");
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind. Defaults to all interfaces.
    pub bind_address: IpAddr,
    /// Port to listen on. Defaults to **3000**.
    pub port: u16,
    /// Directory served for every path that is not the WebSocket endpoint.
    /// Defaults to the process working directory.
    pub static_dir: PathBuf,
    /// Path of the WebSocket endpoint. Defaults to `/ws`.
    pub ws_path: String,
    /// Capacity of each connection's outbound queue.
    ///
    /// When a client cannot keep up, frames addressed to it are dropped (with a
    /// warning logged) so one slow socket never stalls the room.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub outbound_capacity: usize,
    /// Capacity of the relay actor's command queue, shared by all sockets.
    ///
    /// When it is full, socket readers wait for room before reading more.
    ///
    /// Defaults to **1024**. Values below 1 are clamped to 1.
    pub command_capacity: usize,
    /// How long [`Relay::shutdown`](crate::relay::Relay::shutdown) waits for the
    /// actor to stop before aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("."),
            ws_path: "/ws".to_string(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Set the bind address.
    #[must_use]
    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    /// Set the listen port. Port 0 asks the OS for a free one.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the directory static assets are served from.
    #[must_use]
    pub fn with_static_dir(mut self, static_dir: impl Into<PathBuf>) -> Self {
        self.static_dir = static_dir.into();
        self
    }

    /// Set the WebSocket endpoint path.
    #[must_use]
    pub fn with_ws_path(mut self, ws_path: impl Into<String>) -> Self {
        self.ws_path = ws_path.into();
        self
    }

    /// Set the per-connection outbound queue capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Set the relay actor's command queue capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Set the relay actor shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The socket address to bind.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_everywhere_on_3000() {
        let config = RelayConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.static_dir, PathBuf::from("."));
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.command_capacity, 1024);
    }

    #[test]
    fn queue_capacities_are_clamped() {
        let config = RelayConfig::default()
            .with_outbound_capacity(0)
            .with_command_capacity(0);
        assert_eq!(config.outbound_capacity, 1);
        assert_eq!(config.command_capacity, 1);
    }
}
