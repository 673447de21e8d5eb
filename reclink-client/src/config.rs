//! Connection configuration.

use reclink_protocol::{catalog, ProtocolVersion};
use std::net::SocketAddr;
use std::time::Duration;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// How the client announces itself to the backend after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceMode {
    /// Passive client: status queries, no tuner usage.
    Monitor,
    /// Playback client: may hold tuners open.
    Playback,
}

impl AnnounceMode {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            AnnounceMode::Monitor => "Monitor",
            AnnounceMode::Playback => "Playback",
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Backend address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout for each blocking frame read.
    pub read_timeout: Duration,
    /// Version offered in the handshake.
    pub preferred_version: ProtocolVersion,
    /// Client name sent in the announce step.
    pub client_name: String,
    /// Announce mode.
    pub announce_mode: AnnounceMode,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            preferred_version: catalog().newest(),
            client_name: "reclink".to_string(),
            announce_mode: AnnounceMode::Monitor,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_preferred_version(mut self, version: ProtocolVersion) -> Self {
        self.preferred_version = version;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_announce_mode(mut self, mode: AnnounceMode) -> Self {
        self.announce_mode = mode;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:6543".parse().unwrap());
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.preferred_version, catalog().newest());
        assert_eq!(config.announce_mode, AnnounceMode::Monitor);
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config =
            ConnectionConfig::new("127.0.0.1:6543".parse().unwrap()).with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new("127.0.0.1:6543".parse().unwrap())
            .with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }
}
