//! Centralized configuration for minirpc.
//!
//! Compile-time defaults live as associated constants on unit structs; the
//! runtime-tunable subset is collected in [`AccessPointConfig`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire protocol parameters.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Version stamped on every outgoing request.
    pub const VERSION: u32 = 1;
    /// Versions a server accepts.
    pub const SUPPORTED_VERSIONS: &'static [u32] = &[1];
    /// URI scheme of provider addresses (`rpc://host:port`).
    pub const URI_SCHEME: &'static str = "rpc";
    /// Fixed header size: request id, version, type.
    pub const HEADER_LEN: usize = 3 * 4;
    /// Largest frame (header plus payload) either side will read.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
}

/// Transport timing and limits.
pub struct TransportConfig;

impl TransportConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_IN_FLIGHT_REQUESTS: usize = 1024;
    pub const MAX_CONNECTIONS: usize = 256;
}

/// Server defaults.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 9999;
}

/// Name service backing store.
pub struct NameServiceConfig;

impl NameServiceConfig {
    pub const SQLITE_SCHEME: &'static str = "sqlite";
    pub const MEMORY_SCHEME: &'static str = "memory";
    /// Per-user data directory holding the default database.
    pub const APP_DIR_NAME: &'static str = "minirpc";
    pub const DB_FILENAME: &'static str = "nameservice.db";
    pub const TABLE_NAME: &'static str = "nameservice";
    pub const BUSY_TIMEOUT_MS: u32 = 5000;
    /// Path marker selecting a private in-memory SQLite database.
    pub const IN_MEMORY_PATH: &'static str = ":memory:";
}

/// Runtime configuration of an access point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AccessPointConfig {
    /// Host advertised in provider addresses and bound by the server.
    pub host: String,
    /// Server port (0 = OS-assigned).
    pub port: u16,
    /// Upper bound for establishing a client connection.
    pub connect_timeout: Duration,
    /// Default per-request timeout for stubs.
    pub request_timeout: Duration,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            host: ServerConfig::DEFAULT_HOST.to_string(),
            port: ServerConfig::DEFAULT_PORT,
            connect_timeout: TransportConfig::CONNECT_TIMEOUT,
            request_timeout: TransportConfig::REQUEST_TIMEOUT,
        }
    }
}
