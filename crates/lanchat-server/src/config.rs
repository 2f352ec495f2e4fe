//! Node configuration loaded from environment variables.
//!
//! Every setting has a default matching the classic LAN chat ports, so a
//! node starts with zero configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

use lanchat_shared::constants::{
    DEFAULT_DISPLAY_NAME, DEFAULT_GROUP_ADDR, DEFAULT_GROUP_PORT, DEFAULT_HTTP_PORT,
    DEFAULT_TRANSFER_PORT, MAX_FILE_SIZE, SESSION_FILES_DIR,
};

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name shown on outgoing chat lines.
    /// Env: `LANCHAT_USERNAME`
    /// Default: `Anonymous`
    pub display_name: String,

    /// Multicast group and port of the chat channel.
    /// Env: `LANCHAT_GROUP_ADDR`
    /// Default: `230.0.0.1:4446`
    pub group_addr: SocketAddrV4,

    /// Local interface used to join the group.
    /// Env: `LANCHAT_INTERFACE`
    /// Default: `0.0.0.0` (let the OS pick)
    pub interface: Ipv4Addr,

    /// Listen address of the file transfer server. Peers are assumed to
    /// use the same port.
    /// Env: `LANCHAT_TRANSFER_ADDR`
    /// Default: `0.0.0.0:4447`
    pub transfer_addr: SocketAddr,

    /// Listen address of the HTTP gateway.
    /// Env: `LANCHAT_HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Directory holding this session's shared files.
    /// Env: `LANCHAT_SESSION_DIR`
    /// Default: `./session_files`
    pub session_dir: PathBuf,

    /// Largest file that may be shared, in bytes (5 GiB).
    /// Env: `LANCHAT_MAX_FILE_SIZE`
    pub max_file_size: u64,

    /// Connections handled concurrently across both TCP listeners.
    /// Env: `LANCHAT_MAX_WORKERS`
    /// Default: `64`
    pub max_workers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            group_addr: SocketAddrV4::new(DEFAULT_GROUP_ADDR, DEFAULT_GROUP_PORT),
            interface: Ipv4Addr::UNSPECIFIED,
            transfer_addr: ([0, 0, 0, 0], DEFAULT_TRANSFER_PORT).into(),
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            session_dir: PathBuf::from(format!("./{SESSION_FILES_DIR}")),
            max_file_size: MAX_FILE_SIZE,
            max_workers: 64,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup("LANCHAT_USERNAME") {
            config = config.with_display_name(&name);
        }

        if let Some(addr) = lookup("LANCHAT_GROUP_ADDR") {
            match addr.parse::<SocketAddrV4>() {
                Ok(parsed) => config.group_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid LANCHAT_GROUP_ADDR, using default"),
            }
        }

        if let Some(iface) = lookup("LANCHAT_INTERFACE") {
            match iface.parse::<Ipv4Addr>() {
                Ok(parsed) => config.interface = parsed,
                Err(_) => tracing::warn!(value = %iface, "Invalid LANCHAT_INTERFACE, using default"),
            }
        }

        if let Some(addr) = lookup("LANCHAT_TRANSFER_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.transfer_addr = parsed,
                Err(_) => {
                    tracing::warn!(value = %addr, "Invalid LANCHAT_TRANSFER_ADDR, using default")
                }
            }
        }

        if let Some(addr) = lookup("LANCHAT_HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid LANCHAT_HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("LANCHAT_SESSION_DIR") {
            config.session_dir = PathBuf::from(path);
        }

        if let Some(val) = lookup("LANCHAT_MAX_FILE_SIZE") {
            match val.parse::<u64>() {
                Ok(n) => config.max_file_size = n,
                Err(_) => tracing::warn!(value = %val, "Invalid LANCHAT_MAX_FILE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("LANCHAT_MAX_WORKERS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_workers = n,
                _ => tracing::warn!(value = %val, "Invalid LANCHAT_MAX_WORKERS, using default"),
            }
        }

        config
    }

    /// Set the display name; blank names fall back to `Anonymous`.
    pub fn with_display_name(mut self, name: &str) -> Self {
        let name = name.trim();
        self.display_name = if name.is_empty() {
            DEFAULT_DISPLAY_NAME.to_string()
        } else {
            name.to_string()
        };
        self
    }
}
