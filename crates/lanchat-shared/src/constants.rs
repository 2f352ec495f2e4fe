use std::net::Ipv4Addr;

/// Application name
pub const APP_NAME: &str = "LAN Chat";

/// Default multicast group every participant joins
pub const DEFAULT_GROUP_ADDR: Ipv4Addr = Ipv4Addr::new(230, 0, 0, 1);

/// Default multicast port
pub const DEFAULT_GROUP_PORT: u16 = 4446;

/// Default TCP port of the file transfer server
pub const DEFAULT_TRANSFER_PORT: u16 = 4447;

/// Default HTTP gateway port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Largest datagram we send or expect to receive (8 KiB)
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Maximum size of a shared file in bytes (5 GiB)
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Directory holding this session's shared files
pub const SESSION_FILES_DIR: &str = "session_files";

/// Owner label given to files announced by other participants
pub const REMOTE_OWNER: &str = "Remote User";

/// Display name used when none (or a blank one) is configured
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// chrono format of the `[HH:MM:SS]` stamp on chat lines
pub const STAMP_FORMAT: &str = "%H:%M:%S";
