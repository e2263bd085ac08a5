//! Configuration constants for the icytrope stream processor

/// ICY wire-protocol constants
pub mod protocol {
    /// Header carrying the metadata interval
    pub const META_INTERVAL_HEADER: &str = "icy-metaint";

    /// Request header asking the server to interleave metadata
    pub const META_REQUEST_HEADER: &str = "Icy-MetaData";

    /// Blank line separating the header block from the body
    pub const HEADER_BODY_SEPARATOR: &[u8] = b"\r\n\r\n";

    /// Each unit of the metadata length byte stands for this many bytes
    pub const META_LENGTH_MULTIPLIER: usize = 16;

    /// Largest metadata interval accepted from a server (bytes). Larger values
    /// would make the session buffer that much audio before the first frame.
    pub const MAX_META_INTERVAL: usize = 1024 * 1024;

    /// Largest metadata payload a single length byte can announce
    pub const MAX_META_SIZE_BYTES: usize = u8::MAX as usize * META_LENGTH_MULTIPLIER;

    /// Opening of the only metadata field we extract
    pub const STREAM_TITLE_PREFIX: &str = "StreamTitle='";

    /// Closing of the StreamTitle field
    pub const STREAM_TITLE_SUFFIX: &str = "';";
}

/// Network-related configuration
pub mod network {
    /// User agent offered when the caller opts into sending one
    pub const USER_AGENT: &str = concat!("Icytrope/", env!("CARGO_PKG_VERSION"));

    /// Default HTTP port for stream URLs without an explicit port
    pub const DEFAULT_PORT: u16 = 80;

    /// Connection timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Idle read timeout in seconds
    pub const READ_TIMEOUT_SECS: u64 = 30;

    /// Chunk size for socket reads (bytes)
    pub const READ_CHUNK_SIZE: usize = 8 * 1024;
}
