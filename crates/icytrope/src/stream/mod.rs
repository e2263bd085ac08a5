//! Stream handling
//!
//! Connects to ICY (Icecast/Shoutcast) streams, parses the header block,
//! resolves the metadata interval and decodes the interleaved metadata
//! frames into track titles.

pub mod accumulate;
pub mod headers;
pub mod icy;
pub mod metadata;
pub mod session;

pub use accumulate::{accumulate, ByteAccumulator};
pub use headers::{parse_headers, resolve_meta_interval, HeaderBlock, HeaderValue, IcyHeaders};
pub use icy::{IcyStream, LineEnding, StreamOptions};
pub use metadata::{decode_frame, encode_title_frame, MetadataFrame, StreamMetadata};
pub use session::{CallbackResult, IcySession, SessionState, SharedSessionState};
