//! Icytrope — ICY Metadata Stream Processor
//!
//! Connects to Icecast/Shoutcast streams and reports the currently playing
//! track title as it changes, without touching the audio payload.
//!
//! ## Quick start
//!
//! ```no_run
//! use icytrope::stream::{IcyStream, StreamOptions};
//!
//! let options = StreamOptions::from_url("http://radio.example.com:8000/live")?;
//! let stream = IcyStream::open(options, |title| {
//!     println!("Now playing: {title}");
//!     Ok(())
//! })?;
//!
//! // ...
//! stream.close()?;
//! # Ok::<(), icytrope::error::IcyError>(())
//! ```

pub mod config;
pub mod error;
pub mod stream;
