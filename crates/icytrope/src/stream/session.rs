//! ICY session state machine
//!
//! Drives one connection's byte stream through
//! `AwaitingHeaders → Streaming → Closed`. The session is independent of the
//! transport: anything implementing [`Read`] can feed it, which is how the
//! TCP driver and the tests share the same code path.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::config::network::READ_CHUNK_SIZE;
use crate::error::{BoxError, IcyError, Result};
use crate::stream::accumulate::ByteAccumulator;
use crate::stream::headers::{
    find_separator, parse_headers, resolve_meta_interval, split_header_chunk, HeaderBlock,
    IcyHeaders,
};
use crate::stream::metadata::{decode_frame, worst_case_frame_end, MetadataFrame, StreamMetadata};

/// Outcome of a track-change callback
pub type CallbackResult = std::result::Result<(), BoxError>;

/// Lifecycle of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHeaders,
    Streaming,
    Closed,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::AwaitingHeaders => 0,
            SessionState::Streaming => 1,
            SessionState::Closed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::AwaitingHeaders,
            1 => SessionState::Streaming,
            _ => SessionState::Closed,
        }
    }
}

/// Session state readable from other threads
#[derive(Debug, Clone)]
pub struct SharedSessionState(Arc<AtomicU8>);

impl SharedSessionState {
    pub fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

impl Default for SharedSessionState {
    fn default() -> Self {
        Self::new(SessionState::AwaitingHeaders)
    }
}

/// One ICY session over a byte source.
pub struct IcySession<R> {
    source: R,
    state: SharedSessionState,
    accumulator: ByteAccumulator,
    /// Working buffer; grows at the tail on reads, shrinks at the head per frame
    buffer: BytesMut,
    headers: Option<HeaderBlock>,
    info: Option<IcyHeaders>,
    dedupe_titles: bool,
    last_title: Option<String>,
    frames_decoded: u64,
}

impl<R: Read> IcySession<R> {
    pub fn new(source: R) -> Self {
        Self::with_chunk_size(source, READ_CHUNK_SIZE)
    }

    pub fn with_chunk_size(source: R, chunk_size: usize) -> Self {
        Self {
            source,
            state: SharedSessionState::default(),
            accumulator: ByteAccumulator::with_chunk_size(chunk_size),
            buffer: BytesMut::new(),
            headers: None,
            info: None,
            dedupe_titles: false,
            last_title: None,
            frames_decoded: 0,
        }
    }

    /// Skip titles equal to the last delivered one.
    pub fn with_dedupe_titles(mut self, dedupe: bool) -> Self {
        self.dedupe_titles = dedupe;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Handle for observing the state from another thread
    pub fn shared_state(&self) -> SharedSessionState {
        self.state.clone()
    }

    /// Parsed header block, once the session is streaming
    pub fn headers(&self) -> Option<&HeaderBlock> {
        self.headers.as_ref()
    }

    /// Station details, once the session is streaming
    pub fn station(&self) -> Option<&IcyHeaders> {
        self.info.as_ref()
    }

    /// Resolved metadata interval, once the session is streaming
    pub fn meta_interval(&self) -> Option<usize> {
        self.info.as_ref().map(|info| info.metaint)
    }

    /// Number of metadata frames decoded so far, empty ones included
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Bytes currently held in the working buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read and parse the header block, resolving the metadata interval.
    ///
    /// Moves the session from `AwaitingHeaders` to `Streaming`. Any failure
    /// closes the session.
    pub fn read_headers(&mut self) -> Result<usize> {
        match self.state() {
            SessionState::AwaitingHeaders => {}
            SessionState::Streaming => {
                return self.meta_interval().ok_or(IcyError::Closed);
            }
            SessionState::Closed => return Err(IcyError::Closed),
        }

        let result = self.try_read_headers();
        self.close_on_error(result)
    }

    fn try_read_headers(&mut self) -> Result<usize> {
        let chunk = self.accumulator.accumulate(
            &mut self.source,
            |buffer| find_separator(buffer).is_some(),
            std::mem::take(&mut self.buffer),
        )?;

        let (head, body) = split_header_chunk(&chunk).ok_or_else(|| {
            IcyError::MalformedHeader(String::from_utf8_lossy(&chunk).into_owned())
        })?;
        let headers = parse_headers(head)?;
        debug!(headers = ?headers, "Header block received");

        let metaint = resolve_meta_interval(&headers)?;
        let info = IcyHeaders::from_block(&headers, metaint);
        info!(
            metaint,
            station = info.station_name.as_deref().unwrap_or(""),
            content_type = info.content_type.as_deref().unwrap_or(""),
            bitrate = ?info.bitrate,
            "Metadata expected every {metaint} bytes"
        );

        self.buffer = BytesMut::from(body);
        self.headers = Some(headers);
        self.info = Some(info);
        self.state.set(SessionState::Streaming);

        Ok(metaint)
    }

    /// Wait for and decode the next metadata frame.
    ///
    /// Reads the headers first if that has not happened yet.
    pub fn next_frame(&mut self) -> Result<MetadataFrame> {
        let metaint = self.read_headers()?;
        let result = self.try_next_frame(metaint);
        self.close_on_error(result)
    }

    fn try_next_frame(&mut self, metaint: usize) -> Result<MetadataFrame> {
        let threshold = worst_case_frame_end(metaint);
        self.buffer = self.accumulator.accumulate(
            &mut self.source,
            |buffer| buffer.len() > threshold,
            std::mem::take(&mut self.buffer),
        )?;

        let frame = decode_frame(&self.buffer, metaint)?;
        self.buffer.advance(frame.consumed(metaint));
        self.frames_decoded += 1;

        match &frame.title {
            Some(title) => {
                let metadata = StreamMetadata::from_icy_title(title);
                info!(
                    artist = metadata.artist.as_deref().unwrap_or(""),
                    title = metadata.title.as_deref().unwrap_or(""),
                    "New title in metadata received: {title}"
                );
            }
            None => trace!("Metadata is empty"),
        }

        Ok(frame)
    }

    /// Stream until `stop` is raised or a fatal error occurs.
    ///
    /// `on_track_change` runs synchronously on this thread for every title
    /// decoded from a non-empty frame. It is never called once `stop` is
    /// observed, and an error it returns closes the session.
    pub fn run<F>(&mut self, stop: &AtomicBool, mut on_track_change: F) -> Result<()>
    where
        F: FnMut(&str) -> CallbackResult,
    {
        loop {
            if stop.load(Ordering::SeqCst) {
                self.close();
                return Ok(());
            }

            let frame = self.next_frame()?;
            let Some(title) = frame.title else {
                continue;
            };

            if stop.load(Ordering::SeqCst) {
                self.close();
                return Ok(());
            }

            if self.dedupe_titles && self.last_title.as_deref() == Some(title.as_str()) {
                trace!(title = %title, "Title unchanged, not delivered");
                continue;
            }

            if let Err(e) = on_track_change(&title) {
                warn!(error = %e, "Track change callback failed");
                self.close();
                return Err(IcyError::Callback(e));
            }

            self.last_title = Some(title);
        }
    }

    /// Move to `Closed` and drop any buffered bytes.
    pub fn close(&mut self) {
        if self.state() != SessionState::Closed {
            debug!(frames = self.frames_decoded, "Session closed");
        }
        self.state.set(SessionState::Closed);
        self.buffer = BytesMut::new();
    }

    fn close_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(error = %e, "Session failed");
            self.close();
        }
        result
    }
}
