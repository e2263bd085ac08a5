//! Byte accumulator
//!
//! Collects bytes from a blocking reader until a predicate over everything
//! gathered so far holds. The source is borrowed for the duration of one call
//! only, so a session can call this in an unbounded loop without leaving
//! anything attached to the connection between calls.

use std::io::{self, Read};

use bytes::BytesMut;
use tracing::trace;

use crate::config::network::READ_CHUNK_SIZE;
use crate::error::{IcyError, Result};

/// Reusable accumulator owning its scratch read buffer.
pub struct ByteAccumulator {
    scratch: Vec<u8>,
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::with_chunk_size(READ_CHUNK_SIZE)
    }

    /// Create an accumulator that reads at most `chunk_size` bytes per read call.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            scratch: vec![0u8; chunk_size.max(1)],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.scratch.len()
    }

    /// Append chunks from `source` to `initial` until `predicate` holds.
    ///
    /// The predicate is checked against `initial` first and then after every
    /// appended chunk, so the result is the shortest chunk-aligned extension
    /// of `initial` that satisfies it. End-of-stream or a read error before
    /// that point fails with [`IcyError::Connection`] and the partial buffer
    /// is dropped.
    pub fn accumulate<R, P>(
        &mut self,
        source: &mut R,
        mut predicate: P,
        initial: BytesMut,
    ) -> Result<BytesMut>
    where
        R: Read + ?Sized,
        P: FnMut(&[u8]) -> bool,
    {
        let mut buffer = initial;

        while !predicate(&buffer) {
            let n = match source.read(&mut self.scratch) {
                Ok(0) => {
                    return Err(IcyError::Connection(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended before enough data arrived",
                    )));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IcyError::Connection(e)),
            };

            trace!(bytes = n, buffered = buffer.len() + n, "chunk received");
            buffer.extend_from_slice(&self.scratch[..n]);
        }

        Ok(buffer)
    }
}

impl Default for ByteAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot form of [`ByteAccumulator::accumulate`].
pub fn accumulate<R, P>(source: &mut R, predicate: P, initial: BytesMut) -> Result<BytesMut>
where
    R: Read + ?Sized,
    P: FnMut(&[u8]) -> bool,
{
    ByteAccumulator::new().accumulate(source, predicate, initial)
}
