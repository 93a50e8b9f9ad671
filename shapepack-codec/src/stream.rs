//! Resumable reading over fragmented input and buffered async writing.
//!
//! The hot path stays synchronous: decoding always runs over the
//! contiguous buffered bytes with a [`SliceReader`]. When a decode runs
//! out of bytes it reports [`DecodeResult::InsufficientBuffer`] and the
//! caller awaits [`StreamingReader::fetch_more_bytes`]; nothing else
//! suspends.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use crate::{CodecError, Result, SliceReader};

/// Outcome of one resumable decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeResult<T> {
    /// The value was decoded and consumed.
    Success(T),
    /// The buffered bytes end mid-structure; fetch more and retry.
    InsufficientBuffer,
    /// No bytes are buffered at all — a clean structure boundary.
    EmptyBuffer,
    /// The next marker does not start the requested kind of value.
    /// Nothing was consumed.
    TypeMismatch(u8),
}

impl<T> DecodeResult<T> {
    /// The decoded value, if this is [`DecodeResult::Success`].
    pub fn success(self) -> Option<T> {
        match self {
            DecodeResult::Success(v) => Some(v),
            _ => None,
        }
    }
}

/// Failure of a streaming operation: either bad bytes or a failing source.
#[derive(Debug)]
pub enum StreamError {
    /// The buffered bytes are malformed or truncated at end of stream.
    Codec(CodecError),
    /// The byte source failed.
    Io(io::Error),
}

impl core::fmt::Display for StreamError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StreamError::Codec(e) => write!(f, "{e}"),
            StreamError::Io(e) => write!(f, "source error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<CodecError> for StreamError {
    fn from(e: CodecError) -> Self {
        StreamError::Codec(e)
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        StreamError::Io(e)
    }
}

/// Supplies chunks of input to a [`StreamingReader`].
///
/// An empty chunk signals end of input.
#[allow(async_fn_in_trait)]
pub trait BytesSource {
    /// Produce the next chunk of input.
    async fn fetch(&mut self) -> io::Result<Bytes>;
}

/// A [`BytesSource`] over a fixed list of chunks, mainly for tests and
/// for driving a reader from pre-fragmented memory.
#[derive(Debug, Default)]
pub struct ChunkSource {
    chunks: std::collections::VecDeque<Bytes>,
    fetches: usize,
}

impl ChunkSource {
    /// A source yielding `chunks` in order, then end of input.
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        ChunkSource {
            chunks: chunks.into_iter().map(Into::into).collect(),
            fetches: 0,
        }
    }

    /// How many chunks have been fetched so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }
}

impl BytesSource for ChunkSource {
    async fn fetch(&mut self) -> io::Result<Bytes> {
        self.fetches += 1;
        Ok(self.chunks.pop_front().unwrap_or_default())
    }
}

/// Incremental structure-counting state, kept across refills so that each
/// resume only examines bytes it has not seen yet.
#[derive(Debug, Clone, Copy)]
struct ProbeState {
    /// Byte offset of the scan cursor within the buffer.
    offset: usize,
    /// Structures still open at the cursor.
    pending: usize,
    /// Complete top-level structures counted so far.
    complete: usize,
    /// Value of `pos` this state was computed against.
    valid_at_pos: usize,
}

/// Resumable MessagePack reader over a re-fillable buffer.
///
/// Decode methods never suspend; they report
/// [`DecodeResult::InsufficientBuffer`] and the caller awaits
/// [`StreamingReader::fetch_more_bytes`]. Bytes from the consumed
/// boundary forward are always preserved across refills.
pub struct StreamingReader<S> {
    source: S,
    buf: BytesMut,
    /// Consumed boundary: everything before this offset is decoded.
    pos: usize,
    /// High-water mark of examined bytes; never discarded before `pos`.
    examined: usize,
    eof: bool,
    fetches: usize,
    /// Structures still open in an in-progress [`StreamingReader::try_skip`].
    skip_pending: usize,
    probe: Option<ProbeState>,
}

impl<S: BytesSource> StreamingReader<S> {
    /// A reader with an empty buffer over `source`.
    pub fn new(source: S) -> Self {
        StreamingReader {
            source,
            buf: BytesMut::new(),
            pos: 0,
            examined: 0,
            eof: false,
            fetches: 0,
            skip_pending: 0,
            probe: None,
        }
    }

    /// A reader seeded with bytes already in hand.
    pub fn with_initial(source: S, initial: &[u8]) -> Self {
        let mut reader = StreamingReader::new(source);
        reader.buf.extend_from_slice(initial);
        reader
    }

    /// The unconsumed buffered bytes.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Whether the source reported end of input.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// How many times the source has been asked for bytes.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Mark `n` buffered bytes as consumed (decoded by the caller through
    /// a [`SliceReader`] over [`StreamingReader::buffered`]).
    pub fn consume(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.buf.len());
        self.pos += n;
        if self.examined < self.pos {
            self.examined = self.pos;
        }
    }

    /// Fetch one more chunk from the source. Returns `false` when the
    /// source is exhausted. Consumed bytes are reclaimed here; the region
    /// from the consumed boundary through the examined mark survives.
    pub async fn fetch_more_bytes(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        self.reclaim();
        let chunk = self.source.fetch().await?;
        self.fetches += 1;
        if chunk.is_empty() {
            self.eof = true;
            trace!("source exhausted after {} fetches", self.fetches);
            return Ok(false);
        }
        self.buf.extend_from_slice(&chunk);
        Ok(true)
    }

    fn reclaim(&mut self) {
        if self.pos == 0 {
            return;
        }
        let reclaimed = self.pos;
        self.buf.advance(reclaimed);
        self.pos = 0;
        self.examined = self.examined.saturating_sub(reclaimed);
        if let Some(probe) = &mut self.probe {
            if probe.valid_at_pos == reclaimed {
                probe.offset -= reclaimed;
                probe.valid_at_pos = 0;
            } else {
                self.probe = None;
            }
        }
    }

    /// Run one decode attempt against the buffered bytes.
    ///
    /// `f` decodes with a throwaway [`SliceReader`]; on success its
    /// consumption is committed. Running out of bytes maps to
    /// [`DecodeResult::InsufficientBuffer`] (or
    /// [`DecodeResult::EmptyBuffer`] when nothing is buffered), a marker
    /// mismatch maps to [`DecodeResult::TypeMismatch`], and malformed
    /// bytes surface as a hard error.
    pub fn try_decode<T>(
        &mut self,
        f: impl FnOnce(&mut SliceReader<'_>) -> Result<T>,
    ) -> Result<DecodeResult<T>> {
        let unread = &self.buf[self.pos..];
        let mut reader = SliceReader::new(unread);
        match f(&mut reader) {
            Ok(value) => {
                let n = reader.position();
                self.pos += n;
                if self.examined < self.pos {
                    self.examined = self.pos;
                }
                Ok(DecodeResult::Success(value))
            }
            Err(e) if e.is_unexpected_end() => {
                self.examined = self.buf.len();
                if unread.is_empty() {
                    Ok(DecodeResult::EmptyBuffer)
                } else {
                    Ok(DecodeResult::InsufficientBuffer)
                }
            }
            Err(e) if e.is_type_mismatch() => match e.kind {
                crate::CodecErrorKind::TypeMismatch { marker, .. } => {
                    Ok(DecodeResult::TypeMismatch(marker))
                }
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Array header, resumable.
    pub fn try_read_array_header(&mut self) -> Result<DecodeResult<usize>> {
        self.try_decode(|r| r.read_array_header())
    }

    /// Map header, resumable.
    pub fn try_read_map_header(&mut self) -> Result<DecodeResult<usize>> {
        self.try_decode(|r| r.read_map_header())
    }

    /// Skip one whole structure, resumable. Headers already descended
    /// into are remembered, so a retry after a refill does only the
    /// remaining work.
    pub fn try_skip(&mut self) -> Result<DecodeResult<()>> {
        if self.skip_pending == 0 {
            if self.buffered().is_empty() {
                self.examined = self.buf.len();
                return Ok(DecodeResult::EmptyBuffer);
            }
            self.skip_pending = 1;
        }
        while self.skip_pending > 0 {
            let mut reader = SliceReader::new(&self.buf[self.pos..]);
            match reader.skip_one() {
                Ok(children) => {
                    self.pos += reader.position();
                    if self.examined < self.pos {
                        self.examined = self.pos;
                    }
                    self.skip_pending = self.skip_pending - 1 + children;
                }
                Err(e) if e.is_unexpected_end() => {
                    self.examined = self.buf.len();
                    return Ok(DecodeResult::InsufficientBuffer);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(DecodeResult::Success(()))
    }

    /// Ensure at least `count` complete top-level structures are
    /// contiguously buffered. Returns how many are available: `count`
    /// normally, fewer when the source ends cleanly at a structure
    /// boundary first. Bytes are only fetched while the buffered count is
    /// short — the reader never reads past the last requested structure.
    pub async fn buffer_next_structures(
        &mut self,
        count: usize,
    ) -> core::result::Result<usize, StreamError> {
        loop {
            match self.probe_structures(count)? {
                DecodeResult::Success(found) => return Ok(found),
                _ => {
                    self.fetch_more_bytes().await?;
                }
            }
        }
    }

    /// Non-suspending version of
    /// [`StreamingReader::buffer_next_structures`]: reports
    /// `Success(found)` when `count` structures are resident (or the
    /// source ended cleanly with `found` of them), and
    /// `InsufficientBuffer` when the caller should fetch and retry.
    /// Lets callers interleave their own work (cancellation checks,
    /// progress) between refills.
    pub fn probe_structures(&mut self, count: usize) -> Result<DecodeResult<usize>> {
        match self.count_buffered(count)? {
            Probe::Complete(found) => Ok(DecodeResult::Success(found)),
            Probe::NeedMore {
                clean_boundary,
                complete,
            } => {
                if self.eof {
                    if clean_boundary {
                        return Ok(DecodeResult::Success(complete));
                    }
                    return Err(CodecError::unexpected_end(self.buf.len()));
                }
                Ok(DecodeResult::InsufficientBuffer)
            }
        }
    }

    fn count_buffered(&mut self, want: usize) -> Result<Probe> {
        let mut state = match self.probe {
            Some(p) if p.valid_at_pos == self.pos => p,
            _ => ProbeState {
                offset: self.pos,
                pending: 0,
                complete: 0,
                valid_at_pos: self.pos,
            },
        };
        while state.complete < want {
            let mut reader = SliceReader::new(&self.buf[state.offset..]);
            let step = if state.pending == 0 && reader.is_empty() {
                // Clean boundary with no bytes: stop counting here.
                self.probe = Some(state);
                return Ok(Probe::NeedMore {
                    clean_boundary: true,
                    complete: state.complete,
                });
            } else {
                reader.skip_one()
            };
            match step {
                Ok(children) => {
                    state.offset += reader.position();
                    if state.pending == 0 {
                        state.pending = 1;
                    }
                    state.pending = state.pending - 1 + children;
                    if state.pending == 0 {
                        state.complete += 1;
                    }
                }
                Err(e) if e.is_unexpected_end() => {
                    self.examined = self.buf.len();
                    self.probe = Some(state);
                    return Ok(Probe::NeedMore {
                        clean_boundary: false,
                        complete: state.complete,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        self.probe = Some(state);
        Ok(Probe::Complete(state.complete))
    }
}

enum Probe {
    Complete(usize),
    NeedMore { clean_boundary: bool, complete: usize },
}

/// Receives flushed output from an [`AsyncPackWriter`].
#[allow(async_fn_in_trait)]
pub trait FlushSink {
    /// Accept one chunk of output.
    async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl FlushSink for Vec<u8> {
    async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Buffered writer that yields to drain an output sink at safe
/// boundaries. Individual writes stay synchronous on the inner
/// [`crate::PackWriter`]; [`AsyncPackWriter::maybe_flush`] is awaited by
/// the engine between top-level structures.
pub struct AsyncPackWriter<S> {
    writer: crate::PackWriter,
    sink: S,
    flush_threshold: usize,
}

impl<S: FlushSink> AsyncPackWriter<S> {
    /// A writer flushing to `sink` whenever the buffer reaches
    /// `flush_threshold` bytes at a flush boundary.
    pub fn new(sink: S, flush_threshold: usize) -> Self {
        AsyncPackWriter {
            writer: crate::PackWriter::new(),
            sink,
            flush_threshold,
        }
    }

    /// The synchronous writer the converters write into.
    pub fn writer(&mut self) -> &mut crate::PackWriter {
        &mut self.writer
    }

    /// Whether the buffer has reached the flush threshold.
    pub fn needs_flush(&self) -> bool {
        self.writer.len() >= self.flush_threshold
    }

    /// Drain the buffer into the sink.
    pub async fn flush(&mut self) -> io::Result<()> {
        let bytes = self.writer.take();
        if !bytes.is_empty() {
            self.sink.write_chunk(&bytes).await?;
        }
        Ok(())
    }

    /// Flush only when the threshold is reached.
    pub async fn maybe_flush(&mut self) -> io::Result<()> {
        if self.needs_flush() {
            self.flush().await
        } else {
            Ok(())
        }
    }

    /// Flush any remainder and return the sink.
    pub async fn finish(mut self) -> io::Result<S> {
        self.flush().await?;
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackWriter;

    fn message() -> Vec<u8> {
        let mut writer = PackWriter::new();
        writer.write_map_header(2);
        writer.write_str("name");
        writer.write_str("streaming");
        writer.write_str("items");
        writer.write_array_header(3);
        writer.write_int(1);
        writer.write_int(-2);
        writer.write_str("three");
        writer.into_vec()
    }

    fn one_byte_chunks(bytes: &[u8]) -> ChunkSource {
        ChunkSource::new(bytes.iter().map(|b| vec![*b]))
    }

    #[tokio::test]
    async fn skip_resumes_across_fragments() {
        let bytes = message();
        let mut reader = StreamingReader::new(one_byte_chunks(&bytes));
        loop {
            match reader.try_skip().unwrap() {
                DecodeResult::Success(()) => break,
                DecodeResult::InsufficientBuffer | DecodeResult::EmptyBuffer => {
                    assert!(reader.fetch_more_bytes().await.unwrap());
                }
                DecodeResult::TypeMismatch(m) => panic!("mismatch on 0x{m:02x}"),
            }
        }
        assert!(reader.buffered().is_empty());
    }

    #[tokio::test]
    async fn buffer_next_structures_is_exact() {
        // Three bare integers, then nothing.
        let mut writer = PackWriter::new();
        writer.write_int(1);
        writer.write_int(2);
        writer.write_int(3);
        let bytes = writer.into_vec();
        let mut reader = StreamingReader::new(ChunkSource::new(
            bytes.iter().map(|b| vec![*b]).collect::<Vec<_>>(),
        ));

        assert_eq!(reader.buffer_next_structures(3).await.unwrap(), 3);
        // All three structures arrived in three fetches; none beyond.
        assert_eq!(reader.fetch_count(), 3);
        assert_eq!(reader.buffer_next_structures(4).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn fragmented_equals_contiguous() {
        let bytes = message();
        let mut reader = StreamingReader::new(one_byte_chunks(&bytes));
        let available = reader.buffer_next_structures(1).await.unwrap();
        assert_eq!(available, 1);
        assert_eq!(reader.buffered(), &bytes[..]);

        let mut slice = SliceReader::new(reader.buffered());
        slice.skip().unwrap();
        let n = slice.position();
        reader.consume(n);
        assert!(reader.buffered().is_empty());
    }

    #[tokio::test]
    async fn header_decode_reports_mismatch_without_consuming() {
        let mut writer = PackWriter::new();
        writer.write_str("nope");
        let bytes = writer.into_vec();
        let mut reader = StreamingReader::with_initial(ChunkSource::default(), &bytes);
        match reader.try_read_array_header().unwrap() {
            DecodeResult::TypeMismatch(m) => assert_eq!(m, 0xa4),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(reader.buffered(), &bytes[..]);
    }

    #[tokio::test]
    async fn clean_eof_reports_empty_buffer() {
        let mut reader = StreamingReader::new(ChunkSource::default());
        assert!(!reader.fetch_more_bytes().await.unwrap());
        assert_eq!(reader.try_skip().unwrap(), DecodeResult::EmptyBuffer);
        assert_eq!(reader.buffer_next_structures(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn async_writer_flushes_at_boundaries() {
        let mut writer = AsyncPackWriter::new(Vec::new(), 4);
        writer.writer().write_int(1);
        assert!(!writer.needs_flush());
        writer.writer().write_str("abcdef");
        assert!(writer.needs_flush());
        writer.maybe_flush().await.unwrap();
        let sink = writer.finish().await.unwrap();
        let mut check = SliceReader::new(&sink);
        assert_eq!(check.read_int().unwrap(), 1);
        assert_eq!(check.read_str().unwrap(), "abcdef");
    }
}
