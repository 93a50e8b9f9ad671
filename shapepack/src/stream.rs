//! Async entry points: buffered serialization to a sink, resumable
//! deserialization from a fragmented source, streaming enumeration.
//!
//! The async layer is a thin loop over the codec's resumable reader: it
//! only awaits when a decode reported it needs more bytes, and checks
//! cancellation at exactly those refill points plus flush boundaries.

use std::sync::Arc;

use shapepack_codec::{
    AsyncPackWriter, BytesSource, DecodeResult, FlushSink, SliceReader, StreamError,
    StreamingReader,
};
use shapepack_core::{ShapeId, ShapeKind, ShapeRegistry, Value};

use crate::converter::{read_value, write_value};
use crate::navigate::Navigated;
use crate::{
    CancelToken, Converter, ErrorCode, MessagePackSerializer, Path, PathOptions, PathStep,
    ReadContext, Result, SerializationError, WriteContext,
};

impl MessagePackSerializer {
    /// Serialize one value into `sink`, flushing at safe boundaries.
    pub async fn serialize_async<S: FlushSink>(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        value: &Value,
        sink: S,
        cancel: &CancelToken,
    ) -> Result<S> {
        self.serialize_many_async(registry, shape, core::slice::from_ref(value), sink, cancel)
            .await
    }

    /// Serialize consecutive top-level values into `sink`. Member writes
    /// are synchronous; the sink is drained between structures whenever
    /// the buffer crosses `max_async_buffer` (or the converter asks for
    /// an async boundary).
    pub async fn serialize_many_async<S: FlushSink>(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        values: &[Value],
        sink: S,
        cancel: &CancelToken,
    ) -> Result<S> {
        let converter = self.get_converter(registry, shape)?;
        let mut out = AsyncPackWriter::new(sink, self.options().max_async_buffer);
        let mut ctx = WriteContext::new(self.options(), registry.clone(), cancel.clone());
        for value in values {
            ctx.check_cancelled()?;
            write_value(&*converter, out.writer(), value, &mut ctx)?;
            if out.needs_flush() || converter.prefer_async() {
                ctx.check_cancelled()?;
                out.flush().await.map_err(io_error)?;
            }
        }
        ctx.check_cancelled()?;
        out.finish().await.map_err(io_error)
    }

    /// Deserialize one value from a fragmented source. Bytes are fetched
    /// only while the buffered input ends mid-structure; once one whole
    /// structure is resident, decoding is synchronous.
    pub async fn deserialize_async<S: BytesSource>(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        source: S,
        cancel: &CancelToken,
    ) -> Result<Value> {
        let mut stream = self.deserialize_stream(registry, shape, source, cancel)?;
        match stream.next().await? {
            Some(value) => Ok(value),
            None => Err(SerializationError::new(
                ErrorCode::UnexpectedEnd,
                "the source held no value",
            )),
        }
    }

    /// Decode consecutive top-level structures as a pull stream. The
    /// reader never fetches past the structures actually requested
    /// through [`ValueStream::next`].
    pub fn deserialize_stream<'s, S: BytesSource>(
        &'s self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        source: S,
        cancel: &CancelToken,
    ) -> Result<ValueStream<'s, S>> {
        let converter = self.get_converter(registry, shape)?;
        Ok(ValueStream {
            converter,
            reader: StreamingReader::new(source),
            ctx: ReadContext::new(self.options(), registry.clone(), cancel.clone()),
            cancel: cancel.clone(),
        })
    }

    /// Stream the elements of a sequence sitting at `steps` inside the
    /// value, without materializing the enclosing structure.
    pub async fn stream_at_path<'s, S: BytesSource>(
        &'s self,
        registry: &Arc<ShapeRegistry>,
        root: ShapeId,
        source: S,
        steps: &[PathStep],
        options: PathOptions,
        cancel: &CancelToken,
    ) -> Result<PathStream<'s, S>> {
        let mut reader = StreamingReader::new(source);
        let mut ctx = ReadContext::new(self.options(), registry.clone(), cancel.clone());

        // Navigation re-runs over the growing buffer after each refill;
        // it is prefix-bounded, so each retry is cheap relative to the
        // elements it unlocks.
        let navigated = loop {
            check(cancel, &ctx.path)?;
            let slice = SliceReader::new(reader.buffered());
            match self.navigate_slice(registry, root, &slice, steps, &mut ctx, options) {
                Ok(navigated) => {
                    ctx.path = Path::new();
                    break navigated;
                }
                Err(e) if e.code == ErrorCode::UnexpectedEnd && !reader.is_eof() => {
                    ctx.path = Path::new();
                    reader.fetch_more_bytes().await.map_err(io_error)?;
                }
                Err(e) => return Err(e),
            }
        };

        let (offset, shape) = match navigated {
            Navigated::Found { offset, shape } => (offset, shape),
            Navigated::Missing => {
                return Ok(PathStream::empty(self, registry, cancel));
            }
        };
        reader.consume(offset);

        let element = element_shape(registry, shape).ok_or_else(|| {
            SerializationError::new(
                ErrorCode::PathUnresolved,
                format!(
                    "path ends at {}, which is not a sequence",
                    registry.get(shape).name
                ),
            )
        })?;
        let converter = self.get_converter(registry, element)?;

        // Read the sequence envelope — or detect a bare element stream.
        let remaining = loop {
            check(cancel, &ctx.path)?;
            let attempt = reader
                .try_decode(|r| {
                    if r.try_read_nil()? {
                        Ok(None)
                    } else {
                        r.read_array_header().map(Some)
                    }
                })
                .map_err(|e| ctx.codec(e))?;
            match attempt {
                DecodeResult::Success(Some(len)) => break Some(len),
                DecodeResult::Success(None) => {
                    if options.empty_for_undiscoverable {
                        return Ok(PathStream::empty(self, registry, cancel));
                    }
                    return Err(SerializationError::new(
                        ErrorCode::PathUnresolved,
                        "the enclosing value is nil",
                    ));
                }
                DecodeResult::TypeMismatch(_) => break None,
                DecodeResult::InsufficientBuffer | DecodeResult::EmptyBuffer => {
                    if reader.is_eof() {
                        if options.empty_for_undiscoverable {
                            return Ok(PathStream::empty(self, registry, cancel));
                        }
                        return Err(SerializationError::new(
                            ErrorCode::PathUnresolved,
                            "the source ended before the sequence",
                        ));
                    }
                    reader.fetch_more_bytes().await.map_err(io_error)?;
                }
            }
        };

        Ok(PathStream {
            converter: Some(converter),
            reader: Some(reader),
            ctx,
            cancel: cancel.clone(),
            remaining,
        })
    }
}

fn io_error(e: std::io::Error) -> SerializationError {
    SerializationError::from_stream(StreamError::Io(e), Path::new())
}

fn check(cancel: &CancelToken, path: &Path) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SerializationError::cancelled().at(path.clone()))
    } else {
        Ok(())
    }
}

/// The element shape of the sequence a navigation landed on, looking
/// through nullable and surrogate wrappers.
fn element_shape(registry: &Arc<ShapeRegistry>, mut shape: ShapeId) -> Option<ShapeId> {
    loop {
        match &registry.get(shape).kind {
            ShapeKind::Sequence(sequence) if sequence.rank == 1 => return Some(sequence.element),
            ShapeKind::Nullable(inner) => shape = *inner,
            ShapeKind::Surrogate(surrogate) => shape = surrogate.proxy,
            _ => return None,
        }
    }
}

/// Pull stream over consecutive top-level structures.
pub struct ValueStream<'s, S: BytesSource> {
    converter: Arc<dyn Converter>,
    reader: StreamingReader<S>,
    ctx: ReadContext<'s>,
    cancel: CancelToken,
}

impl<S: BytesSource> ValueStream<'_, S> {
    /// The next value, or `None` at a clean end of stream.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        loop {
            check(&self.cancel, &self.ctx.path)?;
            match self
                .reader
                .probe_structures(1)
                .map_err(|e| self.ctx.codec(e))?
            {
                DecodeResult::Success(0) => return Ok(None),
                DecodeResult::Success(_) => break,
                _ => {
                    self.reader.fetch_more_bytes().await.map_err(io_error)?;
                }
            }
        }
        let mut slice = SliceReader::new(self.reader.buffered());
        let value = read_value(&*self.converter, &mut slice, &mut self.ctx)?;
        let consumed = slice.position();
        self.reader.consume(consumed);
        Ok(Some(value))
    }

    /// How many fetches the underlying source has served.
    pub fn fetch_count(&self) -> usize {
        self.reader.fetch_count()
    }
}

/// Async iterator over sequence elements at a navigated path.
pub struct PathStream<'s, S: BytesSource> {
    converter: Option<Arc<dyn Converter>>,
    reader: Option<StreamingReader<S>>,
    ctx: ReadContext<'s>,
    cancel: CancelToken,
    /// `Some(n)`: n elements left inside an array envelope. `None`: a
    /// bare stream of elements, ending with the source.
    remaining: Option<usize>,
}

impl<'s, S: BytesSource> std::fmt::Debug for PathStream<'s, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PathStream")
    }
}

impl<'s, S: BytesSource> PathStream<'s, S> {
    fn empty(
        serializer: &'s MessagePackSerializer,
        registry: &Arc<ShapeRegistry>,
        cancel: &CancelToken,
    ) -> Self {
        PathStream {
            converter: None,
            reader: None,
            ctx: ReadContext::new(serializer.options(), registry.clone(), cancel.clone()),
            cancel: cancel.clone(),
            remaining: Some(0),
        }
    }

    /// The next element, or `None` when the sequence is exhausted.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        if self.remaining == Some(0) {
            return Ok(None);
        }
        let (Some(converter), Some(reader)) = (&self.converter, &mut self.reader) else {
            return Ok(None);
        };
        loop {
            check(&self.cancel, &self.ctx.path)?;
            match reader.probe_structures(1).map_err(|e| self.ctx.codec(e))? {
                DecodeResult::Success(0) => {
                    return match self.remaining {
                        // A declared length was cut short.
                        Some(_) => Err(SerializationError::new(
                            ErrorCode::UnexpectedEnd,
                            "the source ended inside the sequence",
                        )),
                        None => {
                            self.remaining = Some(0);
                            Ok(None)
                        }
                    };
                }
                DecodeResult::Success(_) => break,
                _ => {
                    reader.fetch_more_bytes().await.map_err(io_error)?;
                }
            }
        }
        let mut slice = SliceReader::new(reader.buffered());
        let value = read_value(&**converter, &mut slice, &mut self.ctx)?;
        let consumed = slice.position();
        reader.consume(consumed);
        if let Some(n) = &mut self.remaining {
            *n -= 1;
        }
        Ok(Some(value))
    }
}
