//! Low-level MessagePack codec for the shapepack engine.
//!
//! This crate knows nothing about shapes or converters; it reads and
//! writes MessagePack atoms, array/map headers, bin, ext and nil:
//!
//! - [`PackWriter`]: primitive writes into a growable buffer, always in
//!   the smallest encoding.
//! - [`SliceReader`]: synchronous in-place reads over contiguous bytes,
//!   with independent peek cursors and O(bytes) skipping.
//! - [`StreamingReader`]: the resumable layer for fragmented input —
//!   decodes report [`DecodeResult::InsufficientBuffer`] and resume after
//!   [`StreamingReader::fetch_more_bytes`].
//! - [`AsyncPackWriter`]: buffered output that drains to a [`FlushSink`]
//!   at safe boundaries.

#![warn(missing_docs)]

mod error;
pub mod marker;
mod reader;
mod stream;
mod writer;

pub use error::{CodecError, CodecErrorKind};
pub use reader::SliceReader;
pub use stream::{
    AsyncPackWriter, BytesSource, ChunkSource, DecodeResult, FlushSink, StreamError,
    StreamingReader,
};
pub use writer::PackWriter;

/// Result alias for codec operations.
pub type Result<T> = core::result::Result<T, CodecError>;
