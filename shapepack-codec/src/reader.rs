//! Buffered, in-place MessagePack reader.

use crate::marker;
use crate::{CodecError, Result};

/// Reads MessagePack atoms from a contiguous byte slice.
///
/// Purely synchronous; the caller guarantees the slice holds at least one
/// complete structure (or handles [`CodecError::unexpected_end`]).
/// Cloning via [`SliceReader::create_peek_reader`] yields an independent
/// cursor over the same bytes.
#[derive(Clone)]
pub struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    /// A reader over `buf`, positioned at the start.
    pub const fn new(buf: &'a [u8]) -> Self {
        SliceReader { buf, pos: 0 }
    }

    /// Current byte offset.
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the reader is exhausted.
    pub const fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// An independent cursor over the same bytes. Advancing the peek
    /// reader does not advance `self`.
    pub fn create_peek_reader(&self) -> SliceReader<'a> {
        self.clone()
    }

    /// Adopt the position of a peek reader created from this buffer.
    pub fn sync_to(&mut self, peek: &SliceReader<'a>) {
        self.pos = peek.pos;
    }

    /// Jump to an absolute offset previously obtained from
    /// [`SliceReader::position`] on this buffer.
    pub fn fast_forward(&mut self, offset: usize) {
        debug_assert!(offset <= self.buf.len());
        self.pos = offset.min(self.buf.len());
    }

    /// The next marker byte, without consuming it.
    pub fn peek_marker(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| CodecError::unexpected_end(self.pos))
    }

    fn read_byte(&mut self) -> Result<u8> {
        let byte = self.peek_marker()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::unexpected_end(self.buf.len()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64_raw(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Consume a nil if one is next. Returns whether it was consumed.
    pub fn try_read_nil(&mut self) -> Result<bool> {
        if self.peek_marker()? == marker::NIL {
            self.pos += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        let start = self.pos;
        match self.read_byte()? {
            marker::TRUE => Ok(true),
            marker::FALSE => Ok(false),
            m => {
                self.pos = start;
                Err(CodecError::type_mismatch(start, "bool", m))
            }
        }
    }

    /// Read any integer form as a signed/unsigned pair. The boolean is
    /// `true` when the value is `u64`-only (above `i64::MAX`).
    fn read_integer(&mut self, expected: &'static str) -> Result<(i64, Option<u64>)> {
        let start = self.pos;
        let m = self.read_byte()?;
        let result: Result<(i64, Option<u64>)> = match m {
            0x00..=marker::POSFIXINT_MAX => Ok((m as i64, None)),
            marker::NEGFIXINT_MIN..=0xff => Ok((m as i8 as i64, None)),
            marker::UINT8 => Ok((self.read_byte()? as i64, None)),
            marker::UINT16 => Ok((self.read_u16()? as i64, None)),
            marker::UINT32 => Ok((self.read_u32()? as i64, None)),
            marker::UINT64 => {
                let v = self.read_u64_raw()?;
                if v <= i64::MAX as u64 {
                    Ok((v as i64, None))
                } else {
                    Ok((0, Some(v)))
                }
            }
            marker::INT8 => Ok((self.read_byte()? as i8 as i64, None)),
            marker::INT16 => Ok((self.read_u16()? as i16 as i64, None)),
            marker::INT32 => Ok((self.read_u32()? as i32 as i64, None)),
            marker::INT64 => Ok((self.read_u64_raw()? as i64, None)),
            _ => Err(CodecError::type_mismatch(start, expected, m)),
        };
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    /// Read any integer that fits `i64`.
    pub fn read_int(&mut self) -> Result<i64> {
        let start = self.pos;
        match self.read_integer("integer")? {
            (v, None) => Ok(v),
            (_, Some(_)) => {
                self.pos = start;
                Err(CodecError::malformed(start, "integer exceeds i64 range"))
            }
        }
    }

    /// Read any non-negative integer as `u64`.
    pub fn read_uint(&mut self) -> Result<u64> {
        let start = self.pos;
        match self.read_integer("unsigned integer")? {
            (v, None) if v >= 0 => Ok(v as u64),
            (_, Some(v)) => Ok(v),
            _ => {
                self.pos = start;
                Err(CodecError::malformed(start, "negative integer where unsigned expected"))
            }
        }
    }

    /// Read any integer, preserving magnitudes above `i64::MAX`.
    /// `Ok(Err(u))` carries a `u64`-only magnitude.
    pub fn read_int_lossless(&mut self) -> Result<core::result::Result<i64, u64>> {
        match self.read_integer("integer")? {
            (v, None) => Ok(Ok(v)),
            (_, Some(v)) => Ok(Err(v)),
        }
    }

    /// Read a float 32.
    pub fn read_f32(&mut self) -> Result<f32> {
        let start = self.pos;
        match self.read_byte()? {
            marker::FLOAT32 => Ok(f32::from_be_bytes(self.read_bytes(4)?.try_into().map_err(
                |_| CodecError::unexpected_end(self.buf.len()),
            )?)),
            m => {
                self.pos = start;
                Err(CodecError::type_mismatch(start, "float32", m))
            }
        }
    }

    /// Read a float 64, accepting a float 32 widened.
    pub fn read_f64(&mut self) -> Result<f64> {
        let start = self.pos;
        match self.read_byte()? {
            marker::FLOAT64 => {
                let b = self.read_bytes(8)?;
                Ok(f64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            }
            marker::FLOAT32 => {
                let b = self.read_bytes(4)?;
                Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64)
            }
            m => {
                self.pos = start;
                Err(CodecError::type_mismatch(start, "float", m))
            }
        }
    }

    fn read_str_len(&mut self, m: u8, start: usize) -> Result<usize> {
        match m {
            marker::FIXSTR_MIN..=marker::FIXSTR_MAX => Ok((m & 0x1f) as usize),
            marker::STR8 => Ok(self.read_byte()? as usize),
            marker::STR16 => Ok(self.read_u16()? as usize),
            marker::STR32 => Ok(self.read_u32()? as usize),
            _ => Err(CodecError::type_mismatch(start, "string", m)),
        }
    }

    /// Read a string, borrowing from the buffer.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let m = self.read_byte()?;
        let len = match self.read_str_len(m, start) {
            Ok(len) => len,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        let bytes = self.read_bytes(len)?;
        core::str::from_utf8(bytes)
            .map_err(|_| CodecError::malformed(start, "string is not valid UTF-8"))
    }

    /// Attempt a string read without consuming on marker mismatch.
    pub fn try_read_str(&mut self) -> Result<Option<&'a str>> {
        if marker::is_str(self.peek_marker()?) {
            Ok(Some(self.read_str()?))
        } else {
            Ok(None)
        }
    }

    /// Read a bin blob, borrowing from the buffer.
    pub fn read_bin(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let m = self.read_byte()?;
        let len = match m {
            marker::BIN8 => self.read_byte()? as usize,
            marker::BIN16 => self.read_u16()? as usize,
            marker::BIN32 => self.read_u32()? as usize,
            _ => {
                self.pos = start;
                return Err(CodecError::type_mismatch(start, "bin", m));
            }
        };
        self.read_bytes(len)
    }

    /// Read an array header, returning the element count.
    pub fn read_array_header(&mut self) -> Result<usize> {
        let start = self.pos;
        let m = self.read_byte()?;
        match m {
            marker::FIXARRAY_MIN..=marker::FIXARRAY_MAX => Ok((m & 0x0f) as usize),
            marker::ARRAY16 => Ok(self.read_u16()? as usize),
            marker::ARRAY32 => Ok(self.read_u32()? as usize),
            _ => {
                self.pos = start;
                Err(CodecError::type_mismatch(start, "array", m))
            }
        }
    }

    /// Array header if one is next; `None` (nothing consumed) otherwise.
    pub fn try_read_array_header(&mut self) -> Result<Option<usize>> {
        if marker::is_array(self.peek_marker()?) {
            Ok(Some(self.read_array_header()?))
        } else {
            Ok(None)
        }
    }

    /// Read a map header, returning the pair count.
    pub fn read_map_header(&mut self) -> Result<usize> {
        let start = self.pos;
        let m = self.read_byte()?;
        match m {
            marker::FIXMAP_MIN..=marker::FIXMAP_MAX => Ok((m & 0x0f) as usize),
            marker::MAP16 => Ok(self.read_u16()? as usize),
            marker::MAP32 => Ok(self.read_u32()? as usize),
            _ => {
                self.pos = start;
                Err(CodecError::type_mismatch(start, "map", m))
            }
        }
    }

    /// Map header if one is next; `None` (nothing consumed) otherwise.
    pub fn try_read_map_header(&mut self) -> Result<Option<usize>> {
        if marker::is_map(self.peek_marker()?) {
            Ok(Some(self.read_map_header()?))
        } else {
            Ok(None)
        }
    }

    /// Extension type code of the next value, if the next value is an
    /// extension. Consumes nothing.
    pub fn peek_ext_type(&self) -> Result<Option<i8>> {
        let m = self.peek_marker()?;
        let type_offset = match m {
            marker::FIXEXT1..=marker::FIXEXT16 => 1,
            marker::EXT8 => 2,
            marker::EXT16 => 3,
            marker::EXT32 => 5,
            _ => return Ok(None),
        };
        self.buf
            .get(self.pos + type_offset)
            .map(|b| Some(*b as i8))
            .ok_or_else(|| CodecError::unexpected_end(self.buf.len()))
    }

    /// Read an extension, returning its type code and payload.
    pub fn read_ext(&mut self) -> Result<(i8, &'a [u8])> {
        let start = self.pos;
        let m = self.read_byte()?;
        let len = match m {
            marker::FIXEXT1 => 1,
            marker::FIXEXT2 => 2,
            marker::FIXEXT4 => 4,
            marker::FIXEXT8 => 8,
            marker::FIXEXT16 => 16,
            marker::EXT8 => self.read_byte()? as usize,
            marker::EXT16 => self.read_u16()? as usize,
            marker::EXT32 => self.read_u32()? as usize,
            _ => {
                self.pos = start;
                return Err(CodecError::type_mismatch(start, "ext", m));
            }
        };
        let type_code = self.read_byte()? as i8;
        let data = self.read_bytes(len)?;
        Ok((type_code, data))
    }

    /// Read a standard timestamp extension as `(secs, nanos)`.
    pub fn read_timestamp(&mut self) -> Result<(i64, u32)> {
        let start = self.pos;
        let (type_code, data) = self.read_ext()?;
        if type_code != marker::TIMESTAMP_EXT_TYPE {
            self.pos = start;
            return Err(CodecError::malformed(start, "extension is not a timestamp"));
        }
        match data.len() {
            4 => Ok((u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as i64, 0)),
            8 => {
                let packed = u64::from_be_bytes([
                    data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
                ]);
                Ok(((packed & 0x3_ffff_ffff) as i64, (packed >> 34) as u32))
            }
            12 => {
                let nanos = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let secs = i64::from_be_bytes([
                    data[4], data[5], data[6], data[7], data[8], data[9], data[10], data[11],
                ]);
                Ok((secs, nanos))
            }
            len => {
                self.pos = start;
                Err(CodecError::malformed(
                    start,
                    format!("timestamp payload of {len} bytes"),
                ))
            }
        }
    }

    /// Skip the next structure entirely, in O(bytes) with an explicit
    /// pending count instead of recursion.
    pub fn skip(&mut self) -> Result<()> {
        let mut pending: usize = 1;
        while pending > 0 {
            pending -= 1;
            pending += self.skip_one()?;
        }
        Ok(())
    }

    /// Consume one marker and its immediate payload, returning how many
    /// child structures remain to be skipped.
    pub(crate) fn skip_one(&mut self) -> Result<usize> {
        let start = self.pos;
        let m = self.read_byte()?;
        let result: Result<usize> = match m {
            marker::NIL | marker::FALSE | marker::TRUE => Ok(0),
            0x00..=marker::POSFIXINT_MAX | marker::NEGFIXINT_MIN..=0xff => Ok(0),
            marker::UINT8 | marker::INT8 => self.read_bytes(1).map(|_| 0),
            marker::UINT16 | marker::INT16 => self.read_bytes(2).map(|_| 0),
            marker::UINT32 | marker::INT32 | marker::FLOAT32 => self.read_bytes(4).map(|_| 0),
            marker::UINT64 | marker::INT64 | marker::FLOAT64 => self.read_bytes(8).map(|_| 0),
            marker::FIXSTR_MIN..=marker::FIXSTR_MAX => {
                self.read_bytes((m & 0x1f) as usize).map(|_| 0)
            }
            marker::STR8 | marker::BIN8 => {
                let len = self.read_byte()? as usize;
                self.read_bytes(len).map(|_| 0)
            }
            marker::STR16 | marker::BIN16 => {
                let len = self.read_u16()? as usize;
                self.read_bytes(len).map(|_| 0)
            }
            marker::STR32 | marker::BIN32 => {
                let len = self.read_u32()? as usize;
                self.read_bytes(len).map(|_| 0)
            }
            marker::FIXEXT1 => self.read_bytes(2).map(|_| 0),
            marker::FIXEXT2 => self.read_bytes(3).map(|_| 0),
            marker::FIXEXT4 => self.read_bytes(5).map(|_| 0),
            marker::FIXEXT8 => self.read_bytes(9).map(|_| 0),
            marker::FIXEXT16 => self.read_bytes(17).map(|_| 0),
            marker::EXT8 => {
                let len = self.read_byte()? as usize;
                self.read_bytes(1 + len).map(|_| 0)
            }
            marker::EXT16 => {
                let len = self.read_u16()? as usize;
                self.read_bytes(1 + len).map(|_| 0)
            }
            marker::EXT32 => {
                let len = self.read_u32()? as usize;
                self.read_bytes(1 + len).map(|_| 0)
            }
            marker::FIXARRAY_MIN..=marker::FIXARRAY_MAX => Ok((m & 0x0f) as usize),
            marker::ARRAY16 => self.read_u16().map(|len| len as usize),
            marker::ARRAY32 => self.read_u32().map(|len| len as usize),
            marker::FIXMAP_MIN..=marker::FIXMAP_MAX => Ok((m & 0x0f) as usize * 2),
            marker::MAP16 => self.read_u16().map(|len| len as usize * 2),
            marker::MAP32 => self.read_u32().map(|len| len as usize * 2),
            _ => Err(CodecError::malformed(
                start,
                format!("reserved marker 0x{m:02x}"),
            )),
        };
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    /// Skip the next structure and return its exact wire bytes.
    pub fn read_value_bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        self.skip()?;
        Ok(&self.buf[start..self.pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackWriter;

    #[test]
    fn mismatch_consumes_nothing() {
        let mut reader = SliceReader::new(&[0xa1, b'x']);
        assert!(reader.read_bool().is_err());
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_str().unwrap(), "x");
    }

    #[test]
    fn peek_reader_is_independent() {
        let bytes = [0x01, 0x02];
        let mut reader = SliceReader::new(&bytes);
        let mut peek = reader.create_peek_reader();
        assert_eq!(peek.read_int().unwrap(), 1);
        assert_eq!(peek.read_int().unwrap(), 2);
        assert_eq!(reader.read_int().unwrap(), 1);
    }

    #[test]
    fn skip_nested_lands_on_next_byte() {
        let mut writer = PackWriter::new();
        writer.write_array_header(2);
        writer.write_map_header(1);
        writer.write_str("k");
        writer.write_array_header(3);
        writer.write_int(1);
        writer.write_int(2);
        writer.write_int(3);
        writer.write_str("tail");
        writer.write_int(42);
        let bytes = writer.into_vec();

        let mut reader = SliceReader::new(&bytes);
        reader.skip().unwrap();
        assert_eq!(reader.read_int().unwrap(), 42);
    }

    #[test]
    fn value_bytes_round_trip() {
        let mut writer = PackWriter::new();
        writer.write_map_header(1);
        writer.write_str("a");
        writer.write_int(7);
        let bytes = writer.into_vec();

        let mut reader = SliceReader::new(&bytes);
        let raw = reader.read_value_bytes().unwrap();
        assert_eq!(raw, &bytes[..]);
    }

    #[test]
    fn timestamp_forms_decode() {
        for (secs, nanos) in [(0, 0), (1, 0), (1, 1), (1 << 33, 5), (-7, 125)] {
            let mut writer = PackWriter::new();
            writer.write_timestamp(secs, nanos);
            let bytes = writer.into_vec();
            let mut reader = SliceReader::new(&bytes);
            assert_eq!(reader.read_timestamp().unwrap(), (secs, nanos));
        }
    }

    #[test]
    fn peek_ext_type_sees_through_headers() {
        let mut writer = PackWriter::new();
        writer.write_ext(-5, &[1, 2, 3]);
        let bytes = writer.into_vec();
        let reader = SliceReader::new(&bytes);
        assert_eq!(reader.peek_ext_type().unwrap(), Some(-5));
    }

    #[test]
    fn uint64_above_i64_is_lossless() {
        let mut writer = PackWriter::new();
        writer.write_uint(u64::MAX);
        let bytes = writer.into_vec();
        let mut reader = SliceReader::new(&bytes);
        assert_eq!(reader.read_int_lossless().unwrap(), Err(u64::MAX));
    }
}
