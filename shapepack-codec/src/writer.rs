//! Primitive MessagePack writer over a growable buffer.

use crate::marker;

/// Writes MessagePack atoms into an owned, growable buffer.
///
/// All writes emit the smallest encoding for the value. The buffer is
/// plain memory, so individual writes cannot fail; flushing to a sink is
/// the async layer's concern (see [`crate::AsyncPackWriter`]).
#[derive(Debug, Default)]
pub struct PackWriter {
    buf: Vec<u8>,
}

impl PackWriter {
    /// A fresh writer.
    pub fn new() -> Self {
        PackWriter::default()
    }

    /// A writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        PackWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View of the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Take the written bytes, leaving the writer empty.
    pub fn take(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.buf)
    }

    /// Consume the writer, returning the written bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// nil.
    pub fn write_nil(&mut self) {
        self.buf.push(marker::NIL);
    }

    /// true / false.
    pub fn write_bool(&mut self, value: bool) {
        self.buf
            .push(if value { marker::TRUE } else { marker::FALSE });
    }

    /// Any unsigned integer, smallest form.
    pub fn write_uint(&mut self, value: u64) {
        match value {
            0..=0x7f => self.buf.push(value as u8),
            0x80..=0xff => {
                self.buf.push(marker::UINT8);
                self.buf.push(value as u8);
            }
            0x100..=0xffff => {
                self.buf.push(marker::UINT16);
                self.buf.extend_from_slice(&(value as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.push(marker::UINT32);
                self.buf.extend_from_slice(&(value as u32).to_be_bytes());
            }
            _ => {
                self.buf.push(marker::UINT64);
                self.buf.extend_from_slice(&value.to_be_bytes());
            }
        }
    }

    /// Any signed integer, smallest form. Non-negative values use the
    /// unsigned encodings.
    pub fn write_int(&mut self, value: i64) {
        if value >= 0 {
            return self.write_uint(value as u64);
        }
        match value {
            -32..=-1 => self.buf.push(value as i8 as u8),
            -0x80..=-33 => {
                self.buf.push(marker::INT8);
                self.buf.push(value as i8 as u8);
            }
            -0x8000..=-0x81 => {
                self.buf.push(marker::INT16);
                self.buf.extend_from_slice(&(value as i16).to_be_bytes());
            }
            -0x8000_0000..=-0x8001 => {
                self.buf.push(marker::INT32);
                self.buf.extend_from_slice(&(value as i32).to_be_bytes());
            }
            _ => {
                self.buf.push(marker::INT64);
                self.buf.extend_from_slice(&value.to_be_bytes());
            }
        }
    }

    /// float 32.
    pub fn write_f32(&mut self, value: f32) {
        self.buf.push(marker::FLOAT32);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// float 64.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.push(marker::FLOAT64);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// UTF-8 string, smallest header.
    pub fn write_str(&mut self, value: &str) {
        let len = value.len();
        match len {
            0..=31 => self.buf.push(marker::FIXSTR_MIN | len as u8),
            32..=0xff => {
                self.buf.push(marker::STR8);
                self.buf.push(len as u8);
            }
            0x100..=0xffff => {
                self.buf.push(marker::STR16);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(marker::STR32);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
        }
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// bin blob, smallest header.
    pub fn write_bin(&mut self, value: &[u8]) {
        let len = value.len();
        match len {
            0..=0xff => {
                self.buf.push(marker::BIN8);
                self.buf.push(len as u8);
            }
            0x100..=0xffff => {
                self.buf.push(marker::BIN16);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(marker::BIN32);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
        }
        self.buf.extend_from_slice(value);
    }

    /// Array header for `len` elements.
    pub fn write_array_header(&mut self, len: usize) {
        match len {
            0..=15 => self.buf.push(marker::FIXARRAY_MIN | len as u8),
            16..=0xffff => {
                self.buf.push(marker::ARRAY16);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(marker::ARRAY32);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
        }
    }

    /// Map header for `len` key/value pairs.
    pub fn write_map_header(&mut self, len: usize) {
        match len {
            0..=15 => self.buf.push(marker::FIXMAP_MIN | len as u8),
            16..=0xffff => {
                self.buf.push(marker::MAP16);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(marker::MAP32);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
        }
    }

    /// Extension with the given type code, smallest header.
    pub fn write_ext(&mut self, type_code: i8, data: &[u8]) {
        match data.len() {
            1 => self.buf.push(marker::FIXEXT1),
            2 => self.buf.push(marker::FIXEXT2),
            4 => self.buf.push(marker::FIXEXT4),
            8 => self.buf.push(marker::FIXEXT8),
            16 => self.buf.push(marker::FIXEXT16),
            len @ 0..=0xff => {
                self.buf.push(marker::EXT8);
                self.buf.push(len as u8);
            }
            len @ 0x100..=0xffff => {
                self.buf.push(marker::EXT16);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                self.buf.push(marker::EXT32);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
        }
        self.buf.push(type_code as u8);
        self.buf.extend_from_slice(data);
    }

    /// Standard timestamp extension (`-1`), smallest of the 32/64/96-bit
    /// forms that holds the instant.
    pub fn write_timestamp(&mut self, secs: i64, nanos: u32) {
        if secs >= 0 && secs >> 34 == 0 {
            let packed = (nanos as u64) << 34 | secs as u64;
            if packed & 0xffff_ffff_0000_0000 == 0 {
                self.write_ext(marker::TIMESTAMP_EXT_TYPE, &(packed as u32).to_be_bytes());
            } else {
                self.write_ext(marker::TIMESTAMP_EXT_TYPE, &packed.to_be_bytes());
            }
        } else {
            let mut body = [0u8; 12];
            body[..4].copy_from_slice(&nanos.to_be_bytes());
            body[4..].copy_from_slice(&secs.to_be_bytes());
            self.write_ext(marker::TIMESTAMP_EXT_TYPE, &body);
        }
    }

    /// Splice previously captured wire bytes in verbatim.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}
