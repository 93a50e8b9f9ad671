//! MessagePack marker bytes and prefix ranges.

/// nil.
pub const NIL: u8 = 0xc0;
/// false.
pub const FALSE: u8 = 0xc2;
/// true.
pub const TRUE: u8 = 0xc3;
/// bin 8.
pub const BIN8: u8 = 0xc4;
/// bin 16.
pub const BIN16: u8 = 0xc5;
/// bin 32.
pub const BIN32: u8 = 0xc6;
/// ext 8.
pub const EXT8: u8 = 0xc7;
/// ext 16.
pub const EXT16: u8 = 0xc8;
/// ext 32.
pub const EXT32: u8 = 0xc9;
/// float 32.
pub const FLOAT32: u8 = 0xca;
/// float 64.
pub const FLOAT64: u8 = 0xcb;
/// uint 8.
pub const UINT8: u8 = 0xcc;
/// uint 16.
pub const UINT16: u8 = 0xcd;
/// uint 32.
pub const UINT32: u8 = 0xce;
/// uint 64.
pub const UINT64: u8 = 0xcf;
/// int 8.
pub const INT8: u8 = 0xd0;
/// int 16.
pub const INT16: u8 = 0xd1;
/// int 32.
pub const INT32: u8 = 0xd2;
/// int 64.
pub const INT64: u8 = 0xd3;
/// fixext 1.
pub const FIXEXT1: u8 = 0xd4;
/// fixext 2.
pub const FIXEXT2: u8 = 0xd5;
/// fixext 4.
pub const FIXEXT4: u8 = 0xd6;
/// fixext 8.
pub const FIXEXT8: u8 = 0xd7;
/// fixext 16.
pub const FIXEXT16: u8 = 0xd8;
/// str 8.
pub const STR8: u8 = 0xd9;
/// str 16.
pub const STR16: u8 = 0xda;
/// str 32.
pub const STR32: u8 = 0xdb;
/// array 16.
pub const ARRAY16: u8 = 0xdc;
/// array 32.
pub const ARRAY32: u8 = 0xdd;
/// map 16.
pub const MAP16: u8 = 0xde;
/// map 32.
pub const MAP32: u8 = 0xdf;

/// Largest positive fixint.
pub const POSFIXINT_MAX: u8 = 0x7f;
/// First fixmap marker.
pub const FIXMAP_MIN: u8 = 0x80;
/// Last fixmap marker.
pub const FIXMAP_MAX: u8 = 0x8f;
/// First fixarray marker.
pub const FIXARRAY_MIN: u8 = 0x90;
/// Last fixarray marker.
pub const FIXARRAY_MAX: u8 = 0x9f;
/// First fixstr marker.
pub const FIXSTR_MIN: u8 = 0xa0;
/// Last fixstr marker.
pub const FIXSTR_MAX: u8 = 0xbf;
/// First negative fixint marker.
pub const NEGFIXINT_MIN: u8 = 0xe0;

/// Extension type code of the standard timestamp extension.
pub const TIMESTAMP_EXT_TYPE: i8 = -1;

/// Whether the marker starts an array (fixarray, array 16/32).
pub const fn is_array(marker: u8) -> bool {
    matches!(marker, FIXARRAY_MIN..=FIXARRAY_MAX | ARRAY16 | ARRAY32)
}

/// Whether the marker starts a map (fixmap, map 16/32).
pub const fn is_map(marker: u8) -> bool {
    matches!(marker, FIXMAP_MIN..=FIXMAP_MAX | MAP16 | MAP32)
}

/// Whether the marker starts a string.
pub const fn is_str(marker: u8) -> bool {
    matches!(marker, FIXSTR_MIN..=FIXSTR_MAX | STR8 | STR16 | STR32)
}

/// Whether the marker starts any integer form.
pub const fn is_int(marker: u8) -> bool {
    matches!(
        marker,
        0x00..=POSFIXINT_MAX
            | NEGFIXINT_MIN..=0xff
            | UINT8..=UINT64
            | INT8..=INT64
    )
}

/// Whether the marker starts an extension (fixext, ext 8/16/32).
pub const fn is_ext(marker: u8) -> bool {
    matches!(marker, EXT8 | EXT16 | EXT32 | FIXEXT1..=FIXEXT16)
}

/// Whether the marker starts a bin blob.
pub const fn is_bin(marker: u8) -> bool {
    matches!(marker, BIN8 | BIN16 | BIN32)
}
