//! Length-prefixed binary encoding of a string property map.
//!
//! Layout: a 4-byte little-endian signed pair count, then each key and value
//! as UTF-8 bytes preceded by their byte length in 7-bit variable-length form.
//!
//! Readers tolerate a text-encoding preamble in front of the count. The first
//! four bytes are read, compared with the preamble of the declared encoding,
//! and shifted out when they match.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use std::io::{ErrorKind, Read};

/// Size of the leading count field.
const COUNT_LEN: usize = 4;

/// Longest permitted 7-bit encoded length prefix.
const MAX_VARINT_BYTES: usize = 5;

/// Declared text encoding of the stream carrying the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    /// No preamble
    #[default]
    Plain,
    /// UTF-8 with byte-order mark
    Utf8,
    /// UTF-16 little endian
    Utf16Le,
    /// UTF-16 big endian
    Utf16Be,
    /// UTF-32 little endian
    Utf32Le,
}

impl TextEncoding {
    /// Every declared encoding.
    pub const ALL: [Self; 5] = [
        Self::Plain,
        Self::Utf8,
        Self::Utf16Le,
        Self::Utf16Be,
        Self::Utf32Le,
    ];

    /// Preamble bytes a stream in this encoding may start with.
    #[must_use]
    pub const fn preamble(self) -> &'static [u8] {
        match self {
            Self::Plain => &[],
            Self::Utf8 => &[0xEF, 0xBB, 0xBF],
            Self::Utf16Le => &[0xFF, 0xFE],
            Self::Utf16Be => &[0xFE, 0xFF],
            Self::Utf32Le => &[0xFF, 0xFE, 0x00, 0x00],
        }
    }
}

/// Encode a property map.
///
/// # Errors
///
/// Fails if the map holds more pairs than the count field can express.
pub fn encode(properties: &IndexMap<String, String>) -> Result<Bytes> {
    let count = i32::try_from(properties.len())
        .map_err(|_| Error::codec(format!("too many properties: {}", properties.len())))?;

    let mut buf = BytesMut::with_capacity(
        COUNT_LEN
            + properties
                .iter()
                .map(|(k, v)| k.len() + v.len() + 2)
                .sum::<usize>(),
    );
    buf.put_i32_le(count);
    for (key, value) in properties {
        put_string(&mut buf, key)?;
        put_string(&mut buf, value)?;
    }
    Ok(buf.freeze())
}

/// Encode a property map preceded by the preamble of `encoding`.
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_with_preamble(
    properties: &IndexMap<String, String>,
    encoding: TextEncoding,
) -> Result<Bytes> {
    let body = encode(properties)?;
    let mut buf = BytesMut::with_capacity(encoding.preamble().len() + body.len());
    buf.put_slice(encoding.preamble());
    buf.put_slice(&body);
    Ok(buf.freeze())
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| Error::codec(format!("string of {} bytes is too long", value.len())))?;
    put_varint(buf, len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_varint(buf: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Decode a property map from a byte slice.
///
/// # Errors
///
/// Fails on truncated input, a negative count, an oversized length prefix, or
/// invalid UTF-8.
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> Result<IndexMap<String, String>> {
    decode_from(bytes, encoding)
}

/// Decode a property map from a reader, skipping a leading preamble if present.
///
/// # Errors
///
/// Same as [`decode`], plus any read error from `reader`.
pub fn decode_from<R: Read>(mut reader: R, encoding: TextEncoding) -> Result<IndexMap<String, String>> {
    let mut head = [0u8; COUNT_LEN];
    read_exact(&mut reader, &mut head, "count")?;

    let preamble = encoding.preamble();
    if !preamble.is_empty() && head.starts_with(preamble) {
        let skip = preamble.len();
        head.copy_within(skip.., 0);
        read_exact(&mut reader, &mut head[COUNT_LEN - skip..], "count")?;
    }

    let count = i32::from_le_bytes(head);
    let count =
        usize::try_from(count).map_err(|_| Error::codec(format!("negative property count {count}")))?;

    let mut properties = IndexMap::with_capacity(count.min(1024));
    for _ in 0..count {
        let key = read_string(&mut reader)?;
        let value = read_string(&mut reader)?;
        properties.insert(key, value);
    }
    Ok(properties)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], field: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::codec(format!("stream ended while reading {field}"))
        } else {
            Error::io(e, None, format!("read property {field}"))
        }
    })
}

fn read_varint<R: Read>(reader: &mut R) -> Result<u32> {
    let mut value: u32 = 0;
    for index in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        read_exact(reader, &mut byte, "length prefix")?;
        let bits = u32::from(byte[0] & 0x7F);
        if index == MAX_VARINT_BYTES - 1 && bits > 0x0F {
            break;
        }
        value |= bits << (7 * index);
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::codec("malformed length prefix"))
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = u64::from(read_varint(reader)?);
    // Grow with the bytes actually present; the prefix is untrusted.
    let mut bytes = Vec::new();
    let read = reader
        .by_ref()
        .take(len)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::io(e, None, "read property string"))?;
    if u64::try_from(read).unwrap_or(u64::MAX) < len {
        return Err(Error::codec(format!(
            "stream ended while reading string: expected {len} bytes, found {read}"
        )));
    }
    String::from_utf8(bytes).map_err(|e| Error::codec(format!("invalid UTF-8 in property: {e}")))
}
