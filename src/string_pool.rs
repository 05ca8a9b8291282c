use std::cell::RefCell;
use std::collections::HashMap;

use crate::chunk::{BinaryReader, NO_ENTRY};
use crate::error::{ParseError, ParseResult};

pub const STRING_FLAG_SORTED: u32 = 0x0000_0001;
pub const STRING_FLAG_UTF8: u32 = 0x0000_0100;

// Obfuscators have been seen declaring absurd counts; Android itself never
// ships pools anywhere near this size.
const MAX_STRING_COUNT: u32 = 2 * 1024 * 1024;

// Bytes of pool header before the offset array, counted from the chunk
// start: 8 header bytes + 5 u32 fields.
const POOL_HEADER_SIZE: i64 = 7 * 4;

/// A string-table chunk: UTF-8 or UTF-16LE entries addressed by a 0-based
/// index, decoded lazily and memoized.
///
/// Index `0xFFFFFFFF` means "no string" and yields the empty string.
#[derive(Debug)]
pub struct StringPool {
    is_utf8: bool,
    offsets: Vec<u32>,
    data: Vec<u8>,
    cache: RefCell<HashMap<u32, String>>,
}

impl StringPool {
    /// Parses a string-pool chunk body (the bytes following the common
    /// 8-byte chunk header).
    pub fn parse(payload: &[u8]) -> ParseResult<StringPool> {
        let mut r = BinaryReader::new(payload);

        let mut string_count = r.read_u32()?;
        r.skip(4)?; // style count
        let mut flags = r.read_u32()?;
        let strings_offset = r.read_u32()?;
        r.skip(4)?; // styles offset

        let is_utf8 = (flags & STRING_FLAG_UTF8) != 0;
        flags &= !(STRING_FLAG_UTF8 | STRING_FLAG_SORTED);
        if flags != 0 {
            return Err(ParseError::malformed(format!(
                "unknown string pool flag: 0x{flags:08x}"
            )));
        }

        if string_count >= MAX_STRING_COUNT {
            return Err(ParseError::malformed(format!(
                "too many strings in this pool ({string_count})"
            )));
        }

        // Some obfuscators lie about the style count, which shows up as the
        // string data starting before the declared offset array ends. When
        // the overlap is a whole number of offsets, drop that many entries.
        let remainder = strings_offset as i64 - POOL_HEADER_SIZE - 4 * string_count as i64;
        if remainder < 0 {
            let overflow = (-remainder) / 4;
            if remainder % 4 == 0 && (overflow as u32) < string_count {
                string_count -= overflow as u32;
            } else {
                return Err(ParseError::malformed(format!(
                    "wrong string data offset (got remainder {remainder})"
                )));
            }
        }

        let mut offsets = Vec::with_capacity(string_count as usize);
        for _ in 0..string_count {
            offsets.push(r.read_u32()?);
        }

        if remainder > 0 {
            r.skip(remainder as usize)?;
        }

        let data = payload[r.position()..].to_vec();

        Ok(StringPool {
            is_utf8,
            offsets,
            data,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// An empty pool, used when a document carries none.
    pub fn empty() -> StringPool {
        StringPool {
            is_utf8: false,
            offsets: Vec::new(),
            data: Vec::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Returns the string at `idx`. `0xFFFFFFFF` yields the empty string,
    /// any other out-of-range index is an error. Decoded strings are
    /// memoized; NUL and invalid code points decode as `U+FFFE`.
    pub fn get(&self, idx: u32) -> ParseResult<String> {
        if idx == NO_ENTRY {
            return Ok(String::new());
        }
        if idx as usize >= self.offsets.len() {
            return Err(ParseError::StringIndexOutOfRange(idx));
        }

        if let Some(cached) = self.cache.borrow().get(&idx) {
            return Ok(cached.clone());
        }

        let offset = self.offsets[idx as usize] as usize;
        if offset >= self.data.len() {
            return Err(ParseError::malformed(format!(
                "string offset for idx {idx} is out of bounds ({offset} >= {})",
                self.data.len()
            )));
        }

        let decoded = if self.is_utf8 {
            decode_utf8(&self.data, offset)?
        } else {
            decode_utf16(&self.data, offset)?
        };

        self.cache.borrow_mut().insert(idx, decoded.clone());
        Ok(decoded)
    }
}

fn decode_utf8(data: &[u8], offset: usize) -> ParseResult<String> {
    let mut cursor = offset;
    // First length is the UTF-16 character count, unused here.
    let (_, consumed) = read_length8(data, cursor)?;
    cursor += consumed;
    let (byte_len, consumed) = read_length8(data, cursor)?;
    cursor += consumed;

    if cursor + byte_len > data.len() {
        return Err(ParseError::malformed("UTF-8 string exceeds pool data"));
    }
    let mut bytes = &data[cursor..cursor + byte_len];
    while let [head @ .., 0] = bytes {
        bytes = head;
    }

    match std::str::from_utf8(bytes) {
        Ok(text) if !text.contains('\0') => Ok(text.to_string()),
        _ => Ok(sanitize(String::from_utf8_lossy(bytes).into_owned())),
    }
}

fn decode_utf16(data: &[u8], offset: usize) -> ParseResult<String> {
    let mut cursor = offset;
    let (char_len, consumed) = read_length16(data, cursor)?;
    cursor += consumed;

    let byte_len = char_len * 2;
    if cursor + byte_len > data.len() {
        return Err(ParseError::malformed("UTF-16 string exceeds pool data"));
    }
    let mut units: Vec<u16> = data[cursor..cursor + byte_len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }

    match String::from_utf16(&units) {
        Ok(text) if !text.contains('\0') => Ok(text),
        _ => Ok(sanitize(String::from_utf16_lossy(&units))),
    }
}

fn read_length8(data: &[u8], offset: usize) -> ParseResult<(usize, usize)> {
    let first = *data
        .get(offset)
        .ok_or_else(|| ParseError::malformed("truncated UTF-8 length prefix"))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let second = *data
        .get(offset + 1)
        .ok_or_else(|| ParseError::malformed("truncated UTF-8 length prefix"))?;
    Ok(((((first & 0x7F) as usize) << 8) | second as usize, 2))
}

fn read_length16(data: &[u8], offset: usize) -> ParseResult<(usize, usize)> {
    if offset + 2 > data.len() {
        return Err(ParseError::malformed("truncated UTF-16 length prefix"));
    }
    let first = u16::from_le_bytes([data[offset], data[offset + 1]]);
    if first & 0x8000 == 0 {
        return Ok((first as usize, 2));
    }
    if offset + 4 > data.len() {
        return Err(ParseError::malformed("truncated UTF-16 length prefix"));
    }
    let second = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
    Ok(((((first & 0x7FFF) as usize) << 16) | second as usize, 4))
}

fn sanitize(text: String) -> String {
    text.chars()
        .map(|c| match c {
            '\0' | '\u{FFFD}' => '\u{FFFE}',
            other => other,
        })
        .collect()
}
