//! Manual bencode token scanner.
//!
//! Walks tokens positionally (integers `i..e`, strings `<len>:<bytes>`,
//! lists/dicts with depth tracking) so callers can recover the exact byte
//! range of any value without re-encoding it.

use crate::error::BencodeError;

/// Parse the top-level dictionary and return `(key, raw value bytes)` pairs.
///
/// The value slices are the untouched byte ranges from `data`, suitable for
/// hashing or re-embedding verbatim.
///
/// # Errors
///
/// Returns [`BencodeError`] when the payload is not a well-formed dictionary.
pub fn parse_dict_entries(data: &[u8]) -> Result<Vec<(&[u8], &[u8])>, BencodeError> {
    if data.first() != Some(&b'd') {
        return Err(BencodeError::NotADictionary);
    }
    let mut entries = Vec::new();
    let mut pos = 1;
    loop {
        match data.get(pos) {
            None => return Err(BencodeError::Truncated { offset: pos }),
            Some(b'e') => break,
            Some(_) => {}
        }
        let (key, key_end) = read_string(data, pos)?;
        let value_end = skip_value(data, key_end)?;
        entries.push((key, &data[key_end..value_end]));
        pos = value_end;
    }
    Ok(entries)
}

/// Extract the raw bytes of the `info` value from an outer bencoded dict.
///
/// Two storage representations are accepted: the standard nested dictionary
/// (`4:infod...e`) and the string-wrapped form (`4:info<len>:<bytes>`) used by
/// internally persisted metadata. In both cases the returned slice is the
/// contiguous info dictionary exactly as it appears in `data`, so
/// `SHA-1(extract_raw_info(t))` reproduces the original info-hash.
///
/// # Errors
///
/// Returns [`BencodeError`] when the payload is malformed or lacks an `info`
/// key.
pub fn extract_raw_info(data: &[u8]) -> Result<&[u8], BencodeError> {
    for (key, value) in parse_dict_entries(data)? {
        if key != b"info" {
            continue;
        }
        return match value.first() {
            Some(b'd') => Ok(value),
            Some(b'0'..=b'9') => {
                let (payload, _) = read_string(value, 0)?;
                Ok(payload)
            }
            Some(other) => Err(BencodeError::UnexpectedByte {
                byte: *other,
                offset: 0,
            }),
            None => Err(BencodeError::Truncated { offset: 0 }),
        };
    }
    Err(BencodeError::MissingKey { key: "info" })
}

/// Split a bencoded list into the raw byte ranges of its items.
pub(crate) fn parse_list_items(data: &[u8]) -> Result<Vec<&[u8]>, BencodeError> {
    if data.first() != Some(&b'l') {
        return Err(BencodeError::UnexpectedByte {
            byte: data.first().copied().unwrap_or(b'?'),
            offset: 0,
        });
    }
    let mut items = Vec::new();
    let mut pos = 1;
    loop {
        match data.get(pos) {
            None => return Err(BencodeError::Truncated { offset: pos }),
            Some(b'e') => break,
            Some(_) => {}
        }
        let end = skip_value(data, pos)?;
        items.push(&data[pos..end]);
        pos = end;
    }
    Ok(items)
}

/// Decode a standalone string value (`<len>:<bytes>`).
pub(crate) fn parse_string_value(data: &[u8]) -> Result<&[u8], BencodeError> {
    let (payload, _) = read_string(data, 0)?;
    Ok(payload)
}

/// Decode a standalone integer value (`i<digits>e`).
pub(crate) fn parse_integer_value(data: &[u8]) -> Result<i64, BencodeError> {
    let end = skip_integer(data, 0)?;
    let digits = &data[1..end - 1];
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(BencodeError::MalformedLiteral {
            kind: "integer",
            offset: 0,
        })
}

/// Read a length-prefixed string starting at `pos`, returning the payload and
/// the offset one past its final byte.
fn read_string(data: &[u8], pos: usize) -> Result<(&[u8], usize), BencodeError> {
    let mut cursor = pos;
    let mut len: usize = 0;
    let mut saw_digit = false;
    loop {
        match data.get(cursor) {
            Some(byte @ b'0'..=b'9') => {
                saw_digit = true;
                len = len
                    .checked_mul(10)
                    .and_then(|value| value.checked_add(usize::from(byte - b'0')))
                    .ok_or(BencodeError::MalformedLiteral {
                        kind: "string-length",
                        offset: pos,
                    })?;
                cursor += 1;
            }
            Some(b':') if saw_digit => {
                cursor += 1;
                break;
            }
            Some(byte) => {
                return Err(BencodeError::UnexpectedByte {
                    byte: *byte,
                    offset: cursor,
                });
            }
            None => return Err(BencodeError::Truncated { offset: cursor }),
        }
    }
    let end = cursor
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or(BencodeError::Truncated { offset: cursor })?;
    Ok((&data[cursor..end], end))
}

/// Skip one bencode value starting at `pos`, returning the offset one past it.
fn skip_value(data: &[u8], pos: usize) -> Result<usize, BencodeError> {
    match data.get(pos) {
        Some(b'i') => skip_integer(data, pos),
        Some(b'0'..=b'9') => read_string(data, pos).map(|(_, end)| end),
        Some(b'l' | b'd') => skip_container(data, pos),
        Some(byte) => Err(BencodeError::UnexpectedByte {
            byte: *byte,
            offset: pos,
        }),
        None => Err(BencodeError::Truncated { offset: pos }),
    }
}

fn skip_integer(data: &[u8], pos: usize) -> Result<usize, BencodeError> {
    let mut cursor = pos + 1;
    let mut saw_digit = false;
    if data.get(cursor) == Some(&b'-') {
        cursor += 1;
    }
    loop {
        match data.get(cursor) {
            Some(b'0'..=b'9') => {
                saw_digit = true;
                cursor += 1;
            }
            Some(b'e') if saw_digit => return Ok(cursor + 1),
            Some(_) | None if !saw_digit => {
                return Err(BencodeError::MalformedLiteral {
                    kind: "integer",
                    offset: pos,
                });
            }
            Some(byte) => {
                return Err(BencodeError::UnexpectedByte {
                    byte: *byte,
                    offset: cursor,
                });
            }
            None => return Err(BencodeError::Truncated { offset: cursor }),
        }
    }
}

/// Skip a list or dict by tracking nesting depth. Dict keys are ordinary
/// strings, so a single token walk covers both container kinds.
fn skip_container(data: &[u8], pos: usize) -> Result<usize, BencodeError> {
    let mut depth = 0usize;
    let mut cursor = pos;
    loop {
        match data.get(cursor) {
            Some(b'l' | b'd') => {
                depth += 1;
                cursor += 1;
            }
            Some(b'e') => {
                depth -= 1;
                cursor += 1;
                if depth == 0 {
                    return Ok(cursor);
                }
            }
            Some(b'i') => cursor = skip_integer(data, cursor)?,
            Some(b'0'..=b'9') => cursor = read_string(data, cursor).map(|(_, end)| end)?,
            Some(byte) => {
                return Err(BencodeError::UnexpectedByte {
                    byte: *byte,
                    offset: cursor,
                });
            }
            None => return Err(BencodeError::Truncated { offset: cursor }),
        }
    }
}
