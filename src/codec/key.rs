// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The row key codec.
//!
//! # Encoding
//!
//! Each field is written as its UTF-8 bytes followed by a single
//! [`SEPARATOR`] (`0x00`) octet. Occurrences of the two reserved octets
//! inside a field are escaped:
//!
//! | Field octet | Encoded as  |
//! |-------------|-------------|
//! | `0x00`      | `0x01 0x01` |
//! | `0x01`      | `0x01 0x02` |
//!
//! Both escapes start with `0x01`, which sorts after the separator, and
//! their second octets keep the original relative order. Comparing two
//! encoded keys byte by byte is therefore the same as comparing their
//! field sequences field by field, and a terminated prefix of an
//! encoded key (see [`encode_prefix`]) matches exactly the keys whose
//! leading fields are equal to the given ones. An unterminated prefix
//! (see [`escape_field`]) instead matches every key whose first field
//! *starts with* the given string.
//!
//! The escaping makes the encoding injective for every input, so
//! [`decode`] recovers the exact original fields.

use super::DecodeError;

/// The octet terminating every encoded field.
pub const SEPARATOR: u8 = 0x00;

/// The octet introducing an escape sequence.
const ESCAPE: u8 = 0x01;

/// Encodes a sequence of fields into a row key.
pub fn encode<I, S>(fields: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut buf = Vec::new();
    for field in fields {
        push_field(&mut buf, field.as_ref());
        buf.push(SEPARATOR);
    }
    buf
}

/// Encodes the leading fields of a row key. Every key whose first
/// fields equal `fields` starts with the returned bytes, and no other
/// key does. This is the same as [`encode`]; the separate name makes
/// the intent at call sites clearer.
pub fn encode_prefix<I, S>(fields: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    encode(fields)
}

/// Escapes a single field without terminating it. Used as a scan
/// prefix, this selects every key whose first field starts with
/// `field`.
pub fn escape_field(field: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(field.len());
    push_field(&mut buf, field);
    buf
}

fn push_field(buf: &mut Vec<u8>, field: &str) {
    for &octet in field.as_bytes() {
        match octet {
            SEPARATOR => buf.extend_from_slice(&[ESCAPE, 0x01]),
            ESCAPE => buf.extend_from_slice(&[ESCAPE, 0x02]),
            other => buf.push(other),
        }
    }
}

/// Decodes a row key into its fields.
pub fn decode(key: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut octets = key.iter();
    while let Some(&octet) = octets.next() {
        match octet {
            SEPARATOR => {
                let field = String::from_utf8(std::mem::take(&mut current))
                    .map_err(|_| DecodeError::InvalidUtf8)?;
                fields.push(field);
            }
            ESCAPE => match octets.next() {
                Some(0x01) => current.push(SEPARATOR),
                Some(0x02) => current.push(ESCAPE),
                _ => return Err(DecodeError::InvalidEscape),
            },
            other => current.push(other),
        }
    }
    if current.is_empty() {
        Ok(fields)
    } else {
        Err(DecodeError::Unterminated)
    }
}
