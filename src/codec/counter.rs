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

//! The counter value codec.
//!
//! Counters (occurrence counts and first/last-seen timestamps) are
//! stored using the zero-compressed variable-length layout known from
//! Hadoop's `VLong`, which keeps values compatible with stores that
//! aggregate such cells natively:
//!
//! * Values in `-112..=127` are a single octet holding the value.
//! * Otherwise, a marker octet gives the sign and the number `n` of
//!   magnitude octets that follow (`-113..=-120` for non-negative
//!   values, `-121..=-128` for negative ones, whose magnitude is stored
//!   complemented), followed by the magnitude in big-endian order with
//!   leading zero octets removed.
//!
//! Our counters are unsigned. They go through the signed layout by
//! two's-complement reinterpretation, so every [`u64`] round-trips and
//! values up to [`i64::MAX`] get the same bytes as their signed
//! equivalent.

use super::DecodeError;

/// Encodes `value` into its shortest representation.
pub fn encode(value: u64) -> Vec<u8> {
    let mut value = value as i64;
    if (-112..=127).contains(&value) {
        return vec![value as u8];
    }

    let mut marker: i64 = -112;
    if value < 0 {
        value = !value;
        marker = -120;
    }
    let len = 8 - (value.leading_zeros() as usize) / 8;
    marker -= len as i64;

    let mut buf = Vec::with_capacity(len + 1);
    buf.push(marker as u8);
    buf.extend_from_slice(&value.to_be_bytes()[8 - len..]);
    buf
}

/// Decodes a counter value. The whole of `buf` must be consumed.
pub fn decode(buf: &[u8]) -> Result<u64, DecodeError> {
    let (&first, rest) = buf.split_first().ok_or(DecodeError::UnexpectedEnd)?;
    let marker = first as i8;
    let (len, negative) = match marker {
        -112..=127 => {
            return if rest.is_empty() {
                Ok(marker as i64 as u64)
            } else {
                Err(DecodeError::ExtraData)
            };
        }
        -120..=-113 => ((-112 - marker as i32) as usize, false),
        _ => ((-120 - marker as i32) as usize, true),
    };

    if rest.len() < len {
        return Err(DecodeError::UnexpectedEnd);
    } else if rest.len() > len {
        return Err(DecodeError::ExtraData);
    }

    let magnitude = rest.iter().fold(0i64, |acc, &b| (acc << 8) | b as i64);
    let value = if negative { !magnitude } else { magnitude };
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_values_take_one_octet() {
        assert_eq!(encode(0), [0u8]);
        assert_eq!(encode(127), [127u8]);
        assert_eq!(decode(&[127]).unwrap(), 127);
    }

    #[test]
    fn larger_values_are_length_prefixed() {
        // 128 needs one magnitude octet: marker -113.
        assert_eq!(encode(128), [0x8fu8, 0x80]);
        // A typical epoch timestamp needs four.
        assert_eq!(encode(1_600_000_000), [0x8cu8, 0x5f, 0x5e, 0x10, 0x00]);
        assert_eq!(encode(i64::MAX as u64).len(), 9);
    }

    #[test]
    fn values_round_trip_across_length_boundaries() {
        for value in [
            1,
            128,
            255,
            256,
            65_535,
            65_536,
            1_600_000_000,
            u32::MAX as u64,
            i64::MAX as u64,
            i64::MAX as u64 + 1,
            u64::MAX - 200,
            u64::MAX,
        ] {
            assert_eq!(decode(&encode(value)).unwrap(), value, "value {value}");
        }
    }

    #[test]
    fn decode_rejects_bad_lengths() {
        assert_eq!(decode(&[]), Err(DecodeError::UnexpectedEnd));
        assert_eq!(decode(&[0x8e, 0x01]), Err(DecodeError::UnexpectedEnd));
        assert_eq!(decode(&[0x8f, 0x80, 0x00]), Err(DecodeError::ExtraData));
        assert_eq!(decode(&[5, 5]), Err(DecodeError::ExtraData));
    }
}
