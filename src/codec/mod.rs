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

//! Byte encodings for index rows and cell values.
//!
//! Two codecs live here. The [`key`] codec turns an ordered sequence of
//! string fields into a single row key whose byte-lexicographic order
//! matches the field-by-field order of its inputs, so that the ordered
//! store can answer "all rows whose first fields are X" with a prefix
//! range scan. The [`counter`] codec produces the compact
//! variable-length values stored in the count and timestamp cells.

use std::fmt;

pub mod counter;
pub mod key;

/// Errors that arise while decoding row keys or cell values.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DecodeError {
    /// The last field of a row key was not followed by a terminator.
    Unterminated,

    /// An escape byte was followed by an unknown byte, or by nothing.
    InvalidEscape,

    /// A field of a row key was not valid UTF-8.
    InvalidUtf8,

    /// A counter value ended before all of its bytes were read.
    UnexpectedEnd,

    /// A counter value had bytes left over after decoding.
    ExtraData,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Unterminated => f.write_str("row key is not terminated by a separator"),
            Self::InvalidEscape => f.write_str("invalid escape sequence in row key"),
            Self::InvalidUtf8 => f.write_str("row key field is not valid UTF-8"),
            Self::UnexpectedEnd => f.write_str("unexpected end of counter value"),
            Self::ExtraData => f.write_str("extra data after counter value"),
        }
    }
}

impl std::error::Error for DecodeError {}
