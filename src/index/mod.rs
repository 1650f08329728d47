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

//! The three-orientation observation index.
//!
//! Every observation is stored three times, once in each
//! [`Orientation`]. The orientations differ only in the order of the
//! fields making up the row key, and therefore in which lookups they
//! can answer with a single prefix range scan:
//!
//! | Orientation                      | Key fields                             | Answers                     |
//! |----------------------------------|----------------------------------------|-----------------------------|
//! | [`ByName`](Orientation::ByName)  | rrname, sensorid, rrtype, rdata        | exact and `prefix%` names   |
//! | [`ByData`](Orientation::ByData)  | rdata, sensorid, rrtype, rrname        | exact rdata                 |
//! | [`ByReversedName`](Orientation::ByReversedName) | reversed rrname, sensorid, rrtype, rdata | `%suffix` names |
//!
//! Each row holds three cells: the occurrence count and the first- and
//! last-seen timestamps. The [`writer`] produces rows, the [`planner`]
//! turns queries into scans, the [`decoder`] turns scanned rows back
//! into observations, and the [`streamer`] ties scanning and decoding
//! together.

use std::fmt;

use crate::codec;
use crate::observation::Observation;
use crate::store;

pub mod decoder;
pub mod planner;
pub mod streamer;
pub mod writer;

pub use planner::{plan, QueryPlan};
pub use streamer::{stream, ObservationSink};
pub use writer::IndexWriter;

/// Column family and qualifier of the occurrence count cell.
pub const COUNT_CELL: (&str, &str) = ("count", "count");

/// Column family and qualifier of the first-seen timestamp cell.
pub const FIRST_SEEN_CELL: (&str, &str) = ("seen", "first");

/// Column family and qualifier of the last-seen timestamp cell.
pub const LAST_SEEN_CELL: (&str, &str) = ("seen", "last");

////////////////////////////////////////////////////////////////////////
// ORIENTATIONS                                                       //
////////////////////////////////////////////////////////////////////////

/// One of the three layouts in which observations are indexed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Orientation {
    ByName,
    ByData,
    ByReversedName,
}

/// A field of an [`Observation`] that is part of a row key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Field {
    Rrname,
    Sensorid,
    Rrtype,
    Rdata,
}

impl Orientation {
    /// Every orientation, in the order rows are written.
    pub const ALL: [Self; 3] = [Self::ByName, Self::ByData, Self::ByReversedName];

    /// Returns the name of the table holding this orientation.
    pub fn table(self) -> &'static str {
        match self {
            Self::ByName => "balboa_by_rrname",
            Self::ByData => "balboa_by_rdata",
            Self::ByReversedName => "balboa_by_rrname_rev",
        }
    }

    /// Returns the fields of the row key, in key order.
    pub fn layout(self) -> [Field; 4] {
        match self {
            Self::ByName | Self::ByReversedName => {
                [Field::Rrname, Field::Sensorid, Field::Rrtype, Field::Rdata]
            }
            Self::ByData => [Field::Rdata, Field::Sensorid, Field::Rrtype, Field::Rrname],
        }
    }

    /// Returns the row key fields of `observation` in this orientation.
    /// For [`Orientation::ByReversedName`], the name is stored
    /// reversed (see [`reverse_name`]).
    pub fn key_fields(self, observation: &Observation) -> [String; 4] {
        self.layout().map(|field| {
            let value = field.get(observation);
            if field == Field::Rrname && self == Self::ByReversedName {
                reverse_name(value)
            } else {
                value.to_owned()
            }
        })
    }
}

impl Field {
    /// Returns this field of `observation`.
    pub fn get(self, observation: &Observation) -> &str {
        match self {
            Self::Rrname => &observation.rrname,
            Self::Sensorid => &observation.sensorid,
            Self::Rrtype => &observation.rrtype,
            Self::Rdata => &observation.rdata,
        }
    }

    /// Returns a mutable reference to this field of `observation`.
    pub fn get_mut(self, observation: &mut Observation) -> &mut String {
        match self {
            Self::Rrname => &mut observation.rrname,
            Self::Sensorid => &mut observation.sensorid,
            Self::Rrtype => &mut observation.rrtype,
            Self::Rdata => &mut observation.rdata,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Reverses a name character by character.
///
/// Names sharing a suffix share a prefix once reversed, which is what
/// lets the [`Orientation::ByReversedName`] table answer `%suffix`
/// queries with a prefix scan. Reversing twice yields the original.
pub fn reverse_name(name: &str) -> String {
    name.chars().rev().collect()
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Reasons a query cannot be planned.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InvalidQuery {
    /// Neither an rrname nor an rdata pattern was given.
    NeitherFieldGiven,

    /// The rrname pattern has a wildcard somewhere other than at its
    /// very beginning or very end, or has more than one.
    MisplacedWildcard,
}

impl fmt::Display for InvalidQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::NeitherFieldGiven => f.write_str("neither rdata nor rrname given"),
            Self::MisplacedWildcard => f.write_str(
                "wildcards are only supported at either the beginning or end of the query",
            ),
        }
    }
}

impl std::error::Error for InvalidQuery {}

/// An error writing one orientation of an observation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteError {
    pub orientation: Orientation,
    pub source: store::Error,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "failed to write to {}: {}", self.orientation, self.source)
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Errors decoding a scanned row into an [`Observation`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RowError {
    /// The row had no cells.
    EmptyRow,

    /// The row key could not be decoded.
    Key(codec::DecodeError),

    /// The row key did not have four fields.
    FieldCount(usize),

    /// A counter cell could not be decoded.
    Value(&'static str, codec::DecodeError),
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyRow => f.write_str("scanned row has no cells"),
            Self::Key(e) => write!(f, "invalid row key: {}", e),
            Self::FieldCount(n) => write!(f, "row key has {} fields instead of 4", n),
            Self::Value(cell, e) => write!(f, "invalid {} cell: {}", cell, e),
        }
    }
}

impl std::error::Error for RowError {}
