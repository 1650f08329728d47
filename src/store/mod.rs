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

//! The ordered key-value store underneath the index.
//!
//! The index does not care how its rows are stored, as long as the
//! store offers a small set of operations: ordered byte-string row
//! keys, cells grouped into rows, prefix-bounded range scans in key
//! order, batched appends, an optional row-content substring filter
//! evaluated store-side, and visibility labels on cells. The [`Store`]
//! trait captures exactly that contract.
//!
//! [`MemoryStore`] is an implementation that keeps everything in
//! ordered maps in memory. [`BatchWriter`] sits in front of any
//! [`Store`] and batches mutations with bounded memory, latency and
//! write fan-out.

use std::fmt;

mod batch;
mod memory;

pub use batch::{BatchWriter, BatchWriterConfig};
pub use memory::MemoryStore;

/// The visibility label attached to every cell the index writes, and
/// the sole authorization the index scans with.
pub const PUBLIC: &str = "public";

/// Trait for ordered key-value stores.
pub trait Store: Send + Sync {
    /// Returns whether the table exists.
    fn has_table(&self, table: &str) -> bool;

    /// Applies a batch of mutations to a table. Mutations to the same
    /// row and column replace earlier values.
    fn apply(&self, table: &str, mutations: &[Mutation]) -> Result<(), Error>;

    /// Opens a scan over the rows of `table` selected by `spec`. Rows
    /// are produced in key order, each with its visible cells grouped
    /// together. The scan is a cursor: rows are only read from the
    /// store as the iterator is advanced.
    fn scan<'a>(&'a self, table: &str, spec: &ScanSpec) -> Result<RowIter<'a>, Error>;
}

/// The cursor returned by [`Store::scan`].
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row, Error>> + 'a>;

////////////////////////////////////////////////////////////////////////
// MUTATIONS                                                          //
////////////////////////////////////////////////////////////////////////

/// A set of cell updates to a single row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mutation {
    row: Vec<u8>,
    updates: Vec<CellUpdate>,
}

/// One cell written by a [`Mutation`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CellUpdate {
    pub family: String,
    pub qualifier: String,
    pub visibility: String,
    pub value: Vec<u8>,
}

impl Mutation {
    /// Creates an empty mutation of `row`.
    pub fn new(row: Vec<u8>) -> Self {
        Self {
            row,
            updates: Vec::new(),
        }
    }

    /// Adds a cell update.
    pub fn put(
        &mut self,
        family: &str,
        qualifier: &str,
        visibility: &str,
        value: Vec<u8>,
    ) -> &mut Self {
        self.updates.push(CellUpdate {
            family: family.to_owned(),
            qualifier: qualifier.to_owned(),
            visibility: visibility.to_owned(),
            value,
        });
        self
    }

    /// Returns the row key.
    pub fn row(&self) -> &[u8] {
        &self.row
    }

    /// Returns the cell updates.
    pub fn updates(&self) -> &[CellUpdate] {
        &self.updates
    }

    /// Estimates the memory the mutation occupies while buffered. This
    /// is what [`BatchWriterConfig::max_memory`] is measured in.
    pub fn estimated_size(&self) -> usize {
        self.row.len()
            + self
                .updates
                .iter()
                .map(|u| u.family.len() + u.qualifier.len() + u.visibility.len() + u.value.len())
                .sum::<usize>()
    }
}

////////////////////////////////////////////////////////////////////////
// SCANS                                                              //
////////////////////////////////////////////////////////////////////////

/// A row as returned by a scan: its key and its visible cells.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Row {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}

/// A cell as returned by a scan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cell {
    pub family: String,
    pub qualifier: String,
    pub value: Vec<u8>,
}

/// What a scan should return.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanSpec {
    /// Only rows whose key starts with this prefix are returned.
    pub prefix: Vec<u8>,

    /// Store-side substring filters. A cell is only returned if every
    /// term occurs in its row key, family, qualifier or value; a row is
    /// only returned if at least one of its cells is.
    pub filters: Vec<Vec<u8>>,

    /// Cells are only returned if their visibility label is in this
    /// set (or if they have no label).
    pub authorizations: Vec<String>,
}

impl ScanSpec {
    /// Creates a scan over the rows starting with `prefix`.
    pub fn prefix(prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            filters: Vec::new(),
            authorizations: Vec::new(),
        }
    }

    /// Returns whether a cell with this visibility label may be read.
    pub fn is_visible(&self, visibility: &str) -> bool {
        visibility.is_empty() || self.authorizations.iter().any(|a| a == visibility)
    }

    /// Evaluates the substring filters on one cell of the row `key`.
    pub fn filters_accept(&self, key: &[u8], family: &str, qualifier: &str, value: &[u8]) -> bool {
        self.filters.iter().all(|term| {
            contains(key, term)
                || contains(family.as_bytes(), term)
                || contains(qualifier.as_bytes(), term)
                || contains(value, term)
        })
    }
}

/// Returns whether `haystack` contains `needle` as a contiguous
/// substring.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors reported by [`Store`] implementations and the
/// [`BatchWriter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The named table does not exist.
    TableNotFound(String),

    /// The store refused a batch of mutations.
    Rejected(String),

    /// The store could not be reached or failed mid-operation.
    Unavailable(String),

    /// The [`BatchWriter`] was already closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TableNotFound(table) => write!(f, "table {} does not exist", table),
            Self::Rejected(reason) => write!(f, "mutations rejected: {}", reason),
            Self::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
            Self::Closed => f.write_str("the batch writer is closed"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_match_any_part_of_a_cell() {
        let mut spec = ScanSpec::prefix(Vec::new());
        spec.filters.push(b"\0s1\0".to_vec());
        assert!(spec.filters_accept(b"a\0s1\0A\0", "count", "count", &[1]));
        assert!(!spec.filters_accept(b"a\0s10\0A\0", "count", "count", &[1]));
        assert!(spec.filters_accept(b"a\0s10\0A\0", "count", "count", b"x\0s1\0"));
    }

    #[test]
    fn every_filter_must_match() {
        let mut spec = ScanSpec::prefix(Vec::new());
        spec.filters.push(b"s1".to_vec());
        spec.filters.push(b"zz".to_vec());
        assert!(!spec.filters_accept(b"s1", "f", "q", b""));
        assert!(spec.filters_accept(b"s1", "f", "q", b"zz"));
    }

    #[test]
    fn visibility_requires_authorization() {
        let mut spec = ScanSpec::prefix(Vec::new());
        assert!(spec.is_visible(""));
        assert!(!spec.is_visible(PUBLIC));
        spec.authorizations.push(PUBLIC.to_owned());
        assert!(spec.is_visible(PUBLIC));
        assert!(!spec.is_visible("private"));
    }
}
