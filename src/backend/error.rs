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

//! Implementation of the [`Error`] type for backend operations.

use std::fmt;
use std::io;

use crate::index::streamer::StreamError;
use crate::index::{InvalidQuery, RowError, WriteError};
use crate::store;

/// Errors reported by [`Backend`](super::Backend) operations.
#[derive(Debug)]
pub enum Error {
    /// A required table does not exist in the store.
    MissingTable(&'static str),

    /// The backend's writer could not be started.
    Io(io::Error),

    /// The query was malformed.
    InvalidQuery(InvalidQuery),

    /// The operation is not supported by this backend.
    NotImplemented(&'static str),

    /// An observation could not be written to (at least) one
    /// orientation.
    Write(WriteError),

    /// The store failed while scanning a table.
    Scan(&'static str, store::Error),

    /// A scanned row could not be decoded.
    Decode(&'static str, RowError),

    /// The caller's sink refused a result.
    Sink(io::Error),

    /// Flushing buffered writes failed.
    Flush(store::Error),

    /// Flushing buffered writes failed while closing.
    Close(store::Error),

    /// The backend was already closed.
    Closed,
}

impl Error {
    /// Converts a [`StreamError`] from a scan of `table`.
    pub(super) fn from_stream(table: &'static str, error: StreamError) -> Self {
        match error {
            StreamError::Scan(e) => Self::Scan(table, e),
            StreamError::Decode(e) => Self::Decode(table, e),
            StreamError::Sink(e) => Self::Sink(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingTable(table) => write!(f, "table {} does not exist", table),
            Self::Io(e) => write!(f, "failed to start the writer: {}", e),
            Self::InvalidQuery(e) => write!(f, "invalid query: {}", e),
            Self::NotImplemented(what) => write!(f, "{} is not implemented yet", what),
            Self::Write(e) => write!(f, "{}", e),
            Self::Scan(table, e) => write!(f, "failed to scan {}: {}", table, e),
            Self::Decode(table, e) => write!(f, "bad row in {}: {}", table, e),
            Self::Sink(e) => write!(f, "failed to deliver result: {}", e),
            Self::Flush(e) => write!(f, "failed to flush writes: {}", e),
            Self::Close(e) => write!(f, "failed to flush on close: {}", e),
            Self::Closed => f.write_str("the backend is already closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::Sink(e) => Some(e),
            Self::InvalidQuery(e) => Some(e),
            Self::Write(e) => Some(e),
            Self::Scan(_, e) | Self::Flush(e) | Self::Close(e) => Some(e),
            Self::Decode(_, e) => Some(e),
            Self::MissingTable(_) | Self::NotImplemented(_) | Self::Closed => None,
        }
    }
}

impl From<InvalidQuery> for Error {
    fn from(error: InvalidQuery) -> Self {
        Self::InvalidQuery(error)
    }
}

impl From<WriteError> for Error {
    fn from(error: WriteError) -> Self {
        Self::Write(error)
    }
}
