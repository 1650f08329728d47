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

//! The [`IndexWriter`].

use log::warn;

use super::{Orientation, WriteError, COUNT_CELL, FIRST_SEEN_CELL, LAST_SEEN_CELL};
use crate::codec::{counter, key};
use crate::observation::Observation;
use crate::store::{self, BatchWriter, Mutation, Store, PUBLIC};

/// Writes observations into all three index orientations.
///
/// An `IndexWriter` owns the process-wide [`BatchWriter`] and is meant
/// to be shared (behind an [`Arc`](std::sync::Arc)) by every connection
/// worker.
pub struct IndexWriter<S> {
    batch: BatchWriter<S>,
}

impl<S> IndexWriter<S>
where
    S: Store + 'static,
{
    /// Creates an `IndexWriter` submitting through `batch`.
    pub fn new(batch: BatchWriter<S>) -> Self {
        Self { batch }
    }

    /// Writes `observation` to every orientation.
    ///
    /// The three writes are independent. There is no atomicity across
    /// them: if one orientation fails, the others are still written
    /// and nothing is rolled back, so the orientations may disagree
    /// until the observation is written again. The first failure is
    /// returned.
    pub fn write(&self, observation: &Observation) -> Result<(), WriteError> {
        let mut first_error = None;
        for orientation in Orientation::ALL {
            let mutation = row_mutation(orientation, observation);
            if let Err(source) = self.batch.add_mutation(orientation.table(), mutation) {
                warn!(
                    "Failed to write {} to {}: {}",
                    observation.rrname, orientation, source
                );
                first_error.get_or_insert(WriteError {
                    orientation,
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Blocks until every write submitted so far has reached the store.
    pub fn flush(&self) -> Result<(), store::Error> {
        self.batch.flush()
    }

    /// Flushes and closes the underlying [`BatchWriter`].
    pub fn close(&self) -> Result<(), store::Error> {
        self.batch.close()
    }
}

/// Builds the mutation writing `observation` in `orientation`.
pub fn row_mutation(orientation: Orientation, observation: &Observation) -> Mutation {
    let mut mutation = Mutation::new(key::encode(orientation.key_fields(observation)));
    mutation
        .put(
            COUNT_CELL.0,
            COUNT_CELL.1,
            PUBLIC,
            counter::encode(observation.count),
        )
        .put(
            FIRST_SEEN_CELL.0,
            FIRST_SEEN_CELL.1,
            PUBLIC,
            counter::encode(observation.first_seen_ts),
        )
        .put(
            LAST_SEEN_CELL.0,
            LAST_SEEN_CELL.1,
            PUBLIC,
            counter::encode(observation.last_seen_ts),
        );
    mutation
}
