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

//! The operations offered to the protocol layer.
//!
//! A [`Backend`] ties the index to a [`Store`]: it writes incoming
//! observations into every orientation and answers queries by planning
//! them, scanning the chosen orientation and streaming the decoded
//! results. It is created once per process and shared by all
//! connection workers.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::index::{self, IndexWriter, ObservationSink, Orientation};
use crate::observation::{BackupRequest, DumpRequest, Observation, Query};
use crate::store::{self, BatchWriter, BatchWriterConfig, MemoryStore, Store};

mod error;

pub use error::Error;

/// The passive-DNS backend.
///
/// # Consistency
///
/// Writes are buffered (see [`BatchWriter`]) and become visible to
/// queries once flushed, either in the background or through
/// [`Backend::flush`]. Each observation is written to the three
/// orientations independently, so a query of one orientation may see
/// an observation that a query of another does not yet see, or never
/// will if that orientation's write failed.
pub struct Backend<S> {
    store: Arc<S>,
    writer: IndexWriter<S>,
}

impl Backend<MemoryStore> {
    /// Creates a backend over a new [`MemoryStore`] holding the index
    /// tables.
    pub fn in_memory(config: BatchWriterConfig) -> Result<Self, Error> {
        let store = MemoryStore::new();
        for orientation in Orientation::ALL {
            store.create_table(orientation.table());
        }
        Self::open(Arc::new(store), config)
    }
}

impl<S> Backend<S>
where
    S: Store + 'static,
{
    /// Opens a backend over `store`, which must already contain the
    /// tables of every [`Orientation`].
    pub fn open(store: Arc<S>, config: BatchWriterConfig) -> Result<Self, Error> {
        if let Some(missing) = Orientation::ALL
            .into_iter()
            .find(|o| !store.has_table(o.table()))
        {
            return Err(Error::MissingTable(missing.table()));
        }
        debug!("Opening the backend with writer configuration {:?}", config);
        let batch = BatchWriter::new(store.clone(), config).map_err(Error::Io)?;
        Ok(Self {
            store,
            writer: IndexWriter::new(batch),
        })
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Ingests one observation.
    pub fn handle_observation(&self, observation: &Observation) -> Result<(), Error> {
        self.writer.write(observation).map_err(Into::into)
    }

    /// Streams the observations matching `query` to `sink`, in scan
    /// order and at most `query.limit` of them. Returns how many were
    /// streamed.
    ///
    /// Malformed queries fail before anything is streamed. Store
    /// failures during the scan end the stream with an error, after the
    /// results streamed so far.
    pub fn handle_query<K>(&self, query: &Query, sink: &mut K) -> Result<usize, Error>
    where
        K: ObservationSink + ?Sized,
    {
        let plan = index::plan(query)?;
        let table = plan.orientation.table();
        let rows = self
            .store
            .scan(table, &plan.scan_spec())
            .map_err(|e| Error::Scan(table, e))?;
        index::stream(&plan, rows, query.limit, sink).map_err(|e| Error::from_stream(table, e))
    }

    /// Dumping is not supported.
    pub fn handle_dump_request(&self, request: &DumpRequest) -> Result<(), Error> {
        warn!("Refusing dump request to {}: not implemented", request.path);
        Err(Error::NotImplemented("dump"))
    }

    /// Backups are not supported.
    pub fn handle_backup_request(&self, request: &BackupRequest) -> Result<(), Error> {
        warn!("Refusing backup request to {}: not implemented", request.path);
        Err(Error::NotImplemented("backup"))
    }

    /// Makes every observation ingested so far visible to queries.
    pub fn flush(&self) -> Result<(), Error> {
        self.writer.flush().map_err(Error::Flush)
    }

    /// Flushes all buffered writes and shuts the writer down. Must be
    /// called once, at shutdown; later calls fail with
    /// [`Error::Closed`].
    pub fn close(&self) -> Result<(), Error> {
        match self.writer.close() {
            Ok(()) => {
                info!("Backend closed; all writes flushed.");
                Ok(())
            }
            Err(store::Error::Closed) => Err(Error::Closed),
            Err(e) => Err(Error::Close(e)),
        }
    }
}
