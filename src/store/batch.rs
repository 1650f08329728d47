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

//! The [`BatchWriter`].

use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use super::{Error, Mutation, Store};

/// Configuration options for the [`BatchWriter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchWriterConfig {
    /// Once this many bytes of mutations (see
    /// [`Mutation::estimated_size`]) are buffered, the submitting
    /// caller flushes them synchronously.
    pub max_memory: usize,

    /// Buffered mutations are flushed in the background at most this
    /// long after the first of them was submitted.
    pub max_latency: Duration,

    /// The maximum number of tables written to concurrently during a
    /// flush.
    pub max_write_threads: usize,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            max_memory: 10_000_000,
            max_latency: Duration::from_secs(5),
            max_write_threads: 5,
        }
    }
}

/// Buffers mutations to any number of tables of a [`Store`] and applies
/// them in batches.
///
/// A `BatchWriter` is meant to be shared by every thread that writes to
/// the store. Submitting a mutation ([`BatchWriter::add_mutation`])
/// normally only buffers it; buffers are flushed when they grow past
/// [`BatchWriterConfig::max_memory`] (by the submitting thread), when
/// the oldest buffered mutation is older than
/// [`BatchWriterConfig::max_latency`] (by a background flusher thread),
/// on [`BatchWriter::flush`] and on [`BatchWriter::close`].
///
/// # Failures
///
/// When the store fails to apply a background flush, the error is kept
/// and returned by the next call to [`BatchWriter::add_mutation`],
/// [`BatchWriter::flush`] or [`BatchWriter::close`], whichever comes
/// first. Each failure is reported exactly once. Mutations of a failed
/// batch are not retried.
pub struct BatchWriter<S> {
    shared: Arc<Shared<S>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

/// State shared with the flusher thread.
struct Shared<S> {
    store: Arc<S>,
    config: BatchWriterConfig,
    state: Mutex<State>,

    /// Wakes the flusher thread when the first mutation is buffered and
    /// when the writer is closed. Used with the `state` mutex.
    wakeup: Condvar,

    /// Serializes flushes, so that batches reach the store in the order
    /// they were buffered.
    flush_lock: Mutex<()>,
}

#[derive(Default)]
struct State {
    pending: BTreeMap<String, Vec<Mutation>>,
    memory: usize,
    oldest: Option<Instant>,
    failure: Option<Error>,
    closed: bool,
}

impl<S> BatchWriter<S>
where
    S: Store + 'static,
{
    /// Creates a new `BatchWriter` in front of `store` and starts its
    /// flusher thread.
    pub fn new(store: Arc<S>, config: BatchWriterConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            store,
            config,
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
            flush_lock: Mutex::new(()),
        });
        let shared_clone = shared.clone();
        let flusher = thread::Builder::new()
            .name("batch flusher".to_owned())
            .spawn(move || run_flusher(&shared_clone))?;
        Ok(Self {
            shared,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    /// Submits a mutation of a row in `table`.
    pub fn add_mutation(&self, table: &str, mutation: Mutation) -> Result<(), Error> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            return Err(Error::Closed);
        } else if let Some(failure) = state.failure.take() {
            return Err(failure);
        }

        state.memory += mutation.estimated_size();
        if state.oldest.is_none() {
            state.oldest = Some(Instant::now());
            self.shared.wakeup.notify_all();
        }
        state
            .pending
            .entry(table.to_owned())
            .or_default()
            .push(mutation);

        if state.memory >= self.shared.config.max_memory {
            drop(state);
            self.shared.flush()
        } else {
            Ok(())
        }
    }

    /// Flushes every buffered mutation, blocking until the store has
    /// applied them.
    pub fn flush(&self) -> Result<(), Error> {
        let result = self.shared.flush();
        self.take_failure().map_or(result, Err)
    }

    /// Flushes every buffered mutation and stops the flusher thread.
    /// Further submissions fail with [`Error::Closed`], as does a second
    /// call to `close`.
    pub fn close(&self) -> Result<(), Error> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return Err(Error::Closed);
            }
            state.closed = true;
            self.shared.wakeup.notify_all();
        }

        if let Some(flusher) = self.flusher.lock().unwrap().take() {
            if flusher.join().is_err() {
                error!("The batch flusher thread panicked");
            }
        }

        let result = self.shared.flush();
        self.take_failure().map_or(result, Err)
    }

    fn take_failure(&self) -> Option<Error> {
        self.shared.state.lock().unwrap().failure.take()
    }
}

impl<S> Shared<S>
where
    S: Store,
{
    /// Takes everything buffered and applies it to the store.
    fn flush(&self) -> Result<(), Error> {
        let _flushing = self.flush_lock.lock().unwrap();
        let batches = {
            let mut state = self.state.lock().unwrap();
            state.memory = 0;
            state.oldest = None;
            mem::take(&mut state.pending)
        };
        if batches.is_empty() {
            return Ok(());
        }

        let tables = batches.len();
        let mutations: usize = batches.values().map(Vec::len).sum();
        let result = apply_batches(
            self.store.as_ref(),
            batches.into_iter().collect(),
            self.config.max_write_threads,
        );
        match result {
            Ok(()) => debug!("Flushed {} mutations to {} tables", mutations, tables),
            Err(ref e) => error!("Failed to flush {} mutations: {}", mutations, e),
        }
        result
    }
}

/// Applies per-table batches using at most `max_threads` threads. All
/// batches are attempted; the first error encountered is returned.
fn apply_batches<S>(
    store: &S,
    batches: Vec<(String, Vec<Mutation>)>,
    max_threads: usize,
) -> Result<(), Error>
where
    S: Store,
{
    let threads = max_threads.clamp(1, batches.len().max(1));
    if threads == 1 {
        return apply_sequentially(store, &batches);
    }

    let chunk_size = (batches.len() + threads - 1) / threads;
    thread::scope(|scope| {
        let handles: Vec<_> = batches
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || apply_sequentially(store, chunk)))
            .collect();
        let mut result = Ok(());
        for handle in handles {
            let chunk_result = handle
                .join()
                .unwrap_or_else(|_| Err(Error::Unavailable("write thread panicked".to_owned())));
            if result.is_ok() {
                result = chunk_result;
            }
        }
        result
    })
}

fn apply_sequentially<S>(store: &S, batches: &[(String, Vec<Mutation>)]) -> Result<(), Error>
where
    S: Store,
{
    let mut result = Ok(());
    for (table, mutations) in batches {
        if let Err(e) = store.apply(table, mutations) {
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}

/// The flusher thread's loop. It sleeps until mutations are buffered,
/// then until the oldest of them reaches the maximum latency, and
/// flushes.
fn run_flusher<S>(shared: &Shared<S>)
where
    S: Store,
{
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.closed {
            return;
        }
        match state.oldest {
            None => state = shared.wakeup.wait(state).unwrap(),
            Some(oldest) => {
                let age = oldest.elapsed();
                if age < shared.config.max_latency {
                    let wait_for = shared.config.max_latency - age;
                    state = shared.wakeup.wait_timeout(state, wait_for).unwrap().0;
                } else {
                    drop(state);
                    if let Err(e) = shared.flush() {
                        shared.state.lock().unwrap().failure.get_or_insert(e);
                    }
                    state = shared.state.lock().unwrap();
                }
            }
        }
    }
}

impl<S> Drop for BatchWriter<S> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.closed {
            // Only close() flushes. Stop the flusher thread.
            if !state.pending.is_empty() {
                error!("Batch writer dropped without being closed; buffered mutations are lost");
            }
            state.closed = true;
            self.shared.wakeup.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PUBLIC};

    fn store_with_tables(tables: &[&str]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for table in tables {
            store.create_table(table);
        }
        Arc::new(store)
    }

    fn mutation(row: &str) -> Mutation {
        let mut m = Mutation::new(row.as_bytes().to_vec());
        m.put("f", "q", PUBLIC, vec![1]);
        m
    }

    fn config(max_memory: usize, max_latency: Duration) -> BatchWriterConfig {
        BatchWriterConfig {
            max_memory,
            max_latency,
            max_write_threads: 2,
        }
    }

    const LONG: Duration = Duration::from_secs(3600);

    #[test]
    fn mutations_are_buffered_until_flushed() {
        let store = store_with_tables(&["t"]);
        let writer = BatchWriter::new(store.clone(), config(1 << 20, LONG)).unwrap();
        writer.add_mutation("t", mutation("a")).unwrap();
        assert_eq!(store.row_count("t"), Some(0));
        writer.flush().unwrap();
        assert_eq!(store.row_count("t"), Some(1));
        writer.close().unwrap();
    }

    #[test]
    fn exceeding_max_memory_flushes() {
        let store = store_with_tables(&["t"]);
        let size = mutation("a").estimated_size();
        let writer = BatchWriter::new(store.clone(), config(2 * size, LONG)).unwrap();
        writer.add_mutation("t", mutation("a")).unwrap();
        assert_eq!(store.row_count("t"), Some(0));
        writer.add_mutation("t", mutation("b")).unwrap();
        assert_eq!(store.row_count("t"), Some(2));
        writer.close().unwrap();
    }

    #[test]
    fn max_latency_flushes_in_the_background() {
        let store = store_with_tables(&["t"]);
        let writer =
            BatchWriter::new(store.clone(), config(1 << 20, Duration::from_millis(20))).unwrap();
        writer.add_mutation("t", mutation("a")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.row_count("t") != Some(1) {
            assert!(Instant::now() < deadline, "background flush never happened");
            thread::sleep(Duration::from_millis(10));
        }
        writer.close().unwrap();
    }

    #[test]
    fn close_flushes_and_is_final() {
        let store = store_with_tables(&["t", "u", "v"]);
        let writer = BatchWriter::new(store.clone(), config(1 << 20, LONG)).unwrap();
        for table in ["t", "u", "v"] {
            writer.add_mutation(table, mutation("a")).unwrap();
        }
        writer.close().unwrap();
        for table in ["t", "u", "v"] {
            assert_eq!(store.row_count(table), Some(1));
        }
        assert_eq!(writer.close(), Err(Error::Closed));
        assert_eq!(writer.add_mutation("t", mutation("b")), Err(Error::Closed));
    }

    #[test]
    fn failed_flush_is_reported() {
        let store = store_with_tables(&["t"]);
        let writer = BatchWriter::new(store, config(1 << 20, LONG)).unwrap();
        writer.add_mutation("missing", mutation("a")).unwrap();
        assert_eq!(
            writer.close(),
            Err(Error::TableNotFound("missing".to_owned()))
        );
    }

    #[test]
    fn background_failure_is_reported_to_next_caller() {
        let store = Arc::new(MemoryStore::with_cell_limit(0));
        store.create_table("t");
        let writer =
            BatchWriter::new(store.clone(), config(1 << 20, Duration::from_millis(20))).unwrap();
        writer.add_mutation("t", mutation("a")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let failure = loop {
            assert!(Instant::now() < deadline, "failure never reported");
            thread::sleep(Duration::from_millis(10));
            match writer.add_mutation("t", mutation("c")) {
                Ok(()) => continue,
                Err(e) => break e,
            }
        };
        assert!(matches!(failure, Error::Rejected(_)));
        assert_eq!(store.row_count("t"), Some(0));
    }
}
