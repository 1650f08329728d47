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

//! Thread groups.

use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{error, info};

////////////////////////////////////////////////////////////////////////
// THREAD GROUPS                                                      //
////////////////////////////////////////////////////////////////////////

/// A set of threads that are shut down together.
///
/// Two kinds of threads can be started in a `ThreadGroup`. One-shot
/// threads ([`ThreadGroup::start_oneshot`]) run their task once;
/// connection workers are one-shot threads. Respawnable threads
/// ([`ThreadGroup::start_respawnable`]) are restarted if their task
/// returns or panics before the group shuts down; listeners are
/// respawnable threads.
///
/// [`ThreadGroup::shut_down`] stops the group from starting threads.
/// It does not interrupt running threads: long-running tasks should
/// hold an [`Arc`] to their group and poll
/// [`ThreadGroup::is_shutting_down`]. [`ThreadGroup::await_shutdown`]
/// waits for the last thread to exit.
pub struct ThreadGroup {
    records: Mutex<GroupRecords>,

    /// Notified when shutdown begins and when the last thread exits.
    /// Used with `records`.
    shutdown_wakeup: Condvar,
}

#[derive(Default)]
struct GroupRecords {
    thread_count: usize,
    shutting_down: bool,
}

impl ThreadGroup {
    /// Creates a new thread group.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(GroupRecords::default()),
            shutdown_wakeup: Condvar::new(),
        })
    }

    /// Starts a thread that runs `task` once.
    pub fn start_oneshot<F>(self: &Arc<Self>, name: String, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut records = self.records.lock().unwrap();
        if records.shutting_down {
            return Err(Error::ShuttingDown);
        }
        let handle = ThreadHandle::new(self.clone(), None);
        spawn(&mut records, name, move || {
            task();
            drop(handle);
        })
        .map_err(Into::into)
    }

    /// Starts a thread that runs `task`, and runs it again on a new
    /// thread whenever it returns or panics while the group is not
    /// shutting down. Restarts are throttled to one per
    /// [`RESPAWN_DELAY`].
    pub fn start_respawnable<F>(self: &Arc<Self>, name: String, task: F) -> Result<(), Error>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut records = self.records.lock().unwrap();
        if records.shutting_down {
            return Err(Error::ShuttingDown);
        }
        respawn(self.clone(), &mut records, name, Arc::new(task)).map_err(Into::into)
    }

    /// Begins shutting down the group.
    pub fn shut_down(&self) {
        self.records.lock().unwrap().shutting_down = true;
        self.shutdown_wakeup.notify_all();
    }

    /// Blocks until the group has been shut down and all of its threads
    /// have exited. Deadlocks if called from one of the group's own
    /// threads.
    pub fn await_shutdown(&self) {
        let records = self.records.lock().unwrap();
        let _records = self
            .shutdown_wakeup
            .wait_while(records, |r| !r.shutting_down || r.thread_count > 0)
            .unwrap();
    }

    /// Returns whether [`ThreadGroup::shut_down`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.records.lock().unwrap().shutting_down
    }
}

/// The minimum time between two starts of a respawnable thread.
pub const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Owned by every thread of a group. Dropping it at the end of the
/// thread (including by unwinding) does the group's bookkeeping, and
/// for respawnable threads, starts the replacement.
struct ThreadHandle {
    group: Arc<ThreadGroup>,
    spawner: ThreadId,
    respawn: Option<Respawn>,
}

/// What a respawnable thread needs to start its replacement.
struct Respawn {
    task: Arc<dyn Fn() + Send + Sync>,
    started: Instant,
}

impl ThreadHandle {
    fn new(group: Arc<ThreadGroup>, respawn: Option<Respawn>) -> Self {
        Self {
            group,
            spawner: thread::current().id(),
            respawn,
        }
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        // Dropped on the spawning thread only if the OS refused to
        // start the thread, in which case spawn (which still holds the
        // records lock) does the bookkeeping.
        if thread::current().id() == self.spawner {
            return;
        }
        let name = current_name();
        if thread::panicking() {
            error!("Thread {} panicked", name);
        }

        let mut records = self.group.records.lock().unwrap();
        if let Some(respawn_info) = self.respawn.as_ref().filter(|_| !records.shutting_down) {
            if !thread::panicking() {
                error!("Respawnable thread {} exited early", name);
            }
            let elapsed = respawn_info.started.elapsed();
            if elapsed < RESPAWN_DELAY {
                // The wait ends early if shutdown begins.
                let delay = RESPAWN_DELAY - elapsed;
                info!("Delaying respawn of {} by {} ms", name, delay.as_millis());
                records = self
                    .group
                    .shutdown_wakeup
                    .wait_timeout(records, delay)
                    .unwrap()
                    .0;
            }
            if !records.shutting_down {
                let task = respawn_info.task.clone();
                if let Err(e) = respawn(self.group.clone(), &mut records, name.clone(), task) {
                    error!("Failed to respawn {}: {}", name, e);
                }
            }
        }
        end_thread(&mut records, &self.group.shutdown_wakeup);
    }
}

fn respawn(
    group: Arc<ThreadGroup>,
    records: &mut MutexGuard<GroupRecords>,
    name: String,
    task: Arc<dyn Fn() + Send + Sync>,
) -> io::Result<()> {
    let handle = ThreadHandle::new(
        group,
        Some(Respawn {
            task: task.clone(),
            started: Instant::now(),
        }),
    );
    spawn(records, name, move || {
        task();
        drop(handle);
    })
}

/// Spawns a thread counted in `records`.
fn spawn<F>(records: &mut MutexGuard<GroupRecords>, name: String, body: F) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    records.thread_count += 1;
    let result = thread::Builder::new().name(name).spawn(body);
    if result.is_err() {
        records.thread_count -= 1;
    }
    result.map(|_| ())
}

fn end_thread(records: &mut MutexGuard<GroupRecords>, shutdown_wakeup: &Condvar) {
    records.thread_count -= 1;
    if records.shutting_down && records.thread_count == 0 {
        shutdown_wakeup.notify_all();
    }
}

fn current_name() -> String {
    thread::current().name().unwrap_or("anonymous").to_owned()
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error starting a thread in a [`ThreadGroup`].
#[derive(Debug)]
pub enum Error {
    /// The OS could not start the thread.
    Io(io::Error),

    /// The [`ThreadGroup`] is shutting down.
    ShuttingDown,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{}", err),
            Self::ShuttingDown => f.write_str("thread group is shutting down"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn await_shutdown_waits_for_threads() {
        let exited = Arc::new(Mutex::new(0));
        let group = ThreadGroup::new();
        const POLL_INTERVAL: Duration = Duration::from_millis(100);
        let start = Instant::now();
        for i in 0..2 {
            let exited = exited.clone();
            let group_cloned = group.clone();
            group
                .start_oneshot(format!("poller {i}"), move || loop {
                    thread::sleep(POLL_INTERVAL);
                    if group_cloned.is_shutting_down() {
                        *exited.lock().unwrap() += 1;
                        return;
                    }
                })
                .unwrap();
        }
        group.shut_down();
        group.await_shutdown();
        assert!(start.elapsed() > POLL_INTERVAL);
        assert_eq!(*exited.lock().unwrap(), 2);
    }

    #[test]
    fn respawnable_threads_respawn() {
        let runs = Arc::new(Mutex::new(0));
        let runs_cloned = runs.clone();
        let wakeup = Arc::new(Condvar::new());
        let wakeup_cloned = wakeup.clone();
        let group = ThreadGroup::new();
        group
            .start_respawnable("flaky".to_owned(), move || {
                *runs_cloned.lock().unwrap() += 1;
                wakeup_cloned.notify_all();
            })
            .unwrap();
        let runs = runs.lock().unwrap();
        let runs = wakeup.wait_while(runs, |n| *n < 2).unwrap();
        assert!(*runs >= 2);
        drop(runs);
        group.shut_down();
        group.await_shutdown();
    }

    #[test]
    fn panicking_oneshot_thread_is_accounted_for() {
        let group = ThreadGroup::new();
        group
            .start_oneshot("doomed".to_owned(), || panic!("boom"))
            .unwrap();
        group.shut_down();
        group.await_shutdown();
    }

    #[test]
    fn no_threads_start_after_shutdown() {
        let group = ThreadGroup::new();
        group.shut_down();
        assert!(matches!(
            group.start_oneshot("late".to_owned(), || ()),
            Err(Error::ShuttingDown)
        ));
        assert!(matches!(
            group.start_respawnable("late".to_owned(), || ()),
            Err(Error::ShuttingDown)
        ));
    }
}
