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

//! Implementation of the blocking I/O provider.

// NOTE: An I/O error in the accept loop exits the listener task, which
// the thread group then respawns after a delay, so a listener whose
// accepts keep failing does not spin. An I/O error on a connection
// closes that connection.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::frame::{self, FrameError, Request, Response};
use crate::backend::{self, Backend};
use crate::index::ObservationSink;
use crate::observation::Observation;
use crate::store::Store;
use crate::thread::ThreadGroup;

/// A blocking I/O provider.
///
/// Each listener runs an accept loop on its own thread, and each
/// accepted connection is served by its own thread. Requests on one
/// connection are handled in order; requests on different connections
/// run concurrently against the shared [`Backend`].
///
/// To shut the provider down, shut down the [`ThreadGroup`] it was
/// started in (see [`BlockingIoProvider::start`]). Listeners notice
/// within [`ACCEPT_POLL_INTERVAL`]; connections notice between
/// requests, or once the client has been idle for the configured read
/// timeout.
pub struct BlockingIoProvider {
    config: Arc<BlockingIoConfig>,
    listeners: Vec<TcpListener>,
}

/// Configuration options for the [`BlockingIoProvider`].
#[derive(Clone, Debug)]
pub struct BlockingIoConfig {
    /// The largest request body accepted. Connections announcing a
    /// larger frame are closed.
    pub max_frame_size: usize,

    /// How long a client has to send a complete frame, counted from the
    /// end of the previous request, before its connection is closed.
    /// Also bounds how long a single write to the client may block.
    pub read_timeout: Duration,
}

impl Default for BlockingIoConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1 << 20,
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// How often listeners check for shutdown while no connection is
/// pending.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl BlockingIoProvider {
    /// Creates a new `BlockingIoProvider`, binding its listeners. The
    /// provider does not accept connections until started.
    pub fn bind<A>(config: BlockingIoConfig, addrs: A) -> io::Result<Self>
    where
        A: IntoIterator<Item = SocketAddr>,
    {
        let mut listeners = Vec::new();
        for addr in addrs {
            let listener = TcpListener::bind(addr)?;
            listener.set_nonblocking(true)?;
            listeners.push(listener);
        }
        Ok(Self {
            config: Arc::new(config),
            listeners,
        })
    }

    /// Returns the addresses actually bound, which differ from the
    /// requested ones where port 0 was asked for.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.listeners.iter().map(TcpListener::local_addr).collect()
    }

    /// Starts serving `backend` on the provided [`ThreadGroup`].
    pub fn start<S>(
        self,
        backend: &Arc<Backend<S>>,
        group: &Arc<ThreadGroup>,
    ) -> Result<(), crate::thread::Error>
    where
        S: Store + 'static,
    {
        for (i, listener) in self.listeners.into_iter().enumerate() {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening on {}", addr);
            }
            let group_cloned = group.clone();
            let backend = backend.clone();
            let config = self.config.clone();
            let task = move || {
                log_io_errors(run_listener(&group_cloned, &backend, &config, &listener));
            };
            group.start_respawnable(format!("listener {i}"), task)?;
        }
        Ok(())
    }
}

/// The accept loop.
fn run_listener<S>(
    group: &Arc<ThreadGroup>,
    backend: &Arc<Backend<S>>,
    config: &Arc<BlockingIoConfig>,
    listener: &TcpListener,
) -> io::Result<()>
where
    S: Store + 'static,
{
    loop {
        if group.is_shutting_down() {
            return Ok(());
        }
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        debug!("Accepted connection from {}", peer);

        let group_cloned = group.clone();
        let backend = backend.clone();
        let config = config.clone();
        let task = move || {
            log_io_errors(handle_connection(&group_cloned, &backend, &config, stream));
        };
        match group.start_oneshot(format!("connection {peer}"), task) {
            Ok(()) => (),
            Err(crate::thread::Error::ShuttingDown) => return Ok(()),
            Err(crate::thread::Error::Io(e)) => return Err(e),
        }
    }
}

/// Serves one connection until the client closes it, it times out or
/// the group shuts down.
fn handle_connection<S>(
    group: &ThreadGroup,
    backend: &Backend<S>,
    config: &BlockingIoConfig,
    stream: TcpStream,
) -> io::Result<()>
where
    S: Store + 'static,
{
    prepare_stream(&stream, config)?;
    let peer = stream.peer_addr()?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    let mut reader = BufReader::new(DeadlineStream {
        stream,
        deadline: Instant::now(),
    });

    while !group.is_shutting_down() {
        // The client gets read_timeout to send a complete frame, however
        // it spreads the octets out. This counters Slowloris-style
        // attacks.
        reader.get_mut().deadline = Instant::now() + config.read_timeout;
        let body = match frame::read_frame(&mut reader, config.max_frame_size) {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(FrameError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                debug!("Closing connection from {}: read timed out", peer);
                break;
            }
            Err(FrameError::Io(e)) => return Err(e),
            Err(e @ FrameError::TooLarge(_)) => {
                warn!("Closing connection from {}: {}", peer, e);
                frame::write_frame(&mut writer, &Response::error(&e))?;
                break;
            }
        };

        match serde_json::from_slice(&body) {
            Ok(request) => handle_request(backend, request, &mut writer)?,
            Err(e) => {
                warn!("Malformed request from {}: {}", peer, e);
                frame::write_frame(&mut writer, &Response::error(&e))?;
            }
        }
        writer.flush()?;
    }
    writer.flush()
}

/// Puts an accepted stream into the mode connections are served in.
fn prepare_stream(stream: &TcpStream, config: &BlockingIoConfig) -> io::Result<()> {
    // The stream may inherit nonblocking mode from the listener.
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(config.read_timeout))
}

/// A [`TcpStream`] whose reads fail with [`io::ErrorKind::TimedOut`]
/// once `deadline` has passed.
struct DeadlineStream {
    stream: TcpStream,
    deadline: Instant,
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self
            .deadline
            .checked_duration_since(Instant::now())
            .filter(|t| !t.is_zero())
            .ok_or(io::ErrorKind::TimedOut)?;
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.read(buf)
    }
}

/// Dispatches one request to the backend and writes the responses.
/// Only failures to write to the client are returned.
fn handle_request<S, W>(backend: &Backend<S>, request: Request, writer: &mut W) -> io::Result<()>
where
    S: Store + 'static,
    W: Write,
{
    let result = match request {
        Request::Observation(observation) => match backend.handle_observation(&observation) {
            Ok(()) => return Ok(()),
            Err(e) => Err(e),
        },
        Request::Query(query) => {
            let mut sink = FrameSink { writer };
            match backend.handle_query(&query, &mut sink) {
                Ok(count) => Ok(count),
                Err(backend::Error::Sink(e)) => return Err(e),
                Err(e) => Err(e),
            }
        }
        Request::Dump(dump) => backend.handle_dump_request(&dump).map(|()| 0),
        Request::Backup(backup) => backend.handle_backup_request(&backup).map(|()| 0),
    };
    match result {
        Ok(count) => frame::write_frame(writer, &Response::End { count }),
        Err(e) => {
            debug!("Request failed: {}", e);
            frame::write_frame(writer, &Response::error(&e))
        }
    }
}

/// Streams query results to a client as [`Response::Observation`]
/// frames.
struct FrameSink<'a, W> {
    writer: &'a mut W,
}

impl<W: Write> ObservationSink for FrameSink<'_, W> {
    fn submit(&mut self, observation: Observation) -> io::Result<()> {
        frame::write_frame(&mut *self.writer, &Response::Observation(observation))
    }
}

/// Logs errors if a task exits with an I/O error.
fn log_io_errors<T>(result: io::Result<T>) {
    if let Err(e) = result {
        let current_thread = thread::current();
        let thread_name = current_thread.name().unwrap_or("anonymous thread");
        error!("I/O error in thread {}: {}", thread_name, e);
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Shutdown};

    use super::*;
    use crate::observation::{DumpRequest, Query};
    use crate::store::{BatchWriterConfig, MemoryStore};

    struct Harness {
        group: Arc<ThreadGroup>,
        backend: Arc<Backend<MemoryStore>>,
        addr: SocketAddr,
    }

    impl Harness {
        fn start(config: BlockingIoConfig) -> Self {
            let backend = Arc::new(Backend::in_memory(BatchWriterConfig::default()).unwrap());
            let provider =
                BlockingIoProvider::bind(config, [SocketAddr::from((Ipv4Addr::LOCALHOST, 0))])
                    .unwrap();
            let addr = provider.local_addrs().unwrap()[0];
            let group = ThreadGroup::new();
            provider.start(&backend, &group).unwrap();
            Self {
                group,
                backend,
                addr,
            }
        }

        fn connect(&self) -> TcpStream {
            let stream = TcpStream::connect(self.addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            stream
        }

        fn stop(self) {
            self.group.shut_down();
            self.group.await_shutdown();
        }
    }

    fn send<T: serde::Serialize>(stream: &mut TcpStream, message: &T) {
        frame::write_frame(stream, message).unwrap();
    }

    fn receive(stream: &mut TcpStream) -> Response {
        let body = frame::read_frame(stream, 1 << 20).unwrap().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn observation() -> Observation {
        Observation {
            rrname: "www.example.com".to_owned(),
            rrtype: "AAAA".to_owned(),
            rdata: "2001:db8::1".to_owned(),
            sensorid: "s1".to_owned(),
            count: 2,
            first_seen_ts: 10,
            last_seen_ts: 20,
        }
    }

    #[test]
    fn observations_can_be_queried_over_the_wire() {
        let harness = Harness::start(BlockingIoConfig::default());
        let mut client = harness.connect();

        send(&mut client, &Request::Observation(observation()));
        // Observations are not acknowledged, but requests on a
        // connection are handled in order, so the answer to this
        // invalid query means the observation has been submitted.
        send(&mut client, &Request::Query(Query::default()));
        assert!(matches!(receive(&mut client), Response::Error { .. }));
        harness.backend.flush().unwrap();

        send(
            &mut client,
            &Request::Query(Query::by_rrname("%.example.com", 10)),
        );
        assert_eq!(receive(&mut client), Response::Observation(observation()));
        assert_eq!(receive(&mut client), Response::End { count: 1 });

        client.shutdown(Shutdown::Both).unwrap();
        harness.stop();
    }

    #[test]
    fn failed_requests_keep_the_connection_open() {
        let harness = Harness::start(BlockingIoConfig::default());
        let mut client = harness.connect();

        client.write_all(&5u32.to_be_bytes()).unwrap();
        client.write_all(b"hello").unwrap();
        assert!(matches!(receive(&mut client), Response::Error { .. }));

        let dump = Request::Dump(DumpRequest {
            path: "/tmp/dump".to_owned(),
        });
        send(&mut client, &dump);
        match receive(&mut client) {
            Response::Error { message } => assert!(message.contains("dump")),
            other => panic!("unexpected response {:?}", other),
        }

        send(&mut client, &Request::Query(Query::by_rdata("2001:db8::1", 1)));
        assert_eq!(receive(&mut client), Response::End { count: 0 });

        client.shutdown(Shutdown::Both).unwrap();
        harness.stop();
    }

    #[test]
    fn oversized_frames_close_the_connection() {
        let harness = Harness::start(BlockingIoConfig {
            max_frame_size: 8,
            ..BlockingIoConfig::default()
        });
        let mut client = harness.connect();

        client.write_all(&9u32.to_be_bytes()).unwrap();
        assert!(matches!(receive(&mut client), Response::Error { .. }));
        assert!(frame::read_frame(&mut client, 1 << 20).unwrap().is_none());
        harness.stop();
    }

    #[test]
    fn trickled_frames_time_out() {
        let harness = Harness::start(BlockingIoConfig {
            read_timeout: Duration::from_millis(200),
            ..BlockingIoConfig::default()
        });
        let mut client = harness.connect();

        let mut request = Vec::new();
        let dump = Request::Dump(DumpRequest {
            path: "/tmp/dump".to_owned(),
        });
        frame::write_frame(&mut request, &dump).unwrap();
        // Every octet arrives well within the timeout, the whole frame
        // does not. Writes start failing once the server hangs up.
        for octet in &request {
            if client.write_all(&[*octet]).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!matches!(
            frame::read_frame(&mut client, 1 << 20),
            Ok(Some(_))
        ));
        harness.stop();
    }

    #[test]
    fn writes_to_clients_are_bounded() {
        let config = BlockingIoConfig {
            read_timeout: Duration::from_millis(300),
            ..BlockingIoConfig::default()
        };
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        prepare_stream(&server_side, &config).unwrap();
        assert_eq!(server_side.write_timeout().unwrap(), Some(config.read_timeout));
    }

    #[test]
    fn idle_connections_time_out() {
        let harness = Harness::start(BlockingIoConfig {
            read_timeout: Duration::from_millis(100),
            ..BlockingIoConfig::default()
        });
        let mut client = harness.connect();
        assert!(frame::read_frame(&mut client, 1 << 20).unwrap().is_none());
        harness.stop();
    }
}
