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

//! Message framing.
//!
//! Every message is a frame: a four-octet big-endian length followed
//! by that many octets of JSON. Clients send [`Request`] frames; the
//! server answers with [`Response`] frames. Observations are not
//! acknowledged unless they fail. Each query is answered with its
//! results, then either [`Response::End`] or [`Response::Error`].

use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::observation::{BackupRequest, DumpRequest, Observation, Query};

/// The length of a frame header.
pub const HEADER_LEN: usize = 4;

/// A message from a client.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Observation(Observation),
    Query(Query),
    Dump(DumpRequest),
    Backup(BackupRequest),
}

/// A message to a client.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// One query result.
    Observation(Observation),

    /// The end of a successful query, with the number of results sent.
    End { count: usize },

    /// A failed request.
    Error { message: String },
}

impl Response {
    /// Creates an [`Response::Error`] reporting `error`.
    pub fn error(error: impl fmt::Display) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }
}

/// Reads the body of the next frame. Returns [`None`] if the stream
/// ends cleanly before the frame starts.
pub fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: Read + ?Sized,
{
    let mut header = [0; HEADER_LEN];
    let mut n_read = 0;
    while n_read < HEADER_LEN {
        match reader.read(&mut header[n_read..]) {
            Ok(0) if n_read == 0 => return Ok(None),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => n_read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_size {
        return Err(FrameError::TooLarge(len));
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Serializes `message` and writes it as one frame.
pub fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: Write + ?Sized,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)
}

/// An error reading a frame.
#[derive(Debug)]
pub enum FrameError {
    Io(io::Error),

    /// The frame announced a body longer than allowed.
    TooLarge(usize),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{}", e),
            Self::TooLarge(len) => write!(f, "frame of {} octets is too large", len),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::TooLarge(_) => None,
        }
    }
}
