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

//! The records exchanged with callers: observations and the requests
//! made about them.

use serde::{Deserialize, Serialize};

/// One passive-DNS observation.
///
/// An observation records that `rrname` was seen resolving to `rdata`
/// (a record of type `rrtype`) by sensor `sensorid`, `count` times
/// between `first_seen_ts` and `last_seen_ts` (seconds since the Unix
/// epoch). Each write of an observation is independent; merging of
/// counters for repeated tuples is not done by the index.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Observation {
    pub rrname: String,
    pub rrtype: String,
    pub rdata: String,
    pub sensorid: String,
    pub count: u64,
    pub first_seen_ts: u64,
    pub last_seen_ts: u64,
}

/// A lookup request.
///
/// At least one of `rrname` and `rdata` must be non-empty. The
/// `rrname` pattern may carry a single `%` wildcard marker at its
/// beginning (matching names that end with the rest of the pattern) or
/// at its end (matching names that start with the rest). An empty
/// `sensorid` means "any sensor". At most `limit` observations are
/// returned.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Query {
    #[serde(default)]
    pub rrname: String,
    #[serde(default)]
    pub rdata: String,
    #[serde(default)]
    pub sensorid: String,
    pub limit: usize,
}

impl Query {
    /// Creates a query for observations of `rrname`.
    pub fn by_rrname(rrname: impl Into<String>, limit: usize) -> Self {
        Self {
            rrname: rrname.into(),
            limit,
            ..Self::default()
        }
    }

    /// Creates a query for observations resolving to `rdata`.
    pub fn by_rdata(rdata: impl Into<String>, limit: usize) -> Self {
        Self {
            rdata: rdata.into(),
            limit,
            ..Self::default()
        }
    }

    /// Restricts the query to a single sensor.
    pub fn with_sensorid(mut self, sensorid: impl Into<String>) -> Self {
        self.sensorid = sensorid.into();
        self
    }
}

/// A request to dump the whole database. Not supported by this
/// backend.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpRequest {
    pub path: String,
}

/// A request to back the database up. Not supported by this backend.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BackupRequest {
    pub path: String,
}
