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

//! A passive-DNS index over an ordered key-value store.
//!
//! Passive-DNS observations (a name, a record type, its data and the
//! sensor that saw it, plus counters) are stored three times, in tables
//! ordered by name, by data, and by reversed name. Queries by exact
//! name, name prefix, name suffix or data then become prefix scans of
//! one table.
//!
//! The crate is organized bottom-up:
//!
//! * [`codec`] turns key fields and counters into bytes that sort
//!   correctly.
//! * [`store`] defines the [`Store`](store::Store) abstraction, an
//!   in-memory implementation, and the buffering
//!   [`BatchWriter`](store::BatchWriter).
//! * [`index`] lays observations out in the three tables and plans,
//!   decodes and streams queries.
//! * [`backend`] combines these into the operations offered to clients.
//! * [`io`] serves a backend over TCP.

pub mod backend;
pub mod codec;
pub mod index;
pub mod io;
pub mod observation;
pub mod store;
pub mod thread;
