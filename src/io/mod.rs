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

//! Network I/O for serving a [`Backend`](crate::backend::Backend).
//!
//! The [`Backend`](crate::backend::Backend) implements the
//! passive-DNS operations independently of any network protocol. This
//! module carries them over TCP: [`frame`] defines the messages and
//! how they are framed, and the [`BlockingIoProvider`] accepts
//! connections and dispatches their requests.

mod blocking;
pub mod frame;

pub use blocking::{BlockingIoConfig, BlockingIoProvider};
