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

//! Implements the configuration file.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled};
use serde::Deserialize;

use balboa::io::{BlockingIoConfig, BlockingIoProvider};
use balboa::store::BatchWriterConfig;

use crate::args::RunArgs;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the configuration from the file given by `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let config = parse(&raw_config)?;
    log_config_summary(&config);
    Ok(config)
}

/// Loads the configuration from the parsed command line arguments
/// given by `args`. Everything but the listening address takes its
/// default value.
pub fn load_from_args(args: RunArgs) -> Config {
    let bind = args.bind.unwrap_or_else(|| {
        let ip = args.ip.unwrap_or(DEFAULT_BIND_IP);
        let port = args.port.unwrap_or(DEFAULT_BIND_PORT);
        SocketAddr::new(ip, port)
    });

    let config = Config {
        bind,
        writer: WriterConfig::default(),
        io: IoConfig::default(),
    };
    log_config_summary(&config);
    config
}

fn parse(raw_config: &[u8]) -> Result<Config> {
    toml::from_slice(raw_config).context("failed to parse the configuration file")
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        return;
    }
    debug!(
        "Configuration loaded:\n\
         Bind address:      {}\n\
         Writer memory:     {} octets\n\
         Writer latency:    {} s\n\
         Writer threads:    {}\n\
         Max frame size:    {} octets\n\
         Read timeout:      {} s",
        config.bind,
        config.writer.max_memory,
        config.writer.max_latency,
        config.writer.max_write_threads,
        config.io.max_frame_size,
        config.io.read_timeout,
    );
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub io: IoConfig,
}

const DEFAULT_BIND_IP: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);
const DEFAULT_BIND_PORT: u16 = 4242;

fn default_bind() -> SocketAddr {
    SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_BIND_PORT)
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: WRITER                                      //
////////////////////////////////////////////////////////////////////////

/// Configuration for the [`BatchWriter`](balboa::store::BatchWriter).
/// This mirrors [`BatchWriterConfig`] and can be converted into one.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    #[serde(default = "default_max_memory")]
    pub max_memory: usize,
    #[serde(default = "default_max_latency")]
    pub max_latency: u64,
    #[serde(default = "default_max_write_threads")]
    pub max_write_threads: usize,
}

fn default_max_memory() -> usize {
    BatchWriterConfig::default().max_memory
}

fn default_max_latency() -> u64 {
    BatchWriterConfig::default().max_latency.as_secs()
}

fn default_max_write_threads() -> usize {
    BatchWriterConfig::default().max_write_threads
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_memory: default_max_memory(),
            max_latency: default_max_latency(),
            max_write_threads: default_max_write_threads(),
        }
    }
}

impl From<&WriterConfig> for BatchWriterConfig {
    fn from(toml_config: &WriterConfig) -> Self {
        Self {
            max_memory: toml_config.max_memory,
            max_latency: Duration::from_secs(toml_config.max_latency),
            max_write_threads: toml_config.max_write_threads,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: I/O                                         //
////////////////////////////////////////////////////////////////////////

/// Configuration for the [`BlockingIoProvider`]. This mirrors
/// [`BlockingIoConfig`] and can be converted into one.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoConfig {
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
}

impl IoConfig {
    /// Creates the I/O provider with this configuration and binds it
    /// to the provided address.
    pub fn bind_provider(&self, addr: SocketAddr) -> io::Result<BlockingIoProvider> {
        BlockingIoProvider::bind(self.into(), [addr])
    }
}

fn default_max_frame_size() -> usize {
    BlockingIoConfig::default().max_frame_size
}

fn default_read_timeout() -> u64 {
    BlockingIoConfig::default().read_timeout.as_secs()
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl From<&IoConfig> for BlockingIoConfig {
    fn from(toml_config: &IoConfig) -> Self {
        Self {
            max_frame_size: toml_config.max_frame_size,
            read_timeout: Duration::from_secs(toml_config.read_timeout),
        }
    }
}
