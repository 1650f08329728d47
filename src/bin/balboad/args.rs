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

//! Implements command-line argument parsing.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The Balboa passive-DNS backend
#[derive(Debug, Parser)]
#[command(author, version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the backend
    Run(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Set the configuration file to use
    #[arg(long, conflicts_with_all = ["bind", "ip", "port"], value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Set the listening IP address and port
    #[arg(long, value_name = "IP:PORT")]
    pub bind: Option<SocketAddr>,

    /// Set the listening IP address
    #[arg(long, conflicts_with = "bind", value_name = "IP")]
    pub ip: Option<IpAddr>,

    /// Set the listening port
    #[arg(long, conflicts_with = "bind", value_name = "PORT")]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_conflicts_with_bind() {
        let result = Args::try_parse_from([
            "balboad",
            "run",
            "--config",
            "balboa.toml",
            "--bind",
            "[::1]:4242",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn ip_and_port_may_be_given_separately() {
        let args = Args::try_parse_from(["balboad", "run", "--ip", "127.0.0.1", "--port", "4343"])
            .unwrap();
        let Command::Run(run_args) = args.command;
        assert_eq!(run_args.ip, Some(IpAddr::from([127, 0, 0, 1])));
        assert_eq!(run_args.port, Some(4343));
        assert!(run_args.bind.is_none());
    }
}
