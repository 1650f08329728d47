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

//! Implements the `run` command (i.e., running the backend).

use std::fmt::Write;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use balboa::backend::Backend;
use balboa::store::BatchWriterConfig;
use balboa::thread::ThreadGroup;

use crate::args::RunArgs;
use crate::config;

/// Runs the backend.
pub fn run(args: RunArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            let _ = write!(message, "\n[{}] {}", i + 1, cause);
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(run_args: RunArgs) -> Result<()> {
    info!(
        "Balboa daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    // Get the configuration, either from the file system or from the
    // command line arguments, as appropriate.
    let config = if let Some(ref config_path) = run_args.config {
        info!("Loading the configuration from {}.", config_path.display());
        config::load_from_path(config_path).context("failed to load the configuration")?
    } else {
        info!("Loading the configuration from the command line.");
        config::load_from_args(run_args)
    };

    // Bind before opening the backend, so that a bad address fails
    // fast.
    let io_provider = config
        .io
        .bind_provider(config.bind)
        .context("failed to bind the listener")?;
    let backend = Arc::new(
        Backend::in_memory(BatchWriterConfig::from(&config.writer))
            .context("failed to open the backend")?,
    );

    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    info!("Set-up is complete; starting the server.");
    let thread_group = ThreadGroup::new();
    io_provider
        .start(&backend, &thread_group)
        .context("failed to start the I/O provider")?;

    if let Some(signal) = signals.forever().next() {
        let name = match signal {
            SIGINT => "SIGINT",
            _ => "SIGTERM",
        };
        info!("Received {}; shutting down.", name);
    }

    // No connection can submit observations once the group has shut
    // down, so closing the backend flushes everything received.
    thread_group.shut_down();
    thread_group.await_shutdown();
    backend
        .close()
        .context("failed to flush buffered observations")?;
    info!("Shutdown complete.");
    Ok(())
}

fn set_up_signal_handling() -> Result<Signals> {
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // A second termination signal arriving before the graceful shutdown
    // completes exits immediately.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(term_signals).map_err(Into::into)
}
