// SPDX-License-Identifier: MIT

//! # mimewire
//!
//! Timeout-bounded byte reader for network sockets with HTTP header and
//! `multipart/form-data` framing on top. File parts of a multipart body are
//! re-encoded as base64 so the result is plain text a scripting host can
//! handle.
//!
//! The `binding` module exposes the reader to such a host through a table of
//! native functions; the `server` module is a small capture server built on
//! the same pieces. `run` starts that server from command-line arguments.

pub mod binding;
pub mod cli;
pub mod config;
pub mod error;
pub mod headers;
pub mod multipart;
pub mod request;
pub mod scan;
pub mod server;
pub mod stream;

use crate::cli::Cli;
use crate::config::Config;
use clap::Parser;
use log::error;

/// Initializes the logger, parses command-line arguments, and starts the server.
///
/// `RUST_LOG` wins over the level picked from the configuration.
pub fn run() {
    let cli = Cli::parse();

    // Load configuration with precedence: CLI > INI > Defaults
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let log_level = if config.verbose {
        "debug"
    } else if config.detailed_logging {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::debug!("Log level set to: {log_level}");

    if config.verbose {
        config.print_summary();
    }

    if let Err(e) = server::run_server_with_config(config) {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
