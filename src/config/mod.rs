//! Configuration management for mimewire
//! INI files with CLI argument overrides

pub mod ini_parser;

use crate::cli::Cli;
use crate::error::AppError;
use crate::request::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE, RequestLimits};
use crate::stream::DEFAULT_WAIT;
use ini_parser::IniConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_THREADS: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub listen: String,
    pub port: u16,
    pub threads: usize,

    // Per-read wait applied to every client socket
    pub wait_timeout: Duration,
    // Largest accepted Content-Length, in bytes
    pub max_body_size: u64,
    // Largest accepted header block, in bytes
    pub max_header_size: usize,

    // Logging settings
    pub verbose: bool,
    pub detailed_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            port: DEFAULT_PORT,
            threads: DEFAULT_THREADS,
            wait_timeout: DEFAULT_WAIT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            verbose: false,
            detailed_logging: false,
        }
    }
}

impl Config {
    /// Load configuration with precedence: CLI args > INI file > Defaults
    pub fn load(cli: &Cli) -> Result<Self, AppError> {
        let ini = match Self::find_config_file(cli)? {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                IniConfig::load_file(&path)?
            }
            None => {
                log::info!("No configuration file found, using defaults and CLI overrides");
                IniConfig::new()
            }
        };
        Self::from_sources(cli, &ini)
    }

    /// Merge an already parsed INI file with the CLI.
    pub fn from_sources(cli: &Cli, ini: &IniConfig) -> Result<Self, AppError> {
        let defaults = Self::default();

        let wait_secs = cli
            .wait_timeout
            .or_else(|| ini.get_u64("stream", "wait_timeout"));
        let max_body_size = match cli.max_body_size {
            Some(mb) => mb * 1024 * 1024,
            None => ini
                .get_size("request", "max_body_size")
                .unwrap_or(defaults.max_body_size),
        };

        let max_header_size = match ini.get_size("request", "max_header_size") {
            Some(size) => usize::try_from(size).map_err(|_| {
                AppError::InvalidConfiguration(format!("max_header_size {size} is too large"))
            })?,
            None => defaults.max_header_size,
        };

        let config = Self {
            listen: cli
                .listen
                .clone()
                .or_else(|| ini.get_string("server", "listen"))
                .unwrap_or(defaults.listen),
            port: cli
                .port
                .or_else(|| ini.get_u16("server", "port"))
                .unwrap_or(defaults.port),
            threads: cli
                .threads
                .or_else(|| ini.get_usize("server", "threads"))
                .unwrap_or(defaults.threads),
            wait_timeout: wait_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait_timeout),
            max_body_size,
            max_header_size,
            verbose: cli.verbose || ini.get_bool("logging", "verbose").unwrap_or(false),
            detailed_logging: cli.detailed_logging
                || ini.get_bool("logging", "detailed").unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.threads == 0 {
            return Err(AppError::InvalidConfiguration(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.wait_timeout.is_zero() {
            return Err(AppError::InvalidConfiguration(
                "wait_timeout must be at least 1 second".to_string(),
            ));
        }
        if self.max_header_size < 16 {
            return Err(AppError::InvalidConfiguration(
                "max_header_size must be at least 16 bytes".to_string(),
            ));
        }
        if self.max_body_size == 0 {
            return Err(AppError::InvalidConfiguration(
                "max_body_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
        }
    }

    /// Find configuration file in order of preference
    fn find_config_file(cli: &Cli) -> Result<Option<PathBuf>, AppError> {
        // 1. Explicit --config-file
        if let Some(ref path) = cli.config_file {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(AppError::InvalidConfiguration(format!(
                "Config file specified but not found: {}",
                path.display()
            )));
        }

        // 2. Current directory
        for candidate in ["mimewire.ini", "mimewire.conf"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        // 3. ~/.config/mimewire/config.ini
        if let Some(home_dir) = std::env::var_os("HOME") {
            let user_config = Path::new(&home_dir)
                .join(".config")
                .join("mimewire")
                .join("config.ini");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/mimewire/config.ini");
            if system_config.exists() {
                return Ok(Some(system_config));
            }
        }

        Ok(None)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        log::info!("Configuration Summary:");
        log::info!("  Server: {}:{}", self.listen, self.port);
        log::info!("  Threads: {}", self.threads);
        log::info!("  Wait Timeout: {}s", self.wait_timeout.as_secs());
        log::info!("  Max Body Size: {} MB", self.max_body_size / (1024 * 1024));
        log::info!("  Max Header Size: {} bytes", self.max_header_size);
        log::info!("  Verbose Logging: {}", self.verbose);
        log::info!("  Detailed Logging: {}", self.detailed_logging);
    }
}
