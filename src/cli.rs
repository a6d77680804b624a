use clap::Parser;
use std::path::PathBuf;

// Command-line interface of the capture server.
// Every option is optional so that the INI file and defaults can fill the gaps.
#[derive(Parser, Clone, Debug, Default)]
#[command(
    version,
    about = "Capture HTTP requests and print them with multipart file parts re-encoded as base64.",
    long_about = "Accepts one request per connection, reads the header block and the declared body through a \
                  timeout-bounded socket reader, and answers with the captured request as text/plain.\n\
                  multipart/form-data bodies are transcoded: field parts pass through, file parts are \
                  re-encoded as base64 with Content-Length and Content-Encoding headers added."
)]
pub struct Cli {
    /// Host address to listen on (e.g. 127.0.0.1 or 0.0.0.0)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Port number to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of worker threads handling connections
    #[arg(short, long, value_parser = validate_threads)]
    pub threads: Option<usize>,

    /// Seconds a read may wait for the client before giving up on it
    #[arg(short, long, value_parser = validate_wait_timeout)]
    pub wait_timeout: Option<u64>,

    /// Largest accepted Content-Length, in MB
    #[arg(short = 'm', long, value_parser = validate_body_size)]
    pub max_body_size: Option<u64>,

    /// Enable verbose logging (log level: debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable more detailed logging (log level: info)
    #[arg(long)]
    pub detailed_logging: bool,

    /// Configuration file (INI). Defaults to mimewire.ini in the current
    /// directory or ~/.config/mimewire/config.ini
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,
}

fn validate_threads(s: &str) -> Result<usize, String> {
    let threads: usize = s
        .parse()
        .map_err(|_| "Thread count must be a positive number".to_string())?;
    if threads == 0 || threads > 1024 {
        return Err("Thread count must be between 1 and 1024".to_string());
    }
    Ok(threads)
}

fn validate_wait_timeout(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| "Wait timeout must be a whole number of seconds".to_string())?;
    if secs == 0 || secs > 3600 {
        return Err("Wait timeout must be between 1 and 3600 seconds".to_string());
    }
    Ok(secs)
}

/// Body size is capped at 10240 MB (10 GB)
fn validate_body_size(s: &str) -> Result<u64, String> {
    let size: u64 = s
        .parse()
        .map_err(|_| "Body size must be a positive number".to_string())?;
    if size == 0 {
        return Err("Body size must be greater than 0 MB".to_string());
    }
    if size > 10240 {
        return Err("Body size must not exceed 10240 MB (10 GB)".to_string());
    }
    Ok(size)
}
