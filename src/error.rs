// SPDX-License-Identifier: MIT

use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    AddrParse(std::net::AddrParseError),
    BadRequest,
    /// Peer closed or went quiet before a complete header block arrived
    ConnectionClosed,
    // Framing errors
    ShortRead { expected: usize, received: usize }, // Declared size vs bytes actually obtained
    MalformedMultipart(String),                      // Contains what the scan failed to find
    InvalidBoundary(String),                         // Contains the rejected boundary
    PayloadTooLarge(u64),                            // Contains the maximum allowed size
    HeadersTooLarge(usize),                          // Contains the header block limit
    // Binding errors
    InvalidArgument(String),
    UnknownFunction(String),
    InvalidConfiguration(String),
    InternalServerError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "IO error: {err}"),
            AppError::AddrParse(err) => write!(f, "Address parse error: {err}"),
            AppError::BadRequest => write!(f, "Bad request"),
            AppError::ConnectionClosed => {
                write!(f, "Connection closed before the request was complete")
            }
            AppError::ShortRead { expected, received } => {
                write!(
                    f,
                    "Short read: expected {expected} bytes, received {received}"
                )
            }
            AppError::MalformedMultipart(msg) => write!(f, "Malformed multipart body: {msg}"),
            AppError::InvalidBoundary(boundary) => {
                write!(f, "Invalid multipart boundary '{boundary}'")
            }
            AppError::PayloadTooLarge(max_size) => {
                write!(
                    f,
                    "Request payload too large. Maximum allowed size: {max_size} bytes"
                )
            }
            AppError::HeadersTooLarge(max_size) => {
                write!(f, "Request header block exceeds {max_size} bytes")
            }
            AppError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            AppError::UnknownFunction(name) => write!(f, "Unknown native function '{name}'"),
            AppError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
            AppError::InternalServerError(msg) => write!(f, "Internal server error: {msg}"),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<std::net::AddrParseError> for AppError {
    fn from(err: std::net::AddrParseError) -> Self {
        AppError::AddrParse(err)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Creates a ShortRead error
    pub fn short_read(expected: usize, received: usize) -> Self {
        AppError::ShortRead { expected, received }
    }

    /// Creates a MalformedMultipart error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        AppError::MalformedMultipart(msg.into())
    }

    /// Creates an InvalidBoundary error
    pub fn invalid_boundary<S: Into<String>>(boundary: S) -> Self {
        AppError::InvalidBoundary(boundary.into())
    }

    /// Creates an InvalidArgument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        AppError::InvalidArgument(msg.into())
    }

    /// Checks if the error came out of the header/MIME framing layer
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            AppError::ConnectionClosed
                | AppError::ShortRead { .. }
                | AppError::HeadersTooLarge(_)
                | AppError::MalformedMultipart(_)
                | AppError::InvalidBoundary(_)
        )
    }

    /// HTTP status the capture server answers with for this error
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            AppError::ConnectionClosed | AppError::ShortRead { .. } => (408, "Request Timeout"),
            AppError::PayloadTooLarge(_) => (413, "Payload Too Large"),
            AppError::HeadersTooLarge(_) => (431, "Request Header Fields Too Large"),
            AppError::BadRequest
            | AppError::MalformedMultipart(_)
            | AppError::InvalidBoundary(_) => (400, "Bad Request"),
            _ => (500, "Internal Server Error"),
        }
    }
}
