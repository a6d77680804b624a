// SPDX-License-Identifier: MIT

//! Minimal request layer on top of the framing parsers.
//!
//! Reads the header block, splits it into a [`RequestHead`], then picks the
//! body reader from `Content-Length` and `Content-Type`: multipart bodies go
//! through the transcoder, everything else is read as-is.

use crate::error::AppError;
use crate::headers::read_headers_limited;
use crate::multipart::{boundary_from_content_type, read_mime};
use crate::stream::{ByteStream, WaitSource};
use log::{debug, warn};
use std::collections::HashMap;

/// Default cap on declared body sizes (64MB)
pub const DEFAULT_MAX_BODY_SIZE: u64 = 64 * 1024 * 1024;
/// Default cap on the header block, counted after CRs are dropped (8KB)
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;

/// Size limits applied by [`read_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_header_size: usize,
    pub max_body_size: u64,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Request line and header fields of one request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Field names are lowercased; repeated fields are joined with ", "
    pub headers: HashMap<String, String>,
    /// The header block exactly as the header reader returned it
    pub raw: String,
}

/// What followed the header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    None,
    Text(String),
    Multipart { boundary: String, text: String },
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: RequestHead,
    pub body: Body,
}

impl RequestHead {
    /// Parse a header block as returned by [`read_headers`].
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(AppError::BadRequest)?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(AppError::BadRequest);
        }

        let version = parts[2];
        if !version.starts_with("HTTP/1.") {
            return Err(AppError::BadRequest);
        }

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                break;
            }

            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_lowercase();
                let value = value.trim().to_string();

                if let Some(existing) = headers.get_mut(&key) {
                    existing.push_str(", ");
                    existing.push_str(&value);
                } else {
                    headers.insert(key, value);
                }
            }
        }

        Ok(Self {
            method: parts[0].to_string(),
            target: parts[1].to_string(),
            version: version.to_string(),
            headers,
            raw: raw.to_string(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Declared body length, if any.
    pub fn content_length(&self) -> Result<Option<u64>, AppError> {
        match self.header("content-length") {
            Some(value) => value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| AppError::BadRequest),
            None => Ok(None),
        }
    }

    /// Boundary of a `multipart/form-data` body, if the request carries one.
    pub fn multipart_boundary(&self) -> Result<Option<String>, AppError> {
        match self.header("content-type") {
            Some(content_type) => boundary_from_content_type(content_type),
            None => Ok(None),
        }
    }
}

/// Pass-through bulk read of exactly `size` bytes, returned as text.
pub fn read_post<S: WaitSource>(
    stream: &mut ByteStream<S>,
    size: usize,
) -> Result<String, AppError> {
    let body = stream.read_bytes(size).unwrap_or_default();
    if body.len() < size {
        return Err(AppError::short_read(size, body.len()));
    }

    Ok(match String::from_utf8(body) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Read one complete request: header block, then the body it declares.
pub fn read_request<S: WaitSource>(
    stream: &mut ByteStream<S>,
    limits: RequestLimits,
) -> Result<CapturedRequest, AppError> {
    let raw = read_headers_limited(stream, limits.max_header_size)?;
    let head = RequestHead::parse(&raw)?;

    if head
        .header("transfer-encoding")
        .is_some_and(|te| te.to_lowercase().contains("chunked"))
    {
        warn!("Chunked transfer encoding is not supported");
        return Err(AppError::BadRequest);
    }

    let Some(length) = head.content_length()? else {
        debug!("{} {} without body", head.method, head.target);
        return Ok(CapturedRequest {
            head,
            body: Body::None,
        });
    };

    if length > limits.max_body_size {
        return Err(AppError::PayloadTooLarge(limits.max_body_size));
    }
    let size = usize::try_from(length)
        .map_err(|_| AppError::PayloadTooLarge(limits.max_body_size))?;

    let body = match head.multipart_boundary()? {
        Some(boundary) => {
            let text = read_mime(stream, size, &boundary)?;
            Body::Multipart { boundary, text }
        }
        None => Body::Text(read_post(stream, size)?),
    };

    debug!(
        "{} {} with {size} byte body ({})",
        head.method,
        head.target,
        match body {
            Body::Multipart { .. } => "multipart",
            _ => "plain",
        }
    );

    Ok(CapturedRequest { head, body })
}
