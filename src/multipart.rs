// SPDX-License-Identifier: MIT

//! multipart/form-data transcoder
//!
//! Turns a complete `multipart/form-data` body into an equivalent body that is
//! pure text. Field parts pass through untouched. File parts keep their
//! headers, gain two synthetic ones right before the blank line, and have
//! their payload replaced by its base64 encoding:
//!
//! ```text
//! --XYZ\r\n                                      --XYZ\r\n
//! Content-Disposition: ...; filename="a.bin"\r\n  Content-Disposition: ...; filename="a.bin"\r\n
//! Content-Type: application/octet-stream\r\n      Content-Type: application/octet-stream\r\n
//! \r\n                                      =>    Content-Length: 3\r\n
//! <00 ff 10>\r\n                                  Content-Encoding: base64\r\n
//! --XYZ--\r\n                                     \r\n
//!                                                 AP8Q\r\n
//!                                                 --XYZ--\r\n
//! ```
//!
//! # Scanning rules
//! - The delimiter is `--` followed by the boundary and is found by literal
//!   byte matching; the first occurrence wins. Nothing escapes the boundary,
//!   so a file whose bytes contain the delimiter is cut short at that point.
//!   Long random boundaries are what keep this from happening in practice.
//! - A part is a file part when its *first* header line contains `filename=`
//!   (ASCII case-insensitive). Later header lines are not inspected.
//! - The two bytes after a non-terminal delimiter are skipped without being
//!   checked, as are the four after the terminal `--boundary--`.
//! - Every scan is bounded by the body length. Running off the end is a
//!   [`AppError::MalformedMultipart`], never an out-of-bounds read.
//!
//! # Example
//! ```rust
//! use mimewire::multipart::Transcoder;
//!
//! let body = b"--XYZ\r\n\
//!     Content-Disposition: form-data; name=\"f\"; filename=\"a.bin\"\r\n\
//!     \r\n\
//!     \x00\xff\x10\r\n\
//!     --XYZ--\r\n";
//! let text = Transcoder::new().transcode(body, "XYZ").unwrap();
//! assert!(text.contains("Content-Length: 3\r\nContent-Encoding: base64\r\n\r\nAP8Q\r\n"));
//! ```

use crate::error::AppError;
use crate::scan::{Finder, LinearFinder, contains_ignore_ascii_case, find_line_end};
use crate::stream::{ByteStream, WaitSource};
use base64::Engine;
use log::{debug, trace};

const FILENAME_MARKER: &[u8] = b"filename=";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_BOUNDARY_LENGTH: usize = 70; // RFC 2046 limit

/// Re-serializes multipart bodies to text using a pluggable substring search.
#[derive(Debug, Clone, Default)]
pub struct Transcoder<F = LinearFinder> {
    finder: F,
}

impl Transcoder<LinearFinder> {
    pub fn new() -> Self {
        Self {
            finder: LinearFinder,
        }
    }
}

impl<F: Finder> Transcoder<F> {
    /// Use a different search strategy. It must report the same matches as
    /// [`LinearFinder`].
    pub fn with_finder(finder: F) -> Self {
        Self { finder }
    }

    /// Transcode and return the result as text.
    ///
    /// Bytes copied verbatim (preamble, field values) that are not valid UTF-8
    /// are replaced with U+FFFD; use [`Transcoder::transcode_bytes`] when the
    /// exact bytes matter.
    pub fn transcode(&self, body: &[u8], boundary: &str) -> Result<String, AppError> {
        let out = self.transcode_bytes(body, boundary)?;
        match String::from_utf8(out) {
            Ok(text) => Ok(text),
            Err(e) => {
                debug!("Transcoded body carries non UTF-8 field bytes, replacing them");
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }

    /// Transcode into raw bytes. Every base64 payload and every verbatim
    /// region is byte-exact.
    pub fn transcode_bytes(&self, body: &[u8], boundary: &str) -> Result<Vec<u8>, AppError> {
        let size = body.len();
        let delimiter = delimiter(boundary);
        let mut out = Vec::with_capacity(size + size / 3 + 128);
        let mut i = 0;
        let (mut fields, mut files) = (0usize, 0usize);

        while i < size {
            let at = self
                .finder
                .find(body, &delimiter, i, size)
                .ok_or_else(|| AppError::malformed(format!("no boundary after byte {i}")))?;
            out.extend_from_slice(&body[i..at]);
            out.extend_from_slice(&delimiter);
            i = at + delimiter.len();

            if size - i < 2 {
                return Err(AppError::malformed("body ends inside a boundary line"));
            }
            if &body[i..i + 2] == b"--" {
                out.extend_from_slice(b"--\r\n");
                break;
            }
            out.extend_from_slice(b"\r\n");
            i += 2;

            let line_end = find_line_end(body, i, size).ok_or_else(|| {
                AppError::malformed(format!("part header at byte {i} never ends"))
            })?;
            out.extend_from_slice(&body[i..line_end]);
            let is_file = contains_ignore_ascii_case(body, FILENAME_MARKER, i, line_end);
            i = line_end;

            if !is_file {
                fields += 1;
                continue;
            }
            files += 1;

            let header_end = self
                .finder
                .find(body, HEADER_TERMINATOR, i, size)
                .ok_or_else(|| {
                    AppError::malformed(format!("file part headers at byte {i} never end"))
                })?;
            out.extend_from_slice(&body[i..header_end]);
            out.extend_from_slice(b"\r\n");

            let payload_start = header_end + HEADER_TERMINATOR.len();
            let next = self
                .finder
                .find(body, &delimiter, payload_start, size)
                .ok_or_else(|| {
                    AppError::malformed(format!(
                        "file payload at byte {payload_start} has no closing boundary"
                    ))
                })?;
            // The CRLF in front of the boundary belongs to the boundary line
            let payload_end = next.saturating_sub(2).max(payload_start);
            append_encoded(&mut out, &body[payload_start..payload_end]);
            trace!(
                "Encoded file part {files}: {} bytes",
                payload_end - payload_start
            );

            i = next;
        }

        debug!(
            "Transcoded multipart body: {size} bytes in, {} bytes out, {fields} field parts, {files} file parts",
            out.len()
        );
        Ok(out)
    }
}

/// Synthetic headers, blank line, base64 text and the closing CRLF.
fn append_encoded(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(format!("Content-Length: {}\r\n", payload.len()).as_bytes());
    out.extend_from_slice(b"Content-Encoding: base64\r\n\r\n");
    out.extend_from_slice(
        base64::engine::general_purpose::STANDARD
            .encode(payload)
            .as_bytes(),
    );
    out.extend_from_slice(b"\r\n");
}

fn delimiter(boundary: &str) -> Vec<u8> {
    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary.as_bytes());
    delimiter
}

/// Read exactly `size` bytes of multipart body from `stream` and transcode them.
///
/// The whole body is read before any parsing. If the stream runs dry first
/// the call fails with [`AppError::ShortRead`]; no partial output is produced.
pub fn read_mime<S: WaitSource>(
    stream: &mut ByteStream<S>,
    size: usize,
    boundary: &str,
) -> Result<String, AppError> {
    check_boundary(boundary)?;

    let body = stream.read_bytes(size).unwrap_or_default();
    if body.len() < size {
        debug!("Multipart body cut short: {} of {size} bytes", body.len());
        return Err(AppError::short_read(size, body.len()));
    }

    Transcoder::new().transcode(&body, boundary)
}

/// Minimal sanity check applied before reading: the delimiter must be
/// non-empty and fit on one line.
fn check_boundary(boundary: &str) -> Result<(), AppError> {
    if boundary.is_empty() || boundary.contains('\r') || boundary.contains('\n') {
        return Err(AppError::invalid_boundary(boundary));
    }
    Ok(())
}

/// Validate a boundary against RFC 2046: 1 to 70 characters from the
/// `bchars` set, not ending in a space.
pub fn validate_boundary(boundary: &str) -> Result<(), AppError> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LENGTH {
        return Err(AppError::invalid_boundary(boundary));
    }

    if boundary.ends_with(' ')
        || !boundary
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c))
    {
        return Err(AppError::invalid_boundary(boundary));
    }

    Ok(())
}

/// Extract the boundary from a Content-Type value.
///
/// Returns `Ok(None)` when the type is not `multipart/form-data`, and an
/// error when it is but carries no valid boundary parameter.
pub fn boundary_from_content_type(content_type: &str) -> Result<Option<String>, AppError> {
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        return Ok(None);
    }

    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let boundary = value.trim().trim_matches('"');
            validate_boundary(boundary)?;
            return Ok(Some(boundary.to_string()));
        }
    }

    Err(AppError::invalid_boundary(""))
}
