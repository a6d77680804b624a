// SPDX-License-Identifier: MIT

//! Reads one HTTP header block off a [`ByteStream`].

use crate::error::AppError;
use crate::stream::{ByteStream, WaitSource};
use log::{debug, trace};

/// Consume bytes up to and including the blank line that ends a header block.
///
/// Carriage returns are dropped, line feeds are kept, so `"A: 1\r\n\r\n"`
/// comes back as `"A: 1\n\n"`. Returns `None` if the stream runs dry before
/// the blank line; no partial block is ever returned.
pub fn read_headers<S: WaitSource>(stream: &mut ByteStream<S>) -> Option<String> {
    match collect_block(stream, usize::MAX) {
        Block::Complete(raw) => Some(into_text(raw)),
        Block::Exhausted | Block::Oversized => None,
    }
}

/// Same as [`read_headers`], but gives up once the kept bytes exceed
/// `max_size`.
///
/// Running dry is [`AppError::ConnectionClosed`]; crossing the limit is
/// [`AppError::HeadersTooLarge`]. Nothing past the limit is read.
pub fn read_headers_limited<S: WaitSource>(
    stream: &mut ByteStream<S>,
    max_size: usize,
) -> Result<String, AppError> {
    match collect_block(stream, max_size) {
        Block::Complete(raw) => Ok(into_text(raw)),
        Block::Exhausted => Err(AppError::ConnectionClosed),
        Block::Oversized => Err(AppError::HeadersTooLarge(max_size)),
    }
}

enum Block {
    Complete(Vec<u8>),
    Exhausted,
    Oversized,
}

fn collect_block<S: WaitSource>(stream: &mut ByteStream<S>, max_size: usize) -> Block {
    let mut raw = Vec::with_capacity(512);
    let mut newlines = 0;

    while newlines < 2 {
        let Some(byte) = stream.read_byte() else {
            debug!("Header block abandoned after {} bytes", raw.len());
            return Block::Exhausted;
        };

        match byte {
            b'\r' => continue,
            b'\n' => newlines += 1,
            _ => newlines = 0,
        }
        if raw.len() == max_size {
            debug!("Header block exceeds {max_size} bytes");
            return Block::Oversized;
        }
        raw.push(byte);
    }

    trace!("Read header block of {} bytes", raw.len());
    Block::Complete(raw)
}

fn into_text(raw: Vec<u8>) -> String {
    match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
