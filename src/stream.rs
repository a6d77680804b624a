// SPDX-License-Identifier: MIT

//! Buffered, timeout-bounded byte reader over a connected socket.
//!
//! A [`ByteStream`] owns a fixed 4096-byte refill buffer and nothing else: the
//! socket it reads from belongs to the caller and is never shut down here. Every
//! refill is a single bounded wait followed by one bulk read, so one system
//! call can serve up to 4096 subsequent [`ByteStream::read_byte`] calls.
//!
//! Failures never surface as errors. A timeout, an I/O error, an interrupted
//! wait and an orderly peer close all collapse into "no data" (`None`), and the
//! next call simply tries again with a fresh bounded wait.

use log::{debug, trace};
use std::io::{self, Cursor, ErrorKind, Read};
use std::net::TcpStream;
use std::time::Duration;

/// Size of the internal refill buffer
pub const BUFFER_CAPACITY: usize = 4096;

/// Default bound on how long a refill waits for the socket to become readable
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// A readable source whose reads can be bounded in time.
///
/// For sockets the bound is the read timeout; in-memory sources never block
/// and ignore it.
pub trait WaitSource: Read {
    fn set_wait(&mut self, wait: Duration) -> io::Result<()>;
}

impl WaitSource for TcpStream {
    fn set_wait(&mut self, wait: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(wait))
    }
}

impl WaitSource for &TcpStream {
    fn set_wait(&mut self, wait: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(wait))
    }
}

impl<T: AsRef<[u8]>> WaitSource for Cursor<T> {
    fn set_wait(&mut self, _wait: Duration) -> io::Result<()> {
        Ok(())
    }
}

impl WaitSource for &[u8] {
    fn set_wait(&mut self, _wait: Duration) -> io::Result<()> {
        Ok(())
    }
}

/// Unread input of one live connection.
///
/// Invariant: `cursor <= filled <= BUFFER_CAPACITY`. Bytes before `cursor`
/// have been handed out and are never returned again.
#[derive(Debug)]
pub struct ByteStream<S> {
    source: S,
    buffer: Option<Box<[u8]>>,
    cursor: usize,
    filled: usize,
    wait: Duration,
    wait_applied: bool,
}

impl<S: WaitSource> ByteStream<S> {
    /// Wrap an already-connected source. Performs no I/O and never fails.
    pub fn open(source: S) -> Self {
        Self::with_wait(source, DEFAULT_WAIT)
    }

    /// Wrap a source with a custom bounded wait per refill.
    pub fn with_wait(source: S, wait: Duration) -> Self {
        Self {
            source,
            buffer: Some(vec![0u8; BUFFER_CAPACITY].into_boxed_slice()),
            cursor: 0,
            filled: 0,
            wait,
            wait_applied: false,
        }
    }

    /// Next unread byte, or `None` when no data arrived within the bounded wait.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.cursor >= self.filled && !self.refill() {
            return None;
        }
        let byte = self.buffer.as_ref()?[self.cursor];
        self.cursor += 1;
        Some(byte)
    }

    /// Read up to `count` bytes, stopping at the first refill that yields no data.
    ///
    /// The returned vector holds the bytes actually obtained, which may be
    /// fewer than `count`. Returns `None` only when `count` is nonzero and not
    /// a single byte could be read.
    pub fn read_bytes(&mut self, count: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(count.min(BUFFER_CAPACITY * 16));

        while out.len() < count {
            if self.cursor >= self.filled && !self.refill() {
                break;
            }
            let buffer = match self.buffer.as_ref() {
                Some(buffer) => buffer,
                None => break,
            };
            let take = (count - out.len()).min(self.filled - self.cursor);
            out.extend_from_slice(&buffer[self.cursor..self.cursor + take]);
            self.cursor += take;
        }

        if count > 0 && out.is_empty() {
            return None;
        }
        if out.len() < count {
            debug!("Short read: wanted {count} bytes, got {}", out.len());
        }
        Some(out)
    }

    /// Number of bytes already buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.filled - self.cursor
    }

    /// The bound applied to each refill.
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Release the internal buffer. The source is left untouched; any read
    /// after closing reports no data.
    pub fn close(&mut self) {
        if self.buffer.take().is_some() {
            trace!("Stream closed with {} unread bytes", self.buffered());
        }
        self.cursor = 0;
        self.filled = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.is_none()
    }

    /// Hand the source back to the caller, discarding any unread bytes.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// One bounded wait plus one bulk read. No retries.
    fn refill(&mut self) -> bool {
        let Some(buffer) = self.buffer.as_mut() else {
            return false;
        };

        if !self.wait_applied {
            if let Err(e) = self.source.set_wait(self.wait) {
                debug!("Could not bound wait to {:?}: {e}", self.wait);
                return false;
            }
            self.wait_applied = true;
        }

        match self.source.read(buffer) {
            Ok(0) => {
                trace!("Peer closed the connection");
                false
            }
            Ok(n) => {
                trace!("Refilled stream buffer with {n} bytes");
                self.cursor = 0;
                self.filled = n;
                true
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                debug!("No data within {:?}", self.wait);
                false
            }
            Err(e) => {
                debug!("Stream read failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed script of read outcomes, one per `read` call.
    struct Scripted {
        steps: VecDeque<io::Result<Vec<u8>>>,
        reads: usize,
        waits: Vec<Duration>,
    }

    impl Scripted {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
                reads: 0,
                waits: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            match self.steps.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    impl WaitSource for Scripted {
        fn set_wait(&mut self, wait: Duration) -> io::Result<()> {
            self.waits.push(wait);
            Ok(())
        }
    }

    #[test]
    fn test_wait_applied_once_before_first_read() {
        let wait = Duration::from_millis(250);
        let mut stream = ByteStream::with_wait(
            Scripted::new(vec![Ok(b"a".to_vec()), Ok(b"b".to_vec())]),
            wait,
        );
        assert_eq!(stream.wait(), wait);
        assert!(stream.source.waits.is_empty());

        assert_eq!(stream.read_byte(), Some(b'a'));
        assert_eq!(stream.read_byte(), Some(b'b'));
        assert_eq!(stream.source.waits, [wait]);
        assert_eq!(ByteStream::open(Cursor::new(Vec::<u8>::new())).wait(), DEFAULT_WAIT);
    }

    #[test]
    fn test_read_byte_in_order() {
        let mut stream = ByteStream::open(Cursor::new(b"abc".to_vec()));
        assert_eq!(stream.read_byte(), Some(b'a'));
        assert_eq!(stream.read_byte(), Some(b'b'));
        assert_eq!(stream.read_byte(), Some(b'c'));
        assert_eq!(stream.read_byte(), None);
        assert_eq!(stream.read_byte(), None);
    }

    #[test]
    fn test_single_read_serves_whole_buffer() {
        let chunk = vec![7u8; BUFFER_CAPACITY];
        let mut stream = ByteStream::open(Scripted::new(vec![Ok(chunk)]));

        for _ in 0..BUFFER_CAPACITY {
            assert_eq!(stream.read_byte(), Some(7));
        }
        assert_eq!(stream.source.reads, 1);
        assert_eq!(stream.read_byte(), None);
        assert_eq!(stream.source.reads, 2);
    }

    #[test]
    fn test_timeout_is_no_data_then_retry() {
        let mut stream = ByteStream::open(Scripted::new(vec![
            Err(io::Error::from(ErrorKind::WouldBlock)),
            Err(io::Error::from(ErrorKind::TimedOut)),
            Ok(b"x".to_vec()),
        ]));

        assert_eq!(stream.read_byte(), None);
        assert_eq!(stream.read_byte(), None);
        assert_eq!(stream.read_byte(), Some(b'x'));
        assert_eq!(stream.source.reads, 3);
    }

    #[test]
    fn test_interrupted_is_not_retried() {
        let mut stream = ByteStream::open(Scripted::new(vec![
            Err(io::Error::from(ErrorKind::Interrupted)),
            Ok(b"y".to_vec()),
        ]));

        assert_eq!(stream.read_byte(), None);
        assert_eq!(stream.source.reads, 1);
        assert_eq!(stream.read_byte(), Some(b'y'));
    }

    #[test]
    fn test_read_bytes_across_refills() {
        let mut stream = ByteStream::open(Scripted::new(vec![
            Ok(b"hello ".to_vec()),
            Ok(b"world".to_vec()),
        ]));

        assert_eq!(stream.read_bytes(11).unwrap(), b"hello world");
        assert_eq!(stream.buffered(), 0);
    }

    #[test]
    fn test_read_bytes_partial_and_empty() {
        let mut stream = ByteStream::open(Cursor::new(b"abcd".to_vec()));
        assert_eq!(stream.read_bytes(0).unwrap(), b"");
        assert_eq!(stream.read_bytes(10).unwrap(), b"abcd");
        assert!(stream.read_bytes(1).is_none());
    }

    #[test]
    fn test_read_bytes_leaves_rest_buffered() {
        let mut stream = ByteStream::open(Cursor::new(b"headerBODY".to_vec()));
        assert_eq!(stream.read_bytes(6).unwrap(), b"header");
        assert_eq!(stream.buffered(), 4);
        assert_eq!(stream.read_byte(), Some(b'B'));
    }

    #[test]
    fn test_close_releases_buffer_keeps_source() {
        let mut stream = ByteStream::open(Cursor::new(b"abc".to_vec()));
        assert_eq!(stream.read_byte(), Some(b'a'));
        stream.close();
        assert!(stream.is_closed());
        assert_eq!(stream.read_byte(), None);
        assert!(stream.read_bytes(2).is_none());

        let source = stream.into_inner();
        assert_eq!(source.get_ref(), b"abc");
    }
}
