// SPDX-License-Identifier: MIT

//! Native function table exposed to the scripting host.
//!
//! Every function follows the host's calling convention: a slice of opaque
//! [`Value`]s in, one [`Value`] out, or an error the host rethrows into the
//! script. Argument mistakes (wrong arity, wrong type, unknown handles) are
//! errors. Running out of data is not: it comes back as a sentinel value
//! (`-1`, `null` or `false`) that the script is expected to check.
//!
//! Sockets are registered with the [`Host`] by the acceptance layer and stay
//! owned by it. `closeStream` drops the stream's buffer only; the connection is
//! shut down by [`Host::close_descriptor`].

use crate::error::AppError;
use crate::headers::read_headers;
use crate::multipart::read_mime;
use crate::request::read_post;
use crate::stream::{ByteStream, DEFAULT_WAIT, WaitSource};
use log::{debug, trace};
use std::collections::HashMap;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Opaque value crossing the host boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Stream(StreamHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u32);

/// A socket shared between the descriptor table and the streams reading it.
#[derive(Debug, Clone)]
pub struct SharedSocket(Arc<TcpStream>);

impl Read for SharedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.0).read(buf)
    }
}

impl WaitSource for SharedSocket {
    fn set_wait(&mut self, wait: Duration) -> io::Result<()> {
        self.0.set_read_timeout(Some(wait))
    }
}

pub type NativeFn = fn(&mut Host, &[Value]) -> Result<Value, AppError>;

const NATIVES: &[(&str, NativeFn)] = &[
    ("openStream", open_stream),
    ("closeStream", close_stream),
    ("readByte", read_byte),
    ("readHeaders", read_headers_native),
    ("readPost", read_post_native),
    ("readMime", read_mime_native),
];

/// Descriptor and stream tables for one worker.
pub struct Host {
    descriptors: HashMap<i64, SharedSocket>,
    streams: HashMap<StreamHandle, ByteStream<SharedSocket>>,
    next_descriptor: i64,
    next_stream: u32,
    wait: Duration,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    pub fn new() -> Self {
        Self::with_wait(DEFAULT_WAIT)
    }

    /// Streams opened by this host use `wait` as their bounded wait.
    pub fn with_wait(wait: Duration) -> Self {
        Self {
            descriptors: HashMap::new(),
            streams: HashMap::new(),
            next_descriptor: 3,
            next_stream: 1,
            wait,
        }
    }

    /// Names of all registered native functions.
    pub fn functions() -> impl Iterator<Item = &'static str> {
        NATIVES.iter().map(|(name, _)| *name)
    }

    /// Hand an accepted connection to the host and get its descriptor.
    pub fn register_descriptor(&mut self, socket: TcpStream) -> i64 {
        let fd = self.next_descriptor;
        self.next_descriptor += 1;
        self.descriptors.insert(fd, SharedSocket(Arc::new(socket)));
        trace!("Registered descriptor {fd}");
        fd
    }

    /// Shut the connection down and forget the descriptor. Streams still open
    /// on it will report no data from then on.
    pub fn close_descriptor(&mut self, fd: i64) -> bool {
        match self.descriptors.remove(&fd) {
            Some(socket) => {
                if let Err(e) = socket.0.shutdown(Shutdown::Both) {
                    debug!("Shutdown of descriptor {fd} failed: {e}");
                }
                true
            }
            None => false,
        }
    }

    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// Look up `name` and apply it to `args`.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, AppError> {
        let native = NATIVES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| *f)
            .ok_or_else(|| AppError::UnknownFunction(name.to_string()))?;
        trace!("Calling native {name} with {} args", args.len());
        native(self, args)
    }

    fn stream(&mut self, handle: StreamHandle) -> Result<&mut ByteStream<SharedSocket>, AppError> {
        self.streams
            .get_mut(&handle)
            .ok_or_else(|| AppError::invalid_argument(format!("unknown stream {}", handle.0)))
    }
}

fn expect_arity(name: &str, args: &[Value], arity: usize) -> Result<(), AppError> {
    if args.len() != arity {
        return Err(AppError::invalid_argument(format!(
            "{name} takes {arity} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn handle_arg(args: &[Value], idx: usize) -> Result<StreamHandle, AppError> {
    match args.get(idx) {
        Some(Value::Stream(handle)) => Ok(*handle),
        other => Err(AppError::invalid_argument(format!(
            "argument {idx} must be a stream, got {other:?}"
        ))),
    }
}

fn size_arg(args: &[Value], idx: usize) -> Result<usize, AppError> {
    match args.get(idx) {
        Some(Value::Int(n)) if *n >= 0 => usize::try_from(*n)
            .map_err(|_| AppError::invalid_argument(format!("size {n} out of range"))),
        other => Err(AppError::invalid_argument(format!(
            "argument {idx} must be a non-negative integer, got {other:?}"
        ))),
    }
}

fn open_stream(host: &mut Host, args: &[Value]) -> Result<Value, AppError> {
    expect_arity("openStream", args, 1)?;
    let fd = match &args[0] {
        Value::Int(fd) => *fd,
        other => {
            return Err(AppError::invalid_argument(format!(
                "descriptor must be an integer, got {other:?}"
            )));
        }
    };
    let socket = host
        .descriptors
        .get(&fd)
        .cloned()
        .ok_or_else(|| AppError::invalid_argument(format!("unknown descriptor {fd}")))?;

    let handle = StreamHandle(host.next_stream);
    host.next_stream += 1;
    host.streams
        .insert(handle, ByteStream::with_wait(socket, host.wait));
    debug!("Opened stream {} on descriptor {fd}", handle.0);
    Ok(Value::Stream(handle))
}

fn close_stream(host: &mut Host, args: &[Value]) -> Result<Value, AppError> {
    expect_arity("closeStream", args, 1)?;
    let handle = handle_arg(args, 0)?;
    let mut stream = host
        .streams
        .remove(&handle)
        .ok_or_else(|| AppError::invalid_argument(format!("unknown stream {}", handle.0)))?;
    stream.close();
    debug!("Closed stream {}", handle.0);
    Ok(Value::Undefined)
}

fn read_byte(host: &mut Host, args: &[Value]) -> Result<Value, AppError> {
    expect_arity("readByte", args, 1)?;
    let stream = host.stream(handle_arg(args, 0)?)?;
    Ok(Value::Int(stream.read_byte().map_or(-1, i64::from)))
}

fn read_headers_native(host: &mut Host, args: &[Value]) -> Result<Value, AppError> {
    expect_arity("readHeaders", args, 1)?;
    let stream = host.stream(handle_arg(args, 0)?)?;
    Ok(read_headers(stream).map_or(Value::Null, Value::Text))
}

fn read_post_native(host: &mut Host, args: &[Value]) -> Result<Value, AppError> {
    expect_arity("readPost", args, 2)?;
    let size = size_arg(args, 1)?;
    let stream = host.stream(handle_arg(args, 0)?)?;
    match read_post(stream, size) {
        Ok(text) => Ok(Value::Text(text)),
        Err(e) => {
            debug!("readPost failed: {e}");
            Ok(Value::Bool(false))
        }
    }
}

fn read_mime_native(host: &mut Host, args: &[Value]) -> Result<Value, AppError> {
    expect_arity("readMime", args, 3)?;
    let size = size_arg(args, 1)?;
    let boundary = match &args[2] {
        Value::Text(boundary) => boundary.clone(),
        other => {
            return Err(AppError::invalid_argument(format!(
                "boundary must be text, got {other:?}"
            )));
        }
    };
    let stream = host.stream(handle_arg(args, 0)?)?;
    match read_mime(stream, size, &boundary) {
        Ok(text) => Ok(Value::Text(text)),
        Err(AppError::ShortRead { expected, received }) => {
            debug!("readMime got {received} of {expected} bytes");
            Ok(Value::Null)
        }
        Err(e) => Err(e),
    }
}
