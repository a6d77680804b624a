// SPDX-License-Identifier: MIT

//! Capture server: accepts connections on a worker pool, reads one request per
//! connection through the framing layer and echoes the captured text back.

use crate::config::Config;
use crate::error::AppError;
use crate::request::{Body, CapturedRequest, RequestLimits, read_request};
use crate::stream::ByteStream;
use log::{debug, error, info, trace, warn};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

const SERVER_HEADER: &str = concat!("mimewire/", env!("CARGO_PKG_VERSION"));
/// Unread request bytes discarded after an error response before closing
const DRAIN_LIMIT: usize = 64 * 1024;

/// Request counters shared by all workers.
#[derive(Debug)]
pub struct ServerStats {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub error_requests: AtomicU64,
    pub multipart_requests: AtomicU64,
    pub bytes_captured: AtomicU64,
    start_time: Instant,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            error_requests: AtomicU64::new(0),
            multipart_requests: AtomicU64::new(0),
            bytes_captured: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self, success: bool, bytes: u64) {
        trace!("Recording request: success={success}, bytes={bytes}");
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_captured.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_multipart(&self) {
        self.multipart_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// (total, successful, errors, multipart, bytes, uptime)
    pub fn get_stats(&self) -> (u64, u64, u64, u64, u64, Duration) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.successful_requests.load(Ordering::Relaxed),
            self.error_requests.load(Ordering::Relaxed),
            self.multipart_requests.load(Ordering::Relaxed),
            self.bytes_captured.load(Ordering::Relaxed),
            self.start_time.elapsed(),
        )
    }
}

/// Simple native thread pool implementation
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

impl ThreadPool {
    /// `size` must be at least 1; [`Config`] validation guarantees it.
    pub fn new(size: usize) -> ThreadPool {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|id| Worker::new(id, Arc::clone(&receiver)))
            .collect();

        ThreadPool {
            workers,
            sender: Some(sender),
        }
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(ref sender) = self.sender
            && sender.send(Box::new(f)).is_err()
        {
            warn!("Failed to send job to thread pool");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take()
                && thread.join().is_err()
            {
                warn!("Worker thread {} panicked", worker.id);
            }
        }
    }
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Worker {
        let thread = thread::spawn(move || {
            loop {
                // A poisoned lock means another worker died holding it; stop this one too.
                let message = match receiver.lock() {
                    Ok(rx) => rx.recv(),
                    Err(_) => break,
                };

                match message {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            }
        });

        Worker {
            id,
            thread: Some(thread),
        }
    }
}

/// Run the capture server until the process is killed.
pub fn run_server_with_config(config: Config) -> Result<(), AppError> {
    run_server(config, None, None)
}

pub fn run_server(
    config: Config,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    addr_tx: Option<mpsc::Sender<SocketAddr>>,
) -> Result<(), AppError> {
    debug!(
        "Starting server with configuration: verbose={}, detailed_logging={}",
        config.verbose, config.detailed_logging
    );

    let bind_address = format!("{}:{}", config.listen, config.port);
    debug!("Binding server to address: {bind_address}");
    let listener = TcpListener::bind(&bind_address)?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    if let Some(tx) = addr_tx
        && tx.send(local_addr).is_err()
    {
        return Err(AppError::InternalServerError(
            "Failed to send server address to test thread".to_string(),
        ));
    }

    info!(
        "Server listening on {local_addr} (wait timeout {}s, max header {} bytes, max body {} bytes)",
        config.wait_timeout.as_secs(),
        config.max_header_size,
        config.max_body_size
    );

    let stats = Arc::new(ServerStats::new());
    debug!("Creating thread pool with {} threads", config.threads);
    let pool = ThreadPool::new(config.threads);
    let wait = config.wait_timeout;
    let limits = config.request_limits();

    'server_loop: loop {
        if let Some(ref rx) = shutdown_rx
            && rx.try_recv().is_ok()
        {
            info!("Shutdown signal received. Shutting down gracefully.");
            break 'server_loop;
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                trace!("Accepted connection from: {peer_addr}");

                if let Err(e) = stream.set_nonblocking(false) {
                    error!("Failed to set stream to blocking mode: {e}");
                    continue;
                }

                let stats = stats.clone();
                pool.execute(move || {
                    if let Err(e) =
                        handle_client_with_stats(stream, peer_addr, wait, limits, &stats)
                    {
                        warn!("Client handling error: {e}");
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                error!("Error accepting connection: {e}");
            }
        }
    }

    // Join the workers before the final report so in-flight requests are counted.
    drop(pool);

    let (total, successful, errors, multipart, bytes, uptime) = stats.get_stats();
    info!(
        "Final Request Stats: {total} total ({successful} successful, {errors} errors, {multipart} multipart), {bytes} bytes captured, uptime: {}s",
        uptime.as_secs()
    );
    info!("Server shut down gracefully.");
    Ok(())
}

fn handle_client_with_stats(
    stream: TcpStream,
    peer_addr: SocketAddr,
    wait: Duration,
    limits: RequestLimits,
    stats: &ServerStats,
) -> Result<(), AppError> {
    let start = Instant::now();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        handle_client(stream, peer_addr, wait, limits, stats)
    }));

    let processing_time = start.elapsed();
    if processing_time > Duration::from_millis(1000) {
        warn!("[{peer_addr}] Slow request: {}ms", processing_time.as_millis());
    } else {
        debug!("[{peer_addr}] Request took {}ms", processing_time.as_millis());
    }

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("[{peer_addr}] Client handler panicked");
            stats.record_request(false, 0);
            Err(AppError::InternalServerError("Client handler panicked".to_string()))
        }
    }
}

/// Serve one connection: capture the request, answer, close.
pub fn handle_client(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    wait: Duration,
    limits: RequestLimits,
    stats: &ServerStats,
) -> Result<(), AppError> {
    let log_prefix = format!("[{peer_addr}]");

    let captured = {
        let mut reader = ByteStream::with_wait(&stream, wait);
        trace!("{log_prefix} Reading request, {:?} per read", reader.wait());
        read_request(&mut reader, limits)
    };

    match captured {
        Ok(request) => {
            if matches!(request.body, Body::Multipart { .. }) {
                stats.record_multipart();
            }
            info!(
                "{log_prefix} {} {} -> 200 OK",
                request.head.method, request.head.target
            );
            let body = render_capture(&request);
            let sent = send_response(&mut stream, 200, "OK", &body)?;
            stats.record_request(true, sent);
            Ok(())
        }
        Err(e) => {
            let (status_code, status_text) = e.status();
            // Framing failures are the client's doing; anything else is ours.
            if e.is_framing_error() {
                info!("{log_prefix} {status_code} {status_text}: {e}");
            } else {
                warn!("{log_prefix} {status_code} {status_text}: {e}");
            }
            stats.record_request(false, 0);
            match send_response(&mut stream, status_code, status_text, &format!("{e}\n")) {
                Ok(_) => drain_unread(&mut stream),
                // Peer may already be gone after a timeout; nothing else to do.
                Err(send_err) => debug!("{log_prefix} Failed to send error response: {send_err}"),
            }
            Ok(())
        }
    }
}

/// Half-close, then discard what the peer is still sending so closing the
/// socket does not reset the connection before the response is read.
/// Bounded by [`DRAIN_LIMIT`] and by the socket read timeout.
fn drain_unread(stream: &mut TcpStream) {
    if stream.shutdown(Shutdown::Write).is_err() {
        return;
    }
    let mut scratch = [0u8; 4096];
    let mut drained = 0;
    while drained < DRAIN_LIMIT {
        match stream.read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(n) => drained += n,
        }
    }
    trace!("Drained {drained} unread bytes");
}

/// Text echoed back for a captured request: header block as read, then the body.
pub fn render_capture(request: &CapturedRequest) -> String {
    let mut out = request.head.raw.clone();
    match &request.body {
        Body::None => {}
        Body::Text(text) => out.push_str(text),
        Body::Multipart { text, .. } => out.push_str(text),
    }
    out
}

fn send_response(
    stream: &mut TcpStream,
    status_code: u16,
    status_text: &str,
    body: &str,
) -> Result<u64, AppError> {
    let head = format!(
        "HTTP/1.1 {status_code} {status_text}\r\n\
         Server: {SERVER_HEADER}\r\n\
         Connection: close\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    stream.flush()?;
    Ok(body.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestHead;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_thread_pool_runs_all_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(3);
            for _ in 0..20 {
                let counter = counter.clone();
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_stats_counters() {
        let stats = ServerStats::new();
        stats.record_request(true, 10);
        stats.record_request(false, 0);
        stats.record_multipart();
        let (total, ok, errors, multipart, bytes, _) = stats.get_stats();
        assert_eq!((total, ok, errors, multipart, bytes), (2, 1, 1, 1, 10));
    }

    #[test]
    fn test_render_capture() {
        let head = RequestHead::parse("POST / HTTP/1.1\nContent-Length: 3\n\n").unwrap();
        let request = CapturedRequest {
            head,
            body: Body::Text("a=1".to_string()),
        };
        assert_eq!(
            render_capture(&request),
            "POST / HTTP/1.1\nContent-Length: 3\n\na=1"
        );
    }

    #[test]
    fn test_handle_client_timeout_answers_408() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server_side, peer) = listener.accept().unwrap();

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 50\r\n\r\nabc")
            .unwrap();

        let stats = ServerStats::new();
        let limits = RequestLimits {
            max_body_size: 1024,
            ..RequestLimits::default()
        };
        handle_client(server_side, peer, Duration::from_millis(200), limits, &stats).unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.contains("expected 50 bytes, received 3"));
        assert_eq!(stats.get_stats().2, 1);
    }
}
