use crate::orchestration::Transport;
use may_minihttp::Response;
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Where the streaming writer drains a page's output.
///
/// The HTTP front end backs this with a per-exchange buffer; the
/// orchestration channel backs it with a live connection. The writer only
/// needs three operations from a response: write, end, and the `finished`
/// flag it must check before writing.
pub trait ResponseSink: Send + Sync {
    fn write(&self, chunk: &[u8]) -> io::Result<()>;
    fn end(&self) -> io::Result<()>;
    fn finished(&self) -> bool;
}

/// In-memory sink collecting the response body for one HTTP exchange.
#[derive(Default)]
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
    finished: AtomicBool,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().expect("buffer sink lock poisoned").clone()
    }

    /// Take the accumulated body, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock().expect("buffer sink lock poisoned"))
    }
}

impl ResponseSink for BufferSink {
    fn write(&self, chunk: &[u8]) -> io::Result<()> {
        if self.finished() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "response already finished",
            ));
        }
        self.buf
            .lock()
            .expect("buffer sink lock poisoned")
            .extend_from_slice(chunk);
        Ok(())
    }

    fn end(&self) -> io::Result<()> {
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Sink that forwards writes to a live connection as real-time payloads.
///
/// Ending a page over a live connection does not end the connection, so
/// `end` is a no-op and the sink never reports finished.
pub struct ChannelSink {
    transport: Arc<dyn Transport>,
}

impl ChannelSink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ChannelSink { transport }
    }
}

impl ResponseSink for ChannelSink {
    fn write(&self, chunk: &[u8]) -> io::Result<()> {
        self.transport.send(chunk).map_err(io::Error::other)
    }

    fn end(&self) -> io::Result<()> {
        Ok(())
    }

    fn finished(&self) -> bool {
        false
    }
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Write a streamed page body to the HTTP exchange.
pub fn write_page_response(res: &mut Response, status: u16, body: Vec<u8>) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: text/html; charset=utf-8");
    res.body_vec(body);
}

/// Write a JSON body to the HTTP exchange (infrastructure endpoints).
pub fn write_json(res: &mut Response, status: u16, body: Value) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: application/json");
    res.body_vec(body.to_string().into_bytes());
}

/// Write a plain-text body to the HTTP exchange (metrics exposition).
pub fn write_text(res: &mut Response, status: u16, body: String) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: text/plain; charset=utf-8");
    res.body_vec(body.into_bytes());
}
