//! # Streaming Writer Module
//!
//! Queues rendered fragments per page and drains them into the response while
//! respecting HTTP header/body ordering and completion semantics.
//!
//! ## Ordering
//!
//! Output ordering equals `write` call ordering: fragments enter a FIFO queue
//! and a single consumer drains it on flush. Render completion timing never
//! reorders output — a caller that wants deterministic fragment order simply
//! writes pagelet N before writing pagelet N+1.
//!
//! ## Completion
//!
//! `end` closes the response at most once. It refuses to close while fewer
//! pagelet fragments have been flushed than there are enabled pagelets, and
//! an explicit error preempts normal completion so the dispatcher can route
//! to the 500 fallback page.
//!
//! ## Backpressure
//!
//! The queue is bounded (`PAGEPIPE_QUEUE_BOUND`, default 1024). Once full,
//! `write` returns [`WriteError::QueueFull`] to the producer; nothing is
//! dropped silently and no coroutine blocks on a slow client.

use crate::page::{Page, PageState};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What a queued fragment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// The page shell; does not count toward pagelet completion.
    Shell,
    /// One rendered pagelet.
    Pagelet,
}

/// One unit of output, already encoded for the wire.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Pagelet name, for logging and completion accounting.
    pub pagelet: Option<Arc<str>>,
    pub bytes: Vec<u8>,
}

impl Fragment {
    pub fn shell(markup: impl Into<Vec<u8>>) -> Self {
        Fragment {
            kind: FragmentKind::Shell,
            pagelet: None,
            bytes: markup.into(),
        }
    }

    /// Encode a pagelet arrival as the inline `<script>` envelope used by
    /// streaming HTML responses.
    pub fn pagelet(name: &str, wire_id: &str, markup: Option<&str>, data: &Value) -> Self {
        let payload = Self::envelope(name, wire_id, markup, data);
        let bytes = format!("<script data-pagelet=\"{name}\">pagepipe.arrive({payload});</script>\n")
            .into_bytes();
        Fragment {
            kind: FragmentKind::Pagelet,
            pagelet: Some(Arc::from(name)),
            bytes,
        }
    }

    /// The JSON arrival payload shared by streamed and live-pushed fragments.
    ///
    /// `</` is escaped so the payload can never terminate its carrying
    /// `<script>` element early.
    pub fn envelope(name: &str, wire_id: &str, markup: Option<&str>, data: &Value) -> String {
        serde_json::json!({
            "name": name,
            "id": wire_id,
            "markup": markup,
            "data": data,
        })
        .to_string()
        .replace("</", "<\\/")
    }
}

/// Errors reported to fragment producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The response already finished or the page already ended.
    Finished,
    /// The bounded output queue is full; the client is draining too slowly.
    QueueFull,
    /// The page was reconfigured since the producer captured it.
    StalePage,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Finished => write!(f, "response already finished"),
            WriteError::QueueFull => write!(f, "output queue full"),
            WriteError::StalePage => write!(f, "page was reconfigured since capture"),
        }
    }
}

impl std::error::Error for WriteError {}

/// Result of [`StreamWriter::end`].
#[derive(Debug)]
pub enum EndOutcome {
    /// The page already ended; nothing happened.
    AlreadyEnded,
    /// Enabled pagelets are still pending; the response stays open.
    Pending,
    /// The response was flushed and closed.
    Closed,
    /// An error preempted completion; the dispatcher routes to the 500
    /// fallback page. The page is marked ended but the sink stays open for
    /// the fallback content.
    Failed(anyhow::Error),
}

/// The single consumer that drains page output queues.
#[derive(Debug, Clone, Copy)]
pub struct StreamWriter {
    queue_bound: usize,
}

impl Default for StreamWriter {
    fn default() -> Self {
        StreamWriter { queue_bound: 1024 }
    }
}

impl StreamWriter {
    pub fn new(queue_bound: usize) -> Self {
        StreamWriter { queue_bound }
    }

    /// Append `fragment` to the page's output queue and attempt a flush.
    ///
    /// The flush attempt only emits when the gate is already open; writes
    /// before the shell has opened the gate simply queue up.
    pub fn write(&self, page: &mut Page, fragment: Fragment) -> Result<(), WriteError> {
        if page.ended || page.sink().map(|s| s.finished()).unwrap_or(true) {
            return Err(WriteError::Finished);
        }
        if page.queue.len() >= self.queue_bound {
            warn!(
                page = %page.id,
                bound = self.queue_bound,
                "Output queue full, write rejected"
            );
            return Err(WriteError::QueueFull);
        }
        debug!(
            page = %page.id,
            kind = ?fragment.kind,
            pagelet = fragment.pagelet.as_deref(),
            bytes = fragment.bytes.len(),
            "Fragment queued"
        );
        page.queue.push_back(fragment);
        let _ = self.flush(page, None);
        Ok(())
    }

    /// `write`, guarded by the generation captured when the producer started.
    ///
    /// A render callback that outlives its request observes a bumped
    /// generation here and gets [`WriteError::StalePage`] instead of writing
    /// into a reused page.
    pub fn write_if_current(
        &self,
        page: &mut Page,
        expected_generation: u64,
        fragment: Fragment,
    ) -> Result<(), WriteError> {
        if page.generation != expected_generation {
            warn!(
                page = %page.id,
                expected = expected_generation,
                actual = page.generation,
                "Stale producer write discarded"
            );
            return Err(WriteError::StalePage);
        }
        self.write(page, fragment)
    }

    /// Drain the queue into the response sink.
    ///
    /// `set_gate` adjusts the flush gate first; emission only happens while
    /// the gate is open and the queue is non-empty. Returns the number of
    /// fragments drained.
    pub fn flush(&self, page: &mut Page, set_gate: Option<bool>) -> usize {
        if let Some(gate) = set_gate {
            page.flushing = gate;
        }
        if !page.flushing || page.queue.is_empty() {
            return 0;
        }
        let sink = match page.sink() {
            Some(sink) => Arc::clone(sink),
            None => return 0,
        };
        let mut drained: VecDeque<Fragment> = std::mem::take(&mut page.queue);
        let mut count = 0;
        while let Some(fragment) = drained.pop_front() {
            if sink.finished() {
                warn!(page = %page.id, "Response finished mid-flush, remaining fragments dropped");
                page.ended = true;
                page.state = PageState::Ended;
                break;
            }
            if let Err(err) = sink.write(&fragment.bytes) {
                error!(page = %page.id, error = %err, "Sink write failed, ending page");
                page.ended = true;
                page.state = PageState::Ended;
                break;
            }
            if fragment.kind == FragmentKind::Pagelet {
                page.flushed += 1;
            }
            count += 1;
        }
        if count > 0 {
            debug!(page = %page.id, fragments = count, flushed_total = page.flushed, "Flush drained");
        }
        count
    }

    /// Try to complete the response.
    ///
    /// See [`EndOutcome`] for the four possible results. The sink is closed
    /// at most once across any number of `end` calls.
    pub fn end(&self, page: &mut Page, error: Option<anyhow::Error>) -> EndOutcome {
        let sink_finished = page.sink().map(|s| s.finished()).unwrap_or(true);
        if page.ended || sink_finished {
            return EndOutcome::AlreadyEnded;
        }
        if let Some(err) = error {
            page.ended = true;
            page.state = PageState::Ended;
            return EndOutcome::Failed(err);
        }
        if page.flushed < page.enabled.len() {
            debug!(
                page = %page.id,
                flushed = page.flushed,
                enabled = page.enabled.len(),
                "End requested with fragments pending"
            );
            return EndOutcome::Pending;
        }
        let _ = self.flush(page, Some(true));
        if let Some(sink) = page.sink() {
            let sink = Arc::clone(sink);
            if let Err(err) = sink.end() {
                error!(page = %page.id, error = %err, "Sink close failed");
            }
        }
        page.ended = true;
        page.state = PageState::Ended;
        debug!(page = %page.id, flushed = page.flushed, "Page ended");
        EndOutcome::Closed
    }
}
