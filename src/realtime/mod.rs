//! Real-time delivery: event frames, bidirectional events, and server push.
//!
//! - [`EventFrame`] is the text framing used for pushed events.
//! - [`EventKind`] / [`InboundEvent`] describe what a handler sees once a
//!   connection switched to bidirectional-event mode.
//! - [`EventEjector`] keeps a context's response open and pushes frames down it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::context::Context;
use crate::http::Response;
use crate::transport::Outbound;

/// Kind of a signal delivered to an event-mode handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Message => "MESSAGE",
            Self::Close => "CLOSE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound event as stored on an event-stream context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub payload: Option<String>,
}

/// A pushed event.
///
/// Encodes to the standard server-push framing: optional `id:` and `event:`
/// lines, one `data:` line per line of data, an optional `retry:` line, and a
/// terminating blank line.
///
/// # Examples
///
/// ```
/// use gale::realtime::EventFrame;
///
/// let frame = EventFrame::new("line one\nline two").id("7").event("tick");
/// assert_eq!(
///     frame.encode(),
///     "id: 7\nevent: tick\ndata: line one\ndata: line two\n\n"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFrame {
    id: Option<String>,
    event: Option<String>,
    data: String,
    retry: Option<u64>,
}

impl EventFrame {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the event name.
    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Sets the reconnection hint in milliseconds.
    #[must_use]
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub fn event_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn retry_hint(&self) -> Option<u64> {
        self.retry
    }

    /// Renders the frame in wire format.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(id) = &self.id {
            out.push_str(&format!("id: {}\n", single_line(id)));
        }
        if let Some(event) = &self.event {
            out.push_str(&format!("event: {}\n", single_line(event)));
        }
        for line in self.data.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            out.push_str(&format!("data: {line}\n"));
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {retry}\n"));
        }
        out.push('\n');
        out
    }
}

// A newline inside `id` or `event` would start a new field.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// One-shot completion flag shared with the transport's close notification.
///
/// Only ever moves from `false` to `true`, so readers on any thread can poll
/// it without a lock.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    done: Arc<AtomicBool>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the flag. Returns `true` only for the call that performed the
    /// transition.
    pub fn complete(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Pushes a sequence of frames over a context's held-open response.
///
/// Opening an ejector writes the stream head; each [`send`](Self::send)
/// writes one frame immediately, with no buffering. The completion flag is
/// set by a watcher task once the transport reports its write side closed.
pub struct EventEjector {
    context: Context,
    completion: Completion,
    default_retry: Option<u64>,
}

impl EventEjector {
    /// Writes the stream head for `context` and starts watching for closure.
    ///
    /// The watcher needs a tokio runtime; outside one the flag can still be
    /// flipped through [`EventEjector::completion`].
    pub fn open(context: &Context) -> Self {
        let completion = Completion::new();

        let mut head = Response::stream_head();
        head.extend_headers(&context.take_staged_headers());
        context.emit_stream_head(head);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let closed = context.transport().closed();
                let flag = completion.clone();
                runtime.spawn(async move {
                    closed.await;
                    if flag.complete() {
                        debug!("push stream finished");
                    }
                });
            }
            Err(_) => warn!("no tokio runtime; push completion will not be tracked"),
        }

        Self {
            context: context.clone(),
            completion,
            default_retry: context.push_retry_ms(),
        }
    }

    /// Writes `frame` to the connection right away.
    ///
    /// Returns `false` if the frame was dropped because the stream already
    /// completed or the context is closed.
    pub fn send(&self, frame: EventFrame) -> bool {
        if self.completion.is_complete() || self.context.is_closed() {
            debug!("push frame dropped on finished stream");
            return false;
        }
        let frame = match (frame.retry, self.default_retry) {
            (None, Some(retry)) => frame.retry(retry),
            _ => frame,
        };
        match self.context.transport().send(Outbound::Event(frame)) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "push frame not written");
                false
            }
        }
    }

    /// Returns `true` once the underlying write channel finished.
    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }

    /// The flag the transport notification sets.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}
