//! Per-connection context: request data plus response-writing capability.
//!
//! One [`Context`] type covers every variant; the [`ContextVariant`]
//! discriminant decides which capabilities answer:
//!
//! | Variant       | Path variables | Body binding | Inbound events | Cacheable |
//! |---------------|----------------|--------------|----------------|-----------|
//! | `Empty`       | no             | no           | no             | no        |
//! | `Simple`      | yes            | no           | no             | no        |
//! | `Enhanced`    | yes            | yes          | no             | no        |
//! | `EventStream` | yes            | no           | yes            | yes       |
//!
//! A context is a cheap handle: clones share the same state, and
//! [`Context::ptr_eq`] tells whether two handles are the same instance.
//! It moves from open to closed exactly once; every write after that is
//! dropped silently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::http::{APPLICATION_JSON, Headers, Request, Response, StatusCode, TEXT_PLAIN};
use crate::realtime::{EventKind, InboundEvent};
use crate::transport::{Outbound, Transport};

mod binding;

pub use binding::Validate;

/// Capability tag of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextVariant {
    /// No route matched.
    Empty,
    /// Request data and response writing only.
    Simple,
    /// Adds JSON body decoding and validation.
    Enhanced,
    /// Adds inbound event type and payload for bidirectional-event mode.
    EventStream,
}

impl ContextVariant {
    /// Whether contexts of this variant are kept for later messages on the
    /// same connection.
    pub fn is_cacheable(self) -> bool {
        matches!(self, Self::EventStream)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Simple => "simple",
            Self::Enhanced => "enhanced",
            Self::EventStream => "event-stream",
        }
    }
}

impl fmt::Display for ContextVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// One HTTP response per request message.
    Request,
    /// Every write is an outbound event-mode message.
    Event,
}

struct State {
    request: Arc<Request>,
    mode: WriteMode,
    // A response was already written for the current request message.
    committed: bool,
    inbound: Option<InboundEvent>,
    staged: Headers,
}

struct Inner {
    variant: ContextVariant,
    cacheable: bool,
    closed: AtomicBool,
    transport: Arc<dyn Transport>,
    push_retry_ms: Option<u64>,
    state: Mutex<State>,
}

/// Request data and write capability for one connection.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Builds an open context of `variant` around `request`.
    pub fn new(variant: ContextVariant, request: Request, transport: Arc<dyn Transport>) -> Self {
        Self::with_retry(variant, request, transport, None)
    }

    pub(crate) fn with_retry(
        variant: ContextVariant,
        request: Request,
        transport: Arc<dyn Transport>,
        push_retry_ms: Option<u64>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                variant,
                cacheable: variant.is_cacheable(),
                closed: AtomicBool::new(false),
                transport,
                push_retry_ms,
                state: Mutex::new(State {
                    request: Arc::new(request),
                    mode: WriteMode::Request,
                    committed: false,
                    inbound: None,
                    staged: Headers::new(),
                }),
            }),
        }
    }

    pub fn variant(&self) -> ContextVariant {
        self.inner.variant
    }

    pub fn is_cacheable(&self) -> bool {
        self.inner.cacheable
    }

    /// Returns `true` if both handles refer to the same context instance.
    pub fn ptr_eq(a: &Context, b: &Context) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// The request message currently bound to this context.
    pub fn request(&self) -> Arc<Request> {
        Arc::clone(&self.inner.state.lock().request)
    }

    /// First value of a query parameter.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.request().query_param(name).map(str::to_owned)
    }

    /// Every value of a query parameter, in request order.
    pub fn parameters(&self, name: &str) -> Vec<String> {
        self.request().query_params(name).to_vec()
    }

    /// Variables bound by the matched route. Always empty on `Empty` contexts.
    pub fn path_variables(&self) -> HashMap<String, String> {
        if self.variant() == ContextVariant::Empty {
            return HashMap::new();
        }
        self.request().path_variables().clone()
    }

    pub fn path_variable(&self, name: &str) -> Option<String> {
        if self.variant() == ContextVariant::Empty {
            return None;
        }
        self.request().path_variables().get(name).cloned()
    }

    /// Raw body text, if the request carried one.
    pub fn body(&self) -> Option<String> {
        self.request().body().map(str::to_owned)
    }

    /// Type of the event being delivered. `None` outside event-stream contexts
    /// or before any event arrived.
    pub fn inbound_event(&self) -> Option<EventKind> {
        self.inbound().map(|event| event.kind)
    }

    /// Payload of the event being delivered, if it carried one.
    pub fn inbound_payload(&self) -> Option<String> {
        self.inbound().and_then(|event| event.payload)
    }

    fn inbound(&self) -> Option<InboundEvent> {
        if self.variant() != ContextVariant::EventStream {
            return None;
        }
        self.inner.state.lock().inbound.clone()
    }

    /// Stages a header for the next response written on this context.
    pub fn set_response_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.state.lock().staged.insert(name, value);
    }

    /// Writes a plain-text payload.
    pub fn write_text(&self, status: StatusCode, text: impl Into<String>) {
        self.write(status, TEXT_PLAIN, text);
    }

    /// Serializes `value` as JSON and writes it.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Json`] if `value` cannot be serialized. Nothing is
    /// written in that case.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        status: StatusCode,
        value: &T,
    ) -> Result<(), HandlerError> {
        if self.is_closed() {
            debug!(variant = %self.variant(), "write suppressed on closed context");
            return Ok(());
        }
        let payload = serde_json::to_string(value)?;
        self.write(status, APPLICATION_JSON, payload);
        Ok(())
    }

    /// Writes `payload` with the given status and content type.
    ///
    /// In request mode only the first write of each request message reaches
    /// the transport. In event mode each write is one outbound message and the
    /// status and content type are not transmitted. Closed contexts drop
    /// every write.
    pub fn write(&self, status: StatusCode, content_type: &str, payload: impl Into<String>) {
        if self.is_closed() {
            debug!(variant = %self.variant(), "write suppressed on closed context");
            return;
        }

        let outbound = {
            let mut state = self.inner.state.lock();
            match state.mode {
                WriteMode::Event => Outbound::Message(payload.into()),
                WriteMode::Request => {
                    if state.committed {
                        warn!(
                            path = %state.request.path(),
                            "response already written for this request; write dropped"
                        );
                        return;
                    }
                    state.committed = true;
                    let mut response = Response::new(status)
                        .header("Content-Type", content_type)
                        .body(payload)
                        .keep_alive(state.request.is_keep_alive());
                    response.extend_headers(&std::mem::take(&mut state.staged));
                    Outbound::Response(response)
                }
            }
        };

        if let Err(e) = self.inner.transport.send(outbound) {
            debug!(error = %e, "transport rejected write");
        }
    }

    /// Closes the context. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(variant = %self.variant(), "context closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ── Dispatcher-side hooks ────────────────────────────────────────────────

    /// Binds the next request message to this (reused) context.
    pub(crate) fn rebind(&self, request: Request) {
        let mut state = self.inner.state.lock();
        state.request = Arc::new(request);
        state.committed = false;
        state.staged.clear();
    }

    /// Switches writes to event-mode messages.
    pub(crate) fn enter_event_mode(&self) {
        self.inner.state.lock().mode = WriteMode::Event;
    }

    /// Stores the event about to be delivered to the handler.
    pub(crate) fn set_inbound(&self, kind: EventKind, payload: Option<String>) {
        self.inner.state.lock().inbound = Some(InboundEvent { kind, payload });
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn push_retry_ms(&self) -> Option<u64> {
        self.inner.push_retry_ms
    }

    pub(crate) fn take_staged_headers(&self) -> Headers {
        std::mem::take(&mut self.inner.state.lock().staged)
    }

    /// Sends a push-stream head; counts as this message's response.
    pub(crate) fn emit_stream_head(&self, head: Response) {
        if self.is_closed() {
            return;
        }
        let head = {
            let mut state = self.inner.state.lock();
            state.committed = true;
            head.keep_alive(state.request.is_keep_alive())
        };
        if let Err(e) = self.inner.transport.send(Outbound::StreamOpen(head)) {
            debug!(error = %e, "transport rejected stream head");
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("variant", &self.inner.variant)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
