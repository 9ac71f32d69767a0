//! Connection dispatcher: one per open connection.
//!
//! The dispatcher turns inbound signals into context selection, filtering and
//! handler execution:
//!
//! - [`Dispatcher::on_request`] for each complete request message,
//! - [`Dispatcher::on_bytes`] for transports that hand over raw socket data,
//! - [`Dispatcher::on_event`] for each event once the connection upgraded,
//! - [`Dispatcher::on_error`] / [`Dispatcher::on_close`] when the connection ends.
//!
//! It keeps at most one cached context (always an event-stream one) plus the
//! route it came from, and a [`ConnectionMode`] that only moves forward:
//! `Request → Event → Closed` or `Request → Closed`.
//!
//! All calls for one connection must be made sequentially; `&mut self`
//! enforces it.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, info, warn};

use crate::context::{Context, ContextVariant};
use crate::engine;
use crate::error::HandlerError;
use crate::http::{Headers, Request, RequestError, Response, StatusCode};
use crate::realtime::EventKind;
use crate::router::RouteEntry;
use crate::server::Shared;
use crate::transport::{Outbound, Transport};

/// Protocol mode of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// One request message, one response.
    Request,
    /// Upgraded: inbound signals are discrete events for the cached context.
    Event,
    /// Torn down; every further signal is ignored.
    Closed,
}

/// Returns `true` if `headers` ask to switch to `protocol`.
///
/// Requires an `Upgrade` header naming `protocol` and a `Connection` header
/// whose value includes `upgrade`; both checks are case-insensitive substring
/// matches.
///
/// # Examples
///
/// ```
/// use gale::dispatcher::is_upgrade_request;
/// use gale::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Upgrade", "EventStream");
/// headers.insert("Connection", "keep-alive, Upgrade");
/// assert!(is_upgrade_request(&headers, "eventstream"));
/// assert!(!is_upgrade_request(&headers, "websocket"));
/// ```
pub fn is_upgrade_request(headers: &Headers, protocol: &str) -> bool {
    headers.contains("upgrade")
        && headers.contains_token("connection", "upgrade")
        && headers.contains_token("upgrade", protocol)
}

struct Cached {
    context: Context,
    route: Arc<RouteEntry>,
}

/// Per-connection dispatch state.
pub struct Dispatcher {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    cached: Option<Cached>,
    mode: ConnectionMode,
    close_delivered: bool,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared,
            transport,
            cached: None,
            mode: ConnectionMode::Request,
            close_delivered: false,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// The context kept for later messages on this connection, if any.
    pub fn cached_context(&self) -> Option<&Context> {
        self.cached.as_ref().map(|cached| &cached.context)
    }

    /// Dispatches one complete request message.
    pub async fn on_request(&mut self, request: Request) {
        match self.mode {
            ConnectionMode::Request => {}
            ConnectionMode::Event => {
                warn!(path = %request.path(), "request message on upgraded connection ignored");
                return;
            }
            ConnectionMode::Closed => {
                debug!(path = %request.path(), "request on closed connection ignored");
                return;
            }
        }

        let found = self
            .shared
            .routes
            .resolve(request.method().clone(), request.path());
        debug!(
            method = %request.method(),
            path = %request.path(),
            pattern = found.as_ref().map(|m| m.entry.pattern()),
            "route resolved"
        );

        if self.cached.as_ref().is_some_and(|c| c.context.is_closed()) {
            debug!("closed cached context evicted");
            self.cached = None;
        }

        let (request, route) = match found {
            Some(found) => (
                request.with_path_variables(found.path_variables),
                Some(found.entry),
            ),
            None => (request, None),
        };
        let variant = route
            .as_ref()
            .map_or(ContextVariant::Empty, |entry| entry.variant());

        let ctx = self.select_context(variant, request, route.as_ref());
        let cached = self
            .cached
            .as_ref()
            .is_some_and(|c| Context::ptr_eq(&c.context, &ctx));

        let protocol = &self.shared.config.upgrade_protocol;
        if cached && is_upgrade_request(ctx.request().headers(), protocol) {
            self.upgrade(ctx).await;
            return;
        }

        if ctx.is_closed() {
            return;
        }
        if let Err(e) = self.shared.filters.run(&ctx).await {
            self.filter_failed(&ctx, e);
            return;
        }
        if ctx.is_closed() {
            debug!(path = %ctx.request().path(), "context closed by filter; handler skipped");
            return;
        }

        let handler = route.as_deref().map(RouteEntry::handler);
        engine::execute(handler, &ctx, &self.shared.exceptions).await;
    }

    // Reuses the cached context when the route asks for the same variant,
    // otherwise builds a fresh one and caches it if its variant allows.
    fn select_context(
        &mut self,
        variant: ContextVariant,
        request: Request,
        route: Option<&Arc<RouteEntry>>,
    ) -> Context {
        if let (Some(cached), Some(route)) = (self.cached.as_mut(), route) {
            if cached.context.variant() == variant {
                debug!(variant = %variant, "reusing cached context");
                cached.context.rebind(request);
                cached.route = Arc::clone(route);
                return cached.context.clone();
            }
        }

        let ctx = Context::with_retry(
            variant,
            request,
            Arc::clone(&self.transport),
            self.shared.config.push_retry_ms,
        );
        if let (true, Some(route)) = (ctx.is_cacheable(), route) {
            debug!(variant = %variant, "context cached for connection");
            self.cached = Some(Cached {
                context: ctx.clone(),
                route: Arc::clone(route),
            });
        }
        ctx
    }

    async fn upgrade(&mut self, ctx: Context) {
        if let Err(e) = self.shared.filters.run(&ctx).await {
            self.filter_failed(&ctx, e);
            return;
        }
        if ctx.is_closed() {
            debug!("upgrade refused by filter");
            return;
        }

        let protocol = self.shared.config.upgrade_protocol.clone();
        let request = ctx.request();
        info!(path = %request.path(), protocol = %protocol, "connection upgraded");

        ctx.enter_event_mode();
        self.mode = ConnectionMode::Event;
        if let Err(e) = self.transport.send(Outbound::Upgrade { protocol, request }) {
            debug!(error = %e, "upgrade not written");
        }
        self.deliver(EventKind::Open, None).await;
    }

    /// Delivers one inbound event to the cached context's handler.
    ///
    /// Ignored unless the connection upgraded. Filters do not run again.
    /// A `Close` event ends the connection after the handler saw it.
    pub async fn on_event(&mut self, kind: EventKind, payload: Option<String>) {
        if self.mode != ConnectionMode::Event {
            warn!(event = %kind, mode = ?self.mode, "event outside event mode ignored");
            return;
        }

        if kind == EventKind::Close {
            if !self.close_delivered {
                self.close_delivered = true;
                self.deliver(kind, payload).await;
            }
            self.teardown();
            return;
        }
        self.deliver(kind, payload).await;
    }

    /// Handles a connection-level fatal error.
    ///
    /// A cached event-stream context first observes a synthetic `Close`
    /// event, then the connection is torn down.
    pub async fn on_error(&mut self, error: impl fmt::Display) {
        if self.mode == ConnectionMode::Closed {
            return;
        }
        warn!(error = %error, mode = ?self.mode, "connection failed");
        self.finish().await;
        self.teardown();
    }

    /// Handles an orderly close by the peer. Same as [`on_error`](Self::on_error)
    /// without the failure.
    pub async fn on_close(&mut self) {
        if self.mode == ConnectionMode::Closed {
            return;
        }
        debug!(mode = ?self.mode, "connection closed by peer");
        self.finish().await;
        self.teardown();
    }

    /// Parses and dispatches every complete request buffered in `buf`.
    ///
    /// Consumed bytes are removed from `buf`; a trailing partial request stays
    /// for the next call. A malformed request is answered with `400`, an
    /// oversized buffer with `413`, and both tear the connection down.
    /// Returns the number of requests dispatched.
    ///
    /// # Errors
    ///
    /// The [`RequestError`] that made the connection unusable.
    pub async fn on_bytes(&mut self, buf: &mut BytesMut) -> Result<usize, RequestError> {
        let limit = self.shared.config.max_request_bytes;
        let mut dispatched = 0;
        while self.mode == ConnectionMode::Request && !buf.is_empty() {
            let (request, consumed) = match Request::parse_limited(&buf[..], limit) {
                Ok(parsed) => parsed,
                Err(RequestError::Incomplete) if buf.len() <= limit => break,
                Err(RequestError::Incomplete | RequestError::TooLarge { .. }) => {
                    warn!(buffered = buf.len(), limit, "request too large; sending 413");
                    self.reject(StatusCode::PayloadTooLarge);
                    return Err(RequestError::TooLarge { limit });
                }
                Err(e) => {
                    warn!(error = %e, "bad request; sending 400");
                    self.reject(StatusCode::BadRequest);
                    return Err(e);
                }
            };
            buf.advance(consumed);

            let keep_alive = request.is_keep_alive();
            self.on_request(request).await;
            dispatched += 1;

            if !keep_alive && self.mode == ConnectionMode::Request {
                debug!("Connection: close; shutting down");
                self.on_close().await;
            }
        }
        Ok(dispatched)
    }

    fn reject(&mut self, status: StatusCode) {
        let response = Response::new(status)
            .header("Content-Type", crate::http::TEXT_PLAIN)
            .body(status.canonical_reason())
            .keep_alive(false);
        if let Err(e) = self.transport.send(Outbound::Response(response)) {
            debug!(error = %e, "rejection not written");
        }
        self.teardown();
    }

    // Writes the failure response, offering the error to the exception chain
    // first, and closes the context for good.
    fn filter_failed(&self, ctx: &Context, err: HandlerError) {
        warn!(path = %ctx.request().path(), error = %err, "filter chain aborted");
        engine::recover(ctx, &self.shared.exceptions, &err);
        ctx.close();
    }

    // Delivers the closing event at most once per connection.
    async fn finish(&mut self) {
        if self.close_delivered || self.cached.is_none() {
            return;
        }
        self.close_delivered = true;
        self.deliver(EventKind::Close, None).await;
    }

    async fn deliver(&mut self, kind: EventKind, payload: Option<String>) {
        let Some(cached) = &self.cached else {
            warn!(event = %kind, "no cached context for event");
            return;
        };
        let (ctx, route) = (cached.context.clone(), Arc::clone(&cached.route));
        if ctx.is_closed() && kind != EventKind::Close {
            debug!(event = %kind, "event for closed context dropped");
            return;
        }

        debug!(event = %kind, pattern = %route.pattern(), "delivering event");
        ctx.set_inbound(kind, payload);
        engine::execute(Some(route.handler()), &ctx, &self.shared.exceptions).await;
    }

    fn teardown(&mut self) {
        self.mode = ConnectionMode::Closed;
        if let Some(cached) = &self.cached {
            cached.context.close();
        }
        self.transport.close();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode)
            .field("cached", &self.cached.as_ref().map(|c| c.context.variant()))
            .field("close_delivered", &self.close_delivered)
            .finish()
    }
}
