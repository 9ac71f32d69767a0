//! Exception chain: ordered `(predicate, handler)` pairs for failures.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Context;
use crate::engine::panic_message;
use crate::error::HandlerError;

/// Handles one class of [`HandlerError`]s, typically by writing a response.
pub trait ExceptionHandler: Send + Sync {
    /// Whether this handler takes responsibility for `error`.
    fn supports(&self, error: &HandlerError) -> bool;

    /// Deals with `error`, usually by writing through `ctx`.
    fn handle(&self, ctx: &Context, error: &HandlerError) -> Result<(), HandlerError>;
}

struct FnExceptionHandler<P, H> {
    predicate: P,
    handler: H,
}

impl<P, H, R> ExceptionHandler for FnExceptionHandler<P, H>
where
    P: Fn(&HandlerError) -> bool + Send + Sync,
    H: Fn(&Context, &HandlerError) -> R + Send + Sync,
    R: crate::handler::IntoOutcome,
{
    fn supports(&self, error: &HandlerError) -> bool {
        (self.predicate)(error)
    }

    fn handle(&self, ctx: &Context, error: &HandlerError) -> Result<(), HandlerError> {
        (self.handler)(ctx, error).into_outcome()
    }
}

/// Error handlers scanned in registration order; the first one whose
/// predicate accepts an error handles it.
///
/// # Examples
///
/// ```
/// use gale::error::HandlerError;
/// use gale::http::StatusCode;
/// use gale::middleware::ExceptionChain;
///
/// let mut exceptions = ExceptionChain::new();
/// exceptions.on(
///     |e| matches!(e, HandlerError::ValidationFailed(_)),
///     |ctx, e| ctx.write_text(StatusCode::BadRequest, e.to_string()),
/// );
/// assert_eq!(exceptions.len(), 1);
/// ```
#[derive(Default, Clone)]
pub struct ExceptionChain {
    handlers: Vec<Arc<dyn ExceptionHandler>>,
}

impl ExceptionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: ExceptionHandler + 'static>(&mut self, handler: E) -> &mut Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Registers a handler for every error `predicate` accepts.
    pub fn on<P, H, R>(&mut self, predicate: P, handler: H) -> &mut Self
    where
        P: Fn(&HandlerError) -> bool + Send + Sync + 'static,
        H: Fn(&Context, &HandlerError) -> R + Send + Sync + 'static,
        R: crate::handler::IntoOutcome + 'static,
    {
        self.register(FnExceptionHandler { predicate, handler })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offers `error` to the registered handlers.
    ///
    /// Returns `true` once a handler accepted the error and completed. A
    /// handler that itself fails or panics does not count; scanning goes on
    /// with the next entry.
    pub fn handle(&self, ctx: &Context, error: &HandlerError) -> bool {
        for (index, handler) in self.handlers.iter().enumerate() {
            let attempt = catch_unwind(AssertUnwindSafe(|| {
                if !handler.supports(error) {
                    return Ok(false);
                }
                handler.handle(ctx, error).map(|()| true)
            }));

            match attempt {
                Ok(Ok(true)) => {
                    debug!(index, error = %error, "exception handled");
                    return true;
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(index, error = %error, cause = %e, "exception handler failed"),
                Err(payload) => warn!(
                    index,
                    error = %error,
                    cause = %panic_message(payload.as_ref()),
                    "exception handler panicked"
                ),
            }
        }
        false
    }
}

impl fmt::Debug for ExceptionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionChain")
            .field("count", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::context::ContextVariant;
    use crate::http::{Method, Request, StatusCode};
    use crate::transport::{ChannelTransport, Outbound};

    fn ctx() -> (Context, UnboundedReceiver<Outbound>) {
        let (transport, rx) = ChannelTransport::pair();
        let request = Request::builder(Method::Get, "/").build();
        (Context::new(ContextVariant::Simple, request, transport), rx)
    }

    fn body(rx: &mut UnboundedReceiver<Outbound>) -> String {
        match rx.try_recv() {
            Ok(Outbound::Response(r)) => r.body_text(),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn only_the_first_match_runs() {
        let second = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&second);

        let mut chain = ExceptionChain::new();
        chain
            .on(
                |_| true,
                |ctx, _| ctx.write_text(StatusCode::BadRequest, "first"),
            )
            .on(
                |_| true,
                move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                },
            );

        let (ctx, mut rx) = ctx();
        assert!(chain.handle(&ctx, &HandlerError::NoRequestBody));
        assert_eq!(body(&mut rx), "first");
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn predicates_select_by_error() {
        let mut chain = ExceptionChain::new();
        chain.on(
            |e| matches!(e, HandlerError::NoRequestBody),
            |ctx, _| ctx.write_text(StatusCode::BadRequest, "body please"),
        );

        let (ctx, mut rx) = ctx();
        assert!(!chain.handle(&ctx, &HandlerError::HandlerNotFound));
        assert!(rx.try_recv().is_err());
        assert!(chain.handle(&ctx, &HandlerError::NoRequestBody));
        assert_eq!(body(&mut rx), "body please");
    }

    #[test]
    fn failing_handler_falls_through_to_the_next() {
        let mut chain = ExceptionChain::new();
        chain
            .on(|_| true, |_, _| Err::<(), _>(HandlerError::msg("broken")))
            .on(|_| true, |_, _| -> () { panic!("also broken") })
            .on(
                |_| true,
                |ctx, _| ctx.write_text(StatusCode::ServiceUnavailable, "fallback"),
            );

        let (ctx, mut rx) = ctx();
        assert!(chain.handle(&ctx, &HandlerError::HandlerNotFound));
        assert_eq!(body(&mut rx), "fallback");
    }

    #[test]
    fn empty_chain_handles_nothing() {
        let (ctx, _rx) = ctx();
        assert!(!ExceptionChain::new().handle(&ctx, &HandlerError::HandlerNotFound));
    }
}
