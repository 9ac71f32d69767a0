//! Filter chain: ordered, fail-fast checks that run before a handler.
//!
//! Each [`Filter`] receives the [`Context`] of the request and either lets it
//! through (`Ok(())`) or fails. The first failure aborts the chain; the
//! dispatcher then closes the context and writes an error response, and the
//! handler never runs. A filter may also close the context itself after
//! writing its own response (a CORS preflight does this), which stops the
//! chain without a failure.
//!
//! ## Core types
//!
//! - [`Filter`]: trait implemented by all filters.
//! - [`FnFilter`]: adapts an async closure into a [`Filter`].
//! - [`FilterChain`]: the ordered list the dispatcher runs.
//! - [`LoggerFilter`]: built-in request logger.
//! - [`ExceptionChain`]: first-match error handlers, see [`exception`].

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::context::Context;
use crate::engine::panic_message;
use crate::error::HandlerError;
use crate::handler::IntoOutcome;

pub mod exception;

pub use exception::{ExceptionChain, ExceptionHandler};

/// The core trait for all filters.
///
/// # Contract
///
/// - Implementations must be `Send + Sync`; one chain is shared by every
///   connection of a server.
/// - Returning `Err` is terminal for the request.
pub trait Filter: Send + Sync {
    /// Inspect the request, optionally stage headers or answer it.
    fn filter(&self, ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>>;
}

/// A [`Filter`] built from an async closure.
///
/// # Examples
///
/// ```
/// use gale::error::HandlerError;
/// use gale::middleware::{FilterChain, FnFilter};
///
/// let mut chain = FilterChain::new();
/// chain.add(FnFilter::new(|ctx: gale::Context| async move {
///     match ctx.request().headers().get("authorization") {
///         Some(_) => Ok(()),
///         None => Err(HandlerError::msg("missing credentials")),
///     }
/// }));
/// assert_eq!(chain.len(), 1);
/// ```
pub struct FnFilter<F> {
    f: F,
}

impl<F> FnFilter<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut, R> Filter for FnFilter<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome,
{
    fn filter(&self, ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>> {
        let fut = (self.f)(ctx);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

/// Ordered list of filters run against each request context.
#[derive(Default, Clone)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter; filters run in the order they were added.
    pub fn add<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Appends an async closure as a filter.
    pub fn add_fn<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome,
    {
        self.add(FnFilter::new(f))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs every filter in order against `ctx`.
    ///
    /// Stops without error as soon as the context is closed, including before
    /// the first filter. A panicking filter counts as a failing one.
    ///
    /// # Errors
    ///
    /// [`HandlerError::FilterFailure`] wrapping the first filter's error.
    pub async fn run(&self, ctx: &Context) -> Result<(), HandlerError> {
        for (index, filter) in self.filters.iter().enumerate() {
            if ctx.is_closed() {
                debug!(index, "context closed; remaining filters skipped");
                return Ok(());
            }

            let call = async { filter.filter(ctx.clone()).await };
            let outcome = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
            };
            if let Err(e) = outcome {
                debug!(index, error = %e, "filter failed");
                return Err(HandlerError::FilterFailure(Box::new(e)));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("count", &self.filters.len())
            .finish()
    }
}

/// Built-in filter that logs each request's method, path and context variant.
///
/// Emits one `tracing::info!` record per request and never rejects.
pub struct LoggerFilter;

impl Filter for LoggerFilter {
    fn filter(&self, ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(async move {
            let request = ctx.request();
            info!(
                method = %request.method(),
                path = %request.path(),
                variant = %ctx.variant(),
                "request"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::context::ContextVariant;
    use crate::http::{Method, Request, StatusCode};
    use crate::transport::ChannelTransport;

    fn ctx() -> Context {
        let (transport, _rx) = ChannelTransport::pair();
        Context::new(
            ContextVariant::Simple,
            Request::builder(Method::Get, "/").build(),
            transport,
        )
    }

    fn counting(hits: &Arc<AtomicUsize>) -> impl Fn(Context) -> futures::future::Ready<()> + use<> {
        let hits = Arc::clone(hits);
        move |_ctx| {
            hits.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test]
    async fn filters_run_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut chain = FilterChain::new();
        for name in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            chain.add_fn(move |_ctx| {
                order.lock().push(name);
                async {}
            });
        }
        chain.run(&ctx()).await.unwrap();
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn first_failure_stops_the_chain() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut chain = FilterChain::new();
        chain
            .add_fn(counting(&hits))
            .add_fn(|_ctx| async { Err::<(), _>(HandlerError::msg("denied")) })
            .add_fn(counting(&hits));

        let err = chain.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, HandlerError::FilterFailure(_)));
        assert_eq!(err.root().to_string(), "denied");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_context_runs_no_filters() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut chain = FilterChain::new();
        chain.add_fn(counting(&hits));

        let ctx = ctx();
        ctx.close();
        chain.run(&ctx).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_filter_closing_the_context_stops_later_filters() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut chain = FilterChain::new();
        chain
            .add_fn(|ctx: Context| async move {
                ctx.write_text(StatusCode::Forbidden, "go away");
                ctx.close();
            })
            .add_fn(counting(&hits));

        chain.run(&ctx()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_filter_is_a_failure() {
        let mut chain = FilterChain::new();
        chain.add_fn(|_ctx| async {
            if true {
                panic!("boom");
            }
        });
        let err = chain.run(&ctx()).await.unwrap_err();
        assert!(matches!(err.root(), HandlerError::Panicked(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn logger_never_rejects() {
        let mut chain = FilterChain::new();
        chain.add(LoggerFilter);
        assert!(chain.run(&ctx()).await.is_ok());
    }
}
