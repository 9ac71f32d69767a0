//! The server instance. Owns the route table, filter chain, exception chain
//! and configuration, and hands out one [`Dispatcher`] per connection.
//!
//! Nothing here is global: two servers built in the same process share no
//! state, which keeps test fixtures isolated.

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::context::{Context, ContextVariant};
use crate::dispatcher::Dispatcher;
use crate::error::{HandlerError, RouteError};
use crate::handler::{Handler, IntoOutcome};
use crate::http::Method;
use crate::middleware::{ExceptionChain, ExceptionHandler, Filter, FilterChain};
use crate::router::RouteTable;
use crate::transport::Transport;

// Everything dispatchers read; immutable once the server is built.
pub(crate) struct Shared {
    pub(crate) routes: RouteTable,
    pub(crate) filters: FilterChain,
    pub(crate) exceptions: ExceptionChain,
    pub(crate) config: Config,
}

/// A built server. Cheap to clone; clones share the same tables.
///
/// # Examples
///
/// ```
/// use gale::context::ContextVariant;
/// use gale::handler::Handler;
/// use gale::http::{Method, Request};
/// use gale::middleware::LoggerFilter;
/// use gale::transport::{ChannelTransport, Outbound};
/// use gale::Server;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), gale::error::RouteError> {
/// let server = Server::builder()
///     .route(Method::Get, "/ping", ContextVariant::Simple, Handler::producing(|| async { "pong" }))?
///     .filter(LoggerFilter)
///     .build();
///
/// let (transport, mut rx) = ChannelTransport::pair();
/// let mut connection = server.connection(transport);
/// connection.on_request(Request::builder(Method::Get, "/ping").build()).await;
///
/// match rx.try_recv() {
///     Ok(Outbound::Response(response)) => assert_eq!(response.body_text(), "pong"),
///     other => panic!("unexpected {other:?}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Starts dispatch state for a newly opened connection.
    pub fn connection(&self, transport: Arc<dyn Transport>) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.shared), transport)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.shared.routes
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("routes", &self.shared.routes.len())
            .field("filters", &self.shared.filters.len())
            .field("exceptions", &self.shared.exceptions.len())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Collects routes, filters and exception handlers before the server starts.
#[derive(Debug, Default)]
pub struct ServerBuilder {
    routes: RouteTable,
    filters: FilterChain,
    exceptions: ExceptionChain,
    config: Config,
}

impl ServerBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Registers a route.
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register`].
    pub fn route(
        mut self,
        method: impl Into<Method>,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<Self, RouteError> {
        self.routes.register(method, pattern, variant, handler)?;
        Ok(self)
    }

    /// Registers a `GET` route.
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register`].
    pub fn get(
        self,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<Self, RouteError> {
        self.route(Method::Get, pattern, variant, handler)
    }

    /// Registers a `POST` route.
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register`].
    pub fn post(
        self,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<Self, RouteError> {
        self.route(Method::Post, pattern, variant, handler)
    }

    /// Appends a filter to the chain.
    #[must_use]
    pub fn filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.add(filter);
        self
    }

    /// Appends an exception handler.
    #[must_use]
    pub fn exception_handler<E: ExceptionHandler + 'static>(mut self, handler: E) -> Self {
        self.exceptions.register(handler);
        self
    }

    /// Appends a `(predicate, handler)` pair to the exception chain.
    #[must_use]
    pub fn on_error<P, H, R>(mut self, predicate: P, handler: H) -> Self
    where
        P: Fn(&HandlerError) -> bool + Send + Sync + 'static,
        H: Fn(&Context, &HandlerError) -> R + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.exceptions.on(predicate, handler);
        self
    }

    pub fn build(self) -> Server {
        Server {
            shared: Arc::new(Shared {
                routes: self.routes,
                filters: self.filters,
                exceptions: self.exceptions,
                config: self.config,
            }),
        }
    }
}
