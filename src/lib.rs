//! # gale
//!
//! Connection dispatch core for embedded HTTP servers: route table, per-request
//! contexts, filter and exception chains, handler execution, bidirectional-event
//! upgrade and server push.
//!
//! The crate owns no sockets. A transport decodes messages, feeds them to a
//! per-connection [`Dispatcher`](dispatcher::Dispatcher) and writes out the
//! [`Outbound`](transport::Outbound) messages it receives.
//!
//! ## Quick Start
//!
//! ```rust
//! use gale::context::ContextVariant;
//! use gale::handler::Handler;
//! use gale::http::{Method, Request, StatusCode};
//! use gale::transport::{ChannelTransport, Outbound};
//! use gale::{Context, Server};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .get(
//!             "/users/{id}",
//!             ContextVariant::Simple,
//!             Handler::effecting(|ctx: Context| async move {
//!                 let id = ctx.path_variable("id").unwrap_or_default();
//!                 ctx.write_json(StatusCode::Ok, &serde_json::json!({ "id": id }))
//!             }),
//!         )?
//!         .get("/ping", ContextVariant::Simple, Handler::producing(|| async { "pong" }))?
//!         .build();
//!
//!     let (transport, mut outbound) = ChannelTransport::pair();
//!     let mut connection = server.connection(transport);
//!     connection.on_request(Request::builder(Method::Get, "/users/42").build()).await;
//!
//!     if let Ok(Outbound::Response(response)) = outbound.try_recv() {
//!         assert_eq!(response.body_text(), r#"{"id":"42"}"#);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod realtime;
pub mod router;
pub mod security;
pub mod server;
pub mod transport;
pub mod view;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::Config;
pub use context::{Context, ContextVariant};
pub use dispatcher::{ConnectionMode, Dispatcher};
pub use error::{HandlerError, RouteError};
pub use handler::Handler;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use realtime::{EventEjector, EventFrame, EventKind};
pub use server::{Server, ServerBuilder};
