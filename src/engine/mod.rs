//! Execution engine: invoke a handler by shape and recover from its failures.
//!
//! [`execute`] never returns an error. Anything a handler raises, including
//! a panic, is offered to the [`ExceptionChain`]; if no entry takes it, the
//! engine writes the generic failure response ([`write_failure`]).

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error};

use crate::context::Context;
use crate::error::HandlerError;
use crate::handler::{Handler, Reply};
use crate::http::{APPLICATION_JSON, StatusCode, TEXT_PLAIN};
use crate::middleware::ExceptionChain;

/// Runs `handler` against `ctx`.
///
/// An absent handler raises [`HandlerError::HandlerNotFound`], which goes
/// through the same recovery path as any handler failure.
pub async fn execute(handler: Option<&Handler>, ctx: &Context, exceptions: &ExceptionChain) {
    let outcome = match handler {
        Some(handler) => invoke(handler, ctx).await,
        None => Err(HandlerError::HandlerNotFound),
    };

    if let Err(e) = outcome {
        recover(ctx, exceptions, &e);
    }
}

async fn invoke(handler: &Handler, ctx: &Context) -> Result<(), HandlerError> {
    debug!(shape = ?handler.shape(), variant = %ctx.variant(), "invoking handler");

    let call = async {
        match handler {
            Handler::Effecting(f) | Handler::Transforming(f) => f(ctx.clone()).await,
            Handler::Producing(f) => {
                let reply = f().await?;
                write_reply(ctx, reply);
                Ok(())
            }
        }
    };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn write_reply(ctx: &Context, reply: Reply) {
    match reply {
        Reply::Text(text) => ctx.write(StatusCode::Ok, TEXT_PLAIN, text),
        Reply::Json(json) => ctx.write(StatusCode::Ok, APPLICATION_JSON, json),
    }
}

/// Offers `err` to the exception chain, falling back to the generic `500`.
pub fn recover(ctx: &Context, exceptions: &ExceptionChain, err: &HandlerError) {
    if exceptions.handle(ctx, err) {
        return;
    }
    error!(
        error = %err,
        path = %ctx.request().path(),
        variant = %ctx.variant(),
        "unhandled handler error"
    );
    write_failure(ctx);
}

/// Writes `500 Internal Server Error` as plain text with the reason phrase
/// as body. Nothing about the failure itself reaches the client.
pub fn write_failure(ctx: &Context) {
    let status = StatusCode::InternalServerError;
    ctx.write_text(status, status.canonical_reason());
}

/// Extracts a message string from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
