//! Handler values and the three shapes they come in.
//!
//! The shape is fixed when the handler is built, so the engine dispatches on
//! the [`Handler`] discriminant and never inspects the callable itself:
//!
//! - **effecting**: `Fn(Context) -> impl Future<Output = ()>` (or a
//!   `Result<(), E>`); writes its own response through the context.
//! - **transforming**: `Fn(Context) -> impl Future<Output = Result<T, E>>`;
//!   the `T` it returns is not written anywhere.
//! - **producing**: `Fn() -> impl Future<Output = R>` where `R: IntoReply`;
//!   the engine writes the reply with status `200`.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use crate::context::Context;
use crate::error::HandlerError;

type Outcome = BoxFuture<'static, Result<(), HandlerError>>;
type Produced = BoxFuture<'static, Result<Reply, HandlerError>>;
type ContextFn = Arc<dyn Fn(Context) -> Outcome + Send + Sync>;
type ProducerFn = Arc<dyn Fn() -> Produced + Send + Sync>;

/// Discriminant of a [`Handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerShape {
    Effecting,
    Transforming,
    Producing,
}

/// A registered handler value.
///
/// # Examples
///
/// ```
/// use gale::handler::{Handler, HandlerShape, Json};
/// use gale::http::StatusCode;
///
/// let ping = Handler::producing(|| async { "pong" });
/// let echo = Handler::effecting(|ctx: gale::Context| async move {
///     ctx.write_text(StatusCode::Ok, ctx.body().unwrap_or_default());
/// });
/// let stats = Handler::producing(|| async { Json(vec![1, 2, 3]) });
///
/// assert_eq!(ping.shape(), HandlerShape::Producing);
/// assert_eq!(echo.shape(), HandlerShape::Effecting);
/// assert_eq!(stats.shape(), HandlerShape::Producing);
/// ```
#[derive(Clone)]
pub enum Handler {
    Effecting(ContextFn),
    Transforming(ContextFn),
    Producing(ProducerFn),
}

impl Handler {
    /// A handler that consumes the context and writes the response itself.
    pub fn effecting<H, F, R>(handler: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = R> + Send + 'static,
        R: IntoOutcome,
    {
        Handler::Effecting(Arc::new(move |ctx: Context| -> Outcome {
            let fut = handler(ctx);
            Box::pin(async move { fut.await.into_outcome() })
        }))
    }

    /// A handler that consumes the context and returns a value.
    ///
    /// The value is dropped after the call; nothing is written on the
    /// handler's behalf, so it must write through the context if it wants a
    /// response.
    pub fn transforming<H, F, T, E>(handler: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<HandlerError> + 'static,
    {
        Handler::Transforming(Arc::new(move |ctx: Context| -> Outcome {
            let fut = handler(ctx);
            Box::pin(async move {
                let value = fut.await.map_err(Into::<HandlerError>::into)?;
                debug!(
                    result = std::any::type_name::<T>(),
                    "transforming handler result not written"
                );
                drop(value);
                Ok(())
            })
        }))
    }

    /// A handler that takes no input and returns a value for the engine to write.
    pub fn producing<H, F, R>(handler: H) -> Self
    where
        H: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = R> + Send + 'static,
        R: IntoReply,
    {
        Handler::Producing(Arc::new(move || -> Produced {
            let fut = handler();
            Box::pin(async move { fut.await.into_reply() })
        }))
    }

    pub fn shape(&self) -> HandlerShape {
        match self {
            Handler::Effecting(_) => HandlerShape::Effecting,
            Handler::Transforming(_) => HandlerShape::Transforming,
            Handler::Producing(_) => HandlerShape::Producing,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// What an effecting handler may return.
pub trait IntoOutcome: Send {
    fn into_outcome(self) -> Result<(), HandlerError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E> IntoOutcome for Result<(), E>
where
    E: Into<HandlerError> + Send,
{
    fn into_outcome(self) -> Result<(), HandlerError> {
        self.map_err(Into::into)
    }
}

/// A producing handler's value, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Written as `text/plain`.
    Text(String),
    /// Already-encoded JSON, written as `application/json`.
    Json(String),
}

/// Wraps any serializable value so a producing handler's result is encoded as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

/// Conversion of a producing handler's output into a [`Reply`].
///
/// Text becomes a plain-text reply; everything else is JSON.
pub trait IntoReply: Send {
    fn into_reply(self) -> Result<Reply, HandlerError>;
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Text(self))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Text(self.to_owned()))
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Json(serde_json::to_string(&self)?))
    }
}

impl<T: Serialize + Send> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Json(serde_json::to_string(&self.0)?))
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(self)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<HandlerError> + Send,
{
    fn into_reply(self) -> Result<Reply, HandlerError> {
        match self {
            Ok(value) => value.into_reply(),
            Err(e) => Err(e.into()),
        }
    }
}
