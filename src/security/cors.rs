use futures::future::BoxFuture;
use tracing::debug;

use crate::context::Context;
use crate::error::HandlerError;
use crate::http::{Method, Response, StatusCode};
use crate::middleware::Filter;
use crate::transport::Outbound;

/// CORS filter. Validates the `Origin` header, answers preflight requests,
/// and stages `Access-Control-*` headers for actual responses.
///
/// # Behavior
///
/// - Requests without an `Origin` header, or with an origin outside the
///   allow-list, pass through untouched.
/// - `OPTIONS` preflight requests are answered with `204 No Content` and the
///   `Access-Control-*` headers, then the context is closed so the handler
///   does not run.
/// - Any other request gets the CORS headers staged on the context; they ride
///   on whatever response the handler writes.
/// - A specific (non-wildcard) origin also adds `Vary: Origin`.
///
/// # Examples
///
/// ```
/// use gale::middleware::FilterChain;
/// use gale::security::CorsFilter;
///
/// let mut filters = FilterChain::new();
/// filters.add(
///     CorsFilter::new()
///         .allow_origin("https://example.com")
///         .allow_method("PATCH")
///         .allow_header("X-Custom-Header"),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct CorsFilter {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    max_age: u32,
}

impl Default for CorsFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsFilter {
    /// Creates a filter with an empty origin allow-list and these defaults:
    ///
    /// | Setting          | Default value                          |
    /// |------------------|----------------------------------------|
    /// | Allowed methods  | `GET`, `POST`, `PUT`, `DELETE`         |
    /// | Allowed headers  | `Content-Type`, `Authorization`        |
    /// | Preflight max age| `3600` seconds                         |
    pub fn new() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "DELETE"].map(String::from).to_vec(),
            allowed_headers: ["Content-Type", "Authorization"].map(String::from).to_vec(),
            max_age: 3600,
        }
    }

    /// A filter that accepts every origin.
    pub fn permissive() -> Self {
        Self::new().allow_origin("*")
    }

    /// Adds an allowed origin. `"*"` accepts all origins.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    /// Sets the preflight cache lifetime in seconds.
    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    // The value to echo in `Access-Control-Allow-Origin`, if the origin is allowed.
    fn allowed(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    fn headers(&self, allow_origin: &str) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Access-Control-Allow-Origin", allow_origin.to_owned()),
            ("Access-Control-Allow-Methods", self.allowed_methods.join(", ")),
            ("Access-Control-Allow-Headers", self.allowed_headers.join(", ")),
        ];
        if allow_origin != "*" {
            headers.push(("Vary", "Origin".to_owned()));
        }
        headers
    }
}

impl Filter for CorsFilter {
    fn filter(&self, ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>> {
        let request = ctx.request();
        let allow_origin = request.headers().get("origin").and_then(|o| self.allowed(o));
        let Some(allow_origin) = allow_origin else {
            return Box::pin(async { Ok(()) });
        };
        let headers = self.headers(&allow_origin);

        if request.method() == &Method::Options {
            let mut preflight = Response::new(StatusCode::NoContent)
                .header("Access-Control-Max-Age", self.max_age.to_string())
                .keep_alive(request.is_keep_alive());
            for (name, value) in headers {
                preflight.add_header(name, value);
            }
            debug!(origin = %allow_origin, path = %request.path(), "answered CORS preflight");
            if let Err(e) = ctx.transport().send(Outbound::Response(preflight)) {
                debug!(error = %e, "preflight response not written");
            }
            ctx.close();
        } else {
            for (name, value) in headers {
                ctx.set_response_header(name, value);
            }
        }
        Box::pin(async { Ok(()) })
    }
}
