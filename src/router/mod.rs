//! Route table: map `(method, path pattern)` to a context variant and handler.
//!
//! Patterns are split on `/` into segments. A segment is either literal text or a
//! named variable written `{name}` or `:name`; a variable matches exactly one
//! request segment.
//!
//! | Pattern              | Example match     | Bound variables      |
//! |----------------------|-------------------|----------------------|
//! | `/users`             | `/users`          | *(none)*             |
//! | `/users/{id}`        | `/users/42`       | `id → "42"`          |
//! | `/users/:id/posts`   | `/users/7/posts`  | `id → "7"`           |
//!
//! When several patterns match a path, the one with the longest run of leading
//! literal segments wins; ties go to the earliest registration. Trailing
//! slashes are ignored on both sides, so `/users/` and `/users` are the same.
//!
//! The table is filled once at startup and only read afterwards; changing
//! routes means building a new table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ContextVariant;
use crate::error::RouteError;
use crate::handler::Handler;
use crate::http::Method;
use crate::http::request::normalize_path;

// A single path segment, either a literal string or a named capture.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Variable(String),
}

impl Segment {
    fn is_static(&self) -> bool {
        matches!(self, Segment::Static(_))
    }
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    // Number of literal segments before the first variable.
    literal_prefix: usize,
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason,
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with `/`"));
        }

        let raw = normalize_path(pattern);
        let mut segments = Vec::new();
        let mut names: Vec<&str> = Vec::new();

        for part in raw.split('/').filter(|s| !s.is_empty()) {
            let name = part
                .strip_prefix('{')
                .and_then(|p| p.strip_suffix('}'))
                .or_else(|| part.strip_prefix(':'));

            match name {
                Some("") => return Err(invalid("variable name is empty")),
                Some(name) => {
                    if names.contains(&name) {
                        return Err(invalid("variable name is used twice"));
                    }
                    names.push(name);
                    segments.push(Segment::Variable(name.to_owned()));
                }
                None if part.contains(['{', '}']) => {
                    return Err(invalid("braces must wrap a whole segment"));
                }
                None => segments.push(Segment::Static(part.to_owned())),
            }
        }

        let literal_prefix = segments.iter().take_while(|s| s.is_static()).count();
        Ok(Self {
            raw,
            segments,
            literal_prefix,
        })
    }

    // Two patterns have the same shape when they match exactly the same paths.
    fn same_shape(&self, other: &Pattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Static(a), Segment::Static(b)) => a == b,
                    (Segment::Variable(_), Segment::Variable(_)) => true,
                    _ => false,
                })
    }

    // Try to match pre-split path segments, returning the bound variables on success.
    fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        if self.segments.len() != path.len() {
            return None;
        }

        let mut variables = HashMap::new();
        for (segment, actual) in self.segments.iter().zip(path) {
            match segment {
                Segment::Static(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                Segment::Variable(name) => {
                    variables.insert(name.clone(), (*actual).to_owned());
                }
            }
        }
        Some(variables)
    }
}

/// One registered route. Immutable after registration.
#[derive(Debug)]
pub struct RouteEntry {
    method: Method,
    pattern: Pattern,
    variant: ContextVariant,
    handler: Handler,
}

impl RouteEntry {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The pattern as registered, trailing slash removed.
    pub fn pattern(&self) -> &str {
        &self.pattern.raw
    }

    /// The context variant requests on this route get.
    pub fn variant(&self) -> ContextVariant {
        self.variant
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// A successful lookup: the winning entry and the variables it bound.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
    pub path_variables: HashMap<String, String>,
}

/// Maps `(method, path)` to the route that handles it.
///
/// # Examples
///
/// ```
/// use gale::context::ContextVariant;
/// use gale::handler::Handler;
/// use gale::router::RouteTable;
///
/// let mut routes = RouteTable::new();
/// routes
///     .get("/users/{id}", ContextVariant::Simple, Handler::producing(|| async { "user" }))
///     .unwrap();
/// routes
///     .get("/users/active", ContextVariant::Simple, Handler::producing(|| async { "active" }))
///     .unwrap();
///
/// let hit = routes.resolve("GET", "/users/active?page=2").unwrap();
/// assert_eq!(hit.entry.pattern(), "/users/active");
///
/// let hit = routes.resolve("GET", "/users/42").unwrap();
/// assert_eq!(hit.path_variables["id"], "42");
/// ```
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers a route.
    ///
    /// # Errors
    ///
    /// - [`RouteError::Conflict`] if a route with the same method and pattern
    ///   shape (variable names aside) already exists.
    /// - [`RouteError::InvalidPattern`] if `pattern` cannot be parsed.
    pub fn register(
        &mut self,
        method: impl Into<Method>,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<&mut Self, RouteError> {
        let method = method.into();
        let pattern = Pattern::parse(pattern)?;

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern.same_shape(&pattern))
        {
            return Err(RouteError::Conflict {
                method: method.to_string(),
                pattern: pattern.raw,
            });
        }

        self.routes.push(Arc::new(RouteEntry {
            method,
            pattern,
            variant,
            handler,
        }));
        Ok(self)
    }

    pub fn get(
        &mut self,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(Method::Get, pattern, variant, handler)
    }

    pub fn post(
        &mut self,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(Method::Post, pattern, variant, handler)
    }

    pub fn put(
        &mut self,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(Method::Put, pattern, variant, handler)
    }

    pub fn delete(
        &mut self,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(Method::Delete, pattern, variant, handler)
    }

    pub fn patch(
        &mut self,
        pattern: &str,
        variant: ContextVariant,
        handler: Handler,
    ) -> Result<&mut Self, RouteError> {
        self.register(Method::Patch, pattern, variant, handler)
    }

    /// Finds the route for `method` and `path`. Any query string is ignored.
    ///
    /// Returns `None` when nothing matches.
    pub fn resolve(&self, method: impl Into<Method>, path: &str) -> Option<RouteMatch> {
        let method = method.into();
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let path = normalize_path(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut best: Option<(usize, RouteMatch)> = None;
        for route in self.routes.iter().filter(|r| r.method == method) {
            let Some(path_variables) = route.pattern.matches(&segments) else {
                continue;
            };
            let score = route.pattern.literal_prefix;
            // Strictly greater keeps the earliest registration on ties.
            if best.as_ref().is_none_or(|(top, _)| score > *top) {
                best = Some((
                    score,
                    RouteMatch {
                        entry: Arc::clone(route),
                        path_variables,
                    },
                ));
            }
        }
        best.map(|(_, found)| found)
    }

    /// Return the number of routes registered in this table.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterates over entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter().map(Arc::as_ref)
    }
}
