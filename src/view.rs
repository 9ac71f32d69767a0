//! View rendering collaborator.
//!
//! Template engines plug in through [`ViewRenderer`]; a [`Views`] registry
//! picks the first renderer that claims a template's file extension. Handlers
//! use it to answer with rendered pages; the dispatch core never calls it.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::context::Context;
use crate::error::HandlerError;
use crate::http::StatusCode;

pub const TEXT_HTML: &str = "text/html; charset=utf-8";

/// A template engine.
pub trait ViewRenderer: Send + Sync {
    /// Whether this renderer handles templates with extension `ext`
    /// (no leading dot, e.g. `"html"`).
    fn supports_extension(&self, ext: &str) -> bool;

    /// Renders `template` with `model` bound.
    fn render(&self, template: &str, model: &serde_json::Value) -> Result<String, HandlerError>;
}

/// Ordered set of renderers.
///
/// # Examples
///
/// ```
/// use gale::error::HandlerError;
/// use gale::view::{ViewRenderer, Views};
///
/// struct Echo;
///
/// impl ViewRenderer for Echo {
///     fn supports_extension(&self, ext: &str) -> bool {
///         ext.eq_ignore_ascii_case("txt")
///     }
///
///     fn render(&self, template: &str, model: &serde_json::Value) -> Result<String, HandlerError> {
///         Ok(format!("{template}: {model}"))
///     }
/// }
///
/// let mut views = Views::new();
/// views.register(Echo);
/// let page = views.render("hello.txt", &serde_json::json!({ "n": 1 })).unwrap();
/// assert_eq!(page, r#"hello.txt: {"n":1}"#);
/// assert!(views.render("hello.html", &()).is_err());
/// ```
#[derive(Default, Clone)]
pub struct Views {
    renderers: Vec<Arc<dyn ViewRenderer>>,
}

impl Views {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: ViewRenderer + 'static>(&mut self, renderer: R) -> &mut Self {
        self.renderers.push(Arc::new(renderer));
        self
    }

    /// Renders `template` with the first renderer supporting its extension.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::View`] if the template has no extension or no
    ///   renderer supports it.
    /// - [`HandlerError::Json`] if `model` cannot be serialized.
    /// - Whatever the chosen renderer returns.
    pub fn render<M: Serialize + ?Sized>(
        &self,
        template: &str,
        model: &M,
    ) -> Result<String, HandlerError> {
        let ext = extension(template)
            .ok_or_else(|| HandlerError::View(format!("template `{template}` has no extension")))?;
        let renderer = self
            .renderers
            .iter()
            .find(|r| r.supports_extension(ext))
            .ok_or_else(|| HandlerError::View(format!("no renderer for `.{ext}` templates")))?;

        let model = serde_json::to_value(model)?;
        debug!(template, ext, "rendering view");
        renderer.render(template, &model)
    }

    /// Renders `template` and writes it on `ctx` as HTML.
    ///
    /// # Errors
    ///
    /// See [`Views::render`]. Nothing is written on error.
    pub fn write<M: Serialize + ?Sized>(
        &self,
        ctx: &Context,
        status: StatusCode,
        template: &str,
        model: &M,
    ) -> Result<(), HandlerError> {
        let page = self.render(template, model)?;
        ctx.write(status, TEXT_HTML, page);
        Ok(())
    }
}

impl fmt::Debug for Views {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Views")
            .field("renderers", &self.renderers.len())
            .finish()
    }
}

fn extension(template: &str) -> Option<&str> {
    let name = template.rsplit('/').next().unwrap_or(template);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}
