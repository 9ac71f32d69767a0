//! Body decoding and validation hooks of `Enhanced` contexts.

use serde::de::DeserializeOwned;

use super::{Context, ContextVariant};
use crate::error::{HandlerError, ValidationErrors};

/// Validation collaborator: checks a decoded value against its rules.
///
/// `groups` selects which rule sets apply; an empty slice means the default set.
///
/// # Examples
///
/// ```
/// use gale::context::Validate;
/// use gale::error::ValidationErrors;
///
/// struct Signup { name: String }
///
/// impl Validate for Signup {
///     fn validate(&self, _groups: &[&str]) -> Result<(), ValidationErrors> {
///         let mut errors = ValidationErrors::new();
///         if self.name.is_empty() {
///             errors.add("name", "must not be empty");
///         }
///         errors.into_result()
///     }
/// }
/// ```
pub trait Validate {
    fn validate(&self, groups: &[&str]) -> Result<(), ValidationErrors>;
}

impl Context {
    /// Decodes the JSON body into `T`. An absent body decodes as `{}`.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Unsupported`] on anything but an `Enhanced` context.
    /// - [`HandlerError::Json`] if the body does not decode.
    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        self.require_binding("read_json")?;
        let request = self.request();
        let body = request.body().unwrap_or("{}");
        Ok(serde_json::from_str(body)?)
    }

    /// Decodes the JSON body into `T` and validates it for `groups`.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Unsupported`] on anything but an `Enhanced` context.
    /// - [`HandlerError::NoRequestBody`] when the request has no body.
    /// - [`HandlerError::Json`] if the body does not decode.
    /// - [`HandlerError::ValidationFailed`] with the field diagnostics.
    pub fn bind_json<T>(&self, groups: &[&str]) -> Result<T, HandlerError>
    where
        T: DeserializeOwned + Validate,
    {
        self.require_binding("bind_json")?;
        let request = self.request();
        let body = request.body().ok_or(HandlerError::NoRequestBody)?;
        let value: T = serde_json::from_str(body)?;
        value
            .validate(groups)
            .map_err(HandlerError::ValidationFailed)?;
        Ok(value)
    }

    fn require_binding(&self, capability: &'static str) -> Result<(), HandlerError> {
        match self.variant() {
            ContextVariant::Enhanced => Ok(()),
            variant => Err(HandlerError::Unsupported {
                capability,
                variant,
            }),
        }
    }
}
