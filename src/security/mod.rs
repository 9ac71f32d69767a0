//! Security filters.
//!
//! Currently implemented:
//!
//! - [`CorsFilter`]: Cross-Origin Resource Sharing headers and preflight
//!   (`OPTIONS`) answers.

mod cors;

pub use cors::CorsFilter;
