#![forbid(unsafe_code)]

//! Core data types for the tether binding engine.
//!
//! - [`value`]: the dynamic [`Value`] delivered through bindings.
//! - [`template`]: bind-template parsing and rendering.
//! - [`format`]: format functions usable inside template tokens.
//!
//! Nothing here knows about scheduling; see `tether-runtime` for that.

pub mod format;
pub mod template;
pub mod value;

pub use format::Format;
pub use template::{Template, TemplateError};
pub use value::Value;
