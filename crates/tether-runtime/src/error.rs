#![forbid(unsafe_code)]

//! Errors raised by the binding runtime.
//!
//! Configuration mistakes (no callback, no scheduler) surface at
//! construction. Errors raised while reacting (an unknown late-bound method,
//! runaway re-scheduling) propagate out of [`Scheduler::notify`] to whoever
//! requested the flush. Operations on destroyed items never error; they are
//! silently ignored.
//!
//! [`Scheduler::notify`]: crate::Scheduler::notify

use std::fmt;

use tether_core::TemplateError;

/// Errors from binding construction and flushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// A binding was built without a delivery callback.
    MissingCallback,
    /// The owner chain could not provide a scheduler.
    NoScheduler,
    /// A late-bound callback named a method its scope does not define.
    UnknownMethod { method: String },
    /// A bind template failed to parse.
    Template(TemplateError),
    /// `notify` was called from inside a reaction.
    ReentrantFlush,
    /// Items kept re-scheduling each other past the configured pass limit.
    CycleLimitExceeded { limit: usize, pending: usize },
    /// An empty or malformed data path.
    InvalidPath(String),
    /// Write to a path computed by a formula.
    ReadOnly { path: String },
    /// Links may only be created at the top level of a view model.
    NestedLink { key: String },
    /// A link would read its own value through itself.
    SelfLink { key: String },
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCallback => write!(f, "binding requires a callback"),
            Self::NoScheduler => write!(f, "no scheduler reachable from the binding owner"),
            Self::UnknownMethod { method } => {
                write!(f, "late-bound callback method '{method}' is not defined on its scope")
            }
            Self::Template(err) => write!(f, "template error: {err}"),
            Self::ReentrantFlush => write!(f, "notify cannot be called recursively"),
            Self::CycleLimitExceeded { limit, pending } => write!(
                f,
                "exceeded cycle limit of {limit} passes with {pending} item(s) still scheduled"
            ),
            Self::InvalidPath(path) => write!(f, "invalid data path: '{path}'"),
            Self::ReadOnly { path } => write!(f, "cannot set read-only formula value '{path}'"),
            Self::NestedLink { key } => {
                write!(f, "links can only be at the top level: '{key}'")
            }
            Self::SelfLink { key } => {
                write!(f, "link '{key}' would read through itself")
            }
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Template(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TemplateError> for BindError {
    fn from(err: TemplateError) -> Self {
        Self::Template(err)
    }
}
