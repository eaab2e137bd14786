#![forbid(unsafe_code)]

//! Delivery targets and binding options.
//!
//! A [`Callback`] is either a direct closure fixed at bind time or a
//! late-bound `(scope, method)` pair resolved on every delivery. Late binding
//! lets an owner swap its method table after bindings were created and have
//! existing bindings follow the replacement.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use bitflags::bitflags;
use tether_core::Value;

use crate::error::BindError;
use crate::schedulable::Schedulable;

bitflags! {
    /// Options recognized by every binding-like item.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BindOptions: u8 {
        /// Destroy the binding after its first delivery.
        const SINGLE = 1 << 0;
        /// Redeliver even when the value is unchanged by identity.
        const DEEP = 1 << 1;
    }
}

/// Delivery signature: `(new value, previous value, binding)`.
///
/// The previous value is `None` on the first delivery.
pub type Handler = Rc<dyn Fn(&Value, Option<&Value>, &dyn Schedulable)>;

/// A named, replaceable method table used for late-bound callbacks.
pub struct Scope {
    name: String,
    methods: RefCell<AHashMap<String, Handler>>,
}

impl Scope {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            methods: RefCell::new(AHashMap::new()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Define or replace `method`. Bindings pick up the new handler on their
    /// next delivery.
    pub fn define(
        &self,
        method: impl Into<String>,
        handler: impl Fn(&Value, Option<&Value>, &dyn Schedulable) + 'static,
    ) {
        self.methods
            .borrow_mut()
            .insert(method.into(), Rc::new(handler));
    }

    /// Remove `method`; returns whether it was defined.
    pub fn remove(&self, method: &str) -> bool {
        self.methods.borrow_mut().remove(method).is_some()
    }

    #[must_use]
    pub fn has(&self, method: &str) -> bool {
        self.methods.borrow().contains_key(method)
    }

    fn lookup(&self, method: &str) -> Option<Handler> {
        self.methods.borrow().get(method).cloned()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods = self.methods.borrow();
        let mut names: Vec<&String> = methods.keys().collect();
        names.sort();
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("methods", &names)
            .finish()
    }
}

/// Where a binding delivers its value.
#[derive(Clone)]
pub enum Callback {
    /// A closure fixed at bind time.
    Direct(Handler),
    /// A method name resolved on `scope` at delivery time.
    LateBound { scope: Rc<Scope>, method: String },
}

impl Callback {
    pub fn direct(handler: impl Fn(&Value, Option<&Value>, &dyn Schedulable) + 'static) -> Self {
        Self::Direct(Rc::new(handler))
    }

    pub fn late_bound(scope: &Rc<Scope>, method: impl Into<String>) -> Self {
        Self::LateBound {
            scope: Rc::clone(scope),
            method: method.into(),
        }
    }

    #[must_use]
    pub fn is_late_bound(&self) -> bool {
        matches!(self, Self::LateBound { .. })
    }

    /// The handler to invoke right now.
    pub(crate) fn resolve(&self) -> Result<Handler, BindError> {
        match self {
            Self::Direct(handler) => Ok(Rc::clone(handler)),
            Self::LateBound { scope, method } => {
                scope.lookup(method).ok_or_else(|| BindError::UnknownMethod {
                    method: method.clone(),
                })
            }
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("Callback::Direct(..)"),
            Self::LateBound { scope, method } => f
                .debug_struct("Callback::LateBound")
                .field("scope", &scope.name())
                .field("method", method)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_bound_resolves_at_call_time() {
        let scope = Scope::new("controller");
        let callback = Callback::late_bound(&scope, "onTitle");
        assert!(callback.is_late_bound());
        assert_eq!(
            callback.resolve().err(),
            Some(BindError::UnknownMethod {
                method: "onTitle".into()
            })
        );

        scope.define("onTitle", |_, _, _| {});
        assert!(callback.resolve().is_ok());
        assert!(scope.remove("onTitle"));
        assert!(!scope.has("onTitle"));
        assert!(callback.resolve().is_err());
    }

    #[test]
    fn direct_always_resolves() {
        let callback = Callback::direct(|_, _, _| {});
        assert!(!callback.is_late_bound());
        assert!(callback.resolve().is_ok());
    }

    #[test]
    fn options_compose() {
        let options = BindOptions::SINGLE | BindOptions::DEEP;
        assert!(options.contains(BindOptions::DEEP));
        assert_eq!(BindOptions::default(), BindOptions::empty());
    }
}
