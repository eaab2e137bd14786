#![forbid(unsafe_code)]

//! Change detection and delivery shared by every binding-like item.
//!
//! # Invariants
//!
//! A call to [`Delivery::notify`] reaches the callback when any of these hold:
//!
//! 1. nothing has been delivered yet,
//! 2. the binding is `DEEP`,
//! 3. the value differs from the last delivered one by [`Value::same`],
//! 4. the value is an array (arrays may have been mutated in place).
//!
//! The callback runs with no interior borrows held, so it may freely read
//! or destroy the binding that invoked it.

use std::cell::{Cell, RefCell};

use tether_core::Value;

use super::callback::{BindOptions, Callback};
use crate::error::BindError;
use crate::schedulable::Schedulable;

pub(crate) struct Delivery {
    callback: RefCell<Option<Callback>>,
    options: BindOptions,
    last_value: RefCell<Option<Value>>,
    calls: Cell<u64>,
}

impl Delivery {
    pub(crate) fn new(callback: Callback, options: BindOptions) -> Self {
        Self {
            callback: RefCell::new(Some(callback)),
            options,
            last_value: RefCell::new(None),
            calls: Cell::new(0),
        }
    }

    pub(crate) fn options(&self) -> BindOptions {
        self.options
    }

    pub(crate) fn calls(&self) -> u64 {
        self.calls.get()
    }

    pub(crate) fn last_value(&self) -> Option<Value> {
        self.last_value.borrow().clone()
    }

    /// Run the change gate; returns whether the callback was invoked.
    pub(crate) fn notify(&self, value: Value, binding: &dyn Schedulable) -> Result<bool, BindError> {
        if binding.is_destroyed() {
            return Ok(false);
        }
        let Some(callback) = self.callback.borrow().clone() else {
            return Ok(false);
        };

        let changed = self.calls.get() == 0
            || self.options.contains(BindOptions::DEEP)
            || value.is_array()
            || self
                .last_value
                .borrow()
                .as_ref()
                .is_none_or(|last| !value.same(last));
        if !changed {
            return Ok(false);
        }

        let handler = callback.resolve()?;
        let previous = self.last_value.replace(Some(value.clone()));
        self.calls.set(self.calls.get() + 1);
        handler(&value, previous.as_ref(), binding);

        if self.options.contains(BindOptions::SINGLE) {
            binding.destroy();
        }
        Ok(true)
    }

    /// Sever the callback (and with it, any captured scope).
    pub(crate) fn clear(&self) {
        self.callback.borrow_mut().take();
    }
}
