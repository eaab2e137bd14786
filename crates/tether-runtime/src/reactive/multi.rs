#![forbid(unsafe_code)]

//! Fan-in of several path bindings into one object value.
//!
//! A [`MultiBinding`] owns one child [`Binding`] per token. Nothing is
//! delivered until every token has delivered once; from then on each child
//! delivery stores its value and schedules the multi, which reacts after all
//! of its children and delivers a fresh `{token: value}` object.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_core::Value;

use super::binding::Binding;
use super::callback::{BindOptions, Callback};
use super::delivery::Delivery;
use super::{BindOwner, BindSource, BoundValue, release_owner};
use crate::error::BindError;
use crate::schedulable::{Schedulable, SchedulableState};
use crate::scheduler::Sorter;

/// Aggregate binding over named dependencies.
pub struct MultiBinding {
    state: SchedulableState,
    owner: RefCell<Option<Weak<dyn BindOwner>>>,
    tokens: Vec<String>,
    children: RefCell<Vec<Rc<Binding>>>,
    values: RefCell<Vec<Option<Value>>>,
    delivery: Delivery,
}

impl MultiBinding {
    pub(crate) fn create(
        source: &dyn BindSource,
        tokens: Vec<String>,
        callback: Callback,
        options: BindOptions,
    ) -> Result<Rc<Self>, BindError> {
        let scheduler = source.scheduler().ok_or(BindError::NoScheduler)?;
        let count = tokens.len();
        let multi = scheduler.adopt(|state, _| Self {
            state,
            owner: RefCell::new(Some(source.as_owner())),
            tokens,
            children: RefCell::new(Vec::with_capacity(count)),
            values: RefCell::new(vec![None; count]),
            delivery: Delivery::new(callback, options),
        });

        let child_options = options & BindOptions::DEEP;
        for (index, token) in multi.tokens.iter().enumerate() {
            let weak = Rc::downgrade(&multi);
            let on_data = Callback::direct(move |value, _, _| {
                if let Some(multi) = weak.upgrade() {
                    multi.on_child_data(index, value);
                }
            });
            match source.bind_path(token, on_data, child_options) {
                Ok(child) => multi.children.borrow_mut().push(child),
                Err(err) => {
                    multi.destroy();
                    return Err(err);
                }
            }
        }
        if count == 0 {
            multi.schedule();
        }
        Ok(multi)
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn children(&self) -> Vec<Rc<Binding>> {
        self.children.borrow().clone()
    }

    /// Whether every token has delivered at least once.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.values.borrow().iter().all(Option::is_some)
    }

    /// The current `{token: value}` object (a new identity every call).
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let values = self.values.borrow();
        Value::object(
            self.tokens
                .iter()
                .zip(values.iter())
                .map(|(token, value)| (token.as_str(), value.clone().unwrap_or_default())),
        )
    }

    fn on_child_data(&self, index: usize, value: &Value) {
        let ready = {
            let mut values = self.values.borrow_mut();
            if let Some(slot) = values.get_mut(index) {
                *slot = Some(value.clone());
            }
            values.iter().all(Option::is_some)
        };
        if ready {
            self.schedule();
        }
    }
}

impl Schedulable for MultiBinding {
    fn schedulable(&self) -> &SchedulableState {
        &self.state
    }

    fn react(&self) -> Result<(), BindError> {
        if !self.is_ready() {
            return Ok(());
        }
        self.delivery.notify(self.snapshot(), self).map(|_| ())
    }

    fn sort(&self, sorter: &mut Sorter<'_>) {
        sorter.sort_items(self.children.borrow().iter());
    }

    fn destroy(&self) {
        if !self.state.retire() {
            return;
        }
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children {
            child.destroy();
        }
        release_owner(self.owner.borrow_mut().take(), self.id());
        self.delivery.clear();
    }

    fn full_name(&self) -> String {
        format!("multi({})", self.tokens.join(","))
    }
}

impl BoundValue for MultiBinding {
    fn get_value(&self) -> Value {
        self.snapshot()
    }

    fn is_loading(&self) -> bool {
        !self.is_ready()
            || self
                .children
                .borrow()
                .iter()
                .any(|child| child.is_loading())
    }

    fn as_schedulable(&self) -> &dyn Schedulable {
        self
    }
}

impl fmt::Debug for MultiBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiBinding")
            .field("tokens", &self.tokens)
            .field("state", &self.state)
            .field("ready", &self.is_ready())
            .finish()
    }
}
