#![forbid(unsafe_code)]

//! Computed paths.
//!
//! A [`Formula`] watches its dependencies through a [`MultiBinding`] and
//! writes `compute(inputs)` to its path whenever any of them changes. The
//! stub at that path sorts the formula ahead of itself, so consumers of a
//! formula see the new value in the same flush as the dependency change.
//!
//! A formula with a setter is writable: `set` on its path calls the setter
//! with the owning view model, which then writes whatever inputs it needs.
//! A `single` formula computes once and then destroys itself, leaving its
//! last value behind as plain data.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_core::Value;

use super::callback::{BindOptions, Callback};
use super::multi::MultiBinding;
use super::view_model::ViewModel;
use crate::error::BindError;
use crate::schedulable::{Schedulable, SchedulableState};
use crate::scheduler::Sorter;

/// Computes a value from the `{dependency: value}` object of its inputs.
pub type Compute = Rc<dyn Fn(&Value) -> Value>;

/// Receives writes to a formula path.
pub type Setter = Rc<dyn Fn(&ViewModel, &Value) -> Result<(), BindError>>;

pub struct Formula {
    state: SchedulableState,
    name: String,
    owner: Weak<ViewModel>,
    compute: Compute,
    setter: Option<Setter>,
    single: bool,
    multi: RefCell<Option<Rc<MultiBinding>>>,
    inputs: RefCell<Value>,
    value: RefCell<Value>,
}

impl Formula {
    pub(crate) fn create(
        view_model: &ViewModel,
        name: &str,
        deps: &[&str],
        compute: Compute,
        setter: Option<Setter>,
        single: bool,
    ) -> Result<Rc<Self>, BindError> {
        let formula = view_model.scheduler().adopt(|state, _| Self {
            state,
            name: name.to_owned(),
            owner: view_model.downgrade(),
            compute,
            setter,
            single,
            multi: RefCell::new(None),
            inputs: RefCell::new(Value::Undefined),
            value: RefCell::new(Value::Undefined),
        });

        let weak = Rc::downgrade(&formula);
        let on_inputs = Callback::direct(move |inputs, _, _| {
            if let Some(formula) = weak.upgrade() {
                formula.on_inputs(inputs);
            }
        });
        match view_model.bind_multi(deps, on_inputs, BindOptions::empty()) {
            Ok(multi) => *formula.multi.borrow_mut() = Some(multi),
            Err(err) => {
                formula.destroy();
                return Err(err);
            }
        }
        Ok(formula)
    }

    /// The path this formula writes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The last computed value.
    #[must_use]
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Whether writes to this formula's path are accepted.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    #[must_use]
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Hand `value` to the setter.
    pub fn set_value(&self, value: &Value) -> Result<(), BindError> {
        let Some(setter) = self.setter.clone() else {
            return Err(BindError::ReadOnly {
                path: self.name.clone(),
            });
        };
        match self.owner.upgrade() {
            Some(owner) => setter(&owner, value),
            None => Ok(()),
        }
    }

    fn on_inputs(&self, inputs: &Value) {
        *self.inputs.borrow_mut() = inputs.clone();
        self.schedule();
    }
}

impl Schedulable for Formula {
    fn schedulable(&self) -> &SchedulableState {
        &self.state
    }

    fn react(&self) -> Result<(), BindError> {
        let inputs = self.inputs.borrow().clone();
        let value = (self.compute)(&inputs);
        *self.value.borrow_mut() = value.clone();
        if let Some(owner) = self.owner.upgrade() {
            owner.write(&self.name, value)?;
        }
        if self.single {
            self.destroy();
        }
        Ok(())
    }

    fn sort(&self, sorter: &mut Sorter<'_>) {
        if let Some(multi) = self.multi.borrow().as_ref() {
            sorter.sort_item(multi.as_ref());
        }
    }

    fn destroy(&self) {
        if !self.state.retire() {
            return;
        }
        if let Some(multi) = self.multi.borrow_mut().take() {
            multi.destroy();
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.release_formula(&self.name, self.id());
        }
    }

    fn full_name(&self) -> String {
        format!("formula({})", self.name)
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("writable", &self.is_writable())
            .field("single", &self.single)
            .field("value", &*self.value.borrow())
            .finish()
    }
}

/// Fluent installation of a formula on a [`ViewModel`].
#[must_use]
pub struct FormulaBuilder<'a> {
    view_model: &'a ViewModel,
    name: String,
    deps: Vec<String>,
    compute: Compute,
    setter: Option<Setter>,
    single: bool,
}

impl<'a> FormulaBuilder<'a> {
    pub(crate) fn new(view_model: &'a ViewModel, name: &str, deps: &[&str], compute: Compute) -> Self {
        Self {
            view_model,
            name: name.to_owned(),
            deps: deps.iter().map(|dep| (*dep).to_owned()).collect(),
            compute,
            setter: None,
            single: false,
        }
    }

    /// Accept writes to the formula path through `setter`.
    pub fn setter(
        mut self,
        setter: impl Fn(&ViewModel, &Value) -> Result<(), BindError> + 'static,
    ) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    /// Compute once, then destroy the formula.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Install the formula, replacing any formula already at the path.
    pub fn install(self) -> Result<Rc<Formula>, BindError> {
        let deps: Vec<&str> = self.deps.iter().map(String::as_str).collect();
        self.view_model.install_formula(
            &self.name,
            &deps,
            self.compute,
            self.setter,
            self.single,
        )
    }
}
