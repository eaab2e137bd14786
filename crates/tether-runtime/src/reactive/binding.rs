#![forbid(unsafe_code)]

//! Path bindings and lifecycle scopes.
//!
//! A [`Binding`] delivers the value of one data path to a callback. It
//! reacts after its stub and funnels every reaction through the shared change
//! gate, so unchanged values are delivered once.
//!
//! [`BindingScope`] collects bindings for a logical owner (e.g. a widget)
//! and destroys them together.
//!
//! # Invariants
//!
//! 1. A binding reacts only after its stub has reacted in the same pass.
//! 2. `SINGLE` bindings destroy themselves right after their first delivery.
//! 3. Destroying a binding detaches it from its stub, notifies the owner,
//!    and drops the callback; later deliveries are ignored.
//! 4. Scope teardown destroys held items in reverse registration order.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_core::Value;

use super::callback::{BindOptions, Callback, Scope};
use super::delivery::Delivery;
use super::stub::StubNode;
use super::view_model::ViewModel;
use super::{BindOwner, BoundValue, owner_scheduler, release_owner};
use crate::error::BindError;
use crate::schedulable::{Schedulable, SchedulableState};
use crate::scheduler::Sorter;

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Delivers one data path to a callback.
pub struct Binding {
    state: SchedulableState,
    owner: RefCell<Option<Weak<dyn BindOwner>>>,
    stub: RefCell<Option<Rc<dyn StubNode>>>,
    delivery: Delivery,
    negate: bool,
}

impl Binding {
    pub(crate) fn create(
        owner: Weak<dyn BindOwner>,
        stub: Rc<dyn StubNode>,
        callback: Callback,
        options: BindOptions,
        negate: bool,
    ) -> Result<Rc<Self>, BindError> {
        let scheduler = owner_scheduler(&owner)?;
        let binding = scheduler.adopt(|state, _| Self {
            state,
            owner: RefCell::new(Some(owner)),
            stub: RefCell::new(Some(Rc::clone(&stub))),
            delivery: Delivery::new(callback, options),
            negate,
        });
        stub.links().add_binding(&binding);
        if !stub.is_loading() {
            binding.schedule();
        }
        tracing::trace!(binding = %binding.full_name(), "bind");
        Ok(binding)
    }

    /// The bound path, or empty once destroyed.
    #[must_use]
    pub fn path(&self) -> String {
        self.stub
            .borrow()
            .as_ref()
            .map(|stub| stub.links().path().to_owned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stub(&self) -> Option<Rc<dyn StubNode>> {
        self.stub.borrow().clone()
    }

    #[must_use]
    pub fn options(&self) -> BindOptions {
        self.delivery.options()
    }

    /// Number of deliveries so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.delivery.calls()
    }

    /// The last delivered value.
    #[must_use]
    pub fn last_value(&self) -> Option<Value> {
        self.delivery.last_value()
    }

    /// Offer `value` to the change gate; returns whether it was delivered.
    pub fn notify(&self, value: Value) -> Result<bool, BindError> {
        self.delivery.notify(value, self)
    }

    /// Write through to the bound path. A no-op once destroyed.
    pub fn set_value(&self, value: Value) -> Result<(), BindError> {
        let Some(stub) = self.stub() else {
            return Ok(());
        };
        let path = stub.links().path().to_owned();
        if self.is_read_only() {
            return Err(BindError::ReadOnly { path });
        }
        match stub.links().owner() {
            Some(owner) => owner.set(&path, value),
            None => Ok(()),
        }
    }

    /// `{!path}` bindings and paths of setter-less formulas cannot be written.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.negate
            || self
                .stub
                .borrow()
                .as_ref()
                .is_some_and(|stub| {
                    stub.links()
                        .formula()
                        .is_some_and(|formula| !formula.is_writable())
                })
    }

    /// Move this binding onto another stub (used when a link is grafted).
    pub(crate) fn repoint(&self, stub: Rc<dyn StubNode>) {
        *self.stub.borrow_mut() = Some(stub);
    }
}

impl Schedulable for Binding {
    fn schedulable(&self) -> &SchedulableState {
        &self.state
    }

    fn react(&self) -> Result<(), BindError> {
        self.notify(self.get_value()).map(|_| ())
    }

    fn sort(&self, sorter: &mut Sorter<'_>) {
        if let Some(stub) = self.stub() {
            sorter.sort_item(stub.as_schedulable());
        }
    }

    fn destroy(&self) {
        if !self.state.retire() {
            return;
        }
        if let Some(stub) = self.stub.borrow_mut().take() {
            stub.links().remove_binding(self.id());
        }
        release_owner(self.owner.borrow_mut().take(), self.id());
        self.delivery.clear();
        tracing::trace!(binding = %self.id(), "destroyed");
    }

    fn full_name(&self) -> String {
        let bang = if self.negate { "!" } else { "" };
        format!("binding({bang}{})", self.path())
    }
}

impl BoundValue for Binding {
    fn get_value(&self) -> Value {
        let raw = self.get_raw_value();
        if self.negate {
            Value::Bool(!raw.is_truthy())
        } else {
            raw
        }
    }

    fn get_raw_value(&self) -> Value {
        self.stub()
            .map(|stub| stub.get_value())
            .unwrap_or_default()
    }

    fn is_loading(&self) -> bool {
        self.stub().is_some_and(|stub| stub.is_loading())
    }

    fn as_schedulable(&self) -> &dyn Schedulable {
        self
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("path", &self.path())
            .field("state", &self.state)
            .field("calls", &self.calls())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BindingBuilder
// ---------------------------------------------------------------------------

/// Fluent construction of a binding against a [`ViewModel`].
#[must_use]
pub struct BindingBuilder<'a> {
    view_model: &'a ViewModel,
    descriptor: String,
    callback: Option<Callback>,
    options: BindOptions,
}

impl<'a> BindingBuilder<'a> {
    pub(crate) fn new(view_model: &'a ViewModel, descriptor: &str) -> Self {
        Self {
            view_model,
            descriptor: descriptor.to_owned(),
            callback: None,
            options: BindOptions::empty(),
        }
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn handler(self, handler: impl Fn(&Value, Option<&Value>, &dyn Schedulable) + 'static) -> Self {
        self.callback(Callback::direct(handler))
    }

    pub fn late_bound(self, scope: &Rc<Scope>, method: &str) -> Self {
        self.callback(Callback::late_bound(scope, method))
    }

    pub fn options(mut self, options: BindOptions) -> Self {
        self.options |= options;
        self
    }

    pub fn single(self) -> Self {
        self.options(BindOptions::SINGLE)
    }

    pub fn deep(self) -> Self {
        self.options(BindOptions::DEEP)
    }

    /// Create the binding; fails with [`BindError::MissingCallback`] when no
    /// callback was given.
    pub fn build(self) -> Result<Rc<dyn BoundValue>, BindError> {
        let callback = self.callback.ok_or(BindError::MissingCallback)?;
        self.view_model
            .bind(&self.descriptor, callback, self.options)
    }
}

// ---------------------------------------------------------------------------
// BindingScope
// ---------------------------------------------------------------------------

/// Collects bindings for a logical scope (e.g. a widget).
///
/// Dropping the scope destroys everything it holds.
///
/// # Invariants
///
/// 1. Items are destroyed in reverse registration order.
/// 2. `clear()` destroys immediately and leaves the scope reusable.
pub struct BindingScope {
    teardown: Vec<Box<dyn FnOnce()>>,
}

impl BindingScope {
    #[must_use]
    pub fn new() -> Self {
        Self {
            teardown: Vec::new(),
        }
    }

    /// Hold `item` until the scope is cleared or dropped; returns it back.
    pub fn hold<T>(&mut self, item: Rc<T>) -> Rc<T>
    where
        T: Schedulable + ?Sized + 'static,
    {
        let held = Rc::clone(&item);
        self.teardown.push(Box::new(move || held.destroy()));
        item
    }

    /// Destroy all held items.
    pub fn clear(&mut self) {
        while let Some(teardown) = self.teardown.pop() {
            teardown();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.teardown.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.teardown.is_empty()
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Default for BindingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.teardown.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerConfig;
    use crate::reactive::BindSource;
    use std::cell::Cell;

    type Calls = Rc<RefCell<Vec<(Value, Option<Value>)>>>;

    fn recorder() -> (Calls, Callback) {
        let calls = Calls::default();
        let sink = Rc::clone(&calls);
        let callback = Callback::direct(move |value, previous, _| {
            sink.borrow_mut().push((value.clone(), previous.cloned()));
        });
        (calls, callback)
    }

    fn bind(vm: &ViewModel, path: &str, options: BindOptions) -> (Calls, Rc<Binding>) {
        let (calls, callback) = recorder();
        let binding = vm.bind_path(path, callback, options).unwrap();
        (calls, binding)
    }

    #[test]
    fn unchanged_value_delivers_once() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let (calls, binding) = bind(&vm, "x", BindOptions::empty());
        assert!(binding.notify(Value::from(7)).unwrap());
        assert!(!binding.notify(Value::from(7)).unwrap());
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0], (Value::from(7), None));
    }

    #[test]
    fn deep_binding_always_delivers() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let (calls, binding) = bind(&vm, "x", BindOptions::DEEP);
        let obj = Value::empty_object();
        binding.notify(obj.clone()).unwrap();
        binding.notify(obj.clone()).unwrap();
        binding.notify(obj).unwrap();
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn arrays_always_deliver() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let (calls, binding) = bind(&vm, "x", BindOptions::empty());
        let list = Value::array([Value::from(1), Value::from(2), Value::from(3)]);
        binding.notify(list.clone()).unwrap();
        binding.notify(list).unwrap();
        assert_eq!(calls.borrow().len(), 2);

        let obj = Value::empty_object();
        binding.notify(obj.clone()).unwrap();
        binding.notify(obj).unwrap();
        assert_eq!(calls.borrow().len(), 3, "objects dedupe by identity");
    }

    #[test]
    fn single_binding_destroys_after_first_delivery() {
        let vm = ViewModel::new(SchedulerConfig::default());
        vm.set("x", Value::from(1)).unwrap();
        let (calls, binding) = bind(&vm, "x", BindOptions::SINGLE);
        vm.notify().unwrap();
        assert_eq!(calls.borrow().len(), 1);
        assert!(binding.is_destroyed());

        binding.schedule();
        assert!(!binding.is_scheduled());
        assert!(!binding.notify(Value::from(99)).unwrap());
        vm.set("x", Value::from(2)).unwrap();
        vm.notify().unwrap();
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn destroy_is_idempotent_and_releases_owner() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let (_calls, binding) = bind(&vm, "x", BindOptions::empty());
        assert_eq!(vm.binding_count(), 1);
        binding.destroy();
        binding.destroy();
        assert_eq!(vm.binding_count(), 0);
        assert_eq!(binding.path(), "");
        assert!(vm.stub("x").unwrap().links().bindings().is_empty());
    }

    #[test]
    fn negated_binding_is_read_only() {
        let vm = ViewModel::new(SchedulerConfig::default());
        vm.set("busy", Value::from(true)).unwrap();
        let (calls, callback) = recorder();
        let negated = vm.bind("{!busy}", callback, BindOptions::empty()).unwrap();
        assert_eq!(negated.get_value(), Value::Bool(false));
        assert_eq!(negated.get_raw_value(), Value::Bool(true));
        vm.notify().unwrap();
        assert_eq!(calls.borrow()[0].0, Value::Bool(false));

        let plain = vm
            .bind_path("busy", Callback::direct(|_, _, _| {}), BindOptions::empty())
            .unwrap();
        assert!(!plain.is_read_only());
        plain.set_value(Value::from(false)).unwrap();
        assert_eq!(vm.get("busy"), Value::from(false));
    }

    #[test]
    fn late_bound_callback_follows_scope_changes() {
        let vm = ViewModel::new(SchedulerConfig::default());
        vm.set("title", Value::from("a")).unwrap();
        let scope = Scope::new("controller");
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));

        let hits = Rc::clone(&first);
        scope.define("onTitle", move |_, _, _| hits.set(hits.get() + 1));
        let _binding = vm
            .binding("{title}")
            .late_bound(&scope, "onTitle")
            .build()
            .unwrap();
        vm.notify().unwrap();

        let hits = Rc::clone(&second);
        scope.define("onTitle", move |_, _, _| hits.set(hits.get() + 1));
        vm.set("title", Value::from("b")).unwrap();
        vm.notify().unwrap();
        assert_eq!((first.get(), second.get()), (1, 1));

        scope.remove("onTitle");
        vm.set("title", Value::from("c")).unwrap();
        assert_eq!(
            vm.notify(),
            Err(BindError::UnknownMethod {
                method: "onTitle".into()
            })
        );
    }

    #[test]
    fn builder_requires_callback() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let err = vm.binding("{x}").deep().build().err();
        assert_eq!(err, Some(BindError::MissingCallback));
    }

    #[test]
    fn scope_destroys_in_reverse_order() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut scope = BindingScope::new();
        for path in ["a", "b", "c"] {
            let binding = scope.hold(
                vm.bind_path(path, Callback::direct(|_, _, _| {}), BindOptions::empty())
                    .unwrap(),
            );
            let log = Rc::clone(&order);
            let id = binding.id();
            scope.hold(vm.scheduler().adopt(|state, _| Marker { state, log, id }));
        }
        assert_eq!(scope.len(), 6);
        assert_eq!(vm.binding_count(), 3);

        drop(scope);
        assert_eq!(vm.binding_count(), 0);
        assert_eq!(order.borrow().len(), 3);
        assert!(order.borrow().windows(2).all(|w| w[0] > w[1]));
    }

    struct Marker {
        state: SchedulableState,
        log: Rc<RefCell<Vec<crate::ItemId>>>,
        id: crate::ItemId,
    }

    impl Schedulable for Marker {
        fn schedulable(&self) -> &SchedulableState {
            &self.state
        }

        fn react(&self) -> Result<(), BindError> {
            Ok(())
        }

        fn destroy(&self) {
            if self.state.retire() {
                self.log.borrow_mut().push(self.id);
            }
        }
    }

    #[test]
    fn scope_clear_is_reusable() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let mut scope = BindingScope::default();
        scope.hold(
            vm.bind_path("a", Callback::direct(|_, _, _| {}), BindOptions::empty())
                .unwrap(),
        );
        scope.clear();
        assert!(scope.is_empty());
        assert_eq!(vm.binding_count(), 0);

        let bound = vm
            .bind("{a} {b}", Callback::direct(|_, _, _| {}), BindOptions::empty())
            .unwrap();
        scope.hold(bound);
        assert_eq!(scope.len(), 1);
        assert!(format!("{scope:?}").contains("binding_count: 1"));
    }
}
