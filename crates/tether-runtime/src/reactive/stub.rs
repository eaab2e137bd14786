#![forbid(unsafe_code)]

//! Per-path nodes of a view model's data tree.
//!
//! Every bound path owns a stub. A stub's value is read through its parent
//! (the root stub reads the view model's data object), so grafting a
//! [`LinkStub`](super::LinkStub) in place of a top-level stub redirects every
//! descendant without touching them.
//!
//! # Invariants
//!
//! 1. A stub sorts its parent (and its formula, if any) ahead of itself.
//! 2. A loading stub never schedules; its bindings wait for data.
//! 3. Parents own children (`Rc`); children point up with `Weak`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tether_core::Value;

use super::binding::Binding;
use super::formula::Formula;
use super::view_model::ViewModel;
use crate::error::BindError;
use crate::schedulable::{ItemId, Schedulable, SchedulableState};
use crate::scheduler::{Scheduler, Sorter};

/// Behavior shared by data stubs and link stubs.
pub trait StubNode: Schedulable {
    fn links(&self) -> &StubLinks;

    fn get_value(&self) -> Value;

    fn get_raw_value(&self) -> Value {
        self.get_value()
    }

    fn is_loading(&self) -> bool;

    fn as_schedulable(&self) -> &dyn Schedulable;

    /// Schedule this stub unless it is loading; `deep` also invalidates
    /// every descendant.
    fn invalidate(&self, deep: bool) {
        if !self.is_loading() {
            self.schedule();
        }
        if deep {
            for child in self.links().children() {
                child.invalidate(true);
            }
        }
    }
}

/// Tree links and binding registrations common to every stub.
pub struct StubLinks {
    name: String,
    path: String,
    owner: Weak<ViewModel>,
    parent: RefCell<Option<Weak<dyn StubNode>>>,
    children: RefCell<AHashMap<String, Rc<dyn StubNode>>>,
    bindings: RefCell<Vec<Weak<Binding>>>,
    formula: RefCell<Option<Weak<Formula>>>,
}

impl StubLinks {
    pub(crate) fn new(
        name: &str,
        path: &str,
        owner: Weak<ViewModel>,
        parent: Option<Weak<dyn StubNode>>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            owner,
            parent: RefCell::new(parent),
            children: RefCell::new(AHashMap::new()),
            bindings: RefCell::new(Vec::new()),
            formula: RefCell::new(None),
        }
    }

    /// Last path segment (empty for the root).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full dotted path from the view model root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn owner(&self) -> Option<Rc<ViewModel>> {
        self.owner.upgrade()
    }

    #[must_use]
    pub fn parent(&self) -> Option<Rc<dyn StubNode>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Weak<dyn StubNode>) {
        *self.parent.borrow_mut() = Some(parent);
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<Rc<dyn StubNode>> {
        self.children.borrow().get(name).cloned()
    }

    /// Snapshot of the direct children.
    #[must_use]
    pub fn children(&self) -> Vec<Rc<dyn StubNode>> {
        self.children.borrow().values().cloned().collect()
    }

    pub(crate) fn insert_child(&self, name: &str, child: Rc<dyn StubNode>) {
        self.children.borrow_mut().insert(name.to_owned(), child);
    }

    pub(crate) fn remove_child(&self, name: &str) -> Option<Rc<dyn StubNode>> {
        self.children.borrow_mut().remove(name)
    }

    pub(crate) fn take_children(&self) -> Vec<(String, Rc<dyn StubNode>)> {
        self.children.borrow_mut().drain().collect()
    }

    pub(crate) fn add_binding(&self, binding: &Rc<Binding>) {
        let mut bindings = self.bindings.borrow_mut();
        bindings.retain(|weak| weak.strong_count() > 0);
        bindings.push(Rc::downgrade(binding));
    }

    pub(crate) fn remove_binding(&self, id: ItemId) {
        self.bindings
            .borrow_mut()
            .retain(|weak| weak.upgrade().is_some_and(|b| b.id() != id));
    }

    /// Live bindings attached to this stub.
    #[must_use]
    pub fn bindings(&self) -> Vec<Rc<Binding>> {
        self.bindings
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn take_bindings(&self) -> Vec<Rc<Binding>> {
        self.bindings
            .borrow_mut()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    #[must_use]
    pub fn formula(&self) -> Option<Rc<Formula>> {
        self.formula.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_formula(&self, formula: Option<Weak<Formula>>) {
        *self.formula.borrow_mut() = formula;
    }

    pub(crate) fn schedule_bindings(&self) {
        for binding in self.bindings() {
            binding.schedule();
        }
    }

    pub(crate) fn sort_dependencies(&self, sorter: &mut Sorter<'_>) {
        if let Some(parent) = self.parent() {
            sorter.sort_item(parent.as_schedulable());
        }
        if let Some(formula) = self.formula() {
            sorter.sort_item(formula.as_ref());
        }
    }
}

impl fmt::Debug for StubLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubLinks")
            .field("path", &self.path)
            .field("children", &self.children.borrow().len())
            .field("bindings", &self.bindings.borrow().len())
            .finish()
    }
}

/// A plain data stub.
pub struct Stub {
    state: SchedulableState,
    links: StubLinks,
    had_value: Cell<bool>,
}

impl Stub {
    pub(crate) fn create(scheduler: &Scheduler, links: StubLinks) -> Rc<Self> {
        scheduler.adopt(|state, _| Self {
            state,
            links,
            had_value: Cell::new(false),
        })
    }
}

impl Schedulable for Stub {
    fn schedulable(&self) -> &SchedulableState {
        &self.state
    }

    fn react(&self) -> Result<(), BindError> {
        self.links.schedule_bindings();
        Ok(())
    }

    fn sort(&self, sorter: &mut Sorter<'_>) {
        self.links.sort_dependencies(sorter);
    }

    fn destroy(&self) {
        if self.state.retire() {
            self.links.bindings.borrow_mut().clear();
            self.links.set_formula(None);
        }
    }

    fn full_name(&self) -> String {
        if self.links.path.is_empty() {
            "stub(<root>)".to_owned()
        } else {
            format!("stub({})", self.links.path)
        }
    }
}

impl StubNode for Stub {
    fn links(&self) -> &StubLinks {
        &self.links
    }

    fn get_value(&self) -> Value {
        match self.links.parent() {
            Some(parent) => parent.get_value().get(&self.links.name),
            None => self
                .links
                .owner()
                .map(|vm| vm.data())
                .unwrap_or_default(),
        }
    }

    fn is_loading(&self) -> bool {
        if self.links.parent().is_some_and(|parent| parent.is_loading()) {
            return true;
        }
        if self.had_value.get() {
            return false;
        }
        let defined = !self.get_value().is_undefined();
        if defined {
            self.had_value.set(true);
        }
        !defined
    }

    fn as_schedulable(&self) -> &dyn Schedulable {
        self
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("state", &self.state)
            .field("links", &self.links)
            .finish()
    }
}
