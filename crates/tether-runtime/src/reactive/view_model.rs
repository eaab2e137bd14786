#![forbid(unsafe_code)]

//! The data owner bindings read from.
//!
//! A [`ViewModel`] holds a root data object, a tree of stubs (one per bound
//! path), top-level links, and formulas. Child view models share their
//! parent's scheduler, so one flush settles the whole hierarchy.
//!
//! # Invariants
//!
//! 1. `set` never delivers synchronously; it only schedules.
//! 2. Setting an identical scalar is a no-op.
//! 3. Links exist only at the top level; writes below a link go to its
//!    target.
//! 4. Formula paths are read-only to callers unless the formula has a
//!    setter, which then receives the write.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Empty or malformed path | `""`, `"a..b"` | `BindError::InvalidPath` |
//! | Write to setter-less formula or template link | `set("total", ..)` | `BindError::ReadOnly` |
//! | Nested link key | `link_to("a.b", ..)` | `BindError::NestedLink` |
//! | Link reading through itself | `link_to("user", "{user.friend}", &vm)` | `BindError::SelfLink` |
//! | Bad template | unknown format | `BindError::Template` |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tether_core::{Template, Value};

use super::binding::{Binding, BindingBuilder};
use super::callback::{BindOptions, Callback};
use super::formula::{Compute, Formula, FormulaBuilder, Setter};
use super::link::LinkStub;
use super::multi::MultiBinding;
use super::stub::{Stub, StubLinks, StubNode};
use super::template::TemplateBinding;
use super::{BindOwner, BindSource, BoundValue};
use crate::error::BindError;
use crate::schedulable::{ItemId, Schedulable};
use crate::scheduler::{Scheduler, SchedulerConfig};

pub struct ViewModel {
    this: Weak<ViewModel>,
    scheduler: Scheduler,
    parent: Option<Rc<ViewModel>>,
    data: Value,
    root: Rc<Stub>,
    links: RefCell<AHashMap<String, Rc<LinkStub>>>,
    link_data: RefCell<AHashMap<String, Value>>,
    formulas: RefCell<AHashMap<String, Rc<Formula>>>,
    bindings: RefCell<AHashMap<ItemId, Weak<dyn Schedulable>>>,
}

impl ViewModel {
    /// A root view model with its own scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Rc<Self> {
        Self::with_scheduler(Scheduler::new(config))
    }

    /// A root view model on an existing scheduler.
    #[must_use]
    pub fn with_scheduler(scheduler: Scheduler) -> Rc<Self> {
        Self::build(scheduler, None)
    }

    /// A child view model; its scheduler is resolved from the parent chain.
    #[must_use]
    pub fn with_parent(parent: &Rc<ViewModel>) -> Rc<Self> {
        Self::build(parent.scheduler.clone(), Some(Rc::clone(parent)))
    }

    fn build(scheduler: Scheduler, parent: Option<Rc<ViewModel>>) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<ViewModel>| {
            let root = Stub::create(&scheduler, StubLinks::new("", "", this.clone(), None));
            Self {
                this: this.clone(),
                scheduler,
                parent,
                data: Value::empty_object(),
                root,
                links: RefCell::new(AHashMap::new()),
                link_data: RefCell::new(AHashMap::new()),
                formulas: RefCell::new(AHashMap::new()),
                bindings: RefCell::new(AHashMap::new()),
            }
        })
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Rc<ViewModel>> {
        self.parent.as_ref()
    }

    pub(crate) fn downgrade(&self) -> Weak<ViewModel> {
        self.this.clone()
    }

    /// The root data object.
    #[must_use]
    pub fn data(&self) -> Value {
        self.data.clone()
    }

    /// Flush the scheduler.
    pub fn notify(&self) -> Result<(), BindError> {
        self.scheduler.notify()
    }

    /// Number of live bindings created through this view model.
    ///
    /// Bindings dropped without `destroy` are pruned here.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        let mut bindings = self.bindings.borrow_mut();
        bindings.retain(|_, weak| weak.upgrade().is_some_and(|item| !item.is_destroyed()));
        bindings.len()
    }

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------

    /// Read `path`, following links.
    #[must_use]
    pub fn get(&self, path: &str) -> Value {
        if path.is_empty() {
            return self.data();
        }
        let (head, rest) = split_head(path);
        let link = self.links.borrow().get(head).cloned();
        match (link, rest) {
            (Some(link), None) => link.get_value(),
            (Some(link), Some(rest)) => link.get_value().lookup(rest),
            (None, _) => self.data.lookup(path),
        }
    }

    /// Write `path` and schedule everything bound to it.
    ///
    /// Writes at or below a link are forwarded to the link target. Writes to
    /// a formula path go to its setter.
    pub fn set(&self, path: &str, value: Value) -> Result<(), BindError> {
        check_path(path)?;
        let formula = self.formulas.borrow().get(path).cloned();
        if let Some(formula) = formula {
            return formula.set_value(&value);
        }
        let (head, rest) = split_head(path);
        let link = self.links.borrow().get(head).cloned();
        match link {
            Some(link) => link.forward_set(rest, value),
            None => self.write(path, value),
        }
    }

    /// Store `value` and invalidate the affected stubs.
    pub(crate) fn write(&self, path: &str, value: Value) -> Result<(), BindError> {
        check_path(path)?;
        let current = self.data.lookup(path);
        if !value.is_object() && !value.is_array() && current.same(&value) {
            return Ok(());
        }
        self.data.set_path(path, value);
        tracing::trace!(path, "set");

        // Stubs along the path, root excluded.
        let mut chain: Vec<Rc<dyn StubNode>> = Vec::new();
        let mut node: Rc<dyn StubNode> = self.root.clone();
        let mut exact = true;
        for segment in path.split('.') {
            match node.links().child(segment) {
                Some(child) => {
                    chain.push(Rc::clone(&child));
                    node = child;
                }
                None => {
                    exact = false;
                    break;
                }
            }
        }
        if exact {
            if let Some(target) = chain.pop() {
                target.invalidate(true);
            }
        }
        // Ancestors were mutated in place.
        for ancestor in chain.iter().rev() {
            ancestor.invalidate(false);
        }
        Ok(())
    }

    /// The stub for `path`, creating it and any missing ancestors.
    pub fn stub(&self, path: &str) -> Result<Rc<dyn StubNode>, BindError> {
        check_path(path)?;
        let mut node: Rc<dyn StubNode> = self.root.clone();
        let mut end = 0;
        for segment in path.split('.') {
            end += segment.len();
            let next = node.links().child(segment);
            node = match next {
                Some(child) => child,
                None => {
                    let links =
                        StubLinks::new(segment, &path[..end], self.this.clone(), Some(Rc::downgrade(&node)));
                    let child: Rc<dyn StubNode> = Stub::create(&self.scheduler, links);
                    node.links().insert_child(segment, Rc::clone(&child));
                    child
                }
            };
            end += 1;
        }
        Ok(node)
    }

    fn existing_stub(&self, path: &str) -> Option<Rc<dyn StubNode>> {
        let mut node: Rc<dyn StubNode> = self.root.clone();
        for segment in path.split('.') {
            let next = node.links().child(segment)?;
            node = next;
        }
        Some(node)
    }

    // -----------------------------------------------------------------------
    // Binding
    // -----------------------------------------------------------------------

    /// Bind a descriptor: `{path}` and `{!path}` bind one path; any other
    /// text is a template.
    pub fn bind(
        &self,
        descriptor: &str,
        callback: Callback,
        options: BindOptions,
    ) -> Result<Rc<dyn BoundValue>, BindError> {
        let template = Template::parse(descriptor)?;
        if let Some((path, negate)) = template.single_path() {
            let binding = self.bind_path_with(path, callback, options, negate)?;
            return Ok(binding);
        }
        let binding = TemplateBinding::create(self, template, callback, options)?;
        self.track(&binding);
        Ok(binding)
    }

    /// Start a fluent binding.
    pub fn binding(&self, descriptor: &str) -> BindingBuilder<'_> {
        BindingBuilder::new(self, descriptor)
    }

    /// Bind several paths into one `{token: value}` object.
    pub fn bind_multi(
        &self,
        tokens: &[&str],
        callback: Callback,
        options: BindOptions,
    ) -> Result<Rc<MultiBinding>, BindError> {
        let tokens = tokens.iter().map(|token| (*token).to_owned()).collect();
        let multi = MultiBinding::create(self, tokens, callback, options)?;
        self.track(&multi);
        Ok(multi)
    }

    fn bind_path_with(
        &self,
        path: &str,
        callback: Callback,
        options: BindOptions,
        negate: bool,
    ) -> Result<Rc<Binding>, BindError> {
        let stub = self.stub(path)?;
        let binding = Binding::create(self.as_owner(), stub, callback, options, negate)?;
        self.track(&binding);
        Ok(binding)
    }

    fn track<T: Schedulable + 'static>(&self, item: &Rc<T>) {
        if !item.is_destroyed() {
            let weak: Weak<dyn Schedulable> = Rc::downgrade(item) as Weak<dyn Schedulable>;
            self.bindings.borrow_mut().insert(item.id(), weak);
        }
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Link top-level `key` to `descriptor` on `target`.
    ///
    /// An existing data stub at `key` is replaced; its children and bindings
    /// move onto the link.
    pub fn link_to(
        &self,
        key: &str,
        descriptor: &str,
        target: &Rc<ViewModel>,
    ) -> Result<Rc<LinkStub>, BindError> {
        check_path(key)?;
        if key.contains('.') {
            return Err(BindError::NestedLink {
                key: key.to_owned(),
            });
        }
        let tokens = Template::parse(descriptor)?.tokens().to_vec();
        if self.link_reaches(target, &tokens, key, &mut Vec::new()) {
            return Err(BindError::SelfLink {
                key: key.to_owned(),
            });
        }
        let existing = self.links.borrow().get(key).cloned();
        if let Some(link) = existing {
            link.link(descriptor, target)?;
            return Ok(link);
        }

        let root: Rc<dyn StubNode> = self.root.clone();
        let links = StubLinks::new(key, key, self.this.clone(), Some(Rc::downgrade(&root)));
        let link = LinkStub::create(&self.scheduler, links);
        if let Some(old) = self.root.links().remove_child(key) {
            graft(&old, &link);
        }
        self.root.links().insert_child(key, link.clone());
        self.links.borrow_mut().insert(key.to_owned(), Rc::clone(&link));
        link.link(descriptor, target)?;
        Ok(link)
    }

    /// Whether reading `tokens` on `target` leads back to this view model's
    /// `key`, directly or through other links.
    fn link_reaches(
        &self,
        target: &Rc<ViewModel>,
        tokens: &[String],
        key: &str,
        seen: &mut Vec<(*const ViewModel, String)>,
    ) -> bool {
        for token in tokens {
            let (head, _) = split_head(token);
            if std::ptr::eq(Rc::as_ptr(target), self) && head == key {
                return true;
            }
            let Some(next) = target.link(head) else {
                continue;
            };
            let visited = (Rc::as_ptr(target), head.to_owned());
            if seen.contains(&visited) {
                continue;
            }
            seen.push(visited);
            if let Some((next_target, next_tokens)) = next.target_tokens() {
                if self.link_reaches(&next_target, &next_tokens, key, seen) {
                    return true;
                }
            }
        }
        false
    }

    #[must_use]
    pub fn link(&self, key: &str) -> Option<Rc<LinkStub>> {
        self.links.borrow().get(key).cloned()
    }

    /// The value a link recorded on its last reaction.
    #[must_use]
    pub fn link_data(&self, key: &str) -> Value {
        self.link_data
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn record_link_data(&self, key: &str, value: Value) {
        self.link_data.borrow_mut().insert(key.to_owned(), value);
    }

    pub(crate) fn remove_link_data(&self, key: &str) {
        self.link_data.borrow_mut().remove(key);
    }

    // -----------------------------------------------------------------------
    // Formulas
    // -----------------------------------------------------------------------

    /// Compute `name` from `deps`, replacing any formula already there.
    ///
    /// The path is read-only. Use [`ViewModel::define_formula`] for a setter
    /// or a one-shot formula.
    pub fn set_formula(
        &self,
        name: &str,
        deps: &[&str],
        compute: impl Fn(&Value) -> Value + 'static,
    ) -> Result<Rc<Formula>, BindError> {
        self.define_formula(name, deps, compute).install()
    }

    /// Start a fluent formula definition.
    pub fn define_formula(
        &self,
        name: &str,
        deps: &[&str],
        compute: impl Fn(&Value) -> Value + 'static,
    ) -> FormulaBuilder<'_> {
        FormulaBuilder::new(self, name, deps, Rc::new(compute))
    }

    pub(crate) fn install_formula(
        &self,
        name: &str,
        deps: &[&str],
        compute: Compute,
        setter: Option<Setter>,
        single: bool,
    ) -> Result<Rc<Formula>, BindError> {
        check_path(name)?;
        let previous = self.formulas.borrow_mut().remove(name);
        if let Some(previous) = previous {
            previous.destroy();
        }
        let formula = Formula::create(self, name, deps, compute, setter, single)?;
        let stub = self.stub(name)?;
        stub.links().set_formula(Some(Rc::downgrade(&formula)));
        self.formulas
            .borrow_mut()
            .insert(name.to_owned(), Rc::clone(&formula));
        tracing::debug!(
            formula = name,
            deps = deps.len(),
            writable = formula.is_writable(),
            single,
            "formula installed"
        );
        Ok(formula)
    }

    /// Forget the formula `id` at `name`; its last value stays as data.
    pub(crate) fn release_formula(&self, name: &str, id: ItemId) {
        let mut formulas = self.formulas.borrow_mut();
        if formulas.get(name).is_some_and(|formula| formula.id() == id) {
            formulas.remove(name);
        }
        drop(formulas);
        if let Some(stub) = self.existing_stub(name) {
            let current = stub.links().formula();
            if current.is_none_or(|formula| formula.id() == id) {
                stub.links().set_formula(None);
            }
        }
    }

    #[must_use]
    pub fn formula(&self, name: &str) -> Option<Rc<Formula>> {
        self.formulas.borrow().get(name).cloned()
    }

    /// Tear down links, formulas, and every stub.
    pub fn destroy(&self) {
        let links: Vec<_> = self.links.borrow_mut().drain().map(|(_, l)| l).collect();
        for link in links {
            link.destroy();
        }
        let formulas: Vec<_> = self.formulas.borrow_mut().drain().map(|(_, f)| f).collect();
        for formula in formulas {
            formula.destroy();
        }
        destroy_tree(self.root.as_ref());
    }
}

impl BindOwner for ViewModel {
    fn scheduler(&self) -> Option<Scheduler> {
        Some(self.scheduler.clone())
    }

    fn on_bind_destroy(&self, binding: ItemId) {
        self.bindings.borrow_mut().remove(&binding);
    }
}

impl BindSource for ViewModel {
    fn bind_path(
        &self,
        path: &str,
        callback: Callback,
        options: BindOptions,
    ) -> Result<Rc<Binding>, BindError> {
        self.bind_path_with(path, callback, options, false)
    }

    fn as_owner(&self) -> Weak<dyn BindOwner> {
        self.this.clone()
    }
}

impl fmt::Debug for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut links: Vec<String> = self.links.borrow().keys().cloned().collect();
        links.sort();
        f.debug_struct("ViewModel")
            .field("data", &self.data)
            .field("links", &links)
            .field("formulas", &self.formulas.borrow().len())
            .field("bindings", &self.binding_count())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Move `old`'s children and bindings onto `link`, then destroy `old`.
fn graft(old: &Rc<dyn StubNode>, link: &Rc<LinkStub>) {
    let node: Rc<dyn StubNode> = link.clone();
    for (name, child) in old.links().take_children() {
        child.links().set_parent(Rc::downgrade(&node));
        link.links().insert_child(&name, child);
    }
    for binding in old.links().take_bindings() {
        binding.repoint(Rc::clone(&node));
        link.links().add_binding(&binding);
    }
    old.destroy();
    tracing::debug!(key = %link.links().name(), "grafted link over existing stub");
}

fn destroy_tree(node: &dyn StubNode) {
    for child in node.links().children() {
        destroy_tree(child.as_ref());
    }
    node.destroy();
}

fn check_path(path: &str) -> Result<(), BindError> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(BindError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

fn split_head(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}
