#![forbid(unsafe_code)]

//! Top-level slots that forward to another binding.
//!
//! A [`LinkStub`] holds no value of its own. Reads delegate to an inner
//! binding created against a target view model; re-linking destroys that
//! inner binding before creating the next one. The inner binding is `DEEP`,
//! so every change behind the link invalidates the stub and its whole
//! subtree.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_core::{Template, Value};

use super::callback::{BindOptions, Callback};
use super::stub::{StubLinks, StubNode};
use super::view_model::ViewModel;
use super::BoundValue;
use crate::error::BindError;
use crate::schedulable::{Schedulable, SchedulableState};
use crate::scheduler::{Scheduler, Sorter};

struct LinkTarget {
    view_model: Weak<ViewModel>,
    /// Set when the descriptor is a single `{path}`; writes forward there.
    path: Option<String>,
    tokens: Vec<String>,
}

/// A stub whose value is delegated to a re-pointable inner binding.
pub struct LinkStub {
    state: SchedulableState,
    links: StubLinks,
    this: Weak<LinkStub>,
    binding: RefCell<Option<Rc<dyn BoundValue>>>,
    target: RefCell<Option<LinkTarget>>,
}

impl LinkStub {
    pub(crate) fn create(scheduler: &Scheduler, links: StubLinks) -> Rc<Self> {
        scheduler.adopt(|state, this| Self {
            state,
            links,
            this: this.clone(),
            binding: RefCell::new(None),
            target: RefCell::new(None),
        })
    }

    /// Point this stub at `descriptor` on `target`, replacing any previous
    /// link.
    pub fn link(&self, descriptor: &str, target: &Rc<ViewModel>) -> Result<(), BindError> {
        if self.is_destroyed() {
            return Ok(());
        }
        if let Some(previous) = self.binding.borrow_mut().take() {
            previous.destroy();
        }
        self.target.borrow_mut().take();

        let template = Template::parse(descriptor)?;
        let path = template
            .single_path()
            .filter(|(_, negate)| !negate)
            .map(|(path, _)| path.to_owned());
        let tokens = template.tokens().to_vec();
        let weak = self.this.clone();
        let on_change = Callback::direct(move |_, _, _| {
            if let Some(link) = weak.upgrade() {
                link.on_change();
            }
        });
        let inner = target.bind(descriptor, on_change, BindOptions::DEEP)?;
        *self.binding.borrow_mut() = Some(inner);
        *self.target.borrow_mut() = Some(LinkTarget {
            view_model: Rc::downgrade(target),
            path,
            tokens,
        });
        tracing::debug!(link = %self.links.name(), descriptor, "linked");
        Ok(())
    }

    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.binding.borrow().is_some()
    }

    /// The inner binding, if linked.
    #[must_use]
    pub fn binding(&self) -> Option<Rc<dyn BoundValue>> {
        self.binding.borrow().clone()
    }

    /// The target path when the link is a plain `{path}`.
    #[must_use]
    pub fn target_path(&self) -> Option<String> {
        self.target
            .borrow()
            .as_ref()
            .and_then(|target| target.path.clone())
    }

    /// The target view model and the paths the link reads there.
    pub(crate) fn target_tokens(&self) -> Option<(Rc<ViewModel>, Vec<String>)> {
        let target = self.target.borrow();
        let target = target.as_ref()?;
        Some((target.view_model.upgrade()?, target.tokens.clone()))
    }

    fn on_change(&self) {
        self.invalidate(true);
    }

    /// Write `value` at `rest` below this link, on the link target.
    pub(crate) fn forward_set(&self, rest: Option<&str>, value: Value) -> Result<(), BindError> {
        let (view_model, path) = {
            let target = self.target.borrow();
            let Some(target) = target.as_ref() else {
                return Err(BindError::ReadOnly {
                    path: self.joined(rest),
                });
            };
            (target.view_model.upgrade(), target.path.clone())
        };
        let (Some(view_model), Some(path)) = (view_model, path) else {
            return Err(BindError::ReadOnly {
                path: self.joined(rest),
            });
        };
        let full = match rest {
            Some(rest) => format!("{path}.{rest}"),
            None => path,
        };
        tracing::trace!(link = %self.links.name(), target = %full, "forward set");
        view_model.set(&full, value)
    }

    fn joined(&self, rest: Option<&str>) -> String {
        match rest {
            Some(rest) => format!("{}.{rest}", self.links.path()),
            None => self.links.path().to_owned(),
        }
    }
}

impl Schedulable for LinkStub {
    fn schedulable(&self) -> &SchedulableState {
        &self.state
    }

    fn react(&self) -> Result<(), BindError> {
        if let Some(owner) = self.links.owner() {
            owner.record_link_data(self.links.name(), self.get_value());
        }
        self.links.schedule_bindings();
        Ok(())
    }

    fn sort(&self, sorter: &mut Sorter<'_>) {
        self.links.sort_dependencies(sorter);
        if let Some(inner) = self.binding() {
            // A link into another scheduler's graph settles on its own flush.
            if inner.schedulable().scheduler().same(self.state.scheduler()) {
                sorter.sort_item(inner.as_schedulable());
            }
        }
    }

    fn destroy(&self) {
        if !self.state.retire() {
            return;
        }
        if let Some(inner) = self.binding.borrow_mut().take() {
            inner.destroy();
        }
        self.target.borrow_mut().take();
        if let Some(owner) = self.links.owner() {
            owner.remove_link_data(self.links.name());
        }
        self.links.take_bindings();
        tracing::debug!(link = %self.links.name(), "link destroyed");
    }

    fn full_name(&self) -> String {
        format!("link({})", self.links.name())
    }
}

impl StubNode for LinkStub {
    fn links(&self) -> &StubLinks {
        &self.links
    }

    fn get_value(&self) -> Value {
        self.binding()
            .map(|inner| inner.get_value())
            .unwrap_or_default()
    }

    fn get_raw_value(&self) -> Value {
        self.binding()
            .map(|inner| inner.get_raw_value())
            .unwrap_or_default()
    }

    fn is_loading(&self) -> bool {
        self.binding().is_some_and(|inner| inner.is_loading())
    }

    fn as_schedulable(&self) -> &dyn Schedulable {
        self
    }
}

impl fmt::Debug for LinkStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkStub")
            .field("name", &self.links.name())
            .field("state", &self.state)
            .field("linked", &self.is_linked())
            .field("target_path", &self.target_path())
            .finish()
    }
}
