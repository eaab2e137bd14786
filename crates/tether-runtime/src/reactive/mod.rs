#![forbid(unsafe_code)]

//! Bindings, stubs, and the view model that owns them.
//!
//! - [`Binding`]: delivers one data path to a callback, deduplicated.
//! - [`MultiBinding`]: fans several paths into one `{token: value}` object.
//! - [`TemplateBinding`]: renders a bind template over a multi binding.
//! - [`LinkStub`]: a top-level slot forwarding to a re-pointable binding.
//! - [`Formula`]: a computed path recomputed from its dependencies.
//! - [`ViewModel`]: the data owner; resolves the scheduler for everything
//!   bound to it.
//!
//! # Architecture
//!
//! Every node is a [`Schedulable`] registered with one [`Scheduler`]. Data
//! changes invalidate stubs; stubs schedule their bindings; the scheduler
//! reacts everything in dependency order on the next flush:
//!
//! ```text
//! set("a") ──► stub(a) ──► Binding ──► MultiBinding ──► TemplateBinding ──► callback
//!                 ▲
//!              Formula (writes its result through the same stub)
//! ```
//!
//! Ownership runs downward (view model → stubs, owner → bindings); every
//! back reference (stub → binding, binding → owner, scheduler → item) is
//! `Weak`.
//!
//! [`Schedulable`]: crate::Schedulable
//! [`Scheduler`]: crate::Scheduler

pub mod binding;
pub mod callback;
mod delivery;
pub mod formula;
pub mod link;
pub mod multi;
pub mod stub;
pub mod template;
pub mod view_model;

use std::rc::{Rc, Weak};

use tether_core::Value;

pub use binding::{Binding, BindingBuilder, BindingScope};
pub use callback::{BindOptions, Callback, Handler, Scope};
pub use formula::{Compute, Formula, FormulaBuilder, Setter};
pub use link::LinkStub;
pub use multi::MultiBinding;
pub use stub::{Stub, StubLinks, StubNode};
pub use template::TemplateBinding;
pub use view_model::ViewModel;

use crate::error::BindError;
use crate::schedulable::{ItemId, Schedulable};
use crate::scheduler::Scheduler;

/// The object a binding belongs to.
pub trait BindOwner {
    /// Resolve the scheduler through the owner chain.
    fn scheduler(&self) -> Option<Scheduler>;

    /// Notified when a binding created by this owner is destroyed.
    fn on_bind_destroy(&self, _binding: ItemId) {}
}

/// An owner that can create path bindings.
pub trait BindSource: BindOwner {
    /// Bind a single data path.
    fn bind_path(
        &self,
        path: &str,
        callback: Callback,
        options: BindOptions,
    ) -> Result<Rc<Binding>, BindError>;

    /// A non-owning handle suitable for storing in created bindings.
    fn as_owner(&self) -> Weak<dyn BindOwner>;
}

/// Read access shared by every binding-like item.
pub trait BoundValue: Schedulable {
    /// The current value, after any transform.
    fn get_value(&self) -> Value;

    /// The current value, before any transform.
    fn get_raw_value(&self) -> Value {
        self.get_value()
    }

    /// Whether the underlying data has not arrived yet.
    fn is_loading(&self) -> bool;

    fn as_schedulable(&self) -> &dyn Schedulable;
}

/// Resolve the scheduler of an owner handle.
pub(crate) fn owner_scheduler(owner: &Weak<dyn BindOwner>) -> Result<Scheduler, BindError> {
    owner
        .upgrade()
        .and_then(|owner| owner.scheduler())
        .ok_or(BindError::NoScheduler)
}

/// Tell the owner (if still alive) that `id` is gone.
pub(crate) fn release_owner(owner: Option<Weak<dyn BindOwner>>, id: ItemId) {
    if let Some(owner) = owner.and_then(|weak| weak.upgrade()) {
        owner.on_bind_destroy(id);
    }
}
