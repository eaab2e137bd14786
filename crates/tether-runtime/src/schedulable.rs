#![forbid(unsafe_code)]

//! The contract shared by every node in the dependency graph.
//!
//! Each node type embeds a [`SchedulableState`] and implements
//! [`Schedulable`]. Nodes are created through [`Scheduler::adopt`], which
//! assigns an [`ItemId`] and registers a non-owning reference.
//!
//! # Lifecycle
//!
//! ```text
//! adopt ──► Idle ──schedule()──► Scheduled ──flush──► Reacting ──► Idle
//!             │                      │                                │
//!             └──────────────────────┴───────── destroy() ────────────┴──► Destroyed
//! ```
//!
//! # Invariants
//!
//! 1. `schedule()` on a scheduled or destroyed item is a no-op.
//! 2. `destroy()` is idempotent; afterwards `schedule()`, delivery, and
//!    reaction are silently ignored.
//! 3. Dropping the last strong reference unregisters the item even when
//!    `destroy()` was never called.
//!
//! [`Scheduler::adopt`]: crate::Scheduler::adopt

use std::cell::Cell;
use std::fmt;

use bitflags::bitflags;

use crate::error::BindError;
use crate::scheduler::{Scheduler, Sorter};

bitflags! {
    /// Per-item scheduling flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ItemFlags: u8 {
        /// Queued for the next reaction pass.
        const SCHEDULED = 1 << 0;
        /// Torn down; every further operation is absorbed.
        const DESTROYED = 1 << 1;
    }
}

/// Registration handle of a schedulable item within its scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub(crate) u64);

impl ItemId {
    /// Raw numeric id, unique per scheduler.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling state embedded in every node.
pub struct SchedulableState {
    id: ItemId,
    scheduler: Scheduler,
    flags: Cell<ItemFlags>,
}

impl SchedulableState {
    pub(crate) fn new(id: ItemId, scheduler: Scheduler) -> Self {
        Self {
            id,
            scheduler,
            flags: Cell::new(ItemFlags::empty()),
        }
    }

    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// The scheduler this item is registered with.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn flags(&self) -> ItemFlags {
        self.flags.get()
    }

    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.flags.get().contains(ItemFlags::SCHEDULED)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.flags.get().contains(ItemFlags::DESTROYED)
    }

    pub(crate) fn set_scheduled(&self, scheduled: bool) {
        let mut flags = self.flags.get();
        flags.set(ItemFlags::SCHEDULED, scheduled);
        self.flags.set(flags);
    }

    /// Mark the item destroyed and unregister it.
    ///
    /// Returns `false` if the item was already destroyed, so callers can run
    /// their own teardown exactly once.
    pub fn retire(&self) -> bool {
        let flags = self.flags.get();
        if flags.contains(ItemFlags::DESTROYED) {
            return false;
        }
        self.flags.set(ItemFlags::DESTROYED);
        self.scheduler.remove(self.id);
        true
    }
}

impl Drop for SchedulableState {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.scheduler.forget(self.id);
        }
    }
}

impl fmt::Debug for SchedulableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulableState")
            .field("id", &self.id)
            .field("flags", &self.flags.get())
            .finish()
    }
}

/// A node the [`Scheduler`] can order and react.
pub trait Schedulable {
    /// The embedded scheduling state.
    fn schedulable(&self) -> &SchedulableState;

    /// Called by the scheduler, in dependency order, once per pass in which
    /// this item was scheduled.
    fn react(&self) -> Result<(), BindError>;

    /// Declare dependencies by sorting them ahead of `self`.
    fn sort(&self, _sorter: &mut Sorter<'_>) {}

    /// Bookkeeping hook run when the item becomes scheduled.
    fn on_schedule(&self) {}

    /// Tear the item down. Must be idempotent.
    fn destroy(&self) {
        self.schedulable().retire();
    }

    /// Diagnostic name used in logs and cycle reports.
    fn full_name(&self) -> String {
        format!("item{}", self.schedulable().id())
    }

    fn id(&self) -> ItemId {
        self.schedulable().id()
    }

    fn is_scheduled(&self) -> bool {
        self.schedulable().is_scheduled()
    }

    fn is_destroyed(&self) -> bool {
        self.schedulable().is_destroyed()
    }

    /// Queue this item for the next reaction pass.
    fn schedule(&self) {
        let state = self.schedulable();
        if state
            .flags()
            .intersects(ItemFlags::SCHEDULED | ItemFlags::DESTROYED)
        {
            return;
        }
        state.set_scheduled(true);
        self.on_schedule();
        tracing::trace!(item = %self.full_name(), "schedule");
        state.scheduler().schedule_item(state.id());
    }

    /// Withdraw a pending reaction before it runs.
    fn unschedule(&self) {
        let state = self.schedulable();
        if !state.is_scheduled() {
            return;
        }
        state.scheduler().unschedule_item(state.id());
        state.set_scheduled(false);
        tracing::trace!(item = %self.full_name(), "unschedule");
    }
}
