#![forbid(unsafe_code)]

//! Dependency-ordered reaction scheduler.
//!
//! Items ask for service with [`Schedulable::schedule`]; a later call to
//! [`Scheduler::notify`] (the flush) reacts every scheduled item in
//! dependency order. Many schedule requests made in one synchronous burst
//! collapse into a single ordered flush.
//!
//! # Ordering
//!
//! At the start of every flush the scheduler computes a topological order
//! over all live registered items by walking each item's
//! [`Schedulable::sort`] hook, which places the item's dependencies ahead of
//! it via [`Sorter::sort_item`]. Unscheduled items are part of the order too,
//! so an item scheduled by an upstream reaction still reacts in the same
//! pass. Items scheduled upstream of the current position are picked up by
//! the next pass.
//!
//! # Invariants
//!
//! 1. Within a pass, every item's declared dependencies react before it.
//! 2. The order is never reused across flushes; between passes of one flush
//!    it is recomputed only if items were added or removed.
//! 3. A dependency cycle never loops: the back edge is skipped and reported.
//! 4. At most `cycle_limit` passes run per flush.
//! 5. The scheduler holds only `Weak` references; it never keeps an item alive.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Re-entrant flush | `notify()` from inside `react()` | `BindError::ReentrantFlush` |
//! | Runaway reactions | items re-schedule each other forever | `BindError::CycleLimitExceeded`, leftovers stay scheduled |
//! | Dependency cycle | mutual `sort_item` | WARN log, stable order |
//! | Reaction error | `react()` returns `Err` | flush stops, error propagates |

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::env;
use std::rc::{Rc, Weak};
use std::time::Duration;

use ahash::{AHashMap, AHashSet};

use crate::error::BindError;
use crate::schedulable::{ItemId, Schedulable, SchedulableState};

/// Default maximum number of passes per flush.
pub const DEFAULT_CYCLE_LIMIT: usize = 5;

/// Default delay a host should wait between a schedule request and the flush.
pub const DEFAULT_TICK_DELAY: Duration = Duration::from_millis(5);

/// Scheduler configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum passes per flush before giving up.
    pub cycle_limit: usize,
    /// Advisory delay handed to the tick hook.
    pub tick_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_limit: DEFAULT_CYCLE_LIMIT,
            tick_delay: DEFAULT_TICK_DELAY,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn with_cycle_limit(mut self, limit: usize) -> Self {
        self.cycle_limit = limit;
        self
    }

    #[must_use]
    pub fn with_tick_delay(mut self, delay: Duration) -> Self {
        self.tick_delay = delay;
        self
    }

    /// Defaults overridden by `TETHER_CYCLE_LIMIT` and `TETHER_TICK_DELAY_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        let cycle_limit = env::var("TETHER_CYCLE_LIMIT").ok();
        let tick_delay = env::var("TETHER_TICK_DELAY_MS").ok();
        Self::from_env_values(cycle_limit.as_deref(), tick_delay.as_deref())
    }

    /// Pure form of [`from_env`](Self::from_env). Missing or malformed values
    /// fall back to the defaults.
    #[must_use]
    pub fn from_env_values(cycle_limit: Option<&str>, tick_delay_ms: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(limit) = cycle_limit.and_then(|v| v.trim().parse::<usize>().ok()) {
            config.cycle_limit = limit.max(1);
        }
        if let Some(ms) = tick_delay_ms.and_then(|v| v.trim().parse::<u64>().ok()) {
            config.tick_delay = Duration::from_millis(ms);
        }
        config
    }
}

/// Busy/idle transitions reported to listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Busy count went from zero to non-zero.
    Busy,
    /// Busy count settled back at zero (reported at the end of a flush).
    Idle,
}

type Listener = Rc<dyn Fn(SchedulerEvent)>;
type TickHook = Rc<dyn Fn(Duration)>;

#[derive(Default)]
struct SchedulerState {
    next_id: u64,
    items: BTreeMap<ItemId, Weak<dyn Schedulable>>,
    pending: AHashSet<ItemId>,
    order: Option<Vec<ItemId>>,
    order_index: AHashMap<ItemId, usize>,
    firing: bool,
    notify_index: Option<usize>,
    passes: u64,
    sorts: u64,
    busy_counter: i64,
    last_busy_counter: i64,
    tick_pending: bool,
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: RefCell<SchedulerState>,
    listeners: RefCell<Vec<Listener>>,
    tick_hook: RefCell<Option<TickHook>>,
}

/// Shared handle to a scheduler. Cloning shares the same instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.borrow();
        f.debug_struct("Scheduler")
            .field("items", &st.items.len())
            .field("scheduled", &st.pending.len())
            .field("passes", &st.passes)
            .field("firing", &st.firing)
            .finish()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                state: RefCell::new(SchedulerState::default()),
                listeners: RefCell::new(Vec::new()),
                tick_hook: RefCell::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same scheduler.
    #[must_use]
    pub fn same(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Construct and register a schedulable item.
    ///
    /// `build` receives the item's scheduling state and a weak self
    /// reference (for callbacks that must point back at the item).
    pub fn adopt<T, F>(&self, build: F) -> Rc<T>
    where
        T: Schedulable + 'static,
        F: FnOnce(SchedulableState, &Weak<T>) -> T,
    {
        let id = {
            let mut st = self.inner.state.borrow_mut();
            st.next_id += 1;
            ItemId(st.next_id)
        };
        let item = Rc::new_cyclic(|weak| build(SchedulableState::new(id, self.clone()), weak));
        let weak: Weak<dyn Schedulable> = Rc::downgrade(&item) as Weak<dyn Schedulable>;
        {
            let mut st = self.inner.state.borrow_mut();
            st.items.insert(id, weak);
            st.order = None;
        }
        tracing::trace!(item = %id, "register");
        item
    }

    /// Look up a live item by id.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<Rc<dyn Schedulable>> {
        self.inner
            .state
            .borrow()
            .items
            .get(&id)
            .and_then(Weak::upgrade)
    }

    /// Unregister an item (called from [`SchedulableState::retire`]).
    pub(crate) fn remove(&self, id: ItemId) {
        let mut st = self.inner.state.borrow_mut();
        st.pending.remove(&id);
        if st.items.remove(&id).is_some() {
            st.order = None;
        }
    }

    /// Drop-time unregistration; tolerates an in-use registry.
    pub(crate) fn forget(&self, id: ItemId) {
        if let Ok(mut st) = self.inner.state.try_borrow_mut() {
            st.pending.remove(&id);
            if st.items.remove(&id).is_some() {
                st.order = None;
            }
        }
    }

    pub(crate) fn schedule_item(&self, id: ItemId) {
        let request_tick = {
            let mut st = self.inner.state.borrow_mut();
            st.pending.insert(id);
            if st.firing {
                if let (Some(order), Some(current)) = (st.order_index.get(&id), st.notify_index) {
                    if *order <= current {
                        tracing::debug!(
                            item = %id,
                            order = *order,
                            current,
                            "scheduled upstream of the current reaction; deferred to next pass"
                        );
                    }
                }
                false
            } else {
                !std::mem::replace(&mut st.tick_pending, true)
            }
        };
        if request_tick {
            self.request_tick();
        }
    }

    pub(crate) fn unschedule_item(&self, id: ItemId) {
        self.inner.state.borrow_mut().pending.remove(&id);
    }

    /// Install the hook invoked when a flush should be arranged.
    pub fn set_tick_hook(&self, hook: impl Fn(Duration) + 'static) {
        *self.inner.tick_hook.borrow_mut() = Some(Rc::new(hook));
    }

    /// Whether a flush has been requested and not yet run.
    #[must_use]
    pub fn is_tick_pending(&self) -> bool {
        self.inner.state.borrow().tick_pending
    }

    fn request_tick(&self) {
        self.inner.state.borrow_mut().tick_pending = true;
        let hook = self.inner.tick_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(self.inner.config.tick_delay);
        }
    }

    /// Register a busy/idle listener.
    pub fn on_event(&self, listener: impl Fn(SchedulerEvent) + 'static) {
        self.inner.listeners.borrow_mut().push(Rc::new(listener));
    }

    fn emit(&self, event: SchedulerEvent) {
        let listeners = self.inner.listeners.borrow().clone();
        for listener in listeners {
            listener(event);
        }
    }

    /// Number of live registered items.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.inner
            .state
            .borrow()
            .items
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Number of items awaiting reaction.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    /// Total reaction passes run over the scheduler's lifetime.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.inner.state.borrow().passes
    }

    /// Total topological sorts computed.
    #[must_use]
    pub fn sorts(&self) -> u64 {
        self.inner.state.borrow().sorts
    }

    /// Whether a flush is in progress.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.inner.state.borrow().firing
    }

    // -----------------------------------------------------------------------
    // Busy / idle tracking
    // -----------------------------------------------------------------------

    /// Record items becoming busy (`+1`) or idle (`-1`).
    ///
    /// `Busy` is reported immediately; the return to idle is reported at the
    /// end of the next flush so a quick idle→busy bounce is not observed.
    pub fn adjust_busy(&self, delta: i64) {
        let (fire_busy, request_tick) = {
            let mut st = self.inner.state.borrow_mut();
            st.busy_counter += delta;
            if st.busy_counter != 0 {
                if st.last_busy_counter == 0 {
                    st.last_busy_counter = st.busy_counter;
                    (true, false)
                } else {
                    (false, false)
                }
            } else {
                (false, st.last_busy_counter != 0 && !st.tick_pending)
            }
        };
        if fire_busy {
            self.emit(SchedulerEvent::Busy);
        } else if request_tick {
            self.request_tick();
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.is_idle()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        let st = self.inner.state.borrow();
        st.busy_counter == 0 && st.last_busy_counter == 0
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    /// Deliver every scheduled item in dependency order.
    pub fn notify(&self) -> Result<(), BindError> {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.firing {
                return Err(BindError::ReentrantFlush);
            }
            st.firing = true;
            st.tick_pending = false;
            st.order = None;
        }
        let guard = FiringGuard(self);
        let _span = tracing::debug_span!("flush").entered();

        let mut cycles_left = self.inner.config.cycle_limit;
        let mut outcome = Ok(());

        while self.scheduled_count() > 0 {
            if cycles_left == 0 {
                let pending = self.scheduled_count();
                tracing::warn!(
                    limit = self.inner.config.cycle_limit,
                    pending,
                    "exceeded reaction cycle limit"
                );
                outcome = Err(BindError::CycleLimitExceeded {
                    limit: self.inner.config.cycle_limit,
                    pending,
                });
                break;
            }
            cycles_left -= 1;
            self.inner.state.borrow_mut().passes += 1;

            let order = self.ordered_items();
            self.drop_unreachable();
            for (index, id) in order.iter().enumerate() {
                let item = {
                    let mut st = self.inner.state.borrow_mut();
                    if !st.pending.remove(id) {
                        continue;
                    }
                    st.notify_index = Some(index);
                    st.items.get(id).and_then(Weak::upgrade)
                };
                let Some(item) = item else {
                    continue;
                };
                let state = item.schedulable();
                if !state.is_scheduled() {
                    continue;
                }
                state.set_scheduled(false);
                tracing::trace!(item = %item.full_name(), "react");
                item.react()?;

                if self.scheduled_count() == 0 {
                    break;
                }
            }
        }

        drop(guard);
        tracing::debug!(passes = self.passes(), "flush complete");

        let fire_idle = {
            let mut st = self.inner.state.borrow_mut();
            if st.busy_counter != st.last_busy_counter {
                st.last_busy_counter = st.busy_counter;
                st.busy_counter == 0
            } else {
                false
            }
        };
        if fire_idle {
            self.emit(SchedulerEvent::Idle);
        }
        outcome
    }

    /// Pending ids that are no longer registered can never react.
    fn drop_unreachable(&self) {
        let mut st = self.inner.state.borrow_mut();
        let SchedulerState { pending, items, .. } = &mut *st;
        pending.retain(|id| items.get(id).is_some_and(|w| w.strong_count() > 0));
    }

    /// The current order, computing it if the registry changed.
    fn ordered_items(&self) -> Vec<ItemId> {
        if let Some(order) = &self.inner.state.borrow().order {
            return order.clone();
        }

        let snapshot: Vec<Rc<dyn Schedulable>> = {
            let mut st = self.inner.state.borrow_mut();
            st.items.retain(|_, w| w.strong_count() > 0);
            st.items.values().filter_map(Weak::upgrade).collect()
        };

        let mut sorter = Sorter::new(self);
        for item in &snapshot {
            sorter.sort_item(item.as_ref());
        }
        let order = sorter.ordered;
        drop(snapshot);

        let mut st = self.inner.state.borrow_mut();
        st.order_index = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        st.order = Some(order.clone());
        st.sorts += 1;
        tracing::debug!(items = order.len(), "computed reaction order");
        order
    }
}

/// Clears the firing state even when a reaction errors or panics.
struct FiringGuard<'a>(&'a Scheduler);

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut st) = self.0.inner.state.try_borrow_mut() {
            st.firing = false;
            st.notify_index = None;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Builds the reaction order; handed to [`Schedulable::sort`] hooks.
pub struct Sorter<'a> {
    scheduler: &'a Scheduler,
    marks: AHashMap<ItemId, Mark>,
    stack: Vec<ItemId>,
    ordered: Vec<ItemId>,
    cycles: usize,
}

impl<'a> Sorter<'a> {
    fn new(scheduler: &'a Scheduler) -> Self {
        Self {
            scheduler,
            marks: AHashMap::new(),
            stack: Vec::new(),
            ordered: Vec::new(),
            cycles: 0,
        }
    }

    /// Place `item` (and, recursively, its dependencies) in the order.
    pub fn sort_item(&mut self, item: &dyn Schedulable) -> &mut Self {
        let state = item.schedulable();
        if state.is_destroyed() {
            return self;
        }
        if !state.scheduler().same(self.scheduler) {
            tracing::warn!(item = %item.full_name(), "item belongs to another scheduler; not sorted");
            return self;
        }
        let id = state.id();
        match self.marks.get(&id) {
            Some(Mark::Done) => return self,
            Some(Mark::Visiting) => {
                self.report_cycle(id, item);
                return self;
            }
            None => {}
        }

        self.marks.insert(id, Mark::Visiting);
        self.stack.push(id);
        item.sort(self);
        self.stack.pop();
        self.marks.insert(id, Mark::Done);
        self.ordered.push(id);
        self
    }

    /// Place several items in the order.
    pub fn sort_items<'i, T>(&mut self, items: impl IntoIterator<Item = &'i Rc<T>>) -> &mut Self
    where
        T: Schedulable + 'i,
    {
        for item in items {
            self.sort_item(item.as_ref());
        }
        self
    }

    /// Number of dependency cycles broken so far in this sort.
    #[must_use]
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    fn report_cycle(&mut self, id: ItemId, item: &dyn Schedulable) {
        self.cycles += 1;
        let start = self.stack.iter().position(|s| *s == id).unwrap_or(0);
        let mut path: Vec<String> = self.stack[start..]
            .iter()
            .map(|s| {
                if *s == id {
                    item.full_name()
                } else {
                    self.scheduler
                        .item(*s)
                        .map_or_else(|| s.to_string(), |i| i.full_name())
                }
            })
            .collect();
        path.push(item.full_name());
        tracing::warn!(
            cycle = %path.join(" --> "),
            "dependency cycle detected; breaking at back edge"
        );
    }
}
