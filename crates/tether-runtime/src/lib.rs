#![forbid(unsafe_code)]

//! Dependency-ordered binding runtime.
//!
//! - [`scheduler`]: the flush loop, topological [`Sorter`], busy/idle tracking.
//! - [`schedulable`]: the [`Schedulable`] contract every graph node implements.
//! - [`reactive`]: bindings, stubs, links, templates, formulas, and the
//!   [`ViewModel`] that owns them.
//! - [`error`]: [`BindError`].
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use tether_runtime::{BindOptions, Callback, SchedulerConfig, Value, ViewModel};
//!
//! let vm = ViewModel::new(SchedulerConfig::default());
//! vm.set("user.name", Value::from("Ada")).unwrap();
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let _greeting = vm
//!     .bind(
//!         "Hello, {user.name}!",
//!         Callback::direct(move |value, _, _| sink.borrow_mut().push(value.to_string())),
//!         BindOptions::empty(),
//!     )
//!     .unwrap();
//!
//! vm.notify().unwrap();
//! assert_eq!(*seen.borrow(), ["Hello, Ada!"]);
//! ```

pub mod error;
pub mod reactive;
pub mod schedulable;
pub mod scheduler;

pub use error::BindError;
pub use reactive::{
    BindOptions, BindOwner, BindSource, Binding, BindingBuilder, BindingScope, BoundValue,
    Callback, Compute, Formula, FormulaBuilder, Handler, LinkStub, MultiBinding, Scope, Setter,
    Stub, StubLinks, StubNode, TemplateBinding, ViewModel,
};
pub use schedulable::{ItemFlags, ItemId, Schedulable, SchedulableState};
pub use scheduler::{
    DEFAULT_CYCLE_LIMIT, DEFAULT_TICK_DELAY, Scheduler, SchedulerConfig, SchedulerEvent, Sorter,
};
pub use tether_core::{Template, TemplateError, Value};
