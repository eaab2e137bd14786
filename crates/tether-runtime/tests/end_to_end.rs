//! End-to-end behavior of view models, bindings, templates, and links.
//!
//! Each test drives the public API the way a host would: mutate data, then
//! flush, then observe callbacks.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use tether_runtime::{
    BindError, BindOptions, BindSource, BindingScope, BoundValue, Callback, Schedulable,
    Scheduler, SchedulerConfig, Value, ViewModel,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

// ============================================================================
// Helpers
// ============================================================================

type Calls = Rc<RefCell<Vec<(Value, Option<Value>, String)>>>;

fn recorder() -> (Calls, Callback) {
    let calls = Calls::default();
    let sink = Rc::clone(&calls);
    let callback = Callback::direct(move |value, previous, binding| {
        sink.borrow_mut()
            .push((value.clone(), previous.cloned(), binding.full_name()));
    });
    (calls, callback)
}

/// Records the `item` field of every "react" trace event.
#[derive(Clone, Default)]
struct ReactLog {
    items: Arc<Mutex<Vec<String>>>,
}

#[derive(Default)]
struct Fields {
    message: String,
    item: Option<String>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field.name(), value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record(field.name(), format!("{value:?}"));
    }
}

impl Fields {
    fn record(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "item" => self.item = Some(value),
            _ => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for ReactLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        if fields.message == "react" {
            if let (Some(item), Ok(mut items)) = (fields.item, self.items.lock()) {
                items.push(item);
            }
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn unchanged_set_is_silent_and_change_delivers_once() {
    let vm = ViewModel::new(SchedulerConfig::default());
    vm.set("x", Value::from(1)).unwrap();
    let (calls, callback) = recorder();
    let binding = vm.bind("{x}", callback, BindOptions::empty()).unwrap();
    vm.notify().unwrap();
    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(calls.borrow()[0].1, None);

    vm.set("x", Value::from(1)).unwrap();
    vm.notify().unwrap();
    assert_eq!(calls.borrow().len(), 1);

    vm.set("x", Value::from(2)).unwrap();
    vm.notify().unwrap();
    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, Value::from(2));
    assert_eq!(calls[1].1, Some(Value::from(1)));
    assert_eq!(calls[1].2, binding.full_name());
}

#[test]
fn many_mutations_collapse_into_one_delivery() {
    let vm = ViewModel::new(SchedulerConfig::default());
    vm.set("first", Value::from("Ada")).unwrap();
    vm.set("last", Value::from("Lovelace")).unwrap();
    let (calls, callback) = recorder();
    let _label = vm
        .bind("{first} {last:uppercase}", callback, BindOptions::empty())
        .unwrap();
    vm.notify().unwrap();
    assert_eq!(calls.borrow()[0].0, Value::from("Ada LOVELACE"));

    vm.set("first", Value::from("Augusta")).unwrap();
    vm.set("last", Value::from("King")).unwrap();
    vm.set("first", Value::from("Ada")).unwrap();
    vm.notify().unwrap();
    assert_eq!(calls.borrow().len(), 2);
    assert_eq!(calls.borrow()[1].0, Value::from("Ada KING"));
    assert_eq!(calls.borrow()[1].1, Some(Value::from("Ada LOVELACE")));
}

#[test]
fn multi_binding_reacts_before_its_template() {
    let log = ReactLog::default();
    let subscriber = tracing_subscriber::registry().with(log.clone());

    tracing::subscriber::with_default(subscriber, || {
        let vm = ViewModel::new(SchedulerConfig::default());
        vm.set("a", Value::from(1)).unwrap();
        vm.set("b", Value::from(2)).unwrap();
        let (calls, callback) = recorder();
        let _sum = vm.bind("{a}+{b}", callback, BindOptions::empty()).unwrap();
        vm.notify().unwrap();
        assert_eq!(calls.borrow()[0].0, Value::from("1+2"));
        assert_eq!(vm.scheduler().passes(), 1);
    });

    let items = log.items.lock().unwrap();
    let position = |name: &str| items.iter().position(|item| item == name);
    let multi = position("multi(a,b)").expect("multi reacted");
    let template = position("template({a}+{b})").expect("template reacted");
    let binding_a = position("binding(a)").expect("binding reacted");
    assert!(binding_a < multi);
    assert!(multi < template);
}

#[test]
fn single_binding_fires_once_across_flushes() {
    let vm = ViewModel::new(SchedulerConfig::default());
    vm.set("x", Value::from(1)).unwrap();
    let (calls, callback) = recorder();
    let once = vm
        .binding("{x}")
        .callback(callback)
        .single()
        .build()
        .unwrap();
    for value in 2..5 {
        vm.notify().unwrap();
        vm.set("x", Value::from(value)).unwrap();
    }
    vm.notify().unwrap();
    assert_eq!(calls.borrow().len(), 1);
    assert!(once.is_destroyed());
    assert_eq!(vm.binding_count(), 0);
}

#[test]
fn destroy_twice_is_harmless_everywhere() {
    let vm = ViewModel::new(SchedulerConfig::default());
    vm.set("a", Value::from(1)).unwrap();
    let (_calls, callback) = recorder();
    let template = vm.bind("{a}!", callback.clone(), BindOptions::empty()).unwrap();
    let plain = vm.bind("{a}", callback.clone(), BindOptions::empty()).unwrap();
    let multi = vm.bind_multi(&["a"], callback, BindOptions::empty()).unwrap();
    let link = vm.link_to("l", "{a}", &vm).unwrap();

    let items: [&dyn Schedulable; 4] = [
        template.as_schedulable(),
        plain.as_schedulable(),
        multi.as_ref(),
        link.as_ref(),
    ];
    for item in items {
        item.destroy();
        item.destroy();
        item.schedule();
        assert!(item.is_destroyed());
        assert!(!item.is_scheduled());
    }
    vm.notify().unwrap();
    assert_eq!(vm.binding_count(), 0);
}

#[test]
fn destroying_a_binding_mid_flush() {
    let vm = ViewModel::new(SchedulerConfig::default());
    vm.set("x", Value::from(1)).unwrap();

    let (victim_calls, victim_cb) = recorder();
    let victim = vm.bind_path("x", victim_cb, BindOptions::empty()).unwrap();
    let target = Rc::clone(&victim);
    let _killer = vm
        .bind_path(
            "x",
            Callback::direct(move |_, _, _| target.destroy()),
            BindOptions::empty(),
        )
        .unwrap();

    vm.notify().unwrap();
    vm.set("x", Value::from(2)).unwrap();
    vm.notify().unwrap();
    assert!(victim.is_destroyed());
    assert!(victim_calls.borrow().len() <= 2);
    vm.set("x", Value::from(3)).unwrap();
    vm.notify().unwrap();
    assert!(victim_calls.borrow().len() <= 2);
}

#[test]
fn link_across_schedulers_flushes_each_side() {
    let store = ViewModel::new(SchedulerConfig::default());
    store.set("session.user", Value::from("ada")).unwrap();
    let view = ViewModel::new(SchedulerConfig::default());
    assert!(!view.scheduler().same(store.scheduler()));

    let (calls, callback) = recorder();
    view.link_to("user", "{session.user}", &store).unwrap();
    let _title = view
        .bind("Signed in as {user:capitalize}", callback, BindOptions::empty())
        .unwrap();

    store.notify().unwrap();
    view.notify().unwrap();
    assert_eq!(calls.borrow()[0].0, Value::from("Signed in as Ada"));

    store.set("session.user", Value::from("grace")).unwrap();
    view.notify().unwrap();
    assert_eq!(calls.borrow().len(), 1, "store has not flushed yet");
    store.notify().unwrap();
    assert!(view.scheduler().is_tick_pending());
    view.notify().unwrap();
    assert_eq!(calls.borrow()[1].0, Value::from("Signed in as Grace"));

    view.set("user", Value::from("hopper")).unwrap();
    assert_eq!(store.get("session.user"), Value::from("hopper"));
}

#[test]
fn host_loop_driven_by_tick_requests() {
    let vm = ViewModel::new(SchedulerConfig::from_env_values(None, Some("16")));
    let requests = Rc::new(RefCell::new(Vec::new()));
    let queue = Rc::clone(&requests);
    vm.scheduler()
        .set_tick_hook(move |delay| queue.borrow_mut().push(delay));

    let (calls, callback) = recorder();
    vm.set("count", Value::from(0)).unwrap();
    let _b = vm.bind("{count}", callback, BindOptions::empty()).unwrap();
    for n in 1..=3 {
        vm.set("count", Value::from(n)).unwrap();
    }
    assert_eq!(requests.borrow().len(), 1);
    assert_eq!(requests.borrow()[0].as_millis(), 16);

    // The host runs the flush it was asked for.
    while vm.scheduler().is_tick_pending() {
        vm.notify().unwrap();
    }
    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Value::from(3));
}

#[test]
fn runaway_formulas_hit_the_cycle_limit() {
    let vm = ViewModel::new(SchedulerConfig::default().with_cycle_limit(3));
    vm.set("a", Value::from(0)).unwrap();
    vm.set("b", Value::from(0)).unwrap();
    // Each formula feeds the other: a = b + 1, b = a + 1.
    vm.set_formula("a", &["b"], |inputs| {
        Value::from(inputs.get("b").as_f64().unwrap_or(0.0) + 1.0)
    })
    .unwrap();
    vm.set_formula("b", &["a"], |inputs| {
        Value::from(inputs.get("a").as_f64().unwrap_or(0.0) + 1.0)
    })
    .unwrap();

    let err = vm.notify().unwrap_err();
    assert!(matches!(err, BindError::CycleLimitExceeded { limit: 3, .. }));
    assert!(vm.scheduler().scheduled_count() > 0);
    assert!(!vm.scheduler().is_firing());
}

#[test]
fn scope_teardown_silences_callbacks() {
    let vm = ViewModel::new(SchedulerConfig::default());
    vm.set("x", Value::from(1)).unwrap();
    let hits = Rc::new(Cell::new(0));
    {
        let mut scope = BindingScope::new();
        for descriptor in ["{x}", "x = {x}", "{!x}"] {
            let sink = Rc::clone(&hits);
            scope.hold(
                vm.bind(
                    descriptor,
                    Callback::direct(move |_, _, _| sink.set(sink.get() + 1)),
                    BindOptions::empty(),
                )
                .unwrap(),
            );
        }
        vm.notify().unwrap();
        assert_eq!(hits.get(), 3);
    }
    vm.set("x", Value::from(2)).unwrap();
    vm.notify().unwrap();
    assert_eq!(hits.get(), 3);
    assert_eq!(vm.binding_count(), 0);
}

#[test]
fn independent_schedulers_do_not_interfere() {
    let first = Scheduler::default();
    let second = Scheduler::default();
    let a = ViewModel::with_scheduler(first.clone());
    let b = ViewModel::with_scheduler(second.clone());
    a.set("x", Value::from(1)).unwrap();
    b.set("x", Value::from(1)).unwrap();
    let (a_calls, a_cb) = recorder();
    let (b_calls, b_cb) = recorder();
    let _a = a.bind("{x}", a_cb, BindOptions::empty()).unwrap();
    let _b = b.bind("{x}", b_cb, BindOptions::empty()).unwrap();

    first.notify().unwrap();
    assert_eq!(a_calls.borrow().len(), 1);
    assert!(b_calls.borrow().is_empty());
    assert_eq!(second.scheduled_count(), 1);
}
