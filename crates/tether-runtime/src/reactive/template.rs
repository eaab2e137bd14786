#![forbid(unsafe_code)]

//! Bindings whose value is a rendered bind template.
//!
//! A template with tokens owns a [`MultiBinding`] over them. Each multi
//! delivery re-renders the text; a changed rendering schedules the template
//! binding, which then delivers through the usual change gate. Several
//! dependency changes in one burst therefore cost one render per pass and
//! one delivery.
//!
//! A template without tokens is static: its text is delivered once,
//! synchronously, during construction and no multi binding is created.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_core::{Template, Value};

use super::callback::{BindOptions, Callback};
use super::delivery::Delivery;
use super::multi::MultiBinding;
use super::{BindOwner, BindSource, BoundValue, release_owner};
use crate::error::BindError;
use crate::schedulable::{Schedulable, SchedulableState};
use crate::scheduler::Sorter;

/// A binding over a parsed template.
pub struct TemplateBinding {
    state: SchedulableState,
    owner: RefCell<Option<Weak<dyn BindOwner>>>,
    template: Template,
    multi: RefCell<Option<Rc<MultiBinding>>>,
    value: RefCell<Value>,
    delivery: Delivery,
}

impl TemplateBinding {
    pub(crate) fn create(
        source: &dyn BindSource,
        template: Template,
        callback: Callback,
        options: BindOptions,
    ) -> Result<Rc<Self>, BindError> {
        let scheduler = source.scheduler().ok_or(BindError::NoScheduler)?;
        let binding = scheduler.adopt(|state, _| Self {
            state,
            owner: RefCell::new(Some(source.as_owner())),
            template,
            multi: RefCell::new(None),
            value: RefCell::new(Value::Undefined),
            delivery: Delivery::new(callback, options),
        });

        if binding.template.is_static() {
            let text = Value::from(binding.template.apply(&[]));
            *binding.value.borrow_mut() = text.clone();
            binding.delivery.notify(text, binding.as_ref())?;
            return Ok(binding);
        }

        let weak = Rc::downgrade(&binding);
        let on_bind_data = Callback::direct(move |data, _, _| {
            if let Some(binding) = weak.upgrade() {
                binding.on_bind_data(data);
            }
        });
        let tokens = binding.template.tokens().to_vec();
        match MultiBinding::create(source, tokens, on_bind_data, options & BindOptions::DEEP) {
            Ok(multi) => *binding.multi.borrow_mut() = Some(multi),
            Err(err) => {
                binding.destroy();
                return Err(err);
            }
        }
        Ok(binding)
    }

    #[must_use]
    pub fn template(&self) -> &Template {
        &self.template
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.template.is_static()
    }

    /// The owned aggregate binding, absent for static templates.
    #[must_use]
    pub fn multi(&self) -> Option<Rc<MultiBinding>> {
        self.multi.borrow().clone()
    }

    fn on_bind_data(&self, data: &Value) {
        let values: Vec<Value> = self
            .template
            .tokens()
            .iter()
            .map(|token| data.get(token))
            .collect();
        let rendered = Value::from(self.template.apply(&values));
        self.on_data(rendered);
    }

    fn on_data(&self, value: Value) {
        let changed = !self.value.borrow().same(&value);
        if changed {
            *self.value.borrow_mut() = value;
            self.schedule();
        }
    }
}

impl Schedulable for TemplateBinding {
    fn schedulable(&self) -> &SchedulableState {
        &self.state
    }

    fn react(&self) -> Result<(), BindError> {
        let value = self.value.borrow().clone();
        self.delivery.notify(value, self).map(|_| ())
    }

    fn sort(&self, sorter: &mut Sorter<'_>) {
        if let Some(multi) = self.multi() {
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
        release_owner(self.owner.borrow_mut().take(), self.id());
        self.delivery.clear();
    }

    fn full_name(&self) -> String {
        format!("template({})", self.template.text())
    }
}

impl BoundValue for TemplateBinding {
    fn get_value(&self) -> Value {
        self.value.borrow().clone()
    }

    fn is_loading(&self) -> bool {
        self.multi().is_some_and(|multi| multi.is_loading())
    }

    fn as_schedulable(&self) -> &dyn Schedulable {
        self
    }
}

impl fmt::Debug for TemplateBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateBinding")
            .field("template", &self.template.text())
            .field("state", &self.state)
            .field("value", &*self.value.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SchedulerConfig, ViewModel};

    fn collect() -> (Rc<RefCell<Vec<String>>>, Callback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (
            seen,
            Callback::direct(move |value, _, _| sink.borrow_mut().push(value.to_string())),
        )
    }

    #[test]
    fn static_template_delivers_synchronously() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let (seen, callback) = collect();
        let binding = vm.bind("just text", callback, BindOptions::empty()).unwrap();
        assert_eq!(*seen.borrow(), ["just text"]);
        assert!(!binding.is_scheduled());
        assert_eq!(vm.scheduler().scheduled_count(), 0);

        vm.notify().unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(vm.scheduler().passes(), 0);
    }

    #[test]
    fn renders_with_formats() {
        let vm = ViewModel::new(SchedulerConfig::default());
        vm.set("name", Value::from("ada")).unwrap();
        vm.set("count", Value::from(1234.5)).unwrap();
        let (seen, callback) = collect();
        let _binding = vm
            .bind("{name:capitalize} has {count:number(2)}", callback, BindOptions::empty())
            .unwrap();
        vm.notify().unwrap();
        assert_eq!(*seen.borrow(), ["Ada has 1234.50"]);
    }

    #[test]
    fn unchanged_rendering_does_not_redeliver() {
        let vm = ViewModel::new(SchedulerConfig::default());
        vm.set("a", Value::from(-1)).unwrap();
        let (seen, callback) = collect();
        let _binding = vm.bind("{!a}", callback.clone(), BindOptions::empty()).unwrap();
        let _sign = vm.bind("neg: {!a}!", callback, BindOptions::empty()).unwrap();
        vm.notify().unwrap();
        assert_eq!(seen.borrow().len(), 2);

        // -1 and -2 are both truthy, so both renderings are unchanged.
        vm.set("a", Value::from(-2)).unwrap();
        vm.notify().unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn destroy_removes_multi() {
        let vm = ViewModel::new(SchedulerConfig::default());
        let (_seen, callback) = collect();
        let binding = vm.bind("{a}-{b}", callback, BindOptions::empty()).unwrap();
        assert_eq!(vm.binding_count(), 3, "template plus one binding per token");
        binding.destroy();
        binding.destroy();
        assert_eq!(vm.binding_count(), 0);
    }
}
