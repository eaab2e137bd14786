#![forbid(unsafe_code)]

//! Dynamic values delivered through bindings.
//!
//! A [`Value`] is either a scalar or a shared container. Containers are
//! reference types: cloning a `Value::Array` or `Value::Object` clones the
//! handle, not the contents, and an in-place mutation keeps the identity.
//!
//! # Invariants
//!
//! 1. [`Value::same`] is identity: scalars compare by value, strings by
//!    content, containers by pointer. `NaN` is never the same as itself.
//! 2. `PartialEq` is structural and recurses into containers.
//! 3. `Undefined` and `Null` both display as the empty string.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Shared, mutable array storage.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Shared, mutable object storage with ordered keys.
pub type ObjectRef = Rc<RefCell<BTreeMap<String, Value>>>;

/// A dynamically typed datum.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// No value has ever been provided.
    #[default]
    Undefined,
    /// An explicit empty value.
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
}

impl Value {
    /// Build an array value from its elements.
    #[must_use]
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// Build an object value from `(key, value)` pairs.
    #[must_use]
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    /// An empty object.
    #[must_use]
    pub fn empty_object() -> Self {
        Self::Object(Rc::new(RefCell::new(BTreeMap::new())))
    }

    /// Identity comparison used for change detection.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `true` for `Undefined` and `Null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Truthiness: empty strings, zero, `NaN`, `false` and nullish values are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) => true,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read a direct property of an object value.
    ///
    /// Non-objects and missing keys yield `Undefined`.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        match self {
            Self::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
            Self::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.borrow().get(i).cloned())
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Read a dotted path (`"user.address.city"`).
    #[must_use]
    pub fn lookup(&self, path: &str) -> Value {
        if path.is_empty() {
            return self.clone();
        }
        path.split('.')
            .fold(self.clone(), |current, segment| current.get(segment))
    }

    /// Write `value` at a dotted path inside this object, creating
    /// intermediate objects where the path crosses a non-object.
    ///
    /// Returns `false` when `self` is not an object or the path is empty.
    pub fn set_path(&self, path: &str, value: Value) -> bool {
        let Self::Object(root) = self else {
            return false;
        };
        if path.is_empty() {
            return false;
        }
        let mut segments = path.split('.').peekable();
        let mut current = Rc::clone(root);
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                let mut map = current.borrow_mut();
                if value.is_undefined() {
                    map.remove(segment);
                } else {
                    map.insert(segment.to_owned(), value);
                }
                return true;
            }
            let next = {
                let mut map = current.borrow_mut();
                let slot = map.entry(segment.to_owned()).or_default();
                match slot {
                    Self::Object(child) => Rc::clone(child),
                    other => {
                        let fresh: ObjectRef = Rc::new(RefCell::new(BTreeMap::new()));
                        *other = Self::Object(Rc::clone(&fresh));
                        fresh
                    }
                }
            };
            current = next;
        }
        true
    }

    /// Push onto an array value in place. Returns `false` for non-arrays.
    pub fn push(&self, item: Value) -> bool {
        match self {
            Self::Array(items) => {
                items.borrow_mut().push(item);
                true
            }
            _ => false,
        }
    }

    /// Number of elements (arrays) or keys (objects).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Array(items) => items.borrow().len(),
            Self::Object(map) => map.borrow().len(),
            Self::String(s) => s.chars().count(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            _ => self.same(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined | Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write_number(f, *n),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Object(_) => f.write_str("[object]"),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_is_identity_for_containers() {
        let a = Value::array([Value::from(1), Value::from(2)]);
        let b = Value::array([Value::from(1), Value::from(2)]);
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert_eq!(a, b, "structural equality still holds");
    }

    #[test]
    fn same_scalars() {
        assert!(Value::from(3).same(&Value::from(3.0)));
        assert!(Value::from("x").same(&Value::from(String::from("x"))));
        assert!(!Value::Null.same(&Value::Undefined));
        assert!(!Value::from(f64::NAN).same(&Value::from(f64::NAN)));
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let v = Value::object([(
            "user",
            Value::object([
                ("name", Value::from("Ada")),
                ("tags", Value::array([Value::from("a"), Value::from("b")])),
            ]),
        )]);
        assert_eq!(v.lookup("user.name"), Value::from("Ada"));
        assert_eq!(v.lookup("user.tags.1"), Value::from("b"));
        assert!(v.lookup("user.missing.deeper").is_undefined());
        assert!(v.lookup("").same(&v));
    }

    #[test]
    fn set_path_creates_intermediates() {
        let root = Value::empty_object();
        assert!(root.set_path("a.b.c", Value::from(1)));
        assert_eq!(root.lookup("a.b.c"), Value::from(1));

        // Overwrite a scalar with an object on the way down.
        assert!(root.set_path("a.b.c.d", Value::from(2)));
        assert_eq!(root.lookup("a.b.c.d"), Value::from(2));

        assert!(root.set_path("a.b", Value::Undefined));
        assert!(root.lookup("a.b").is_undefined());
        assert!(!Value::from(1).set_path("x", Value::Null));
    }

    #[test]
    fn in_place_mutation_keeps_identity() {
        let list = Value::array([]);
        let alias = list.clone();
        assert!(list.push(Value::from(1)));
        assert!(alias.same(&list));
        assert_eq!(alias.len(), 1);
    }

    #[test]
    fn display_rules() {
        assert_eq!(Value::Undefined.to_string(), "");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(
            Value::array([Value::from(1), Value::from("x")]).to_string(),
            "1,x"
        );
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::empty_object().is_truthy());
        assert!(!Value::Undefined.is_truthy());
    }
}
