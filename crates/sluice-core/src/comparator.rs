//! Per-column comparators and the key comparator composed from them.
//!
//! A `FieldComparator` supplies both the ordering and the hash for a column,
//! so a composed key comparator and its hasher can never disagree.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::tuple::Row;
use crate::value::Value;

/// Property naming the comparator used for key columns without one attached.
pub const DEFAULT_COMPARATOR_PROPERTY: &str = "sluice.tuple.comparator.default";

pub trait FieldComparator: Send + Sync {
    fn name(&self) -> &str;

    fn compare(&self, a: &Value, b: &Value) -> Ordering;

    /// Must write equal state for any two values `compare` reports as equal.
    fn hash_value(&self, v: &Value, state: &mut dyn Hasher);
}

impl fmt::Debug for dyn FieldComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldComparator({})", self.name())
    }
}

/// Natural `Value` order, nulls first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Natural;

impl FieldComparator for Natural {
    fn name(&self) -> &str {
        "natural"
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        a.cmp(b)
    }

    fn hash_value(&self, v: &Value, mut state: &mut dyn Hasher) {
        v.hash(&mut state);
    }
}

/// Natural order reversed; nulls sort last.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reverse;

impl FieldComparator for Reverse {
    fn name(&self) -> &str {
        "reverse"
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        b.cmp(a)
    }

    fn hash_value(&self, v: &Value, mut state: &mut dyn Hasher) {
        v.hash(&mut state);
    }
}

/// Compares strings ignoring ASCII case; other values use natural order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitive;

impl FieldComparator for CaseInsensitive {
    fn name(&self) -> &str {
        "case-insensitive"
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => {
                let x = x.bytes().map(|c| c.to_ascii_lowercase());
                let y = y.bytes().map(|c| c.to_ascii_lowercase());
                x.cmp(y)
            }
            _ => a.cmp(b),
        }
    }

    fn hash_value(&self, v: &Value, mut state: &mut dyn Hasher) {
        match v {
            Value::Str(s) => {
                // same rank prefix as Value's own hash
                state.write_u8(6);
                for c in s.bytes() {
                    state.write_u8(c.to_ascii_lowercase());
                }
                state.write_u8(0xff);
            }
            other => other.hash(&mut state),
        }
    }
}

/// Look up a built-in comparator by name.
pub fn by_name(name: &str) -> Result<Arc<dyn FieldComparator>> {
    match name.trim() {
        "natural" => Ok(Arc::new(Natural)),
        "reverse" => Ok(Arc::new(Reverse)),
        "case-insensitive" => Ok(Arc::new(CaseInsensitive)),
        other => Err(Error::Config(format!("unknown comparator: {other}"))),
    }
}

/// Ordering and hashing over whole key rows, one comparator per column.
#[derive(Clone)]
pub struct KeyComparator {
    columns: Vec<Arc<dyn FieldComparator>>,
    fallback: Arc<dyn FieldComparator>,
}

impl fmt::Debug for KeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name()).collect();
        f.debug_struct("KeyComparator")
            .field("columns", &names)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl Default for KeyComparator {
    fn default() -> Self {
        Self::natural()
    }
}

impl KeyComparator {
    pub fn natural() -> Self {
        Self {
            columns: Vec::new(),
            fallback: Arc::new(Natural),
        }
    }

    pub fn new(columns: Vec<Arc<dyn FieldComparator>>) -> Self {
        Self {
            columns,
            fallback: Arc::new(Natural),
        }
    }

    /// Compose from the comparators attached to `key`, using `default` (or
    /// natural order) for columns without one.
    pub fn for_fields(key: &Fields, default: Option<Arc<dyn FieldComparator>>) -> Self {
        let fallback: Arc<dyn FieldComparator> = default.unwrap_or_else(|| Arc::new(Natural));
        let columns = (0..key.size())
            .map(|i| key.comparator(i).cloned().unwrap_or_else(|| fallback.clone()))
            .collect();
        Self { columns, fallback }
    }

    fn column(&self, i: usize) -> &dyn FieldComparator {
        self.columns.get(i).unwrap_or(&self.fallback).as_ref()
    }

    pub fn compare(&self, a: &dyn Row, b: &dyn Row) -> Ordering {
        a.arity().cmp(&b.arity()).then_with(|| {
            for i in 0..a.arity() {
                match self.column(i).compare(a.value(i), b.value(i)) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            Ordering::Equal
        })
    }

    pub fn hash_into(&self, row: &dyn Row, state: &mut dyn Hasher) {
        state.write_usize(row.arity());
        for i in 0..row.arity() {
            self.column(i).hash_value(row.value(i), state);
        }
    }

    pub fn hash(&self, row: &dyn Row) -> u64 {
        let mut h = DefaultHasher::new();
        self.hash_into(row, &mut h);
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    #[test]
    fn case_insensitive_agrees_with_hash() {
        let cmp = KeyComparator::new(vec![Arc::new(CaseInsensitive)]);
        let a = tuple!["Hello"];
        let b = tuple!["hELLO"];
        assert_eq!(cmp.compare(&a, &b), Ordering::Equal);
        assert_eq!(cmp.hash(&a), cmp.hash(&b));
        assert_eq!(cmp.compare(&tuple!["a"], &tuple!["B"]), Ordering::Less);
    }

    #[test]
    fn reverse_puts_nulls_last() {
        let cmp = KeyComparator::new(vec![Arc::new(Reverse)]);
        assert_eq!(cmp.compare(&tuple![Value::Null], &tuple![1i64]), Ordering::Greater);
    }

    #[test]
    fn for_fields_uses_attached_then_default() {
        let key = Fields::new(["a", "b"])
            .unwrap()
            .with_comparator("b", Arc::new(Reverse))
            .unwrap();
        let cmp = KeyComparator::for_fields(&key, Some(Arc::new(CaseInsensitive)));
        assert_eq!(cmp.compare(&tuple!["X", 1i64], &tuple!["x", 2i64]), Ordering::Greater);
    }

    #[test]
    fn unknown_comparator_name_is_config_error() {
        assert!(matches!(by_name("bogus"), Err(Error::Config(_))));
        assert_eq!(by_name("reverse").unwrap().name(), "reverse");
    }
}
