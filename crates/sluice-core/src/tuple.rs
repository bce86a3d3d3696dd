//! `Tuple`: an ordered, mutable, variable-length record, and `Row`, the read
//! interface shared by tuples and every zero-copy view over them.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{Value, NULL};

/// Read-only positional access to a record.
///
/// Implemented by [`Tuple`], by [`crate::view::View`] and by join cursors.
/// Out-of-range reads through [`Row::value`] yield `Value::Null`; callers that
/// need to distinguish use [`Row::get`].
pub trait Row {
    fn arity(&self) -> usize;

    fn get(&self, pos: usize) -> Option<&Value>;

    fn value(&self, pos: usize) -> &Value {
        self.get(pos).unwrap_or(&NULL)
    }

    fn has_null(&self) -> bool {
        (0..self.arity()).any(|i| self.value(i).is_null())
    }

    /// Materialise the row into an owned tuple.
    fn to_tuple(&self) -> Tuple {
        let mut elements = Vec::with_capacity(self.arity());
        for i in 0..self.arity() {
            elements.push(self.value(i).clone());
        }
        Tuple::from(elements)
    }

    fn row_eq(&self, other: &dyn Row) -> bool {
        self.arity() == other.arity() && (0..self.arity()).all(|i| self.value(i) == other.value(i))
    }
}

impl<R: Row + ?Sized> Row for &R {
    fn arity(&self) -> usize {
        (**self).arity()
    }

    fn get(&self, pos: usize) -> Option<&Value> {
        (**self).get(pos)
    }
}

/// Render a row for log output, truncated to `max_chars` characters.
pub fn preview(row: &dyn Row, max_chars: usize) -> String {
    let mut out = String::from("[");
    for i in 0..row.arity() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(&mut out, row.value(i));
        if out.len() > max_chars {
            break;
        }
    }
    out.push(']');
    if out.chars().count() > max_chars {
        let truncated: String = out.chars().take(max_chars).collect();
        return format!("{truncated}...");
    }
    out
}

fn write_value(out: &mut String, v: &Value) {
    use std::fmt::Write as _;
    match v {
        Value::Str(s) => {
            let _ = write!(out, "'{s}'");
        }
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Value>", into = "Vec<Value>")]
pub struct Tuple {
    elements: Vec<Value>,
    unmodifiable: bool,
}

/// Shared zero-arity tuple.
pub static EMPTY: Tuple = Tuple {
    elements: Vec::new(),
    unmodifiable: true,
};

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            elements: Vec::with_capacity(cap),
            unmodifiable: false,
        }
    }

    /// A tuple of `size` nulls.
    pub fn nulls(size: usize) -> Self {
        Self::from(vec![Value::Null; size])
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<Value> {
        self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.elements.iter()
    }

    pub fn is_unmodifiable(&self) -> bool {
        self.unmodifiable
    }

    pub fn set_unmodifiable(&mut self) {
        self.unmodifiable = true;
    }

    fn verify_modifiable(&self) -> Result<()> {
        if self.unmodifiable {
            return Err(Error::Tuple("this tuple is unmodifiable".into()));
        }
        Ok(())
    }

    pub fn set(&mut self, pos: usize, value: impl Into<Value>) -> Result<()> {
        self.verify_modifiable()?;
        let size = self.elements.len();
        let slot = self.elements.get_mut(pos).ok_or_else(|| {
            Error::Tuple(format!("position {pos} out of range for tuple of size {size}"))
        })?;
        *slot = value.into();
        Ok(())
    }

    pub fn add(&mut self, value: impl Into<Value>) -> Result<()> {
        self.verify_modifiable()?;
        self.elements.push(value.into());
        Ok(())
    }

    /// Append every value of `row`.
    pub fn add_all(&mut self, row: &dyn Row) -> Result<()> {
        self.verify_modifiable()?;
        self.elements.reserve(row.arity());
        for i in 0..row.arity() {
            self.elements.push(row.value(i).clone());
        }
        Ok(())
    }

    /// Return a new tuple holding this tuple's values followed by `others`.
    pub fn append(&self, others: &[&dyn Row]) -> Tuple {
        let extra: usize = others.iter().map(|r| r.arity()).sum();
        let mut elements = Vec::with_capacity(self.size() + extra);
        elements.extend(self.elements.iter().cloned());
        for row in others {
            for i in 0..row.arity() {
                elements.push(row.value(i).clone());
            }
        }
        Tuple::from(elements)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.verify_modifiable()?;
        self.elements.clear();
        Ok(())
    }

    /// Replace the contents with a copy of `row`, reusing the allocation.
    pub fn set_all(&mut self, row: &dyn Row) -> Result<()> {
        self.verify_modifiable()?;
        self.elements.clear();
        for i in 0..row.arity() {
            self.elements.push(row.value(i).clone());
        }
        Ok(())
    }

    /// Copy the values at `positions` into a new tuple.
    pub fn select(&self, positions: &[usize]) -> Result<Tuple> {
        let mut elements = Vec::with_capacity(positions.len());
        for &pos in positions {
            let v = self.elements.get(pos).ok_or_else(|| {
                Error::Tuple(format!(
                    "position {pos} out of range for tuple of size {}",
                    self.size()
                ))
            })?;
            elements.push(v.clone());
        }
        Ok(Tuple::from(elements))
    }

    /// Remove the values at `positions`, returning them in selector order.
    pub fn remove(&mut self, positions: &[usize]) -> Result<Tuple> {
        self.verify_modifiable()?;
        let removed = self.select(positions)?;
        let mut sorted = positions.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for pos in sorted.into_iter().rev() {
            self.elements.remove(pos);
        }
        Ok(removed)
    }

    /// Overwrite the values at `positions` with the values of `row`, in order.
    pub fn put(&mut self, positions: &[usize], row: &dyn Row) -> Result<()> {
        self.verify_modifiable()?;
        if positions.len() != row.arity() {
            return Err(Error::Tuple(format!(
                "put expects {} values, got {}",
                positions.len(),
                row.arity()
            )));
        }
        for (i, &pos) in positions.iter().enumerate() {
            self.set(pos, row.value(i).clone())?;
        }
        Ok(())
    }
}

impl Row for Tuple {
    fn arity(&self) -> usize {
        self.elements.len()
    }

    fn get(&self, pos: usize) -> Option<&Value> {
        self.elements.get(pos)
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(elements: Vec<Value>) -> Self {
        Self {
            elements,
            unmodifiable: false,
        }
    }
}

impl From<Tuple> for Vec<Value> {
    fn from(t: Tuple) -> Self {
        t.elements
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Tuple::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl Eq for Tuple {}

impl Hash for Tuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.elements.hash(state);
    }
}

impl Ord for Tuple {
    /// Sizes are compared first; equal sizes compare element-wise, nulls first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.size()
            .cmp(&other.size())
            .then_with(|| self.elements.cmp(&other.elements))
    }
}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&preview(self, usize::MAX))
    }
}

/// Build a [`Tuple`] from a list of values convertible into [`Value`].
#[macro_export]
macro_rules! tuple {
    () => { $crate::tuple::Tuple::new() };
    ($($v:expr),+ $(,)?) => {
        $crate::tuple::Tuple::from(vec![$($crate::value::Value::from($v)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    #[test]
    fn size_is_compared_before_elements() {
        let short = tuple![9i64];
        let long = tuple![1i64, 1i64];
        assert!(short < long);
        assert!(tuple![Value::Null, 5i64] < tuple![1i64, 0i64]);
    }

    #[test]
    fn unmodifiable_rejects_every_mutator() {
        let mut t = tuple![1i64, "a"];
        t.set_unmodifiable();
        assert!(t.set(0, 2i64).is_err());
        assert!(t.add(3i64).is_err());
        assert!(t.clear().is_err());
        assert!(t.remove(&[0]).is_err());
        assert!(t.put(&[0], &tuple![5i64]).is_err());
        assert_eq!(t, tuple![1i64, "a"]);
    }

    #[test]
    fn select_remove_put() {
        let mut t = tuple![1i64, "b", 3.0f64, true];
        assert_eq!(t.select(&[3, 0]).unwrap(), tuple![true, 1i64]);

        let removed = t.remove(&[1, 3]).unwrap();
        assert_eq!(removed, tuple!["b", true]);
        assert_eq!(t, tuple![1i64, 3.0f64]);

        t.put(&[1], &tuple!["x"]).unwrap();
        assert_eq!(t, tuple![1i64, "x"]);
        assert!(t.select(&[7]).is_err());
    }

    #[test]
    fn append_and_preview() {
        let t = tuple![1i64].append(&[&tuple!["a"], &tuple![Value::Null]]);
        assert_eq!(t.size(), 3);
        assert_eq!(t.to_string(), "[1, 'a', null]");
        assert_eq!(preview(&t, 4), "[1, ...");
    }

    #[test]
    fn serde_is_a_plain_array() {
        let t = tuple![1i64, "a"];
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"[{"I64":1},{"Str":"a"}]"#);
        let back: Tuple = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
