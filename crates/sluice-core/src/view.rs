//! Zero-copy projections over one or two backing rows.
//!
//! A [`Layout`] is computed once (at initialize time) and maps every output
//! position to a slot in one of the backing rows. A [`View`] pairs a layout
//! with the current backing rows; `rebind` swaps the rows without allocating.

use crate::error::{Error, Result};
use crate::tuple::{Row, Tuple, EMPTY};
use crate::value::{Value, NULL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Value at `pos` of backing row `part` (0 or 1).
    Take { part: u8, pos: usize },
    /// Always null.
    Null,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    slots: Vec<Slot>,
}

impl Layout {
    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// Subset of the first row.
    pub fn narrow(positions: &[usize]) -> Self {
        Self {
            slots: positions.iter().map(|&pos| Slot::Take { part: 0, pos }).collect(),
        }
    }

    /// First row followed by the second.
    pub fn composite(left: usize, right: usize) -> Self {
        let slots = (0..left)
            .map(|pos| Slot::Take { part: 0, pos })
            .chain((0..right).map(|pos| Slot::Take { part: 1, pos }))
            .collect();
        Self { slots }
    }

    /// First row with `positions` replaced, in order, by the second row's values.
    pub fn overlay(base: usize, positions: &[usize]) -> Self {
        let mut slots: Vec<Slot> = (0..base).map(|pos| Slot::Take { part: 0, pos }).collect();
        for (i, &p) in positions.iter().enumerate() {
            if let Some(slot) = slots.get_mut(p) {
                *slot = Slot::Take { part: 1, pos: i };
            }
        }
        Self { slots }
    }

    /// First row with `positions` nulled out.
    pub fn nulled(arity: usize, positions: &[usize]) -> Self {
        let slots = (0..arity)
            .map(|pos| {
                if positions.contains(&pos) {
                    Slot::Null
                } else {
                    Slot::Take { part: 0, pos }
                }
            })
            .collect();
        Self { slots }
    }

    /// Compose: a layout exposing `positions` of this layout's output.
    pub fn then_narrow(&self, positions: &[usize]) -> Result<Layout> {
        let mut slots = Vec::with_capacity(positions.len());
        for &p in positions {
            let slot = self.slots.get(p).copied().ok_or_else(|| {
                Error::Invariant(format!(
                    "narrow position {p} outside layout of width {}",
                    self.slots.len()
                ))
            })?;
            slots.push(slot);
        }
        Ok(Layout { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// True when this layout is the identity over a first row of `arity`.
    pub fn is_identity(&self, arity: usize) -> bool {
        self.slots.len() == arity
            && self
                .slots
                .iter()
                .enumerate()
                .all(|(i, s)| *s == Slot::Take { part: 0, pos: i })
    }

    pub fn view<'a>(&'a self, first: &'a dyn Row, second: &'a dyn Row) -> View<'a> {
        View {
            layout: self,
            parts: [first, second],
        }
    }

    pub fn view_of<'a>(&'a self, first: &'a dyn Row) -> View<'a> {
        self.view(first, &EMPTY)
    }
}

/// A read-only window onto backing rows. Never mutated except via `rebind`.
#[derive(Clone, Copy)]
pub struct View<'a> {
    layout: &'a Layout,
    parts: [&'a dyn Row; 2],
}

impl<'a> View<'a> {
    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    /// Point the view at new backing rows.
    pub fn rebind(&mut self, first: &'a dyn Row, second: &'a dyn Row) {
        self.parts = [first, second];
    }
}

impl Row for View<'_> {
    fn arity(&self) -> usize {
        self.layout.len()
    }

    fn get(&self, pos: usize) -> Option<&Value> {
        match self.layout.slots.get(pos)? {
            Slot::Take { part, pos } => Some(self.parts[*part as usize].value(*pos)),
            Slot::Null => Some(&NULL),
        }
    }
}

impl std::fmt::Debug for View<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "View{}", crate::tuple::preview(self, 256))
    }
}

/// The result of a tuple builder: the input itself, a view, or an owned tuple.
pub enum RowCow<'a> {
    Borrowed(&'a dyn Row),
    View(View<'a>),
    Owned(Tuple),
}

impl RowCow<'_> {
    pub fn into_tuple(self) -> Tuple {
        match self {
            RowCow::Owned(t) => t,
            RowCow::Borrowed(r) => r.to_tuple(),
            RowCow::View(v) => v.to_tuple(),
        }
    }

    pub fn as_row(&self) -> &dyn Row {
        self
    }
}

impl Row for RowCow<'_> {
    fn arity(&self) -> usize {
        match self {
            RowCow::Borrowed(r) => r.arity(),
            RowCow::View(v) => v.arity(),
            RowCow::Owned(t) => t.arity(),
        }
    }

    fn get(&self, pos: usize) -> Option<&Value> {
        match self {
            RowCow::Borrowed(r) => r.get(pos),
            RowCow::View(v) => v.get(pos),
            RowCow::Owned(t) => t.get(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    #[test]
    fn composite_then_narrow_reads_through() {
        let input = tuple![1i64, "a"];
        let output = tuple![2.5f64];
        let layout = Layout::composite(2, 1).then_narrow(&[2, 0]).unwrap();
        let view = layout.view(&input, &output);
        assert_eq!(view.to_tuple(), tuple![2.5f64, 1i64]);
    }

    #[test]
    fn overlay_and_nulled() {
        let input = tuple![1i64, "a", true];
        let output = tuple!["z"];
        let over = Layout::overlay(3, &[1]);
        assert_eq!(over.view(&input, &output).to_tuple(), tuple![1i64, "z", true]);

        let nulled = Layout::nulled(3, &[0, 2]);
        assert_eq!(nulled.view_of(&input).to_tuple(), tuple![Value::Null, "a", Value::Null]);
    }

    #[test]
    fn rebind_swaps_rows() {
        let layout = Layout::narrow(&[1]);
        let a = tuple![1i64, "a"];
        let b = tuple![2i64, "b"];
        let mut view = layout.view_of(&a);
        assert_eq!(view.value(0), &Value::from("a"));
        view.rebind(&b, &EMPTY);
        assert_eq!(view.value(0), &Value::from("b"));
        assert!(view.get(1).is_none());
    }

    #[test]
    fn narrow_past_width_is_invariant_error() {
        assert!(Layout::composite(1, 1).then_narrow(&[2]).is_err());
        assert!(Layout::narrow(&[0, 1]).is_identity(2));
    }
}
