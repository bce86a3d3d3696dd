//! Joiners: given one key's rows from every branch, produce the joined rows.
//!
//! A gate hands the joiner a [`JoinerClosure`] over its buffered rows; the
//! joiner returns a [`JoinCursor`] that walks the result rows in place,
//! exposing each as a [`Row`] without copying.

pub mod cursor;

use serde::{Deserialize, Serialize};
use sluice_core::tuple::{Row, Tuple};

pub use cursor::{CartesianCursor, ValuesCursor};

/// A lending iterator: the cursor itself is the current row.
pub trait JoinCursor: Row {
    /// Move to the next row; `false` once exhausted.
    fn advance(&mut self) -> bool;

    fn row(&self) -> &dyn Row;
}

/// Shared empty collection for branches with no rows under a key.
pub static NO_ROWS: &[Tuple] = &[];

/// One key's view of every branch.
///
/// Stored rows have their key columns nulled; `key_positions[b][j]` is where
/// key column `j` lives in branch `b`'s rows, and the cursor restores it.
#[derive(Debug, Clone)]
pub struct JoinerClosure<'a> {
    key: &'a Tuple,
    branches: Vec<&'a [Tuple]>,
    key_positions: Vec<&'a [usize]>,
    widths: Vec<usize>,
}

impl<'a> JoinerClosure<'a> {
    pub fn new(
        key: &'a Tuple,
        branches: Vec<&'a [Tuple]>,
        key_positions: Vec<&'a [usize]>,
        widths: Vec<usize>,
    ) -> Self {
        Self {
            key,
            branches,
            key_positions,
            widths,
        }
    }

    pub fn key(&self) -> &'a Tuple {
        self.key
    }

    /// Number of branches.
    pub fn size(&self) -> usize {
        self.branches.len()
    }

    pub fn rows(&self, branch: usize) -> &'a [Tuple] {
        self.branches.get(branch).copied().unwrap_or(NO_ROWS)
    }

    pub fn is_empty(&self, branch: usize) -> bool {
        self.rows(branch).is_empty()
    }

    pub fn key_positions(&self, branch: usize) -> &'a [usize] {
        self.key_positions.get(branch).copied().unwrap_or(&[])
    }

    /// Width of a branch's rows; a null row of this width stands in for an
    /// empty outer branch.
    pub fn width(&self, branch: usize) -> usize {
        self.widths.get(branch).copied().unwrap_or(0)
    }

    /// A row of `branch` with its key columns restored.
    pub fn restored(&self, branch: usize, row: &'a Tuple, pos: usize) -> &'a sluice_core::value::Value {
        match self.key_positions(branch).iter().position(|&p| p == pos) {
            Some(j) => self.key.value(j),
            None => row.value(pos),
        }
    }
}

pub trait Joiner: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn cursor<'a>(&self, closure: JoinerClosure<'a>) -> Box<dyn JoinCursor + 'a>;
}

/// Per-branch policy: `true` means the branch must have rows under the key,
/// `false` means an empty branch contributes one all-null row.
fn cartesian<'a>(closure: JoinerClosure<'a>, required: impl Fn(usize) -> bool) -> Box<dyn JoinCursor + 'a> {
    let required: Vec<bool> = (0..closure.size()).map(required).collect();
    Box::new(CartesianCursor::new(closure, &required))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InnerJoin;

impl Joiner for InnerJoin {
    fn name(&self) -> &str {
        "inner"
    }

    fn cursor<'a>(&self, closure: JoinerClosure<'a>) -> Box<dyn JoinCursor + 'a> {
        cartesian(closure, |_| true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OuterJoin;

impl Joiner for OuterJoin {
    fn name(&self) -> &str {
        "outer"
    }

    fn cursor<'a>(&self, closure: JoinerClosure<'a>) -> Box<dyn JoinCursor + 'a> {
        cartesian(closure, |_| false)
    }
}

/// Branch 0 required, the rest optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeftJoin;

impl Joiner for LeftJoin {
    fn name(&self) -> &str {
        "left"
    }

    fn cursor<'a>(&self, closure: JoinerClosure<'a>) -> Box<dyn JoinCursor + 'a> {
        cartesian(closure, |b| b == 0)
    }
}

/// Branch 0 optional, the rest required.
#[derive(Debug, Clone, Copy, Default)]
pub struct RightJoin;

impl Joiner for RightJoin {
    fn name(&self) -> &str {
        "right"
    }

    fn cursor<'a>(&self, closure: JoinerClosure<'a>) -> Box<dyn JoinCursor + 'a> {
        cartesian(closure, |b| b != 0)
    }
}

/// Explicit inner (`true`) or outer (`false`) per branch; missing entries are inner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedJoin {
    inner: Vec<bool>,
}

impl MixedJoin {
    pub fn new(inner: Vec<bool>) -> Self {
        Self { inner }
    }
}

impl Joiner for MixedJoin {
    fn name(&self) -> &str {
        "mixed"
    }

    fn cursor<'a>(&self, closure: JoinerClosure<'a>) -> Box<dyn JoinCursor + 'a> {
        cartesian(closure, |b| self.inner.get(b).copied().unwrap_or(true))
    }
}

/// Serializable joiner choice for assembly descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Outer,
    Left,
    Right,
    Mixed(Vec<bool>),
}

impl JoinKind {
    pub fn joiner(&self) -> std::sync::Arc<dyn Joiner> {
        match self {
            JoinKind::Inner => std::sync::Arc::new(InnerJoin),
            JoinKind::Outer => std::sync::Arc::new(OuterJoin),
            JoinKind::Left => std::sync::Arc::new(LeftJoin),
            JoinKind::Right => std::sync::Arc::new(RightJoin),
            JoinKind::Mixed(inner) => std::sync::Arc::new(MixedJoin::new(inner.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::tuple;
    use sluice_core::value::Value;

    fn collect(mut cursor: Box<dyn JoinCursor + '_>) -> Vec<Tuple> {
        let mut out = Vec::new();
        while cursor.advance() {
            out.push(cursor.to_tuple());
        }
        out
    }

    struct Fixture {
        key: Tuple,
        left: Vec<Tuple>,
        right: Vec<Tuple>,
        positions: Vec<usize>,
    }

    impl Fixture {
        fn new(left: Vec<Tuple>, right: Vec<Tuple>) -> Self {
            Self {
                key: tuple![1i64],
                left,
                right,
                positions: vec![0],
            }
        }

        fn closure(&self) -> JoinerClosure<'_> {
            JoinerClosure::new(
                &self.key,
                vec![self.left.as_slice(), self.right.as_slice()],
                vec![self.positions.as_slice(), self.positions.as_slice()],
                vec![2, 2],
            )
        }
    }

    #[test]
    fn inner_restores_keys_and_walks_cartesian() {
        let fx = Fixture::new(
            vec![tuple![Value::Null, "x"]],
            vec![tuple![Value::Null, "p"], tuple![Value::Null, "q"]],
        );
        let rows = collect(InnerJoin.cursor(fx.closure()));
        assert_eq!(rows, vec![tuple![1i64, "x", 1i64, "p"], tuple![1i64, "x", 1i64, "q"]]);
    }

    #[test]
    fn empty_branch_per_joiner() {
        let fx = Fixture::new(vec![tuple![Value::Null, "x"]], Vec::new());
        assert!(collect(InnerJoin.cursor(fx.closure())).is_empty());
        assert!(collect(RightJoin.cursor(fx.closure())).is_empty());
        let left = collect(LeftJoin.cursor(fx.closure()));
        assert_eq!(left, vec![tuple![1i64, "x", Value::Null, Value::Null]]);
        let outer = collect(OuterJoin.cursor(fx.closure()));
        assert_eq!(outer, left);
        let mixed = collect(MixedJoin::new(vec![true, false]).cursor(fx.closure()));
        assert_eq!(mixed, left);
    }

    #[test]
    fn join_kind_serde() {
        let kind: JoinKind = serde_json::from_str(r#""left""#).unwrap();
        assert_eq!(kind.joiner().name(), "left");
    }
}
