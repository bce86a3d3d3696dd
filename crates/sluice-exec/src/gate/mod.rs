//! Splice gates: grouping and joining of one or more branches by key.
//!
//! All gates share [`Splice`]: per-branch key and value builders, the key
//! comparator, and the per-branch key maps. Stored values have their key
//! columns nulled; the join cursors restore them from the map's key.
//!
//! Design intent:
//! - Probing a map never allocates; the key is materialised only when a new
//!   entry is inserted.
//! - The comparator that orders keys is the one that hashes them.

pub mod cogroup;
pub mod hashjoin;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use sluice_core::builder::{KeyBuilder, ValueBuilder};
use sluice_core::comparator::{FieldComparator, KeyComparator, Natural};
use sluice_core::config::FlowConfig;
use sluice_core::fields::Fields;
use sluice_core::id::DuctId;
use sluice_core::tuple::{Row, Tuple};
use sluice_operators::join::{ValuesCursor, NO_ROWS};
use sluice_operators::{JoinCursor, Joiner, JoinerClosure};

use crate::duct::{GroupValues, Links};
use crate::error::{ExecError, ExecResult};
use crate::stage::Wiring;

pub use cogroup::CoGroupGate;
pub use hashjoin::HashJoinGate;

/// One input of a splice.
#[derive(Debug, Clone)]
pub struct SpliceBranch {
    pub name: String,
    pub fields: Fields,
    pub grouping: Fields,
}

/// Everything a gate needs from the assembly.
#[derive(Debug, Clone)]
pub struct SpliceSpec {
    pub name: String,
    pub branches: Vec<SpliceBranch>,
    /// Additional copies of the single branch joined with itself.
    pub self_joins: usize,
    pub reverse: bool,
    pub nulls_not_equal: bool,
}

impl SpliceSpec {
    /// Branches as the joiner sees them, self-join copies included.
    pub fn width(&self) -> usize {
        self.branches.len() + self.self_joins
    }
}

/// Key to rows, probed with borrowed key views.
#[derive(Debug, Default)]
pub(crate) struct KeyMap {
    index: HashMap<u64, Vec<usize>>,
    keys: Vec<Tuple>,
    values: Vec<Vec<Tuple>>,
    marked: Vec<bool>,
}

impl KeyMap {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn find(&self, cmp: &KeyComparator, key: &dyn Row) -> Option<usize> {
        self.find_hashed(cmp, cmp.hash(key), key)
    }

    fn find_hashed(&self, cmp: &KeyComparator, hash: u64, key: &dyn Row) -> Option<usize> {
        self.index
            .get(&hash)?
            .iter()
            .copied()
            .find(|&i| cmp.compare(&self.keys[i], key) == Ordering::Equal)
    }

    pub fn insert(&mut self, cmp: &KeyComparator, key: &dyn Row, value: Tuple) {
        let hash = cmp.hash(key);
        let slot = match self.find_hashed(cmp, hash, key) {
            Some(i) => i,
            None => {
                let i = self.keys.len();
                self.keys.push(key.to_tuple());
                self.values.push(Vec::new());
                self.marked.push(false);
                self.index.entry(hash).or_default().push(i);
                i
            }
        };
        self.values[slot].push(value);
    }

    pub fn key(&self, i: usize) -> &Tuple {
        &self.keys[i]
    }

    pub fn rows(&self, i: usize) -> &[Tuple] {
        &self.values[i]
    }

    pub fn mark(&mut self, i: usize) {
        self.marked[i] = true;
    }

    pub fn is_marked(&self, i: usize) -> bool {
        self.marked[i]
    }

    pub fn sort_rows(&mut self, mut by: impl FnMut(&Tuple, &Tuple) -> Ordering) {
        for rows in &mut self.values {
            rows.sort_by(&mut by);
        }
    }
}

pub(crate) fn fallback_comparator(config: &FlowConfig) -> ExecResult<Arc<dyn FieldComparator>> {
    Ok(match config.default_comparator()? {
        Some(c) => c,
        None => Arc::new(Natural),
    })
}

/// One comparator per selected column: the selector's own, else the one
/// attached to the field, else `fallback`.
pub(crate) fn column_comparator(
    fields: &Fields,
    selector: &Fields,
    fallback: &Arc<dyn FieldComparator>,
) -> ExecResult<KeyComparator> {
    let selected = if fields.is_unknown() {
        selector.clone()
    } else {
        fields.select(selector)?
    };
    let columns = (0..selector.size())
        .map(|i| {
            selector
                .comparator(i)
                .or_else(|| selected.comparator(i))
                .cloned()
                .unwrap_or_else(|| fallback.clone())
        })
        .collect();
    Ok(KeyComparator::new(columns))
}

/// Shared state of every gate.
pub(crate) struct Splice {
    pub spec: SpliceSpec,
    /// All branches accumulate into map 0.
    merge_branches: bool,
    pub keys: Vec<KeyBuilder>,
    pub values: Vec<ValueBuilder>,
    declared_widths: Vec<Option<usize>>,
    observed_widths: Vec<usize>,
    pub comparator: KeyComparator,
    pub maps: Vec<KeyMap>,
    preds: Vec<(DuctId, usize)>,
    pub wiring: Option<Wiring>,
    pub started: bool,
}

impl Splice {
    pub fn new(spec: SpliceSpec, merge_branches: bool) -> Self {
        Self {
            spec,
            merge_branches,
            keys: Vec::new(),
            values: Vec::new(),
            declared_widths: Vec::new(),
            observed_widths: Vec::new(),
            comparator: KeyComparator::natural(),
            maps: Vec::new(),
            preds: Vec::new(),
            wiring: None,
            started: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn bind(&mut self, links: &Links) -> ExecResult<()> {
        if links.preds.is_empty() {
            return Err(ExecError::config(format!("{} has no incoming branches", self.name())));
        }
        if let Some(p) = links.preds.iter().find(|p| p.ordinal >= self.spec.branches.len()) {
            return Err(ExecError::config(format!(
                "{}: edge from {} names branch {} of {}",
                self.name(),
                p.id,
                p.ordinal,
                self.spec.branches.len()
            )));
        }
        self.preds = links.preds.iter().map(|p| (p.id, p.ordinal)).collect();
        self.wiring = Some(Wiring::bind(&self.spec.name, links)?);
        Ok(())
    }

    pub fn initialize(&mut self, config: &FlowConfig) -> ExecResult<()> {
        let first = self
            .spec
            .branches
            .first()
            .ok_or_else(|| ExecError::config(format!("{} has no branches", self.spec.name)))?;
        let arity = first.grouping.size();

        let mut keys = Vec::with_capacity(self.spec.branches.len());
        let mut values = Vec::with_capacity(self.spec.branches.len());
        let mut widths = Vec::with_capacity(self.spec.branches.len());
        for branch in &self.spec.branches {
            if branch.grouping.size() != arity {
                return Err(ExecError::config(format!(
                    "{}: branch '{}' groups on {} fields, expected {}",
                    self.spec.name,
                    branch.name,
                    branch.grouping.size(),
                    arity
                )));
            }
            let key = KeyBuilder::new(&branch.fields, &branch.grouping)?;
            if self.merge_branches && keys.first().is_some_and(|k: &KeyBuilder| k.positions() != key.positions()) {
                return Err(ExecError::config(format!(
                    "{}: branch '{}' has its key at different positions",
                    self.spec.name, branch.name
                )));
            }
            values.push(ValueBuilder::new(key.positions()));
            keys.push(key);
            widths.push(branch.fields.is_sized().then(|| branch.fields.size()));
        }

        self.comparator = column_comparator(&first.fields, &first.grouping, &fallback_comparator(config)?)?;
        self.observed_widths = vec![0; keys.len()];
        self.keys = keys;
        self.values = values;
        self.declared_widths = widths;
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        let n = if self.merge_branches { 1 } else { self.spec.branches.len() };
        self.maps = (0..n).map(|_| KeyMap::default()).collect();
        self.started = false;
    }

    pub fn ordinal_of(&self, from: DuctId) -> ExecResult<usize> {
        self.preds
            .iter()
            .find(|(id, _)| *id == from)
            .map(|(_, ordinal)| *ordinal)
            .ok_or_else(|| ExecError::invariant(format!("{} got a record from unbound {from}", self.name())))
    }

    pub fn accumulate(&mut self, ordinal: usize, row: &dyn Row) -> ExecResult<()> {
        self.observe(ordinal, row.arity());
        let key = self
            .keys
            .get(ordinal)
            .ok_or_else(|| ExecError::invariant(format!("{} has no branch {ordinal}", self.spec.name)))?;
        let value = self.values[ordinal].value(row);
        let map = if self.merge_branches { 0 } else { ordinal };
        self.maps[map].insert(&self.comparator, &key.view(row), value);
        Ok(())
    }

    pub fn observe(&mut self, ordinal: usize, arity: usize) {
        if let Some(width) = self.observed_widths.get_mut(ordinal) {
            *width = (*width).max(arity);
        }
    }

    fn branch_of(&self, joined: usize) -> usize {
        joined.min(self.spec.branches.len().saturating_sub(1))
    }

    pub fn width(&self, joined: usize) -> usize {
        let b = self.branch_of(joined);
        self.declared_widths[b].unwrap_or(self.observed_widths[b])
    }

    /// A closure over `rows`, one slice per joined branch. With
    /// `raw_first`, branch 0 rows still carry their key columns.
    pub fn closure<'a>(&'a self, key: &'a Tuple, rows: Vec<&'a [Tuple]>, raw_first: bool) -> JoinerClosure<'a> {
        let positions = (0..rows.len())
            .map(|j| {
                if raw_first && j == 0 {
                    &[][..]
                } else {
                    self.values[self.branch_of(j)].key_positions()
                }
            })
            .collect();
        let widths = (0..rows.len()).map(|j| self.width(j)).collect();
        JoinerClosure::new(key, rows, positions, widths)
    }

    /// Entries `(map, index)` of every map that pass `keep`, in key order
    /// and grouped into runs of equal keys.
    pub fn key_runs(&self, keep: impl Fn(usize, usize) -> bool) -> Vec<Vec<(usize, usize)>> {
        let mut entries: Vec<(usize, usize)> = self
            .maps
            .iter()
            .enumerate()
            .flat_map(|(m, map)| (0..map.len()).map(move |i| (m, i)))
            .filter(|&(m, i)| keep(m, i))
            .collect();
        let reverse = self.spec.reverse;
        entries.sort_by(|a, b| {
            let o = self.comparator.compare(self.maps[a.0].key(a.1), self.maps[b.0].key(b.1));
            let o = if reverse { o.reverse() } else { o };
            o.then(a.0.cmp(&b.0))
        });

        let mut runs: Vec<Vec<(usize, usize)>> = Vec::new();
        for entry in entries {
            let joins_last = runs.last().and_then(|run| run.first()).is_some_and(|first| {
                self.comparator
                    .compare(self.maps[first.0].key(first.1), self.maps[entry.0].key(entry.1))
                    == Ordering::Equal
            });
            match runs.last_mut() {
                Some(run) if joins_last => run.push(entry),
                _ => runs.push(vec![entry]),
            }
        }
        runs
    }

    /// Rows of every joined branch for one run; missing branches are empty.
    pub fn run_rows(&self, run: &[(usize, usize)]) -> Vec<&[Tuple]> {
        let mut rows = vec![NO_ROWS; self.spec.width()];
        for &(m, i) in run {
            if self.spec.self_joins > 0 {
                rows.iter_mut().for_each(|r| *r = self.maps[m].rows(i));
            } else {
                rows[m] = self.maps[m].rows(i);
            }
        }
        rows
    }
}

/// A join's values: whatever the joiner makes of the closure.
pub(crate) struct JoinedValues<'a> {
    pub closure: JoinerClosure<'a>,
    pub joiner: &'a dyn Joiner,
}

impl GroupValues for JoinedValues<'_> {
    fn cursor(&self) -> Box<dyn JoinCursor + '_> {
        self.joiner.cursor(self.closure.clone())
    }
}

/// A grouping's values: every row of every branch, keys restored.
pub(crate) struct MergedValues<'a> {
    pub closure: JoinerClosure<'a>,
}

impl GroupValues for MergedValues<'_> {
    fn cursor(&self) -> Box<dyn JoinCursor + '_> {
        Box::new(ValuesCursor::new(self.closure.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::comparator::CaseInsensitive;
    use sluice_core::tuple;

    #[test]
    fn key_map_probes_by_comparator() {
        let cmp = KeyComparator::new(vec![Arc::new(CaseInsensitive)]);
        let mut map = KeyMap::default();
        map.insert(&cmp, &tuple!["A"], tuple![1i64]);
        map.insert(&cmp, &tuple!["a"], tuple![2i64]);
        map.insert(&cmp, &tuple!["b"], tuple![3i64]);
        assert_eq!(map.len(), 2);
        let i = map.find(&cmp, &tuple!["A"]).unwrap();
        assert_eq!(map.key(i), &tuple!["A"]);
        assert_eq!(map.rows(i), &[tuple![1i64], tuple![2i64]]);
        assert!(map.find(&cmp, &tuple!["c"]).is_none());
    }

    fn spec(reverse: bool) -> SpliceSpec {
        let branch = |name: &str| SpliceBranch {
            name: name.into(),
            fields: Fields::new(["k", "v"]).unwrap(),
            grouping: Fields::name("k"),
        };
        SpliceSpec {
            name: "cogroup".into(),
            branches: vec![branch("lhs"), branch("rhs")],
            self_joins: 0,
            reverse,
            nulls_not_equal: false,
        }
    }

    #[test]
    fn runs_are_sorted_and_grouped() {
        for reverse in [false, true] {
            let mut splice = Splice::new(spec(reverse), false);
            splice.initialize(&FlowConfig::default()).unwrap();
            splice.accumulate(0, &tuple![2i64, "y"]).unwrap();
            splice.accumulate(1, &tuple![1i64, "p"]).unwrap();
            splice.accumulate(0, &tuple![1i64, "x"]).unwrap();

            let runs = splice.key_runs(|_, _| true);
            let keys: Vec<Tuple> = runs.iter().map(|r| splice.maps[r[0].0].key(r[0].1).clone()).collect();
            let expected = if reverse {
                vec![tuple![2i64], tuple![1i64]]
            } else {
                vec![tuple![1i64], tuple![2i64]]
            };
            assert_eq!(keys, expected);
            let one = runs.iter().find(|r| r.len() == 2).unwrap();
            let rows = splice.run_rows(one);
            assert_eq!(rows[0], &[tuple![sluice_core::value::Value::Null, "x"]]);
            assert_eq!(rows[1], &[tuple![sluice_core::value::Value::Null, "p"]]);
        }
    }
}
