//! Blocking gates: every branch is buffered before anything is emitted.
//!
//! One gate type serves both CoGroup (per-branch maps handed to a joiner) and
//! GroupBy (all branches merged into one map, values optionally sorted).

use std::cmp::Ordering;
use std::sync::Arc;

use sluice_core::builder::KeyBuilder;
use sluice_core::comparator::KeyComparator;
use sluice_core::config::FlowConfig;
use sluice_core::fields::Fields;
use sluice_core::id::DuctId;
use sluice_core::tuple::{Row, Tuple};
use sluice_operators::join::NO_ROWS;
use sluice_operators::Joiner;

use super::{column_comparator, fallback_comparator, JoinedValues, MergedValues, Splice, SpliceSpec};
use crate::countdown::Countdown;
use crate::duct::{Duct, Flow, Grouping, Incoming, Links, PrepareContext};
use crate::error::ExecResult;
use crate::stage::{not_ready, Wiring};

/// Order of values within each group.
#[derive(Debug, Clone)]
pub struct SecondarySort {
    pub sorting: Fields,
    pub reverse: bool,
}

struct Sorter {
    key: KeyBuilder,
    comparator: KeyComparator,
    reverse: bool,
}

impl Sorter {
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        let o = self.comparator.compare(&self.key.view(a), &self.key.view(b));
        if self.reverse {
            o.reverse()
        } else {
            o
        }
    }
}

pub struct CoGroupGate {
    splice: Splice,
    /// `None` for GroupBy.
    joiner: Option<Arc<dyn Joiner>>,
    sort: Option<SecondarySort>,
    sorter: Option<Sorter>,
    remaining: Countdown,
}

impl CoGroupGate {
    pub fn co_group(spec: SpliceSpec, joiner: Arc<dyn Joiner>) -> Self {
        Self {
            splice: Splice::new(spec, false),
            joiner: Some(joiner),
            sort: None,
            sorter: None,
            remaining: Countdown::new(0),
        }
    }

    pub fn group_by(spec: SpliceSpec, sort: Option<SecondarySort>) -> Self {
        Self {
            splice: Splice::new(spec, true),
            joiner: None,
            sort,
            sorter: None,
            remaining: Countdown::new(0),
        }
    }

    fn drain(&mut self, flow: &mut Flow<'_>, w: Wiring) -> ExecResult<()> {
        if let Some(sorter) = &self.sorter {
            for map in &mut self.splice.maps {
                map.sort_rows(|a, b| sorter.compare(a, b));
            }
        }

        let splice = &self.splice;
        let mut groups = 0usize;
        // A run already holds every map's entry for one key, so each
        // null-bearing key is visited once and split per branch here.
        for run in splice.key_runs(|_, _| true) {
            let (m, i) = run[0];
            let key = splice.maps[m].key(i);
            if splice.spec.nulls_not_equal && key.has_null() {
                for &(m, i) in &run {
                    let mut rows = vec![NO_ROWS; splice.spec.width()];
                    rows[m] = splice.maps[m].rows(i);
                    self.emit(flow, w, splice.maps[m].key(i), rows)?;
                    groups += 1;
                }
                continue;
            }
            let rows = match self.joiner {
                Some(_) => splice.run_rows(&run),
                None => run.iter().map(|&(m, i)| splice.maps[m].rows(i)).collect(),
            };
            self.emit(flow, w, key, rows)?;
            groups += 1;
        }
        tracing::debug!(gate = %splice.name(), groups, "drained");
        Ok(())
    }

    fn emit(&self, flow: &mut Flow<'_>, w: Wiring, key: &Tuple, rows: Vec<&[Tuple]>) -> ExecResult<()> {
        let closure = self.splice.closure(key, rows, false);
        match &self.joiner {
            Some(joiner) => {
                let values = JoinedValues {
                    closure,
                    joiner: joiner.as_ref(),
                };
                flow.receive(w.next, w.me, Incoming::Grouping(Grouping::new(key, &values)))
            }
            None => {
                let values = MergedValues { closure };
                flow.receive(w.next, w.me, Incoming::Grouping(Grouping::new(key, &values)))
            }
        }
    }
}

impl Duct for CoGroupGate {
    fn name(&self) -> &str {
        self.splice.name()
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.splice.bind(links)?;
        self.remaining = Countdown::new(links.incoming_paths());
        Ok(())
    }

    fn initialize(&mut self, config: &FlowConfig) -> ExecResult<()> {
        self.splice.initialize(config)?;
        self.sorter = match &self.sort {
            Some(sort) => {
                let fields = &self.splice.spec.branches[0].fields;
                Some(Sorter {
                    key: KeyBuilder::new(fields, &sort.sorting)?,
                    comparator: column_comparator(fields, &sort.sorting, &fallback_comparator(config)?)?,
                    reverse: sort.reverse,
                })
            }
            None => None,
        };
        Ok(())
    }

    fn prepare(&mut self, _ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        self.splice.reset();
        self.remaining.reset();
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let w = self.splice.wiring.ok_or_else(|| not_ready(self.splice.name(), "start"))?;
        if self.splice.started {
            return Ok(());
        }
        self.splice.started = true;
        flow.start(w.next, w.me)
    }

    fn receive(&mut self, _flow: &mut Flow<'_>, from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let ordinal = self.splice.ordinal_of(from)?;
        let row: &dyn Row = incoming.entry()?;
        self.splice.accumulate(ordinal, row)
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let w = self.splice.wiring.ok_or_else(|| not_ready(self.splice.name(), "complete"))?;
        if !self.remaining.decrement()? {
            return Ok(());
        }
        let drained = self.drain(flow, w);
        self.splice.reset();
        self.remaining.reset();
        drained?;
        flow.complete(w.next, w.me)
    }
}

impl std::fmt::Debug for CoGroupGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoGroupGate")
            .field("name", &self.splice.name())
            .field("joiner", &self.joiner.as_ref().map(|j| j.name().to_string()))
            .field("remaining", &self.remaining.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::SpliceBranch;
    use crate::testing::{links, Harness};
    use sluice_core::value::Value;
    use sluice_core::tuple;
    use sluice_operators::join::{InnerJoin, OuterJoin};

    fn branch(name: &str, value: &str) -> SpliceBranch {
        SpliceBranch {
            name: name.into(),
            fields: Fields::new(["id", value]).unwrap(),
            grouping: Fields::name("id"),
        }
    }

    fn spec(nulls_not_equal: bool) -> SpliceSpec {
        SpliceSpec {
            name: "cogroup(lhs,rhs)".into(),
            branches: vec![branch("lhs", "left"), branch("rhs", "right")],
            self_joins: 0,
            reverse: false,
            nulls_not_equal,
        }
    }

    fn gate(mut gate: CoGroupGate, branches: &[usize]) -> Harness {
        gate.bind(&links(branches)).unwrap();
        gate.initialize(&FlowConfig::default()).unwrap();
        Harness::new(Box::new(gate))
    }

    #[test]
    fn inner_join_emits_only_matching_keys() {
        let mut h = gate(CoGroupGate::co_group(spec(false), Arc::new(InnerJoin)), &[0, 1]);
        h.feed(0, &[tuple![1i64, "x"], tuple![2i64, "y"]]).unwrap();
        assert!(h.rows().is_empty());
        h.feed(1, &[tuple![1i64, "p"], tuple![1i64, "q"], tuple![3i64, "r"]]).unwrap();
        assert_eq!(
            h.rows(),
            vec![tuple![1i64, "x", 1i64, "p"], tuple![1i64, "x", 1i64, "q"]]
        );
        let captured = h.captured.lock().unwrap();
        assert_eq!(captured.starts, 1);
        assert_eq!(captured.completes, 1);
    }

    #[test]
    fn null_keys_match_only_when_nulls_are_equal() {
        for (nulls_not_equal, expected) in [(true, 0usize), (false, 1)] {
            let mut h = gate(CoGroupGate::co_group(spec(nulls_not_equal), Arc::new(InnerJoin)), &[0, 1]);
            h.feed(0, &[tuple![Value::Null, "a"]]).unwrap();
            h.feed(1, &[tuple![Value::Null, "b"]]).unwrap();
            assert_eq!(h.rows().len(), expected, "nulls_not_equal = {nulls_not_equal}");
        }
    }

    #[test]
    fn outer_join_keeps_null_keys_apart() {
        let mut h = gate(CoGroupGate::co_group(spec(true), Arc::new(OuterJoin)), &[0, 1]);
        h.feed(0, &[tuple![Value::Null, "a"]]).unwrap();
        h.feed(1, &[tuple![Value::Null, "b"]]).unwrap();
        assert_eq!(
            h.rows(),
            vec![
                tuple![Value::Null, "a", Value::Null, Value::Null],
                tuple![Value::Null, Value::Null, Value::Null, "b"],
            ]
        );
    }

    #[test]
    fn null_key_is_emitted_once_per_branch_that_holds_it() {
        let mut h = gate(CoGroupGate::co_group(spec(true), Arc::new(OuterJoin)), &[0, 1]);
        h.feed(0, &[tuple![Value::Null, "a"], tuple![Value::Null, "c"]]).unwrap();
        h.feed(1, &[tuple![Value::Null, "b"]]).unwrap();
        assert_eq!(
            h.rows(),
            vec![
                tuple![Value::Null, "a", Value::Null, Value::Null],
                tuple![Value::Null, "c", Value::Null, Value::Null],
                tuple![Value::Null, Value::Null, Value::Null, "b"],
            ]
        );
    }

    #[test]
    fn group_by_merges_branches_and_sorts_values() {
        let branches = vec![branch("a", "v"), branch("b", "v")];
        let spec = SpliceSpec {
            name: "group_by(a,b)".into(),
            branches,
            self_joins: 0,
            reverse: true,
            nulls_not_equal: false,
        };
        let sort = SecondarySort {
            sorting: Fields::name("v"),
            reverse: false,
        };
        let mut h = gate(CoGroupGate::group_by(spec, Some(sort)), &[0, 1]);
        h.feed(0, &[tuple![1i64, "c"], tuple![2i64, "z"]]).unwrap();
        h.feed(1, &[tuple![1i64, "a"], tuple![1i64, "b"]]).unwrap();
        assert_eq!(
            h.rows(),
            vec![tuple![2i64, "z"], tuple![1i64, "a"], tuple![1i64, "b"], tuple![1i64, "c"]]
        );
        assert_eq!(h.captured.lock().unwrap().groups, vec![1, 3]);
    }

    #[test]
    fn reset_after_drain_reproduces_output() {
        let mut gate = CoGroupGate::co_group(spec(false), Arc::new(InnerJoin));
        gate.bind(&links(&[0, 1])).unwrap();
        gate.initialize(&FlowConfig::default()).unwrap();
        let mut h = Harness::new(Box::new(gate));
        for _ in 0..2 {
            h.feed(0, &[tuple![1i64, "x"]]).unwrap();
            h.feed(1, &[tuple![1i64, "p"]]).unwrap();
        }
        let rows = h.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
        assert_eq!(h.captured.lock().unwrap().completes, 2);
    }

    #[test]
    fn self_join_repeats_the_branch() {
        let spec = SpliceSpec {
            name: "self".into(),
            branches: vec![branch("a", "v")],
            self_joins: 1,
            reverse: false,
            nulls_not_equal: false,
        };
        let mut h = gate(CoGroupGate::co_group(spec, Arc::new(InnerJoin)), &[0]);
        h.feed(0, &[tuple![1i64, "x"], tuple![1i64, "y"]]).unwrap();
        assert_eq!(h.rows().len(), 4);
        assert_eq!(h.rows()[1], tuple![1i64, "x", 1i64, "y"]);
    }
}
