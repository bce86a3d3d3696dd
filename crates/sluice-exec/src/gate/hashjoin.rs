//! Non-blocking join: branch 0 streams through, the others are buffered.
//!
//! Matching waits until every buffered path has completed. Streamed records
//! that arrive earlier are held back and replayed when the latch opens, so a
//! streamed record never sees a partially loaded map. When the streamed side
//! completes, buffered keys it never matched are emitted with branch 0 empty.

use std::slice;
use std::sync::Arc;

use sluice_core::config::FlowConfig;
use sluice_core::id::DuctId;
use sluice_core::tuple::{Row, Tuple};
use sluice_operators::join::NO_ROWS;
use sluice_operators::Joiner;

use super::{JoinedValues, Splice, SpliceSpec};
use crate::countdown::Countdown;
use crate::duct::{Duct, Flow, Grouping, Incoming, Links, Pred, PrepareContext};
use crate::error::{ExecError, ExecResult};
use crate::stage::{not_ready, Wiring};

pub struct HashJoinGate {
    splice: Splice,
    joiner: Arc<dyn Joiner>,
    /// Completions still owed by the buffered branches.
    latch: Countdown,
    /// Completions still owed by the streamed branch.
    streamed_paths: Countdown,
    deferred: Vec<Tuple>,
    finish_pending: bool,
    streamed: Tuple,
    key: Tuple,
    hits: Vec<Option<usize>>,
}

impl HashJoinGate {
    pub fn new(spec: SpliceSpec, joiner: Arc<dyn Joiner>) -> Self {
        Self {
            splice: Splice::new(spec, false),
            joiner,
            latch: Countdown::new(0),
            streamed_paths: Countdown::new(0),
            deferred: Vec::new(),
            finish_pending: false,
            streamed: Tuple::new(),
            key: Tuple::new(),
            hits: Vec::new(),
        }
    }

    fn wiring(&self, what: &str) -> ExecResult<Wiring> {
        self.splice.wiring.ok_or_else(|| not_ready(self.splice.name(), what))
    }

    fn reset(&mut self) {
        self.splice.reset();
        self.latch.reset();
        self.streamed_paths.reset();
        self.deferred.clear();
        self.finish_pending = false;
    }

    /// Match one streamed record against every buffered branch and emit.
    fn join_streamed(&mut self, flow: &mut Flow<'_>, w: Wiring, row: &dyn Row) -> ExecResult<()> {
        self.streamed.set_all(row)?;
        self.key.set_all(&self.splice.keys[0].view(row))?;

        let splice = &self.splice;
        self.hits.clear();
        self.hits.push(None);
        let matchable = !(splice.spec.nulls_not_equal && self.key.has_null());
        for b in 1..splice.maps.len() {
            let hit = if matchable {
                splice.maps[b].find(&splice.comparator, &self.key)
            } else {
                None
            };
            self.hits.push(hit);
        }
        for (b, hit) in self.hits.iter().enumerate() {
            if let Some(i) = hit {
                self.splice.maps[b].mark(*i);
            }
        }

        let splice = &self.splice;
        let rows: Vec<&[Tuple]> = self
            .hits
            .iter()
            .enumerate()
            .map(|(b, hit)| match (b, hit) {
                (0, _) => slice::from_ref(&self.streamed),
                (b, Some(i)) => splice.maps[b].rows(*i),
                (_, None) => NO_ROWS,
            })
            .collect();
        let values = JoinedValues {
            closure: splice.closure(&self.key, rows, true),
            joiner: self.joiner.as_ref(),
        };
        flow.receive(w.next, w.me, Incoming::Grouping(Grouping::new(&self.key, &values)))
    }

    fn open_latch(&mut self, flow: &mut Flow<'_>, w: Wiring) -> ExecResult<()> {
        let deferred = std::mem::take(&mut self.deferred);
        tracing::debug!(gate = %self.splice.name(), deferred = deferred.len(), "buffered branches complete");
        for row in &deferred {
            self.join_streamed(flow, w, row)?;
        }
        if self.finish_pending {
            self.finish(flow, w)?;
        }
        Ok(())
    }

    fn finish(&mut self, flow: &mut Flow<'_>, w: Wiring) -> ExecResult<()> {
        let drained = self.drain_unmatched(flow, w);
        self.reset();
        drained?;
        flow.complete(w.next, w.me)
    }

    fn drain_unmatched(&self, flow: &mut Flow<'_>, w: Wiring) -> ExecResult<()> {
        let splice = &self.splice;
        let runs = splice.key_runs(|m, i| m > 0 && !splice.maps[m].is_marked(i));
        let mut groups = 0usize;
        for run in &runs {
            let (m, i) = run[0];
            let key = splice.maps[m].key(i);
            let lone = splice.spec.nulls_not_equal && key.has_null();
            let emissions: Vec<Vec<&[Tuple]>> = if lone {
                run.iter()
                    .map(|&(m, i)| {
                        let mut rows = vec![NO_ROWS; splice.spec.width()];
                        rows[m] = splice.maps[m].rows(i);
                        rows
                    })
                    .collect()
            } else {
                vec![splice.run_rows(run)]
            };
            for rows in emissions {
                let values = JoinedValues {
                    closure: splice.closure(key, rows, false),
                    joiner: self.joiner.as_ref(),
                };
                flow.receive(w.next, w.me, Incoming::Grouping(Grouping::new(key, &values)))?;
                groups += 1;
            }
        }
        tracing::debug!(gate = %splice.name(), groups, "drained unmatched keys");
        Ok(())
    }
}

impl Duct for HashJoinGate {
    fn name(&self) -> &str {
        self.splice.name()
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        if self.splice.spec.self_joins > 0 {
            return Err(ExecError::config(format!(
                "{}: self-joins need a blocking co-group",
                self.splice.name()
            )));
        }
        self.splice.bind(links)?;
        let (streamed, buffered): (Vec<&Pred>, Vec<&Pred>) = links.preds.iter().partition(|p| p.ordinal == 0);
        let streamed: usize = streamed.iter().map(|p| p.paths).sum();
        if streamed != 1 {
            return Err(ExecError::config(format!(
                "{}: the streamed branch must arrive on exactly one path, found {streamed}",
                self.splice.name()
            )));
        }
        self.streamed_paths = Countdown::new(streamed);
        self.latch = Countdown::new(buffered.iter().map(|p| p.paths).sum());
        Ok(())
    }

    fn initialize(&mut self, config: &FlowConfig) -> ExecResult<()> {
        self.splice.initialize(config)?;
        self.reset();
        Ok(())
    }

    fn prepare(&mut self, _ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        self.reset();
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let w = self.wiring("start")?;
        if self.splice.started {
            return Ok(());
        }
        self.splice.started = true;
        flow.start(w.next, w.me)
    }

    fn receive(&mut self, flow: &mut Flow<'_>, from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let ordinal = self.splice.ordinal_of(from)?;
        let row = incoming.entry()?;
        if ordinal > 0 {
            if self.latch.is_open() {
                return Err(ExecError::invariant(format!(
                    "{}: buffered branch {ordinal} sent a record after completing",
                    self.splice.name()
                )));
            }
            return self.splice.accumulate(ordinal, row);
        }
        self.splice.observe(0, row.arity());
        if !self.latch.is_open() {
            self.deferred.push(row.to_tuple());
            return Ok(());
        }
        let w = self.wiring("receive")?;
        self.join_streamed(flow, w, row)
    }

    fn complete(&mut self, flow: &mut Flow<'_>, from: DuctId) -> ExecResult<()> {
        let w = self.wiring("complete")?;
        if self.splice.ordinal_of(from)? == 0 {
            if !self.streamed_paths.decrement()? {
                return Ok(());
            }
            if !self.latch.is_open() {
                self.finish_pending = true;
                return Ok(());
            }
            return self.finish(flow, w);
        }
        if self.latch.decrement()? {
            self.open_latch(flow, w)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HashJoinGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashJoinGate")
            .field("name", &self.splice.name())
            .field("joiner", &self.joiner.name())
            .field("latch", &self.latch.remaining())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
