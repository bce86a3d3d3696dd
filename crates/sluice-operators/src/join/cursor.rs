use sluice_core::tuple::{Row, Tuple};
use sluice_core::value::{Value, NULL};

use super::{JoinCursor, JoinerClosure};

/// Walks the cross product of every branch's rows, last branch fastest.
#[derive(Debug)]
pub struct CartesianCursor<'a> {
    closure: JoinerClosure<'a>,
    /// Branch contributes a single all-null row.
    nulled: Vec<bool>,
    lens: Vec<usize>,
    offsets: Vec<usize>,
    idx: Vec<usize>,
    started: bool,
    done: bool,
}

impl<'a> CartesianCursor<'a> {
    pub fn new(closure: JoinerClosure<'a>, required: &[bool]) -> Self {
        let n = closure.size();
        let mut nulled = Vec::with_capacity(n);
        let mut lens = Vec::with_capacity(n);
        let mut offsets = Vec::with_capacity(n);
        let mut width = 0;
        let mut any_rows = false;
        for b in 0..n {
            offsets.push(width);
            width += closure.width(b);
            let rows = closure.rows(b).len();
            any_rows |= rows > 0;
            let optional = !required.get(b).copied().unwrap_or(true);
            if rows == 0 && optional {
                nulled.push(true);
                lens.push(1);
            } else {
                nulled.push(false);
                lens.push(rows);
            }
        }
        offsets.push(width);
        Self {
            closure,
            nulled,
            lens,
            offsets,
            idx: vec![0; n],
            started: false,
            done: !any_rows,
        }
    }

    fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        let n = self.lens.len();
        if pos >= self.offsets[n] {
            return None;
        }
        // branch count is small; linear scan
        let b = (0..n).rev().find(|&b| self.offsets[b] <= pos)?;
        Some((b, pos - self.offsets[b]))
    }
}

impl Row for CartesianCursor<'_> {
    fn arity(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    fn get(&self, pos: usize) -> Option<&Value> {
        let (b, p) = self.locate(pos)?;
        if self.nulled[b] {
            return Some(&NULL);
        }
        let row = self.closure.rows(b).get(self.idx[b])?;
        Some(self.closure.restored(b, row, p))
    }
}

impl JoinCursor for CartesianCursor<'_> {
    fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        if !self.started {
            self.started = true;
            if self.lens.iter().any(|&l| l == 0) {
                self.done = true;
                return false;
            }
            return true;
        }
        for b in (0..self.idx.len()).rev() {
            self.idx[b] += 1;
            if self.idx[b] < self.lens[b] {
                return true;
            }
            self.idx[b] = 0;
        }
        self.done = true;
        false
    }

    fn row(&self) -> &dyn Row {
        self
    }
}

/// Iterates the values of every branch in turn, key columns restored.
#[derive(Debug)]
pub struct ValuesCursor<'a> {
    closure: JoinerClosure<'a>,
    branch: usize,
    idx: usize,
    started: bool,
}

impl<'a> ValuesCursor<'a> {
    pub fn new(closure: JoinerClosure<'a>) -> Self {
        Self {
            closure,
            branch: 0,
            idx: 0,
            started: false,
        }
    }

    fn current(&self) -> Option<&'a Tuple> {
        self.closure.rows(self.branch).get(self.idx)
    }
}

impl Row for ValuesCursor<'_> {
    fn arity(&self) -> usize {
        self.current().map(|r| r.arity()).unwrap_or(0)
    }

    fn get(&self, pos: usize) -> Option<&Value> {
        let row = self.current()?;
        if pos >= row.arity() {
            return None;
        }
        Some(self.closure.restored(self.branch, row, pos))
    }
}

impl JoinCursor for ValuesCursor<'_> {
    fn advance(&mut self) -> bool {
        if self.started {
            self.idx += 1;
        }
        self.started = true;
        while self.branch < self.closure.size() {
            if self.idx < self.closure.rows(self.branch).len() {
                return true;
            }
            self.branch += 1;
            self.idx = 0;
        }
        false
    }

    fn row(&self) -> &dyn Row {
        self
    }
}
