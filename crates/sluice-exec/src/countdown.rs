//! Completion counters for gates and merges.
//!
//! Only the task thread touches a countdown, so a plain integer suffices.

use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    initial: usize,
    remaining: usize,
}

impl Countdown {
    pub fn new(initial: usize) -> Self {
        Self {
            initial,
            remaining: initial,
        }
    }

    /// Count one arrival; `true` when this was the last one expected.
    pub fn decrement(&mut self) -> ExecResult<bool> {
        if self.remaining == 0 {
            return Err(ExecError::invariant(format!(
                "countdown of {} signalled more than {} times",
                self.initial, self.initial
            )));
        }
        self.remaining -= 1;
        Ok(self.remaining == 0)
    }

    pub fn is_open(&self) -> bool {
        self.remaining == 0
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    pub fn reset(&mut self) {
        self.remaining = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_on_last_arrival_and_rejects_extra() {
        let mut c = Countdown::new(2);
        assert!(!c.decrement().unwrap());
        assert!(c.decrement().unwrap());
        assert!(c.is_open());
        assert!(matches!(c.decrement(), Err(ExecError::Invariant(_))));
        c.reset();
        assert_eq!(c.remaining(), 2);
    }
}
