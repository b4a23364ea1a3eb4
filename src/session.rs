use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::types::RoundOutcome;

/// A numeric engine parameter that moves by a fixed step every round.
///
/// There is no upper bound unless `ceiling` is set; keeping the value inside
/// what the engine accepts is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stepper {
    current: u64,
    step: u64,
    ceiling: Option<u64>,
}

impl Stepper {
    pub fn new(initial: u64, step: u64, ceiling: Option<u64>) -> Self {
        let current = match ceiling {
            Some(c) => initial.min(c),
            None => initial,
        };
        Self {
            current,
            step,
            ceiling,
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// True once the ceiling holds the value in place.
    pub fn at_ceiling(&self) -> bool {
        self.ceiling == Some(self.current)
    }

    fn advance(&mut self) {
        let next = self.current.saturating_add(self.step);
        self.current = match self.ceiling {
            Some(c) => next.min(c),
            None => next,
        };
    }
}

/// Cross-round state of one orchestrator run.
///
/// Created at loop entry, updated once after each round, dropped when the
/// loop exits.
#[derive(Debug, Clone)]
pub struct ScanSession {
    round_index: u64,
    start_time: Instant,
    previous_output: Option<PathBuf>,
    previous_target_prefix: Option<PathBuf>,
    rate: Option<Stepper>,
    granularity: Option<Stepper>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            round_index: 0,
            start_time: Instant::now(),
            previous_output: None,
            previous_target_prefix: None,
            rate: None,
            granularity: None,
        }
    }

    /// Seed the history with an output from an earlier process.
    pub fn with_previous_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.previous_output = Some(path.into());
        self
    }

    pub fn with_rate(mut self, rate: Stepper) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_granularity(mut self, granularity: Stepper) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn round_index(&self) -> u64 {
        self.round_index
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn previous_output(&self) -> Option<&Path> {
        self.previous_output.as_deref()
    }

    pub fn previous_target_prefix(&self) -> Option<&Path> {
        self.previous_target_prefix.as_deref()
    }

    pub fn rate(&self) -> Option<u64> {
        self.rate.map(|s| s.current())
    }

    pub fn granularity(&self) -> Option<u64> {
        self.granularity.map(|s| s.current())
    }

    pub fn rate_at_ceiling(&self) -> bool {
        self.rate.is_some_and(|s| s.at_ceiling())
    }

    pub fn granularity_at_ceiling(&self) -> bool {
        self.granularity.is_some_and(|s| s.at_ceiling())
    }

    /// Completed round indices, `None` before the first round finishes.
    pub fn reprobe_history(&self) -> Option<RangeInclusive<u64>> {
        self.round_index.checked_sub(1).map(|last| 0..=last)
    }

    /// Record a finished round and move every counter forward.
    pub fn complete_round(&mut self, outcome: &RoundOutcome) {
        self.previous_output = Some(outcome.output_path.clone());
        if let Some(prefix) = &outcome.aux_output_path {
            self.previous_target_prefix = Some(prefix.clone());
        }
        if let Some(rate) = self.rate.as_mut() {
            rate.advance();
        }
        if let Some(granularity) = self.granularity.as_mut() {
            granularity.advance();
        }
        self.round_index += 1;
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}
