use std::time::Duration;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, Result};
use crate::executor::{CommandRunner, RoundExecutor};
use crate::strategy::RoundStrategy;
use crate::types::{SessionReport, StopReason};

/// When to stop starting new rounds.
///
/// Both bounds are checked before every round and the first one reached
/// wins. A round already running is never cut short by the time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopCondition {
    max_rounds: Option<u64>,
    time_budget: Option<Duration>,
}

impl StopCondition {
    /// `round_count == 0` means no round bound.
    pub fn new(round_count: u64, time_budget: Option<Duration>) -> std::result::Result<Self, ConfigError> {
        let max_rounds = (round_count != 0).then_some(round_count);
        if max_rounds.is_none() && time_budget.is_none() {
            return Err(ConfigError::NoStopCondition);
        }
        Ok(Self {
            max_rounds,
            time_budget,
        })
    }

    pub fn rounds(n: u64) -> std::result::Result<Self, ConfigError> {
        Self::new(n, None)
    }

    pub fn max_rounds(&self) -> Option<u64> {
        self.max_rounds
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget
    }

    pub fn check(&self, rounds_completed: u64, elapsed: Duration) -> Option<StopReason> {
        if self.max_rounds.is_some_and(|n| rounds_completed >= n) {
            return Some(StopReason::RoundLimit);
        }
        if self.time_budget.is_some_and(|budget| elapsed > budget) {
            return Some(StopReason::TimeBudget);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Running,
    Stopped,
}

/// Drives rounds until the stop condition is met or the session is cancelled.
pub struct Orchestrator<R> {
    strategy: RoundStrategy,
    executor: RoundExecutor<R>,
    stop: StopCondition,
    cancel: CancellationToken,
    state: LoopState,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(strategy: RoundStrategy, executor: RoundExecutor<R>, stop: StopCondition) -> Self {
        Self {
            strategy,
            executor,
            stop,
            cancel: CancellationToken::new(),
            state: LoopState::Init,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn executor(&self) -> &RoundExecutor<R> {
        &self.executor
    }

    /// Run the whole session. Only configuration problems and, under
    /// [`FailurePolicy::Abort`](crate::executor::FailurePolicy::Abort),
    /// subprocess failures end it early with an error.
    pub async fn run(&mut self) -> Result<SessionReport> {
        self.state = LoopState::Init;
        let mut session = self.strategy.new_session();
        let mut rounds = Vec::new();
        self.state = LoopState::Running;

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if let Some(reason) = self.stop.check(session.round_index(), session.elapsed()) {
                break reason;
            }

            info!("round {} starting", session.round_index());
            let plan = self.strategy.plan(&session);
            debug!("plan: {plan:?}");
            match self.executor.run_round(&plan, &mut session, &self.cancel).await {
                Ok(outcome) => rounds.push(outcome),
                Err(e) => {
                    self.state = LoopState::Stopped;
                    return Err(e);
                }
            }
        };
        self.state = LoopState::Stopped;

        let failed_rounds = rounds.iter().filter(|r| !r.success).count() as u64;
        let elapsed = session.elapsed();
        info!(
            "stopped after {} rounds ({:?}, {} failed, {:.1}s)",
            session.round_index(),
            stop_reason,
            failed_rounds,
            elapsed.as_secs_f64()
        );

        Ok(SessionReport {
            label: self.strategy.label().to_string(),
            strategy: self.strategy.kind().name().to_string(),
            rounds_completed: session.round_index(),
            failed_rounds,
            stop_reason,
            elapsed_secs: elapsed.as_secs_f64(),
            rounds,
        })
    }
}
