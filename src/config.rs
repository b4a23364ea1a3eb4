use std::path::{self, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::executor::{CommandRunner, ExecutorSettings, FailurePolicy, RoundExecutor};
use crate::orchestrator::{Orchestrator, StopCondition};
use crate::strategy::{RoundStrategy, RoundStrategyKind};

/// Argument sets for reprobe chaining.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReprobeArgs {
    pub main_args: Vec<String>,
    pub extra_args: Vec<String>,
}

/// Raw orchestrator options, as collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub output_dir: PathBuf,
    pub engine_path: PathBuf,
    pub generator_path: Option<PathBuf>,
    /// 0 means no round bound.
    pub round_count: u64,
    pub time_budget_minutes: Option<u64>,
    pub inter_round_delay_secs: u64,
    pub label: String,
    pub extra_engine_args: Vec<String>,
    pub reuse_history: bool,
    pub history_file: Option<PathBuf>,
    pub initial_rate: Option<u64>,
    pub rate_step: Option<u64>,
    pub rate_ceiling: Option<u64>,
    pub initial_granularity: Option<u64>,
    pub granularity_ceiling: Option<u64>,
    pub reprobe: Option<ReprobeArgs>,
    pub dry_run: bool,
    pub abort_on_failure: bool,
    pub round_timeout_secs: Option<u64>,
}

/// A configuration that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub strategy: RoundStrategy,
    pub executor: ExecutorSettings,
    pub stop: StopCondition,
}

impl ValidatedConfig {
    pub fn into_orchestrator<R: CommandRunner>(self, runner: R) -> Orchestrator<R> {
        Orchestrator::new(
            self.strategy,
            RoundExecutor::new(runner, self.executor),
            self.stop,
        )
    }
}

impl OrchestratorConfig {
    /// Check the options and settle on exactly one round strategy.
    ///
    /// Enabling more than one stepping dimension (rate, granularity,
    /// reprobe chaining) is rejected rather than resolved by priority.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::EmptyLabel);
        }
        let output_dir = path::absolute(&self.output_dir)
            .map_err(|_| ConfigError::NotADirectory(self.output_dir.clone()))?;
        if !output_dir.is_dir() {
            return Err(ConfigError::NotADirectory(output_dir));
        }

        let stop = StopCondition::new(
            self.round_count,
            self.time_budget_minutes
                .map(|m| Duration::from_secs(m.saturating_mul(60))),
        )?;

        // Without a delay a dry run finishes rounds instantly and would spin
        // until the budget runs out.
        if self.dry_run && self.round_count == 0 && self.inter_round_delay_secs == 0 {
            return Err(ConfigError::UnpacedDryRun);
        }

        let kind = self.strategy_kind()?;
        if matches!(kind, RoundStrategyKind::ReprobeChain { .. }) && self.generator_path.is_none() {
            return Err(ConfigError::MissingGenerator);
        }

        let strategy = RoundStrategy::new(kind, output_dir, self.label.clone())
            .with_engine_args(self.extra_engine_args.clone())
            .with_history_reuse(self.reuse_history)
            .with_history_seed(self.history_file.clone());

        let executor = ExecutorSettings {
            engine_path: self.engine_path.clone(),
            generator_path: self.generator_path.clone(),
            inter_round_delay: Duration::from_secs(self.inter_round_delay_secs),
            dry_run: self.dry_run,
            failure_policy: if self.abort_on_failure {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Continue
            },
            round_timeout: self.round_timeout_secs.map(Duration::from_secs),
        };

        Ok(ValidatedConfig {
            strategy,
            executor,
            stop,
        })
    }

    fn strategy_kind(&self) -> Result<RoundStrategyKind, ConfigError> {
        let rate_mode = self.initial_rate.is_some() || self.rate_step.is_some();
        let granularity_mode = self.initial_granularity.is_some();
        let reprobe_mode = self.reprobe.is_some();
        let enabled = [rate_mode, granularity_mode, reprobe_mode]
            .iter()
            .filter(|on| **on)
            .count();
        if enabled > 1 {
            return Err(ConfigError::ConflictingStepModes);
        }

        if let Some(reprobe) = &self.reprobe {
            return Ok(RoundStrategyKind::ReprobeChain {
                main_args: reprobe.main_args.clone(),
                extra_args: reprobe.extra_args.clone(),
            });
        }
        if rate_mode {
            let (Some(initial), Some(step)) = (self.initial_rate, self.rate_step) else {
                return Err(ConfigError::IncompleteRateStair);
            };
            if step == 0 {
                return Err(ConfigError::ZeroRateStep);
            }
            return Ok(RoundStrategyKind::StairRate {
                initial,
                step,
                ceiling: self.rate_ceiling,
            });
        }
        if let Some(initial) = self.initial_granularity {
            return Ok(RoundStrategyKind::StairGranularity {
                initial,
                ceiling: self.granularity_ceiling,
            });
        }
        Ok(RoundStrategyKind::Plain)
    }
}

/// Split a user-supplied argument string on whitespace. No shell quoting.
pub fn split_args(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(dir: &std::path::Path) -> OrchestratorConfig {
        OrchestratorConfig {
            output_dir: dir.to_path_buf(),
            engine_path: PathBuf::from("/bin/engine"),
            round_count: 3,
            label: "run".into(),
            reuse_history: true,
            ..Default::default()
        }
    }

    #[test]
    fn missing_output_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.output_dir = dir.path().join("does-not-exist");
        assert!(matches!(cfg.validate(), Err(ConfigError::NotADirectory(_))));
    }

    #[test]
    fn regular_file_is_not_an_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();
        let mut cfg = base(dir.path());
        cfg.output_dir = file;
        assert!(matches!(cfg.validate(), Err(ConfigError::NotADirectory(_))));
    }

    #[test]
    fn plain_is_the_default_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let v = base(dir.path()).validate().unwrap();
        assert_eq!(v.strategy.kind(), &RoundStrategyKind::Plain);
        assert_eq!(v.stop.max_rounds(), Some(3));
        assert_eq!(v.executor.failure_policy, FailurePolicy::Continue);
    }

    #[test]
    fn rate_and_granularity_together_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.initial_rate = Some(100_000);
        cfg.rate_step = Some(10_000);
        cfg.initial_granularity = Some(24);
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ConflictingStepModes);
    }

    #[test]
    fn rate_needs_both_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.rate_step = Some(10_000);
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::IncompleteRateStair);
    }

    #[test]
    fn zero_rate_step_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.initial_rate = Some(100_000);
        cfg.rate_step = Some(0);
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroRateStep);
    }

    #[test]
    fn time_bound_dry_run_needs_a_delay() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.round_count = 0;
        cfg.time_budget_minutes = Some(60);
        cfg.dry_run = true;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::UnpacedDryRun);
        cfg.inter_round_delay_secs = 5;
        assert!(cfg.validate().is_ok());
        cfg.inter_round_delay_secs = 0;
        cfg.round_count = 3;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn reprobe_requires_generator() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.reprobe = Some(ReprobeArgs::default());
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MissingGenerator);
        cfg.generator_path = Some(PathBuf::from("/bin/gen"));
        assert_eq!(cfg.validate().unwrap().strategy.kind().name(), "reprobe_chain");
    }

    #[test]
    fn stop_condition_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.round_count = 0;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::NoStopCondition);
        cfg.time_budget_minutes = Some(30);
        let v = cfg.validate().unwrap();
        assert_eq!(v.stop.time_budget(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn empty_label_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base(dir.path());
        cfg.label = "  ".into();
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::EmptyLabel);
    }

    #[test]
    fn split_args_ignores_extra_whitespace() {
        assert_eq!(
            split_args("  --ttl 32   --seed\t7 "),
            vec!["--ttl", "32", "--seed", "7"]
        );
        assert!(split_args("").is_empty());
    }
}
