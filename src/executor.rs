use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, Error, Result};
use crate::session::ScanSession;
use crate::strategy::RoundPlan;
use crate::types::{CommandStatus, RoundOutcome};

/// A program plus its arguments, run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs one external command to completion.
///
/// Injected into [`RoundExecutor`] so that command construction can be
/// checked without spawning anything.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&mut self, command: &CommandLine, timeout: Option<Duration>) -> io::Result<CommandStatus>;
}

/// Spawns real subprocesses with inherited stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&mut self, command: &CommandLine, timeout: Option<Duration>) -> io::Result<CommandStatus> {
        let mut cmd = Command::new(&command.program);
        // Dropping the status future on timeout kills the child.
        cmd.args(&command.args).kill_on_drop(true);
        let status = match timeout {
            Some(limit) => match time::timeout(limit, cmd.status()).await {
                Ok(res) => res?,
                Err(_) => return Ok(CommandStatus::TimedOut),
            },
            None => cmd.status().await?,
        };
        if status.success() {
            Ok(CommandStatus::Success)
        } else {
            Ok(CommandStatus::Failed {
                code: status.code(),
            })
        }
    }
}

/// What to do when the engine or generator does not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log and carry on with the next round.
    #[default]
    Continue,
    /// Stop the session with [`Error::SubprocessFailed`].
    Abort,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub engine_path: PathBuf,
    pub generator_path: Option<PathBuf>,
    pub inter_round_delay: Duration,
    pub dry_run: bool,
    pub failure_policy: FailurePolicy,
    /// No limit when `None`; a hung engine then blocks the session.
    pub round_timeout: Option<Duration>,
}

impl ExecutorSettings {
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: engine_path.into(),
            generator_path: None,
            inter_round_delay: Duration::ZERO,
            dry_run: false,
            failure_policy: FailurePolicy::default(),
            round_timeout: None,
        }
    }
}

pub struct RoundExecutor<R> {
    runner: R,
    settings: ExecutorSettings,
}

impl<R: CommandRunner> RoundExecutor<R> {
    pub fn new(runner: R, settings: ExecutorSettings) -> Self {
        Self { runner, settings }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn engine_command(&self, plan: &RoundPlan) -> CommandLine {
        let mut args = Vec::with_capacity(plan.engine_args.len() + 2);
        args.push("--output".to_string());
        args.push(plan.output_path.to_string_lossy().into_owned());
        args.extend(plan.engine_args.iter().cloned());
        CommandLine::new(self.settings.engine_path.clone(), args)
    }

    pub fn generator_command(&self, plan: &RoundPlan) -> Result<Option<CommandLine>> {
        let Some(invocation) = &plan.generator else {
            return Ok(None);
        };
        let program = self
            .settings
            .generator_path
            .clone()
            .ok_or(ConfigError::MissingGenerator)?;
        Ok(Some(CommandLine::new(program, invocation.args())))
    }

    /// Run one round, record it in `session`, then wait out the
    /// inter-round delay (cut short if `cancel` fires).
    pub async fn run_round(
        &mut self,
        plan: &RoundPlan,
        session: &mut ScanSession,
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome> {
        let started_at = now_rfc3339();
        let engine = self.engine_command(plan);
        let generator = self.generator_command(plan)?;

        info!("round {}: {}", plan.round, engine);
        if let Some(cmd) = &generator {
            info!("round {} generator: {}", plan.round, cmd);
        }

        let mut outcome = RoundOutcome {
            round: plan.round,
            output_path: plan.output_path.clone(),
            aux_output_path: plan.generator.as_ref().map(|g| g.output_prefix.clone()),
            success: true,
            dry_run: self.settings.dry_run,
            engine_status: None,
            generator_status: None,
            started_at,
        };

        if self.settings.dry_run {
            debug!("dry run, round {} not executed", plan.round);
            session.complete_round(&outcome);
            self.pause(cancel).await;
            return Ok(outcome);
        }

        let status = self.invoke(plan.round, &engine).await?;
        outcome.engine_status = Some(status);
        outcome.success = status.is_success();

        if let Some(cmd) = &generator {
            let status = self.invoke(plan.round, cmd).await?;
            outcome.generator_status = Some(status);
            outcome.success &= status.is_success();
        }

        session.complete_round(&outcome);
        self.pause(cancel).await;
        Ok(outcome)
    }

    async fn invoke(&mut self, round: u64, command: &CommandLine) -> Result<CommandStatus> {
        let status = match self.runner.run(command, self.settings.round_timeout).await {
            Ok(status) => status,
            Err(e) => {
                warn!("round {round}: failed to start {}: {e}", command.program.display());
                CommandStatus::SpawnFailed
            }
        };
        if !status.is_success() {
            warn!("round {round}: {} finished with {status}", command.program.display());
            if self.settings.failure_policy == FailurePolicy::Abort {
                return Err(Error::SubprocessFailed {
                    round,
                    program: command.program.clone(),
                    status,
                });
            }
        }
        Ok(status)
    }

    async fn pause(&self, cancel: &CancellationToken) {
        let delay = self.settings.inter_round_delay;
        if delay.is_zero() {
            return;
        }
        debug!("sleeping {}s before next round", delay.as_secs_f64());
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = cancel.cancelled() => debug!("inter-round delay interrupted"),
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
