use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a subprocess invocation ended.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CommandStatus {
    Success,
    /// Non-zero exit, or killed by a signal when `code` is `None`.
    Failed { code: Option<i32> },
    /// The process could not be started at all.
    SpawnFailed,
    TimedOut,
}

impl CommandStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Success)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Success => write!(f, "success"),
            CommandStatus::Failed { code: Some(c) } => write!(f, "exit status {c}"),
            CommandStatus::Failed { code: None } => write!(f, "termination by signal"),
            CommandStatus::SpawnFailed => write!(f, "spawn failure"),
            CommandStatus::TimedOut => write!(f, "timeout"),
        }
    }
}

/// Result of one round.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub round: u64,
    pub output_path: PathBuf,
    /// Generator output prefix, reprobe chaining only.
    pub aux_output_path: Option<PathBuf>,
    pub success: bool,
    /// Commands were only logged; `output_path` may not exist.
    pub dry_run: bool,
    pub engine_status: Option<CommandStatus>,
    pub generator_status: Option<CommandStatus>,
    pub started_at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    RoundLimit,
    TimeBudget,
    Cancelled,
}

/// Summary of a finished run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionReport {
    pub label: String,
    pub strategy: String,
    pub rounds_completed: u64,
    pub failed_rounds: u64,
    pub stop_reason: StopReason,
    pub elapsed_secs: f64,
    pub rounds: Vec<RoundOutcome>,
}
