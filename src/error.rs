use std::path::PathBuf;

use thiserror::Error as ThisError;

use crate::types::CommandStatus;

/// Configuration problems. Always fatal, never retried.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("no stop condition: set a round count, a time budget, or both")]
    NoStopCondition,
    #[error("rate stepping and granularity stepping are mutually exclusive")]
    ConflictingStepModes,
    #[error("rate stepping needs both an initial rate and a rate step")]
    IncompleteRateStair,
    #[error("rate step must be greater than zero")]
    ZeroRateStep,
    #[error("a dry run bounded only by time needs a non-zero inter-round delay")]
    UnpacedDryRun,
    #[error("reprobe chaining needs a target generator path")]
    MissingGenerator,
    #[error("label must not be empty")]
    EmptyLabel,
}

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("truncated record at byte {offset}: only {bytes_read} of 39 bytes present")]
    TruncatedRecord { offset: u64, bytes_read: usize },
    #[error("round {round}: {} finished with {status}", .program.display())]
    SubprocessFailed {
        round: u64,
        program: PathBuf,
        status: CommandStatus,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
