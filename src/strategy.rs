use std::path::{Path, PathBuf};

use crate::session::{ScanSession, Stepper};

/// Per-round policy, chosen once when the configuration is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundStrategyKind {
    /// Same arguments every round.
    Plain,
    /// `--probing_rate` grows by `step` each round.
    StairRate {
        initial: u64,
        step: u64,
        ceiling: Option<u64>,
    },
    /// `--granularity` grows by one each round.
    StairGranularity { initial: u64, ceiling: Option<u64> },
    /// Round 0 runs `main_args`; later rounds reprobe the targets the
    /// generator derived from every earlier round, using `extra_args`.
    ReprobeChain {
        main_args: Vec<String>,
        extra_args: Vec<String>,
    },
}

impl RoundStrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            RoundStrategyKind::Plain => "plain",
            RoundStrategyKind::StairRate { .. } => "stair_rate",
            RoundStrategyKind::StairGranularity { .. } => "stair_granularity",
            RoundStrategyKind::ReprobeChain { .. } => "reprobe_chain",
        }
    }
}

/// Invocation of the reprobe target generator that follows an engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorInvocation {
    pub directory: PathBuf,
    pub label: String,
    pub start: u64,
    pub end: u64,
    pub output_prefix: PathBuf,
}

impl GeneratorInvocation {
    pub fn args(&self) -> Vec<String> {
        vec![
            "--directory".into(),
            path_arg(&self.directory),
            "--label".into(),
            self.label.clone(),
            "--start".into(),
            self.start.to_string(),
            "--end".into(),
            self.end.to_string(),
            "--output".into(),
            path_arg(&self.output_prefix),
        ]
    }
}

/// Everything the executor needs for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundPlan {
    pub round: u64,
    pub output_path: PathBuf,
    /// Engine arguments after `--output <path>`.
    pub engine_args: Vec<String>,
    pub generator: Option<GeneratorInvocation>,
}

#[derive(Debug, Clone)]
pub struct RoundStrategy {
    kind: RoundStrategyKind,
    output_dir: PathBuf,
    label: String,
    engine_args: Vec<String>,
    reuse_history: bool,
    history_seed: Option<PathBuf>,
}

impl RoundStrategy {
    pub fn new(kind: RoundStrategyKind, output_dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            kind,
            output_dir: output_dir.into(),
            label: label.into(),
            engine_args: Vec::new(),
            reuse_history: true,
            history_seed: None,
        }
    }

    /// User arguments appended to every engine invocation (not used by
    /// reprobe chaining, which carries its own two argument sets).
    pub fn with_engine_args(mut self, args: Vec<String>) -> Self {
        self.engine_args = args;
        self
    }

    pub fn with_history_reuse(mut self, reuse: bool) -> Self {
        self.reuse_history = reuse;
        self
    }

    /// Output of an earlier run to feed into round 0.
    pub fn with_history_seed(mut self, path: Option<PathBuf>) -> Self {
        self.history_seed = path;
        self
    }

    pub fn kind(&self) -> &RoundStrategyKind {
        &self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fresh session carrying the counters this strategy steps.
    pub fn new_session(&self) -> ScanSession {
        let mut session = ScanSession::new();
        if let Some(seed) = &self.history_seed {
            session = session.with_previous_output(seed.clone());
        }
        match &self.kind {
            RoundStrategyKind::StairRate {
                initial,
                step,
                ceiling,
            } => session.with_rate(Stepper::new(*initial, *step, *ceiling)),
            RoundStrategyKind::StairGranularity { initial, ceiling } => {
                session.with_granularity(Stepper::new(*initial, 1, *ceiling))
            }
            _ => session,
        }
    }

    /// Output path and arguments for the session's current round.
    ///
    /// Pure formatting: nothing checks whether the path already exists.
    pub fn plan(&self, session: &ScanSession) -> RoundPlan {
        let round = session.round_index();
        match &self.kind {
            RoundStrategyKind::ReprobeChain {
                main_args,
                extra_args,
            } => self.plan_reprobe(session, main_args, extra_args),
            kind => {
                let mut args = Vec::new();
                if self.reuse_history {
                    if let Some(prev) = session.previous_output() {
                        args.push("--history_probing_result".to_string());
                        args.push(path_arg(prev));
                    }
                }
                // A clamped counter repeats, so the round index keeps names unique.
                let name = match (kind, session.rate(), session.granularity()) {
                    (RoundStrategyKind::StairRate { .. }, Some(rate), _) => {
                        args.push("--probing_rate".to_string());
                        args.push(rate.to_string());
                        let name = format!("{}_probing_rate_{rate}", self.label);
                        if session.rate_at_ceiling() {
                            format!("{name}_{round}")
                        } else {
                            name
                        }
                    }
                    (RoundStrategyKind::StairGranularity { .. }, _, Some(g)) => {
                        args.push("--granularity".to_string());
                        args.push(g.to_string());
                        let name = format!("{}_granularity_{g}", self.label);
                        if session.granularity_at_ceiling() {
                            format!("{name}_{round}")
                        } else {
                            name
                        }
                    }
                    _ => self.round_name(round),
                };
                args.extend(self.engine_args.iter().cloned());
                RoundPlan {
                    round,
                    output_path: self.output_dir.join(name),
                    engine_args: args,
                    generator: None,
                }
            }
        }
    }

    fn plan_reprobe(&self, session: &ScanSession, main_args: &[String], extra_args: &[String]) -> RoundPlan {
        let round = session.round_index();
        let mut args = Vec::new();
        match session.previous_target_prefix() {
            Some(prefix) if round > 0 => {
                args.push("--noforward_probing".to_string());
                args.push("--targets".to_string());
                args.push(path_arg(prefix));
                args.push("--nonstop_set_file".to_string());
                args.push(format!("{}_nonstop", path_arg(prefix)));
                args.extend(extra_args.iter().cloned());
            }
            _ => args.extend(main_args.iter().cloned()),
        }
        RoundPlan {
            round,
            output_path: self.output_dir.join(self.round_name(round)),
            engine_args: args,
            generator: Some(GeneratorInvocation {
                directory: self.output_dir.clone(),
                label: self.label.clone(),
                start: 0,
                end: round,
                output_prefix: self
                    .output_dir
                    .join(format!("{}_reprobe_target", self.round_name(round))),
            }),
        }
    }

    fn round_name(&self, round: u64) -> String {
        format!("{}_{round}", self.label)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
