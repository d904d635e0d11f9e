// Copyright 2026 Cornell University
// released under MIT License

use std::fmt;

use crate::action::ActionIdx;
use crate::backend::BackendKind;
use crate::signal::SignalRef;
use crate::value::Value;

/// Which expectation a result belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct Locator {
    /// Position among the expectations of the log
    pub index: usize,
    pub action: ActionIdx,
    pub signal: SignalRef,
    pub backend: BackendKind,
}

/// A sampled value that could not be decoded into a `Value`
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Value(Value),
    /// Raw simulator output such as `1x0z`
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultError {
    /// The solver answered `unknown`, timed out or produced garbage
    SolverUnknown(String),
    /// The run finished but the backend reported nothing for this entry
    MissingResult,
    /// An analog voltage between the logic thresholds
    Indeterminate(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pass,
    Fail {
        expected: Value,
        actual: Observed,
        /// Clock steps taken before the sample
        step: u64,
        /// Assignment of every free variable, symbolic backend only
        counterexample: Vec<(String, Value)>,
    },
    Error(ResultError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub locator: Locator,
    pub outcome: Outcome,
}

impl TestResult {
    pub fn is_pass(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// A value reported for a peek, a print placeholder or a vector column
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub action: ActionIdx,
    /// Position within the action's signal list
    pub slot: usize,
    pub signal: SignalRef,
    pub value: Option<Observed>,
}

/// What a backend made of one run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Interpretation {
    pub results: Vec<TestResult>,
    pub observations: Vec<Observation>,
}

/// Ordered by severity: a failure outweighs an error, which outweighs a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    Pass,
    /// Nothing failed, but some expectation could not be decided
    Error,
    Fail,
}

impl Verdict {
    /// Process exit code of the CLI
    pub fn exit_code(self) -> u8 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::Error => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Error => write!(f, "ERROR"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub backend: BackendKind,
    pub results: Vec<TestResult>,
    pub observations: Vec<Observation>,
    /// Print actions with their placeholders filled in, in log order
    pub prints: Vec<String>,
}

impl SessionReport {
    /// The most severe outcome among the results
    pub fn verdict(&self) -> Verdict {
        self.results
            .iter()
            .map(|r| match r.outcome {
                Outcome::Pass => Verdict::Pass,
                Outcome::Error(_) => Verdict::Error,
                Outcome::Fail { .. } => Verdict::Fail,
            })
            .max()
            .unwrap_or(Verdict::Pass)
    }

    /// Values observed by the peek action `action`
    pub fn peeked(&self, action: ActionIdx) -> Option<&Observed> {
        self.observations
            .iter()
            .find(|o| o.action == action)
            .and_then(|o| o.value.as_ref())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.is_pass())
    }
}
