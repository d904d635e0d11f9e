// Copyright 2026 Cornell University
// released under MIT License

//! # Backends
//! The closed set of execution engines. Each one lowers a finalized
//! `ActionLog` into text files plus command lines (`compile`), runs them in a
//! scratch directory (`run`) and maps the raw output back onto the
//! expectations of the log (`interpret`).

pub mod analog;
pub mod digital;
pub mod symbolic;

use baa::BitVecValue;
use clap::ValueEnum;
use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::action::{ActionIdx, ActionLog};
use crate::circuit::Circuit;
use crate::config::Config;
use crate::errors::{CompileError, ExecutionError};
use crate::process::{run_invocations, write_script, Budget, Invocation, ProcessOptions, ProcessOutput};
use crate::report::{Interpretation, Locator, Observation, Observed, Outcome, ResultError, TestResult};
use crate::signal::SignalRef;
use crate::value::{values_match, ThresholdMap, Tolerance, Value, ValueKind};

pub use analog::AnalogBackend;
pub use digital::DigitalBackend;
pub use symbolic::SymbolicBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Digital,
    Analog,
    Symbolic,
}

/// An expectation as seen by the backend that sampled it
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectEntry {
    /// Position among the expectations of the log
    pub index: usize,
    pub action: ActionIdx,
    pub signal: SignalRef,
    pub expected: Value,
    pub tolerance: Option<Tolerance>,
    /// Clock steps taken before the sample
    pub step: u64,
    /// Simulated time of the sample, analog only
    pub time: Option<f64>,
    /// Voltage conversion applied to digital values on analog nets
    pub threshold: Option<ThresholdMap>,
}

/// A signal sampled by a peek, a print or a vector dump
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationEntry {
    pub action: ActionIdx,
    pub slot: usize,
    pub signal: SignalRef,
    pub step: u64,
    pub time: Option<f64>,
    pub threshold: Option<ThresholdMap>,
}

/// Maps what the tools report back onto the actions of the log. Entries are
/// addressed by position: expectation `i` reports under the tag `e<i>`,
/// observation `j` under `o<j>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub expects: Vec<ExpectEntry>,
    pub observations: Vec<ObservationEntry>,
}

impl Manifest {
    pub(crate) fn expect(
        &mut self,
        action: ActionIdx,
        signal: &SignalRef,
        expected: &Value,
        tolerance: Option<Tolerance>,
        step: u64,
    ) -> &mut ExpectEntry {
        let index = self.expects.len();
        self.expects.push(ExpectEntry {
            index,
            action,
            signal: signal.clone(),
            expected: expected.clone(),
            tolerance,
            step,
            time: None,
            threshold: None,
        });
        &mut self.expects[index]
    }

    pub(crate) fn observe(
        &mut self,
        action: ActionIdx,
        slot: usize,
        signal: &SignalRef,
        step: u64,
    ) -> &mut ObservationEntry {
        let index = self.observations.len();
        self.observations.push(ObservationEntry {
            action,
            slot,
            signal: signal.clone(),
            step,
            time: None,
            threshold: None,
        });
        &mut self.observations[index]
    }
}

/// Everything a backend needs to run: generated files, the commands that
/// consume them and the manifest to read the answers with.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendArtifact {
    pub backend: BackendKind,
    /// File name (relative to the scratch directory) to contents
    pub files: BTreeMap<String, String>,
    pub commands: Vec<Invocation>,
    /// Files the commands produce, collected after the run
    pub outputs: Vec<String>,
    pub manifest: Manifest,
}

/// Captured output of a successful run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResults {
    pub outputs: Vec<ProcessOutput>,
    pub files: BTreeMap<String, String>,
}

impl RawResults {
    /// All lines written to stdout, in command order
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().flat_map(|o| o.stdout.lines())
    }
}

/// Settings shared by all backends when materializing and running artifacts
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub process: ProcessOptions,
    pub scratch_dir: Option<PathBuf>,
    pub keep_artifacts: bool,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            process: config.process.clone(),
            scratch_dir: config.session.scratch_dir.clone(),
            keep_artifacts: config.session.keep_artifacts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Digital(DigitalBackend),
    Analog(AnalogBackend),
    Symbolic(SymbolicBackend),
}

impl Backend {
    pub fn new(kind: BackendKind, config: &Config) -> Self {
        let seed = config.session.seed;
        match kind {
            BackendKind::Digital => Backend::Digital(DigitalBackend::new(config.digital.clone(), seed)),
            BackendKind::Analog => Backend::Analog(AnalogBackend::new(config.analog.clone(), seed)),
            BackendKind::Symbolic => Backend::Symbolic(SymbolicBackend::new(config.symbolic.clone())),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Digital(_) => BackendKind::Digital,
            Backend::Analog(_) => BackendKind::Analog,
            Backend::Symbolic(_) => BackendKind::Symbolic,
        }
    }

    /// Lowers a finalized log. Pure: the same inputs produce an identical artifact.
    pub fn compile(&self, circuit: &Circuit, log: &ActionLog) -> Result<BackendArtifact, CompileError> {
        if !log.is_finalized() {
            return Err(CompileError::NotFinalized);
        }
        match self {
            Backend::Digital(b) => b.compile(circuit, log),
            Backend::Analog(b) => b.compile(circuit, log),
            Backend::Symbolic(b) => b.compile(circuit, log),
        }
    }

    /// Materializes the artifact in a scratch directory and runs its commands
    /// under `budget`. The only operation that touches external state.
    pub fn run(
        &self,
        artifact: &BackendArtifact,
        settings: &RunSettings,
        budget: &Budget,
    ) -> Result<RawResults, ExecutionError> {
        let result = execute(artifact, settings, budget);
        match self {
            Backend::Analog(b) => b.check_convergence(result),
            _ => result,
        }
    }

    pub fn interpret(&self, artifact: &BackendArtifact, raw: &RawResults) -> Interpretation {
        match self {
            Backend::Digital(b) => b.interpret(artifact, raw),
            Backend::Analog(b) => b.interpret(artifact, raw),
            Backend::Symbolic(b) => b.interpret(artifact, raw),
        }
    }
}

fn execute(
    artifact: &BackendArtifact,
    settings: &RunSettings,
    budget: &Budget,
) -> Result<RawResults, ExecutionError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("stimulus-");
    let dir = match &settings.scratch_dir {
        Some(base) => {
            std::fs::create_dir_all(base)?;
            builder.tempdir_in(base)?
        }
        None => builder.tempdir()?,
    };
    let result = execute_in(artifact, settings, budget, dir.path());
    if settings.keep_artifacts {
        let kept = dir.keep();
        info!("{} artifacts kept in {}", artifact.backend, kept.display());
    }
    result
}

fn execute_in(
    artifact: &BackendArtifact,
    settings: &RunSettings,
    budget: &Budget,
    dir: &Path,
) -> Result<RawResults, ExecutionError> {
    for (name, content) in &artifact.files {
        std::fs::write(dir.join(name), content)?;
    }
    if settings.process.write_script {
        let script = write_script(dir, &artifact.commands, &settings.process)?;
        info!("reproducer written to {}", script.display());
    }
    let outputs = run_invocations(&artifact.commands, dir, &settings.process, budget)?;
    let mut files = BTreeMap::new();
    for name in &artifact.outputs {
        let path = dir.join(name);
        if !path.exists() {
            return Err(ExecutionError::MissingOutput(PathBuf::from(name)));
        }
        files.insert(name.clone(), std::fs::read_to_string(path)?);
    }
    Ok(RawResults { outputs, files })
}

/// What a backend read back for one sample
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sample {
    Value(Value),
    /// Not a concrete value, e.g. `x` or `z` bits
    Unknown(String),
    /// Analog voltage between the logic thresholds
    Indeterminate(f64),
}

/// Decodes a string of `0`/`1` characters as a value of `kind`
pub(crate) fn decode_bits(bits: &str, kind: ValueKind) -> Sample {
    if kind.width() != Some(bits.len() as u32) || !bits.chars().all(|c| c == '0' || c == '1') {
        return Sample::Unknown(bits.to_string());
    }
    BitVecValue::from_bit_str(bits)
        .ok()
        .and_then(|bv| Value::from_bits(&bv, kind))
        .map(Sample::Value)
        .unwrap_or_else(|| Sample::Unknown(bits.to_string()))
}

/// Compares a sample with its expectation
pub(crate) fn judge(entry: &ExpectEntry, backend: BackendKind, sample: Option<Sample>) -> TestResult {
    let locator = Locator {
        index: entry.index,
        action: entry.action,
        signal: entry.signal.clone(),
        backend,
    };
    let fail = |actual| Outcome::Fail {
        expected: entry.expected.clone(),
        actual,
        step: entry.step,
        counterexample: vec![],
    };
    let outcome = match sample {
        None => Outcome::Error(ResultError::MissingResult),
        Some(_) if entry.expected == Value::DontCare => Outcome::Pass,
        Some(Sample::Indeterminate(v)) => Outcome::Error(ResultError::Indeterminate(v)),
        Some(Sample::Unknown(raw)) => fail(Observed::Unknown(raw)),
        Some(Sample::Value(actual)) => {
            if values_match(&entry.expected, &actual, entry.tolerance) {
                Outcome::Pass
            } else {
                fail(Observed::Value(actual))
            }
        }
    };
    TestResult { locator, outcome }
}

pub(crate) fn observation(entry: &ObservationEntry, sample: Option<Sample>) -> Observation {
    Observation {
        action: entry.action,
        slot: entry.slot,
        signal: entry.signal.clone(),
        value: sample.map(|s| match s {
            Sample::Value(v) => Observed::Value(v),
            Sample::Unknown(raw) => Observed::Unknown(raw),
            Sample::Indeterminate(v) => Observed::Unknown(format!("{v}V")),
        }),
    }
}

/// Source files as absolute paths so tools can run from the scratch directory
pub(crate) fn source_paths(circuit: &Circuit) -> Vec<String> {
    circuit
        .sources
        .iter()
        .map(|s| {
            std::path::absolute(s)
                .unwrap_or_else(|_| s.clone())
                .display()
                .to_string()
        })
        .collect()
}

/// Substitutes `{name}` placeholders in a command template. An argument that
/// consists of a single placeholder expands into all of its values.
pub(crate) fn expand_template(template: &[String], vars: &[(&str, Vec<String>)]) -> Vec<String> {
    let mut argv = vec![];
    for arg in template {
        if let Some((_, values)) = vars.iter().find(|(name, _)| *arg == format!("{{{name}}}")) {
            argv.extend(values.iter().cloned());
            continue;
        }
        let mut expanded = arg.clone();
        for (name, values) in vars {
            expanded = expanded.replace(&format!("{{{name}}}"), &values.join(" "));
        }
        argv.push(expanded);
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::circuit::tests::counter;
    use crate::signal::resolve;
    use cranelift_entity::EntityRef;

    #[test]
    fn test_expand_template() {
        let template: Vec<String> = ["sim", "{sources}", "--top={top}", "{flags}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let argv = expand_template(
            &template,
            &[
                ("sources", vec!["a.v".to_string(), "b.v".to_string()]),
                ("top", vec!["tb".to_string()]),
                ("flags", vec![]),
            ],
        );
        assert_eq!(argv, vec!["sim", "a.v", "b.v", "--top=tb"]);
    }

    #[test]
    fn test_decode_bits() {
        assert_eq!(decode_bits("1", ValueKind::Bit), Sample::Value(Value::bit(true)));
        assert_eq!(decode_bits("0101", ValueKind::BitVec(4)), Sample::Value(Value::bits(5, 4)));
        assert_eq!(decode_bits("01x1", ValueKind::BitVec(4)), Sample::Unknown("01x1".to_string()));
        assert_eq!(decode_bits("011", ValueKind::BitVec(4)), Sample::Unknown("011".to_string()));
        let fixed = decode_bits("11111000", ValueKind::Fixed { width: 8, frac: 4 });
        match fixed {
            Sample::Value(v) => assert_eq!(v.as_f64(), Some(-0.5)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_judge() {
        let c = counter();
        let r = resolve(&c, "r").unwrap();
        let mut manifest = Manifest::default();
        manifest.expect(ActionIdx::new(2), &r, &Value::bit(true), None, 1);
        let entry = &manifest.expects[0];
        let judge = |s| judge(entry, BackendKind::Digital, s).outcome;
        assert_eq!(judge(Some(Sample::Value(Value::bit(true)))), Outcome::Pass);
        assert!(matches!(judge(Some(Sample::Value(Value::bit(false)))), Outcome::Fail { step: 1, .. }));
        // x is not equal to any concrete value
        assert!(matches!(judge(Some(Sample::Unknown("x".into()))), Outcome::Fail { .. }));
        assert_eq!(judge(None), Outcome::Error(ResultError::MissingResult));
        assert_eq!(
            judge(Some(Sample::Indeterminate(0.9))),
            Outcome::Error(ResultError::Indeterminate(0.9))
        );

        manifest.expect(ActionIdx::new(3), &r, &Value::DontCare, None, 1);
        let entry = &manifest.expects[1];
        assert_eq!(
            super::judge(entry, BackendKind::Digital, Some(Sample::Unknown("x".into()))).outcome,
            Outcome::Pass
        );
    }

    #[test]
    fn test_compile_requires_finalized_log() {
        let c = counter();
        let mut log = ActionLog::new();
        log.append(Action::Eval).unwrap();
        for kind in [BackendKind::Digital, BackendKind::Analog, BackendKind::Symbolic] {
            let backend = Backend::new(kind, &Config::default());
            assert_eq!(backend.kind(), kind);
            assert_eq!(backend.compile(&c, &log), Err(CompileError::NotFinalized));
        }
    }
}
