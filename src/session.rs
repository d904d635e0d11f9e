// Copyright 2026 Cornell University
// released under MIT License

//! # Execution driver
//! A `Session` owns one action log and walks it through
//! `Building -> Finalized -> Compiled -> Running -> Completed | Failed`.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::{Action, ActionIdx, ActionLog, Location};
use crate::backend::{Backend, BackendArtifact, BackendKind, RunSettings};
use crate::circuit::Circuit;
use crate::config::Config;
use crate::errors::{ConstructionError, ExecutionError, SessionError};
use crate::parser::parse_literal;
use crate::process::{Budget, CancelToken};
use crate::report::{Interpretation, Observation, Observed, SessionReport};
use crate::serialize::render_print;
use crate::signal::resolve;
use crate::value::{Tolerance, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Building,
    Finalized,
    Compiled,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Building => "building",
            SessionState::Finalized => "finalized",
            SessionState::Compiled => "compiled",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

pub struct Session<'c> {
    circuit: &'c Circuit,
    log: ActionLog,
    backend: Backend,
    settings: RunSettings,
    timeout: Duration,
    max_retries: u32,
    cancel: Option<CancelToken>,
    state: SessionState,
    artifact: Option<BackendArtifact>,
}

impl<'c> Session<'c> {
    pub fn new(circuit: &'c Circuit, backend: BackendKind, config: &Config) -> Self {
        Self {
            circuit,
            log: ActionLog::new(),
            backend: Backend::new(backend, config),
            settings: RunSettings::from_config(config),
            timeout: config.session.timeout(),
            max_retries: config.session.max_retries,
            cancel: None,
            state: SessionState::Building,
            artifact: None,
        }
    }

    /// Continues building on a log recorded elsewhere, e.g. by the script parser
    pub fn with_log(circuit: &'c Circuit, log: ActionLog, backend: BackendKind, config: &Config) -> Self {
        let mut session = Self::new(circuit, backend, config);
        session.state = if log.is_finalized() {
            SessionState::Finalized
        } else {
            SessionState::Building
        };
        session.log = log;
        session
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    pub fn circuit(&self) -> &'c Circuit {
        self.circuit
    }

    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn artifact(&self) -> Option<&BackendArtifact> {
        self.artifact.as_ref()
    }

    fn require(&self, operation: &'static str, state: SessionState) -> Result<(), SessionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(SessionError::invalid_state(operation, self.state))
        }
    }

    /// Appends an action that was built outside of the helpers
    pub fn append(&mut self, action: Action) -> Result<ActionIdx, SessionError> {
        self.require("append", SessionState::Building)?;
        Ok(self.log.append(action)?)
    }

    pub fn append_at(&mut self, action: Action, location: Location) -> Result<ActionIdx, SessionError> {
        self.require("append", SessionState::Building)?;
        Ok(self.log.append_at(action, location)?)
    }

    fn resolve(&self, path: &str) -> Result<crate::signal::SignalRef, SessionError> {
        resolve(self.circuit, path).map_err(|e| SessionError::Construction(e.into()))
    }

    pub fn poke(&mut self, path: &str, value: Value) -> Result<ActionIdx, SessionError> {
        let signal = self.resolve(path)?;
        self.append(Action::Poke { signal, value })
    }

    pub fn expect(&mut self, path: &str, value: Value) -> Result<ActionIdx, SessionError> {
        let signal = self.resolve(path)?;
        self.append(Action::Expect {
            signal,
            value,
            tolerance: None,
        })
    }

    pub fn expect_within(
        &mut self,
        path: &str,
        value: Value,
        tolerance: Tolerance,
    ) -> Result<ActionIdx, SessionError> {
        let signal = self.resolve(path)?;
        self.append(Action::Expect {
            signal,
            value,
            tolerance: Some(tolerance),
        })
    }

    pub fn step(&mut self, clock: &str, count: u32) -> Result<ActionIdx, SessionError> {
        let clock = self.resolve(clock)?;
        self.append(Action::Step { clock, count })
    }

    /// The observed value ends up in `SessionReport::peeked` under the returned index
    pub fn peek(&mut self, path: &str) -> Result<ActionIdx, SessionError> {
        let signal = self.resolve(path)?;
        self.append(Action::Peek(signal))
    }

    pub fn print(&mut self, format: &str, paths: &[&str]) -> Result<ActionIdx, SessionError> {
        let signals = paths
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.append(Action::Print {
            format: format.to_string(),
            signals,
        })
    }

    pub fn eval(&mut self) -> Result<ActionIdx, SessionError> {
        self.append(Action::Eval)
    }

    pub fn delay(&mut self, seconds: f64) -> Result<ActionIdx, SessionError> {
        self.append(Action::Delay(seconds))
    }

    pub fn write_vector(&mut self, file: impl Into<PathBuf>, paths: &[&str]) -> Result<ActionIdx, SessionError> {
        let signals = paths
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.append(Action::WriteVector {
            file: file.into(),
            signals,
        })
    }

    /// Appends the actions of a vector file, see [`vector_actions`]
    pub fn apply_vectors(
        &mut self,
        file: &Path,
        inputs: &[&str],
        outputs: &[&str],
        clock: Option<&str>,
    ) -> Result<Vec<ActionIdx>, SessionError> {
        self.require("apply vectors", SessionState::Building)?;
        let actions = vector_actions(self.circuit, file, inputs, outputs, clock)?;
        let mut added = Vec::with_capacity(actions.len());
        for action in actions {
            added.push(self.append(action)?);
        }
        Ok(added)
    }

    pub fn finalize(&mut self) -> Result<(), SessionError> {
        self.require("finalize", SessionState::Building)?;
        self.log.finalize();
        self.state = SessionState::Finalized;
        Ok(())
    }

    /// Lowers the log for the selected backend. A failure is terminal.
    pub fn compile(&mut self) -> Result<&BackendArtifact, SessionError> {
        self.require("compile", SessionState::Finalized)?;
        match self.backend.compile(self.circuit, &self.log) {
            Ok(artifact) => {
                info!(
                    "compiled {} action(s) into {} file(s) for the {} backend",
                    self.log.len(),
                    artifact.files.len(),
                    artifact.backend
                );
                for (name, content) in &artifact.files {
                    debug!("{name}:\n{content}");
                }
                self.state = SessionState::Compiled;
                Ok(&*self.artifact.insert(artifact))
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e.into())
            }
        }
    }

    /// Runs the compiled artifact. Launch failures are retried with the same
    /// artifact, every other failure ends the session.
    pub fn run(&mut self) -> Result<SessionReport, SessionError> {
        self.require("run", SessionState::Compiled)?;
        let Some(artifact) = self.artifact.take() else {
            return Err(SessionError::invalid_state("run", self.state));
        };
        self.state = SessionState::Running;
        let result = self.run_artifact(&artifact);
        // a cancelled run discards its artifact
        if !matches!(result, Err(SessionError::Execution(ExecutionError::Cancelled))) {
            self.artifact = Some(artifact);
        }
        match result {
            Ok(report) => {
                self.state = SessionState::Completed;
                Ok(report)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn run_artifact(&self, artifact: &BackendArtifact) -> Result<SessionReport, SessionError> {
        let mut attempt = 0;
        let raw = loop {
            let mut budget = Budget::new(self.timeout);
            if let Some(token) = &self.cancel {
                budget = budget.with_cancel(token.clone());
            }
            match self.backend.run(artifact, &self.settings, &budget) {
                Ok(raw) => break raw,
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("{e}, retrying ({attempt}/{})", self.max_retries);
                }
                Err(e) => return Err(e.into()),
            }
        };
        let interpretation = self.backend.interpret(artifact, &raw);
        let report = self.report(interpretation);
        self.write_vectors(&report)?;
        Ok(report)
    }

    /// Runs whatever is left to do until the session completes or fails
    pub fn execute(&mut self) -> Result<SessionReport, SessionError> {
        if self.state == SessionState::Building {
            self.finalize()?;
        }
        if self.state == SessionState::Finalized {
            self.compile()?;
        }
        self.run()
    }

    fn slots(observations: &[Observation], idx: ActionIdx) -> Vec<Option<Observed>> {
        let mut slots: Vec<&Observation> = observations.iter().filter(|o| o.action == idx).collect();
        slots.sort_by_key(|o| o.slot);
        slots.into_iter().map(|o| o.value.clone()).collect()
    }

    fn report(&self, interpretation: Interpretation) -> SessionReport {
        let prints = self
            .log
            .iter()
            .filter_map(|(idx, action)| match action {
                Action::Print { format, .. } => {
                    Some(render_print(format, &Self::slots(&interpretation.observations, idx)))
                }
                _ => None,
            })
            .collect();
        SessionReport {
            backend: self.backend.kind(),
            results: interpretation.results,
            observations: interpretation.observations,
            prints,
        }
    }

    /// Appends one line per vector action to its file
    fn write_vectors(&self, report: &SessionReport) -> Result<(), SessionError> {
        for (idx, action) in self.log.iter() {
            let Action::WriteVector { file, .. } = action else {
                continue;
            };
            let line = Self::slots(&report.observations, idx)
                .iter()
                .map(|v| match v {
                    Some(v) => v.to_string(),
                    None => "?".to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            let vector_error = |error| SessionError::VectorOutput {
                path: file.clone(),
                error,
            };
            let mut out = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .map_err(vector_error)?;
            writeln!(out, "{line}").map_err(vector_error)?;
        }
        Ok(())
    }
}

/// Expands a vector file into actions. Every non-empty line holds one value
/// per input followed by one value per output. It becomes pokes of the inputs,
/// an eval, expects on the outputs and, if a clock is given, a single step.
/// `#` starts a comment, `_` expects or drives a don't care.
///
/// Every action is checked before any is returned, so a bad file adds nothing.
pub fn vector_actions(
    circuit: &Circuit,
    file: &Path,
    inputs: &[&str],
    outputs: &[&str],
    clock: Option<&str>,
) -> Result<Vec<Action>, ConstructionError> {
    let name = file.display().to_string();
    let error = |line: usize, reason: String| ConstructionError::Vectors {
        file: name.clone(),
        line,
        reason,
    };
    let text = std::fs::read_to_string(file).map_err(|e| error(0, e.to_string()))?;
    let inputs = inputs
        .iter()
        .map(|p| resolve(circuit, p))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = outputs
        .iter()
        .map(|p| resolve(circuit, p))
        .collect::<Result<Vec<_>, _>>()?;
    let clock = clock.map(|c| resolve(circuit, c)).transpose()?;

    let mut actions = vec![];
    for (n, line) in text.lines().enumerate() {
        let line_no = n + 1;
        let content = line.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.len() != inputs.len() + outputs.len() {
            return Err(error(
                line_no,
                format!(
                    "expected {} value(s), found {}",
                    inputs.len() + outputs.len(),
                    tokens.len()
                ),
            ));
        }
        let mut values = vec![];
        for (token, signal) in tokens.iter().zip(inputs.iter().chain(outputs.iter())) {
            let literal = parse_literal(token).map_err(|e| error(line_no, e))?;
            let value = literal
                .into_value(signal.kind)
                .map_err(|found| error(line_no, format!("`{signal}` is {}, found {found}", signal.kind)))?;
            values.push(value);
        }
        let (driven, expected) = values.split_at(inputs.len());
        for (signal, value) in inputs.iter().zip(driven) {
            actions.push(Action::Poke {
                signal: signal.clone(),
                value: value.clone(),
            });
        }
        actions.push(Action::Eval);
        for (signal, value) in outputs.iter().zip(expected) {
            actions.push(Action::Expect {
                signal: signal.clone(),
                value: value.clone(),
                tolerance: None,
            });
        }
        if let Some(clock) = &clock {
            actions.push(Action::Step {
                clock: clock.clone(),
                count: 1,
            });
        }
    }
    for action in &actions {
        action.check()?;
    }
    Ok(actions)
}

/// Executes independent sessions on the rayon pool. Results are in input order.
pub fn run_sessions(sessions: &mut [Session<'_>]) -> Vec<Result<SessionReport, SessionError>> {
    sessions.par_iter_mut().map(|s| s.execute()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::tests::counter;
    use crate::config::Simulator;
    use crate::errors::CompileError;
    use crate::report::{Outcome, Verdict};

    /// Digital configuration whose "simulator" prints `stdout`
    fn fake_digital(stdout: &str) -> Config {
        let mut config = Config::default();
        config.session.max_retries = 0;
        config.digital.simulator = Simulator::Custom;
        config.digital.commands = vec![vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("printf '{stdout}'"),
        ]];
        config
    }

    #[test]
    fn test_state_machine() {
        let c = counter();
        let mut session = Session::new(&c, BackendKind::Digital, &fake_digital("@e0 1\\n"));
        assert_eq!(session.state(), SessionState::Building);
        assert!(matches!(
            session.run(),
            Err(SessionError::InvalidState {
                state: SessionState::Building,
                ..
            })
        ));
        session.poke("a", Value::bit(true)).unwrap();
        session.step("clk", 1).unwrap();
        session.expect("r", Value::bit(true)).unwrap();
        session.finalize().unwrap();
        assert!(matches!(
            session.poke("a", Value::bit(false)),
            Err(SessionError::InvalidState { .. })
        ));
        assert_eq!(session.log().len(), 3);
        session.compile().unwrap();
        assert_eq!(session.state(), SessionState::Compiled);
        let report = session.run().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(report.verdict(), Verdict::Pass);
        assert!(matches!(session.run(), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn test_construction_errors_leave_log_untouched() {
        let c = counter();
        let mut session = Session::new(&c, BackendKind::Digital, &Config::default());
        assert!(matches!(
            session.poke("out", Value::bit(true)),
            Err(SessionError::Construction(ConstructionError::NotDrivable { .. }))
        ));
        assert!(matches!(
            session.poke("a", Value::bits(1, 4)),
            Err(SessionError::Construction(ConstructionError::TypeMismatch { .. }))
        ));
        assert!(session.peek("sub.hidden").unwrap_err().is_construction());
        assert!(session.step("a", 1).is_err());
        assert!(session.log().is_empty());
        assert_eq!(session.state(), SessionState::Building);
    }

    #[test]
    fn test_compile_failure_is_terminal() {
        let mut c = Circuit::new("plain", "plain");
        c.add_port(crate::circuit::Port::input("a", crate::value::ValueKind::Bit))
            .unwrap();
        let mut session = Session::new(&c, BackendKind::Symbolic, &Config::default());
        session.poke("a", Value::bit(true)).unwrap();
        session.finalize().unwrap();
        assert!(matches!(
            session.compile(),
            Err(SessionError::Compile(CompileError::CompileFailure { .. }))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(session.compile(), Err(SessionError::InvalidState { .. })));
        assert!(matches!(session.run(), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn test_report_prints_and_peeks() {
        let c = counter();
        let config = fake_digital("@e0 0\\n@o0 1\\n@o1 1\\n@o2 0110\\n");
        let mut session = Session::new(&c, BackendKind::Digital, &config);
        session.expect("r", Value::bit(true)).unwrap();
        let peek = session.peek("r").unwrap();
        session.print("r={} probe={}", &["out", "sub.probe"]).unwrap();
        let report = session.execute().unwrap();
        assert_eq!(report.verdict(), Verdict::Fail);
        assert!(matches!(report.results[0].outcome, Outcome::Fail { .. }));
        assert_eq!(report.peeked(peek), Some(&Observed::Value(Value::bit(true))));
        assert_eq!(report.prints, vec!["r=1'b1 probe=4'h6".to_string()]);
    }

    #[test]
    fn test_write_vector() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("samples.vec");
        let c = counter();
        let config = fake_digital("@o0 1\\n@o1 1010\\n");
        let mut session = Session::new(&c, BackendKind::Digital, &config);
        session.write_vector(&file, &["r", "sub.probe"]).unwrap();
        session.execute().unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "1'b1 4'ha\n");
    }

    #[test]
    fn test_apply_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("in.vec");
        std::fs::write(&file, "# a out\n1 _\n\n0 1 # comment\n").unwrap();
        let c = counter();
        let mut session = Session::new(&c, BackendKind::Digital, &Config::default());
        let added = session
            .apply_vectors(&file, &["a"], &["out"], Some("clk"))
            .unwrap();
        assert_eq!(added.len(), 8);
        let log = session.log();
        assert!(matches!(&log[added[0]], Action::Poke { value: Value::Bit(true), .. }));
        assert!(matches!(&log[added[1]], Action::Eval));
        assert!(matches!(&log[added[2]], Action::Expect { value: Value::DontCare, .. }));
        assert!(matches!(&log[added[3]], Action::Step { count: 1, .. }));

        std::fs::write(&file, "1 0\n1\n").unwrap();
        let err = session.apply_vectors(&file, &["a"], &["out"], None).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Construction(ConstructionError::Vectors { line: 2, .. })
        ));
        std::fs::write(&file, "2 0\n").unwrap();
        assert!(session.apply_vectors(&file, &["a"], &["out"], None).is_err());
        // the step of the first row is rejected after its poke, eval and expect
        std::fs::write(&file, "1 0\n0 1\n").unwrap();
        assert!(matches!(
            session.apply_vectors(&file, &["a"], &["out"], Some("a")),
            Err(SessionError::Construction(ConstructionError::InvalidStep { .. }))
        ));
        // failed files add nothing
        assert_eq!(session.log().len(), 8);
    }

    #[test]
    fn test_launch_failures_are_retried_then_reported() {
        let c = counter();
        let mut config = fake_digital("");
        config.session.max_retries = 2;
        config.digital.commands = vec![vec!["/nonexistent/simulator".to_string()]];
        let mut session = Session::new(&c, BackendKind::Digital, &config);
        session.eval().unwrap();
        let err = session.execute().unwrap_err();
        assert!(matches!(err, SessionError::Execution(ExecutionError::Launch { .. })), "{err}");
        assert_eq!(session.state(), SessionState::Failed);
        // kept for inspection
        assert!(session.artifact().is_some());
    }

    #[test]
    fn test_cancelled_run() {
        let c = counter();
        let mut config = fake_digital("");
        config.digital.commands = vec![vec!["sleep".to_string(), "10".to_string()]];
        let token = CancelToken::new();
        token.cancel();
        let mut session = Session::new(&c, BackendKind::Digital, &config).with_cancel(token);
        session.eval().unwrap();
        assert!(matches!(
            session.execute(),
            Err(SessionError::Execution(ExecutionError::Cancelled))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.artifact().is_none());
    }

    #[test]
    fn test_run_sessions() {
        let c = counter();
        let pass = fake_digital("@e0 1\\n");
        let fail = fake_digital("@e0 0\\n");
        let mut sessions = vec![
            Session::new(&c, BackendKind::Digital, &pass),
            Session::new(&c, BackendKind::Digital, &fail),
            Session::new(&c, BackendKind::Digital, &pass),
        ];
        for session in sessions.iter_mut() {
            session.expect("r", Value::bit(true)).unwrap();
        }
        let reports = run_sessions(&mut sessions);
        let verdicts: Vec<_> = reports.into_iter().map(|r| r.unwrap().verdict()).collect();
        assert_eq!(verdicts, vec![Verdict::Pass, Verdict::Fail, Verdict::Pass]);
        assert!(sessions.iter().all(|s| s.state() == SessionState::Completed));
    }
}
