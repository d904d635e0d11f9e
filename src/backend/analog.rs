// Copyright 2026 Cornell University
// released under MIT License

//! # Analog simulator backend
//! Lowers an action log into an ngspice deck. Inputs are driven by piecewise
//! linear sources, samples become `.meas` statements that ngspice prints as
//! `<tag> = <voltage>` in batch mode.
//!
//! Bit vectors are split into one node per bit named `<signal>_<bit>`, the
//! subcircuit pins are ordered like the ports with the most significant bit
//! first.

use baa::BitVecOps;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::io::Write;

use super::{
    decode_bits, expand_template, judge, observation, source_paths, BackendArtifact, BackendKind,
    Manifest, RawResults, Sample,
};
use crate::action::{Action, ActionIdx, ActionLog};
use crate::circuit::{Circuit, Dir};
use crate::config::AnalogConfig;
use crate::errors::{CompileError, ExecutionError};
use crate::process::Invocation;
use crate::report::Interpretation;
use crate::serialize::serialize_action;
use crate::signal::SignalRef;
use crate::value::{ThresholdMap, Value, ValueKind};

const DECK_FILE: &str = "stimulus_deck.sp";
const DUT: &str = "xdut";

/// Messages ngspice prints when the transient analysis gives up
const CONVERGENCE_FAILURES: [&str; 5] = [
    "timestep too small",
    "singular matrix",
    "gmin stepping failed",
    "source stepping failed",
    "too many iterations without convergence",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AnalogBackend {
    config: AnalogConfig,
    seed: u64,
}

fn failure(action: Option<ActionIdx>, reason: impl Into<String>) -> CompileError {
    CompileError::CompileFailure {
        backend: BackendKind::Analog,
        action,
        reason: reason.into(),
    }
}

fn is_digital(kind: ValueKind) -> bool {
    matches!(kind, ValueKind::Bit | ValueKind::BitVec(_))
}

fn num(x: f64) -> String {
    format!("{x:e}")
}

/// Nodes of a signal inside the scope it is declared in
fn local_nodes(name: &str, kind: ValueKind) -> Vec<String> {
    match kind {
        ValueKind::BitVec(w) => (0..w).rev().map(|i| format!("{name}_{i}")).collect(),
        _ => vec![name.to_string()],
    }
}

/// Nodes of a signal as seen from the deck, most significant bit first
fn nodes(signal: &SignalRef) -> Vec<String> {
    let local = local_nodes(&signal.name, signal.kind);
    if signal.is_top_port() {
        return local;
    }
    let mut prefix = format!("{DUT}.");
    for inst in &signal.path {
        prefix.push_str(&format!("x{inst}."));
    }
    local.into_iter().map(|n| format!("{prefix}{n}")).collect()
}

/// Measurement names of a sample, in the order of `nodes`
fn measure_names(tag: &str, kind: ValueKind) -> Vec<String> {
    match kind {
        ValueKind::BitVec(w) => (0..w).rev().map(|i| format!("{tag}_{i}")).collect(),
        _ => vec![tag.to_string()],
    }
}

/// A piecewise linear voltage source driving one node
#[derive(Debug)]
struct Source {
    node: String,
    points: Vec<(f64, f64)>,
}

impl Source {
    fn new(node: String, initial: f64) -> Self {
        Self {
            node,
            points: vec![(0.0, initial)],
        }
    }

    /// Ramps to `value` starting at `time`. A change issued before the
    /// previous ramp finished replaces its target.
    fn set(&mut self, time: f64, rise: f64, value: f64) {
        let Some(last) = self.points.last_mut() else {
            self.points.push((time, value));
            return;
        };
        let (last_time, last_value) = *last;
        if last_time >= time {
            last.1 = value;
        } else if last_value != value {
            self.points.push((time, last_value));
            self.points.push((time + rise, value));
        }
    }

    fn end(&self) -> f64 {
        self.points.last().map(|p| p.0).unwrap_or(0.0)
    }
}

/// Deck under construction: one source per input node and the running time
struct Deck<'a> {
    config: &'a AnalogConfig,
    sources: Vec<Source>,
    by_node: FxHashMap<String, usize>,
    time: f64,
    steps: u64,
    /// Pokes that have not settled yet
    dirty: bool,
    measures: Vec<String>,
    manifest: Manifest,
}

impl<'a> Deck<'a> {
    fn new(circuit: &Circuit, config: &'a AnalogConfig) -> Self {
        let mut deck = Self {
            config,
            sources: vec![],
            by_node: FxHashMap::default(),
            time: 0.0,
            steps: 0,
            dirty: false,
            measures: vec![],
            manifest: Manifest::default(),
        };
        let initial = config.threshold.map(|t| t.vlow).unwrap_or(0.0);
        for port in circuit.ports().iter().filter(|p| p.dir != Dir::Out) {
            for node in local_nodes(&port.name, port.kind) {
                deck.by_node.insert(node.clone(), deck.sources.len());
                deck.sources.push(Source::new(node, initial));
            }
        }
        deck
    }

    fn settle_time(&self) -> f64 {
        self.config.step_duration / 2.0
    }

    fn settle(&mut self) {
        if self.dirty {
            self.time += self.settle_time();
            self.dirty = false;
        }
    }

    fn drive(&mut self, node: &str, value: f64) {
        if let Some(&i) = self.by_node.get(node) {
            self.sources[i].set(self.time, self.config.rise_time, value);
        }
    }

    /// Voltages for `value` on the nodes of a signal of `kind`
    fn voltages(&self, value: &Value, kind: ValueKind) -> Result<Vec<f64>, String> {
        match value {
            Value::Real(r) => Ok(vec![*r]),
            Value::Fixed(f) => Ok(vec![f.to_f64()]),
            Value::Bit(_) | Value::BitVec(_) => {
                let threshold = self.threshold(kind)?;
                let bits = value.to_bits().map(|b| b.to_bit_str()).unwrap_or_default();
                Ok(bits.chars().map(|c| threshold.drive(c == '1')).collect())
            }
            other => Err(format!("cannot drive {}", other.describe())),
        }
    }

    fn threshold(&self, kind: ValueKind) -> Result<ThresholdMap, String> {
        self.config.threshold.ok_or_else(|| {
            format!("{kind} values on analog nets require `analog.threshold` to be configured")
        })
    }

    fn sample(&mut self, tag: &str, idx: ActionIdx, signal: &SignalRef) -> Result<(), String> {
        self.settle();
        if is_digital(signal.kind) {
            self.threshold(signal.kind)?;
        }
        self.measures.push(format!("* {idx}: {signal}"));
        for (name, node) in measure_names(tag, signal.kind).iter().zip(nodes(signal)) {
            self.measures.push(format!(
                ".meas tran {name} FIND v({node}) AT={}",
                num(self.time)
            ));
        }
        Ok(())
    }

    fn lower(&mut self, rng: &mut StdRng, idx: ActionIdx, action: &Action) -> Result<(), String> {
        match action {
            Action::Poke { signal, value } => {
                if signal.is_internal() {
                    return Err(format!("internal signal `{signal}` may be sampled but not driven"));
                }
                let value = value.or_random(signal.kind, rng);
                let voltages = self.voltages(&value, signal.kind)?;
                for (node, v) in nodes(signal).iter().zip(voltages) {
                    self.drive(node, v);
                }
                self.dirty = true;
            }
            Action::Eval => {
                self.dirty = true;
                self.settle();
            }
            Action::Delay(seconds) => {
                self.time += seconds;
                self.dirty = false;
            }
            Action::Step { clock, count } => {
                self.settle();
                let threshold = self.threshold(clock.kind)?;
                let period = self.config.step_duration;
                let start = self.time;
                for k in 0..*count {
                    self.time = start + k as f64 * period;
                    self.drive(&clock.name, threshold.drive(true));
                    self.time += period / 2.0;
                    self.drive(&clock.name, threshold.drive(false));
                }
                self.time = start + *count as f64 * period;
                self.steps += *count as u64;
            }
            Action::Expect {
                signal,
                value,
                tolerance,
            } => {
                if signal.kind.is_numeric() && tolerance.is_none() && *value != Value::DontCare {
                    return Err(format!(
                        "expectation on {} signal `{signal}` needs an explicit tolerance",
                        signal.kind
                    ));
                }
                if let Value::Symbolic(name) = value {
                    return Err(format!("symbolic value `{name}` requires the symbolic backend"));
                }
                let tag = format!("e{}", self.manifest.expects.len());
                self.sample(&tag, idx, signal)?;
                let (time, steps, threshold) = (self.time, self.steps, self.threshold_for(signal));
                let entry = self.manifest.expect(idx, signal, value, *tolerance, steps);
                entry.time = Some(time);
                entry.threshold = threshold;
            }
            Action::Peek(signal) => self.observe(idx, 0, signal)?,
            Action::Print { signals, .. } | Action::WriteVector { signals, .. } => {
                for (slot, signal) in signals.iter().enumerate() {
                    self.observe(idx, slot, signal)?;
                }
            }
        }
        Ok(())
    }

    fn threshold_for(&self, signal: &SignalRef) -> Option<ThresholdMap> {
        if is_digital(signal.kind) {
            self.config.threshold
        } else {
            None
        }
    }

    fn observe(&mut self, idx: ActionIdx, slot: usize, signal: &SignalRef) -> Result<(), String> {
        let tag = format!("o{}", self.manifest.observations.len());
        self.sample(&tag, idx, signal)?;
        let (time, steps, threshold) = (self.time, self.steps, self.threshold_for(signal));
        let entry = self.manifest.observe(idx, slot, signal, steps);
        entry.time = Some(time);
        entry.threshold = threshold;
        Ok(())
    }

    fn write(&self, circuit: &Circuit, log: &ActionLog, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "* Deck generated by stimulus for {}", circuit.name)?;
        for source in source_paths(circuit) {
            writeln!(out, ".include {source}")?;
        }
        writeln!(out)?;
        writeln!(out, "* actions")?;
        for (idx, action) in log.iter() {
            writeln!(out, "* {idx}: {}", serialize_action(action).replace('\n', " "))?;
        }
        writeln!(out)?;
        let pins = circuit
            .ports()
            .iter()
            .flat_map(|p| local_nodes(&p.name, p.kind))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{DUT} {pins} {}", circuit.module)?;
        for source in &self.sources {
            let points = source
                .points
                .iter()
                .map(|(t, v)| format!("{} {}", num(*t), num(*v)))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "V{0} {0} 0 PWL({points})", source.node)?;
        }
        writeln!(out)?;
        let end = self
            .sources
            .iter()
            .map(Source::end)
            .fold(self.time, f64::max)
            + self.settle_time();
        writeln!(out, ".tran {} {}", num(self.config.time_step), num(end))?;
        for line in &self.measures {
            writeln!(out, "{line}")?;
        }
        writeln!(out, ".end")
    }
}

impl AnalogBackend {
    pub fn new(config: AnalogConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    pub fn compile(&self, circuit: &Circuit, log: &ActionLog) -> Result<BackendArtifact, CompileError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut deck = Deck::new(circuit, &self.config);
        for (idx, action) in log.iter() {
            deck.lower(&mut rng, idx, action)
                .map_err(|reason| failure(Some(idx), reason))?;
        }
        let mut out = Vec::new();
        deck.write(circuit, log, &mut out)
            .map_err(|e| failure(None, format!("failed to generate deck: {e}")))?;
        let text =
            String::from_utf8(out).map_err(|e| failure(None, format!("deck is not valid UTF-8: {e}")))?;
        let mut files = BTreeMap::new();
        files.insert(DECK_FILE.to_string(), text);
        Ok(BackendArtifact {
            backend: BackendKind::Analog,
            files,
            commands: self.commands(circuit),
            outputs: vec![],
            manifest: deck.manifest,
        })
    }

    fn commands(&self, circuit: &Circuit) -> Vec<Invocation> {
        if self.config.commands.is_empty() {
            let mut argv = vec![self.config.simulator.clone(), "-b".to_string()];
            argv.extend(self.config.flags.iter().cloned());
            argv.push(DECK_FILE.to_string());
            return vec![Invocation::new(argv)];
        }
        let vars = [
            ("deck", vec![DECK_FILE.to_string()]),
            ("sources", source_paths(circuit)),
            ("flags", self.config.flags.clone()),
        ];
        self.config
            .commands
            .iter()
            .map(|template| Invocation::new(expand_template(template, &vars)))
            .collect()
    }

    /// Turns a run that hit a convergence failure into `NonConvergence`. ngspice
    /// sometimes exits cleanly after giving up, sometimes it does not.
    pub fn check_convergence(
        &self,
        result: Result<RawResults, ExecutionError>,
    ) -> Result<RawResults, ExecutionError> {
        let failed = {
            let texts: Vec<&str> = match &result {
                Ok(raw) => raw
                    .outputs
                    .iter()
                    .flat_map(|o| [o.stdout.as_str(), o.stderr.as_str()])
                    .collect(),
                Err(ExecutionError::Crashed { stdout, stderr, .. })
                | Err(ExecutionError::ErrorMarker { stdout, stderr, .. }) => {
                    vec![stdout.as_str(), stderr.as_str()]
                }
                Err(_) => vec![],
            };
            texts
                .iter()
                .flat_map(|t| t.lines())
                .find(|line| {
                    let line = line.to_ascii_lowercase();
                    CONVERGENCE_FAILURES.iter().any(|m| line.contains(m))
                })
                .map(|line| line.trim().to_string())
        };
        match failed {
            Some(line) => Err(ExecutionError::NonConvergence(line)),
            None => result,
        }
    }

    pub fn interpret(&self, artifact: &BackendArtifact, raw: &RawResults) -> Interpretation {
        let measures = parse_measures(raw);
        let manifest = &artifact.manifest;
        Interpretation {
            results: manifest
                .expects
                .iter()
                .map(|e| {
                    let s = read(&measures, &format!("e{}", e.index), e.signal.kind, e.threshold);
                    judge(e, BackendKind::Analog, s)
                })
                .collect(),
            observations: manifest
                .observations
                .iter()
                .enumerate()
                .map(|(i, o)| {
                    observation(o, read(&measures, &format!("o{i}"), o.signal.kind, o.threshold))
                })
                .collect(),
        }
    }
}

/// Collects `<name> = <number>` lines, names are case insensitive
fn parse_measures(raw: &RawResults) -> FxHashMap<String, f64> {
    let mut measures = FxHashMap::default();
    for line in raw.stdout_lines() {
        let Some((name, rest)) = line.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            continue;
        }
        if let Some(Ok(value)) = rest.split_whitespace().next().map(str::parse::<f64>) {
            measures.insert(name.to_ascii_lowercase(), value);
        }
    }
    measures
}

/// Maps measured voltages back to a value of `kind`
fn read(
    measures: &FxHashMap<String, f64>,
    tag: &str,
    kind: ValueKind,
    threshold: Option<ThresholdMap>,
) -> Option<Sample> {
    let voltages = measure_names(tag, kind)
        .iter()
        .map(|name| measures.get(name).copied())
        .collect::<Option<Vec<f64>>>()?;
    if !is_digital(kind) {
        return voltages.first().map(|v| Sample::Value(Value::Real(*v)));
    }
    let threshold = threshold?;
    let mut bits = String::with_capacity(voltages.len());
    for v in voltages {
        match threshold.read(v) {
            Some(b) => bits.push(if b { '1' } else { '0' }),
            None => return Some(Sample::Indeterminate(v)),
        }
    }
    Some(decode_bits(&bits, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, RunSettings};
    use crate::circuit::tests::counter;
    use crate::circuit::Port;
    use crate::config::Config;
    use crate::process::{Budget, ProcessOutput};
    use crate::report::{Observed, Outcome, ResultError};
    use crate::signal::resolve;
    use crate::value::Tolerance;
    use std::time::Duration;

    fn threshold() -> ThresholdMap {
        ThresholdMap {
            vlow: 0.0,
            vhigh: 1.8,
            vil: 0.6,
            vih: 1.2,
        }
    }

    fn config() -> AnalogConfig {
        AnalogConfig {
            threshold: Some(threshold()),
            ..Default::default()
        }
    }

    fn fake_run(stdout: &str) -> RawResults {
        RawResults {
            outputs: vec![ProcessOutput {
                command: "ngspice -b stimulus_deck.sp".to_string(),
                exit_code: Some(0),
                stdout: stdout.to_string(),
                ..Default::default()
            }],
            files: BTreeMap::new(),
        }
    }

    /// poke a 1, step clk, expect r 1, peek sub.probe
    fn example_log(c: &Circuit) -> ActionLog {
        let mut log = ActionLog::new();
        log.append(Action::Poke {
            signal: resolve(c, "a").unwrap(),
            value: Value::bit(true),
        })
        .unwrap();
        log.append(Action::Step {
            clock: resolve(c, "clk").unwrap(),
            count: 1,
        })
        .unwrap();
        log.append(Action::Expect {
            signal: resolve(c, "r").unwrap(),
            value: Value::bit(true),
            tolerance: None,
        })
        .unwrap();
        log.append(Action::Peek(resolve(c, "sub.probe").unwrap())).unwrap();
        log.finalize();
        log
    }

    #[test]
    fn test_deck_contents() {
        let c = counter();
        let artifact = AnalogBackend::new(config(), 0).compile(&c, &example_log(&c)).unwrap();
        let deck = &artifact.files[DECK_FILE];
        assert!(deck.starts_with("* Deck generated by stimulus for counter\n.include "), "{deck}");
        assert!(deck.contains("\nxdut a clk out counter\n"), "{deck}");
        // the poke at time zero replaces the initial level
        assert!(deck.contains("\nVa a 0 PWL(0e0 1.8e0)\n"), "{deck}");
        assert!(deck.contains("\nVclk clk 0 PWL(0e0 0e0 5e-9 0e0 "), "{deck}");
        assert!(deck.contains(".meas tran e0 FIND v(xdut.r) AT="), "{deck}");
        assert!(deck.contains(".meas tran o0_3 FIND v(xdut.xsub.probe_3) AT="), "{deck}");
        assert!(deck.contains(".meas tran o0_0 FIND v(xdut.xsub.probe_0) AT="), "{deck}");
        assert!(deck.contains("\n.tran 1e-11 "), "{deck}");
        assert!(deck.trim_end().ends_with(".end"));

        let entry = &artifact.manifest.expects[0];
        assert_eq!(entry.step, 1);
        assert_eq!(entry.threshold, Some(threshold()));
        let time = entry.time.unwrap();
        assert!((time - 15e-9).abs() < 1e-15, "{time}");

        assert_eq!(artifact.commands[0].argv, vec!["ngspice", "-b", DECK_FILE]);
    }

    #[test]
    fn test_compile_failures() {
        let c = counter();
        // digital values need a threshold map
        let err = AnalogBackend::new(AnalogConfig::default(), 0)
            .compile(&c, &example_log(&c))
            .unwrap_err();
        assert!(matches!(err, CompileError::CompileFailure { action: Some(_), .. }), "{err}");

        let mut amp = Circuit::new("amp", "amp");
        amp.add_port(Port::input("vin", ValueKind::Real)).unwrap();
        amp.add_port(Port::output("vout", ValueKind::Real)).unwrap();
        let mut log = ActionLog::new();
        log.append(Action::Expect {
            signal: resolve(&amp, "vout").unwrap(),
            value: Value::real(1.0),
            tolerance: None,
        })
        .unwrap();
        log.finalize();
        let err = AnalogBackend::new(config(), 0).compile(&amp, &log).unwrap_err();
        assert!(err.to_string().contains("explicit tolerance"), "{err}");

        // internal nets are read only
        let mut log = ActionLog::new();
        log.append(Action::Poke {
            signal: resolve(&c, "sub.probe").unwrap(),
            value: Value::bits(1, 4),
        })
        .unwrap();
        log.finalize();
        assert!(AnalogBackend::new(config(), 0).compile(&c, &log).is_err());
    }

    #[test]
    fn test_delay_and_real_sources() {
        let mut amp = Circuit::new("amp", "amp");
        amp.add_port(Port::input("vin", ValueKind::Real)).unwrap();
        amp.add_port(Port::output("vout", ValueKind::Real)).unwrap();
        let vin = resolve(&amp, "vin").unwrap();
        let vout = resolve(&amp, "vout").unwrap();
        let mut log = ActionLog::new();
        log.append(Action::Delay(1e-6)).unwrap();
        log.append(Action::Poke {
            signal: vin,
            value: Value::real(0.5),
        })
        .unwrap();
        log.append(Action::Delay(1e-6)).unwrap();
        log.append(Action::Expect {
            signal: vout.clone(),
            value: Value::real(1.0),
            tolerance: Some(Tolerance::Absolute(0.0)),
        })
        .unwrap();
        log.finalize();
        let b = AnalogBackend::new(AnalogConfig::default(), 0);
        let artifact = b.compile(&amp, &log).unwrap();
        let deck = &artifact.files[DECK_FILE];
        assert!(deck.contains("Vvin vin 0 PWL(0e0 0e0 1e-6 0e0 "), "{deck}");
        assert!(deck.contains(".meas tran e0 FIND v(vout) AT=2e-6"), "{deck}");

        let results = b.interpret(&artifact, &fake_run("e0                  =  1.000000e+00\n")).results;
        assert!(results[0].is_pass());
        let results = b.interpret(&artifact, &fake_run("e0 = 1.1\n")).results;
        assert!(matches!(results[0].outcome, Outcome::Fail { .. }));
    }

    #[test]
    fn test_interpret_thresholds() {
        let c = counter();
        let b = AnalogBackend::new(config(), 0);
        let artifact = b.compile(&c, &example_log(&c)).unwrap();
        let stdout = "Circuit: * deck\n\
                      e0                  =  1.790000e+00\n\
                      o0_3 = 0.0\no0_2 = 1.8\no0_1 = 0.1\no0_0 = 1.7\n";
        let interpretation = b.interpret(&artifact, &fake_run(stdout));
        assert!(interpretation.results[0].is_pass());
        assert_eq!(
            interpretation.observations[0].value,
            Some(Observed::Value(Value::bits(0b0101, 4)))
        );

        let interpretation = b.interpret(&artifact, &fake_run("E0 = 0.9\n"));
        assert_eq!(
            interpretation.results[0].outcome,
            Outcome::Error(ResultError::Indeterminate(0.9))
        );
        // partial bus measurements are missing results
        assert_eq!(interpretation.observations[0].value, None);

        let interpretation = b.interpret(&artifact, &fake_run(""));
        assert_eq!(
            interpretation.results[0].outcome,
            Outcome::Error(ResultError::MissingResult)
        );
    }

    /// Final level of every PWL source in `deck`
    fn driven_levels(deck: &str) -> FxHashMap<String, f64> {
        deck.lines()
            .filter_map(|line| {
                let (node, rest) = line.strip_prefix('V')?.split_once(' ')?;
                let points = rest.split_once("PWL(")?.1.trim_end_matches(')');
                let level = points.split_whitespace().last()?.parse().ok()?;
                Some((node.to_string(), level))
            })
            .collect()
    }

    /// What ngspice prints for the `.meas` lines of `deck` if every node sits at `levels`
    fn measured(deck: &str, levels: &FxHashMap<String, f64>) -> String {
        deck.lines()
            .filter_map(|line| {
                let (name, rest) = line.strip_prefix(".meas tran ")?.split_once(' ')?;
                let node = rest.split_once("v(")?.1.split_once(')')?.0;
                Some(format!("{name} = {:e}\n", levels.get(node)?))
            })
            .collect()
    }

    #[test]
    fn test_poke_peek_round_trip() {
        let mut bus = Circuit::new("bus", "bus");
        bus.add_port(Port::input("d", ValueKind::BitVec(4))).unwrap();
        bus.add_port(Port::input("en", ValueKind::Bit)).unwrap();
        bus.add_port(Port::output("q", ValueKind::BitVec(4))).unwrap();
        let d = resolve(&bus, "d").unwrap();
        let en = resolve(&bus, "en").unwrap();
        let mut log = ActionLog::new();
        for (signal, value) in [(&d, Value::bits(0b1010, 4)), (&en, Value::bit(true))] {
            log.append(Action::Poke {
                signal: signal.clone(),
                value: value.clone(),
            })
            .unwrap();
            log.append(Action::Eval).unwrap();
            log.append(Action::Peek(signal.clone())).unwrap();
            log.append(Action::Expect {
                signal: signal.clone(),
                value,
                tolerance: None,
            })
            .unwrap();
        }
        log.finalize();

        let b = AnalogBackend::new(config(), 0);
        let artifact = b.compile(&bus, &log).unwrap();
        let deck = &artifact.files[DECK_FILE];
        let mut levels = driven_levels(deck);
        assert_eq!(levels["d_3"], 1.8);
        assert_eq!(levels["d_0"], 0.0);

        let interpretation = b.interpret(&artifact, &fake_run(&measured(deck, &levels)));
        assert!(interpretation.results.iter().all(|r| r.is_pass()));
        assert_eq!(
            interpretation.observations[0].value,
            Some(Observed::Value(Value::bits(0b1010, 4)))
        );
        assert_eq!(
            interpretation.observations[1].value,
            Some(Observed::Value(Value::bit(true)))
        );

        // anything above vih still reads as a one
        levels.insert("en".to_string(), 1.5);
        let interpretation = b.interpret(&artifact, &fake_run(&measured(deck, &levels)));
        assert!(interpretation.results[1].is_pass());

        levels.insert("en".to_string(), 0.9);
        let interpretation = b.interpret(&artifact, &fake_run(&measured(deck, &levels)));
        assert!(interpretation.results[0].is_pass());
        assert_eq!(
            interpretation.results[1].outcome,
            Outcome::Error(ResultError::Indeterminate(0.9))
        );
        assert_eq!(
            interpretation.observations[1].value,
            Some(Observed::Unknown("0.9V".to_string()))
        );
    }

    #[test]
    fn test_check_convergence() {
        let b = AnalogBackend::new(config(), 0);
        let ok = fake_run("e0 = 1.0\n");
        assert_eq!(b.check_convergence(Ok(ok.clone())).unwrap(), ok);

        let stuck = fake_run("doAnalyses: TRAN:  Timestep too small; time = 1e-9\n");
        assert!(matches!(
            b.check_convergence(Ok(stuck)),
            Err(ExecutionError::NonConvergence(line)) if line.starts_with("doAnalyses")
        ));

        let crashed = ExecutionError::Crashed {
            command: "ngspice".to_string(),
            status: "exit status: 1".to_string(),
            stdout: String::new(),
            stderr: "Error: singular matrix: check node x".to_string(),
        };
        assert!(matches!(
            b.check_convergence(Err(crashed)),
            Err(ExecutionError::NonConvergence(_))
        ));
        assert!(matches!(
            b.check_convergence(Err(ExecutionError::Cancelled)),
            Err(ExecutionError::Cancelled)
        ));
    }

    #[test]
    fn test_run_with_fake_simulator() {
        let c = counter();
        let mut config = Config::default();
        config.analog.threshold = Some(threshold());
        config.analog.commands = vec![vec![
            "sh".to_string(),
            "-c".to_string(),
            "grep -q 'FIND v(xdut.r)' {deck} && echo 'e0 = 1.8'".to_string(),
        ]];
        let backend = Backend::new(BackendKind::Analog, &config);
        let mut log = ActionLog::new();
        log.append(Action::Expect {
            signal: resolve(&c, "r").unwrap(),
            value: Value::bit(true),
            tolerance: None,
        })
        .unwrap();
        log.finalize();
        let artifact = backend.compile(&c, &log).unwrap();
        let raw = backend
            .run(&artifact, &RunSettings::from_config(&config), &Budget::new(Duration::from_secs(10)))
            .unwrap();
        assert!(backend.interpret(&artifact, &raw).results[0].is_pass());
    }
}
