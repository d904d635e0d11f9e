// Copyright 2026 Cornell University
// released under MIT License

//! # Digital simulator backend
//! Lowers an action log into a SystemVerilog testbench that instantiates the
//! circuit as `dut` and reports every sample as a tagged `$display` line.

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
use crate::circuit::{Circuit, Dir, ElementClass};
use crate::config::{DigitalConfig, Simulator};
use crate::errors::CompileError;
use crate::process::Invocation;
use crate::report::Interpretation;
use crate::serialize::serialize_action;
use crate::signal::SignalRef;
use crate::value::{Value, ValueKind};

const TESTBENCH: &str = "stimulus_tb";
const TESTBENCH_FILE: &str = "stimulus_tb.sv";
const DUT: &str = "dut";

#[derive(Debug, Clone, PartialEq)]
pub struct DigitalBackend {
    config: DigitalConfig,
    seed: u64,
}

fn failure(action: Option<ActionIdx>, reason: impl Into<String>) -> CompileError {
    CompileError::CompileFailure {
        backend: BackendKind::Digital,
        action,
        reason: reason.into(),
    }
}

impl DigitalBackend {
    pub fn new(config: DigitalConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    fn simulator_name(&self) -> &'static str {
        match self.config.simulator {
            Simulator::Icarus => "iverilog",
            Simulator::Verilator => "verilator",
            Simulator::Custom => "the custom simulator",
        }
    }

    /// Rejects what a simulator cannot express before any text is generated
    fn check(&self, log: &ActionLog) -> Result<(), CompileError> {
        for (idx, action) in log.iter() {
            if !self.config.supports_probes() {
                if let Some(signal) = action.signals().into_iter().find(|s| s.is_internal()) {
                    return Err(CompileError::ProbeUnsupported {
                        backend: BackendKind::Digital,
                        action: idx,
                        signal: signal.hier_name(),
                        simulator: self.simulator_name().to_string(),
                    });
                }
            }
            match action {
                Action::Poke {
                    value: Value::Symbolic(name),
                    ..
                }
                | Action::Expect {
                    value: Value::Symbolic(name),
                    ..
                } => {
                    return Err(failure(
                        Some(idx),
                        format!("symbolic value `{name}` requires the symbolic backend"),
                    ))
                }
                Action::Delay(_) => {
                    return Err(failure(
                        Some(idx),
                        "delays are only supported by the analog backend",
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn compile(&self, circuit: &Circuit, log: &ActionLog) -> Result<BackendArtifact, CompileError> {
        self.check(log)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out = Vec::new();
        let manifest = to_testbench(circuit, log, &self.config, &mut rng, &mut out)
            .map_err(|e| failure(None, format!("failed to generate testbench: {e}")))?;
        let testbench = String::from_utf8(out)
            .map_err(|e| failure(None, format!("testbench is not valid UTF-8: {e}")))?;
        let mut files = BTreeMap::new();
        files.insert(TESTBENCH_FILE.to_string(), testbench);
        Ok(BackendArtifact {
            backend: BackendKind::Digital,
            files,
            commands: self.commands(circuit),
            outputs: vec![],
            manifest,
        })
    }

    fn commands(&self, circuit: &Circuit) -> Vec<Invocation> {
        let sources = source_paths(circuit);
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match self.config.simulator {
            Simulator::Icarus => {
                let mut compile = argv(&["iverilog", "-g2012", "-o", "stimulus_tb.vvp", "-s", TESTBENCH]);
                compile.extend(self.config.flags.iter().cloned());
                compile.extend(sources);
                compile.push(TESTBENCH_FILE.to_string());
                vec![
                    Invocation::new(compile),
                    Invocation::new(argv(&["vvp", "-n", "stimulus_tb.vvp"])),
                ]
            }
            Simulator::Verilator => {
                let mut compile = argv(&[
                    "verilator",
                    "--binary",
                    "--timing",
                    "-Wno-fatal",
                    "--top-module",
                    TESTBENCH,
                    "-o",
                    TESTBENCH,
                ]);
                compile.extend(self.config.flags.iter().cloned());
                compile.extend(sources);
                compile.push(TESTBENCH_FILE.to_string());
                vec![
                    Invocation::new(compile),
                    Invocation::new(argv(&["./obj_dir/stimulus_tb"])),
                ]
            }
            Simulator::Custom => {
                let vars = [
                    ("sources", sources),
                    ("testbench", vec![TESTBENCH_FILE.to_string()]),
                    ("top", vec![TESTBENCH.to_string()]),
                    ("flags", self.config.flags.clone()),
                ];
                self.config
                    .commands
                    .iter()
                    .map(|template| Invocation::new(expand_template(template, &vars)))
                    .collect()
            }
        }
    }

    pub fn interpret(&self, artifact: &BackendArtifact, raw: &RawResults) -> Interpretation {
        let samples = parse_samples(raw);
        let manifest = &artifact.manifest;
        let lookup = |tag: String, kind: ValueKind| samples.get(&tag).map(|text| decode(text, kind));
        Interpretation {
            results: manifest
                .expects
                .iter()
                .map(|e| {
                    let s = lookup(format!("e{}", e.index), e.signal.kind);
                    judge(e, BackendKind::Digital, s)
                })
                .collect(),
            observations: manifest
                .observations
                .iter()
                .enumerate()
                .map(|(i, o)| observation(o, lookup(format!("o{i}"), o.signal.kind)))
                .collect(),
        }
    }
}

/// Collects `@<tag> <value>` lines. A later line with the same tag wins.
fn parse_samples(raw: &RawResults) -> FxHashMap<String, String> {
    let mut samples = FxHashMap::default();
    for line in raw.stdout_lines() {
        if let Some((tag, value)) = line.trim().strip_prefix('@').and_then(|l| l.split_once(' ')) {
            samples.insert(tag.to_string(), value.trim().to_string());
        }
    }
    samples
}

fn decode(text: &str, kind: ValueKind) -> Sample {
    match kind {
        ValueKind::Real => match text.parse::<f64>() {
            Ok(v) => Sample::Value(Value::Real(v)),
            Err(_) => Sample::Unknown(text.to_string()),
        },
        _ => decode_bits(&text.to_ascii_lowercase(), kind),
    }
}

fn decl_range(kind: ValueKind) -> String {
    match kind {
        ValueKind::Bit | ValueKind::Real => String::new(),
        ValueKind::BitVec(w) | ValueKind::Fixed { width: w, .. } => format!("[{}:0] ", w - 1),
    }
}

fn declaration(net: &str, kind: ValueKind) -> String {
    match kind {
        ValueKind::Real => "real".to_string(),
        _ => format!("{net} {}", decl_range(kind)).trim_end().to_string(),
    }
}

/// Verilog literal for a concrete value
fn literal(value: &Value) -> String {
    match value {
        Value::Bit(b) => format!("1'b{}", *b as u8),
        Value::Real(r) => format!("{r:?}"),
        other => match other.to_bits() {
            Some(bits) => format!("{}'h{}", bits.width(), bits.to_hex_str()),
            None => "'x".to_string(),
        },
    }
}

/// How the testbench refers to `signal`
fn reference(signal: &SignalRef) -> String {
    if signal.is_internal() {
        format!("{DUT}.{}", signal.hier_name())
    } else {
        signal.name.clone()
    }
}

fn inout_driver(name: &str) -> String {
    format!("{name}__drive")
}

fn display_format(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Real => "%.17g",
        _ => "%b",
    }
}

/// Settles pending pokes, then displays `signal` under `tag`
fn sample(out: &mut impl Write, tag: &str, signal: &SignalRef, dirty: &mut bool) -> std::io::Result<()> {
    if *dirty {
        writeln!(out, "    #1;")?;
        *dirty = false;
    }
    writeln!(
        out,
        "    $display(\"@{tag} {}\", {});",
        display_format(signal.kind),
        reference(signal)
    )
}

/// Writes the testbench for `log` into `out` and returns the matching manifest.
/// A poke on an internal net forces it through the next rising clock edge,
/// after which the net is released to the design again.
pub fn to_testbench(
    circuit: &Circuit,
    log: &ActionLog,
    config: &DigitalConfig,
    rng: &mut StdRng,
    out: &mut impl Write,
) -> std::io::Result<Manifest> {
    let mut manifest = Manifest::default();
    let half_period = config.clock_period / 2;

    writeln!(out, "// Testbench generated by stimulus")?;
    writeln!(out, "`timescale {}", config.timescale)?;
    writeln!(out, "module {TESTBENCH};")?;

    writeln!(out, "  // ports of {}", circuit.module)?;
    for port in circuit.ports() {
        let name = &port.name;
        match port.dir {
            Dir::In if port.clock => writeln!(out, "  reg {name} = 1'b0;")?,
            Dir::In => writeln!(out, "  {} {name};", declaration("reg", port.kind))?,
            Dir::Out => writeln!(out, "  {} {name};", declaration("wire", port.kind))?,
            Dir::InOut => {
                writeln!(out, "  {} {name};", declaration("wire", port.kind))?;
                writeln!(out, "  {} {};", declaration("reg", port.kind), inout_driver(name))?;
                writeln!(out, "  assign {name} = {};", inout_driver(name))?;
            }
        }
    }
    writeln!(out)?;

    let connections = circuit
        .ports()
        .iter()
        .map(|p| format!("    .{0}({0})", p.name))
        .collect::<Vec<_>>()
        .join(",\n");
    writeln!(out, "  {} {DUT} (\n{connections}\n  );", circuit.module)?;
    writeln!(out)?;

    writeln!(out, "  initial begin")?;
    if let Some(filename) = &config.waveform {
        writeln!(out, "    $dumpfile(\"{filename}\");")?;
        writeln!(out, "    $dumpvars(0, {TESTBENCH});")?;
    }

    let mut steps: u64 = 0;
    let mut dirty = false;
    let mut forced: Vec<String> = vec![];
    for (idx, action) in log.iter() {
        writeln!(out, "    // {idx}: {}", serialize_action(action).replace('\n', " "))?;
        match action {
            Action::Poke { signal, value } => {
                let value = value.or_random(signal.kind, rng);
                let lit = literal(&value);
                match signal.class {
                    ElementClass::Port(Dir::InOut) => {
                        writeln!(out, "    {} = {lit};", inout_driver(&signal.name))?
                    }
                    ElementClass::Net => {
                        let net = reference(signal);
                        writeln!(out, "    force {net} = {lit};")?;
                        if !forced.contains(&net) {
                            forced.push(net);
                        }
                    }
                    _ => writeln!(out, "    {} = {lit};", reference(signal))?,
                }
                dirty = true;
            }
            Action::Eval => {
                writeln!(out, "    #1;")?;
                dirty = false;
            }
            Action::Step { clock, count } => {
                if dirty {
                    writeln!(out, "    #1;")?;
                    dirty = false;
                }
                let clk = reference(clock);
                let mut remaining = *count;
                if !forced.is_empty() {
                    let releases: String = forced.drain(..).map(|n| format!(" release {n};")).collect();
                    writeln!(
                        out,
                        "    {clk} = 1'b1; #{half_period};{releases} {clk} = 1'b0; #{half_period};"
                    )?;
                    remaining -= 1;
                }
                if remaining > 0 {
                    writeln!(
                        out,
                        "    repeat ({remaining}) begin {clk} = 1'b1; #{half_period}; {clk} = 1'b0; #{half_period}; end"
                    )?;
                }
                steps += *count as u64;
            }
            Action::Expect {
                signal,
                value,
                tolerance,
            } => {
                let index = manifest.expect(idx, signal, value, *tolerance, steps).index;
                sample(out, &format!("e{index}"), signal, &mut dirty)?;
            }
            Action::Peek(signal) => {
                let index = manifest.observations.len();
                manifest.observe(idx, 0, signal, steps);
                sample(out, &format!("o{index}"), signal, &mut dirty)?;
            }
            Action::Print { signals, .. } | Action::WriteVector { signals, .. } => {
                for (slot, signal) in signals.iter().enumerate() {
                    let index = manifest.observations.len();
                    manifest.observe(idx, slot, signal, steps);
                    sample(out, &format!("o{index}"), signal, &mut dirty)?;
                }
            }
            // rejected by `check`
            Action::Delay(_) => {}
        }
    }
    writeln!(out, "    $finish;")?;
    writeln!(out, "  end")?;
    writeln!(out, "endmodule")?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, RunSettings};
    use crate::circuit::tests::counter;
    use crate::circuit::{Port, Signal};
    use crate::config::Config;
    use crate::process::{Budget, ProcessOutput};
    use crate::report::{Observed, Outcome};
    use crate::signal::resolve;
    use std::time::Duration;

    /// poke a 1, step clk, expect r 1
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
        log.finalize();
        log
    }

    fn backend(config: DigitalConfig) -> DigitalBackend {
        DigitalBackend::new(config, 0)
    }

    fn fake_run(stdout: &str) -> RawResults {
        RawResults {
            outputs: vec![ProcessOutput {
                command: "vvp".to_string(),
                exit_code: Some(0),
                stdout: stdout.to_string(),
                ..Default::default()
            }],
            files: BTreeMap::new(),
        }
    }

    #[test]
    fn test_testbench_contents() {
        let c = counter();
        let artifact = backend(DigitalConfig::default()).compile(&c, &example_log(&c)).unwrap();
        let tb = &artifact.files[TESTBENCH_FILE];
        assert!(tb.contains("module stimulus_tb;"), "{tb}");
        assert!(tb.contains("  reg clk = 1'b0;"), "{tb}");
        assert!(tb.contains("  reg a;"), "{tb}");
        assert!(tb.contains("  wire out;"), "{tb}");
        assert!(tb.contains("  counter dut (\n    .a(a),\n    .clk(clk),\n    .out(out)\n  );"), "{tb}");
        assert!(tb.contains("    a = 1'b1;\n"), "{tb}");
        // pending poke settles before the clock edge
        assert!(
            tb.contains("    #1;\n    repeat (1) begin clk = 1'b1; #5; clk = 1'b0; #5; end\n"),
            "{tb}"
        );
        assert!(tb.contains("$display(\"@e0 %b\", dut.r);"), "{tb}");
        assert!(tb.trim_end().ends_with("endmodule"));

        assert_eq!(artifact.commands.len(), 2);
        assert_eq!(artifact.commands[0].argv[0], "iverilog");
        assert!(artifact.commands[0].argv.iter().any(|a| a.ends_with("counter.v")));
        assert_eq!(artifact.commands[1].argv, vec!["vvp", "-n", "stimulus_tb.vvp"]);

        let entry = &artifact.manifest.expects[0];
        assert_eq!(entry.step, 1);
        assert_eq!(entry.signal.name, "r");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let c = counter();
        let mut log = ActionLog::new();
        let a = resolve(&c, "a").unwrap();
        log.append(Action::Poke {
            signal: a.clone(),
            value: Value::DontCare,
        })
        .unwrap();
        log.append(Action::Peek(a)).unwrap();
        log.finalize();
        let b = backend(DigitalConfig::default());
        assert_eq!(b.compile(&c, &log).unwrap(), b.compile(&c, &log).unwrap());
    }

    #[test]
    fn test_internal_signals() {
        let c = counter();
        let mut log = ActionLog::new();
        let probe = resolve(&c, "sub.probe").unwrap();
        let r = resolve(&c, "r").unwrap();
        log.append(Action::Poke {
            signal: probe.clone(),
            value: Value::bits(3, 4),
        })
        .unwrap();
        log.append(Action::Poke {
            signal: r,
            value: Value::bit(false),
        })
        .unwrap();
        log.append(Action::Peek(probe)).unwrap();
        log.finalize();

        let tb = backend(DigitalConfig::default()).compile(&c, &log).unwrap().files[TESTBENCH_FILE].clone();
        assert!(tb.contains("    force dut.sub.probe = 4'h3;"), "{tb}");
        assert!(tb.contains("    dut.r = 1'b0;"), "{tb}");
        assert!(tb.contains("    #1;\n    $display(\"@o0 %b\", dut.sub.probe);"), "{tb}");
        // nothing steps the clock, so the force is never lifted
        assert!(!tb.contains("release"), "{tb}");

        let verilator = DigitalConfig {
            simulator: Simulator::Verilator,
            ..Default::default()
        };
        let err = backend(verilator).compile(&c, &log).unwrap_err();
        assert!(matches!(err, CompileError::ProbeUnsupported { .. }), "{err}");

        let verilator_with_probes = DigitalConfig {
            simulator: Simulator::Verilator,
            probes: Some(true),
            ..Default::default()
        };
        assert!(backend(verilator_with_probes).compile(&c, &log).is_ok());
    }

    #[test]
    fn test_forced_nets_are_released_after_an_edge() {
        let c = counter();
        let probe = resolve(&c, "sub.probe").unwrap();
        let clk = resolve(&c, "clk").unwrap();
        let mut log = ActionLog::new();
        for value in [3, 5] {
            log.append(Action::Poke {
                signal: probe.clone(),
                value: Value::bits(value, 4),
            })
            .unwrap();
        }
        log.append(Action::Step {
            clock: clk.clone(),
            count: 3,
        })
        .unwrap();
        log.append(Action::Step { clock: clk, count: 1 }).unwrap();
        log.append(Action::Peek(probe)).unwrap();
        log.finalize();

        let tb = backend(DigitalConfig::default()).compile(&c, &log).unwrap().files[TESTBENCH_FILE].clone();
        assert!(tb.contains("    force dut.sub.probe = 4'h5;"), "{tb}");
        assert_eq!(tb.matches("release").count(), 1, "{tb}");
        assert!(
            tb.contains(
                "    #1;\n    clk = 1'b1; #5; release dut.sub.probe; clk = 1'b0; #5;\n    \
                 repeat (2) begin clk = 1'b1; #5; clk = 1'b0; #5; end\n"
            ),
            "{tb}"
        );
        assert!(tb.contains("    repeat (1) begin clk = 1'b1; #5;"), "{tb}");
    }

    #[test]
    fn test_reject_symbolic_and_delay() {
        let c = counter();
        let mut log = ActionLog::new();
        log.append(Action::Poke {
            signal: resolve(&c, "a").unwrap(),
            value: Value::symbolic("x"),
        })
        .unwrap();
        log.finalize();
        let err = backend(DigitalConfig::default()).compile(&c, &log).unwrap_err();
        assert!(matches!(err, CompileError::CompileFailure { action: Some(_), .. }));

        let mut log = ActionLog::new();
        log.append(Action::Delay(1e-9)).unwrap();
        log.finalize();
        assert!(backend(DigitalConfig::default()).compile(&c, &log).is_err());
    }

    #[test]
    fn test_interpret() {
        let c = counter();
        let mut log = ActionLog::new();
        let probe = resolve(&c, "sub.probe").unwrap();
        log.append(Action::Expect {
            signal: resolve(&c, "r").unwrap(),
            value: Value::bit(true),
            tolerance: None,
        })
        .unwrap();
        log.append(Action::Expect {
            signal: probe.clone(),
            value: Value::bits(5, 4),
            tolerance: None,
        })
        .unwrap();
        log.append(Action::Expect {
            signal: probe.clone(),
            value: Value::bits(5, 4),
            tolerance: None,
        })
        .unwrap();
        log.append(Action::Print {
            format: "{}".to_string(),
            signals: vec![probe],
        })
        .unwrap();
        log.finalize();
        let b = backend(DigitalConfig::default());
        let artifact = b.compile(&c, &log).unwrap();
        let interpretation = b.interpret(&artifact, &fake_run("VCD info\n@e0 1\n@e1 01x1\n@o0 0101\n"));
        let outcomes: Vec<_> = interpretation.results.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(outcomes[0], Outcome::Pass);
        assert!(matches!(&outcomes[1], Outcome::Fail { actual: Observed::Unknown(raw), .. } if raw == "01x1"));
        assert!(matches!(outcomes[2], Outcome::Error(_)));
        assert_eq!(
            interpretation.observations[0].value,
            Some(Observed::Value(Value::bits(5, 4)))
        );
    }

    #[test]
    fn test_real_and_inout_ports() {
        let mut c = Circuit::new("amp", "amp");
        c.add_port(Port::input("gain", ValueKind::Real)).unwrap();
        c.add_port(Port {
            name: "bus".to_string(),
            dir: Dir::InOut,
            kind: ValueKind::BitVec(8),
            clock: false,
        })
        .unwrap();
        let top = c.top();
        c.add_signal(top, Signal::net("level", ValueKind::Fixed { width: 8, frac: 4 }).introspectable())
            .unwrap();
        let mut log = ActionLog::new();
        log.append(Action::Poke {
            signal: resolve(&c, "gain").unwrap(),
            value: Value::real(1.5),
        })
        .unwrap();
        log.append(Action::Poke {
            signal: resolve(&c, "bus").unwrap(),
            value: Value::bits(0xa5, 8),
        })
        .unwrap();
        log.append(Action::Peek(resolve(&c, "gain").unwrap())).unwrap();
        log.append(Action::Peek(resolve(&c, "level").unwrap())).unwrap();
        log.finalize();
        let b = backend(DigitalConfig::default());
        let artifact = b.compile(&c, &log).unwrap();
        let tb = &artifact.files[TESTBENCH_FILE];
        assert!(tb.contains("  real gain;"), "{tb}");
        assert!(tb.contains("  wire [7:0] bus;\n  reg [7:0] bus__drive;\n  assign bus = bus__drive;"), "{tb}");
        assert!(tb.contains("    gain = 1.5;"), "{tb}");
        assert!(tb.contains("    bus__drive = 8'ha5;"), "{tb}");
        assert!(tb.contains("$display(\"@o0 %.17g\", gain);"), "{tb}");

        let interpretation = b.interpret(&artifact, &fake_run("@o0 1.5\n@o1 11111000\n"));
        assert_eq!(interpretation.observations[0].value, Some(Observed::Value(Value::real(1.5))));
        match &interpretation.observations[1].value {
            Some(Observed::Value(v)) => assert_eq!(v.as_f64(), Some(-0.5)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_run_with_custom_simulator() {
        let c = counter();
        let mut config = Config::default();
        config.digital.simulator = Simulator::Custom;
        config.digital.commands = vec![vec![
            "sh".to_string(),
            "-c".to_string(),
            "test -f {testbench} && echo '@e0 1'".to_string(),
        ]];
        let backend = Backend::new(BackendKind::Digital, &config);
        let artifact = backend.compile(&c, &example_log(&c)).unwrap();
        let raw = backend
            .run(&artifact, &RunSettings::from_config(&config), &Budget::new(Duration::from_secs(10)))
            .unwrap();
        let interpretation = backend.interpret(&artifact, &raw);
        assert_eq!(interpretation.results.len(), 1);
        assert!(interpretation.results[0].is_pass());
    }

    /// Needs Icarus Verilog on the path
    #[test]
    #[ignore]
    fn test_icarus_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("counter.v");
        std::fs::write(
            &source,
            "module counter(input a, input clk, output out);\n\
             reg r = 1'b0;\n\
             always @(posedge clk) r <= a;\n\
             assign out = r;\n\
             child sub(.d(4'b0));\n\
             endmodule\n\
             module child(input [3:0] d);\n\
             wire [3:0] hidden = d;\n\
             wire [3:0] probe = ~d;\n\
             endmodule\n",
        )
        .unwrap();
        let mut c = counter();
        c.sources = vec![source];
        let backend = Backend::new(BackendKind::Digital, &Config::default());

        let artifact = backend.compile(&c, &example_log(&c)).unwrap();
        let raw = backend
            .run(&artifact, &RunSettings::default(), &Budget::new(Duration::from_secs(60)))
            .unwrap();
        let results = backend.interpret(&artifact, &raw).results;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_pass(), "{}", results[0]);

        // poke followed by peek reads back the poked value
        let mut log = ActionLog::new();
        let a = resolve(&c, "a").unwrap();
        log.append(Action::Poke {
            signal: a.clone(),
            value: Value::bit(true),
        })
        .unwrap();
        let peek = log.append(Action::Peek(a)).unwrap();
        log.finalize();
        let artifact = backend.compile(&c, &log).unwrap();
        let raw = backend
            .run(&artifact, &RunSettings::default(), &Budget::new(Duration::from_secs(60)))
            .unwrap();
        let observations = backend.interpret(&artifact, &raw).observations;
        assert_eq!(observations[0].action, peek);
        assert_eq!(observations[0].value, Some(Observed::Value(Value::bit(true))));
    }
}
