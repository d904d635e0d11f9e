// Copyright 2026 Cornell University
// released under MIT License

use baa::{BitVecOps, BitVecValue};
use std::fmt;
use std::io::Write;

use crate::action::{Action, ActionIdx, ActionLog};
use crate::backend::BackendKind;
use crate::circuit::Dir;
use crate::relation::{Expr, ExprId, TransitionSystem};
use crate::report::{Observed, Outcome, ResultError, SessionReport, TestResult};
use crate::value::{Tolerance, Value, ValueKind};

/// Renders a bit-vector as a sized hexadecimal literal, e.g. `8'hff`
pub fn serialize_bitvec(bv: &BitVecValue) -> String {
    format!("{}'h{}", bv.width(), bv.to_hex_str())
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bit => write!(f, "bit"),
            ValueKind::BitVec(w) => write!(f, "bits<{w}>"),
            ValueKind::Fixed { width, frac } => write!(f, "fixed<{width}, {frac}>"),
            ValueKind::Real => write!(f, "real"),
        }
    }
}

/// Values are printed in the syntax of the stimulus script
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bit(b) => write!(f, "1'b{}", *b as u8),
            Value::BitVec(bv) => write!(f, "{}", serialize_bitvec(bv)),
            Value::Fixed(fixed) => write!(f, "{}", fixed.to_f64()),
            Value::Real(r) => write!(f, "{r}"),
            Value::Symbolic(name) => write!(f, "sym({name})"),
            Value::DontCare => write!(f, "_"),
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tolerance::Absolute(t) => write!(f, "{t}"),
            Tolerance::Relative(r) => write!(f, "{}%", r * 100.0),
        }
    }
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dir::In => write!(f, "in"),
            Dir::Out => write!(f, "out"),
            Dir::InOut => write!(f, "inout"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Digital => write!(f, "digital"),
            BackendKind::Analog => write!(f, "analog"),
            BackendKind::Symbolic => write!(f, "symbolic"),
        }
    }
}

impl fmt::Display for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observed::Value(v) => write!(f, "{v}"),
            Observed::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultError::SolverUnknown(reason) => write!(f, "solver could not decide: {reason}"),
            ResultError::MissingResult => write!(f, "no result was reported"),
            ResultError::Indeterminate(v) => {
                write!(f, "{v}V lies between the logic thresholds")
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail {
                expected,
                actual,
                step,
                counterexample,
            } => {
                write!(f, "expected {expected}, got {actual} after {step} step(s)")?;
                if !counterexample.is_empty() {
                    let model = counterexample
                        .iter()
                        .map(|(name, value)| format!("{name} = {value}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, " with [{model}]")?;
                }
                Ok(())
            }
            Outcome::Error(e) => write!(f, "error: {e}"),
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} expect {}: {}",
            self.locator.backend, self.locator.action, self.locator.signal, self.outcome
        )
    }
}

/// Pretty-prints an expression of a transition relation in the syntax the
/// expression parser accepts
pub fn serialize_expr(ts: &TransitionSystem, expr: ExprId) -> String {
    let bin = |op: &str, a: &ExprId, b: &ExprId| {
        format!("({} {op} {})", serialize_expr(ts, *a), serialize_expr(ts, *b))
    };
    match &ts[expr] {
        Expr::Const(v) => serialize_bitvec(v),
        Expr::Signal(name) => name.clone(),
        Expr::Not(e) => format!("~{}", serialize_expr(ts, *e)),
        Expr::And(a, b) => bin("&", a, b),
        Expr::Or(a, b) => bin("|", a, b),
        Expr::Xor(a, b) => bin("^", a, b),
        Expr::Add(a, b) => bin("+", a, b),
        Expr::Sub(a, b) => bin("-", a, b),
        Expr::Eq(a, b) => bin("==", a, b),
        Expr::Ult(a, b) => bin("<", a, b),
        Expr::Mux(c, t, e) => format!(
            "mux({}, {}, {})",
            serialize_expr(ts, *c),
            serialize_expr(ts, *t),
            serialize_expr(ts, *e)
        ),
        Expr::Slice(e, hi, lo) => format!("{}[{hi}:{lo}]", serialize_expr(ts, *e)),
        Expr::Concat(a, b) => format!(
            "{{{}, {}}}",
            serialize_expr(ts, *a),
            serialize_expr(ts, *b)
        ),
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn signal_list(signals: &[crate::signal::SignalRef]) -> String {
    signals
        .iter()
        .map(|s| s.hier_name())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pretty-prints a single action as one line of a stimulus script
pub fn serialize_action(action: &Action) -> String {
    match action {
        Action::Poke { signal, value } => format!("poke {signal} {value}"),
        Action::Expect {
            signal,
            value,
            tolerance,
        } => match tolerance {
            Some(tol) => format!("expect {signal} {value} within {tol}"),
            None => format!("expect {signal} {value}"),
        },
        Action::Step { clock, count: 1 } => format!("step {clock}"),
        Action::Step { clock, count } => format!("step {clock} {count}"),
        Action::Peek(signal) => format!("peek {signal}"),
        Action::Print { format, signals } if signals.is_empty() => {
            format!("print {}", quote(format))
        }
        Action::Print { format, signals } => {
            format!("print {} {}", quote(format), signal_list(signals))
        }
        Action::Eval => "eval".to_string(),
        Action::Delay(seconds) => format!("delay {seconds:e}"),
        Action::WriteVector { file, signals } => format!(
            "dump {} {}",
            quote(&file.display().to_string()),
            signal_list(signals)
        ),
    }
}

/// Serializes `log` as a script. Returns the byte range of every action so
/// that diagnostics can point into the text even if the log was built
/// through the API.
pub fn serialize_log(
    out: &mut impl Write,
    log: &ActionLog,
) -> std::io::Result<Vec<(ActionIdx, usize, usize)>> {
    let mut spans = Vec::with_capacity(log.len());
    let mut offset = 0;
    for (idx, action) in log.iter() {
        let line = serialize_action(action);
        writeln!(out, "{line}")?;
        spans.push((idx, offset, offset + line.len()));
        offset += line.len() + 1;
    }
    Ok(spans)
}

pub fn serialize_to_string(log: &ActionLog) -> std::io::Result<String> {
    let mut out = Vec::new();
    serialize_log(&mut out, log)?;
    Ok(String::from_utf8_lossy(&out).to_string())
}

/// Fills the `{}` placeholders of a print format in order
pub fn render_print(format: &str, values: &[Option<Observed>]) -> String {
    let mut out = String::new();
    let mut values = values.iter();
    let mut parts = format.split("{}").peekable();
    while let Some(part) = parts.next() {
        out.push_str(part);
        if parts.peek().is_some() {
            match values.next() {
                Some(Some(v)) => out.push_str(&v.to_string()),
                _ => out.push('?'),
            }
        }
    }
    out
}

/// Writes one line per result followed by the rendered prints and the verdict
pub fn serialize_report(out: &mut impl Write, report: &SessionReport) -> std::io::Result<()> {
    for line in &report.prints {
        writeln!(out, "{line}")?;
    }
    for result in &report.results {
        writeln!(out, "{result}")?;
    }
    writeln!(
        out,
        "{}: {} of {} expectation(s) passed on the {} backend",
        report.verdict(),
        report.results.iter().filter(|r| r.is_pass()).count(),
        report.results.len(),
        report.backend
    )
}
