// Copyright 2026 Cornell University
// released under MIT License

//! # Symbolic backend
//! Unrolls the transition relation of a circuit along the action log and turns
//! every expectation into an SMT-LIB query that is satisfiable iff the
//! expectation can be violated. Each query lives in its own file and is
//! answered by its own solver process.

use baa::{BitVecOps, BitVecValue};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

use super::{observation, BackendArtifact, BackendKind, ExpectEntry, RawResults, Sample};
use crate::action::{Action, ActionIdx, ActionLog};
use crate::circuit::{sort_of_kind, Circuit, ElementClass};
use crate::config::SymbolicConfig;
use crate::errors::CompileError;
use crate::process::{Invocation, ProcessOutput};
use crate::relation::{Expr, ExprId, Sort, TransitionSystem};
use crate::report::{Interpretation, Locator, Observed, Outcome, ResultError, TestResult};
use crate::serialize::serialize_action;
use crate::signal::SignalRef;
use crate::value::{bits_from_u128, Tolerance, Value, ValueKind};

#[derive(Parser)]
#[grammar = "smtlib.pest"]
struct SmtLibParser;

/// Name under which every query defines the sampled signal
const ACTUAL: &str = "actual";

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicBackend {
    config: SymbolicConfig,
}

fn failure(action: Option<ActionIdx>, reason: impl Into<String>) -> CompileError {
    CompileError::CompileFailure {
        backend: BackendKind::Symbolic,
        action,
        reason: reason.into(),
    }
}

fn quote(name: &str) -> String {
    format!("|{name}|")
}

fn smt_sort(sort: Sort) -> String {
    match sort {
        Sort::BitVec(w) => format!("(_ BitVec {w})"),
        Sort::Real => "Real".to_string(),
    }
}

fn bv_literal(bits: &BitVecValue) -> String {
    format!("#b{}", bits.to_bit_str())
}

/// `width`-bit two's complement constant
fn signed_literal(value: i64, width: u32) -> String {
    let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    bv_literal(&BitVecValue::from_u64(value as u64 & mask, width))
}

fn real_literal(value: f64) -> Result<String, String> {
    if !value.is_finite() {
        return Err(format!("{value} cannot be represented in SMT-LIB"));
    }
    let mut digits = format!("{}", value.abs());
    if !digits.contains('.') {
        digits.push_str(".0");
    }
    if value < 0.0 {
        Ok(format!("(- {digits})"))
    } else {
        Ok(digits)
    }
}

/// One query file, assembled once the whole log has been lowered
#[derive(Debug)]
struct Query {
    file: String,
    comment: String,
    /// Length of the shared prelude the query sees
    prelude: usize,
    body: Vec<String>,
}

/// Symbolic state while walking the log
struct Unroller<'a> {
    circuit: &'a Circuit,
    ts: &'a TransitionSystem,
    steps: u64,
    /// Current term of every register
    state: FxHashMap<String, String>,
    /// Held input values and forced nets
    driven: FxHashMap<String, String>,
    /// Free variables in declaration order
    vars: Vec<String>,
    var_names: FxHashSet<String>,
    symbols: FxHashMap<String, ValueKind>,
    /// Declarations and definitions shared by all later queries
    prelude: Vec<String>,
    uses_reals: bool,
    cache: FxHashMap<ExprId, String>,
    queries: Vec<Query>,
    manifest: super::Manifest,
}

impl<'a> Unroller<'a> {
    fn new(circuit: &'a Circuit, ts: &'a TransitionSystem) -> Result<Self, String> {
        let mut unroller = Self {
            circuit,
            ts,
            steps: 0,
            state: FxHashMap::default(),
            driven: FxHashMap::default(),
            vars: vec![],
            var_names: FxHashSet::default(),
            symbols: FxHashMap::default(),
            prelude: vec![],
            uses_reals: false,
            cache: FxHashMap::default(),
            queries: vec![],
            manifest: super::Manifest::default(),
        };
        for reg in ts.registers() {
            let term = match reg.init {
                Some(init) => unroller.lower(init)?,
                None => {
                    let sort = unroller.sort_of(&reg.name)?;
                    unroller.fresh(&format!("{}@0", reg.name), sort)
                }
            };
            unroller.state.insert(reg.name.clone(), term);
        }
        unroller.cache.clear();
        Ok(unroller)
    }

    fn sort_of(&self, name: &str) -> Result<Sort, String> {
        self.circuit
            .sort_of(name)
            .ok_or_else(|| format!("unknown signal `{name}`"))
    }

    fn declare(&mut self, name: String, sort: Sort) {
        self.uses_reals |= sort == Sort::Real;
        self.prelude
            .push(format!("(declare-const {} {})", quote(&name), smt_sort(sort)));
        self.var_names.insert(name.clone());
        self.vars.push(name);
    }

    /// Declares a new free variable named after `base` and returns its term
    fn fresh(&mut self, base: &str, sort: Sort) -> String {
        let mut name = base.to_string();
        let mut n = 1;
        while self.var_names.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        let term = quote(&name);
        self.declare(name, sort);
        term
    }

    /// Term for the current value of the signal `name`
    fn value_of(&mut self, name: &str) -> Result<String, String> {
        if let Some(term) = self.driven.get(name) {
            return Ok(term.clone());
        }
        if let Some(term) = self.state.get(name) {
            return Ok(term.clone());
        }
        if let Some(expr) = self.ts.assignment(name) {
            return self.lower(expr);
        }
        // unconstrained inputs keep one free value for the whole run
        let sort = self.sort_of(name)?;
        let term = self.fresh(&format!("{name}@{}", self.steps), sort);
        self.driven.insert(name.to_string(), term.clone());
        Ok(term)
    }

    fn is_real(&self, expr: ExprId) -> Result<bool, String> {
        let sort = self.ts.sort(expr, &|n: &str| self.circuit.sort_of(n))?;
        Ok(sort == Sort::Real)
    }

    fn binary(&mut self, op: &str, a: ExprId, b: ExprId) -> Result<String, String> {
        Ok(format!("({op} {} {})", self.lower(a)?, self.lower(b)?))
    }

    fn lower(&mut self, expr: ExprId) -> Result<String, String> {
        if let Some(term) = self.cache.get(&expr) {
            return Ok(term.clone());
        }
        let ts = self.ts;
        let term = match &ts[expr] {
            Expr::Const(v) => bv_literal(v),
            Expr::Signal(name) => self.value_of(name)?,
            Expr::Not(a) => format!("(bvnot {})", self.lower(*a)?),
            Expr::And(a, b) => self.binary("bvand", *a, *b)?,
            Expr::Or(a, b) => self.binary("bvor", *a, *b)?,
            Expr::Xor(a, b) => self.binary("bvxor", *a, *b)?,
            Expr::Add(a, b) => {
                let op = if self.is_real(*a)? { "+" } else { "bvadd" };
                self.binary(op, *a, *b)?
            }
            Expr::Sub(a, b) => {
                let op = if self.is_real(*a)? { "-" } else { "bvsub" };
                self.binary(op, *a, *b)?
            }
            Expr::Eq(a, b) => format!("(ite {} #b1 #b0)", self.binary("=", *a, *b)?),
            Expr::Ult(a, b) => format!("(ite {} #b1 #b0)", self.binary("bvult", *a, *b)?),
            Expr::Mux(c, t, f) => format!(
                "(ite (= {} #b1) {} {})",
                self.lower(*c)?,
                self.lower(*t)?,
                self.lower(*f)?
            ),
            Expr::Slice(e, hi, lo) => format!("((_ extract {hi} {lo}) {})", self.lower(*e)?),
            Expr::Concat(a, b) => self.binary("concat", *a, *b)?,
        };
        self.cache.insert(expr, term.clone());
        Ok(term)
    }

    /// Term for a value poked into or expected from `signal`
    fn value_term(&mut self, value: &Value, signal: &SignalRef) -> Result<String, String> {
        match value {
            Value::Symbolic(name) => match self.symbols.get(name) {
                Some(kind) if *kind != signal.kind => Err(format!(
                    "symbolic value `{name}` is used as {kind} and as {}",
                    signal.kind
                )),
                Some(_) => Ok(quote(name)),
                None => {
                    self.symbols.insert(name.clone(), signal.kind);
                    self.declare(name.clone(), sort_of_kind(signal.kind));
                    Ok(quote(name))
                }
            },
            Value::DontCare => {
                let base = format!("{}@{}", signal.hier_name(), self.steps);
                Ok(self.fresh(&base, sort_of_kind(signal.kind)))
            }
            Value::Real(r) => {
                self.uses_reals = true;
                real_literal(*r)
            }
            other => other
                .to_bits()
                .map(|bits| bv_literal(&bits))
                .ok_or_else(|| format!("cannot encode {}", other.describe())),
        }
    }

    fn poke(&mut self, signal: &SignalRef, value: &Value) -> Result<(), String> {
        let term = self.value_term(value, signal)?;
        let name = signal.hier_name();
        if signal.class == ElementClass::Register && self.ts.find_register(&name).is_some() {
            self.state.insert(name, term);
        } else {
            self.driven.insert(name, term);
        }
        self.cache.clear();
        Ok(())
    }

    fn step(&mut self, count: u32) -> Result<(), String> {
        let ts = self.ts;
        for _ in 0..count {
            let mut next = Vec::with_capacity(ts.registers().len());
            for reg in ts.registers() {
                next.push((reg.name.clone(), self.lower(reg.next)?));
            }
            self.steps += 1;
            for (name, term) in next {
                let sort = self.sort_of(&name)?;
                let version = quote(&format!("{name}#{}", self.steps));
                self.prelude
                    .push(format!("(define-fun {version} () {} {term})", smt_sort(sort)));
                self.state.insert(name, version);
            }
            self.cache.clear();
        }
        Ok(())
    }

    /// Query that defines `actual` as the current value of `signal`
    fn query(&mut self, file: String, comment: String, signal: &SignalRef, check: Option<String>) -> Result<(), String> {
        let actual = self.value_of(&signal.hier_name())?;
        let mut body = vec![format!(
            "(define-fun {} () {} {actual})",
            quote(ACTUAL),
            smt_sort(sort_of_kind(signal.kind))
        )];
        if let Some(check) = check {
            body.push(format!("(assert (not {check}))"));
        }
        body.push("(check-sat)".to_string());
        let values = std::iter::once(quote(ACTUAL))
            .chain(self.vars.iter().map(|v| quote(v)))
            .collect::<Vec<_>>()
            .join(" ");
        body.push(format!("(get-value ({values}))"));
        self.queries.push(Query {
            file,
            comment,
            prelude: self.prelude.len(),
            body,
        });
        Ok(())
    }

    /// Condition under which `actual` meets the expectation
    fn expectation(
        &mut self,
        signal: &SignalRef,
        value: &Value,
        tolerance: Option<Tolerance>,
    ) -> Result<String, String> {
        let actual = quote(ACTUAL);
        let expected = self.value_term(value, signal)?;
        let (Some(tol), Some(e)) = (tolerance, value.as_f64()) else {
            return Ok(format!("(= {actual} {expected})"));
        };
        let bound = tol.bound(e);
        match signal.kind {
            ValueKind::Fixed { width, frac } => {
                let scale = (frac as f64).exp2();
                let min = -((width - 1) as f64).exp2();
                let max = ((width - 1) as f64).exp2() - 1.0;
                let lo = ((e - bound) * scale).ceil().max(min);
                let hi = ((e + bound) * scale).floor().min(max);
                if lo > hi {
                    return Ok("false".to_string());
                }
                Ok(format!(
                    "(and (bvsle {} {actual}) (bvsle {actual} {}))",
                    signed_literal(lo as i64, width),
                    signed_literal(hi as i64, width)
                ))
            }
            _ => Ok(format!(
                "(and (<= {} {actual}) (<= {actual} {}))",
                real_literal(e - bound)?,
                real_literal(e + bound)?
            )),
        }
    }

    fn lower_action(&mut self, idx: ActionIdx, action: &Action) -> Result<(), String> {
        let comment = format!("{idx}: {}", serialize_action(action).replace('\n', " "));
        match action {
            Action::Poke { signal, value } => self.poke(signal, value)?,
            Action::Step { count, .. } => self.step(*count)?,
            Action::Eval => {}
            Action::Delay(_) => {
                return Err("delays are only supported by the analog backend".to_string())
            }
            Action::Expect {
                signal,
                value,
                tolerance,
            } => {
                let index = self.manifest.expect(idx, signal, value, *tolerance, self.steps).index;
                if *value != Value::DontCare {
                    let check = self.expectation(signal, value, *tolerance)?;
                    self.query(format!("e{index}.smt2"), comment, signal, Some(check))?;
                }
            }
            Action::Peek(signal) => {
                let index = self.manifest.observations.len();
                self.manifest.observe(idx, 0, signal, self.steps);
                self.query(format!("o{index}.smt2"), comment, signal, None)?;
            }
            Action::Print { signals, .. } | Action::WriteVector { signals, .. } => {
                for (slot, signal) in signals.iter().enumerate() {
                    let index = self.manifest.observations.len();
                    self.manifest.observe(idx, slot, signal, self.steps);
                    self.query(format!("o{index}.smt2"), comment.clone(), signal, None)?;
                }
            }
        }
        Ok(())
    }
}

impl SymbolicBackend {
    pub fn new(config: SymbolicConfig) -> Self {
        Self { config }
    }

    pub fn compile(&self, circuit: &Circuit, log: &ActionLog) -> Result<BackendArtifact, CompileError> {
        let ts = circuit.transition().ok_or_else(|| {
            failure(None, format!("circuit `{}` has no transition system", circuit.name))
        })?;
        let mut unroller = Unroller::new(circuit, ts).map_err(|reason| failure(None, reason))?;
        for (idx, action) in log.iter() {
            unroller
                .lower_action(idx, action)
                .map_err(|reason| failure(Some(idx), reason))?;
        }

        let logic = match &self.config.logic {
            Some(logic) => logic.clone(),
            None if unroller.uses_reals => "ALL".to_string(),
            None => "QF_BV".to_string(),
        };
        let mut files = BTreeMap::new();
        let mut commands = vec![];
        for query in &unroller.queries {
            let mut lines = vec![
                format!("; {}", query.comment),
                "(set-option :produce-models true)".to_string(),
                format!("(set-logic {logic})"),
            ];
            lines.extend(unroller.prelude[..query.prelude].iter().cloned());
            lines.extend(query.body.iter().cloned());
            let mut text = lines.join("\n");
            text.push('\n');
            files.insert(query.file.clone(), text);

            let mut argv = vec![self.config.solver.clone()];
            argv.extend(self.config.args.iter().cloned());
            argv.push(query.file.clone());
            commands.push(
                Invocation::new(argv)
                    .lenient()
                    .with_timeout(self.config.query_timeout()),
            );
        }
        Ok(BackendArtifact {
            backend: BackendKind::Symbolic,
            files,
            commands,
            outputs: vec![],
            manifest: unroller.manifest,
        })
    }

    pub fn interpret(&self, artifact: &BackendArtifact, raw: &RawResults) -> Interpretation {
        // query files are the last argument of their solver invocation
        let answers: FxHashMap<&str, &ProcessOutput> = artifact
            .commands
            .iter()
            .zip(&raw.outputs)
            .filter_map(|(cmd, out)| cmd.argv.last().map(|f| (f.as_str(), out)))
            .collect();
        let manifest = &artifact.manifest;
        let results = manifest
            .expects
            .iter()
            .map(|e| {
                if e.expected == Value::DontCare {
                    return super::judge(e, BackendKind::Symbolic, Some(Sample::Value(Value::DontCare)));
                }
                let answer = answers
                    .get(format!("e{}.smt2", e.index).as_str())
                    .map(|out| answer_of(out));
                judge_answer(e, answer)
            })
            .collect();
        let observations = manifest
            .observations
            .iter()
            .enumerate()
            .map(|(i, o)| {
                let sample = match answers.get(format!("o{i}.smt2").as_str()).map(|out| answer_of(out)) {
                    Some(Answer::Sat(model)) => actual_value(&model, o.signal.kind),
                    _ => None,
                };
                observation(o, sample.map(Sample::Value))
            })
            .collect();
        Interpretation {
            results,
            observations,
        }
    }
}

/// A constant in a solver model
#[derive(Debug, Clone, PartialEq)]
enum Term {
    Bits(BitVecValue),
    Bool(bool),
    Real(f64),
}

impl Term {
    fn into_value(self, kind: Option<ValueKind>) -> Value {
        match (self, kind) {
            (Term::Bits(bits), Some(kind)) => {
                Value::from_bits(&bits, kind).unwrap_or(Value::BitVec(bits))
            }
            (Term::Bits(bits), None) if bits.width() == 1 => Value::Bit(bits.to_u64() == Some(1)),
            (Term::Bits(bits), None) => Value::BitVec(bits),
            (Term::Bool(b), _) => Value::Bit(b),
            (Term::Real(r), _) => Value::Real(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Answer {
    Sat(Vec<(String, Term)>),
    Unsat,
    Unknown(String),
}

fn answer_of(output: &ProcessOutput) -> Answer {
    if output.timed_out {
        Answer::Unknown("timeout".to_string())
    } else {
        parse_answer(&output.stdout)
    }
}

fn parse_answer(text: &str) -> Answer {
    let unknown = || {
        let first = text.lines().map(str::trim).find(|l| !l.is_empty());
        Answer::Unknown(first.unwrap_or("no answer").to_string())
    };
    let Ok(mut pairs) = SmtLibParser::parse(Rule::response, text) else {
        return unknown();
    };
    let Some(response) = pairs.next() else {
        return unknown();
    };
    let mut inner = response.into_inner();
    let answer = match inner.next() {
        Some(pair) if pair.as_rule() == Rule::answer => pair.as_str().to_string(),
        _ => return unknown(),
    };
    match answer.as_str() {
        "unsat" => Answer::Unsat,
        "sat" => {
            let model = inner
                .find(|p| p.as_rule() == Rule::model)
                .map(parse_model)
                .unwrap_or_default();
            Answer::Sat(model)
        }
        other => Answer::Unknown(other.to_string()),
    }
}

fn parse_model(model: Pair<Rule>) -> Vec<(String, Term)> {
    let mut bindings = vec![];
    for binding in model.into_inner() {
        let mut parts = binding.into_inner();
        let (Some(symbol), Some(term)) = (parts.next(), parts.next()) else {
            continue;
        };
        let name = symbol.as_str().trim_matches('|').to_string();
        if let Some(term) = parse_term(term) {
            bindings.push((name, term));
        }
    }
    bindings
}

fn parse_term(pair: Pair<Rule>) -> Option<Term> {
    match pair.as_rule() {
        Rule::bin => BitVecValue::from_bit_str(&pair.as_str()[2..]).ok().map(Term::Bits),
        Rule::hex => {
            let digits = &pair.as_str()[2..];
            let bits: String = digits
                .chars()
                .filter_map(|c| c.to_digit(16))
                .map(|d| format!("{d:04b}"))
                .collect();
            BitVecValue::from_bit_str(&bits).ok().map(Term::Bits)
        }
        Rule::indexed => {
            let mut parts = pair.into_inner();
            let value = parts.next()?.as_str()[2..].parse::<u128>().ok()?;
            let width = parts.next()?.as_str().parse::<u32>().ok()?;
            bits_from_u128(value, width).map(Term::Bits)
        }
        Rule::boolean => Some(Term::Bool(pair.as_str() == "true")),
        Rule::neg | Rule::div | Rule::decimal => parse_real(pair).map(Term::Real),
        _ => None,
    }
}

fn parse_real(pair: Pair<Rule>) -> Option<f64> {
    match pair.as_rule() {
        Rule::decimal => pair.as_str().parse().ok(),
        Rule::neg => parse_real(pair.into_inner().next()?).map(|v| -v),
        Rule::div => {
            let mut parts = pair.into_inner();
            let num = parse_real(parts.next()?)?;
            let den = parse_real(parts.next()?)?;
            Some(num / den)
        }
        _ => None,
    }
}

fn actual_value(model: &[(String, Term)], kind: ValueKind) -> Option<Value> {
    model
        .iter()
        .find(|(name, _)| name == ACTUAL)
        .map(|(_, term)| term.clone().into_value(Some(kind)))
}

fn judge_answer(entry: &ExpectEntry, answer: Option<Answer>) -> TestResult {
    let locator = Locator {
        index: entry.index,
        action: entry.action,
        signal: entry.signal.clone(),
        backend: BackendKind::Symbolic,
    };
    let outcome = match answer {
        None => Outcome::Error(ResultError::MissingResult),
        Some(Answer::Unsat) => Outcome::Pass,
        Some(Answer::Unknown(reason)) => Outcome::Error(ResultError::SolverUnknown(reason)),
        Some(Answer::Sat(model)) => Outcome::Fail {
            expected: entry.expected.clone(),
            actual: actual_value(&model, entry.signal.kind)
                .map(Observed::Value)
                .unwrap_or_else(|| Observed::Unknown("no model".to_string())),
            step: entry.step,
            counterexample: model
                .into_iter()
                .filter(|(name, _)| name != ACTUAL)
                .map(|(name, term)| (name, term.into_value(None)))
                .collect(),
        },
    };
    TestResult { locator, outcome }
}
