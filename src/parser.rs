// Copyright 2026 Cornell University
// released under MIT License

//! # Stimulus scripts
//! Parses line-oriented test scripts into an `ActionLog` and the
//! expressions of a circuit's transition relation.

use baa::BitVecValue;
use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::PrattParser;
use pest::Parser;
use pest_derive::Parser;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::action::{Action, ActionLog, Location};
use crate::circuit::Circuit;
use crate::diagnostic::*;
use crate::relation::{Expr, ExprId, TransitionSystem};
use crate::session::vector_actions;
use crate::signal::{resolve, SignalRef};
use crate::value::{parse_sized_literal, Literal, Tolerance, Value};

#[derive(Parser)]
#[grammar = "stimulus.pest"]
struct StimulusParser;

lazy_static::lazy_static! {
    static ref PRATT_PARSER: PrattParser<Rule> = {
        use pest::pratt_parser::{Assoc::*, Op};
        use Rule::*;

        // Precedence is defined lowest to highest
        PrattParser::new()
            .op(Op::infix(or, Left))
            .op(Op::infix(xor, Left))
            .op(Op::infix(and, Left))
            .op(Op::infix(eq, Left) | Op::infix(ult, Left))
            .op(Op::infix(add, Left) | Op::infix(sub, Left))
            .op(Op::prefix(not))
            .op(Op::postfix(slice))
    };
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read `{}`: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    /// Details went through the diagnostic handler
    #[error("{count} error(s) in `{file}`")]
    Invalid { file: String, count: usize },
}

fn sized(pair: Pair<Rule>) -> Result<BitVecValue, String> {
    let text = pair.as_str();
    let mut inner = pair.into_inner();
    let (Some(width), Some(radix), Some(digits)) = (inner.next(), inner.next(), inner.next())
    else {
        return Err(format!("malformed literal `{text}`"));
    };
    let width = width
        .as_str()
        .parse::<u32>()
        .map_err(|e| format!("invalid width in `{text}`: {e}"))?;
    let radix = radix.as_str().chars().next().unwrap_or('d');
    parse_sized_literal(width, radix, digits.as_str())
}

/// Converts a `literal` pair
fn literal(pair: Pair<Rule>) -> Result<Literal, String> {
    let text = pair.as_str();
    let Some(inner) = pair.into_inner().next() else {
        return Err(format!("malformed literal `{text}`"));
    };
    match inner.as_rule() {
        Rule::sym => match inner.into_inner().next() {
            Some(name) => Ok(Literal::Symbolic(name.as_str().to_string())),
            None => Err(format!("malformed literal `{text}`")),
        },
        Rule::sized => sized(inner).map(Literal::Sized),
        Rule::real => text
            .parse::<f64>()
            .map(Literal::Real)
            .map_err(|e| format!("invalid real `{text}`: {e}")),
        Rule::int => text
            .parse::<u128>()
            .map(Literal::Int)
            .map_err(|e| format!("invalid integer `{text}`: {e}")),
        Rule::dont_care => Ok(Literal::DontCare),
        rule => Err(format!("expected a literal, found {rule:?}")),
    }
}

/// Parses a single value, e.g. one column of a vector file
pub fn parse_literal(text: &str) -> Result<Literal, String> {
    let mut pairs = StimulusParser::parse(Rule::single_literal, text)
        .map_err(|e| format!("invalid value `{text}`: {}", e.variant.message()))?;
    match pairs.next().and_then(|p| p.into_inner().next()) {
        Some(pair) => literal(pair),
        None => Err(format!("invalid value `{text}`")),
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
    Eq,
    Ult,
}

/// Expression as parsed, before it is interned into a `TransitionSystem`
#[derive(Debug, Clone, PartialEq)]
enum BoxedExpr {
    Const(BitVecValue),
    Signal(String),
    Not(Box<BoxedExpr>),
    Binary(BinOp, Box<BoxedExpr>, Box<BoxedExpr>),
    Slice(Box<BoxedExpr>, u32, u32),
    Mux(Box<BoxedExpr>, Box<BoxedExpr>, Box<BoxedExpr>),
    Concat(Vec<BoxedExpr>),
}

fn parse_boxed_expr(pairs: Pairs<Rule>) -> Result<BoxedExpr, String> {
    PRATT_PARSER
        .map_primary(|primary| match primary.as_rule() {
            Rule::sized => sized(primary).map(BoxedExpr::Const),
            Rule::int => Err(format!(
                "integer `{0}` needs a width, e.g. `8'd{0}`",
                primary.as_str()
            )),
            Rule::path => Ok(BoxedExpr::Signal(primary.as_str().to_string())),
            // parenthesized
            Rule::expr => parse_boxed_expr(primary.into_inner()),
            Rule::mux => {
                let mut args = primary.into_inner().map(|p| parse_boxed_expr(p.into_inner()));
                match (args.next(), args.next(), args.next()) {
                    (Some(c), Some(t), Some(f)) => {
                        Ok(BoxedExpr::Mux(Box::new(c?), Box::new(t?), Box::new(f?)))
                    }
                    _ => Err("mux takes three arguments".to_string()),
                }
            }
            Rule::concat => primary
                .into_inner()
                .map(|p| parse_boxed_expr(p.into_inner()))
                .collect::<Result<Vec<_>, _>>()
                .map(BoxedExpr::Concat),
            rule => Err(format!("expected an expression, found {rule:?}")),
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::and => BinOp::And,
                Rule::or => BinOp::Or,
                Rule::xor => BinOp::Xor,
                Rule::add => BinOp::Add,
                Rule::sub => BinOp::Sub,
                Rule::eq => BinOp::Eq,
                Rule::ult => BinOp::Ult,
                rule => return Err(format!("expected an operator, found {rule:?}")),
            };
            Ok(BoxedExpr::Binary(op, Box::new(lhs?), Box::new(rhs?)))
        })
        .map_prefix(|_not, arg| Ok(BoxedExpr::Not(Box::new(arg?))))
        .map_postfix(|arg, slice| {
            let arg = arg?;
            let mut indices = slice.into_inner().map(|i| {
                i.as_str()
                    .parse::<u32>()
                    .map_err(|e| format!("invalid index `{}`: {e}", i.as_str()))
            });
            let hi = indices
                .next()
                .ok_or_else(|| "empty slice".to_string())??;
            // a[i] is syntactic sugar for a[i:i]
            let lo = indices.next().transpose()?.unwrap_or(hi);
            Ok(BoxedExpr::Slice(Box::new(arg), hi, lo))
        })
        .parse(pairs)
}

fn boxed_expr_to_expr_id(expr: BoxedExpr, ts: &mut TransitionSystem) -> ExprId {
    match expr {
        BoxedExpr::Const(value) => ts.e(Expr::Const(value)),
        BoxedExpr::Signal(name) => ts.signal(&name),
        BoxedExpr::Not(arg) => {
            let arg = boxed_expr_to_expr_id(*arg, ts);
            ts.e(Expr::Not(arg))
        }
        BoxedExpr::Binary(op, lhs, rhs) => {
            let a = boxed_expr_to_expr_id(*lhs, ts);
            let b = boxed_expr_to_expr_id(*rhs, ts);
            ts.e(match op {
                BinOp::And => Expr::And(a, b),
                BinOp::Or => Expr::Or(a, b),
                BinOp::Xor => Expr::Xor(a, b),
                BinOp::Add => Expr::Add(a, b),
                BinOp::Sub => Expr::Sub(a, b),
                BinOp::Eq => Expr::Eq(a, b),
                BinOp::Ult => Expr::Ult(a, b),
            })
        }
        BoxedExpr::Slice(arg, hi, lo) => {
            let arg = boxed_expr_to_expr_id(*arg, ts);
            ts.e(Expr::Slice(arg, hi, lo))
        }
        BoxedExpr::Mux(c, t, f) => {
            let c = boxed_expr_to_expr_id(*c, ts);
            let t = boxed_expr_to_expr_id(*t, ts);
            let f = boxed_expr_to_expr_id(*f, ts);
            ts.e(Expr::Mux(c, t, f))
        }
        BoxedExpr::Concat(parts) => {
            let ids: Vec<ExprId> = parts
                .into_iter()
                .map(|p| boxed_expr_to_expr_id(p, ts))
                .collect();
            match ids.split_first() {
                Some((first, rest)) => rest
                    .iter()
                    .fold(*first, |acc, part| ts.e(Expr::Concat(acc, *part))),
                // the grammar requires at least two parts
                None => ts.constant(0, 1),
            }
        }
    }
}

/// Parses `text` and interns the expression into `ts`. Widths are checked
/// later, when the circuit adopts the transition system.
pub fn parse_expression(text: &str, ts: &mut TransitionSystem) -> Result<ExprId, String> {
    let mut pairs = StimulusParser::parse(Rule::expression, text)
        .map_err(|e| format!("invalid expression `{text}`: {}", e.variant.message()))?;
    let Some(expr) = pairs.next().and_then(|p| p.into_inner().next()) else {
        return Err(format!("invalid expression `{text}`"));
    };
    let boxed = parse_boxed_expr(expr.into_inner())?;
    Ok(boxed_expr_to_expr_id(boxed, ts))
}

/// Marks an error that was already reported through the handler
struct Reported;

pub struct ParserContext<'a> {
    pub circuit: &'a Circuit,
    pub fileid: usize,
    /// Relative vector and dump files are resolved against this directory
    pub base_dir: Option<&'a Path>,
    pub handler: &'a mut DiagnosticHandler,
    pub log: ActionLog,
}

impl<'a> ParserContext<'a> {
    fn error(&mut self, message: &str, pair: &Pair<Rule>) -> Reported {
        self.handler
            .emit_diagnostic_parsing(message, self.fileid, pair, Level::Error);
        Reported
    }

    fn next<'i>(
        &mut self,
        stmt: &Pair<'i, Rule>,
        inner: &mut Pairs<'i, Rule>,
    ) -> Result<Pair<'i, Rule>, Reported> {
        match inner.next() {
            Some(pair) => Ok(pair),
            None => Err(self.error("incomplete statement", stmt)),
        }
    }

    fn signal(&mut self, pair: &Pair<Rule>) -> Result<SignalRef, Reported> {
        resolve(self.circuit, pair.as_str()).map_err(|e| self.error(&e.to_string(), pair))
    }

    fn value(&mut self, pair: Pair<Rule>, signal: &SignalRef) -> Result<Value, Reported> {
        let parsed = literal(pair.clone()).and_then(|l| {
            l.into_value(signal.kind)
                .map_err(|found| format!("`{signal}` is {}, found {found}", signal.kind))
        });
        parsed.map_err(|e| self.error(&e, &pair))
    }

    fn number(&mut self, pair: &Pair<Rule>) -> Result<f64, Reported> {
        pair.as_str()
            .parse::<f64>()
            .map_err(|e| self.error(&format!("invalid number: {e}"), pair))
    }

    fn string(&mut self, stmt: &Pair<Rule>, pair: Pair<Rule>) -> Result<String, Reported> {
        match pair.into_inner().next() {
            Some(inner) => Ok(unescape(inner.as_str())),
            None => Err(self.error("malformed string", stmt)),
        }
    }

    fn file(&mut self, stmt: &Pair<Rule>, pair: Pair<Rule>) -> Result<PathBuf, Reported> {
        let name = PathBuf::from(self.string(stmt, pair)?);
        Ok(match self.base_dir {
            Some(dir) if name.is_relative() => dir.join(name),
            _ => name,
        })
    }

    fn signals(&mut self, pairs: Pairs<Rule>) -> Result<Vec<SignalRef>, Reported> {
        pairs.map(|p| self.signal(&p)).collect()
    }

    fn parse_stmt(&mut self, stmt: Pair<Rule>) -> Result<Vec<Action>, Reported> {
        let mut inner = stmt.clone().into_inner();
        match stmt.as_rule() {
            Rule::poke => {
                let path = self.next(&stmt, &mut inner)?;
                let signal = self.signal(&path)?;
                let literal = self.next(&stmt, &mut inner)?;
                let value = self.value(literal, &signal)?;
                Ok(vec![Action::Poke { signal, value }])
            }
            Rule::expect => {
                let path = self.next(&stmt, &mut inner)?;
                let signal = self.signal(&path)?;
                let literal = self.next(&stmt, &mut inner)?;
                let value = self.value(literal, &signal)?;
                let tolerance = match inner.next() {
                    Some(tol) => {
                        let relative = tol.as_rule() == Rule::relative;
                        let number = self.next(&stmt, &mut tol.into_inner())?;
                        let bound = self.number(&number)?;
                        Some(if relative {
                            Tolerance::Relative(bound / 100.0)
                        } else {
                            Tolerance::Absolute(bound)
                        })
                    }
                    None => None,
                };
                Ok(vec![Action::Expect {
                    signal,
                    value,
                    tolerance,
                }])
            }
            Rule::step => {
                let path = self.next(&stmt, &mut inner)?;
                let clock = self.signal(&path)?;
                let count = match inner.next() {
                    Some(count) => count
                        .as_str()
                        .parse::<u32>()
                        .map_err(|e| self.error(&format!("invalid step count: {e}"), &count))?,
                    None => 1,
                };
                Ok(vec![Action::Step { clock, count }])
            }
            Rule::peek => {
                let path = self.next(&stmt, &mut inner)?;
                Ok(vec![Action::Peek(self.signal(&path)?)])
            }
            Rule::print => {
                let format = self.next(&stmt, &mut inner)?;
                let format = self.string(&stmt, format)?;
                let signals = self.signals(inner)?;
                Ok(vec![Action::Print { format, signals }])
            }
            Rule::eval => Ok(vec![Action::Eval]),
            Rule::delay => {
                let seconds = self.next(&stmt, &mut inner)?;
                Ok(vec![Action::Delay(self.number(&seconds)?)])
            }
            Rule::dump => {
                let file = self.next(&stmt, &mut inner)?;
                let file = self.file(&stmt, file)?;
                let signals = self.signals(inner)?;
                Ok(vec![Action::WriteVector { file, signals }])
            }
            Rule::vectors => {
                let file = self.next(&stmt, &mut inner)?;
                let file = self.file(&stmt, file)?;
                let inputs = self.next(&stmt, &mut inner)?;
                let outputs = self.next(&stmt, &mut inner)?;
                let inputs: Vec<&str> = inputs.into_inner().map(|p| p.as_str()).collect();
                let outputs: Vec<&str> = outputs.into_inner().map(|p| p.as_str()).collect();
                let clock = inner.next().map(|p| p.as_str());
                vector_actions(self.circuit, &file, &inputs, &outputs, clock)
                    .map_err(|e| self.error(&e.to_string(), &stmt))
            }
            rule => Err(self.error(&format!("unexpected statement: {rule:?}"), &stmt)),
        }
    }

    /// Records the actions of one statement. Errors are reported and the
    /// statement is skipped so that later statements still get checked.
    fn parse_line(&mut self, stmt: Pair<Rule>) {
        let span = stmt.as_span();
        let location: Location = (span.start(), span.end(), self.fileid);
        let Ok(actions) = self.parse_stmt(stmt.clone()) else {
            return;
        };
        for action in actions {
            if let Err(e) = self.log.append_at(action, location) {
                self.error(&e.to_string(), &stmt);
                return;
            }
        }
    }
}

/// Parses the script `text` (named `name` in diagnostics) against `circuit`
pub fn parse_script(
    circuit: &Circuit,
    name: &str,
    text: &str,
    base_dir: Option<&Path>,
    handler: &mut DiagnosticHandler,
) -> Result<ActionLog, ScriptError> {
    let fileid = handler.add_file(name.to_string(), text.to_string());
    let errors_before = handler.error_count();

    let pairs = match StimulusParser::parse(Rule::script, text) {
        Ok(pairs) => pairs,
        Err(err) => {
            let (start, end) = match err.location {
                InputLocation::Pos(start) => (start, start),
                InputLocation::Span(span) => span,
            };
            let msg = format!("Lexing failed: {}", err.variant.message());
            handler.emit_diagnostic_lexing(&msg, fileid, start, end, Level::Error);
            return Err(ScriptError::Invalid {
                file: name.to_string(),
                count: 1,
            });
        }
    };

    let mut context = ParserContext {
        circuit,
        fileid,
        base_dir,
        handler,
        log: ActionLog::new(),
    };
    for stmt in pairs.flat_map(|p| p.into_inner()) {
        if stmt.as_rule() != Rule::EOI {
            context.parse_line(stmt);
        }
    }

    let count = context.handler.error_count() - errors_before;
    if count > 0 {
        Err(ScriptError::Invalid {
            file: name.to_string(),
            count,
        })
    } else {
        Ok(context.log)
    }
}

pub fn parse_script_file(
    circuit: &Circuit,
    path: impl AsRef<Path>,
    handler: &mut DiagnosticHandler,
) -> Result<ActionLog, ScriptError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|error| ScriptError::Io {
        path: path.to_path_buf(),
        error,
    })?;
    parse_script(
        circuit,
        &path.display().to_string(),
        &text,
        path.parent(),
        handler,
    )
}
