// Copyright 2026 Cornell University
// released under MIT License

//! # Transition relation
//! A small expression arena describing what a circuit computes. Only the
//! symbolic backend reads it: combinational nets and outputs are defined by
//! `assigns`, registers by their next-state function and optional reset value.

use baa::{BitVecOps, BitVecValue};
use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashSet;
use std::ops::Index;

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct ExprId(u32);
entity_impl!(ExprId, "expr");

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(BitVecValue),
    /// Hierarchical name of a port, net or register, relative to the top module
    Signal(String),
    Not(ExprId),
    And(ExprId, ExprId),
    Or(ExprId, ExprId),
    Xor(ExprId, ExprId),
    Add(ExprId, ExprId),
    Sub(ExprId, ExprId),
    /// 1-bit result
    Eq(ExprId, ExprId),
    /// Unsigned less-than, 1-bit result
    Ult(ExprId, ExprId),
    /// Condition, then, else
    Mux(ExprId, ExprId, ExprId),
    /// Bits `hi` down to `lo`, inclusive
    Slice(ExprId, u32, u32),
    /// First operand ends up in the most significant bits
    Concat(ExprId, ExprId),
}

/// Sort of an expression as seen by the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    BitVec(u32),
    Real,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub next: ExprId,
    pub init: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransitionSystem {
    exprs: PrimaryMap<ExprId, Expr>,
    assigns: Vec<(String, ExprId)>,
    registers: Vec<Register>,
}

impl TransitionSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a new expression to the arena
    pub fn e(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr)
    }

    pub fn signal(&mut self, name: &str) -> ExprId {
        self.e(Expr::Signal(name.to_string()))
    }

    pub fn constant(&mut self, value: u64, width: u32) -> ExprId {
        self.e(Expr::Const(BitVecValue::from_u64(value, width)))
    }

    /// Defines the net or output `name` as `expr`
    pub fn assign(&mut self, name: &str, expr: ExprId) {
        self.assigns.push((name.to_string(), expr));
    }

    pub fn register(&mut self, name: &str, next: ExprId, init: Option<ExprId>) {
        self.registers.push(Register {
            name: name.to_string(),
            next,
            init,
        });
    }

    pub fn assigns(&self) -> &[(String, ExprId)] {
        &self.assigns
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub fn assignment(&self, name: &str) -> Option<ExprId> {
        self.assigns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| *e)
    }

    pub fn find_register(&self, name: &str) -> Option<&Register> {
        self.registers.iter().find(|r| r.name == name)
    }

    pub fn expr_ids(&self) -> Vec<ExprId> {
        self.exprs.keys().collect()
    }

    /// Infers the sort of `expr`. `sort_of_signal` supplies the sort of every
    /// referenced signal.
    pub fn sort(
        &self,
        expr: ExprId,
        sort_of_signal: &impl Fn(&str) -> Option<Sort>,
    ) -> Result<Sort, String> {
        let bv = |e: ExprId| -> Result<u32, String> {
            match self.sort(e, sort_of_signal)? {
                Sort::BitVec(w) => Ok(w),
                Sort::Real => Err(format!("{e} is real but a bit-vector is required")),
            }
        };
        let same = |a: ExprId, b: ExprId| -> Result<Sort, String> {
            let (sa, sb) = (self.sort(a, sort_of_signal)?, self.sort(b, sort_of_signal)?);
            if sa == sb {
                Ok(sa)
            } else {
                Err(format!("operands {a} and {b} have different sorts ({sa:?} vs {sb:?})"))
            }
        };
        match &self[expr] {
            Expr::Const(v) => Ok(Sort::BitVec(v.width())),
            Expr::Signal(name) => {
                sort_of_signal(name).ok_or_else(|| format!("unknown signal `{name}`"))
            }
            Expr::Not(e) => Ok(Sort::BitVec(bv(*e)?)),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Xor(a, b) => {
                bv(*a)?;
                bv(*b)?;
                same(*a, *b)
            }
            Expr::Add(a, b) | Expr::Sub(a, b) => same(*a, *b),
            Expr::Eq(a, b) => same(*a, *b).map(|_| Sort::BitVec(1)),
            Expr::Ult(a, b) => {
                bv(*a)?;
                same(*a, *b).map(|_| Sort::BitVec(1))
            }
            Expr::Mux(c, t, f) => {
                if bv(*c)? != 1 {
                    return Err(format!("mux condition {c} must be 1 bit wide"));
                }
                same(*t, *f)
            }
            Expr::Slice(e, hi, lo) => {
                let w = bv(*e)?;
                if lo > hi || *hi >= w {
                    Err(format!("slice [{hi}:{lo}] out of range for {w} bits"))
                } else {
                    Ok(Sort::BitVec(hi - lo + 1))
                }
            }
            Expr::Concat(a, b) => Ok(Sort::BitVec(bv(*a)? + bv(*b)?)),
        }
    }

    /// Names of all signals `expr` refers to, in first-use order
    pub fn signals_in(&self, expr: ExprId) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        let mut todo = vec![expr];
        while let Some(e) = todo.pop() {
            match &self[e] {
                Expr::Const(_) => {}
                Expr::Signal(name) => {
                    if seen.insert(name.clone()) {
                        out.push(name.clone());
                    }
                }
                Expr::Not(a) | Expr::Slice(a, _, _) => todo.push(*a),
                Expr::And(a, b)
                | Expr::Or(a, b)
                | Expr::Xor(a, b)
                | Expr::Add(a, b)
                | Expr::Sub(a, b)
                | Expr::Eq(a, b)
                | Expr::Ult(a, b)
                | Expr::Concat(a, b) => {
                    todo.push(*b);
                    todo.push(*a);
                }
                Expr::Mux(c, t, f) => {
                    todo.push(*f);
                    todo.push(*t);
                    todo.push(*c);
                }
            }
        }
        out
    }

    /// Fails if a combinational assignment depends on itself
    pub fn check_acyclic(&self) -> Result<(), String> {
        fn visit(
            ts: &TransitionSystem,
            name: &str,
            stack: &mut Vec<String>,
            done: &mut FxHashSet<String>,
        ) -> Result<(), String> {
            if done.contains(name) {
                return Ok(());
            }
            if stack.iter().any(|s| s == name) {
                stack.push(name.to_string());
                return Err(format!("combinational loop: {}", stack.join(" -> ")));
            }
            if let Some(expr) = ts.assignment(name) {
                stack.push(name.to_string());
                for dep in ts.signals_in(expr) {
                    visit(ts, &dep, stack, done)?;
                }
                stack.pop();
            }
            done.insert(name.to_string());
            Ok(())
        }
        let mut done = FxHashSet::default();
        for (name, _) in &self.assigns {
            visit(self, name, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }
}

impl Index<ExprId> for TransitionSystem {
    type Output = Expr;

    fn index(&self, index: ExprId) -> &Self::Output {
        &self.exprs[index]
    }
}

impl Index<&ExprId> for TransitionSystem {
    type Output = Expr;

    fn index(&self, index: &ExprId) -> &Self::Output {
        &self.exprs[*index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorts(name: &str) -> Option<Sort> {
        match name {
            "a" | "r" => Some(Sort::BitVec(1)),
            "data" => Some(Sort::BitVec(8)),
            "vin" => Some(Sort::Real),
            _ => None,
        }
    }

    #[test]
    fn test_sort_inference() {
        let mut ts = TransitionSystem::new();
        let data = ts.signal("data");
        let hi = ts.e(Expr::Slice(data, 7, 4));
        let lo = ts.e(Expr::Slice(data, 3, 0));
        let swapped = ts.e(Expr::Concat(lo, hi));
        assert_eq!(ts.sort(swapped, &sorts), Ok(Sort::BitVec(8)));

        let a = ts.signal("a");
        let zero = ts.constant(0, 8);
        let mux = ts.e(Expr::Mux(a, data, zero));
        assert_eq!(ts.sort(mux, &sorts), Ok(Sort::BitVec(8)));

        let lt = ts.e(Expr::Ult(data, zero));
        assert_eq!(ts.sort(lt, &sorts), Ok(Sort::BitVec(1)));

        let vin = ts.signal("vin");
        let sum = ts.e(Expr::Add(vin, vin));
        assert_eq!(ts.sort(sum, &sorts), Ok(Sort::Real));
    }

    #[test]
    fn test_sort_errors() {
        let mut ts = TransitionSystem::new();
        let data = ts.signal("data");
        let a = ts.signal("a");
        let bad_and = ts.e(Expr::And(data, a));
        assert!(ts.sort(bad_and, &sorts).is_err());
        let bad_slice = ts.e(Expr::Slice(data, 8, 0));
        assert!(ts.sort(bad_slice, &sorts).is_err());
        let bad_mux = ts.e(Expr::Mux(data, a, a));
        assert!(ts.sort(bad_mux, &sorts).is_err());
        let unknown = ts.signal("nope");
        assert!(ts.sort(unknown, &sorts).is_err());
        let vin = ts.signal("vin");
        let bad_not = ts.e(Expr::Not(vin));
        assert!(ts.sort(bad_not, &sorts).is_err());
    }

    #[test]
    fn test_combinational_loop() {
        let mut ts = TransitionSystem::new();
        let x = ts.signal("x");
        let y = ts.signal("y");
        ts.assign("y", x);
        ts.assign("x", y);
        let err = ts.check_acyclic().unwrap_err();
        assert!(err.contains("combinational loop"), "{err}");

        // feedback through a register is fine
        let mut ts = TransitionSystem::new();
        let r = ts.signal("r");
        let not_r = ts.e(Expr::Not(r));
        ts.register("r", not_r, None);
        ts.assign("out", r);
        assert!(ts.check_acyclic().is_ok());
        assert_eq!(ts.signals_in(not_r), vec!["r".to_string()]);
    }
}
