// Copyright 2026 Cornell University
// released under MIT License

use std::fmt;

use crate::circuit::{Circuit, Dir, ElementClass};
use crate::errors::{UnresolvedReason, UnresolvedSignal};
use crate::value::ValueKind;

/// Resolved handle to exactly one port, net or register of a circuit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalRef {
    /// Instance names from just below the top module
    pub path: Vec<String>,
    pub name: String,
    pub kind: ValueKind,
    pub class: ElementClass,
    pub clock: bool,
}

impl SignalRef {
    /// Dotted name relative to the top module, e.g. `sub.probe`
    pub fn hier_name(&self) -> String {
        self.hier_name_with(".")
    }

    pub fn hier_name_with(&self, sep: &str) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        parts.push(&self.name);
        parts.join(sep)
    }

    pub fn is_top_port(&self) -> bool {
        self.path.is_empty() && matches!(self.class, ElementClass::Port(_))
    }

    /// Anything that is not a port of the top module
    pub fn is_internal(&self) -> bool {
        !self.is_top_port()
    }

    /// Top-level inputs and introspectable nets or registers can be poked.
    /// Ports of sub-instances are driven by their parent and cannot.
    pub fn is_drivable(&self) -> bool {
        match self.class {
            ElementClass::Port(Dir::In | Dir::InOut) => self.path.is_empty(),
            ElementClass::Port(Dir::Out) => false,
            ElementClass::Net | ElementClass::Register => true,
        }
    }
}

impl fmt::Display for SignalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hier_name())
    }
}

/// Resolves a dotted path like `sub.inner.net` against `circuit`.
///
/// Every hop must name an instance and the last segment a port or local
/// signal. Internal elements have to be flagged introspectable, the ports of
/// the top module are always visible.
pub fn resolve(circuit: &Circuit, path: &str) -> Result<SignalRef, UnresolvedSignal> {
    let err = |reason| UnresolvedSignal::new(path, reason);
    let mut segments: Vec<&str> = path.trim().split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(err(UnresolvedReason::EmptyPath));
    }
    let terminal = segments.pop().ok_or_else(|| err(UnresolvedReason::EmptyPath))?;

    let mut inst = circuit.top();
    for hop in &segments {
        inst = circuit
            .child(inst, hop)
            .ok_or_else(|| err(UnresolvedReason::NoSuchInstance(hop.to_string())))?;
    }
    let element = circuit
        .element(inst, terminal)
        .ok_or_else(|| err(UnresolvedReason::NoSuchSignal(terminal.to_string())))?;

    let signal = SignalRef {
        path: segments.iter().map(|s| s.to_string()).collect(),
        name: terminal.to_string(),
        kind: element.kind(),
        class: element.class(),
        clock: element.is_clock(),
    };
    if signal.is_internal() && !element.is_introspectable() {
        return Err(err(UnresolvedReason::NotIntrospectable));
    }
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::tests::counter;

    #[test]
    fn test_resolve_top_ports() {
        let c = counter();
        let a = resolve(&c, "a").unwrap();
        assert_eq!(a.kind, ValueKind::Bit);
        assert_eq!(a.class, ElementClass::Port(Dir::In));
        assert!(a.is_top_port());
        assert!(a.is_drivable());
        let clk = resolve(&c, "clk").unwrap();
        assert!(clk.clock);
        let out = resolve(&c, "out").unwrap();
        assert!(!out.is_drivable());
    }

    #[test]
    fn test_resolve_internal() {
        let c = counter();
        let r = resolve(&c, "r").unwrap();
        assert_eq!(r.class, ElementClass::Register);
        assert!(r.is_internal());
        assert!(r.is_drivable());

        let probe = resolve(&c, "sub.probe").unwrap();
        assert_eq!(probe.path, vec!["sub".to_string()]);
        assert_eq!(probe.hier_name(), "sub.probe");
        assert_eq!(probe.hier_name_with("_"), "sub_probe");
        assert_eq!(probe.to_string(), "sub.probe");
    }

    #[test]
    fn test_unresolved() {
        let c = counter();
        let reason = |p: &str| resolve(&c, p).unwrap_err().reason;
        assert_eq!(reason(""), UnresolvedReason::EmptyPath);
        assert_eq!(reason("sub..probe"), UnresolvedReason::EmptyPath);
        assert_eq!(
            reason("nope.probe"),
            UnresolvedReason::NoSuchInstance("nope".to_string())
        );
        assert_eq!(
            reason("sub.nope"),
            UnresolvedReason::NoSuchSignal("nope".to_string())
        );
        assert_eq!(reason("sub.hidden"), UnresolvedReason::NotIntrospectable);
        // ports of sub-instances are internal too
        assert_eq!(reason("sub.d"), UnresolvedReason::NotIntrospectable);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let c = counter();
        for path in ["a", "clk", "out", "r", "sub.probe"] {
            assert_eq!(resolve(&c, path), resolve(&c, path));
        }
    }
}
