// Copyright 2026 Cornell University
// released under MIT License

//! # Circuit description
//! An already elaborated module: top-level ports, an instance tree with local
//! nets and registers, the source files a backend needs and an optional
//! transition relation. Circuits are built once and then only borrowed.

use cranelift_entity::{entity_impl, PrimaryMap};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ops::Index;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::parser::parse_expression;
use crate::relation::{Sort, TransitionSystem};
use crate::value::ValueKind;

#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("duplicate name `{name}` in `{scope}`")]
    Duplicate { scope: String, name: String },
    #[error("`{name}`: {reason}")]
    InvalidElement { name: String, reason: String },
    #[error("transition relation: {0}")]
    Transition(String),
    #[error("failed to parse circuit document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read `{}`: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
}

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default)]
pub struct InstanceId(u32);
entity_impl!(InstanceId, "inst");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dir {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalClass {
    Net,
    Register,
}

/// What kind of element a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementClass {
    Port(Dir),
    Net,
    Register,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub dir: Dir,
    pub kind: ValueKind,
    /// Whether the port may be used as the clock of a `Step`
    pub clock: bool,
}

impl Port {
    pub fn input(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            dir: Dir::In,
            kind,
            clock: false,
        }
    }

    pub fn output(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            dir: Dir::Out,
            kind,
            clock: false,
        }
    }

    pub fn clock(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dir: Dir::In,
            kind: ValueKind::Bit,
            clock: true,
        }
    }
}

/// A net or register declared inside an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub name: String,
    pub kind: ValueKind,
    pub class: SignalClass,
    pub introspectable: bool,
}

impl Signal {
    pub fn net(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            class: SignalClass::Net,
            introspectable: false,
        }
    }

    pub fn register(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            class: SignalClass::Register,
            introspectable: false,
        }
    }

    pub fn introspectable(mut self) -> Self {
        self.introspectable = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub module: String,
    pub parent: Option<InstanceId>,
    ports: Vec<Port>,
    signals: Vec<Signal>,
    children: Vec<InstanceId>,
}

impl Instance {
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }

    fn has_name(&self, name: &str) -> bool {
        self.ports.iter().any(|p| p.name == name) || self.signals.iter().any(|s| s.name == name)
    }
}

/// A port or local signal found inside an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element<'a> {
    Port(&'a Port),
    Signal(&'a Signal),
}

impl Element<'_> {
    pub fn name(&self) -> &str {
        match self {
            Element::Port(p) => &p.name,
            Element::Signal(s) => &s.name,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Element::Port(p) => p.kind,
            Element::Signal(s) => s.kind,
        }
    }

    pub fn class(&self) -> ElementClass {
        match self {
            Element::Port(p) => ElementClass::Port(p.dir),
            Element::Signal(s) => match s.class {
                SignalClass::Net => ElementClass::Net,
                SignalClass::Register => ElementClass::Register,
            },
        }
    }

    pub fn is_clock(&self) -> bool {
        matches!(self, Element::Port(p) if p.clock)
    }

    pub fn is_introspectable(&self) -> bool {
        matches!(self, Element::Signal(s) if s.introspectable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Circuit {
    pub name: String,
    /// Module (or subcircuit) name the backends instantiate
    pub module: String,
    pub sources: Vec<PathBuf>,
    instances: PrimaryMap<InstanceId, Instance>,
    top: InstanceId,
    transition: Option<TransitionSystem>,
}

impl Circuit {
    pub fn new(name: &str, module: &str) -> Self {
        let mut instances = PrimaryMap::new();
        let top = instances.push(Instance {
            name: name.to_string(),
            module: module.to_string(),
            parent: None,
            ports: vec![],
            signals: vec![],
            children: vec![],
        });
        Self {
            name: name.to_string(),
            module: module.to_string(),
            sources: vec![],
            instances,
            top,
            transition: None,
        }
    }

    pub fn top(&self) -> InstanceId {
        self.top
    }

    /// Ports of the top module, in declaration order
    pub fn ports(&self) -> &[Port] {
        self.instances[self.top].ports()
    }

    pub fn add_source(&mut self, path: impl Into<PathBuf>) {
        self.sources.push(path.into());
    }

    pub fn add_port(&mut self, port: Port) -> Result<(), CircuitError> {
        self.add_instance_port(self.top, port)
    }

    pub fn add_instance_port(&mut self, inst: InstanceId, port: Port) -> Result<(), CircuitError> {
        check_kind(&port.name, port.kind)?;
        if port.clock && (port.kind != ValueKind::Bit || port.dir != Dir::In) {
            return Err(CircuitError::InvalidElement {
                name: port.name,
                reason: "a clock must be a 1-bit input".to_string(),
            });
        }
        self.check_fresh(inst, &port.name)?;
        self.instances[inst].ports.push(port);
        Ok(())
    }

    pub fn add_signal(&mut self, inst: InstanceId, signal: Signal) -> Result<(), CircuitError> {
        check_kind(&signal.name, signal.kind)?;
        self.check_fresh(inst, &signal.name)?;
        self.instances[inst].signals.push(signal);
        Ok(())
    }

    pub fn add_instance(
        &mut self,
        parent: InstanceId,
        name: &str,
        module: &str,
    ) -> Result<InstanceId, CircuitError> {
        self.check_fresh(parent, name)?;
        let id = self.instances.push(Instance {
            name: name.to_string(),
            module: module.to_string(),
            parent: Some(parent),
            ports: vec![],
            signals: vec![],
            children: vec![],
        });
        self.instances[parent].children.push(id);
        Ok(id)
    }

    fn check_fresh(&self, inst: InstanceId, name: &str) -> Result<(), CircuitError> {
        let scope = &self.instances[inst];
        if scope.has_name(name) || self.child(inst, name).is_some() {
            Err(CircuitError::Duplicate {
                scope: self.instance_path(inst).join("."),
                name: name.to_string(),
            })
        } else {
            Ok(())
        }
    }

    pub fn child(&self, parent: InstanceId, name: &str) -> Option<InstanceId> {
        self.instances[parent]
            .children
            .iter()
            .copied()
            .find(|c| self.instances[*c].name == name)
    }

    /// Instance names from just below the top down to `inst`
    pub fn instance_path(&self, inst: InstanceId) -> Vec<String> {
        let mut path = vec![];
        let mut current = inst;
        while let Some(parent) = self.instances[current].parent {
            path.push(self.instances[current].name.clone());
            current = parent;
        }
        path.reverse();
        path
    }

    pub fn element(&self, inst: InstanceId, name: &str) -> Option<Element<'_>> {
        let scope = &self.instances[inst];
        scope
            .ports
            .iter()
            .find(|p| p.name == name)
            .map(Element::Port)
            .or_else(|| scope.signals.iter().find(|s| s.name == name).map(Element::Signal))
    }

    /// Follows a dotted path without any visibility check. Reserved for the
    /// circuit's own transition relation, user paths go through `signal::resolve`.
    pub fn lookup(&self, path: &str) -> Option<(InstanceId, Element<'_>)> {
        let mut parts: Vec<&str> = path.split('.').collect();
        let terminal = parts.pop()?;
        let mut inst = self.top;
        for hop in parts {
            inst = self.child(inst, hop)?;
        }
        self.element(inst, terminal).map(|e| (inst, e))
    }

    /// Solver sort of the signal at `path`
    pub fn sort_of(&self, path: &str) -> Option<Sort> {
        self.lookup(path).map(|(_, e)| sort_of_kind(e.kind()))
    }

    pub fn transition(&self) -> Option<&TransitionSystem> {
        self.transition.as_ref()
    }

    /// Attaches a transition relation after checking that it only talks about
    /// existing signals, that widths agree and that nets do not form loops.
    pub fn set_transition(&mut self, ts: TransitionSystem) -> Result<(), CircuitError> {
        let err = CircuitError::Transition;
        let sort_of = |name: &str| self.sort_of(name);
        for (name, expr) in ts.assigns() {
            let (_, element) = self
                .lookup(name)
                .ok_or_else(|| err(format!("unknown assignment target `{name}`")))?;
            match element.class() {
                ElementClass::Net | ElementClass::Port(Dir::Out | Dir::InOut) => {}
                _ => return Err(err(format!("`{name}` cannot be defined by an assignment"))),
            }
            let sort = ts.sort(*expr, &sort_of).map_err(err)?;
            if sort != sort_of_kind(element.kind()) {
                return Err(err(format!("`{name}` is assigned a value of sort {sort:?}")));
            }
        }
        for reg in ts.registers() {
            let (_, element) = self
                .lookup(&reg.name)
                .ok_or_else(|| err(format!("unknown register `{}`", reg.name)))?;
            if element.class() != ElementClass::Register {
                return Err(err(format!("`{}` is not a register", reg.name)));
            }
            let expected = sort_of_kind(element.kind());
            for e in std::iter::once(reg.next).chain(reg.init) {
                let sort = ts.sort(e, &sort_of).map_err(err)?;
                if sort != expected {
                    return Err(err(format!(
                        "`{}` expects sort {expected:?}, found {sort:?}",
                        reg.name
                    )));
                }
            }
        }
        ts.check_acyclic().map_err(err)?;
        self.transition = Some(ts);
        Ok(())
    }

    /// Reads a circuit document. Relative source paths are taken relative to
    /// the directory containing the document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CircuitError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| CircuitError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_json_str(&text, path.parent())
    }

    pub fn from_json_str(text: &str, base_dir: Option<&Path>) -> Result<Self, CircuitError> {
        let doc: CircuitDoc = serde_json::from_str(text)?;
        let mut circuit = Circuit::new(&doc.name, doc.module.as_deref().unwrap_or(&doc.name));
        for source in doc.sources {
            let source = match base_dir {
                Some(dir) if source.is_relative() => dir.join(source),
                _ => source,
            };
            circuit.add_source(source);
        }
        let top = circuit.top();
        circuit.add_scope(top, doc.ports, doc.signals, doc.instances)?;
        if let Some(t) = doc.transition {
            let mut ts = TransitionSystem::new();
            for (name, text) in &t.assign {
                let e = parse_expression(text, &mut ts).map_err(CircuitError::Transition)?;
                ts.assign(name, e);
            }
            for (name, text) in &t.next {
                let next = parse_expression(text, &mut ts).map_err(CircuitError::Transition)?;
                let init = match t.init.get(name) {
                    Some(text) => {
                        Some(parse_expression(text, &mut ts).map_err(CircuitError::Transition)?)
                    }
                    None => None,
                };
                ts.register(name, next, init);
            }
            if let Some(name) = t.init.keys().find(|n| !t.next.contains_key(*n)) {
                return Err(CircuitError::Transition(format!(
                    "`{name}` has a reset value but no next-state function"
                )));
            }
            circuit.set_transition(ts)?;
        }
        Ok(circuit)
    }

    fn add_scope(
        &mut self,
        inst: InstanceId,
        ports: Vec<PortDoc>,
        signals: Vec<SignalDoc>,
        instances: Vec<InstanceDoc>,
    ) -> Result<(), CircuitError> {
        for p in ports {
            self.add_instance_port(
                inst,
                Port {
                    name: p.name,
                    dir: p.dir,
                    kind: p.kind,
                    clock: p.clock,
                },
            )?;
        }
        for s in signals {
            self.add_signal(
                inst,
                Signal {
                    name: s.name,
                    kind: s.kind,
                    class: s.class,
                    introspectable: s.introspectable,
                },
            )?;
        }
        for child in instances {
            let id = self.add_instance(inst, &child.name, &child.module)?;
            self.add_scope(id, child.ports, child.signals, child.instances)?;
        }
        Ok(())
    }
}

impl Index<InstanceId> for Circuit {
    type Output = Instance;

    fn index(&self, index: InstanceId) -> &Self::Output {
        &self.instances[index]
    }
}

pub fn sort_of_kind(kind: ValueKind) -> Sort {
    match kind.width() {
        Some(w) => Sort::BitVec(w),
        None => Sort::Real,
    }
}

fn check_kind(name: &str, kind: ValueKind) -> Result<(), CircuitError> {
    let reason = match kind {
        ValueKind::BitVec(0) => Some("bit-vectors need at least one bit"),
        ValueKind::Fixed { width, .. } if width == 0 || width > 64 => {
            Some("fixed-point width must be between 1 and 64")
        }
        ValueKind::Fixed { width, frac } if frac > width => {
            Some("more fractional bits than total bits")
        }
        _ => None,
    };
    match reason {
        Some(reason) => Err(CircuitError::InvalidElement {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CircuitDoc {
    name: String,
    module: Option<String>,
    #[serde(default)]
    sources: Vec<PathBuf>,
    #[serde(default)]
    ports: Vec<PortDoc>,
    #[serde(default)]
    signals: Vec<SignalDoc>,
    #[serde(default)]
    instances: Vec<InstanceDoc>,
    transition: Option<TransitionDoc>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PortDoc {
    name: String,
    dir: Dir,
    kind: ValueKind,
    #[serde(default)]
    clock: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SignalDoc {
    name: String,
    kind: ValueKind,
    #[serde(default = "default_class")]
    class: SignalClass,
    #[serde(default)]
    introspectable: bool,
}

fn default_class() -> SignalClass {
    SignalClass::Net
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InstanceDoc {
    name: String,
    module: String,
    #[serde(default)]
    ports: Vec<PortDoc>,
    #[serde(default)]
    signals: Vec<SignalDoc>,
    #[serde(default)]
    instances: Vec<InstanceDoc>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TransitionDoc {
    #[serde(default)]
    assign: BTreeMap<String, String>,
    #[serde(default)]
    next: BTreeMap<String, String>,
    #[serde(default)]
    init: BTreeMap<String, String>,
}
