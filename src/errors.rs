// Copyright 2026 Cornell University
// released under MIT License

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::action::ActionIdx;
use crate::backend::BackendKind;
use crate::session::SessionState;
use crate::value::ValueKind;

/// Why a hierarchical path did not resolve to a signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    EmptyPath,
    /// The hop with the given name is not an instance of its parent
    NoSuchInstance(String),
    /// The terminal name is neither a port nor a local net/register
    NoSuchSignal(String),
    /// The element exists but is internal and not flagged introspectable
    NotIntrospectable,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::EmptyPath => write!(f, "empty path"),
            UnresolvedReason::NoSuchInstance(name) => write!(f, "no instance named `{name}`"),
            UnresolvedReason::NoSuchSignal(name) => write!(f, "no port or signal named `{name}`"),
            UnresolvedReason::NotIntrospectable => {
                write!(f, "internal signal is not introspectable")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot resolve `{path}`: {reason}")]
pub struct UnresolvedSignal {
    pub path: String,
    pub reason: UnresolvedReason,
}

impl UnresolvedSignal {
    pub fn new(path: impl Into<String>, reason: UnresolvedReason) -> Self {
        Self {
            path: path.into(),
            reason,
        }
    }
}

/// Errors raised while recording actions. They never reach a backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error(transparent)]
    UnresolvedSignal(#[from] UnresolvedSignal),
    #[error("type mismatch on `{signal}`: expected {expected}, found {found}")]
    TypeMismatch {
        signal: String,
        expected: ValueKind,
        found: String,
    },
    #[error("`{signal}` cannot be driven")]
    NotDrivable { signal: String },
    #[error("cannot step `{signal}`: {reason}")]
    InvalidStep { signal: String, reason: String },
    #[error("tolerance must be a finite non-negative number, found {0}")]
    InvalidTolerance(f64),
    #[error("invalid print format `{format}`: {reason}")]
    InvalidFormat { format: String, reason: String },
    #[error("delay must be a positive number of seconds, found {0}")]
    InvalidDelay(f64),
    #[error("the action log is finalized and cannot be extended")]
    Finalized,
    #[error("vector file `{file}` line {line}: {reason}")]
    Vectors {
        file: String,
        line: usize,
        reason: String,
    },
}

/// Errors raised while lowering a finalized log for one backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{backend} backend: {simulator} cannot access internal signal `{signal}` ({action})")]
    ProbeUnsupported {
        backend: BackendKind,
        action: ActionIdx,
        signal: String,
        simulator: String,
    },
    #[error("{backend} backend: {}{reason}", at_action(.action))]
    CompileFailure {
        backend: BackendKind,
        action: Option<ActionIdx>,
        reason: String,
    },
    #[error("the action log must be finalized before it is compiled")]
    NotFinalized,
}

fn at_action(action: &Option<ActionIdx>) -> String {
    match action {
        Some(idx) => format!("{idx}: "),
        None => String::new(),
    }
}

/// Errors raised while running an artifact. None of them is a test failure.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to launch `{command}`: {reason}")]
    Launch { command: String, reason: String },
    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("run was cancelled")]
    Cancelled,
    #[error("`{command}` failed with {status}\n{stdout}\n{stderr}")]
    Crashed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("simulation did not converge: {0}")]
    NonConvergence(String),
    #[error("`{command}` reported `{marker}`\n{stdout}\n{stderr}")]
    ErrorMarker {
        command: String,
        marker: String,
        stdout: String,
        stderr: String,
    },
    #[error("expected output file `{}` was not produced", .0.display())]
    MissingOutput(PathBuf),
    #[error("failed to perform i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Only launch failures are worth retrying with the identical artifact
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Launch { .. })
    }
}

/// Everything a `Session` can report to its caller
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("failed to write vector file `{}`: {error}", .path.display())]
    VectorOutput {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl SessionError {
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        SessionError::InvalidState { operation, state }
    }

    /// Infrastructure faults are reported with a different exit code than failing tests
    pub fn is_construction(&self) -> bool {
        matches!(self, SessionError::Construction(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn test_error_messages() {
        let err = UnresolvedSignal::new("dut.x", UnresolvedReason::NotIntrospectable);
        assert_eq!(
            err.to_string(),
            "cannot resolve `dut.x`: internal signal is not introspectable"
        );

        let err = CompileError::CompileFailure {
            backend: BackendKind::Analog,
            action: Some(ActionIdx::new(3)),
            reason: "missing tolerance".to_string(),
        };
        assert_eq!(err.to_string(), "analog backend: action3: missing tolerance");

        let err = CompileError::CompileFailure {
            backend: BackendKind::Symbolic,
            action: None,
            reason: "no transition system".to_string(),
        };
        assert_eq!(err.to_string(), "symbolic backend: no transition system");
    }

    #[test]
    fn test_only_launch_is_transient() {
        let launch = ExecutionError::Launch {
            command: "iverilog".to_string(),
            reason: "not found".to_string(),
        };
        assert!(launch.is_transient());
        assert!(!ExecutionError::Cancelled.is_transient());
        assert!(!ExecutionError::NonConvergence("timestep too small".into()).is_transient());
    }
}
