// Copyright 2026 Cornell University
// released under MIT License

//! # Action log
//! The backend independent record of a test. Actions are kept in the order in
//! which they were appended; that order is the only notion of time.

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use std::ops::Index;
use std::path::PathBuf;

use crate::errors::ConstructionError;
use crate::signal::SignalRef;
use crate::value::{Tolerance, Value};

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct ActionIdx(u32);
entity_impl!(ActionIdx, "action");

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Poke {
        signal: SignalRef,
        value: Value,
    },
    Expect {
        signal: SignalRef,
        value: Value,
        tolerance: Option<Tolerance>,
    },
    /// `count` full periods of `clock`
    Step {
        clock: SignalRef,
        count: u32,
    },
    Peek(SignalRef),
    /// `format` contains one `{}` per signal
    Print {
        format: String,
        signals: Vec<SignalRef>,
    },
    /// Settle all pending pokes
    Eval,
    /// Let `seconds` of simulated time pass (analog only)
    Delay(f64),
    /// Sample `signals` into one line of `file`
    WriteVector {
        file: PathBuf,
        signals: Vec<SignalRef>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Poke { .. } => "poke",
            Action::Expect { .. } => "expect",
            Action::Step { .. } => "step",
            Action::Peek(_) => "peek",
            Action::Print { .. } => "print",
            Action::Eval => "eval",
            Action::Delay(_) => "delay",
            Action::WriteVector { .. } => "dump",
        }
    }

    /// Signals this action reads from or writes to
    pub fn signals(&self) -> Vec<&SignalRef> {
        match self {
            Action::Poke { signal, .. } | Action::Expect { signal, .. } => vec![signal],
            Action::Step { clock, .. } => vec![clock],
            Action::Peek(signal) => vec![signal],
            Action::Print { signals, .. } | Action::WriteVector { signals, .. } => {
                signals.iter().collect()
            }
            Action::Eval | Action::Delay(_) => vec![],
        }
    }

    /// Whether the action samples signal values that a backend has to report
    pub fn is_observation(&self) -> bool {
        matches!(
            self,
            Action::Expect { .. } | Action::Peek(_) | Action::Print { .. } | Action::WriteVector { .. }
        )
    }

    /// The checks `ActionLog::append` applies, without recording anything
    pub(crate) fn check(&self) -> Result<(), ConstructionError> {
        match self {
            Action::Poke { signal, value } => {
                if !signal.is_drivable() {
                    return Err(ConstructionError::NotDrivable {
                        signal: signal.hier_name(),
                    });
                }
                check_fits(signal, value)
            }
            Action::Expect {
                signal,
                value,
                tolerance,
            } => {
                if let Some(tol) = tolerance {
                    if !tol.is_valid() {
                        let (Tolerance::Absolute(t) | Tolerance::Relative(t)) = tol;
                        return Err(ConstructionError::InvalidTolerance(*t));
                    }
                }
                check_fits(signal, value)
            }
            Action::Step { clock, count } => {
                let reason = if !clock.clock {
                    Some("not a clock")
                } else if *count == 0 {
                    Some("the step count must be at least 1")
                } else {
                    None
                };
                match reason {
                    Some(reason) => Err(ConstructionError::InvalidStep {
                        signal: clock.hier_name(),
                        reason: reason.to_string(),
                    }),
                    None => Ok(()),
                }
            }
            Action::Print { format, signals } => {
                let holes = format.matches("{}").count();
                if holes != signals.len() {
                    return Err(ConstructionError::InvalidFormat {
                        format: format.clone(),
                        reason: format!(
                            "{holes} placeholder(s) but {} signal(s)",
                            signals.len()
                        ),
                    });
                }
                Ok(())
            }
            Action::Delay(seconds) => {
                if seconds.is_finite() && *seconds > 0.0 {
                    Ok(())
                } else {
                    Err(ConstructionError::InvalidDelay(*seconds))
                }
            }
            Action::WriteVector { file, signals } => {
                if signals.is_empty() {
                    return Err(ConstructionError::Vectors {
                        file: file.display().to_string(),
                        line: 0,
                        reason: "no signals to sample".to_string(),
                    });
                }
                Ok(())
            }
            Action::Peek(_) | Action::Eval => Ok(()),
        }
    }
}

fn check_fits(signal: &SignalRef, value: &Value) -> Result<(), ConstructionError> {
    if value.fits(signal.kind) {
        Ok(())
    } else {
        Err(ConstructionError::TypeMismatch {
            signal: signal.hier_name(),
            expected: signal.kind,
            found: value.describe(),
        })
    }
}

/// Byte range and file id of the script text an action came from
pub type Location = (usize, usize, usize);

#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    actions: PrimaryMap<ActionIdx, Action>,
    locations: SecondaryMap<ActionIdx, Option<Location>>,
    finalized: bool,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and records `action`. A rejected action leaves the log untouched.
    pub fn append(&mut self, action: Action) -> Result<ActionIdx, ConstructionError> {
        if self.finalized {
            return Err(ConstructionError::Finalized);
        }
        action.check()?;
        Ok(self.actions.push(action))
    }

    /// Like `append`, remembering where in a script the action was written
    pub fn append_at(
        &mut self,
        action: Action,
        location: Location,
    ) -> Result<ActionIdx, ConstructionError> {
        let idx = self.append(action)?;
        self.locations[idx] = Some(location);
        Ok(idx)
    }

    pub fn location(&self, idx: ActionIdx) -> Option<Location> {
        self.locations.get(idx).copied().flatten()
    }

    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionIdx, &Action)> {
        self.actions.iter()
    }

    /// All expectations, numbered in the order they appear
    pub fn expects(&self) -> impl Iterator<Item = (ActionIdx, &Action)> {
        self.iter()
            .filter(|(_, a)| matches!(a, Action::Expect { .. }))
    }
}

impl Index<ActionIdx> for ActionLog {
    type Output = Action;

    fn index(&self, index: ActionIdx) -> &Self::Output {
        &self.actions[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::tests::counter;
    use crate::signal::resolve;

    fn log_for_counter() -> (ActionLog, SignalRef, SignalRef, SignalRef) {
        let c = counter();
        let a = resolve(&c, "a").unwrap();
        let clk = resolve(&c, "clk").unwrap();
        let r = resolve(&c, "r").unwrap();
        (ActionLog::new(), a, clk, r)
    }

    #[test]
    fn test_append_keeps_order() {
        let (mut log, a, clk, r) = log_for_counter();
        let p0 = log
            .append(Action::Poke {
                signal: a.clone(),
                value: Value::bit(true),
            })
            .unwrap();
        let p1 = log
            .append(Action::Poke {
                signal: a.clone(),
                value: Value::bit(false),
            })
            .unwrap();
        log.append(Action::Step { clock: clk, count: 1 }).unwrap();
        log.append(Action::Expect {
            signal: r,
            value: Value::bit(false),
            tolerance: None,
        })
        .unwrap();
        assert!(p0 < p1);
        assert_eq!(log.len(), 4);
        // both pokes to `a` stay separate events
        assert!(matches!(log[p0], Action::Poke { value: Value::Bit(true), .. }));
        assert!(matches!(log[p1], Action::Poke { value: Value::Bit(false), .. }));
        assert_eq!(log.expects().count(), 1);
    }

    #[test]
    fn test_append_rejects() {
        let (mut log, a, clk, r) = log_for_counter();
        let c = counter();
        let out = resolve(&c, "out").unwrap();

        let err = log
            .append(Action::Poke {
                signal: a.clone(),
                value: Value::bits(1, 4),
            })
            .unwrap_err();
        assert!(matches!(err, ConstructionError::TypeMismatch { .. }));

        let err = log
            .append(Action::Poke {
                signal: out,
                value: Value::bit(true),
            })
            .unwrap_err();
        assert!(matches!(err, ConstructionError::NotDrivable { .. }));

        let err = log
            .append(Action::Step {
                clock: a.clone(),
                count: 1,
            })
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidStep { .. }));

        let err = log.append(Action::Step { clock: clk, count: 0 }).unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidStep { .. }));

        let err = log
            .append(Action::Expect {
                signal: r.clone(),
                value: Value::bit(true),
                tolerance: Some(Tolerance::Absolute(-1.0)),
            })
            .unwrap_err();
        assert_eq!(err, ConstructionError::InvalidTolerance(-1.0));

        let err = log
            .append(Action::Print {
                format: "r = {} {}".to_string(),
                signals: vec![r],
            })
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidFormat { .. }));

        assert!(log.append(Action::Delay(0.0)).is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn test_finalized_log_is_frozen() {
        let (mut log, a, _, _) = log_for_counter();
        log.append_at(
            Action::Poke {
                signal: a.clone(),
                value: Value::bit(true),
            },
            (0, 8, 0),
        )
        .unwrap();
        log.finalize();
        let before = log.clone();
        for _ in 0..3 {
            let err = log.append(Action::Eval).unwrap_err();
            assert_eq!(err, ConstructionError::Finalized);
        }
        assert_eq!(log.len(), before.len());
        assert_eq!(log.iter().count(), 1);
        let first = log.iter().next().unwrap().0;
        assert_eq!(log.location(first), Some((0, 8, 0)));
    }
}
