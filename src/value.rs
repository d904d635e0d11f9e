// Copyright 2026 Cornell University
// released under MIT License

//! # Value model
//! Typed values that can be poked into or expected from a signal, together with
//! the comparison rules the backends use when they harvest results.

use baa::{BitVecOps, BitVecValue};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Declared kind of a signal. Every poked or expected `Value` has to fit the kind
/// of the signal it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    #[serde(rename = "bit")]
    Bit,
    #[serde(rename = "bits")]
    BitVec(u32),
    /// Signed two's complement fixed-point number with `frac` fractional bits
    #[serde(rename = "fixed")]
    Fixed { width: u32, frac: u32 },
    #[serde(rename = "real")]
    Real,
}

impl ValueKind {
    /// Number of bits used to represent the kind, `None` for reals
    pub fn width(&self) -> Option<u32> {
        match self {
            ValueKind::Bit => Some(1),
            ValueKind::BitVec(w) => Some(*w),
            ValueKind::Fixed { width, .. } => Some(*width),
            ValueKind::Real => None,
        }
    }

    /// Fixed-point and real quantities are compared numerically
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueKind::Fixed { .. } | ValueKind::Real)
    }
}

/// A signed fixed-point value stored as its raw two's complement bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedPoint {
    raw: i64,
    width: u32,
    frac: u32,
}

impl FixedPoint {
    /// Rounds `value` to the nearest representable number.
    /// Returns `None` if it does not fit into `width` bits.
    pub fn from_f64(value: f64, width: u32, frac: u32) -> Option<Self> {
        if !value.is_finite() || width == 0 || width > 64 || frac > width {
            return None;
        }
        let scaled = (value * (frac as f64).exp2()).round();
        let max = ((width - 1) as f64).exp2();
        if scaled >= max || scaled < -max {
            return None;
        }
        Some(Self {
            raw: scaled as i64,
            width,
            frac,
        })
    }

    /// Interprets the lowest `width` bits of `bits` as a signed number
    pub fn from_raw_bits(bits: u64, width: u32, frac: u32) -> Self {
        debug_assert!(width > 0 && width <= 64);
        let shift = 64 - width;
        let raw = ((bits << shift) as i64) >> shift;
        Self { raw, width, frac }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn frac(&self) -> u32 {
        self.frac
    }

    pub fn to_f64(&self) -> f64 {
        self.raw as f64 / (self.frac as f64).exp2()
    }

    /// Raw bits, masked to the declared width
    pub fn to_bits(&self) -> BitVecValue {
        let mask = if self.width == 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        };
        BitVecValue::from_u64(self.raw as u64 & mask, self.width)
    }

    pub fn kind(&self) -> ValueKind {
        ValueKind::Fixed {
            width: self.width,
            frac: self.frac,
        }
    }
}

/// A value that can be driven onto or expected from a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bit(bool),
    BitVec(BitVecValue),
    Fixed(FixedPoint),
    Real(f64),
    /// Free variable, only meaningful for the symbolic backend
    Symbolic(String),
    /// Expecting `DontCare` always passes, poking it drives a random value
    DontCare,
}

impl Value {
    pub fn bit(value: bool) -> Self {
        Value::Bit(value)
    }

    pub fn bits(value: u64, width: u32) -> Self {
        Value::BitVec(BitVecValue::from_u64(value, width))
    }

    pub fn real(value: f64) -> Self {
        Value::Real(value)
    }

    pub fn symbolic(name: impl Into<String>) -> Self {
        Value::Symbolic(name.into())
    }

    /// Whether this value can be assigned to or compared with a signal of `kind`
    pub fn fits(&self, kind: ValueKind) -> bool {
        match (self, kind) {
            (Value::DontCare, _) => true,
            (Value::Bit(_), ValueKind::Bit) => true,
            (Value::BitVec(bv), ValueKind::BitVec(w)) => bv.width() == w,
            (Value::Fixed(f), ValueKind::Fixed { .. }) => f.kind() == kind,
            (Value::Real(_), ValueKind::Real) => true,
            (Value::Symbolic(_), ValueKind::Bit | ValueKind::BitVec(_)) => true,
            _ => false,
        }
    }

    pub fn is_concrete(&self) -> bool {
        !matches!(self, Value::Symbolic(_) | Value::DontCare)
    }

    /// Short description of the value's shape, used in type errors
    pub fn describe(&self) -> String {
        match self {
            Value::Bit(_) => "bit".to_string(),
            Value::BitVec(bv) => format!("bits<{}>", bv.width()),
            Value::Fixed(f) => format!("fixed<{}, {}>", f.width(), f.frac()),
            Value::Real(_) => "real".to_string(),
            Value::Symbolic(name) => format!("symbolic value `{name}`"),
            Value::DontCare => "don't care".to_string(),
        }
    }

    /// Bit-level representation for bit, bit-vector and fixed-point values
    pub fn to_bits(&self) -> Option<BitVecValue> {
        match self {
            Value::Bit(b) => Some(BitVecValue::from_u64(*b as u64, 1)),
            Value::BitVec(bv) => Some(bv.clone()),
            Value::Fixed(f) => Some(f.to_bits()),
            _ => None,
        }
    }

    /// Decodes raw bits sampled from a simulator according to `kind`
    pub fn from_bits(bits: &BitVecValue, kind: ValueKind) -> Option<Value> {
        if kind.width() != Some(bits.width()) {
            return None;
        }
        match kind {
            ValueKind::Bit => bits.to_u64().map(|v| Value::Bit(v == 1)),
            ValueKind::BitVec(_) => Some(Value::BitVec(bits.clone())),
            ValueKind::Fixed { width, frac } => bits
                .to_u64()
                .map(|raw| Value::Fixed(FixedPoint::from_raw_bits(raw, width, frac))),
            ValueKind::Real => None,
        }
    }

    /// Numeric view of fixed-point and real values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Fixed(f) => Some(f.to_f64()),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Draws a uniformly distributed value of `kind`
    pub fn random(kind: ValueKind, rng: &mut StdRng) -> Value {
        match kind {
            ValueKind::Bit => Value::Bit(rng.gen_bool(0.5)),
            ValueKind::BitVec(w) => Value::BitVec(BitVecValue::random(rng, w)),
            ValueKind::Fixed { width, frac } => {
                let raw: u64 = rng.gen();
                Value::Fixed(FixedPoint::from_raw_bits(raw, width, frac))
            }
            ValueKind::Real => Value::Real(rng.gen_range(-1.0..1.0)),
        }
    }

    /// Replaces `DontCare` by a random value of `kind`, leaves anything else untouched
    pub fn or_random(&self, kind: ValueKind, rng: &mut StdRng) -> Value {
        match self {
            Value::DontCare => Value::random(kind, rng),
            other => other.clone(),
        }
    }
}

/// Acceptable deviation for numeric expectations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Absolute(f64),
    /// Fraction of the magnitude of the expected value
    Relative(f64),
}

impl Tolerance {
    pub fn is_valid(&self) -> bool {
        let t = match self {
            Tolerance::Absolute(t) | Tolerance::Relative(t) => *t,
        };
        t.is_finite() && t >= 0.0
    }

    /// Largest admissible absolute deviation from `expected`
    pub fn bound(&self, expected: f64) -> f64 {
        match self {
            Tolerance::Absolute(t) => *t,
            Tolerance::Relative(r) => r * expected.abs(),
        }
    }

    pub fn admits(&self, expected: f64, actual: f64) -> bool {
        (actual - expected).abs() <= self.bound(expected)
    }
}

/// Compares a harvested `actual` value against an `expected` one.
///
/// Bits are compared exactly. Fixed-point and real values use `tolerance`
/// when one was given and exact equality otherwise.
pub fn values_match(expected: &Value, actual: &Value, tolerance: Option<Tolerance>) -> bool {
    match (expected, actual) {
        (Value::DontCare, _) => true,
        (Value::Bit(a), Value::Bit(b)) => a == b,
        (Value::BitVec(a), Value::BitVec(b)) => a.width() == b.width() && a.is_equal(b),
        (Value::Fixed(a), Value::Fixed(b)) if tolerance.is_none() => a == b,
        (Value::Fixed(_) | Value::Real(_), Value::Fixed(_) | Value::Real(_)) => {
            match (expected.as_f64(), actual.as_f64()) {
                (Some(e), Some(a)) => match tolerance {
                    Some(tol) => tol.admits(e, a),
                    None => e == a,
                },
                _ => false,
            }
        }
        _ => false,
    }
}

/// Explicit mapping between logic levels and voltages, used whenever a digital
/// value meets an analog net.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMap {
    /// Voltage driven for a logic 0
    pub vlow: f64,
    /// Voltage driven for a logic 1
    pub vhigh: f64,
    /// Highest voltage read as a logic 0
    pub vil: f64,
    /// Lowest voltage read as a logic 1
    pub vih: f64,
}

impl ThresholdMap {
    pub fn validate(&self) -> Result<(), String> {
        let ordered = self.vlow <= self.vil && self.vil < self.vih && self.vih <= self.vhigh;
        if ordered {
            Ok(())
        } else {
            Err(format!(
                "thresholds must satisfy vlow <= vil < vih <= vhigh, got {} / {} / {} / {}",
                self.vlow, self.vil, self.vih, self.vhigh
            ))
        }
    }

    pub fn drive(&self, bit: bool) -> f64 {
        if bit {
            self.vhigh
        } else {
            self.vlow
        }
    }

    /// `None` if the voltage sits between the two thresholds
    pub fn read(&self, voltage: f64) -> Option<bool> {
        if voltage >= self.vih {
            Some(true)
        } else if voltage <= self.vil {
            Some(false)
        } else {
            None
        }
    }
}

/// A value as written in a script or a circuit document, before the kind of
/// its target is known.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Literal with an explicit width, e.g. `8'hff`
    Sized(BitVecValue),
    /// Unsized integer, takes the width of its target
    Int(u128),
    Real(f64),
    Symbolic(String),
    DontCare,
}

impl Literal {
    /// Converts the literal into a value of `kind`. On mismatch the error
    /// describes what was found.
    pub fn into_value(self, kind: ValueKind) -> Result<Value, String> {
        match (self, kind) {
            (Literal::DontCare, _) => Ok(Value::DontCare),
            (Literal::Symbolic(name), ValueKind::Bit | ValueKind::BitVec(_)) => {
                Ok(Value::Symbolic(name))
            }
            (Literal::Symbolic(name), _) => Err(format!("symbolic value `{name}`")),
            (Literal::Sized(bv), kind) => {
                if kind.width() != Some(bv.width()) {
                    return Err(format!("{}-bit literal", bv.width()));
                }
                Value::from_bits(&bv, kind).ok_or_else(|| format!("{}-bit literal", bv.width()))
            }
            (Literal::Int(n), ValueKind::Bit) => match n {
                0 | 1 => Ok(Value::Bit(n == 1)),
                _ => Err(format!("integer {n}")),
            },
            (Literal::Int(n), ValueKind::BitVec(w)) => {
                bits_from_u128(n, w).map(Value::BitVec).ok_or_else(|| format!("integer {n}"))
            }
            (Literal::Int(n), ValueKind::Fixed { width, frac }) => {
                FixedPoint::from_f64(n as f64, width, frac)
                    .map(Value::Fixed)
                    .ok_or_else(|| format!("integer {n}"))
            }
            (Literal::Int(n), ValueKind::Real) => Ok(Value::Real(n as f64)),
            (Literal::Real(r), ValueKind::Fixed { width, frac }) => {
                FixedPoint::from_f64(r, width, frac)
                    .map(Value::Fixed)
                    .ok_or_else(|| format!("real {r}"))
            }
            (Literal::Real(r), ValueKind::Real) => Ok(Value::Real(r)),
            (Literal::Real(r), _) => Err(format!("real {r}")),
        }
    }
}

/// Builds a `width`-bit vector holding `value`, `None` if it does not fit
pub fn bits_from_u128(value: u128, width: u32) -> Option<BitVecValue> {
    if width == 0 || (width < 128 && value >> width != 0) {
        return None;
    }
    if width <= 64 {
        return Some(BitVecValue::from_u64(value as u64, width));
    }
    let digits = format!("{value:b}");
    let padding = "0".repeat(width as usize - digits.len());
    BitVecValue::from_bit_str(&format!("{padding}{digits}")).ok()
}

/// Parses the digits of a sized literal such as `8'hff` (`radix` is one of
/// `b`, `o`, `d`, `h`). Underscores are ignored.
pub fn parse_sized_literal(width: u32, radix: char, digits: &str) -> Result<BitVecValue, String> {
    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    if width == 0 {
        return Err("literal width must be at least 1".to_string());
    }
    if digits.is_empty() {
        return Err("literal has no digits".to_string());
    }
    let bits_per_digit = match radix.to_ascii_lowercase() {
        'b' => 1,
        'o' => 3,
        'h' => 4,
        'd' => {
            let value = digits
                .parse::<u128>()
                .map_err(|e| format!("invalid decimal literal `{digits}`: {e}"))?;
            return bits_from_u128(value, width)
                .ok_or_else(|| format!("{value} does not fit into {width} bits"));
        }
        other => return Err(format!("unknown radix `{other}`")),
    };
    let mut bits = String::with_capacity(digits.len() * bits_per_digit);
    for c in digits.chars() {
        let d = c
            .to_digit(1 << bits_per_digit)
            .ok_or_else(|| format!("invalid digit `{c}` for radix `{radix}`"))?;
        bits.push_str(&format!("{d:0bits_per_digit$b}"));
    }
    let width = width as usize;
    let bits = if bits.len() > width {
        let (overflow, rest) = bits.split_at(bits.len() - width);
        if overflow.contains('1') {
            return Err(format!("`{digits}` does not fit into {width} bits"));
        }
        rest.to_string()
    } else {
        format!("{}{bits}", "0".repeat(width - bits.len()))
    };
    BitVecValue::from_bit_str(&bits).map_err(|e| format!("invalid literal `{digits}`: {e:?}"))
}
