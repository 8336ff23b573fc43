//! Typed values and signal quality.
//!
//! `TypedValue` equality is bitwise for `Double` (NaN equals NaN iff
//! bit-identical; +0.0 does not equal -0.0) and structural otherwise. This
//! is what makes change detection in the state cache immune to spurious
//! re-emission caused by floating point comparison surprises.

use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// The active arm of a `TypedValue`, used in `ArgSpec`/`SignalSpec` to
/// describe expected types without carrying a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
  Double,
  Int64,
  UInt64,
  Bool,
  String,
  Bytes,
}

/// A provider-reported or caller-supplied value, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypedValue {
  Double(f64),
  Int64(i64),
  UInt64(u64),
  Bool(bool),
  String(String),
  Bytes(Vec<u8>),
}

impl TypedValue {
  /// The `ValueType` this value carries.
  pub fn value_type(&self) -> ValueType {
    match self {
      TypedValue::Double(_) => ValueType::Double,
      TypedValue::Int64(_) => ValueType::Int64,
      TypedValue::UInt64(_) => ValueType::UInt64,
      TypedValue::Bool(_) => ValueType::Bool,
      TypedValue::String(_) => ValueType::String,
      TypedValue::Bytes(_) => ValueType::Bytes,
    }
  }

  /// Bitwise-aware equality: the only sound notion of "did the signal
  /// change" for floating point readings. See module docs.
  pub fn values_equal(&self, other: &TypedValue) -> bool {
    match (self, other) {
      (TypedValue::Double(a), TypedValue::Double(b)) => a.to_bits() == b.to_bits(),
      (TypedValue::Int64(a), TypedValue::Int64(b)) => a == b,
      (TypedValue::UInt64(a), TypedValue::UInt64(b)) => a == b,
      (TypedValue::Bool(a), TypedValue::Bool(b)) => a == b,
      (TypedValue::String(a), TypedValue::String(b)) => a == b,
      (TypedValue::Bytes(a), TypedValue::Bytes(b)) => a == b,
      _ => false,
    }
  }

  /// Numeric value as `f64`, used for range validation across numeric
  /// arms. Returns `None` for non-numeric values. Uses `num_traits` so
  /// every numeric arm converts through one trait method rather than a
  /// hand-rolled `as` cast per arm.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      TypedValue::Double(v) => v.to_f64(),
      TypedValue::Int64(v) => v.to_f64(),
      TypedValue::UInt64(v) => v.to_f64(),
      _ => None,
    }
  }
}

// `TypedValue` intentionally does not derive `PartialEq`: the bitwise
// double semantics are a deliberate method, not the derived field-by-field
// comparison (which would agree for every arm except `Double`, inviting
// accidental use of `==` where `values_equal` was meant).

/// Freshness/validity indicator on a cached signal value, ordered by
/// severity so a device's overall quality is the `max` of its signals'.
///
/// Encoded on the wire as its numeric discriminant (`serde_repr`) rather
/// than its variant name, so an external adapter's severity comparisons
/// survive a round trip without re-deriving the ranking from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Quality {
  Ok = 0,
  Stale = 1,
  Unavailable = 2,
  Fault = 3,
  Unknown = 4,
}

// `Quality`'s severity ordering is load-bearing (State Cache device
// aggregation takes `max()` over a device's signal qualities) and depends
// on the declaration order above matching the `#[repr(u8)]` discriminants
// spec.md §3 assigns. Catch an accidental reorder at compile time.
static_assertions::const_assert_eq!(Quality::Ok as u8, 0);
static_assertions::const_assert_eq!(Quality::Unknown as u8, 4);
static_assertions::assert_impl_all!(Quality: Send, Sync);
static_assertions::assert_impl_all!(TypedValue: Send, Sync);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn double_equality_is_bitwise() {
    let nan_a = TypedValue::Double(f64::NAN);
    let nan_b = TypedValue::Double(f64::NAN);
    assert!(nan_a.values_equal(&nan_b));

    let nan_other = TypedValue::Double(f64::from_bits(f64::NAN.to_bits() ^ 1));
    assert!(!nan_a.values_equal(&nan_other));

    let pos_zero = TypedValue::Double(0.0);
    let neg_zero = TypedValue::Double(-0.0);
    assert!(!pos_zero.values_equal(&neg_zero));
  }

  #[test]
  fn quality_orders_by_severity() {
    assert!(Quality::Ok < Quality::Stale);
    assert!(Quality::Stale < Quality::Unavailable);
    assert!(Quality::Unavailable < Quality::Fault);
    assert!(Quality::Fault < Quality::Unknown);
  }

  #[test]
  fn cross_type_values_never_equal() {
    let a = TypedValue::Int64(1);
    let b = TypedValue::UInt64(1);
    assert!(!a.values_equal(&b));
  }
}
