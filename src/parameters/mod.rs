//! Parameter Manager: definition-driven runtime configuration with
//! change events (spec.md §4.6).

use std::{collections::HashMap, sync::RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::events::{Event, EventEmitter};
use crate::value::{TypedValue, ValueType};

/// The set of allowed values a string/int parameter may take, if
/// restricted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AllowedValues {
  Strings(Vec<String>),
  Ints(Vec<i64>),
}

/// Inclusive numeric bounds for a `DOUBLE`/`INT64` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
  pub min: f64,
  pub max: f64,
}

/// A named, typed, validated runtime configuration value.
///
/// Does not derive `PartialEq`: `value` is a `TypedValue`, whose equality
/// is deliberately not the derived field-by-field comparison (see
/// `value.rs`); callers that need to compare values use
/// `TypedValue::values_equal` explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
  pub name: String,
  pub value_type: ValueType,
  pub value: TypedValue,
  pub range: Option<ParameterRange>,
  pub allowed_values: Option<AllowedValues>,
}

fn to_display_string(value: &TypedValue) -> String {
  match value {
    TypedValue::Double(v) => v.to_string(),
    TypedValue::Int64(v) => v.to_string(),
    TypedValue::UInt64(v) => v.to_string(),
    TypedValue::Bool(v) => v.to_string(),
    TypedValue::String(v) => v.clone(),
    TypedValue::Bytes(v) => format!("{v:?}"),
  }
}

/// Thread-safe store of parameter definitions. `set` validates under an
/// exclusive lock, applies the change, releases the lock, then emits a
/// `ParameterChange` event — the same apply-then-notify-outside-the-lock
/// discipline as the mode manager (spec.md §4.6, §9).
pub struct ParameterManager {
  definitions: RwLock<HashMap<String, ParameterDefinition>>,
  emitter: EventEmitter,
}

impl ParameterManager {
  pub fn new(definitions: Vec<ParameterDefinition>, emitter: EventEmitter) -> Self {
    ParameterManager {
      definitions: RwLock::new(definitions.into_iter().map(|d| (d.name.clone(), d)).collect()),
      emitter,
    }
  }

  pub fn get(&self, name: &str) -> KernelResult<TypedValue> {
    self
      .definitions
      .read()
      .unwrap()
      .get(name)
      .map(|d| d.value.clone())
      .ok_or_else(|| KernelError::NotFound(format!("parameter '{name}'")))
  }

  pub fn get_definition(&self, name: &str) -> KernelResult<ParameterDefinition> {
    self
      .definitions
      .read()
      .unwrap()
      .get(name)
      .cloned()
      .ok_or_else(|| KernelError::NotFound(format!("parameter '{name}'")))
  }

  pub fn get_all_definitions(&self) -> Vec<ParameterDefinition> {
    self.definitions.read().unwrap().values().cloned().collect()
  }

  /// Validates and applies a new value for `name`. Rejects an unknown
  /// name, a type mismatch, an out-of-range numeric, or a disallowed
  /// enumerated value — all before touching the stored value.
  pub fn set(&self, name: &str, value: TypedValue) -> KernelResult<()> {
    let (old_str, new_str) = {
      let mut defs = self.definitions.write().unwrap();
      let def = defs
        .get_mut(name)
        .ok_or_else(|| KernelError::NotFound(format!("parameter '{name}'")))?;

      if def.value_type != value.value_type() {
        return Err(KernelError::InvalidArgument(format!(
          "parameter '{name}' expects {:?}, got {:?}",
          def.value_type,
          value.value_type()
        )));
      }

      if let Some(range) = def.range {
        let numeric = value
          .as_f64()
          .expect("range is only set on numeric parameter types");
        if numeric < range.min {
          return Err(KernelError::InvalidArgument(format!(
            "parameter '{name}' value {numeric} below minimum {}",
            range.min
          )));
        }
        if numeric > range.max {
          return Err(KernelError::InvalidArgument(format!(
            "parameter '{name}' value {numeric} above maximum {}",
            range.max
          )));
        }
      }

      if let Some(allowed) = &def.allowed_values {
        let ok = match (allowed, &value) {
          (AllowedValues::Strings(list), TypedValue::String(s)) => list.contains(s),
          (AllowedValues::Ints(list), TypedValue::Int64(i)) => list.contains(i),
          _ => false,
        };
        if !ok {
          return Err(KernelError::InvalidArgument(format!(
            "parameter '{name}' value is not among its allowed values"
          )));
        }
      }

      let old_str = to_display_string(&def.value);
      let new_str = to_display_string(&value);
      def.value = value;
      (old_str, new_str)
    };

    log::info!("parameter '{name}': {old_str} -> {new_str}");

    self.emitter.emit(Event::ParameterChange {
      event_id: 0,
      name: name.to_string(),
      old_value: old_str,
      new_value: new_str,
      ts: Utc::now(),
    });
    Ok(())
  }
}
