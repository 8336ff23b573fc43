//! Capability description types: what a device can be read from and
//! called into, independent of any live value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::ValueType;

/// Inclusive numeric range used to validate `ArgSpec` values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
  pub min: f64,
  pub max: f64,
}

impl NumericRange {
  pub fn contains(&self, v: f64) -> bool {
    v >= self.min && v <= self.max
  }
}

/// Description of one readable/writable telemetry element on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSpec {
  pub signal_id: String,
  pub label: String,
  pub value_type: ValueType,
  pub readable: bool,
  pub writable: bool,
  pub is_default_polled: bool,
  pub poll_hint_hz: Option<f64>,
}

/// Description of one named argument accepted by a `FunctionSpec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
  pub name: String,
  pub value_type: ValueType,
  pub required: bool,
  pub range: Option<NumericRange>,
}

/// Description of one callable action on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
  pub function_id: u32,
  pub function_name: String,
  pub label: String,
  pub args: Vec<ArgSpec>,
}

impl FunctionSpec {
  pub fn arg(&self, name: &str) -> Option<&ArgSpec> {
    self.args.iter().find(|a| a.name == name)
  }
}

/// The immutable, post-discovery description of everything a device
/// exposes. Once a `DeviceCapabilitySet` is registered it is never
/// mutated; replacing it requires removal and re-insertion at the
/// registry level (spec.md §3 invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilitySet {
  pub device_type: String,
  pub signals: HashMap<String, SignalSpec>,
  pub functions: HashMap<String, FunctionSpec>,
}

impl DeviceCapabilitySet {
  pub fn new(device_type: impl Into<String>) -> Self {
    DeviceCapabilitySet {
      device_type: device_type.into(),
      signals: HashMap::new(),
      functions: HashMap::new(),
    }
  }

  /// Signal ids with `is_default_polled == true`, i.e. those the state
  /// cache should include in its steady-state polling pass.
  pub fn default_polled_signal_ids(&self) -> Vec<String> {
    self
      .signals
      .values()
      .filter(|s| s.is_default_polled)
      .map(|s| s.signal_id.clone())
      .collect()
  }

  pub fn function_by_id(&self, function_id: u32) -> Option<&FunctionSpec> {
    self.functions.values().find(|f| f.function_id == function_id)
  }
}
