//! A hand-written fake `ProviderCapability`, local to the integration
//! test crate since `anolis_kernel::testing::MockProviderCapability` is
//! `pub(crate)` and unreachable from here (see `src/testing.rs`'s module
//! doc comment).
//!
//! Simulates just enough of a two-motor controller to drive the
//! end-to-end scenarios: `set_duty(motor_index, duty)` writes back to
//! `duty_{motor_index}`, which is exactly what a real provider would do
//! and what the post-call refresh in `CallRouter::execute_call` expects
//! to observe on its very next read.

use std::collections::HashMap;
use std::sync::Mutex;

use anolis_kernel::provider::{ProviderCallResponse, ProviderCapability, ProviderStatusCode, SignalReading};
use anolis_kernel::registry::{ArgSpec, DeviceCapabilitySet, FunctionSpec, NumericRange, SignalSpec};
use anolis_kernel::value::{Quality, TypedValue, ValueType};

struct Inner {
  device_ids: Vec<String>,
  capabilities: HashMap<String, DeviceCapabilitySet>,
  readings: HashMap<String, HashMap<String, (TypedValue, Quality)>>,
  available: bool,
  fail_reads: bool,
  last_call: Option<(String, String, HashMap<String, TypedValue>)>,
}

/// A motor-controller-shaped fake: one or more devices, each with
/// `duty_{n}` signals and a `set_duty` function.
pub struct SimProvider {
  inner: Mutex<Inner>,
}

fn motor_caps() -> DeviceCapabilitySet {
  let mut caps = DeviceCapabilitySet::new("motorctl");
  caps.functions.insert(
    "set_duty".into(),
    FunctionSpec {
      function_id: 1,
      function_name: "set_duty".into(),
      label: "Set duty cycle".into(),
      args: vec![
        ArgSpec { name: "motor_index".into(), value_type: ValueType::Int64, required: true, range: None },
        ArgSpec {
          name: "duty".into(),
          value_type: ValueType::Double,
          required: true,
          range: Some(NumericRange { min: 0.0, max: 1.0 }),
        },
      ],
    },
  );
  caps
}

impl SimProvider {
  pub fn new() -> Self {
    SimProvider { inner: Mutex::new(Inner {
      device_ids: Vec::new(),
      capabilities: HashMap::new(),
      readings: HashMap::new(),
      available: true,
      fail_reads: false,
      last_call: None,
    }) }
  }

  /// Adds a motor-controller device with `duty_1..=duty_n` readable,
  /// default-polled signals, each starting at `0.0`.
  pub fn add_motor_device(&self, device_id: &str, motor_count: i64) {
    let mut inner = self.inner.lock().unwrap();
    inner.device_ids.push(device_id.to_string());
    let mut caps = motor_caps();
    for i in 1..=motor_count {
      let signal_id = format!("duty_{i}");
      caps.signals.insert(
        signal_id.clone(),
        SignalSpec {
          signal_id: signal_id.clone(),
          label: format!("Motor {i} duty"),
          value_type: ValueType::Double,
          readable: true,
          writable: false,
          is_default_polled: true,
          poll_hint_hz: None,
        },
      );
      inner
        .readings
        .entry(device_id.to_string())
        .or_default()
        .insert(signal_id, (TypedValue::Double(0.0), Quality::Ok));
    }
    inner.capabilities.insert(device_id.to_string(), caps);
  }

  pub fn set_reading(&self, device_id: &str, signal_id: &str, value: TypedValue, quality: Quality) {
    self
      .inner
      .lock()
      .unwrap()
      .readings
      .entry(device_id.to_string())
      .or_default()
      .insert(signal_id.to_string(), (value, quality));
  }

  pub fn set_available(&self, available: bool) {
    self.inner.lock().unwrap().available = available;
  }

  pub fn fail_reads(&self, fail: bool) {
    self.inner.lock().unwrap().fail_reads = fail;
  }

  pub fn last_call(&self) -> Option<(String, String, HashMap<String, TypedValue>)> {
    self.inner.lock().unwrap().last_call.clone()
  }
}

impl Default for SimProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl ProviderCapability for SimProvider {
  fn is_available(&self) -> bool {
    self.inner.lock().unwrap().available
  }

  fn list_devices(&self) -> Result<Vec<String>, String> {
    Ok(self.inner.lock().unwrap().device_ids.clone())
  }

  fn describe_device(&self, device_id: &str) -> Result<DeviceCapabilitySet, String> {
    self
      .inner
      .lock()
      .unwrap()
      .capabilities
      .get(device_id)
      .cloned()
      .ok_or_else(|| format!("unknown device '{device_id}'"))
  }

  fn read_signals(
    &self,
    device_id: &str,
    _signal_ids: &[String],
  ) -> Result<HashMap<String, SignalReading>, String> {
    let inner = self.inner.lock().unwrap();
    if inner.fail_reads {
      return Err(format!("simulated read failure for '{device_id}'"));
    }
    Ok(
      inner
        .readings
        .get(device_id)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|(id, (value, quality))| (id, SignalReading { value, quality, timestamp: None }))
        .collect(),
    )
  }

  fn call(
    &self,
    device_id: &str,
    _function_id: u32,
    function_name: &str,
    args: HashMap<String, TypedValue>,
  ) -> ProviderCallResponse {
    let mut inner = self.inner.lock().unwrap();
    inner.last_call = Some((device_id.to_string(), function_name.to_string(), args.clone()));
    if function_name == "set_duty" {
      if let (Some(TypedValue::Int64(idx)), Some(TypedValue::Double(duty))) =
        (args.get("motor_index"), args.get("duty"))
      {
        let signal_id = format!("duty_{idx}");
        inner
          .readings
          .entry(device_id.to_string())
          .or_default()
          .insert(signal_id, (TypedValue::Double(*duty), Quality::Ok));
      }
    }
    ProviderCallResponse { status: ProviderStatusCode::Ok, values: args, message: None }
  }

  fn last_error(&self) -> Option<String> {
    None
  }

  fn last_status_code(&self) -> ProviderStatusCode {
    ProviderStatusCode::Ok
  }
}

use anolis_kernel::provider::{ProviderSupervisionSnapshot, ProviderSupervisorView};

/// A hand-written fake `ProviderSupervisorView`, so integration tests can
/// exercise `Kernel::provider_lifecycle`'s read path without a real
/// process supervisor (spec.md §4.8 — the supervisor is an external
/// collaborator this crate only reads a snapshot from).
#[derive(Default)]
pub struct FakeSupervisor {
  snapshots: Mutex<HashMap<String, ProviderSupervisionSnapshot>>,
}

impl FakeSupervisor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_snapshot(&self, provider_id: &str, snapshot: ProviderSupervisionSnapshot) {
    self.snapshots.lock().unwrap().insert(provider_id.to_string(), snapshot);
  }
}

impl ProviderSupervisorView for FakeSupervisor {
  fn provider_ids(&self) -> Vec<String> {
    self.snapshots.lock().unwrap().keys().cloned().collect()
  }

  fn snapshot(&self, provider_id: &str) -> Option<ProviderSupervisionSnapshot> {
    self.snapshots.lock().unwrap().get(provider_id).copied()
  }
}
