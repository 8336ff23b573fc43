//! A hand-written fake implementing `ProviderCapability`, used by this
//! crate's own unit tests in place of a mocking framework — the same
//! practice `rustdds` follows for its RTPS entities (in-crate test
//! doubles, not an external mock library).
//!
//! Only compiled for `cargo test` of this crate; the integration suite
//! under `tests/` is a separate crate and writes its own fakes against
//! the public `ProviderCapability` trait (see `tests/end_to_end.rs`).

use std::{collections::HashMap, sync::Mutex};

use crate::provider::{ProviderCallResponse, ProviderCapability, ProviderStatusCode, SignalReading};
use crate::registry::{DeviceCapabilitySet, SignalSpec};
use crate::value::{Quality, TypedValue};

struct MockInner {
  device_ids: Vec<String>,
  capabilities: HashMap<String, DeviceCapabilitySet>,
  readings: HashMap<String, HashMap<String, (TypedValue, Quality)>>,
  failing_describe: Option<String>,
  fail_reads: bool,
  available: bool,
  last_call_args: HashMap<String, TypedValue>,
}

/// A configurable fake provider. Every knob defaults to "healthy and
/// empty": available, no failures, no declared signals until
/// `set_reading` or `set_capabilities` adds some.
pub(crate) struct MockProviderCapability {
  inner: Mutex<MockInner>,
}

impl MockProviderCapability {
  pub(crate) fn with_devices(device_ids: &[&str]) -> Self {
    let ids: Vec<String> = device_ids.iter().map(|s| s.to_string()).collect();
    let capabilities = ids
      .iter()
      .map(|id| (id.clone(), DeviceCapabilitySet::new("mock")))
      .collect();
    MockProviderCapability {
      inner: Mutex::new(MockInner {
        device_ids: ids,
        capabilities,
        readings: HashMap::new(),
        failing_describe: None,
        fail_reads: false,
        available: true,
        last_call_args: HashMap::new(),
      }),
    }
  }

  /// Every device in `device_ids` is listed, but `describe_device` fails
  /// for `failing`, simulating a single bad device aborting the whole
  /// provider's discovery (spec.md §4.1).
  pub(crate) fn failing_describe(device_ids: &[&str], failing: &str) -> Self {
    let cap = Self::with_devices(device_ids);
    cap.inner.lock().unwrap().failing_describe = Some(failing.to_string());
    cap
  }

  /// Records a signal reading and, if the device has no spec for that
  /// signal yet, synthesizes a readable, default-polled one so the
  /// state cache's poll configs pick it up on the next `describe_device`.
  pub(crate) fn set_reading(&self, device_id: &str, signal_id: &str, value: TypedValue, quality: Quality) {
    let mut inner = self.inner.lock().unwrap();
    let value_type = value.value_type();
    inner
      .readings
      .entry(device_id.to_string())
      .or_default()
      .insert(signal_id.to_string(), (value, quality));
    let caps = inner
      .capabilities
      .entry(device_id.to_string())
      .or_insert_with(|| DeviceCapabilitySet::new("mock"));
    caps.signals.entry(signal_id.to_string()).or_insert_with(|| SignalSpec {
      signal_id: signal_id.to_string(),
      label: signal_id.to_string(),
      value_type,
      readable: true,
      writable: false,
      is_default_polled: true,
      poll_hint_hz: None,
    });
  }

  /// Overrides the whole capability set `describe_device` returns for a
  /// device, for tests that need specific functions/arg specs.
  pub(crate) fn set_capabilities(&self, device_id: &str, caps: DeviceCapabilitySet) {
    self.inner.lock().unwrap().capabilities.insert(device_id.to_string(), caps);
  }

  pub(crate) fn fail_reads(&self, fail: bool) {
    self.inner.lock().unwrap().fail_reads = fail;
  }

  pub(crate) fn set_available(&self, available: bool) {
    self.inner.lock().unwrap().available = available;
  }

  pub(crate) fn last_call_args(&self) -> HashMap<String, TypedValue> {
    self.inner.lock().unwrap().last_call_args.clone()
  }
}

impl ProviderCapability for MockProviderCapability {
  fn is_available(&self) -> bool {
    self.inner.lock().unwrap().available
  }

  fn list_devices(&self) -> Result<Vec<String>, String> {
    Ok(self.inner.lock().unwrap().device_ids.clone())
  }

  fn describe_device(&self, device_id: &str) -> Result<DeviceCapabilitySet, String> {
    let inner = self.inner.lock().unwrap();
    if inner.failing_describe.as_deref() == Some(device_id) {
      return Err(format!("simulated describe_device failure for '{device_id}'"));
    }
    inner
      .capabilities
      .get(device_id)
      .cloned()
      .ok_or_else(|| format!("unknown device '{device_id}'"))
  }

  /// Ignores the requested `signal_ids` filter and returns every reading
  /// this fake currently knows about for the device — a deliberate
  /// simplification so tests can drive change detection directly through
  /// `set_reading` regardless of when poll configs were computed.
  fn read_signals(
    &self,
    device_id: &str,
    _signal_ids: &[String],
  ) -> Result<HashMap<String, SignalReading>, String> {
    let inner = self.inner.lock().unwrap();
    if inner.fail_reads {
      return Err(format!("simulated read_signals failure for '{device_id}'"));
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
    _device_id: &str,
    _function_id: u32,
    _function_name: &str,
    args: HashMap<String, TypedValue>,
  ) -> ProviderCallResponse {
    let mut inner = self.inner.lock().unwrap();
    inner.last_call_args = args.clone();
    ProviderCallResponse { status: ProviderStatusCode::Ok, values: args, message: None }
  }

  fn last_error(&self) -> Option<String> {
    None
  }

  fn last_status_code(&self) -> ProviderStatusCode {
    ProviderStatusCode::Ok
  }
}
