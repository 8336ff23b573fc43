//! Device Registry: discovery and the immutable capability inventory.
//!
//! A readers-writer lock guards the device vector and its handle index
//! together, so a reader observing a provider mid-restart sees either the
//! old or the new capability set but never a torn mix (spec.md §4.1).

pub mod spec;

use std::{
  collections::HashMap,
  sync::RwLock,
};

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use crate::error::{KernelError, KernelResult};
use crate::provider::ProviderCapability;
pub use spec::{ArgSpec, DeviceCapabilitySet, FunctionSpec, NumericRange, SignalSpec};

/// A registered device, identified by the unique handle
/// `"{provider_id}/{device_id}"`.
///
/// Cheap to copy: the capability set is the only non-trivial field and is
/// cloned structurally, matching the registry's contract that every
/// lookup returns an owned value rather than a borrow (spec.md §9 design
/// note: early versions returned borrows and raced with provider eviction).
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredDevice {
  pub provider_id: String,
  pub device_id: String,
  pub capabilities: DeviceCapabilitySet,
}

impl RegisteredDevice {
  pub fn handle(&self) -> String {
    make_handle(&self.provider_id, &self.device_id)
  }
}

/// Build the canonical `"{provider_id}/{device_id}"` handle string.
pub fn make_handle(provider_id: &str, device_id: &str) -> String {
  format!("{provider_id}/{device_id}")
}

/// Split a handle into its `(provider_id, device_id)` parts, rejecting
/// empty components (spec.md §4.4 validation step (a), and §6's handle
/// format rule).
pub fn split_handle(handle: &str) -> KernelResult<(&str, &str)> {
  let Some((provider_id, device_id)) = handle.split_once('/') else {
    return Err(KernelError::InvalidArgument(format!(
      "handle '{handle}' is missing the '/' separator"
    )));
  };
  if provider_id.is_empty() || device_id.is_empty() {
    return Err(KernelError::InvalidArgument(format!(
      "handle '{handle}' has an empty provider_id or device_id"
    )));
  }
  Ok((provider_id, device_id))
}

struct Inner {
  devices: Vec<RegisteredDevice>,
  // handle -> index into `devices`, kept in lockstep with it.
  index: HashMap<String, usize>,
}

impl Inner {
  fn rebuild_index(&mut self) {
    self.index = self
      .devices
      .iter()
      .enumerate()
      .map(|(i, d)| (d.handle(), i))
      .collect();
  }
}

/// Thread-safe inventory of every device discovered from every provider.
pub struct DeviceRegistry {
  inner: RwLock<Inner>,
}

impl Default for DeviceRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl DeviceRegistry {
  pub fn new() -> Self {
    DeviceRegistry {
      inner: RwLock::new(Inner {
        devices: Vec::new(),
        index: HashMap::new(),
      }),
    }
  }

  /// Discover every device exposed by `capability` and commit them to the
  /// registry as a single atomic insertion.
  ///
  /// All network I/O (`list_devices`, `describe_device`) happens before
  /// the exclusive lock is acquired; the lock is held only to splice the
  /// built rows in. If any device's description fails, the whole
  /// provider's discovery is aborted and nothing is committed (spec.md
  /// §4.1, §7: discovery errors abort the affected provider only).
  pub fn discover_provider(
    &self,
    provider_id: &str,
    capability: &dyn ProviderCapability,
  ) -> KernelResult<usize> {
    let device_ids = capability
      .list_devices()
      .map_err(|e| KernelError::Unavailable(format!("list_devices({provider_id}): {e}")))?;

    let mut built = Vec::with_capacity(device_ids.len());
    for device_id in &device_ids {
      let capabilities = capability.describe_device(device_id).map_err(|e| {
        KernelError::Unavailable(format!("describe_device({provider_id}/{device_id}): {e}"))
      })?;
      built.push(RegisteredDevice {
        provider_id: provider_id.to_string(),
        device_id: device_id.clone(),
        capabilities,
      });
    }

    let count = built.len();
    {
      let mut inner = self.inner.write().unwrap();
      inner.devices.extend(built);
      inner.rebuild_index();
    }
    info!("registry: discovered {count} device(s) from provider '{provider_id}'");
    Ok(count)
  }

  /// Remove every device belonging to `provider_id` and rebuild the
  /// handle index. The only path by which a device's capability set may
  /// effectively change is removal followed by re-discovery (spec.md §9
  /// Open Question 1).
  pub fn clear_provider_devices(&self, provider_id: &str) -> usize {
    let mut inner = self.inner.write().unwrap();
    let before = inner.devices.len();
    inner.devices.retain(|d| d.provider_id != provider_id);
    let removed = before - inner.devices.len();
    inner.rebuild_index();
    if removed > 0 {
      info!("registry: cleared {removed} device(s) for provider '{provider_id}'");
    }
    removed
  }

  pub fn get_device(&self, provider_id: &str, device_id: &str) -> Option<RegisteredDevice> {
    self.get_by_handle(&make_handle(provider_id, device_id))
  }

  pub fn get_by_handle(&self, handle: &str) -> Option<RegisteredDevice> {
    let inner = self.inner.read().unwrap();
    inner.index.get(handle).map(|&i| inner.devices[i].clone())
  }

  pub fn all_devices(&self) -> Vec<RegisteredDevice> {
    self.inner.read().unwrap().devices.clone()
  }

  pub fn devices_for_provider(&self, provider_id: &str) -> Vec<RegisteredDevice> {
    self
      .inner
      .read()
      .unwrap()
      .devices
      .iter()
      .filter(|d| d.provider_id == provider_id)
      .cloned()
      .collect()
  }

  pub fn device_count(&self) -> usize {
    self.inner.read().unwrap().devices.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MockProviderCapability;

  #[test]
  fn discover_then_lookup_round_trips() {
    let registry = DeviceRegistry::new();
    let cap = MockProviderCapability::with_devices(&["motorctl0"]);
    registry.discover_provider("sim0", &cap).unwrap();

    assert_eq!(registry.device_count(), 1);
    let dev = registry.get_by_handle("sim0/motorctl0").unwrap();
    assert_eq!(dev.provider_id, "sim0");
    assert_eq!(dev.device_id, "motorctl0");
  }

  #[test]
  fn clear_provider_devices_removes_only_that_provider() {
    let registry = DeviceRegistry::new();
    registry
      .discover_provider("sim0", &MockProviderCapability::with_devices(&["a"]))
      .unwrap();
    registry
      .discover_provider("sim1", &MockProviderCapability::with_devices(&["b"]))
      .unwrap();

    let removed = registry.clear_provider_devices("sim0");
    assert_eq!(removed, 1);
    assert_eq!(registry.device_count(), 1);
    assert!(registry.get_by_handle("sim0/a").is_none());
    assert!(registry.get_by_handle("sim1/b").is_some());
  }

  #[test]
  fn failed_discovery_commits_nothing() {
    let registry = DeviceRegistry::new();
    let cap = MockProviderCapability::failing_describe(&["a", "b"], "b");
    let err = registry.discover_provider("sim0", &cap);
    assert!(err.is_err());
    assert_eq!(registry.device_count(), 0);
  }

  #[test]
  fn split_handle_rejects_empty_parts() {
    assert!(split_handle("sim0/motorctl0").is_ok());
    assert!(split_handle("sim0/").is_err());
    assert!(split_handle("/motorctl0").is_err());
    assert!(split_handle("no-slash").is_err());
  }
}
