//! The provider-facing interface: traits this crate consumes but never
//! implements. The framed transport, process supervision, and crash/restart
//! mechanics live in the embedding host; the kernel only calls through
//! `ProviderCapability` and reads through `ProviderSupervisorView`.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, RwLock},
};

use chrono::{DateTime, Utc};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;
use serde::{Deserialize, Serialize};

use crate::registry::DeviceCapabilitySet;
use crate::value::{Quality, TypedValue};

/// Status codes a provider may report, mirroring the framed transport's
/// wire vocabulary (spec.md §6). Derives `FromPrimitive`/`ToPrimitive` so
/// a host's framed-transport codec can decode the wire's integer status
/// field without a hand-written match per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ProviderStatusCode {
  Ok = 0,
  InvalidArgument = 1,
  OutOfRange = 2,
  NotFound = 3,
  FailedPrecondition = 4,
  Unavailable = 5,
  ResourceExhausted = 6,
  DeadlineExceeded = 7,
  Internal = 8,
  Unknown = 9,
}

impl ProviderStatusCode {
  /// Decodes the wire's integer status field, falling back to `Unknown`
  /// for any value the transport's vocabulary doesn't define (spec.md
  /// §6: the core recognizes a fixed status set and maps anything else
  /// to `Unknown` rather than failing to decode).
  pub fn from_wire(code: i32) -> ProviderStatusCode {
    Self::from_i32(code).unwrap_or(ProviderStatusCode::Unknown)
  }
}

/// One signal reading as returned by `ProviderCapability::read_signals`.
#[derive(Debug, Clone)]
pub struct SignalReading {
  pub value: TypedValue,
  pub quality: Quality,
  /// Provider-supplied timestamp, if any; the state cache falls back to
  /// local wall-clock at receive when this is `None` (spec.md §4.2).
  pub timestamp: Option<DateTime<Utc>>,
}

/// The outcome of a `ProviderCapability::call` invocation.
#[derive(Debug, Clone)]
pub struct ProviderCallResponse {
  pub status: ProviderStatusCode,
  pub values: HashMap<String, TypedValue>,
  pub message: Option<String>,
}

/// A capability handed to the kernel by the provider supervisor: the only
/// way the kernel ever talks to a provider process. Implementations are
/// expected to be cheap to clone/share (`Arc<dyn ProviderCapability>`) so
/// a supervisor restart can swap the map entry without invalidating
/// in-flight dispatches holding an older `Arc` (spec.md §9 design note on
/// provider handle aliasing).
pub trait ProviderCapability: Send + Sync {
  fn is_available(&self) -> bool;

  fn list_devices(&self) -> Result<Vec<String>, String>;

  fn describe_device(&self, device_id: &str) -> Result<DeviceCapabilitySet, String>;

  fn read_signals(
    &self,
    device_id: &str,
    signal_ids: &[String],
  ) -> Result<HashMap<String, SignalReading>, String>;

  fn call(
    &self,
    device_id: &str,
    function_id: u32,
    function_name: &str,
    args: HashMap<String, TypedValue>,
  ) -> ProviderCallResponse;

  fn last_error(&self) -> Option<String>;

  fn last_status_code(&self) -> ProviderStatusCode;
}

/// A read-only snapshot of one provider's supervision state, as exposed
/// by the externally owned provider supervisor (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSupervisionSnapshot {
  pub available: bool,
  pub uptime_ms: u64,
  pub last_seen_ago_ms: u64,
  pub attempt_count: u32,
  pub max_attempts: u32,
  pub crash_detected: bool,
  pub circuit_open: bool,
  pub next_restart_in_ms: Option<u64>,
}

/// The derived lifecycle state the kernel presents for a provider, read
/// only from a `ProviderSupervisionSnapshot` — never mutated by the
/// kernel, which does not own process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderLifecycle {
  Running,
  Recovering,
  CircuitOpen,
  Restarting,
  Down,
}

impl ProviderLifecycle {
  /// Pure derivation per spec.md §4.8:
  /// AVAILABLE -> RUNNING (or RECOVERING if attempt_count > 0);
  /// UNAVAILABLE -> CIRCUIT_OPEN if circuit_open; else RESTARTING if
  /// crash_detected or attempts > 0 or a restart is scheduled; else DOWN.
  pub fn derive(snapshot: &ProviderSupervisionSnapshot) -> ProviderLifecycle {
    if snapshot.available {
      if snapshot.attempt_count > 0 {
        ProviderLifecycle::Recovering
      } else {
        ProviderLifecycle::Running
      }
    } else if snapshot.circuit_open {
      ProviderLifecycle::CircuitOpen
    } else if snapshot.crash_detected
      || snapshot.attempt_count > 0
      || snapshot.next_restart_in_ms.is_some()
    {
      ProviderLifecycle::Restarting
    } else {
      ProviderLifecycle::Down
    }
  }
}

/// Read-only view onto the provider supervisor's bookkeeping. The
/// supervisor itself (process spawn, crash detection, restart backoff)
/// is out of scope for this crate (spec.md §1).
pub trait ProviderSupervisorView: Send + Sync {
  fn provider_ids(&self) -> Vec<String>;
  fn snapshot(&self, provider_id: &str) -> Option<ProviderSupervisionSnapshot>;
}

/// Shared map of `provider_id -> Arc<dyn ProviderCapability>`. Restarting a
/// provider swaps the map entry; in-flight dispatches that already hold an
/// `Arc` clone keep working against the old instance (spec.md §9 design
/// note on provider handle aliasing across restart).
#[derive(Default)]
pub struct ProviderTable {
  providers: RwLock<HashMap<String, Arc<dyn ProviderCapability>>>,
}

impl ProviderTable {
  pub fn new() -> Self {
    ProviderTable::default()
  }

  pub fn insert(&self, provider_id: impl Into<String>, capability: Arc<dyn ProviderCapability>) {
    self.providers.write().unwrap().insert(provider_id.into(), capability);
  }

  pub fn remove(&self, provider_id: &str) -> Option<Arc<dyn ProviderCapability>> {
    self.providers.write().unwrap().remove(provider_id)
  }

  pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderCapability>> {
    self.providers.read().unwrap().get(provider_id).cloned()
  }
}

/// Lazily-created, keyed mutexes: one per provider, guaranteeing at most
/// one outstanding call (control or poll) to a given provider at a time
/// (spec.md §4.4's "per-provider serialization lock").
#[derive(Default)]
pub struct ProviderLocks {
  locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProviderLocks {
  pub fn new() -> Self {
    ProviderLocks::default()
  }

  pub fn lock_for(&self, provider_id: &str) -> Arc<Mutex<()>> {
    if let Some(lock) = self.locks.read().unwrap().get(provider_id) {
      return lock.clone();
    }
    self
      .locks
      .write()
      .unwrap()
      .entry(provider_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }
}
