//! State Cache: the kernel's change-detection and polling engine
//! (spec.md §4.2).

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, RwLock,
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, info, warn};
use chrono::{DateTime, Utc};

use crate::error::{KernelError, KernelResult};
use crate::events::{Event, EventEmitter};
use crate::provider::{ProviderLocks, ProviderTable, SignalReading};
use crate::registry::{make_handle, split_handle, DeviceRegistry};
use crate::value::{Quality, TypedValue};

/// One cached reading: its value, quality, and the timestamp it was
/// observed at (provider-supplied if given, else local receive time).
///
/// Does not derive `PartialEq`: `value` is a `TypedValue`, whose equality
/// is deliberately not the derived comparison (see `value.rs`).
#[derive(Debug, Clone)]
pub struct CachedSignalValue {
  pub value: TypedValue,
  pub quality: Quality,
  pub timestamp: DateTime<Utc>,
}

impl CachedSignalValue {
  /// True iff the quality already marks the value suspect, or it hasn't
  /// been refreshed within `2 * poll_interval` (spec.md §3).
  pub fn is_stale(&self, now: DateTime<Utc>, poll_interval: Duration) -> bool {
    if matches!(self.quality, Quality::Stale | Quality::Fault | Quality::Unknown) {
      return true;
    }
    let threshold = chrono::Duration::from_std(poll_interval * 2).unwrap_or(chrono::Duration::MAX);
    now - self.timestamp > threshold
  }
}

/// A device's live cached view: its signal map plus whether its provider
/// currently reports it reachable. Does not derive `PartialEq`, for the
/// same reason as `CachedSignalValue`.
#[derive(Debug, Clone)]
pub struct DeviceState {
  pub device_handle: String,
  pub provider_available: bool,
  pub last_poll_time: Option<DateTime<Utc>>,
  pub signals: HashMap<String, CachedSignalValue>,
}

impl DeviceState {
  fn new(device_handle: String) -> Self {
    DeviceState {
      device_handle,
      provider_available: false,
      last_poll_time: None,
      signals: HashMap::new(),
    }
  }
}

#[derive(Debug, Clone)]
struct PollConfig {
  handle: String,
  provider_id: String,
  device_id: String,
  signal_ids: Vec<String>,
}

struct CacheInner {
  devices: RwLock<HashMap<String, DeviceState>>,
  poll_configs: RwLock<Vec<PollConfig>>,
}

/// The polling loop and change-detection engine. One `StateCache` is
/// shared (via `Arc`) between the kernel's polling thread and every
/// caller that reads snapshots or triggers a post-call refresh.
pub struct StateCache {
  inner: CacheInner,
  registry: Arc<DeviceRegistry>,
  providers: Arc<ProviderTable>,
  provider_locks: Arc<ProviderLocks>,
  emitter: EventEmitter,
  poll_interval: Duration,
  stop_flag: Arc<AtomicBool>,
  thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StateCache {
  /// Enumerates every registered device, builds a poll config from its
  /// default-polled signals, and creates its state slot even if it has
  /// none (on-demand-only devices still get a slot; spec.md §4.2).
  pub fn new(
    registry: Arc<DeviceRegistry>,
    providers: Arc<ProviderTable>,
    provider_locks: Arc<ProviderLocks>,
    emitter: EventEmitter,
    poll_interval: Duration,
  ) -> Self {
    let mut devices = HashMap::new();
    let mut poll_configs = Vec::new();
    for device in registry.all_devices() {
      let handle = device.handle();
      let signal_ids = device.capabilities.default_polled_signal_ids();
      poll_configs.push(PollConfig {
        handle: handle.clone(),
        provider_id: device.provider_id.clone(),
        device_id: device.device_id.clone(),
        signal_ids,
      });
      devices.insert(handle.clone(), DeviceState::new(handle));
    }

    StateCache {
      inner: CacheInner {
        devices: RwLock::new(devices),
        poll_configs: RwLock::new(poll_configs),
      },
      registry,
      providers,
      provider_locks,
      emitter,
      poll_interval,
      stop_flag: Arc::new(AtomicBool::new(false)),
      thread_handle: Mutex::new(None),
    }
  }

  pub fn poll_interval(&self) -> Duration {
    self.poll_interval
  }

  /// Rebuilds poll configs and device state slots from the registry's
  /// current contents. The kernel calls this after `discover_provider`
  /// and `clear_provider_devices` so devices registered (or evicted)
  /// after this cache was constructed are reflected in the next poll
  /// pass. Cached signal values for devices that remain registered are
  /// left untouched; only the poll-config and slot *set* is rebuilt.
  pub fn refresh_poll_configs(&self) {
    let current_devices = self.registry.all_devices();
    let current_handles: std::collections::HashSet<String> =
      current_devices.iter().map(|d| d.handle()).collect();

    let poll_configs: Vec<PollConfig> = current_devices
      .iter()
      .map(|device| {
        let handle = device.handle();
        PollConfig {
          handle: handle.clone(),
          provider_id: device.provider_id.clone(),
          device_id: device.device_id.clone(),
          signal_ids: device.capabilities.default_polled_signal_ids(),
        }
      })
      .collect();
    *self.inner.poll_configs.write().unwrap() = poll_configs;

    let mut devices = self.inner.devices.write().unwrap();
    devices.retain(|handle, _| current_handles.contains(handle));
    for handle in current_handles {
      devices.entry(handle.clone()).or_insert_with(|| DeviceState::new(handle));
    }
  }

  /// Starts the single dedicated polling thread. A no-op if already
  /// running.
  pub fn start(self: &Arc<Self>) {
    let mut handle_slot = self.thread_handle.lock().unwrap();
    if handle_slot.is_some() {
      return;
    }
    self.stop_flag.store(false, Ordering::SeqCst);
    let cache = self.clone();
    let builder = thread::Builder::new().name("anolis-state-cache-poll".into());
    let handle = builder
      .spawn(move || cache.run_poll_loop())
      .expect("failed to spawn state cache poll thread");
    *handle_slot = Some(handle);
  }

  /// Signals the polling thread to exit after its current pass and joins
  /// it. The stop flag is only observed between passes, never mid-call
  /// (spec.md §5 cancellation).
  pub fn stop(&self) {
    self.stop_flag.store(true, Ordering::SeqCst);
    if let Some(handle) = self.thread_handle.lock().unwrap().take() {
      let _ = handle.join();
    }
  }

  fn run_poll_loop(self: Arc<Self>) {
    info!("state cache: poll thread started (interval {:?})", self.poll_interval);
    while !self.stop_flag.load(Ordering::SeqCst) {
      let pass_start = Instant::now();
      self.poll_pass_once();
      let elapsed = pass_start.elapsed();
      if elapsed > self.poll_interval {
        warn!(
          "state cache: poll pass took {:?}, exceeding the {:?} interval; starting next pass immediately",
          elapsed, self.poll_interval
        );
      } else {
        thread::sleep(self.poll_interval - elapsed);
      }
    }
    info!("state cache: poll thread stopped");
  }

  /// Runs one polling pass over every configured device.
  pub fn poll_pass_once(&self) {
    let configs = self.inner.poll_configs.read().unwrap().clone();
    for config in &configs {
      self.poll_one(config);
    }
  }

  fn poll_one(&self, config: &PollConfig) {
    let Some(capability) = self.providers.get(&config.provider_id) else {
      self.mark_unavailable(config);
      return;
    };
    if !capability.is_available() {
      self.mark_unavailable(config);
      return;
    }

    let lock = self.provider_locks.lock_for(&config.provider_id);
    let _guard = lock.lock().unwrap();
    let result = capability.read_signals(&config.device_id, &config.signal_ids);
    drop(_guard);

    match result {
      Ok(readings) => self.apply_readings(config, readings),
      Err(e) => {
        debug!("state cache: read_signals failed for '{}': {e}", config.handle);
        self.mark_unavailable(config);
      }
    }
  }

  fn mark_unavailable(&self, config: &PollConfig) {
    let mut devices = self.inner.devices.write().unwrap();
    let state = devices
      .entry(config.handle.clone())
      .or_insert_with(|| DeviceState::new(config.handle.clone()));
    let was_available = state.provider_available;
    state.provider_available = false;
    state.signals.clear();
    state.last_poll_time = Some(Utc::now());
    drop(devices);

    if was_available {
      self.emitter.emit(Event::DeviceAvailability {
        event_id: 0,
        provider_id: config.provider_id.clone(),
        device_id: config.device_id.clone(),
        available: false,
        ts: Utc::now(),
      });
    }
  }

  fn apply_readings(&self, config: &PollConfig, readings: HashMap<String, SignalReading>) {
    let mut devices = self.inner.devices.write().unwrap();
    let state = devices
      .entry(config.handle.clone())
      .or_insert_with(|| DeviceState::new(config.handle.clone()));
    let was_available = state.provider_available;
    state.provider_available = true;
    state.last_poll_time = Some(Utc::now());

    let mut to_emit = Vec::new();
    for (signal_id, reading) in readings {
      let ts = reading.timestamp.unwrap_or_else(Utc::now);
      match state.signals.get(&signal_id).cloned() {
        None => {
          to_emit.push(Event::StateUpdate {
            event_id: 0,
            provider_id: config.provider_id.clone(),
            device_id: config.device_id.clone(),
            signal_id: signal_id.clone(),
            value: reading.value.clone(),
            quality: reading.quality,
            ts,
          });
          state.signals.insert(
            signal_id,
            CachedSignalValue { value: reading.value, quality: reading.quality, timestamp: ts },
          );
        }
        Some(old) => {
          let value_changed = !old.value.values_equal(&reading.value);
          let quality_changed = old.quality != reading.quality;
          if value_changed {
            to_emit.push(Event::StateUpdate {
              event_id: 0,
              provider_id: config.provider_id.clone(),
              device_id: config.device_id.clone(),
              signal_id: signal_id.clone(),
              value: reading.value.clone(),
              quality: reading.quality,
              ts,
            });
          } else if quality_changed {
            to_emit.push(Event::QualityChange {
              event_id: 0,
              provider_id: config.provider_id.clone(),
              device_id: config.device_id.clone(),
              signal_id: signal_id.clone(),
              old_quality: old.quality,
              new_quality: reading.quality,
              ts,
            });
          }
          state.signals.insert(
            signal_id,
            CachedSignalValue { value: reading.value, quality: reading.quality, timestamp: ts },
          );
        }
      }
    }
    drop(devices);

    if !was_available {
      self.emitter.emit(Event::DeviceAvailability {
        event_id: 0,
        provider_id: config.provider_id.clone(),
        device_id: config.device_id.clone(),
        available: true,
        ts: Utc::now(),
      });
    }
    for event in to_emit {
      self.emitter.emit(event);
    }
  }

  /// Immediate, single-device poll on the caller's thread, serialized by
  /// the same per-provider lock as control calls. Never sleeps (spec.md
  /// §4.2, §4.4).
  pub fn poll_device_now(&self, handle: &str) -> KernelResult<()> {
    let (provider_id, device_id) = split_handle(handle)?;
    let config = self.resolve_poll_config(handle, provider_id, device_id)?;
    self.poll_one(&config);
    Ok(())
  }

  fn resolve_poll_config(&self, handle: &str, provider_id: &str, device_id: &str) -> KernelResult<PollConfig> {
    if let Some(config) = self
      .inner
      .poll_configs
      .read()
      .unwrap()
      .iter()
      .find(|c| c.handle == handle)
      .cloned()
    {
      return Ok(config);
    }
    // Device predates this poll config list (e.g. discovered after the
    // cache was constructed) or has no default-polled signals: refresh
    // every readable signal it declares.
    let device = self
      .registry
      .get_by_handle(handle)
      .ok_or_else(|| KernelError::NotFound(format!("device '{handle}'")))?;
    let signal_ids = device
      .capabilities
      .signals
      .values()
      .filter(|s| s.readable)
      .map(|s| s.signal_id.clone())
      .collect();
    Ok(PollConfig {
      handle: make_handle(provider_id, device_id),
      provider_id: provider_id.to_string(),
      device_id: device_id.to_string(),
      signal_ids,
    })
  }

  pub fn get_device_state(&self, handle: &str) -> Option<DeviceState> {
    self.inner.devices.read().unwrap().get(handle).cloned()
  }

  pub fn get_signal_value(&self, handle: &str, signal_id: &str) -> Option<CachedSignalValue> {
    self.inner.devices.read().unwrap().get(handle)?.signals.get(signal_id).cloned()
  }
}

impl Drop for StateCache {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::events::EventFilter;
  use crate::testing::MockProviderCapability;

  fn setup() -> (Arc<DeviceRegistry>, Arc<ProviderTable>, Arc<ProviderLocks>, EventEmitter) {
    let registry = Arc::new(DeviceRegistry::new());
    let providers = Arc::new(ProviderTable::new());
    let locks = Arc::new(ProviderLocks::new());
    let emitter = EventEmitter::new(8);
    (registry, providers, locks, emitter)
  }

  #[test]
  fn refresh_poll_configs_picks_up_devices_discovered_after_construction() {
    let (registry, providers, locks, emitter) = setup();
    let cache = StateCache::new(registry.clone(), providers.clone(), locks, emitter, Duration::from_millis(50));
    assert_eq!(cache.get_device_state("sim0/dev0"), None);

    let cap = MockProviderCapability::with_devices(&["dev0"]);
    cap.set_reading("dev0", "x", TypedValue::Bool(true), Quality::Ok);
    registry.discover_provider("sim0", &cap).unwrap();
    providers.insert("sim0", Arc::new(cap));

    cache.refresh_poll_configs();
    assert!(cache.get_device_state("sim0/dev0").is_some());
    cache.poll_pass_once();
    assert!(cache.get_signal_value("sim0/dev0", "x").is_some());
  }

  #[test]
  fn refresh_poll_configs_drops_evicted_devices() {
    let (registry, providers, locks, emitter) = setup();
    let cap = MockProviderCapability::with_devices(&["dev0"]);
    registry.discover_provider("sim0", &cap).unwrap();
    providers.insert("sim0", Arc::new(cap));
    let cache = StateCache::new(registry.clone(), providers, locks, emitter, Duration::from_millis(50));
    assert!(cache.get_device_state("sim0/dev0").is_some());

    registry.clear_provider_devices("sim0");
    cache.refresh_poll_configs();
    assert!(cache.get_device_state("sim0/dev0").is_none());
  }

  #[test]
  fn zero_default_signal_devices_still_get_a_slot() {
    let (registry, providers, locks, emitter) = setup();
    let cap = MockProviderCapability::with_devices(&["dev0"]);
    registry.discover_provider("sim0", &cap).unwrap();
    providers.insert("sim0", Arc::new(cap));

    let cache = StateCache::new(registry, providers, locks, emitter, Duration::from_millis(50));
    assert!(cache.get_device_state("sim0/dev0").is_some());
  }

  #[test]
  fn first_observation_always_emits_state_update() {
    let (registry, providers, locks, emitter) = setup();
    let sub = emitter.subscribe(EventFilter::any(), 16, "t").unwrap();
    let cap = MockProviderCapability::with_devices(&["dev0"]);
    cap.set_reading("dev0", "duty_1", TypedValue::Double(0.5), Quality::Ok);
    registry.discover_provider("sim0", &cap).unwrap();
    providers.insert("sim0", Arc::new(cap));

    let cache = StateCache::new(registry, providers, locks, emitter, Duration::from_millis(50));
    cache.poll_pass_once();

    let value = cache.get_signal_value("sim0/dev0", "duty_1").unwrap();
    assert_eq!(value.value.as_f64(), Some(0.5));

    let mut saw_state_update = false;
    while let Some(event) = sub.pop(Some(Duration::from_millis(10))) {
      if matches!(event, Event::StateUpdate { .. }) {
        saw_state_update = true;
      }
    }
    assert!(saw_state_update);
  }

  #[test]
  fn unchanged_value_and_quality_emits_nothing() {
    let (registry, providers, locks, emitter) = setup();
    let cap = MockProviderCapability::with_devices(&["dev0"]);
    cap.set_reading("dev0", "x", TypedValue::Double(1.0), Quality::Ok);
    registry.discover_provider("sim0", &cap).unwrap();
    providers.insert("sim0", Arc::new(cap));

    let cache = StateCache::new(registry, providers, locks, emitter.clone(), Duration::from_millis(50));
    cache.poll_pass_once();
    let sub = emitter.subscribe(EventFilter::any(), 16, "t").unwrap();
    cache.poll_pass_once();
    assert!(sub.pop(Some(Duration::from_millis(10))).is_none());
  }

  #[test]
  fn bitwise_nan_change_detection() {
    let (registry, providers, locks, emitter) = setup();
    let cap = MockProviderCapability::with_devices(&["dev0"]);
    registry.discover_provider("sim0", &cap).unwrap();
    let cap = Arc::new(cap);
    providers.insert("sim0", cap.clone());

    let cache = StateCache::new(registry, providers, locks, emitter.clone(), Duration::from_millis(50));
    let sub = emitter.subscribe(EventFilter::any(), 32, "t").unwrap();

    cap.set_reading("dev0", "x", TypedValue::Double(f64::NAN), Quality::Ok);
    cache.poll_pass_once();
    cap.set_reading("dev0", "x", TypedValue::Double(f64::NAN), Quality::Ok);
    cache.poll_pass_once();

    let updates: Vec<_> = std::iter::from_fn(|| sub.pop(Some(Duration::from_millis(10))))
      .filter(|e| matches!(e, Event::StateUpdate { .. }))
      .collect();
    assert_eq!(updates.len(), 1);

    cap.set_reading(
      "dev0",
      "x",
      TypedValue::Double(f64::from_bits(f64::NAN.to_bits() ^ 1)),
      Quality::Ok,
    );
    cache.poll_pass_once();
    let more: Vec<_> = std::iter::from_fn(|| sub.pop(Some(Duration::from_millis(10))))
      .filter(|e| matches!(e, Event::StateUpdate { .. }))
      .collect();
    assert_eq!(more.len(), 1);

    cap.set_reading("dev0", "x", TypedValue::Double(0.0), Quality::Ok);
    cache.poll_pass_once();
    cap.set_reading("dev0", "x", TypedValue::Double(-0.0), Quality::Ok);
    cache.poll_pass_once();
    let last: Vec<_> = std::iter::from_fn(|| sub.pop(Some(Duration::from_millis(10))))
      .filter(|e| matches!(e, Event::StateUpdate { .. }))
      .collect();
    assert_eq!(last.len(), 2);
  }

  // `test_log` surfaces the `debug!`/availability log lines this test's
  // two state transitions produce, without every test in the crate
  // paying for a logger init.
  #[test_log::test]
  fn failed_read_marks_unavailable_and_clears_then_resets_on_recovery() {
    let (registry, providers, locks, emitter) = setup();
    let cap = MockProviderCapability::with_devices(&["dev0"]);
    cap.set_reading("dev0", "x", TypedValue::Bool(true), Quality::Ok);
    registry.discover_provider("sim0", &cap).unwrap();
    let cap = Arc::new(cap);
    providers.insert("sim0", cap.clone());

    let cache = StateCache::new(registry, providers, locks, emitter.clone(), Duration::from_millis(50));
    let sub = emitter.subscribe(EventFilter::any(), 32, "t").unwrap();
    cache.poll_pass_once();
    assert!(cache.get_device_state("sim0/dev0").unwrap().provider_available);

    cap.fail_reads(true);
    cache.poll_pass_once();
    let state = cache.get_device_state("sim0/dev0").unwrap();
    assert!(!state.provider_available);
    assert!(state.signals.is_empty());

    cap.fail_reads(false);
    cache.poll_pass_once();
    let state = cache.get_device_state("sim0/dev0").unwrap();
    assert!(state.provider_available);
    assert!(state.signals.contains_key("x"));

    let availability_events: Vec<_> = std::iter::from_fn(|| sub.pop(Some(Duration::from_millis(10))))
      .filter(|e| matches!(e, Event::DeviceAvailability { .. }))
      .collect();
    assert_eq!(availability_events.len(), 2);
  }
}
