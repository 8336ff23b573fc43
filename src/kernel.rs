//! `Kernel`: the thin top-level assembly that wires every component
//! together and owns the long-lived threads (spec.md §2 composition).
//!
//! Everything here is orchestration, not policy: the component modules
//! (`registry`, `cache`, `events`, `router`, `mode`, `parameters`,
//! `automation`) each enforce their own invariants independently of how
//! `Kernel` happens to assemble them, mirroring the way `rustdds`'s
//! `DomainParticipant` assembles RTPS readers/writers without itself
//! implementing RTPS.

use std::sync::{Arc, Mutex};

use crate::automation::{AutomationRuntime, BehaviorNode};
use crate::cache::StateCache;
use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::events::EventEmitter;
use crate::mode::ModeManager;
use crate::parameters::ParameterManager;
use crate::provider::{ProviderCapability, ProviderLocks, ProviderLifecycle, ProviderSupervisorView, ProviderTable};
use crate::registry::DeviceRegistry;
use crate::router::CallRouter;

/// Owns every kernel component and the threads the polling loop and
/// automation runtime spawn. Cloning the `Arc<Kernel>` an embedding
/// host's adapters hold is cheap; the kernel itself is not `Clone`
/// (its components already share state through their own internal
/// `Arc`s — see each module's constructor).
pub struct Kernel {
  config: KernelConfig,
  registry: Arc<DeviceRegistry>,
  providers: Arc<ProviderTable>,
  #[allow(dead_code)]
  provider_locks: Arc<ProviderLocks>,
  emitter: EventEmitter,
  mode: Arc<ModeManager>,
  parameters: Arc<ParameterManager>,
  cache: Arc<StateCache>,
  router: Arc<CallRouter>,
  automation: Mutex<Option<Arc<AutomationRuntime>>>,
}

impl Kernel {
  /// Assembles every component from `config`. No provider is registered
  /// yet and no thread is running; call [`Kernel::add_provider`] per
  /// discovered provider and [`Kernel::start`] to begin polling.
  pub fn new(config: KernelConfig) -> Arc<Kernel> {
    let registry = Arc::new(DeviceRegistry::new());
    let providers = Arc::new(ProviderTable::new());
    let provider_locks = Arc::new(ProviderLocks::new());
    let emitter = EventEmitter::new(config.max_subscribers);
    let mode = Arc::new(ModeManager::new(config.initial_mode, emitter.clone()));
    let parameters = Arc::new(ParameterManager::new(config.parameters.clone(), emitter.clone()));
    let cache = Arc::new(StateCache::new(
      registry.clone(),
      providers.clone(),
      provider_locks.clone(),
      emitter.clone(),
      config.poll_interval(),
    ));
    let router = Arc::new(CallRouter::new(
      registry.clone(),
      mode.clone(),
      cache.clone(),
      providers.clone(),
      provider_locks.clone(),
      config.manual_gating_policy,
    ));

    Arc::new(Kernel {
      config,
      registry,
      providers,
      provider_locks,
      emitter,
      mode,
      parameters,
      cache,
      router,
      automation: Mutex::new(None),
    })
  }

  pub fn config(&self) -> &KernelConfig {
    &self.config
  }

  pub fn registry(&self) -> &Arc<DeviceRegistry> {
    &self.registry
  }

  pub fn cache(&self) -> &Arc<StateCache> {
    &self.cache
  }

  pub fn router(&self) -> &Arc<CallRouter> {
    &self.router
  }

  pub fn mode(&self) -> &Arc<ModeManager> {
    &self.mode
  }

  pub fn parameters(&self) -> &Arc<ParameterManager> {
    &self.parameters
  }

  pub fn emitter(&self) -> &EventEmitter {
    &self.emitter
  }

  /// Discovers `provider_id`'s devices through `capability` and adds
  /// them to the registry and the state cache's poll set in one step.
  /// The embedding host calls this once its provider supervisor reports
  /// a provider available (spec.md §4.1, §4.8).
  pub fn add_provider(&self, provider_id: &str, capability: Arc<dyn ProviderCapability>) -> KernelResult<usize> {
    let count = self.registry.discover_provider(provider_id, capability.as_ref())?;
    self.providers.insert(provider_id, capability);
    self.cache.refresh_poll_configs();
    Ok(count)
  }

  /// Swaps in a fresh capability for an already-registered provider
  /// after a supervisor restart, without touching the registry — the
  /// registry's device rows are unaffected by a restart that doesn't
  /// change the provider's reported device set (spec.md §9 design note
  /// on provider handle aliasing across restart).
  pub fn replace_provider_capability(&self, provider_id: &str, capability: Arc<dyn ProviderCapability>) {
    self.providers.insert(provider_id, capability);
  }

  /// Evicts every device belonging to `provider_id`. The only path by
  /// which a device's capability set may effectively change is this
  /// followed by a fresh `add_provider` (spec.md §9 Open Question 1).
  pub fn evict_provider(&self, provider_id: &str) -> usize {
    self.providers.remove(provider_id);
    let removed = self.registry.clear_provider_devices(provider_id);
    self.cache.refresh_poll_configs();
    removed
  }

  /// Derives a provider's lifecycle from the embedding host's
  /// supervisor snapshot. The kernel never mutates supervisor state —
  /// this is a pure read (spec.md §4.8).
  pub fn provider_lifecycle(
    &self,
    provider_id: &str,
    supervisor: &dyn ProviderSupervisorView,
  ) -> Option<ProviderLifecycle> {
    supervisor.snapshot(provider_id).map(|snapshot| ProviderLifecycle::derive(&snapshot))
  }

  /// Starts the state cache's polling thread. Idempotent.
  pub fn start(self: &Arc<Self>) {
    self.cache.start();
  }

  /// Installs `tree` and starts the automation tick thread, but only if
  /// `config.automation_enabled` — spec.md §4.7's "thread starts only
  /// when enabled". A no-op (returns `false`) otherwise.
  pub fn start_automation(self: &Arc<Self>, tree: Box<dyn BehaviorNode>) -> bool {
    if !self.config.automation_enabled {
      return false;
    }
    let runtime = Arc::new(AutomationRuntime::new(
      self.cache.clone(),
      self.router.clone(),
      self.parameters.clone(),
      self.mode.clone(),
      self.emitter.clone(),
      tree,
      self.config.tick_interval(),
      self.config.stall_after_ticks,
    ));
    runtime.start();
    *self.automation.lock().unwrap() = Some(runtime);
    true
  }

  pub fn automation(&self) -> Option<Arc<AutomationRuntime>> {
    self.automation.lock().unwrap().clone()
  }

  /// Signals and joins every kernel thread (state cache polling,
  /// automation tick loop if running). Mirrors the embedding host's
  /// SIGINT/SIGTERM handling contract: the signal handler itself does
  /// nothing but store an atomic flag; this is the join side (spec.md
  /// §6, §9 "Signal-handler safety").
  pub fn stop(&self) {
    self.cache.stop();
    if let Some(automation) = self.automation.lock().unwrap().take() {
      automation.stop();
    }
  }
}
