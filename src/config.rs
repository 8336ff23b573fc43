//! `KernelConfig`: the sole configuration input to the kernel.
//!
//! This crate never parses a config file itself (spec.md §6) — the
//! embedding host loads TOML/YAML/JSON however it likes and hands this
//! crate a typed, already-`Deserialize`d struct. Numeric defaults live
//! here, once, via `#[serde(default = "...")]` functions rather than
//! being scattered as magic numbers through the component modules.

use serde::{Deserialize, Serialize};

use crate::mode::{ManualGatingPolicy, RuntimeMode};
use crate::parameters::ParameterDefinition;

fn default_poll_interval_ms() -> u64 {
  500
}

fn default_tick_rate_hz() -> f64 {
  10.0
}

fn default_max_subscribers() -> usize {
  32
}

fn default_event_queue_size() -> usize {
  256
}

fn default_stall_ticks() -> u32 {
  50
}

fn default_manual_gating_policy() -> ManualGatingPolicy {
  ManualGatingPolicy::Block
}

fn default_initial_mode() -> RuntimeMode {
  RuntimeMode::Manual
}

/// One provider the supervisor should launch and the kernel should
/// discover once it reports available. The launch mechanics themselves
/// (spawning the process, restart backoff) are the supervisor's concern;
/// the kernel only needs the `provider_id` it will see in handles and
/// snapshots, plus whatever opaque launch data the host's supervisor
/// understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLaunchSpec {
  pub provider_id: String,
  pub command: String,
  #[serde(default)]
  pub args: Vec<String>,
}

/// Configuration for the event emitter's default behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQueueConfig {
  #[serde(default = "default_event_queue_size")]
  pub default_queue_size: usize,
  #[serde(default = "default_max_subscribers")]
  pub max_subscribers: usize,
}

impl Default for EventQueueConfig {
  fn default() -> Self {
    EventQueueConfig {
      default_queue_size: default_event_queue_size(),
      max_subscribers: default_max_subscribers(),
    }
  }
}

/// The full set of inputs the embedding host supplies to build a
/// `Kernel` (spec.md §6). Does not derive `PartialEq`: it transitively
/// holds `ParameterDefinition`, which holds a `TypedValue` (see
/// `value.rs` for why that type opts out of derived equality).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
  pub providers: Vec<ProviderLaunchSpec>,

  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,

  #[serde(default)]
  pub automation_enabled: bool,

  #[serde(default)]
  pub behavior_tree_path: Option<String>,

  #[serde(default = "default_tick_rate_hz")]
  pub tick_rate_hz: f64,

  /// Number of ticks a node may return `Running` with no recorded
  /// progress before the automation runtime marks itself `Stalled`
  /// (spec.md §4.7).
  #[serde(default = "default_stall_ticks")]
  pub stall_after_ticks: u32,

  #[serde(default = "default_manual_gating_policy")]
  pub manual_gating_policy: ManualGatingPolicy,

  #[serde(default = "default_initial_mode")]
  pub initial_mode: RuntimeMode,

  #[serde(default)]
  pub parameters: Vec<ParameterDefinition>,

  #[serde(default)]
  pub event_queues: EventQueueConfig,

  #[serde(default = "default_max_subscribers")]
  pub max_subscribers: usize,
}

impl KernelConfig {
  pub fn poll_interval(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.poll_interval_ms)
  }

  pub fn tick_interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(0.001))
  }
}
