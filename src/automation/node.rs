//! The trait boundary automation nodes implement, and the two read/write
//! ports spec.md §4.7 allows them to touch: a state cache snapshot
//! reader and a call router handle with `is_automated` fixed to `true`,
//! plus read-only parameter access.

use std::collections::HashMap;

use crate::cache::{CachedSignalValue, DeviceState, StateCache};
use crate::error::{KernelError, KernelResult};
use crate::parameters::ParameterManager;
use crate::registry::make_handle;
use crate::router::{CallRequest, CallResponse, CallRouter};
use crate::value::TypedValue;

/// The outcome of ticking one node, the standard behavior-tree
/// vocabulary. Only the host (this trait, and the `Sequence`/`Selector`/
/// `Action` scaffolding in `composite.rs`) is in scope; a library of
/// domain nodes is explicitly not (spec.md §1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
  Success,
  Failure,
  Running,
}

/// The working context handed to a node on every tick. Automation is
/// "a first-class consumer of the cache and router, distinguished only
/// by the `is_automated` flag" (spec.md §9) — it has no other channel to
/// a provider.
pub struct TickContext<'a> {
  cache: &'a StateCache,
  router: &'a CallRouter,
  parameters: &'a ParameterManager,
  mode_is_auto: bool,
}

impl<'a> TickContext<'a> {
  pub(crate) fn new(
    cache: &'a StateCache,
    router: &'a CallRouter,
    parameters: &'a ParameterManager,
    mode_is_auto: bool,
  ) -> Self {
    TickContext { cache, router, parameters, mode_is_auto }
  }

  /// Reads one signal's cached value through the same owned-snapshot
  /// path every other caller uses (spec.md §4.2).
  pub fn read_signal(&self, provider_id: &str, device_id: &str, signal_id: &str) -> Option<CachedSignalValue> {
    let handle = make_handle(provider_id, device_id);
    self.cache.get_signal_value(&handle, signal_id)
  }

  pub fn read_device(&self, provider_id: &str, device_id: &str) -> Option<DeviceState> {
    let handle = make_handle(provider_id, device_id);
    self.cache.get_device_state(&handle)
  }

  pub fn parameter(&self, name: &str) -> KernelResult<TypedValue> {
    self.parameters.get(name)
  }

  /// `true` while the runtime mode is `AUTO`. A node that would issue a
  /// call should check this before doing so and return `Failure`
  /// instead (spec.md §4.7 gating) — `call` below enforces the same
  /// check unconditionally, so a node that forgets still cannot
  /// dispatch outside `AUTO`.
  pub fn mode_is_auto(&self) -> bool {
    self.mode_is_auto
  }

  /// Issues a control call with `is_automated = true`. Returns
  /// `FailedPrecondition` without dispatching if the mode is not `AUTO`
  /// — the loop keeps ticking in every mode, but no automated call ever
  /// reaches a provider outside `AUTO` regardless of which gating
  /// strategy (pause vs. tick-through-and-refuse) the embedding host
  /// picked for the tick loop itself (spec.md §4.7).
  pub fn call(
    &self,
    device_handle: &str,
    function_name: &str,
    args: HashMap<String, TypedValue>,
  ) -> KernelResult<CallResponse> {
    if !self.mode_is_auto {
      return Err(KernelError::FailedPrecondition(
        "automated call attempted outside AUTO".into(),
      ));
    }
    self.router.execute_call(CallRequest {
      device_handle: device_handle.to_string(),
      function_name: function_name.to_string(),
      function_id: None,
      args,
      is_automated: true,
    })
  }
}

/// A node in the behavior tree graph. `Running` means "tick me again
/// next period"; a node is responsible for whatever working memory it
/// needs to resume correctly across ticks.
pub trait BehaviorNode: Send {
  fn tick(&mut self, ctx: &mut TickContext) -> NodeStatus;

  /// Name surfaced in `BtError` events and logs; defaults to a generic
  /// label for nodes that don't care to name themselves.
  fn name(&self) -> &str {
    "node"
  }
}
