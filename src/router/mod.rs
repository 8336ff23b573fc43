//! Call Router: the sole validated, mode-gated control path (spec.md §4.4).

use std::collections::HashMap;
use std::sync::Arc;

#[allow(unused_imports)]
use log::{debug, error};

use crate::cache::StateCache;
use crate::error::{KernelError, KernelResult};
use crate::mode::{ManualGatingPolicy, ModeManager, RuntimeMode};
use crate::provider::{ProviderLocks, ProviderStatusCode, ProviderTable};
use crate::registry::{split_handle, DeviceRegistry, FunctionSpec};
use crate::value::TypedValue;

/// A request to invoke one function on one device. `function_id`, when
/// present, takes precedence over `function_name` for resolving the
/// target `FunctionSpec` (spec.md §4.4 CallRequest); most callers just
/// leave it `None` and address the function by name.
#[derive(Debug, Clone)]
pub struct CallRequest {
  pub device_handle: String,
  pub function_name: String,
  pub function_id: Option<u32>,
  pub args: HashMap<String, TypedValue>,
  /// `true` when issued by the automation runtime, `false` for manual
  /// (operator/API) calls. Gates whether the call is allowed in `AUTO`.
  pub is_automated: bool,
}

/// The outcome of a successful call: whatever values the provider chose
/// to return (e.g. the applied setpoint).
#[derive(Debug, Clone, Default)]
pub struct CallResponse {
  pub values: HashMap<String, TypedValue>,
}

fn map_provider_status(status: ProviderStatusCode, message: Option<&str>) -> KernelError {
  let msg = message.unwrap_or("").to_string();
  match status {
    ProviderStatusCode::InvalidArgument | ProviderStatusCode::OutOfRange => {
      KernelError::InvalidArgument(msg)
    }
    ProviderStatusCode::NotFound => KernelError::NotFound(msg),
    ProviderStatusCode::FailedPrecondition => KernelError::FailedPrecondition(msg),
    ProviderStatusCode::Unavailable | ProviderStatusCode::ResourceExhausted => {
      KernelError::Unavailable(msg)
    }
    ProviderStatusCode::DeadlineExceeded => KernelError::DeadlineExceeded(msg),
    ProviderStatusCode::Ok => unreachable!("Ok is handled before mapping"),
    ProviderStatusCode::Internal | ProviderStatusCode::Unknown => KernelError::Internal(msg),
  }
}

/// The only control path into a device. Validates against the registry's
/// capability schemas, gates on the current runtime mode, dispatches
/// through the per-provider serialization lock, and triggers a
/// post-call state cache refresh.
pub struct CallRouter {
  registry: Arc<DeviceRegistry>,
  mode: Arc<ModeManager>,
  cache: Arc<StateCache>,
  providers: Arc<ProviderTable>,
  provider_locks: Arc<ProviderLocks>,
  manual_gating_policy: ManualGatingPolicy,
}

impl CallRouter {
  pub fn new(
    registry: Arc<DeviceRegistry>,
    mode: Arc<ModeManager>,
    cache: Arc<StateCache>,
    providers: Arc<ProviderTable>,
    provider_locks: Arc<ProviderLocks>,
    manual_gating_policy: ManualGatingPolicy,
  ) -> Self {
    CallRouter { registry, mode, cache, providers, provider_locks, manual_gating_policy }
  }

  pub fn execute_call(&self, request: CallRequest) -> KernelResult<CallResponse> {
    let (provider_id, device_id) = split_handle(&request.device_handle)?;

    let device = self
      .registry
      .get_by_handle(&request.device_handle)
      .ok_or_else(|| KernelError::NotFound(format!("device '{}'", request.device_handle)))?;

    let function = match request.function_id {
      Some(function_id) => device.capabilities.function_by_id(function_id).ok_or_else(|| {
        KernelError::NotFound(format!(
          "function id {} on device '{}'",
          function_id, request.device_handle
        ))
      })?,
      None => device
        .capabilities
        .functions
        .get(&request.function_name)
        .ok_or_else(|| {
          KernelError::NotFound(format!(
            "function '{}' on device '{}'",
            request.function_name, request.device_handle
          ))
        })?,
    };

    Self::validate_args(function, &request.args)?;
    self.check_mode_gate(request.is_automated)?;

    let capability = self.providers.get(provider_id).ok_or_else(|| {
      KernelError::Unavailable(format!("provider '{provider_id}' has no registered capability"))
    })?;
    if !capability.is_available() {
      return Err(KernelError::Unavailable(format!("provider '{provider_id}' is unavailable")));
    }

    let response = {
      let lock = self.provider_locks.lock_for(provider_id);
      let _guard = lock.lock().unwrap();
      capability.call(device_id, function.function_id, &function.function_name, request.args.clone())
    };

    if response.status != ProviderStatusCode::Ok {
      debug!(
        "call router: '{}' on '{}' failed: {:?} {:?}",
        request.function_name, request.device_handle, response.status, response.message
      );
      return Err(map_provider_status(response.status, response.message.as_deref()));
    }

    // Post-call refresh runs synchronously so a subsequent snapshot read
    // observes the effect of this call (spec.md §5 ordering guarantee).
    // It is not run for failed calls (spec.md §9 Open Question 2).
    if let Err(e) = self.cache.poll_device_now(&request.device_handle) {
      error!("call router: post-call refresh of '{}' failed: {e}", request.device_handle);
    }

    Ok(CallResponse { values: response.values })
  }

  fn validate_args(function: &FunctionSpec, args: &HashMap<String, TypedValue>) -> KernelResult<()> {
    for arg_spec in &function.args {
      if arg_spec.required && !args.contains_key(&arg_spec.name) {
        return Err(KernelError::InvalidArgument(format!(
          "missing required argument '{}'",
          arg_spec.name
        )));
      }
    }
    for name in args.keys() {
      if function.arg(name).is_none() {
        return Err(KernelError::InvalidArgument(format!("unknown argument '{name}'")));
      }
    }
    for (name, value) in args {
      let arg_spec = function.arg(name).expect("checked above");
      if arg_spec.value_type != value.value_type() {
        return Err(KernelError::InvalidArgument(format!(
          "argument '{name}' expects {:?}, got {:?}",
          arg_spec.value_type,
          value.value_type()
        )));
      }
      if let Some(range) = &arg_spec.range {
        let numeric = value.as_f64().expect("range only set on numeric args");
        if numeric < range.min {
          return Err(KernelError::InvalidArgument(format!(
            "argument '{name}' value {numeric} below minimum {}",
            range.min
          )));
        }
        if numeric > range.max {
          return Err(KernelError::InvalidArgument(format!(
            "argument '{name}' value {numeric} above maximum {}",
            range.max
          )));
        }
      }
    }
    Ok(())
  }

  fn check_mode_gate(&self, is_automated: bool) -> KernelResult<()> {
    match self.mode.current_mode() {
      RuntimeMode::Idle => Err(KernelError::FailedPrecondition("control blocked in IDLE".into())),
      RuntimeMode::Auto if !is_automated => match self.manual_gating_policy {
        ManualGatingPolicy::Block => {
          Err(KernelError::FailedPrecondition("manual call blocked in AUTO".into()))
        }
        ManualGatingPolicy::Override => Ok(()),
      },
      _ => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::events::EventEmitter;
  use crate::registry::{ArgSpec, DeviceCapabilitySet, FunctionSpec, NumericRange, SignalSpec};
  use crate::testing::MockProviderCapability;
  use crate::value::ValueType;
  use std::time::Duration;

  fn build_router(mode: RuntimeMode, policy: ManualGatingPolicy) -> (CallRouter, Arc<MockProviderCapability>) {
    let registry = Arc::new(DeviceRegistry::new());
    let mut caps = DeviceCapabilitySet::new("motorctl");
    caps.signals.insert(
      "duty_1".into(),
      SignalSpec {
        signal_id: "duty_1".into(),
        label: "Duty 1".into(),
        value_type: ValueType::Double,
        readable: true,
        writable: false,
        is_default_polled: true,
        poll_hint_hz: None,
      },
    );
    caps.functions.insert(
      "set_duty".into(),
      FunctionSpec {
        function_id: 1,
        function_name: "set_duty".into(),
        label: "Set duty".into(),
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
    let cap = MockProviderCapability::with_devices(&["motorctl0"]);
    cap.set_capabilities("motorctl0", caps.clone());
    let cap = Arc::new(cap);

    registry.discover_provider("sim0", cap.as_ref()).unwrap();
    let providers = Arc::new(ProviderTable::new());
    providers.insert("sim0", cap.clone() as Arc<dyn crate::provider::ProviderCapability>);
    let provider_locks = Arc::new(ProviderLocks::new());

    let emitter = EventEmitter::new(8);
    let mode_mgr = Arc::new(ModeManager::new(mode, emitter.clone()));
    let cache = Arc::new(StateCache::new(
      registry.clone(),
      providers.clone(),
      provider_locks.clone(),
      emitter,
      Duration::from_millis(50),
    ));

    let router = CallRouter::new(registry, mode_mgr, cache, providers, provider_locks, policy);
    (router, cap)
  }

  fn call(motor_index: i64, duty: f64) -> CallRequest {
    let mut args = HashMap::new();
    args.insert("motor_index".into(), TypedValue::Int64(motor_index));
    args.insert("duty".into(), TypedValue::Double(duty));
    CallRequest {
      device_handle: "sim0/motorctl0".into(),
      function_name: "set_duty".into(),
      function_id: None,
      args,
      is_automated: false,
    }
  }

  #[test]
  fn call_by_function_id_resolves_the_same_function_as_by_name() {
    let (router, cap) = build_router(RuntimeMode::Manual, ManualGatingPolicy::Block);
    let mut req = call(1, 0.75);
    req.function_name = "bogus-name-ignored-when-id-is-set".into();
    req.function_id = Some(1);
    assert!(router.execute_call(req).is_ok());
    assert_eq!(cap.last_call_args().get("duty").and_then(|v| v.as_f64()), Some(0.75));
  }

  #[test]
  fn unknown_function_id_is_not_found() {
    let (router, _cap) = build_router(RuntimeMode::Manual, ManualGatingPolicy::Block);
    let mut req = call(1, 0.75);
    req.function_id = Some(999);
    let err = router.execute_call(req).unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
  }

  #[test]
  fn scenario_happy_path_call() {
    let (router, cap) = build_router(RuntimeMode::Manual, ManualGatingPolicy::Block);
    let result = router.execute_call(call(1, 0.75));
    assert!(result.is_ok());
    assert_eq!(cap.last_call_args().get("duty").and_then(|v| v.as_f64()), Some(0.75));
  }

  #[test]
  fn scenario_invalid_range_is_rejected_before_dispatch() {
    let (router, cap) = build_router(RuntimeMode::Manual, ManualGatingPolicy::Block);
    let err = router.execute_call(call(1, 1.5)).unwrap_err();
    assert_eq!(err.kind(), "INVALID_ARGUMENT");
    assert!(err.to_string().contains("above maximum 1"));
    assert!(cap.last_call_args().is_empty());
  }

  #[test]
  fn scenario_auto_block_then_override() {
    let (router, _cap) = build_router(RuntimeMode::Auto, ManualGatingPolicy::Block);
    let err = router.execute_call(call(1, 0.5)).unwrap_err();
    assert_eq!(err.kind(), "FAILED_PRECONDITION");
    assert!(err.to_string().contains("manual call blocked in AUTO"));

    let (router, _cap) = build_router(RuntimeMode::Auto, ManualGatingPolicy::Override);
    assert!(router.execute_call(call(1, 0.5)).is_ok());
  }

  #[test]
  fn idle_mode_blocks_every_call() {
    let (router, _cap) = build_router(RuntimeMode::Idle, ManualGatingPolicy::Override);
    let err = router.execute_call(call(1, 0.5)).unwrap_err();
    assert_eq!(err.kind(), "FAILED_PRECONDITION");
  }

  #[test]
  fn unknown_argument_is_rejected() {
    let (router, _cap) = build_router(RuntimeMode::Manual, ManualGatingPolicy::Block);
    let mut req = call(1, 0.5);
    req.args.insert("extra".into(), TypedValue::Bool(true));
    let err = router.execute_call(req).unwrap_err();
    assert_eq!(err.kind(), "INVALID_ARGUMENT");
  }

  #[test]
  fn missing_required_argument_is_rejected() {
    let (router, _cap) = build_router(RuntimeMode::Manual, ManualGatingPolicy::Block);
    let mut req = call(1, 0.5);
    req.args.remove("duty");
    let err = router.execute_call(req).unwrap_err();
    assert_eq!(err.kind(), "INVALID_ARGUMENT");
  }

  #[test]
  fn unknown_device_is_not_found() {
    let (router, _cap) = build_router(RuntimeMode::Manual, ManualGatingPolicy::Block);
    let mut req = call(1, 0.5);
    req.device_handle = "sim0/nope".into();
    let err = router.execute_call(req).unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
  }
}
