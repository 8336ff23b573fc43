//! Mode Manager: the safety-critical finite state machine gating control.
//!
//! Transitions are validated under an exclusive lock, applied, and only
//! then dispatched to registered callbacks — with the lock released
//! first, so a callback is free to call back into the kernel (spec.md
//! §4.5, §9 design note).

use std::{
  panic::{catch_unwind, AssertUnwindSafe},
  sync::{Arc, Mutex, RwLock},
};

#[allow(unused_imports)]
use log::{info, warn};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::events::{Event, EventEmitter};

/// The runtime's operational mode. Gates whether the call router accepts
/// manual or automated control calls (spec.md §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeMode {
  Manual,
  Auto,
  Idle,
  Fault,
}

impl RuntimeMode {
  /// Exact, case-sensitive name used at the system boundary.
  pub fn name(self) -> &'static str {
    match self {
      RuntimeMode::Manual => "MANUAL",
      RuntimeMode::Auto => "AUTO",
      RuntimeMode::Idle => "IDLE",
      RuntimeMode::Fault => "FAULT",
    }
  }

  /// Strict parse: rejects anything but the four exact names.
  pub fn parse(s: &str) -> Option<RuntimeMode> {
    match s {
      "MANUAL" => Some(RuntimeMode::Manual),
      "AUTO" => Some(RuntimeMode::Auto),
      "IDLE" => Some(RuntimeMode::Idle),
      "FAULT" => Some(RuntimeMode::Fault),
      _ => None,
    }
  }

  /// Defensive helper that never fails, returning `MANUAL` for anything
  /// unrecognized. Callers MUST validate with `parse` before acting on
  /// user input; this exists only for call sites that need a mode value
  /// unconditionally (spec.md §4.5).
  pub fn parse_or_manual(s: &str) -> RuntimeMode {
    Self::parse(s).unwrap_or(RuntimeMode::Manual)
  }
}

fn transition_allowed(from: RuntimeMode, to: RuntimeMode) -> bool {
  use RuntimeMode::*;
  if from == to {
    return true;
  }
  matches!(
    (from, to),
    (Manual, Auto)
      | (Auto, Manual)
      | (Manual, Idle)
      | (Idle, Manual)
      | (Manual, Fault)
      | (Auto, Fault)
      | (Idle, Fault)
      | (Fault, Manual)
  )
}

type ModeCallback = Arc<dyn Fn(RuntimeMode, RuntimeMode) + Send + Sync>;

/// Thread-safe mode FSM with callback notification.
pub struct ModeManager {
  current: RwLock<RuntimeMode>,
  callbacks: Mutex<Vec<ModeCallback>>,
  emitter: EventEmitter,
}

impl ModeManager {
  pub fn new(initial: RuntimeMode, emitter: EventEmitter) -> Self {
    ModeManager {
      current: RwLock::new(initial),
      callbacks: Mutex::new(Vec::new()),
      emitter,
    }
  }

  pub fn current_mode(&self) -> RuntimeMode {
    *self.current.read().unwrap()
  }

  pub fn is_idle(&self) -> bool {
    self.current_mode() == RuntimeMode::Idle
  }

  pub fn is_fault(&self) -> bool {
    self.current_mode() == RuntimeMode::Fault
  }

  /// Registers a callback invoked `(old, new)` on every *applied*
  /// transition (never on a no-op or rejected transition). Safe to call
  /// while a transition is in flight; new registrations take effect from
  /// the next transition's dispatch (spec.md §4.5).
  pub fn on_mode_change<F>(&self, callback: F)
  where
    F: Fn(RuntimeMode, RuntimeMode) + Send + Sync + 'static,
  {
    self.callbacks.lock().unwrap().push(Arc::new(callback));
  }

  /// Attempts the transition to `target`. Returns `true` on success
  /// (including the no-op case of `target == current`, which emits
  /// nothing and fires no callback) and `false` if the transition is
  /// disallowed, in which case the mode is left unchanged.
  pub fn set_mode(&self, target: RuntimeMode) -> bool {
    let old = {
      let mut current = self.current.write().unwrap();
      if *current == target {
        return true;
      }
      if !transition_allowed(*current, target) {
        warn!("mode: rejected transition {:?} -> {:?}", *current, target);
        return false;
      }
      let old = *current;
      *current = target;
      old
    };

    info!("mode: {} -> {}", old.name(), target.name());

    let callbacks = self.callbacks.lock().unwrap().clone();
    for callback in &callbacks {
      if catch_unwind(AssertUnwindSafe(|| callback(old, target))).is_err() {
        log::error!("mode callback panicked for transition {:?} -> {:?}; continuing", old, target);
      }
    }

    self.emitter.emit(Event::ModeChange {
      event_id: 0,
      previous: old,
      new: target,
      ts: Utc::now(),
    });

    true
  }
}

/// Whether manual (non-automated) control calls are allowed while the
/// runtime is in `AUTO` mode (spec.md §4.4, §6 configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualGatingPolicy {
  Block,
  Override,
}
