//! Automation (behavior-tree) Runtime: a single-threaded tick loop that
//! consumes only the State Cache and the Call Router — never a provider
//! capability directly (spec.md §4.7, §9 "Automation is not a protocol
//! peer").

pub mod composite;
pub mod node;

use std::{
  any::Any,
  panic::{catch_unwind, AssertUnwindSafe},
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

pub use node::{BehaviorNode, NodeStatus, TickContext};

use crate::cache::StateCache;
use crate::events::{Event, EventEmitter};
use crate::mode::{ModeManager, RuntimeMode};
use crate::parameters::ParameterManager;
use crate::router::CallRouter;

/// The tick loop's own health, distinct from any individual device's
/// quality (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtStatus {
  /// The loop has not ticked yet (constructed, not started, or stopped).
  Idle,
  Running,
  /// The tree has returned `Running` for `stall_after_ticks` consecutive
  /// ticks with no `Success`/`Failure` in between.
  Stalled,
  /// The most recent tick panicked.
  Error,
}

/// A point-in-time snapshot of the tick loop's health counters, returned
/// by value so callers never hold a lock into the runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BtHealth {
  pub status: BtStatus,
  pub total_ticks: u64,
  pub last_tick_at: Option<DateTime<Utc>>,
  pub running_streak: u32,
  pub error_count: u64,
}

struct HealthInner {
  status: BtStatus,
  total_ticks: u64,
  last_tick_at: Option<DateTime<Utc>>,
  running_streak: u32,
  error_count: u64,
  last_error: Option<String>,
}

impl HealthInner {
  fn snapshot(&self) -> BtHealth {
    BtHealth {
      status: self.status,
      total_ticks: self.total_ticks,
      last_tick_at: self.last_tick_at,
      running_streak: self.running_streak,
      error_count: self.error_count,
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "behavior tree node panicked with a non-string payload".to_string()
  }
}

/// Drives one behavior tree at a configured rate, on its own thread,
/// started only when enabled (spec.md §4.7).
pub struct AutomationRuntime {
  cache: Arc<StateCache>,
  router: Arc<CallRouter>,
  parameters: Arc<ParameterManager>,
  mode: Arc<ModeManager>,
  emitter: EventEmitter,
  tree: Mutex<Box<dyn BehaviorNode>>,
  tick_interval: Duration,
  stall_after_ticks: u32,
  health: RwLock<HealthInner>,
  stop_flag: Arc<AtomicBool>,
  thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutomationRuntime {
  pub fn new(
    cache: Arc<StateCache>,
    router: Arc<CallRouter>,
    parameters: Arc<ParameterManager>,
    mode: Arc<ModeManager>,
    emitter: EventEmitter,
    tree: Box<dyn BehaviorNode>,
    tick_interval: Duration,
    stall_after_ticks: u32,
  ) -> Self {
    AutomationRuntime {
      cache,
      router,
      parameters,
      mode,
      emitter,
      tree: Mutex::new(tree),
      tick_interval,
      stall_after_ticks: stall_after_ticks.max(1),
      health: RwLock::new(HealthInner {
        status: BtStatus::Idle,
        total_ticks: 0,
        last_tick_at: None,
        running_streak: 0,
        error_count: 0,
        last_error: None,
      }),
      stop_flag: Arc::new(AtomicBool::new(false)),
      thread_handle: Mutex::new(None),
    }
  }

  pub fn health(&self) -> BtHealth {
    self.health.read().unwrap().snapshot()
  }

  pub fn last_error(&self) -> Option<String> {
    self.health.read().unwrap().last_error.clone()
  }

  /// Starts the tick thread. The embedding host only calls this when
  /// automation is enabled in configuration; a no-op if already running.
  pub fn start(self: &Arc<Self>) {
    let mut handle_slot = self.thread_handle.lock().unwrap();
    if handle_slot.is_some() {
      return;
    }
    self.stop_flag.store(false, Ordering::SeqCst);
    let runtime = self.clone();
    let builder = thread::Builder::new().name("anolis-automation-tick".into());
    let handle = builder
      .spawn(move || runtime.run_tick_loop())
      .expect("failed to spawn automation tick thread");
    *handle_slot = Some(handle);
    info!("automation: tick thread started (period {:?})", self.tick_interval);
  }

  /// Signals the tick thread to exit after its current tick and joins
  /// it; the stop flag is only observed between ticks (spec.md §5).
  pub fn stop(&self) {
    self.stop_flag.store(true, Ordering::SeqCst);
    if let Some(handle) = self.thread_handle.lock().unwrap().take() {
      let _ = handle.join();
    }
  }

  fn run_tick_loop(self: Arc<Self>) {
    while !self.stop_flag.load(Ordering::SeqCst) {
      let tick_start = Instant::now();
      self.tick_once();
      let elapsed = tick_start.elapsed();
      if elapsed > self.tick_interval {
        warn!(
          "automation: tick took {:?}, exceeding the {:?} period; re-entering immediately",
          elapsed, self.tick_interval
        );
      } else {
        thread::sleep(self.tick_interval - elapsed);
      }
    }
    info!("automation: tick thread stopped");
  }

  /// Runs exactly one tick: snapshots the mode gate, ticks the tree once
  /// with working memory scoped to this call, and records health.
  /// Exposed directly so tests (and a host that wants manual stepping)
  /// don't need a real thread.
  pub fn tick_once(&self) {
    let mode_is_auto = self.mode.current_mode() == RuntimeMode::Auto;
    let mut ctx = TickContext::new(&self.cache, &self.router, &self.parameters, mode_is_auto);

    let result = {
      let mut tree = self.tree.lock().unwrap();
      catch_unwind(AssertUnwindSafe(|| tree.tick(&mut ctx)))
    };

    let mut health = self.health.write().unwrap();
    health.total_ticks += 1;
    health.last_tick_at = Some(Utc::now());

    match result {
      Ok(NodeStatus::Success) | Ok(NodeStatus::Failure) => {
        health.running_streak = 0;
        health.status = BtStatus::Running;
      }
      Ok(NodeStatus::Running) => {
        health.running_streak += 1;
        health.status = if health.running_streak >= self.stall_after_ticks {
          BtStatus::Stalled
        } else {
          BtStatus::Running
        };
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        health.error_count += 1;
        health.last_error = Some(message.clone());
        health.status = BtStatus::Error;
        drop(health);
        debug!("automation: node panicked: {message}");
        self.emitter.emit(Event::BtError { event_id: 0, node: None, error: message, ts: Utc::now() });
      }
    }
  }
}

impl Drop for AutomationRuntime {
  fn drop(&mut self) {
    self.stop();
  }
}
