//! Event Emitter: thread-safe fan-out with per-subscriber bounded queues.
//!
//! A single emitter holds a subscriber table; `emit` assigns the next
//! monotonic `event_id` and pushes into every matching subscriber's queue
//! while still holding the table lock, which is what makes "strictly
//! ascending event_id per subscriber queue" hold even when multiple
//! producer threads (state cache, mode manager, parameter manager, call
//! router) emit concurrently (spec.md §4.3, §5 lock hierarchy: emitter
//! table lock is acquired before any per-subscriber queue lock).

mod subscription;

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
  },
  time::Duration,
};

#[allow(unused_imports)]
use log::{debug, info, warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use subscription::EventFilter;
use subscription::SubscriberQueue;

use crate::error::{KernelError, KernelResult};
use crate::mode::RuntimeMode;
use crate::provider::ProviderLifecycle;
use crate::value::{Quality, TypedValue};

/// A tagged, immutable record of a state, mode, parameter, or health
/// change, carrying a kernel-wide monotonic `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
  StateUpdate {
    event_id: u64,
    provider_id: String,
    device_id: String,
    signal_id: String,
    value: TypedValue,
    quality: Quality,
    ts: DateTime<Utc>,
  },
  QualityChange {
    event_id: u64,
    provider_id: String,
    device_id: String,
    signal_id: String,
    old_quality: Quality,
    new_quality: Quality,
    ts: DateTime<Utc>,
  },
  DeviceAvailability {
    event_id: u64,
    provider_id: String,
    device_id: String,
    available: bool,
    ts: DateTime<Utc>,
  },
  ModeChange {
    event_id: u64,
    previous: RuntimeMode,
    new: RuntimeMode,
    ts: DateTime<Utc>,
  },
  ParameterChange {
    event_id: u64,
    name: String,
    old_value: String,
    new_value: String,
    ts: DateTime<Utc>,
  },
  BtError {
    event_id: u64,
    node: Option<String>,
    error: String,
    ts: DateTime<Utc>,
  },
  ProviderHealthChange {
    event_id: u64,
    provider_id: String,
    state: ProviderLifecycle,
    ts: DateTime<Utc>,
  },
}

/// The fields a filter can match against; events that don't carry a given
/// key (e.g. `ModeChange` has no `device_id`) report `None` for it, which
/// only matches a filter that leaves that field unset.
pub(crate) struct RoutingKeys<'a> {
  pub provider_id: Option<&'a str>,
  pub device_id: Option<&'a str>,
  pub signal_id: Option<&'a str>,
}

impl Event {
  pub fn event_id(&self) -> u64 {
    match self {
      Event::StateUpdate { event_id, .. }
      | Event::QualityChange { event_id, .. }
      | Event::DeviceAvailability { event_id, .. }
      | Event::ModeChange { event_id, .. }
      | Event::ParameterChange { event_id, .. }
      | Event::BtError { event_id, .. }
      | Event::ProviderHealthChange { event_id, .. } => *event_id,
    }
  }

  fn with_event_id(self, event_id: u64) -> Event {
    match self {
      Event::StateUpdate { provider_id, device_id, signal_id, value, quality, ts, .. } => {
        Event::StateUpdate { event_id, provider_id, device_id, signal_id, value, quality, ts }
      }
      Event::QualityChange { provider_id, device_id, signal_id, old_quality, new_quality, ts, .. } => {
        Event::QualityChange { event_id, provider_id, device_id, signal_id, old_quality, new_quality, ts }
      }
      Event::DeviceAvailability { provider_id, device_id, available, ts, .. } => {
        Event::DeviceAvailability { event_id, provider_id, device_id, available, ts }
      }
      Event::ModeChange { previous, new, ts, .. } => Event::ModeChange { event_id, previous, new, ts },
      Event::ParameterChange { name, old_value, new_value, ts, .. } => {
        Event::ParameterChange { event_id, name, old_value, new_value, ts }
      }
      Event::BtError { node, error, ts, .. } => Event::BtError { event_id, node, error, ts },
      Event::ProviderHealthChange { provider_id, state, ts, .. } => {
        Event::ProviderHealthChange { event_id, provider_id, state, ts }
      }
    }
  }

  pub(crate) fn routing_keys(&self) -> RoutingKeys<'_> {
    match self {
      Event::StateUpdate { provider_id, device_id, signal_id, .. }
      | Event::QualityChange { provider_id, device_id, signal_id, .. } => RoutingKeys {
        provider_id: Some(provider_id),
        device_id: Some(device_id),
        signal_id: Some(signal_id),
      },
      Event::DeviceAvailability { provider_id, device_id, .. } => RoutingKeys {
        provider_id: Some(provider_id),
        device_id: Some(device_id),
        signal_id: None,
      },
      Event::ProviderHealthChange { provider_id, .. } => RoutingKeys {
        provider_id: Some(provider_id),
        device_id: None,
        signal_id: None,
      },
      Event::ModeChange { .. } | Event::ParameterChange { .. } | Event::BtError { .. } => {
        RoutingKeys { provider_id: None, device_id: None, signal_id: None }
      }
    }
  }
}

struct SubscriberEntry {
  queue: Arc<SubscriberQueue>,
  filter: EventFilter,
  #[allow(dead_code)]
  name: String,
}

struct EmitterState {
  next_subscriber_id: u64,
  subscribers: HashMap<u64, SubscriberEntry>,
}

/// Shared emitter state, held behind an `Arc` so `Subscription::drop` can
/// remove its own table entry without the caller keeping the emitter
/// alive explicitly.
struct EmitterShared {
  state: Mutex<EmitterState>,
  next_event_id: AtomicU64,
  max_subscribers: usize,
}

/// Thread-safe fan-out point. Cheap to clone (shares one `Arc` inner);
/// every clone observes the same subscriber table.
#[derive(Clone)]
pub struct EventEmitter {
  shared: Arc<EmitterShared>,
}

impl EventEmitter {
  pub fn new(max_subscribers: usize) -> Self {
    EventEmitter {
      shared: Arc::new(EmitterShared {
        state: Mutex::new(EmitterState {
          next_subscriber_id: 1,
          subscribers: HashMap::new(),
        }),
        next_event_id: AtomicU64::new(1),
        max_subscribers,
      }),
    }
  }

  /// Creates a bounded queue for a new subscriber. Fails once the
  /// configured subscriber cap is reached (spec.md §4.3).
  pub fn subscribe(
    &self,
    filter: EventFilter,
    queue_size: usize,
    name: impl Into<String>,
  ) -> KernelResult<Subscription> {
    let name = name.into();
    let mut state = self.shared.state.lock().unwrap();
    if state.subscribers.len() >= self.shared.max_subscribers {
      return Err(KernelError::FailedPrecondition(format!(
        "max subscribers ({}) reached",
        self.shared.max_subscribers
      )));
    }
    let id = state.next_subscriber_id;
    state.next_subscriber_id += 1;
    let queue = Arc::new(SubscriberQueue::new(queue_size, name.clone()));
    state.subscribers.insert(
      id,
      SubscriberEntry { queue: queue.clone(), filter, name: name.clone() },
    );
    drop(state);
    info!("event emitter: subscriber '{name}' (id {id}) joined, queue size {queue_size}");
    Ok(Subscription {
      id,
      queue,
      emitter: Arc::downgrade(&self.shared),
    })
  }

  /// Assigns the next event id and fans the event out to every matching
  /// subscriber. Never blocks beyond the short-lived table and per-queue
  /// locks (pushing itself never blocks; see `SubscriberQueue::push`).
  pub fn emit(&self, event: Event) -> u64 {
    let state = self.shared.state.lock().unwrap();
    let event_id = self.shared.next_event_id.fetch_add(1, Ordering::SeqCst);
    let event = event.with_event_id(event_id);
    for entry in state.subscribers.values() {
      if entry.filter.matches(&event) {
        entry.queue.push(event.clone());
      }
    }
    event_id
  }

  pub fn subscriber_count(&self) -> usize {
    self.shared.state.lock().unwrap().subscribers.len()
  }
}

/// A unique, non-`Copy` handle to a subscription. Unsubscribes (closing
/// the queue and removing the table entry) when dropped.
pub struct Subscription {
  id: u64,
  queue: Arc<SubscriberQueue>,
  emitter: Weak<EmitterShared>,
}

impl Subscription {
  /// Blocks up to `timeout` for the next event, or forever if `None`.
  pub fn pop(&self, timeout: Option<Duration>) -> Option<Event> {
    self.queue.pop(timeout)
  }

  pub fn try_pop(&self) -> Option<Event> {
    self.queue.try_pop()
  }

  pub fn dropped_count(&self) -> u64 {
    self.queue.dropped_count()
  }

  pub fn pending_count(&self) -> usize {
    self.queue.len()
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  #[cfg(test)]
  pub(crate) fn queue_handle(&self) -> Arc<SubscriberQueue> {
    self.queue.clone()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.queue.close();
    if let Some(shared) = self.emitter.upgrade() {
      shared.state.lock().unwrap().subscribers.remove(&self.id);
    }
  }
}
