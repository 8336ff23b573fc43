//! The bounded, independently-lockable queue backing one subscriber, and
//! the filter predicate used to select which events reach it.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Condvar, Mutex,
  },
  time::Duration,
};

#[allow(unused_imports)]
use log::warn;

use super::Event;

/// Matches events by optional provider_id/device_id/signal_id equality.
/// A `None` field matches anything; a `Some` field only matches events
/// that carry that exact value for the corresponding routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
  pub provider_id: Option<String>,
  pub device_id: Option<String>,
  pub signal_id: Option<String>,
}

impl EventFilter {
  pub fn any() -> Self {
    EventFilter::default()
  }

  pub fn matches(&self, event: &Event) -> bool {
    let keys = event.routing_keys();
    Self::field_matches(&self.provider_id, keys.provider_id)
      && Self::field_matches(&self.device_id, keys.device_id)
      && Self::field_matches(&self.signal_id, keys.signal_id)
  }

  fn field_matches(want: &Option<String>, got: Option<&str>) -> bool {
    match want {
      None => true,
      Some(w) => got == Some(w.as_str()),
    }
  }
}

struct QueueState {
  items: VecDeque<Event>,
}

/// A bounded per-subscriber event queue. Pushing never blocks: once the
/// queue is at capacity the oldest event is evicted and `dropped` is
/// incremented (spec.md §4.3).
pub(crate) struct SubscriberQueue {
  state: Mutex<QueueState>,
  not_empty: Condvar,
  capacity: usize,
  dropped: AtomicU64,
  closed: AtomicBool,
  name: String,
}

impl SubscriberQueue {
  pub(crate) fn new(capacity: usize, name: String) -> Self {
    SubscriberQueue {
      state: Mutex::new(QueueState {
        items: VecDeque::with_capacity(capacity.min(256)),
      }),
      not_empty: Condvar::new(),
      capacity: capacity.max(1),
      dropped: AtomicU64::new(0),
      closed: AtomicBool::new(false),
      name,
    }
  }

  pub(crate) fn push(&self, event: Event) {
    let mut state = self.state.lock().unwrap();
    if state.items.len() >= self.capacity {
      state.items.pop_front();
      let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
      if dropped == 1 || dropped % 100 == 0 {
        warn!(
          "event subscriber '{}': queue full (capacity {}), dropped oldest event (total drops: {})",
          self.name, self.capacity, dropped
        );
      }
    }
    state.items.push_back(event);
    self.not_empty.notify_all();
  }

  /// Blocks up to `timeout` for an event (or forever if `None`), waking
  /// early on arrival or on `close()`.
  pub(crate) fn pop(&self, timeout: Option<Duration>) -> Option<Event> {
    let mut state = self.state.lock().unwrap();
    loop {
      if let Some(event) = state.items.pop_front() {
        return Some(event);
      }
      if self.closed.load(Ordering::Acquire) {
        return None;
      }
      match timeout {
        None => state = self.not_empty.wait(state).unwrap(),
        Some(d) => {
          let (next_state, result) = self.not_empty.wait_timeout(state, d).unwrap();
          state = next_state;
          if result.timed_out() && state.items.is_empty() {
            return None;
          }
        }
      }
    }
  }

  pub(crate) fn try_pop(&self) -> Option<Event> {
    self.state.lock().unwrap().items.pop_front()
  }

  pub(crate) fn close(&self) {
    self.closed.store(true, Ordering::Release);
    self.not_empty.notify_all();
  }

  pub(crate) fn dropped_count(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().unwrap().items.len()
  }
}
