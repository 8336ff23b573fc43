//! Minimal composable host scaffolding: `Sequence`, `Selector`
//! (fallback), and `Action` (closure-wrapping leaf). These exist only so
//! `AutomationRuntime` has something concrete to tick in its own tests
//! and so a caller has composites to build a tree out of without
//! bringing in a node library — which is explicitly out of scope
//! (spec.md §1 Non-goals, §4.7 supplement).

use super::node::{BehaviorNode, NodeStatus, TickContext};

/// Ticks children left to right; fails (and resets) on the first
/// `Failure`, resumes from the running child across ticks, and succeeds
/// only once every child has in the same traversal.
pub struct Sequence {
  name: String,
  children: Vec<Box<dyn BehaviorNode>>,
  current: usize,
}

impl Sequence {
  pub fn new(name: impl Into<String>, children: Vec<Box<dyn BehaviorNode>>) -> Self {
    Sequence { name: name.into(), children, current: 0 }
  }
}

impl BehaviorNode for Sequence {
  fn tick(&mut self, ctx: &mut TickContext) -> NodeStatus {
    while self.current < self.children.len() {
      match self.children[self.current].tick(ctx) {
        NodeStatus::Success => self.current += 1,
        NodeStatus::Failure => {
          self.current = 0;
          return NodeStatus::Failure;
        }
        NodeStatus::Running => return NodeStatus::Running,
      }
    }
    self.current = 0;
    NodeStatus::Success
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Ticks children left to right; succeeds (and resets) on the first
/// `Success`, resumes from the running child across ticks, and fails
/// only once every child has.
pub struct Selector {
  name: String,
  children: Vec<Box<dyn BehaviorNode>>,
  current: usize,
}

impl Selector {
  pub fn new(name: impl Into<String>, children: Vec<Box<dyn BehaviorNode>>) -> Self {
    Selector { name: name.into(), children, current: 0 }
  }
}

impl BehaviorNode for Selector {
  fn tick(&mut self, ctx: &mut TickContext) -> NodeStatus {
    while self.current < self.children.len() {
      match self.children[self.current].tick(ctx) {
        NodeStatus::Failure => self.current += 1,
        NodeStatus::Success => {
          self.current = 0;
          return NodeStatus::Success;
        }
        NodeStatus::Running => return NodeStatus::Running,
      }
    }
    self.current = 0;
    NodeStatus::Failure
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// A leaf that wraps a closure, so a caller can write one-off nodes
/// without defining a new type per action.
pub struct Action<F>
where
  F: FnMut(&mut TickContext) -> NodeStatus + Send,
{
  name: String,
  action: F,
}

impl<F> Action<F>
where
  F: FnMut(&mut TickContext) -> NodeStatus + Send,
{
  pub fn new(name: impl Into<String>, action: F) -> Self {
    Action { name: name.into(), action }
  }
}

impl<F> BehaviorNode for Action<F>
where
  F: FnMut(&mut TickContext) -> NodeStatus + Send,
{
  fn tick(&mut self, ctx: &mut TickContext) -> NodeStatus {
    (self.action)(ctx)
  }

  fn name(&self) -> &str {
    &self.name
  }
}
