//! FIFO work queue for the resolver's worklist.

use std::collections::VecDeque;

/// A FIFO queue that may grow while it is being drained.
#[derive(Debug, Clone)]
pub struct WorkQueue<T> {
  items: VecDeque<T>,
  pushed: usize,
}

impl<T> WorkQueue<T> {
  pub fn new() -> Self {
    Self {
      items: VecDeque::new(),
      pushed: 0,
    }
  }

  pub fn push(&mut self, item: T) {
    self.pushed += 1;
    self.items.push_back(item);
  }

  pub fn pop(&mut self) -> Option<T> {
    self.items.pop_front()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Total number of items ever pushed.
  pub fn pushed(&self) -> usize {
    self.pushed
  }
}

impl<T> Default for WorkQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Extend<T> for WorkQueue<T> {
  fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
    for item in iter {
      self.push(item);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fifo_order() {
    let mut queue = WorkQueue::new();
    queue.extend([1, 2, 3]);
    assert_eq!(queue.pop(), Some(1));
    assert_eq!(queue.pop(), Some(2));
    assert_eq!(queue.len(), 1);
  }

  #[test]
  fn test_append_while_draining() {
    let mut queue = WorkQueue::new();
    queue.push(3u32);

    let mut seen = Vec::new();
    while let Some(n) = queue.pop() {
      seen.push(n);
      if n > 0 {
        queue.push(n - 1);
      }
    }

    assert_eq!(seen, vec![3, 2, 1, 0]);
    assert_eq!(queue.pushed(), 4);
    assert!(queue.is_empty());
  }
}
