//! Per-invocation load cache.
//!
//! Each loaded path starts at most once. While it starts, other loads of the
//! same path wait for its outcome. A load is refused as a cycle only when the
//! path being loaded is, directly or through other pending loads, waiting on
//! the requester's own start.

use std::collections::HashMap;

use kiln_runtime::{RuntimeError, Values};
use tokio::sync::watch;

use crate::group::Invocation;

type Outcome = Option<Result<Values, RuntimeError>>;

enum Slot {
  Loading(watch::Receiver<Outcome>),
  Loaded(Values),
}

#[derive(Default)]
pub(crate) struct LoadCache {
  slots: HashMap<String, Slot>,
  /// Paths each starting path is blocked on, one entry per pending load.
  waits: HashMap<String, Vec<String>>,
}

impl LoadCache {
  fn is_loading(&self, path: &str) -> bool {
    matches!(self.slots.get(path), Some(Slot::Loading(_)))
  }

  /// Whether `from` is, transitively, waiting on `to`.
  fn reaches(&self, from: &str, to: &str) -> bool {
    let mut stack = vec![from];
    let mut seen = Vec::new();
    while let Some(path) = stack.pop() {
      if path == to {
        return true;
      }
      if seen.contains(&path) {
        continue;
      }
      seen.push(path);
      if let Some(targets) = self.waits.get(path) {
        stack.extend(targets.iter().map(String::as_str));
      }
    }
    false
  }

  fn add_wait(&mut self, requester: &str, path: &str) {
    self
      .waits
      .entry(requester.to_string())
      .or_default()
      .push(path.to_string());
  }

  fn remove_wait(&mut self, requester: &str, path: &str) {
    if let Some(targets) = self.waits.get_mut(requester) {
      if let Some(index) = targets.iter().position(|t| t == path) {
        targets.swap_remove(index);
      }
      if targets.is_empty() {
        self.waits.remove(requester);
      }
    }
  }

  pub(crate) fn clear(&mut self) {
    self.slots.clear();
    self.waits.clear();
  }
}

/// What a load request should do next.
pub(crate) enum Claim<'a> {
  Cached(Values),
  /// Another request is starting the path; wait for it.
  Pending(LoadTicket<'a>, watch::Receiver<Outcome>),
  /// The caller starts the path and must [`LoadTicket::finish`] it.
  Start(LoadTicket<'a>),
  Cycle,
}

/// An outstanding load. Dropping it without finishing gives up the start so
/// waiters see a cancellation and the next request starts over.
pub(crate) struct LoadTicket<'a> {
  invocation: &'a Invocation,
  requester: Option<String>,
  path: String,
  sender: Option<watch::Sender<Outcome>>,
}

impl LoadTicket<'_> {
  /// Publish the outcome of a start. Failures are not cached.
  pub(crate) fn finish(mut self, result: &Result<Values, RuntimeError>) {
    let Some(sender) = self.sender.take() else {
      return;
    };
    {
      let mut cache = self.invocation.loads();
      match result {
        Ok(values) => {
          cache
            .slots
            .insert(self.path.clone(), Slot::Loaded(values.clone()));
        }
        Err(_) => {
          cache.slots.remove(&self.path);
        }
      }
    }
    sender.send_replace(Some(result.clone()));
  }
}

impl Drop for LoadTicket<'_> {
  fn drop(&mut self) {
    let mut cache = self.invocation.loads();
    if let Some(requester) = &self.requester {
      cache.remove_wait(requester, &self.path);
    }
    if self.sender.take().is_some() && cache.is_loading(&self.path) {
      cache.slots.remove(&self.path);
    }
  }
}

/// Wait for another request's start of the same path.
pub(crate) async fn wait(mut receiver: watch::Receiver<Outcome>) -> Result<Values, RuntimeError> {
  let outcome = match receiver.wait_for(Option::is_some).await {
    Ok(outcome) => outcome.clone(),
    Err(_) => None,
  };
  outcome.unwrap_or(Err(RuntimeError::Cancelled))
}

impl Invocation {
  /// Claim `path` for a load requested by the run started from `requester`.
  pub(crate) fn claim(&self, requester: &str, path: &str) -> Claim<'_> {
    let mut cache = self.loads();
    let receiver = match cache.slots.get(path) {
      Some(Slot::Loaded(values)) => return Claim::Cached(values.clone()),
      Some(Slot::Loading(receiver)) => Some(receiver.clone()),
      None => None,
    };

    match receiver {
      Some(receiver) => {
        let cyclic = cache.is_loading(requester)
          && (requester == path || cache.reaches(path, requester));
        if cyclic {
          return Claim::Cycle;
        }
        cache.add_wait(requester, path);
        Claim::Pending(self.ticket(Some(requester), path, None), receiver)
      }
      None => {
        let (sender, receiver) = watch::channel(None);
        cache.slots.insert(path.to_string(), Slot::Loading(receiver));
        cache.add_wait(requester, path);
        Claim::Start(self.ticket(Some(requester), path, Some(sender)))
      }
    }
  }

  /// Mark the entry path as starting so loads of it wait or report a cycle.
  pub(crate) fn claim_entry(&self, path: &str) -> LoadTicket<'_> {
    let (sender, receiver) = watch::channel(None);
    self
      .loads()
      .slots
      .insert(path.to_string(), Slot::Loading(receiver));
    self.ticket(None, path, Some(sender))
  }

  fn ticket(
    &self,
    requester: Option<&str>,
    path: &str,
    sender: Option<watch::Sender<Outcome>>,
  ) -> LoadTicket<'_> {
    LoadTicket {
      invocation: self,
      requester: requester.map(str::to_string),
      path: path.to_string(),
      sender,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reaches_follows_pending_loads() {
    let mut cache = LoadCache::default();
    cache.add_wait("main.star", "a.star");
    cache.add_wait("a.star", "b.star");

    assert!(cache.reaches("main.star", "b.star"));
    assert!(!cache.reaches("b.star", "main.star"));

    cache.remove_wait("a.star", "b.star");
    assert!(!cache.reaches("main.star", "b.star"));
    assert!(!cache.waits.contains_key("a.star"));
  }

  #[test]
  fn test_duplicate_waits_removed_one_at_a_time() {
    let mut cache = LoadCache::default();
    cache.add_wait("main.star", "lib.star");
    cache.add_wait("main.star", "lib.star");

    cache.remove_wait("main.star", "lib.star");
    assert!(cache.reaches("main.star", "lib.star"));
    cache.remove_wait("main.star", "lib.star");
    assert!(!cache.reaches("main.star", "lib.star"));
  }
}
