//! Per-key exclusive execution.
//!
//! [`KeyedMutex`] serializes async critical sections that share a logical
//! resource (a homework set, a grading batch) identified by a string key.
//! Work on one key runs strictly in submission order; different keys never
//! wait on each other.
//!
//! # Example
//!
//! ```ignore
//! let locks = KeyedMutex::new();
//! let report = locks
//!     .run_exclusive(homework_set_id, || generate_questions(homework_set_id))
//!     .await?;
//! ```

use log::warn;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Async mutex scoped per key.
///
/// Cloning is cheap and clones share the same registry, so one instance can be
/// handed to every handler that touches the same resources.
#[derive(Clone, Default)]
pub struct KeyedMutex {
    registry: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    next_seq: u64,
    links: HashMap<String, Link>,
}

/// Tail of a key's queue: the most recently submitted operation.
struct Link {
    seq: u64,
    settled: oneshot::Receiver<()>,
}

impl Registry {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // The guarded map is left consistent by every critical section.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the key if `seq` is still the newest submission for it.
    fn release(&self, key: &str, seq: u64) {
        let mut state = self.state();
        if state.links.get(key).is_some_and(|link| link.seq == seq) {
            state.links.remove(key);
        }
    }
}

impl KeyedMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once every previously submitted task for `key` has settled.
    ///
    /// The call joins the key's queue immediately, before the returned future
    /// is first polled, so two calls issued back to back run in call order no
    /// matter which future is awaited first. The task's output (including any
    /// error it returns) goes only to this caller; a failing or panicking
    /// predecessor releases the key like a successful one.
    pub fn run_exclusive<K, F, Fut>(
        &self,
        key: K,
        task: F,
    ) -> impl Future<Output = Fut::Output> + use<K, F, Fut>
    where
        K: Into<String>,
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let mut slot = self.enqueue(key.into());
        async move {
            slot.wait_turn().await;
            let output = task().await;
            drop(slot);
            output
        }
    }

    /// Whether `key` has running or queued work.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.registry.state().links.contains_key(key)
    }

    /// Number of keys with running or queued work.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.registry.state().links.len()
    }

    fn enqueue(&self, key: String) -> Slot {
        let (settle, settled) = oneshot::channel();
        let (seq, predecessor) = {
            let mut state = self.registry.state();
            let seq = state.next_seq;
            state.next_seq += 1;
            let predecessor = match state.links.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    let link = occupied.get_mut();
                    link.seq = seq;
                    Some(std::mem::replace(&mut link.settled, settled))
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Link { seq, settled });
                    None
                }
            };
            (seq, predecessor)
        };

        Slot {
            registry: Arc::clone(&self.registry),
            key,
            seq,
            settle: Some(settle),
            predecessor,
        }
    }
}

/// One submission's place in its key's queue.
///
/// Dropping the slot signals the successor (the sender closes) and releases
/// the registry entry.
struct Slot {
    registry: Arc<Registry>,
    key: String,
    seq: u64,
    settle: Option<oneshot::Sender<()>>,
    predecessor: Option<oneshot::Receiver<()>>,
}

impl Slot {
    async fn wait_turn(&mut self) {
        if let Some(predecessor) = self.predecessor.as_mut() {
            // Err only means the sender closed, which is the signal itself.
            let _ = predecessor.await;
        }
        self.predecessor = None;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let Some(predecessor) = self.predecessor.take() else {
            self.registry.release(&self.key, self.seq);
            return;
        };

        // Dropped while still queued: the successor must keep waiting for the
        // predecessor that is running now.
        let registry = Arc::clone(&self.registry);
        let key = std::mem::take(&mut self.key);
        let seq = self.seq;
        let settle = self.settle.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = predecessor.await;
                    registry.release(&key, seq);
                    drop(settle);
                });
            }
            Err(_) => {
                warn!("Queued keyed-mutex task dropped outside a runtime (key={key})");
                registry.release(&key, seq);
            }
        }
    }
}
