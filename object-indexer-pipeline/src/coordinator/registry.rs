//! Per-key admission locks and the registry of in-flight runs.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use object_indexer_shared::ContentFingerprint;

/// Handle on a run that is currently executing stages.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub fingerprint: ContentFingerprint,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

impl ActiveRun {
    /// Cancel the run and wait until it has stopped.
    ///
    /// Returns once the run has released its collaborator calls and written
    /// its final state.
    pub async fn supersede(mut self) {
        self.cancel.cancel();
        let _ = self.done.wait_for(|done| *done).await;
    }
}

/// Tracks which run owns each object key.
///
/// Admission for a key happens under that key's mutex, so the check for an
/// in-flight run and the registration of a new one cannot interleave. The
/// mutex is released before stages run; the registry entry is what marks the
/// key as busy from then on.
#[derive(Default)]
pub struct RunRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
    active: Arc<DashMap<String, ActiveRun>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the admission lock for `object_key`.
    pub async fn lock_key(&self, object_key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(object_key.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub fn active(&self, object_key: &str) -> Option<ActiveRun> {
        self.active.get(object_key).map(|run| run.value().clone())
    }

    /// Mark `run_id` as the active run for `object_key`.
    ///
    /// Must be called while holding the key's admission lock.
    pub fn register(
        &self,
        object_key: &str,
        run_id: Uuid,
        fingerprint: ContentFingerprint,
    ) -> RunGuard {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.active.insert(
            object_key.to_string(),
            ActiveRun {
                run_id,
                fingerprint,
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        RunGuard {
            object_key: object_key.to_string(),
            run_id,
            cancel,
            done: done_tx,
            active: self.active.clone(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Drop admission locks nobody holds or waits on. Returns how many went.
    pub fn prune_idle_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|key, lock| Arc::strong_count(lock) > 1 || self.active.contains_key(key));
        before.saturating_sub(self.locks.len())
    }
}

/// Ownership of an object key for the duration of one run.
///
/// Dropping the guard unregisters the run and wakes anyone waiting to
/// supersede it.
pub struct RunGuard {
    object_key: String,
    run_id: Uuid,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
    active: Arc<DashMap<String, ActiveRun>>,
}

impl RunGuard {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active
            .remove_if(&self.object_key, |_, run| run.run_id == self.run_id);
        let _ = self.done.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_unregisters_on_drop() {
        let registry = RunRegistry::new();
        let run_id = Uuid::new_v4();
        let guard = registry.register("a", run_id, ContentFingerprint::of(b"1"));

        assert_eq!(registry.active("a").map(|r| r.run_id), Some(run_id));
        drop(guard);
        assert!(registry.active("a").is_none());
    }

    #[tokio::test]
    async fn test_stale_guard_leaves_newer_run() {
        let registry = RunRegistry::new();
        let old = registry.register("a", Uuid::new_v4(), ContentFingerprint::of(b"1"));
        let newer_id = Uuid::new_v4();
        let _newer = registry.register("a", newer_id, ContentFingerprint::of(b"2"));

        drop(old);
        assert_eq!(registry.active("a").map(|r| r.run_id), Some(newer_id));
    }

    #[tokio::test]
    async fn test_supersede_waits_for_run_to_stop() {
        let registry = RunRegistry::new();
        let guard = registry.register("a", Uuid::new_v4(), ContentFingerprint::of(b"1"));
        let active = registry.active("a").unwrap();

        let run = tokio::spawn(async move {
            guard.cancellation().cancelled().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(guard);
        });

        active.supersede().await;
        assert!(registry.active("a").is_none());
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let registry = RunRegistry::new();
        let held = registry.lock_key("a").await;
        drop(registry.lock_key("b").await);

        assert_eq!(registry.prune_idle_locks(), 1);
        drop(held);
        assert_eq!(registry.prune_idle_locks(), 1);
    }
}
