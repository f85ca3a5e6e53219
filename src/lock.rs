//! Read-lock coordination over object-type collections.
//!
//! Queries that dereference across multiple collections take a read lock on
//! the whole set at once, which keeps lock acquisition deadlock-free across
//! concurrently executing sessions (no incremental lock ordering). The
//! commit path takes a conflicting write claim over the types it mutates.
//!
//! A granted handle can be revoked externally (session teardown, forced
//! commit); in-flight queries detect this at their iteration checkpoints.

use crate::config::DirDbConfig;
use crate::invid::ObjectTypeId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("couldn't get lock: request interrupted")]
    Interrupted,
}

/// A granted read lock over a set of type collections. Not cloneable; the
/// holder releases it (or the coordinator revokes it).
#[derive(Debug)]
pub struct LockHandle {
    id: u64,
    types: Vec<ObjectTypeId>,
}

impl LockHandle {
    pub fn types(&self) -> &[ObjectTypeId] {
        &self.types
    }
}

#[derive(Debug, Default)]
struct LockState {
    readers: HashMap<ObjectTypeId, usize>,
    writers: HashSet<ObjectTypeId>,
    write_pending: HashMap<ObjectTypeId, usize>,
    granted: HashMap<u64, Vec<ObjectTypeId>>,
    write_grants: HashMap<u64, Vec<ObjectTypeId>>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct LockCoordinator {
    state: Mutex<LockState>,
    cond: Condvar,
}

/// A write claim held by the commit path. Released on drop.
#[derive(Debug)]
pub struct WriteClaim<'a> {
    coordinator: &'a LockCoordinator,
    id: u64,
}

impl Drop for WriteClaim<'_> {
    fn drop(&mut self) {
        let mut state = self.coordinator.state.lock();
        if let Some(types) = state.write_grants.remove(&self.id) {
            for type_id in types {
                state.writers.remove(&type_id);
            }
        }
        self.coordinator.cond.notify_all();
    }
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until a read lock over every type in `types` can be granted,
    /// or until `cancel` is raised or the configured timeout elapses.
    pub fn acquire_read(
        &self,
        mut types: Vec<ObjectTypeId>,
        cancel: &AtomicBool,
        config: &DirDbConfig,
    ) -> Result<LockHandle, LockError> {
        types.sort_unstable();
        types.dedup();

        let poll = Duration::from_millis(config.lock_poll_interval_ms.max(1));
        let deadline = config
            .lock_wait_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let mut state = self.state.lock();
        loop {
            if cancel.load(Ordering::Acquire) {
                return Err(LockError::Interrupted);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(LockError::Interrupted);
                }
            }
            // Pending writers bar new readers so a commit cannot be starved
            // by a steady stream of queries.
            let clear = types.iter().all(|t| {
                !state.writers.contains(t)
                    && state.write_pending.get(t).copied().unwrap_or(0) == 0
            });
            if clear {
                break;
            }
            self.cond.wait_for(&mut state, poll);
        }

        for type_id in &types {
            *state.readers.entry(*type_id).or_insert(0) += 1;
        }
        state.next_id += 1;
        let id = state.next_id;
        state.granted.insert(id, types.clone());

        tracing::debug!(lock = id, ?types, "read lock granted");
        Ok(LockHandle { id, types })
    }

    /// Blocks until an exclusive write claim over `types` can be granted.
    /// Used by the commit path; not interruptible.
    pub fn claim_write(&self, mut types: Vec<ObjectTypeId>) -> WriteClaim<'_> {
        types.sort_unstable();
        types.dedup();

        let mut state = self.state.lock();
        for type_id in &types {
            *state.write_pending.entry(*type_id).or_insert(0) += 1;
        }
        loop {
            let free = types.iter().all(|t| {
                !state.writers.contains(t) && state.readers.get(t).copied().unwrap_or(0) == 0
            });
            if free {
                break;
            }
            self.cond.wait(&mut state);
        }

        for type_id in &types {
            if let Some(count) = state.write_pending.get_mut(type_id) {
                *count -= 1;
                if *count == 0 {
                    state.write_pending.remove(type_id);
                }
            }
            state.writers.insert(*type_id);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.write_grants.insert(id, types);

        WriteClaim {
            coordinator: self,
            id,
        }
    }

    pub fn release(&self, handle: &LockHandle) {
        let mut state = self.state.lock();
        if let Some(types) = state.granted.remove(&handle.id) {
            for type_id in types {
                if let Some(count) = state.readers.get_mut(&type_id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        state.readers.remove(&type_id);
                    }
                }
            }
            tracing::debug!(lock = handle.id, "read lock released");
        }
        self.cond.notify_all();
    }

    /// Forcibly withdraws a granted read lock. The holder observes the loss
    /// through `is_locked` at its next checkpoint.
    pub fn revoke(&self, handle: &LockHandle) {
        self.release(handle);
    }

    /// True when the handle is still granted and covers every type in
    /// `types`.
    pub fn is_locked(&self, handle: &LockHandle, types: &[ObjectTypeId]) -> bool {
        let state = self.state.lock();
        match state.granted.get(&handle.id) {
            Some(covered) => types.iter().all(|t| covered.contains(t)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LockCoordinator, LockError};
    use crate::config::DirDbConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn read_locks_over_disjoint_and_shared_types_coexist() {
        let coordinator = LockCoordinator::new();
        let cancel = AtomicBool::new(false);
        let config = DirDbConfig::testing();

        let a = coordinator
            .acquire_read(vec![1, 2], &cancel, &config)
            .unwrap();
        let b = coordinator
            .acquire_read(vec![2, 3], &cancel, &config)
            .unwrap();

        assert!(coordinator.is_locked(&a, &[1, 2]));
        assert!(coordinator.is_locked(&b, &[2]));
        assert!(!coordinator.is_locked(&a, &[3]));

        coordinator.release(&a);
        assert!(!coordinator.is_locked(&a, &[1]));
        coordinator.release(&b);
    }

    #[test]
    fn cancelled_request_reports_interrupted() {
        let coordinator = LockCoordinator::new();
        let cancel = AtomicBool::new(true);
        let config = DirDbConfig::testing();

        let _claim = coordinator.claim_write(vec![5]);
        let result = coordinator.acquire_read(vec![5], &cancel, &config);
        assert_eq!(result.unwrap_err(), LockError::Interrupted);
    }

    #[test]
    fn write_claim_blocks_readers_until_dropped() {
        let coordinator = Arc::new(LockCoordinator::new());
        let config = DirDbConfig::testing();

        {
            let _claim = coordinator.claim_write(vec![7]);
            let cancel = AtomicBool::new(false);
            // with the claim held, a short-timeout acquire gives up
            let short = DirDbConfig {
                lock_wait_timeout_ms: Some(50),
                ..DirDbConfig::default()
            };
            assert!(coordinator.acquire_read(vec![7], &cancel, &short).is_err());
            cancel.store(false, Ordering::Release);
        }

        let cancel = AtomicBool::new(false);
        let handle = coordinator
            .acquire_read(vec![7], &cancel, &config)
            .expect("granted after claim dropped");
        coordinator.release(&handle);
    }

    #[test]
    fn pending_write_claim_turns_away_new_readers() {
        let coordinator = Arc::new(LockCoordinator::new());
        let config = DirDbConfig::testing();
        let cancel = AtomicBool::new(false);

        let held = coordinator
            .acquire_read(vec![9], &cancel, &config)
            .unwrap();

        let writer = {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || {
                let claim = coordinator.claim_write(vec![9]);
                drop(claim);
            })
        };
        // give the writer time to register its pending claim
        std::thread::sleep(std::time::Duration::from_millis(100));

        let short = DirDbConfig {
            lock_wait_timeout_ms: Some(50),
            ..DirDbConfig::default()
        };
        assert_eq!(
            coordinator.acquire_read(vec![9], &cancel, &short).unwrap_err(),
            LockError::Interrupted
        );

        coordinator.release(&held);
        writer.join().expect("writer thread");

        let after = coordinator
            .acquire_read(vec![9], &cancel, &config)
            .expect("granted once the claim cycle finished");
        coordinator.release(&after);
    }

    #[test]
    fn revoked_handle_fails_is_locked() {
        let coordinator = LockCoordinator::new();
        let cancel = AtomicBool::new(false);
        let config = DirDbConfig::testing();

        let handle = coordinator
            .acquire_read(vec![4], &cancel, &config)
            .unwrap();
        coordinator.revoke(&handle);
        assert!(!coordinator.is_locked(&handle, &[4]));
    }
}
