//! Admission control for generation work.
//!
//! The gate holds a global counter and a per-user counter. Acquisition never
//! waits: if either bound would be exceeded the caller gets `Rejected` and tries
//! again next scan cycle. A `Slot` releases itself exactly once, either via
//! `release()` or on drop, so every exit path of a run gives its slot back.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;

use crate::config::ConcurrencyConfig;
use crate::domain::{PoolKey, UserId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejected {
    #[error("global concurrency limit reached ({max})")]
    GlobalLimit { max: usize },

    #[error("per-user concurrency limit reached for user {user} ({max})")]
    UserLimit { user: UserId, max: usize },
}

/// Read-only gate metrics for admin consumers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GateMetrics {
    pub in_flight: usize,
    pub max_global: usize,
    pub max_per_user: usize,
    pub acquired_total: u64,
    pub rejected_total: u64,
    pub per_user: BTreeMap<UserId, usize>,
}

#[derive(Debug, Default)]
struct GateState {
    global: usize,
    per_user: HashMap<UserId, usize>,
    per_pool: HashMap<PoolKey, usize>,
    acquired_total: u64,
    rejected_total: u64,
}

#[derive(Debug)]
struct GateInner {
    max_global: usize,
    max_per_user: usize,
    state: Mutex<GateState>,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        // Counters stay consistent under poisoning: every mutation is a single step.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, user: UserId, pool: Option<&PoolKey>) {
        let mut state = self.lock();
        state.global = state.global.saturating_sub(1);
        decrement(&mut state.per_user, &user);
        if let Some(pool) = pool {
            decrement(&mut state.per_pool, pool);
        }
    }
}

fn decrement<K: std::hash::Hash + Eq>(map: &mut HashMap<K, usize>, key: &K) {
    if let Some(count) = map.get_mut(key) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            map.remove(key);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    pub fn new(max_global: usize, max_per_user: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                max_global,
                max_per_user,
                state: Mutex::new(GateState::default()),
            }),
        }
    }

    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        Self::new(config.max_global, config.max_per_user)
    }

    /// Try to take a slot for `user`, optionally scoped to a pool.
    pub fn try_acquire(&self, user: UserId, pool: Option<PoolKey>) -> Result<Slot, Rejected> {
        let mut state = self.inner.lock();

        if state.global >= self.inner.max_global {
            state.rejected_total += 1;
            return Err(Rejected::GlobalLimit {
                max: self.inner.max_global,
            });
        }
        let user_count = state.per_user.get(&user).copied().unwrap_or(0);
        if user_count >= self.inner.max_per_user {
            state.rejected_total += 1;
            return Err(Rejected::UserLimit {
                user,
                max: self.inner.max_per_user,
            });
        }

        state.global += 1;
        *state.per_user.entry(user).or_insert(0) += 1;
        if let Some(pool) = &pool {
            *state.per_pool.entry(pool.clone()).or_insert(0) += 1;
        }
        state.acquired_total += 1;
        drop(state);

        Ok(Slot {
            user,
            pool,
            released: false,
            gate: self.inner.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().global
    }

    pub fn in_flight_for_user(&self, user: UserId) -> usize {
        self.inner.lock().per_user.get(&user).copied().unwrap_or(0)
    }

    pub fn in_flight_for_pool(&self, pool: &PoolKey) -> usize {
        self.inner.lock().per_pool.get(pool).copied().unwrap_or(0)
    }

    pub fn metrics(&self) -> GateMetrics {
        let state = self.inner.lock();
        GateMetrics {
            in_flight: state.global,
            max_global: self.inner.max_global,
            max_per_user: self.inner.max_per_user,
            acquired_total: state.acquired_total,
            rejected_total: state.rejected_total,
            per_user: state.per_user.iter().map(|(u, c)| (*u, *c)).collect(),
        }
    }
}

/// One in-flight unit of work.
#[derive(Debug)]
pub struct Slot {
    user: UserId,
    pool: Option<PoolKey>,
    released: bool,
    gate: Arc<GateInner>,
}

impl Slot {
    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn pool(&self) -> Option<&PoolKey> {
        self.pool.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Give the slot back. Calling again is a no-op.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.gate.release(self.user, self.pool.as_ref());
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn pool(user: i64) -> PoolKey {
        PoolKey::new(UserId(user), "italian", "A2")
    }

    #[test]
    fn test_acquire_and_release() {
        let gate = ConcurrencyGate::new(2, 1);
        let mut slot = gate.try_acquire(UserId(1), Some(pool(1))).unwrap();
        assert_eq!(gate.in_flight(), 1);
        assert_eq!(gate.in_flight_for_user(UserId(1)), 1);
        assert_eq!(gate.in_flight_for_pool(&pool(1)), 1);

        slot.release();
        assert!(slot.is_released());
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.in_flight_for_pool(&pool(1)), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let gate = ConcurrencyGate::new(3, 3);
        let mut a = gate.try_acquire(UserId(1), None).unwrap();
        let _b = gate.try_acquire(UserId(1), None).unwrap();

        a.release();
        a.release();
        drop(a);
        assert_eq!(gate.in_flight(), 1);
        assert_eq!(gate.in_flight_for_user(UserId(1)), 1);
    }

    #[test]
    fn test_drop_releases() {
        let gate = ConcurrencyGate::new(1, 1);
        {
            let _slot = gate.try_acquire(UserId(1), None).unwrap();
            assert!(gate.try_acquire(UserId(2), None).is_err());
        }
        assert!(gate.try_acquire(UserId(2), None).is_ok());
    }

    #[test]
    fn test_per_user_limit() {
        let gate = ConcurrencyGate::new(10, 1);
        let _slot = gate.try_acquire(UserId(1), None).unwrap();
        assert_eq!(
            gate.try_acquire(UserId(1), Some(pool(1))).unwrap_err(),
            Rejected::UserLimit {
                user: UserId(1),
                max: 1
            }
        );
        assert!(gate.try_acquire(UserId(2), None).is_ok());
    }

    #[test]
    fn test_global_limit_under_contention() {
        let n = 3;
        let m = 12;
        let gate = ConcurrencyGate::new(n, 1);
        let barrier = Arc::new(Barrier::new(m));

        let handles: Vec<_> = (0..m)
            .map(|i| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    gate.try_acquire(UserId(i as i64), None)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let granted = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(Rejected::GlobalLimit { .. })))
            .count();

        assert_eq!(granted, n);
        assert_eq!(rejected, m - n);
        assert_eq!(gate.in_flight(), n);

        drop(results);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_metrics() {
        let gate = ConcurrencyGate::new(2, 1);
        let _a = gate.try_acquire(UserId(1), None).unwrap();
        let _ = gate.try_acquire(UserId(1), None);

        let metrics = gate.metrics();
        assert_eq!(metrics.in_flight, 1);
        assert_eq!(metrics.acquired_total, 1);
        assert_eq!(metrics.rejected_total, 1);
        assert_eq!(metrics.per_user.get(&UserId(1)), Some(&1));
    }
}
