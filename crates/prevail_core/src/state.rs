//! Root state cell with optimistic, retrying transactions.
//!
//! The state is held as an immutable snapshot behind an `Arc`. A transaction
//! clones the current snapshot, mutates the clone and publishes it with a
//! compare-and-swap on the snapshot version. If another transaction
//! published first, the work is redone against the newer snapshot. If the
//! transaction fails, the clone is dropped and nothing is published.
//!
//! Readers take the current `Arc` and never block writers for longer than
//! the pointer copy.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// A published snapshot and its version.
struct Slot<S> {
    snapshot: Arc<S>,
    version: u64,
}

/// The root state of an engine.
pub struct RootState<S> {
    slot: RwLock<Slot<S>>,
}

impl<S: Clone> RootState<S> {
    /// Creates a root state holding `initial` at version 0.
    pub fn new(initial: S) -> Self {
        Self {
            slot: RwLock::new(Slot {
                snapshot: Arc::new(initial),
                version: 0,
            }),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<S> {
        Arc::clone(&self.slot.read().snapshot)
    }

    /// Returns the number of transactions published so far.
    pub fn version(&self) -> u64 {
        self.slot.read().version
    }

    /// Runs `f` against the current snapshot.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.snapshot())
    }

    /// Runs `f` as a transaction.
    ///
    /// `f` may be called more than once if another transaction publishes
    /// concurrently, so it must not have side effects outside the state it
    /// is given.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error; the state is left unchanged.
    pub fn transact<T, E>(&self, mut f: impl FnMut(&mut S) -> Result<T, E>) -> Result<T, E> {
        loop {
            let (base, version) = {
                let slot = self.slot.read();
                (Arc::clone(&slot.snapshot), slot.version)
            };

            let mut draft = S::clone(&base);
            let output = f(&mut draft)?;

            let mut slot = self.slot.write();
            if slot.version == version {
                slot.snapshot = Arc::new(draft);
                slot.version = version + 1;
                return Ok(output);
            }
            trace!(version, current = slot.version, "state changed during transaction, retrying");
        }
    }
}

impl<S> std::fmt::Debug for RootState<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootState")
            .field("version", &self.slot.read().version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn successful_transaction_publishes() {
        let state = RootState::new(vec![1]);
        let len = state
            .transact(|v| {
                v.push(2);
                Ok::<_, ()>(v.len())
            })
            .unwrap();

        assert_eq!(len, 2);
        assert_eq!(*state.snapshot(), vec![1, 2]);
        assert_eq!(state.version(), 1);
    }

    #[test]
    fn failed_transaction_discards_changes() {
        let state = RootState::new(vec![1]);
        let result = state.transact(|v| {
            v.push(2);
            Err::<(), _>("boom")
        });

        assert_eq!(result, Err("boom"));
        assert_eq!(*state.snapshot(), vec![1]);
        assert_eq!(state.version(), 0);
    }

    #[test]
    fn old_snapshots_are_unaffected() {
        let state = RootState::new(0_i64);
        let before = state.snapshot();
        state
            .transact(|n| {
                *n += 1;
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(*before, 0);
        assert_eq!(state.read(|n| *n), 1);
    }

    #[test]
    fn concurrent_transactions_lose_no_updates() {
        let state = Arc::new(RootState::new(0_u64));
        let attempts = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let attempts = Arc::clone(&attempts);
                thread::spawn(move || {
                    for _ in 0..100 {
                        state
                            .transact(|n| {
                                attempts.fetch_add(1, Ordering::Relaxed);
                                *n += 1;
                                Ok::<_, ()>(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*state.snapshot(), 800);
        assert_eq!(state.version(), 800);
        assert!(attempts.load(Ordering::Relaxed) >= 800);
    }
}
