//! Transaction coordinator.
//!
//! Every transaction passes through a single apply lock. Under the lock the
//! operation runs against the root state, the next id is assigned and the
//! journal entry is handed to the log. Holding the lock across all three
//! steps makes log order equal to apply order.
//!
//! In buffered mode the lock is released as soon as the entry is queued. In
//! blocking mode the caller additionally waits, after releasing the lock,
//! for the writer to acknowledge the entry.

use crate::error::{CoreError, CoreResult};
use crate::journal::{JournalEntry, TransactionLog};
use crate::registry::OperationRegistry;
use crate::state::RootState;
use crate::types::{TransactionId, WriteMode};
use parking_lot::Mutex;
use prevail_codec::{check_encodable, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Applies transactions and hands them to the transaction log.
pub(crate) struct TransactionCoordinator<S> {
    state: Arc<RootState<S>>,
    registry: Arc<OperationRegistry<S>>,
    log: Box<dyn TransactionLog>,
    /// The apply lock. Holds the mode latched by the first transaction.
    apply_lock: Mutex<Option<WriteMode>>,
    /// Id of the last assigned transaction; 0 if none.
    last_id: AtomicU64,
}

impl<S> TransactionCoordinator<S> {
    /// Creates a coordinator that continues after `last_id`.
    pub(crate) fn new(
        state: Arc<RootState<S>>,
        registry: Arc<OperationRegistry<S>>,
        log: Box<dyn TransactionLog>,
        last_id: Option<TransactionId>,
    ) -> Self {
        Self {
            state,
            registry,
            log,
            apply_lock: Mutex::new(None),
            last_id: AtomicU64::new(last_id.map_or(0, TransactionId::as_u64)),
        }
    }

    /// Returns the id of the last assigned transaction.
    pub(crate) fn last_transaction_id(&self) -> Option<TransactionId> {
        match self.last_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(TransactionId::new(id)),
        }
    }

    /// Returns the latched write mode, if any transaction succeeded yet.
    pub(crate) fn mode(&self) -> Option<WriteMode> {
        *self.apply_lock.lock()
    }

    /// Returns the transaction log.
    pub(crate) fn log(&self) -> &dyn TransactionLog {
        self.log.as_ref()
    }
}

impl<S: Clone> TransactionCoordinator<S> {
    /// Applies a transaction and returns once it is queued for writing.
    pub(crate) fn apply(&self, operation: &str, args: Vec<Value>) -> CoreResult<Value> {
        self.apply_with(WriteMode::Buffered, operation, args)
    }

    /// Applies a transaction and returns once it is durable.
    pub(crate) fn apply_blocking(&self, operation: &str, args: Vec<Value>) -> CoreResult<Value> {
        self.apply_with(WriteMode::Blocking, operation, args)
    }

    fn apply_with(&self, mode: WriteMode, operation: &str, args: Vec<Value>) -> CoreResult<Value> {
        if mode == WriteMode::Blocking && !self.log.supports_blocking() {
            return Err(CoreError::BlockingUnsupported);
        }

        let (result, ack) = {
            let mut latched = self.apply_lock.lock();
            if let Some(active) = *latched {
                if active != mode {
                    return Err(CoreError::ModeConflict {
                        active,
                        requested: mode,
                    });
                }
            }
            self.log.check_health()?;

            let (name, run) = self.registry.resolve(operation)?;
            // A line that would not replay must never be journaled
            args.iter().try_for_each(check_encodable)?;
            let result = self
                .state
                .transact(|state| run(state, &args))
                .map_err(|source| CoreError::Transaction {
                    operation: name.to_string(),
                    source,
                })?;

            // The state has changed: the id is consumed even if recording fails
            let id = TransactionId::new(self.last_id.load(Ordering::SeqCst)).next();
            self.last_id.store(id.as_u64(), Ordering::SeqCst);
            *latched = Some(mode);

            let entry = JournalEntry::new(id, name, args);
            trace!(id = id.as_u64(), operation = name, %mode, "applied transaction");
            let ack = match mode {
                WriteMode::Buffered => {
                    self.log.record(&entry)?;
                    None
                }
                WriteMode::Blocking => Some(self.log.record_durable(&entry)?),
            };
            (result, ack)
        };

        if let Some(ack) = ack {
            ack.wait()?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use crate::journal::WriteAck;
    use crate::recovery::RecoveryReport;
    use crate::registry::integer_arg;

    type Entries = Arc<Mutex<Vec<JournalEntry>>>;

    /// Log that keeps entries in memory.
    #[derive(Default)]
    struct MemoryLog {
        entries: Entries,
        blocking: bool,
        failed: bool,
    }

    impl TransactionLog for MemoryLog {
        fn replay(
            &self,
            _chunk_size: usize,
            _apply: &mut dyn FnMut(&[JournalEntry]) -> CoreResult<()>,
        ) -> CoreResult<RecoveryReport> {
            Ok(RecoveryReport::default())
        }

        fn record(&self, entry: &JournalEntry) -> CoreResult<()> {
            self.entries.lock().push(entry.clone());
            Ok(())
        }

        fn record_durable(&self, entry: &JournalEntry) -> CoreResult<WriteAck> {
            self.record(entry)?;
            Ok(WriteAck::Done)
        }

        fn supports_blocking(&self) -> bool {
            self.blocking
        }

        fn check_health(&self) -> CoreResult<()> {
            if self.failed {
                Err(CoreError::journal_failed("disk full"))
            } else {
                Ok(())
            }
        }
    }

    fn registry() -> Arc<OperationRegistry<i64>> {
        let mut registry = OperationRegistry::new();
        registry
            .register("credit", |balance: &mut i64, args: &[Value]| {
                *balance += integer_arg(args, 0)?;
                Ok(Value::Integer(*balance))
            })
            .unwrap();
        registry
            .register("debit", |balance: &mut i64, args: &[Value]| {
                let amount = integer_arg(args, 0)?;
                if amount > *balance {
                    return Err(OperationError::new("insufficient funds"));
                }
                *balance -= amount;
                Ok(Value::Integer(*balance))
            })
            .unwrap();
        registry.alias("deposit", "credit").unwrap();
        Arc::new(registry)
    }

    fn coordinator(log: MemoryLog) -> (TransactionCoordinator<i64>, Arc<RootState<i64>>, Entries) {
        let state = Arc::new(RootState::new(0));
        let entries = Arc::clone(&log.entries);
        let coordinator =
            TransactionCoordinator::new(Arc::clone(&state), registry(), Box::new(log), None);
        (coordinator, state, entries)
    }

    fn recorded(log: &Entries) -> Vec<(u64, String)> {
        log.lock()
            .iter()
            .map(|e| (e.id.as_u64(), e.operation.clone()))
            .collect()
    }

    #[test]
    fn ids_follow_apply_order() {
        let (coordinator, state, entries) = coordinator(MemoryLog::default());

        coordinator.apply("credit", vec![Value::Integer(10)]).unwrap();
        coordinator.apply("debit", vec![Value::Integer(3)]).unwrap();
        let result = coordinator.apply("credit", vec![Value::Integer(1)]).unwrap();

        assert_eq!(result, Value::Integer(8));
        assert_eq!(*state.snapshot(), 8);
        assert_eq!(coordinator.last_transaction_id(), Some(TransactionId::new(3)));
        assert_eq!(
            recorded(&entries),
            vec![
                (1, "credit".to_string()),
                (2, "debit".to_string()),
                (3, "credit".to_string())
            ]
        );
    }

    #[test]
    fn failed_operation_consumes_no_id() {
        let (coordinator, state, entries) = coordinator(MemoryLog::default());
        coordinator.apply("credit", vec![Value::Integer(5)]).unwrap();

        let err = coordinator
            .apply("debit", vec![Value::Integer(50)])
            .unwrap_err();
        assert_eq!(
            err.operation_error().map(OperationError::message),
            Some("insufficient funds")
        );
        assert_eq!(*state.snapshot(), 5);
        assert_eq!(coordinator.last_transaction_id(), Some(TransactionId::new(1)));
        assert_eq!(recorded(&entries).len(), 1);
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let (coordinator, _, _) = coordinator(MemoryLog::default());
        assert!(matches!(
            coordinator.apply("withdraw", vec![]),
            Err(CoreError::UnknownOperation { .. })
        ));
        assert_eq!(coordinator.last_transaction_id(), None);
        assert_eq!(coordinator.mode(), None);
    }

    #[test]
    fn alias_is_journaled_under_canonical_name() {
        let (coordinator, _, entries) = coordinator(MemoryLog::default());
        coordinator.apply("deposit", vec![Value::Integer(1)]).unwrap();
        assert_eq!(recorded(&entries), vec![(1, "credit".to_string())]);
    }

    #[test]
    fn first_success_latches_mode() {
        let (coordinator, state, _) = coordinator(MemoryLog {
            blocking: true,
            ..MemoryLog::default()
        });

        coordinator
            .apply_blocking("credit", vec![Value::Integer(1)])
            .unwrap();
        assert_eq!(coordinator.mode(), Some(WriteMode::Blocking));

        let err = coordinator
            .apply("credit", vec![Value::Integer(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ModeConflict {
                active: WriteMode::Blocking,
                requested: WriteMode::Buffered
            }
        ));
        assert_eq!(*state.snapshot(), 1);
    }

    #[test]
    fn failed_first_call_does_not_latch() {
        let (coordinator, _, _) = coordinator(MemoryLog {
            blocking: true,
            ..MemoryLog::default()
        });
        assert!(coordinator
            .apply("debit", vec![Value::Integer(1)])
            .is_err());
        assert_eq!(coordinator.mode(), None);
        coordinator
            .apply_blocking("credit", vec![Value::Integer(1)])
            .unwrap();
    }

    #[test]
    fn blocking_requires_support() {
        let (coordinator, state, _) = coordinator(MemoryLog::default());
        assert!(matches!(
            coordinator.apply_blocking("credit", vec![Value::Integer(1)]),
            Err(CoreError::BlockingUnsupported)
        ));
        assert_eq!(*state.snapshot(), 0);
    }

    #[test]
    fn unhealthy_log_rejects_before_running() {
        let (coordinator, state, _) = coordinator(MemoryLog {
            failed: true,
            ..MemoryLog::default()
        });
        assert!(matches!(
            coordinator.apply("credit", vec![Value::Integer(1)]),
            Err(CoreError::JournalFailed { .. })
        ));
        assert_eq!(*state.snapshot(), 0);
        assert_eq!(coordinator.last_transaction_id(), None);
    }

    #[test]
    fn unreplayable_arguments_are_rejected_before_running() {
        let (coordinator, state, entries) = coordinator(MemoryLog::default());
        let duplicated = Value::Map(vec![
            (Value::from("k"), Value::Integer(1)),
            (Value::from("k"), Value::Integer(2)),
        ]);

        let err = coordinator
            .apply("credit", vec![Value::Integer(1), duplicated])
            .unwrap_err();
        assert!(matches!(err, CoreError::Codec(_)), "{err}");
        assert_eq!(*state.snapshot(), 0);
        assert_eq!(coordinator.last_transaction_id(), None);
        assert_eq!(coordinator.mode(), None);
        assert!(recorded(&entries).is_empty());
    }

    #[test]
    fn continues_after_restored_id() {
        let state = Arc::new(RootState::new(0));
        let coordinator = TransactionCoordinator::new(
            state,
            registry(),
            Box::new(MemoryLog::default()),
            Some(TransactionId::new(41)),
        );
        coordinator.apply("credit", vec![Value::Integer(1)]).unwrap();
        assert_eq!(coordinator.last_transaction_id(), Some(TransactionId::new(42)));
    }
}
