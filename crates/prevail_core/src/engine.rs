//! Engine facade and startup.

use crate::config::Config;
use crate::coordinator::TransactionCoordinator;
use crate::error::{CoreError, CoreResult};
use crate::journal::{FileJournal, JournalEntry, TransactionLog};
use crate::recovery::RecoveryReport;
use crate::registry::OperationRegistry;
use crate::state::RootState;
use crate::types::{TransactionId, WriteMode};
use parking_lot::RwLock;
use prevail_codec::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// An open prevalence engine.
///
/// The engine keeps the whole state `S` in memory and records every
/// transaction in a journal. Opening an engine replays the journal, so the
/// state after `open` is the state after the last recorded transaction.
///
/// # Example
///
/// ```rust,no_run
/// use prevail_core::{registry::integer_arg, Config, Engine, OperationRegistry, Value};
///
/// let mut registry = OperationRegistry::<i64>::new();
/// registry.register("credit", |balance: &mut i64, args: &[Value]| {
///     *balance += integer_arg(args, 0)?;
///     Ok(Value::Integer(*balance))
/// })?;
///
/// let config = Config::new().data_directory("db");
/// let engine = Engine::open(config, registry, 0)?;
/// engine.apply_blocking("credit", vec![Value::Integer(10)])?;
/// assert_eq!(engine.read(|balance| *balance), 10);
/// engine.close()?;
/// # Ok::<(), prevail_core::CoreError>(())
/// ```
///
/// # Write modes
///
/// [`apply`](Self::apply) returns once the entry is queued;
/// [`apply_blocking`](Self::apply_blocking) returns once it is durable. An
/// engine uses one mode for its lifetime: the first successful call fixes
/// it, and calls in the other mode fail with [`CoreError::ModeConflict`].
pub struct Engine<S> {
    config: Config,
    state: Arc<RootState<S>>,
    coordinator: TransactionCoordinator<S>,
    report: RecoveryReport,
    is_open: RwLock<bool>,
}

impl<S> Engine<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Opens the engine on the file journal in `config.data_directory`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Config`] for invalid settings, or if
    ///   `external_store_url` is set (use [`open_with_log`](Self::open_with_log))
    /// - [`CoreError::DatabaseLocked`] if another engine uses the directory
    /// - [`CoreError::Recovery`] if the journal cannot be replayed
    pub fn open(config: Config, registry: OperationRegistry<S>, initial: S) -> CoreResult<Self> {
        config.validate()?;
        if let Some(url) = &config.external_store_url {
            return Err(CoreError::config(format!(
                "external store {url:?} requires Engine::open_with_log"
            )));
        }
        let journal = FileJournal::open(&config)?;
        Self::open_with_log(config, registry, initial, Box::new(journal))
    }

    /// Opens the engine on a caller-supplied transaction log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] for invalid settings and
    /// [`CoreError::Recovery`] if the log cannot be replayed.
    pub fn open_with_log(
        config: Config,
        registry: OperationRegistry<S>,
        initial: S,
        log: Box<dyn TransactionLog>,
    ) -> CoreResult<Self> {
        config.validate()?;
        info!(
            directory = %config.data_directory.display(),
            registry_version = registry.version(),
            operations = registry.len(),
            "opening engine"
        );

        let state = Arc::new(RootState::new(initial));
        let registry = Arc::new(registry);

        let mut restored: Option<TransactionId> = None;
        let report = log.replay(config.replay_chunk_size, &mut |chunk| {
            replay_chunk(&state, &registry, chunk)?;
            restored = chunk.last().map(|entry| entry.id).or(restored);
            Ok(())
        })?;
        let last_id = restored.max(report.last_id);

        let coordinator = TransactionCoordinator::new(Arc::clone(&state), registry, log, last_id);

        Ok(Self {
            config,
            state,
            coordinator,
            report,
            is_open: RwLock::new(true),
        })
    }

    /// Applies a transaction, returning once its journal entry is queued.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Transaction`] if the operation fails; nothing changed
    /// - [`CoreError::UnknownOperation`] if `operation` is not registered
    /// - [`CoreError::ModeConflict`] if the engine runs in blocking mode
    /// - [`CoreError::JournalFailed`] if the journal can no longer be written
    pub fn apply(&self, operation: &str, args: Vec<Value>) -> CoreResult<Value> {
        let open = self.is_open.read();
        if !*open {
            return Err(CoreError::DatabaseClosed);
        }
        self.coordinator.apply(operation, args)
    }

    /// Applies a transaction, returning once its journal entry is durable.
    ///
    /// # Errors
    ///
    /// As [`apply`](Self::apply), plus [`CoreError::BlockingUnsupported`] if
    /// the transaction log cannot acknowledge writes. If the write itself
    /// fails, the state change stays applied in memory and the error is
    /// [`CoreError::JournalFailed`].
    pub fn apply_blocking(&self, operation: &str, args: Vec<Value>) -> CoreResult<Value> {
        let open = self.is_open.read();
        if !*open {
            return Err(CoreError::DatabaseClosed);
        }
        self.coordinator.apply_blocking(operation, args)
    }

    /// Returns the current state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<S> {
        self.state.snapshot()
    }

    /// Runs `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        self.state.read(f)
    }

    /// Returns the id of the last transaction, including replayed ones.
    #[must_use]
    pub fn last_transaction_id(&self) -> Option<TransactionId> {
        self.coordinator.last_transaction_id()
    }

    /// Returns the write mode fixed by the first transaction, if any.
    #[must_use]
    pub fn write_mode(&self) -> Option<WriteMode> {
        self.coordinator.mode()
    }

    /// Returns what recovery found when the engine was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks if the engine is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Closes the engine.
    ///
    /// Waits for in-flight transactions, writes out everything buffered and
    /// stops the journal stages. The data directory stays locked until the
    /// engine is dropped. Later calls to `apply` fail with
    /// [`CoreError::DatabaseClosed`].
    ///
    /// # Errors
    ///
    /// Returns an error if buffered entries could not be written.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        info!(
            last_id = self.last_transaction_id().map_or(0, TransactionId::as_u64),
            "closing engine"
        );
        self.coordinator.log().shutdown()
    }
}

/// Replays one chunk of entries as a single state transaction.
fn replay_chunk<S: Clone>(
    state: &RootState<S>,
    registry: &OperationRegistry<S>,
    chunk: &[JournalEntry],
) -> CoreResult<()> {
    state.transact(|draft| -> CoreResult<()> {
        for entry in chunk {
            let (name, run) = registry.resolve(&entry.operation)?;
            run(draft, &entry.args).map_err(|source| CoreError::Transaction {
                operation: format!("{name} ({})", entry.id),
                source,
            })?;
        }
        Ok(())
    })?;
    debug!(entries = chunk.len(), "replayed chunk");
    Ok(())
}

impl<S> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("directory", &self.config.data_directory)
            .field("is_open", &*self.is_open.read())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S> Drop for Engine<S> {
    fn drop(&mut self) {
        let mut is_open = self.is_open.write();
        if *is_open {
            *is_open = false;
            if let Err(e) = self.coordinator.log().shutdown() {
                tracing::error!(error = %e, "engine shutdown failed");
            }
        }
    }
}
