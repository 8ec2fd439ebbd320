//! Writer stage: the single owner of the open journal file.
//!
//! The writer runs on its own thread and consumes write requests strictly in
//! arrival order. Each request is a block of one or more journal lines that
//! is appended, flushed and synced before it is acknowledged.
//!
//! ## Rotation
//!
//! Before a block is written, the current file is rotated if none is open
//! or if it has been open for at least the rotation interval. The new file
//! is named by the id of the block's first entry, so no entry ever spans two
//! files.
//!
//! ## Faults
//!
//! I/O errors are not retried. The first failure is recorded and every later
//! request fails with the same fault, so nothing is written after a hole.

use crate::dir::sync_directory;
use crate::error::{CoreError, CoreResult};
use crate::journal::buffer::BufferMessage;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Messages accepted by the writer thread.
pub(crate) enum WriterMessage {
    /// Append a block of lines.
    Write(WriteRequest),
    /// Finish queued writes, close the file and exit.
    Shutdown,
}

/// A block of journal lines to append.
pub(crate) struct WriteRequest {
    block: String,
    first_id: TransactionId,
    ack: Option<Sender<CoreResult<()>>>,
}

/// Receives the block written by a stage, such as the buffering stage's
/// downstream writer.
pub(crate) trait BlockSink {
    /// Returns true while a write is queued or in progress.
    fn is_busy(&self) -> bool;

    /// Queues a block for writing without waiting for it.
    fn submit(&self, block: String, first_id: TransactionId) -> CoreResult<()>;
}

/// The open journal file and when it was opened.
struct OpenJournal {
    file: BufWriter<File>,
    path: PathBuf,
    opened_at: Instant,
}

/// Writer state, owned by the writer thread.
pub(crate) struct WriterState {
    directory: PathBuf,
    rotation_interval: Duration,
    current: Option<OpenJournal>,
}

impl WriterState {
    /// Creates writer state for a directory. No file is opened until the
    /// first write.
    pub(crate) fn new(directory: &Path, rotation_interval: Duration) -> Self {
        Self {
            directory: directory.to_path_buf(),
            rotation_interval,
            current: None,
        }
    }

    /// Appends `block` and a line terminator, then syncs.
    ///
    /// Once this returns `Ok`, the block is durable.
    pub(crate) fn write(&mut self, block: &str, first_id: TransactionId) -> CoreResult<()> {
        let rotate = match &self.current {
            None => true,
            Some(open) => open.opened_at.elapsed() >= self.rotation_interval,
        };
        if rotate {
            self.rotate(first_id)?;
        }

        let open = self
            .current
            .as_mut()
            .ok_or_else(|| CoreError::journal_failed("no journal file is open"))?;

        open.file.write_all(block.as_bytes())?;
        open.file.write_all(b"\n")?;
        open.file.flush()?;
        open.file.get_ref().sync_data()?;
        Ok(())
    }

    /// Closes the current file (if any) and opens the one for `first_id`.
    fn rotate(&mut self, first_id: TransactionId) -> CoreResult<()> {
        self.close()?;

        let path = crate::dir::journal_path(&self.directory, first_id);
        let created = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if created {
            sync_directory(&self.directory)?;
        }

        info!(path = %path.display(), first_id = first_id.as_u64(), "opened journal file");
        self.current = Some(OpenJournal {
            file: BufWriter::new(file),
            path,
            opened_at: Instant::now(),
        });
        Ok(())
    }

    /// Flushes, syncs and closes the current file.
    pub(crate) fn close(&mut self) -> CoreResult<()> {
        if let Some(mut open) = self.current.take() {
            open.file.flush()?;
            open.file.get_ref().sync_all()?;
            debug!(path = %open.path.display(), "closed journal file");
        }
        Ok(())
    }

    /// Returns the path of the file currently open, if any.
    #[cfg(test)]
    pub(crate) fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|open| open.path.as_path())
    }
}

/// Handle to the writer thread.
pub(crate) struct WriterHandle {
    sender: Sender<WriterMessage>,
    in_flight: Arc<AtomicUsize>,
    fault: Arc<Mutex<Option<String>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WriterHandle {
    /// Spawns the writer thread.
    ///
    /// After every completed write, a flush probe is sent to `probe` so the
    /// buffering stage can forward what accumulated in the meantime.
    pub(crate) fn spawn(
        state: WriterState,
        probe: Option<Sender<BufferMessage>>,
    ) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let fault = Arc::new(Mutex::new(None));

        let thread = {
            let in_flight = Arc::clone(&in_flight);
            let fault = Arc::clone(&fault);
            thread::Builder::new()
                .name("prevail-writer".to_string())
                .spawn(move || run(state, receiver, &in_flight, &fault, probe))?
        };

        Ok(Self {
            sender,
            in_flight,
            fault,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queues a block and waits until it (and everything queued before it)
    /// is durably written.
    #[cfg(test)]
    pub(crate) fn submit_and_wait(&self, block: String, first_id: TransactionId) -> CoreResult<()> {
        let (ack, done) = mpsc::channel();
        self.send(WriteRequest {
            block,
            first_id,
            ack: Some(ack),
        })?;
        wait_for_ack(&done)
    }

    /// Queues a block and returns a receiver for its acknowledgment.
    pub(crate) fn submit_with_ack(
        &self,
        block: String,
        first_id: TransactionId,
    ) -> CoreResult<Receiver<CoreResult<()>>> {
        let (ack, done) = mpsc::channel();
        self.send(WriteRequest {
            block,
            first_id,
            ack: Some(ack),
        })?;
        Ok(done)
    }

    /// Holds the writer thread before its next write until the guard drops.
    #[cfg(test)]
    pub(crate) fn pause(&self) -> parking_lot::MutexGuard<'_, Option<String>> {
        self.fault.lock()
    }

    /// Returns the recorded fault, if a write has failed.
    pub(crate) fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Finishes queued writes, closes the file and joins the thread.
    pub(crate) fn shutdown(&self) -> CoreResult<()> {
        let Some(thread) = self.thread.lock().take() else {
            return Ok(());
        };
        // The thread may already be gone; joining below still works
        let _ = self.sender.send(WriterMessage::Shutdown);
        thread
            .join()
            .map_err(|_| CoreError::journal_failed("writer thread panicked"))?;
        match self.fault() {
            Some(message) => Err(CoreError::journal_failed(message)),
            None => Ok(()),
        }
    }

    fn send(&self, request: WriteRequest) -> CoreResult<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(WriterMessage::Write(request))
            .map_err(|_| {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                CoreError::journal_failed("writer stage has stopped")
            })
    }
}

impl BlockSink for WriterHandle {
    fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    fn submit(&self, block: String, first_id: TransactionId) -> CoreResult<()> {
        self.send(WriteRequest {
            block,
            first_id,
            ack: None,
        })
    }
}

/// Waits for a write acknowledgment.
pub(crate) fn wait_for_ack(done: &Receiver<CoreResult<()>>) -> CoreResult<()> {
    done.recv()
        .map_err(|_| CoreError::journal_failed("writer stage stopped before acknowledging"))?
}

fn run(
    mut state: WriterState,
    receiver: Receiver<WriterMessage>,
    in_flight: &AtomicUsize,
    fault: &Mutex<Option<String>>,
    probe: Option<Sender<BufferMessage>>,
) {
    while let Ok(message) = receiver.recv() {
        let request = match message {
            WriterMessage::Write(request) => request,
            WriterMessage::Shutdown => break,
        };

        let existing = fault.lock().clone();
        let result = match existing {
            Some(message) => Err(CoreError::journal_failed(message)),
            None => state.write(&request.block, request.first_id).map_err(|e| {
                let message = format!(
                    "writing block starting at {}: {e}",
                    request.first_id
                );
                error!(error = %e, first_id = request.first_id.as_u64(), "journal write failed");
                *fault.lock() = Some(message.clone());
                CoreError::journal_failed(message)
            }),
        };

        in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(ack) = request.ack {
            // The waiting caller may have gone away; nothing to do then
            let _ = ack.send(result);
        }
        if let Some(probe) = &probe {
            let _ = probe.send(BufferMessage::FlushProbe);
        }
    }

    if let Err(e) = state.close() {
        error!(error = %e, "closing journal file failed");
        let mut slot = fault.lock();
        if slot.is_none() {
            *slot = Some(format!("closing journal file: {e}"));
        }
    }
    debug!("writer stage stopped");
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("fault", &self.fault())
            .finish_non_exhaustive()
    }
}
