//! Buffering stage: coalesces journal lines while the writer is busy.
//!
//! Lines arrive in id order. If the writer is idle, a line is forwarded
//! immediately as a block of one. Otherwise it is appended to the pending
//! block, which is forwarded as soon as the writer reports that it finished
//! its previous write.

use crate::error::CoreResult;
use crate::journal::writer::BlockSink;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// Messages accepted by the buffering thread.
pub(crate) enum BufferMessage {
    /// A new journal line.
    Append {
        /// Encoded line without terminator.
        line: String,
        /// Id of the transaction the line records.
        id: TransactionId,
    },
    /// The writer finished a write and may be idle.
    FlushProbe,
    /// Forward anything pending and exit.
    Shutdown,
}

/// Pending lines not yet handed to the writer.
#[derive(Debug, Default)]
pub(crate) struct BufferState {
    pending: String,
    first_id: Option<TransactionId>,
    lines: usize,
}

impl BufferState {
    /// Handles one message. Returns `false` once the stage should stop.
    pub(crate) fn handle(&mut self, message: BufferMessage, sink: &dyn BlockSink) -> bool {
        match message {
            BufferMessage::Append { line, id } => {
                if !self.pending.is_empty() {
                    self.pending.push('\n');
                }
                self.pending.push_str(&line);
                self.first_id.get_or_insert(id);
                self.lines += 1;
                if !sink.is_busy() {
                    self.flush(sink);
                }
                true
            }
            BufferMessage::FlushProbe => {
                if !sink.is_busy() {
                    self.flush(sink);
                }
                true
            }
            BufferMessage::Shutdown => {
                self.flush(sink);
                false
            }
        }
    }

    /// Number of lines waiting for the writer.
    #[cfg(test)]
    pub(crate) fn pending_lines(&self) -> usize {
        self.lines
    }

    fn flush(&mut self, sink: &dyn BlockSink) {
        let Some(first_id) = self.first_id.take() else {
            return;
        };
        let block = std::mem::take(&mut self.pending);
        trace!(first_id = first_id.as_u64(), lines = self.lines, "forwarding block");
        self.lines = 0;
        if let Err(e) = sink.submit(block, first_id) {
            // The writer has stopped and recorded why; the coordinator
            // rejects further transactions
            error!(error = %e, first_id = first_id.as_u64(), "dropping buffered block");
        }
    }
}

/// Handle to the buffering thread.
#[derive(Debug)]
pub(crate) struct BufferHandle {
    sender: Sender<BufferMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BufferHandle {
    /// Spawns the buffering thread, forwarding blocks to `sink`.
    pub(crate) fn spawn<S>(
        sender: Sender<BufferMessage>,
        receiver: Receiver<BufferMessage>,
        sink: Arc<S>,
    ) -> CoreResult<Self>
    where
        S: BlockSink + Send + Sync + 'static,
    {
        let thread = thread::Builder::new()
            .name("prevail-buffer".to_string())
            .spawn(move || {
                let mut state = BufferState::default();
                while let Ok(message) = receiver.recv() {
                    if !state.handle(message, sink.as_ref()) {
                        break;
                    }
                }
                debug!("buffering stage stopped");
            })?;

        Ok(Self {
            sender,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queues a line.
    pub(crate) fn append(&self, line: String, id: TransactionId) -> CoreResult<()> {
        self.sender
            .send(BufferMessage::Append { line, id })
            .map_err(|_| crate::error::CoreError::journal_failed("buffering stage has stopped"))
    }

    /// Forwards pending lines to the writer and joins the thread.
    pub(crate) fn shutdown(&self) -> CoreResult<()> {
        let Some(thread) = self.thread.lock().take() else {
            return Ok(());
        };
        let _ = self.sender.send(BufferMessage::Shutdown);
        thread
            .join()
            .map_err(|_| crate::error::CoreError::journal_failed("buffering thread panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeSink {
        busy: Cell<bool>,
        blocks: RefCell<Vec<(String, TransactionId)>>,
    }

    impl BlockSink for FakeSink {
        fn is_busy(&self) -> bool {
            self.busy.get()
        }

        fn submit(&self, block: String, first_id: TransactionId) -> CoreResult<()> {
            self.blocks.borrow_mut().push((block, first_id));
            Ok(())
        }
    }

    fn append(id: u64) -> BufferMessage {
        BufferMessage::Append {
            line: format!("(credit 1) ;{id}"),
            id: TransactionId::new(id),
        }
    }

    #[test]
    fn idle_writer_gets_line_immediately() {
        let sink = FakeSink::default();
        let mut state = BufferState::default();

        assert!(state.handle(append(1), &sink));

        assert_eq!(
            *sink.blocks.borrow(),
            vec![("(credit 1) ;1".to_string(), TransactionId::new(1))]
        );
        assert_eq!(state.pending_lines(), 0);
    }

    #[test]
    fn busy_writer_coalesces_until_probe() {
        let sink = FakeSink::default();
        let mut state = BufferState::default();

        sink.busy.set(true);
        state.handle(append(1), &sink);
        state.handle(append(2), &sink);
        state.handle(append(3), &sink);
        assert!(sink.blocks.borrow().is_empty());
        assert_eq!(state.pending_lines(), 3);

        // Probe while still busy does nothing
        state.handle(BufferMessage::FlushProbe, &sink);
        assert!(sink.blocks.borrow().is_empty());

        sink.busy.set(false);
        state.handle(BufferMessage::FlushProbe, &sink);

        let blocks = sink.blocks.borrow();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].0, "(credit 1) ;1\n(credit 1) ;2\n(credit 1) ;3");
        assert_eq!(blocks[0].1, TransactionId::new(1));
    }

    #[test]
    fn probe_with_nothing_pending_sends_nothing() {
        let sink = FakeSink::default();
        let mut state = BufferState::default();
        state.handle(BufferMessage::FlushProbe, &sink);
        assert!(sink.blocks.borrow().is_empty());
    }

    #[test]
    fn shutdown_flushes_even_when_busy() {
        let sink = FakeSink::default();
        let mut state = BufferState::default();

        sink.busy.set(true);
        state.handle(append(7), &sink);
        assert!(!state.handle(BufferMessage::Shutdown, &sink));

        assert_eq!(sink.blocks.borrow()[0].1, TransactionId::new(7));
    }

    #[test]
    fn first_id_resets_after_flush() {
        let sink = FakeSink::default();
        let mut state = BufferState::default();

        state.handle(append(1), &sink);
        sink.busy.set(true);
        state.handle(append(2), &sink);
        sink.busy.set(false);
        state.handle(BufferMessage::FlushProbe, &sink);

        let ids: Vec<u64> = sink.blocks.borrow().iter().map(|b| b.1.as_u64()).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
