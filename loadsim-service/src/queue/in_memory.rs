//! In-process queue.
//!
//! This provides a [`Queue`] backed by a `VecDeque`, used for local runs where the trigger and
//! the workers share one process, and in tests. Received messages stay in flight until they are
//! acknowledged. The queue is [`Clone`] so tests can hold a handle for direct inspection while
//! the pipeline owns a shared copy.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use super::{Queue, QueueEntry, QueueMessage, ReceiptHandle, SendBatchResponse};
use crate::batch::MAX_BATCH_SIZE;
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<ReceiptHandle, QueueMessage>,
}

/// A FIFO [`Queue`] living in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<State>>,
    arrived: Arc<Notify>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    /// Returns the number of received but unacknowledged messages.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    /// Returns `true` if no message is waiting or in flight.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.ready.is_empty() && state.in_flight.is_empty()
    }

    fn pop(&self, max: usize) -> Vec<QueueMessage> {
        let mut state = self.state.lock().unwrap();
        let count = max.min(state.ready.len());
        let messages: Vec<_> = state.ready.drain(..count).collect();
        for message in &messages {
            state
                .in_flight
                .insert(message.receipt.clone(), message.clone());
        }
        messages
    }
}

#[async_trait::async_trait]
impl Queue for InMemoryQueue {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn send_batch(&self, entries: Vec<QueueEntry>) -> QueueResult<SendBatchResponse> {
        if entries.is_empty() {
            return Err(QueueError::EmptyBatch);
        }
        if entries.len() > MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge(entries.len()));
        }
        let mut ids = HashSet::new();
        for entry in &entries {
            if !ids.insert(entry.id.as_str()) {
                return Err(QueueError::DuplicateId(entry.id.clone()));
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            for entry in entries {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                state.ready.push_back(QueueMessage {
                    message_id: format!("msg-{id}"),
                    receipt: ReceiptHandle(format!("receipt-{id}")),
                    body: entry.body,
                });
            }
        }
        self.arrived.notify_waiters();

        Ok(SendBatchResponse::default())
    }

    async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let arrived = self.arrived.notified();
            let messages = self.pop(max);
            if !messages.is_empty() {
                return Ok(messages);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, receipts: Vec<ReceiptHandle>) -> QueueResult<()> {
        let mut state = self.state.lock().unwrap();
        for receipt in &receipts {
            state.in_flight.remove(receipt);
        }
        Ok(())
    }
}
