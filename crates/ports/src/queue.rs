//! Message queue trait and in-memory implementation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::sync::lock;

/// A received message. The receipt handle is needed to delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub receipt_handle: String,
    pub body: String,
}

/// A queue with visibility timeouts and explicit deletion.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receives up to `max_messages`, waiting up to `wait` for the first
    /// one. Received messages stay hidden from other receivers for
    /// `visibility` and are redelivered afterwards unless deleted.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>>;

    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<()>;
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    receipt_handle: Option<String>,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct InMemoryQueueState {
    messages: VecDeque<StoredMessage>,
    deleted: usize,
}

/// In-memory queue for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<InMemoryQueueState>>,
    arrivals: Arc<Notify>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message and returns its id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        lock(&self.state).messages.push_back(StoredMessage {
            id: id.clone(),
            body: body.into(),
            receipt_handle: None,
            visible_at: Instant::now(),
        });
        self.arrivals.notify_waiters();
        id
    }

    /// Messages not yet deleted, in flight or not.
    pub fn len(&self) -> usize {
        lock(&self.state).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deleted_count(&self) -> usize {
        lock(&self.state).deleted
    }

    fn take_visible(&self, max_messages: usize, visibility: Duration) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut state = lock(&self.state);
        state
            .messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages)
            .map(|m| {
                let receipt_handle = Uuid::new_v4().to_string();
                m.receipt_handle = Some(receipt_handle.clone());
                m.visible_at = now + visibility;
                QueueMessage {
                    id: m.id.clone(),
                    receipt_handle,
                    body: m.body.clone(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let arrival = self.arrivals.notified();
            let messages = self.take_visible(max_messages, visibility);
            if !messages.is_empty() || Instant::now() >= deadline {
                return Ok(messages);
            }
            // Wake up on a push or when a hidden message may become visible.
            let _ = tokio::time::timeout_at(deadline, async {
                tokio::select! {
                    _ = arrival => {}
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            })
            .await;
        }
    }

    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<()> {
        let mut state = lock(&self.state);
        let before = state.messages.len();
        state.messages.retain(|m| {
            m.receipt_handle
                .as_ref()
                .is_none_or(|h| !receipt_handles.contains(h))
        });
        state.deleted += before - state.messages.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBILITY: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn received_messages_are_hidden_until_deleted() {
        let queue = InMemoryQueue::new();
        queue.push("one");
        queue.push("two");

        let received = queue
            .receive(10, Duration::ZERO, VISIBILITY)
            .await
            .unwrap();
        assert_eq!(received.len(), 2);
        assert!(
            queue
                .receive(10, Duration::ZERO, VISIBILITY)
                .await
                .unwrap()
                .is_empty()
        );

        let handles: Vec<_> = received.iter().map(|m| m.receipt_handle.clone()).collect();
        queue.delete_batch(&handles).await.unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.deleted_count(), 2);
    }

    #[tokio::test]
    async fn receive_respects_max_messages() {
        let queue = InMemoryQueue::new();
        for i in 0..5 {
            queue.push(format!("m{i}"));
        }
        let received = queue.receive(3, Duration::ZERO, VISIBILITY).await.unwrap();
        let bodies: Vec<_> = received.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn undeleted_messages_are_redelivered() {
        let queue = InMemoryQueue::new();
        queue.push("retry me");
        let first = queue
            .receive(1, Duration::ZERO, Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let second = queue
            .receive(1, Duration::ZERO, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first[0].id, second[0].id);
        assert_ne!(first[0].receipt_handle, second[0].receipt_handle);

        // A stale receipt handle deletes nothing.
        queue
            .delete_batch(&[first[0].receipt_handle.clone()])
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn receive_waits_for_arrivals() {
        let queue = InMemoryQueue::new();
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push("late");
        });
        let received = queue
            .receive(1, Duration::from_secs(5), VISIBILITY)
            .await
            .unwrap();
        assert_eq!(received[0].body, "late");
    }
}
