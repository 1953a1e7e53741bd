//! Offline notifications for participants without a live connection.

use super::work_queue::{EnqueueError, JobHandler, WorkQueue, WorkerPool};
use crate::metrics::NOTIFICATIONS_DROPPED_TOTAL;
use crate::models::Message;
use crate::websocket::ConnectionRegistry;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessageNotification {
    pub recipient_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub preview: String,
}

impl NewMessageNotification {
    fn for_recipient(recipient_id: Uuid, message: &Message) -> Self {
        Self {
            recipient_id,
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_id: message.sender_id,
            sender_username: message.sender_username.clone(),
            preview: message.content.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

/// Default sink: records the notification. Push and email transports
/// plug in here.
pub struct LogNotificationSink;

#[async_trait]
impl JobHandler<NewMessageNotification> for LogNotificationSink {
    async fn handle(&self, job: NewMessageNotification) -> anyhow::Result<()> {
        tracing::info!(
            recipient_id = %job.recipient_id,
            conversation_id = %job.conversation_id,
            message_id = %job.message_id,
            sender = %job.sender_username,
            "offline message notification"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct OfflineNotifier {
    queue: WorkQueue<NewMessageNotification>,
    registry: ConnectionRegistry,
}

impl OfflineNotifier {
    pub fn new(queue: WorkQueue<NewMessageNotification>, registry: ConnectionRegistry) -> Self {
        Self { queue, registry }
    }

    /// Start a notifier backed by its own worker pool
    pub fn start<H>(
        registry: ConnectionRegistry,
        capacity: usize,
        workers: usize,
        handler: Arc<H>,
    ) -> (Self, WorkerPool)
    where
        H: JobHandler<NewMessageNotification>,
    {
        let (queue, pool) = WorkQueue::start("offline_notifications", capacity, workers, handler);
        (Self::new(queue, registry), pool)
    }

    /// Enqueue one notification per offline participant other than the
    /// sender. Returns how many were enqueued.
    pub fn notify_offline(&self, message: &Message, participants: &[Uuid]) -> usize {
        let mut enqueued = 0;
        for recipient in participants
            .iter()
            .copied()
            .filter(|id| *id != message.sender_id)
            .filter(|id| !self.registry.is_online(*id))
        {
            match self
                .queue
                .enqueue(NewMessageNotification::for_recipient(recipient, message))
            {
                Ok(()) => enqueued += 1,
                Err(EnqueueError::QueueFull) => NOTIFICATIONS_DROPPED_TOTAL.inc(),
                Err(EnqueueError::Closed) => {
                    tracing::warn!("notification queue closed");
                    break;
                }
            }
        }
        enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use chrono::Utc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        jobs: Mutex<Vec<NewMessageNotification>>,
    }

    #[async_trait]
    impl JobHandler<NewMessageNotification> for Recorder {
        async fn handle(&self, job: NewMessageNotification) -> anyhow::Result<()> {
            self.jobs.lock().await.push(job);
            Ok(())
        }
    }

    fn message(sender_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id,
            sender_username: "alice".into(),
            content: "x".repeat(200),
            message_type: MessageType::Text,
            file: None,
            reply_to: None,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn only_offline_recipients_are_notified() {
        let registry = ConnectionRegistry::new(4);
        let recorder = Arc::new(Recorder::default());
        let (notifier, pool) = OfflineNotifier::start(registry.clone(), 8, 1, recorder.clone());

        let sender = Uuid::new_v4();
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let (_conn, _rx) = registry.register(online);

        let msg = message(sender);
        assert_eq!(notifier.notify_offline(&msg, &[sender, online, offline]), 1);

        drop(notifier);
        pool.join().await;

        let jobs = recorder.jobs.lock().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].recipient_id, offline);
        assert_eq!(jobs[0].preview.chars().count(), PREVIEW_CHARS);
    }
}
