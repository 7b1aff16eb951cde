//! The polling worker that drives one queue listener.

use std::sync::Arc;
use std::time::Duration;

use traineehub_db::queue::{Envelope, MessageQueue, QueueError};

/// How a listener disposed of one message.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The message can never be processed; it goes straight to the
    /// dead-letter queue.
    #[error("invalid message: {0}")]
    Invalid(String),

    /// A transient failure; the message is re-queued with back-off.
    #[error("{0}")]
    Retryable(String),
}

impl From<traineehub_planner::PlannerError> for ListenerError {
    fn from(err: traineehub_planner::PlannerError) -> Self {
        if err.is_retryable() {
            ListenerError::Retryable(err.to_string())
        } else {
            ListenerError::Invalid(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ListenerError {
    fn from(err: serde_json::Error) -> Self {
        ListenerError::Invalid(err.to_string())
    }
}

#[async_trait::async_trait]
pub trait QueueListener: Send + Sync {
    fn queue(&self) -> &str;

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError>;
}

/// Polls one queue and dispatches messages to its listener, with back-off
/// re-queues and a dead-letter queue after too many attempts. Every handler
/// is idempotent, so redelivery is safe.
pub struct ListenerWorker {
    queue: Arc<dyn MessageQueue>,
    listener: Arc<dyn QueueListener>,
    poll_interval: Duration,
    max_attempts: i64,
}

impl ListenerWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        listener: Arc<dyn QueueListener>,
        poll_interval: Duration,
        max_attempts: i64,
    ) -> Self {
        Self {
            queue,
            listener,
            poll_interval,
            max_attempts,
        }
    }

    /// One poll round; returns how many messages were pulled.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let queue_name = self.listener.queue().to_string();
        let messages = self.queue.receive(&queue_name, 10).await?;
        let pulled = messages.len();

        for envelope in messages {
            tracing::info!(
                queue = %queue_name,
                message_id = %envelope.message_id,
                attempt = envelope.attempts,
                trace_id = envelope.trace_id().unwrap_or(""),
                "handling inbound event"
            );

            match self.listener.handle(&envelope).await {
                Ok(()) => self.queue.ack(&envelope.message_id).await?,
                Err(ListenerError::Invalid(reason)) => {
                    tracing::warn!(
                        queue = %queue_name,
                        message_id = %envelope.message_id,
                        reason,
                        "dead-lettering invalid message"
                    );
                    self.dead_letter(&queue_name, &envelope).await?;
                }
                Err(ListenerError::Retryable(reason)) => {
                    if envelope.attempts >= self.max_attempts {
                        tracing::error!(
                            queue = %queue_name,
                            message_id = %envelope.message_id,
                            reason,
                            "retries exhausted, dead-lettering message"
                        );
                        self.dead_letter(&queue_name, &envelope).await?;
                    } else {
                        tracing::warn!(
                            queue = %queue_name,
                            message_id = %envelope.message_id,
                            attempt = envelope.attempts,
                            reason,
                            "re-queueing message with back-off"
                        );
                        self.queue
                            .nack(&envelope.message_id, backoff(envelope.attempts))
                            .await?;
                    }
                }
            }
        }

        Ok(pulled)
    }

    async fn dead_letter(&self, queue_name: &str, envelope: &Envelope) -> Result<(), QueueError> {
        self.queue
            .send(
                &format!("{queue_name}-dlq"),
                envelope.body.clone(),
                envelope.headers.clone(),
            )
            .await?;
        self.queue.ack(&envelope.message_id).await
    }

    /// Runs the worker until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.poll_once().await {
                    Ok(0) => tokio::time::sleep(self.poll_interval).await,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(
                            queue = %self.listener.queue(),
                            err = %err,
                            "queue poll failed"
                        );
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        })
    }
}

fn backoff(attempt: i64) -> Duration {
    let secs = 30u64.saturating_mul(attempt.max(1) as u64);
    Duration::from_secs(secs.min(600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_with_a_ceiling() {
        assert_eq!(backoff(1), Duration::from_secs(30));
        assert_eq!(backoff(3), Duration::from_secs(90));
        assert_eq!(backoff(1000), Duration::from_secs(600));
    }
}
