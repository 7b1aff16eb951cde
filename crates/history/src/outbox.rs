use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use traineehub_db::queue::{MessageQueue, TRACE_ID_HEADER};

/// Most ids per outbox message.
const BATCH_SIZE: usize = 10;

/// Payload of one outbox message: a batch of history ids to re-dispatch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxBatch {
    pub notification_ids: Vec<String>,
}

/// Queues history ids for asynchronous downstream dispatch, in batches.
pub struct OutboxSender {
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
}

impl OutboxSender {
    pub fn new(queue: Arc<dyn MessageQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
        }
    }

    /// Sends the ids in batches of at most ten, propagating the ambient trace
    /// header. Returns the batches that failed to enqueue so the caller can
    /// retry them.
    pub async fn send_to_outbox(
        &self,
        ids: &[String],
        trace_id: Option<&str>,
    ) -> Vec<Vec<String>> {
        let mut failed = Vec::new();

        for chunk in ids.chunks(BATCH_SIZE) {
            let batch = OutboxBatch {
                notification_ids: chunk.to_vec(),
            };
            let body = match serde_json::to_string(&batch) {
                Ok(body) => body,
                Err(err) => {
                    tracing::error!(err = %err, "failed to serialise outbox batch");
                    failed.push(chunk.to_vec());
                    continue;
                }
            };

            let mut headers = HashMap::new();
            if let Some(trace_id) = trace_id {
                headers.insert(TRACE_ID_HEADER.to_string(), trace_id.to_string());
            }

            if let Err(err) = self.queue.send(&self.queue_name, body, headers).await {
                tracing::warn!(err = %err, size = chunk.len(), "failed to enqueue outbox batch");
                failed.push(chunk.to_vec());
            }
        }

        failed
    }
}
