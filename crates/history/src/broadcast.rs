use std::collections::HashMap;
use std::sync::Arc;

use traineehub_db::queue::MessageQueue;

use crate::model::{History, HistoryBroadcastView, HistoryDeletedView};

/// Downstream publication of history changes. Publishing is post-commit and
/// best-effort: a failure is logged by the caller and never rolls back the
/// underlying save.
#[async_trait::async_trait]
pub trait Broadcast: Send + Sync {
    async fn publish(&self, history: &History) -> anyhow::Result<()>;

    async fn publish_deleted(&self, id: &str) -> anyhow::Result<()>;
}

/// Publishes the compact history view onto the configured topic queue.
pub struct TopicBroadcast {
    queue: Arc<dyn MessageQueue>,
    topic: String,
}

impl TopicBroadcast {
    pub fn new(queue: Arc<dyn MessageQueue>, topic: impl Into<String>) -> Self {
        Self {
            queue,
            topic: topic.into(),
        }
    }
}

#[async_trait::async_trait]
impl Broadcast for TopicBroadcast {
    async fn publish(&self, history: &History) -> anyhow::Result<()> {
        let view = HistoryBroadcastView::from(history);
        let body = serde_json::to_string(&view)?;
        self.queue.send(&self.topic, body, HashMap::new()).await?;

        Ok(())
    }

    async fn publish_deleted(&self, id: &str) -> anyhow::Result<()> {
        let body = serde_json::to_string(&HistoryDeletedView::new(id))?;
        self.queue.send(&self.topic, body, HashMap::new()).await?;

        Ok(())
    }
}
