use std::sync::Arc;

use time::OffsetDateTime;
use traineehub_shared::{Channel, NotificationStatus};

use crate::broadcast::Broadcast;
use crate::error::HistoryError;
use crate::model::History;
use crate::store::HistoryStore;

/// State-machine layer over the raw store. Every successful mutation is
/// followed by a broadcast of the changed row; broadcast failures are logged
/// and never undo the write.
#[derive(Clone)]
pub struct HistoryService {
    store: HistoryStore,
    broadcast: Arc<dyn Broadcast>,
}

impl HistoryService {
    pub fn new(store: HistoryStore, broadcast: Arc<dyn Broadcast>) -> Self {
        Self { store, broadcast }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    fn check_status(
        channel: Channel,
        status: NotificationStatus,
    ) -> Result<(), HistoryError> {
        if status.is_valid_for(channel) {
            Ok(())
        } else {
            Err(HistoryError::InvalidTransition { channel, status })
        }
    }

    async fn publish(&self, history: &History) {
        if let Err(err) = self.broadcast.publish(history).await {
            tracing::warn!(id = %history.id, err = %err, "failed to broadcast history change");
        }
    }

    pub async fn save(&self, history: &History) -> Result<(), HistoryError> {
        Self::check_status(history.channel, history.status)?;
        self.store.save(history).await?;
        self.publish(history).await;

        Ok(())
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: NotificationStatus,
        detail: Option<&str>,
    ) -> Result<(), HistoryError> {
        let mut history = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;

        Self::check_status(history.channel, status)?;
        self.store.update_status(id, status, detail).await?;

        history.status = status;
        history.status_detail = detail.map(ToString::to_string);
        self.publish(&history).await;

        Ok(())
    }

    /// Applies a provider-driven status change unless a newer event has
    /// already been applied. Returns the number of rows changed; zero means
    /// the event was stale (or the row is gone) and nothing was broadcast.
    pub async fn update_status_if_newer(
        &self,
        id: &str,
        event_at: OffsetDateTime,
        status: NotificationStatus,
        detail: Option<&str>,
    ) -> Result<u64, HistoryError> {
        let Some(history) = self.store.find_by_id(id).await? else {
            tracing::warn!(id, "status event for unknown history row");
            return Ok(0);
        };

        Self::check_status(history.channel, status)?;
        let affected = self
            .store
            .update_status_if_newer(id, event_at, status, detail)
            .await?;

        if affected > 0 {
            if let Some(updated) = self.store.find_by_id(id).await? {
                self.publish(&updated).await;
            }
        } else {
            tracing::debug!(id, status = %status, "stale status event skipped");
        }

        Ok(affected)
    }

    /// Marks an in-app notification read, stamping `read_at` on first read.
    /// Re-reading an already-read notification is a no-op.
    pub async fn mark_read(&self, id: &str, trainee_id: &str) -> Result<History, HistoryError> {
        let mut history = self
            .store
            .find_by_id_and_recipient(id, trainee_id)
            .await?
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;

        match (history.channel, history.status) {
            (Channel::InApp, NotificationStatus::Read) => Ok(history),
            (Channel::InApp, NotificationStatus::Unread) => {
                history.status = NotificationStatus::Read;
                history.read_at = history.read_at.or_else(|| Some(OffsetDateTime::now_utc()));
                self.store.save(&history).await?;
                self.publish(&history).await;
                Ok(history)
            }
            (channel, _) => Err(HistoryError::InvalidTransition {
                channel,
                status: NotificationStatus::Read,
            }),
        }
    }

    pub async fn archive(&self, id: &str, trainee_id: &str) -> Result<History, HistoryError> {
        let mut history = self
            .store
            .find_by_id_and_recipient(id, trainee_id)
            .await?
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;

        match (history.channel, history.status) {
            (Channel::InApp, NotificationStatus::Archived) => Ok(history),
            (Channel::InApp, NotificationStatus::Unread | NotificationStatus::Read) => {
                history.status = NotificationStatus::Archived;
                self.store.save(&history).await?;
                self.publish(&history).await;
                Ok(history)
            }
            (channel, _) => Err(HistoryError::InvalidTransition {
                channel,
                status: NotificationStatus::Archived,
            }),
        }
    }

    /// Removes a row owned by the recipient and emits the deleted marker.
    pub async fn delete(&self, id: &str, trainee_id: &str) -> Result<bool, HistoryError> {
        let deleted = self.store.delete_by_id_and_recipient(id, trainee_id).await?;
        if deleted {
            if let Err(err) = self.broadcast.publish_deleted(id).await {
                tracing::warn!(id, err = %err, "failed to broadcast history delete");
            }
        }

        Ok(deleted)
    }

    /// Removes every scheduled row for one reference entity, emitting a
    /// deleted marker per row. Planners call this before laying down a new
    /// plan so stale pending dispatches never survive a replan.
    pub async fn delete_scheduled_for_reference(
        &self,
        trainee_id: &str,
        reference: &traineehub_shared::Reference,
    ) -> Result<Vec<String>, HistoryError> {
        let ids = self
            .store
            .delete_for_reference_and_status(
                trainee_id,
                reference.kind,
                &reference.id,
                NotificationStatus::Scheduled,
            )
            .await?;

        for id in &ids {
            if let Err(err) = self.broadcast.publish_deleted(id).await {
                tracing::warn!(id, err = %err, "failed to broadcast pruned history row");
            }
        }

        Ok(ids)
    }

    /// Re-publishes an existing row, e.g. when draining the outbox.
    pub async fn rebroadcast(&self, id: &str) -> Result<bool, HistoryError> {
        match self.store.find_by_id(id).await? {
            Some(history) => {
                self.publish(&history).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
