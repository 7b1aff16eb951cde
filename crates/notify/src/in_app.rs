//! In-app notifications: history rows without transport, rendered by the
//! product UI when the trainee opens them.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use traineehub_history::{History, HistoryService, TemplateInfo};
use traineehub_shared::{Channel, NotificationKind, NotificationStatus, Reference};

use crate::error::NotifyError;
use crate::template::TemplateVersions;

pub struct InAppSender {
    history: HistoryService,
    versions: TemplateVersions,
    enabled: bool,
}

impl InAppSender {
    pub fn new(history: HistoryService, versions: TemplateVersions, enabled: bool) -> Self {
        Self {
            history,
            versions,
            enabled,
        }
    }

    /// Writes a single in-app row: UNREAD when due now, SCHEDULED while the
    /// planned send instant is still in the future. A suppressed notification
    /// is written all the same so reporting is consistent; the row carries a
    /// `suppressed` variable the UI filters on.
    pub async fn create_notification(
        &self,
        trainee_id: &str,
        reference: Option<Reference>,
        kind: NotificationKind,
        variables: Map<String, Value>,
        suppress_send: bool,
        sent_at: Option<OffsetDateTime>,
    ) -> Result<History, NotifyError> {
        let version = self.versions.version_of(kind, Channel::InApp)?.to_string();
        let now = OffsetDateTime::now_utc();

        let status = match sent_at {
            Some(at) if at > now => NotificationStatus::Scheduled,
            _ => NotificationStatus::Unread,
        };

        let mut variables = variables;
        let suppressed = suppress_send || !self.enabled;
        if suppressed {
            variables.insert("suppressed".to_string(), Value::Bool(true));
            tracing::info!(
                trainee_id,
                kind = %kind,
                "in-app notification suppressed, row recorded for reporting"
            );
        }

        let mut history = History::new(
            trainee_id,
            reference.clone(),
            kind,
            Channel::InApp,
            TemplateInfo::new(kind, version).with_variables(variables),
            status,
            Some(sent_at.unwrap_or(now)),
        );

        // Replanning replaces a scheduled row in place rather than adding a
        // second pending dispatch for the same tuple.
        if let Some(reference) = &reference {
            let scheduled = self
                .history
                .store()
                .find_scheduled(trainee_id, Channel::InApp, reference, kind)
                .await?;
            if let Some(existing) = scheduled.first() {
                history.id = existing.id.clone();
            }
        }

        self.history.save(&history).await?;

        if let Some(reference) = &reference {
            if let Err(err) = self
                .history
                .store()
                .delete_scheduled_except(trainee_id, reference, kind, &history.id)
                .await
            {
                tracing::warn!(trainee_id, kind = %kind, err = %err, "failed to collect stale scheduled rows");
            }
        }

        Ok(history)
    }
}
