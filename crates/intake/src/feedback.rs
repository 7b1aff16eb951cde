//! Applies provider feedback (bounces, complaints, deliveries) to history
//! rows and drives the contact-details resend flow.

use std::sync::Arc;

use time::OffsetDateTime;
use traineehub_history::HistoryService;
use traineehub_notify::EmailSender;
use traineehub_shared::{Channel, NotificationStatus};

use crate::events::EmailEvent;
use crate::worker::ListenerError;

pub struct FeedbackService {
    history: HistoryService,
    email: Arc<EmailSender>,
}

impl FeedbackService {
    pub fn new(history: HistoryService, email: Arc<EmailSender>) -> Self {
        Self { history, email }
    }

    /// Applies one provider event. Out-of-order events converge on the
    /// newest state thanks to the timestamp-gated update; a stale event is
    /// silently skipped.
    pub async fn apply_email_event(&self, event: &EmailEvent) -> Result<(), ListenerError> {
        let notification_id = event
            .notification_id()
            .ok_or_else(|| ListenerError::Invalid("email event without NotificationId".into()))?;

        let notification_type = event
            .notification_type
            .as_deref()
            .ok_or_else(|| ListenerError::Invalid("email event without notificationType".into()))?;

        let (status, detail, event_at) = match notification_type.to_uppercase().as_str() {
            "BOUNCE" => {
                let bounce = event.bounce.clone().unwrap_or_default();
                let detail = format!(
                    "Bounce: {} - {}",
                    bounce.bounce_type.as_deref().unwrap_or("Undetermined"),
                    bounce.bounce_sub_type.as_deref().unwrap_or("Undetermined"),
                );
                (
                    NotificationStatus::Failed,
                    Some(detail),
                    bounce.timestamp.or(event.mail.timestamp),
                )
            }
            "COMPLAINT" => {
                let complaint = event.complaint.clone().unwrap_or_default();
                let detail = format!(
                    "Complaint: {}",
                    complaint
                        .complaint_feedback_type
                        .as_deref()
                        .unwrap_or("unknown"),
                );
                (
                    NotificationStatus::Failed,
                    Some(detail),
                    complaint.timestamp.or(event.mail.timestamp),
                )
            }
            "DELIVERY" => (
                NotificationStatus::Sent,
                None,
                event
                    .delivery
                    .as_ref()
                    .and_then(|delivery| delivery.timestamp)
                    .or(event.mail.timestamp),
            ),
            other => {
                return Err(ListenerError::Invalid(format!(
                    "unhandled email event type {other}"
                )));
            }
        };

        let event_at = event_at.unwrap_or_else(OffsetDateTime::now_utc);
        let affected = self
            .history
            .update_status_if_newer(notification_id, event_at, status, detail.as_deref())
            .await
            .map_err(|err| ListenerError::Retryable(err.to_string()))?;

        if affected == 0 {
            tracing::info!(
                notification_id,
                status = %status,
                "stale or unknown feedback event skipped"
            );
        }

        Ok(())
    }

    /// New contact details: every failed email whose recorded address
    /// differs from the new one is re-sent to it.
    pub async fn apply_contact_details_update(
        &self,
        trainee_id: &str,
        new_email: &str,
    ) -> Result<usize, ListenerError> {
        let failed = self
            .history
            .store()
            .find_all_by_recipient_and_status(trainee_id, NotificationStatus::Failed)
            .await
            .map_err(|err| ListenerError::Retryable(err.to_string()))?;

        let mut resent = 0;
        for row in failed {
            if row.channel != Channel::Email {
                continue;
            }
            if row.contact.as_deref() == Some(new_email) {
                continue;
            }

            self.email
                .resend(&row, new_email)
                .await
                .map_err(|err| ListenerError::Retryable(err.to_string()))?;
            resent += 1;
        }

        tracing::info!(trainee_id, resent, "re-sent failed emails to updated address");

        Ok(resent)
    }
}
