//! Outbound email: renders, attaches, sends and records history.

use std::sync::Arc;

use lettre::message::header::ContentType;
use lettre::message::{Body, MultiPart, SinglePart};
use lettre::Message;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use traineehub_history::{Attachment, History, HistoryService, TemplateInfo};
use traineehub_shared::{Channel, NotificationKind, NotificationStatus, Reference};

use crate::error::NotifyError;
use crate::object_store::{ObjectStore, StoredObject};
use crate::template::{TemplateRenderer, TemplateVersions};
use crate::transport::{MailTransport, NotificationIdHeader};

pub const NO_EMAIL_DETAIL: &str = "No email address available.";

/// MD5 of the recipient address, exposed to templates as `hashedEmail`.
/// A missing address hashes to thirty-two zeros.
pub fn hashed_email(email: Option<&str>) -> String {
    match email {
        Some(email) if !email.is_empty() => format!("{:x}", md5::compute(email)),
        _ => "0".repeat(32),
    }
}

pub struct EmailRequest {
    pub trainee_id: String,
    pub reference: Option<Reference>,
    pub kind: NotificationKind,
    pub email: Option<String>,
    pub variables: Map<String, Value>,
    pub attachments: Vec<Attachment>,
    pub just_log: bool,
}

pub struct EmailSender {
    history: HistoryService,
    renderer: Arc<TemplateRenderer>,
    versions: TemplateVersions,
    transport: Arc<dyn MailTransport>,
    object_store: Arc<dyn ObjectStore>,
    from_address: String,
    app_domain: String,
    enabled: bool,
}

impl EmailSender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        history: HistoryService,
        renderer: Arc<TemplateRenderer>,
        versions: TemplateVersions,
        transport: Arc<dyn MailTransport>,
        object_store: Arc<dyn ObjectStore>,
        from_address: impl Into<String>,
        app_domain: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self {
            history,
            renderer,
            versions,
            transport,
            object_store,
            from_address: from_address.into(),
            app_domain: app_domain.into(),
            enabled,
        }
    }

    /// Sends one templated email and records the outcome.
    ///
    /// A missing recipient address is terminal for this delivery: it records
    /// a FAILED row rather than raising, so reporting still sees the attempt.
    /// Transport errors raise so the inbound event is retried.
    pub async fn send(&self, request: EmailRequest) -> Result<History, NotifyError> {
        let version = self
            .versions
            .version_of(request.kind, Channel::Email)?
            .to_string();
        let now = OffsetDateTime::now_utc();

        let mut variables = request.variables;
        variables.insert(
            "hashedEmail".to_string(),
            hashed_email(request.email.as_deref()).into(),
        );
        variables
            .entry("domain".to_string())
            .or_insert_with(|| self.app_domain.clone().into());

        let mut history = History::new(
            request.trainee_id.clone(),
            request.reference.clone(),
            request.kind,
            Channel::Email,
            TemplateInfo::new(request.kind, version.clone()).with_variables(variables.clone()),
            NotificationStatus::Pending,
            Some(now),
        )
        .with_contact(request.email.clone())
        .with_attachments(request.attachments.clone());

        // A scheduled row for the same (trainee, reference, kind) is replaced
        // in place: the new row reuses its id.
        if let Some(reference) = &request.reference {
            let scheduled = self
                .history
                .store()
                .find_scheduled(&request.trainee_id, Channel::Email, reference, request.kind)
                .await?;
            if let Some(existing) = scheduled.first() {
                history.id = existing.id.clone();
            }
        }

        let Some(to) = request.email.as_deref().filter(|e| !e.is_empty()) else {
            history.status = NotificationStatus::Failed;
            history.status_detail = Some(NO_EMAIL_DETAIL.to_string());
            self.history.save(&history).await?;
            self.collect_stale_scheduled(&history).await;
            tracing::warn!(
                trainee_id = %request.trainee_id,
                kind = %request.kind,
                "no email address available, recorded failed delivery"
            );
            return Ok(history);
        };

        let path = TemplateRenderer::template_path(Channel::Email, request.kind, &version);
        let subject = self.renderer.process(&path, &["subject"], &variables)?;
        let body = self.renderer.process(&path, &["content"], &variables)?;

        let mut objects = Vec::with_capacity(request.attachments.len());
        for attachment in &request.attachments {
            objects.push(
                self.object_store
                    .download(&attachment.bucket, &attachment.key)
                    .await?,
            );
        }

        let message = self.build_message(&history.id, to, &subject, body, objects)?;

        if request.just_log {
            tracing::info!(
                trainee_id = %request.trainee_id,
                kind = %request.kind,
                subject = %subject,
                "log-only pathway requested for email"
            );
        }

        if self.enabled {
            self.transport.send(&message)?;
        } else {
            tracing::info!(
                trainee_id = %request.trainee_id,
                kind = %request.kind,
                "email channel disabled, recording history without transport"
            );
        }

        self.history.save(&history).await?;
        self.collect_stale_scheduled(&history).await;

        Ok(history)
    }

    /// Re-sends a stored notification to a corrected address. The new row
    /// keeps the original id so the audit trail stays one entry per dispatch.
    pub async fn resend(&self, original: &History, new_email: &str) -> Result<History, NotifyError> {
        let mut variables = original.template.variables.clone();
        if let Some(sent_at) = original.sent_at {
            if let Ok(sent_at) = sent_at.format(&Rfc3339) {
                variables.insert("originallySentOn".to_string(), sent_at.into());
            }
        }
        variables.insert(
            "hashedEmail".to_string(),
            hashed_email(Some(new_email)).into(),
        );
        variables
            .entry("domain".to_string())
            .or_insert_with(|| self.app_domain.clone().into());

        let path = format!(
            "{}/{}/{}",
            Channel::Email.as_path_segment(),
            original.template.name,
            original.template.version
        );
        let subject = self.renderer.process(&path, &["subject"], &variables)?;
        let body = self.renderer.process(&path, &["content"], &variables)?;

        let mut objects = Vec::with_capacity(original.attachments.len());
        for attachment in &original.attachments {
            objects.push(
                self.object_store
                    .download(&attachment.bucket, &attachment.key)
                    .await?,
            );
        }

        let message = self.build_message(&original.id, new_email, &subject, body, objects)?;
        if self.enabled {
            self.transport.send(&message)?;
        }

        let mut history = original.clone();
        history.contact = Some(new_email.to_string());
        history.status = NotificationStatus::Pending;
        history.status_detail = None;
        history.template.variables = variables;
        history.last_retry = Some(OffsetDateTime::now_utc());
        self.history.save(&history).await?;

        Ok(history)
    }

    async fn collect_stale_scheduled(&self, history: &History) {
        let Some(reference) = &history.reference else {
            return;
        };

        match self
            .history
            .store()
            .delete_scheduled_except(&history.trainee_id, reference, history.kind, &history.id)
            .await
        {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(
                    trainee_id = %history.trainee_id,
                    kind = %history.kind,
                    removed,
                    "garbage-collected stale scheduled rows"
                );
            }
            Err(err) => {
                tracing::warn!(
                    trainee_id = %history.trainee_id,
                    kind = %history.kind,
                    err = %err,
                    "failed to garbage-collect stale scheduled rows"
                );
            }
        }
    }

    fn build_message(
        &self,
        notification_id: &str,
        to: &str,
        subject: &str,
        body: String,
        attachments: Vec<StoredObject>,
    ) -> Result<Message, NotifyError> {
        let builder = Message::builder()
            .from(self.from_address.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(NotificationIdHeader(notification_id.to_string()));

        let mut multipart = MultiPart::mixed().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(body),
        );

        for object in attachments {
            let content_type = ContentType::parse(&object.content_type)
                .map_err(|err| NotifyError::Transport(err.to_string()))?;
            multipart = multipart.singlepart(
                lettre::message::Attachment::new(object.filename)
                    .body(Body::new(object.bytes), content_type),
            );
        }

        Ok(builder.multipart(multipart)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_email_is_hex_and_stable() {
        let hash = hashed_email(Some("trainee@example.com"));
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hashed_email(Some("trainee@example.com")));
        assert_ne!(hash, hashed_email(Some("other@example.com")));
    }

    #[test]
    fn missing_email_hashes_to_zeros() {
        assert_eq!(hashed_email(None), "0".repeat(32));
        assert_eq!(hashed_email(Some("")), "0".repeat(32));
    }
}
