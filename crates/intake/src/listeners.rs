//! One listener per inbound queue: deserialise, log, delegate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use traineehub_db::queue::Envelope;
use traineehub_history::{Attachment, HistoryService, OutboxBatch};
use traineehub_notify::client::ContactsApi;
use traineehub_notify::{
    ContactsResolver, EmailRequest, EmailSender, InAppSender, LocalOfficeContactType, NotifyError,
    RecipientResolver, DEFAULT_CONTACT,
};
use traineehub_planner::{
    welcome_job_data, LtftEvent, LtftPlanner, PlacementPlanner, ProgrammeMembershipPlanner,
};
use traineehub_scheduler::Scheduler;
use traineehub_shared::{
    NotificationKind, Placement, ProgrammeMembership, Recipient, Reference, ReferenceKind,
};

use crate::events::{
    AccountEvent, CojPublishedEvent, ContactDetailsEvent, EmailEvent, EntityDeletedEvent,
    FormUpdatedEvent, GmcEvent,
};
use crate::feedback::FeedbackService;
use crate::worker::{ListenerError, QueueListener};

impl From<NotifyError> for ListenerError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Template(_)
            | NotifyError::UnknownTemplateVersion(_)
            | NotifyError::InvalidInput(_) => ListenerError::Invalid(err.to_string()),
            other => ListenerError::Retryable(other.to_string()),
        }
    }
}

/// Best-effort recipient lookup: a trainee without any account still gets a
/// FAILED history row recorded by the sender, so a missing recipient resolves
/// to an empty view rather than an error.
async fn resolve_or_empty(
    recipients: &RecipientResolver,
    trainee_id: &str,
) -> Result<Recipient, ListenerError> {
    match recipients.resolve(trainee_id).await {
        Ok(recipient) => Ok(recipient),
        Err(NotifyError::NoAccount(_)) => {
            tracing::warn!(trainee_id, "no contact details found for trainee");
            Ok(Recipient {
                trainee_id: trainee_id.to_string(),
                ..Default::default()
            })
        }
        Err(err) => Err(err.into()),
    }
}

fn recipient_variables(recipient: &Recipient) -> Map<String, serde_json::Value> {
    let mut variables = Map::new();
    if let Some(title) = &recipient.title {
        variables.insert("title".to_string(), title.clone().into());
    }
    if let Some(given_name) = &recipient.given_name {
        variables.insert("givenName".to_string(), given_name.clone().into());
    }
    if let Some(family_name) = &recipient.family_name {
        variables.insert("familyName".to_string(), family_name.clone().into());
    }
    if let Some(gmc_number) = &recipient.gmc_number {
        variables.insert("gmcNumber".to_string(), gmc_number.clone().into());
    }
    variables.insert("isRegistered".to_string(), recipient.is_registered.into());
    variables
}

pub struct ProgrammeMembershipUpdatedListener {
    queue: String,
    planner: Arc<ProgrammeMembershipPlanner>,
}

impl ProgrammeMembershipUpdatedListener {
    pub fn new(queue: impl Into<String>, planner: Arc<ProgrammeMembershipPlanner>) -> Self {
        Self {
            queue: queue.into(),
            planner,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for ProgrammeMembershipUpdatedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let membership: ProgrammeMembership = serde_json::from_str(&envelope.body)?;
        tracing::info!(
            tis_id = %membership.tis_id,
            person_id = %membership.person_id,
            "programme membership updated"
        );
        self.planner.plan(&membership).await?;

        Ok(())
    }
}

pub struct ProgrammeMembershipDeletedListener {
    queue: String,
    planner: Arc<ProgrammeMembershipPlanner>,
}

impl ProgrammeMembershipDeletedListener {
    pub fn new(queue: impl Into<String>, planner: Arc<ProgrammeMembershipPlanner>) -> Self {
        Self {
            queue: queue.into(),
            planner,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for ProgrammeMembershipDeletedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: EntityDeletedEvent = serde_json::from_str(&envelope.body)?;
        tracing::info!(tis_id = %event.tis_id, "programme membership deleted");
        self.planner
            .handle_deleted(&event.person_id, &event.tis_id)
            .await?;

        Ok(())
    }
}

pub struct PlacementUpdatedListener {
    queue: String,
    planner: Arc<PlacementPlanner>,
}

impl PlacementUpdatedListener {
    pub fn new(queue: impl Into<String>, planner: Arc<PlacementPlanner>) -> Self {
        Self {
            queue: queue.into(),
            planner,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for PlacementUpdatedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let placement: Placement = serde_json::from_str(&envelope.body)?;
        tracing::info!(tis_id = %placement.tis_id, "placement updated");
        self.planner.plan(&placement).await?;

        Ok(())
    }
}

pub struct PlacementDeletedListener {
    queue: String,
    planner: Arc<PlacementPlanner>,
}

impl PlacementDeletedListener {
    pub fn new(queue: impl Into<String>, planner: Arc<PlacementPlanner>) -> Self {
        Self {
            queue: queue.into(),
            planner,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for PlacementDeletedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: EntityDeletedEvent = serde_json::from_str(&envelope.body)?;
        tracing::info!(tis_id = %event.tis_id, "placement deleted");
        self.planner
            .handle_deleted(&event.person_id, &event.tis_id)
            .await?;

        Ok(())
    }
}

pub struct LtftUpdatedListener {
    queue: String,
    planner: Arc<LtftPlanner>,
}

impl LtftUpdatedListener {
    pub fn new(queue: impl Into<String>, planner: Arc<LtftPlanner>) -> Self {
        Self {
            queue: queue.into(),
            planner,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for LtftUpdatedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: LtftEvent = serde_json::from_str(&envelope.body)?;
        tracing::info!(
            trainee_id = %event.trainee_id,
            form_ref = event.form_ref.as_deref().unwrap_or(""),
            "ltft application updated"
        );
        self.planner.notify_trainee(&event).await?;

        Ok(())
    }
}

pub struct LtftTpdListener {
    queue: String,
    planner: Arc<LtftPlanner>,
}

impl LtftTpdListener {
    pub fn new(queue: impl Into<String>, planner: Arc<LtftPlanner>) -> Self {
        Self {
            queue: queue.into(),
            planner,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for LtftTpdListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: LtftEvent = serde_json::from_str(&envelope.body)?;
        tracing::info!(
            trainee_id = %event.trainee_id,
            "ltft application updated, checking TPD channel"
        );
        self.planner.notify_tpd(&event).await?;

        Ok(())
    }
}

pub struct EmailEventListener {
    queue: String,
    feedback: Arc<FeedbackService>,
}

impl EmailEventListener {
    pub fn new(queue: impl Into<String>, feedback: Arc<FeedbackService>) -> Self {
        Self {
            queue: queue.into(),
            feedback,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for EmailEventListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: EmailEvent = serde_json::from_str(&envelope.body)?;
        tracing::info!(
            notification_type = event.notification_type.as_deref().unwrap_or(""),
            "provider email event"
        );
        self.feedback.apply_email_event(&event).await
    }
}

pub struct ContactDetailsListener {
    queue: String,
    feedback: Arc<FeedbackService>,
}

impl ContactDetailsListener {
    pub fn new(queue: impl Into<String>, feedback: Arc<FeedbackService>) -> Self {
        Self {
            queue: queue.into(),
            feedback,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for ContactDetailsListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: ContactDetailsEvent = serde_json::from_str(&envelope.body)?;
        if event.trainee_id.is_empty() {
            return Err(ListenerError::Invalid(
                "contact details event without trainee id".into(),
            ));
        }
        let Some(email) = event.email.as_deref().filter(|email| !email.is_empty()) else {
            return Err(ListenerError::Invalid(
                "contact details event without email".into(),
            ));
        };

        tracing::info!(trainee_id = %event.trainee_id, "contact details updated");
        self.feedback
            .apply_contact_details_update(&event.trainee_id, email)
            .await?;

        Ok(())
    }
}

/// A confirmed account schedules the welcome email a few minutes out, so a
/// burst of account events while records merge collapses onto one job.
pub struct AccountConfirmedListener {
    queue: String,
    scheduler: Arc<Scheduler>,
    delay: Duration,
}

impl AccountConfirmedListener {
    pub fn new(queue: impl Into<String>, scheduler: Arc<Scheduler>, delay: Duration) -> Self {
        Self {
            queue: queue.into(),
            scheduler,
            delay,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for AccountConfirmedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: AccountEvent = serde_json::from_str(&envelope.body)?;
        if event.trainee_id.is_empty() {
            return Err(ListenerError::Invalid("account event without trainee id".into()));
        }

        tracing::info!(trainee_id = %event.trainee_id, "account confirmed");
        let account_id = event.account_id.clone().unwrap_or_else(|| event.trainee_id.clone());
        let data = welcome_job_data(&event.trainee_id, &account_id)?;
        self.scheduler
            .schedule(
                &NotificationKind::Welcome.job_id(&event.trainee_id),
                data,
                OffsetDateTime::now_utc() + self.delay,
                Duration::from_secs(24 * 3600),
            )
            .await
            .map_err(|err| ListenerError::Retryable(err.to_string()))?;

        Ok(())
    }
}

/// Account updates carry corrected contact details; they feed the same
/// resend flow as contact-details updates.
pub struct AccountUpdatedListener {
    queue: String,
    feedback: Arc<FeedbackService>,
}

impl AccountUpdatedListener {
    pub fn new(queue: impl Into<String>, feedback: Arc<FeedbackService>) -> Self {
        Self {
            queue: queue.into(),
            feedback,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for AccountUpdatedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: AccountEvent = serde_json::from_str(&envelope.body)?;
        if event.trainee_id.is_empty() {
            return Err(ListenerError::Invalid("account event without trainee id".into()));
        }

        match event.email.as_deref().filter(|email| !email.is_empty()) {
            Some(email) => {
                tracing::info!(trainee_id = %event.trainee_id, "account updated with new email");
                self.feedback
                    .apply_contact_details_update(&event.trainee_id, email)
                    .await?;
            }
            None => {
                tracing::info!(trainee_id = %event.trainee_id, "account updated without email change");
            }
        }

        Ok(())
    }
}

/// A signed Conditions of Joining gets a confirmation email with the signed
/// agreement attached.
pub struct CojPublishedListener {
    queue: String,
    email: Arc<EmailSender>,
    recipients: Arc<RecipientResolver>,
}

impl CojPublishedListener {
    pub fn new(
        queue: impl Into<String>,
        email: Arc<EmailSender>,
        recipients: Arc<RecipientResolver>,
    ) -> Self {
        Self {
            queue: queue.into(),
            email,
            recipients,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for CojPublishedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: CojPublishedEvent = serde_json::from_str(&envelope.body)?;
        if event.trainee_id.is_empty() {
            return Err(ListenerError::Invalid("coj event without trainee id".into()));
        }

        tracing::info!(trainee_id = %event.trainee_id, "conditions of joining published");
        let recipient = resolve_or_empty(&self.recipients, &event.trainee_id).await?;

        let mut variables = recipient_variables(&recipient);
        if let Some(synced_at) = event.synced_at {
            if let Ok(synced_at) = synced_at.format(&Rfc3339) {
                variables.insert("syncedAt".to_string(), synced_at.into());
            }
        }

        let attachments = event
            .document
            .as_ref()
            .map(|document| {
                vec![Attachment {
                    bucket: document.bucket.clone(),
                    key: document.key.clone(),
                }]
            })
            .unwrap_or_default();

        let reference = event
            .programme_membership_id
            .as_ref()
            .map(|id| Reference::new(ReferenceKind::ProgrammeMembership, id));

        self.email
            .send(EmailRequest {
                trainee_id: event.trainee_id.clone(),
                reference,
                kind: NotificationKind::CojConfirmation,
                email: recipient.email,
                variables,
                attachments,
                just_log: false,
            })
            .await?;

        Ok(())
    }
}

pub struct FormUpdatedListener {
    queue: String,
    in_app: Arc<InAppSender>,
}

impl FormUpdatedListener {
    pub fn new(queue: impl Into<String>, in_app: Arc<InAppSender>) -> Self {
        Self {
            queue: queue.into(),
            in_app,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for FormUpdatedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: FormUpdatedEvent = serde_json::from_str(&envelope.body)?;
        let Some(form_ref) = event.form_ref.as_deref().filter(|form_ref| !form_ref.is_empty())
        else {
            return Err(ListenerError::Invalid("form event without form reference".into()));
        };
        if event.trainee_id.is_empty() {
            return Err(ListenerError::Invalid("form event without trainee id".into()));
        }

        tracing::info!(trainee_id = %event.trainee_id, form_ref, "form updated");

        let mut variables = Map::new();
        if let Some(form_name) = &event.form_name {
            variables.insert("formName".to_string(), form_name.clone().into());
        }
        if let Some(state) = &event.lifecycle_state {
            variables.insert("lifecycleState".to_string(), state.clone().into());
        }

        self.in_app
            .create_notification(
                &event.trainee_id,
                Some(Reference::new(ReferenceKind::Form, form_ref)),
                NotificationKind::FormUpdated,
                variables,
                false,
                None,
            )
            .await?;

        Ok(())
    }
}

pub struct GmcUpdatedListener {
    queue: String,
    email: Arc<EmailSender>,
    recipients: Arc<RecipientResolver>,
}

impl GmcUpdatedListener {
    pub fn new(
        queue: impl Into<String>,
        email: Arc<EmailSender>,
        recipients: Arc<RecipientResolver>,
    ) -> Self {
        Self {
            queue: queue.into(),
            email,
            recipients,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for GmcUpdatedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: GmcEvent = serde_json::from_str(&envelope.body)?;
        if event.trainee_id.is_empty() {
            return Err(ListenerError::Invalid("gmc event without trainee id".into()));
        }

        tracing::info!(trainee_id = %event.trainee_id, "gmc details updated");
        let recipient = resolve_or_empty(&self.recipients, &event.trainee_id).await?;

        let mut variables = recipient_variables(&recipient);
        if let Some(gmc_number) = &event.gmc_number {
            variables.insert("gmcNumber".to_string(), gmc_number.clone().into());
        }
        if let Some(gmc_status) = &event.gmc_status {
            variables.insert("gmcStatus".to_string(), gmc_status.clone().into());
        }

        let reference_id = event
            .gmc_number
            .clone()
            .unwrap_or_else(|| event.trainee_id.clone());

        self.email
            .send(EmailRequest {
                trainee_id: event.trainee_id.clone(),
                reference: Some(Reference::new(ReferenceKind::Gmc, reference_id)),
                kind: NotificationKind::GmcUpdated,
                email: recipient.email,
                variables,
                attachments: Vec::new(),
                just_log: false,
            })
            .await?;

        Ok(())
    }
}

/// A rejected GMC update points the trainee at their local-office GMC
/// contact for follow-up.
pub struct GmcRejectedListener {
    queue: String,
    email: Arc<EmailSender>,
    recipients: Arc<RecipientResolver>,
    contacts: Arc<dyn ContactsApi>,
}

impl GmcRejectedListener {
    pub fn new(
        queue: impl Into<String>,
        email: Arc<EmailSender>,
        recipients: Arc<RecipientResolver>,
        contacts: Arc<dyn ContactsApi>,
    ) -> Self {
        Self {
            queue: queue.into(),
            email,
            recipients,
            contacts,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for GmcRejectedListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let event: GmcEvent = serde_json::from_str(&envelope.body)?;
        if event.trainee_id.is_empty() {
            return Err(ListenerError::Invalid("gmc event without trainee id".into()));
        }

        tracing::info!(trainee_id = %event.trainee_id, "gmc update rejected");
        let recipient = resolve_or_empty(&self.recipients, &event.trainee_id).await?;

        let resolver = ContactsResolver::new(self.contacts.clone());
        let deanery = event
            .managing_deanery
            .as_deref()
            .or(event.designated_body.as_deref());
        let contact_list = resolver.contact_list(deanery).await;
        let contact = ContactsResolver::pick(
            &contact_list,
            LocalOfficeContactType::GmcUpdate,
            LocalOfficeContactType::TssSupport,
            DEFAULT_CONTACT,
        );

        let mut variables = recipient_variables(&recipient);
        if let Some(gmc_number) = &event.gmc_number {
            variables.insert("gmcNumber".to_string(), gmc_number.clone().into());
        }
        variables.insert(
            "contactType".to_string(),
            ContactsResolver::classify(&contact).to_string().into(),
        );
        variables.insert("contact".to_string(), contact.into());

        let reference_id = event
            .gmc_number
            .clone()
            .unwrap_or_else(|| event.trainee_id.clone());

        self.email
            .send(EmailRequest {
                trainee_id: event.trainee_id.clone(),
                reference: Some(Reference::new(ReferenceKind::Gmc, reference_id)),
                kind: NotificationKind::GmcRejected,
                email: recipient.email,
                variables,
                attachments: Vec::new(),
                just_log: false,
            })
            .await?;

        Ok(())
    }
}

/// Drains the outbox: each batched id is re-published to the topic.
pub struct OutboxListener {
    queue: String,
    history: HistoryService,
}

impl OutboxListener {
    pub fn new(queue: impl Into<String>, history: HistoryService) -> Self {
        Self {
            queue: queue.into(),
            history,
        }
    }
}

#[async_trait::async_trait]
impl QueueListener for OutboxListener {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        let batch: OutboxBatch = serde_json::from_str(&envelope.body)?;
        tracing::info!(size = batch.notification_ids.len(), "draining outbox batch");

        for id in &batch.notification_ids {
            let found = self
                .history
                .rebroadcast(id)
                .await
                .map_err(|err| ListenerError::Retryable(err.to_string()))?;
            if !found {
                tracing::warn!(id, "outbox id no longer present in history");
            }
        }

        Ok(())
    }
}
