use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use traineehub_shared::{Channel, NotificationKind, NotificationStatus, Reference};

/// A stored file attached to an outbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub bucket: String,
    pub key: String,
}

/// The template a notification was (or will be) rendered from, together with
/// the variable map captured at planning time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub name: String,
    pub version: String,
    pub variables: Map<String, Value>,
}

impl TemplateInfo {
    pub fn new(kind: NotificationKind, version: impl Into<String>) -> Self {
        Self {
            name: kind.as_path_segment(),
            version: version.into(),
            variables: Map::new(),
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }
}

/// Durable record of a scheduled, sent, failed or read notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub id: String,
    pub trainee_id: String,
    pub reference: Option<Reference>,
    pub kind: NotificationKind,
    pub channel: Channel,
    pub contact: Option<String>,
    pub template: TemplateInfo,
    pub attachments: Vec<Attachment>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    pub status: NotificationStatus,
    pub status_detail: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub latest_status_event_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_retry: Option<OffsetDateTime>,
}

impl History {
    /// A fresh row with a new monotonic id and no status detail.
    pub fn new(
        trainee_id: impl Into<String>,
        reference: Option<Reference>,
        kind: NotificationKind,
        channel: Channel,
        template: TemplateInfo,
        status: NotificationStatus,
        sent_at: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            trainee_id: trainee_id.into(),
            reference,
            kind,
            channel,
            contact: None,
            template,
            attachments: Vec::new(),
            sent_at,
            read_at: None,
            status,
            status_detail: None,
            latest_status_event_at: None,
            last_retry: None,
        }
    }

    pub fn with_contact(mut self, contact: Option<String>) -> Self {
        self.contact = contact;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_status_detail(mut self, detail: impl Into<String>) -> Self {
        self.status_detail = Some(detail.into());
        self
    }
}

/// Compact view of a history change published to the downstream topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBroadcastView {
    pub id: String,
    pub trainee_id: String,
    pub ref_kind: Option<String>,
    pub ref_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: String,
    pub contact: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    pub status: String,
    pub status_detail: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_retry: Option<OffsetDateTime>,
}

impl From<&History> for HistoryBroadcastView {
    fn from(history: &History) -> Self {
        Self {
            id: history.id.clone(),
            trainee_id: history.trainee_id.clone(),
            ref_kind: history.reference.as_ref().map(|r| r.kind.to_string()),
            ref_id: history.reference.as_ref().map(|r| r.id.clone()),
            kind: history.kind.to_string(),
            channel: history.channel.to_string(),
            contact: history.contact.clone(),
            sent_at: history.sent_at,
            read_at: history.read_at,
            status: history.status.to_string(),
            status_detail: history.status_detail.clone(),
            last_retry: history.last_retry,
        }
    }
}

/// Marker published to the topic when a row is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDeletedView {
    pub id: String,
    pub deleted: bool,
}

impl HistoryDeletedView {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deleted: true,
        }
    }
}
