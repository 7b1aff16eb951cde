//! Inbound payloads that are not owned by a planner. All DTOs tolerate
//! unknown and missing fields.

use serde::Deserialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityDeletedEvent {
    pub tis_id: String,
    pub person_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountEvent {
    pub trainee_id: String,
    pub account_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactDetailsEvent {
    pub trainee_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CojPublishedEvent {
    pub trainee_id: String,
    pub programme_membership_id: Option<String>,
    pub document: Option<CojDocument>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CojDocument {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormUpdatedEvent {
    pub trainee_id: String,
    pub form_ref: Option<String>,
    pub form_name: Option<String>,
    pub lifecycle_state: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GmcEvent {
    pub trainee_id: String,
    pub gmc_number: Option<String>,
    pub gmc_status: Option<String>,
    pub designated_body: Option<String>,
    pub managing_deanery: Option<String>,
}

/// Provider feedback payload in the SES shape: a `notificationType`
/// discriminator, the original mail headers, and one sub-object per type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailEvent {
    pub notification_type: Option<String>,
    pub mail: Mail,
    pub bounce: Option<Bounce>,
    pub complaint: Option<Complaint>,
    pub delivery: Option<Delivery>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mail {
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub headers: Vec<MailHeader>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bounce {
    pub bounce_type: Option<String>,
    pub bounce_sub_type: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Complaint {
    pub complaint_feedback_type: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Delivery {
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl EmailEvent {
    /// The history id embedded as the `NotificationId` header at send time.
    pub fn notification_id(&self) -> Option<&str> {
        self.mail
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case("NotificationId"))
            .map(|header| header.value.as_str())
    }
}
