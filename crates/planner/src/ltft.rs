//! Maps LTFT application state changes onto trainee and TPD notifications.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Date, OffsetDateTime};
use traineehub_history::History;
use traineehub_notify::client::ContactsApi;
use traineehub_notify::{
    ContactsResolver, EmailRequest, EmailSender, LocalOfficeContactType, NotifyError,
    RecipientResolver, DEFAULT_CONTACT,
};
use traineehub_shared::{NotificationKind, Reference, ReferenceKind};

use crate::error::PlannerError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftEvent {
    pub trainee_id: String,
    pub form_ref: Option<String>,
    pub form_name: Option<String>,
    pub content: LtftContent,
    pub discussions: LtftDiscussions,
    pub change: LtftChange,
    pub status: LtftStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftContent {
    pub name: Option<String>,
    pub programme_membership: LtftProgrammeMembership,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftProgrammeMembership {
    pub designated_body_code: Option<String>,
    pub managing_deanery: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftDiscussions {
    pub tpd_name: Option<String>,
    pub tpd_email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftChange {
    pub start_date: Option<Date>,
    pub wte: Option<f64>,
    pub cct_date: Option<Date>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftStatus {
    pub current: LtftStatusCurrent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftStatusCurrent {
    pub state: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub detail: LtftStatusDetail,
    pub modified_by: LtftModifiedBy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftStatusDetail {
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtftModifiedBy {
    pub name: Option<String>,
    pub role: Option<String>,
}

/// The nested status unpacked into the view the planner works with.
#[derive(Debug, Clone)]
pub struct LtftUpdate {
    pub trainee_id: String,
    pub form_ref: String,
    pub managing_deanery: Option<String>,
    pub tpd_name: Option<String>,
    pub tpd_email: Option<String>,
    pub state: String,
    pub modified_by_role: Option<String>,
}

pub fn flatten(event: &LtftEvent) -> Result<LtftUpdate, PlannerError> {
    if event.trainee_id.is_empty() {
        return Err(PlannerError::InvalidInput(
            "ltft event without trainee id".to_string(),
        ));
    }

    let form_ref = event
        .form_ref
        .clone()
        .filter(|form_ref| !form_ref.is_empty())
        .ok_or_else(|| PlannerError::InvalidInput("ltft event without form reference".to_string()))?;

    let state = event
        .status
        .current
        .state
        .clone()
        .filter(|state| !state.is_empty())
        .ok_or_else(|| PlannerError::InvalidInput("ltft event without state".to_string()))?;

    Ok(LtftUpdate {
        trainee_id: event.trainee_id.clone(),
        form_ref,
        managing_deanery: event
            .content
            .programme_membership
            .managing_deanery
            .clone(),
        tpd_name: event.discussions.tpd_name.clone(),
        tpd_email: event.discussions.tpd_email.clone(),
        state,
        modified_by_role: event.status.current.modified_by.role.clone(),
    })
}

/// Closed table turning form reason codes into human-readable phrases;
/// unknown codes pass through untouched.
pub fn readable_reason(reason: &str) -> &str {
    match reason {
        "other" => "other reason",
        "changePercentage" => "Change WTE percentage",
        "changeStartDate" => "Change start date",
        "changeOfCircs" => "Change of circumstances",
        other => other,
    }
}

pub fn trainee_notification_kind(update: &LtftUpdate) -> NotificationKind {
    match update.state.to_uppercase().as_str() {
        "APPROVED" => NotificationKind::LtftApproved,
        "SUBMITTED" => NotificationKind::LtftSubmitted,
        "UNSUBMITTED" => {
            if update.modified_by_role.as_deref() == Some("ADMIN") {
                NotificationKind::LtftAdminUnsubmitted
            } else {
                NotificationKind::LtftUnsubmitted
            }
        }
        "WITHDRAWN" => NotificationKind::LtftWithdrawn,
        "REJECTED" => NotificationKind::LtftRejected,
        _ => NotificationKind::LtftUpdated,
    }
}

/// Only approvals and submissions notify the training programme director.
pub fn tpd_notification_kind(update: &LtftUpdate) -> Option<NotificationKind> {
    match update.state.to_uppercase().as_str() {
        "APPROVED" => Some(NotificationKind::LtftApprovedTpd),
        "SUBMITTED" => Some(NotificationKind::LtftSubmittedTpd),
        _ => None,
    }
}

const CONTACT_TYPES: [LocalOfficeContactType; 4] = [
    LocalOfficeContactType::Ltft,
    LocalOfficeContactType::LtftSupport,
    LocalOfficeContactType::SupportedReturnToTraining,
    LocalOfficeContactType::TssSupport,
];

pub struct LtftPlanner {
    email: Arc<EmailSender>,
    recipients: Arc<RecipientResolver>,
    contacts: Arc<dyn ContactsApi>,
}

impl LtftPlanner {
    pub fn new(
        email: Arc<EmailSender>,
        recipients: Arc<RecipientResolver>,
        contacts: Arc<dyn ContactsApi>,
    ) -> Self {
        Self {
            email,
            recipients,
            contacts,
        }
    }

    /// Routes one LTFT update to the trainee, enriched with the managing
    /// deanery's support contacts.
    pub async fn notify_trainee(&self, event: &LtftEvent) -> Result<History, PlannerError> {
        let update = flatten(event)?;
        let kind = trainee_notification_kind(&update);

        let resolver = ContactsResolver::new(self.contacts.clone());
        let contact_list = resolver
            .contact_list(update.managing_deanery.as_deref())
            .await;

        let mut contacts = Map::new();
        for contact_type in CONTACT_TYPES {
            let contact = ContactsResolver::pick(
                &contact_list,
                contact_type,
                LocalOfficeContactType::TssSupport,
                DEFAULT_CONTACT,
            );
            let mut entry = Map::new();
            entry.insert(
                "classifiedType".to_string(),
                ContactsResolver::classify(&contact).to_string().into(),
            );
            entry.insert("contact".to_string(), contact.into());
            contacts.insert(contact_type.to_string(), entry.into());
        }

        let email = match self.recipients.resolve(&update.trainee_id).await {
            Ok(recipient) => recipient.email,
            Err(NotifyError::NoAccount(trainee_id)) => {
                tracing::warn!(trainee_id, "ltft update for trainee without contact details");
                None
            }
            Err(err) => return Err(err.into()),
        };

        let mut variables = Map::new();
        variables.insert("var".to_string(), event_with_readable_reason(event)?);
        variables.insert("contacts".to_string(), contacts.into());

        let history = self
            .email
            .send(EmailRequest {
                trainee_id: update.trainee_id.clone(),
                reference: Some(Reference::new(ReferenceKind::Ltft, &update.form_ref)),
                kind,
                email,
                variables,
                attachments: Vec::new(),
                just_log: false,
            })
            .await?;

        Ok(history)
    }

    /// Secondary channel: approvals and submissions also notify the TPD
    /// named on the application's discussions.
    pub async fn notify_tpd(&self, event: &LtftEvent) -> Result<Option<History>, PlannerError> {
        let update = flatten(event)?;
        let Some(kind) = tpd_notification_kind(&update) else {
            tracing::debug!(state = %update.state, "ltft state does not notify the TPD");
            return Ok(None);
        };

        let mut variables = Map::new();
        variables.insert("var".to_string(), event_with_readable_reason(event)?);
        if let Some(tpd_name) = &update.tpd_name {
            variables.insert("tpdName".to_string(), tpd_name.clone().into());
        }

        // The template addresses the TPD but names the trainee.
        match self.recipients.resolve(&update.trainee_id).await {
            Ok(recipient) => {
                if let Some(given_name) = recipient.given_name {
                    variables.insert("givenName".to_string(), given_name.into());
                }
                if let Some(family_name) = recipient.family_name {
                    variables.insert("familyName".to_string(), family_name.into());
                }
            }
            Err(err) => {
                tracing::warn!(trainee_id = %update.trainee_id, err = %err, "trainee details unavailable for TPD notification");
            }
        }

        let history = self
            .email
            .send(EmailRequest {
                trainee_id: update.trainee_id.clone(),
                reference: Some(Reference::new(ReferenceKind::Ltft, &update.form_ref)),
                kind,
                email: update.tpd_email.clone(),
                variables,
                attachments: Vec::new(),
                just_log: false,
            })
            .await?;

        Ok(Some(history))
    }
}

fn event_with_readable_reason(event: &LtftEvent) -> Result<Value, PlannerError> {
    let mut value = serde_json::to_value(event)?;
    if let Some(reason) = value.pointer_mut("/status/current/detail/reason") {
        if let Some(code) = reason.as_str() {
            *reason = readable_reason(code).into();
        }
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(state: &str, role: Option<&str>) -> LtftUpdate {
        LtftUpdate {
            trainee_id: "P1".to_string(),
            form_ref: "F7".to_string(),
            managing_deanery: None,
            tpd_name: None,
            tpd_email: None,
            state: state.to_string(),
            modified_by_role: role.map(ToString::to_string),
        }
    }

    #[test]
    fn states_map_onto_notification_kinds() {
        assert_eq!(
            trainee_notification_kind(&update("APPROVED", None)),
            NotificationKind::LtftApproved
        );
        assert_eq!(
            trainee_notification_kind(&update("SUBMITTED", None)),
            NotificationKind::LtftSubmitted
        );
        assert_eq!(
            trainee_notification_kind(&update("WITHDRAWN", None)),
            NotificationKind::LtftWithdrawn
        );
        assert_eq!(
            trainee_notification_kind(&update("REJECTED", None)),
            NotificationKind::LtftRejected
        );
        assert_eq!(
            trainee_notification_kind(&update("SOMETHING_NEW", None)),
            NotificationKind::LtftUpdated
        );
    }

    #[test]
    fn unsubmitted_splits_on_the_modifying_role() {
        assert_eq!(
            trainee_notification_kind(&update("UNSUBMITTED", Some("ADMIN"))),
            NotificationKind::LtftAdminUnsubmitted
        );
        assert_eq!(
            trainee_notification_kind(&update("UNSUBMITTED", Some("TRAINEE"))),
            NotificationKind::LtftUnsubmitted
        );
        assert_eq!(
            trainee_notification_kind(&update("UNSUBMITTED", None)),
            NotificationKind::LtftUnsubmitted
        );
    }

    #[test]
    fn only_approval_and_submission_notify_the_tpd() {
        assert_eq!(
            tpd_notification_kind(&update("APPROVED", None)),
            Some(NotificationKind::LtftApprovedTpd)
        );
        assert_eq!(
            tpd_notification_kind(&update("SUBMITTED", None)),
            Some(NotificationKind::LtftSubmittedTpd)
        );
        assert_eq!(tpd_notification_kind(&update("WITHDRAWN", None)), None);
        assert_eq!(tpd_notification_kind(&update("UNSUBMITTED", None)), None);
    }

    #[test]
    fn reason_codes_become_readable_phrases() {
        assert_eq!(readable_reason("other"), "other reason");
        assert_eq!(readable_reason("changePercentage"), "Change WTE percentage");
        assert_eq!(readable_reason("changeStartDate"), "Change start date");
        assert_eq!(readable_reason("changeOfCircs"), "Change of circumstances");
        assert_eq!(readable_reason("somethingElse"), "somethingElse");
    }

    #[test]
    fn flatten_requires_trainee_form_and_state() {
        let mut event = LtftEvent {
            trainee_id: "P1".to_string(),
            form_ref: Some("F7".to_string()),
            ..Default::default()
        };
        event.status.current.state = Some("SUBMITTED".to_string());
        assert!(flatten(&event).is_ok());

        let missing_state = LtftEvent {
            trainee_id: "P1".to_string(),
            form_ref: Some("F7".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            flatten(&missing_state),
            Err(PlannerError::InvalidInput(_))
        ));

        let missing_form = LtftEvent {
            trainee_id: "P1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            flatten(&missing_form),
            Err(PlannerError::InvalidInput(_))
        ));
    }

    #[test]
    fn event_reason_is_replaced_in_the_template_variable() {
        let mut event = LtftEvent {
            trainee_id: "P1".to_string(),
            form_ref: Some("F7".to_string()),
            ..Default::default()
        };
        event.status.current.detail.reason = Some("changeOfCircs".to_string());

        let value = event_with_readable_reason(&event).unwrap();
        assert_eq!(
            value.pointer("/status/current/detail/reason").unwrap(),
            "Change of circumstances"
        );
    }
}
