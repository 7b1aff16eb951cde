//! The callback fired when a scheduled trigger comes due: enrich the
//! variables with recipient details, then hand the message to the sender.

use std::sync::Arc;

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use traineehub_notify::{EmailRequest, EmailSender, NotifyError, RecipientResolver};
use traineehub_scheduler::{JobHandler, SchedulerError};
use traineehub_shared::{NotificationKind, Recipient, Reference, ReferenceKind};

use crate::job_data::{JobData, PlacementJobData};

/// Pilot gate for placement notifications. The rollout completed, so every
/// placement is in the pilot; the hook stays as the policy seam.
pub fn is_in_pilot(_placement: &PlacementJobData) -> bool {
    true
}

/// Inserts recipient details without overwriting values the planner already
/// chose.
fn put_if_absent(variables: &mut Map<String, Value>, recipient: &Recipient) {
    let entries: [(&str, Option<Value>); 5] = [
        ("title", recipient.title.clone().map(Value::from)),
        ("givenName", recipient.given_name.clone().map(Value::from)),
        ("familyName", recipient.family_name.clone().map(Value::from)),
        ("gmcNumber", recipient.gmc_number.clone().map(Value::from)),
        ("isRegistered", Some(Value::Bool(recipient.is_registered))),
    ];

    for (key, value) in entries {
        if let Some(value) = value {
            variables.entry(key.to_string()).or_insert(value);
        }
    }
}

pub struct NotificationExecutor {
    recipients: Arc<RecipientResolver>,
    email: Arc<EmailSender>,
}

impl NotificationExecutor {
    pub fn new(recipients: Arc<RecipientResolver>, email: Arc<EmailSender>) -> Self {
        Self { recipients, email }
    }
}

#[async_trait::async_trait]
impl JobHandler for NotificationExecutor {
    async fn execute(&self, job_id: &str, data: &Value) -> Result<String, SchedulerError> {
        let job = JobData::decode(data).map_err(|err| SchedulerError::Execution(err.to_string()))?;

        let (trainee_id, kind, reference, mut variables, just_log) = match job {
            JobData::Programme { kind, data } => {
                let mut variables = Map::new();
                if let Some(name) = &data.programme_name {
                    variables.insert("programmeName".to_string(), name.clone().into());
                }
                if let Some(number) = &data.programme_number {
                    variables.insert("programmeNumber".to_string(), number.clone().into());
                }
                if let Some(start_date) = data.start_date {
                    variables.insert("startDate".to_string(), start_date.to_string().into());
                }
                (
                    data.person_id,
                    kind,
                    Reference::new(ReferenceKind::ProgrammeMembership, data.tis_id),
                    variables,
                    false,
                )
            }
            JobData::Welcome(data) => (
                data.person_id,
                NotificationKind::Welcome,
                Reference::new(ReferenceKind::Account, data.account_id),
                Map::new(),
                false,
            ),
            JobData::Placement(data) => {
                let just_log = !is_in_pilot(&data);
                let mut variables = Map::new();
                if let Some(start_date) = data.start_date {
                    variables.insert("startDate".to_string(), start_date.to_string().into());
                }
                if let Some(specialty) = &data.specialty {
                    variables.insert("specialty".to_string(), specialty.clone().into());
                }
                if let Some(placement_type) = &data.placement_type {
                    variables.insert("placementType".to_string(), placement_type.clone().into());
                }
                if let Some(owner) = &data.owner {
                    variables.insert("localOfficeName".to_string(), owner.clone().into());
                }
                (
                    data.person_id,
                    NotificationKind::PlacementUpdatedWeek12,
                    Reference::new(ReferenceKind::Placement, data.tis_id),
                    variables,
                    just_log,
                )
            }
        };

        let recipient = match self.recipients.resolve(&trainee_id).await {
            Ok(recipient) => recipient,
            Err(NotifyError::NoAccount(_)) => {
                tracing::warn!(job_id, trainee_id, "no contact details for scheduled send");
                return Ok("no-contact".to_string());
            }
            Err(err) => return Err(SchedulerError::Execution(err.to_string())),
        };

        put_if_absent(&mut variables, &recipient);

        self.email
            .send(EmailRequest {
                trainee_id,
                reference: Some(reference),
                kind,
                email: recipient.email,
                variables,
                attachments: Vec::new(),
                just_log,
            })
            .await
            .map_err(|err| SchedulerError::Execution(err.to_string()))?;

        let now = OffsetDateTime::now_utc();
        Ok(format!(
            "sent {}",
            now.format(&Rfc3339).unwrap_or_else(|_| now.to_string())
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_details_do_not_overwrite_planner_variables() {
        let mut variables = Map::new();
        variables.insert("givenName".to_string(), "FromPlanner".into());

        let recipient = Recipient {
            trainee_id: "P1".to_string(),
            email: Some("jan@example.com".to_string()),
            title: Some("Dr".to_string()),
            given_name: Some("Jan".to_string()),
            family_name: Some("Kowalski".to_string()),
            gmc_number: None,
            is_registered: true,
        };
        put_if_absent(&mut variables, &recipient);

        assert_eq!(variables["givenName"], "FromPlanner");
        assert_eq!(variables["familyName"], "Kowalski");
        assert_eq!(variables["isRegistered"], Value::Bool(true));
        assert!(!variables.contains_key("gmcNumber"));
    }

    #[test]
    fn every_placement_is_in_the_pilot() {
        assert!(is_in_pilot(&PlacementJobData::default()));
    }
}
