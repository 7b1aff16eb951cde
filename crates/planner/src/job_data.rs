//! Typed payloads for scheduler jobs. The wire form carries a
//! `notificationType` discriminator next to the entity fields; decoding gives
//! the executor a typed view instead of a raw map.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;
use traineehub_shared::{NotificationKind, Placement, ProgrammeMembership};

use crate::error::PlannerError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgrammeJobData {
    pub person_id: String,
    pub tis_id: String,
    pub programme_name: Option<String>,
    pub programme_number: Option<String>,
    pub start_date: Option<Date>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacementJobData {
    pub person_id: String,
    pub tis_id: String,
    pub start_date: Option<Date>,
    pub placement_type: Option<String>,
    pub specialty: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountJobData {
    pub person_id: String,
    pub account_id: String,
}

/// The decoded payload of a fired trigger.
#[derive(Debug, Clone)]
pub enum JobData {
    Programme {
        kind: NotificationKind,
        data: ProgrammeJobData,
    },
    Placement(PlacementJobData),
    Welcome(AccountJobData),
}

const DISCRIMINATOR: &str = "notificationType";

impl JobData {
    pub fn decode(value: &Value) -> Result<Self, PlannerError> {
        let kind = value
            .get(DISCRIMINATOR)
            .and_then(Value::as_str)
            .ok_or_else(|| PlannerError::InvalidInput("job data without notificationType".into()))?;
        let kind = NotificationKind::from_str(kind)
            .map_err(|_| PlannerError::InvalidInput(format!("unknown notification kind {kind}")))?;

        match kind {
            NotificationKind::ProgrammeUpdatedWeek8
            | NotificationKind::ProgrammeUpdatedWeek4
            | NotificationKind::ProgrammeUpdatedWeek1
            | NotificationKind::ProgrammeUpdatedWeek0 => Ok(JobData::Programme {
                kind,
                data: serde_json::from_value(value.clone())?,
            }),
            NotificationKind::PlacementUpdatedWeek12 => {
                Ok(JobData::Placement(serde_json::from_value(value.clone())?))
            }
            NotificationKind::Welcome => {
                Ok(JobData::Welcome(serde_json::from_value(value.clone())?))
            }
            other => Err(PlannerError::InvalidInput(format!(
                "kind {other} is not scheduled as a job"
            ))),
        }
    }
}

fn tag(mut value: Value, kind: NotificationKind) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.insert(DISCRIMINATOR.to_string(), kind.to_string().into());
    }
    value
}

/// Wire payload for one programme milestone job.
pub fn programme_job_data(
    kind: NotificationKind,
    membership: &ProgrammeMembership,
) -> Result<Value, PlannerError> {
    let data = ProgrammeJobData {
        person_id: membership.person_id.clone(),
        tis_id: membership.tis_id.clone(),
        programme_name: membership.programme_name.clone(),
        programme_number: membership.programme_number.clone(),
        start_date: membership.start_date,
    };

    Ok(tag(serde_json::to_value(&data)?, kind))
}

/// Wire payload for the delayed welcome email after account confirmation.
pub fn welcome_job_data(person_id: &str, account_id: &str) -> Result<Value, PlannerError> {
    let data = AccountJobData {
        person_id: person_id.to_string(),
        account_id: account_id.to_string(),
    };

    Ok(tag(serde_json::to_value(&data)?, NotificationKind::Welcome))
}

/// Wire payload for the placement week-twelve job.
pub fn placement_job_data(placement: &Placement) -> Result<Value, PlannerError> {
    let data = PlacementJobData {
        person_id: placement.person_id.clone(),
        tis_id: placement.tis_id.clone(),
        start_date: placement.start_date,
        placement_type: placement.placement_type.clone(),
        specialty: placement.specialty.clone(),
        owner: placement.owner.clone(),
    };

    Ok(tag(
        serde_json::to_value(&data)?,
        NotificationKind::PlacementUpdatedWeek12,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn programme_payload_round_trips_through_the_wire_form() {
        let membership = ProgrammeMembership {
            tis_id: "PM1".to_string(),
            person_id: "P1".to_string(),
            programme_name: Some("Cardiology".to_string()),
            start_date: Some(date!(2025 - 09 - 03)),
            ..Default::default()
        };

        let value =
            programme_job_data(NotificationKind::ProgrammeUpdatedWeek8, &membership).unwrap();
        assert_eq!(value["notificationType"], "PROGRAMME_UPDATED_WEEK_8");

        match JobData::decode(&value).unwrap() {
            JobData::Programme { kind, data } => {
                assert_eq!(kind, NotificationKind::ProgrammeUpdatedWeek8);
                assert_eq!(data.person_id, "P1");
                assert_eq!(data.tis_id, "PM1");
                assert_eq!(data.start_date, Some(date!(2025 - 09 - 03)));
            }
            other => panic!("unexpected job data: {other:?}"),
        }
    }

    #[test]
    fn unknown_discriminator_is_invalid_input() {
        let err = JobData::decode(&serde_json::json!({"notificationType": "NOT_A_KIND"}))
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidInput(_)));

        let err = JobData::decode(&serde_json::json!({"personId": "P1"})).unwrap_err();
        assert!(matches!(err, PlannerError::InvalidInput(_)));
    }

    #[test]
    fn in_app_kinds_are_not_job_payloads() {
        let err = JobData::decode(&serde_json::json!({"notificationType": "DAY_ONE"}))
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidInput(_)));
    }
}
