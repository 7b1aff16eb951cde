use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// Projection of the trainee profile used at enrichment time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraineeProfile {
    pub email: Option<String>,
    pub title: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub gmc_number: Option<String>,
}

/// An account held in the identity directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAccountDetails {
    pub user_id: String,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

/// Merged recipient view: directory account + profile record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub trainee_id: String,
    pub email: Option<String>,
    pub title: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub gmc_number: Option<String>,
    pub is_registered: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Curriculum {
    #[serde(alias = "subType")]
    pub curriculum_sub_type: Option<String>,
    #[serde(alias = "specialty")]
    pub curriculum_specialty: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionsOfJoining {
    #[serde(with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
}

/// Full programme-membership snapshot carried on inbound events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgrammeMembership {
    pub tis_id: String,
    pub person_id: String,
    pub programme_name: Option<String>,
    pub programme_number: Option<String>,
    pub start_date: Option<Date>,
    pub managing_deanery: Option<String>,
    pub designated_body: Option<String>,
    pub responsible_officer: Option<String>,
    pub curricula: Option<Vec<Curriculum>>,
    pub conditions_of_joining: Option<ConditionsOfJoining>,
}

/// Placement snapshot carried on inbound events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Placement {
    pub tis_id: String,
    pub person_id: String,
    pub start_date: Option<Date>,
    pub placement_type: Option<String>,
    pub specialty: Option<String>,
    pub owner: Option<String>,
}

/// Per-trainee checklist item from the actions service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: Option<String>,
    pub due_by: Option<Date>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed: Option<OffsetDateTime>,
}

impl Action {
    pub const SIGN_COJ: &'static str = "SIGN_COJ";
    pub const SIGN_FORM_R_PART_A: &'static str = "SIGN_FORM_R_PART_A";
    pub const SIGN_FORM_R_PART_B: &'static str = "SIGN_FORM_R_PART_B";
    pub const REGISTER_TSS: &'static str = "REGISTER_TSS";

    pub fn is_complete(&self) -> bool {
        self.completed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programme_membership_tolerates_unknown_and_missing_fields() {
        let json = r#"{
            "tisId": "PM1",
            "personId": "P1",
            "startDate": "2025-09-03",
            "curricula": [{"curriculumSubType": "MEDICAL_CURRICULUM", "somethingNew": 1}],
            "brandNewField": {"nested": true}
        }"#;
        let pm: ProgrammeMembership = serde_json::from_str(json).unwrap();
        assert_eq!(pm.tis_id, "PM1");
        assert_eq!(pm.person_id, "P1");
        assert!(pm.programme_name.is_none());
        let curricula = pm.curricula.unwrap();
        assert_eq!(
            curricula[0].curriculum_sub_type.as_deref(),
            Some("MEDICAL_CURRICULUM")
        );
        assert!(curricula[0].curriculum_specialty.is_none());
    }

    #[test]
    fn action_completion() {
        let json = r#"{"type": "SIGN_COJ", "completed": "2025-02-01T09:30:00Z"}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.action_type.as_deref(), Some(Action::SIGN_COJ));
        assert!(action.is_complete());

        let pending: Action = serde_json::from_str(r#"{"type": "REGISTER_TSS"}"#).unwrap();
        assert!(!pending.is_complete());
    }
}
