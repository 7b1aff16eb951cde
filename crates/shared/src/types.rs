use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Delivery channel of a notification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    InApp,
}

impl Channel {
    /// Directory segment used when resolving template paths.
    pub fn as_path_segment(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::InApp => "in-app",
        }
    }
}

/// Lifecycle status of a history row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Scheduled,
    Pending,
    Sent,
    Failed,
    Read,
    Archived,
    Unread,
    Deleted,
}

impl NotificationStatus {
    /// Statuses a row on the given channel is allowed to hold.
    pub fn is_valid_for(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => matches!(
                self,
                NotificationStatus::Scheduled
                    | NotificationStatus::Pending
                    | NotificationStatus::Sent
                    | NotificationStatus::Failed
            ),
            Channel::InApp => matches!(
                self,
                NotificationStatus::Scheduled
                    | NotificationStatus::Unread
                    | NotificationStatus::Read
                    | NotificationStatus::Archived
            ),
        }
    }

    /// A dispatch that reached one of these states must never be repeated.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, NotificationStatus::Sent | NotificationStatus::Read)
    }
}

/// The kind of business entity a notification refers back to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    ProgrammeMembership,
    Placement,
    Ltft,
    Form,
    Gmc,
    Account,
}

/// Typed pointer to the entity that triggered a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: String,
}

impl Reference {
    pub fn new(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Every notification the orchestrator knows how to produce.
///
/// The legacy values at the bottom are no longer planned; they exist so repair
/// jobs can match and rewrite rows created by earlier releases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    #[strum(serialize = "PROGRAMME_UPDATED_WEEK_8")]
    #[serde(rename = "PROGRAMME_UPDATED_WEEK_8")]
    ProgrammeUpdatedWeek8,
    #[strum(serialize = "PROGRAMME_UPDATED_WEEK_4")]
    #[serde(rename = "PROGRAMME_UPDATED_WEEK_4")]
    ProgrammeUpdatedWeek4,
    #[strum(serialize = "PROGRAMME_UPDATED_WEEK_1")]
    #[serde(rename = "PROGRAMME_UPDATED_WEEK_1")]
    ProgrammeUpdatedWeek1,
    #[strum(serialize = "PROGRAMME_UPDATED_WEEK_0")]
    #[serde(rename = "PROGRAMME_UPDATED_WEEK_0")]
    ProgrammeUpdatedWeek0,
    EPortfolio,
    IndemnityInsurance,
    Ltft,
    Deferral,
    Sponsorship,
    DayOne,
    #[strum(serialize = "PLACEMENT_UPDATED_WEEK_12")]
    #[serde(rename = "PLACEMENT_UPDATED_WEEK_12")]
    PlacementUpdatedWeek12,
    LtftApproved,
    LtftApprovedTpd,
    LtftSubmitted,
    LtftSubmittedTpd,
    LtftUnsubmitted,
    LtftAdminUnsubmitted,
    LtftWithdrawn,
    LtftRejected,
    LtftUpdated,
    Welcome,
    CojConfirmation,
    GmcUpdated,
    GmcRejected,
    FormUpdated,
    ProgrammeCreated,
    ProgrammeDayOne,
    LtftSubmittedTrainee,
}

impl NotificationKind {
    /// The milestone kinds anchored to a programme start date, most distant
    /// first.
    pub fn programme_milestones() -> [NotificationKind; 4] {
        [
            NotificationKind::ProgrammeUpdatedWeek8,
            NotificationKind::ProgrammeUpdatedWeek4,
            NotificationKind::ProgrammeUpdatedWeek1,
            NotificationKind::ProgrammeUpdatedWeek0,
        ]
    }

    /// The in-app kinds planned alongside a programme membership.
    pub fn in_app_programme_kinds() -> [NotificationKind; 6] {
        [
            NotificationKind::EPortfolio,
            NotificationKind::IndemnityInsurance,
            NotificationKind::Ltft,
            NotificationKind::Deferral,
            NotificationKind::Sponsorship,
            NotificationKind::DayOne,
        ]
    }

    /// Days before the anchor date at which a time-anchored kind fires.
    pub fn days_before_start(&self) -> Option<i64> {
        match self {
            NotificationKind::ProgrammeUpdatedWeek8 => Some(56),
            NotificationKind::ProgrammeUpdatedWeek4 => Some(28),
            NotificationKind::ProgrammeUpdatedWeek1 => Some(7),
            NotificationKind::ProgrammeUpdatedWeek0 => Some(0),
            NotificationKind::PlacementUpdatedWeek12 => Some(84),
            _ => None,
        }
    }

    /// Scheduler job key for a time-anchored kind and its reference entity.
    pub fn job_id(&self, entity_id: &str) -> String {
        format!("{self}-{entity_id}")
    }

    /// Template directory segment, e.g. `programme-updated-week-8`.
    pub fn as_path_segment(&self) -> String {
        self.to_string().to_lowercase().replace('_', "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn milestone_kinds_round_trip_their_wire_names() {
        for (kind, name) in [
            (NotificationKind::ProgrammeUpdatedWeek8, "PROGRAMME_UPDATED_WEEK_8"),
            (NotificationKind::ProgrammeUpdatedWeek0, "PROGRAMME_UPDATED_WEEK_0"),
            (NotificationKind::PlacementUpdatedWeek12, "PLACEMENT_UPDATED_WEEK_12"),
            (NotificationKind::LtftApprovedTpd, "LTFT_APPROVED_TPD"),
            (NotificationKind::EPortfolio, "E_PORTFOLIO"),
            (NotificationKind::DayOne, "DAY_ONE"),
        ] {
            assert_eq!(kind.to_string(), name);
            assert_eq!(NotificationKind::from_str(name).unwrap(), kind);
        }
    }

    #[test]
    fn serde_names_match_display_names() {
        let json = serde_json::to_string(&NotificationKind::ProgrammeUpdatedWeek4).unwrap();
        assert_eq!(json, "\"PROGRAMME_UPDATED_WEEK_4\"");
        let kind: NotificationKind = serde_json::from_str("\"LTFT_SUBMITTED_TRAINEE\"").unwrap();
        assert_eq!(kind, NotificationKind::LtftSubmittedTrainee);
    }

    #[test]
    fn status_channel_matrix() {
        assert!(NotificationStatus::Pending.is_valid_for(Channel::Email));
        assert!(NotificationStatus::Sent.is_valid_for(Channel::Email));
        assert!(!NotificationStatus::Unread.is_valid_for(Channel::Email));
        assert!(!NotificationStatus::Read.is_valid_for(Channel::Email));
        assert!(NotificationStatus::Unread.is_valid_for(Channel::InApp));
        assert!(NotificationStatus::Archived.is_valid_for(Channel::InApp));
        assert!(!NotificationStatus::Pending.is_valid_for(Channel::InApp));
        assert!(NotificationStatus::Scheduled.is_valid_for(Channel::Email));
        assert!(NotificationStatus::Scheduled.is_valid_for(Channel::InApp));
    }

    #[test]
    fn template_path_segments_are_kebab_case() {
        assert_eq!(
            NotificationKind::ProgrammeUpdatedWeek8.as_path_segment(),
            "programme-updated-week-8"
        );
        assert_eq!(NotificationKind::LtftSubmitted.as_path_segment(), "ltft-submitted");
        assert_eq!(Channel::InApp.as_path_segment(), "in-app");
    }

    #[test]
    fn job_ids_embed_kind_and_entity() {
        assert_eq!(
            NotificationKind::ProgrammeUpdatedWeek8.job_id("PM1"),
            "PROGRAMME_UPDATED_WEEK_8-PM1"
        );
    }
}
