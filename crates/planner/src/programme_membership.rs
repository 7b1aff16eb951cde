//! Plans the full set of milestone notifications for a programme membership.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time_tz::Tz;
use traineehub_history::{History, HistoryService};
use traineehub_notify::client::ActionsApi;
use traineehub_notify::InAppSender;
use traineehub_scheduler::Scheduler;
use traineehub_shared::datetime::{local_midnight, localise};
use traineehub_shared::{
    Action, NotificationKind, NotificationStatus, ProgrammeMembership, Reference, ReferenceKind,
};

use crate::error::PlannerError;
use crate::job_data::programme_job_data;

/// Curriculum subtypes that make a membership notifiable.
const NOTIFIABLE_SUB_TYPES: [&str; 2] = ["MEDICAL_CURRICULUM", "MEDICAL_SPR"];

/// Specialties excluded from notifications altogether.
const EXCLUDED_SPECIALTIES: [&str; 2] = ["PUBLIC HEALTH MEDICINE", "FOUNDATION"];

/// A membership is excluded when no curriculum carries a medical subtype or
/// any curriculum is in an excluded specialty. Exclusion is a pure function
/// of the snapshot.
pub fn is_excluded(membership: &ProgrammeMembership) -> bool {
    let Some(curricula) = &membership.curricula else {
        return true;
    };

    let has_notifiable_sub_type = curricula.iter().any(|curriculum| {
        curriculum
            .curriculum_sub_type
            .as_deref()
            .is_some_and(|sub_type| {
                NOTIFIABLE_SUB_TYPES
                    .iter()
                    .any(|notifiable| sub_type.eq_ignore_ascii_case(notifiable))
            })
    });

    let has_excluded_specialty = curricula.iter().any(|curriculum| {
        curriculum
            .curriculum_specialty
            .as_deref()
            .is_some_and(|specialty| {
                EXCLUDED_SPECIALTIES
                    .iter()
                    .any(|excluded| specialty.eq_ignore_ascii_case(excluded))
            })
    });

    !has_notifiable_sub_type || has_excluded_specialty
}

pub struct ProgrammeMembershipPlanner {
    history: HistoryService,
    scheduler: Arc<Scheduler>,
    in_app: Arc<InAppSender>,
    actions: Arc<dyn ActionsApi>,
    timezone: &'static Tz,
    whitelist: Vec<String>,
    misfire_window: Duration,
}

impl ProgrammeMembershipPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        history: HistoryService,
        scheduler: Arc<Scheduler>,
        in_app: Arc<InAppSender>,
        actions: Arc<dyn ActionsApi>,
        timezone: &'static Tz,
        whitelist: Vec<String>,
        misfire_window: Duration,
    ) -> Self {
        Self {
            history,
            scheduler,
            in_app,
            actions,
            timezone,
            whitelist,
            misfire_window,
        }
    }

    /// Recomputes the plan for one membership snapshot. Identical input
    /// always produces the identical set of jobs and scheduled rows.
    pub async fn plan(&self, membership: &ProgrammeMembership) -> Result<(), PlannerError> {
        self.prune(&membership.person_id, &membership.tis_id).await?;

        if is_excluded(membership) {
            tracing::info!(
                tis_id = %membership.tis_id,
                person_id = %membership.person_id,
                "programme membership excluded from notifications"
            );
            return Ok(());
        }

        let start_date = membership.start_date.ok_or_else(|| {
            PlannerError::InvalidInput(format!(
                "programme membership {} has no start date",
                membership.tis_id
            ))
        })?;

        let latest = self.latest_by_kind(membership).await?;
        let today = localise(OffsetDateTime::now_utc(), self.timezone).date();

        // Milestones whose anchor already passed are dominated by the newest
        // of them; only that one still fires (an hour out), the rest stay
        // unplanned until the next snapshot.
        let newest_past = NotificationKind::programme_milestones()
            .into_iter()
            .filter_map(|kind| {
                let days = kind.days_before_start()?;
                let target = start_date - time::Duration::days(days);
                (target <= today).then_some((kind, days))
            })
            .min_by_key(|(_, days)| *days)
            .map(|(kind, _)| kind);

        for kind in NotificationKind::programme_milestones() {
            let already_dispatched = latest
                .get(&kind)
                .is_some_and(|row| row.status != NotificationStatus::Failed);
            if already_dispatched {
                continue;
            }

            let days = kind.days_before_start().unwrap_or(0);
            let target = start_date - time::Duration::days(days);
            if target <= today && newest_past != Some(kind) {
                continue;
            }

            let fire_at = self.scheduler.schedule_date(start_date, days);
            self.scheduler
                .schedule(
                    &kind.job_id(&membership.tis_id),
                    programme_job_data(kind, membership)?,
                    fire_at,
                    self.misfire_window,
                )
                .await?;
        }

        let suppress = !self.meets_criteria(membership).await;
        let reference = Reference::new(ReferenceKind::ProgrammeMembership, &membership.tis_id);

        for kind in NotificationKind::in_app_programme_kinds() {
            if latest.contains_key(&kind) {
                continue;
            }

            let sent_at = (kind == NotificationKind::DayOne)
                .then(|| local_midnight(start_date, self.timezone));

            self.in_app
                .create_notification(
                    &membership.person_id,
                    Some(reference.clone()),
                    kind,
                    Self::variables(membership),
                    suppress,
                    sent_at,
                )
                .await?;
        }

        Ok(())
    }

    /// A deleted membership keeps its audit history but loses every pending
    /// dispatch.
    pub async fn handle_deleted(&self, person_id: &str, tis_id: &str) -> Result<(), PlannerError> {
        self.prune(person_id, tis_id).await
    }

    async fn prune(&self, person_id: &str, tis_id: &str) -> Result<(), PlannerError> {
        let reference = Reference::new(ReferenceKind::ProgrammeMembership, tis_id);
        self.history
            .delete_scheduled_for_reference(person_id, &reference)
            .await?;

        for kind in NotificationKind::programme_milestones() {
            self.scheduler.remove(&kind.job_id(tis_id)).await?;
        }

        Ok(())
    }

    async fn latest_by_kind(
        &self,
        membership: &ProgrammeMembership,
    ) -> Result<HashMap<NotificationKind, History>, PlannerError> {
        let rows = self
            .history
            .store()
            .find_all_for_reference(
                &membership.person_id,
                ReferenceKind::ProgrammeMembership,
                &membership.tis_id,
            )
            .await?;

        // Rows arrive newest first, so the first row per kind wins.
        let mut latest = HashMap::new();
        for row in rows {
            latest.entry(row.kind).or_insert(row);
        }

        Ok(latest)
    }

    /// In-app notifications stay suppressed until the Conditions of Joining
    /// are signed, either on the snapshot itself or per the actions service.
    /// Whitelisted trainees bypass the gate; an unreachable actions service
    /// assumes the checklist complete.
    async fn meets_criteria(&self, membership: &ProgrammeMembership) -> bool {
        if self.whitelist.contains(&membership.person_id) {
            return true;
        }

        if membership
            .conditions_of_joining
            .as_ref()
            .and_then(|coj| coj.synced_at)
            .is_some()
        {
            return true;
        }

        match self
            .actions
            .actions(&membership.person_id, &membership.tis_id)
            .await
        {
            Ok(actions) => !actions.iter().any(|action| {
                action.action_type.as_deref() == Some(Action::SIGN_COJ) && !action.is_complete()
            }),
            Err(err) => {
                tracing::warn!(
                    person_id = %membership.person_id,
                    err = %err,
                    "actions service unavailable, assuming checklist complete"
                );
                true
            }
        }
    }

    fn variables(membership: &ProgrammeMembership) -> Map<String, Value> {
        let mut variables = Map::new();
        if let Some(name) = &membership.programme_name {
            variables.insert("programmeName".to_string(), name.clone().into());
        }
        if let Some(number) = &membership.programme_number {
            variables.insert("programmeNumber".to_string(), number.clone().into());
        }
        if let Some(start_date) = membership.start_date {
            variables.insert("startDate".to_string(), start_date.to_string().into());
        }
        if let Some(deanery) = &membership.managing_deanery {
            variables.insert("localOfficeName".to_string(), deanery.clone().into());
        }
        variables
    }
}
