//! Plans the single twelve-week milestone for a placement.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use time_tz::Tz;
use traineehub_history::HistoryService;
use traineehub_scheduler::Scheduler;
use traineehub_shared::datetime::localise;
use traineehub_shared::{
    NotificationKind, NotificationStatus, Placement, Reference, ReferenceKind,
};

use crate::error::PlannerError;
use crate::job_data::placement_job_data;

/// Placement types that receive notifications.
const NOTIFIABLE_TYPES: [&str; 3] = ["In post", "In post - Acting up", "In Post - Extension"];

/// Exclusion is a pure function of the snapshot: anything but an in-post
/// placement is ignored.
pub fn is_excluded(placement: &Placement) -> bool {
    !placement
        .placement_type
        .as_deref()
        .is_some_and(|placement_type| {
            NOTIFIABLE_TYPES
                .iter()
                .any(|notifiable| placement_type.eq_ignore_ascii_case(notifiable))
        })
}

pub struct PlacementPlanner {
    history: HistoryService,
    scheduler: Arc<Scheduler>,
    timezone: &'static Tz,
    misfire_window: Duration,
}

impl PlacementPlanner {
    pub fn new(
        history: HistoryService,
        scheduler: Arc<Scheduler>,
        timezone: &'static Tz,
        misfire_window: Duration,
    ) -> Self {
        Self {
            history,
            scheduler,
            timezone,
            misfire_window,
        }
    }

    pub async fn plan(&self, placement: &Placement) -> Result<(), PlannerError> {
        self.prune(&placement.person_id, &placement.tis_id).await?;

        if is_excluded(placement) {
            tracing::info!(
                tis_id = %placement.tis_id,
                placement_type = placement.placement_type.as_deref().unwrap_or("none"),
                "placement excluded from notifications"
            );
            return Ok(());
        }

        let start_date = placement.start_date.ok_or_else(|| {
            PlannerError::InvalidInput(format!("placement {} has no start date", placement.tis_id))
        })?;

        let kind = NotificationKind::PlacementUpdatedWeek12;
        let already_dispatched = self
            .history
            .store()
            .find_all_for_reference(&placement.person_id, ReferenceKind::Placement, &placement.tis_id)
            .await?
            .into_iter()
            .any(|row| row.kind == kind && row.status != NotificationStatus::Failed);
        if already_dispatched {
            return Ok(());
        }

        let days = kind.days_before_start().unwrap_or(84);
        let target = start_date - time::Duration::days(days);
        let today = localise(OffsetDateTime::now_utc(), self.timezone).date();
        let fire_at = self.scheduler.schedule_date(start_date, days);
        if target <= today {
            tracing::info!(
                tis_id = %placement.tis_id,
                "placement milestone anchor already passed, scheduling catch-up send"
            );
        }

        self.scheduler
            .schedule(
                &kind.job_id(&placement.tis_id),
                placement_job_data(placement)?,
                fire_at,
                self.misfire_window,
            )
            .await?;

        Ok(())
    }

    pub async fn handle_deleted(&self, person_id: &str, tis_id: &str) -> Result<(), PlannerError> {
        self.prune(person_id, tis_id).await
    }

    async fn prune(&self, person_id: &str, tis_id: &str) -> Result<(), PlannerError> {
        let reference = Reference::new(ReferenceKind::Placement, tis_id);
        self.history
            .delete_scheduled_for_reference(person_id, &reference)
            .await?;
        self.scheduler
            .remove(&NotificationKind::PlacementUpdatedWeek12.job_id(tis_id))
            .await?;

        Ok(())
    }
}
