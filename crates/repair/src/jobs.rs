//! The concrete repair jobs, oldest first. Each carries the literal
//! constants it shipped with; once applied it never runs again.

use serde_json::Value;
use time::macros::datetime;
use time::OffsetDateTime;
use traineehub_history::History;
use traineehub_shared::{NotificationKind, NotificationStatus};

use crate::registry::{RepairContext, RepairJob};

/// Programme kinds retired when the milestone model replaced them.
pub struct DeleteObsoleteProgrammeKinds;

#[async_trait::async_trait]
impl RepairJob for DeleteObsoleteProgrammeKinds {
    fn id(&self) -> &'static str {
        "0001-delete-obsolete-programme-kinds"
    }

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        let removed = ctx
            .history
            .store()
            .delete_by_kinds(&[
                NotificationKind::ProgrammeCreated,
                NotificationKind::ProgrammeDayOne,
            ])
            .await?;
        tracing::info!(removed, "deleted obsolete programme notification rows");

        Ok(())
    }
}

/// Scheduled rows stranded by the scheduler outage of summer 2024.
pub struct DeleteStaleScheduledRows;

#[async_trait::async_trait]
impl RepairJob for DeleteStaleScheduledRows {
    fn id(&self) -> &'static str {
        "0002-delete-stale-scheduled-rows"
    }

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        let removed = ctx
            .history
            .store()
            .delete_by_status_and_sent_before(
                NotificationStatus::Scheduled,
                datetime!(2024-08-01 00:00:00 UTC),
            )
            .await?;
        tracing::info!(removed, "deleted stale scheduled rows");

        Ok(())
    }
}

/// The trainee-suffixed submission kind collapsed into the plain one.
pub struct RewriteLtftSubmittedTrainee;

#[async_trait::async_trait]
impl RepairJob for RewriteLtftSubmittedTrainee {
    fn id(&self) -> &'static str {
        "0003-rewrite-ltft-submitted-trainee"
    }

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        let rewritten = ctx
            .history
            .store()
            .rewrite_kind(
                NotificationKind::LtftSubmittedTrainee,
                NotificationKind::LtftSubmitted,
            )
            .await?;
        tracing::info!(rewritten, "rewrote LTFT_SUBMITTED_TRAINEE rows");

        Ok(())
    }
}

/// Rows written before the status column existed read as sent; persist it.
pub struct BackfillMissingStatus;

#[async_trait::async_trait]
impl RepairJob for BackfillMissingStatus {
    fn id(&self) -> &'static str {
        "0004-backfill-missing-status"
    }

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        let backfilled = ctx
            .history
            .store()
            .backfill_missing_status(NotificationStatus::Sent)
            .await?;
        tracing::info!(backfilled, "backfilled missing statuses to SENT");

        Ok(())
    }
}

/// Full-scan broadcast so downstream consumers can rebuild their view.
pub struct BroadcastAllHistory;

#[async_trait::async_trait]
impl RepairJob for BroadcastAllHistory {
    fn id(&self) -> &'static str {
        "0005-broadcast-all-history"
    }

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        let ids = ctx.history.store().find_all_ids().await?;
        let total = ids.len();

        let failed = ctx.outbox.send_to_outbox(&ids, None).await;
        if !failed.is_empty() {
            anyhow::bail!(
                "{} of {} outbox batches failed to enqueue",
                failed.len(),
                total.div_ceil(10)
            );
        }
        tracing::info!(total, "queued full history broadcast");

        Ok(())
    }
}

/// Transient NHS-mail failures from the March 2025 provider outage:
/// immediate kinds are re-sent outright, milestone kinds are put back on the
/// scheduler with a generous misfire window and their failed row removed.
pub struct ResendNhsTransientFailures;

const OUTAGE_WINDOW_START: OffsetDateTime = datetime!(2025-03-10 00:00:00 UTC);
const OUTAGE_WINDOW_END: OffsetDateTime = datetime!(2025-03-12 23:59:59 UTC);

fn milestone_job_data(row: &History) -> Option<Value> {
    let reference = row.reference.as_ref()?;
    let mut map = serde_json::Map::new();
    map.insert("notificationType".to_string(), row.kind.to_string().into());
    map.insert("personId".to_string(), row.trainee_id.clone().into());
    map.insert("tisId".to_string(), reference.id.clone().into());
    for key in ["programmeName", "programmeNumber", "startDate"] {
        if let Some(value) = row.template.variables.get(key) {
            map.insert(key.to_string(), value.clone());
        }
    }

    Some(Value::Object(map))
}

#[async_trait::async_trait]
impl RepairJob for ResendNhsTransientFailures {
    fn id(&self) -> &'static str {
        "0006-resend-nhs-transient-failures"
    }

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        let failures = ctx
            .history
            .store()
            .find_failed_email_in_window("nhs.net", OUTAGE_WINDOW_START, OUTAGE_WINDOW_END)
            .await?;

        let mut resent = 0;
        let mut rescheduled = 0;
        for row in failures {
            let transient = row
                .status_detail
                .as_deref()
                .is_some_and(|detail| detail.starts_with("Bounce: Transient"));
            if !transient {
                continue;
            }

            if row.kind.days_before_start().is_some() {
                let Some(reference) = row.reference.as_ref() else {
                    continue;
                };
                let Some(data) = milestone_job_data(&row) else {
                    continue;
                };
                ctx.scheduler
                    .schedule(
                        &row.kind.job_id(&reference.id),
                        data,
                        OffsetDateTime::now_utc(),
                        std::time::Duration::from_secs(24 * 3600),
                    )
                    .await?;
                ctx.history.delete(&row.id, &row.trainee_id).await?;
                rescheduled += 1;
            } else if let Some(contact) = row.contact.clone() {
                ctx.email.resend(&row, &contact).await?;
                resent += 1;
            }
        }

        tracing::info!(resent, rescheduled, "replayed transient provider failures");

        Ok(())
    }
}

/// Scheduled emails that slipped past their window while firing was broken:
/// mark them failed rather than surprising trainees months later.
pub struct ResetMissedSchedules;

const MISSED_SCHEDULE_CUTOFF: OffsetDateTime = datetime!(2025-04-30 23:59:59 UTC);
pub const MISSED_SCHEDULE_DETAIL: &str = "Missed Schedule: Programme already started";

#[async_trait::async_trait]
impl RepairJob for ResetMissedSchedules {
    fn id(&self) -> &'static str {
        "0007-reset-missed-schedules"
    }

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        let reset = ctx
            .history
            .store()
            .fail_scheduled_before(MISSED_SCHEDULE_CUTOFF, MISSED_SCHEDULE_DETAIL)
            .await?;
        tracing::info!(reset, "failed past-due scheduled rows");

        Ok(())
    }
}

/// Every repair shipped so far, in application order.
pub fn default_jobs() -> Vec<Box<dyn RepairJob>> {
    vec![
        Box::new(DeleteObsoleteProgrammeKinds),
        Box::new(DeleteStaleScheduledRows),
        Box::new(RewriteLtftSubmittedTrainee),
        Box::new(BackfillMissingStatus),
        Box::new(BroadcastAllHistory),
        Box::new(ResendNhsTransientFailures),
        Box::new(ResetMissedSchedules),
    ]
}
