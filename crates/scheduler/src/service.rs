use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use time::{Date, OffsetDateTime};
use time_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::Instrument;
use traineehub_shared::datetime::{local_midnight, localise};

use crate::error::SchedulerError;
use crate::store::{JobStore, StoredJob};

/// Callback fired when a trigger comes due. Returns an audit string recorded
/// in the scheduler log, e.g. `sent 2025-03-01T09:00:00Z`.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job_id: &str, data: &Value) -> Result<String, SchedulerError>;
}

/// Cluster-safe one-shot scheduler over the shared job store.
pub struct Scheduler {
    store: JobStore,
    timezone: &'static Tz,
    node_id: String,
}

impl Scheduler {
    pub fn new(store: JobStore, timezone: &'static Tz) -> Self {
        Self {
            store,
            timezone,
            node_id: ulid::Ulid::new().to_string(),
        }
    }

    /// Registers a one-shot job; an existing job with the same id is
    /// replaced, whatever data it held.
    pub async fn schedule(
        &self,
        job_id: &str,
        data: Value,
        fire_at: OffsetDateTime,
        misfire_window: Duration,
    ) -> Result<(), SchedulerError> {
        tracing::info!(job_id, fire_at = %fire_at, "scheduling notification job");
        self.store
            .upsert(&StoredJob {
                id: job_id.to_string(),
                data,
                fire_at,
                misfire_window,
            })
            .await
    }

    /// Removes a job; a missing key is not an error.
    pub async fn remove(&self, job_id: &str) -> Result<(), SchedulerError> {
        if self.store.remove(job_id).await? {
            tracing::info!(job_id, "removed scheduled notification job");
        }

        Ok(())
    }

    /// Runs the handler immediately, bypassing the store.
    pub async fn execute_now(
        &self,
        handler: &dyn JobHandler,
        job_id: &str,
        data: &Value,
    ) -> Result<String, SchedulerError> {
        let span = tracing::info_span!("scheduled_job", job_id, immediate = true);
        handler.execute(job_id, data).instrument(span).await
    }

    /// The instant a notification anchored `days_before` days ahead of
    /// `anchor` should fire: local midnight of that day when it is still in
    /// the future, otherwise an hour from now so that human edits arriving
    /// in quick succession can still supersede the job.
    pub fn schedule_date(&self, anchor: Date, days_before: i64) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let target = anchor - time::Duration::days(days_before);
        let today = localise(now, self.timezone).date();

        if target > today {
            local_midnight(target, self.timezone)
        } else {
            now + time::Duration::hours(1)
        }
    }

    /// One poll round: claim due jobs, apply the misfire policy, execute.
    pub async fn poll_due(&self, handler: &dyn JobHandler) -> Result<(), SchedulerError> {
        let now = OffsetDateTime::now_utc();
        let jobs = self.store.claim_due(&self.node_id, now, 20).await?;

        for job in jobs {
            if now > job.fire_at + job.misfire_window {
                tracing::warn!(
                    job_id = %job.id,
                    fire_at = %job.fire_at,
                    "misfired outside its window, discarding trigger"
                );
                self.store.remove(&job.id).await?;
                continue;
            }

            let span = tracing::info_span!("scheduled_job", job_id = %job.id);
            match handler.execute(&job.id, &job.data).instrument(span).await {
                Ok(outcome) => {
                    tracing::info!(job_id = %job.id, outcome, "notification job completed");
                    self.store.remove(&job.id).await?;
                }
                Err(err) => {
                    tracing::error!(job_id = %job.id, err = %err, "notification job failed");
                    self.store.release(&job.id, &self.node_id).await?;
                }
            }
        }

        Ok(())
    }
}

/// Starts the fire loop: a cron tick every five seconds polling for due
/// triggers. Exactly one node executes each claimed trigger.
pub async fn spawn_fire_loop(
    scheduler: Arc<Scheduler>,
    handler: Arc<dyn JobHandler>,
) -> Result<JobScheduler, JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    sched
        .add(Job::new_async("1/5 * * * * *", move |_uuid, _l| {
            let scheduler = scheduler.clone();
            let handler = handler.clone();

            Box::pin(async move {
                if let Err(err) = scheduler.poll_due(handler.as_ref()).await {
                    tracing::error!(err = %err, "failed to fire due notification jobs");
                }
            })
        })?)
        .await?;

    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;
    use traineehub_shared::datetime::find_zone;

    fn scheduler() -> Scheduler {
        // The store is never touched by schedule_date.
        let pool = sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        Scheduler::new(JobStore::new(pool), find_zone("Europe/London").unwrap())
    }

    #[tokio::test]
    async fn future_anchor_schedules_at_local_midnight() {
        let scheduler = scheduler();
        let today = localise(OffsetDateTime::now_utc(), scheduler.timezone).date();
        let anchor = today + time::Duration::days(100);

        let fire_at = scheduler.schedule_date(anchor, 56);
        let expected = local_midnight(today + time::Duration::days(44), scheduler.timezone);
        assert_eq!(fire_at, expected);
    }

    #[tokio::test]
    async fn todays_anchor_schedules_an_hour_out() {
        let scheduler = scheduler();
        let today = localise(OffsetDateTime::now_utc(), scheduler.timezone).date();

        let fire_at = scheduler.schedule_date(today, 0);
        let delta = fire_at - OffsetDateTime::now_utc();
        assert!(delta > time::Duration::minutes(59));
        assert!(delta <= time::Duration::minutes(61));
    }

    #[tokio::test]
    async fn past_anchor_also_schedules_an_hour_out() {
        let scheduler = scheduler();
        let fire_at = scheduler.schedule_date(date!(2020 - 01 - 01), 56);
        let delta = fire_at - OffsetDateTime::now_utc();
        assert!(delta > time::Duration::minutes(59));
        assert!(delta <= time::Duration::minutes(61));
    }
}
