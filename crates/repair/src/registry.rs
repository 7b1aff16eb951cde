//! Ordered registry of one-shot data repairs, each applied once per
//! deployment and remembered in the `repair_applied` table.

use std::sync::Arc;

use sea_query::{Expr, ExprTrait, Query, SqliteQueryBuilder};
use sea_query_sqlx::SqlxBinder;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use traineehub_db::table::RepairApplied;
use traineehub_history::{HistoryService, OutboxSender};
use traineehub_notify::EmailSender;
use traineehub_scheduler::Scheduler;

/// Everything a repair job may touch.
pub struct RepairContext {
    pub history: HistoryService,
    pub outbox: Arc<OutboxSender>,
    pub email: Arc<EmailSender>,
    pub scheduler: Arc<Scheduler>,
}

#[async_trait::async_trait]
pub trait RepairJob: Send + Sync {
    /// Stable, ordered identifier, e.g. `0003-rewrite-ltft-submitted-trainee`.
    fn id(&self) -> &'static str;

    async fn execute(&self, ctx: &RepairContext) -> anyhow::Result<()>;

    /// Repairs are forward-only; rolling back is an explicit no-op.
    async fn rollback(&self, _ctx: &RepairContext) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct RepairRunner {
    pool: SqlitePool,
    jobs: Vec<Box<dyn RepairJob>>,
}

impl RepairRunner {
    pub fn new(pool: SqlitePool, jobs: Vec<Box<dyn RepairJob>>) -> Self {
        Self { pool, jobs }
    }

    /// Runs every not-yet-applied job in order. A failing job is logged and
    /// skipped (it will run again next deploy); startup never aborts on a
    /// repair failure.
    pub async fn run(&self, ctx: &RepairContext) -> anyhow::Result<()> {
        for job in &self.jobs {
            if self.is_applied(job.id()).await? {
                continue;
            }

            tracing::info!(repair = job.id(), "running one-shot repair");
            match job.execute(ctx).await {
                Ok(()) => {
                    self.mark_applied(job.id()).await?;
                    tracing::info!(repair = job.id(), "repair applied");
                }
                Err(err) => {
                    tracing::error!(repair = job.id(), err = %err, "repair failed, continuing startup");
                }
            }
        }

        Ok(())
    }

    async fn is_applied(&self, id: &str) -> anyhow::Result<bool> {
        let statement = Query::select()
            .column(RepairApplied::Id)
            .from(RepairApplied::Table)
            .and_where(Expr::col(RepairApplied::Id).eq(id))
            .limit(1)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let found: Option<String> = sqlx::query_scalar_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }

    async fn mark_applied(&self, id: &str) -> anyhow::Result<()> {
        let statement = Query::insert()
            .replace()
            .into_table(RepairApplied::Table)
            .columns([RepairApplied::Id, RepairApplied::AppliedAt])
            .values_panic([
                id.into(),
                OffsetDateTime::now_utc().unix_timestamp().into(),
            ])
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(())
    }
}
