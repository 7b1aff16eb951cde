use std::time::Duration;

use sea_query::{Expr, ExprTrait, Order, Query, SqliteQueryBuilder};
use sea_query_sqlx::SqlxBinder;
use serde_json::Value;
use sqlx::prelude::FromRow;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use traineehub_db::table::SchedulerJob;
use traineehub_shared::datetime::{from_unix, to_unix};

use crate::error::SchedulerError;

/// A lock held longer than this is considered abandoned (the node died
/// mid-execution) and may be claimed by another node.
const STALE_LOCK: Duration = Duration::from_secs(600);

/// One-shot job persisted until it fires.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: String,
    pub data: Value,
    pub fire_at: OffsetDateTime,
    pub misfire_window: Duration,
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    data: sqlx::types::Json<Value>,
    fire_at: i64,
    misfire_window_secs: i64,
}

impl From<JobRow> for StoredJob {
    fn from(row: JobRow) -> Self {
        StoredJob {
            id: row.id,
            data: row.data.0,
            fire_at: from_unix(row.fire_at),
            misfire_window: Duration::from_secs(Ord::max(row.misfire_window_secs, 0) as u64),
        }
    }
}

/// Persistent trigger store shared by every node in the cluster.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Registers a job; an existing job with the same id is replaced.
    pub async fn upsert(&self, job: &StoredJob) -> Result<(), SchedulerError> {
        let statement = Query::insert()
            .replace()
            .into_table(SchedulerJob::Table)
            .columns([
                SchedulerJob::Id,
                SchedulerJob::Data,
                SchedulerJob::FireAt,
                SchedulerJob::MisfireWindowSecs,
                SchedulerJob::LockedBy,
                SchedulerJob::LockedAt,
            ])
            .values_panic([
                job.id.clone().into(),
                serde_json::to_string(&job.data)?.into(),
                to_unix(job.fire_at).into(),
                (job.misfire_window.as_secs() as i64).into(),
                Option::<String>::None.into(),
                Option::<i64>::None.into(),
            ])
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(())
    }

    /// Deletes a job; a missing id is not an error.
    pub async fn remove(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let statement = Query::delete()
            .from_table(SchedulerJob::Table)
            .and_where(Expr::col(SchedulerJob::Id).eq(job_id))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<StoredJob>, SchedulerError> {
        let statement = Query::select()
            .columns([
                SchedulerJob::Id,
                SchedulerJob::Data,
                SchedulerJob::FireAt,
                SchedulerJob::MisfireWindowSecs,
            ])
            .from(SchedulerJob::Table)
            .and_where(Expr::col(SchedulerJob::Id).eq(job_id))
            .limit(1)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_as_with::<_, JobRow, _>(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(StoredJob::from))
    }

    /// Claims due jobs for this node. The conditional update means exactly
    /// one node wins each job even when several poll at the same moment.
    pub async fn claim_due(
        &self,
        node_id: &str,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<StoredJob>, SchedulerError> {
        let stale_before = to_unix(now) - STALE_LOCK.as_secs() as i64;

        let statement = Query::select()
            .columns([
                SchedulerJob::Id,
                SchedulerJob::Data,
                SchedulerJob::FireAt,
                SchedulerJob::MisfireWindowSecs,
            ])
            .from(SchedulerJob::Table)
            .and_where(Expr::col(SchedulerJob::FireAt).lte(to_unix(now)))
            .and_where(
                Expr::col(SchedulerJob::LockedBy)
                    .is_null()
                    .or(Expr::col(SchedulerJob::LockedAt).lt(stale_before)),
            )
            .order_by(SchedulerJob::FireAt, Order::Asc)
            .limit(limit as u64)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let candidates = sqlx::query_as_with::<_, JobRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for row in candidates {
            let statement = Query::update()
                .table(SchedulerJob::Table)
                .value(SchedulerJob::LockedBy, node_id)
                .value(SchedulerJob::LockedAt, to_unix(now))
                .and_where(Expr::col(SchedulerJob::Id).eq(row.id.clone()))
                .and_where(
                    Expr::col(SchedulerJob::LockedBy)
                        .is_null()
                        .or(Expr::col(SchedulerJob::LockedAt).lt(stale_before)),
                )
                .to_owned();

            let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
            let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
            if result.rows_affected() == 1 {
                claimed.push(StoredJob::from(row));
            }
        }

        Ok(claimed)
    }

    /// Releases a claim after a failed execution so the job fires again.
    pub async fn release(&self, job_id: &str, node_id: &str) -> Result<(), SchedulerError> {
        let statement = Query::update()
            .table(SchedulerJob::Table)
            .value(SchedulerJob::LockedBy, Option::<String>::None)
            .value(SchedulerJob::LockedAt, Option::<i64>::None)
            .and_where(Expr::col(SchedulerJob::Id).eq(job_id))
            .and_where(Expr::col(SchedulerJob::LockedBy).eq(node_id))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(())
    }
}
