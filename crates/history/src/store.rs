use sea_query::{Expr, ExprTrait, Order, Query, SqliteQueryBuilder};
use sea_query_sqlx::SqlxBinder;
use serde_json::{Map, Value};
use sqlx::prelude::FromRow;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use traineehub_db::table::History as HistoryTable;
use traineehub_shared::datetime::{from_unix, to_unix};
use traineehub_shared::{Channel, NotificationKind, NotificationStatus, Reference, ReferenceKind};

use crate::error::HistoryError;
use crate::model::{Attachment, History, TemplateInfo};

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: String,
    trainee_id: String,
    ref_kind: Option<sqlx::types::Text<ReferenceKind>>,
    ref_id: Option<String>,
    kind: sqlx::types::Text<NotificationKind>,
    channel: sqlx::types::Text<Channel>,
    contact: Option<String>,
    template_name: String,
    template_version: String,
    variables: sqlx::types::Json<Map<String, Value>>,
    attachments: sqlx::types::Json<Vec<Attachment>>,
    sent_at: Option<i64>,
    read_at: Option<i64>,
    status: Option<sqlx::types::Text<NotificationStatus>>,
    status_detail: Option<String>,
    latest_status_event_at: Option<i64>,
    last_retry: Option<i64>,
}

impl From<HistoryRow> for History {
    fn from(row: HistoryRow) -> Self {
        let reference = match (row.ref_kind, row.ref_id) {
            (Some(kind), Some(id)) => Some(Reference::new(kind.0, id)),
            _ => None,
        };

        History {
            id: row.id,
            trainee_id: row.trainee_id,
            reference,
            kind: row.kind.0,
            channel: row.channel.0,
            contact: row.contact,
            template: TemplateInfo {
                name: row.template_name,
                version: row.template_version,
                variables: row.variables.0,
            },
            attachments: row.attachments.0,
            sent_at: row.sent_at.map(from_unix),
            read_at: row.read_at.map(from_unix),
            // Rows written before the status column was introduced read as
            // sent; the backfill repair job persists that value.
            status: row.status.map(|s| s.0).unwrap_or(NotificationStatus::Sent),
            status_detail: row.status_detail,
            latest_status_event_at: row.latest_status_event_at.map(from_unix),
            last_retry: row.last_retry.map(from_unix),
        }
    }
}

fn all_columns() -> [HistoryTable; 17] {
    [
        HistoryTable::Id,
        HistoryTable::TraineeId,
        HistoryTable::RefKind,
        HistoryTable::RefId,
        HistoryTable::Kind,
        HistoryTable::Channel,
        HistoryTable::Contact,
        HistoryTable::TemplateName,
        HistoryTable::TemplateVersion,
        HistoryTable::Variables,
        HistoryTable::Attachments,
        HistoryTable::SentAt,
        HistoryTable::ReadAt,
        HistoryTable::Status,
        HistoryTable::StatusDetail,
        HistoryTable::LatestStatusEventAt,
        HistoryTable::LastRetry,
    ]
}

/// Data access for the history collection. Side-effect free: broadcasting a
/// change is the caller's post-commit responsibility.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent on id: re-saving overwrites the existing row.
    pub async fn save(&self, history: &History) -> Result<(), HistoryError> {
        let statement = Query::insert()
            .replace()
            .into_table(HistoryTable::Table)
            .columns(all_columns())
            .values_panic([
                history.id.clone().into(),
                history.trainee_id.clone().into(),
                history
                    .reference
                    .as_ref()
                    .map(|r| r.kind.to_string())
                    .into(),
                history.reference.as_ref().map(|r| r.id.clone()).into(),
                history.kind.to_string().into(),
                history.channel.to_string().into(),
                history.contact.clone().into(),
                history.template.name.clone().into(),
                history.template.version.clone().into(),
                serde_json::to_string(&history.template.variables)?.into(),
                serde_json::to_string(&history.attachments)?.into(),
                history.sent_at.map(to_unix).into(),
                history.read_at.map(to_unix).into(),
                history.status.to_string().into(),
                history.status_detail.clone().into(),
                history.latest_status_event_at.map(to_unix).into(),
                history.last_retry.map(to_unix).into(),
            ])
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<History>, HistoryError> {
        let statement = Query::select()
            .columns(all_columns())
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::Id).eq(id))
            .limit(1)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_as_with::<_, HistoryRow, _>(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(History::from))
    }

    pub async fn find_by_id_and_recipient(
        &self,
        id: &str,
        trainee_id: &str,
    ) -> Result<Option<History>, HistoryError> {
        let statement = Query::select()
            .columns(all_columns())
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::Id).eq(id))
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .limit(1)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_as_with::<_, HistoryRow, _>(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(History::from))
    }

    pub async fn find_all_by_recipient(
        &self,
        trainee_id: &str,
    ) -> Result<Vec<History>, HistoryError> {
        let statement = Query::select()
            .columns(all_columns())
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .order_by(HistoryTable::SentAt, Order::Desc)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_as_with::<_, HistoryRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(History::from).collect())
    }

    pub async fn find_all_by_recipient_and_status(
        &self,
        trainee_id: &str,
        status: NotificationStatus,
    ) -> Result<Vec<History>, HistoryError> {
        let statement = Query::select()
            .columns(all_columns())
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .and_where(Expr::col(HistoryTable::Status).eq(status.to_string()))
            .order_by(HistoryTable::SentAt, Order::Desc)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_as_with::<_, HistoryRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(History::from).collect())
    }

    /// All rows for one recipient and reference entity, newest first.
    pub async fn find_all_for_reference(
        &self,
        trainee_id: &str,
        ref_kind: ReferenceKind,
        ref_id: &str,
    ) -> Result<Vec<History>, HistoryError> {
        let statement = Query::select()
            .columns(all_columns())
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .and_where(Expr::col(HistoryTable::RefKind).eq(ref_kind.to_string()))
            .and_where(Expr::col(HistoryTable::RefId).eq(ref_id))
            .order_by(HistoryTable::Id, Order::Desc)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_as_with::<_, HistoryRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(History::from).collect())
    }

    /// Scheduled rows on one channel for a `(trainee, reference, kind)`
    /// tuple, oldest first. The sender reuses the first id it finds so a
    /// replanned notification replaces its predecessor in place.
    pub async fn find_scheduled(
        &self,
        trainee_id: &str,
        channel: Channel,
        reference: &Reference,
        kind: NotificationKind,
    ) -> Result<Vec<History>, HistoryError> {
        let statement = Query::select()
            .columns(all_columns())
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .and_where(Expr::col(HistoryTable::Channel).eq(channel.to_string()))
            .and_where(Expr::col(HistoryTable::RefKind).eq(reference.kind.to_string()))
            .and_where(Expr::col(HistoryTable::RefId).eq(reference.id.clone()))
            .and_where(Expr::col(HistoryTable::Kind).eq(kind.to_string()))
            .and_where(
                Expr::col(HistoryTable::Status).eq(NotificationStatus::Scheduled.to_string()),
            )
            .order_by(HistoryTable::Id, Order::Asc)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_as_with::<_, HistoryRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(History::from).collect())
    }

    /// Garbage-collects scheduled rows for the tuple, sparing `keep_id`.
    pub async fn delete_scheduled_except(
        &self,
        trainee_id: &str,
        reference: &Reference,
        kind: NotificationKind,
        keep_id: &str,
    ) -> Result<u64, HistoryError> {
        let statement = Query::delete()
            .from_table(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .and_where(Expr::col(HistoryTable::RefKind).eq(reference.kind.to_string()))
            .and_where(Expr::col(HistoryTable::RefId).eq(reference.id.clone()))
            .and_where(Expr::col(HistoryTable::Kind).eq(kind.to_string()))
            .and_where(
                Expr::col(HistoryTable::Status).eq(NotificationStatus::Scheduled.to_string()),
            )
            .and_where(Expr::col(HistoryTable::Id).ne(keep_id))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_by_id_and_recipient(
        &self,
        id: &str,
        trainee_id: &str,
    ) -> Result<bool, HistoryError> {
        let statement = Query::delete()
            .from_table(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::Id).eq(id))
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes every row for one reference entity in the given status.
    /// Planners use this to garbage-collect superseded plans.
    pub async fn delete_for_reference_and_status(
        &self,
        trainee_id: &str,
        ref_kind: ReferenceKind,
        ref_id: &str,
        status: NotificationStatus,
    ) -> Result<Vec<String>, HistoryError> {
        let select = Query::select()
            .column(HistoryTable::Id)
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::TraineeId).eq(trainee_id))
            .and_where(Expr::col(HistoryTable::RefKind).eq(ref_kind.to_string()))
            .and_where(Expr::col(HistoryTable::RefId).eq(ref_id))
            .and_where(Expr::col(HistoryTable::Status).eq(status.to_string()))
            .to_owned();

        let (sql, values) = select.build_sqlx(SqliteQueryBuilder);
        let ids: Vec<String> = sqlx::query_scalar_with(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        if ids.is_empty() {
            return Ok(ids);
        }

        let statement = Query::delete()
            .from_table(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::Id).is_in(ids.clone()))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(ids)
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: NotificationStatus,
        detail: Option<&str>,
    ) -> Result<u64, HistoryError> {
        let statement = Query::update()
            .table(HistoryTable::Table)
            .value(HistoryTable::Status, status.to_string())
            .value(HistoryTable::StatusDetail, detail.map(ToString::to_string))
            .and_where(Expr::col(HistoryTable::Id).eq(id))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    /// Conditional update gated on the provider event timestamp: a stale
    /// event (older than the last applied one) changes nothing. Returns the
    /// affected-row count so callers can decide whether to re-broadcast.
    pub async fn update_status_if_newer(
        &self,
        id: &str,
        event_at: OffsetDateTime,
        status: NotificationStatus,
        detail: Option<&str>,
    ) -> Result<u64, HistoryError> {
        let event_at = to_unix(event_at);
        let statement = Query::update()
            .table(HistoryTable::Table)
            .value(HistoryTable::Status, status.to_string())
            .value(HistoryTable::StatusDetail, detail.map(ToString::to_string))
            .value(HistoryTable::LatestStatusEventAt, event_at)
            .and_where(Expr::col(HistoryTable::Id).eq(id))
            .and_where(
                Expr::col(HistoryTable::LatestStatusEventAt)
                    .is_null()
                    .or(Expr::col(HistoryTable::LatestStatusEventAt).lte(event_at)),
            )
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    /// Ids of rows in `status` whose planned send instant is not after `at`,
    /// in id order.
    pub async fn find_ids_by_status_and_sent_at_before(
        &self,
        status: NotificationStatus,
        at: OffsetDateTime,
    ) -> Result<Vec<String>, HistoryError> {
        let statement = Query::select()
            .column(HistoryTable::Id)
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::Status).eq(status.to_string()))
            .and_where(Expr::col(HistoryTable::SentAt).lte(to_unix(at)))
            .order_by(HistoryTable::Id, Order::Asc)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let ids = sqlx::query_scalar_with(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    pub async fn find_all_ids(&self) -> Result<Vec<String>, HistoryError> {
        let statement = Query::select()
            .column(HistoryTable::Id)
            .from(HistoryTable::Table)
            .order_by(HistoryTable::Id, Order::Asc)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let ids = sqlx::query_scalar_with(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    // Bulk operations used by the one-shot repair jobs.

    pub async fn delete_by_kinds(&self, kinds: &[NotificationKind]) -> Result<u64, HistoryError> {
        let statement = Query::delete()
            .from_table(HistoryTable::Table)
            .and_where(
                Expr::col(HistoryTable::Kind)
                    .is_in(kinds.iter().map(ToString::to_string).collect::<Vec<_>>()),
            )
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_by_status_and_sent_before(
        &self,
        status: NotificationStatus,
        cutoff: OffsetDateTime,
    ) -> Result<u64, HistoryError> {
        let statement = Query::delete()
            .from_table(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::Status).eq(status.to_string()))
            .and_where(Expr::col(HistoryTable::SentAt).lt(to_unix(cutoff)))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    /// Bulk-renames a notification kind, keeping the template name in step.
    pub async fn rewrite_kind(
        &self,
        from: NotificationKind,
        to: NotificationKind,
    ) -> Result<u64, HistoryError> {
        let statement = Query::update()
            .table(HistoryTable::Table)
            .value(HistoryTable::Kind, to.to_string())
            .value(HistoryTable::TemplateName, to.as_path_segment())
            .and_where(Expr::col(HistoryTable::Kind).eq(from.to_string()))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    pub async fn backfill_missing_status(
        &self,
        status: NotificationStatus,
    ) -> Result<u64, HistoryError> {
        let statement = Query::update()
            .table(HistoryTable::Table)
            .value(HistoryTable::Status, status.to_string())
            .and_where(Expr::col(HistoryTable::Status).is_null())
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    /// Marks past-due scheduled rows failed without firing them.
    pub async fn fail_scheduled_before(
        &self,
        cutoff: OffsetDateTime,
        detail: &str,
    ) -> Result<u64, HistoryError> {
        let statement = Query::update()
            .table(HistoryTable::Table)
            .value(
                HistoryTable::Status,
                NotificationStatus::Failed.to_string(),
            )
            .value(HistoryTable::StatusDetail, detail)
            .and_where(
                Expr::col(HistoryTable::Status).eq(NotificationStatus::Scheduled.to_string()),
            )
            .and_where(Expr::col(HistoryTable::SentAt).lt(to_unix(cutoff)))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    /// Failed email rows whose recipient address is in `domain`, with a send
    /// attempt inside the window. Feeds the provider-outage resend job.
    pub async fn find_failed_email_in_window(
        &self,
        domain: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<History>, HistoryError> {
        let statement = Query::select()
            .columns(all_columns())
            .from(HistoryTable::Table)
            .and_where(Expr::col(HistoryTable::Status).eq(NotificationStatus::Failed.to_string()))
            .and_where(Expr::col(HistoryTable::Channel).eq(Channel::Email.to_string()))
            .and_where(Expr::col(HistoryTable::Contact).like(format!("%@{domain}")))
            .and_where(Expr::col(HistoryTable::SentAt).gte(to_unix(from)))
            .and_where(Expr::col(HistoryTable::SentAt).lte(to_unix(to)))
            .order_by(HistoryTable::Id, Order::Asc)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_as_with::<_, HistoryRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(History::from).collect())
    }
}
