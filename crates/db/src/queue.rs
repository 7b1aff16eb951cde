//! Durable message queue backed by the service database.
//!
//! Inbound event queues, the outbox and the broadcast topic all share this
//! store. Delivery is at-least-once: a received message becomes invisible for
//! the visibility timeout and reappears unless acknowledged.

use std::collections::HashMap;
use std::time::Duration;

use sea_query::{Expr, ExprTrait, Order, Query, SqliteQueryBuilder};
use sea_query_sqlx::SqlxBinder;
use sqlx::prelude::FromRow;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::table::QueueMessage;

/// Header propagated across queue hops so one inbound event can be followed
/// through planners, the scheduler and outbound sends.
pub const TRACE_ID_HEADER: &str = "TraceId";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A message pulled off a queue, with its delivery attempt count.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: String,
    pub queue: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub attempts: i64,
}

impl Envelope {
    pub fn trace_id(&self) -> Option<&str> {
        self.headers.get(TRACE_ID_HEADER).map(String::as_str)
    }
}

#[async_trait::async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(
        &self,
        queue: &str,
        body: String,
        headers: HashMap<String, String>,
    ) -> Result<(), QueueError>;

    /// Claims up to `max` visible messages. Claimed messages stay invisible
    /// for the visibility timeout; exactly one receiver wins each claim.
    async fn receive(&self, queue: &str, max: u32) -> Result<Vec<Envelope>, QueueError>;

    async fn ack(&self, message_id: &str) -> Result<(), QueueError>;

    /// Returns a message to the queue after `delay`.
    async fn nack(&self, message_id: &str, delay: Duration) -> Result<(), QueueError>;
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    queue: String,
    body: String,
    headers: sqlx::types::Json<HashMap<String, String>>,
    attempts: i64,
}

#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
        }
    }
}

#[async_trait::async_trait]
impl MessageQueue for SqliteQueue {
    async fn send(
        &self,
        queue: &str,
        body: String,
        headers: HashMap<String, String>,
    ) -> Result<(), QueueError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let statement = Query::insert()
            .into_table(QueueMessage::Table)
            .columns([
                QueueMessage::Id,
                QueueMessage::Queue,
                QueueMessage::Body,
                QueueMessage::Headers,
                QueueMessage::Attempts,
                QueueMessage::VisibleAt,
                QueueMessage::CreatedAt,
            ])
            .values_panic([
                ulid::Ulid::new().to_string().into(),
                queue.into(),
                body.into(),
                serde_json::to_string(&headers)?.into(),
                0.into(),
                now.into(),
                now.into(),
            ])
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(())
    }

    async fn receive(&self, queue: &str, max: u32) -> Result<Vec<Envelope>, QueueError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let statement = Query::select()
            .columns([
                QueueMessage::Id,
                QueueMessage::Queue,
                QueueMessage::Body,
                QueueMessage::Headers,
                QueueMessage::Attempts,
            ])
            .from(QueueMessage::Table)
            .and_where(Expr::col(QueueMessage::Queue).eq(queue))
            .and_where(Expr::col(QueueMessage::VisibleAt).lte(now))
            .order_by(QueueMessage::Id, Order::Asc)
            .limit(max as u64)
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        let candidates = sqlx::query_as_with::<_, MessageRow, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        let invisible_until = now + self.visibility_timeout.as_secs() as i64;
        let mut claimed = Vec::with_capacity(candidates.len());

        for row in candidates {
            let statement = Query::update()
                .table(QueueMessage::Table)
                .value(QueueMessage::VisibleAt, invisible_until)
                .value(
                    QueueMessage::Attempts,
                    Expr::col(QueueMessage::Attempts).add(1),
                )
                .and_where(Expr::col(QueueMessage::Id).eq(row.id.clone()))
                .and_where(Expr::col(QueueMessage::VisibleAt).lte(now))
                .to_owned();

            let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
            let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
            if result.rows_affected() == 1 {
                claimed.push(Envelope {
                    message_id: row.id,
                    queue: row.queue,
                    body: row.body,
                    headers: row.headers.0,
                    attempts: row.attempts + 1,
                });
            }
        }

        Ok(claimed)
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        let statement = Query::delete()
            .from_table(QueueMessage::Table)
            .and_where(Expr::col(QueueMessage::Id).eq(message_id))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(())
    }

    async fn nack(&self, message_id: &str, delay: Duration) -> Result<(), QueueError> {
        let visible_at = OffsetDateTime::now_utc().unix_timestamp() + delay.as_secs() as i64;
        let statement = Query::update()
            .table(QueueMessage::Table)
            .value(QueueMessage::VisibleAt, visible_at)
            .and_where(Expr::col(QueueMessage::Id).eq(message_id))
            .to_owned();

        let (sql, values) = statement.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;

        Ok(())
    }
}
