//! Durable queue on a single PostgreSQL table.
//!
//! Each row is one message. Receiving pushes `available_at` forward by the
//! visibility timeout; acknowledging deletes the row and nacking pulls
//! `available_at` back to now. Batches are claimed with `FOR UPDATE SKIP
//! LOCKED` so several workers can share one queue table.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::error::QueueError;
use crate::traits::{QueueBackend, MAX_QUEUE_MESSAGE_SIZE};
use crate::types::{Message, MessageId};

const POOL_SIZE: u32 = 10;

fn backend(err: sqlx::Error) -> QueueError {
    QueueError::Backend(err.to_string())
}

#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    table: String,
}

impl PostgresQueue {
    /// Connects to `url` and makes sure `table` and its index exist.
    pub async fn new(url: &str, table: impl Into<String>) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect(url)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Self::with_pool(pool, table).await
    }

    /// Uses an existing pool, creating the table if needed.
    pub async fn with_pool(pool: PgPool, table: impl Into<String>) -> Result<Self, QueueError> {
        let queue = Self {
            pool,
            table: table.into(),
        };
        queue.migrate().await?;
        Ok(queue)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Substitutes the table name for every `{table}` in `sql`.
    fn statement(&self, sql: &str) -> String {
        sql.replace("{table}", &self.table)
    }

    async fn migrate(&self) -> Result<(), QueueError> {
        let ddl = [
            "CREATE TABLE IF NOT EXISTS {table} (
                seq BIGSERIAL PRIMARY KEY,
                queue TEXT NOT NULL,
                payload BYTEA NOT NULL,
                receive_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                available_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE INDEX IF NOT EXISTS {index}
                ON {table} (queue, available_at, seq)",
        ];
        let index = format!("{}_available", self.table.replace('.', "_"));

        for sql in ddl {
            let sql = self.statement(sql).replace("{index}", &index);
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }

    fn seq(message_id: &MessageId) -> Result<i64, QueueError> {
        message_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::MessageNotFound(message_id.to_string()))
    }

    /// Runs a statement keyed by `(seq, queue)` and fails if no row matched.
    async fn settle(
        &self,
        sql: &str,
        queue: &str,
        message_id: &MessageId,
    ) -> Result<(), QueueError> {
        let seq = Self::seq(message_id)?;
        let done = sqlx::query(&self.statement(sql))
            .bind(seq)
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if done.rows_affected() == 0 {
            return Err(QueueError::MessageNotFound(message_id.to_string()));
        }
        Ok(())
    }

    fn to_message(row: &PgRow) -> Message {
        let seq: i64 = row.get("seq");
        let receive_count: i32 = row.get("receive_count");
        let enqueued_at: DateTime<Utc> = row.get("enqueued_at");
        Message {
            id: MessageId::new(seq.to_string()),
            body: row.get("payload"),
            attempt: u32::try_from(receive_count).unwrap_or_default(),
            enqueued_at: SystemTime::from(enqueued_at),
        }
    }
}

#[async_trait]
impl QueueBackend for PostgresQueue {
    async fn send(&self, queue: &str, body: &[u8]) -> Result<MessageId, QueueError> {
        if body.len() > MAX_QUEUE_MESSAGE_SIZE {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max: MAX_QUEUE_MESSAGE_SIZE,
            });
        }

        let seq: i64 = sqlx::query_scalar(
            &self.statement("INSERT INTO {table} (queue, payload) VALUES ($1, $2) RETURNING seq"),
        )
        .bind(queue)
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(MessageId::new(seq.to_string()))
    }

    async fn receive_batch(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let sql = self.statement(
            "UPDATE {table} SET
                available_at = NOW() + make_interval(secs => $3),
                receive_count = receive_count + 1
            WHERE seq IN (
                SELECT seq FROM {table}
                WHERE queue = $1 AND available_at <= NOW()
                ORDER BY seq
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING seq, payload, receive_count, enqueued_at",
        );

        let mut rows = sqlx::query(&sql)
            .bind(queue)
            .bind(i64::try_from(max).unwrap_or(i64::MAX))
            .bind(visibility_timeout.as_secs_f64())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        // RETURNING does not preserve the subquery order.
        rows.sort_by_key(|row| row.get::<i64, _>("seq"));
        Ok(rows.iter().map(Self::to_message).collect())
    }

    async fn ack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError> {
        self.settle("DELETE FROM {table} WHERE seq = $1 AND queue = $2", queue, message_id)
            .await
    }

    async fn nack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError> {
        self.settle(
            "UPDATE {table} SET available_at = NOW() WHERE seq = $1 AND queue = $2",
            queue,
            message_id,
        )
        .await
    }
}

impl std::fmt::Debug for PostgresQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresQueue")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
