//! Postgres 版事件日志存储（PostgresEventLogStore）
//!
//! `postgres` 特性启用。要点：
//! - 状态转移编码为条件更新 `UPDATE … WHERE event_id = $n AND state = $m`，
//!   以乐观并发落实“比较并转移”契约：未命中即读取当前状态并报
//!   `StaleStateTransition`，水平扩展的多个发布者不会重复抢占；
//! - `PgSession` 在工作单元与存储之间共享“连接池 + 可选进行中事务”，
//!   `save_event` 在事务开启期间落在事务连接上，与实体写入同提交同回滚；
//! - 失败链的“不存在即建链”经由 `INSERT … ON CONFLICT (entity_id)` 完成。
//!
use crate::error::{OutboxError, OutboxResult};
use crate::event_log::{
    EventLogEntry, EventLogStore, EventState, FailedMessage, FailedMessageChain,
};
use crate::unit_of_work::UnitOfWork;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS integration_event_log (
    event_id              UUID PRIMARY KEY,
    event_type_name       TEXT NOT NULL,
    event_type_short_name TEXT NOT NULL,
    entity_id             TEXT NOT NULL,
    content               JSONB NOT NULL,
    state                 SMALLINT NOT NULL DEFAULT 0,
    times_sent            INTEGER NOT NULL DEFAULT 0,
    creation_time         TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_event_log_pending
    ON integration_event_log (state, creation_time);

CREATE TABLE IF NOT EXISTS failed_message_chain (
    id               UUID PRIMARY KEY,
    entity_id        TEXT NOT NULL UNIQUE,
    should_republish BOOLEAN NOT NULL DEFAULT TRUE,
    creation_time    TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS failed_message (
    id                    UUID PRIMARY KEY,
    chain_id              UUID NOT NULL REFERENCES failed_message_chain (id),
    event_id              UUID,
    event_type_short_name TEXT NOT NULL,
    body                  JSONB NOT NULL,
    message               TEXT NOT NULL,
    stack_trace           TEXT,
    should_skip           BOOLEAN NOT NULL DEFAULT FALSE,
    republished_at        TIMESTAMPTZ,
    creation_time         TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_message_chain_id
    ON failed_message (chain_id, creation_time);
"#;

/// 共享数据库会话：连接池 + 可选的进行中事务
///
/// 工作单元与事件日志存储持有同一会话；事务开启期间的 `save_event`
/// 落在事务连接上，其余操作（状态转移、失败链）走连接池。
pub struct PgSession {
    pool: PgPool,
    txn: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            txn: Mutex::new(None),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Postgres 版工作单元：事务保存在共享会话上
pub struct PostgresUnitOfWork {
    session: Arc<PgSession>,
}

impl PostgresUnitOfWork {
    pub fn new(session: Arc<PgSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn begin_transaction(&self) -> OutboxResult<()> {
        let mut guard = self.session.txn.lock().await;
        if guard.is_some() {
            return Err(OutboxError::Transaction {
                reason: "transaction already active".to_string(),
            });
        }
        *guard = Some(self.session.pool.begin().await?);
        Ok(())
    }

    async fn commit_transaction(&self) -> OutboxResult<()> {
        let txn = self.session.txn.lock().await.take();
        match txn {
            Some(txn) => {
                txn.commit().await?;
                Ok(())
            }
            None => Err(OutboxError::Transaction {
                reason: "no active transaction".to_string(),
            }),
        }
    }

    async fn rollback_transaction(&self) -> OutboxResult<()> {
        let txn = self.session.txn.lock().await.take();
        match txn {
            Some(txn) => {
                txn.rollback().await?;
                Ok(())
            }
            None => Err(OutboxError::Transaction {
                reason: "no active transaction".to_string(),
            }),
        }
    }
}

/// Postgres 版事件日志与失败链存储
pub struct PostgresEventLogStore {
    session: Arc<PgSession>,
}

impl PostgresEventLogStore {
    pub fn new(session: Arc<PgSession>) -> Self {
        Self { session }
    }

    /// 建表（幂等）
    pub async fn migrate(&self) -> OutboxResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.session.pool).await?;
        Ok(())
    }

    /// 比较并转移；未命中时读取当前状态给出准确的失败原因
    async fn transition(
        &self,
        event_id: Uuid,
        from: EventState,
        to: EventState,
    ) -> OutboxResult<()> {
        let sql = if to == EventState::InProgress {
            "UPDATE integration_event_log SET state = $1, times_sent = times_sent + 1 \
             WHERE event_id = $2 AND state = $3"
        } else {
            "UPDATE integration_event_log SET state = $1 \
             WHERE event_id = $2 AND state = $3"
        };

        let affected = sqlx::query(sql)
            .bind(i16::from(to))
            .bind(event_id)
            .bind(i16::from(from))
            .execute(&self.session.pool)
            .await?
            .rows_affected();
        if affected == 1 {
            return Ok(());
        }

        let row = sqlx::query("SELECT state FROM integration_event_log WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.session.pool)
            .await?;
        match row {
            None => Err(OutboxError::EventNotFound { event_id }),
            Some(row) => {
                let actual = EventState::try_from(row.try_get::<i16, _>("state")?)?;
                Err(OutboxError::StaleStateTransition {
                    event_id,
                    expected: from,
                    actual,
                })
            }
        }
    }
}

fn entry_from_row(row: &PgRow) -> OutboxResult<EventLogEntry> {
    let state = EventState::try_from(row.try_get::<i16, _>("state")?)?;
    Ok(EventLogEntry::builder()
        .event_id(row.try_get("event_id")?)
        .event_type_name(row.try_get("event_type_name")?)
        .event_type_short_name(row.try_get("event_type_short_name")?)
        .entity_id(row.try_get("entity_id")?)
        .content(row.try_get::<Value, _>("content")?)
        .state(state)
        .times_sent(row.try_get::<i32, _>("times_sent")? as u32)
        .creation_time(row.try_get::<DateTime<Utc>, _>("creation_time")?)
        .build())
}

fn message_from_row(row: &PgRow) -> OutboxResult<FailedMessage> {
    Ok(FailedMessage::builder()
        .id(row.try_get("id")?)
        .creation_time(row.try_get::<DateTime<Utc>, _>("creation_time")?)
        .body(row.try_get::<Value, _>("body")?)
        .message(row.try_get("message")?)
        .maybe_stack_trace(row.try_get::<Option<String>, _>("stack_trace")?)
        .event_type_short_name(row.try_get("event_type_short_name")?)
        .maybe_event_id(row.try_get::<Option<Uuid>, _>("event_id")?)
        .should_skip(row.try_get("should_skip")?)
        .maybe_republished_at(row.try_get::<Option<DateTime<Utc>>, _>("republished_at")?)
        .build())
}

#[async_trait]
impl EventLogStore for PostgresEventLogStore {
    async fn retrieve_pending_event_logs(
        &self,
        batch_size: usize,
    ) -> OutboxResult<Vec<EventLogEntry>> {
        let rows = sqlx::query(
            "SELECT event_id, event_type_name, event_type_short_name, entity_id, content, \
                    state, times_sent, creation_time \
             FROM integration_event_log \
             WHERE state = $1 \
             ORDER BY creation_time, event_id \
             LIMIT $2",
        )
        .bind(i16::from(EventState::NotPublished))
        .bind(batch_size as i64)
        .fetch_all(&self.session.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn save_event(&self, entry: &EventLogEntry) -> OutboxResult<()> {
        let query = sqlx::query(
            "INSERT INTO integration_event_log \
                 (event_id, event_type_name, event_type_short_name, entity_id, content, \
                  state, times_sent, creation_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.event_id())
        .bind(entry.event_type_name())
        .bind(entry.event_type_short_name())
        .bind(entry.entity_id())
        .bind(entry.content())
        .bind(i16::from(entry.state()))
        .bind(entry.times_sent() as i32)
        .bind(entry.creation_time());

        let mut guard = self.session.txn.lock().await;
        match guard.as_mut() {
            Some(txn) => {
                query.execute(&mut **txn).await?;
            }
            None => {
                query.execute(&self.session.pool).await?;
            }
        }
        Ok(())
    }

    async fn mark_event_as_in_progress(&self, event_id: Uuid) -> OutboxResult<()> {
        self.transition(event_id, EventState::NotPublished, EventState::InProgress)
            .await
    }

    async fn mark_event_as_published(&self, event_id: Uuid) -> OutboxResult<()> {
        self.transition(event_id, EventState::InProgress, EventState::Published)
            .await
    }

    async fn mark_event_as_failed(&self, event_id: Uuid) -> OutboxResult<()> {
        self.transition(event_id, EventState::InProgress, EventState::PublishedFailed)
            .await
    }

    async fn failed_message_chain_exists(&self, entity_id: &str) -> OutboxResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM failed_message_chain WHERE entity_id = $1)",
        )
        .bind(entity_id)
        .fetch_one(&self.session.pool)
        .await?;
        Ok(exists)
    }

    async fn add_in_failed_message_chain(
        &self,
        entity_id: &str,
        event_type_short_name: &str,
        body: &Value,
        event_id: Option<Uuid>,
        error: &OutboxError,
    ) -> OutboxResult<Uuid> {
        let now = Utc::now();
        let mut txn = self.session.pool.begin().await?;

        let chain_id: Uuid = sqlx::query_scalar(
            "INSERT INTO failed_message_chain (id, entity_id, should_republish, creation_time) \
             VALUES ($1, $2, TRUE, $3) \
             ON CONFLICT (entity_id) DO UPDATE SET entity_id = EXCLUDED.entity_id \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(entity_id)
        .bind(now)
        .fetch_one(&mut *txn)
        .await?;

        let message_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO failed_message \
                 (id, chain_id, event_id, event_type_short_name, body, message, stack_trace, \
                  should_skip, creation_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8)",
        )
        .bind(message_id)
        .bind(chain_id)
        .bind(event_id)
        .bind(event_type_short_name)
        .bind(body)
        .bind(error.to_string())
        .bind(format!("{error:?}"))
        .bind(now)
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(message_id)
    }

    async fn republishable_chains(
        &self,
        chain_batch_size: usize,
    ) -> OutboxResult<Vec<FailedMessageChain>> {
        let chain_rows = sqlx::query(
            "SELECT c.id, c.entity_id, c.should_republish, c.creation_time \
             FROM failed_message_chain c \
             WHERE c.should_republish \
               AND EXISTS (SELECT 1 FROM failed_message m \
                           WHERE m.chain_id = c.id \
                             AND NOT m.should_skip \
                             AND m.republished_at IS NULL) \
             ORDER BY c.creation_time \
             LIMIT $1",
        )
        .bind(chain_batch_size as i64)
        .fetch_all(&self.session.pool)
        .await?;

        if chain_rows.is_empty() {
            return Ok(Vec::new());
        }

        let chain_ids: Vec<Uuid> = chain_rows
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<Result<_, _>>()?;

        let message_rows = sqlx::query(
            "SELECT id, chain_id, event_id, event_type_short_name, body, message, stack_trace, \
                    should_skip, republished_at, creation_time \
             FROM failed_message \
             WHERE chain_id = ANY($1) \
               AND NOT should_skip \
               AND republished_at IS NULL \
             ORDER BY creation_time, id",
        )
        .bind(&chain_ids)
        .fetch_all(&self.session.pool)
        .await?;

        let mut by_chain: HashMap<Uuid, Vec<FailedMessage>> = HashMap::new();
        for row in &message_rows {
            let chain_id: Uuid = row.try_get("chain_id")?;
            by_chain
                .entry(chain_id)
                .or_default()
                .push(message_from_row(row)?);
        }

        chain_rows
            .iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                Ok(FailedMessageChain::builder()
                    .id(id)
                    .creation_time(row.try_get::<DateTime<Utc>, _>("creation_time")?)
                    .entity_id(row.try_get("entity_id")?)
                    .should_republish(row.try_get("should_republish")?)
                    .failed_messages(by_chain.remove(&id).unwrap_or_default())
                    .build())
            })
            .collect()
    }

    async fn mark_failed_message_republished(&self, message_id: Uuid) -> OutboxResult<()> {
        let affected = sqlx::query("UPDATE failed_message SET republished_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(message_id)
            .execute(&self.session.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(OutboxError::NotFound {
                reason: format!("failed message not found: {message_id}"),
            });
        }
        Ok(())
    }

    async fn skip_failed_message(&self, message_id: Uuid) -> OutboxResult<()> {
        let affected = sqlx::query("UPDATE failed_message SET should_skip = TRUE WHERE id = $1")
            .bind(message_id)
            .execute(&self.session.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(OutboxError::NotFound {
                reason: format!("failed message not found: {message_id}"),
            });
        }
        Ok(())
    }

    async fn set_chain_republish(
        &self,
        entity_id: &str,
        should_republish: bool,
    ) -> OutboxResult<()> {
        let affected =
            sqlx::query("UPDATE failed_message_chain SET should_republish = $1 WHERE entity_id = $2")
                .bind(should_republish)
                .bind(entity_id)
                .execute(&self.session.pool)
                .await?
                .rows_affected();
        if affected == 0 {
            return Err(OutboxError::NotFound {
                reason: format!("failed message chain not found: {entity_id}"),
            });
        }
        Ok(())
    }
}
