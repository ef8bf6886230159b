//! 事件日志存储（EventLogStore）协议
//!
//! 集成事件及其投递状态的持久账本，失败链与之共享同一持久化边界。
//! 事件状态的全部修改都经由本协议的“比较并转移”操作或事务内写入完成，
//! 任何其他组件都不得直接改写状态。
//!
use crate::error::{OutboxError, OutboxResult};
use crate::event_log::{EventLogEntry, FailedMessageChain};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// 事件日志与失败链的存储协议
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// 拉取待发布条目的快照：仅 `NotPublished`，按创建时间旧者优先，
    /// 数量不超过 `batch_size`；不修改任何状态
    async fn retrieve_pending_event_logs(
        &self,
        batch_size: usize,
    ) -> OutboxResult<Vec<EventLogEntry>>;

    /// 写入新条目；调用方有进行中的事务时必须落在该事务内，
    /// 与触发它的实体写入同生共死
    async fn save_event(&self, entry: &EventLogEntry) -> OutboxResult<()>;

    /// 抢占：`NotPublished → InProgress`（比较并转移，递增 `times_sent`）
    ///
    /// 并发发布者对同一事件的抢占恰有一个成功，其余得到
    /// [`OutboxError::StaleStateTransition`]。
    async fn mark_event_as_in_progress(&self, event_id: Uuid) -> OutboxResult<()>;

    /// 定稿：`InProgress → Published`（比较并转移）
    async fn mark_event_as_published(&self, event_id: Uuid) -> OutboxResult<()>;

    /// 定稿：`InProgress → PublishedFailed`（比较并转移）
    async fn mark_event_as_failed(&self, event_id: Uuid) -> OutboxResult<()>;

    /// 指定实体是否已存在失败链
    async fn failed_message_chain_exists(&self, entity_id: &str) -> OutboxResult<bool>;

    /// 向实体的失败链追加一条失败消息（链不存在则创建），返回消息标识
    async fn add_in_failed_message_chain(
        &self,
        entity_id: &str,
        event_type_short_name: &str,
        body: &Value,
        event_id: Option<Uuid>,
        error: &OutboxError,
    ) -> OutboxResult<Uuid>;

    /// 选取至多 `chain_batch_size` 条 `should_republish = true` 的链，
    /// 每条链仅携带其可重试消息（未跳过且未重发成功），链内旧者优先；
    /// 链之间的顺序不作保证
    async fn republishable_chains(
        &self,
        chain_batch_size: usize,
    ) -> OutboxResult<Vec<FailedMessageChain>>;

    /// 记录一条失败消息重发成功（打点 `republished_at`）
    async fn mark_failed_message_republished(&self, message_id: Uuid) -> OutboxResult<()>;

    /// 运维开关：跳过单条失败消息的自动重试
    async fn skip_failed_message(&self, message_id: Uuid) -> OutboxResult<()>;

    /// 运维开关：开启/关闭整条链的自动重发
    async fn set_chain_republish(
        &self,
        entity_id: &str,
        should_republish: bool,
    ) -> OutboxResult<()>;
}
