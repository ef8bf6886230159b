//! 失败链（FailedMessageChain）模型
//!
//! 投递失败的事件按源实体分组成“链”，作为失败重发的选取单元：
//! - 链上的 `should_republish` 是重发批次选取的唯一闸门（建链时默认为真，
//!   置为假即永久排除该实体的自动重试，历史保留不删）；
//! - 单条消息的 `should_skip` 是运维对个别消息的排除开关；
//! - `republished_at` 在该消息重发成功后打点，使其不再进入后续批次。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 一次失败的投递尝试
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct FailedMessage {
    /// 消息唯一标识符
    id: Uuid,
    /// 记录创建时间（链内按此排序，旧者优先）
    creation_time: DateTime<Utc>,
    /// 失败事件的序列化负载
    body: Value,
    /// 失败原因（错误消息）
    message: String,
    /// 错误链的调试形态
    stack_trace: Option<String>,
    /// 事件短类型名
    event_type_short_name: String,
    /// 源集成事件的引用（解码失败等场景下可能缺失）
    event_id: Option<Uuid>,
    /// 运维开关：跳过该条消息的自动重试
    #[builder(default = false)]
    should_skip: bool,
    /// 重发成功时间；为空表示仍待重发
    republished_at: Option<DateTime<Utc>>,
}

impl FailedMessage {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn event_type_short_name(&self) -> &str {
        &self.event_type_short_name
    }

    pub fn event_id(&self) -> Option<Uuid> {
        self.event_id
    }

    pub fn should_skip(&self) -> bool {
        self.should_skip
    }

    pub fn republished_at(&self) -> Option<DateTime<Utc>> {
        self.republished_at
    }

    /// 是否可进入重发批次
    pub fn is_retryable(&self) -> bool {
        !self.should_skip && self.republished_at.is_none()
    }

    pub fn set_should_skip(&mut self, should_skip: bool) {
        self.should_skip = should_skip;
    }

    pub fn mark_republished(&mut self, at: DateTime<Utc>) {
        self.republished_at = Some(at);
    }
}

/// 按实体分组的失败消息链；每个 `entity_id` 至多一条开启的链
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct FailedMessageChain {
    /// 链唯一标识符
    id: Uuid,
    /// 链创建时间
    creation_time: DateTime<Utc>,
    /// 分组键：产生失败事件的实体标识
    entity_id: String,
    /// 重发闸门：为真时链上可重试消息参与自动重发
    #[builder(default = true)]
    should_republish: bool,
    /// 链上的失败消息，旧者在前
    #[builder(default)]
    failed_messages: Vec<FailedMessage>,
}

impl FailedMessageChain {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn should_republish(&self) -> bool {
        self.should_republish
    }

    pub fn failed_messages(&self) -> &[FailedMessage] {
        &self.failed_messages
    }

    pub fn set_should_republish(&mut self, should_republish: bool) {
        self.should_republish = should_republish;
    }

    pub fn push(&mut self, message: FailedMessage) {
        self.failed_messages.push(message);
    }

    /// 链上仍可重试的消息（保持旧者在前）
    pub fn retryable_messages(&self) -> impl Iterator<Item = &FailedMessage> {
        self.failed_messages.iter().filter(|m| m.is_retryable())
    }

    /// 只保留可重试消息（重发批次装配用）
    pub fn retain_retryable(&mut self) {
        self.failed_messages.retain(|m| m.is_retryable());
    }

    pub fn failed_messages_mut(&mut self) -> &mut Vec<FailedMessage> {
        &mut self.failed_messages
    }
}
