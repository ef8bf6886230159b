//! 事件日志条目（EventLogEntry）与发布状态机
//!
//! Outbox 的持久化记录：与触发它的实体变更在同一事务中创建，
//! 之后仅通过状态转移操作修改，核心永不删除（保留/归档属外部关注点）。
//!
//! 状态不变量：`NotPublished → InProgress → {Published | PublishedFailed}`，
//! 不跳步、不回退。每个目标状态都有唯一的前置状态，转移采用“比较并转移”：
//! 前置状态不满足即报 `StaleStateTransition`，而非静默覆盖；这是多个
//! 发布者实例并发抢占同一事件时的互斥机制。
//!
use crate::error::{OutboxError, OutboxResult};
use crate::integration_event::IntegrationEvent;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 事件发布状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventState {
    NotPublished,
    InProgress,
    Published,
    PublishedFailed,
}

impl EventState {
    /// 进入该状态所要求的唯一前置状态；`NotPublished` 仅在创建时出现
    fn required_source(self) -> Option<EventState> {
        match self {
            EventState::NotPublished => None,
            EventState::InProgress => Some(EventState::NotPublished),
            EventState::Published => Some(EventState::InProgress),
            EventState::PublishedFailed => Some(EventState::InProgress),
        }
    }
}

impl From<EventState> for i16 {
    fn from(state: EventState) -> Self {
        match state {
            EventState::NotPublished => 0,
            EventState::InProgress => 1,
            EventState::Published => 2,
            EventState::PublishedFailed => 3,
        }
    }
}

impl TryFrom<i16> for EventState {
    type Error = OutboxError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventState::NotPublished),
            1 => Ok(EventState::InProgress),
            2 => Ok(EventState::Published),
            3 => Ok(EventState::PublishedFailed),
            other => Err(OutboxError::InvalidState {
                reason: format!("unknown event state discriminant: {other}"),
            }),
        }
    }
}

/// Outbox 记录：一条集成事件对应一个条目
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// 事件唯一标识符
    event_id: Uuid,
    /// 限定类型名（`<qualifier>::<短名>`，用于反序列化解析）
    event_type_name: String,
    /// 短类型名（用于展示与失败链分组）
    event_type_short_name: String,
    /// 产生该事件的实体标识
    entity_id: String,
    /// 序列化后的事件负载
    content: Value,
    /// 发布状态
    #[builder(default = EventState::NotPublished)]
    state: EventState,
    /// 已尝试投递次数（抢占时递增）
    #[builder(default = 0)]
    times_sent: u32,
    /// 条目创建时间（入库时间，批量拉取按此排序）
    creation_time: DateTime<Utc>,
}

impl EventLogEntry {
    /// 由集成事件构造新条目：`state = NotPublished`，`times_sent = 0`
    pub fn from_event(event: &dyn IntegrationEvent, qualifier: &str) -> OutboxResult<Self> {
        let short_name = event.event_type_name().to_string();
        let type_name = if qualifier.is_empty() {
            short_name.clone()
        } else {
            format!("{qualifier}::{short_name}")
        };

        Ok(EventLogEntry::builder()
            .event_id(event.event_id())
            .event_type_name(type_name)
            .event_type_short_name(short_name)
            .entity_id(event.entity_id())
            .content(event.payload()?)
            .creation_time(Utc::now())
            .build())
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type_name(&self) -> &str {
        &self.event_type_name
    }

    pub fn event_type_short_name(&self) -> &str {
        &self.event_type_short_name
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn times_sent(&self) -> u32 {
        self.times_sent
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// 比较并转移：仅当当前状态等于目标状态的前置状态时才应用
    ///
    /// 抢占（转入 `InProgress`）同时递增 `times_sent`。
    pub fn transition_to(&mut self, to: EventState) -> OutboxResult<()> {
        let Some(expected) = to.required_source() else {
            return Err(OutboxError::InvalidState {
                reason: format!("event {} cannot transition back to NotPublished", self.event_id),
            });
        };

        if self.state != expected {
            return Err(OutboxError::StaleStateTransition {
                event_id: self.event_id,
                expected,
                actual: self.state,
            });
        }

        if to == EventState::InProgress {
            self.times_sent += 1;
        }
        self.state = to;
        Ok(())
    }
}
