//! 集成事件（IntegrationEvent）协议
//!
//! 集成事件是一条不可变事实：唯一标识、逻辑类型名、发生时间与负载。
//! 由领域逻辑产出，创建后不再修改；跨进程边界以 JSON 负载传输，
//! 由类型注册表（`registry`）按名重建具体类型。
//!
use crate::error::OutboxResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use uuid::Uuid;

/// 集成事件：对象安全的最小协议，供总线发布与日志记录使用
pub trait IntegrationEvent: Debug + Send + Sync {
    /// 事件唯一标识符
    fn event_id(&self) -> Uuid;

    /// 事件发生时间
    fn occurred_at(&self) -> DateTime<Utc>;

    /// 事件短类型名（用于展示与失败链分组）
    fn event_type_name(&self) -> &str;

    /// 产生该事件的实体标识（失败链按此分组）
    fn entity_id(&self) -> String;

    /// 序列化为 JSON 负载（跨进程传输与日志落盘的标准形态）
    fn payload(&self) -> OutboxResult<Value>;
}

/// 可注册到类型注册表的事件类型（与对象安全的 [`IntegrationEvent`] 分离）
///
/// 关联常量：
/// - `NAME`：事件的稳定短类型名，用于注册与反序列化解析。
///   避免依赖 `type_name::<T>()`，重构改名不应影响已落盘的日志。
pub trait IntegrationEventType: IntegrationEvent + DeserializeOwned + Sized + 'static {
    /// 事件的稳定短类型名
    const NAME: &'static str;
}
