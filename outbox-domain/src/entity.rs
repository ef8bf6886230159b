//! 实体（Entity）基础抽象
//!
//! 为参与 Outbox 的领域实体提供统一的标识能力：任何暴露可比较标识的
//! 实体类型都可参与“实体变更 + 事件记录”的原子写入，失败链也按该标识分组。
//!
use std::any::Any;

/// 具备唯一标识的实体抽象
pub trait Entity: Send + Sync {
    /// 实体标识的字符串形态（跨实体类型可比较，作为失败链的分组键）
    fn entity_id(&self) -> String;

    /// 供具体存储实现向下转型到实体的具体类型
    fn as_any(&self) -> &dyn Any;
}
