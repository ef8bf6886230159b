//! 事件日志（event_log）
//!
//! 集成事件的持久账本与失败链，支持：
//! - 条目模型与发布状态机（`EventLogEntry`/`EventState`，比较并转移）；
//! - 按实体分组的失败链与重发闸门（`FailedMessage`/`FailedMessageChain`）；
//! - 存储协议（`EventLogStore`）与内存实现（`InMemoryEventLogStore`）；
//! - 可选的 Postgres 实现（`postgres` 特性，乐观并发的条件更新）。
//!
//! 该模块聚焦协议与状态机，具体存储后端由上层选择并注入。
//!
mod entry;
mod failed;
mod memory;
mod store;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use entry::{EventLogEntry, EventState};
pub use failed::{FailedMessage, FailedMessageChain};
pub use memory::InMemoryEventLogStore;
pub use store::EventLogStore;
