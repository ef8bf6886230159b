//! 事务性 Outbox 领域层基础库（outbox-domain）
//!
//! 实现“事务性发件箱”模式的核心构件：实体变更与其蕴含的集成事件
//! 原子落库，再由后台发布者异步交付消息总线，提供至少一次投递、
//! 可追溯的失败记录与有界可控的重试。
//!
//! - 集成事件协议与类型注册表（`integration_event`、`registry`）
//! - 事件日志与发布状态机、失败链（`event_log`）
//! - 工作单元与瞬时故障重试（`unit_of_work`）
//! - 总线协议与发布者循环（`eventing`）
//!
//! 本 crate 尽量保持与存储与传输实现解耦，仅定义协议与最小必要的
//! 错误类型；内存实现随库提供，Postgres 实现经 `postgres` 特性启用。
//! 应用层编排（实体变更 + 事件记录的原子写入、批次装配）见
//! `outbox-application`。
//!
pub mod entity;
pub mod error;
pub mod event_log;
pub mod eventing;
pub mod integration_event;
pub mod registry;
pub mod unit_of_work;
