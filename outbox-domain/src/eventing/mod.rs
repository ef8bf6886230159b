//! 事件子系统（eventing）
//!
//! 提供事件发布侧的基础抽象与运行时：
//! - `EventBus`：就绪探测与发布的统一接口；
//! - `OutboundEvent`/`OutboundEventSource`：发布者的工作单元与轮询来源；
//! - `Publisher`：编排 等待中间件 → 轮询 → 派发 → 空闲 的长驻循环；
//! - `InMemoryEventBus`：测试、示例与本地开发用的内存实现。
//!
//! 该模块仅定义协议与发布循环，不绑定具体消息中间件实现。
//!
pub mod bus;
pub mod bus_inmemory;
pub mod outbound;
pub mod publisher;

pub use bus::EventBus;
pub use bus_inmemory::{InMemoryEventBus, PublishedRecord};
pub use outbound::{DispatchOrigin, OutboundEvent, OutboundEventSource};
pub use publisher::{Publisher, PublisherConfig, PublisherHandle};
