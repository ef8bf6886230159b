//! 事件类型注册表（EventTypeRegistry）
//!
//! 事件在日志中以“限定类型名 + JSON 负载”的形态存储；重建具体类型
//! 需要一份应用启动时提供的 名称 → 构造器 映射。
//! - 注册以短类型名为键，运行期只读；
//! - `qualifier` 为模块限定名前缀，写入日志的限定名为 `<qualifier>::<短名>`，
//!   解析时校验前缀，拒绝来自其他模块域的条目。
//!
use crate::error::{OutboxError, OutboxResult};
use crate::integration_event::{IntegrationEvent, IntegrationEventType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type EventFactory = Arc<dyn Fn(&Value) -> OutboxResult<Box<dyn IntegrationEvent>> + Send + Sync>;

/// 名称 → 构造器 的事件类型注册表，应用启动时装配后不再变化
pub struct EventTypeRegistry {
    qualifier: String,
    factories: HashMap<&'static str, EventFactory>,
}

impl EventTypeRegistry {
    /// 创建注册表；`qualifier` 为空时限定名即短名
    pub fn new(qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
            factories: HashMap::new(),
        }
    }

    /// 注册一个事件类型（以 `E::NAME` 为键）
    pub fn register<E>(&mut self) -> &mut Self
    where
        E: IntegrationEventType,
    {
        let factory: EventFactory = Arc::new(|payload: &Value| {
            let event: E =
                serde_json::from_value(payload.clone()).map_err(|e| OutboxError::Deserialization {
                    type_name: E::NAME.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Box::new(event) as Box<dyn IntegrationEvent>)
        });

        self.factories.insert(E::NAME, factory);
        self
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// 组合短名为限定类型名（写入日志的形态）
    pub fn qualified(&self, short_name: &str) -> String {
        if self.qualifier.is_empty() {
            short_name.to_string()
        } else {
            format!("{}::{}", self.qualifier, short_name)
        }
    }

    /// 按限定类型名重建事件；限定名前缀不匹配或短名未注册均视为解析失败
    pub fn deserialize(
        &self,
        type_name: &str,
        payload: &Value,
    ) -> OutboxResult<Box<dyn IntegrationEvent>> {
        let short_name = self.strip_qualifier(type_name)?;
        self.deserialize_short(short_name, payload)
    }

    /// 按短类型名重建事件（失败链中的消息仅存短名）
    pub fn deserialize_short(
        &self,
        short_name: &str,
        payload: &Value,
    ) -> OutboxResult<Box<dyn IntegrationEvent>> {
        let factory =
            self.factories
                .get(short_name)
                .ok_or_else(|| OutboxError::UnknownEventType {
                    type_name: self.qualified(short_name),
                })?;

        factory(payload)
    }

    fn strip_qualifier<'a>(&self, type_name: &'a str) -> OutboxResult<&'a str> {
        if self.qualifier.is_empty() {
            return Ok(type_name);
        }

        type_name
            .strip_prefix(self.qualifier.as_str())
            .and_then(|rest| rest.strip_prefix("::"))
            .ok_or_else(|| OutboxError::UnknownEventType {
                type_name: type_name.to_string(),
            })
    }
}
