//! 发布者（Publisher）
//!
//! 长驻后台任务，编排“等待中间件 → 轮询 → 派发 → 空闲”的循环：
//! - 周期从事件来源拉取待发布批次与失败链重发批次，顺序派发；
//! - Outbox 条目走 抢占 → 发布 → 定稿 的状态机，失败记入失败链；
//! - 单事件失败彼此隔离，轮询级异常记录日志后继续下一轮；
//! - 仅取消或中间件就绪超时会终止循环；
//! - 提供关闭与等待的 `PublisherHandle`。
//!
//! 进程内派发保持顺序执行（简单性与批内有序的取舍）；水平扩展时多个
//! 发布者实例的正确性依赖抢占操作的“比较并转移”互斥。
//!
use super::{DispatchOrigin, EventBus, OutboundEvent, OutboundEventSource};
use crate::error::{OutboxError, OutboxResult};
use crate::event_log::EventLogStore;
use bon::Builder;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 发布者配置：启动时装配，运行期不再读取
#[derive(Clone, Copy, Debug)]
pub struct PublisherConfig {
    /// 空轮之后的等待间隔
    pub poll_delay: Duration,
    /// 每轮拉取的待发布事件上限
    pub events_batch_size: usize,
    /// 每轮参与重发的失败链上限
    pub failed_chain_batch_size: usize,
    /// 等待中间件就绪的探测间隔
    pub broker_probe_interval: Duration,
    /// 等待中间件就绪的上限，超时视为致命启动失败
    pub broker_wait_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_secs(1),
            events_batch_size: 50,
            failed_chain_batch_size: 10,
            broker_probe_interval: Duration::from_millis(100),
            broker_wait_timeout: Duration::from_secs(30),
        }
    }
}

/// Publisher：
/// - 周期性从事件来源拉取待发布/待重发事件并交付总线
/// - 把每条事件的结局写回事件日志或失败链
#[derive(Builder)]
pub struct Publisher {
    event_bus: Arc<dyn EventBus>,
    event_source: Arc<dyn OutboundEventSource>,
    event_log: Arc<dyn EventLogStore>,
    #[builder(default)]
    config: PublisherConfig,
}

enum BrokerWait {
    Ready,
    Cancelled,
    TimedOut(OutboxError),
}

impl Publisher {
    /// 启动发布者，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> PublisherHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));

        PublisherHandle {
            token,
            task: Some(task),
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        match self.wait_for_broker(&token).await {
            BrokerWait::Ready => {}
            BrokerWait::Cancelled => return,
            BrokerWait::TimedOut(err) => {
                error!(error = %err, "broker never became ready, publisher stopping");
                return;
            }
        }

        loop {
            if token.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                // 工作清单非空且本轮有实际进展时立即继续；
                // 否则进入 Idle（重发持续失败的轮次不热转）
                Ok((total, progressed)) if total > 0 && progressed => continue,
                Ok(_) => {}
                Err(err) => {
                    // 轮询级异常不终止循环，但也不热转
                    error!(error = %err, "polling outbound events failed");
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = time::sleep(self.config.poll_delay) => {}
            }
        }
    }

    /// 有界等待中间件就绪（可取消）
    async fn wait_for_broker(&self, token: &CancellationToken) -> BrokerWait {
        let deadline = Instant::now() + self.config.broker_wait_timeout;

        while !self.event_bus.is_ready().await {
            if Instant::now() >= deadline {
                return BrokerWait::TimedOut(OutboxError::BrokerUnavailable {
                    waited: self.config.broker_wait_timeout,
                });
            }
            debug!("publisher waiting for broker connection");

            tokio::select! {
                _ = token.cancelled() => return BrokerWait::Cancelled,
                _ = time::sleep(self.config.broker_probe_interval) => {}
            }
        }

        BrokerWait::Ready
    }

    /// 一轮轮询：普通批次在前、失败链批次在后，顺序派发；
    /// 返回（总量，本轮是否有事件落到新结局）
    async fn poll_once(&self) -> OutboxResult<(usize, bool)> {
        let mut events = self
            .event_source
            .fetch_pending(self.config.events_batch_size)
            .await?;
        let failed = self
            .event_source
            .fetch_republishable(self.config.failed_chain_batch_size)
            .await?;
        let failed_count = failed.len();
        events.extend(failed);

        if !events.is_empty() {
            info!(
                total = events.len(),
                republish = failed_count,
                "dispatching outbound events"
            );
        }

        let total = events.len();
        let mut progressed = false;
        for event in events {
            progressed |= self.dispatch(event).await;
        }
        Ok((total, progressed))
    }

    /// 派发一条事件；任何结局都不向批次传播。
    /// 返回该事件是否落到了新结局（他人抢占与重发未遂不算）
    async fn dispatch(&self, item: OutboundEvent) -> bool {
        match item.origin {
            DispatchOrigin::Outbox { event_id } => {
                match self.event_log.mark_event_as_in_progress(event_id).await {
                    Ok(()) => {}
                    Err(OutboxError::StaleStateTransition { actual, .. }) => {
                        // 并发发布者已抢占或条目已定稿
                        debug!(event_id = %event_id, state = ?actual, "event already claimed, skipping");
                        return false;
                    }
                    Err(err) => {
                        warn!(event_id = %event_id, error = %err, "claiming event failed, skipping");
                        return false;
                    }
                }

                match &item.resolution {
                    Ok(event) => match self.event_bus.publish(event.as_ref()).await {
                        Ok(()) => {
                            if let Err(err) =
                                self.event_log.mark_event_as_published(event_id).await
                            {
                                warn!(event_id = %event_id, error = %err, "publish succeeded but finalizing failed");
                            }
                        }
                        Err(err) => self.quarantine(event_id, &item, &err).await,
                    },
                    Err(err) => self.quarantine(event_id, &item, err).await,
                }
                true
            }
            DispatchOrigin::FailedChain {
                message_id,
                event_id,
            } => match &item.resolution {
                Ok(event) => match self.event_bus.publish(event.as_ref()).await {
                    Ok(()) => {
                        info!(message_id = %message_id, event_id = ?event_id, "failed message republished");
                        if let Err(err) = self
                            .event_log
                            .mark_failed_message_republished(message_id)
                            .await
                        {
                            warn!(message_id = %message_id, error = %err, "recording republish outcome failed");
                        }
                        true
                    }
                    Err(err) => {
                        // 留在链上，下一轮继续
                        warn!(message_id = %message_id, entity_id = %item.entity_id, error = %err, "republish failed");
                        false
                    }
                },
                Err(err) => {
                    error!(message_id = %message_id, error = %err, "failed message cannot be decoded, excluding from retry");
                    if let Err(skip_err) = self.event_log.skip_failed_message(message_id).await {
                        warn!(message_id = %message_id, error = %skip_err, "excluding undecodable message failed");
                    }
                    true
                }
            },
        }
    }

    /// 失败定稿：`PublishedFailed` + 按实体入失败链
    async fn quarantine(&self, event_id: Uuid, item: &OutboundEvent, cause: &OutboxError) {
        error!(
            event_id = %event_id,
            event_type = %item.event_type_short_name,
            entity_id = %item.entity_id,
            error = %cause,
            "event could not be published"
        );

        if let Err(err) = self.event_log.mark_event_as_failed(event_id).await {
            warn!(event_id = %event_id, error = %err, "marking event as failed failed");
        }
        if let Err(err) = self
            .event_log
            .add_in_failed_message_chain(
                &item.entity_id,
                &item.event_type_short_name,
                &item.body,
                Some(event_id),
                cause,
            )
            .await
        {
            warn!(event_id = %event_id, error = %err, "recording failed message failed");
        }
    }
}

/// 发布者运行句柄：用于优雅关闭与等待任务结束
pub struct PublisherHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PublisherHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
