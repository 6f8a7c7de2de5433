//! Outbox 引擎
//!
//! 统一编排入队与两个长驻任务：
//! - 入队：写入存储后通过合并式触发器唤醒调度循环；
//! - 调度循环：周期 tick 或入队触发时排空待投递记录；
//! - 清理循环：周期删除过期的已投递记录；
//! - 提供上报流与关闭/等待的 `OutboxHandle`。
//!
use super::report::{Delivered, Reporter};
use super::EventStream;
use crate::config::OutboxConfig;
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::{EventId, NewEvent, Options};
use crate::persist::DataStore;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Outbox：持有存储、通道、配置与触发器
///
/// 由组合根构造一次，克隆后交给各个生产方使用；克隆共享同一个触发器。
pub struct Outbox<S, E: ?Sized> {
    pub(crate) store: Arc<S>,
    pub(crate) stream: Arc<E>,
    pub(crate) config: OutboxConfig,
    pub(crate) trigger: Arc<Notify>,
}

impl<S, E: ?Sized> Clone for Outbox<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            stream: self.stream.clone(),
            config: self.config,
            trigger: self.trigger.clone(),
        }
    }
}

impl<S, E> Outbox<S, E>
where
    S: DataStore,
    E: EventStream + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, stream: Arc<E>, config: OutboxConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            stream,
            config,
            trigger: Arc::new(Notify::new()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// 入队并唤醒调度循环
    pub async fn enqueue(
        &self,
        payload: impl Into<Vec<u8>>,
        options: Options,
        headers: Options,
    ) -> Result<EventId> {
        let event = NewEvent::new(payload, options, headers);
        self.enqueue_event(event).await
    }

    pub async fn enqueue_event(&self, event: NewEvent) -> Result<EventId> {
        let id = self.store.add(event).await?;
        self.notify();
        Ok(id)
    }

    /// 在调用方事务内入队；提交后由调用方执行 `notify`
    pub async fn enqueue_in(&self, tx: &mut S::Tx, event: NewEvent) -> Result<EventId> {
        self.store.add_in(tx, event).await
    }

    /// 唤醒调度循环；在其醒来前的多次调用合并为一次
    pub fn notify(&self) {
        self.trigger.notify_one();
    }

    /// 启动调度与清理任务
    ///
    /// 取消传入的 `token` 或调用 `OutboxHandle::shutdown` 都会停止两个任务；
    /// 进行中的事务会先提交或回滚。
    pub fn start(&self, token: CancellationToken) -> OutboxHandle {
        let token = token.child_token();
        let (error_tx, error_rx) = mpsc::channel(self.config.report_capacity);
        let (delivered_tx, delivered_rx) = mpsc::channel(self.config.report_capacity);
        let reporter = Reporter::new(token.clone(), error_tx, delivered_tx);
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2);

        // dispatch worker（tick + 触发）
        tasks.push(tokio::spawn(self.clone().dispatch_loop(reporter.clone())));

        // cleanup worker（周期任务）
        {
            let outbox = self.clone();
            let reporter = reporter.clone();

            tasks.push(spawn_periodic(
                token.clone(),
                self.config.cleanup_interval,
                move || {
                    let outbox = outbox.clone();
                    let reporter = reporter.clone();
                    async move {
                        if let Err(err) = outbox.purge().await {
                            reporter.error(err).await;
                        }
                    }
                },
            ));
        }

        info!(
            drain_interval = ?self.config.drain_interval,
            cleanup_interval = ?self.config.cleanup_interval,
            "outbox started"
        );

        OutboxHandle {
            token,
            tasks,
            errors: Some(error_rx),
            delivered: Some(delivered_rx),
        }
    }
}

pub(crate) fn spawn_periodic<F, Fut>(
    token: CancellationToken,
    interval: Duration,
    mut f: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    })
}

/// 运行句柄：上报流、优雅关闭与等待任务结束
///
/// 上报通道有界，调用方需持续消费，否则调度会在上报处等待（关闭时不受影响）。
pub struct OutboxHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    errors: Option<mpsc::Receiver<OutboxError>>,
    delivered: Option<mpsc::Receiver<Delivered>>,
}

impl OutboxHandle {
    /// 错误上报流，只能取出一次；任务全部退出后流结束
    pub fn errors(&mut self) -> Option<ReceiverStream<OutboxError>> {
        self.errors.take().map(ReceiverStream::new)
    }

    /// 成功投递上报流，只能取出一次
    pub fn delivered(&mut self) -> Option<ReceiverStream<Delivered>> {
        self.delivered.take().map(ReceiverStream::new)
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            if let Err(err) = t.await {
                error!(error = %err, "outbox task terminated abnormally");
            }
        }
    }

    /// 关闭并等待两个任务退出
    pub async fn stop(self) {
        self.shutdown();
        self.join().await;
    }
}

impl Drop for OutboxHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
