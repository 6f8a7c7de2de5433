//! 运行上报
//!
//! 调度与清理循环通过有界通道上报错误与成功投递。每次发送都与取消信号竞争：
//! 关闭后不再产出任何上报；通道只在后台任务退出、发送端被释放后才关闭。
//!
use crate::error::OutboxError;
use crate::event::EventId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 一次成功投递
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub id: EventId,
}

#[derive(Clone)]
pub(crate) struct Reporter {
    token: CancellationToken,
    errors: mpsc::Sender<OutboxError>,
    delivered: mpsc::Sender<Delivered>,
}

impl Reporter {
    pub(crate) fn new(
        token: CancellationToken,
        errors: mpsc::Sender<OutboxError>,
        delivered: mpsc::Sender<Delivered>,
    ) -> Self {
        Self {
            token,
            errors,
            delivered,
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) async fn error(&self, err: OutboxError) {
        warn!(error = %err, "outbox operation failed");
        emit(&self.token, &self.errors, err).await;
    }

    pub(crate) async fn delivered(&self, delivered: Delivered) {
        emit(&self.token, &self.delivered, delivered).await;
    }
}

async fn emit<T: Send>(token: &CancellationToken, tx: &mpsc::Sender<T>, item: T) {
    if token.is_cancelled() {
        return;
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        // 接收端已释放时忽略
        _ = tx.send(item) => {}
    }
}
