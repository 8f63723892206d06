use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 调度器、Worker池的各个执行槽都订阅同一个广播通道，
/// 关闭只触发一次，重复调用是无操作
pub struct ShutdownManager {
    /// 关闭信号发送器
    shutdown_tx: broadcast::Sender<()>,
    /// 是否已经关闭
    is_shutdown: Arc<RwLock<bool>>,
}

impl ShutdownManager {
    /// 创建新的关闭管理器
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx,
            is_shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// 供需要自行派生订阅者的组件使用
    pub fn sender(&self) -> &broadcast::Sender<()> {
        &self.shutdown_tx
    }

    /// 触发关闭
    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        if *is_shutdown {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        *is_shutdown = true;

        let subscriber_count = self.shutdown_tx.receiver_count();
        info!("发送关闭信号给 {} 个订阅者", subscriber_count);

        // 忽略错误（可能没有接收者）
        let _ = self.shutdown_tx.send(());
    }

    /// 检查是否已经关闭
    pub async fn is_shutdown(&self) -> bool {
        *self.is_shutdown.read().await
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ShutdownManager {
    fn clone(&self) -> Self {
        Self {
            shutdown_tx: self.shutdown_tx.clone(),
            is_shutdown: Arc::clone(&self.is_shutdown),
        }
    }
}
