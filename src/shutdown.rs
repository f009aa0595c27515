//! 优雅退出管理模块
//!
//! 监听 SIGINT / SIGTERM（Windows 下为 Ctrl+C），把退出原因广播给
//! HTTP 服务器与超时守卫。

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户中断信号 (Ctrl+C)
    Interrupt,
    /// 终止信号 (SIGTERM)
    Terminate,
    /// 应用请求退出
    Application,
}

/// 优雅退出管理器
///
/// 首次触发的原因生效，之后的触发被忽略；先触发后等待也能立即拿到原因。
#[derive(Debug, Clone)]
pub struct ShutdownManager {
    tx: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// 触发优雅退出
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!("触发优雅退出，原因: {:?}", reason);
        }
    }

    /// 等待退出信号
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Application),
            // 发送端与本管理器同生命周期，实际不会关闭
            Err(_) => ShutdownReason::Application,
        }
    }

    /// 启动系统信号监听任务
    pub fn start_signal_handler(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            let manager = self.clone();
            tokio::spawn(async move {
                let reason = tokio::select! {
                    _ = sigint.recv() => ShutdownReason::Interrupt,
                    _ = sigterm.recv() => ShutdownReason::Terminate,
                };
                manager.trigger_shutdown(reason);
            });
        }

        #[cfg(not(unix))]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("监听Ctrl+C信号失败: {}", e);
                    return;
                }
                manager.trigger_shutdown(ShutdownReason::Interrupt);
            });
        }

        Ok(())
    }

    /// 收到退出信号后再等待 `grace`，用于在连接迟迟不释放时强制结束
    pub async fn deadline(&self, grace: Duration) {
        let reason = self.wait_for_shutdown().await;
        tokio::time::sleep(grace).await;
        warn!("退出原因 {:?}：在途请求 {}秒内未完成", reason, grace.as_secs());
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 把服务器 future 与退出超时组合在一起运行
pub async fn serve_until_drained<F>(server: F, manager: &ShutdownManager, grace: Duration)
where
    F: std::future::IntoFuture<Output = std::io::Result<()>>,
{
    tokio::select! {
        res = server.into_future() => {
            if let Err(e) = res {
                error!("服务器运行错误: {}", e);
            }
        }
        _ = manager.deadline(grace) => {
            warn!("优雅退出超时，强制退出");
        }
    }
}
