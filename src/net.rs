//! 连通性：探测接口与周期性监视
//!
//! 监视器按间隔探测一次，状态变化时向编排器发送 `Command::ConnectivityChanged`。
//! 初始假定在线，因此第一次探测失败就会报告离线。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::SessionClient;
use crate::core::Command;

#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// 以智能体健康检查作为探测（只尝试一次）
pub struct HealthProbe {
    client: Arc<SessionClient>,
}

impl HealthProbe {
    pub fn new(client: Arc<SessionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connectivity for HealthProbe {
    async fn is_online(&self) -> bool {
        match self.client.health_check().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}

pub struct ConnectivityMonitor {
    probe: Arc<dyn Connectivity>,
    interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn Connectivity>, interval: Duration) -> Self {
        Self {
            probe,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// 在后台运行直到 token 取消或编排器停止
    pub fn spawn(self, commands: mpsc::UnboundedSender<Command>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut online = true;
            loop {
                let now = tokio::select! {
                    _ = token.cancelled() => return,
                    now = self.probe.is_online() => now,
                };
                if now != online {
                    online = now;
                    tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
                    if commands.send(Command::ConnectivityChanged(online)).is_err() {
                        return;
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    struct Scripted(Mutex<VecDeque<bool>>);

    #[async_trait]
    impl Connectivity for Scripted {
        async fn is_online(&self) -> bool {
            self.0.lock().ok().and_then(|mut q| q.pop_front()).unwrap_or(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_only_changes() {
        let probe = Arc::new(Scripted(Mutex::new(VecDeque::from([true, false, false, true]))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let monitor = ConnectivityMonitor::new(probe, Duration::from_secs(30)).spawn(tx, token.clone());

        tokio::time::sleep(Duration::from_secs(200)).await;
        token.cancel();
        let _ = monitor.await;

        let mut seen = Vec::new();
        while let Ok(Command::ConnectivityChanged(online)) = rx.try_recv() {
            seen.push(online);
        }
        assert_eq!(seen, vec![false, true]);
    }
}
