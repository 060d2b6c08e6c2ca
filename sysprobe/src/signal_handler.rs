use anyhow::Result;
use tokio::signal::unix::{self, Signal, SignalKind};
use tracing::info;

/// 信号处理器。在启动阶段注册，注册失败属于启动失败。
pub struct SignalHandler {
    term_signal: Signal,
    int_signal: Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGTERM
    Terminate,
    /// SIGINT (Ctrl+C)
    Interrupt,
}

impl SignalHandler {
    pub fn register() -> Result<Self> {
        Ok(Self {
            term_signal: unix::signal(SignalKind::terminate())?,
            int_signal: unix::signal(SignalKind::interrupt())?,
        })
    }

    /// 等待下一个关闭信号
    pub async fn wait_for_shutdown(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.term_signal.recv() => {
                info!("SignalHandler: Received SIGTERM, initiating graceful shutdown.");
                SignalEvent::Terminate
            }
            _ = self.int_signal.recv() => {
                info!("SignalHandler: Received SIGINT (Ctrl+C), initiating graceful shutdown.");
                SignalEvent::Interrupt
            }
        }
    }
}
