use crate::error::StreamError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Notify;

pub mod memory;
pub mod perf;

/// Records delivered by one `read()`, plus how many the producer dropped
/// since the previous read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadBatch {
    pub records: Vec<Bytes>,
    pub lost: u64,
}

impl ReadBatch {
    pub fn new(records: Vec<Bytes>, lost: u64) -> Self {
        Self { records, lost }
    }

    pub fn lost_only(lost: u64) -> Self {
        Self {
            records: Vec::new(),
            lost,
        }
    }
}

#[async_trait]
pub trait EventStream: Send {
    /// Waits until records (or a loss report) are available.
    ///
    /// Returns `StreamError::Closed` once the stream's closer has fired, even
    /// when records are still buffered.
    async fn read(&mut self) -> Result<ReadBatch, StreamError>;

    fn closer(&self) -> StreamCloser;

    fn close(&self) -> bool {
        self.closer().close()
    }
}

struct CloseState {
    closed: AtomicBool,
    notify: Notify,
}

/// 流的关闭句柄，可以克隆给控制器。关闭是消费循环唯一的取消方式。
#[derive(Clone)]
pub struct StreamCloser {
    inner: Arc<CloseState>,
}

impl Default for StreamCloser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCloser {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CloseState {
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Returns `true` only for the call that actually closed the stream.
    pub fn close(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub async fn closed(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // 先注册再检查标志，避免错过 close() 之间的唤醒
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn close_is_idempotent() {
        let closer = StreamCloser::new();
        assert!(!closer.is_closed());
        assert!(closer.close());
        assert!(!closer.close());
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn closed_resolves_for_waiters_and_latecomers() {
        let closer = StreamCloser::new();
        let waiter = {
            let closer = closer.clone();
            tokio::spawn(async move { closer.closed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        closer.close();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke up")
            .unwrap();
        tokio::time::timeout(Duration::from_millis(100), closer.closed())
            .await
            .expect("already closed resolves immediately");
    }
}
