//! In-process event stream. Stands in for the kernel perf buffer in tests and
//! in [`SimulatedBackend`](crate::backend::simulated::SimulatedBackend).

use super::{EventStream, ReadBatch, StreamCloser};
use crate::decoder::EventRecord;
use crate::error::StreamError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub struct MemoryEventStream {
    rx: mpsc::UnboundedReceiver<Result<ReadBatch, StreamError>>,
    closer: StreamCloser,
    capacity_bytes: usize,
}

/// Producer half. Plays the kernel side of a [`MemoryEventStream`].
#[derive(Clone)]
pub struct SimulatedProducer {
    tx: mpsc::UnboundedSender<Result<ReadBatch, StreamError>>,
    closer: StreamCloser,
}

impl MemoryEventStream {
    pub fn new(capacity_bytes: usize) -> (Self, SimulatedProducer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closer = StreamCloser::new();
        let stream = Self {
            rx,
            closer: closer.clone(),
            capacity_bytes,
        };
        (stream, SimulatedProducer { tx, closer })
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
}

#[async_trait]
impl EventStream for MemoryEventStream {
    async fn read(&mut self) -> Result<ReadBatch, StreamError> {
        if self.closer.is_closed() {
            return Err(StreamError::Closed);
        }
        let closer = self.closer.clone();
        tokio::select! {
            biased;
            _ = closer.closed() => Err(StreamError::Closed),
            next = self.rx.recv() => match next {
                Some(item) => item,
                // 生产者全部退出后，像内核一样保持阻塞直到关闭
                None => {
                    closer.closed().await;
                    Err(StreamError::Closed)
                }
            },
        }
    }

    fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }
}

impl SimulatedProducer {
    /// Queues one batch. Returns `false` once the consumer side is gone.
    pub fn push_batch(&self, batch: ReadBatch) -> bool {
        self.tx.send(Ok(batch)).is_ok()
    }

    pub fn push_raw(&self, raw: impl Into<Bytes>) -> bool {
        self.push_batch(ReadBatch::new(vec![raw.into()], 0))
    }

    pub fn push_event(&self, event: &EventRecord) -> bool {
        self.push_raw(Bytes::copy_from_slice(&event.encode()))
    }

    pub fn report_lost(&self, lost: u64) -> bool {
        self.push_batch(ReadBatch::lost_only(lost))
    }

    pub fn fail(&self, message: &str) -> bool {
        self.tx
            .send(Err(StreamError::read(message.to_string())))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}
