use super::{EventStream, ReadBatch, StreamCloser};
use crate::error::{StreamError, StreamOpenError};
use async_trait::async_trait;
use aya::{
    maps::{
        perf::{PerfEventArray, PerfEventArrayBuffer},
        Map, MapData,
    },
    util::online_cpus,
};
use bytes::{Bytes, BytesMut};
use futures::future::select_all;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

const PAGE_SIZE: usize = 4096;
const SCRATCH_BUFFERS: usize = 16;
const SCRATCH_CAPACITY: usize = 1024;

/// Per-CPU perf buffers of the `EVENTS` map, read as one stream.
pub struct PerfEventStream {
    buffers: Vec<AsyncFd<PerfEventArrayBuffer<MapData>>>,
    cpu_ids: Vec<u32>,
    scratch: Vec<BytesMut>,
    record_size: usize,
    closer: StreamCloser,
}

impl PerfEventStream {
    /// Opens one perf buffer per online CPU. Must be called inside a tokio runtime.
    pub fn open(
        map: Map,
        capacity_bytes: usize,
        record_size: usize,
    ) -> Result<Self, StreamOpenError> {
        let mut events = PerfEventArray::try_from(map)
            .map_err(|e| StreamOpenError::Other(format!("not a perf event array: {}", e)))?;
        let cpus = online_cpus()
            .map_err(|(path, e)| StreamOpenError::Other(format!("{}: {}", path, e)))?;
        if cpus.is_empty() {
            return Err(StreamOpenError::NoCpus);
        }

        let page_count = page_count_for(capacity_bytes);
        let mut buffers = Vec::with_capacity(cpus.len());
        for &cpu_id in &cpus {
            let perf_buf = events.open(cpu_id, Some(page_count)).map_err(|e| {
                StreamOpenError::Other(format!("perf buffer for CPU {}: {}", cpu_id, e))
            })?;
            buffers.push(AsyncFd::new(perf_buf)?);
        }
        info!(
            "[PerfEventStream] Opened {} per-CPU buffers ({} pages each).",
            buffers.len(),
            page_count
        );

        Ok(Self {
            buffers,
            cpu_ids: cpus,
            scratch: (0..SCRATCH_BUFFERS)
                .map(|_| BytesMut::with_capacity(SCRATCH_CAPACITY))
                .collect(),
            record_size,
            closer: StreamCloser::new(),
        })
    }
}

#[async_trait]
impl EventStream for PerfEventStream {
    async fn read(&mut self) -> Result<ReadBatch, StreamError> {
        let closer = self.closer.clone();
        let Self {
            buffers,
            cpu_ids,
            scratch,
            record_size,
            ..
        } = self;

        loop {
            if closer.is_closed() {
                return Err(StreamError::Closed);
            }
            let waits = buffers.iter_mut().map(|fd| Box::pin(fd.readable_mut()));

            tokio::select! {
                biased;
                _ = closer.closed() => return Err(StreamError::Closed),
                (ready, index, pending) = select_all(waits) => {
                    drop(pending);
                    let mut guard = ready.map_err(StreamError::read)?;
                    let events = guard
                        .get_inner_mut()
                        .read_events(scratch)
                        .map_err(StreamError::read)?;
                    // 缓冲区读空后才清除就绪状态，否则会丢失边沿唤醒
                    if !guard.get_inner().readable() {
                        guard.clear_ready();
                    }
                    if events.read == 0 && events.lost == 0 {
                        continue;
                    }

                    debug!(
                        cpu = cpu_ids[index],
                        read = events.read,
                        lost = events.lost,
                        "[PerfEventStream] Drained perf buffer."
                    );
                    let records = scratch
                        .iter_mut()
                        .take(events.read)
                        .map(|buf| {
                            let record = Bytes::copy_from_slice(strip_sample_padding(buf, *record_size));
                            buf.clear();
                            record
                        })
                        .collect();
                    return Ok(ReadBatch::new(records, events.lost as u64));
                }
            }
        }
    }

    fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }
}

/// perf 页数必须是 2 的幂
fn page_count_for(capacity_bytes: usize) -> usize {
    capacity_bytes.div_ceil(PAGE_SIZE).max(1).next_power_of_two()
}

/// The kernel pads raw perf samples so that the u32 size header plus data is
/// 8-byte aligned.
fn padded_sample_len(record_size: usize) -> usize {
    (record_size + 4).next_multiple_of(8) - 4
}

fn strip_sample_padding(sample: &[u8], record_size: usize) -> &[u8] {
    if sample.len() != record_size && sample.len() == padded_sample_len(record_size) {
        &sample[..record_size]
    } else {
        sample
    }
}
