use crate::decoder;
use crate::error::StreamError;
use crate::sink::EventSink;
use crate::stream::EventStream;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// What the consumer does with a read error other than `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ReadErrorPolicy {
    /// Stop at the first error. Ring-buffer desync does not heal itself.
    #[default]
    Abort,
    /// Keep reading through up to `max_consecutive` failures in a row.
    Retry { max_consecutive: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
    Closed,
    ReadFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub emitted: u64,
    pub lost: u64,
    pub malformed: u64,
    pub exit: ConsumerExit,
}

pub async fn run_consumer<S: EventStream>(
    mut stream: S,
    mut sink: EventSink,
    policy: ReadErrorPolicy,
) -> ConsumerReport {
    info!("[Consumer] Event processing started.");
    let mut emitted = 0u64;
    let mut lost = 0u64;
    let mut malformed = 0u64;
    let mut consecutive_errors = 0u32;

    let exit = loop {
        let batch = match stream.read().await {
            Ok(batch) => {
                consecutive_errors = 0;
                batch
            }
            Err(StreamError::Closed) => {
                info!("[Consumer] Event stream closed, exiting event processing.");
                break ConsumerExit::Closed;
            }
            Err(e) => {
                consecutive_errors += 1;
                match policy {
                    ReadErrorPolicy::Retry { max_consecutive }
                        if consecutive_errors <= max_consecutive =>
                    {
                        warn!(
                            error = %e,
                            attempt = consecutive_errors,
                            max_consecutive,
                            "[Consumer] Error reading event stream, retrying."
                        );
                        continue;
                    }
                    _ => {
                        error!(error = %e, "[Consumer] Error reading event stream, stopping.");
                        break ConsumerExit::ReadFailed(e.to_string());
                    }
                }
            }
        };

        if batch.lost > 0 {
            warn!("[Consumer] Ring buffer full, dropped {} samples.", batch.lost);
            lost += batch.lost;
        }

        for raw in &batch.records {
            match decoder::decode(raw) {
                Ok(event) => {
                    debug!(
                        pid = event.pid,
                        tgid = event.tgid,
                        comm = %event.comm,
                        func = %event.func_name,
                        ts = event.timestamp_ns,
                        "[Consumer] Decoded event."
                    );
                    sink.emit(&event);
                    emitted += 1;
                }
                Err(e) => {
                    warn!(error = %e, "[Consumer] Skipping malformed record.");
                    malformed += 1;
                }
            }
        }
    };

    ConsumerReport {
        emitted,
        lost,
        malformed,
        exit,
    }
}
