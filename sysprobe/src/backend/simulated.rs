//! In-memory kernel side. Lets the full controller lifecycle run without
//! loading anything into the kernel.

use super::Backend;
use crate::config_channel::{ConfigChannel, ConfigRecord};
use crate::error::{AttachError, AttachFailure, ChannelError, StreamOpenError};
use crate::probe::{Attachment, ProbeTarget};
use crate::stream::memory::{MemoryEventStream, SimulatedProducer};
use crate::stream::StreamCloser;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use sysprobe_common::KERNEL_CONFIG_SIZE;

/// One observable step of the simulated kernel side, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelStep {
    ConfigWritten { key: u32 },
    Attached { symbol: String },
    StreamOpened { capacity_bytes: usize },
    Released { symbol: String, stream_closed: bool },
}

/// Array-map stand-in: fixed element size, bounded key range.
pub struct MemoryConfigChannel {
    element_size: usize,
    max_entries: u32,
    state: Arc<Mutex<KernelState>>,
}

impl ConfigChannel for MemoryConfigChannel {
    fn set(&mut self, key: u32, record: &ConfigRecord) -> Result<(), ChannelError> {
        let bytes = record.to_bytes();
        if bytes.len() != self.element_size {
            return Err(ChannelError::SizeMismatch {
                expected: self.element_size,
                actual: bytes.len(),
            });
        }
        if key >= self.max_entries {
            return Err(ChannelError::KeyOutOfRange {
                key,
                max_entries: self.max_entries,
            });
        }
        let mut state = lock(&self.state);
        state.config.insert(key, bytes.to_vec());
        state.journal.push(KernelStep::ConfigWritten { key });
        Ok(())
    }
}

#[derive(Default)]
struct KernelState {
    config: HashMap<u32, Vec<u8>>,
    active: HashSet<String>,
    journal: Vec<KernelStep>,
    producer: Option<SimulatedProducer>,
    closer: Option<StreamCloser>,
}

fn lock(state: &Mutex<KernelState>) -> MutexGuard<'_, KernelState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct SimulatedBackend {
    state: Arc<Mutex<KernelState>>,
    config_table: Option<(usize, u32)>,
    symbols: HashSet<String>,
    failures: HashMap<String, AttachFailure>,
    fail_open: bool,
}

/// Test-side view of a [`SimulatedBackend`] that stays usable after the
/// backend has been moved into a controller.
#[derive(Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<KernelState>>,
}

impl SimulatedBackend {
    /// A kernel exposing the given symbols and a correctly sized config table.
    pub fn new<I, S>(symbols: I) -> (Self, SimulatedHandle)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = Arc::new(Mutex::new(KernelState::default()));
        let backend = Self {
            state: Arc::clone(&state),
            config_table: Some((KERNEL_CONFIG_SIZE, 1)),
            symbols: symbols.into_iter().map(Into::into).collect(),
            failures: HashMap::new(),
            fail_open: false,
        };
        (backend, SimulatedHandle { state })
    }

    pub fn with_default_probes() -> (Self, SimulatedHandle) {
        Self::new(ProbeTarget::default_targets().into_iter().map(|t| t.symbol))
    }

    pub fn without_config_table(mut self) -> Self {
        self.config_table = None;
        self
    }

    pub fn with_config_element_size(mut self, element_size: usize) -> Self {
        self.config_table = Some((element_size, 1));
        self
    }

    pub fn fail_attach(mut self, symbol: &str, reason: AttachFailure) -> Self {
        self.failures.insert(symbol.to_string(), reason);
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

impl Backend for SimulatedBackend {
    type Stream = MemoryEventStream;

    fn config_channel(&mut self) -> Result<Box<dyn ConfigChannel + '_>, ChannelError> {
        let (element_size, max_entries) = self
            .config_table
            .ok_or_else(|| ChannelError::TableMissing(sysprobe_common::CONFIG_MAP.to_string()))?;
        Ok(Box::new(MemoryConfigChannel {
            element_size,
            max_entries,
            state: Arc::clone(&self.state),
        }))
    }

    fn attach(&mut self, target: &ProbeTarget) -> Result<Box<dyn Attachment>, AttachError> {
        if let Some(reason) = self.failures.get(&target.symbol) {
            return Err(AttachError::new(&target.symbol, reason.clone()));
        }
        if !self.symbols.contains(&target.symbol) {
            return Err(AttachError::new(&target.symbol, AttachFailure::SymbolNotFound));
        }
        let mut state = lock(&self.state);
        if !state.active.insert(target.symbol.clone()) {
            return Err(AttachError::new(&target.symbol, AttachFailure::AlreadyAttached));
        }
        state.journal.push(KernelStep::Attached {
            symbol: target.symbol.clone(),
        });
        Ok(Box::new(SimulatedAttachment {
            symbol: target.symbol.clone(),
            active: true,
            state: Arc::clone(&self.state),
        }))
    }

    fn open_stream(&mut self, capacity_bytes: usize) -> Result<MemoryEventStream, StreamOpenError> {
        if self.fail_open {
            return Err(StreamOpenError::Other("simulated open failure".to_string()));
        }
        let mut state = lock(&self.state);
        if state.producer.is_some() {
            return Err(StreamOpenError::AlreadyOpen);
        }
        let (stream, producer) = MemoryEventStream::new(capacity_bytes);
        state.closer = Some(crate::stream::EventStream::closer(&stream));
        state.producer = Some(producer);
        state.journal.push(KernelStep::StreamOpened { capacity_bytes });
        Ok(stream)
    }
}

struct SimulatedAttachment {
    symbol: String,
    active: bool,
    state: Arc<Mutex<KernelState>>,
}

impl Attachment for SimulatedAttachment {
    fn target_symbol(&self) -> &str {
        &self.symbol
    }

    fn release(&mut self) -> Result<(), AttachError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        let mut state = lock(&self.state);
        state.active.remove(&self.symbol);
        let stream_closed = state.closer.as_ref().is_some_and(StreamCloser::is_closed);
        state.journal.push(KernelStep::Released {
            symbol: self.symbol.clone(),
            stream_closed,
        });
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl SimulatedHandle {
    /// What the kernel instrumentation would read at `key`.
    pub fn kernel_view(&self, key: u32) -> Option<Vec<u8>> {
        lock(&self.state).config.get(&key).cloned()
    }

    pub fn active_attachments(&self) -> Vec<String> {
        let mut active: Vec<String> = lock(&self.state).active.iter().cloned().collect();
        active.sort();
        active
    }

    pub fn journal(&self) -> Vec<KernelStep> {
        lock(&self.state).journal.clone()
    }

    /// The kernel-side producer, once the controller has opened the stream.
    pub fn producer(&self) -> Option<SimulatedProducer> {
        lock(&self.state).producer.clone()
    }

    pub fn stream_closed(&self) -> bool {
        lock(&self.state)
            .closer
            .as_ref()
            .is_some_and(StreamCloser::is_closed)
    }

    /// Waits until the stream has been opened and returns its producer.
    pub async fn wait_for_producer(&self) -> SimulatedProducer {
        loop {
            if let Some(producer) = self.producer() {
                return producer;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}
