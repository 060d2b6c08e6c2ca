use super::Backend;
use crate::config_channel::{ConfigChannel, ConfigRecord};
use crate::error::{AttachError, AttachFailure, ChannelError, StreamOpenError};
use crate::probe::{Attachment, ProbeTarget};
use crate::stream::perf::PerfEventStream;
use anyhow::{Context, Result};
use aya::{
    maps::{Array, MapData, MapError},
    programs::{
        kprobe::KProbeLink,
        links::Link,
        KProbe, ProgramError,
    },
    Ebpf,
};
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource, RLIM_INFINITY};
use std::collections::HashSet;
use std::path::Path;
use sysprobe_common::{KernelConfig, CONFIG_MAP, EVENTS_MAP, RAW_EVENT_SIZE};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, warn};

/// eBPF 需要锁定内存页，旧内核上受 RLIMIT_MEMLOCK 限制
pub fn raise_memlock_limit() -> Result<()> {
    setrlimit(Resource::RLIMIT_MEMLOCK, RLIM_INFINITY, RLIM_INFINITY)
        .context("failed to raise RLIMIT_MEMLOCK")?;
    debug!("[EbpfBackend] RLIMIT_MEMLOCK raised to infinity.");
    Ok(())
}

/// The aya-backed kernel side: the loaded object, its maps and kprobes.
pub struct EbpfBackend {
    bpf: Ebpf,
    loaded_programs: HashSet<String>,
    stream_opened: bool,
}

impl EbpfBackend {
    /// Loads the object file and starts forwarding kernel-side log records.
    /// Must be called inside a tokio runtime.
    pub fn load_file(path: &Path) -> Result<Self> {
        info!("[EbpfBackend] Loading eBPF object from {}", path.display());
        let mut bpf = Ebpf::load_file(path)
            .with_context(|| format!("failed to load eBPF object {}", path.display()))?;
        spawn_kernel_logger(&mut bpf);

        Ok(Self {
            bpf,
            loaded_programs: HashSet::new(),
            stream_opened: false,
        })
    }
}

fn spawn_kernel_logger(bpf: &mut Ebpf) {
    let logger = match aya_log::EbpfLogger::init(bpf) {
        Ok(logger) => logger,
        Err(e) => {
            warn!("[EbpfBackend] Failed to initialize eBPF logger: {}", e);
            return;
        }
    };
    let mut logger = match AsyncFd::with_interest(logger, tokio::io::Interest::READABLE) {
        Ok(fd) => fd,
        Err(e) => {
            warn!("[EbpfBackend] Failed to register eBPF logger fd: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            let mut guard = match logger.readable_mut().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("[EbpfBackend] eBPF logger stopped: {}", e);
                    break;
                }
            };
            guard.get_inner_mut().flush();
            guard.clear_ready();
        }
    });
}

impl Backend for EbpfBackend {
    type Stream = PerfEventStream;

    fn config_channel(&mut self) -> Result<Box<dyn ConfigChannel + '_>, ChannelError> {
        let map = self
            .bpf
            .map_mut(CONFIG_MAP)
            .ok_or_else(|| ChannelError::TableMissing(CONFIG_MAP.to_string()))?;
        let array = Array::<_, KernelConfig>::try_from(map).map_err(channel_error)?;
        Ok(Box::new(EbpfConfigChannel { array }))
    }

    fn attach(&mut self, target: &ProbeTarget) -> Result<Box<dyn Attachment>, AttachError> {
        let program: &mut KProbe = self
            .bpf
            .program_mut(&target.program)
            .ok_or_else(|| AttachError::new(&target.symbol, AttachFailure::ProgramMissing))?
            .try_into()
            .map_err(|e: ProgramError| {
                AttachError::new(&target.symbol, AttachFailure::Other(e.to_string()))
            })?;

        if !self.loaded_programs.contains(&target.program) {
            program
                .load()
                .map_err(|e| AttachError::new(&target.symbol, classify_program_error(&e)))?;
            self.loaded_programs.insert(target.program.clone());
        }

        let link_id = program
            .attach(&target.symbol, 0)
            .map_err(|e| AttachError::new(&target.symbol, classify_program_error(&e)))?;
        let link = program
            .take_link(link_id)
            .map_err(|e| AttachError::new(&target.symbol, classify_program_error(&e)))?;
        info!(
            "[EbpfBackend] kprobe '{}' attached to '{}'.",
            target.program, target.symbol
        );

        Ok(Box::new(EbpfAttachment {
            symbol: target.symbol.clone(),
            link: Some(link),
        }))
    }

    fn open_stream(&mut self, capacity_bytes: usize) -> Result<PerfEventStream, StreamOpenError> {
        if self.stream_opened {
            return Err(StreamOpenError::AlreadyOpen);
        }
        let map = self
            .bpf
            .take_map(EVENTS_MAP)
            .ok_or_else(|| StreamOpenError::MapMissing(EVENTS_MAP.to_string()))?;
        let stream = PerfEventStream::open(map, capacity_bytes, RAW_EVENT_SIZE)?;
        self.stream_opened = true;
        Ok(stream)
    }
}

struct EbpfConfigChannel<'a> {
    array: Array<&'a mut MapData, KernelConfig>,
}

impl ConfigChannel for EbpfConfigChannel<'_> {
    fn set(&mut self, key: u32, record: &ConfigRecord) -> Result<(), ChannelError> {
        self.array
            .set(key, record.to_kernel(), 0)
            .map_err(channel_error)
    }
}

fn channel_error(err: MapError) -> ChannelError {
    match err {
        MapError::InvalidValueSize { size, expected } => ChannelError::SizeMismatch {
            expected,
            actual: size,
        },
        MapError::OutOfBounds { index, max_entries } => ChannelError::KeyOutOfRange {
            key: index,
            max_entries,
        },
        other => ChannelError::Write(other.to_string()),
    }
}

struct EbpfAttachment {
    symbol: String,
    link: Option<KProbeLink>,
}

impl Attachment for EbpfAttachment {
    fn target_symbol(&self) -> &str {
        &self.symbol
    }

    fn release(&mut self) -> Result<(), AttachError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        link.detach()
            .map_err(|e| AttachError::new(&self.symbol, AttachFailure::Other(e.to_string())))
    }

    fn is_active(&self) -> bool {
        self.link.is_some()
    }
}

fn classify_program_error(err: &ProgramError) -> AttachFailure {
    if matches!(err, ProgramError::AlreadyAttached) {
        return AttachFailure::AlreadyAttached;
    }
    // 沿着 source 链找到底层的 errno
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(code) = e
            .downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::raw_os_error)
        {
            return classify_errno(Errno::from_raw(code));
        }
        source = e.source();
    }
    AttachFailure::Other(err.to_string())
}

fn classify_errno(errno: Errno) -> AttachFailure {
    match errno {
        Errno::ENOENT | Errno::EINVAL => AttachFailure::SymbolNotFound,
        Errno::EEXIST | Errno::EBUSY => AttachFailure::AlreadyAttached,
        Errno::EPERM | Errno::EACCES => AttachFailure::PermissionDenied,
        other => AttachFailure::Other(other.desc().to_string()),
    }
}
