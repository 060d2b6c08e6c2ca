use std::fmt;
use thiserror::Error;

/// 写入内核配置表失败。都属于启动期致命错误，不重试。
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("configuration table '{0}' not found in the loaded object")]
    TableMissing(String),
    #[error("configuration record is {actual} bytes but the table stores {expected}-byte elements")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("key {key} is outside the configuration table (max entries {max_entries})")]
    KeyOutOfRange { key: u32, max_entries: u32 },
    #[error("kernel rejected configuration write: {0}")]
    Write(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachFailure {
    SymbolNotFound,
    AlreadyAttached,
    PermissionDenied,
    /// 加载的对象中没有对应的 eBPF 程序
    ProgramMissing,
    Other(String),
}

impl fmt::Display for AttachFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachFailure::SymbolNotFound => write!(f, "symbol not found"),
            AttachFailure::AlreadyAttached => write!(f, "already attached"),
            AttachFailure::PermissionDenied => write!(f, "permission denied"),
            AttachFailure::ProgramMissing => write!(f, "instrumentation program missing"),
            AttachFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to attach probe to '{target}': {reason}")]
pub struct AttachError {
    pub target: String,
    pub reason: AttachFailure,
}

impl AttachError {
    pub fn new(target: impl Into<String>, reason: AttachFailure) -> Self {
        Self {
            target: target.into(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamOpenError {
    #[error("event map '{0}' not found in the loaded object")]
    MapMissing(String),
    #[error("no online CPUs to open perf buffers on")]
    NoCpus,
    #[error("stream already opened")]
    AlreadyOpen,
    #[error("failed to open event stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to open event stream: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    /// 流已经被关闭，消费循环唯一的正常退出条件
    #[error("event stream closed")]
    Closed,
    #[error("event stream read failed: {0}")]
    Read(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    pub fn read(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StreamError::Read(err.into())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// 启动阶段的致命错误
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ChannelError),
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    StreamOpen(#[from] StreamOpenError),
    #[error("no probes configured, refusing to run without coverage")]
    NoProbes,
}
