use crate::error::AttachError;
use serde::Deserialize;
use sysprobe_common::{READ_PROGRAM, READ_SYMBOL, WRITE_PROGRAM, WRITE_SYMBOL};

/// A kernel entry point and the instrumentation program bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProbeTarget {
    pub program: String,
    pub symbol: String,
}

impl ProbeTarget {
    pub fn new(program: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            symbol: symbol.into(),
        }
    }

    pub fn default_targets() -> Vec<ProbeTarget> {
        vec![
            ProbeTarget::new(READ_PROGRAM, READ_SYMBOL),
            ProbeTarget::new(WRITE_PROGRAM, WRITE_SYMBOL),
        ]
    }
}

/// A live probe binding that owns an OS resource.
pub trait Attachment: Send {
    fn target_symbol(&self) -> &str;

    /// Releases the binding. Calling it again after a successful release is a no-op.
    fn release(&mut self) -> Result<(), AttachError>;

    fn is_active(&self) -> bool;
}

/// 按相反的获取顺序释放，失败只记录日志
pub fn release_all(attachments: &mut Vec<Box<dyn Attachment>>) -> usize {
    let mut released = 0;
    while let Some(mut attachment) = attachments.pop() {
        match attachment.release() {
            Ok(()) => {
                tracing::info!(
                    "[Probe] Released attachment on '{}'.",
                    attachment.target_symbol()
                );
                released += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "[Probe] Failed to release attachment.");
            }
        }
    }
    released
}
