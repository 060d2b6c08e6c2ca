use crate::error::ChannelError;
use crate::text::FixedText;
use sysprobe_common::{KernelConfig, KERNEL_CONFIG_SIZE, MESSAGE_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Verbosity {
    #[default]
    Disabled = 0,
    Enabled = 1,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Disabled => "disabled",
            Verbosity::Enabled => "enabled",
        }
    }
}

impl From<bool> for Verbosity {
    fn from(verbose: bool) -> Self {
        if verbose {
            Verbosity::Enabled
        } else {
            Verbosity::Disabled
        }
    }
}

/// 启动时写入一次、此后不再修改的内核配置
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigRecord {
    pub verbosity: Verbosity,
    pub message: FixedText<MESSAGE_LEN>,
}

impl ConfigRecord {
    pub fn new(verbosity: Verbosity, message: &str) -> Self {
        Self {
            verbosity,
            message: FixedText::from_str_truncated(message),
        }
    }

    pub fn to_kernel(&self) -> KernelConfig {
        KernelConfig {
            verbose: self.verbosity as u32,
            message: self.message.encode(),
        }
    }

    /// Little-endian wire image, identical to the kernel's view of `KernelConfig`.
    pub fn to_bytes(&self) -> [u8; KERNEL_CONFIG_SIZE] {
        let mut out = [0u8; KERNEL_CONFIG_SIZE];
        out[..4].copy_from_slice(&(self.verbosity as u32).to_le_bytes());
        out[4..].copy_from_slice(&self.message.encode());
        out
    }
}

/// Key/value table the kernel instrumentation reads its configuration from.
pub trait ConfigChannel {
    /// Writes or overwrites `key`. Visible to the kernel once this returns.
    fn set(&mut self, key: u32, record: &ConfigRecord) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_image_matches_kernel_struct() {
        let record = ConfigRecord::new(Verbosity::Enabled, "Default probe message");
        let bytes = record.to_bytes();
        let kernel = record.to_kernel();

        assert_eq!(u32::from_le_bytes(bytes[..4].try_into().unwrap()), kernel.verbose);
        assert_eq!(&bytes[4..], &kernel.message[..]);
        assert_eq!(&bytes[4..25], b"Default probe message");
        assert_eq!(bytes[25], 0);
    }

    #[test]
    fn long_message_is_truncated_to_63_bytes() {
        let record = ConfigRecord::new(Verbosity::Disabled, &"m".repeat(80));
        assert_eq!(record.message.len(), MESSAGE_LEN - 1);
        assert_eq!(record.to_bytes()[KERNEL_CONFIG_SIZE - 1], 0);
    }
}
