#![no_std]

/// 内核进程名长度（TASK_COMM_LEN，包括null终止符）
pub const COMM_LEN: usize = 16;
pub const FUNC_NAME_LEN: usize = 16;
pub const MESSAGE_LEN: usize = 64;

pub const CONFIG_MAP: &str = "CONFIG_MAP";
pub const EVENTS_MAP: &str = "EVENTS";
/// 配置表中唯一的槽位
pub const CONFIG_KEY: u32 = 0;

pub const READ_PROGRAM: &str = "kprobe_sys_read";
pub const WRITE_PROGRAM: &str = "kprobe_sys_write";
pub const READ_SYMBOL: &str = "__x64_sys_read";
pub const WRITE_SYMBOL: &str = "__x64_sys_write";

/// 用户态写入、内核态只读的配置
#[repr(C)]
#[derive(Clone, Copy)]
pub struct KernelConfig {
    pub verbose: u32,
    pub message: [u8; MESSAGE_LEN],
}

/// 每次 kprobe 命中时发往用户态的事件，小端布局
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawEvent {
    pub pid: u32,
    pub tgid: u32,
    pub comm: [u8; COMM_LEN],
    pub func_name: [u8; FUNC_NAME_LEN],
    pub timestamp_ns: u64,
}

pub const KERNEL_CONFIG_SIZE: usize = core::mem::size_of::<KernelConfig>();
pub const RAW_EVENT_SIZE: usize = core::mem::size_of::<RawEvent>();

const _: () = assert!(KERNEL_CONFIG_SIZE == 4 + MESSAGE_LEN);
const _: () = assert!(RAW_EVENT_SIZE == 48);

#[cfg(feature = "user")]
unsafe impl aya::Pod for KernelConfig {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for RawEvent {}
