#![cfg_attr(feature = "build-ebpf", no_std)]
#![cfg_attr(feature = "build-ebpf", no_main)]

// 将 eBPF 相关代码放到一个 cfg 模块里，避免到处写 #[cfg(...)]
#[cfg(feature = "build-ebpf")]
mod ebpf {
    use aya_ebpf::{
        helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_ktime_get_ns},
        macros::{kprobe, map},
        maps::{Array, PerfEventArray},
        programs::ProbeContext,
    };
    use aya_log_ebpf::info;
    use sysprobe_common::{KernelConfig, RawEvent, COMM_LEN, CONFIG_KEY, FUNC_NAME_LEN};

    #[map]
    static CONFIG_MAP: Array<KernelConfig> = Array::with_max_entries(1, 0);

    #[map]
    static EVENTS: PerfEventArray<RawEvent> = PerfEventArray::new(0);

    #[kprobe]
    pub fn kprobe_sys_read(ctx: ProbeContext) -> u32 {
        emit_event(&ctx, "sys_read")
    }

    #[kprobe]
    pub fn kprobe_sys_write(ctx: ProbeContext) -> u32 {
        emit_event(&ctx, "sys_write")
    }

    fn emit_event(ctx: &ProbeContext, func_name: &str) -> u32 {
        // 用户态尚未写入配置时不产生事件
        let Some(config) = CONFIG_MAP.get(CONFIG_KEY) else {
            return 0;
        };

        let pid_tgid = bpf_get_current_pid_tgid();
        let pid = pid_tgid as u32;
        let tgid = (pid_tgid >> 32) as u32;
        let comm = bpf_get_current_comm().unwrap_or([0u8; COMM_LEN]);

        let mut name = [0u8; FUNC_NAME_LEN];
        let src = func_name.as_bytes();
        let mut i = 0;
        while i < src.len() && i < FUNC_NAME_LEN - 1 {
            name[i] = src[i];
            i += 1;
        }

        let event = RawEvent {
            pid,
            tgid,
            comm,
            func_name: name,
            timestamp_ns: unsafe { bpf_ktime_get_ns() },
        };
        EVENTS.output(ctx, &event, 0);

        if config.verbose != 0 {
            info!(ctx, "hello {} was called by PID {}", func_name, pid);
        }
        0
    }

    #[link_section = "license"]
    #[no_mangle]
    static LICENSE: [u8; 4] = *b"GPL\0";

    // 提供 panic 处理，仅在 eBPF 特性开启时使用（no_std 环境）
    #[cfg(not(test))]
    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        loop {}
    }
}

// 未启用 eBPF 时，提供一个空的 std main，避免宿主构建报错。
#[cfg(not(feature = "build-ebpf"))]
fn main() {
    eprintln!("sysprobe-ebpf built without 'build-ebpf' feature; skipping eBPF program");
}
