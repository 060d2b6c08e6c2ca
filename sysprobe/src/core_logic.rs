use crate::{
    backend::ebpf::{raise_memlock_limit, EbpfBackend},
    config::AppConfig,
    config_channel::ConfigRecord,
    controller::{Controller, StopReason},
    sink::EventSink,
    signal_handler::SignalHandler,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::io::Write;
use tracing::{error, info, warn};

/// Builds the runtime, runs the probe to completion and returns the process exit code.
pub fn async_runtime(app_config: AppConfig) -> i32 {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sysprobe")
        .build()
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Async runtime: Error from {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        match probe_core_logic(app_config).await {
            Ok(()) => 0,
            Err(e) => {
                error!("Core logic error: {:#}", e);
                eprintln!("Error: {:#}", e);
                1
            }
        }
    })
}

fn print_banner(record: &ConfigRecord) {
    println!("sysprobe eBPF Probe");
    println!("===================");
    println!("Verbose mode: {}", record.verbosity.as_str());
    println!("Message: {}", record.message);
    println!("Press Ctrl+C to stop");
    println!();
}

pub const SHUTDOWN_NOTICE: &str = "\nReceived termination signal. Shutting down gracefully...";

/// Resolves with `signal`, printing the shutdown notice first. The controller
/// only closes the stream after this future completes.
pub async fn announce_shutdown<F, W>(signal: F, mut out: W)
where
    F: Future<Output = ()>,
    W: Write,
{
    signal.await;
    let _ = writeln!(out, "{}", SHUTDOWN_NOTICE).and_then(|_| out.flush());
}

async fn probe_core_logic(config: AppConfig) -> Result<()> {
    let settings = config.to_controller_settings();
    print_banner(&settings.config);

    // 1. 先注册信号，保证之后任何时刻的 Ctrl+C 都能触发有序关闭
    let mut signals = SignalHandler::register().context("failed to register signal handlers")?;

    // 2. 加载 eBPF 对象
    raise_memlock_limit()?;
    let backend = EbpfBackend::load_file(&config.object_path)?;

    // 3. 事件输出，日志文件打不开时降级为仅控制台
    let log_file = config.log_file.as_deref().and_then(EventSink::open_log);
    let sink = EventSink::stdout(log_file);

    // 4. 配置 -> 挂载 -> 消费 -> 等待信号 -> 关闭
    let symbols: Vec<&str> = settings.probes.iter().map(|p| p.symbol.as_str()).collect();
    println!("Attaching probes to {}...", symbols.join(" and "));

    let controller = Controller::new(backend, settings);
    let summary = controller
        .run(
            sink,
            announce_shutdown(
                async move {
                    signals.wait_for_shutdown().await;
                },
                std::io::stdout(),
            ),
        )
        .await?;

    if summary.stop_reason == StopReason::ConsumerEnded {
        warn!("Event consumer stopped on its own, shutting down.");
    }
    if !summary.drained_in_time {
        warn!("Consumer was still running after the grace period; last event may be incomplete.");
    }
    if let Some(report) = &summary.report {
        info!(
            emitted = report.emitted,
            lost = report.lost,
            malformed = report.malformed,
            "Application Core Logic: Event totals."
        );
    }
    println!("eBPF probe shutdown complete.");
    Ok(())
}
