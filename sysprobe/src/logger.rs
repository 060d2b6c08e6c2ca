use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

pub type LoggerResult<T> = Result<T, Box<dyn std::error::Error>>;

const DIAGNOSTICS_FILE_PREFIX: &str = "sysprobe.log";

/// `RUST_LOG`, falling back to `info`.
fn filter_from_env() -> LoggerResult<(EnvFilter, String)> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| format!("invalid RUST_LOG '{}': {}", directives, e))?;
    Ok((filter, directives))
}

fn install<W>(writer: W, ansi: bool) -> LoggerResult<String>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, directives) = filter_from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| format!("tracing subscriber already installed: {}", e))?;
    Ok(directives)
}

/// Diagnostics to stderr. Event lines on stdout stay separate.
pub fn init_console_logging() -> LoggerResult<()> {
    install(io::stderr, true)?;
    Ok(())
}

/// 诊断日志按天滚动写入目录，返回的 guard 必须持有到进程退出
pub fn init_file_logging(directory: &Path) -> LoggerResult<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(directory, DIAGNOSTICS_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let directives = install(writer, false)?;

    tracing::info!(
        directory = %directory.display(),
        filter = %directives,
        "Diagnostics logging to rolling file."
    );
    Ok(guard)
}
