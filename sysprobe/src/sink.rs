use crate::decoder::EventRecord;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Console view plus optional durable log of decoded events.
pub struct EventSink {
    console: Box<dyn Write + Send>,
    log: Option<File>,
}

impl EventSink {
    pub fn new(console: Box<dyn Write + Send>, log: Option<File>) -> Self {
        Self { console, log }
    }

    pub fn stdout(log: Option<File>) -> Self {
        Self::new(Box::new(io::stdout()), log)
    }

    /// Opens the durable log for appending. Failure degrades to console-only.
    pub fn open_log(path: &Path) -> Option<File> {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o644)
            .open(path)
        {
            Ok(file) => {
                info!("[EventSink] Appending events to {}", path.display());
                Some(file)
            }
            Err(e) => {
                warn!(
                    "[EventSink] Could not open log file {}: {}. Continuing with console output only.",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    pub fn has_log(&self) -> bool {
        self.log.is_some()
    }

    pub fn emit(&mut self, event: &EventRecord) {
        // 两路输出互不影响，任何一路失败都只记录日志
        if let Err(e) = append_line(&mut self.console, console_line(event))
            .and_then(|_| self.console.flush())
        {
            warn!(error = %e, "[EventSink] Failed to write console line.");
        }

        if let Some(log) = self.log.as_mut() {
            let line = log_line(Local::now(), event);
            if let Err(e) = append_line(log, line).and_then(|_| log.sync_data()) {
                warn!(error = %e, "[EventSink] Failed to append to log file.");
            }
        }
    }
}

/// 整行（含换行符）一次写出，O_APPEND 下每行是一次追加
fn append_line<W: Write + ?Sized>(out: &mut W, mut line: String) -> io::Result<()> {
    line.push('\n');
    out.write_all(line.as_bytes())
}

pub fn console_line(event: &EventRecord) -> String {
    format!("hello {} was called", event.func_name)
}

pub fn log_line(at: DateTime<Local>, event: &EventRecord) -> String {
    format!(
        "[{}] hello {} was called by {} (PID: {}, TGID: {})",
        at.format(LOG_TIMESTAMP_FORMAT),
        event.func_name,
        event.comm,
        event.pid,
        event.tgid
    )
}

/// A cloneable in-memory console, for callers that want to inspect what the
/// sink printed.
#[derive(Clone, Default)]
pub struct CapturedConsole {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CapturedConsole {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn bash_read() -> EventRecord {
        EventRecord::new(1234, 1234, "bash", "sys_read", 1000)
    }

    #[test]
    fn console_line_names_the_function() {
        assert_eq!(console_line(&bash_read()), "hello sys_read was called");
    }

    #[test]
    fn log_line_has_nanosecond_timestamp_and_caller() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::nanoseconds(42);
        assert_eq!(
            log_line(at, &bash_read()),
            "[2024-03-09 14:05:07.000000042] hello sys_read was called by bash (PID: 1234, TGID: 1234)"
        );
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<Vec<u8>>,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.writes.push(data.to_vec());
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn each_line_is_a_single_write() {
        let mut out = RecordingWriter::default();
        let line = log_line(Local::now(), &bash_read());
        append_line(&mut out, line.clone()).unwrap();

        assert_eq!(out.writes.len(), 1);
        assert_eq!(out.writes[0], format!("{}\n", line).into_bytes());
    }

    #[test]
    fn emit_writes_console_and_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("syscalls.log");
        let console = CapturedConsole::new();
        let mut sink = EventSink::new(Box::new(console.clone()), EventSink::open_log(&path));
        assert!(sink.has_log());

        sink.emit(&bash_read());
        sink.emit(&EventRecord::new(77, 70, "vim", "sys_write", 2000));

        assert_eq!(
            console.lines(),
            vec!["hello sys_read was called", "hello sys_write was called"]
        );
        let logged = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = logged.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] hello sys_read was called by bash (PID: 1234, TGID: 1234)"));
        assert!(lines[1].contains("hello sys_write was called by vim (PID: 77, TGID: 70)"));
    }

    #[test]
    fn log_is_appended_not_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("syscalls.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let mut sink = EventSink::new(Box::new(CapturedConsole::new()), EventSink::open_log(&path));
        sink.emit(&bash_read());

        let logged = std::fs::read_to_string(&path).unwrap();
        assert!(logged.starts_with("previous run\n"));
        assert_eq!(logged.lines().count(), 2);
    }

    #[test]
    fn unopenable_log_degrades_to_console_only() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-dir").join("syscalls.log");
        let console = CapturedConsole::new();
        let mut sink = EventSink::new(Box::new(console.clone()), EventSink::open_log(&missing));
        assert!(!sink.has_log());

        sink.emit(&bash_read());
        assert_eq!(console.lines(), vec!["hello sys_read was called"]);
        assert!(!missing.exists());
    }
}
