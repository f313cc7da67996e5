use anyhow::{Context, Result};
use cloverup_core::{compact_timestamp, display_timestamp, now_utc_rfc3339};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

const RED: &str = "\x1b[0;31m";
const GREEN: &str = "\x1b[0;32m";
const YELLOW: &str = "\x1b[0;33m";
const RESET: &str = "\x1b[0m";

/// Console + file sink behind the `log` facade. Every record is written to
/// stderr with a level color and appended, uncolored, to the session log
/// file. Stdout stays reserved for command output and prompts.
pub struct SessionLog {
    level: LevelFilter,
    color: bool,
    path: PathBuf,
    file: Mutex<Option<File>>,
    console: Mutex<Box<dyn Write + Send>>,
}

impl SessionLog {
    pub fn create(log_dir: impl AsRef<Path>, level: LevelFilter, color: bool) -> Result<Self> {
        Self::with_console(log_dir, level, color, io::stderr())
    }

    pub fn with_console(
        log_dir: impl AsRef<Path>,
        level: LevelFilter,
        color: bool,
        console: impl Write + Send + 'static,
    ) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("create log dir {}", log_dir.display()))?;
        let path = log_dir.join(format!("cloverup_{}.log", compact_timestamp()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log {}", path.display()))?;
        Ok(Self {
            level,
            color,
            path,
            file: Mutex::new(Some(file)),
            console: Mutex::new(Box::new(console)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and releases the log file. Later records only reach the console.
    pub fn close(&self) {
        let line = format!("event=logs_saved logfile={}", self.path.display());
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = writeln!(file, "{}", plain_line(&display_timestamp(), &line));
                let _ = file.flush();
            }
            *guard = None;
        }
        self.write_console(&plain_line(&display_timestamp(), &line));
    }

    // Write errors (closed pipe, detached terminal) are dropped.
    fn write_console(&self, line: &str) {
        if let Ok(mut console) = self.console.lock() {
            let _ = writeln!(console, "{}", line);
        }
    }
}

/// Installs `session` as the global logger and returns the leaked handle.
pub fn install(session: SessionLog) -> Result<&'static SessionLog> {
    let level = session.level;
    let session: &'static SessionLog = Box::leak(Box::new(session));
    log::set_logger(session).map_err(|err| anyhow::anyhow!("install logger: {}", err))?;
    log::set_max_level(level);
    Ok(session)
}

impl Log for SessionLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = display_timestamp();
        let message = record.args().to_string();
        let console = if self.color {
            colored_line(&timestamp, record.level(), &message)
        } else {
            plain_line(&timestamp, &message)
        };
        self.write_console(&console);
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = writeln!(file, "{}", plain_line(&timestamp, &message));
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut console) = self.console.lock() {
            let _ = console.flush();
        }
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

pub fn plain_line(timestamp: &str, message: &str) -> String {
    format!("[{}] {}", timestamp, message)
}

pub fn colored_line(timestamp: &str, level: Level, message: &str) -> String {
    let color = match level {
        Level::Error => RED,
        Level::Warn => YELLOW,
        Level::Info => GREEN,
        Level::Debug | Level::Trace => return plain_line(timestamp, message),
    };
    format!("[{}] {}{}{}", timestamp, color, message, RESET)
}

#[derive(Debug, Serialize, Clone)]
pub struct OperationRecord {
    pub name: String,
    pub succeeded: bool,
    pub details: Vec<String>,
}

/// JSON record of one run, written next to the session log.
#[derive(Debug, Serialize, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at_utc: String,
    pub finished_at_utc: Option<String>,
    pub partition: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub operations: Vec<OperationRecord>,
    pub exit_code: u8,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at_utc: now_utc_rfc3339(),
            finished_at_utc: None,
            partition: None,
            mount_point: None,
            backup_dir: None,
            operations: Vec::new(),
            exit_code: 0,
            error: None,
        }
    }

    pub fn record(&mut self, operation: OperationRecord) {
        self.operations.push(operation);
    }

    pub fn finish(&mut self, exit_code: u8, error: Option<String>) {
        self.finished_at_utc = Some(now_utc_rfc3339());
        self.exit_code = exit_code;
        self.error = error;
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    fn emit(session: &SessionLog, level: Level, message: &str) {
        session.log(
            &Record::builder()
                .level(level)
                .args(format_args!("{}", message))
                .build(),
        );
    }

    #[test]
    fn colors_follow_level() {
        let line = colored_line("2024-01-01 00:00:00", Level::Error, "event=read_only_error");
        assert_eq!(line, "[2024-01-01 00:00:00] \x1b[0;31mevent=read_only_error\x1b[0m");
        assert!(colored_line("t", Level::Warn, "m").contains(YELLOW));
        assert!(colored_line("t", Level::Info, "m").contains(GREEN));
        assert_eq!(colored_line("t", Level::Debug, "m"), "[t] m");
    }

    #[test]
    fn records_are_mirrored_to_file_without_color() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionLog::create(dir.path(), LevelFilter::Info, true).unwrap();
        emit(&session, Level::Error, "event=error_no_efi_partition");
        emit(&session, Level::Debug, "event=efi_candidate partition=disk0s1");
        session.close();

        let text = std::fs::read_to_string(session.path()).unwrap();
        assert!(text.contains("event=error_no_efi_partition"));
        assert!(!text.contains("efi_candidate"));
        assert!(!text.contains('\x1b'));
        assert!(text.lines().last().unwrap().contains("event=logs_saved"));
        assert!(text.lines().all(|line| line.starts_with('[')));
    }

    #[test]
    fn console_lines_go_to_the_given_writer() {
        let dir = tempfile::tempdir().unwrap();
        let console = Captured::default();
        let session =
            SessionLog::with_console(dir.path(), LevelFilter::Info, false, console.clone()).unwrap();
        emit(&session, Level::Info, "event=clover_detected");
        session.close();

        let text = console.text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] event=clover_detected"));
        assert!(lines[1].contains("event=logs_saved"));
    }

    #[test]
    fn closed_console_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            SessionLog::with_console(dir.path(), LevelFilter::Info, true, ClosedPipe).unwrap();
        emit(&session, Level::Warn, "event=partial_backup_left");
        session.flush();
        session.close();
        let text = std::fs::read_to_string(session.path()).unwrap();
        assert!(text.contains("event=partial_backup_left"));
    }

    #[test]
    fn records_after_close_skip_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionLog::create(dir.path(), LevelFilter::Info, false).unwrap();
        session.close();
        emit(&session, Level::Info, "event=late");
        let text = std::fs::read_to_string(session.path()).unwrap();
        assert!(!text.contains("event=late"));
    }

    #[test]
    fn summary_serializes_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = RunSummary::start();
        summary.partition = Some("disk0s1".to_string());
        summary.record(OperationRecord {
            name: "update_drivers".to_string(),
            succeeded: false,
            details: vec!["copy HfsPlus.efi failed".to_string()],
        });
        summary.finish(0, None);
        let path = dir.path().join("run.json");
        summary.write(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["partition"], "disk0s1");
        assert_eq!(value["operations"][0]["succeeded"], false);
        assert!(value["finished_at_utc"].is_string());
    }
}
