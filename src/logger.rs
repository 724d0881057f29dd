//! `log` backend that keeps one file per run.
//!
//! Records go to `roomstage.log` under a `RoomStage` folder in the user's
//! data directory. [`init`] truncates it, so earlier runs never pile up.
//! If the file can't be opened, records are discarded and the host keeps
//! running.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

const APP_FOLDER: &str = "RoomStage";
const FILE_NAME: &str = "roomstage.log";

static SINK: OnceLock<Sink> = OnceLock::new();
static LOGGER: SessionLogger = SessionLogger;

struct Sink {
    path: PathBuf,
    file: Mutex<File>,
}

struct SessionLogger;

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            write_line(&format_line(&timestamp(), record.level().as_str(), &record.args().to_string()));
        }
    }

    fn flush(&self) {
        with_file(|file| {
            let _ = file.flush();
        });
    }
}

fn with_file(f: impl FnOnce(&mut File)) {
    if let Some(sink) = SINK.get()
        && let Ok(mut file) = sink.file.lock()
    {
        f(&mut file);
    }
}

/// Where this run is logging, once [`init`] has opened the file.
pub fn log_path() -> Option<&'static PathBuf> {
    SINK.get().map(|sink| &sink.path)
}

/// Write `line` as is, with no timestamp or level.
pub fn write_line(line: &str) {
    with_file(|file| {
        let _ = writeln!(file, "{}", line);
    });
}

/// Start logging at `level`. Panic messages are copied into the file before
/// the previous hook runs. Calls after the first are no-ops.
pub fn init(level: LevelFilter) {
    if SINK.get().is_some() {
        return;
    }
    let path = log_file_path();
    if let Some(folder) = path.parent() {
        let _ = fs::create_dir_all(folder);
    }
    let opened = OpenOptions::new().create(true).write(true).truncate(true).open(&path);
    let file = match opened {
        Ok(file) => file,
        Err(e) => {
            eprintln!("roomstage: no session log at {}: {}", path.display(), e);
            return;
        }
    };
    if SINK.set(Sink { path: path.clone(), file: Mutex::new(file) }).is_err() {
        return;
    }

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
    write_line(&format!("--- RoomStage run {} ---", unix_stamp()));
    write_line(&format!("Writing to {}", path.display()));
    write_line("");

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format_line(&timestamp(), "PANIC", &info.to_string()));
        previous(info);
    }));
}

fn format_line(ts: &str, level: &str, msg: &str) -> String {
    format!("[{}] [{}] {}", ts, level, msg)
}

fn log_file_path() -> PathBuf {
    data_root().join(APP_FOLDER).join(FILE_NAME)
}

/// First usable base folder for app data, falling back to the working
/// directory.
fn data_root() -> PathBuf {
    platform_data_root()
        .or_else(|| env_path("XDG_DATA_HOME"))
        .or_else(|| env_path("HOME").map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(target_os = "windows")]
fn platform_data_root() -> Option<PathBuf> {
    env_path("APPDATA")
}

#[cfg(target_os = "macos")]
fn platform_data_root() -> Option<PathBuf> {
    env_path("HOME").map(|home| home.join("Library/Application Support"))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn platform_data_root() -> Option<PathBuf> {
    None
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn unix_seconds() -> Option<u64> {
    SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// UTC wall clock, `HH:MM:SS`.
fn timestamp() -> String {
    unix_seconds().map_or_else(|| "--:--:--".to_string(), clock)
}

fn clock(secs: u64) -> String {
    let of_day = secs % 86_400;
    format!("{:02}:{:02}:{:02}", of_day / 3600, of_day % 3600 / 60, of_day % 60)
}

fn unix_stamp() -> String {
    unix_seconds().map_or_else(|| "at an unknown time".to_string(), |s| format!("at unix {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_wraps_at_midnight() {
        assert_eq!(clock(0), "00:00:00");
        assert_eq!(clock(86_400 + 3661), "01:01:01");
        assert_eq!(clock(86_399), "23:59:59");
    }

    #[test]
    fn line_format() {
        assert_eq!(format_line("12:00:00", "WARN", "late"), "[12:00:00] [WARN] late");
    }

    #[test]
    fn log_file_lives_in_app_folder() {
        let path = log_file_path();
        assert!(path.ends_with("RoomStage/roomstage.log"));
    }
}
