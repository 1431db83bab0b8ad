// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::{error, info, warn};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Smallest (and default) number of entries kept in the in-memory cache.
pub const DEFAULT_CACHE_LIMIT: usize = 1024;

const ENTRY_TIMESTAMP: &[BorrowedFormatItem<'static>] = format_description!(
    "[month]-[day]-[year repr:last_two] [hour]:[minute]:[second].[subsecond digits:2]"
);

/// Destination for a managed process's lifecycle events and output.
///
/// Calls are fire-and-forget: implementations must not fail or block the
/// caller on I/O problems.
pub trait LogSink: Send + Sync {
    fn add_message(&self, text: &str);
    fn add_tagged(&self, tag: &str, text: &str);
    fn add_error(&self, text: &str);
}

struct LogFile {
    path: PathBuf,
    file: File,
    write_failed: bool,
}

struct State {
    cache: VecDeque<String>,
    cache_limit: usize,
    timestamps: bool,
    echo: bool,
    file: Option<LogFile>,
}

/// Per-process log: a bounded in-memory history, an optional append-only log
/// file, and an echo of every entry to the `log` facade.
pub struct ProcLog {
    name: String,
    state: Mutex<State>,
}

impl ProcLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                cache: VecDeque::new(),
                cache_limit: DEFAULT_CACHE_LIMIT,
                timestamps: true,
                echo: true,
                file: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// File name used when file logging is enabled. Path separators in the
    /// process name are flattened so the file lands directly in `dir`.
    pub fn file_name(&self) -> String {
        format!("{}.log", self.name.replace(['/', '\\'], "_"))
    }

    /// Start appending entries to `<dir>/<name>.log` (current directory when
    /// `dir` is `None`). A no-op if file logging is already enabled.
    pub fn enable_logfile(&self, dir: Option<&Path>) -> std::io::Result<PathBuf> {
        let mut state = self.lock();
        if let Some(ref current) = state.file {
            return Ok(current.path.clone());
        }
        let path = match dir {
            Some(dir) => dir.join(self.file_name()),
            None => PathBuf::from(self.file_name()),
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        state.file = Some(LogFile {
            path: path.clone(),
            file,
            write_failed: false,
        });
        Ok(path)
    }

    pub fn disable_logfile(&self) {
        self.lock().file = None;
    }

    pub fn logfile_path(&self) -> Option<PathBuf> {
        self.lock().file.as_ref().map(|f| f.path.clone())
    }

    pub fn enable_timestamp(&self) {
        self.lock().timestamps = true;
    }

    pub fn disable_timestamp(&self) {
        self.lock().timestamps = false;
    }

    /// Toggle forwarding of entries to the `log` facade.
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    pub fn cache_limit(&self) -> usize {
        self.lock().cache_limit
    }

    /// Resize the history. Values below [`DEFAULT_CACHE_LIMIT`] are raised to it.
    pub fn set_cache_limit(&self, limit: usize) {
        let mut state = self.lock();
        state.cache_limit = limit.max(DEFAULT_CACHE_LIMIT);
        while state.cache.len() > state.cache_limit {
            state.cache.pop_front();
        }
    }

    /// Snapshot of the cached entries, oldest first.
    pub fn cache(&self) -> Vec<String> {
        self.lock().cache.iter().cloned().collect()
    }

    fn record(&self, tag: Option<&str>, text: &str, is_error: bool) {
        let body = match tag {
            Some(tag) => format!("[{}][{tag}]: {text}", self.name),
            None => format!("[{}]: {text}", self.name),
        };

        let mut state = self.lock();
        let entry = if state.timestamps {
            format!("{} - {body}", entry_timestamp(OffsetDateTime::now_utc()))
        } else {
            body.clone()
        };

        if let Some(ref mut log_file) = state.file {
            match writeln!(log_file.file, "{entry}") {
                Ok(()) => log_file.write_failed = false,
                Err(e) => {
                    if !log_file.write_failed {
                        warn!(
                            "[{}] unable to write to {}: {e}",
                            self.name,
                            log_file.path.display()
                        );
                    }
                    log_file.write_failed = true;
                }
            }
        }

        if state.echo {
            if is_error {
                error!("{body}");
            } else {
                info!("{body}");
            }
        }

        state.cache.push_back(entry);
        while state.cache.len() > state.cache_limit {
            state.cache.pop_front();
        }
    }
}

impl LogSink for ProcLog {
    fn add_message(&self, text: &str) {
        self.record(None, text, false);
    }

    fn add_tagged(&self, tag: &str, text: &str) {
        self.record(Some(tag), text, false);
    }

    fn add_error(&self, text: &str) {
        self.record(Some("ERROR"), text, true);
    }
}

fn entry_timestamp(now: OffsetDateTime) -> String {
    now.format(ENTRY_TIMESTAMP)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use time::macros::datetime;

    fn quiet(name: &str) -> ProcLog {
        let log = ProcLog::new(name);
        log.set_echo(false);
        log
    }

    #[test]
    fn test_entry_format_without_timestamp() {
        let log = quiet("web");
        log.disable_timestamp();
        log.add_message("Process is starting.");
        log.add_tagged("STDOUT", "listening on :8080");
        log.add_error("Process: web is already running and will not be started.");

        assert_eq!(
            log.cache(),
            vec![
                "[web]: Process is starting.",
                "[web][STDOUT]: listening on :8080",
                "[web][ERROR]: Process: web is already running and will not be started.",
            ]
        );
    }

    #[test]
    fn test_entry_format_with_timestamp() {
        let log = quiet("web");
        log.add_message("hello");
        let re = Regex::new(r"^\d{2}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{2} - \[web\]: hello$").unwrap();
        let cache = log.cache();
        assert!(re.is_match(&cache[0]), "unexpected entry: {:?}", cache[0]);
    }

    #[test]
    fn test_entry_timestamp_layout() {
        let ts = entry_timestamp(datetime!(2026-01-02 03:04:05.678 UTC));
        assert_eq!(ts, "01-02-26 03:04:05.67");
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let log = quiet("p");
        log.disable_timestamp();
        for i in 0..DEFAULT_CACHE_LIMIT + 10 {
            log.add_message(&format!("line {i}"));
        }
        let cache = log.cache();
        assert_eq!(cache.len(), DEFAULT_CACHE_LIMIT);
        assert_eq!(cache[0], "[p]: line 10");
        assert_eq!(
            cache[DEFAULT_CACHE_LIMIT - 1],
            format!("[p]: line {}", DEFAULT_CACHE_LIMIT + 9)
        );
    }

    #[test]
    fn test_cache_limit_has_floor() {
        let log = quiet("p");
        log.set_cache_limit(10);
        assert_eq!(log.cache_limit(), DEFAULT_CACHE_LIMIT);
        log.set_cache_limit(4096);
        assert_eq!(log.cache_limit(), 4096);
    }

    #[test]
    fn test_logfile_appends_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = quiet("proc/main");
        log.disable_timestamp();

        let path = log.enable_logfile(Some(dir.path())).unwrap();
        assert_eq!(path, dir.path().join("proc_main.log"));
        log.add_message("first");
        log.add_tagged("STDERR", "second");
        log.disable_logfile();
        log.add_message("not written");
        assert!(log.logfile_path().is_none());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "[proc/main]: first\n[proc/main][STDERR]: second\n");
    }

    #[test]
    fn test_enable_logfile_twice_keeps_first_path() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let log = quiet("p");
        let first = log.enable_logfile(Some(dir.path())).unwrap();
        let second = log.enable_logfile(Some(other.path())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_enable_logfile_missing_directory() {
        let log = quiet("p");
        assert!(
            log.enable_logfile(Some(Path::new("/nonexistent/procvisor/logs")))
                .is_err()
        );
        assert!(log.logfile_path().is_none());
        log.add_message("still cached");
        assert_eq!(log.cache().len(), 1);
    }
}
