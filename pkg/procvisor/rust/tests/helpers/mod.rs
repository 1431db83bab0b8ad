// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(50);

/// One line of daemon output, `<ts> UTC | PROCVISOR | LEVEL | message`.
/// Lines in any other shape (a panic, say) keep their raw text with an empty
/// level.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub level: String,
    pub message: String,
}

/// A process log entry echoed by the daemon: `[process][TAG]: text` or
/// `[process]: text`.
#[derive(Debug, PartialEq, Eq)]
pub struct Entry<'a> {
    pub process: &'a str,
    pub tag: Option<&'a str>,
    pub text: &'a str,
}

impl LogLine {
    fn parse(raw: &str) -> Self {
        let mut fields = raw.splitn(4, " | ");
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(_), Some("PROCVISOR"), Some(level), Some(message)) => Self {
                level: level.trim().to_string(),
                message: message.to_string(),
            },
            _ => Self {
                level: String::new(),
                message: raw.to_string(),
            },
        }
    }

    pub fn entry(&self) -> Option<Entry<'_>> {
        let (process, rest) = self.message.strip_prefix('[')?.split_once(']')?;
        let (tag, rest) = match rest.strip_prefix('[') {
            Some(tagged) => {
                let (tag, rest) = tagged.split_once(']')?;
                (Some(tag), rest)
            }
            None => (None, rest),
        };
        Some(Entry {
            process,
            tag,
            text: rest.strip_prefix(": ")?,
        })
    }

    fn is_entry(&self, process: &str, tag: Option<&str>, text: &str) -> bool {
        self.entry()
            .is_some_and(|e| e.process == process && e.tag == tag && e.text.contains(text))
    }
}

/// Poll `cond` until it holds or `timeout` passes. Checks at least once.
pub fn poll_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL);
    }
}

fn capture(stream: impl Read + Send + 'static, lines: Arc<Mutex<Vec<LogLine>>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for raw in BufReader::new(stream).lines().map_while(Result::ok) {
            eprintln!("[procvisord] {raw}");
            lines.lock().unwrap().push(LogLine::parse(&raw));
        }
    })
}

/// A `procvisord` child reading its configs from a test directory. Its log
/// output (stderr) is parsed as it arrives.
pub struct DaemonHandle {
    child: Child,
    lines: Arc<Mutex<Vec<LogLine>>>,
    _capture: JoinHandle<()>,
}

impl DaemonHandle {
    pub fn start(config_dir: &Path) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_procvisord"))
            .env("PROCVISOR_CONFIG_DIR", config_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start procvisord");

        let lines = Arc::new(Mutex::new(Vec::new()));
        let stderr = child.stderr.take().expect("stderr is piped");
        let capture = capture(stderr, Arc::clone(&lines));
        Self {
            child,
            lines,
            _capture: capture,
        }
    }

    fn count(&self, pred: impl Fn(&LogLine) -> bool) -> usize {
        self.lines.lock().unwrap().iter().filter(|l| pred(l)).count()
    }

    pub fn count_log_matches(&self, pattern: &str) -> usize {
        self.count(|l| l.message.contains(pattern))
    }

    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for_log_count(pattern, 1, timeout)
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        poll_until(timeout, || self.count_log_matches(pattern) >= n)
    }

    /// Lines logged at `level` (e.g. `"ERROR"`) containing `pattern`.
    pub fn count_at_level(&self, level: &str, pattern: &str) -> usize {
        self.count(|l| l.level == level && l.message.contains(pattern))
    }

    /// Number of `[process][tag]` entries whose text contains `text`.
    pub fn count_entries(&self, process: &str, tag: Option<&str>, text: &str) -> usize {
        self.count(|l| l.is_entry(process, tag, text))
    }

    /// Wait for a `[process][tag]` entry whose text contains `text`.
    pub fn wait_for_entry(&self, process: &str, tag: Option<&str>, text: &str) -> bool {
        poll_until(DEFAULT_TIMEOUT, || self.count_entries(process, tag, text) > 0)
    }

    /// Index of the first `[process][tag]` entry containing `text`.
    pub fn entry_position(&self, process: &str, tag: Option<&str>, text: &str) -> Option<usize> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .position(|l| l.is_entry(process, tag, text))
    }

    /// PIDs from `[name] spawned (pid=NNN, ...)` lines, in spawn order.
    pub fn spawned_pids(&self) -> Vec<u32> {
        const MARKER: &str = "spawned (pid=";
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter_map(|l| {
                let (_, rest) = l.message.split_once(MARKER)?;
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect()
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = i32::try_from(self.child.id()).unwrap();
        signal::kill(Pid::from_raw(pid), sig).expect("failed to signal procvisord");
    }

    /// SIGTERM, then wait for the exit status.
    pub fn stop(&mut self) -> ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Exit status, or SIGKILL once `timeout` passes.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let mut status = None;
        poll_until(timeout, || {
            status = self.child.try_wait().expect("try_wait on procvisord");
            status.is_some()
        });
        match status {
            Some(status) => status,
            None => {
                let _ = self.child.kill();
                self.child.wait().expect("wait on killed procvisord")
            }
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Write `<dir>/<name>.yaml`; the file stem becomes the process name.
pub fn write_config(dir: &Path, name: &str, yaml: &str) {
    let path = dir.join(format!("{name}.yaml"));
    std::fs::write(&path, yaml)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
}

/// Local wall-clock time `secs` from now, as a task record's `elapse-time`.
pub fn elapse_time_in(secs: i64) -> String {
    (chrono::Local::now().naive_local() + chrono::Duration::seconds(secs))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(i32::try_from(pid).unwrap()), None).is_ok()
}

pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    poll_until(timeout, || !pid_is_alive(pid))
}

#[test]
fn test_log_line_shapes() {
    let line = LogLine::parse(
        "2026-01-02 03:04:05 UTC | PROCVISOR | INFO | [game][STDOUT]: a | b",
    );
    assert_eq!(line.level, "INFO");
    assert_eq!(
        line.entry(),
        Some(Entry {
            process: "game",
            tag: Some("STDOUT"),
            text: "a | b",
        })
    );

    let untagged = LogLine::parse("t UTC | PROCVISOR | INFO | [game]: Process is starting.");
    assert_eq!(untagged.entry().map(|e| e.tag), Some(None));

    let daemon = LogLine::parse("t UTC | PROCVISOR | INFO | [game] spawned (pid=42, cmd=x)");
    assert!(daemon.entry().is_none());

    let raw = LogLine::parse("thread 'main' panicked");
    assert!(raw.level.is_empty());
    assert_eq!(raw.message, "thread 'main' panicked");
}
