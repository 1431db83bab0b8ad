// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Inbound {
    lines: Mutex<VecDeque<String>>,
}

impl Inbound {
    fn has_line(&self) -> bool {
        !lock(&self.lines).is_empty()
    }

    fn pop(&self) -> Option<String> {
        lock(&self.lines).pop_front()
    }

    fn push(&self, line: String) {
        lock(&self.lines).push_back(line);
    }
}

/// Non-blocking bridge to one run of a child process's standard streams.
///
/// Writes are queued and delivered in order by a writer task; output is
/// pulled eagerly, line by line, by one reader task per stream. Callers poll
/// with `has_output`/`has_error` before reading. Stream failures are
/// swallowed: they are expected once the process has exited.
pub struct IoChannel {
    name: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    stdout: Arc<Inbound>,
    stderr: Arc<Inbound>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl IoChannel {
    pub fn new<W, R, E>(
        name: impl Into<String>,
        handle: &Handle,
        stdin: Option<W>,
        stdout: Option<R>,
        stderr: Option<E>,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let name = name.into();

        let outbound = stdin.map(|sink| {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(pump_writes(name.clone(), sink, rx));
            tx
        });

        let stdout_queue = Arc::new(Inbound::default());
        let stderr_queue = Arc::new(Inbound::default());
        let mut readers = Vec::with_capacity(2);
        if let Some(source) = stdout {
            readers.push(handle.spawn(pump_lines(
                name.clone(),
                "stdout",
                source,
                Arc::clone(&stdout_queue),
            )));
        }
        if let Some(source) = stderr {
            readers.push(handle.spawn(pump_lines(
                name.clone(),
                "stderr",
                source,
                Arc::clone(&stderr_queue),
            )));
        }

        Self {
            name,
            outbound: Mutex::new(outbound),
            stdout: stdout_queue,
            stderr: stderr_queue,
            readers: Mutex::new(readers),
        }
    }

    /// Queue `text` plus a newline for the process's stdin. Never blocks.
    pub fn write(&self, text: &str) {
        let outbound = lock(&self.outbound);
        let delivered = outbound
            .as_ref()
            .is_some_and(|tx| tx.send(format!("{text}\n")).is_ok());
        if !delivered {
            debug!("[{}] stdin closed, dropping write", self.name);
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.outbound).is_some()
    }

    pub fn has_output(&self) -> bool {
        self.stdout.has_line()
    }

    /// Next stdout line, or `None` if nothing is ready.
    pub fn read_output(&self) -> Option<String> {
        self.stdout.pop()
    }

    pub fn has_error(&self) -> bool {
        self.stderr.has_line()
    }

    /// Next stderr line, or `None` if nothing is ready.
    pub fn read_error(&self) -> Option<String> {
        self.stderr.pop()
    }

    /// Wait up to `limit` for the readers to reach end-of-stream, so the
    /// output a process wrote just before exiting can be drained. Readers
    /// still running after `limit` are cancelled.
    pub async fn settle(&self, limit: Duration) {
        let readers: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.readers));
        let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
        let finished = tokio::time::timeout(limit, async {
            for reader in readers {
                let _ = reader.await;
            }
        })
        .await;
        if finished.is_err() {
            debug!("[{}] output still open after {limit:?}", self.name);
            for abort in aborts {
                abort.abort();
            }
        }
    }

    /// Close every stream. Idempotent; queued writes are still flushed to
    /// stdin before it is closed, and lines already read stay readable.
    pub fn destroy(&self) {
        if lock(&self.outbound).take().is_some() {
            debug!("[{}] closing stdin", self.name);
        }
        for reader in std::mem::take(&mut *lock(&self.readers)) {
            reader.abort();
        }
    }
}

impl Drop for IoChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn pump_writes<W>(name: String, mut sink: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(text) = rx.recv().await {
        let result = match sink.write_all(text.as_bytes()).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!("[{name}] stdin write failed: {e}");
            return;
        }
    }
    let _ = sink.shutdown().await;
}

async fn pump_lines<R>(name: String, stream: &'static str, source: R, queue: Arc<Inbound>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                queue.push(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) => {
                debug!("[{name}] {stream} read failed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};
    use tokio::time::Instant;

    type NoStream = DuplexStream;

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_writes_delivered_in_order() {
        let (ours, mut theirs) = duplex(64 * 1024);
        let channel = IoChannel::new(
            "writer",
            &Handle::current(),
            Some(ours),
            None::<NoStream>,
            None::<NoStream>,
        );

        for i in 1..=50 {
            channel.write(&format!("x{i}"));
        }
        channel.destroy();

        let mut received = String::new();
        theirs.read_to_string(&mut received).await.unwrap();
        let expected: String = (1..=50).map(|i| format!("x{i}\n")).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_write_after_destroy_is_swallowed() {
        let (ours, _theirs) = duplex(1024);
        let channel = IoChannel::new(
            "closed",
            &Handle::current(),
            Some(ours),
            None::<NoStream>,
            None::<NoStream>,
        );
        assert!(channel.is_open());
        channel.destroy();
        channel.destroy();
        assert!(!channel.is_open());
        channel.write("nobody listens");
    }

    #[tokio::test]
    async fn test_write_to_dropped_reader_is_swallowed() {
        let (ours, theirs) = duplex(16);
        drop(theirs);
        let channel = IoChannel::new(
            "broken",
            &Handle::current(),
            Some(ours),
            None::<NoStream>,
            None::<NoStream>,
        );
        channel.write("into the void");
        channel.write("again");
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.write("still fine");
    }

    #[tokio::test]
    async fn test_poll_and_read_lines() {
        let (mut theirs, ours) = duplex(1024);
        let channel = IoChannel::new(
            "reader",
            &Handle::current(),
            None::<NoStream>,
            Some(ours),
            None::<NoStream>,
        );
        assert!(!channel.has_output());
        assert_eq!(channel.read_output(), None);

        theirs.write_all(b"first\r\nsecond\n").await.unwrap();
        assert!(wait_for(|| channel.has_output()).await);
        assert!(wait_for(|| lock(&channel.stdout.lines).len() == 2).await);

        assert_eq!(channel.read_output().as_deref(), Some("first"));
        assert_eq!(channel.read_output().as_deref(), Some("second"));
        assert!(!channel.has_output());
        assert!(!channel.has_error());
    }

    #[tokio::test]
    async fn test_stderr_is_separate() {
        let (mut out_w, out_r) = duplex(1024);
        let (mut err_w, err_r) = duplex(1024);
        let channel = IoChannel::new(
            "both",
            &Handle::current(),
            None::<NoStream>,
            Some(out_r),
            Some(err_r),
        );

        err_w.write_all(b"warning: low disk\n").await.unwrap();
        out_w.write_all(b"ok\n").await.unwrap();
        assert!(wait_for(|| channel.has_error() && channel.has_output()).await);
        assert_eq!(channel.read_error().as_deref(), Some("warning: low disk"));
        assert_eq!(channel.read_output().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_settle_collects_trailing_output() {
        let (mut theirs, ours) = duplex(1024);
        let channel = IoChannel::new(
            "settle",
            &Handle::current(),
            None::<NoStream>,
            Some(ours),
            None::<NoStream>,
        );
        theirs.write_all(b"last words\nno newline").await.unwrap();
        drop(theirs);

        channel.settle(Duration::from_secs(5)).await;
        assert_eq!(channel.read_output().as_deref(), Some("last words"));
        assert_eq!(channel.read_output().as_deref(), Some("no newline"));
    }

    #[tokio::test]
    async fn test_settle_times_out_on_open_stream() {
        let (_theirs, ours) = duplex(1024);
        let channel = IoChannel::new(
            "open",
            &Handle::current(),
            None::<NoStream>,
            Some(ours),
            None::<NoStream>,
        );
        let started = Instant::now();
        channel.settle(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (mut theirs, ours) = duplex(1024);
        let channel = IoChannel::new(
            "bytes",
            &Handle::current(),
            None::<NoStream>,
            Some(ours),
            None::<NoStream>,
        );
        theirs.write_all(b"ok \xff\n").await.unwrap();
        assert!(wait_for(|| channel.has_output()).await);
        assert_eq!(channel.read_output().as_deref(), Some("ok \u{fffd}"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_round_trip_through_cat() {
        let mut child = tokio::process::Command::new("/bin/cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let channel = IoChannel::new(
            "cat",
            &Handle::current(),
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        );

        for word in ["alpha", "beta", "gamma"] {
            channel.write(word);
        }
        assert!(wait_for(|| lock(&channel.stdout.lines).len() == 3).await);
        let lines: Vec<String> = std::iter::from_fn(|| channel.read_output()).collect();
        assert_eq!(lines, vec!["alpha", "beta", "gamma"]);

        channel.destroy();
        let status = child.wait().await.unwrap();
        assert!(status.success(), "cat should exit once stdin closes");
    }
}
