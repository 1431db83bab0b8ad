// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::SupervisorError;
use crate::io::IoChannel;
use crate::scheduler::{Dispatch, ProcessAction, Scheduler};
use crate::state::ProcessState;
use crate::task::{Task, TaskRecord};
use log::{debug, info, warn};
use procvisor_log::{LogSink, ProcLog};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_OUTPUT_SETTLE_TIMEOUT: Duration = Duration::from_millis(250);
const SIGKILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables shared by a supervisor, its scheduler and its I/O channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay between liveness checks; bounds crash-detection latency.
    pub poll_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub stop_timeout: Duration,
    /// How long to wait for a dead process's final output before reporting the exit.
    pub output_settle_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            output_settle_timeout: DEFAULT_OUTPUT_SETTLE_TIMEOUT,
        }
    }
}

pub struct SupervisorBuilder {
    name: String,
    command: Vec<String>,
    auto_restart: bool,
    config: SupervisorConfig,
    log: Option<Arc<dyn LogSink>>,
}

impl SupervisorBuilder {
    /// `command` is the executable followed by its arguments.
    pub fn new<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            auto_restart: false,
            config: SupervisorConfig::default(),
            log: None,
        }
    }

    pub fn auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a [`ProcLog`] named after the process.
    pub fn log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    /// Must be called from within a Tokio runtime; the supervisor spawns its
    /// background tasks onto that runtime.
    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        if self.command.first().is_none_or(|exe| exe.is_empty()) {
            return Err(SupervisorError::EmptyCommand);
        }
        let handle = Handle::try_current()?;
        let log = self
            .log
            .unwrap_or_else(|| Arc::new(ProcLog::new(self.name.clone())));
        Ok(Supervisor {
            shared: Arc::new(Shared {
                name: self.name,
                command: self.command,
                config: self.config,
                log,
                handle,
                auto_restart: AtomicBool::new(self.auto_restart),
                run: Mutex::new(Run::default()),
                scheduler: OnceLock::new(),
            }),
        })
    }
}

#[derive(Default)]
struct Run {
    state: ProcessState,
    child: Option<Child>,
    io: Option<Arc<IoChannel>>,
    /// Bumped on every start, stop and observed exit; a monitor only acts
    /// while the generation it was started with is current.
    generation: u64,
    reaper: Option<JoinHandle<()>>,
}

struct Shared {
    name: String,
    command: Vec<String>,
    config: SupervisorConfig,
    log: Arc<dyn LogSink>,
    handle: Handle,
    auto_restart: AtomicBool,
    run: Mutex<Run>,
    scheduler: OnceLock<Scheduler>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn executable(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }
}

/// Supervises one child process: lifecycle, crash detection, auto-restart,
/// stdin/stdout/stderr bridging and scheduled actions.
///
/// Cloning yields another handle to the same supervisor. Lifecycle
/// operations never panic on misuse; they log the problem to the log sink
/// and return an error the caller is free to ignore.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn command(&self) -> &[String] {
        &self.shared.command
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    pub fn log_sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.shared.log)
    }

    pub fn state(&self) -> ProcessState {
        self.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_alive()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().child.as_ref().and_then(Child::id)
    }

    pub fn auto_restart(&self) -> bool {
        self.shared.auto_restart.load(Ordering::SeqCst)
    }

    pub fn set_auto_restart(&self, enabled: bool) {
        self.shared.auto_restart.store(enabled, Ordering::SeqCst);
    }

    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut run = self.shared.lock();
        let generation = self.start_locked(&mut run)?;
        drop(run);
        self.shared.handle.spawn(monitor(self.clone(), generation));
        Ok(())
    }

    pub fn stop(&self) -> Result<(), SupervisorError> {
        let mut run = self.shared.lock();
        self.stop_locked(&mut run)?;
        drop(run);
        self.interrupt_scheduler();
        Ok(())
    }

    /// Stop if running, then start. Both happen under one lock so no other
    /// lifecycle call can interleave.
    pub fn restart(&self) -> Result<(), SupervisorError> {
        let mut run = self.shared.lock();
        let stopped = run.state.is_alive() && self.stop_locked(&mut run).is_ok();
        let started = self.start_locked(&mut run);
        drop(run);
        if stopped {
            self.interrupt_scheduler();
        }
        let generation = started?;
        self.shared.handle.spawn(monitor(self.clone(), generation));
        Ok(())
    }

    /// Queue `text` (newline-terminated) for the process's stdin.
    pub fn send_signal(&self, text: &str) -> Result<(), SupervisorError> {
        let run = self.shared.lock();
        match run.io.as_ref() {
            Some(io) if run.state.is_alive() => {
                io.write(text);
                Ok(())
            }
            _ => {
                self.shared.log.add_error(&format!(
                    "Process: {} is not running; signal '{text}' was not sent.",
                    self.shared.executable()
                ));
                Err(self.not_running())
            }
        }
    }

    pub fn apply(&self, action: ProcessAction) -> Result<(), SupervisorError> {
        match action {
            ProcessAction::Start => self.start(),
            ProcessAction::Stop => self.stop(),
            ProcessAction::Restart => self.restart(),
            ProcessAction::Signal(text) => self.send_signal(&text),
        }
    }

    /// The process's scheduler, created on first use.
    pub fn scheduler(&self) -> &Scheduler {
        self.shared.scheduler.get_or_init(|| {
            Scheduler::new(
                self.shared.name.clone(),
                Arc::clone(&self.shared.log),
                self.shared.handle.clone(),
                SupervisorTarget(Arc::downgrade(&self.shared)),
            )
        })
    }

    pub fn add_task(&self, task: Task) {
        self.scheduler().add_task(task);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.shared
            .scheduler
            .get()
            .map(Scheduler::tasks)
            .unwrap_or_default()
    }

    pub fn task_records(&self) -> Vec<TaskRecord> {
        self.shared
            .scheduler
            .get()
            .map(Scheduler::records)
            .unwrap_or_default()
    }

    /// Disable every scheduled task.
    pub fn clear_tasks(&self) {
        if let Some(scheduler) = self.shared.scheduler.get() {
            scheduler.clear();
        }
    }

    /// Final stop: disables auto-restart and scheduled tasks, stops the
    /// process if it is running and waits for it to be reaped.
    pub async fn shutdown(&self) {
        self.set_auto_restart(false);
        self.clear_tasks();
        if self.is_running() {
            let _ = self.stop();
        }
        let reaper = self.shared.lock().reaper.take();
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
    }

    fn not_running(&self) -> SupervisorError {
        SupervisorError::NotRunning {
            name: self.shared.name.clone(),
        }
    }

    fn interrupt_scheduler(&self) {
        if let Some(scheduler) = self.shared.scheduler.get() {
            scheduler.interrupt();
        }
    }

    fn start_locked(&self, run: &mut Run) -> Result<u64, SupervisorError> {
        let shared = &self.shared;
        if run.state.is_alive() {
            shared.log.add_error(&format!(
                "Process: {} is already running and will not be started.",
                shared.executable()
            ));
            return Err(SupervisorError::AlreadyRunning {
                name: shared.name.clone(),
            });
        }

        shared.log.add_message("Process is starting.");
        if let Some(stale) = run.io.take() {
            stale.destroy();
        }

        let Some((program, args)) = shared.command.split_first() else {
            return Err(SupervisorError::EmptyCommand);
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let spawned = {
            let _runtime = shared.handle.enter();
            cmd.spawn()
        };
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                warn!("[{}] failed to spawn {program}: {source}", shared.name);
                shared
                    .log
                    .add_error(&format!("Unable to start process: {program}: {source}"));
                return Err(SupervisorError::Spawn {
                    command: program.clone(),
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        info!("[{}] spawned (pid={pid}, cmd={program})", shared.name);

        let io = IoChannel::new(
            shared.name.clone(),
            &shared.handle,
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        );
        run.generation += 1;
        run.state = ProcessState::Running;
        run.child = Some(child);
        run.io = Some(Arc::new(io));
        Ok(run.generation)
    }

    fn stop_locked(&self, run: &mut Run) -> Result<(), SupervisorError> {
        let shared = &self.shared;
        if !run.state.is_alive() {
            shared.log.add_error(&format!(
                "Process: {} is not running and will not be stopped.",
                shared.executable()
            ));
            return Err(self.not_running());
        }

        shared.log.add_message("Process is stopping.");
        if let Some(io) = run.io.take() {
            drain(shared.log.as_ref(), &io);
            io.destroy();
        }
        run.state = ProcessState::NotRunning;
        run.generation += 1;
        if let Some(child) = run.child.take() {
            run.reaper = Some(self.terminate(child));
        }
        Ok(())
    }

    /// SIGTERM now; SIGKILL from a background reaper if the process outlives
    /// `stop_timeout`.
    fn terminate(&self, mut child: Child) -> JoinHandle<()> {
        let name = self.shared.name.clone();
        let stop_timeout = self.shared.config.stop_timeout;
        send_sigterm(&name, &mut child);

        self.shared.handle.spawn(async move {
            match timeout(stop_timeout, child.wait()).await {
                Ok(Ok(status)) => info!("[{name}] exited with {status}"),
                Ok(Err(e)) => warn!("[{name}] failed to wait for exit: {e}"),
                Err(_) => {
                    warn!(
                        "[{name}] stop timeout ({}s) reached, sending SIGKILL",
                        stop_timeout.as_secs()
                    );
                    if let Err(e) = child.start_kill() {
                        warn!("[{name}] failed to send SIGKILL: {e}");
                    }
                    match timeout(SIGKILL_TIMEOUT, child.wait()).await {
                        Ok(Ok(status)) => info!("[{name}] exited with {status}"),
                        _ => warn!("[{name}] still running after SIGKILL, giving up"),
                    }
                }
            }
        })
    }
}

#[cfg(unix)]
fn send_sigterm(name: &str, child: &mut Child) {
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    info!("[{name}] sending SIGTERM");
    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!("[{name}] failed to send SIGTERM: {e}");
    }
}

#[cfg(not(unix))]
fn send_sigterm(name: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("[{name}] failed to terminate: {e}");
    }
}

fn drain(log: &dyn LogSink, io: &IoChannel) {
    while let Some(line) = io.read_error() {
        log.add_tagged("STDERR", &line);
    }
    while let Some(line) = io.read_output() {
        log.add_tagged("STDOUT", &line);
    }
}

enum Observed {
    Alive,
    Exited(std::io::Result<std::process::ExitStatus>, Option<Arc<IoChannel>>),
}

/// One per start: forwards output to the log and watches for the process to
/// die. Exits when its run is superseded by a stop or restart.
async fn monitor(sup: Supervisor, generation: u64) {
    let shared = &sup.shared;
    loop {
        let observed = {
            let mut run = shared.lock();
            if run.generation != generation {
                return;
            }
            if let Some(io) = run.io.as_deref() {
                drain(shared.log.as_ref(), io);
            }
            let Some(child) = run.child.as_mut() else {
                return;
            };
            let polled = match child.try_wait() {
                Ok(None) => None,
                Ok(Some(status)) => Some(Ok(status)),
                Err(e) => {
                    let _ = child.start_kill();
                    Some(Err(e))
                }
            };
            match polled {
                None => Observed::Alive,
                Some(outcome) => {
                    run.state = ProcessState::NotRunning;
                    run.generation += 1;
                    run.child = None;
                    Observed::Exited(outcome, run.io.take())
                }
            }
        };

        let Observed::Exited(outcome, io) = observed else {
            tokio::time::sleep(shared.config.poll_interval).await;
            continue;
        };

        if let Some(io) = io {
            io.settle(shared.config.output_settle_timeout).await;
            drain(shared.log.as_ref(), &io);
            io.destroy();
        }
        match outcome {
            Ok(status) => {
                info!("[{}] exited with {status}", shared.name);
                shared
                    .log
                    .add_message(&format!("Process has exited unexpectedly ({status})."));
            }
            Err(e) => {
                warn!("[{}] failed to poll process: {e}", shared.name);
                shared
                    .log
                    .add_error(&format!("Lost track of process, it was killed: {e}"));
            }
        }

        if sup.auto_restart() {
            debug!("[{}] auto-restart enabled", shared.name);
            let _ = sup.start();
        }
        return;
    }
}

/// Scheduler-facing handle. Weak so a scheduler never keeps its supervisor alive.
struct SupervisorTarget(Weak<Shared>);

impl Dispatch for SupervisorTarget {
    fn dispatch(&self, task: &str, action: ProcessAction) -> bool {
        let Some(shared) = self.0.upgrade() else {
            return false;
        };
        let sup = Supervisor { shared };
        debug!("[{}] task '{task}' requests {action}", sup.name());
        if let Err(e) = sup.apply(action) {
            debug!("[{}] task '{task}' had no effect: {e}", sup.name());
        }
        true
    }
}
