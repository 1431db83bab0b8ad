// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::task::{self, Task, TaskAction, TaskRecord};
use log::debug;
use procvisor_log::LogSink;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;

/// Upper bound on a single wait, so wall-clock jumps are noticed.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// What a fired task asks of its process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessAction {
    Start,
    Stop,
    Restart,
    /// Already-rendered text for the process's stdin.
    Signal(String),
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessAction::Start => write!(f, "start"),
            ProcessAction::Stop => write!(f, "stop"),
            ProcessAction::Restart => write!(f, "restart"),
            ProcessAction::Signal(text) => write!(f, "signal {text:?}"),
        }
    }
}

/// Receiver of fired actions.
pub trait Dispatch: Send + Sync + 'static {
    /// Carry out `action` on behalf of `task`. Returns `false` once the target
    /// no longer exists, which ends the scheduling loop.
    fn dispatch(&self, task: &str, action: ProcessAction) -> bool;
}

struct TaskSet {
    tasks: Vec<Task>,
    running: bool,
}

struct Shared {
    name: String,
    log: Arc<dyn LogSink>,
    target: Box<dyn Dispatch>,
    handle: Handle,
    set: Mutex<TaskSet>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TaskSet> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deadline scheduler for one supervised process.
///
/// A single loop sleeps until the earliest enabled deadline and fires one
/// elapsed task per iteration, so actions against the process are
/// serialized. Adding a task or calling `interrupt` wakes the loop to
/// re-evaluate; the loop exits when no enabled task remains and is restarted
/// by the next `add_task`.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(
        name: impl Into<String>,
        log: Arc<dyn LogSink>,
        handle: Handle,
        target: impl Dispatch,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                log,
                target: Box::new(target),
                handle,
                set: Mutex::new(TaskSet {
                    tasks: Vec::new(),
                    running: false,
                }),
                wake: Notify::new(),
            }),
        }
    }

    pub fn add_task(&self, task: Task) {
        let message = format!(
            "New task has been added: '{}'. Set to activate at: {}",
            task.name(),
            task.elapse_time()
        );
        let start_loop = {
            let mut set = self.shared.lock();
            set.tasks.push(task);
            !std::mem::replace(&mut set.running, true)
        };
        self.shared.log.add_message(&message);

        if start_loop {
            debug!("[{}] scheduler starting", self.shared.name);
            self.shared.handle.spawn(run(Arc::clone(&self.shared)));
        } else {
            self.interrupt();
        }
    }

    /// Wake the loop so it recomputes its deadline without firing anything.
    pub fn interrupt(&self) {
        self.shared.wake.notify_one();
    }

    /// Disable every task called `name`; they are dropped on the next
    /// evaluation. Returns whether any task matched.
    pub fn disable_task(&self, name: &str) -> bool {
        let matched = {
            let mut set = self.shared.lock();
            let mut matched = false;
            for task in set.tasks.iter_mut().filter(|t| t.name() == name) {
                task.disable();
                matched = true;
            }
            matched
        };
        if matched {
            self.shared
                .log
                .add_tagged("TASK", &format!("'{name}' has been disabled."));
            self.interrupt();
        }
        matched
    }

    /// Disable every task. The loop exits on its next evaluation.
    pub fn clear(&self) {
        let cleared = {
            let mut set = self.shared.lock();
            set.tasks.iter_mut().for_each(Task::disable);
            set.tasks.len()
        };
        if cleared > 0 {
            debug!("[{}] cleared {cleared} task(s)", self.shared.name);
            self.interrupt();
        }
    }

    /// Snapshot of the task set.
    pub fn tasks(&self) -> Vec<Task> {
        self.shared.lock().tasks.clone()
    }

    pub fn records(&self) -> Vec<TaskRecord> {
        self.shared.lock().tasks.iter().map(Task::to_record).collect()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let deadline = {
            let mut set = shared.lock();
            set.tasks.retain(Task::is_enabled);
            match set.tasks.iter().map(Task::elapse_time).min() {
                Some(deadline) => deadline,
                None => {
                    set.running = false;
                    debug!("[{}] no pending tasks, scheduler exiting", shared.name);
                    return;
                }
            }
        };

        let wait = (deadline - task::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_WAIT);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shared.wake.notified() => continue,
        }

        if !fire_next(&shared) {
            shared.lock().running = false;
            debug!("[{}] dispatch target gone, scheduler exiting", shared.name);
            return;
        }
    }
}

enum Firing {
    Dispatch(Option<ProcessAction>),
    Skipped(String),
}

/// Fire the earliest elapsed task (first added wins a tie). Returns `false`
/// if the dispatch target has gone away.
fn fire_next(shared: &Shared) -> bool {
    let now = task::now();
    let (name, firing, next) = {
        let mut set = shared.lock();
        let Some(index) = set
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_enabled() && t.is_elapsed(now))
            .min_by_key(|(i, t)| (t.elapse_time(), *i))
            .map(|(i, _)| i)
        else {
            return true;
        };
        let Some(task) = set.tasks.get_mut(index) else {
            return true;
        };

        let name = task.name().to_string();
        let firing = match task.action() {
            TaskAction::None => Firing::Dispatch(None),
            TaskAction::Start => Firing::Dispatch(Some(ProcessAction::Start)),
            TaskAction::Stop => Firing::Dispatch(Some(ProcessAction::Stop)),
            TaskAction::Restart => Firing::Dispatch(Some(ProcessAction::Restart)),
            TaskAction::Signal(cmd) => match cmd.render() {
                Ok(text) => Firing::Dispatch(Some(ProcessAction::Signal(text))),
                Err(e) => Firing::Skipped(e.to_string()),
            },
        };

        match firing {
            Firing::Skipped(_) => task.postpone(),
            Firing::Dispatch(_) => task.reset(),
        }
        let next = task.is_enabled().then(|| task.elapse_time());
        if next.is_none() {
            set.tasks.remove(index);
        }
        (name, firing, next)
    };

    match firing {
        Firing::Skipped(reason) => {
            if next.is_none() {
                shared.log.add_error(&format!(
                    "Task '{name}' was skipped: {reason}. It has no frequency and was removed."
                ));
                return true;
            }
            shared.log.add_error(&format!(
                "Task '{name}' was skipped: {reason}. It stays scheduled."
            ));
        }
        Firing::Dispatch(action) => {
            shared
                .log
                .add_tagged("TASK", &format!("'{name}' has activated."));
            if let Some(action) = action
                && !shared.target.dispatch(&name, action)
            {
                return false;
            }
        }
    }

    match next {
        Some(at) => shared
            .log
            .add_tagged("TASK", &format!("'{name}' has been reset. Next activation: {at}")),
        None => shared
            .log
            .add_tagged("TASK", &format!("'{name}' has completed and was removed.")),
    }
    true
}
