// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{TaskError, TemplateError};
use crate::template::SignalTemplate;
use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const HOURLY: Duration = Duration::from_secs(60 * 60);
pub const DAILY: Duration = Duration::from_secs(24 * 60 * 60);
pub const WEEKLY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const RECORD_KIND: &str = "task";

/// Current local wall-clock time. Task instants are local, like an alarm clock.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Next occurrence of `time` at or after `now`: today if still ahead, tomorrow otherwise.
pub fn next_occurrence(now: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(time);
    if today < now {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    } else {
        today
    }
}

/// Move a past instant forward in whole days until it is no longer before `now`.
pub fn roll_forward(at: NaiveDateTime, now: NaiveDateTime) -> NaiveDateTime {
    if at >= now {
        return at;
    }
    let behind = (now - at).num_seconds();
    let days = behind.div_euclid(86_400) + i64::from(behind.rem_euclid(86_400) != 0);
    let mut rolled = at
        .checked_add_days(Days::new(days.max(1).unsigned_abs()))
        .unwrap_or(NaiveDateTime::MAX);
    // Sub-second remainders can leave us a hair short.
    while rolled < now {
        rolled = rolled.checked_add_days(Days::new(1)).unwrap_or(NaiveDateTime::MAX);
    }
    rolled
}

fn advance(at: NaiveDateTime, by: Duration) -> NaiveDateTime {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(NaiveDateTime::MAX)
}

/// Text written to the process's stdin when a signal task fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalCommand {
    Literal(String),
    /// Rendered when the task fires.
    Template {
        template: SignalTemplate,
        args: Vec<String>,
    },
}

impl SignalCommand {
    pub fn render(&self) -> Result<String, TemplateError> {
        match self {
            SignalCommand::Literal(text) => Ok(text.clone()),
            SignalCommand::Template { template, args } => template.render(args),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    None,
    Start,
    Stop,
    Restart,
    Signal(SignalCommand),
}

impl TaskAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            TaskAction::None => ActionKind::None,
            TaskAction::Start => ActionKind::Start,
            TaskAction::Stop => ActionKind::Stop,
            TaskAction::Restart => ActionKind::Restart,
            TaskAction::Signal(_) => ActionKind::Signal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    None,
    Start,
    Stop,
    Restart,
    Signal,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::None => "none",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Restart => "restart",
            ActionKind::Signal => "signal",
        };
        f.write_str(s)
    }
}

/// A scheduled action against one supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    name: String,
    elapse_time: NaiveDateTime,
    frequency: Duration,
    action: TaskAction,
    enabled: bool,
    one_time: bool,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapse_time(&self) -> NaiveDateTime {
        self.elapse_time
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn action(&self) -> &TaskAction {
        &self.action
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_one_time(&self) -> bool {
        self.one_time
    }

    pub fn is_elapsed(&self, now: NaiveDateTime) -> bool {
        self.elapse_time <= now
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Called after the task fires: recurring tasks move forward one
    /// frequency, one-time tasks are disabled.
    pub fn reset(&mut self) {
        if self.one_time {
            self.enabled = false;
        } else {
            self.elapse_time = advance(self.elapse_time, self.frequency);
        }
    }

    /// Called when a firing is skipped: the task moves forward one frequency
    /// regardless of `one_time`. A task with no frequency cannot move and is
    /// disabled instead.
    pub(crate) fn postpone(&mut self) {
        if self.frequency.is_zero() {
            self.enabled = false;
        } else {
            self.elapse_time = advance(self.elapse_time, self.frequency);
        }
    }

    /// Change the date and time. Past instants are ignored; returns whether
    /// the task was rescheduled.
    pub fn set_elapse_time(&mut self, at: NaiveDateTime) -> bool {
        if at < now() {
            return false;
        }
        self.elapse_time = at;
        true
    }

    /// Keep the schedule but move it to the next occurrence of `time`.
    pub fn set_time_of_day(&mut self, time: NaiveTime) {
        self.elapse_time = next_occurrence(now(), time);
    }

    pub fn set_frequency(&mut self, frequency: Duration) -> Result<(), TaskError> {
        if frequency.is_zero() {
            return Err(TaskError::ZeroFrequency {
                name: self.name.clone(),
            });
        }
        self.frequency = frequency;
        Ok(())
    }

    pub fn set_signal(&mut self, signal: SignalCommand) {
        self.action = TaskAction::Signal(signal);
    }

    pub fn to_record(&self) -> TaskRecord {
        let (signal, signal_args) = match &self.action {
            TaskAction::Signal(SignalCommand::Literal(text)) => (Some(text.clone()), None),
            TaskAction::Signal(SignalCommand::Template { template, args }) => {
                (Some(template.to_string()), Some(args.clone()))
            }
            _ => (None, None),
        };
        TaskRecord {
            kind: RECORD_KIND.to_string(),
            name: self.name.clone(),
            action: self.action.kind(),
            elapse_time: self.elapse_time,
            frequency: self.frequency,
            enabled: self.enabled,
            one_time: self.one_time,
            signal,
            signal_args,
        }
    }

    /// Rebuild a task from its record. A past elapse time is moved to the
    /// next occurrence of its time-of-day.
    pub fn from_record(record: TaskRecord) -> Result<Task, TaskError> {
        Self::from_record_at(record, now())
    }

    pub(crate) fn from_record_at(record: TaskRecord, now: NaiveDateTime) -> Result<Task, TaskError> {
        if record.kind != RECORD_KIND {
            return Err(TaskError::NotATask);
        }
        if record.frequency.is_zero() && !record.one_time {
            return Err(TaskError::ZeroFrequency { name: record.name });
        }

        let action = match record.action {
            ActionKind::None => TaskAction::None,
            ActionKind::Start => TaskAction::Start,
            ActionKind::Stop => TaskAction::Stop,
            ActionKind::Restart => TaskAction::Restart,
            ActionKind::Signal => {
                let Some(text) = record.signal else {
                    return Err(TaskError::MissingSignal { name: record.name });
                };
                match record.signal_args {
                    None => TaskAction::Signal(SignalCommand::Literal(text)),
                    Some(args) => {
                        let template = SignalTemplate::parse(&text).map_err(|source| {
                            TaskError::Template {
                                name: record.name.clone(),
                                source,
                            }
                        })?;
                        TaskAction::Signal(SignalCommand::Template { template, args })
                    }
                }
            }
        };

        let elapse_time = if record.elapse_time < now {
            next_occurrence(now, record.elapse_time.time())
        } else {
            record.elapse_time
        };

        Ok(Task {
            name: record.name,
            elapse_time,
            frequency: record.frequency,
            action,
            enabled: record.enabled,
            one_time: record.one_time,
        })
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' ({}, next at {}, every {}s{}{})",
            self.name,
            self.action.kind(),
            self.elapse_time,
            self.frequency.as_secs(),
            if self.one_time { ", once" } else { "" },
            if self.enabled { "" } else { ", disabled" },
        )
    }
}

/// Accumulates task settings; nothing is observable until `build`.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name: String,
    elapse_time: NaiveDateTime,
    frequency: Duration,
    action: TaskAction,
    one_time: bool,
    template_error: Option<TemplateError>,
}

impl TaskBuilder {
    /// Defaults: fires immediately, daily recurrence, no action.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elapse_time: now(),
            frequency: DAILY,
            action: TaskAction::None,
            one_time: false,
            template_error: None,
        }
    }

    fn select(mut self, action: TaskAction) -> Self {
        self.template_error = None;
        self.action = action;
        self
    }

    /// Write `signal` to the process's stdin when the task fires.
    pub fn send_signal(self, signal: impl Into<String>) -> Self {
        self.select(TaskAction::Signal(SignalCommand::Literal(signal.into())))
    }

    /// Like `send_signal`, but the text is `format` rendered with `args` at fire time.
    pub fn send_template<I, S>(self, format: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match SignalTemplate::parse(format) {
            Ok(template) => self.select(TaskAction::Signal(SignalCommand::Template {
                template,
                args: args.into_iter().map(Into::into).collect(),
            })),
            Err(e) => {
                let mut builder = self.select(TaskAction::None);
                builder.template_error = Some(e);
                builder
            }
        }
    }

    pub fn stop_process(self) -> Self {
        self.select(TaskAction::Stop)
    }

    pub fn start_process(self) -> Self {
        self.select(TaskAction::Start)
    }

    pub fn restart_process(self) -> Self {
        self.select(TaskAction::Restart)
    }

    pub fn once(mut self) -> Self {
        self.one_time = true;
        self
    }

    pub fn daily(self) -> Self {
        self.interval(DAILY)
    }

    pub fn weekly(self) -> Self {
        self.interval(WEEKLY)
    }

    pub fn hourly(self) -> Self {
        self.interval(HOURLY)
    }

    pub fn interval(mut self, every: Duration) -> Self {
        self.frequency = every;
        self
    }

    /// Fire at an absolute local instant; a past instant is rolled forward by days.
    pub fn at(mut self, at: NaiveDateTime) -> Self {
        self.elapse_time = roll_forward(at, now());
        self
    }

    /// Fire at the next occurrence of a local time of day.
    pub fn at_time(mut self, time: NaiveTime) -> Self {
        self.elapse_time = next_occurrence(now(), time);
        self
    }

    pub fn build(self) -> Result<Task, TaskError> {
        if let Some(source) = self.template_error {
            return Err(TaskError::Template {
                name: self.name,
                source,
            });
        }
        if self.frequency.is_zero() && !self.one_time {
            return Err(TaskError::ZeroFrequency { name: self.name });
        }
        Ok(Task {
            name: self.name,
            elapse_time: self.elapse_time,
            frequency: self.frequency,
            action: self.action,
            enabled: true,
            one_time: self.one_time,
        })
    }
}

/// Serialized form of a task, as stored in configuration or persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskRecord {
    pub kind: String,
    pub name: String,
    pub action: ActionKind,
    pub elapse_time: NaiveDateTime,
    /// Recurrence in whole seconds.
    #[serde(with = "duration_secs")]
    pub frequency: Duration,
    pub enabled: bool,
    pub one_time: bool,
    pub signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_args: Option<Vec<String>>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
