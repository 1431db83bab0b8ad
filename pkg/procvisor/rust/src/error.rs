// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("process {name} is already running")]
    AlreadyRunning { name: String },
    #[error("process {name} is not running")]
    NotRunning { name: String },
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command must name an executable")]
    EmptyCommand,
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("placeholder at byte {position} uses index 0; indices start at 1")]
    ZeroIndex { position: usize },
    #[error("placeholder index at byte {position} is out of range")]
    IndexOverflow { position: usize },
    #[error("template needs {needed} argument(s), got {given}")]
    TooFewArguments { needed: usize, given: usize },
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("record kind must be \"task\"")]
    NotATask,
    #[error("task {name} has a signal action but no signal text")]
    MissingSignal { name: String },
    #[error("task {name} has a zero frequency")]
    ZeroFrequency { name: String },
    #[error("invalid signal template for task {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: TemplateError,
    },
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("credentials rejected for {identity}")]
    Denied { identity: String },
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}
