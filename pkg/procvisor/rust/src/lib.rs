// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![cfg_attr(
    test,
    allow(
        clippy::indexing_slicing,
        clippy::cast_possible_wrap,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic
    )
)]

pub mod config;
pub mod error;
pub mod gate;
pub mod io;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod supervisor;
pub mod task;
pub mod template;

pub use error::{GateError, SupervisorError, TaskError, TemplateError};
pub use gate::{ControlCommand, CredentialCheck, Gate};
pub use io::IoChannel;
pub use procvisor_log::{LogSink, ProcLog};
pub use scheduler::{Dispatch, ProcessAction, Scheduler};
pub use shutdown::shutdown_all;
pub use state::ProcessState;
pub use supervisor::{Supervisor, SupervisorBuilder, SupervisorConfig};
pub use task::{ActionKind, SignalCommand, Task, TaskAction, TaskBuilder, TaskRecord};
pub use template::SignalTemplate;
