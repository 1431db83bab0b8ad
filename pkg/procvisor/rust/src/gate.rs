// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::GateError;
use crate::scheduler::ProcessAction;
use crate::supervisor::Supervisor;
use crate::task::Task;
use log::{info, warn};
use std::fmt;

/// Decides whether a caller may drive a supervisor.
pub trait CredentialCheck: Send + Sync {
    fn check_credential(&self, identity: &str, secret: &str) -> bool;
}

impl<F> CredentialCheck for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn check_credential(&self, identity: &str, secret: &str) -> bool {
        self(identity, secret)
    }
}

/// An externally triggered request against one supervised process.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    Start,
    Stop,
    Restart,
    Signal(String),
    Schedule(Task),
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Start => write!(f, "start"),
            ControlCommand::Stop => write!(f, "stop"),
            ControlCommand::Restart => write!(f, "restart"),
            ControlCommand::Signal(text) => write!(f, "signal {text:?}"),
            ControlCommand::Schedule(task) => write!(f, "schedule '{}'", task.name()),
        }
    }
}

/// Boundary in front of a [`Supervisor`]: commands run only for callers the
/// credential check accepts.
pub struct Gate<C> {
    supervisor: Supervisor,
    check: C,
}

impl<C: CredentialCheck> Gate<C> {
    pub fn new(supervisor: Supervisor, check: C) -> Self {
        Self { supervisor, check }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn execute(
        &self,
        identity: &str,
        secret: &str,
        command: ControlCommand,
    ) -> Result<(), GateError> {
        let name = self.supervisor.name();
        if !self.check.check_credential(identity, secret) {
            warn!("[{name}] rejected {command} from '{identity}'");
            self.supervisor
                .log_sink()
                .add_error(&format!("Access denied for '{identity}': {command}."));
            return Err(GateError::Denied {
                identity: identity.to_string(),
            });
        }

        info!("[{name}] '{identity}' requested {command}");
        let action = match command {
            ControlCommand::Start => ProcessAction::Start,
            ControlCommand::Stop => ProcessAction::Stop,
            ControlCommand::Restart => ProcessAction::Restart,
            ControlCommand::Signal(text) => ProcessAction::Signal(text),
            ControlCommand::Schedule(task) => {
                self.supervisor.add_task(task);
                return Ok(());
            }
        };
        self.supervisor.apply(action)?;
        Ok(())
    }
}
