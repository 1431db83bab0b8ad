// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::supervisor::Supervisor;
use log::info;

/// SIGTERM every running process first, then wait for each to be reaped
/// (SIGKILL after its own `stop_timeout`), so stop timeouts overlap.
pub async fn shutdown_all(supervisors: &[Supervisor]) {
    for sup in supervisors {
        sup.set_auto_restart(false);
        sup.clear_tasks();
        if sup.is_running() {
            info!("[{}] stopping", sup.name());
            let _ = sup.stop();
        }
    }
    for sup in supervisors {
        sup.shutdown().await;
    }
}
