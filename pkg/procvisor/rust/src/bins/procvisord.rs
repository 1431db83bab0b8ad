// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use log::{LevelFilter, info, warn};
use procvisor::config::{self, ProcessConfig};
use procvisor::{ProcLog, Supervisor, SupervisorBuilder, Task, shutdown_all};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    procvisor_log::init(LevelFilter::Info)?;
    info!(
        "procvisord starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let dir = config::config_dir();
    let configs = if dir.is_dir() {
        config::load_configs(&dir)?
    } else {
        warn!("config directory {} does not exist", dir.display());
        Vec::new()
    };
    info!("loaded {} process config(s)", configs.len());

    let mut supervisors = Vec::with_capacity(configs.len());
    for (name, cfg) in &configs {
        match build_supervisor(name, cfg) {
            Ok(sup) => {
                if cfg.auto_start {
                    let _ = sup.start();
                } else {
                    info!("[{name}] auto_start disabled, not starting");
                }
                supervisors.push(sup);
            }
            Err(e) => warn!("[{name}] skipping: {e:#}"),
        }
    }

    wait_for_shutdown_signal().await?;

    info!("procvisord shutting down");
    shutdown_all(&supervisors).await;
    info!("procvisord stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C");
    Ok(())
}

fn build_supervisor(name: &str, cfg: &ProcessConfig) -> Result<Supervisor> {
    let log = ProcLog::new(name);
    if !cfg.timestamps {
        log.disable_timestamp();
    }
    if let Some(capacity) = cfg.log_cache_capacity {
        log.set_cache_limit(capacity);
    }
    if let Some(dir) = cfg.log_dir.as_deref() {
        let path = log
            .enable_logfile(Some(dir))
            .with_context(|| format!("opening log file in {}", dir.display()))?;
        info!("[{name}] logging to {}", path.display());
    }

    let sup = SupervisorBuilder::new(name, cfg.command_line())
        .auto_restart(cfg.auto_restart)
        .config(cfg.supervisor_config())
        .log_sink(Arc::new(log))
        .build()
        .with_context(|| format!("building supervisor for {}", cfg.command))?;

    for record in &cfg.tasks {
        match Task::from_record(record.clone()) {
            Ok(task) => sup.add_task(task),
            Err(e) => warn!("[{name}] skipping task '{}': {e}", record.name),
        }
    }
    Ok(sup)
}
