// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::supervisor::SupervisorConfig;
use crate::task::TaskRecord;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_DIR: &str = "/etc/procvisor/processes.d";

fn default_true() -> bool {
    true
}

/// One supervised process, as described by `<name>.yaml`.
#[derive(Debug, Deserialize)]
pub struct ProcessConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_restart: bool,
    /// Directory for `<name>.log`; no log file when unset.
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    pub log_cache_capacity: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    /// Seconds between SIGTERM and SIGKILL.
    pub stop_timeout: Option<u64>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

impl ProcessConfig {
    /// Executable followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.command.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let defaults = SupervisorConfig::default();
        SupervisorConfig {
            poll_interval: self
                .poll_interval_ms
                .filter(|ms| *ms > 0)
                .map_or(defaults.poll_interval, Duration::from_millis),
            stop_timeout: self
                .stop_timeout
                .map_or(defaults.stop_timeout, Duration::from_secs),
            ..defaults
        }
    }
}

pub fn config_dir() -> PathBuf {
    std::env::var("PROCVISOR_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

/// Scan a directory for `*.yaml` files and parse each into a ProcessConfig,
/// in file name order. The process name is the file stem. Files that fail to
/// parse are logged and skipped.
pub fn load_configs(dir: &Path) -> Result<Vec<(String, ProcessConfig)>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read config directory: {}", dir.display()))?;

    let mut yaml_files: Vec<PathBuf> = entries
        .filter_map(|e| match e {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!("skipping unreadable entry in {}: {e}", dir.display());
                None
            }
        })
        .filter(|path| {
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                debug!("skipping non-YAML file: {}", path.display());
            }
            is_yaml
        })
        .collect();
    yaml_files.sort();

    let mut configs = Vec::with_capacity(yaml_files.len());
    for path in yaml_files {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!("skipping {}: file name is not valid UTF-8", path.display());
            continue;
        };
        match parse_config(&path) {
            Ok(config) => configs.push((name.to_string(), config)),
            Err(e) => warn!("skipping {}: {e:#}", path.display()),
        }
    }
    Ok(configs)
}

fn parse_config(path: &Path) -> Result<ProcessConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}
