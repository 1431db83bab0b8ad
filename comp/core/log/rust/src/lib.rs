// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Logging for procvisor.
//!
//! Two pieces live here: a `log` backend that formats daemon diagnostics
//! (`init`), and [`ProcLog`], the per-process sink that records a managed
//! process's lifecycle events and output.

mod sink;

pub use sink::{DEFAULT_CACHE_LIMIT, LogSink, ProcLog};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fmt::Arguments;
use std::io::Write;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const LOGGER_NAME: &str = "PROCVISOR";

const LINE_TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(OffsetDateTime::now_utc(), record.level(), record.args());
        // Nothing sensible to do if stderr is gone.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the stderr backend for the `log` facade.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(StderrLogger { level }))?;
    log::set_max_level(level);
    Ok(())
}

fn format_line(now: OffsetDateTime, level: log::Level, args: &Arguments<'_>) -> String {
    let ts = now
        .format(LINE_TIMESTAMP)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("{ts} UTC | {LOGGER_NAME} | {level} | {args}\n")
}
