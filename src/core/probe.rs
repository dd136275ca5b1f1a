// EN: src/core/probe.rs

use crate::models::ExecutionStatus;
use std::fmt;

/// Which executor slot an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Blocking,
    Background,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Blocking => f.write_str("blocking"),
            ExecutionMode::Background => f.write_str("background"),
        }
    }
}

/// Instrumentation points of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent<'a> {
    ExecuteBegin {
        mode: ExecutionMode,
        launch_path: &'a str,
        script: &'a str,
    },
    ExecuteEnd {
        mode: ExecutionMode,
        status: ExecutionStatus,
        exit_code: i32,
    },
    AppendData {
        length: usize,
    },
    Saturate {
        script: &'a str,
    },
    HistoryAccess {
        index: Option<usize>,
    },
    Cleanup {
        mode: ExecutionMode,
    },
}

/// Receives [`ProbeEvent`]s. Implementations must be cheap; they run inline.
pub trait Probe: Send + Sync {
    fn fire(&self, event: &ProbeEvent<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProbe;

impl Probe for NoopProbe {
    fn fire(&self, _event: &ProbeEvent<'_>) {}
}

/// Forwards every event to the `log` facade at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProbe;

impl Probe for LogProbe {
    fn fire(&self, event: &ProbeEvent<'_>) {
        match event {
            ProbeEvent::ExecuteBegin {
                mode,
                launch_path,
                script,
            } => log::trace!("[{}] execute begin: {} <- '{}'", mode, launch_path, script),
            ProbeEvent::ExecuteEnd {
                mode,
                status,
                exit_code,
            } => log::trace!("[{}] execute end: {} (exit {})", mode, status, exit_code),
            ProbeEvent::AppendData { length } => log::trace!("append data: {} byte(s)", length),
            ProbeEvent::Saturate { script } => log::trace!("saturated: '{}'", script),
            ProbeEvent::HistoryAccess { index: Some(index) } => {
                log::trace!("history access at index {}", index)
            }
            ProbeEvent::HistoryAccess { index: None } => log::trace!("history access (last)"),
            ProbeEvent::Cleanup { mode } => log::trace!("[{}] cleanup", mode),
        }
    }
}
