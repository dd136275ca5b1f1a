//! # scriptwrap
//!
//! A decorator around the host's process-launch facility. A [`ScriptInstance`] owns a
//! script source (literal text or a `<# #>` template), the launch options of the tool
//! that runs it, an instance-local execution history and an optional set of delegate
//! hooks. Scripts run either blocking ([`ScriptInstance::execute`]) or in the
//! background ([`ScriptInstance::execute_in_background`]), in which case the result
//! is published once on a [`NotificationBus`].

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared flag used to ask a running background execution to stop.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;

pub use crate::core::delegate::DelegateHooks;
pub use crate::core::language::{BuiltinLanguage, Capabilities, Capability, ScriptLanguage};
pub use crate::core::probe::{LogProbe, NoopProbe, Probe, ProbeEvent};
pub use crate::core::script::{ScriptBuilder, ScriptError, ScriptInstance};
pub use crate::core::template::{Template, TemplateError, TokenDelimiters};
pub use crate::models::{
    EngineConfig, ExecutionNotification, ExecutionResult, ExecutionStatus, HistoryEntry,
    LaunchOptions, ScriptSource,
};
pub use crate::system::executor::ExecutionError;
pub use crate::system::notification::NotificationBus;
