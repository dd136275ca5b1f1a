// src/models.rs

use crate::constants::{
    DEFAULT_EXECUTION_TIMEOUT, DEFAULT_POLL_INTERVAL, NOT_EXECUTED_RETURN_VALUE,
    OPTIONS_LAUNCH_PATH_KEY,
};
use crate::core::template::{Template, TokenDelimiters};
use crate::system::executor::ExecutionError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("Launch options are invalid: {0}")]
    Invalid(String),
    #[error("Launch options record could not be read: {0}")]
    Record(#[from] serde_json::Error),
    #[error("Launch command line could not be parsed: {0}")]
    CommandLine(String),
}

// --- SCRIPT SOURCE ---

/// The text handed to the external tool, either ready to run or still waiting for saturation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Literal(String),
    Template(Template),
}

impl ScriptSource {
    pub fn is_template(&self) -> bool {
        matches!(self, ScriptSource::Template(_))
    }

    /// The raw text of the source. For a template this is the unsaturated text.
    pub fn text(&self) -> &str {
        match self {
            ScriptSource::Literal(text) => text,
            ScriptSource::Template(template) => template.text(),
        }
    }
}

// --- LAUNCH OPTIONS ---

/// Launch path, argument list and termination policy of the tool running a script.
///
/// Deserializes from the string-keyed options record (`launchPath`, `arguments`,
/// `strictTerminationPolicy`, `templateTokenStart`, `templateTokenEnd`). Other keys, such as
/// a record `version`, are ignored.
/// The script text itself is never part of `arguments`; it is appended as the final
/// argument at launch time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    pub launch_path: String,
    pub arguments: Vec<String>,
    #[serde(default = "default_strict_termination")]
    pub strict_termination_policy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_token_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_token_end: Option<String>,
}

fn default_strict_termination() -> bool {
    true
}

impl LaunchOptions {
    pub fn new<P, I, S>(launch_path: P, arguments: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            launch_path: launch_path.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            strict_termination_policy: true,
            template_token_start: None,
            template_token_end: None,
        }
    }

    pub fn with_strict_termination(mut self, strict: bool) -> Self {
        self.strict_termination_policy = strict;
        self
    }

    pub fn with_token_delimiters(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.template_token_start = Some(start.into());
        self.template_token_end = Some(end.into());
        self
    }

    /// Reads options from a string-keyed record such as a parsed JSON object.
    pub fn from_record(record: serde_json::Value) -> Result<Self, OptionsError> {
        let options: Self = serde_json::from_value(record)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        Self::from_record(serde_json::from_str(json)?)
    }

    /// Builds options from a command line such as `ruby -e`. The first word is the launch path.
    pub fn from_command_line(command_line: &str) -> Result<Self, OptionsError> {
        let parts = shlex::split(command_line)
            .ok_or_else(|| OptionsError::CommandLine(command_line.to_string()))?;
        let mut parts = parts.into_iter();
        let launch_path = parts
            .next()
            .ok_or_else(|| OptionsError::CommandLine(command_line.to_string()))?;
        let options = Self::new(launch_path, parts);
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.launch_path.trim().is_empty() {
            return Err(OptionsError::Invalid(format!(
                "'{}' must not be empty",
                OPTIONS_LAUNCH_PATH_KEY
            )));
        }
        let delimiters = self.token_delimiters();
        if delimiters.start.is_empty() || delimiters.end.is_empty() {
            return Err(OptionsError::Invalid(
                "template token delimiters must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Token delimiters for templates run with these options, falling back to `<#` and `#>`.
    pub fn token_delimiters(&self) -> TokenDelimiters {
        let defaults = TokenDelimiters::default();
        TokenDelimiters {
            start: self.template_token_start.clone().unwrap_or(defaults.start),
            end: self.template_token_end.clone().unwrap_or(defaults.end),
        }
    }

    /// Interprets an exit code under this termination policy.
    pub fn is_success(&self, exit_code: i32) -> bool {
        if self.strict_termination_policy {
            exit_code == 0
        } else {
            exit_code >= 0
        }
    }
}

/// Synthesizes [`LaunchOptions`] from a launch path and any number of arguments.
///
/// ```
/// let options = scriptwrap::launch_options!("/usr/bin/ruby", "-e");
/// assert_eq!(options.arguments, vec!["-e".to_string()]);
/// ```
#[macro_export]
macro_rules! launch_options {
    ($path:expr $(, $arg:expr)* $(,)?) => {{
        let arguments: ::std::vec::Vec<::std::string::String> =
            ::std::vec![$(::std::string::String::from($arg)),*];
        $crate::models::LaunchOptions::new($path, arguments)
    }};
}

// --- EXECUTION ---

/// Classification of one execution attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStatus {
    #[default]
    NotExecuted,
    Running,
    FinishedSuccessfully,
    FailedWithException,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::NotExecuted => "task not executed",
            ExecutionStatus::Running => "task running",
            ExecutionStatus::FinishedSuccessfully => "task finished successfully",
            ExecutionStatus::FailedWithException => "task failed",
        };
        f.write_str(label)
    }
}

/// Output, exit code and status of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: Vec<u8>,
    pub exit_code: i32,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    /// Result of an attempt that never produced a process exit code.
    pub fn failed(output: Vec<u8>) -> Self {
        Self {
            output,
            exit_code: NOT_EXECUTED_RETURN_VALUE,
            status: ExecutionStatus::FailedWithException,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::FinishedSuccessfully
    }

    /// Decodes the output as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

// --- HISTORY ---

/// One (script, result) pair of the instance-local history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub script: String,
    pub result: Vec<u8>,
}

impl HistoryEntry {
    pub fn new(script: impl Into<String>, result: impl Into<Vec<u8>>) -> Self {
        Self {
            script: script.into(),
            result: result.into(),
        }
    }
}

// --- NOTIFICATIONS ---

/// Published exactly once per background execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionNotification {
    /// Identifier returned by `execute_in_background` for this attempt.
    pub execution_id: Uuid,
    pub results: Vec<u8>,
    pub execution_status: ExecutionStatus,
    pub task_return_value: i32,
    /// Process-level failure, if any.
    pub error: Option<Arc<ExecutionError>>,
}

// --- ENGINE CONFIGURATION ---

/// Constructor-time engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ceiling for a blocking execution; the process is killed once it is exceeded.
    pub execution_timeout: Duration,
    /// Optional ceiling for background executions. `None` lets them run until exit.
    pub background_timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Installs a [`crate::core::probe::LogProbe`] when no probe is injected.
    pub trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            background_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            trace: false,
        }
    }
}
