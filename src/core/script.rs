//! # Script Instance
//!
//! [`ScriptInstance`] is the façade of the engine. It owns the script source, the launch
//! options, the history and the delegate hooks, plus one blocking and one background
//! executor slot. The two slots never share launch or pipe state; everything else lives
//! behind a single instance-level lock.
//!
//! Only attempts whose process ran to exit with a fully drained pipe update the instance
//! (`last_result`, `last_return_value`, history). A failed launch, a timeout or a
//! cancellation leaves the instance untouched; its partial output is still handed back.

use crate::constants::{DEFAULT_SCRIPT_SOURCE, NOT_EXECUTED_RETURN_VALUE};
use crate::core::commons::lock;
use crate::core::delegate::DelegateHooks;
use crate::core::history::HistoryStore;
use crate::core::language::{BuiltinLanguage, LanguageError, ScriptLanguage, resolve_defaults};
use crate::core::loader::read_script_file;
use crate::core::probe::{ExecutionMode, LogProbe, NoopProbe, Probe, ProbeEvent};
use crate::core::template::{Template, TemplateError};
use crate::models::{
    EngineConfig, ExecutionNotification, ExecutionResult, ExecutionStatus, HistoryEntry,
    LaunchOptions, OptionsError, ScriptSource,
};
use crate::system::background::NonBlockingExecutor;
use crate::system::executor::{BlockingExecutor, ExecutionError, Outcome, StatusCell};
use crate::system::invoker::{ProcessInvoker, SystemInvoker};
use crate::system::notification::NotificationBus;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("The script is a template with unresolved tokens; saturate it before executing.")]
    TemplateArgumentMissing,
    #[error("The script was not created from a template.")]
    NotATemplate,
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Language(#[from] LanguageError),
    #[error(transparent)]
    InvalidOptions(#[from] OptionsError),
    #[error("Could not read script file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("A background execution is already running on this instance.")]
    BackgroundExecutionInFlight,
    #[error("Background worker could not be started: {0}")]
    Worker(#[source] io::Error),
}

/// Mutable state guarded by the instance lock.
#[derive(Debug)]
struct ScriptState {
    source: ScriptSource,
    /// Unsaturated original, kept so every saturation starts from the same text.
    template: Option<Template>,
    options: LaunchOptions,
    history: HistoryStore,
    last_result: Option<ExecutionResult>,
    last_return_value: i32,
}

struct Inner {
    state: Mutex<ScriptState>,
    hooks: DelegateHooks,
    probe: Arc<dyn Probe>,
    bus: NotificationBus,
    blocking: Mutex<BlockingExecutor>,
    background: Mutex<NonBlockingExecutor>,
    blocking_status: StatusCell,
    background_status: StatusCell,
}

impl Inner {
    /// Applies a finished attempt to the instance and returns the result handed to callers.
    fn complete(&self, script: &str, outcome: &Outcome) -> ExecutionResult {
        if !outcome.completed {
            return outcome.result();
        }

        let mut state = lock(&self.state);
        let raw = outcome.output.clone();
        let output = match self.hooks.admit_result(raw.clone()) {
            Some(output) => {
                let result = ExecutionResult {
                    output,
                    exit_code: outcome.exit_code,
                    status: outcome.status,
                };
                state.last_result = Some(result.clone());
                result.output
            }
            None => {
                log::debug!("Result vetoed by delegate; last result unchanged.");
                raw
            }
        };
        state.last_return_value = outcome.exit_code;
        state
            .history
            .append(HistoryEntry::new(script, output.clone()), &self.hooks);

        ExecutionResult {
            output,
            exit_code: outcome.exit_code,
            status: outcome.status,
        }
    }

    fn finish_background(&self, execution_id: Uuid, script: &str, outcome: Outcome) {
        self.probe.fire(&ProbeEvent::ExecuteEnd {
            mode: ExecutionMode::Background,
            status: outcome.status,
            exit_code: outcome.exit_code,
        });
        let completed = panic::catch_unwind(AssertUnwindSafe(|| self.complete(script, &outcome)));
        let (result, error) = match completed {
            Ok(result) => (result, outcome.error),
            Err(_) => {
                log::error!("A result hook panicked while completing execution {}.", execution_id);
                let error = ExecutionError::HookPanicked {
                    path: lock(&self.state).options.launch_path.clone(),
                };
                (ExecutionResult::failed(outcome.output), Some(error))
            }
        };
        // Observers see the instance and the slot settled once the notification arrives.
        self.background_status.set(result.status);
        self.bus.publish(ExecutionNotification {
            execution_id,
            results: result.output,
            execution_status: result.status,
            task_return_value: result.exit_code,
            error: error.map(Arc::new),
        });
        self.probe.fire(&ProbeEvent::Cleanup {
            mode: ExecutionMode::Background,
        });
    }
}

/// Runs one script through an external tool, blocking or in the background.
pub struct ScriptInstance {
    inner: Arc<Inner>,
}

impl fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ScriptInstance")
            .field("source", &state.source)
            .field("options", &state.options)
            .field("history", &state.history.len())
            .field("last_return_value", &state.last_return_value)
            .finish_non_exhaustive()
    }
}

impl Default for ScriptInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptInstance {
    /// An instance of the generic kind: `/bin/echo` with a placeholder script.
    pub fn new() -> Self {
        Self::with_source(DEFAULT_SCRIPT_SOURCE)
    }

    pub fn with_source(script: impl Into<String>) -> Self {
        Self::of_kind(BuiltinLanguage::Generic, script)
    }

    /// A template for the generic kind, using the default `<#` `#>` delimiters.
    pub fn with_template(text: impl Into<String>) -> Self {
        let options = BuiltinLanguage::Generic.default_options();
        let template = Template::with_delimiters(text, options.token_delimiters());
        ScriptBuilder::new().assemble(ScriptSource::Template(template), options)
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Self::of_kind(BuiltinLanguage::Shell, script)
    }

    pub fn ruby(script: impl Into<String>) -> Self {
        Self::of_kind(BuiltinLanguage::Ruby, script)
    }

    pub fn python(script: impl Into<String>) -> Self {
        Self::of_kind(BuiltinLanguage::Python, script)
    }

    pub fn perl(script: impl Into<String>) -> Self {
        Self::of_kind(BuiltinLanguage::Perl, script)
    }

    fn of_kind(language: BuiltinLanguage, script: impl Into<String>) -> Self {
        ScriptBuilder::new().assemble(
            ScriptSource::Literal(script.into()),
            language.default_options(),
        )
    }

    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::new()
    }

    // --- Accessors ---

    /// The current script text. For an unsaturated template this is the template text.
    pub fn script(&self) -> String {
        lock(&self.inner.state).source.text().to_string()
    }

    pub fn source(&self) -> ScriptSource {
        lock(&self.inner.state).source.clone()
    }

    /// Whether the instance still holds an unsaturated template.
    pub fn is_template(&self) -> bool {
        lock(&self.inner.state).source.is_template()
    }

    /// The original template, if the instance was created from one.
    pub fn template(&self) -> Option<Template> {
        lock(&self.inner.state).template.clone()
    }

    pub fn options(&self) -> LaunchOptions {
        lock(&self.inner.state).options.clone()
    }

    pub fn last_result(&self) -> Option<ExecutionResult> {
        lock(&self.inner.state).last_result.clone()
    }

    /// Exit code of the last completed execution, `-1` before the first one.
    pub fn last_return_value(&self) -> i32 {
        lock(&self.inner.state).last_return_value
    }

    pub fn blocking_status(&self) -> ExecutionStatus {
        self.inner.blocking_status.get()
    }

    pub fn background_status(&self) -> ExecutionStatus {
        self.inner.background_status.get()
    }

    // --- Mutation ---

    /// Replaces the script with literal text. Returns `false` if a delegate vetoed it.
    pub fn set_script(&self, script: impl Into<String>) -> bool {
        let mut state = lock(&self.inner.state);
        match self.inner.hooks.admit_script(script.into()) {
            Some(script) => {
                state.source = ScriptSource::Literal(script);
                state.template = None;
                true
            }
            None => false,
        }
    }

    /// Replaces the launch options. Returns `Ok(false)` if a delegate vetoed them.
    ///
    /// New token delimiters apply to the next saturation of the original template.
    pub fn set_options(&self, options: LaunchOptions) -> Result<bool, ScriptError> {
        options.validate()?;
        let mut state = lock(&self.inner.state);
        let Some(options) = self.inner.hooks.admit_options(options) else {
            return Ok(false);
        };
        options.validate()?;

        let delimiters = options.token_delimiters();
        if let Some(template) = state.template.take() {
            let template = Template::with_delimiters(template.text(), delimiters);
            if state.source.is_template() {
                state.source = ScriptSource::Template(template.clone());
            }
            state.template = Some(template);
        }
        state.options = options;
        Ok(true)
    }

    // --- Saturation ---

    pub fn saturate_with_argument(&self, argument: &str) -> Result<bool, ScriptError> {
        self.saturate_with_arguments(&[argument])
    }

    /// Fills the template's tokens in order. Returns `Ok(false)` if a delegate vetoed the
    /// resulting script.
    pub fn saturate_with_arguments<S: AsRef<str>>(&self, arguments: &[S]) -> Result<bool, ScriptError> {
        let mut state = lock(&self.inner.state);
        let template = state.template.as_ref().ok_or(ScriptError::NotATemplate)?;
        let script = template.saturate(arguments)?;
        Ok(self.apply_saturation(&mut state, script))
    }

    /// Fills keyed tokens from `values`. Unknown keys stay in the script as written.
    pub fn saturate_with_map(&self, values: &HashMap<String, String>) -> Result<bool, ScriptError> {
        let mut state = lock(&self.inner.state);
        let template = state.template.as_ref().ok_or(ScriptError::NotATemplate)?;
        let script = template.saturate_with_map(values);
        Ok(self.apply_saturation(&mut state, script))
    }

    fn apply_saturation(&self, state: &mut ScriptState, script: String) -> bool {
        self.inner.probe.fire(&ProbeEvent::Saturate { script: &script });
        match self.inner.hooks.admit_script(script) {
            Some(script) => {
                state.source = ScriptSource::Literal(script);
                true
            }
            None => false,
        }
    }

    // --- Execution ---

    /// Script text and options for a new attempt. Fails for an unsaturated template.
    fn prepare(&self) -> Result<(LaunchOptions, String), ScriptError> {
        let state = lock(&self.inner.state);
        match &state.source {
            ScriptSource::Template(_) => Err(ScriptError::TemplateArgumentMissing),
            ScriptSource::Literal(script) => Ok((state.options.clone(), script.clone())),
        }
    }

    /// Runs the script to completion and returns its status.
    pub fn execute(&self) -> Result<ExecutionStatus, ScriptError> {
        Ok(self.execute_with_error()?.0.status)
    }

    pub fn execute_with_result(&self) -> Result<ExecutionResult, ScriptError> {
        Ok(self.execute_with_error()?.0)
    }

    /// Runs the script to completion. Process-level failures are reported in the second
    /// element, never as `Err`.
    pub fn execute_with_error(
        &self,
    ) -> Result<(ExecutionResult, Option<ExecutionError>), ScriptError> {
        let (options, script) = self.prepare()?;
        let probe = Arc::clone(&self.inner.probe);

        let outcome = {
            let mut executor = lock(&self.inner.blocking);
            probe.fire(&ProbeEvent::ExecuteBegin {
                mode: ExecutionMode::Blocking,
                launch_path: &options.launch_path,
                script: &script,
            });
            executor.run(&options, &script, |chunk| {
                probe.fire(&ProbeEvent::AppendData {
                    length: chunk.len(),
                });
                Some(chunk)
            })
        };
        probe.fire(&ProbeEvent::ExecuteEnd {
            mode: ExecutionMode::Blocking,
            status: outcome.status,
            exit_code: outcome.exit_code,
        });

        let result = self.inner.complete(&script, &outcome);
        probe.fire(&ProbeEvent::Cleanup {
            mode: ExecutionMode::Blocking,
        });
        Ok((result, outcome.error))
    }

    /// Starts the script on a worker thread and returns the attempt's id.
    ///
    /// Exactly one [`ExecutionNotification`] carrying that id is published once the
    /// attempt ends, after the instance has been updated.
    pub fn execute_in_background(&self) -> Result<Uuid, ScriptError> {
        let (options, script) = self.prepare()?;
        let mut executor = lock(&self.inner.background);
        if executor.is_running() {
            return Err(ScriptError::BackgroundExecutionInFlight);
        }

        let execution_id = Uuid::new_v4();
        self.inner.probe.fire(&ProbeEvent::ExecuteBegin {
            mode: ExecutionMode::Background,
            launch_path: &options.launch_path,
            script: &script,
        });

        let partial_inner = Arc::clone(&self.inner);
        let partial = move |chunk: Vec<u8>| {
            partial_inner.probe.fire(&ProbeEvent::AppendData {
                length: chunk.len(),
            });
            partial_inner.hooks.admit_partial_result(chunk)
        };
        let finish_inner = Arc::clone(&self.inner);
        let finish_script = script.clone();
        let finish = move |outcome: Outcome| {
            finish_inner.finish_background(execution_id, &finish_script, outcome);
        };

        executor
            .start(options, script, partial, finish)
            .map_err(ScriptError::Worker)?;
        log::debug!("Background execution {} started", execution_id);
        Ok(execution_id)
    }

    /// Asks the running background attempt to stop. Returns `false` if none is running.
    pub fn cancel_background(&self) -> bool {
        lock(&self.inner.background).cancel()
    }

    pub fn subscribe(&self) -> Receiver<ExecutionNotification> {
        self.inner.bus.subscribe()
    }

    pub fn notification_bus(&self) -> NotificationBus {
        self.inner.bus.clone()
    }

    // --- History ---

    pub fn history_len(&self) -> usize {
        lock(&self.inner.state).history.len()
    }

    /// A copy of the history as the return hooks allow it to be seen.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let state = lock(&self.inner.state);
        (0..state.history.len())
            .filter_map(|index| state.history.get(index, &self.inner.hooks))
            .collect()
    }

    pub fn history_entry(&self, index: usize) -> Option<HistoryEntry> {
        self.inner.probe.fire(&ProbeEvent::HistoryAccess { index: Some(index) });
        lock(&self.inner.state).history.get(index, &self.inner.hooks)
    }

    pub fn last_history_entry(&self) -> Option<HistoryEntry> {
        self.inner.probe.fire(&ProbeEvent::HistoryAccess { index: None });
        lock(&self.inner.state).history.last(&self.inner.hooks)
    }

    pub fn script_from_history(&self, index: usize) -> Option<String> {
        self.history_entry(index).map(|entry| entry.script)
    }

    pub fn result_from_history(&self, index: usize) -> Option<Vec<u8>> {
        self.history_entry(index).map(|entry| entry.result)
    }

    pub fn last_script_from_history(&self) -> Option<String> {
        self.last_history_entry().map(|entry| entry.script)
    }

    pub fn last_result_from_history(&self) -> Option<Vec<u8>> {
        self.last_history_entry().map(|entry| entry.result)
    }
}

// --- Builder ---

enum PendingSource {
    Literal(String),
    Template(String),
    LiteralFile(PathBuf),
    TemplateFile(PathBuf),
}

/// Fallible construction of a [`ScriptInstance`] with custom kind, options, hooks and engine.
#[derive(Default)]
pub struct ScriptBuilder {
    source: Option<PendingSource>,
    options: Option<LaunchOptions>,
    language: Option<Arc<dyn ScriptLanguage>>,
    hooks: DelegateHooks,
    config: EngineConfig,
    probe: Option<Arc<dyn Probe>>,
    invoker: Option<Arc<dyn ProcessInvoker>>,
    bus: Option<NotificationBus>,
}

impl fmt::Debug for ScriptBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptBuilder")
            .field("options", &self.options)
            .field("language", &self.language.as_ref().map(|l| l.name().to_string()))
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, script: impl Into<String>) -> Self {
        self.source = Some(PendingSource::Literal(script.into()));
        self
    }

    pub fn template(mut self, text: impl Into<String>) -> Self {
        self.source = Some(PendingSource::Template(text.into()));
        self
    }

    /// Loads the script from a UTF-8 file at build time.
    pub fn source_file(mut self, path: impl AsRef<Path>) -> Self {
        self.source = Some(PendingSource::LiteralFile(path.as_ref().to_path_buf()));
        self
    }

    pub fn template_file(mut self, path: impl AsRef<Path>) -> Self {
        self.source = Some(PendingSource::TemplateFile(path.as_ref().to_path_buf()));
        self
    }

    /// Explicit options. Without them the language's defaults are used.
    pub fn options(mut self, options: LaunchOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn language(mut self, language: Arc<dyn ScriptLanguage>) -> Self {
        self.language = Some(language);
        self
    }

    pub fn delegate(mut self, hooks: DelegateHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn ProcessInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Publishes background notifications on a shared bus instead of a private one.
    pub fn notification_bus(mut self, bus: NotificationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validates the language's capabilities and the options, then loads the source.
    pub fn build(mut self) -> Result<ScriptInstance, ScriptError> {
        let language = self
            .language
            .take()
            .unwrap_or_else(|| Arc::new(BuiltinLanguage::Generic));
        let defaults = resolve_defaults(language.as_ref())?;

        let options = self.options.take().unwrap_or(defaults.options);
        options.validate()?;

        let source = match self.source.take() {
            Some(PendingSource::Literal(text)) => ScriptSource::Literal(text),
            Some(PendingSource::Template(text)) => {
                ScriptSource::Template(Template::with_delimiters(text, options.token_delimiters()))
            }
            Some(PendingSource::LiteralFile(path)) => ScriptSource::Literal(load(path)?),
            Some(PendingSource::TemplateFile(path)) => ScriptSource::Template(
                Template::with_delimiters(load(path)?, options.token_delimiters()),
            ),
            None => ScriptSource::Literal(defaults.script.unwrap_or_default()),
        };

        log::debug!(
            "Built {} script instance for '{}'",
            language.name(),
            options.launch_path
        );
        Ok(self.assemble(source, options))
    }

    fn assemble(self, source: ScriptSource, options: LaunchOptions) -> ScriptInstance {
        let invoker = self
            .invoker
            .unwrap_or_else(|| Arc::new(SystemInvoker));
        let probe = self.probe.unwrap_or_else(|| {
            if self.config.trace {
                Arc::new(LogProbe)
            } else {
                Arc::new(NoopProbe)
            }
        });

        let blocking = BlockingExecutor::new(Arc::clone(&invoker), &self.config);
        let background = NonBlockingExecutor::new(invoker, &self.config);
        let template = match &source {
            ScriptSource::Template(template) => Some(template.clone()),
            ScriptSource::Literal(_) => None,
        };

        ScriptInstance {
            inner: Arc::new(Inner {
                state: Mutex::new(ScriptState {
                    source,
                    template,
                    options,
                    history: HistoryStore::new(),
                    last_result: None,
                    last_return_value: NOT_EXECUTED_RETURN_VALUE,
                }),
                hooks: self.hooks,
                probe,
                bus: self.bus.unwrap_or_default(),
                blocking_status: blocking.status_cell(),
                background_status: background.status_cell(),
                blocking: Mutex::new(blocking),
                background: Mutex::new(background),
            }),
        }
    }
}

fn load(path: PathBuf) -> Result<String, ScriptError> {
    read_script_file(&path).map_err(|source| ScriptError::Io { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::executor::tests::FakeInvoker;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const WAIT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct RecordingProbe {
        events: Mutex<Vec<String>>,
    }

    impl Probe for RecordingProbe {
        fn fire(&self, event: &ProbeEvent<'_>) {
            let name = match event {
                ProbeEvent::ExecuteBegin { .. } => "begin",
                ProbeEvent::ExecuteEnd { .. } => "end",
                ProbeEvent::AppendData { .. } => "data",
                ProbeEvent::Saturate { .. } => "saturate",
                ProbeEvent::HistoryAccess { .. } => "history",
                ProbeEvent::Cleanup { .. } => "cleanup",
            };
            lock(&self.events).push(name.to_string());
        }
    }

    fn fake(output: &str, exit_code: i32) -> (Arc<FakeInvoker>, ScriptBuilder) {
        let invoker = Arc::new(FakeInvoker::new(output, exit_code));
        let builder = ScriptInstance::builder().invoker(invoker.clone());
        (invoker, builder)
    }

    #[test]
    fn test_echo_hello() {
        // --- Setup ---
        let script = ScriptInstance::builder()
            .source("hello")
            .options(crate::launch_options!("/bin/echo"))
            .build()
            .unwrap();

        // --- Execute ---
        let status = script.execute().unwrap();

        // --- Assert ---
        assert_eq!(status, ExecutionStatus::FinishedSuccessfully);
        let result = script.last_result().unwrap();
        assert_eq!(result.text(), "hello\n");
        assert_eq!(script.last_return_value(), 0);
        assert_eq!(script.blocking_status(), ExecutionStatus::FinishedSuccessfully);
        assert_eq!(script.background_status(), ExecutionStatus::NotExecuted);
    }

    #[test]
    fn test_default_instance_uses_generic_kind() {
        let script = ScriptInstance::new();
        assert_eq!(script.options().launch_path, "/bin/echo");
        assert_eq!(script.script(), DEFAULT_SCRIPT_SOURCE);
        assert!(script.last_result().is_none());
        assert_eq!(script.last_return_value(), -1);
        assert!(script.history().is_empty());
    }

    #[test]
    fn test_convenience_kinds() {
        let ruby = ScriptInstance::ruby("puts 1");
        assert_eq!(ruby.options().launch_path, "/usr/bin/ruby");
        assert_eq!(ruby.options().arguments, vec!["-e"]);
        assert_eq!(ScriptInstance::perl("print 1").options().arguments, vec!["-e"]);
        assert_eq!(ScriptInstance::python("print(1)").options().arguments, vec!["-c"]);
        assert_eq!(ScriptInstance::shell("true").script(), "true");
    }

    #[test]
    fn test_language_without_options_is_rejected() {
        struct Bare;
        impl ScriptLanguage for Bare {
            fn name(&self) -> &str {
                "bare"
            }
            fn capabilities(&self) -> crate::core::language::Capabilities {
                crate::core::language::Capabilities::default()
            }
        }

        let err = ScriptInstance::builder()
            .language(Arc::new(Bare))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Language(LanguageError::CapabilityMissing { .. })
        ));
    }

    #[test]
    fn test_language_without_default_script_starts_empty() {
        let script = ScriptInstance::builder()
            .language(Arc::new(BuiltinLanguage::Ruby))
            .build()
            .unwrap();
        assert_eq!(script.script(), "");
        assert_eq!(script.options().launch_path, "/usr/bin/ruby");
    }

    #[test]
    fn test_unsaturated_template_fails_before_launch() {
        // --- Setup ---
        let (invoker, builder) = fake("unused", 0);
        let script = builder.template("convert <#> to decimal").build().unwrap();

        // --- Execute & Assert ---
        assert!(matches!(
            script.execute(),
            Err(ScriptError::TemplateArgumentMissing)
        ));
        assert!(matches!(
            script.execute_in_background(),
            Err(ScriptError::TemplateArgumentMissing)
        ));
        assert!(lock(&invoker.launches).is_empty());
        assert_eq!(script.blocking_status(), ExecutionStatus::NotExecuted);
    }

    #[test]
    fn test_saturation_then_execute() {
        let (invoker, builder) = fake("31\n", 0);
        let script = builder.template("convert <#> to decimal").build().unwrap();

        let missing: [&str; 0] = [];
        assert!(matches!(
            script.saturate_with_arguments(&missing),
            Err(ScriptError::Template(TemplateError::ArgumentsMissing {
                expected: 1,
                supplied: 0
            }))
        ));
        assert!(script.is_template());

        assert!(script.saturate_with_argument("0x1F").unwrap());
        assert!(!script.is_template());
        assert_eq!(script.script(), "convert 0x1F to decimal");

        assert_eq!(script.execute().unwrap(), ExecutionStatus::FinishedSuccessfully);
        assert_eq!(lock(&invoker.launches)[0].1, "convert 0x1F to decimal");
    }

    #[test]
    fn test_resaturation_starts_from_original() {
        let script = ScriptInstance::with_template("<#> and <#>");
        script.saturate_with_arguments(&["a", "b"]).unwrap();
        assert_eq!(script.script(), "a and b");
        script.saturate_with_arguments(&["c", "d"]).unwrap();
        assert_eq!(script.script(), "c and d");
        assert_eq!(script.template().unwrap().text(), "<#> and <#>");
    }

    #[test]
    fn test_keyed_saturation() {
        let script = ScriptInstance::with_template("convert <#number#> to <#base#>");
        let values = HashMap::from([("number".to_string(), "0x1F".to_string())]);
        assert!(script.saturate_with_map(&values).unwrap());
        assert_eq!(script.script(), "convert 0x1F to <#base#>");
    }

    #[test]
    fn test_saturating_literal_is_rejected() {
        let script = ScriptInstance::with_source("echo");
        assert!(matches!(
            script.saturate_with_argument("x"),
            Err(ScriptError::NotATemplate)
        ));
    }

    #[test]
    fn test_option_delimiters_apply_to_template() {
        let script = ScriptInstance::builder()
            .template("echo {{who}}")
            .options(crate::launch_options!("/bin/echo").with_token_delimiters("{{", "}}"))
            .build()
            .unwrap();
        script.saturate_with_argument("world").unwrap();
        assert_eq!(script.script(), "echo world");

        script
            .set_options(crate::launch_options!("/bin/echo").with_token_delimiters("[[", "]]"))
            .unwrap();
        script.saturate_with_argument("again").unwrap();
        assert_eq!(script.script(), "echo {{who}}");
    }

    #[test]
    fn test_history_grows_in_execution_order() {
        let (_, builder) = fake("ok", 0);
        let script = builder.source("first").build().unwrap();
        script.execute().unwrap();
        script.set_script("second");
        script.execute().unwrap();
        script.set_script("third");
        script.execute().unwrap();

        let history = script.history();
        assert_eq!(history.len(), 3);
        let scripts: Vec<&str> = history.iter().map(|e| e.script.as_str()).collect();
        assert_eq!(scripts, ["first", "second", "third"]);
        assert_eq!(script.script_from_history(1).as_deref(), Some("second"));
        assert_eq!(script.result_from_history(0), Some(b"ok".to_vec()));
        assert_eq!(script.last_script_from_history().as_deref(), Some("third"));
        assert_eq!(script.last_result_from_history(), Some(b"ok".to_vec()));
        assert!(script.history_entry(3).is_none());
    }

    #[test]
    fn test_history_veto() {
        let (_, builder) = fake("ok", 0);
        let script = builder
            .source("x")
            .delegate(DelegateHooks::new().on_should_add_item_to_history(|_| false))
            .build()
            .unwrap();
        for _ in 0..4 {
            script.execute().unwrap();
        }
        assert_eq!(script.history_len(), 0);
        assert!(script.last_result().is_some());
    }

    #[test]
    fn test_result_hooks() {
        let (_, builder) = fake("secret", 0);
        let script = builder
            .source("x")
            .delegate(
                DelegateHooks::new().on_will_set_result(|data| data.to_ascii_uppercase()),
            )
            .build()
            .unwrap();
        let result = script.execute_with_result().unwrap();
        assert_eq!(result.output, b"SECRET");
        assert_eq!(script.last_result().unwrap().output, b"SECRET");
        assert_eq!(script.last_result_from_history(), Some(b"SECRET".to_vec()));

        let (_, builder) = fake("secret", 0);
        let vetoed = builder
            .source("x")
            .delegate(DelegateHooks::new().on_should_set_result(|_| false))
            .build()
            .unwrap();
        vetoed.execute().unwrap();
        assert!(vetoed.last_result().is_none());
        assert_eq!(vetoed.last_return_value(), 0);
        assert_eq!(vetoed.history_len(), 1);
    }

    #[test]
    fn test_script_and_options_hooks() {
        let script = ScriptInstance::builder()
            .source("start")
            .delegate(
                DelegateHooks::new()
                    .on_should_set_script(|s| !s.contains("rm -rf"))
                    .on_will_set_script(|s| s.trim().to_string())
                    .on_should_set_options(|o| o.launch_path != "/bin/false"),
            )
            .build()
            .unwrap();

        assert!(!script.set_script("rm -rf /"));
        assert_eq!(script.script(), "start");
        assert!(script.set_script("  ls  "));
        assert_eq!(script.script(), "ls");

        assert!(!script.set_options(crate::launch_options!("/bin/false")).unwrap());
        assert_eq!(script.options().launch_path, "/bin/echo");
        assert!(script.set_options(crate::launch_options!("/bin/sh", "-c")).unwrap());
        assert_eq!(script.options().launch_path, "/bin/sh");
        assert!(matches!(
            script.set_options(crate::launch_options!("")),
            Err(ScriptError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_nonexistent_executable() {
        // --- Setup ---
        let script = ScriptInstance::builder()
            .source("hello")
            .options(crate::launch_options!("/definitely/not/installed"))
            .build()
            .unwrap();

        // --- Execute ---
        let (result, error) = script.execute_with_error().unwrap();

        // --- Assert ---
        assert_eq!(result.status, ExecutionStatus::FailedWithException);
        assert_eq!(result.exit_code, -1);
        assert!(matches!(error, Some(ExecutionError::LaunchFailed { .. })));
        assert_eq!(script.history_len(), 0);
        assert!(script.last_result().is_none());
        assert_eq!(script.last_return_value(), -1);
    }

    #[test]
    fn test_termination_policy_on_real_process() {
        let strict = ScriptInstance::shell("exit 3");
        let (result, error) = strict.execute_with_error().unwrap();
        assert_eq!(result.status, ExecutionStatus::FailedWithException);
        assert!(matches!(error, Some(ExecutionError::UnsuccessfulExit { code: 3, .. })));
        assert_eq!(strict.last_return_value(), 3);
        assert_eq!(strict.history_len(), 1);

        let lenient = ScriptInstance::builder()
            .source("exit 3")
            .options(crate::launch_options!("/bin/sh", "-c").with_strict_termination(false))
            .build()
            .unwrap();
        assert_eq!(lenient.execute().unwrap(), ExecutionStatus::FinishedSuccessfully);
    }

    #[test]
    fn test_blocking_timeout() {
        let script = ScriptInstance::builder()
            .source("exec sleep 5")
            .options(crate::launch_options!("/bin/sh", "-c"))
            .config(EngineConfig {
                execution_timeout: Duration::from_millis(300),
                ..EngineConfig::default()
            })
            .build()
            .unwrap();

        let (result, error) = script.execute_with_error().unwrap();
        assert_eq!(result.status, ExecutionStatus::FailedWithException);
        assert!(matches!(error, Some(ExecutionError::TimedOut { .. })));
        assert_eq!(script.history_len(), 0);
    }

    #[test]
    fn test_background_two_chunks_single_notification() {
        // --- Setup ---
        let script = ScriptInstance::shell("printf first; sleep 0.2; printf second");
        let notifications = script.subscribe();

        // --- Execute ---
        let id = script.execute_in_background().unwrap();
        let notification = notifications.recv_timeout(WAIT).unwrap();

        // --- Assert ---
        assert_eq!(notification.execution_id, id);
        assert_eq!(notification.results, b"firstsecond");
        assert_eq!(
            notification.execution_status,
            ExecutionStatus::FinishedSuccessfully
        );
        assert_eq!(notification.task_return_value, 0);
        assert!(notification.error.is_none());
        assert!(notifications.recv_timeout(Duration::from_millis(300)).is_err());

        // History was updated before the notification went out.
        assert_eq!(script.history_len(), 1);
        assert_eq!(script.last_result().unwrap().output, b"firstsecond");
        assert_eq!(
            script.background_status(),
            ExecutionStatus::FinishedSuccessfully
        );
    }

    #[test]
    fn test_background_partial_hooks() {
        let (_, builder) = fake("abc", 0);
        let script = builder
            .source("x")
            .delegate(
                DelegateHooks::new()
                    .on_will_append_partial_result(|chunk| chunk.to_ascii_uppercase()),
            )
            .build()
            .unwrap();
        let notifications = script.subscribe();
        script.execute_in_background().unwrap();
        assert_eq!(notifications.recv_timeout(WAIT).unwrap().results, b"ABC");

        let (_, builder) = fake("abc", 0);
        let dropping = builder
            .source("x")
            .delegate(DelegateHooks::new().on_should_append_partial_result(|_| false))
            .build()
            .unwrap();
        let notifications = dropping.subscribe();
        dropping.execute_in_background().unwrap();
        assert!(notifications.recv_timeout(WAIT).unwrap().results.is_empty());
    }

    #[test]
    fn test_background_cancel_publishes_once() {
        let script = ScriptInstance::shell("exec sleep 5");
        let notifications = script.subscribe();

        script.execute_in_background().unwrap();
        assert!(matches!(
            script.execute_in_background(),
            Err(ScriptError::BackgroundExecutionInFlight)
        ));
        assert!(script.cancel_background());

        let notification = notifications.recv_timeout(WAIT).unwrap();
        assert_eq!(
            notification.execution_status,
            ExecutionStatus::FailedWithException
        );
        assert!(matches!(
            notification.error.as_deref(),
            Some(ExecutionError::Cancelled)
        ));
        assert!(notifications.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(script.history_len(), 0);
        assert_eq!(script.last_return_value(), -1);
    }

    #[test]
    fn test_background_runs_back_to_back() {
        let (invoker, builder) = fake("done", 0);
        let script = builder.source("x").build().unwrap();
        let notifications = script.subscribe();

        for _ in 0..3 {
            script.execute_in_background().unwrap();
            notifications.recv_timeout(WAIT).unwrap();
        }
        assert_eq!(lock(&invoker.launches).len(), 3);
        assert_eq!(script.history_len(), 3);
    }

    #[test]
    fn test_background_partial_hook_panic_publishes_once() {
        // --- Setup ---
        let (_, builder) = fake("abc", 0);
        let script = builder
            .source("x")
            .delegate(
                DelegateHooks::new()
                    .on_will_append_partial_result(|_: Vec<u8>| -> Vec<u8> { panic!("hook failed") }),
            )
            .build()
            .unwrap();
        let notifications = script.subscribe();

        // --- Execute ---
        let id = script.execute_in_background().unwrap();

        // --- Assert ---
        let notification = notifications.recv_timeout(WAIT).unwrap();
        assert_eq!(notification.execution_id, id);
        assert_eq!(
            notification.execution_status,
            ExecutionStatus::FailedWithException
        );
        assert_eq!(notification.task_return_value, -1);
        assert!(matches!(
            notification.error.as_deref(),
            Some(ExecutionError::HookPanicked { .. })
        ));
        assert!(notifications.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(script.history_len(), 0);
        assert_eq!(script.background_status(), ExecutionStatus::FailedWithException);
    }

    #[test]
    fn test_background_result_hook_panic_publishes_once() {
        let (_, builder) = fake("abc", 0);
        let script = builder
            .source("x")
            .delegate(
                DelegateHooks::new()
                    .on_will_set_result(|_: Vec<u8>| -> Vec<u8> { panic!("hook failed") }),
            )
            .build()
            .unwrap();
        let notifications = script.subscribe();

        script.execute_in_background().unwrap();

        let notification = notifications.recv_timeout(WAIT).unwrap();
        assert_eq!(notification.results, b"abc");
        assert_eq!(
            notification.execution_status,
            ExecutionStatus::FailedWithException
        );
        assert!(matches!(
            notification.error.as_deref(),
            Some(ExecutionError::HookPanicked { .. })
        ));
        assert!(notifications.recv_timeout(Duration::from_millis(300)).is_err());

        // The slot stays usable after the panic.
        script.execute_in_background().unwrap();
        assert!(notifications.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn test_blocking_and_background_in_flight_together() {
        // --- Setup ---
        let script = ScriptInstance::shell("sleep 1; printf background");
        let notifications = script.subscribe();

        // --- Execute ---
        let id = script.execute_in_background().unwrap();
        assert!(script.set_script("printf blocking"));
        let blocking = script.execute_with_result().unwrap();

        // --- Assert ---
        assert_eq!(blocking.output, b"blocking");
        assert_eq!(blocking.status, ExecutionStatus::FinishedSuccessfully);
        assert_eq!(script.blocking_status(), ExecutionStatus::FinishedSuccessfully);
        assert_eq!(script.background_status(), ExecutionStatus::Running);
        assert_eq!(script.history_len(), 1);

        let notification = notifications.recv_timeout(WAIT).unwrap();
        assert_eq!(notification.execution_id, id);
        assert_eq!(notification.results, b"background");
        assert_eq!(
            notification.execution_status,
            ExecutionStatus::FinishedSuccessfully
        );
        assert!(notifications.recv_timeout(Duration::from_millis(300)).is_err());

        assert_eq!(script.history_len(), 2);
        assert_eq!(script.script_from_history(0).unwrap(), "printf blocking");
        assert_eq!(
            script.script_from_history(1).unwrap(),
            "sleep 1; printf background"
        );
        assert_eq!(script.last_result().unwrap().output, b"background");
        assert_eq!(script.blocking_status(), ExecutionStatus::FinishedSuccessfully);
        assert_eq!(
            script.background_status(),
            ExecutionStatus::FinishedSuccessfully
        );
    }

    #[test]
    fn test_probe_sees_lifecycle() {
        let probe = Arc::new(RecordingProbe::default());
        let (_, builder) = fake("data", 0);
        let script = builder
            .template("<#>")
            .probe(probe.clone())
            .build()
            .unwrap();
        script.saturate_with_argument("x").unwrap();
        script.execute().unwrap();
        script.last_history_entry();

        let events = lock(&probe.events).clone();
        assert_eq!(
            events,
            ["saturate", "begin", "data", "end", "cleanup", "history"]
        );
    }

    #[test]
    fn test_file_constructors() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"echo <#>").unwrap();
        file.flush().unwrap();

        let script = ScriptInstance::builder()
            .template_file(file.path())
            .build()
            .unwrap();
        assert!(script.is_template());
        script.saturate_with_argument("hi").unwrap();
        assert_eq!(script.script(), "echo hi");

        let missing = ScriptInstance::builder()
            .source_file("/definitely/not/here.sh")
            .build();
        assert!(matches!(missing, Err(ScriptError::Io { .. })));
    }
}
