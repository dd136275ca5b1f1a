// EN: src/system/executor.rs

use crate::CancellationToken;
use crate::core::commons::lock;
use crate::models::{EngineConfig, ExecutionResult, ExecutionStatus, LaunchOptions};
use crate::system::invoker::{ProcessHandle, ProcessInvoker};
use crate::system::pipe::{self, Interruption, Wait, Watch};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command '{path}' could not be launched: {source}")]
    LaunchFailed {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Output of command '{path}' could not be read: {source}")]
    Pipe {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Command '{path}' did not finish within {timeout:?} and was killed.")]
    TimedOut { path: String, timeout: Duration },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
    #[error("Command '{path}' exited with code {code}.")]
    UnsuccessfulExit { path: String, code: i32 },
    #[error("Failed to wait for command '{path}': {source}")]
    Wait {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("A delegate hook panicked while handling the output of '{path}'.")]
    HookPanicked { path: String },
}

/// Everything one supervised attempt produced.
#[derive(Debug)]
pub struct Outcome {
    pub output: Vec<u8>,
    pub exit_code: i32,
    pub status: ExecutionStatus,
    pub error: Option<ExecutionError>,
    /// The process ran to exit and its output pipe reached end-of-stream.
    pub completed: bool,
}

impl Outcome {
    pub(crate) fn failed(output: Vec<u8>, error: ExecutionError) -> Self {
        let result = ExecutionResult::failed(output);
        Self {
            output: result.output,
            exit_code: result.exit_code,
            status: result.status,
            error: Some(error),
            completed: false,
        }
    }

    pub fn result(&self) -> ExecutionResult {
        ExecutionResult {
            output: self.output.clone(),
            exit_code: self.exit_code,
            status: self.status,
        }
    }
}

/// Timeout, cancellation and polling settings for one attempt.
#[derive(Debug, Clone)]
pub struct Limits {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    pub poll: Duration,
}

/// Shared, lock-protected execution status of one executor slot.
#[derive(Debug, Clone, Default)]
pub struct StatusCell(Arc<Mutex<ExecutionStatus>>);

impl StatusCell {
    pub fn get(&self) -> ExecutionStatus {
        *lock(&self.0)
    }

    pub fn set(&self, status: ExecutionStatus) {
        *lock(&self.0) = status;
    }
}

/// Launches `script`, drains the merged output through `filter` and classifies the exit.
///
/// `filter` sees every chunk in arrival order; returning `None` drops the chunk.
/// On timeout or cancellation the process is killed and whatever was read so far is kept.
pub fn supervise(
    invoker: &dyn ProcessInvoker,
    options: &LaunchOptions,
    script: &str,
    limits: &Limits,
    mut filter: impl FnMut(Vec<u8>) -> Option<Vec<u8>>,
) -> Outcome {
    let path = options.launch_path.clone();
    let handle = match invoker.launch(options, script) {
        Ok(handle) => handle,
        Err(source) => {
            log::debug!("Launch of '{}' failed: {}", path, source);
            return Outcome::failed(Vec::new(), ExecutionError::LaunchFailed { path, source });
        }
    };
    let watch = Watch::start(limits.timeout, limits.cancel.clone(), limits.poll);

    // Reaps the child on every exit path, unwinding from a panicking hook included.
    let mut handle = scopeguard::guard(handle, |mut handle: Box<dyn ProcessHandle>| {
        if let Ok(None) = handle.try_wait() {
            pipe::terminate(handle.as_mut());
        }
    });

    let chunks = match handle.take_output() {
        Some(reader) => match pipe::spawn_reader(reader) {
            Ok(chunks) => chunks,
            Err(source) => {
                return Outcome::failed(Vec::new(), ExecutionError::Pipe { path, source });
            }
        },
        None => pipe::closed_stream(),
    };

    let mut output = Vec::new();
    let mut append = |chunk: Vec<u8>| {
        if let Some(chunk) = filter(chunk) {
            output.extend_from_slice(&chunk);
        }
    };

    if let Err(interruption) = pipe::drain_until_eof(&chunks, &watch, &mut append) {
        pipe::terminate(&mut **handle);
        pipe::drain_remaining(&chunks, watch.poll(), &mut append);
        return interrupted(output, interruption, path, limits);
    }

    match pipe::wait_for_exit(&mut **handle, &watch) {
        Wait::Exited(code) => {
            let success = options.is_success(code);
            log::debug!("Command '{}' exited with code {}", path, code);
            Outcome {
                output,
                exit_code: code,
                status: if success {
                    ExecutionStatus::FinishedSuccessfully
                } else {
                    ExecutionStatus::FailedWithException
                },
                error: (!success).then_some(ExecutionError::UnsuccessfulExit { path, code }),
                completed: true,
            }
        }
        Wait::Interrupted(interruption) => {
            pipe::terminate(&mut **handle);
            interrupted(output, interruption, path, limits)
        }
        Wait::Failed(source) => Outcome::failed(output, ExecutionError::Wait { path, source }),
    }
}

fn interrupted(output: Vec<u8>, interruption: Interruption, path: String, limits: &Limits) -> Outcome {
    let error = match interruption {
        Interruption::Cancelled => ExecutionError::Cancelled,
        Interruption::TimedOut => ExecutionError::TimedOut {
            path,
            timeout: limits.timeout.unwrap_or_default(),
        },
    };
    log::debug!("{}", error);
    Outcome::failed(output, error)
}

/// Runs one script at a time on the calling thread.
pub struct BlockingExecutor {
    invoker: Arc<dyn ProcessInvoker>,
    timeout: Duration,
    poll: Duration,
    status: StatusCell,
}

impl fmt::Debug for BlockingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingExecutor")
            .field("timeout", &self.timeout)
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}

impl BlockingExecutor {
    pub fn new(invoker: Arc<dyn ProcessInvoker>, config: &EngineConfig) -> Self {
        Self {
            invoker,
            timeout: config.execution_timeout,
            poll: config.poll_interval,
            status: StatusCell::default(),
        }
    }

    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Runs `script` to completion or until the execution timeout kills it.
    pub fn run(
        &mut self,
        options: &LaunchOptions,
        script: &str,
        filter: impl FnMut(Vec<u8>) -> Option<Vec<u8>>,
    ) -> Outcome {
        self.status.set(ExecutionStatus::Running);
        let limits = Limits {
            timeout: Some(self.timeout),
            cancel: None,
            poll: self.poll,
        };
        let outcome = supervise(self.invoker.as_ref(), options, script, &limits, filter);
        self.status.set(outcome.status);
        outcome
    }
}
