// EN: src/system/background.rs

use crate::CancellationToken;
use crate::core::commons::{lock, request_cancellation};
use crate::models::{EngineConfig, ExecutionStatus, LaunchOptions};
use crate::system::executor::{self, ExecutionError, Limits, Outcome, StatusCell};
use crate::system::invoker::ProcessInvoker;
use std::fmt;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs one script at a time on a worker thread.
///
/// The worker drains output chunk by chunk through a caller-supplied filter and hands the
/// final [`Outcome`] to a completion callback exactly once, even if the filter panics.
/// The slot's status turns terminal only after the completion callback returned, unless
/// the callback settles it earlier through the shared [`StatusCell`].
pub struct NonBlockingExecutor {
    invoker: Arc<dyn ProcessInvoker>,
    timeout: Option<Duration>,
    poll: Duration,
    status: StatusCell,
    cancel: CancellationToken,
    in_flight: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for NonBlockingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonBlockingExecutor")
            .field("timeout", &self.timeout)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl NonBlockingExecutor {
    pub fn new(invoker: Arc<dyn ProcessInvoker>, config: &EngineConfig) -> Self {
        Self {
            invoker,
            timeout: config.background_timeout,
            poll: config.poll_interval,
            status: StatusCell::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Whether an attempt is still supervising its process.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Starts `script` on a worker thread. The caller checks [`Self::is_running`] first.
    pub fn start<P, F>(
        &mut self,
        options: LaunchOptions,
        script: String,
        partial: P,
        finish: F,
    ) -> io::Result<()>
    where
        P: FnMut(Vec<u8>) -> Option<Vec<u8>> + Send + 'static,
        F: FnOnce(Outcome) + Send + 'static,
    {
        // The previous worker may still be delivering its completion.
        if let Some(previous) = self.worker.take() {
            if previous.join().is_err() {
                log::warn!("Previous background worker panicked.");
            }
        }

        self.cancel = Arc::new(AtomicBool::new(false));
        self.in_flight.store(true, Ordering::SeqCst);
        self.status.set(ExecutionStatus::Running);

        let invoker = Arc::clone(&self.invoker);
        let limits = Limits {
            timeout: self.timeout,
            cancel: Some(Arc::clone(&self.cancel)),
            poll: self.poll,
        };
        let status = self.status.clone();
        let in_flight = Arc::clone(&self.in_flight);

        let spawned = thread::Builder::new()
            .name("scriptwrap-bg".to_string())
            .spawn(move || {
                let in_flight_guard = scopeguard::guard(in_flight, |flag| {
                    flag.store(false, Ordering::SeqCst);
                });
                let outcome = supervise_guarded(invoker.as_ref(), &options, &script, &limits, partial);
                let terminal = outcome.status;
                drop(in_flight_guard);

                if panic::catch_unwind(AssertUnwindSafe(|| finish(outcome))).is_err() {
                    log::error!("Completion of background execution of '{}' panicked.", options.launch_path);
                }
                status.set(terminal);
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.in_flight.store(false, Ordering::SeqCst);
                self.status.set(ExecutionStatus::FailedWithException);
                Err(e)
            }
        }
    }

    /// Requests cancellation of the running attempt. Returns `false` if none is running.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        log::debug!("Cancelling background execution.");
        request_cancellation(&self.cancel);
        true
    }
}

/// Like [`executor::supervise`], but a panicking `partial` ends the attempt as failed
/// with the output accepted so far instead of unwinding the worker.
fn supervise_guarded<P>(
    invoker: &dyn ProcessInvoker,
    options: &LaunchOptions,
    script: &str,
    limits: &Limits,
    mut partial: P,
) -> Outcome
where
    P: FnMut(Vec<u8>) -> Option<Vec<u8>>,
{
    let accepted = Mutex::new(Vec::new());
    let filter = |chunk: Vec<u8>| {
        let chunk = partial(chunk)?;
        lock(&accepted).extend_from_slice(&chunk);
        Some(chunk)
    };

    match panic::catch_unwind(AssertUnwindSafe(|| {
        executor::supervise(invoker, options, script, limits, filter)
    })) {
        Ok(outcome) => outcome,
        Err(_) => {
            let path = options.launch_path.clone();
            log::error!("A partial result hook panicked while running '{}'.", path);
            let output = mem::take(&mut *lock(&accepted));
            Outcome::failed(output, ExecutionError::HookPanicked { path })
        }
    }
}
