//! Byte-pipe draining protocol shared by both executors.
//!
//! A dedicated reader thread turns the blocking pipe into a channel of chunks, so the
//! supervising loop can watch a deadline or a cancellation flag while data arrives.

use crate::CancellationToken;
use crate::constants::PIPE_CHUNK_SIZE;
use crate::core::commons::is_cancelled;
use crate::system::invoker::ProcessHandle;
use std::io::{self, ErrorKind, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    TimedOut,
    Cancelled,
}

/// Deadline and cancellation state for one supervised process.
#[derive(Debug, Clone)]
pub struct Watch {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
    poll: Duration,
}

impl Watch {
    pub fn start(
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
        poll: Duration,
    ) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
            poll,
        }
    }

    pub fn interruption(&self) -> Option<Interruption> {
        if self.cancel.as_ref().is_some_and(is_cancelled) {
            return Some(Interruption::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::TimedOut),
            _ => None,
        }
    }

    /// Time to block before checking again: the poll interval, shortened near the deadline.
    fn next_wait(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .poll
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.poll,
        }
    }

    pub fn poll(&self) -> Duration {
        self.poll
    }
}

/// Spawns the reader thread for `reader`.
pub fn spawn_reader(mut reader: Box<dyn Read + Send>) -> io::Result<Receiver<Vec<u8>>> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("scriptwrap-pipe".to_string())
        .spawn(move || {
            let mut buffer = [0u8; PIPE_CHUNK_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = buffer.get(..n).unwrap_or_default().to_vec();
                        if sender.send(chunk).is_err() {
                            break; // Supervisor gave up on this process.
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("Reading process output failed: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(receiver)
}

/// A receiver that is already at end-of-stream.
pub fn closed_stream() -> Receiver<Vec<u8>> {
    let (_, receiver) = mpsc::channel();
    receiver
}

/// Feeds chunks to `sink` until end-of-stream, unless the watch fires first.
pub fn drain_until_eof(
    chunks: &Receiver<Vec<u8>>,
    watch: &Watch,
    mut sink: impl FnMut(Vec<u8>),
) -> Result<(), Interruption> {
    loop {
        if let Some(interruption) = watch.interruption() {
            return Err(interruption);
        }
        match chunks.recv_timeout(watch.next_wait()) {
            Ok(chunk) => sink(chunk),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

/// Picks up whatever the reader still delivers within `grace` of each chunk.
pub fn drain_remaining(chunks: &Receiver<Vec<u8>>, grace: Duration, mut sink: impl FnMut(Vec<u8>)) {
    while let Ok(chunk) = chunks.recv_timeout(grace) {
        sink(chunk);
    }
}

#[derive(Debug)]
pub enum Wait {
    Exited(i32),
    Interrupted(Interruption),
    Failed(io::Error),
}

pub fn wait_for_exit(handle: &mut dyn ProcessHandle, watch: &Watch) -> Wait {
    loop {
        match handle.try_wait() {
            Ok(Some(code)) => return Wait::Exited(code),
            Ok(None) => {
                if let Some(interruption) = watch.interruption() {
                    return Wait::Interrupted(interruption);
                }
                thread::sleep(watch.next_wait());
            }
            Err(e) => return Wait::Failed(e),
        }
    }
}

/// Kills the process and reaps it.
pub fn terminate(handle: &mut dyn ProcessHandle) {
    log::debug!("Killing child process (PID: {})...", handle.id());
    if let Err(e) = handle.kill() {
        log::warn!("Failed to kill child process {}: {}", handle.id(), e);
    }
    handle.wait().ok();
}
