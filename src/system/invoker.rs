// EN: src/system/invoker.rs

use crate::models::LaunchOptions;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

/// A launched process: its merged stdout/stderr pipe and its termination primitives.
pub trait ProcessHandle: Send {
    fn id(&self) -> u32;

    /// Takes the read end of the output pipe. Returns `None` once taken.
    fn take_output(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Non-blocking termination check; `Some(exit_code)` once the process has exited.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    fn wait(&mut self) -> io::Result<i32>;

    fn kill(&mut self) -> io::Result<()>;
}

/// Wraps the host's process-launch primitive.
pub trait ProcessInvoker: Send + Sync {
    /// Starts `options.launch_path` with `options.arguments` followed by `script` as the
    /// final argument.
    fn launch(&self, options: &LaunchOptions, script: &str) -> io::Result<Box<dyn ProcessHandle>>;
}

/// Launches real processes through `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInvoker;

impl ProcessInvoker for SystemInvoker {
    fn launch(&self, options: &LaunchOptions, script: &str) -> io::Result<Box<dyn ProcessHandle>> {
        let expanded = shellexpand::tilde(&options.launch_path);
        let launch_path = dunce::simplified(Path::new(expanded.as_ref()));

        if !script.is_empty() && options.arguments.iter().any(|arg| arg == script) {
            log::warn!(
                "The script text also appears in the launch arguments of '{}'; it is appended again as the final argument.",
                launch_path.display()
            );
        }

        // Both output streams share one pipe so the caller sees them in write order.
        let (reader, writer) = io::pipe()?;
        let child = {
            let mut command = Command::new(launch_path);
            command
                .args(&options.arguments)
                .arg(script)
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer);
            command.spawn()?
            // `command` drops here, closing our copies of the write end.
        };
        log::debug!(
            "Launched '{}' (PID: {}) with {} argument(s)",
            launch_path.display(),
            child.id(),
            options.arguments.len() + 1
        );

        Ok(Box::new(SystemProcess {
            child,
            output: Some(Box::new(reader)),
        }))
    }
}

struct SystemProcess {
    child: Child,
    output: Option<Box<dyn Read + Send>>,
}

impl fmt::Debug for SystemProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemProcess")
            .field("pid", &self.child.id())
            .field("output_taken", &self.output.is_none())
            .finish()
    }
}

impl ProcessHandle for SystemProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
        self.output.take()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    fn wait(&mut self) -> io::Result<i32> {
        self.child.wait().map(exit_code)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }
}

/// Exit code of a finished process. Death by signal maps to the negated signal number.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
