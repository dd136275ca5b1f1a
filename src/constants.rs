// src/constants.rs

use std::time::Duration;

/// Default start marker of a template token.
pub const TEMPLATE_TOKEN_START: &str = "<#";

/// Default end marker of a template token.
pub const TEMPLATE_TOKEN_END: &str = "#>";

/// Launch path used when a script kind supplies no options of its own.
pub const DEFAULT_LAUNCH_PATH: &str = "/bin/echo";

/// Script source used when a script kind supplies no default script.
pub const DEFAULT_SCRIPT_SOURCE: &str = "<script source placeholder>";

/// Wall-clock ceiling for a blocking execution.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the executors poll a running process for termination.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Size of a single read from the output pipe.
pub const PIPE_CHUNK_SIZE: usize = 4096;

/// Return value reported before any execution has completed.
pub const NOT_EXECUTED_RETURN_VALUE: i32 = -1;

// --- Options record keys ---

pub const OPTIONS_LAUNCH_PATH_KEY: &str = "launchPath";
pub const OPTIONS_ARGUMENTS_KEY: &str = "arguments";
pub const OPTIONS_STRICT_TERMINATION_KEY: &str = "strictTerminationPolicy";
pub const OPTIONS_TOKEN_START_KEY: &str = "templateTokenStart";
pub const OPTIONS_TOKEN_END_KEY: &str = "templateTokenEnd";

/// The name of the directory holding scriptwrap configuration (inside the user config dir).
pub const CONFIG_DIR_NAME: &str = "scriptwrap";

/// The name of the file mapping language names to interpreters.
pub const LANGUAGES_CONFIG_FILENAME: &str = "languages.toml";
