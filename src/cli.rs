// src/cli.rs

use crate::core::language::{BuiltinLanguage, ScriptLanguage};
use crate::models::{EngineConfig, ExecutionResult, LaunchOptions};
use crate::system::executor::ExecutionError;
use crate::system::languages_config::{load_languages_config, resolve_language};
use crate::{ExecutionStatus, ScriptBuilder, ScriptInstance};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use colored::*;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// scriptwrap: run a script through an external interpreter and report how it ended.
///
/// The script is passed to the interpreter as its final argument, after the
/// interpreter's own arguments (e.g. `/bin/sh -c <script>`).
///
/// Templates contain `<#>` or `<#name#>` tokens which are filled from `--arg`
/// (in order) or `--key` (by name) before the script runs.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The script text. Read from `--file` when omitted.
    pub source: Option<String>,

    /// Language whose interpreter runs the script (shell, ruby, python, perl, generic,
    /// or any entry of languages.toml). Defaults to `shell`.
    #[arg(short, long, value_name = "LANG", conflicts_with = "launch")]
    pub lang: Option<String>,

    /// Explicit interpreter command line, e.g. `"/usr/bin/env ruby -e"`.
    #[arg(long, value_name = "CMD")]
    pub launch: Option<String>,

    /// Read the script from a UTF-8 file.
    #[arg(short, long, value_name = "PATH", conflicts_with = "source")]
    pub file: Option<PathBuf>,

    /// Treat the script as a template.
    #[arg(short, long)]
    pub template: bool,

    /// Positional template value. Repeat for each `<#>` token, in order.
    #[arg(short = 'a', long = "arg", value_name = "VALUE", requires = "template")]
    pub args: Vec<String>,

    /// Keyed template value for `<#KEY#>` tokens.
    #[arg(
        short = 'k',
        long = "key",
        value_name = "KEY=VALUE",
        value_parser = parse_key_value,
        requires = "template",
        conflicts_with = "args"
    )]
    pub keys: Vec<(String, String)>,

    /// Run on a worker thread and wait for the completion notification.
    #[arg(short, long)]
    pub background: bool,

    /// Treat every non-negative exit code as success.
    #[arg(long)]
    pub lenient: bool,

    /// Kill the script after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Trace engine events through the logger (`RUST_LOG=trace`).
    #[arg(long)]
    pub trace: bool,
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", input))
}

/// Runs the CLI request. Returns the process exit code to use.
pub fn run(cli: Cli) -> Result<i32> {
    log::debug!("CLI args parsed: {:?}", cli);

    let config = engine_config(&cli)?;
    let builder = ScriptInstance::builder().config(config);
    let builder = with_launcher(builder, &cli)?;
    let builder = match (&cli.file, cli.source.clone(), cli.template) {
        (Some(path), _, true) => builder.template_file(path),
        (Some(path), _, false) => builder.source_file(path),
        (None, Some(text), true) => builder.template(text),
        (None, Some(text), false) => builder.source(text),
        (None, None, _) => bail!("No script given. Pass it as an argument or with --file."),
    };
    let script = builder.build()?;

    if cli.lenient {
        script.set_options(script.options().with_strict_termination(false))?;
    }

    if cli.template {
        if !cli.keys.is_empty() {
            let values: HashMap<String, String> = cli.keys.iter().cloned().collect();
            script.saturate_with_map(&values)?;
        } else {
            script.saturate_with_arguments(&cli.args)?;
        }
        log::info!("Saturated script: {}", script.script());
    }

    let (result, error) = if cli.background {
        run_in_background(&script)?
    } else {
        let (result, error) = script.execute_with_error()?;
        (result, error.map(Arc::new))
    };
    report(&result, error.as_deref())
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig {
        trace: cli.trace,
        ..EngineConfig::default()
    };
    if let Some(seconds) = cli.timeout {
        let timeout = Duration::try_from_secs_f64(seconds)
            .with_context(|| format!("Invalid timeout: {}", seconds))?;
        config.execution_timeout = timeout;
        config.background_timeout = Some(timeout);
    }
    Ok(config)
}

fn with_launcher(builder: ScriptBuilder, cli: &Cli) -> Result<ScriptBuilder> {
    if let Some(command_line) = &cli.launch {
        let options = LaunchOptions::from_command_line(command_line)
            .with_context(|| format!("Invalid --launch command '{}'", command_line))?;
        return Ok(builder.options(options));
    }

    let name = cli
        .lang
        .clone()
        .unwrap_or_else(|| BuiltinLanguage::Shell.as_str().to_string());
    let languages = match load_languages_config() {
        Ok(languages) => Some(languages),
        Err(e) => {
            log::warn!("Ignoring languages.toml: {}", e);
            None
        }
    };
    let language: Arc<dyn ScriptLanguage> = resolve_language(&name, languages.as_ref())?;
    Ok(builder.language(language))
}

fn run_in_background(
    script: &ScriptInstance,
) -> Result<(ExecutionResult, Option<Arc<ExecutionError>>)> {
    let notifications = script.subscribe();
    let id = script.execute_in_background()?;
    log::info!("Background execution {} started", id);

    let notification = notifications
        .recv()
        .map_err(|_| anyhow!("Background execution {} ended without a notification", id))?;
    Ok((
        ExecutionResult {
            output: notification.results,
            exit_code: notification.task_return_value,
            status: notification.execution_status,
        },
        notification.error,
    ))
}

fn report(result: &ExecutionResult, error: Option<&ExecutionError>) -> Result<i32> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(&result.output)?;
    stdout.flush()?;

    if let Some(error) = error {
        eprintln!("{}: {}", "Warning".yellow().bold(), error);
    }
    match result.status {
        ExecutionStatus::FinishedSuccessfully => {
            log::info!("{} (exit {})", result.status, result.exit_code);
            Ok(0)
        }
        _ => {
            eprintln!(
                "{} {} (exit {})",
                "✗".red(),
                result.status.to_string().red(),
                result.exit_code
            );
            Ok(if result.exit_code > 0 { result.exit_code } else { 1 })
        }
    }
}
