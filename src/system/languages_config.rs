// EN: src/system/languages_config.rs

use crate::constants::{CONFIG_DIR_NAME, LANGUAGES_CONFIG_FILENAME};
use crate::core::language::{BuiltinLanguage, Capabilities, LanguageError, ScriptLanguage};
use crate::models::LaunchOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not find the user config directory.")]
    ConfigDirNotFound,
    #[error("Failed to parse languages.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize languages config to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// One `[languages.<name>]` table.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LanguageConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_termination_policy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_script: Option<String>,
}

impl LanguageConfig {
    pub fn launch_options(&self) -> LaunchOptions {
        let options = LaunchOptions::new(self.path.display().to_string(), self.arguments.clone());
        match self.strict_termination_policy {
            Some(strict) => options.with_strict_termination(strict),
            None => options,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguagesConfig {
    #[serde(default)]
    pub languages: BTreeMap<String, LanguageConfig>,
}

impl LanguagesConfig {
    pub fn language(&self, name: &str) -> Option<ConfiguredLanguage> {
        self.languages
            .get(name)
            .map(|config| ConfiguredLanguage::new(name, config.clone()))
    }
}

/// A script kind defined in `languages.toml`.
#[derive(Debug, Clone)]
pub struct ConfiguredLanguage {
    name: String,
    config: LanguageConfig,
}

impl ConfiguredLanguage {
    pub fn new(name: impl Into<String>, config: LanguageConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl ScriptLanguage for ConfiguredLanguage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        let config = self.config.clone();
        let capabilities = Capabilities::new(move || config.launch_options());
        match self.config.default_script.clone() {
            Some(script) => capabilities.with_default_script(move || script.clone()),
            None => capabilities,
        }
    }
}

/// Path of `languages.toml` inside the user config directory, creating the directory.
pub fn languages_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join(CONFIG_DIR_NAME);
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }
    Ok(config_dir.join(LANGUAGES_CONFIG_FILENAME))
}

/// Loads the user's `languages.toml`, generating it from the host on first use.
pub fn load_languages_config() -> Result<LanguagesConfig, ConfigError> {
    load_languages_config_from(&languages_config_path()?)
}

pub fn load_languages_config_from(path: &Path) -> Result<LanguagesConfig, ConfigError> {
    if !path.exists() {
        let default_config = generate_default_languages_config();
        let toml_string = toml::to_string_pretty(&default_config)?;
        fs::write(path, toml_string)?;
        log::info!("Generated default languages config at '{}'", path.display());
        Ok(default_config)
    } else {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Finds the interpreters installed on this host.
pub fn generate_default_languages_config() -> LanguagesConfig {
    let candidates: [(&str, &[&str], &str); 4] = [
        ("shell", &["sh", "bash"], "-c"),
        ("ruby", &["ruby"], "-e"),
        ("python", &["python3", "python"], "-c"),
        ("perl", &["perl"], "-e"),
    ];

    let mut languages = BTreeMap::new();
    for (name, executables, flag) in candidates {
        if let Some(path) = executables.iter().find_map(|exe| find_executable_in_path(exe)) {
            languages.insert(
                name.to_string(),
                LanguageConfig {
                    path,
                    arguments: vec![flag.to_string()],
                    strict_termination_policy: None,
                    default_script: None,
                },
            );
        }
    }
    LanguagesConfig { languages }
}

fn find_executable_in_path(executable_name: &str) -> Option<PathBuf> {
    let path_var = env::var("PATH").ok()?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(executable_name))
        .find(|candidate| candidate.is_file())
}

/// Resolves a language name: entries of `config` first, then the builtin kinds.
pub fn resolve_language(
    name: &str,
    config: Option<&LanguagesConfig>,
) -> Result<Arc<dyn ScriptLanguage>, LanguageError> {
    if let Some(language) = config.and_then(|config| config.language(name)) {
        log::debug!("Using language '{}' from {}", name, LANGUAGES_CONFIG_FILENAME);
        return Ok(Arc::new(language));
    }
    let builtin: BuiltinLanguage = name.parse()?;
    Ok(Arc::new(builtin))
}
