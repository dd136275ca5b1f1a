//! # Script Languages
//!
//! A script "kind" tells a [`crate::ScriptInstance`] how to launch its tool when the
//! caller supplies no options. Kinds describe themselves through [`Capabilities`]:
//! default launch options are required, a default script source is optional.
//! Capabilities are validated once, when an instance is built.

use crate::constants::{DEFAULT_LAUNCH_PATH, DEFAULT_SCRIPT_SOURCE};
use crate::models::LaunchOptions;
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

pub type DefaultOptionsFn = Arc<dyn Fn() -> LaunchOptions + Send + Sync>;
pub type DefaultScriptFn = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LanguageError {
    #[error("Language '{language}' does not provide the required capability '{capability}'.")]
    CapabilityMissing {
        language: String,
        capability: Capability,
    },
    #[error("Language '{language}' declares capability '{capability}' but does not implement it.")]
    DoesNotConform {
        language: String,
        capability: Capability,
    },
    #[error("Unknown language '{0}'.")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    DefaultOptions,
    DefaultScript,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::DefaultOptions => f.write_str("default options"),
            Capability::DefaultScript => f.write_str("default script"),
        }
    }
}

/// What a script kind declares and what it actually provides.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub declared: Vec<Capability>,
    pub default_options: Option<DefaultOptionsFn>,
    pub default_script: Option<DefaultScriptFn>,
}

impl Capabilities {
    /// Declares and provides the required default-options capability.
    pub fn new(default_options: impl Fn() -> LaunchOptions + Send + Sync + 'static) -> Self {
        Self {
            declared: vec![Capability::DefaultOptions],
            default_options: Some(Arc::new(default_options)),
            default_script: None,
        }
    }

    /// Declares and provides the optional default-script capability.
    pub fn with_default_script(
        mut self,
        default_script: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.declare(Capability::DefaultScript);
        self.default_script = Some(Arc::new(default_script));
        self
    }

    fn declare(&mut self, capability: Capability) {
        if !self.declared.contains(&capability) {
            self.declared.push(capability);
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("declared", &self.declared)
            .field("default_options", &self.default_options.is_some())
            .field("default_script", &self.default_script.is_some())
            .finish()
    }
}

/// A concrete script kind (shell, Ruby, ...).
pub trait ScriptLanguage: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> Capabilities;
}

/// Defaults resolved from a validated language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageDefaults {
    pub options: LaunchOptions,
    pub script: Option<String>,
}

/// Checks a language's capabilities and produces its defaults.
pub fn resolve_defaults(language: &dyn ScriptLanguage) -> Result<LanguageDefaults, LanguageError> {
    let name = language.name().to_string();
    let capabilities = language.capabilities();

    for capability in &capabilities.declared {
        let implemented = match capability {
            Capability::DefaultOptions => capabilities.default_options.is_some(),
            Capability::DefaultScript => capabilities.default_script.is_some(),
        };
        if !implemented {
            return Err(LanguageError::DoesNotConform {
                language: name,
                capability: *capability,
            });
        }
    }

    let default_options =
        capabilities
            .default_options
            .ok_or_else(|| LanguageError::CapabilityMissing {
                language: name.clone(),
                capability: Capability::DefaultOptions,
            })?;

    log::debug!("Resolved defaults for language '{}'", name);
    Ok(LanguageDefaults {
        options: default_options(),
        script: capabilities.default_script.map(|f| f()),
    })
}

// --- Builtin Languages ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum BuiltinLanguage {
    /// `/bin/echo` with a placeholder script.
    Generic,
    Shell,
    Ruby,
    Python,
    Perl,
}

impl BuiltinLanguage {
    pub const ALL: [BuiltinLanguage; 5] = [
        BuiltinLanguage::Generic,
        BuiltinLanguage::Shell,
        BuiltinLanguage::Ruby,
        BuiltinLanguage::Python,
        BuiltinLanguage::Perl,
    ];

    pub fn default_options(self) -> LaunchOptions {
        match self {
            BuiltinLanguage::Generic => crate::launch_options!(DEFAULT_LAUNCH_PATH),
            BuiltinLanguage::Shell => crate::launch_options!("/bin/sh", "-c"),
            BuiltinLanguage::Ruby => crate::launch_options!("/usr/bin/ruby", "-e"),
            BuiltinLanguage::Python => crate::launch_options!("/usr/bin/python3", "-c"),
            BuiltinLanguage::Perl => crate::launch_options!("/usr/bin/perl", "-e"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinLanguage::Generic => "generic",
            BuiltinLanguage::Shell => "shell",
            BuiltinLanguage::Ruby => "ruby",
            BuiltinLanguage::Python => "python",
            BuiltinLanguage::Perl => "perl",
        }
    }
}

impl ScriptLanguage for BuiltinLanguage {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn capabilities(&self) -> Capabilities {
        let language = *self;
        let capabilities = Capabilities::new(move || language.default_options());
        match language {
            BuiltinLanguage::Generic => {
                capabilities.with_default_script(|| DEFAULT_SCRIPT_SOURCE.to_string())
            }
            _ => capabilities,
        }
    }
}

impl FromStr for BuiltinLanguage {
    type Err = LanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|language| language.as_str().eq_ignore_ascii_case(s))
            .or(match s.to_ascii_lowercase().as_str() {
                "sh" | "bash" => Some(BuiltinLanguage::Shell),
                "rb" => Some(BuiltinLanguage::Ruby),
                "py" => Some(BuiltinLanguage::Python),
                "pl" => Some(BuiltinLanguage::Perl),
                _ => None,
            })
            .ok_or_else(|| LanguageError::Unknown(s.to_string()))
    }
}

impl fmt::Display for BuiltinLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOptions;

    impl ScriptLanguage for NoOptions {
        fn name(&self) -> &str {
            "no-options"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
    }

    struct DeclaresScriptOnly;

    impl ScriptLanguage for DeclaresScriptOnly {
        fn name(&self) -> &str {
            "liar"
        }

        fn capabilities(&self) -> Capabilities {
            let mut capabilities = Capabilities::new(|| crate::launch_options!("/bin/cat"));
            capabilities.declared.push(Capability::DefaultScript);
            capabilities
        }
    }

    #[test]
    fn test_generic_language_defaults() {
        let defaults = resolve_defaults(&BuiltinLanguage::Generic).unwrap();
        assert_eq!(defaults.options.launch_path, DEFAULT_LAUNCH_PATH);
        assert!(defaults.options.arguments.is_empty());
        assert_eq!(defaults.script.as_deref(), Some(DEFAULT_SCRIPT_SOURCE));
    }

    #[test]
    fn test_interpreter_defaults() {
        let ruby = resolve_defaults(&BuiltinLanguage::Ruby).unwrap();
        assert_eq!(ruby.options.launch_path, "/usr/bin/ruby");
        assert_eq!(ruby.options.arguments, vec!["-e"]);
        assert!(ruby.script.is_none());

        let shell = resolve_defaults(&BuiltinLanguage::Shell).unwrap();
        assert_eq!(shell.options.arguments, vec!["-c"]);
    }

    #[test]
    fn test_missing_required_capability() {
        let err = resolve_defaults(&NoOptions).unwrap_err();
        assert_eq!(
            err,
            LanguageError::CapabilityMissing {
                language: "no-options".to_string(),
                capability: Capability::DefaultOptions,
            }
        );
    }

    #[test]
    fn test_declared_but_unimplemented_capability() {
        let err = resolve_defaults(&DeclaresScriptOnly).unwrap_err();
        assert!(matches!(
            err,
            LanguageError::DoesNotConform {
                capability: Capability::DefaultScript,
                ..
            }
        ));
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!("ruby".parse::<BuiltinLanguage>().unwrap(), BuiltinLanguage::Ruby);
        assert_eq!("PY".parse::<BuiltinLanguage>().unwrap(), BuiltinLanguage::Python);
        assert_eq!("bash".parse::<BuiltinLanguage>().unwrap(), BuiltinLanguage::Shell);
        assert!("cobol".parse::<BuiltinLanguage>().is_err());
    }
}
