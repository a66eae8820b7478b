//! Configuration management for secilc
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence)
//! 2. Environment variables (SECILC_* prefix, `__` between section and key)
//! 3. secilc.local.toml (local overrides)
//! 4. secilc.toml (project config)
//! 5. ~/.config/secilc/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use sepol_cil::{CompilerOptions, LogLevel};
use sepol_types::{HandleUnknown, PolicyVersion, TargetPlatform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use paths::{LOCAL_CONFIG, PROJECT_CONFIG, Paths};

/// Main secilc configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub compiler: CompilerSection,
    pub output: OutputConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSection {
    pub policy_version: u32,
    pub target: TargetPlatform,
    /// Unset means the policy's own `mls` statement decides.
    pub mls: Option<bool>,
    /// Unset means the policy's own `handleunknown` statement decides.
    pub handle_unknown: Option<HandleUnknown>,
    pub qualified_names: bool,
    pub disable_neverallow: bool,
    pub multiple_decls: bool,
    pub expand_attributes: bool,
}

impl Default for CompilerSection {
    fn default() -> Self {
        Self {
            policy_version: PolicyVersion::MAX,
            target: TargetPlatform::SELinux,
            mls: None,
            handle_unknown: None,
            qualified_names: false,
            disable_neverallow: false,
            multiple_decls: false,
            expand_attributes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Binary policy path; `policy.<version>` when unset.
    pub policy_file: Option<PathBuf>,
    pub file_contexts: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            policy_file: None,
            file_contexts: PathBuf::from("file_contexts"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}

impl CompilerConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Read a single TOML file, without layering.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let version = PolicyVersion::new(self.compiler.policy_version);
        if !version.is_writable() {
            return Err(ConfigError::ValidationError(format!(
                "policy_version must be between {} and {}, got {}",
                PolicyVersion::MIN_WRITABLE,
                PolicyVersion::MAX,
                self.compiler.policy_version
            )));
        }
        Ok(())
    }

    /// Output path of the binary policy.
    pub fn policy_file(&self) -> PathBuf {
        self.output
            .policy_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("policy.{}", self.compiler.policy_version)))
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        let c = &self.compiler;
        CompilerOptions {
            policy_version: PolicyVersion::new(c.policy_version),
            target: c.target,
            mls: c.mls,
            handle_unknown: c.handle_unknown,
            qualified_names: c.qualified_names,
            disable_neverallow: c.disable_neverallow,
            multiple_decls: c.multiple_decls,
            expand_attributes: c.expand_attributes,
        }
    }

    /// Resolve relative output paths against `base_dir`
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if let Some(policy_file) = &mut self.output.policy_file {
            if policy_file.is_relative() {
                *policy_file = base.join(&*policy_file);
            }
        }

        if self.output.file_contexts.is_relative() {
            self.output.file_contexts = base.join(&self.output.file_contexts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert_eq!(config.compiler.policy_version, 33);
        assert_eq!(config.compiler.target, TargetPlatform::SELinux);
        assert_eq!(config.compiler.mls, None);
        assert_eq!(config.log.level, LogLevel::Error);
        assert_eq!(config.policy_file(), PathBuf::from("policy.33"));
        config.validate().unwrap();
    }

    #[test]
    fn test_compiler_options() {
        let mut config = CompilerConfig::default();
        config.compiler.policy_version = 30;
        config.compiler.handle_unknown = Some(HandleUnknown::Reject);
        config.compiler.disable_neverallow = true;

        let options = config.compiler_options();
        assert_eq!(options.policy_version, PolicyVersion::new(30));
        assert_eq!(options.handle_unknown, Some(HandleUnknown::Reject));
        assert!(options.disable_neverallow);
        assert!(!options.multiple_decls);
    }

    #[test]
    fn test_version_out_of_range() {
        let mut config = CompilerConfig::default();
        config.compiler.policy_version = 23;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("between 24 and 33"));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = CompilerConfig::default();
        config.compiler.mls = Some(true);
        config.output.policy_file = Some(PathBuf::from("out/policy.bin"));
        let text = config.to_toml().unwrap();
        assert!(text.contains("[compiler]"));
        let parsed: CompilerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_path_resolution() {
        let mut config = CompilerConfig::default();
        config.output.policy_file = Some(PathBuf::from("policy.bin"));
        config.resolve_paths("/home/user/policy");

        assert_eq!(
            config.output.policy_file,
            Some(PathBuf::from("/home/user/policy/policy.bin"))
        );
        assert_eq!(
            config.output.file_contexts,
            PathBuf::from("/home/user/policy/file_contexts")
        );
    }
}
