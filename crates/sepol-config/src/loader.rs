//! Configuration loader with multi-source merging

use crate::{CompilerConfig, Paths, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "SECILC".to_string(),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "SECILC")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/secilc/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<CompilerConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = CompilerConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/secilc/config.toml)
        if self.user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    debug!(path = %user_config_file.display(), "loading user config");
                    builder = builder.add_source(
                        config::File::from(user_config_file)
                            .required(false)
                            .format(config::FileFormat::Toml),
                    );
                }
            }
        }

        // 3. Project config, then 4. local overrides
        for file in [
            Paths::project_config_file(&self.project_dir),
            Paths::local_config_file(&self.project_dir),
        ] {
            if file.exists() {
                debug!(path = %file.display(), "loading project config");
                builder = builder.add_source(
                    config::File::from(file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 5. Environment variables (SECILC_COMPILER__POLICY_VERSION=30)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut compiler_config: CompilerConfig = builder.build()?.try_deserialize()?;
        compiler_config.validate()?;
        compiler_config.resolve_paths(&self.project_dir);

        Ok(compiler_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigError;
    use sepol_cil::LogLevel;
    use sepol_types::{HandleUnknown, TargetPlatform};
    use std::fs;
    use tempfile::tempdir;

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir)
            .with_env_prefix("SECILC_LOADER_TEST")
            .without_user_config()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config.compiler.policy_version, 33);
        assert_eq!(config.compiler.target, TargetPlatform::SELinux);
        assert_eq!(config.output.policy_file, None);
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[compiler]
policy_version = 31
target = "xen"
handle_unknown = "allow"
multiple_decls = true

[output]
policy_file = "build/policy"

[log]
level = "warn"
"#;
        fs::write(project_dir.join("secilc.toml"), config_content).expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.compiler.policy_version, 31);
        assert_eq!(config.compiler.target, TargetPlatform::Xen);
        assert_eq!(config.compiler.handle_unknown, Some(HandleUnknown::Allow));
        assert!(config.compiler.multiple_decls);
        assert_eq!(config.log.level, LogLevel::Warn);
        assert_eq!(config.policy_file(), project_dir.join("build/policy"));
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("secilc.toml"),
            "[compiler]\npolicy_version = 30\nmls = false\n",
        )
        .expect("Failed to write project config");
        fs::write(
            project_dir.join("secilc.local.toml"),
            "[compiler]\nmls = true\n",
        )
        .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");

        // Local config wins per key; untouched keys keep the project value
        assert_eq!(config.compiler.mls, Some(true));
        assert_eq!(config.compiler.policy_version, 30);
    }

    #[test]
    fn test_invalid_version_is_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(project_dir.join("secilc.toml"), "[compiler]\npolicy_version = 12\n").unwrap();

        let err = loader(project_dir).load().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(project_dir.join("secilc.toml"), "[compiler\n").unwrap();

        let err = loader(project_dir).load().unwrap_err();
        assert!(matches!(err, ConfigError::MergeError(_)));
    }

    #[test]
    fn test_single_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("custom.toml");
        fs::write(&path, "[compiler]\nexpand_attributes = true\n").unwrap();

        let config = CompilerConfig::from_file(&path).unwrap();
        assert!(config.compiler.expand_attributes);

        let err = CompilerConfig::from_file(temp_dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
