//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Project config file name.
pub const PROJECT_CONFIG: &str = "secilc.toml";
/// Local override file name, meant to stay out of version control.
pub const LOCAL_CONFIG: &str = "secilc.local.toml";

/// XDG-compliant paths for secilc
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("org", "selinux", "secilc"),
        }
    }

    /// Get user config directory (~/.config/secilc/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// Get user config file path (~/.config/secilc/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get project config file path (secilc.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_CONFIG)
    }

    /// Get local config file path (secilc.local.toml)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(LOCAL_CONFIG)
    }

    /// Every config file that exists, lowest precedence first.
    pub fn existing_config_files(&self, project_dir: impl AsRef<Path>) -> Vec<PathBuf> {
        let project_dir = project_dir.as_ref();
        self.user_config_file()
            .into_iter()
            .chain([
                Self::project_config_file(project_dir),
                Self::local_config_file(project_dir),
            ])
            .filter(|path| path.is_file())
            .collect()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_xdg_paths() {
        let paths = Paths::new();

        // Platform dependent, but never a panic
        if let Ok(config_file) = paths.user_config_file() {
            assert!(config_file.to_string_lossy().contains("secilc"));
            assert!(config_file.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_project_paths() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_file = Paths::project_config_file(project_dir);
        assert_eq!(config_file, project_dir.join("secilc.toml"));

        let local_file = Paths::local_config_file(project_dir);
        assert_eq!(local_file, project_dir.join("secilc.local.toml"));
    }

    #[test]
    fn test_existing_files_in_precedence_order() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        let paths = Paths::new();
        let user_files = paths.existing_config_files(project_dir).len();

        std::fs::write(project_dir.join(LOCAL_CONFIG), "").unwrap();
        std::fs::write(project_dir.join(PROJECT_CONFIG), "").unwrap();

        let files = paths.existing_config_files(project_dir);
        assert_eq!(files.len(), user_files + 2);
        assert_eq!(files[user_files], project_dir.join(PROJECT_CONFIG));
        assert_eq!(files[user_files + 1], project_dir.join(LOCAL_CONFIG));
    }
}
