//! Configuration management for `roadsync`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`ROADSYNC_TOKEN`/`GITHUB_TOKEN`, `ROADSYNC_DB`)
//! 3. Project config (.roadsync/config.yaml)
//! 4. Defaults

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RoadsyncError};
use crate::model::Framework;
use crate::reconcile::OnRemoteDelete;

/// Default identity map filename inside `.roadsync/`.
const DEFAULT_DB_FILENAME: &str = "identity.db";
/// Project config filename inside `.roadsync/`.
const CONFIG_FILENAME: &str = "config.yaml";

/// One configured planning document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    /// Path relative to the project root (the `.roadsync` parent).
    pub path: PathBuf,
    pub framework: Framework,
}

/// Project configuration as stored in `.roadsync/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Tracker API base URL; omit for github.com.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Planning documents to sync.
    #[serde(default)]
    pub documents: Vec<DocumentSource>,
    /// Policy for mapped tasks whose remote issue was deleted.
    #[serde(default)]
    pub on_remote_delete: OnRemoteDelete,
}

impl ProjectConfig {
    /// Load the project config from a `.roadsync` directory.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the file is missing, or a YAML error if
    /// it cannot be parsed.
    pub fn load(roadsync_dir: &Path) -> Result<Self> {
        let path = roadsync_dir.join(CONFIG_FILENAME);
        if !path.exists() {
            return Err(RoadsyncError::NotInitialized);
        }
        let contents = fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        if config.owner.trim().is_empty() || config.repo.trim().is_empty() {
            return Err(RoadsyncError::Config(
                "config.yaml must set both owner and repo".to_string(),
            ));
        }
        Ok(config)
    }

    /// Write the config to a `.roadsync` directory.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or I/O failure.
    pub fn save(&self, roadsync_dir: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(roadsync_dir.join(CONFIG_FILENAME), yaml)?;
        Ok(())
    }

    /// Document sources resolved against the project root.
    #[must_use]
    pub fn resolved_sources(&self, roadsync_dir: &Path) -> Vec<(PathBuf, Framework)> {
        let root = project_root(roadsync_dir);
        self.documents
            .iter()
            .map(|d| (root.join(&d.path), d.framework))
            .collect()
    }
}

/// Infer the framework from a file name when not given explicitly.
///
/// # Errors
///
/// Returns a config error for file names with no known convention.
pub fn guess_framework(path: &Path) -> Result<Framework> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some("tasks.md") => Ok(Framework::Speckit),
        Some("ROADMAP.md") => Ok(Framework::Gsd),
        _ => Err(RoadsyncError::Config(format!(
            "cannot infer framework for '{}'; pass --framework",
            path.display()
        ))),
    }
}

/// The project root is the parent of the `.roadsync` directory.
#[must_use]
pub fn project_root(roadsync_dir: &Path) -> PathBuf {
    roadsync_dir
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Discover the active `.roadsync` directory.
///
/// Honors `ROADSYNC_DIR` when set, otherwise walks up from `start` (or CWD).
///
/// # Errors
///
/// Returns `NotInitialized` if no directory is found, or an error if the
/// CWD cannot be read.
pub fn discover_roadsync_dir(start: Option<&Path>) -> Result<PathBuf> {
    if let Ok(value) = env::var("ROADSYNC_DIR") {
        if !value.trim().is_empty() {
            let path = PathBuf::from(value);
            if path.is_dir() {
                return Ok(path);
            }
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(".roadsync");
        if candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            break;
        }
    }

    Err(RoadsyncError::NotInitialized)
}

/// Resolve the identity map path: CLI override, then `ROADSYNC_DB`, then
/// the default inside the `.roadsync` directory.
#[must_use]
pub fn resolve_db_path(roadsync_dir: &Path, db_override: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = db_override {
        return path.clone();
    }
    if let Ok(value) = env::var("ROADSYNC_DB") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    roadsync_dir.join(DEFAULT_DB_FILENAME)
}

/// Resolve the tracker token: CLI override, then `ROADSYNC_TOKEN`, then
/// `GITHUB_TOKEN`.
///
/// # Errors
///
/// Returns `MissingToken` when no source provides one.
pub fn resolve_token(token_override: Option<&str>) -> Result<String> {
    if let Some(token) = token_override {
        if !token.trim().is_empty() {
            return Ok(token.to_string());
        }
    }
    for var in ["ROADSYNC_TOKEN", "GITHUB_TOKEN"] {
        if let Ok(value) = env::var(var) {
            if !value.trim().is_empty() {
                return Ok(value);
            }
        }
    }
    Err(RoadsyncError::MissingToken)
}

/// Create a `.roadsync` directory with a starter config.
///
/// # Errors
///
/// Returns `AlreadyInitialized` when the directory exists, or an error on
/// filesystem failure.
pub fn init_project(root: &Path, config: &ProjectConfig) -> Result<PathBuf> {
    let roadsync_dir = root.join(".roadsync");
    if roadsync_dir.exists() {
        return Err(RoadsyncError::AlreadyInitialized { path: roadsync_dir });
    }
    fs::create_dir_all(&roadsync_dir)?;
    config.save(&roadsync_dir)?;
    Ok(roadsync_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ProjectConfig {
        ProjectConfig {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            api_base: None,
            documents: vec![DocumentSource {
                path: PathBuf::from("tasks.md"),
                framework: Framework::Speckit,
            }],
            on_remote_delete: OnRemoteDelete::MarkRemoved,
        }
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        config.save(dir.path()).unwrap();

        let loaded = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_without_config_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, RoadsyncError::NotInitialized));
    }

    #[test]
    fn load_rejects_blank_owner() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), "owner: ''\nrepo: widgets\n").unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, RoadsyncError::Config(_)));
    }

    #[test]
    fn discover_walks_up_from_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".roadsync")).unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let found = discover_roadsync_dir(Some(&nested)).unwrap();
        assert_eq!(found, dir.path().join(".roadsync"));
    }

    #[test]
    fn discover_fails_outside_a_project() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_roadsync_dir(Some(dir.path())).unwrap_err();
        assert!(matches!(err, RoadsyncError::NotInitialized));
    }

    #[test]
    fn db_path_override_precedence() {
        let roadsync_dir = PathBuf::from("/proj/.roadsync");
        let explicit = PathBuf::from("/tmp/custom.db");
        assert_eq!(
            resolve_db_path(&roadsync_dir, Some(&explicit)),
            explicit
        );
        assert_eq!(
            resolve_db_path(&roadsync_dir, None),
            roadsync_dir.join("identity.db")
        );
    }

    #[test]
    fn init_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        init_project(dir.path(), &config).unwrap();
        let err = init_project(dir.path(), &config).unwrap_err();
        assert!(matches!(err, RoadsyncError::AlreadyInitialized { .. }));
    }

    #[test]
    fn sources_resolve_against_project_root() {
        let config = sample_config();
        let sources = config.resolved_sources(Path::new("/proj/.roadsync"));
        assert_eq!(sources[0].0, PathBuf::from("/proj/tasks.md"));
    }
}
