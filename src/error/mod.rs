//! Error types and handling for `roadsync`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration for wrapped one-off errors
//! - Provides recovery hints for user-facing errors
//! - Provides structured JSON output for scripted callers

use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `roadsync` operations.
#[derive(Error, Debug)]
pub enum RoadsyncError {
    // === Document Errors ===
    /// A recognized checklist line could not be parsed.
    #[error("Parse error in '{path}' line {line}: {reason}", path = .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A required document section is missing.
    #[error("Missing required section in '{path}': {section}", path = .path.display())]
    MissingSection { path: PathBuf, section: String },

    /// Two tasks or phases in one document share an anchor.
    #[error("Duplicate anchor '{anchor}' in '{path}'", path = .path.display())]
    DuplicateAnchor { path: PathBuf, anchor: String },

    /// Localized rewrite failed (anchor line drifted or write error).
    #[error("Rewrite failed for '{path}': {reason}", path = .path.display())]
    Rewrite { path: PathBuf, reason: String },

    // === Identity Map Errors ===
    /// Binding would violate the local↔remote bijection.
    #[error("Mapping conflict: '{local_id}' / remote #{remote_id} already bound elsewhere")]
    MappingConflict { local_id: String, remote_id: u64 },

    /// No mapping found for the given local id.
    #[error("No mapping for local id '{local_id}'")]
    MappingNotFound { local_id: String },

    /// Identity store is locked by another sync cycle.
    #[error("Identity store is locked: {path}", path = .path.display())]
    StoreLocked { path: PathBuf },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Remote Errors ===
    /// Transient remote failure (rate limit, timeout, 5xx); retried per policy.
    #[error("Remote transient error (HTTP {status}): {message}")]
    RemoteTransient { status: u16, message: String },

    /// Fatal remote failure (auth/permission); aborts remaining remote calls.
    #[error("Remote fatal error (HTTP {status}): {message}")]
    RemoteFatal { status: u16, message: String },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace not initialized.
    #[error("Workspace not initialized: run 'rsy init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'", path = .path.display())]
    AlreadyInitialized { path: PathBuf },

    /// No API token available for remote access.
    #[error("No API token: set ROADSYNC_TOKEN or GITHUB_TOKEN")]
    MissingToken,

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error for one-off failures.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RoadsyncError {
    /// Stable machine-readable code for scripted callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "PARSE_ERROR",
            Self::MissingSection { .. } => "MISSING_SECTION",
            Self::DuplicateAnchor { .. } => "DUPLICATE_ANCHOR",
            Self::Rewrite { .. } => "REWRITE_ERROR",
            Self::MappingConflict { .. } => "MAPPING_CONFLICT",
            Self::MappingNotFound { .. } => "MAPPING_NOT_FOUND",
            Self::StoreLocked { .. } => "STORE_LOCKED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::RemoteTransient { .. } => "REMOTE_TRANSIENT",
            Self::RemoteFatal { .. } => "REMOTE_FATAL",
            Self::Config(_) => "CONFIG_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized { .. } => "ALREADY_INITIALIZED",
            Self::MissingToken => "MISSING_TOKEN",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Would a retry of the same operation plausibly succeed?
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteTransient { .. } | Self::StoreLocked { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: rsy init --owner <owner> --repo <repo>"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::MissingToken => Some("Export GITHUB_TOKEN with repo scope"),
            Self::StoreLocked { .. } => Some("Another sync cycle is running; wait and retry"),
            Self::MappingConflict { .. } => {
                Some("Inspect existing bindings with 'rsy status' before re-running")
            }
            Self::Rewrite { .. } => {
                Some("The document changed during sync; re-run to pick up the new content")
            }
            Self::RemoteFatal { .. } => Some("Check token scopes and repository permissions"),
            _ => None,
        }
    }

    /// Exit code for this error when it terminates the process.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Parse { .. } | Self::MissingSection { .. } | Self::DuplicateAnchor { .. } => 2,
            Self::RemoteFatal { .. } | Self::MissingToken => 3,
            _ => 1,
        }
    }

    /// Structured JSON rendering for `--json` and non-TTY output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "transient": self.is_transient(),
                "hint": self.suggestion(),
            }
        })
    }
}

/// Result type using `RoadsyncError`.
pub type Result<T> = std::result::Result<T, RoadsyncError>;
