//! TOML-based configuration system for Lingosync.
//!
//! All sensitive values (passwords, tokens) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::format::FormatRegistry;
use crate::vcs::VcsKind;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon / polling settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Synchronization behaviour.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Commit identity and message template.
    #[serde(default)]
    pub commit: CommitConfig,

    /// Tracked repositories.
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon / polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between scheduled synchronization rounds (default 300).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (database, working copies).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Optional log file written in addition to stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_poll_interval() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/lingosync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            log_file: None,
        }
    }
}

impl DaemonConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("lingosync.db")
    }

    pub fn working_copies_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// What happens to non-conflicting units when some units need review.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit everything except the conflicted units.
    #[default]
    Partial,
    /// Commit nothing while any unit needs review.
    AllOrNothing,
}

/// Synchronization behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fetch attempts before giving up with `VcsUnavailable`.
    #[serde(default = "default_fetch_attempts")]
    pub max_fetch_attempts: u32,

    /// First backoff delay; doubled after every failed attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// How often a cycle restarts from fetching after losing a push race.
    #[serde(default = "default_push_retries")]
    pub max_push_retries: u32,

    /// Maximum time a cycle may hold a repository lock.
    #[serde(default = "default_lock_max_hold")]
    pub lock_max_hold_secs: u64,

    /// Timeout for a single clone / fetch / push call.
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,

    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

fn default_fetch_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_push_retries() -> u32 {
    1
}
fn default_lock_max_hold() -> u64 {
    900
}
fn default_network_timeout() -> u64 {
    120
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_fetch_attempts: default_fetch_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_push_retries: default_push_retries(),
            lock_max_hold_secs: default_lock_max_hold(),
            network_timeout_secs: default_network_timeout(),
            commit_policy: CommitPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn lock_max_hold(&self) -> Duration {
        Duration::from_secs(self.lock_max_hold_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// Delay before fetch attempt `attempt` (1-based; the first has none).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

// ---------------------------------------------------------------------------
// Commit identity
// ---------------------------------------------------------------------------

/// Identity and message template used for every commit, on every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Placeholders: `{units}`, `{files}`, `{trigger}`, `{actor}`,
    /// `{authors}`, `{marker}`.
    #[serde(default = "default_message_template")]
    pub message_template: String,
}

fn default_author_name() -> String {
    "Lingosync".into()
}
fn default_author_email() -> String {
    "noreply@lingosync.local".into()
}
fn default_message_template() -> String {
    "Translated using Lingosync ({units} units)\n\nTrigger: {trigger}\nActor: {actor}\n{marker}".into()
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            message_template: default_message_template(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// One tracked repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Stable identity used for locking and persistence.
    pub id: String,

    /// Backend selecting the [`VcsBackend`](crate::vcs::VcsBackend) implementation.
    #[serde(default)]
    pub vcs: VcsKind,

    /// Clone / fetch URL.
    pub url: String,

    /// Push URL when it differs from `url`.
    #[serde(default)]
    pub push_url: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the password or access token.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Translation files tracked in this repository.
    #[serde(default)]
    pub files: Vec<TrackedFileConfig>,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_branch() -> String {
    "main".into()
}

impl RepositoryConfig {
    /// The tracked file at `path`, if any.
    pub fn tracked_file(&self, path: &str) -> Option<&TrackedFileConfig> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// A translation file inside a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedFileConfig {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,

    /// Name of a registered [`TranslationFormat`](crate::format::TranslationFormat).
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".into()
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(
            repositories = config.repositories.len(),
            "configuration parsed successfully"
        );
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Missing variables log a warning but do not fail; anonymous access is
    /// valid for public repositories.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        for repo in &mut self.repositories {
            if let Some(ref env_name) = repo.password_env {
                let field = format!("repositories.{}.password_env", repo.id);
                repo.password = resolve_optional_env(env_name, &field);
            }
        }
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self, formats: &FormatRegistry) -> Result<(), ConfigError> {
        if self.daemon.poll_interval_secs == 0 {
            return Err(invalid("daemon.poll_interval_secs", "poll interval must be > 0"));
        }
        if self.sync.max_fetch_attempts == 0 {
            return Err(invalid("sync.max_fetch_attempts", "must be >= 1"));
        }
        if self.sync.lock_max_hold_secs == 0 {
            return Err(invalid("sync.lock_max_hold_secs", "must be > 0"));
        }
        if self.sync.network_timeout_secs == 0 {
            return Err(invalid("sync.network_timeout_secs", "must be > 0"));
        }

        let mut ids = HashSet::new();
        for repo in &self.repositories {
            if repo.id.trim().is_empty() {
                return Err(invalid("repositories.id", "repository id must not be empty"));
            }
            if !ids.insert(repo.id.as_str()) {
                return Err(invalid(
                    "repositories.id",
                    &format!("duplicate repository id '{}'", repo.id),
                ));
            }
            if repo.url.is_empty() {
                return Err(invalid(
                    &format!("repositories.{}.url", repo.id),
                    "URL must not be empty",
                ));
            }
            if repo.branch.is_empty() {
                return Err(invalid(
                    &format!("repositories.{}.branch", repo.id),
                    "branch must not be empty",
                ));
            }
            let mut paths = HashSet::new();
            for file in &repo.files {
                let field = format!("repositories.{}.files", repo.id);
                if file.path.is_empty() || file.path.starts_with('/') || file.path.contains("..") {
                    return Err(invalid(
                        &field,
                        &format!("'{}' must be a relative path inside the repository", file.path),
                    ));
                }
                if !paths.insert(file.path.as_str()) {
                    return Err(invalid(&field, &format!("duplicate file '{}'", file.path)));
                }
                if !formats.contains(&file.format) {
                    return Err(invalid(
                        &field,
                        &format!("unknown format '{}' for '{}'", file.format, file.path),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(
        path: P,
        formats: &FormatRegistry,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate(formats)?;
        Ok(config)
    }

    pub fn repository(&self, id: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.id == id)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        detail: detail.to_string(),
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
