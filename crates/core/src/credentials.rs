//! Credentials for authenticated VCS access.

use std::collections::HashMap;

use crate::config::AppConfig;

/// Username / secret pair handed to a VCS backend.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub secret: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<String>, secret: Option<String>) -> Self {
        Self { username, secret }
    }

    /// Neither a username nor a secret is configured.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.secret.is_none()
    }

    /// Username to present alongside a bare token.
    pub fn username_or(&self, fallback: &str) -> String {
        self.username.clone().unwrap_or_else(|| fallback.to_string())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Source of credentials, looked up per repository.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, repository_id: &str) -> Credentials;
}

/// Credentials taken from the configuration, with secrets resolved from the
/// environment by [`AppConfig::resolve_env_vars`].
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentials {
    by_repository: HashMap<String, Credentials>,
}

impl ConfigCredentials {
    pub fn from_config(config: &AppConfig) -> Self {
        let by_repository = config
            .repositories
            .iter()
            .map(|r| {
                (
                    r.id.clone(),
                    Credentials::new(r.username.clone(), r.password.clone()),
                )
            })
            .collect();
        Self { by_repository }
    }
}

impl CredentialProvider for ConfigCredentials {
    fn credentials(&self, repository_id: &str) -> Credentials {
        self.by_repository
            .get(repository_id)
            .cloned()
            .unwrap_or_default()
    }
}
