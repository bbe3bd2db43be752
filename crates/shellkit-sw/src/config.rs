//! Worker configuration

use serde::{Deserialize, Serialize};
use shellkit_net::{ExclusionSet, LoaderConfig};
use std::path::Path;
use url::Url;

use crate::error::ServiceWorkerError;

/// When a freshly installed version takes over from the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPolicy {
    /// Skip waiting as soon as install completes.
    OnInstall,
    /// Wait for pages to close or for an explicit `SKIP_WAITING` message.
    #[default]
    OnRequest,
}

/// Which caches activation removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupScope {
    /// Every cache except the current one.
    #[default]
    AllOthers,
    /// Only stale caches whose name starts with our prefix.
    SamePrefix,
}

/// Fallback text for push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "CR Attendance".to_string(),
            body: "New notification".to_string(),
            icon: "./manifest.json".to_string(),
            badge: "./manifest.json".to_string(),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Scope URL; relative shell URLs resolve against it.
    pub scope: String,

    /// Prefix of every cache name this app creates.
    pub cache_prefix: String,

    /// Cache version. Bumping it invalidates the previous shell.
    pub version: String,

    /// App shell URLs cached at install.
    pub shell: Vec<String>,

    /// Document served to navigations when both cache and network miss.
    pub navigation_fallback: String,

    /// Hostname substrings that are never intercepted.
    pub excluded_hosts: Vec<String>,

    /// Version takeover policy.
    pub activation: ActivationPolicy,

    /// Stale cache removal at activate.
    pub cleanup: CleanupScope,

    /// Background sync tag that wakes pages.
    pub sync_tag: String,

    /// Push notification fallbacks.
    pub notification: NotificationDefaults,

    /// HTTP client settings for hosts that use `HttpNetwork`.
    pub network: LoaderConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scope: "http://localhost:8080/".to_string(),
            cache_prefix: "cr-attendance-".to_string(),
            version: "v5".to_string(),
            shell: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "./manifest.json".to_string(),
                "./icon.svg".to_string(),
                "./service-worker.js".to_string(),
            ],
            navigation_fallback: "./index.html".to_string(),
            excluded_hosts: vec![
                "script.google.com".to_string(),
                "googleapis.com".to_string(),
                "accounts.google.com".to_string(),
            ],
            activation: ActivationPolicy::default(),
            cleanup: CleanupScope::default(),
            sync_tag: "sync-attendance".to_string(),
            notification: NotificationDefaults::default(),
            network: LoaderConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(raw: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Name of the current cache.
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.cache_prefix, self.version)
    }

    /// Parsed scope URL.
    pub fn scope_url(&self) -> Result<Url, ServiceWorkerError> {
        let scope = Url::parse(&self.scope)?;
        if scope.cannot_be_a_base() {
            return Err(ServiceWorkerError::config(format!(
                "scope {} cannot be a base URL",
                self.scope
            )));
        }
        Ok(scope)
    }

    /// Resolve a possibly relative URL against the scope.
    pub fn resolve(&self, url: &str) -> Result<Url, ServiceWorkerError> {
        Ok(self.scope_url()?.join(url)?)
    }

    /// The shell manifest as absolute URLs, duplicates removed, order kept.
    pub fn shell_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        let mut urls: Vec<Url> = Vec::with_capacity(self.shell.len());
        for raw in &self.shell {
            let url = self.resolve(raw)?;
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    /// The navigation fallback as an absolute URL.
    pub fn fallback_url(&self) -> Result<Url, ServiceWorkerError> {
        self.resolve(&self.navigation_fallback)
    }

    /// The exclusion set built from `excluded_hosts`.
    pub fn exclusions(&self) -> ExclusionSet {
        ExclusionSet::from_substrings(&self.excluded_hosts)
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::config("version must not be empty"));
        }
        if self.sync_tag.trim().is_empty() {
            return Err(ServiceWorkerError::config("sync_tag must not be empty"));
        }
        self.shell_urls()?;
        self.fallback_url()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache_name(), "cr-attendance-v5");
        assert_eq!(config.activation, ActivationPolicy::OnRequest);
        assert_eq!(config.shell_urls().unwrap().len(), 5);
    }

    #[test]
    fn test_resolve_relative_and_root_urls() {
        let config = WorkerConfig {
            scope: "https://school.example.org/attendance/".to_string(),
            shell: vec!["/".into(), "./index.html".into(), "./".into()],
            ..Default::default()
        };
        let urls: Vec<String> = config
            .shell_urls()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://school.example.org/",
                "https://school.example.org/attendance/index.html",
                "https://school.example.org/attendance/",
            ]
        );
        assert_eq!(
            config.fallback_url().unwrap().as_str(),
            "https://school.example.org/attendance/index.html"
        );
    }

    #[test]
    fn test_shell_urls_deduplicate() {
        let config = WorkerConfig {
            shell: vec!["./index.html".into(), "index.html".into()],
            ..Default::default()
        };
        assert_eq!(config.shell_urls().unwrap().len(), 1);
    }

    #[test]
    fn test_from_json_uses_defaults_for_missing_fields() {
        let config = WorkerConfig::from_json_str(
            r#"{ "version": "v6", "activation": "on_install", "cleanup": "same_prefix" }"#,
        )
        .unwrap();
        assert_eq!(config.cache_name(), "cr-attendance-v6");
        assert_eq!(config.activation, ActivationPolicy::OnInstall);
        assert_eq!(config.cleanup, CleanupScope::SamePrefix);
        assert_eq!(config.sync_tag, "sync-attendance");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(WorkerConfig::from_json_str(r#"{ "version": "  " }"#).is_err());
        assert!(WorkerConfig::from_json_str(r#"{ "scope": "not a url" }"#).is_err());
        assert!(WorkerConfig::from_json_str(r#"{ "scope": "mailto:cr@example.org" }"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{ "excluded_hosts": ["api.example.org"] }"#).unwrap();

        let config = WorkerConfig::from_file(&path).unwrap();
        let exclusions = config.exclusions();
        assert_eq!(exclusions.len(), 1);
        assert!(exclusions.is_excluded(&Url::parse("https://api.example.org/v1").unwrap()));
    }

    #[test]
    fn test_from_missing_file() {
        let err = WorkerConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Io(_)));
    }
}
