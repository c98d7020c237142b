//! Configuration types for the csaf-mirror crate.
//!
//! This module provides the aggregator configuration loaded from a TOML file:
//! the root directories, the aggregator identity, and one entry per upstream
//! provider. Unknown keys are rejected at load time.

use crate::advisories::AgeAccept;
use crate::error::{MirrorError, Result};
use crate::models::AggregatorInfo;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Maximum number of workers used when auto-sizing the pool.
const DEFAULT_WORKERS: usize = 10;

/// Main configuration for the mirroring aggregator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of parallel provider workers. `0` (the default) auto-sizes to
    /// `min(cpu_count, provider_count, 10)`.
    #[serde(default)]
    pub workers: usize,
    /// Directory holding the real mirror snapshots.
    pub folder: PathBuf,
    /// Web root observed by the static file server; snapshots are published
    /// here as symlinks.
    pub web: PathBuf,
    /// Public base URL of this aggregator (e.g. `https://aggregator.example`).
    pub domain: String,
    /// Identity block written into the aggregator manifest.
    pub aggregator: AggregatorInfo,
    /// Upstream providers to mirror.
    pub providers: Vec<ProviderConfig>,
    /// Global category rules, used by providers without their own.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Path to the aggregator's ASCII-armored public OpenPGP key.
    #[serde(default)]
    pub openpgp_public_key: Option<PathBuf>,
    /// Path to the aggregator's ASCII-armored private OpenPGP key, used to
    /// sign advisories that arrive without an upstream signature.
    #[serde(default)]
    pub openpgp_private_key: Option<PathBuf>,
    /// Passphrase unlocking the private key.
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Remote validation service. When configured, every advisory is checked
    /// remotely in addition to the local schema validation.
    #[serde(default)]
    pub remote_validator: Option<RemoteValidatorConfig>,
    /// Write logs to daily files in `log_dir` instead of stdout.
    #[serde(default)]
    pub log_to_file: bool,
    /// Directory for log files when `log_to_file` is enabled.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Configuration of a single upstream provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Stable identifier of the provider; also the published directory name.
    pub name: String,
    /// Upstream domain, or a full URL to probe instead.
    pub domain: String,
    /// Per-provider category rules, overriding the global ones. A rule is
    /// either a literal or an `expr:`-prefixed path expression evaluated
    /// against each advisory.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Regular expressions matched against advisory URLs; matches are not
    /// mirrored.
    #[serde(default)]
    pub ignore_patterns: Option<Vec<String>>,
    /// Only accept advisories released within the last N days.
    #[serde(default)]
    pub age_accept: Option<u32>,
}

/// Configuration of the remote validation service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteValidatorConfig {
    /// Base URL of the validation service.
    pub url: String,
    /// Test presets requested from the service.
    #[serde(default = "default_presets")]
    pub presets: Vec<String>,
}

fn default_presets() -> Vec<String> {
    vec!["mandatory".to_string()]
}

impl ProviderConfig {
    /// Build the age acceptance predicate, or `None` to accept everything.
    pub fn age_accept(&self) -> Option<AgeAccept> {
        let days = self.age_accept?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        Some(Box::new(move |t| t >= cutoff))
    }

    /// Compile the ignore patterns. Validity was checked at config load.
    pub fn ignore_regexes(&self) -> Result<Vec<Regex>> {
        self.ignore_patterns
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    MirrorError::config(format!("invalid ignore pattern '{p}': {e}"))
                })
            })
            .collect()
    }

    /// Category rules effective for this provider.
    pub fn effective_categories<'a>(&'a self, config: &'a Config) -> &'a [String] {
        self.categories
            .as_deref()
            .or(config.categories.as_deref())
            .unwrap_or_default()
    }
}

impl Config {
    /// Load and validate the configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| MirrorError::config(format!("cannot parse configuration: {e}")))?;
        config.set_defaults();
        config.check()?;
        Ok(config)
    }

    /// Fill in defaults that depend on the rest of the configuration.
    pub fn set_defaults(&mut self) {
        if self.workers == 0 {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            self.workers = cpus.min(self.providers.len()).min(DEFAULT_WORKERS).max(1);
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `MirrorError::Config` on an empty provider list, a provider
    /// without name or domain, a duplicated provider name, an invalid
    /// aggregator identity, or an ignore pattern that does not compile.
    pub fn check(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(MirrorError::config("no providers given in configuration"));
        }
        if self.domain.is_empty() {
            return Err(MirrorError::config("no domain given in configuration"));
        }

        self.aggregator.validate()?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(MirrorError::config("no name given for provider"));
            }
            if provider.domain.is_empty() {
                return Err(MirrorError::config(format!(
                    "no domain given for provider '{}'",
                    provider.name
                )));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(MirrorError::config(format!(
                    "provider '{}' is configured more than once",
                    provider.name
                )));
            }
            provider.ignore_regexes()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
            folder = "/var/lib/mirror"
            web = "/var/www"
            domain = "https://aggregator.example"

            [aggregator]
            category = "aggregator"
            name = "Example Aggregator"
            contact_details = "security@example.com"
            issuing_authority = "Example"
            namespace = "https://aggregator.example"

            [[providers]]
            name = "acme"
            domain = "acme.example"

            [[providers]]
            name = "umbrella"
            domain = "umbrella.example"
            age_accept = 90
            ignore_patterns = [".*preview.*"]
        "#
        .to_string()
    }

    fn parse(toml_str: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(toml_str)
            .map_err(|e| MirrorError::config(format!("cannot parse configuration: {e}")))?;
        config.set_defaults();
        config.check()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config() {
        let config = parse(&minimal_toml()).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert!(config.workers >= 1 && config.workers <= 2);
        assert_eq!(config.providers[1].age_accept, Some(90));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let toml_str = minimal_toml().replace("umbrella", "acme");
        let err = parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let toml_str = format!("{}\nsurprise = true\n", minimal_toml());
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn test_no_providers_rejected() {
        let toml_str = r#"
            folder = "/var/lib/mirror"
            web = "/var/www"
            domain = "https://aggregator.example"
            providers = []

            [aggregator]
            category = "aggregator"
            name = "Example Aggregator"
            namespace = "https://aggregator.example"
        "#;
        let err = parse(toml_str).unwrap_err();
        assert!(err.to_string().contains("no providers"));
    }

    #[test]
    fn test_bad_ignore_pattern_rejected() {
        let toml_str = minimal_toml().replace(".*preview.*", "*[");
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn test_age_accept_predicate() {
        let config = parse(&minimal_toml()).unwrap();

        let accept_all = config.providers[0].age_accept();
        assert!(accept_all.is_none());

        let accept_recent = config.providers[1].age_accept().unwrap();
        assert!(accept_recent(Utc::now()));
        assert!(!accept_recent(Utc::now() - chrono::Duration::days(365)));
    }

    #[test]
    fn test_explicit_workers_kept() {
        let toml_str = format!("workers = 3\n{}", minimal_toml());
        let config = parse(&toml_str).unwrap();
        assert_eq!(config.workers, 3);
    }
}
