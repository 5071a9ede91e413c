//! Reconciliation engine configuration model and defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

use crate::model::{ProviderKind, RunOptions, SelectionPolicy};

/// Root configuration read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Catalog store location.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Run selection and scheduling knobs.
    #[serde(default)]
    pub run: RunConfig,
    /// Candidate scoring tiers and acceptance thresholds. Empirically
    /// chosen values; tune against a labeled matching dataset before
    /// trusting them further.
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Per-provider credentials and pacing intervals.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    /// SQLite database path; empty selects the per-user data directory.
    #[serde(default)]
    pub db_path: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RunConfig {
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
    /// Staleness/recency window in days for the `Recent`/`Stale` policies.
    #[serde(default = "default_staleness_days")]
    pub staleness_days: u32,
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,
    /// Provider config names excluded from the run.
    #[serde(default)]
    pub disabled_providers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MatchingConfig {
    /// A candidate is usable when its combined score exceeds this.
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: i32,
    /// Search stops trying further strategies at or above this.
    #[serde(default = "default_early_stop_threshold")]
    pub early_stop_threshold: i32,
    #[serde(default = "default_title_weight")]
    pub title_weight: u32,
    #[serde(default = "default_artist_weight")]
    pub artist_weight: u32,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub musicbrainz: MusicBrainzConfig,
    #[serde(default)]
    pub theaudiodb: TheAudioDbConfig,
    #[serde(default)]
    pub discogs: DiscogsConfig,
    #[serde(default)]
    pub lastfm: LastFmConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MusicBrainzConfig {
    /// MusicBrainz asks for at most one request per second per client.
    #[serde(default = "default_musicbrainz_interval_ms")]
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TheAudioDbConfig {
    /// Shared test key; a personal key lifts the rate limits.
    #[serde(default = "default_theaudiodb_api_key")]
    pub api_key: String,
    #[serde(default = "default_theaudiodb_interval_ms")]
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DiscogsConfig {
    /// Personal access token; the adapter reports itself disabled when
    /// this is empty.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_discogs_interval_ms")]
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LastFmConfig {
    /// API key; the adapter reports itself disabled when this is empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_lastfm_interval_ms")]
    pub min_interval_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    /// Loads configuration from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolves the database path, falling back to the per-user data dir.
    pub fn db_path(&self) -> PathBuf {
        if !self.storage.db_path.trim().is_empty() {
            return PathBuf::from(self.storage.db_path.trim());
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("melodex")
            .join("catalog.db")
    }

    /// Builds run options from the `[run]` table, dropping unrecognized
    /// disabled-provider names with a warning.
    pub fn run_options(&self) -> RunOptions {
        let mut disabled = HashSet::new();
        for name in &self.run.disabled_providers {
            match ProviderKind::from_config_name(name) {
                Some(kind) => {
                    disabled.insert(kind);
                }
                None => warn!("Ignoring unknown provider name in config: {name}"),
            }
        }
        RunOptions {
            policy: self.run.selection_policy,
            staleness_days: self.run.staleness_days,
            disabled_providers: disabled,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            selection_policy: SelectionPolicy::MissingOnly,
            staleness_days: default_staleness_days(),
            worker_count: default_worker_count(),
            disabled_providers: Vec::new(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            accept_threshold: default_accept_threshold(),
            early_stop_threshold: default_early_stop_threshold(),
            title_weight: default_title_weight(),
            artist_weight: default_artist_weight(),
        }
    }
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_musicbrainz_interval_ms(),
        }
    }
}

impl Default for TheAudioDbConfig {
    fn default() -> Self {
        Self {
            api_key: default_theaudiodb_api_key(),
            min_interval_ms: default_theaudiodb_interval_ms(),
        }
    }
}

impl Default for DiscogsConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            min_interval_ms: default_discogs_interval_ms(),
        }
    }
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            min_interval_ms: default_lastfm_interval_ms(),
        }
    }
}

fn default_staleness_days() -> u32 {
    30
}

fn default_worker_count() -> u32 {
    4
}

fn default_accept_threshold() -> i32 {
    60
}

fn default_early_stop_threshold() -> i32 {
    85
}

fn default_title_weight() -> u32 {
    6
}

fn default_artist_weight() -> u32 {
    4
}

fn default_musicbrainz_interval_ms() -> u64 {
    1_100
}

fn default_theaudiodb_api_key() -> String {
    "2".to_string()
}

fn default_theaudiodb_interval_ms() -> u64 {
    1_000
}

fn default_discogs_interval_ms() -> u64 {
    1_000
}

fn default_lastfm_interval_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::model::{ProviderKind, SelectionPolicy};

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.run.selection_policy, SelectionPolicy::MissingOnly);
        assert_eq!(config.run.staleness_days, 30);
        assert_eq!(config.run.worker_count, 4);
        assert!(config.run.disabled_providers.is_empty());
        assert_eq!(config.matching.accept_threshold, 60);
        assert_eq!(config.matching.early_stop_threshold, 85);
        assert_eq!(config.matching.title_weight, 6);
        assert_eq!(config.matching.artist_weight, 4);
        assert_eq!(config.providers.musicbrainz.min_interval_ms, 1_100);
        assert_eq!(config.providers.theaudiodb.api_key, "2");
        assert!(config.providers.discogs.token.is_empty());
        assert!(config.providers.lastfm.api_key.is_empty());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[run]
selection_policy = "stale"
staleness_days = 7

[providers.discogs]
token = "abc123"
"#,
        )
        .expect("config should parse");
        assert_eq!(parsed.run.selection_policy, SelectionPolicy::Stale);
        assert_eq!(parsed.run.staleness_days, 7);
        assert_eq!(parsed.run.worker_count, 4);
        assert_eq!(parsed.providers.discogs.token, "abc123");
        assert_eq!(parsed.providers.discogs.min_interval_ms, 1_000);
        assert_eq!(parsed.matching.early_stop_threshold, 85);
    }

    #[test]
    fn test_run_options_parses_disabled_provider_names() {
        let parsed: Config = toml::from_str(
            r#"
[run]
disabled_providers = ["lastfm", "RYM", "not_a_provider"]
"#,
        )
        .expect("config should parse");
        let options = parsed.run_options();
        assert!(options.disabled_providers.contains(&ProviderKind::LastFm));
        assert!(options.disabled_providers.contains(&ProviderKind::Rym));
        assert_eq!(options.disabled_providers.len(), 2);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).expect("default config should serialize");
        let parsed: Config = toml::from_str(&serialized).expect("round trip should parse");
        assert_eq!(parsed, config);
    }
}
