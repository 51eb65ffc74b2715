//! Configuration types.
//!
//! Loaded from a JSON file (`FOLKLORE_CONFIG`, default `./config.json`),
//! then overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::archive::LeiConfig;
use crate::error::ConfigError;
use crate::tracker::classifier::DEFAULT_MERGE_URL_PATTERN;
use crate::tracker::lifecycle::DEFAULT_CAPACITY;
use crate::tracker::router::Subscription;

const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// One mailing-list scope polled as a subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubsystemConfig {
    /// Routing tag, e.g. `linux-cxl`.
    pub name: String,
    /// Archive search expression, e.g. `l:linux-cxl.vger.kernel.org`.
    pub query: String,
}

/// Tracker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_secs: u64,
    /// Window queried on every poll.
    pub lookback_hours: u64,
    /// Window searched when a reaction asks for a re-check.
    pub reconcile_lookback_days: u64,
    /// Maximum tracked pull requests.
    pub retention_cap: usize,
    pub merge_bot_address: String,
    /// Regex with the commit hash in capture group 1.
    pub merge_url_pattern: String,
    pub archive_base_url: String,
    pub lei_path: PathBuf,
    pub db_path: PathBuf,
    pub http_port: u16,
    pub legacy_state_dir: Option<PathBuf>,
    pub subsystems: Vec<SubsystemConfig>,
    pub github_projects: Vec<String>,
    pub subscriptions: Vec<Subscription>,
    #[serde(deserialize_with = "deserialize_secret")]
    pub discord_token: Option<SecretString>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.trim().is_empty())
        .map(SecretString::from))
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30 * 60,
            lookback_hours: 48,
            reconcile_lookback_days: 90,
            retention_cap: DEFAULT_CAPACITY,
            merge_bot_address: "pr-tracker-bot@kernel.org".to_string(),
            merge_url_pattern: DEFAULT_MERGE_URL_PATTERN.to_string(),
            archive_base_url: "https://lore.kernel.org/all".to_string(),
            lei_path: PathBuf::from("lei"),
            db_path: PathBuf::from("./data/folklore.db"),
            http_port: 8080,
            legacy_state_dir: None,
            subsystems: Vec::new(),
            github_projects: Vec::new(),
            subscriptions: Vec::new(),
            discord_token: None,
        }
    }
}

impl TrackerConfig {
    /// Load from the config file and environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("FOLKLORE_CONFIG").ok();
        let path = PathBuf::from(explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() || explicit.is_some() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `FOLKLORE_*` and `DISCORD_TOKEN` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FOLKLORE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(v) = lookup("FOLKLORE_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "FOLKLORE_POLL_INTERVAL_SECS".into(),
                message: format!("'{v}' is not a number of seconds"),
            })?;
        }
        if let Some(v) = lookup("FOLKLORE_HTTP_PORT") {
            self.http_port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "FOLKLORE_HTTP_PORT".into(),
                message: format!("'{v}' is not a port"),
            })?;
        }
        if let Some(token) = lookup("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.discord_token = Some(SecretString::from(token));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscriptions.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "subscriptions".into(),
                hint: "Add at least one {guild_id, channel_id, subsystems} entry.".into(),
            });
        }
        for (i, scope) in self.subsystems.iter().enumerate() {
            if scope.name.trim().is_empty() || scope.query.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("subsystems[{i}]"),
                    message: "name and query must be non-empty".into(),
                });
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_secs".into(),
                message: "must be positive".into(),
            });
        }
        if self.retention_cap == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retention_cap".into(),
                message: "must be positive".into(),
            });
        }
        self.merge_url_regex()?;
        Ok(())
    }

    /// Compiled merge-commit URL pattern.
    pub fn merge_url_regex(&self) -> Result<Regex, ConfigError> {
        let re = Regex::new(&self.merge_url_pattern).map_err(|e| ConfigError::InvalidValue {
            key: "merge_url_pattern".into(),
            message: e.to_string(),
        })?;
        if re.captures_len() < 2 {
            return Err(ConfigError::InvalidValue {
                key: "merge_url_pattern".into(),
                message: "needs a capture group for the commit hash".into(),
            });
        }
        Ok(re)
    }

    pub fn require_discord_token(&self) -> Result<SecretString, ConfigError> {
        self.discord_token
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("DISCORD_TOKEN".into()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_hours * 3600)
    }

    pub fn reconcile_lookback(&self) -> Duration {
        Duration::from_secs(self.reconcile_lookback_days * 24 * 3600)
    }

    pub fn lei_config(&self) -> LeiConfig {
        LeiConfig {
            lei_path: self.lei_path.clone(),
            inbox_url: self.archive_base_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;
    use crate::tracker::model::ChannelId;

    const SAMPLE: &str = r#"{
        "poll_interval_secs": 600,
        "subsystems": [
            {"name": "linux-cxl", "query": "l:linux-cxl.vger.kernel.org"},
            {"name": "linux-pci", "query": "l:linux-pci.vger.kernel.org"}
        ],
        "github_projects": ["zephyr"],
        "subscriptions": [
            {"guild_id": 1, "channel_id": 1311000000000000001, "subsystems": ["*"]},
            {"guild_id": 1, "channel_id": 1311000000000000002, "subsystems": ["linux-cxl"]}
        ]
    }"#;

    #[test]
    fn defaults() {
        let c = TrackerConfig::default();
        assert_eq!(c.poll_interval(), Duration::from_secs(1800));
        assert_eq!(c.lookback(), Duration::from_secs(48 * 3600));
        assert_eq!(c.reconcile_lookback(), Duration::from_secs(90 * 86400));
        assert_eq!(c.retention_cap, 1000);
        assert_eq!(c.merge_bot_address, "pr-tracker-bot@kernel.org");
        assert!(c.discord_token.is_none());
    }

    #[test]
    fn parses_sample_and_fills_defaults() {
        let c = TrackerConfig::from_json(SAMPLE).unwrap();
        c.validate().unwrap();
        assert_eq!(c.poll_interval_secs, 600);
        assert_eq!(c.lookback_hours, 48);
        assert_eq!(c.subsystems.len(), 2);
        assert_eq!(c.subscriptions[0].channel_id, ChannelId(1_311_000_000_000_000_001));
        assert!(c.subscriptions[0].filter.wildcard);
    }

    #[test]
    fn env_overrides() {
        let mut c = TrackerConfig::from_json(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("FOLKLORE_DB_PATH", "/var/lib/folklore/state.db"),
            ("FOLKLORE_POLL_INTERVAL_SECS", "120"),
            ("FOLKLORE_HTTP_PORT", "9090"),
            ("DISCORD_TOKEN", "abc.def"),
        ]);
        c.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(c.db_path, PathBuf::from("/var/lib/folklore/state.db"));
        assert_eq!(c.poll_interval_secs, 120);
        assert_eq!(c.http_port, 9090);
        assert_eq!(c.require_discord_token().unwrap().expose_secret(), "abc.def");
    }

    #[test]
    fn bad_override_is_invalid_value() {
        let mut c = TrackerConfig::default();
        let err = c
            .apply_overrides(|k| (k == "FOLKLORE_HTTP_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn requires_a_subscription() {
        let err = TrackerConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn rejects_empty_subsystem_query() {
        let mut c = TrackerConfig::from_json(SAMPLE).unwrap();
        c.subsystems[1].query = "  ".into();
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "subsystems[1]"
        ));
    }

    #[test]
    fn merge_pattern_must_compile_with_group() {
        let mut c = TrackerConfig::from_json(SAMPLE).unwrap();
        c.merge_url_pattern = "https://git.kernel.org/torvalds/c/[0-9a-f]+".into();
        assert!(c.validate().is_err());
        c.merge_url_pattern = "([unclosed".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn token_in_file_is_read() {
        let c = TrackerConfig::from_json(r#"{"discord_token": "from-file"}"#).unwrap();
        assert_eq!(c.require_discord_token().unwrap().expose_secret(), "from-file");
        let blank = TrackerConfig::from_json(r#"{"discord_token": ""}"#).unwrap();
        assert!(blank.require_discord_token().is_err());
    }
}
