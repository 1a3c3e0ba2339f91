use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub scoring: ScoringWeights,
    pub renewal: RenewalWindows,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            token: None,
            timeout_secs: 30,
            page_size: 20,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

/// Largest magnitude accepted for any single scoring weight.
pub const MAX_WEIGHT: i32 = 1_000;

/// Relationship-health point values. Business parameters, not derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub baseline: i32,
    pub has_policies: i32,
    pub per_extra_policy: i32,
    pub max_extra_policies: i32,
    pub open_opportunities: i32,
    pub won_opportunities: i32,
    pub per_activity: i32,
    pub max_activity: i32,
    pub rising_activity: i32,
    pub inactivity_penalty: i32,
    pub excellent_at: u8,
    pub good_at: u8,
    pub fair_at: u8,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            baseline: 10,
            has_policies: 20,
            per_extra_policy: 5,
            max_extra_policies: 15,
            open_opportunities: 15,
            won_opportunities: 10,
            per_activity: 5,
            max_activity: 25,
            rising_activity: 5,
            inactivity_penalty: 15,
            excellent_at: 80,
            good_at: 60,
            fair_at: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalWindows {
    pub due_days: i64,
    pub urgent_days: i64,
}

impl Default for RenewalWindows {
    fn default() -> Self {
        Self {
            due_days: 60,
            urgent_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    /// Load from `path` when given (or `CRM_CONFIG`), then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os("CRM_CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::Io {
                        path: path.clone(),
                        source,
                    }
                })?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    #[cfg(test)]
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CRM_API_URL").filter(|v| !v.is_empty()) {
            self.api.base_url = url;
        }
        if let Some(token) = lookup("CRM_API_TOKEN").filter(|v| !v.is_empty()) {
            self.api.token = Some(token);
        }
        match lookup("CRM_LOG_FORMAT").as_deref() {
            Some("json") => self.logging.format = LogFormat::Json,
            Some("text") => self.logging.format = LogFormat::Text,
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "api.base_url must be an http(s) URL, got '{}'",
                self.api.base_url
            )));
        }
        if self.api.page_size == 0 {
            return Err(ConfigError::Validation(
                "api.page_size must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let s = &self.scoring;
        let weights = [
            ("baseline", s.baseline),
            ("has_policies", s.has_policies),
            ("per_extra_policy", s.per_extra_policy),
            ("max_extra_policies", s.max_extra_policies),
            ("open_opportunities", s.open_opportunities),
            ("won_opportunities", s.won_opportunities),
            ("per_activity", s.per_activity),
            ("max_activity", s.max_activity),
            ("rising_activity", s.rising_activity),
            ("inactivity_penalty", s.inactivity_penalty),
        ];
        if let Some((name, value)) = weights
            .iter()
            .find(|(_, value)| !(-MAX_WEIGHT..=MAX_WEIGHT).contains(value))
        {
            return Err(ConfigError::Validation(format!(
                "scoring.{name} = {value} is outside -{MAX_WEIGHT}..={MAX_WEIGHT}"
            )));
        }
        if !(s.excellent_at > s.good_at && s.good_at > s.fair_at && s.excellent_at <= 100) {
            return Err(ConfigError::Validation(
                "scoring cut points must satisfy 100 >= excellent_at > good_at > fair_at"
                    .to_string(),
            ));
        }
        if self.renewal.urgent_days < 0 || self.renewal.urgent_days > self.renewal.due_days {
            return Err(ConfigError::Validation(
                "renewal windows must satisfy 0 <= urgent_days <= due_days".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.scoring, ScoringWeights::default());
        assert_eq!(config.renewal.due_days, 60);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [api]
            base_url = "https://crm.example.com"

            [scoring]
            baseline = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://crm.example.com");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.scoring.baseline, 0);
        assert_eq!(config.scoring.has_policies, 20);
    }

    #[test]
    fn example_config_matches_defaults() {
        let config = Config::from_toml(include_str!("../crm.example.toml")).unwrap();
        assert_eq!(config.scoring, ScoringWeights::default());
        assert_eq!(config.renewal, RenewalWindows::default());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn rejects_inverted_cut_points() {
        let err = Config::from_toml(
            r#"
            [scoring]
            good_at = 90
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_out_of_range_weights() {
        let err = Config::from_toml("[scoring]\nper_extra_policy = 2147483647").unwrap_err();
        assert!(err.to_string().contains("scoring.per_extra_policy"));
        let err = Config::from_toml("[scoring]\ninactivity_penalty = -5000").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(Config::from_toml("[scoring]\nbaseline = -1000").is_ok());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = Config::from_toml("[api]\nbase_url = \"ftp://x\"").unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "CRM_API_URL" => Some("https://api.broker.test".to_string()),
            "CRM_API_TOKEN" => Some("secret".to_string()),
            "CRM_LOG_FORMAT" => Some("json".to_string()),
            _ => None,
        });
        assert_eq!(config.api.base_url, "https://api.broker.test");
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[renewal]\ndue_days = 90\nurgent_days = 15").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.renewal.due_days, 90);
        assert_eq!(config.renewal.urgent_days, 15);
    }
}
