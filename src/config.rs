use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::platform::EntityRef;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    Missing { key: &'static str, hint: &'static str },

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub filter: FilterPolicy,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

/// Credential of the listening session
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    /// e.g. `socks5://127.0.0.1:1080`
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForwardConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Token of the destination bot, `<numeric id>:<secret>`
    #[serde(default)]
    pub bot_token: String,
    /// Chat the destination bot posts into: a numeric id of a user who has
    /// started it, or a group/channel id or `@username` it belongs to
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub monitor_groups: Vec<String>,
    /// Pacing delay after each delivered message, in seconds
    #[serde(default = "default_forward_delay")]
    pub delay: f64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,
}

/// Which message kinds and origins may be forwarded
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FilterPolicy {
    #[serde(default = "default_true")]
    pub forward_media: bool,
    #[serde(default = "default_true")]
    pub forward_stickers: bool,
    #[serde(default = "default_true")]
    pub forward_voice: bool,
    #[serde(default)]
    pub forward_forwarded_messages: bool,
    #[serde(default = "default_true")]
    pub forward_bot_messages: bool,
    #[serde(default = "default_true")]
    pub forward_photos: bool,
    #[serde(default = "default_true")]
    pub forward_videos: bool,
    #[serde(default = "default_true")]
    pub forward_documents: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormatConfig {
    /// Placeholders: {chat_title} {sender_name} {message_time} {chat_id} {message_id}
    #[serde(default = "default_message_prefix")]
    pub message_prefix: String,
    #[serde(default = "default_true")]
    pub show_message_time: bool,
    #[serde(default = "default_time_format")]
    pub time_format: String,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dedup_window")]
    pub window_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_forward_delay() -> f64 {
    1.0
}

fn default_retry_delay() -> f64 {
    2.0
}

fn default_reaper_interval() -> u64 {
    300
}

fn default_message_prefix() -> String {
    "📢 [{chat_title}] {sender_name}:\n".to_string()
}

fn default_time_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

fn default_max_message_length() -> usize {
    4000
}

fn default_dedup_window() -> u64 {
    60
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            target: String::new(),
            monitor_groups: Vec::new(),
            delay: default_forward_delay(),
            retry_delay: default_retry_delay(),
            reaper_interval: default_reaper_interval(),
        }
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            forward_media: true,
            forward_stickers: true,
            forward_voice: true,
            forward_forwarded_messages: false,
            forward_bot_messages: true,
            forward_photos: true,
            forward_videos: true,
            forward_documents: true,
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            message_prefix: default_message_prefix(),
            show_message_time: true,
            time_format: default_time_format(),
            max_message_length: default_max_message_length(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: default_dedup_window(),
        }
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("'{}': {}", raw.trim(), e),
    })
}

/// Split a comma-separated group list, dropping blanks
pub fn parse_group_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load the optional TOML file, then apply environment overrides.
    /// A missing file is fine; settings may come from the environment alone.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config
            .apply_env(|key| std::env::var(key).ok())
            .context("Invalid environment configuration")?;
        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    /// Override fields from environment-style key/value pairs
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v.trim().to_string();
        }
        if let Some(v) = get("ENABLE_PROXY") {
            self.proxy.enabled = parse_bool("ENABLE_PROXY", &v)?;
        }
        if let Some(v) = get("PROXY_URL") {
            self.proxy.url = v.trim().to_string();
        }

        if let Some(v) = get("ENABLE_GROUP_FORWARD") {
            self.forward.enabled = parse_bool("ENABLE_GROUP_FORWARD", &v)?;
        }
        if let Some(v) = get("BOT_TOKEN") {
            self.forward.bot_token = v.trim().to_string();
        }
        if let Some(v) = get("FORWARD_TARGET") {
            self.forward.target = v.trim().to_string();
        }
        if let Some(v) = get("MONITOR_GROUPS") {
            self.forward.monitor_groups = parse_group_list(&v);
        }
        if let Some(v) = get("FORWARD_DELAY") {
            self.forward.delay = parse_number("FORWARD_DELAY", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY") {
            self.forward.retry_delay = parse_number("RETRY_DELAY", &v)?;
        }
        if let Some(v) = get("REAPER_INTERVAL") {
            self.forward.reaper_interval = parse_number("REAPER_INTERVAL", &v)?;
        }

        let flags: [(&'static str, &mut bool); 8] = [
            ("FORWARD_MEDIA", &mut self.filter.forward_media),
            ("FORWARD_STICKERS", &mut self.filter.forward_stickers),
            ("FORWARD_VOICE", &mut self.filter.forward_voice),
            ("FORWARD_FORWARDED", &mut self.filter.forward_forwarded_messages),
            ("FORWARD_BOT_MESSAGES", &mut self.filter.forward_bot_messages),
            ("FORWARD_PHOTOS", &mut self.filter.forward_photos),
            ("FORWARD_VIDEOS", &mut self.filter.forward_videos),
            ("FORWARD_DOCUMENTS", &mut self.filter.forward_documents),
        ];
        for (key, slot) in flags {
            if let Some(v) = get(key) {
                *slot = parse_bool(key, &v)?;
            }
        }

        if let Some(v) = get("MESSAGE_PREFIX") {
            self.format.message_prefix = v;
        }
        if let Some(v) = get("SHOW_MESSAGE_TIME") {
            self.format.show_message_time = parse_bool("SHOW_MESSAGE_TIME", &v)?;
        }
        if let Some(v) = get("TIME_FORMAT") {
            self.format.time_format = v;
        }
        if let Some(v) = get("MAX_MESSAGE_LENGTH") {
            self.format.max_message_length = parse_number("MAX_MESSAGE_LENGTH", &v)?;
        }

        if let Some(v) = get("ENABLE_DEDUPLICATION") {
            self.dedup.enabled = parse_bool("ENABLE_DEDUPLICATION", &v)?;
        }
        if let Some(v) = get("DEDUP_WINDOW") {
            self.dedup.window_seconds = parse_number("DEDUP_WINDOW", &v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.is_empty() {
            return Err(ConfigError::Missing {
                key: "TELEGRAM_BOT_TOKEN",
                hint: "Set the token of the listening session.",
            });
        }

        if self.proxy.enabled && self.proxy.url.is_empty() {
            return Err(ConfigError::Missing {
                key: "PROXY_URL",
                hint: "ENABLE_PROXY is set but no proxy URL was given.",
            });
        }

        if self.forward.enabled {
            if self.forward.bot_token.is_empty() {
                return Err(ConfigError::Missing {
                    key: "BOT_TOKEN",
                    hint: "Group forwarding is enabled but no destination token is set.",
                });
            }
            self.bot_id()?;
            if self.forward.target.is_empty() {
                return Err(ConfigError::Missing {
                    key: "FORWARD_TARGET",
                    hint: "Set the chat the destination bot should post into.",
                });
            }
            let target = self.forward_target()?;
            if target == EntityRef::Id(self.bot_id()?) {
                return Err(ConfigError::Invalid {
                    key: "FORWARD_TARGET",
                    message: "the destination bot cannot post to itself".to_string(),
                });
            }
            if self.forward.monitor_groups.is_empty() {
                return Err(ConfigError::Missing {
                    key: "MONITOR_GROUPS",
                    hint: "Group forwarding is enabled but no groups are listed.",
                });
            }
        }

        if StrftimeItems::new(&self.format.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Invalid {
                key: "TIME_FORMAT",
                message: format!("'{}' is not a valid strftime format", self.format.time_format),
            });
        }

        if self.format.max_message_length <= 3 {
            return Err(ConfigError::Invalid {
                key: "MAX_MESSAGE_LENGTH",
                message: "must be greater than 3".to_string(),
            });
        }

        for (key, value) in [
            ("FORWARD_DELAY", self.forward.delay),
            ("RETRY_DELAY", self.forward.retry_delay),
        ] {
            if let Err(e) = Duration::try_from_secs_f64(value) {
                return Err(ConfigError::Invalid {
                    key,
                    message: format!("{} is not a usable number of seconds: {}", value, e),
                });
            }
        }

        if self.forward.reaper_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "REAPER_INTERVAL",
                message: "must be at least one second".to_string(),
            });
        }

        Ok(())
    }

    /// Numeric id of the destination bot, taken from the token prefix
    pub fn bot_id(&self) -> Result<i64, ConfigError> {
        let (id, secret) = self
            .forward
            .bot_token
            .split_once(':')
            .ok_or_else(|| ConfigError::Invalid {
                key: "BOT_TOKEN",
                message: "expected the form '123456789:ABCDEF...'".to_string(),
            })?;
        if secret.is_empty() {
            return Err(ConfigError::Invalid {
                key: "BOT_TOKEN",
                message: "secret part is empty".to_string(),
            });
        }
        id.parse().map_err(|_| ConfigError::Invalid {
            key: "BOT_TOKEN",
            message: format!("id part '{}' is not numeric", id),
        })
    }

    /// Where forwarded payloads are posted
    pub fn forward_target(&self) -> Result<EntityRef, ConfigError> {
        EntityRef::parse(&self.forward.target).ok_or_else(|| ConfigError::Invalid {
            key: "FORWARD_TARGET",
            message: format!("'{}' is neither a numeric id nor an @username", self.forward.target),
        })
    }

    // Range-checked in validate(); out-of-range values read as zero
    pub fn forward_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.forward.delay).unwrap_or_default()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.forward.retry_delay).unwrap_or_default()
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.forward.reaper_interval)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup.window_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_env(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).cloned())?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = from_env(&[("TELEGRAM_BOT_TOKEN", "1:abc")]).unwrap();
        assert!(!config.forward.enabled);
        assert_eq!(config.filter, FilterPolicy::default());
        assert!(!config.filter.forward_forwarded_messages);
        assert_eq!(config.format.max_message_length, 4000);
        assert_eq!(config.dedup_window(), Duration::from_secs(60));
        assert_eq!(config.forward_delay(), Duration::from_secs(1));
        assert_eq!(config.reaper_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_env_overrides_forwarding_settings() {
        let config = from_env(&[
            ("TELEGRAM_BOT_TOKEN", "1:abc"),
            ("ENABLE_GROUP_FORWARD", "TRUE"),
            ("BOT_TOKEN", "123456789:SECRET"),
            ("FORWARD_TARGET", " 987654321 "),
            ("MONITOR_GROUPS", " -1001234567890, @news ,,42 "),
            ("FORWARD_STICKERS", "false"),
            ("FORWARD_DELAY", "0.5"),
            ("DEDUP_WINDOW", "120"),
        ])
        .unwrap();

        assert!(config.forward.enabled);
        assert_eq!(config.bot_id().unwrap(), 123456789);
        assert_eq!(config.forward_target().unwrap(), EntityRef::Id(987654321));
        assert_eq!(
            config.forward.monitor_groups,
            vec!["-1001234567890", "@news", "42"]
        );
        assert!(!config.filter.forward_stickers);
        assert_eq!(config.forward_delay(), Duration::from_millis(500));
        assert_eq!(config.dedup.window_seconds, 120);
    }

    #[test]
    fn test_toml_sections_parse() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "1:abc"

            [forward]
            enabled = true
            bot_token = "77:xyz"
            target = "@relay_inbox"
            monitor_groups = ["@chat"]

            [filter]
            forward_voice = false
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(
            config.forward_target().unwrap(),
            EntityRef::Username("@relay_inbox".to_string())
        );
        assert!(!config.filter.forward_voice);
        assert!(config.filter.forward_media);
        assert_eq!(config.format.time_format, "%Y-%m-%d %H:%M:%S");
    }

    #[test]
    fn test_missing_listener_token_is_rejected() {
        let err = from_env(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "TELEGRAM_BOT_TOKEN", .. }));
    }

    #[test]
    fn test_forwarding_requires_well_formed_token() {
        let base = [
            ("TELEGRAM_BOT_TOKEN", "1:abc"),
            ("ENABLE_GROUP_FORWARD", "true"),
            ("FORWARD_TARGET", "987654321"),
            ("MONITOR_GROUPS", "42"),
        ];

        let err = from_env(&base).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "BOT_TOKEN", .. }));

        for bad in ["no-delimiter", "abc:secret", "123:"] {
            let mut pairs = base.to_vec();
            pairs.push(("BOT_TOKEN", bad));
            let err = from_env(&pairs).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: "BOT_TOKEN", .. }),
                "token {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_forwarding_requires_groups() {
        let err = from_env(&[
            ("TELEGRAM_BOT_TOKEN", "1:abc"),
            ("ENABLE_GROUP_FORWARD", "true"),
            ("BOT_TOKEN", "5:x"),
            ("FORWARD_TARGET", "987654321"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "MONITOR_GROUPS", .. }));
    }

    #[test]
    fn test_forwarding_requires_reachable_target() {
        let base = [
            ("TELEGRAM_BOT_TOKEN", "1:abc"),
            ("ENABLE_GROUP_FORWARD", "true"),
            ("BOT_TOKEN", "5:x"),
            ("MONITOR_GROUPS", "42"),
        ];

        let err = from_env(&base).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "FORWARD_TARGET", .. }));

        // Unparseable, or the destination bot itself
        for bad in ["inbox", "@", "5"] {
            let mut pairs = base.to_vec();
            pairs.push(("FORWARD_TARGET", bad));
            let err = from_env(&pairs).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: "FORWARD_TARGET", .. }),
                "target {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            ("FORWARD_MEDIA", "maybe"),
            ("MAX_MESSAGE_LENGTH", "3"),
            ("MAX_MESSAGE_LENGTH", "lots"),
            ("TIME_FORMAT", "%Q"),
            ("FORWARD_DELAY", "-1"),
            ("FORWARD_DELAY", "1e300"),
            ("RETRY_DELAY", "NaN"),
        ];
        for (key, value) in cases {
            let result = from_env(&[("TELEGRAM_BOT_TOKEN", "1:abc"), (key, value)]);
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn test_oversized_delay_is_a_config_error() {
        let err = from_env(&[("TELEGRAM_BOT_TOKEN", "1:abc"), ("FORWARD_DELAY", "1e300")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FORWARD_DELAY", .. }));

        // The accessor never panics, even on an unvalidated config
        let mut config = Config::default();
        config.forward.retry_delay = 1e300;
        assert_eq!(config.retry_delay(), Duration::ZERO);
    }

    #[test]
    fn test_group_list_parsing() {
        assert!(parse_group_list(" , ,").is_empty());
        assert_eq!(parse_group_list("a,b"), vec!["a", "b"]);
    }
}
