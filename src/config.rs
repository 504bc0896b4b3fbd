use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::RetryPolicy;
use crate::scheduler::PollSettings;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    Discord,
    Telegram,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationKind::Discord => write!(f, "discord"),
            DestinationKind::Telegram => write!(f, "telegram"),
        }
    }
}

impl FromStr for DestinationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discord" => Ok(DestinationKind::Discord),
            "telegram" => Ok(DestinationKind::Telegram),
            other => bail!("unknown destination kind '{}' (expected discord or telegram)", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// Where channel history is read from.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub channel: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DestinationConfig {
    #[serde(default)]
    pub kind: DestinationKind,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub channel: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Post a one-line notice to the destination after startup
    #[serde(default)]
    pub announce_startup: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DigestConfig {
    #[serde(default = "default_context_before")]
    pub context_before: usize,
    #[serde(default = "default_context_after")]
    pub context_after: usize,
    /// Context messages shorter than this (after trimming) are skipped
    #[serde(default = "default_context_min_chars")]
    pub context_min_chars: usize,
    #[serde(default = "default_context_text_max_chars")]
    pub context_text_max_chars: usize,
    /// Offset used for timestamps in digests, e.g. "+09:00"
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    #[serde(default = "default_delivery_spacing_ms")]
    pub delivery_spacing_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    #[serde(default = "default_seen_retention")]
    pub seen_retention: i64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_fetch_limit() -> usize {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_context_before() -> usize {
    2
}

fn default_context_after() -> usize {
    5
}

fn default_context_min_chars() -> usize {
    7
}

fn default_context_text_max_chars() -> usize {
    100
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_max_rate_limit_waits() -> u32 {
    3
}

fn default_delivery_spacing_ms() -> u64 {
    500
}

fn default_state_path() -> PathBuf {
    PathBuf::from("linkrelay.db")
}

fn default_seen_retention() -> i64 {
    5000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_limit: default_fetch_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            announce_startup: false,
        }
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            context_before: default_context_before(),
            context_after: default_context_after(),
            context_min_chars: default_context_min_chars(),
            context_text_max_chars: default_context_text_max_chars(),
            utc_offset: default_utc_offset(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            delivery_spacing_ms: default_delivery_spacing_ms(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            seen_retention: default_seen_retention(),
        }
    }
}

/// Parse "+HH:MM", "-HHMM", "Z" or "UTC" into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("invalid UTC offset"));
    }

    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => bail!("UTC offset '{}' must start with + or -", raw),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some(parts) => parts,
        None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("invalid hours in UTC offset '{}'", raw))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("invalid minutes in UTC offset '{}'", raw))?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        bail!("UTC offset '{}' out of range", raw);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("UTC offset '{}' out of range", raw))
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid value for {}: '{}' ({})", name, value, e))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => bail!("invalid value for {}: '{}' (expected true or false)", name, value),
    }
}

impl Config {
    /// Read the TOML file, apply environment overrides and validate.
    ///
    /// A missing file is only an error when the path was given explicitly.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        let mut config = Self::from_file(path, explicit)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path, explicit: bool) -> Result<Self> {
        if !path.exists() {
            if explicit {
                bail!("Config file not found: {}", path.display());
            }
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Environment variables win over file values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LINKRELAY_SOURCE_API_URL") {
            self.source.api_url = v;
        }
        if let Some(v) = get("LINKRELAY_SOURCE_API_TOKEN") {
            self.source.api_token = v;
        }
        if let Some(v) = get("LINKRELAY_SOURCE_CHANNEL") {
            self.source.channel = v;
        }

        if let Some(v) = get("LINKRELAY_DESTINATION_KIND") {
            self.destination.kind = v.parse()?;
        }
        if let Some(v) = get("LINKRELAY_DESTINATION_TOKEN").or_else(|| get("DISCORD_BOT_TOKEN")) {
            self.destination.token = v;
        }
        if let Some(v) = get("LINKRELAY_DESTINATION_CHANNEL").or_else(|| get("DISCORD_CHANNEL_ID"))
        {
            self.destination.channel = v;
        }

        if let Some(v) = get("LINKRELAY_POLL_INTERVAL_SECS") {
            self.poll.interval_secs = parse_var("LINKRELAY_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("LINKRELAY_FETCH_LIMIT") {
            self.poll.fetch_limit = parse_var("LINKRELAY_FETCH_LIMIT", &v)?;
        }
        if let Some(v) = get("LINKRELAY_REQUEST_TIMEOUT_SECS") {
            self.poll.request_timeout_secs = parse_var("LINKRELAY_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LINKRELAY_ANNOUNCE_STARTUP") {
            self.poll.announce_startup = parse_bool("LINKRELAY_ANNOUNCE_STARTUP", &v)?;
        }

        if let Some(v) = get("LINKRELAY_CONTEXT_BEFORE") {
            self.digest.context_before = parse_var("LINKRELAY_CONTEXT_BEFORE", &v)?;
        }
        if let Some(v) = get("LINKRELAY_CONTEXT_AFTER") {
            self.digest.context_after = parse_var("LINKRELAY_CONTEXT_AFTER", &v)?;
        }
        if let Some(v) = get("LINKRELAY_UTC_OFFSET") {
            self.digest.utc_offset = v;
        }

        if let Some(v) = get("LINKRELAY_STATE_PATH") {
            self.state.path = PathBuf::from(v);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.api_url.trim().is_empty() {
            bail!("source API URL is required ([source] api_url or LINKRELAY_SOURCE_API_URL)");
        }
        let url = url::Url::parse(&self.source.api_url)
            .with_context(|| format!("source API URL is not a URL: {}", self.source.api_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("source API URL must be http or https: {}", self.source.api_url);
        }
        if self.source.channel.trim().is_empty() {
            bail!("source channel is required ([source] channel or LINKRELAY_SOURCE_CHANNEL)");
        }

        if self.destination.token.trim().is_empty() {
            bail!(
                "destination token is required ([destination] token, LINKRELAY_DESTINATION_TOKEN \
                 or DISCORD_BOT_TOKEN)"
            );
        }
        if self.destination.channel.trim().is_empty() {
            bail!(
                "destination channel is required ([destination] channel, \
                 LINKRELAY_DESTINATION_CHANNEL or DISCORD_CHANNEL_ID)"
            );
        }

        if self.poll.interval_secs == 0 {
            bail!("poll interval must be at least 1 second");
        }
        if self.poll.fetch_limit == 0 {
            bail!("fetch limit must be at least 1");
        }
        if self.poll.request_timeout_secs == 0 {
            bail!("request timeout must be at least 1 second");
        }
        if self.digest.context_text_max_chars == 0 {
            bail!("context_text_max_chars must be at least 1");
        }
        if self.delivery.max_attempts == 0 {
            bail!("delivery max_attempts must be at least 1");
        }
        if self.state.seen_retention < 0 {
            bail!("seen_retention cannot be negative");
        }
        parse_utc_offset(&self.digest.utc_offset)?;

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.poll.request_timeout_secs)
    }

    /// Resolve the values the poll loop runs with.
    pub fn poll_settings(&self) -> Result<PollSettings> {
        Ok(PollSettings {
            interval: Duration::from_secs(self.poll.interval_secs),
            fetch_limit: self.poll.fetch_limit,
            context_before: self.digest.context_before,
            context_after: self.digest.context_after,
            context_min_chars: self.digest.context_min_chars,
            seen_retention: self.state.seen_retention,
            delivery_spacing: Duration::from_millis(self.delivery.delivery_spacing_ms),
            destination_channel: self.destination.channel.clone(),
            utc_offset: parse_utc_offset(&self.digest.utc_offset)?,
            context_text_max_chars: self.digest.context_text_max_chars,
            retry: RetryPolicy {
                max_attempts: self.delivery.max_attempts,
                base_delay: Duration::from_millis(self.delivery.base_backoff_ms),
                max_delay: Duration::from_millis(self.delivery.max_backoff_ms),
                max_rate_limit_waits: self.delivery.max_rate_limit_waits,
            },
        })
    }
}
