// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
    sync::LazyLock,
    time::Duration,
};

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_PROTOCOL_VERSION: &str = "1.21.90";
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 30_000;
pub const MIN_IDLE_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MOVEMENT_RANGE: f64 = 2.0;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 50;

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);
pub const DEFAULT_BACKOFF_CAP_EXPONENT: u32 = 5;

/// Where a freshly spawned bot is assumed to stand until the server says otherwise.
pub const SPAWN_POSITION: Position = Position {
    x: 0.0,
    y: 64.0,
    z: 0.0,
};

pub type BotId = String;

pub fn new_bot_id() -> BotId {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Shift x and z by an independent random offset in `[-range, range]`; y is kept.
    pub fn wander<R: Rng + ?Sized>(&self, range: f64, rng: &mut R) -> Self {
        if !(range.is_finite() && range > 0.0) {
            return *self;
        }
        Self {
            x: self.x + rng.random_range(-range..=range),
            y: self.y,
            z: self.z + rng.random_range(-range..=range),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Server-assigned runtime id of the bot's avatar.
///
/// The protocol layer reports these either as JSON numbers or, when they do not
/// fit a double, as decimal strings. Both are normalized here once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Signed(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(EntityId(value)),
            Raw::Signed(value) => u64::try_from(value)
                .map(EntityId)
                .map_err(|_| serde::de::Error::custom(format!("negative entity id {value}"))),
            Raw::Text(text) => text
                .trim()
                .trim_end_matches('n')
                .parse::<u64>()
                .map(EntityId)
                .map_err(|_| serde::de::Error::custom(format!("invalid entity id {text:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdleActivityConfig {
    pub enabled: bool,
    /// Milliseconds between two idle movements.
    pub interval: u64,
    pub movement_range: f64,
}

impl IdleActivityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

impl Default for IdleActivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_IDLE_INTERVAL_MS,
            movement_range: DEFAULT_MOVEMENT_RANGE,
        }
    }
}

/// Full configuration of one bot, exactly as persisted in the bots file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub id: BotId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub version: String,
    #[serde(default)]
    pub is_offline_mode: bool,
    #[serde(default)]
    pub skip_authentication: bool,
    #[serde(default)]
    pub anti_afk: IdleActivityConfig,
    pub max_reconnect_attempts: u32,
    #[serde(default)]
    pub auto_start: bool,
    pub created_at: DateTime<Utc>,
}

/// Fallback values for fields a create request leaves out.
#[derive(Debug, Clone)]
pub struct BotDefaults {
    pub version: String,
    pub is_offline_mode: bool,
    pub skip_authentication: bool,
    pub anti_afk: IdleActivityConfig,
    pub max_reconnect_attempts: u32,
}

impl Default for BotDefaults {
    fn default() -> Self {
        Self {
            version: DEFAULT_PROTOCOL_VERSION.to_string(),
            is_offline_mode: false,
            skip_authentication: false,
            anti_afk: IdleActivityConfig::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Port as sent by API clients: dashboards post it both as a number and as a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PortInput {
    Number(i64),
    Text(String),
}

impl PortInput {
    fn resolve(&self) -> Result<u16, ConfigError> {
        let value = match self {
            PortInput::Number(value) => *value,
            PortInput::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidPort(format!("{text} is not a valid number")))?,
        };
        if !(1..=65535).contains(&value) {
            return Err(ConfigError::InvalidPort(format!(
                "{value} must be between 1 and 65535"
            )));
        }
        Ok(value as u16)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBotRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<PortInput>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub is_offline_mode: Option<bool>,
    #[serde(default)]
    pub skip_authentication: Option<bool>,
    #[serde(default)]
    pub anti_afk_enabled: Option<bool>,
    #[serde(default)]
    pub anti_afk_interval: Option<u64>,
    #[serde(default)]
    pub movement_range: Option<f64>,
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default)]
    pub auto_start: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleActivityPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub movement_range: Option<f64>,
}

/// Partial update merged into a live config. `id` and `createdAt` cannot be changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfigPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<PortInput>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub is_offline_mode: Option<bool>,
    #[serde(default)]
    pub skip_authentication: Option<bool>,
    #[serde(default)]
    pub anti_afk: Option<IdleActivityPatch>,
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default)]
    pub auto_start: Option<bool>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required config: host, port, username")]
    MissingRequired,
    #[error("Invalid host: {0}")]
    InvalidHost(String),
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Invalid username: username cannot be empty")]
    InvalidUsername,
    #[error("Invalid version: version cannot be empty")]
    InvalidVersion,
    #[error("Invalid anti-AFK interval: {0}ms is below the {MIN_IDLE_INTERVAL_MS}ms minimum")]
    IdleIntervalTooShort(u64),
    #[error("Invalid movement range: {0}")]
    InvalidMovementRange(f64),
    #[error("Invalid maxReconnectAttempts: must be at least 1")]
    InvalidMaxReconnectAttempts,
}

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-.]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-.]*[a-zA-Z0-9])?)*$")
        .expect("hostname pattern compiles")
});

static DOTTED_NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9.]+$").expect("numeric host pattern compiles"));

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern compiles")
});

/// Check that `host` is a hostname, an IPv4 literal or an IPv6 literal, returning it trimmed.
pub fn validate_host(host: &str) -> Result<String, ConfigError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ConfigError::InvalidHost("host cannot be empty".to_string()));
    }
    if host.parse::<Ipv6Addr>().is_ok() {
        return Ok(host.to_string());
    }
    if DOTTED_NUMERIC_RE.is_match(host) {
        return host
            .parse::<Ipv4Addr>()
            .map(|_| host.to_string())
            .map_err(|_| ConfigError::InvalidHost(format!("invalid IPv4 address {host}")));
    }
    if !HOSTNAME_RE.is_match(host) {
        return Err(ConfigError::InvalidHost(format!("invalid host format {host}")));
    }
    Ok(host.to_string())
}

pub fn validate_port(port: u16) -> Result<u16, ConfigError> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(
            "0 must be between 1 and 65535".to_string(),
        ));
    }
    Ok(port)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
}

impl BotConfig {
    /// Build a new config from an API request, filling gaps from `defaults`.
    pub fn from_request(
        id: BotId,
        request: CreateBotRequest,
        defaults: &BotDefaults,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let host = non_empty(request.host).ok_or(ConfigError::MissingRequired)?;
        let port = request.port.ok_or(ConfigError::MissingRequired)?;
        let username = non_empty(request.username).ok_or(ConfigError::MissingRequired)?;

        let short_id: String = id.chars().take(8).collect();
        let config = Self {
            name: non_empty(request.name).unwrap_or_else(|| format!("Bot-{short_id}")),
            host,
            port: port.resolve()?,
            username,
            version: non_empty(request.version).unwrap_or_else(|| defaults.version.clone()),
            is_offline_mode: request
                .is_offline_mode
                .unwrap_or(defaults.is_offline_mode),
            skip_authentication: request
                .skip_authentication
                .unwrap_or(defaults.skip_authentication),
            anti_afk: IdleActivityConfig {
                enabled: request
                    .anti_afk_enabled
                    .unwrap_or(defaults.anti_afk.enabled),
                interval: request
                    .anti_afk_interval
                    .unwrap_or(defaults.anti_afk.interval),
                movement_range: request
                    .movement_range
                    .unwrap_or(defaults.anti_afk.movement_range),
            },
            max_reconnect_attempts: request
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            auto_start: request.auto_start.unwrap_or(false),
            created_at,
            id,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validated_address()?;
        if self.username.trim().is_empty() {
            return Err(ConfigError::InvalidUsername);
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::InvalidVersion);
        }
        if self.anti_afk.interval < MIN_IDLE_INTERVAL_MS {
            return Err(ConfigError::IdleIntervalTooShort(self.anti_afk.interval));
        }
        let range = self.anti_afk.movement_range;
        if !range.is_finite() || range < 0.0 {
            return Err(ConfigError::InvalidMovementRange(range));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::InvalidMaxReconnectAttempts);
        }
        Ok(())
    }

    /// Host and port as they will be dialled. Runs before every connection attempt.
    pub fn validated_address(&self) -> Result<(String, u16), ConfigError> {
        Ok((validate_host(&self.host)?, validate_port(self.port)?))
    }

    /// Merge `patch` into a copy of this config; the copy is returned only if it validates.
    pub fn patched(&self, patch: BotConfigPatch) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        if let Some(name) = non_empty(patch.name) {
            next.name = name;
        }
        if let Some(host) = patch.host {
            next.host = host.trim().to_string();
        }
        if let Some(port) = patch.port {
            next.port = port.resolve()?;
        }
        if let Some(username) = patch.username {
            next.username = username.trim().to_string();
        }
        if let Some(version) = patch.version {
            next.version = version.trim().to_string();
        }
        if let Some(value) = patch.is_offline_mode {
            next.is_offline_mode = value;
        }
        if let Some(value) = patch.skip_authentication {
            next.skip_authentication = value;
        }
        if let Some(anti_afk) = patch.anti_afk {
            if let Some(enabled) = anti_afk.enabled {
                next.anti_afk.enabled = enabled;
            }
            if let Some(interval) = anti_afk.interval {
                next.anti_afk.interval = interval;
            }
            if let Some(range) = anti_afk.movement_range {
                next.anti_afk.movement_range = range;
            }
        }
        if let Some(value) = patch.max_reconnect_attempts {
            next.max_reconnect_attempts = value;
        }
        if let Some(value) = patch.auto_start {
            next.auto_start = value;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub cap_exponent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_MAX,
            cap_exponent: DEFAULT_BACKOFF_CAP_EXPONENT,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^min(attempts - 1, cap), max)`. `attempts` counts from 1.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(self.cap_exponent).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    pub fn decide(&self, attempts: u32, max_attempts: u32) -> ReconnectDecision {
        if attempts >= max_attempts {
            ReconnectDecision::GiveUp
        } else {
            ReconnectDecision::RetryAfter(self.delay(attempts))
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of the live log stream and of the per-bot log files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub source: String,
    #[serde(default)]
    pub bot_id: Option<BotId>,
}

impl LogEntry {
    pub fn for_bot(bot_id: &str, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            source: format!("bot-{bot_id}"),
            bot_id: Some(bot_id.to_string()),
        }
    }

    pub fn for_manager(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            source: "manager".to_string(),
            bot_id: None,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level: LogLevel::Info,
            source: "system".to_string(),
            bot_id: None,
        }
    }
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}
