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

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use keepalive_common::{
    BotDefaults, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP_EXPONENT, DEFAULT_BACKOFF_MAX,
    IdleActivityConfig, ReconnectPolicy, expand_env_vars,
};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Timing knobs of the per-bot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleTimings {
    pub connect_timeout: Duration,
    pub spawn_timeout: Duration,
    /// Delay between spawn and the first idle movement cycle being armed.
    pub settle_delay: Duration,
    pub kill_grace: Duration,
    pub close_timeout: Duration,
    pub restart_pause: Duration,
    pub backoff: ReconnectPolicy,
    pub create_autostart_delay: Duration,
    pub load_autostart_delay: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(45),
            spawn_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(5),
            kill_grace: Duration::from_secs(2),
            close_timeout: Duration::from_secs(10),
            restart_pause: Duration::from_secs(2),
            backoff: ReconnectPolicy {
                base_delay: DEFAULT_BACKOFF_BASE,
                max_delay: DEFAULT_BACKOFF_MAX,
                cap_exponent: DEFAULT_BACKOFF_CAP_EXPONENT,
            },
            create_autostart_delay: Duration::from_secs(1),
            load_autostart_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LifecycleConfigFile {
    connect_timeout_ms: Option<u64>,
    spawn_timeout_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    kill_grace_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
    restart_pause_ms: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    backoff_cap_exponent: Option<u32>,
    create_autostart_delay_ms: Option<u64>,
    load_autostart_delay_ms: Option<u64>,
}

impl LifecycleConfigFile {
    fn apply(self, mut timings: LifecycleTimings) -> LifecycleTimings {
        let ms = Duration::from_millis;
        if let Some(value) = self.connect_timeout_ms {
            timings.connect_timeout = ms(value);
        }
        if let Some(value) = self.spawn_timeout_ms {
            timings.spawn_timeout = ms(value);
        }
        if let Some(value) = self.settle_delay_ms {
            timings.settle_delay = ms(value);
        }
        if let Some(value) = self.kill_grace_ms {
            timings.kill_grace = ms(value);
        }
        if let Some(value) = self.close_timeout_ms {
            timings.close_timeout = ms(value);
        }
        if let Some(value) = self.restart_pause_ms {
            timings.restart_pause = ms(value);
        }
        if let Some(value) = self.backoff_base_ms {
            timings.backoff.base_delay = ms(value);
        }
        if let Some(value) = self.backoff_max_ms {
            timings.backoff.max_delay = ms(value);
        }
        if let Some(value) = self.backoff_cap_exponent {
            timings.backoff.cap_exponent = value;
        }
        if let Some(value) = self.create_autostart_delay_ms {
            timings.create_autostart_delay = ms(value);
        }
        if let Some(value) = self.load_autostart_delay_ms {
            timings.load_autostart_delay = ms(value);
        }
        if timings.backoff.max_delay < timings.backoff.base_delay {
            warn!(
                base_ms = timings.backoff.base_delay.as_millis() as u64,
                max_ms = timings.backoff.max_delay.as_millis() as u64,
                "backoff max below base, clamping max to base"
            );
            timings.backoff.max_delay = timings.backoff.base_delay;
        }
        timings
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub url: Option<String>,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub data_path: PathBuf,
    pub logs_path: PathBuf,
    pub max_log_size: u64,
    pub bridge_addr: String,
    pub defaults: BotDefaults,
    pub timings: LifecycleTimings,
    pub heartbeat: HeartbeatConfig,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let default_bind = std::env::var("PORT")
            .ok()
            .map(|port| format!("0.0.0.0:{}", port.trim()))
            .unwrap_or_else(|| "0.0.0.0:3000".to_string());

        let fallback = BotDefaults::default();
        let defaults = BotDefaults {
            version: env_string("MC_VERSION", &fallback.version),
            is_offline_mode: parse_env_bool("DEFAULT_OFFLINE_MODE", fallback.is_offline_mode),
            skip_authentication: parse_env_bool(
                "SKIP_AUTHENTICATION",
                fallback.skip_authentication,
            ),
            anti_afk: IdleActivityConfig {
                enabled: parse_env_bool("DEFAULT_ANTI_AFK_ENABLED", fallback.anti_afk.enabled),
                interval: parse_env("DEFAULT_ANTI_AFK_INTERVAL", fallback.anti_afk.interval),
                movement_range: parse_env(
                    "DEFAULT_MOVEMENT_RANGE",
                    fallback.anti_afk.movement_range,
                ),
            },
            max_reconnect_attempts: parse_env(
                "DEFAULT_MAX_RECONNECT_ATTEMPTS",
                fallback.max_reconnect_attempts,
            ),
        };

        let heartbeat_enabled = parse_env_bool("BETTER_STACK_ENABLED", false);
        let heartbeat_url = std::env::var("BETTER_STACK_HEARTBEAT")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let heartbeat = HeartbeatConfig {
            url: heartbeat_url.filter(|_| heartbeat_enabled),
            interval: Duration::from_millis(parse_env("BETTER_STACK_INTERVAL", 60_000_u64)),
        };

        let config = Self {
            bind_addr: parse_bind_addr("KEEPALIVE_BIND", &default_bind)?,
            data_path: PathBuf::from(env_string("DATA_PATH", "./data")),
            logs_path: PathBuf::from(env_string("BOT_LOGS_PATH", "./logs/bots")),
            max_log_size: parse_env("MAX_LOG_SIZE", DEFAULT_MAX_LOG_SIZE),
            bridge_addr: env_string("PROTOCOL_BRIDGE_ADDR", "127.0.0.1:19150"),
            defaults,
            timings: load_lifecycle_timings(),
            heartbeat,
        };

        info!(
            bind_addr = %config.bind_addr,
            data_path = %config.data_path.display(),
            logs_path = %config.logs_path.display(),
            bridge_addr = %config.bridge_addr,
            heartbeat_enabled = config.heartbeat.url.is_some(),
            "keep-alive manager configuration loaded"
        );
        Ok(config)
    }

    pub fn bots_file(&self) -> PathBuf {
        self.data_path.join("bots.json")
    }

    /// Runtime heartbeat settings, changed through the API.
    pub fn heartbeat_file(&self) -> PathBuf {
        self.data_path.join("heartbeat.json")
    }
}

fn env_string(var_name: &str, default: &str) -> String {
    std::env::var(var_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(var_name: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    let Ok(raw) = std::env::var(var_name) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(var_name, value = %raw, "ignoring unparsable environment value");
            default
        }
    }
}

fn parse_env_bool(var_name: &str, default: bool) -> bool {
    std::env::var(var_name)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            if normalized.is_empty() {
                default
            } else {
                !matches!(normalized.as_str(), "0" | "false" | "no" | "off")
            }
        })
        .unwrap_or(default)
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

fn load_lifecycle_timings() -> LifecycleTimings {
    let Some(path) = std::env::var("KEEPALIVE_LIFECYCLE_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return LifecycleTimings::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read lifecycle config path");
            return LifecycleTimings::default();
        }
    };

    match parse_lifecycle_yaml(&raw) {
        Ok(timings) => {
            info!(
                path = %path,
                connect_timeout_ms = timings.connect_timeout.as_millis() as u64,
                spawn_timeout_ms = timings.spawn_timeout.as_millis() as u64,
                backoff_base_ms = timings.backoff.base_delay.as_millis() as u64,
                "loaded lifecycle timing config"
            );
            timings
        }
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse lifecycle config yaml");
            LifecycleTimings::default()
        }
    }
}

fn parse_lifecycle_yaml(raw: &str) -> Result<LifecycleTimings, serde_yaml::Error> {
    let expanded = expand_env_vars(raw);
    if expanded.trim().is_empty() {
        return Ok(LifecycleTimings::default());
    }
    let parsed = serde_yaml::from_str::<LifecycleConfigFile>(&expanded)?;
    Ok(parsed.apply(LifecycleTimings::default()))
}
