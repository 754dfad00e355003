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
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use keepalive_common::{BotConfig, BotId};
use serde::Serialize;
use tracing::{debug, warn};

pub type StoredBots = BTreeMap<BotId, BotConfig>;

#[async_trait]
pub trait BotConfigStore: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<StoredBots>;
    async fn save_all(&self, bots: &StoredBots) -> anyhow::Result<()>;
}

/// All bot configs in one pretty-printed JSON object keyed by bot id.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BotConfigStore for JsonFileStore {
    async fn load_all(&self) -> anyhow::Result<StoredBots> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored bots yet");
                return Ok(StoredBots::new());
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(StoredBots::new());
        }

        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        let mut bots = StoredBots::new();
        for (id, value) in entries {
            match serde_json::from_value::<BotConfig>(value) {
                Ok(mut config) => {
                    if config.id != id {
                        warn!(key = %id, config_id = %config.id, "stored bot id mismatch, using key");
                        config.id = id.clone();
                    }
                    bots.insert(id, config);
                }
                Err(error) => {
                    warn!(bot_id = %id, error = %error, "skipping unreadable stored bot");
                }
            }
        }
        Ok(bots)
    }

    async fn save_all(&self, bots: &StoredBots) -> anyhow::Result<()> {
        write_json_atomic(&self.path, bots).await
    }
}

/// Pretty JSON written to a staging file, then renamed over `path`.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to encode {}", path.display()))?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, body)
        .await
        .with_context(|| format!("failed to write {}", staging.display()))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keepalive_common::{BotDefaults, CreateBotRequest, PortInput, new_bot_id};

    fn sample(host: &str) -> BotConfig {
        BotConfig::from_request(
            new_bot_id(),
            CreateBotRequest {
                host: Some(host.to_string()),
                port: Some(PortInput::Number(19132)),
                username: Some("Keeper".to_string()),
                auto_start: Some(true),
                ..CreateBotRequest::default()
            },
            &BotDefaults::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data").join("bots.json"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data").join("bots.json"));
        let mut bots = StoredBots::new();
        for host in ["a.example.com", "10.1.1.1"] {
            let config = sample(host);
            bots.insert(config.id.clone(), config);
        }

        store.save_all(&bots).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), bots);

        let raw = std::fs::read_to_string(dir.path().join("data").join("bots.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let first = bots.keys().next().unwrap();
        assert_eq!(value[first]["autoStart"], true);
        assert!(value[first]["antiAfk"].is_object());
    }

    #[tokio::test]
    async fn unreadable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bots.json");
        let good = sample("ok.example.com");
        let mut body = serde_json::Map::new();
        body.insert(good.id.clone(), serde_json::to_value(&good).unwrap());
        body.insert("broken".to_string(), serde_json::json!({"name": "no host"}));
        let body = serde_json::Value::Object(body);
        std::fs::write(&path, body.to_string()).unwrap();

        let loaded = JsonFileStore::new(&path).load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(&good.id));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bots.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonFileStore::new(&path).load_all().await.is_err());
    }
}
