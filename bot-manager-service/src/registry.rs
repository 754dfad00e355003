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

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use keepalive_common::{
    BotConfig, BotConfigPatch, BotDefaults, BotId, ConfigError, CreateBotRequest, LogEntry,
    LogLevel, Position, new_bot_id,
};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::{JoinHandle, JoinSet},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    bot::{BotError, BotHandle, BotSnapshot, spawn_bot},
    config::LifecycleTimings,
    connection::Connector,
    logs::{BotLogFile, BotLogger, LogBroadcaster, LogFileStats, LogFileWriter, SubscriptionId},
    store::{BotConfigStore, StoredBots},
};

/// Cap on lines taken from each bot for the cross-bot recent view.
const RECENT_LINES_PER_BOT: usize = 50;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Bot not found")]
    NotFound,
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error(transparent)]
    Bot(#[from] BotError),
    #[error("{0}")]
    Storage(String),
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub defaults: BotDefaults,
    pub timings: LifecycleTimings,
    /// Directory of per-bot log files; `None` keeps bot logs in memory only.
    pub logs_path: Option<PathBuf>,
    pub max_log_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_bots: usize,
    pub running_bots: usize,
    pub connecting_bots: usize,
    pub stopped_bots: usize,
    pub uptime: u64,
}

struct BotEntry {
    handle: BotHandle,
    join: JoinHandle<()>,
    config: BotConfig,
    log_file: Option<LogFileWriter>,
}

/// Everything one bot has written to its log file, for uptime analysis.
#[derive(Debug, Clone)]
pub struct BotLogHistory {
    pub bot_id: BotId,
    pub name: String,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotLogStats {
    pub bot_id: BotId,
    pub bot_name: String,
    #[serde(flatten)]
    pub file: LogFileStats,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatsSummary {
    pub total_bots: usize,
    pub log_files: Vec<BotLogStats>,
    pub total_size: u64,
    pub total_lines: usize,
}

/// Outcome of clearing every bot's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearedLogs {
    pub cleared: usize,
    pub failed: usize,
}

/// Every bot of this process, keyed by id.
#[derive(Clone)]
pub struct BotRegistry {
    bots: Arc<Mutex<HashMap<BotId, BotEntry>>>,
    save_lock: Arc<Mutex<()>>,
    store: Arc<dyn BotConfigStore>,
    connector: Arc<dyn Connector>,
    broadcaster: Arc<LogBroadcaster>,
    settings: Arc<RegistrySettings>,
    started_at: Instant,
}

impl BotRegistry {
    pub fn new(
        store: Arc<dyn BotConfigStore>,
        connector: Arc<dyn Connector>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            bots: Arc::new(Mutex::new(HashMap::new())),
            save_lock: Arc::new(Mutex::new(())),
            store,
            connector,
            broadcaster: Arc::new(LogBroadcaster::default()),
            settings: Arc::new(settings),
            started_at: Instant::now(),
        }
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<LogEntry>) {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub fn log_subscribers(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn announce(&self, level: LogLevel, bot_id: Option<&str>, message: impl Into<String>) {
        let mut entry = LogEntry::for_manager(level, message);
        entry.bot_id = bot_id.map(str::to_string);
        let bot_id = bot_id.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(bot_id, "{}", entry.message),
            LogLevel::Info => info!(bot_id, "{}", entry.message),
            LogLevel::Warn => warn!(bot_id, "{}", entry.message),
            LogLevel::Error => error!(bot_id, "{}", entry.message),
        }
        self.broadcaster.publish(entry);
    }

    fn spawn_entry(&self, config: BotConfig) -> BotEntry {
        let log_file = self
            .settings
            .logs_path
            .as_ref()
            .map(|dir| {
                LogFileWriter::spawn(BotLogFile::new(
                    dir,
                    &config.id,
                    self.settings.max_log_size,
                ))
            });
        let logger = BotLogger::new(&config.id, log_file.clone(), self.broadcaster.clone());
        let (handle, join) = spawn_bot(
            config.clone(),
            self.connector.clone(),
            logger,
            self.settings.timings,
        );
        BotEntry {
            handle,
            join,
            config,
            log_file,
        }
    }

    fn schedule_autostart(&self, bot_id: BotId, delay: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match registry.start(&bot_id).await {
                Ok(()) => {}
                Err(RegistryError::NotFound) => {
                    debug!(bot_id = %bot_id, "bot deleted before auto-start");
                }
                Err(error) => {
                    warn!(bot_id = %bot_id, error = %error, "auto-start failed");
                }
            }
        });
    }

    /// Write every known config. Writers are serialized so the newest snapshot lands last.
    async fn persist(&self) -> anyhow::Result<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot: StoredBots = {
            let bots = self.bots.lock().await;
            bots.iter()
                .map(|(id, entry)| (id.clone(), entry.config.clone()))
                .collect()
        };
        self.store.save_all(&snapshot).await
    }

    async fn persist_or_warn(&self) -> Option<String> {
        match self.persist().await {
            Ok(()) => None,
            Err(error) => {
                let message = format!("Failed to save bots to storage: {error:#}");
                self.announce(LogLevel::Error, None, message.clone());
                Some(message)
            }
        }
    }

    async fn handle(&self, bot_id: &str) -> Result<(BotHandle, String), RegistryError> {
        let bots = self.bots.lock().await;
        let entry = bots.get(bot_id).ok_or(RegistryError::NotFound)?;
        Ok((entry.handle.clone(), entry.config.name.clone()))
    }

    pub async fn create(&self, request: CreateBotRequest) -> Result<BotConfig, RegistryError> {
        let config = match BotConfig::from_request(
            new_bot_id(),
            request,
            &self.settings.defaults,
            Utc::now(),
        ) {
            Ok(config) => config,
            Err(error) => {
                self.announce(
                    LogLevel::Error,
                    None,
                    format!("Failed to create bot: {error}"),
                );
                return Err(error.into());
            }
        };

        let entry = self.spawn_entry(config.clone());
        self.bots.lock().await.insert(config.id.clone(), entry);
        self.persist_or_warn().await;

        self.announce(
            LogLevel::Info,
            Some(&config.id),
            format!(
                "Bot created: {} ({}:{})",
                config.name, config.host, config.port
            ),
        );
        if config.auto_start {
            self.schedule_autostart(config.id.clone(), self.settings.timings.create_autostart_delay);
        }
        Ok(config)
    }

    /// Remove a bot. Cleanup problems come back as warnings; the bot is gone regardless.
    pub async fn delete(&self, bot_id: &str) -> Result<Vec<String>, RegistryError> {
        let BotEntry {
            handle,
            mut join,
            config,
            log_file,
        } = self
            .bots
            .lock()
            .await
            .remove(bot_id)
            .ok_or(RegistryError::NotFound)?;

        let mut warnings = Vec::new();
        let shutdown_budget = self.settings.timings.close_timeout + Duration::from_secs(1);
        // The task must be gone before its log file is removed, or its last lines recreate it.
        let outcome = tokio::time::timeout(shutdown_budget, async {
            let stopped = handle.shutdown().await;
            let _ = (&mut join).await;
            stopped
        })
        .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warnings.push(format!("Failed to stop bot: {error}")),
            Err(_) => {
                join.abort();
                warnings.push("Timed out stopping bot, task aborted".to_string());
            }
        }

        if let Some(message) = self.persist_or_warn().await {
            warnings.push(message);
        }
        if let Some(log_file) = &log_file
            && let Err(error) = log_file.remove().await
        {
            warnings.push(format!("Failed to remove bot logs: {error:#}"));
        }

        for warning in &warnings {
            self.announce(LogLevel::Warn, Some(bot_id), warning.clone());
        }
        self.announce(
            LogLevel::Info,
            Some(bot_id),
            format!("Bot deleted: {}", config.name),
        );
        Ok(warnings)
    }

    pub async fn start(&self, bot_id: &str) -> Result<(), RegistryError> {
        let (handle, name) = self.handle(bot_id).await?;
        match handle.start().await {
            Ok(()) => {
                self.announce(LogLevel::Info, Some(bot_id), format!("Bot started: {name}"));
                Ok(())
            }
            Err(error) => {
                self.announce(
                    LogLevel::Error,
                    Some(bot_id),
                    format!("Failed to start bot: {error}"),
                );
                Err(error.into())
            }
        }
    }

    pub async fn stop(&self, bot_id: &str) -> Result<(), RegistryError> {
        let (handle, name) = self.handle(bot_id).await?;
        handle.stop().await?;
        self.announce(LogLevel::Info, Some(bot_id), format!("Bot stopped: {name}"));
        Ok(())
    }

    pub async fn kill(&self, bot_id: &str) -> Result<(), RegistryError> {
        let (handle, name) = self.handle(bot_id).await?;
        handle.kill().await?;
        self.announce(LogLevel::Warn, Some(bot_id), format!("Bot killed: {name}"));
        Ok(())
    }

    pub async fn restart(&self, bot_id: &str) -> Result<(), RegistryError> {
        let (handle, name) = self.handle(bot_id).await?;
        self.announce(LogLevel::Info, Some(bot_id), format!("Restarting bot: {name}"));
        if let Err(error) = handle.restart().await {
            self.announce(
                LogLevel::Error,
                Some(bot_id),
                format!("Failed to restart bot: {error}"),
            );
            return Err(error.into());
        }
        Ok(())
    }

    pub async fn manual_move(
        &self,
        bot_id: &str,
        position: Position,
    ) -> Result<Position, RegistryError> {
        let (handle, _) = self.handle(bot_id).await?;
        Ok(handle.manual_move(position).await?)
    }

    pub async fn toggle_idle_activity(&self, bot_id: &str) -> Result<bool, RegistryError> {
        let (handle, _) = self.handle(bot_id).await?;
        Ok(handle.toggle_idle_activity().await?)
    }

    pub async fn get(&self, bot_id: &str) -> Result<BotSnapshot, RegistryError> {
        let (handle, _) = self.handle(bot_id).await?;
        handle.snapshot().await.map_err(|error| match error {
            BotError::Gone => RegistryError::NotFound,
            other => other.into(),
        })
    }

    /// Snapshots of every bot, oldest first.
    pub async fn list(&self) -> Vec<BotSnapshot> {
        let handles: Vec<BotHandle> = {
            let bots = self.bots.lock().await;
            bots.values().map(|entry| entry.handle.clone()).collect()
        };

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.snapshot().await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(error) => debug!(bot_id = %handle.id(), error = %error, "skipping bot in listing"),
            }
        }
        snapshots.sort_by(|left, right| {
            left.config
                .created_at
                .cmp(&right.config.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        snapshots
    }

    /// Merge, validate and persist a config change. A running connection is left alone.
    pub async fn update(
        &self,
        bot_id: &str,
        patch: BotConfigPatch,
    ) -> Result<BotConfig, RegistryError> {
        let updated = {
            let mut bots = self.bots.lock().await;
            let entry = bots.get_mut(bot_id).ok_or(RegistryError::NotFound)?;
            let updated = entry.config.patched(patch)?;
            entry.handle.update_config(updated.clone())?;
            entry.config = updated.clone();
            updated
        };
        self.persist_or_warn().await;
        self.announce(
            LogLevel::Info,
            Some(bot_id),
            format!("Bot config updated: {}", updated.name),
        );
        Ok(updated)
    }

    pub async fn recent_logs(
        &self,
        bot_id: &str,
        max_lines: usize,
    ) -> Result<Vec<LogEntry>, RegistryError> {
        let log_file = self.log_file(bot_id).await?;
        match log_file {
            Some(file) => file
                .recent(max_lines)
                .await
                .map_err(|error| RegistryError::Storage(format!("{error:#}"))),
            None => Ok(Vec::new()),
        }
    }

    pub async fn clear_logs(&self, bot_id: &str) -> Result<(), RegistryError> {
        if let Some(file) = self.log_file(bot_id).await? {
            file.clear()
                .await
                .map_err(|error| RegistryError::Storage(format!("Failed to clear logs: {error:#}")))?;
        }
        Ok(())
    }

    async fn log_file(&self, bot_id: &str) -> Result<Option<LogFileWriter>, RegistryError> {
        let bots = self.bots.lock().await;
        let entry = bots.get(bot_id).ok_or(RegistryError::NotFound)?;
        Ok(entry.log_file.clone())
    }

    /// Id, name and log writer of every bot, oldest first.
    async fn log_files(&self) -> Vec<(BotId, String, Option<LogFileWriter>)> {
        let bots = self.bots.lock().await;
        let mut files: Vec<_> = bots
            .iter()
            .map(|(id, entry)| {
                (
                    entry.config.created_at,
                    id.clone(),
                    entry.config.name.clone(),
                    entry.log_file.clone(),
                )
            })
            .collect();
        files.sort_by(|left, right| left.0.cmp(&right.0).then_with(|| left.1.cmp(&right.1)));
        files
            .into_iter()
            .map(|(_, id, name, file)| (id, name, file))
            .collect()
    }

    /// Newest `max_lines` entries across every bot, newest first. Unreadable files
    /// show up as error entries rather than failing the whole listing.
    pub async fn recent_logs_all(&self, max_lines: usize) -> Vec<LogEntry> {
        let per_bot = max_lines.min(RECENT_LINES_PER_BOT);
        let files = self.log_files().await;
        let mut entries = Vec::new();
        for (id, name, file) in &files {
            let Some(file) = file else {
                continue;
            };
            match file.recent(per_bot).await {
                Ok(mut recent) => {
                    for entry in &mut recent {
                        entry.bot_id.get_or_insert_with(|| id.clone());
                    }
                    entries.extend(recent);
                }
                Err(error) => {
                    let mut entry = LogEntry::for_manager(
                        LogLevel::Error,
                        format!("Failed to read logs for {name}: {error:#}"),
                    );
                    entry.bot_id = Some(id.clone());
                    entries.push(entry);
                }
            }
        }
        entries.push(LogEntry::system(format!(
            "System status: {} bots configured",
            files.len()
        )));
        entries.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        entries.truncate(max_lines);
        entries
    }

    pub async fn log_stats(&self) -> LogStatsSummary {
        let files = self.log_files().await;
        let mut summary = LogStatsSummary {
            total_bots: files.len(),
            ..LogStatsSummary::default()
        };
        for (id, name, file) in files {
            let stats = match &file {
                Some(file) => file.stats().await.unwrap_or_else(|error| {
                    warn!(bot_id = %id, error = %format!("{error:#}"), "failed to read log stats");
                    LogFileStats::default()
                }),
                None => LogFileStats::default(),
            };
            summary.total_size += stats.size;
            summary.total_lines += stats.lines;
            summary.log_files.push(BotLogStats {
                bot_id: id,
                bot_name: name,
                file: stats,
            });
        }
        summary
    }

    pub async fn clear_all_logs(&self) -> ClearedLogs {
        let mut outcome = ClearedLogs {
            cleared: 0,
            failed: 0,
        };
        for (id, _, file) in self.log_files().await {
            let Some(file) = file else {
                outcome.cleared += 1;
                continue;
            };
            match file.clear().await {
                Ok(()) => outcome.cleared += 1,
                Err(error) => {
                    warn!(bot_id = %id, error = %format!("{error:#}"), "failed to clear bot log");
                    outcome.failed += 1;
                }
            }
        }
        self.announce(
            LogLevel::Info,
            None,
            format!("Logs cleared for {} bots", outcome.cleared),
        );
        outcome
    }

    /// Full log history of every bot, oldest bot first.
    pub async fn log_histories(&self) -> Vec<BotLogHistory> {
        let mut histories = Vec::new();
        for (bot_id, name, file) in self.log_files().await {
            let entries = match &file {
                Some(file) => file.recent(usize::MAX).await.unwrap_or_else(|error| {
                    warn!(bot_id = %bot_id, error = %format!("{error:#}"), "failed to read bot log");
                    Vec::new()
                }),
                None => Vec::new(),
            };
            histories.push(BotLogHistory {
                bot_id,
                name,
                entries,
            });
        }
        histories
    }

    pub async fn stats(&self) -> RegistryStats {
        let snapshots = self.list().await;
        let running_bots = snapshots.iter().filter(|bot| bot.connected).count();
        let connecting_bots = snapshots.iter().filter(|bot| bot.connecting).count();
        RegistryStats {
            total_bots: snapshots.len(),
            running_bots,
            connecting_bots,
            stopped_bots: snapshots.len() - running_bots,
            uptime: self.started_at.elapsed().as_secs(),
        }
    }

    /// Register every stored bot and schedule auto-start for those that ask for it.
    pub async fn load_from_store(&self) -> anyhow::Result<usize> {
        let stored = self.store.load_all().await?;
        let mut autostart = Vec::new();
        {
            let mut bots = self.bots.lock().await;
            for (id, config) in stored {
                if let Err(error) = config.validate() {
                    warn!(bot_id = %id, error = %error, "stored bot config is invalid, it will not connect until fixed");
                }
                if config.auto_start {
                    autostart.push(id.clone());
                }
                if let Some(previous) = bots.insert(id.clone(), self.spawn_entry(config)) {
                    previous.join.abort();
                }
            }
        }

        let loaded = self.bots.lock().await.len();
        self.announce(
            LogLevel::Info,
            None,
            format!("Loaded {loaded} bots from storage"),
        );
        for id in autostart {
            self.schedule_autostart(id, self.settings.timings.load_autostart_delay);
        }
        Ok(loaded)
    }

    /// Stop every bot and end their tasks.
    pub async fn shutdown(&self) {
        self.announce(LogLevel::Warn, None, "Shutting down all bots...");
        let entries: Vec<BotEntry> = {
            let mut bots = self.bots.lock().await;
            bots.drain().map(|(_, entry)| entry).collect()
        };

        let mut tasks = JoinSet::new();
        for entry in entries {
            tasks.spawn(async move {
                if let Err(error) = entry.handle.shutdown().await {
                    warn!(bot_id = %entry.handle.id(), error = %error, "bot did not shut down cleanly");
                }
                let _ = entry.join.await;
            });
        }
        while tasks.join_next().await.is_some() {}
        self.announce(LogLevel::Info, None, "All bots shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bot::{
            Phase,
            test_support::{CloseBehavior, ScriptedConnector},
        },
        connection::ConnectionEvent,
    };
    use async_trait::async_trait;
    use keepalive_common::{EntityId, IdleActivityPatch, PortInput};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryStore {
        initial: StoredBots,
        saves: StdMutex<Vec<StoredBots>>,
        fail_saves: bool,
    }

    impl MemoryStore {
        fn last_saved(&self) -> Option<StoredBots> {
            self.saves.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl BotConfigStore for MemoryStore {
        async fn load_all(&self) -> anyhow::Result<StoredBots> {
            Ok(self.initial.clone())
        }

        async fn save_all(&self, bots: &StoredBots) -> anyhow::Result<()> {
            if self.fail_saves {
                anyhow::bail!("disk full");
            }
            self.saves.lock().unwrap().push(bots.clone());
            Ok(())
        }
    }

    fn settings(logs_path: Option<PathBuf>) -> RegistrySettings {
        RegistrySettings {
            defaults: BotDefaults::default(),
            timings: LifecycleTimings::default(),
            logs_path,
            max_log_size: 1024 * 1024,
        }
    }

    fn registry_with(
        store: Arc<MemoryStore>,
        connector: ScriptedConnector,
        logs_path: Option<PathBuf>,
    ) -> BotRegistry {
        BotRegistry::new(store, Arc::new(connector), settings(logs_path))
    }

    fn request(host: &str, port: PortInput, username: &str) -> CreateBotRequest {
        CreateBotRequest {
            host: Some(host.to_string()),
            port: Some(port),
            username: Some(username.to_string()),
            ..CreateBotRequest::default()
        }
    }

    fn valid_request() -> CreateBotRequest {
        request("play.example.com", PortInput::Number(19132), "Bot1")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn create_rejects_invalid_config_without_side_effects() {
        let store = Arc::new(MemoryStore::default());
        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(store.clone(), connector, None);

        let bad_port = registry
            .create(request("play.example.com", PortInput::Number(99999), "Bot1"))
            .await;
        assert!(matches!(
            bad_port,
            Err(RegistryError::InvalidConfig(ConfigError::InvalidPort(_)))
        ));
        let empty_host = registry
            .create(request("", PortInput::Number(19132), "Bot1"))
            .await;
        assert!(matches!(
            empty_host,
            Err(RegistryError::InvalidConfig(ConfigError::MissingRequired))
        ));

        assert!(registry.list().await.is_empty());
        assert!(store.last_saved().is_none());
        assert_eq!(log.attempts(), 0);
    }

    #[tokio::test]
    async fn create_persists_full_config() {
        let store = Arc::new(MemoryStore::default());
        let registry = registry_with(store.clone(), ScriptedConnector::new(), None);

        let config = registry.create(valid_request()).await.unwrap();
        let saved = store.last_saved().unwrap();
        assert_eq!(saved.get(&config.id), Some(&config));

        let snapshot = registry.get(&config.id).await.unwrap();
        assert_eq!(snapshot.id, config.id);
        assert!(!snapshot.connected);
        assert_eq!(snapshot.status.phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn create_with_auto_start_connects_after_delay() {
        let store = Arc::new(MemoryStore::default());
        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(store, connector, None);

        let mut request = valid_request();
        request.auto_start = Some(true);
        let config = registry.create(request).await.unwrap();
        settle().await;
        assert_eq!(log.attempts(), 0);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(log.attempts(), 1);
        assert!(registry.get(&config.id).await.unwrap().connecting);
    }

    #[tokio::test]
    async fn delete_removes_entry_persists_and_cleans_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(store.clone(), connector, Some(dir.path().to_path_buf()));

        let config = registry.create(valid_request()).await.unwrap();
        registry.start(&config.id).await.unwrap();
        log.emit(ConnectionEvent::Spawn);
        settle().await;
        let log_path = dir.path().join(format!("bot-{}.log", config.id));
        assert!(!registry.recent_logs(&config.id, 10).await.unwrap().is_empty());
        assert!(log_path.exists());

        let warnings = registry.delete(&config.id).await.unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(registry.get(&config.id).await, Err(RegistryError::NotFound));
        assert!(store.last_saved().unwrap().is_empty());
        assert!(!log_path.exists());
        assert_eq!(*log.closes.lock().unwrap(), 1);

        assert_eq!(
            registry.delete(&config.id).await,
            Err(RegistryError::NotFound)
        );
    }

    #[tokio::test]
    async fn delete_reports_storage_failure_but_still_removes() {
        let store = Arc::new(MemoryStore {
            fail_saves: true,
            ..MemoryStore::default()
        });
        let registry = registry_with(store, ScriptedConnector::new(), None);
        let config = registry.create(valid_request()).await.unwrap();

        let warnings = registry.delete(&config.id).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("disk full"));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn update_merges_validates_and_persists_without_restart() {
        let store = Arc::new(MemoryStore::default());
        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(store.clone(), connector, None);
        let config = registry.create(valid_request()).await.unwrap();
        registry.start(&config.id).await.unwrap();

        let updated = registry
            .update(
                &config.id,
                BotConfigPatch {
                    name: Some("Night shift".to_string()),
                    anti_afk: Some(IdleActivityPatch {
                        interval: Some(15_000),
                        ..IdleActivityPatch::default()
                    }),
                    ..BotConfigPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Night shift");
        assert_eq!(updated.anti_afk.interval, 15_000);
        assert_eq!(
            store.last_saved().unwrap().get(&config.id).unwrap().name,
            "Night shift"
        );
        let snapshot = registry.get(&config.id).await.unwrap();
        assert_eq!(snapshot.config.name, "Night shift");
        assert_eq!(log.attempts(), 1);

        let rejected = registry
            .update(
                &config.id,
                BotConfigPatch {
                    port: Some(PortInput::Number(70000)),
                    ..BotConfigPatch::default()
                },
            )
            .await;
        assert!(matches!(rejected, Err(RegistryError::InvalidConfig(_))));
        assert_eq!(registry.get(&config.id).await.unwrap().config.port, 19132);
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let store = Arc::new(MemoryStore::default());
        let registry = registry_with(store, ScriptedConnector::new(), None);
        let mut created = Vec::new();
        for name in ["first", "second", "third"] {
            let mut request = valid_request();
            request.name = Some(name.to_string());
            created.push(registry.create(request).await.unwrap().id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let listed: Vec<String> = registry.list().await.into_iter().map(|bot| bot.id).collect();
        assert_eq!(listed, created);
    }

    #[tokio::test]
    async fn operations_on_unknown_bot_are_not_found() {
        let registry = registry_with(
            Arc::new(MemoryStore::default()),
            ScriptedConnector::new(),
            None,
        );
        assert_eq!(registry.start("nope").await, Err(RegistryError::NotFound));
        assert_eq!(registry.stop("nope").await, Err(RegistryError::NotFound));
        assert_eq!(registry.kill("nope").await, Err(RegistryError::NotFound));
        assert_eq!(
            registry
                .manual_move("nope", Position::new(0.0, 0.0, 0.0))
                .await,
            Err(RegistryError::NotFound)
        );
    }

    #[tokio::test]
    async fn manual_move_before_spawn_is_not_ready() {
        let registry = registry_with(
            Arc::new(MemoryStore::default()),
            ScriptedConnector::new(),
            None,
        );
        let config = registry.create(valid_request()).await.unwrap();
        assert_eq!(
            registry
                .manual_move(&config.id, Position::new(1.0, 64.0, 1.0))
                .await,
            Err(RegistryError::Bot(BotError::NotReady))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn load_registers_stored_bots_and_autostarts() {
        let mut initial = StoredBots::new();
        let mut first = BotConfig::from_request(
            new_bot_id(),
            valid_request(),
            &BotDefaults::default(),
            Utc::now(),
        )
        .unwrap();
        first.auto_start = true;
        let second = BotConfig::from_request(
            new_bot_id(),
            valid_request(),
            &BotDefaults::default(),
            Utc::now(),
        )
        .unwrap();
        initial.insert(first.id.clone(), first.clone());
        initial.insert(second.id.clone(), second.clone());

        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(
            Arc::new(MemoryStore {
                initial,
                ..MemoryStore::default()
            }),
            connector,
            None,
        );

        assert_eq!(registry.load_from_store().await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        settle().await;
        assert_eq!(log.attempts(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        assert_eq!(log.attempts(), 1);
        assert!(registry.get(&first.id).await.unwrap().connecting);
        assert!(!registry.get(&second.id).await.unwrap().connecting);
    }

    #[tokio::test]
    async fn stats_count_running_and_stopped() {
        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(Arc::new(MemoryStore::default()), connector, None);
        let running = registry.create(valid_request()).await.unwrap();
        registry.create(valid_request()).await.unwrap();

        registry.start(&running.id).await.unwrap();
        log.emit(ConnectionEvent::StartGame {
            runtime_entity_id: Some(EntityId(5)),
            entity_unique_id: None,
        });
        log.emit(ConnectionEvent::Spawn);
        settle().await;

        let stats = registry.stats().await;
        assert_eq!(stats.total_bots, 2);
        assert_eq!(stats.running_bots, 1);
        assert_eq!(stats.stopped_bots, 1);
        assert_eq!(stats.connecting_bots, 0);
    }

    #[tokio::test]
    async fn subscribers_receive_bot_and_manager_lines_in_order() {
        let registry = registry_with(
            Arc::new(MemoryStore::default()),
            ScriptedConnector::new(),
            None,
        );
        let (subscription, mut rx) = registry.subscribe();
        let config = registry.create(valid_request()).await.unwrap();
        registry.start(&config.id).await.unwrap();

        let mut messages = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            messages.push(entry.message);
        }
        let created = messages
            .iter()
            .position(|message| message.starts_with("Bot created"))
            .unwrap();
        let connecting = messages
            .iter()
            .position(|message| message.starts_with("Connecting to play.example.com:19132"))
            .unwrap();
        let started = messages
            .iter()
            .position(|message| message.starts_with("Bot started"))
            .unwrap();
        assert!(created < connecting && connecting < started);

        assert!(registry.unsubscribe(subscription));
    }

    #[tokio::test]
    async fn shutdown_stops_every_bot() {
        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(Arc::new(MemoryStore::default()), connector, None);
        for _ in 0..3 {
            let config = registry.create(valid_request()).await.unwrap();
            registry.start(&config.id).await.unwrap();
        }
        registry.shutdown().await;
        assert!(registry.list().await.is_empty());
        assert_eq!(*log.closes.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn list_is_not_held_up_by_a_pending_graceful_close() {
        let mut connector = ScriptedConnector::new();
        connector.close_behavior = CloseBehavior::Hang;
        let log = connector.log.clone();
        let registry = registry_with(Arc::new(MemoryStore::default()), connector, None);
        let stopping_bot = registry.create(valid_request()).await.unwrap();
        registry.create(valid_request()).await.unwrap();
        registry.start(&stopping_bot.id).await.unwrap();
        log.emit(ConnectionEvent::Spawn);
        settle().await;

        let stopping = tokio::spawn({
            let registry = registry.clone();
            let bot_id = stopping_bot.id.clone();
            async move { registry.stop(&bot_id).await }
        });
        settle().await;

        let began = Instant::now();
        let listed = registry.list().await;
        let stats = registry.stats().await;
        assert!(began.elapsed() < Duration::from_secs(1));
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|bot| bot.status.phase == Phase::Idle));
        assert_eq!(stats.running_bots, 0);
        assert!(!stopping.is_finished());

        stopping.await.unwrap().unwrap();
        assert_eq!(*log.destroys.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn cross_bot_log_views_cover_every_bot() {
        let dir = tempfile::tempdir().unwrap();
        let connector = ScriptedConnector::new();
        let log = connector.log.clone();
        let registry = registry_with(
            Arc::new(MemoryStore::default()),
            connector,
            Some(dir.path().to_path_buf()),
        );
        let mut first_request = valid_request();
        first_request.name = Some("Alpha".to_string());
        let first = registry.create(first_request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = registry.create(valid_request()).await.unwrap();
        registry.start(&first.id).await.unwrap();
        log.emit(ConnectionEvent::Spawn);
        settle().await;

        let recent = registry.recent_logs_all(100).await;
        assert!(recent.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
        assert!(recent.iter().any(|entry| entry.message == "Bot spawned successfully!"
            && entry.bot_id.as_deref() == Some(first.id.as_str())));
        assert!(recent.iter().any(|entry| entry.message == "System status: 2 bots configured"));
        assert_eq!(registry.recent_logs_all(3).await.len(), 3);

        let stats = registry.log_stats().await;
        assert_eq!(stats.total_bots, 2);
        assert_eq!(stats.log_files[0].bot_name, "Alpha");
        assert!(stats.log_files.iter().all(|file| file.file.exists));
        assert_eq!(
            stats.total_lines,
            stats.log_files.iter().map(|file| file.file.lines).sum::<usize>()
        );

        let histories = registry.log_histories().await;
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].bot_id, first.id);
        assert!(histories[0].entries.len() > histories[1].entries.len());

        let cleared = registry.clear_all_logs().await;
        assert_eq!(cleared, ClearedLogs { cleared: 2, failed: 0 });
        let after = registry.recent_logs(&second.id, 10).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].message, "Logs cleared by user");
    }
}
