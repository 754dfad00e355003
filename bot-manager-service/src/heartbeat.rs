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

use std::{collections::VecDeque, io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use keepalive_common::LogLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::HeartbeatConfig,
    registry::{BotRegistry, RegistryStats},
    store::write_json_atomic,
    uptime::round_to,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FAILURE_LOG_EVERY: u64 = 5;
const HISTORY_LIMIT: usize = 100;
const DEFAULT_INTERVAL_MS: u64 = 60_000;
/// Shortest interval accepted at runtime.
pub const MIN_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HeartbeatError {
    #[error("Heartbeat URL is required")]
    MissingUrl,
    #[error("Invalid heartbeat URL: {0}")]
    InvalidUrl(String),
    #[error("Interval must be at least 30 seconds (30000ms)")]
    IntervalTooShort,
    #[error("Heartbeat monitoring is not configured")]
    NotConfigured,
    #[error("Heartbeat failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatPayload {
    timestamp: DateTime<Utc>,
    system: RegistryStats,
    bots: Vec<HeartbeatBot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBot {
    id: String,
    name: String,
    connected: bool,
    server: String,
    uptime: u64,
}

async fn build_payload(registry: &BotRegistry) -> HeartbeatPayload {
    let bots = registry
        .list()
        .await
        .into_iter()
        .map(|bot| HeartbeatBot {
            id: bot.id.chars().take(8).collect(),
            name: bot.config.name,
            connected: bot.connected,
            server: format!("{}:{}", bot.config.host, bot.config.port),
            uptime: bot.status.uptime,
        })
        .collect();
    HeartbeatPayload {
        timestamp: Utc::now(),
        system: registry.stats().await,
        bots,
    }
}

async fn send_heartbeat(
    client: &reqwest::Client,
    url: &str,
    registry: &BotRegistry,
) -> anyhow::Result<u16> {
    let payload = build_payload(registry).await;
    let response = client
        .post(url)
        .timeout(REQUEST_TIMEOUT)
        .json(&payload)
        .send()
        .await
        .context("heartbeat request failed")?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {status}");
    }
    Ok(status.as_u16())
}

fn validate_url(raw: &str) -> Result<String, HeartbeatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HeartbeatError::MissingUrl);
    }
    let url =
        reqwest::Url::parse(raw).map_err(|error| HeartbeatError::InvalidUrl(error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HeartbeatError::InvalidUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(url.to_string())
}

/// Saved between restarts next to the bot configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MonitorSettings {
    enabled: bool,
    heartbeat_url: Option<String>,
    interval_ms: u64,
    last_heartbeat: Option<DateTime<Utc>>,
    total_heartbeats: u64,
    failed_heartbeats: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_url: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            last_heartbeat: None,
            total_heartbeats: 0,
            failed_heartbeats: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStatus {
    pub enabled: bool,
    pub active: bool,
    /// Masked; the URL itself carries the monitor's secret.
    pub heartbeat_url: Option<&'static str>,
    pub interval: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub statistics: HeartbeatStatistics,
    pub next_heartbeat: Option<DateTime<Utc>>,
}

struct MonitorState {
    settings: MonitorSettings,
    history: VecDeque<HeartbeatRecord>,
    worker: Option<HeartbeatWorker>,
}

/// Runtime-managed heartbeat to an external uptime monitor.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    state: Arc<Mutex<MonitorState>>,
    save_lock: Arc<Mutex<()>>,
    registry: BotRegistry,
    client: reqwest::Client,
    settings_path: Option<PathBuf>,
}

impl HeartbeatMonitor {
    /// `settings_path` of `None` keeps the monitor settings in memory only.
    pub fn new(registry: BotRegistry, settings_path: Option<PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                settings: MonitorSettings::default(),
                history: VecDeque::new(),
                worker: None,
            })),
            save_lock: Arc::new(Mutex::new(())),
            registry,
            client: reqwest::Client::new(),
            settings_path,
        }
    }

    /// Restore saved settings, let the environment override them, and start beating when enabled.
    pub async fn initialize(&self, env: &HeartbeatConfig) {
        let mut settings = self.load_settings().await;
        if let Some(url) = &env.url {
            settings.enabled = true;
            settings.heartbeat_url = Some(url.clone());
            settings.interval_ms = env.interval.max(Duration::from_secs(1)).as_millis() as u64;
            self.registry.announce(
                LogLevel::Info,
                None,
                "Heartbeat monitor configured from environment",
            );
        }
        let configured = settings.enabled && settings.heartbeat_url.is_some();
        self.state.lock().await.settings = settings;
        if env.url.is_some() {
            self.persist().await;
        }
        if configured {
            self.restart_worker().await;
        }
    }

    async fn load_settings(&self) -> MonitorSettings {
        let Some(path) = &self.settings_path else {
            return MonitorSettings::default();
        };
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                warn!(path = %path.display(), error = %error, "ignoring unreadable heartbeat settings");
                MonitorSettings::default()
            }),
            Err(error) if error.kind() == ErrorKind::NotFound => MonitorSettings::default(),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to read heartbeat settings");
                MonitorSettings::default()
            }
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.settings_path else {
            return;
        };
        let _guard = self.save_lock.lock().await;
        let settings = self.state.lock().await.settings.clone();
        if let Err(error) = write_json_atomic(path, &settings).await {
            warn!(error = %format!("{error:#}"), "failed to save heartbeat settings");
        }
    }

    /// Replace the running worker with one for the current settings, if enabled.
    async fn restart_worker(&self) {
        let previous = self.state.lock().await.worker.take();
        if let Some(worker) = previous {
            worker.stop().await;
        }

        let mut state = self.state.lock().await;
        if let Some(stale) = state.worker.take() {
            stale.abort();
        }
        if !state.settings.enabled {
            return;
        }
        let Some(url) = state.settings.heartbeat_url.clone() else {
            return;
        };
        let period = Duration::from_millis(state.settings.interval_ms).max(Duration::from_secs(1));
        state.worker = Some(HeartbeatWorker::spawn(self.clone(), url, period));
        drop(state);
        self.registry.announce(
            LogLevel::Info,
            None,
            format!("Heartbeat started ({}s interval)", period.as_secs()),
        );
    }

    async fn stop_worker(&self) -> bool {
        let worker = self.state.lock().await.worker.take();
        match worker {
            Some(worker) => {
                worker.stop().await;
                true
            }
            None => false,
        }
    }

    /// One heartbeat to `url`, recorded in the statistics and history.
    async fn beat(&self, url: &str) -> Result<u16, String> {
        let started = Instant::now();
        let outcome = send_heartbeat(&self.client, url, &self.registry)
            .await
            .map_err(|error| format!("{error:#}"));
        let record = HeartbeatRecord {
            timestamp: Utc::now(),
            success: outcome.is_ok(),
            status_code: outcome.as_ref().ok().copied(),
            response_time_ms: outcome
                .is_ok()
                .then(|| started.elapsed().as_millis() as u64),
            error: outcome.as_ref().err().cloned(),
        };

        let failed = {
            let mut state = self.state.lock().await;
            state.settings.total_heartbeats += 1;
            if record.success {
                state.settings.last_heartbeat = Some(record.timestamp);
            } else {
                state.settings.failed_heartbeats += 1;
            }
            state.history.push_back(record);
            while state.history.len() > HISTORY_LIMIT {
                state.history.pop_front();
            }
            state.settings.failed_heartbeats
        };

        match &outcome {
            Ok(status) => debug!(status, "heartbeat delivered"),
            Err(error) => {
                if failed == 1 || failed % FAILURE_LOG_EVERY == 0 {
                    self.registry.announce(
                        LogLevel::Warn,
                        None,
                        format!("Heartbeat failed ({failed} failures so far): {error}"),
                    );
                }
            }
        }
        self.persist().await;
        outcome
    }

    pub async fn status(&self) -> HeartbeatStatus {
        let state = self.state.lock().await;
        let settings = &state.settings;
        let active = state.worker.is_some();
        let successful = settings
            .total_heartbeats
            .saturating_sub(settings.failed_heartbeats);
        let success_rate = if settings.total_heartbeats == 0 {
            0.0
        } else {
            round_to(
                successful as f64 / settings.total_heartbeats as f64 * 100.0,
                1,
            )
        };
        HeartbeatStatus {
            enabled: settings.enabled,
            active,
            heartbeat_url: settings
                .heartbeat_url
                .as_ref()
                .map(|_| "***configured***"),
            interval: settings.interval_ms,
            last_heartbeat: settings.last_heartbeat,
            statistics: HeartbeatStatistics {
                total_requests: settings.total_heartbeats,
                successful_requests: successful,
                failed_requests: settings.failed_heartbeats,
                success_rate,
            },
            next_heartbeat: match (active, settings.last_heartbeat) {
                (true, Some(last)) => {
                    Some(last + chrono::Duration::milliseconds(settings.interval_ms as i64))
                }
                _ => None,
            },
        }
    }

    /// Check `url` with a live heartbeat, then keep beating to it.
    pub async fn setup(
        &self,
        url: &str,
        interval_ms: Option<u64>,
    ) -> Result<HeartbeatStatus, HeartbeatError> {
        let url = validate_url(url)?;
        if let Err(error) = self.beat(&url).await {
            self.registry.announce(
                LogLevel::Error,
                None,
                format!("Heartbeat setup failed: {error}"),
            );
            return Err(HeartbeatError::Delivery(error));
        }

        {
            let mut state = self.state.lock().await;
            state.settings.enabled = true;
            state.settings.heartbeat_url = Some(url);
            if let Some(interval_ms) = interval_ms.filter(|ms| *ms >= MIN_INTERVAL_MS) {
                state.settings.interval_ms = interval_ms;
            }
        }
        self.persist().await;
        self.restart_worker().await;
        self.registry
            .announce(LogLevel::Info, None, "Heartbeat monitoring enabled");
        Ok(self.status().await)
    }

    pub async fn disable(&self) {
        self.stop_worker().await;
        self.state.lock().await.settings.enabled = false;
        self.persist().await;
        self.registry
            .announce(LogLevel::Warn, None, "Heartbeat monitoring disabled");
    }

    pub async fn update_interval(&self, interval_ms: u64) -> Result<HeartbeatStatus, HeartbeatError> {
        if interval_ms < MIN_INTERVAL_MS {
            return Err(HeartbeatError::IntervalTooShort);
        }
        let running = {
            let mut state = self.state.lock().await;
            state.settings.interval_ms = interval_ms;
            state.worker.is_some()
        };
        self.persist().await;
        if running {
            self.restart_worker().await;
        }
        self.registry.announce(
            LogLevel::Info,
            None,
            format!("Heartbeat interval updated to {}s", interval_ms / 1_000),
        );
        Ok(self.status().await)
    }

    /// Send one heartbeat now to the configured URL.
    pub async fn send_test(&self) -> Result<u16, HeartbeatError> {
        let url = {
            let state = self.state.lock().await;
            match (&state.settings.heartbeat_url, state.settings.enabled) {
                (Some(url), true) => url.clone(),
                _ => return Err(HeartbeatError::NotConfigured),
            }
        };
        let status = self.beat(&url).await.map_err(HeartbeatError::Delivery)?;
        self.registry
            .announce(LogLevel::Info, None, "Heartbeat test successful");
        Ok(status)
    }

    /// Recorded heartbeats, oldest first.
    pub async fn history(&self) -> Vec<HeartbeatRecord> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    pub async fn shutdown(&self) {
        if self.stop_worker().await {
            info!("heartbeat monitor stopped");
        }
    }
}

/// Background task beating at a fixed period until stopped.
struct HeartbeatWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl HeartbeatWorker {
    fn spawn(monitor: HeartbeatMonitor, url: String, period: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_heartbeat(monitor, url, period, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            join,
        }
    }

    async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if tokio::time::timeout(REQUEST_TIMEOUT, &mut self.join)
            .await
            .is_err()
        {
            self.join.abort();
        }
    }

    fn abort(self) {
        self.join.abort();
    }
}

async fn run_heartbeat(
    monitor: HeartbeatMonitor,
    url: String,
    period: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let _ = monitor.beat(&url).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bot::test_support::ScriptedConnector,
        config::LifecycleTimings,
        registry::RegistrySettings,
        store::{BotConfigStore, StoredBots},
    };
    use async_trait::async_trait;
    use axum::{Json, Router, extract::State, routing::post};
    use keepalive_common::{BotDefaults, CreateBotRequest, PortInput};
    use std::{net::SocketAddr, sync::Mutex as StdMutex};

    struct NoopStore;

    #[async_trait]
    impl BotConfigStore for NoopStore {
        async fn load_all(&self) -> anyhow::Result<StoredBots> {
            Ok(StoredBots::new())
        }

        async fn save_all(&self, _bots: &StoredBots) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry() -> BotRegistry {
        BotRegistry::new(
            Arc::new(NoopStore),
            Arc::new(ScriptedConnector::new()),
            RegistrySettings {
                defaults: BotDefaults::default(),
                timings: LifecycleTimings::default(),
                logs_path: None,
                max_log_size: 1024,
            },
        )
    }

    type Received = Arc<StdMutex<Vec<serde_json::Value>>>;

    async fn record(State(received): State<Received>, Json(body): Json<serde_json::Value>) {
        received.lock().unwrap().push(body);
    }

    async fn receiver() -> (String, Received) {
        let received: Received = Arc::new(StdMutex::new(Vec::new()));
        let app = Router::new()
            .route("/beat", post(record))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/beat"), received)
    }

    /// An address nothing listens on.
    async fn dead_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/beat")
    }

    #[tokio::test]
    async fn payload_summarizes_registry() {
        let registry = registry();
        registry
            .create(CreateBotRequest {
                name: Some("Keeper".to_string()),
                host: Some("play.example.com".to_string()),
                port: Some(PortInput::Number(19133)),
                username: Some("Keeper".to_string()),
                ..CreateBotRequest::default()
            })
            .await
            .unwrap();

        let payload = serde_json::to_value(build_payload(&registry).await).unwrap();
        assert_eq!(payload["system"]["totalBots"], 1);
        assert_eq!(payload["system"]["stoppedBots"], 1);
        assert_eq!(payload["bots"][0]["name"], "Keeper");
        assert_eq!(payload["bots"][0]["server"], "play.example.com:19133");
        assert_eq!(payload["bots"][0]["connected"], false);
        assert_eq!(payload["bots"][0]["id"].as_str().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn setup_beats_records_history_and_disable_stops() {
        let (url, received) = receiver().await;
        let monitor = HeartbeatMonitor::new(registry(), None);

        let status = monitor.setup(&url, Some(45_000)).await.unwrap();
        assert!(status.enabled);
        assert!(status.active);
        assert_eq!(status.interval, 45_000);
        assert_eq!(status.heartbeat_url, Some("***configured***"));
        assert!(status.statistics.total_requests >= 1);
        assert_eq!(status.statistics.failed_requests, 0);
        assert!(status.next_heartbeat.is_some());

        let history = monitor.history().await;
        assert!(history[0].success);
        assert_eq!(history[0].status_code, Some(200));
        assert!(history[0].response_time_ms.is_some());
        assert_eq!(received.lock().unwrap()[0]["system"]["totalBots"], 0);

        assert_eq!(monitor.send_test().await, Ok(200));

        monitor.disable().await;
        let status = monitor.status().await;
        assert!(!status.enabled);
        assert!(!status.active);
        assert_eq!(monitor.send_test().await, Err(HeartbeatError::NotConfigured));
    }

    #[tokio::test]
    async fn setup_rejects_bad_urls_and_unreachable_monitors() {
        let monitor = HeartbeatMonitor::new(registry(), None);
        assert_eq!(monitor.setup("  ", None).await, Err(HeartbeatError::MissingUrl));
        assert!(matches!(
            monitor.setup("not a url", None).await,
            Err(HeartbeatError::InvalidUrl(_))
        ));
        assert!(matches!(
            monitor.setup("ftp://example.com/beat", None).await,
            Err(HeartbeatError::InvalidUrl(_))
        ));

        let result = monitor.setup(&dead_url().await, None).await;
        assert!(matches!(result, Err(HeartbeatError::Delivery(_))));
        let status = monitor.status().await;
        assert!(!status.enabled);
        assert!(!status.active);
        assert_eq!(status.statistics.failed_requests, 1);
        assert_eq!(status.statistics.success_rate, 0.0);
        let history = monitor.history().await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert!(history[0].error.is_some());
    }

    #[tokio::test]
    async fn interval_updates_enforce_the_minimum() {
        let monitor = HeartbeatMonitor::new(registry(), None);
        assert_eq!(
            monitor.update_interval(MIN_INTERVAL_MS - 1).await,
            Err(HeartbeatError::IntervalTooShort)
        );
        let status = monitor.update_interval(90_000).await.unwrap();
        assert_eq!(status.interval, 90_000);
        assert!(!status.active);
    }

    #[tokio::test]
    async fn worker_keeps_beating_until_shutdown() {
        let (url, received) = receiver().await;
        let monitor = HeartbeatMonitor::new(registry(), None);
        monitor
            .initialize(&HeartbeatConfig {
                url: Some(url),
                interval: Duration::from_secs(1),
            })
            .await;
        assert!(monitor.status().await.active);

        for _ in 0..100 {
            if received.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        monitor.shutdown().await;
        assert!(received.lock().unwrap().len() >= 2);
        assert!(!monitor.status().await.active);
    }

    #[tokio::test]
    async fn settings_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        let (url, _received) = receiver().await;

        let first = HeartbeatMonitor::new(registry(), Some(path.clone()));
        first.initialize(&HeartbeatConfig {
            url: None,
            interval: Duration::from_secs(60),
        })
        .await;
        assert!(!first.status().await.enabled);
        first.setup(&url, Some(120_000)).await.unwrap();
        first.shutdown().await;

        let second = HeartbeatMonitor::new(registry(), Some(path));
        second
            .initialize(&HeartbeatConfig {
                url: None,
                interval: Duration::from_secs(60),
            })
            .await;
        let status = second.status().await;
        assert!(status.enabled);
        assert!(status.active);
        assert_eq!(status.interval, 120_000);
        assert!(status.statistics.total_requests >= 1);
        second.shutdown().await;
    }
}
