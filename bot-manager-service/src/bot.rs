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

//! One bot: a task that owns its config, status, connection and timers.
//!
//! Everything that can change a bot (commands, connection events, deadlines,
//! idle ticks) is consumed by a single `select!` loop, one input at a time.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use keepalive_common::{
    BotConfig, BotId, ConfigError, EntityId, LogLevel, Position, ReconnectDecision,
    SPAWN_POSITION,
};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::{JoinHandle, JoinSet},
    time::{Instant, sleep_until, timeout},
};

use crate::{
    config::LifecycleTimings,
    connection::{
        ConnectError, ConnectOptions, Connection, ConnectionEvent, Connector, OutboundPacket,
    },
    idle::IdleActivityScheduler,
    logs::BotLogger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Connecting,
    LoggedIn,
    Active,
    Reconnecting,
}

impl Phase {
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            Phase::Connecting | Phase::LoggedIn | Phase::Reconnecting
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BotError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("Bot is already running")]
    AlreadyRunning,
    #[error("Bot is already connecting")]
    AlreadyConnecting,
    #[error("Bot not connected or spawned")]
    NotReady,
    #[error("Bot not spawned yet")]
    NotSpawned,
    #[error("Invalid coordinates. x, y, z must be finite numbers")]
    InvalidPosition,
    #[error("Bot task is no longer running")]
    Gone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleActivityStatus {
    pub active: bool,
    pub last_movement: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatus {
    pub phase: Phase,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_reconnecting: bool,
    pub has_spawned: bool,
    pub gave_up: bool,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_disconnected: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub entity_id: Option<EntityId>,
    pub current_position: Position,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub anti_afk: IdleActivityStatus,
    pub uptime: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSnapshot {
    pub id: BotId,
    pub config: BotConfig,
    pub status: BotStatus,
    pub connected: bool,
    pub connecting: bool,
    pub reconnecting: bool,
}

enum BotCommand {
    Start(oneshot::Sender<Result<(), BotError>>),
    Stop(oneshot::Sender<()>),
    Kill(oneshot::Sender<()>),
    Move {
        position: Position,
        reply: oneshot::Sender<Result<Position, BotError>>,
    },
    Snapshot(oneshot::Sender<BotSnapshot>),
    UpdateConfig(Box<BotConfig>),
    ToggleIdleActivity(oneshot::Sender<Result<bool, BotError>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchdogKind {
    Connect,
    Spawn,
}

#[derive(Debug, Clone, Copy)]
struct Watchdog {
    kind: WatchdogKind,
    deadline: Instant,
}

/// Cheap, cloneable address of a running bot task.
#[derive(Clone)]
pub struct BotHandle {
    id: BotId,
    commands: mpsc::UnboundedSender<BotCommand>,
    restart_pause: Duration,
}

impl BotHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BotCommand,
    ) -> Result<T, BotError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .map_err(|_| BotError::Gone)?;
        reply_rx.await.map_err(|_| BotError::Gone)
    }

    pub async fn start(&self) -> Result<(), BotError> {
        self.request(BotCommand::Start).await?
    }

    pub async fn stop(&self) -> Result<(), BotError> {
        self.request(BotCommand::Stop).await
    }

    pub async fn kill(&self) -> Result<(), BotError> {
        self.request(BotCommand::Kill).await
    }

    /// Stop and start again when Active, otherwise just start.
    pub async fn restart(&self) -> Result<(), BotError> {
        if self.snapshot().await?.status.phase == Phase::Active {
            self.stop().await?;
            tokio::time::sleep(self.restart_pause).await;
        }
        self.start().await
    }

    pub async fn manual_move(&self, position: Position) -> Result<Position, BotError> {
        self.request(|reply| BotCommand::Move { position, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<BotSnapshot, BotError> {
        self.request(BotCommand::Snapshot).await
    }

    /// Hand a new config to the task. Commands are applied in send order.
    pub fn update_config(&self, config: BotConfig) -> Result<(), BotError> {
        self.commands
            .send(BotCommand::UpdateConfig(Box::new(config)))
            .map_err(|_| BotError::Gone)
    }

    /// Flip the idle-activity scheduler of a spawned bot; returns whether it now runs.
    pub async fn toggle_idle_activity(&self) -> Result<bool, BotError> {
        self.request(BotCommand::ToggleIdleActivity).await?
    }

    /// Stop the bot and end its task.
    pub async fn shutdown(&self) -> Result<(), BotError> {
        self.request(BotCommand::Shutdown).await
    }
}

pub fn spawn_bot(
    config: BotConfig,
    connector: Arc<dyn Connector>,
    logger: BotLogger,
    timings: LifecycleTimings,
) -> (BotHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let handle = BotHandle {
        id: config.id.clone(),
        commands: commands_tx,
        restart_pause: timings.restart_pause,
    };
    let bot = Bot::new(config, connector, logger, timings);
    let join = tokio::spawn(bot.run(commands_rx));
    (handle, join)
}

struct Bot {
    config: BotConfig,
    connector: Arc<dyn Connector>,
    logger: BotLogger,
    timings: LifecycleTimings,

    phase: Phase,
    gave_up: bool,
    last_connected: Option<DateTime<Utc>>,
    last_disconnected: Option<DateTime<Utc>>,
    reconnect_attempts: u32,
    entity_id: Option<EntityId>,
    current_position: Position,
    packets_sent: u64,
    packets_received: u64,
    last_movement: Option<DateTime<Utc>>,
    last_error: Option<String>,

    connection: Option<Connection>,
    idle: IdleActivityScheduler,
    reconnect_at: Option<Instant>,
    watchdog: Option<Watchdog>,
    settle_at: Option<Instant>,
    /// Connections being closed after a stop or kill.
    releases: JoinSet<()>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn next_event(connection: Option<&mut Connection>) -> Option<ConnectionEvent> {
    match connection {
        Some(connection) => connection.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Graceful close bounded by `grace`, then force-destroy whatever is still open.
async fn release_connection(connection: Option<Connection>, grace: Duration, logger: &BotLogger) {
    let Some(Connection { mut handle, events }) = connection else {
        return;
    };
    drop(events);

    match timeout(grace, handle.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            logger.debug(format!("Ignoring error while closing connection: {error}"));
        }
        Err(_) => {
            logger.warn(format!(
                "Graceful disconnect timed out after {}ms, forcing socket destruction",
                grace.as_millis()
            ));
        }
    }
    if handle.is_open() {
        handle.destroy();
        logger.warn("Socket force destroyed");
    }
}

impl Bot {
    fn new(
        config: BotConfig,
        connector: Arc<dyn Connector>,
        logger: BotLogger,
        timings: LifecycleTimings,
    ) -> Self {
        Self {
            config,
            connector,
            logger,
            timings,
            phase: Phase::Idle,
            gave_up: false,
            last_connected: None,
            last_disconnected: None,
            reconnect_attempts: 0,
            entity_id: None,
            current_position: SPAWN_POSITION,
            packets_sent: 0,
            packets_received: 0,
            last_movement: None,
            last_error: None,
            connection: None,
            idle: IdleActivityScheduler::new(),
            reconnect_at: None,
            watchdog: None,
            settle_at: None,
            releases: JoinSet::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BotCommand>) {
        self.logger
            .info(format!("Bot initialized: {}", self.config.name));
        loop {
            let watchdog_at = self.watchdog.map(|watchdog| watchdog.deadline);
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        let grace = self.timings.kill_grace;
                        release_connection(self.connection.take(), grace, &self.logger).await;
                        self.drain_releases().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                event = next_event(self.connection.as_mut()) => {
                    self.handle_event(event);
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.logger.info("Reconnect timer fired");
                    let _ = self.attempt_connection();
                }
                _ = sleep_until_opt(watchdog_at) => {
                    self.on_watchdog();
                }
                _ = sleep_until_opt(self.settle_at) => {
                    self.settle_at = None;
                    if self.phase == Phase::Active && self.config.anti_afk.enabled {
                        self.start_idle_activity();
                    }
                }
                _ = self.idle.tick() => {
                    self.on_idle_tick();
                }
                Some(released) = self.releases.join_next(), if !self.releases.is_empty() => {
                    if let Err(error) = released {
                        tracing::warn!(bot_id = %self.config.id, error = %error, "connection release task failed");
                    }
                }
            }
        }
        self.logger.debug("Bot task finished");
    }

    /// Returns false when the task should end.
    async fn handle_command(&mut self, command: BotCommand) -> bool {
        match command {
            BotCommand::Start(reply) => {
                let _ = reply.send(self.start());
            }
            BotCommand::Stop(reply) => {
                let connection = self.stop();
                let grace = self.timings.close_timeout;
                self.release_in_background(
                    connection,
                    grace,
                    (LogLevel::Info, "Bot disconnected"),
                    reply,
                );
            }
            BotCommand::Kill(reply) => {
                let connection = self.kill();
                let grace = self.timings.kill_grace;
                self.release_in_background(
                    connection,
                    grace,
                    (LogLevel::Warn, "Bot force killed"),
                    reply,
                );
            }
            BotCommand::Move { position, reply } => {
                let _ = reply.send(self.manual_move(position));
            }
            BotCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            BotCommand::UpdateConfig(config) => {
                self.apply_config(*config);
            }
            BotCommand::ToggleIdleActivity(reply) => {
                let _ = reply.send(self.toggle_idle_activity());
            }
            BotCommand::Shutdown(reply) => {
                let connection = self.stop();
                release_connection(connection, self.timings.close_timeout, &self.logger).await;
                self.logger.info("Bot disconnected");
                self.drain_releases().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn cancel_timers(&mut self) {
        self.reconnect_at = None;
        self.watchdog = None;
        self.settle_at = None;
    }

    fn start(&mut self) -> Result<(), BotError> {
        match self.phase {
            Phase::Active => return Err(BotError::AlreadyRunning),
            Phase::Connecting | Phase::LoggedIn => return Err(BotError::AlreadyConnecting),
            Phase::Reconnecting => {
                self.logger
                    .info("Manual start while waiting to reconnect, connecting now");
                self.cancel_timers();
                return self.attempt_connection();
            }
            Phase::Idle => {}
        }

        self.cancel_timers();
        self.reconnect_attempts = 0;
        self.gave_up = false;
        self.logger.info(format!(
            "Starting connection to {}:{}...",
            self.config.host, self.config.port
        ));
        self.logger
            .info(format!("Username: {}", self.config.username));
        self.attempt_connection()
    }

    fn attempt_connection(&mut self) -> Result<(), BotError> {
        let (host, port) = match self.config.validated_address() {
            Ok(address) => address,
            Err(error) => {
                self.logger
                    .error(format!("Configuration validation failed: {error}"));
                self.fail_terminally(error.to_string());
                return Err(error.into());
            }
        };

        if let Some(previous) = self.connection.take() {
            let mut handle = previous.handle;
            handle.destroy();
        }

        self.logger.info(format!("Connecting to {host}:{port}..."));
        let options = ConnectOptions {
            host,
            port,
            username: self.config.username.clone(),
            version: self.config.version.clone(),
            offline: self.config.is_offline_mode,
            skip_authentication: self.config.skip_authentication,
            connect_timeout: self.timings.connect_timeout,
        };

        match self.connector.open(&options) {
            Ok(connection) => {
                self.connection = Some(connection);
                self.phase = Phase::Connecting;
                self.entity_id = None;
                self.watchdog = Some(Watchdog {
                    kind: WatchdogKind::Connect,
                    deadline: Instant::now() + self.timings.connect_timeout,
                });
                Ok(())
            }
            Err(error) => {
                self.logger
                    .error(format!("Failed to create Bedrock client: {error}"));
                self.fail_terminally(error.to_string());
                Err(error.into())
            }
        }
    }

    /// Back to Idle without scheduling a retry.
    fn fail_terminally(&mut self, reason: String) {
        self.cancel_timers();
        self.idle.stop();
        self.phase = Phase::Idle;
        self.last_error = Some(reason);
    }

    fn handle_event(&mut self, event: Option<ConnectionEvent>) {
        let Some(event) = event else {
            self.connection_lost("Disconnect: Connection closed".to_string());
            return;
        };
        tracing::trace!(bot_id = %self.config.id, event = event.name(), "connection event");

        match event {
            ConnectionEvent::Connect => {
                self.logger.info("Connected to Bedrock server");
                if matches!(self.watchdog, Some(Watchdog { kind: WatchdogKind::Connect, .. })) {
                    self.watchdog = Some(Watchdog {
                        kind: WatchdogKind::Spawn,
                        deadline: Instant::now() + self.timings.spawn_timeout,
                    });
                }
            }
            ConnectionEvent::Login => {
                self.logger.info("Login successful");
                if self.phase == Phase::Connecting {
                    self.phase = Phase::LoggedIn;
                }
            }
            ConnectionEvent::StartGame {
                runtime_entity_id,
                entity_unique_id,
            } => {
                if let Some(entity_id) = runtime_entity_id.or(entity_unique_id) {
                    self.capture_entity_id(entity_id, "start_game");
                }
            }
            ConnectionEvent::Spawn => self.on_spawn(),
            ConnectionEvent::AddPlayer {
                username,
                runtime_id,
            } => {
                if username == self.config.username
                    && let Some(runtime_id) = runtime_id
                {
                    self.capture_entity_id(runtime_id, "add_player");
                }
            }
            ConnectionEvent::Text => {}
            ConnectionEvent::Packet { name, runtime_id } => {
                self.packets_received += 1;
                if self.entity_id.is_none()
                    && name == "move_player"
                    && let Some(runtime_id) = runtime_id
                {
                    self.capture_entity_id(runtime_id, "move_player");
                }
            }
            ConnectionEvent::MovePlayer {
                runtime_id,
                position,
            } => {
                if self.entity_id.is_none()
                    && let Some(runtime_id) = runtime_id
                {
                    self.capture_entity_id(runtime_id, "move_player");
                }
                if let Some(position) = position
                    && position.is_finite()
                    && runtime_id.is_some()
                    && runtime_id == self.entity_id
                {
                    self.current_position = position;
                }
            }
            ConnectionEvent::Disconnect { reason } => {
                let reason = reason
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| "Unknown reason".to_string());
                self.logger.warn(format!("Disconnected: {reason}"));
                self.connection_lost(format!("Disconnect: {reason}"));
            }
            ConnectionEvent::Error(error) => {
                let description = error.describe(&self.config.host, self.config.port);
                self.logger
                    .error(format!("Connection error: {description}"));
                self.connection_lost(format!("Error: {description}"));
            }
        }
    }

    fn capture_entity_id(&mut self, entity_id: EntityId, source: &str) {
        if self.entity_id == Some(entity_id) {
            return;
        }
        self.entity_id = Some(entity_id);
        self.logger
            .info(format!("Entity ID captured from {source}: {entity_id}"));
    }

    fn on_spawn(&mut self) {
        if !matches!(self.phase, Phase::Connecting | Phase::LoggedIn) {
            self.logger
                .debug(format!("Ignoring spawn while {:?}", self.phase));
            return;
        }

        self.phase = Phase::Active;
        self.last_connected = Some(Utc::now());
        self.reconnect_attempts = 0;
        self.gave_up = false;
        self.last_error = None;
        self.cancel_timers();
        self.current_position = SPAWN_POSITION;
        self.logger.info("Bot spawned successfully!");

        if self.config.anti_afk.enabled {
            self.settle_at = Some(Instant::now() + self.timings.settle_delay);
        }
    }

    fn on_watchdog(&mut self) {
        let Some(watchdog) = self.watchdog.take() else {
            return;
        };
        let reason = match watchdog.kind {
            WatchdogKind::Connect => {
                format!(
                    "Connection timeout ({}s)",
                    self.timings.connect_timeout.as_secs()
                )
            }
            WatchdogKind::Spawn => {
                format!("Spawn timeout ({}s)", self.timings.spawn_timeout.as_secs())
            }
        };
        self.logger.error(reason.clone());
        self.connection_lost(reason);
    }

    /// Disconnect handling followed by the reconnect decision.
    fn connection_lost(&mut self, reason: String) {
        self.stop_idle_activity();
        self.cancel_timers();
        if let Some(connection) = self.connection.take() {
            let mut handle = connection.handle;
            handle.destroy();
        }
        self.last_disconnected = Some(Utc::now());
        self.entity_id = None;
        self.last_error = Some(reason);

        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        let max_attempts = self.config.max_reconnect_attempts;
        match self
            .timings
            .backoff
            .decide(self.reconnect_attempts, max_attempts)
        {
            ReconnectDecision::GiveUp => {
                self.phase = Phase::Idle;
                self.gave_up = true;
                self.logger.error(format!(
                    "Max reconnect attempts reached ({}/{max_attempts}). Stopping bot.",
                    self.reconnect_attempts
                ));
            }
            ReconnectDecision::RetryAfter(delay) => {
                self.phase = Phase::Reconnecting;
                self.reconnect_at = Some(Instant::now() + delay);
                self.logger.warn(format!(
                    "Reconnecting in {}s... (Attempt {}/{max_attempts})",
                    delay.as_secs_f64(),
                    self.reconnect_attempts
                ));
            }
        }
    }

    /// Back to Idle at once. Returns the connection still to be closed.
    fn stop(&mut self) -> Option<Connection> {
        self.logger.info("Disconnecting bot...");
        self.cancel_timers();
        self.stop_idle_activity();
        self.reconnect_attempts = 0;
        self.gave_up = false;
        if self.phase == Phase::Active {
            self.last_disconnected = Some(Utc::now());
        }
        self.phase = Phase::Idle;
        self.entity_id = None;
        self.connection.take()
    }

    fn kill(&mut self) -> Option<Connection> {
        self.logger.warn("Force killing bot...");
        self.cancel_timers();
        self.stop_idle_activity();
        self.reconnect_attempts = 0;
        self.gave_up = false;
        self.phase = Phase::Idle;
        self.entity_id = None;
        self.last_disconnected = Some(Utc::now());
        self.connection.take()
    }

    /// Close `connection` off the command loop and answer `reply` once it is gone.
    fn release_in_background(
        &mut self,
        connection: Option<Connection>,
        grace: Duration,
        farewell: (LogLevel, &'static str),
        reply: oneshot::Sender<()>,
    ) {
        let logger = self.logger.clone();
        self.releases.spawn(async move {
            release_connection(connection, grace, &logger).await;
            logger.log(farewell.0, farewell.1);
            let _ = reply.send(());
        });
    }

    async fn drain_releases(&mut self) {
        while self.releases.join_next().await.is_some() {}
    }

    fn manual_move(&mut self, position: Position) -> Result<Position, BotError> {
        if !position.is_finite() {
            return Err(BotError::InvalidPosition);
        }
        if self.phase != Phase::Active || self.entity_id.is_none() {
            return Err(BotError::NotReady);
        }
        self.send_move(position);
        self.logger.info(format!("Manual movement to {position}"));
        Ok(position)
    }

    /// Queue a move packet. Send failures only warn; local state follows the request.
    fn send_move(&mut self, position: Position) {
        let Some(runtime_id) = self.entity_id else {
            return;
        };
        if let Some(connection) = self.connection.as_mut() {
            let packet = OutboundPacket::MovePlayer {
                runtime_id,
                position,
                on_ground: true,
            };
            if let Err(error) = connection.handle.queue(packet) {
                self.logger
                    .warn(format!("Movement packet failed: {error}"));
            }
        }
        self.current_position = position;
        self.packets_sent += 1;
    }

    fn start_idle_activity(&mut self) -> bool {
        if self.phase != Phase::Active {
            return false;
        }
        self.settle_at = None;
        let started = self.idle.start(self.config.anti_afk.interval());
        if started {
            self.logger.info("Starting Anti-AFK system");
        }
        started
    }

    fn stop_idle_activity(&mut self) {
        self.settle_at = None;
        if self.idle.stop() {
            self.logger.info("Stopping Anti-AFK system");
        }
    }

    fn toggle_idle_activity(&mut self) -> Result<bool, BotError> {
        if self.phase != Phase::Active {
            return Err(BotError::NotSpawned);
        }
        if self.idle.is_active() {
            self.stop_idle_activity();
            Ok(false)
        } else {
            self.start_idle_activity();
            Ok(true)
        }
    }

    fn on_idle_tick(&mut self) {
        if self.phase != Phase::Active {
            self.stop_idle_activity();
            return;
        }
        if self.entity_id.is_none() {
            self.logger
                .warn("Cannot move: Entity ID not available yet");
            return;
        }
        let next = self
            .idle
            .next_position(self.current_position, self.config.anti_afk.movement_range);
        self.send_move(next);
        self.last_movement = Some(Utc::now());
        self.logger.info(format!("Anti-AFK movement: {next}"));
    }

    fn apply_config(&mut self, config: BotConfig) {
        let interval_changed = config.anti_afk.interval != self.config.anti_afk.interval;
        let was_enabled = self.config.anti_afk.enabled;
        let idle_enabled = config.anti_afk.enabled;
        self.config = config;
        self.logger
            .info(format!("Bot config updated: {}", self.config.name));

        if !idle_enabled {
            self.stop_idle_activity();
        } else if !was_enabled {
            self.start_idle_activity();
        } else if interval_changed && self.idle.is_active() {
            self.idle.stop();
            self.start_idle_activity();
        }
    }

    fn snapshot(&self) -> BotSnapshot {
        let connected = self.phase == Phase::Active;
        let uptime = match (connected, self.last_connected) {
            (true, Some(since)) => (Utc::now() - since).num_seconds().max(0) as u64,
            _ => 0,
        };
        let status = BotStatus {
            phase: self.phase,
            is_connected: connected,
            is_connecting: self.phase.is_connecting(),
            is_reconnecting: self.phase == Phase::Reconnecting,
            has_spawned: connected,
            gave_up: self.gave_up,
            last_connected: self.last_connected,
            last_disconnected: self.last_disconnected,
            reconnect_attempts: self.reconnect_attempts,
            entity_id: self.entity_id,
            current_position: self.current_position,
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            anti_afk: IdleActivityStatus {
                active: self.idle.is_active(),
                last_movement: self.last_movement,
            },
            uptime,
            last_error: self.last_error.clone(),
        };
        BotSnapshot {
            id: self.config.id.clone(),
            config: self.config.clone(),
            connected: status.is_connected,
            connecting: status.is_connecting,
            reconnecting: status.is_reconnecting,
            status,
        }
    }
}
