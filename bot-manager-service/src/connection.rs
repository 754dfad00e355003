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

//! Boundary to the game connection.
//!
//! A [`Connector`] opens one [`Connection`] per attempt. The connection is an
//! outbound [`ConnectionHandle`] plus an ordered stream of [`ConnectionEvent`]s;
//! dropping the receiver is how a bot forgets an attempt for good.

use std::time::Duration;

use async_trait::async_trait;
use keepalive_common::{EntityId, Position};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub version: String,
    pub offline: bool,
    pub skip_authentication: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub connect_timeout: Duration,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Failure while creating the transport. Never retried: it means the address itself is unusable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectError {
    #[error("Invalid server address format: {host}:{port}. Please verify the host and port are correct.")]
    InvalidAddress { host: String, port: u16 },
    #[error("Failed to create connection to {host}:{port}: {message}")]
    Transport {
        host: String,
        port: u16,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ConnectionError {
    /// Human readable reason used in logs and `lastError`.
    pub fn describe(&self, host: &str, port: u16) -> String {
        match self.code.as_deref() {
            Some("ECONNREFUSED") => return "Server offline or not accessible".to_string(),
            Some("ETIMEDOUT") => return "Connection timeout".to_string(),
            Some("ENOTFOUND") => return "Server address not found".to_string(),
            _ => {}
        }
        let message = self.message.as_str();
        if message.contains("AddrParseError") {
            format!("Invalid server address format: {host}:{port}")
        } else if message.contains("Ping timed out") {
            "Ping timeout - server may be unreachable or slow".to_string()
        } else if message.contains("Socket") {
            format!("Socket error: {message}")
        } else if !message.is_empty() {
            message.to_string()
        } else if let Some(code) = &self.code {
            code.clone()
        } else {
            "Unknown error".to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connect,
    Login,
    StartGame {
        runtime_entity_id: Option<EntityId>,
        entity_unique_id: Option<EntityId>,
    },
    Spawn,
    AddPlayer {
        username: String,
        runtime_id: Option<EntityId>,
    },
    Text,
    /// Any decoded packet; raised in addition to the named events above.
    Packet {
        name: String,
        runtime_id: Option<EntityId>,
    },
    MovePlayer {
        runtime_id: Option<EntityId>,
        position: Option<Position>,
    },
    Disconnect {
        reason: Option<String>,
    },
    Error(ConnectionError),
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect => "connect",
            ConnectionEvent::Login => "login",
            ConnectionEvent::StartGame { .. } => "start_game",
            ConnectionEvent::Spawn => "spawn",
            ConnectionEvent::AddPlayer { .. } => "add_player",
            ConnectionEvent::Text => "text",
            ConnectionEvent::Packet { .. } => "packet",
            ConnectionEvent::MovePlayer { .. } => "move_player",
            ConnectionEvent::Disconnect { .. } => "disconnect",
            ConnectionEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPacket {
    MovePlayer {
        runtime_id: EntityId,
        position: Position,
        on_ground: bool,
    },
}

impl OutboundPacket {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundPacket::MovePlayer { .. } => "move_player",
        }
    }

    pub fn params(&self) -> serde_json::Value {
        match self {
            OutboundPacket::MovePlayer {
                runtime_id,
                position,
                on_ground,
            } => serde_json::json!({
                "runtime_id": runtime_id.0.to_string(),
                "position": position,
                "pitch": 0,
                "yaw": 0,
                "head_yaw": 0,
                "mode": 0,
                "on_ground": on_ground,
                "ridden_runtime_id": 0,
                "tick": 0,
            }),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error("send rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ConnectionHandle: Send {
    fn queue(&mut self, packet: OutboundPacket) -> Result<(), SendError>;

    /// Graceful close. Callers bound it with their own timeout.
    async fn close(&mut self) -> anyhow::Result<()>;

    /// Tear the transport down immediately.
    fn destroy(&mut self);

    fn is_open(&self) -> bool;
}

pub struct Connection {
    pub handle: Box<dyn ConnectionHandle>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

pub trait Connector: Send + Sync {
    /// Start a connection attempt. Must be called from within a tokio runtime.
    fn open(&self, options: &ConnectOptions) -> Result<Connection, ConnectError>;
}
