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

//! Connector speaking newline-delimited JSON to a protocol bridge process.
//!
//! The bridge owns the Bedrock protocol. Per attempt we open one TCP stream,
//! send `{"op":"open",..}` and then read one event object per line.

use std::{
    io::ErrorKind,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use async_trait::async_trait;
use keepalive_common::{EntityId, Position, validate_host};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::connection::{
    ConnectError, ConnectOptions, Connection, ConnectionError, ConnectionEvent, ConnectionHandle,
    Connector, OutboundPacket, SendError,
};

pub struct BridgeConnector {
    addr: String,
}

impl BridgeConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Connect,
    Login,
    StartGame {
        #[serde(default)]
        runtime_entity_id: Option<EntityId>,
        #[serde(default)]
        entity_unique_id: Option<EntityId>,
    },
    Spawn,
    AddPlayer {
        #[serde(default)]
        username: String,
        #[serde(default)]
        runtime_id: Option<EntityId>,
    },
    Text,
    Packet {
        name: String,
        #[serde(default)]
        runtime_id: Option<EntityId>,
    },
    MovePlayer {
        #[serde(default)]
        runtime_id: Option<EntityId>,
        #[serde(default)]
        position: Option<Position>,
    },
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl BridgeEvent {
    fn into_event(self) -> Option<ConnectionEvent> {
        Some(match self {
            BridgeEvent::Connect => ConnectionEvent::Connect,
            BridgeEvent::Login => ConnectionEvent::Login,
            BridgeEvent::StartGame {
                runtime_entity_id,
                entity_unique_id,
            } => ConnectionEvent::StartGame {
                runtime_entity_id,
                entity_unique_id,
            },
            BridgeEvent::Spawn => ConnectionEvent::Spawn,
            BridgeEvent::AddPlayer {
                username,
                runtime_id,
            } => ConnectionEvent::AddPlayer {
                username,
                runtime_id,
            },
            BridgeEvent::Text => ConnectionEvent::Text,
            BridgeEvent::Packet { name, runtime_id } => {
                ConnectionEvent::Packet { name, runtime_id }
            }
            BridgeEvent::MovePlayer {
                runtime_id,
                position,
            } => ConnectionEvent::MovePlayer {
                runtime_id,
                position,
            },
            BridgeEvent::Disconnect { reason } => ConnectionEvent::Disconnect { reason },
            BridgeEvent::Error { code, message } => {
                ConnectionEvent::Error(ConnectionError { code, message })
            }
            BridgeEvent::Unknown => return None,
        })
    }
}

enum BridgeCommand {
    Queue(String),
    Close(oneshot::Sender<()>),
}

struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    open: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

#[async_trait]
impl ConnectionHandle for BridgeHandle {
    fn queue(&mut self, packet: OutboundPacket) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        if let OutboundPacket::MovePlayer { position, .. } = &packet
            && !position.is_finite()
        {
            return Err(SendError::Rejected(format!("non-finite position {position}")));
        }
        let line = serde_json::json!({
            "op": "queue",
            "name": packet.name(),
            "params": packet.params(),
        })
        .to_string();
        self.commands
            .send(BridgeCommand::Queue(line))
            .map_err(|_| SendError::Closed)
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Close(done_tx))
            .map_err(|_| anyhow::anyhow!("bridge session already ended"))?;
        done_rx.await.context("bridge session ended before close completed")?;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.join.abort();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.join.is_finished()
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

impl Connector for BridgeConnector {
    fn open(&self, options: &ConnectOptions) -> Result<Connection, ConnectError> {
        if validate_host(&options.host).is_err() || options.port == 0 {
            return Err(ConnectError::InvalidAddress {
                host: options.host.clone(),
                port: options.port,
            });
        }

        let open_line = serde_json::to_value(options)
            .map(|mut value| {
                value["op"] = serde_json::Value::from("open");
                value.to_string()
            })
            .map_err(|error| ConnectError::Transport {
                host: options.host.clone(),
                port: options.port,
                message: error.to_string(),
            })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let session_open = open.clone();
        let addr = self.addr.clone();
        let target = format!("{}:{}", options.host, options.port);
        let join = tokio::spawn(async move {
            run_bridge_session(addr.clone(), open_line, events_tx, commands_rx).await;
            session_open.store(false, Ordering::SeqCst);
            debug!(bridge_addr = %addr, target = %target, "bridge session finished");
        });

        Ok(Connection {
            handle: Box::new(BridgeHandle {
                commands: commands_tx,
                open,
                join,
            }),
            events: events_rx,
        })
    }
}

fn io_error_code(error: &std::io::Error) -> Option<String> {
    let code = match error.kind() {
        ErrorKind::ConnectionRefused => "ECONNREFUSED",
        ErrorKind::TimedOut => "ETIMEDOUT",
        ErrorKind::ConnectionReset => "ECONNRESET",
        ErrorKind::BrokenPipe => "EPIPE",
        _ => return None,
    };
    Some(code.to_string())
}

fn io_error_event(error: &std::io::Error) -> ConnectionEvent {
    ConnectionEvent::Error(ConnectionError {
        code: io_error_code(error),
        message: error.to_string(),
    })
}

async fn run_bridge_session(
    addr: String,
    open_line: String,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut commands: mpsc::UnboundedReceiver<BridgeCommand>,
) {
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(bridge_addr = %addr, error = %error, "failed to reach protocol bridge");
            let _ = events.send(io_error_event(&error));
            return;
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if let Err(error) = write_line(&mut writer, &open_line).await {
        let _ = events.send(io_error_event(&error));
        return;
    }

    let mut close_waiter: Option<oneshot::Sender<()>> = None;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<BridgeEvent>(&line) {
                            Ok(event) => {
                                if let Some(event) = event.into_event() {
                                    let _ = events.send(event);
                                }
                            }
                            Err(error) => {
                                debug!(error = %error, line = %line, "ignoring unparsable bridge line");
                            }
                        }
                    }
                    Ok(None) => {
                        if close_waiter.is_none() {
                            let _ = events.send(ConnectionEvent::Disconnect {
                                reason: Some("Protocol bridge closed the connection".to_string()),
                            });
                        }
                        break;
                    }
                    Err(error) => {
                        if close_waiter.is_none() {
                            let _ = events.send(io_error_event(&error));
                        }
                        break;
                    }
                }
            }
            command = commands.recv(), if close_waiter.is_none() => {
                match command {
                    Some(BridgeCommand::Queue(line)) => {
                        if let Err(error) = write_line(&mut writer, &line).await {
                            warn!(error = %error, "failed to forward packet to bridge");
                        }
                    }
                    Some(BridgeCommand::Close(done)) => {
                        let close_line = serde_json::json!({"op": "close"}).to_string();
                        if write_line(&mut writer, &close_line).await.is_err() {
                            let _ = done.send(());
                            break;
                        }
                        let _ = writer.shutdown().await;
                        close_waiter = Some(done);
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(done) = close_waiter {
        let _ = done.send(());
    }
}

async fn write_line(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    line: &str,
) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };

    fn options(host: &str) -> ConnectOptions {
        ConnectOptions {
            host: host.to_string(),
            port: 19132,
            username: "Bot1".to_string(),
            version: "1.21.90".to_string(),
            offline: true,
            skip_authentication: false,
            connect_timeout: Duration::from_secs(45),
        }
    }

    #[tokio::test]
    async fn rejects_unusable_address_without_spawning() {
        let connector = BridgeConnector::new("127.0.0.1:1");
        let result = connector.open(&options("not a host"));
        assert!(matches!(result, Err(ConnectError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn forwards_events_and_packets_over_the_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();

            let open: serde_json::Value =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(open["op"], "open");
            assert_eq!(open["host"], "play.example.com");
            assert_eq!(open["connect_timeout"], 45000);

            for line in [
                r#"{"event":"connect"}"#,
                r#"{"event":"mystery"}"#,
                r#"{"event":"start_game","runtime_entity_id":"99"}"#,
                r#"{"event":"spawn"}"#,
            ] {
                writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
            }

            let queued: serde_json::Value =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(queued["op"], "queue");
            assert_eq!(queued["name"], "move_player");

            let close: serde_json::Value =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(close["op"], "close");
        });

        let connector = BridgeConnector::new(addr);
        let Connection {
            mut handle,
            mut events,
        } = connector.open(&options("play.example.com")).unwrap();

        assert_eq!(events.recv().await, Some(ConnectionEvent::Connect));
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::StartGame {
                runtime_entity_id: Some(EntityId(99)),
                entity_unique_id: None,
            })
        );
        assert_eq!(events.recv().await, Some(ConnectionEvent::Spawn));

        let rejected = handle.queue(OutboundPacket::MovePlayer {
            runtime_id: EntityId(99),
            position: Position::new(f64::NAN, 64.0, 0.5),
            on_ground: true,
        });
        assert!(matches!(rejected, Err(SendError::Rejected(_))));

        handle
            .queue(OutboundPacket::MovePlayer {
                runtime_id: EntityId(99),
                position: Position::new(0.5, 64.0, 0.5),
                on_ground: true,
            })
            .unwrap();
        handle.close().await.unwrap();
        server.await.unwrap();
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn unreachable_bridge_surfaces_as_refused_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = BridgeConnector::new(addr);
        let mut connection = connector.open(&options("play.example.com")).unwrap();
        match connection.events.recv().await {
            Some(ConnectionEvent::Error(error)) => {
                assert_eq!(error.code.as_deref(), Some("ECONNREFUSED"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
