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

mod api;
mod bot;
mod bridge;
mod config;
mod connection;
mod heartbeat;
mod idle;
mod logs;
mod registry;
mod store;
mod uptime;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    api::{AppState, build_router},
    bridge::BridgeConnector,
    config::ServiceConfig,
    heartbeat::HeartbeatMonitor,
    registry::{BotRegistry, RegistrySettings},
    store::JsonFileStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "bot_manager_service=debug,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    std::fs::create_dir_all(&config.data_path)
        .with_context(|| format!("failed to create {}", config.data_path.display()))?;
    std::fs::create_dir_all(&config.logs_path)
        .with_context(|| format!("failed to create {}", config.logs_path.display()))?;

    let registry = BotRegistry::new(
        Arc::new(JsonFileStore::new(config.bots_file())),
        Arc::new(BridgeConnector::new(config.bridge_addr.clone())),
        RegistrySettings {
            defaults: config.defaults.clone(),
            timings: config.timings,
            logs_path: Some(config.logs_path.clone()),
            max_log_size: config.max_log_size,
        },
    );

    match registry.load_from_store().await {
        Ok(loaded) => info!(loaded, "bot configs loaded"),
        Err(error) => warn!(error = %format!("{error:#}"), "starting without stored bots"),
    }

    let heartbeat = HeartbeatMonitor::new(registry.clone(), Some(config.heartbeat_file()));
    heartbeat.initialize(&config.heartbeat).await;

    let app = build_router(AppState {
        registry: registry.clone(),
        heartbeat: heartbeat.clone(),
    });
    info!(bind_addr = %config.bind_addr, "bot-manager-service listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    heartbeat.shutdown().await;
    registry.shutdown().await;
    info!("bot-manager-service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
