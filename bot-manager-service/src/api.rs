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

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use keepalive_common::{BotConfig, BotConfigPatch, BotId, CreateBotRequest, LogEntry, Position};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::{
    bot::{BotError, BotSnapshot},
    heartbeat::{HeartbeatError, HeartbeatMonitor, HeartbeatRecord, HeartbeatStatus},
    registry::{BotRegistry, LogStatsSummary, RegistryError, RegistryStats},
    uptime::{
        self, HistoryPeriod, Incident, IncidentStatus, SegmentStatus, UptimeHistory,
    },
};

const DEFAULT_LOG_LINES: usize = 100;
const DEFAULT_INCIDENT_LIMIT: usize = 10;
const DEFAULT_INCIDENT_HOURS: u64 = 24;
/// Window of the per-bot timelines on the uptime overview.
const UPTIME_WINDOW: std::time::Duration = std::time::Duration::from_secs(24 * 3_600);

#[derive(Clone)]
pub struct AppState {
    pub registry: BotRegistry,
    pub heartbeat: HeartbeatMonitor,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(stats_handler))
        .route("/api/bots", get(list_bots_handler).post(create_bot_handler))
        .route(
            "/api/bots/{bot_id}",
            get(get_bot_handler)
                .put(update_bot_handler)
                .delete(delete_bot_handler),
        )
        .route("/api/bots/{bot_id}/start", post(start_bot_handler))
        .route("/api/bots/{bot_id}/stop", post(stop_bot_handler))
        .route("/api/bots/{bot_id}/kill", post(kill_bot_handler))
        .route("/api/bots/{bot_id}/restart", post(restart_bot_handler))
        .route(
            "/api/bots/{bot_id}/anti-afk/toggle",
            post(toggle_idle_activity_handler),
        )
        .route("/api/bots/{bot_id}/move", post(move_bot_handler))
        .route(
            "/api/bots/{bot_id}/logs",
            get(bot_logs_handler).delete(clear_bot_logs_handler),
        )
        .route("/api/logs/ws", get(log_stream_handler))
        .route("/api/logs/recent", get(recent_logs_handler))
        .route("/api/logs/stats", get(log_stats_handler))
        .route("/api/logs/clear", post(clear_all_logs_handler))
        .route("/api/uptime", get(uptime_handler))
        .route("/api/uptime/history", get(uptime_history_handler))
        .route("/api/uptime/incidents", get(incidents_handler))
        .route("/api/heartbeat/status", get(heartbeat_status_handler))
        .route("/api/heartbeat/setup", post(heartbeat_setup_handler))
        .route("/api/heartbeat/disable", post(heartbeat_disable_handler))
        .route("/api/heartbeat/interval", put(heartbeat_interval_handler))
        .route("/api/heartbeat/test", post(heartbeat_test_handler))
        .route("/api/heartbeat/history", get(heartbeat_history_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    message: String,
    timestamp: DateTime<Utc>,
    uptime: u64,
    bots: RegistryStats,
    log_stream_clients: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.registry.stats().await;
    let (status, message) = if stats.total_bots == 0 {
        ("warning", "No bots configured".to_string())
    } else if stats.running_bots == 0 {
        ("degraded", "No bots currently running".to_string())
    } else if stats.running_bots < stats.total_bots {
        (
            "partial",
            format!("{}/{} bots running", stats.running_bots, stats.total_bots),
        )
    } else {
        ("healthy", "All systems operational".to_string())
    };
    Json(HealthResponse {
        status,
        message,
        timestamp: Utc::now(),
        uptime: stats.uptime,
        bots: stats,
        log_stream_clients: state.registry.log_subscribers(),
    })
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    success: bool,
    stats: RegistryStats,
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        success: true,
        stats: state.registry.stats().await,
    })
}

#[derive(Debug, Serialize)]
struct ListBotsResponse {
    success: bool,
    bots: Vec<BotSnapshot>,
    total: usize,
    running: usize,
    stopped: usize,
}

async fn list_bots_handler(State(state): State<AppState>) -> Json<ListBotsResponse> {
    let bots = state.registry.list().await;
    let running = bots.iter().filter(|bot| bot.connected).count();
    Json(ListBotsResponse {
        success: true,
        total: bots.len(),
        stopped: bots.len() - running,
        running,
        bots,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBotResponse {
    success: bool,
    bot_id: BotId,
    bot: BotConfig,
}

async fn create_bot_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateBotRequest>,
) -> Result<(StatusCode, Json<CreateBotResponse>), ApiError> {
    let config = state.registry.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateBotResponse {
            success: true,
            bot_id: config.id.clone(),
            bot: config,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct BotResponse {
    success: bool,
    bot: BotSnapshot,
}

async fn get_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<BotResponse>, ApiError> {
    let bot = state.registry.get(&bot_id).await?;
    Ok(Json(BotResponse { success: true, bot }))
}

#[derive(Debug, Serialize)]
struct UpdateBotResponse {
    success: bool,
    config: BotConfig,
}

async fn update_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(patch): Json<BotConfigPatch>,
) -> Result<Json<UpdateBotResponse>, ApiError> {
    let config = state.registry.update(&bot_id, patch).await?;
    Ok(Json(UpdateBotResponse {
        success: true,
        config,
    }))
}

#[derive(Debug, Serialize)]
struct DeleteBotResponse {
    success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

async fn delete_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<DeleteBotResponse>, ApiError> {
    let warnings = state.registry.delete(&bot_id).await?;
    Ok(Json(DeleteBotResponse {
        success: true,
        warnings,
    }))
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    success: bool,
    message: &'static str,
}

impl ActionResponse {
    fn ok(message: &'static str) -> Json<Self> {
        Json(Self {
            success: true,
            message,
        })
    }
}

async fn start_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    state.registry.start(&bot_id).await?;
    Ok(ActionResponse::ok("Bot started"))
}

async fn stop_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    state.registry.stop(&bot_id).await?;
    Ok(ActionResponse::ok("Bot stopped"))
}

async fn kill_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    state.registry.kill(&bot_id).await?;
    Ok(ActionResponse::ok("Bot killed"))
}

async fn restart_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    state.registry.restart(&bot_id).await?;
    Ok(ActionResponse::ok("Bot restarted"))
}

#[derive(Debug, Serialize)]
struct ToggleResponse {
    success: bool,
    message: &'static str,
    active: bool,
}

async fn toggle_idle_activity_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let active = state.registry.toggle_idle_activity(&bot_id).await?;
    Ok(Json(ToggleResponse {
        success: true,
        message: if active {
            "Anti-AFK started"
        } else {
            "Anti-AFK stopped"
        },
        active,
    }))
}

#[derive(Debug, Serialize)]
struct MoveResponse {
    success: bool,
    message: &'static str,
    position: Position,
    timestamp: DateTime<Utc>,
}

fn coordinate(body: &serde_json::Value, axis: &str) -> Option<f64> {
    body.get(axis).and_then(serde_json::Value::as_f64)
}

async fn move_bot_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<MoveResponse>, ApiError> {
    let (Some(x), Some(y), Some(z)) = (
        coordinate(&body, "x"),
        coordinate(&body, "y"),
        coordinate(&body, "z"),
    ) else {
        return Err(ApiError::bad_request(
            "Invalid coordinates. x, y, z must be numbers",
        ));
    };
    let position = state
        .registry
        .manual_move(&bot_id, Position::new(x, y, z))
        .await?;
    Ok(Json(MoveResponse {
        success: true,
        message: "Movement command sent",
        position,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BotLogsResponse {
    success: bool,
    logs: Vec<LogEntry>,
    total: usize,
    bot_id: BotId,
}

async fn bot_logs_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<BotLogsResponse>, ApiError> {
    let lines = query.lines.filter(|lines| *lines > 0).unwrap_or(DEFAULT_LOG_LINES);
    let logs = state.registry.recent_logs(&bot_id, lines).await?;
    Ok(Json(BotLogsResponse {
        success: true,
        total: logs.len(),
        logs,
        bot_id,
    }))
}

async fn clear_bot_logs_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    state.registry.clear_logs(&bot_id).await?;
    Ok(ActionResponse::ok("Bot logs cleared"))
}

#[derive(Debug, Serialize)]
struct RecentLogsResponse {
    success: bool,
    logs: Vec<LogEntry>,
    total: usize,
}

async fn recent_logs_handler(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<RecentLogsResponse> {
    let lines = query.lines.filter(|lines| *lines > 0).unwrap_or(DEFAULT_LOG_LINES);
    let logs = state.registry.recent_logs_all(lines).await;
    Json(RecentLogsResponse {
        success: true,
        total: logs.len(),
        logs,
    })
}

#[derive(Debug, Serialize)]
struct LogStatsResponse {
    success: bool,
    stats: LogStatsSummary,
}

async fn log_stats_handler(State(state): State<AppState>) -> Json<LogStatsResponse> {
    Json(LogStatsResponse {
        success: true,
        stats: state.registry.log_stats().await,
    })
}

#[derive(Debug, Serialize)]
struct ClearLogsResponse {
    success: bool,
    message: String,
    cleared: usize,
    failed: usize,
}

async fn clear_all_logs_handler(State(state): State<AppState>) -> Json<ClearLogsResponse> {
    let outcome = state.registry.clear_all_logs().await;
    Json(ClearLogsResponse {
        success: outcome.failed == 0,
        message: format!("Cleared logs for {} bots", outcome.cleared),
        cleared: outcome.cleared,
        failed: outcome.failed,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemUptime {
    uptime: u64,
    uptime_formatted: String,
    start_time: DateTime<Utc>,
    overall_uptime_percentage: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BotUptimeDetail {
    id: BotId,
    name: String,
    connected: bool,
    spawned: bool,
    uptime: u64,
    uptime_formatted: String,
    uptime_percentage: f64,
    timeline: Vec<SegmentStatus>,
    server: String,
    last_connected: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FleetUptime {
    total: usize,
    active: usize,
    inactive: usize,
    success_rate: f64,
    details: Vec<BotUptimeDetail>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatSummary {
    enabled: bool,
    active: bool,
    last_heartbeat: Option<DateTime<Utc>>,
    interval: u64,
    success_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UptimeTotals {
    total_incidents: usize,
    average_uptime: f64,
}

#[derive(Debug, Serialize)]
struct UptimeResponse {
    success: bool,
    timestamp: DateTime<Utc>,
    system: SystemUptime,
    bots: FleetUptime,
    heartbeat: HeartbeatSummary,
    statistics: UptimeTotals,
}

async fn uptime_handler(State(state): State<AppState>) -> Json<UptimeResponse> {
    let now = Utc::now();
    let stats = state.registry.stats().await;
    let snapshots = state.registry.list().await;
    let histories = state.registry.log_histories().await;
    let analysis = uptime::uptime_statistics(&histories, UPTIME_WINDOW, now);
    let heartbeat = state.heartbeat.status().await;

    let details: Vec<BotUptimeDetail> = snapshots
        .into_iter()
        .map(|bot| {
            let measured = analysis
                .bot_stats
                .iter()
                .find(|measured| measured.bot_id == bot.id);
            BotUptimeDetail {
                uptime_formatted: uptime::format_uptime(bot.status.uptime),
                uptime_percentage: uptime::round_to(
                    measured.map_or(100.0, |measured| measured.uptime),
                    2,
                ),
                timeline: measured
                    .map(|measured| measured.timeline.clone())
                    .unwrap_or_else(|| vec![SegmentStatus::Up; uptime::TIMELINE_SEGMENTS]),
                server: format!("{}:{}", bot.config.host, bot.config.port),
                connected: bot.connected,
                spawned: bot.status.has_spawned,
                uptime: bot.status.uptime,
                last_connected: bot.status.last_connected,
                name: bot.config.name,
                id: bot.id,
            }
        })
        .collect();
    let active = details.iter().filter(|bot| bot.connected).count();
    let success_rate = if details.is_empty() {
        0.0
    } else {
        uptime::round_to(active as f64 / details.len() as f64 * 100.0, 2)
    };

    Json(UptimeResponse {
        success: true,
        timestamp: now,
        system: SystemUptime {
            uptime: stats.uptime,
            uptime_formatted: uptime::format_uptime(stats.uptime),
            start_time: now - chrono::Duration::seconds(stats.uptime as i64),
            overall_uptime_percentage: uptime::round_to(analysis.average_uptime, 2),
        },
        bots: FleetUptime {
            total: details.len(),
            active,
            inactive: details.len() - active,
            success_rate,
            details,
        },
        heartbeat: HeartbeatSummary {
            enabled: heartbeat.enabled,
            active: heartbeat.active,
            last_heartbeat: heartbeat.last_heartbeat,
            interval: heartbeat.interval,
            success_rate: heartbeat.statistics.success_rate,
        },
        statistics: UptimeTotals {
            total_incidents: analysis.incidents,
            average_uptime: uptime::round_to(analysis.average_uptime, 2),
        },
    })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    period: Option<String>,
}

#[derive(Debug, Serialize)]
struct UptimeHistoryResponse {
    success: bool,
    #[serde(flatten)]
    history: UptimeHistory,
}

async fn uptime_history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<UptimeHistoryResponse> {
    let period = HistoryPeriod::parse(query.period.as_deref());
    let histories = state.registry.log_histories().await;
    Json(UptimeHistoryResponse {
        success: true,
        history: uptime::uptime_history(&histories, period, Utc::now()),
    })
}

#[derive(Debug, Deserialize)]
struct IncidentsQuery {
    limit: Option<usize>,
    hours: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IncidentSummary {
    total: usize,
    ongoing: usize,
    resolved: usize,
    total_downtime: u64,
}

#[derive(Debug, Serialize)]
struct IncidentsResponse {
    success: bool,
    incidents: Vec<Incident>,
    summary: IncidentSummary,
}

async fn incidents_handler(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> Json<IncidentsResponse> {
    let now = Utc::now();
    let limit = query
        .limit
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_INCIDENT_LIMIT);
    let hours = query
        .hours
        .filter(|hours| *hours > 0)
        .unwrap_or(DEFAULT_INCIDENT_HOURS);
    let cutoff = now - chrono::Duration::hours(hours.min(24 * 365) as i64);
    let histories = state.registry.log_histories().await;
    let incidents = uptime::recent_incidents(&histories, cutoff, now, limit);
    let ongoing = incidents
        .iter()
        .filter(|incident| incident.status == IncidentStatus::Ongoing)
        .count();
    Json(IncidentsResponse {
        success: true,
        summary: IncidentSummary {
            total: incidents.len(),
            ongoing,
            resolved: incidents.len() - ongoing,
            total_downtime: incidents.iter().map(|incident| incident.duration).sum(),
        },
        incidents,
    })
}

#[derive(Debug, Serialize)]
struct HeartbeatStatusResponse {
    success: bool,
    status: HeartbeatStatus,
}

async fn heartbeat_status_handler(State(state): State<AppState>) -> Json<HeartbeatStatusResponse> {
    Json(HeartbeatStatusResponse {
        success: true,
        status: state.heartbeat.status().await,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatSetupRequest {
    heartbeat_url: Option<String>,
    interval: Option<u64>,
}

#[derive(Debug, Serialize)]
struct HeartbeatChangeResponse {
    success: bool,
    message: &'static str,
    status: HeartbeatStatus,
}

async fn heartbeat_setup_handler(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatSetupRequest>,
) -> Result<Json<HeartbeatChangeResponse>, ApiError> {
    let url = request.heartbeat_url.unwrap_or_default();
    let status = state.heartbeat.setup(&url, request.interval).await?;
    Ok(Json(HeartbeatChangeResponse {
        success: true,
        message: "Heartbeat monitoring enabled",
        status,
    }))
}

async fn heartbeat_disable_handler(State(state): State<AppState>) -> Json<ActionResponse> {
    state.heartbeat.disable().await;
    ActionResponse::ok("Heartbeat monitoring disabled")
}

#[derive(Debug, Default, Deserialize)]
struct HeartbeatIntervalRequest {
    interval: Option<u64>,
}

async fn heartbeat_interval_handler(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatIntervalRequest>,
) -> Result<Json<HeartbeatChangeResponse>, ApiError> {
    let Some(interval) = request.interval else {
        return Err(ApiError::bad_request("Interval is required"));
    };
    let status = state.heartbeat.update_interval(interval).await?;
    Ok(Json(HeartbeatChangeResponse {
        success: true,
        message: "Heartbeat interval updated",
        status,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatTestResponse {
    success: bool,
    message: &'static str,
    status_code: u16,
}

async fn heartbeat_test_handler(
    State(state): State<AppState>,
) -> Result<Json<HeartbeatTestResponse>, ApiError> {
    let status_code = state.heartbeat.send_test().await?;
    Ok(Json(HeartbeatTestResponse {
        success: true,
        message: "Test heartbeat sent",
        status_code,
    }))
}

#[derive(Debug, Serialize)]
struct HeartbeatHistoryResponse {
    success: bool,
    history: Vec<HeartbeatRecord>,
    total: usize,
}

async fn heartbeat_history_handler(State(state): State<AppState>) -> Json<HeartbeatHistoryResponse> {
    let history = state.heartbeat.history().await;
    Json(HeartbeatHistoryResponse {
        success: true,
        total: history.len(),
        history,
    })
}

async fn log_stream_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_log_socket(socket, state))
}

async fn handle_log_socket(mut socket: WebSocket, state: AppState) {
    let (subscription, mut entries) = state.registry.subscribe();
    debug!(subscription, "log stream client connected");

    if send_log_entry(
        &mut socket,
        &LogEntry::system("Connected to live log stream"),
    )
    .await
    .is_ok()
    {
        loop {
            tokio::select! {
                entry = entries.recv() => {
                    let Some(entry) = entry else {
                        break;
                    };
                    if send_log_entry(&mut socket, &entry).await.is_err() {
                        break;
                    }
                }
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    state.registry.unsubscribe(subscription);
    debug!(subscription, "log stream client disconnected");
}

async fn send_log_entry(socket: &mut WebSocket, entry: &LogEntry) -> Result<(), ()> {
    let payload = serde_json::to_string(entry).map_err(|error| {
        warn!(error = %error, "failed to encode log entry");
    })?;
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|error| {
            debug!(error = ?error, "failed to push log entry to websocket client");
        })
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        let status = match &error {
            RegistryError::NotFound | RegistryError::Bot(BotError::Gone) => StatusCode::NOT_FOUND,
            RegistryError::InvalidConfig(_) | RegistryError::Bot(_) => StatusCode::BAD_REQUEST,
            RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<HeartbeatError> for ApiError {
    fn from(error: HeartbeatError) -> Self {
        Self::bad_request(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "keep-alive request failed");
        (
            self.status,
            Json(serde_json::json!({"success": false, "error": self.message})),
        )
            .into_response()
    }
}
