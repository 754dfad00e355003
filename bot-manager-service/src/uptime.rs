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

//! Uptime timelines and incidents reconstructed from bot log files.
//!
//! A bot goes down on an error line or a disconnect, and comes back up on a
//! connect, login or spawn line.

use std::time::Duration;

use chrono::{DateTime, Utc};
use keepalive_common::{BotId, LogEntry, LogLevel};
use serde::Serialize;

use crate::registry::BotLogHistory;

pub const TIMELINE_SEGMENTS: usize = 24;

const INCIDENT_PATTERNS: [&str; 10] = [
    "Connection error",
    "Disconnected",
    "Failed to create",
    "Connection timeout",
    "Spawn timeout",
    "Ping timeout",
    "Server offline",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "ENOTFOUND",
];

const RECOVERY_PREFIXES: [&str; 3] = [
    "Bot spawned successfully",
    "Connected to Bedrock server",
    "Login successful",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Ongoing,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    AutoReconnect,
    ConnectionRestored,
    AuthenticationSuccess,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub title: &'static str,
    pub description: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds.
    pub duration: u64,
    pub affected_services: Vec<String>,
    pub resolved_by: Option<Resolution>,
    pub bot_id: BotId,
    pub bot_name: String,
}

fn is_incident_start(entry: &LogEntry) -> bool {
    entry.level == LogLevel::Error
        || INCIDENT_PATTERNS
            .iter()
            .any(|pattern| entry.message.contains(pattern))
}

fn is_recovery(entry: &LogEntry) -> bool {
    RECOVERY_PREFIXES
        .iter()
        .any(|prefix| entry.message.starts_with(prefix))
}

fn incident_title(message: &str) -> &'static str {
    const TITLES: [(&str, &str); 8] = [
        ("Connection error", "Bot Connection Error"),
        ("Disconnected", "Bot Disconnection"),
        ("Spawn timeout", "Spawn Timeout"),
        ("timeout", "Connection Timeout"),
        ("Server offline", "Server Unavailable"),
        ("ECONNREFUSED", "Connection Refused"),
        ("ENOTFOUND", "Server Not Found"),
        ("Max reconnect attempts", "Reconnect Limit Reached"),
    ];
    TITLES
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, title)| *title)
        .unwrap_or("Bot Connection Issue")
}

fn incident_severity(entry: &LogEntry) -> Severity {
    if entry.level == LogLevel::Error {
        Severity::High
    } else if entry.message.contains("timeout") || entry.message.contains("ECONNREFUSED") {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn resolution_of(message: &str) -> Resolution {
    if message.starts_with("Bot spawned successfully") {
        Resolution::AutoReconnect
    } else if message.starts_with("Connected") {
        Resolution::ConnectionRestored
    } else {
        Resolution::AuthenticationSuccess
    }
}

fn sorted(entries: &[LogEntry]) -> Vec<&LogEntry> {
    let mut sorted: Vec<&LogEntry> = entries.iter().collect();
    sorted.sort_by_key(|entry| entry.timestamp);
    sorted
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_seconds().max(0) as u64
}

/// Incidents of one bot that started at or after `cutoff`. An incident still open
/// at the end of the log runs until `now`.
pub fn extract_incidents(
    history: &BotLogHistory,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<Incident> {
    let mut incidents = Vec::new();
    let mut current: Option<Incident> = None;

    for entry in sorted(&history.entries) {
        if entry.timestamp < cutoff {
            continue;
        }

        if is_incident_start(entry) {
            if let Some(mut open) = current.take() {
                open.end_time = entry.timestamp;
                open.duration = seconds_between(open.start_time, open.end_time);
                incidents.push(open);
            }
            current = Some(Incident {
                id: format!("{}-{}", history.bot_id, entry.timestamp.timestamp_millis()),
                title: incident_title(&entry.message),
                description: format!("\"{}\" experienced: {}", history.name, entry.message),
                severity: incident_severity(entry),
                status: IncidentStatus::Ongoing,
                start_time: entry.timestamp,
                end_time: entry.timestamp,
                duration: 0,
                affected_services: vec![history.name.clone()],
                resolved_by: None,
                bot_id: history.bot_id.clone(),
                bot_name: history.name.clone(),
            });
        } else if is_recovery(entry)
            && let Some(mut open) = current.take()
        {
            open.end_time = entry.timestamp;
            open.status = IncidentStatus::Resolved;
            open.resolved_by = Some(resolution_of(&entry.message));
            open.duration = seconds_between(open.start_time, open.end_time);
            incidents.push(open);
        }
    }

    if let Some(mut open) = current {
        open.end_time = now;
        open.duration = seconds_between(open.start_time, now);
        incidents.push(open);
    }
    incidents
}

/// Incidents of every bot, newest first, at most `limit`.
pub fn recent_incidents(
    histories: &[BotLogHistory],
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<Incident> {
    let mut incidents: Vec<Incident> = histories
        .iter()
        .flat_map(|history| extract_incidents(history, cutoff, now))
        .collect();
    incidents.sort_by(|left, right| right.start_time.cmp(&left.start_time));
    incidents.truncate(limit);
    incidents
}

/// Up/down status of `segments` equal slices of `[start, end)`.
///
/// A slice is down when it holds a failure and no recovery, or when it holds
/// nothing at all while the bot was already down.
pub fn timeline(
    entries: &[LogEntry],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    segments: usize,
) -> Vec<SegmentStatus> {
    if segments == 0 {
        return Vec::new();
    }
    let entries = sorted(entries);
    let span_ms = (end - start).num_milliseconds().max(1);
    let segment_ms = (span_ms / segments as i64).max(1);

    let mut down = false;
    let mut cursor = 0;
    while cursor < entries.len() && entries[cursor].timestamp < start {
        if is_incident_start(entries[cursor]) {
            down = true;
        } else if is_recovery(entries[cursor]) {
            down = false;
        }
        cursor += 1;
    }

    let mut statuses = Vec::with_capacity(segments);
    for index in 0..segments {
        let segment_end = if index + 1 == segments {
            end
        } else {
            start + chrono::Duration::milliseconds(segment_ms * (index as i64 + 1))
        };
        let mut failed = false;
        let mut recovered = false;
        let mut saw_any = false;
        while cursor < entries.len() && entries[cursor].timestamp < segment_end {
            let entry = entries[cursor];
            if is_incident_start(entry) {
                failed = true;
                saw_any = true;
                down = true;
            } else if is_recovery(entry) {
                recovered = true;
                saw_any = true;
                down = false;
            }
            cursor += 1;
        }
        let status = if (failed && !recovered) || (!saw_any && down) {
            SegmentStatus::Down
        } else {
            SegmentStatus::Up
        };
        statuses.push(status);
    }
    statuses
}

pub fn up_percentage(timeline: &[SegmentStatus]) -> f64 {
    if timeline.is_empty() {
        return 100.0;
    }
    let up = timeline
        .iter()
        .filter(|status| **status == SegmentStatus::Up)
        .count();
    up as f64 / timeline.len() as f64 * 100.0
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotUptime {
    pub bot_id: BotId,
    pub uptime: f64,
    pub timeline: Vec<SegmentStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeStatistics {
    pub total_bots: usize,
    pub average_uptime: f64,
    pub incidents: usize,
    pub bot_stats: Vec<BotUptime>,
}

/// Per-bot timelines over the last `window`, each cut into [`TIMELINE_SEGMENTS`] slices.
pub fn uptime_statistics(
    histories: &[BotLogHistory],
    window: Duration,
    now: DateTime<Utc>,
) -> UptimeStatistics {
    let start = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
    let bot_stats: Vec<BotUptime> = histories
        .iter()
        .map(|history| {
            let timeline = timeline(&history.entries, start, now, TIMELINE_SEGMENTS);
            BotUptime {
                bot_id: history.bot_id.clone(),
                uptime: up_percentage(&timeline),
                timeline,
            }
        })
        .collect();
    let average_uptime = if bot_stats.is_empty() {
        100.0
    } else {
        bot_stats.iter().map(|bot| bot.uptime).sum::<f64>() / bot_stats.len() as f64
    };
    UptimeStatistics {
        total_bots: histories.len(),
        average_uptime,
        incidents: recent_incidents(histories, start, now, usize::MAX).len(),
        bot_stats,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HistoryPeriod {
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
}

impl HistoryPeriod {
    /// Unknown periods fall back to the last day.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("1h") => Self::LastHour,
            Some("7d") => Self::LastWeek,
            Some("30d") => Self::LastMonth,
            _ => Self::LastDay,
        }
    }

    pub fn window(self) -> Duration {
        Duration::from_secs(3_600 * self.hours())
    }

    fn hours(self) -> u64 {
        match self {
            Self::LastHour => 1,
            Self::LastDay => 24,
            Self::LastWeek => 7 * 24,
            Self::LastMonth => 30 * 24,
        }
    }

    /// Number of data points: minutes for an hour, hours for a day or week, days for a month.
    pub fn intervals(self) -> usize {
        match self {
            Self::LastHour => 60,
            Self::LastDay => 24,
            Self::LastWeek => 7 * 24,
            Self::LastMonth => 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub uptime: f64,
    pub active_bots: usize,
    pub incidents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub average_uptime: f64,
    pub total_incidents: usize,
    pub min_uptime: f64,
    pub max_uptime: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeHistory {
    pub period: HistoryPeriod,
    pub data_points: Vec<HistoryPoint>,
    pub summary: HistorySummary,
}

/// Fleet uptime per interval of `period`, oldest point first.
pub fn uptime_history(
    histories: &[BotLogHistory],
    period: HistoryPeriod,
    now: DateTime<Utc>,
) -> UptimeHistory {
    let intervals = period.intervals();
    let window = chrono::Duration::from_std(period.window()).unwrap_or(chrono::Duration::zero());
    let start = now - window;
    let interval = window / intervals as i32;

    let timelines: Vec<Vec<SegmentStatus>> = histories
        .iter()
        .map(|history| timeline(&history.entries, start, now, intervals))
        .collect();
    let incidents = recent_incidents(histories, start, now, usize::MAX);

    let data_points: Vec<HistoryPoint> = (0..intervals)
        .map(|index| {
            let interval_start = start + interval * index as i32;
            let interval_end = interval_start + interval;
            let active_bots = timelines
                .iter()
                .filter(|timeline| timeline[index] == SegmentStatus::Up)
                .count();
            let uptime = if timelines.is_empty() {
                100.0
            } else {
                active_bots as f64 / timelines.len() as f64 * 100.0
            };
            HistoryPoint {
                timestamp: interval_start,
                uptime: round_to(uptime, 2),
                active_bots,
                incidents: incidents
                    .iter()
                    .filter(|incident| {
                        incident.start_time >= interval_start && incident.start_time < interval_end
                    })
                    .count(),
            }
        })
        .collect();

    let uptimes = data_points.iter().map(|point| point.uptime);
    let summary = HistorySummary {
        average_uptime: round_to(uptimes.clone().sum::<f64>() / intervals as f64, 2),
        total_incidents: data_points.iter().map(|point| point.incidents).sum(),
        min_uptime: uptimes.clone().fold(f64::INFINITY, f64::min),
        max_uptime: uptimes.fold(f64::NEG_INFINITY, f64::max),
    };
    UptimeHistory {
        period,
        data_points,
        summary,
    }
}

/// `1d 2h 3m`, `2h 3m`, `3m 4s` or `4s`.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0).unwrap()
    }

    fn line(timestamp: DateTime<Utc>, level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp,
            message: message.to_string(),
            level,
            source: "bot-b1".to_string(),
            bot_id: Some("b1".to_string()),
        }
    }

    fn history(entries: Vec<LogEntry>) -> BotLogHistory {
        BotLogHistory {
            bot_id: "b1".to_string(),
            name: "Keeper".to_string(),
            entries,
        }
    }

    #[test]
    fn disconnect_then_spawn_is_a_resolved_incident() {
        let history = history(vec![
            line(at(10, 0), LogLevel::Info, "Bot spawned successfully!"),
            line(at(11, 0), LogLevel::Warn, "Disconnected: Server closed"),
            line(at(11, 0), LogLevel::Warn, "Reconnecting in 5s... (Attempt 1/50)"),
            line(at(11, 5), LogLevel::Info, "Bot spawned successfully!"),
        ]);
        let incidents = extract_incidents(&history, at(0, 0), at(12, 0));
        assert_eq!(incidents.len(), 1);
        let incident = &incidents[0];
        assert_eq!(incident.title, "Bot Disconnection");
        assert_eq!(incident.severity, Severity::Low);
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert_eq!(incident.resolved_by, Some(Resolution::AutoReconnect));
        assert_eq!(incident.duration, 300);
        assert_eq!(incident.affected_services, vec!["Keeper"]);
        assert_eq!(
            incident.description,
            "\"Keeper\" experienced: Disconnected: Server closed"
        );
    }

    #[test]
    fn a_new_failure_closes_the_open_incident_and_the_last_stays_ongoing() {
        let history = history(vec![
            line(at(9, 0), LogLevel::Error, "Connection error: Server offline or not accessible"),
            line(at(9, 10), LogLevel::Error, "Connection timeout (45s)"),
        ]);
        let incidents = extract_incidents(&history, at(0, 0), at(10, 0));
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].title, "Bot Connection Error");
        assert_eq!(incidents[0].severity, Severity::High);
        assert_eq!(incidents[0].duration, 600);
        assert_eq!(incidents[0].status, IncidentStatus::Ongoing);
        assert_eq!(incidents[1].title, "Connection Timeout");
        assert_eq!(incidents[1].end_time, at(10, 0));
        assert_eq!(incidents[1].duration, 50 * 60);
    }

    #[test]
    fn entries_before_cutoff_are_ignored_and_stop_is_not_an_incident() {
        let history = history(vec![
            line(at(1, 0), LogLevel::Error, "Connection error: Connection timeout"),
            line(at(5, 0), LogLevel::Info, "Disconnecting bot..."),
            line(at(5, 0), LogLevel::Info, "Bot disconnected"),
        ]);
        assert!(extract_incidents(&history, at(2, 0), at(6, 0)).is_empty());
    }

    #[test]
    fn recent_incidents_are_newest_first_and_limited() {
        let mut other = history(vec![line(at(8, 0), LogLevel::Error, "Spawn timeout (60s)")]);
        other.bot_id = "b2".to_string();
        let histories = vec![
            history(vec![
                line(at(6, 0), LogLevel::Error, "Connection timeout (45s)"),
                line(at(6, 1), LogLevel::Info, "Connected to Bedrock server"),
            ]),
            other,
        ];
        let incidents = recent_incidents(&histories, at(0, 0), at(9, 0), 1);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].bot_id, "b2");
        assert_eq!(incidents[0].title, "Spawn Timeout");
    }

    #[test]
    fn timeline_carries_down_state_through_quiet_segments() {
        let entries = vec![
            line(at(0, 30), LogLevel::Info, "Bot spawned successfully!"),
            line(at(2, 10), LogLevel::Warn, "Disconnected: Kicked"),
            line(at(4, 20), LogLevel::Info, "Login successful"),
            line(at(5, 0), LogLevel::Error, "Connection error: Connection timeout"),
            line(at(5, 30), LogLevel::Info, "Bot spawned successfully!"),
        ];
        let statuses = timeline(&entries, at(0, 0), at(6, 0), 6);
        use SegmentStatus::{Down, Up};
        assert_eq!(statuses, vec![Up, Up, Down, Down, Up, Up]);
        assert!((up_percentage(&statuses) - 66.666).abs() < 0.01);
    }

    #[test]
    fn timeline_starts_down_when_the_window_opens_mid_incident() {
        let entries = vec![line(at(0, 0), LogLevel::Error, "Connection error: refused")];
        let statuses = timeline(&entries, at(1, 0), at(3, 0), 2);
        assert_eq!(statuses, vec![SegmentStatus::Down, SegmentStatus::Down]);
        assert_eq!(up_percentage(&timeline(&[], at(1, 0), at(3, 0), 4)), 100.0);
    }

    #[test]
    fn statistics_average_over_bots() {
        let now = at(12, 0);
        let histories = vec![
            history(Vec::new()),
            history(vec![line(at(0, 0), LogLevel::Error, "Connection error: refused")]),
        ];
        let stats = uptime_statistics(&histories, Duration::from_secs(12 * 3_600), now);
        assert_eq!(stats.total_bots, 2);
        assert_eq!(stats.bot_stats[0].uptime, 100.0);
        assert_eq!(stats.bot_stats[0].timeline.len(), TIMELINE_SEGMENTS);
        assert_eq!(stats.bot_stats[1].uptime, 0.0);
        assert_eq!(stats.average_uptime, 50.0);
        assert_eq!(stats.incidents, 1);

        let empty = uptime_statistics(&[], Duration::from_secs(3_600), now);
        assert_eq!(empty.average_uptime, 100.0);
    }

    #[test]
    fn history_counts_incidents_per_interval() {
        let now = at(12, 0);
        let histories = vec![history(vec![
            line(at(11, 10), LogLevel::Warn, "Disconnected: Timed out"),
            line(at(11, 12), LogLevel::Info, "Bot spawned successfully!"),
        ])];
        let history = uptime_history(&histories, HistoryPeriod::LastHour, now);
        assert_eq!(history.data_points.len(), 60);
        assert_eq!(history.data_points[0].timestamp, at(11, 0));
        assert_eq!(history.data_points[10].incidents, 1);
        assert_eq!(history.data_points[10].uptime, 0.0);
        assert_eq!(history.data_points[11].uptime, 0.0);
        assert_eq!(history.data_points[12].uptime, 100.0);
        assert_eq!(history.summary.total_incidents, 1);
        assert_eq!(history.summary.min_uptime, 0.0);
        assert_eq!(history.summary.max_uptime, 100.0);
        assert_eq!(history.summary.average_uptime, round_to(5800.0 / 60.0, 2));
    }

    #[test]
    fn history_period_parsing_defaults_to_a_day() {
        assert_eq!(HistoryPeriod::parse(Some("7d")), HistoryPeriod::LastWeek);
        assert_eq!(HistoryPeriod::parse(Some("bogus")), HistoryPeriod::LastDay);
        assert_eq!(HistoryPeriod::parse(None).intervals(), 24);
        assert_eq!(HistoryPeriod::LastMonth.intervals(), 30);
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(7_380), "2h 3m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }
}
