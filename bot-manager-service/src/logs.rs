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
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use keepalive_common::{LogEntry, LogLevel};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub type SubscriptionId = u64;

/// Fan-out of log entries to live subscribers, in the order they were produced.
#[derive(Default)]
pub struct LogBroadcaster {
    subscribers: Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<LogEntry>)>>,
    next_id: AtomicU64,
}

impl LogBroadcaster {
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<LogEntry>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        debug!(subscription_id = id, "log subscriber added");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(entry_id, _)| *entry_id != id);
        before != subscribers.len()
    }

    /// Deliver to every subscriber; those whose receiver is gone are dropped.
    pub fn publish(&self, entry: LogEntry) {
        let mut subscribers = self.lock();
        subscribers.retain(|(id, tx)| {
            let delivered = tx.send(entry.clone()).is_ok();
            if !delivered {
                debug!(subscription_id = *id, "dropping closed log subscriber");
            }
            delivered
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, mpsc::UnboundedSender<LogEntry>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// JSON-lines log file of a single bot with size based rotation.
#[derive(Debug, Clone)]
pub struct BotLogFile {
    dir: PathBuf,
    bot_id: String,
    max_size: u64,
}

impl BotLogFile {
    pub fn new(dir: impl Into<PathBuf>, bot_id: &str, max_size: u64) -> Self {
        Self {
            dir: dir.into(),
            bot_id: bot_id.to_string(),
            max_size,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("bot-{}.log", self.bot_id))
    }

    pub fn append(&self, entry: &LogEntry) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create log dir {}", self.dir.display()))?;
        let path = self.path();
        let line = serde_json::to_string(entry).context("failed to encode log entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("failed to write {}", path.display()))?;

        if file.metadata().map(|meta| meta.len()).unwrap_or(0) > self.max_size {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&self) -> anyhow::Result<()> {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let backup_name = format!("bot-{}_{stamp}.log", self.bot_id);
        let path = self.path();
        fs::rename(&path, self.dir.join(&backup_name))
            .with_context(|| format!("failed to rotate {}", path.display()))?;
        let note = LogEntry::system(format!("Log rotated. Previous log saved as: {backup_name}"));
        self.rewrite_with(&note)?;
        info!(bot_id = %self.bot_id, backup = %backup_name, "bot log rotated");
        Ok(())
    }

    /// Last `max_lines` entries. Lines that are not valid entries come back as plain messages.
    pub fn recent(&self, max_lines: usize) -> anyhow::Result<Vec<LogEntry>> {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        let lines: Vec<&str> = content.lines().filter(|line| !line.trim().is_empty()).collect();
        let skip = lines.len().saturating_sub(max_lines);
        Ok(lines[skip..]
            .iter()
            .map(|line| {
                serde_json::from_str::<LogEntry>(line).unwrap_or_else(|_| LogEntry {
                    timestamp: Utc::now(),
                    message: line.to_string(),
                    level: LogLevel::Info,
                    source: "unknown".to_string(),
                    bot_id: None,
                })
            })
            .collect())
    }

    pub fn stats(&self) -> anyhow::Result<LogFileStats> {
        let path = self.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(LogFileStats::default()),
            Err(error) => return Err(error).with_context(|| format!("failed to stat {}", path.display())),
        };
        let content =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(LogFileStats {
            exists: true,
            size: metadata.len(),
            lines: content.lines().filter(|line| !line.trim().is_empty()).count(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create log dir {}", self.dir.display()))?;
        self.rewrite_with(&LogEntry::system("Logs cleared by user"))
    }

    /// Delete the current file and every rotated backup.
    pub fn remove(&self) -> anyhow::Result<()> {
        let backup_prefix = format!("bot-{}_", self.bot_id);
        remove_if_exists(&self.path())?;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error).context("failed to list log dir"),
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&backup_prefix) && name.ends_with(".log") {
                remove_if_exists(&entry.path())?;
            }
        }
        Ok(())
    }

    fn rewrite_with(&self, entry: &LogEntry) -> anyhow::Result<()> {
        let path = self.path();
        let line = serde_json::to_string(entry).context("failed to encode log entry")?;
        fs::write(&path, format!("{line}\n"))
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileStats {
    pub exists: bool,
    pub size: u64,
    pub lines: usize,
    pub last_modified: Option<DateTime<Utc>>,
}

enum FileOp {
    Append(LogEntry),
    Clear(oneshot::Sender<anyhow::Result<()>>),
    Remove(oneshot::Sender<anyhow::Result<()>>),
    Flush(oneshot::Sender<()>),
}

/// Owner of one bot's log file. Writes happen on a blocking worker, in submission order.
#[derive(Clone)]
pub struct LogFileWriter {
    file: BotLogFile,
    ops: mpsc::UnboundedSender<FileOp>,
}

impl LogFileWriter {
    pub fn spawn(file: BotLogFile) -> Self {
        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_file_writer(file.clone(), rx));
        Self { file, ops }
    }

    pub fn path(&self) -> PathBuf {
        self.file.path()
    }

    fn append(&self, entry: LogEntry) {
        if self.ops.send(FileOp::Append(entry)).is_err() {
            debug!(path = %self.file.path().display(), "log writer gone, dropping line");
        }
    }

    async fn submit<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> FileOp,
    ) -> anyhow::Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops
            .send(build(reply_tx))
            .map_err(|_| anyhow::anyhow!("log writer stopped"))?;
        reply_rx.await.context("log writer stopped")
    }

    /// Resolves once every line submitted before this call is on disk.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.submit(FileOp::Flush).await
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.submit(FileOp::Clear).await?
    }

    pub async fn remove(&self) -> anyhow::Result<()> {
        self.submit(FileOp::Remove).await?
    }

    pub async fn recent(&self, max_lines: usize) -> anyhow::Result<Vec<LogEntry>> {
        self.flush().await?;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.recent(max_lines))
            .await
            .context("log reader task failed")?
    }

    pub async fn stats(&self) -> anyhow::Result<LogFileStats> {
        self.flush().await?;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.stats())
            .await
            .context("log reader task failed")?
    }
}

async fn run_file_writer(file: BotLogFile, mut ops: mpsc::UnboundedReceiver<FileOp>) {
    while let Some(op) = ops.recv().await {
        let mut batch = vec![op];
        while let Ok(op) = ops.try_recv() {
            batch.push(op);
        }
        let file = file.clone();
        if let Err(error) = tokio::task::spawn_blocking(move || apply_batch(&file, batch)).await {
            error!(error = %error, "bot log writer panicked");
        }
    }
}

fn apply_batch(file: &BotLogFile, batch: Vec<FileOp>) {
    for op in batch {
        match op {
            FileOp::Append(entry) => {
                if let Err(error) = file.append(&entry) {
                    warn!(bot_id = %file.bot_id, error = %format!("{error:#}"), "failed to append bot log file");
                }
            }
            FileOp::Clear(reply) => {
                let _ = reply.send(file.clear());
            }
            FileOp::Remove(reply) => {
                let _ = reply.send(file.remove());
            }
            FileOp::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Per-bot log sink: tracing event, log file and live broadcast.
#[derive(Clone)]
pub struct BotLogger {
    bot_id: String,
    file: Option<LogFileWriter>,
    broadcaster: Arc<LogBroadcaster>,
}

impl BotLogger {
    pub fn new(
        bot_id: &str,
        file: Option<LogFileWriter>,
        broadcaster: Arc<LogBroadcaster>,
    ) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            file,
            broadcaster,
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::for_bot(&self.bot_id, level, message);
        match level {
            LogLevel::Debug => debug!(bot_id = %self.bot_id, "{}", entry.message),
            LogLevel::Info => info!(bot_id = %self.bot_id, "{}", entry.message),
            LogLevel::Warn => warn!(bot_id = %self.bot_id, "{}", entry.message),
            LogLevel::Error => error!(bot_id = %self.bot_id, "{}", entry.message),
        }
        if let Some(file) = &self.file {
            file.append(entry.clone());
        }
        self.broadcaster.publish(entry);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_preserves_order_and_drops_closed_subscribers() {
        let broadcaster = LogBroadcaster::default();
        let (_, mut first) = broadcaster.subscribe();
        let (_, second) = broadcaster.subscribe();
        drop(second);

        for message in ["one", "two", "three"] {
            broadcaster.publish(LogEntry::system(message));
        }

        assert_eq!(broadcaster.subscriber_count(), 1);
        let received: Vec<String> = std::iter::from_fn(|| first.try_recv().ok())
            .map(|entry| entry.message)
            .collect();
        assert_eq!(received, vec!["one", "two", "three"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broadcaster = LogBroadcaster::default();
        let (id, mut rx) = broadcaster.subscribe();
        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        broadcaster.publish(LogEntry::system("after"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn log_file_appends_reads_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let file = BotLogFile::new(dir.path(), "abc", 1024 * 1024);
        for index in 0..5 {
            file.append(&LogEntry::for_bot("abc", LogLevel::Info, format!("line {index}")))
                .unwrap();
        }

        let recent = file.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "line 3");
        assert_eq!(recent[1].message, "line 4");

        file.clear().unwrap();
        let after = file.recent(10).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].message, "Logs cleared by user");
    }

    #[test]
    fn log_file_rotates_when_over_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = BotLogFile::new(dir.path(), "rot", 200);
        for index in 0..10 {
            file.append(&LogEntry::for_bot("rot", LogLevel::Info, format!("entry {index}")))
                .unwrap();
        }

        let backups = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("bot-rot_"))
            .count();
        assert!(backups >= 1);
        assert!(fs::metadata(file.path()).unwrap().len() <= 400);

        file.remove().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_log_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = BotLogFile::new(dir.path().join("nested"), "none", 1024);
        assert!(file.recent(10).unwrap().is_empty());
        file.remove().unwrap();
    }

    #[test]
    fn malformed_lines_come_back_as_plain_messages() {
        let dir = tempfile::tempdir().unwrap();
        let file = BotLogFile::new(dir.path(), "raw", 1024);
        fs::write(file.path(), "not json\n").unwrap();
        let recent = file.recent(5).unwrap();
        assert_eq!(recent[0].message, "not json");
        assert_eq!(recent[0].source, "unknown");
    }

    #[test]
    fn bot_logger_publishes_entries_with_bot_source() {
        let broadcaster = Arc::new(LogBroadcaster::default());
        let (_, mut rx) = broadcaster.subscribe();
        let logger = BotLogger::new("b1", None, broadcaster);
        logger.warn("Reconnecting in 5s");
        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.source, "bot-b1");
        assert_eq!(entry.bot_id.as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn writer_keeps_submission_order_across_clear() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogFileWriter::spawn(BotLogFile::new(dir.path(), "w1", 1024 * 1024));
        let logger = BotLogger::new("w1", Some(writer.clone()), Arc::new(LogBroadcaster::default()));

        logger.info("before clear");
        writer.clear().await.unwrap();
        logger.info("first");
        logger.warn("second");

        let messages: Vec<String> = writer
            .recent(10)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(messages, vec!["Logs cleared by user", "first", "second"]);

        let stats = writer.stats().await.unwrap();
        assert!(stats.exists);
        assert_eq!(stats.lines, 3);
        assert!(stats.size > 0);
        assert!(stats.last_modified.is_some());
    }

    #[tokio::test]
    async fn writer_remove_runs_after_pending_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogFileWriter::spawn(BotLogFile::new(dir.path(), "w2", 1024 * 1024));
        let logger = BotLogger::new("w2", Some(writer.clone()), Arc::new(LogBroadcaster::default()));
        for index in 0..20 {
            logger.info(format!("line {index}"));
        }
        writer.remove().await.unwrap();
        assert!(!writer.path().exists());
        assert_eq!(writer.stats().await.unwrap(), LogFileStats::default());
    }
}
