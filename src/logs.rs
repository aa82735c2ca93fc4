//! Shared log buffer
//!
//! Output of every supervised process lands in one bounded, timestamped
//! buffer. Entries are tagged with their source (the role display name) so
//! callers can filter; there is no per-instance storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Source tag used for the orchestrator's own messages
pub const ORCHESTRATOR_SOURCE: &str = "orchestrator";

/// One line of output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub line: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.source,
            self.line
        )
    }
}

/// Bounded ring of log entries shared by all instances
#[derive(Debug)]
pub struct LogAggregator {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    trim: usize,
    live: broadcast::Sender<LogEntry>,
}

impl LogAggregator {
    /// `capacity` is the soft cap; `trim` entries are dropped when it is exceeded
    pub fn new(capacity: usize, trim: usize) -> Self {
        let capacity = capacity.max(1);
        let trim = trim.clamp(1, capacity);
        let (live, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
            trim,
            live,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, source: &str, line: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            source: source.to_string(),
            line: line.into(),
        };

        {
            let mut entries = self.lock();
            entries.push_back(entry.clone());
            if entries.len() > self.capacity {
                entries.drain(..self.trim);
            }
        }

        // No subscribers is fine
        let _ = self.live.send(entry);
    }

    /// Copy of every buffered entry, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Buffered entries of one source, oldest first
    pub fn filter(&self, source: &str) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.source == source)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Live feed of entries appended from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new(500, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_snapshot_order() {
        let logs = LogAggregator::default();
        logs.append("Code Assistant", "loading model");
        logs.append("Model Router", "listening");

        let snapshot = logs.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].line, "loading model");
        assert_eq!(snapshot[1].source, "Model Router");
    }

    #[test]
    fn test_overflow_trims_oldest() {
        let logs = LogAggregator::new(500, 100);
        for i in 0..501 {
            logs.append("src", format!("line {}", i));
        }

        let snapshot = logs.snapshot();
        assert_eq!(snapshot.len(), 401);
        assert_eq!(snapshot.first().unwrap().line, "line 100");
        assert_eq!(snapshot.last().unwrap().line, "line 500");
    }

    #[test]
    fn test_never_exceeds_cap_after_append() {
        let logs = LogAggregator::new(20, 5);
        for i in 0..1000 {
            logs.append("src", format!("{}", i));
            assert!(logs.len() <= 20);
        }

        let lines: Vec<u32> = logs
            .snapshot()
            .iter()
            .map(|e| e.line.parse().unwrap())
            .collect();
        assert!(lines.windows(2).all(|w| w[0] + 1 == w[1]));
        assert_eq!(*lines.last().unwrap(), 999);
    }

    #[test]
    fn test_filter_by_source() {
        let logs = LogAggregator::default();
        logs.append("Embedder", "a");
        logs.append("Reasoner", "b");
        logs.append("Embedder", "c");

        let embedder: Vec<_> = logs.filter("Embedder").into_iter().map(|e| e.line).collect();
        assert_eq!(embedder, vec!["a", "c"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let logs = LogAggregator::default();
        logs.append("src", "first");
        let snapshot = logs.snapshot();
        logs.append("src", "second");
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_live_feed() {
        let logs = LogAggregator::default();
        let mut rx = logs.subscribe();
        logs.append("Summarizer", "ready");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.line, "ready");
        assert!(entry.to_string().contains("[Summarizer] ready"));
    }
}
