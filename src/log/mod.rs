//! The structured, replayable domain log (grounded on `log/Log.hpp`,
//! `log/Item.hpp`, `log/FileLog.hpp`). Distinct from `tracing`: this is a
//! typed event stream consumed by the control-plane API and persisted
//! verbatim as JSON lines when `log.path` is configured, kept purely
//! in-memory (a bounded ring buffer) otherwise. Every entry also emits a
//! matching `tracing` event, so `tracing`'s subscriber stays the
//! developer-facing diagnostic channel regardless of whether file
//! persistence is enabled.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex as TokioMutex};

const RING_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Item {
    #[serde(rename = "logTime")]
    pub log_time: i64,
    #[serde(rename = "contextTime")]
    pub context_time: i64,
    #[serde(rename = "systemTime")]
    pub system_time: i64,
    pub level: Level,
    pub kind: String,
    pub message: String,
    #[serde(rename = "contextName")]
    pub context_name: String,
    #[serde(rename = "contextIndex")]
    pub context_index: Option<u64>,
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

struct Inner {
    ring: TokioMutex<VecDeque<Item>>,
    writer: Option<mpsc::Sender<Item>>,
}

#[derive(Clone)]
pub struct Log {
    inner: Arc<Inner>,
}

impl Log {
    pub fn new_memory() -> Self {
        Log {
            inner: Arc::new(Inner {
                ring: TokioMutex::new(VecDeque::with_capacity(RING_CAPACITY)),
                writer: None,
            }),
        }
    }

    /// Opens (creating/truncating) a JSON-lines log file and spawns a
    /// single background task that appends entries in call order.
    pub fn new_file(path: PathBuf) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::channel::<Item>(1024);
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let mut file = tokio::fs::File::from_std(file);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            while let Some(item) = rx.recv().await {
                if let Ok(mut line) = serde_json::to_vec(&item) {
                    line.push(b'\n');
                    let _ = file.write_all(&line).await;
                }
            }
        });
        Ok(Log {
            inner: Arc::new(Inner {
                ring: TokioMutex::new(VecDeque::with_capacity(RING_CAPACITY)),
                writer: Some(tx),
            }),
        })
    }

    pub fn context(&self, name: impl Into<String>, index: Option<u64>) -> Context {
        Context {
            log: self.clone(),
            name: name.into(),
            index,
            start: now_micros(),
        }
    }

    async fn record(&self, item: Item) {
        {
            let mut ring = self.inner.ring.lock().await;
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(item.clone());
        }
        if let Some(writer) = &self.inner.writer {
            let _ = writer.send(item).await;
        }
    }

    pub async fn recent(&self, n: usize) -> Vec<Item> {
        let ring = self.inner.ring.lock().await;
        ring.iter().rev().take(n).rev().cloned().collect()
    }
}

impl Default for Log {
    fn default() -> Self {
        Log::new_memory()
    }
}

/// A cheap, cloneable handle bound to a component name (and optional
/// index) that appends entries to a shared [`Log`].
#[derive(Clone)]
pub struct Context {
    log: Log,
    name: String,
    index: Option<u64>,
    start: i64,
}

impl Context {
    fn emit(&self, level: Level, kind: &str, message: &str) {
        let item = Item {
            log_time: now_micros(),
            context_time: now_micros() - self.start,
            system_time: now_micros(),
            level,
            kind: kind.to_string(),
            message: message.to_string(),
            context_name: self.name.clone(),
            context_index: self.index,
        };
        match level {
            Level::Debug => tracing::debug!(context = %self.name, kind, "{}", message),
            Level::Info => tracing::info!(context = %self.name, kind, "{}", message),
            Level::Warning => tracing::warn!(context = %self.name, kind, "{}", message),
            Level::Error | Level::Fatal => tracing::error!(context = %self.name, kind, "{}", message),
        }
        let log = self.log.clone();
        tokio::spawn(async move { log.record(item).await });
    }

    pub fn debug(&self, message: &str) {
        self.emit(Level::Debug, "", message);
    }
    pub fn info(&self, message: &str) {
        self.emit(Level::Info, "", message);
    }
    pub fn warn(&self, message: &str) {
        self.emit(Level::Warning, "", message);
    }
    pub fn error(&self, message: &str) {
        self.emit(Level::Error, "", message);
    }
    pub fn fatal(&self, message: &str) {
        self.emit(Level::Fatal, "", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_entries_in_memory() {
        let log = Log::new_memory();
        let ctx = log.context("segment", Some(3));
        ctx.info("hello");
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "hello");
        assert_eq!(recent[0].context_name, "segment");
        assert_eq!(recent[0].context_index, Some(3));
    }

    #[tokio::test]
    async fn ring_buffer_is_bounded() {
        let log = Log::new_memory();
        let ctx = log.context("x", None);
        for i in 0..(RING_CAPACITY + 10) {
            ctx.debug(&format!("{i}"));
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let recent = log.recent(RING_CAPACITY + 10).await;
        assert!(recent.len() <= RING_CAPACITY);
    }
}
