//! Structured logging sink shared by every job.
//!
//! Components receive a [`LogSink`] handle instead of reaching for a global
//! logger. Each record carries the operator-facing keyword together with the
//! chain, protocol and function it came from and is emitted through `tracing`
//! right away. The sink itself only keeps a count per keyword, which
//! [`LogSink::flush`] reports and resets; tests additionally see the records.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Keyword {
    Timeout,
    MissingValues,
    MissingBlocks,
    Critical,
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Keyword::Timeout => "timeout",
            Keyword::MissingValues => "missingValues",
            Keyword::MissingBlocks => "missingBlocks",
            Keyword::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub error: String,
    pub keyword: Keyword,
    pub chain: String,
    pub protocol_id: i32,
    pub function: String,
}

/// Where a log record originates. Built once per job/chain and cloned down.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub chain: String,
    pub protocol_id: i32,
}

impl LogContext {
    pub fn new(chain: impl Into<String>, protocol_id: i32) -> Self {
        Self {
            chain: chain.into(),
            protocol_id,
        }
    }
}

#[derive(Clone, Default)]
pub struct LogSink {
    counts: Arc<Mutex<BTreeMap<Keyword, usize>>>,
    #[cfg(test)]
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl LogSink {
    pub fn init() -> Self {
        Self::default()
    }

    pub fn log(&self, ctx: &LogContext, function: &str, keyword: Keyword, error: impl Into<String>) {
        let event = LogEvent {
            error: error.into(),
            keyword,
            chain: ctx.chain.clone(),
            protocol_id: ctx.protocol_id,
            function: function.to_string(),
        };

        match keyword {
            Keyword::Critical => error!(
                keyword = %event.keyword,
                chain = %event.chain,
                protocol_id = event.protocol_id,
                function = %event.function,
                "{}",
                event.error
            ),
            _ => warn!(
                keyword = %event.keyword,
                chain = %event.chain,
                protocol_id = event.protocol_id,
                function = %event.function,
                "{}",
                event.error
            ),
        }

        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(keyword).or_default() += 1;
        }
        self.remember(event);
    }

    #[cfg(test)]
    fn remember(&self, event: LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    #[cfg(not(test))]
    fn remember(&self, _event: LogEvent) {}

    pub fn missing_values(&self, ctx: &LogContext, function: &str, error: impl Into<String>) {
        self.log(ctx, function, Keyword::MissingValues, error);
    }

    pub fn critical(&self, ctx: &LogContext, function: &str, error: impl Into<String>) {
        self.log(ctx, function, Keyword::Critical, error);
    }

    /// Records logged since the last flush.
    #[cfg(test)]
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, keyword: Keyword) -> usize {
        self.counts
            .lock()
            .map(|c| c.get(&keyword).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn forget(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    #[cfg(not(test))]
    fn forget(&self) {}

    /// Emits a per-keyword summary and resets the counts.
    pub fn flush(&self) {
        let counts = match self.counts.lock() {
            Ok(mut counts) => std::mem::take(&mut *counts),
            Err(_) => return,
        };
        self.forget();
        let total: usize = counts.values().sum();
        if total == 0 {
            return;
        }
        let summary = counts
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        info!("Log sink flushed {} structured events: {}", total, summary);
    }
}
