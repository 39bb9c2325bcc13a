//! Shared fixtures for integration tests: scripted adapters and raw frames.

#![allow(dead_code)]

use chrono::NaiveDate;
use marketlake_core::data::{ProviderAdapter, ProviderFailure, ProviderResult, RawFrame, RawValue, Reliability};
use marketlake_core::domain::{day_start, OhlcvRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Adapter that always returns the same outcome and counts its calls.
pub struct MockAdapter {
    name: String,
    reliability: Reliability,
    outcome: ProviderResult,
    calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(name: &str, outcome: ProviderResult) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reliability: Reliability::Primary,
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fallback(name: &str, outcome: ProviderResult) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reliability: Reliability::Fallback,
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        0
    }

    fn reliability(&self) -> Reliability {
        self.reliability
    }

    fn fetch(&self, _symbol: &str) -> ProviderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

pub fn transport_failure() -> ProviderResult {
    Err(ProviderFailure::Transport("connection reset by peer".into()))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Daily bar with a close that identifies it in assertions.
pub fn bar(day: NaiveDate, close: f64) -> OhlcvRecord {
    OhlcvRecord {
        timestamp: day_start(day),
        open: close - 1.0,
        high: close + 1.0,
        low: close - 2.0,
        close,
        volume: 1_000_000,
    }
}

/// Provider-style frame with capitalized headers, text cells and an extra column.
pub fn raw_frame(bars: &[OhlcvRecord]) -> RawFrame {
    let text = |f: &dyn Fn(&OhlcvRecord) -> String| -> Vec<RawValue> {
        bars.iter().map(|b| RawValue::Text(f(b))).collect()
    };
    RawFrame::new()
        .with_column("Date", text(&|b| b.date().format("%Y-%m-%d").to_string()))
        .with_column("Open", text(&|b| b.open.to_string()))
        .with_column("High", text(&|b| b.high.to_string()))
        .with_column("Low", text(&|b| b.low.to_string()))
        .with_column("Close", text(&|b| b.close.to_string()))
        .with_column("Adj Close", text(&|b| b.close.to_string()))
        .with_column("Volume", text(&|b| b.volume.to_string()))
}
