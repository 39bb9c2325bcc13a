//! Ingestion pipeline: resolve → validate → write, per symbol and in batches.

use super::resolver::{AttemptFailure, Exhausted, Resolver};
use super::provider::Reliability;
use super::store::{PartitionedStore, StoreError, WriteReport};
use super::validate::{validate, ValidationError};
use crate::domain::{check_symbol, InvalidSymbol};
use crate::manifest::{RunManifest, SymbolOutcome};
use chrono::Utc;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

/// Per-symbol failure record. Never aborts a batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    InvalidSymbol(#[from] InvalidSymbol),

    #[error(transparent)]
    Exhausted(#[from] Exhausted),

    #[error("validation failed for '{symbol}': {source}")]
    Validation {
        symbol: String,
        #[source]
        source: ValidationError,
    },

    #[error("storage failed for '{symbol}': {source}")]
    Storage {
        symbol: String,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    pub fn symbol(&self) -> &str {
        match self {
            IngestError::InvalidSymbol(e) => &e.symbol,
            IngestError::Exhausted(e) => &e.symbol,
            IngestError::Validation { symbol, .. } | IngestError::Storage { symbol, .. } => symbol,
        }
    }

    /// Short stage label for reports.
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::InvalidSymbol(_) => "input",
            IngestError::Exhausted(_) => "resolve",
            IngestError::Validation { .. } => "validate",
            IngestError::Storage { .. } => "store",
        }
    }
}

/// Successful ingestion of one symbol.
#[derive(Debug, Clone)]
pub struct SymbolReport {
    pub symbol: String,
    pub source: String,
    pub reliability: Reliability,
    pub fallback_trail: Vec<AttemptFailure>,
    pub rows: usize,
    pub write: WriteReport,
}

/// Progress callback for batch runs. Called from worker threads when `jobs > 1`.
pub trait IngestProgress: Send + Sync {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(
        &self,
        symbol: &str,
        index: usize,
        total: usize,
        result: &Result<SymbolReport, IngestError>,
    );

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Ingesting {symbol}...", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<SymbolReport, IngestError>,
    ) {
        match result {
            Ok(report) => println!(
                "  OK: {symbol} ({} rows from {}, {} partition(s), {} rewritten)",
                report.rows,
                report.source,
                report.write.partitions.len(),
                report.write.rewritten()
            ),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nUpdate complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Progress reporter that discards everything.
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<SymbolReport, IngestError>) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
}

pub struct Pipeline {
    resolver: Resolver,
    store: PartitionedStore,
}

impl Pipeline {
    pub fn new(resolver: Resolver, store: PartitionedStore) -> Self {
        Self { resolver, store }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn store(&self) -> &PartitionedStore {
        &self.store
    }

    /// Ingest one symbol. A validation failure leaves the store untouched.
    ///
    /// Symbols that cannot name a single path component are rejected before
    /// any provider is called.
    pub fn ingest_symbol(&self, symbol: &str) -> Result<SymbolReport, IngestError> {
        check_symbol(symbol)?;
        let resolved = self.resolver.resolve(symbol)?;

        let frame = validate(resolved.frame).map_err(|source| {
            warn!(
                event_type = "validation_failed",
                symbol,
                provider = %resolved.source,
                check = ?source.check(),
                error = %source,
                "rejecting frame"
            );
            IngestError::Validation {
                symbol: symbol.to_string(),
                source,
            }
        })?;

        let write = self.store.write(&frame).map_err(|source| IngestError::Storage {
            symbol: symbol.to_string(),
            source,
        })?;

        Ok(SymbolReport {
            symbol: symbol.to_string(),
            source: resolved.source,
            reliability: resolved.reliability,
            fallback_trail: resolved.fallback_trail,
            rows: frame.len(),
            write,
        })
    }

    /// Ingest every symbol independently and collect a run manifest.
    ///
    /// `jobs > 1` runs symbols on a private rayon pool; the manifest keeps
    /// input order either way.
    pub fn run_batch(
        &self,
        symbols: &[String],
        jobs: usize,
        progress: &dyn IngestProgress,
    ) -> RunManifest {
        let started_at = Utc::now();
        let total = symbols.len();

        let ingest = |(index, symbol): (usize, &String)| {
            progress.on_start(symbol, index, total);
            let result = self.ingest_symbol(symbol);
            progress.on_complete(symbol, index, total, &result);
            SymbolOutcome::from_result(symbol, &result)
        };

        let outcomes: Vec<SymbolOutcome> = if jobs > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
                Ok(pool) => pool.install(|| symbols.par_iter().enumerate().map(ingest).collect()),
                Err(e) => {
                    warn!(error = %e, jobs, "failed to build worker pool, running sequentially");
                    symbols.iter().enumerate().map(ingest).collect()
                }
            }
        } else {
            symbols.iter().enumerate().map(ingest).collect()
        };

        let manifest = RunManifest::new(
            started_at,
            Utc::now(),
            self.resolver.provider_names().iter().map(|s| s.to_string()).collect(),
            outcomes,
        );
        let (succeeded, failed) = (manifest.succeeded(), manifest.failed());
        progress.on_batch_complete(succeeded, failed, total);
        info!(
            event_type = "batch_complete",
            run_id = %manifest.run_id,
            total,
            succeeded,
            failed,
            "batch finished"
        );
        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{ProviderAdapter, ProviderFailure, ProviderResult, RawFrame, RawValue};
    use std::sync::Arc;

    struct Fixed(ProviderResult);

    impl ProviderAdapter for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn priority(&self) -> u32 {
            0
        }
        fn reliability(&self) -> Reliability {
            Reliability::Primary
        }
        fn fetch(&self, _symbol: &str) -> ProviderResult {
            self.0.clone()
        }
    }

    fn frame(dates: &[&str]) -> RawFrame {
        let col = |v: &str| -> Vec<RawValue> { dates.iter().map(|_| RawValue::Text(v.into())).collect() };
        RawFrame::new()
            .with_column("Date", dates.iter().map(|d| RawValue::Text(d.to_string())).collect())
            .with_column("Open", col("1"))
            .with_column("High", col("2"))
            .with_column("Low", col("0.5"))
            .with_column("Close", col("1.5"))
            .with_column("Volume", col("10"))
    }

    fn pipeline(result: ProviderResult, dir: &std::path::Path) -> Pipeline {
        Pipeline::new(
            Resolver::new(vec![Arc::new(Fixed(result))]),
            PartitionedStore::new(dir),
        )
    }

    #[test]
    fn validation_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Ok(frame(&["2024-01-02", "2024-01-02"])), dir.path());

        let err = p.ingest_symbol("AAPL").unwrap_err();
        assert_eq!(err.stage(), "validate");
        assert!(p.store().symbols().unwrap().is_empty());
    }

    #[test]
    fn exhaustion_is_reported_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Err(ProviderFailure::EmptyPayload), dir.path());

        let err = p.ingest_symbol("ZZZZ").unwrap_err();
        assert_eq!(err.stage(), "resolve");
        assert_eq!(err.symbol(), "ZZZZ");
    }

    #[test]
    fn path_like_symbol_is_rejected_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Ok(frame(&["2024-01-02"])), dir.path());

        for symbol in ["../X", "A/B"] {
            let err = p.ingest_symbol(symbol).unwrap_err();
            assert!(matches!(err, IngestError::InvalidSymbol(_)));
            assert_eq!(err.stage(), "input");
            assert_eq!(err.symbol(), symbol);
        }
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn batch_keeps_input_order_with_parallel_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Ok(frame(&["2024-01-02", "2024-01-03"])), dir.path());
        let symbols: Vec<String> = ["MSFT", "AAPL", "SPY", "QQQ"].map(String::from).to_vec();

        let manifest = p.run_batch(&symbols, 3, &NoProgress);
        let order: Vec<&str> = manifest.symbols.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(order, ["MSFT", "AAPL", "SPY", "QQQ"]);
        assert_eq!(manifest.succeeded(), 4);
        assert_eq!(p.store().symbols().unwrap(), ["AAPL", "MSFT", "QQQ", "SPY"]);
    }
}
