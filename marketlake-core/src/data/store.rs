//! Partitioned Parquet store with Hive-style layout.
//!
//! Layout: `{root}/symbol={SYMBOL}/year={YYYY}/month={MM}/data.parquet`
//!
//! Features:
//! - Merge-on-write: existing rows for a key are loaded, new rows win on
//!   timestamp conflicts, result re-sorted ascending
//! - Atomic replace (write to a temp file in the same directory, fsync, rename)
//! - Unchanged partitions are not rewritten, so re-runs leave files byte-identical
//! - Writers to the same key are serialized in-process
//! - Exact schema check on read-back

use super::schema::{SchemaError, StorageSchema};
use super::validate::ValidatedFrame;
use crate::domain::{Field, OhlcvRecord, PartitionKey, PARTITION_FILE};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parquet error at {}: {message}", .path.display())]
    Parquet { path: PathBuf, message: String },

    #[error("schema mismatch in {}: {source}", .path.display())]
    SchemaMismatch {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },

    #[error("corrupt partition {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("no partition {0}")]
    NotFound(PartitionKey),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn parquet_err(path: &Path) -> impl FnOnce(PolarsError) -> StoreError + '_ {
    move |e| StoreError::Parquet {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Outcome of writing one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWrite {
    pub key: PartitionKey,
    /// Rows in the partition before this write (0 for a new partition).
    pub rows_before: usize,
    /// Rows contributed by the incoming frame.
    pub rows_incoming: usize,
    /// Rows in the partition after the merge.
    pub rows_after: usize,
    /// False when the merge reproduced the existing contents and the file was left alone.
    pub rewritten: bool,
    /// BLAKE3 of the merged rows.
    pub content_hash: String,
}

/// Result of [`PartitionedStore::write`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub symbol: String,
    pub partitions: Vec<PartitionWrite>,
}

impl WriteReport {
    pub fn rows_after(&self) -> usize {
        self.partitions.iter().map(|p| p.rows_after).sum()
    }

    pub fn rewritten(&self) -> usize {
        self.partitions.iter().filter(|p| p.rewritten).count()
    }
}

/// Summary of one stored partition, for status listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub key: PartitionKey,
    pub rows: usize,
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub bytes: u64,
}

/// The partitioned store.
pub struct PartitionedStore {
    root: PathBuf,
    locks: Mutex<HashMap<PartitionKey, Arc<Mutex<()>>>>,
}

impl PartitionedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the lake.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_lock(&self, key: &PartitionKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Write a validated frame, merging each month into its existing partition.
    ///
    /// Each partition is replaced atomically. If a later partition fails, the
    /// earlier ones stay written; no partition is ever left half-written.
    pub fn write(&self, frame: &ValidatedFrame) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport {
            symbol: frame.symbol().to_string(),
            partitions: Vec::new(),
        };
        for (key, records) in frame.partitions() {
            report.partitions.push(self.write_partition(&key, records)?);
        }
        Ok(report)
    }

    fn write_partition(
        &self,
        key: &PartitionKey,
        incoming: &[OhlcvRecord],
    ) -> Result<PartitionWrite, StoreError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = key.data_path(&self.root);
        let existing = if path.exists() {
            read_parquet(&path)?
        } else {
            Vec::new()
        };

        let merged = merge(&existing, incoming);
        let rewritten = merged != existing;
        if rewritten {
            let mut df = records_to_dataframe(&merged, &path)?;
            write_atomic(&mut df, &path)?;
        }

        let write = PartitionWrite {
            key: key.clone(),
            rows_before: existing.len(),
            rows_incoming: incoming.len(),
            rows_after: merged.len(),
            rewritten,
            content_hash: content_hash(&merged),
        };
        info!(
            event_type = "partition_write",
            partition = %key,
            rows_before = write.rows_before,
            rows_after = write.rows_after,
            rewritten,
            "partition merged"
        );
        Ok(write)
    }

    /// Read one partition, sorted ascending.
    pub fn read_partition(&self, key: &PartitionKey) -> Result<Vec<OhlcvRecord>, StoreError> {
        let path = key.data_path(&self.root);
        if !path.exists() {
            return Err(StoreError::NotFound(key.clone()));
        }
        read_parquet(&path)
    }

    /// Read every partition of a symbol, concatenated in time order.
    pub fn read_symbol(&self, symbol: &str) -> Result<Vec<OhlcvRecord>, StoreError> {
        let mut records = Vec::new();
        for key in self.partitions(symbol)? {
            records.extend(self.read_partition(&key)?);
        }
        Ok(records)
    }

    /// Partition keys present for a symbol, sorted by (year, month).
    pub fn partitions(&self, symbol: &str) -> Result<Vec<PartitionKey>, StoreError> {
        let symbol_dir = self.root.join(PartitionKey::symbol_dir_name(symbol));
        let mut keys = Vec::new();
        for year_dir in subdirs(&symbol_dir)? {
            for month_dir in subdirs(&year_dir)? {
                let (Some(year), Some(month)) = (dir_name(&year_dir), dir_name(&month_dir)) else {
                    continue;
                };
                let Some(key) = PartitionKey::from_dir_names(symbol, year, month) else {
                    debug!(path = %month_dir.display(), "skipping non-partition directory");
                    continue;
                };
                if month_dir.join(PARTITION_FILE).is_file() {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Symbols with a `symbol=` directory under the root, sorted.
    pub fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut symbols: Vec<String> = subdirs(&self.root)?
            .iter()
            .filter_map(|dir| dir_name(dir)?.strip_prefix("symbol=").map(str::to_string))
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    /// Row count, date range and file size for each partition of a symbol.
    pub fn describe(&self, symbol: &str) -> Result<Vec<PartitionInfo>, StoreError> {
        self.partitions(symbol)?
            .into_iter()
            .map(|key| {
                let path = key.data_path(&self.root);
                let records = read_parquet(&path)?;
                let bytes = fs::metadata(&path).map_err(io_err(&path))?.len();
                let (Some(first), Some(last)) = (records.first(), records.last()) else {
                    return Err(StoreError::Corrupt {
                        path,
                        reason: "partition has no rows".into(),
                    });
                };
                Ok(PartitionInfo {
                    rows: records.len(),
                    first: first.date(),
                    last: last.date(),
                    bytes,
                    key,
                })
            })
            .collect()
    }
}

/// Merge incoming rows over existing ones: union by timestamp, incoming wins, ascending.
fn merge(existing: &[OhlcvRecord], incoming: &[OhlcvRecord]) -> Vec<OhlcvRecord> {
    let mut by_ts: BTreeMap<DateTime<Utc>, &OhlcvRecord> = BTreeMap::new();
    for record in existing.iter().chain(incoming) {
        by_ts.insert(record.timestamp, record);
    }
    by_ts.into_values().cloned().collect()
}

fn content_hash(records: &[OhlcvRecord]) -> String {
    let mut hasher = blake3::Hasher::new();
    for r in records {
        hasher.update(&r.timestamp.timestamp_millis().to_le_bytes());
        for price in [r.open, r.high, r.low, r.close] {
            hasher.update(&price.to_bits().to_le_bytes());
        }
        hasher.update(&r.volume.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(io_err(dir))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn records_to_dataframe(records: &[OhlcvRecord], path: &Path) -> Result<DataFrame, StoreError> {
    let column = |field: Field, values: Vec<f64>| Column::new(field.name().into(), values);

    let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp.timestamp_millis()).collect();
    let volumes: Vec<i64> = records.iter().map(|r| r.volume).collect();

    DataFrame::new(vec![
        Column::new(Field::Timestamp.name().into(), timestamps)
            .cast(&StorageSchema::dtype(Field::Timestamp))
            .map_err(parquet_err(path))?,
        column(Field::Open, records.iter().map(|r| r.open).collect()),
        column(Field::High, records.iter().map(|r| r.high).collect()),
        column(Field::Low, records.iter().map(|r| r.low).collect()),
        column(Field::Close, records.iter().map(|r| r.close).collect()),
        Column::new(Field::Volume.name().into(), volumes),
    ])
    .map_err(parquet_err(path))
}

/// Write next to the target, fsync, then rename over it.
fn write_atomic(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let dir = path.parent().ok_or_else(|| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: "partition path has no parent directory".into(),
    })?;
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let tmp = dir.join(format!(
        "{PARTITION_FILE}.tmp-{}-{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| -> Result<(), StoreError> {
        let file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        ParquetWriter::new(&file)
            .finish(df)
            .map_err(parquet_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, path).map_err(io_err(path))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn read_parquet(path: &Path) -> Result<Vec<OhlcvRecord>, StoreError> {
    let file = fs::File::open(path).map_err(io_err(path))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(parquet_err(path))?;

    StorageSchema::validate(&df).map_err(|source| StoreError::SchemaMismatch {
        path: path.to_path_buf(),
        source,
    })?;

    dataframe_to_records(&df, path)
}

fn dataframe_to_records(df: &DataFrame, path: &Path) -> Result<Vec<OhlcvRecord>, StoreError> {
    let col = |field: Field| df.column(field.name()).map_err(parquet_err(path));

    let millis = col(Field::Timestamp)?
        .cast(&DataType::Int64)
        .map_err(parquet_err(path))?;
    let millis = millis.i64().map_err(parquet_err(path))?;
    let opens = col(Field::Open)?.f64().map_err(parquet_err(path))?;
    let highs = col(Field::High)?.f64().map_err(parquet_err(path))?;
    let lows = col(Field::Low)?.f64().map_err(parquet_err(path))?;
    let closes = col(Field::Close)?.f64().map_err(parquet_err(path))?;
    let volumes = col(Field::Volume)?.i64().map_err(parquet_err(path))?;

    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let null = |field: Field, row: usize| corrupt(format!("null {field} at row {row}"));

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let ms = millis.get(i).ok_or_else(|| null(Field::Timestamp, i))?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| corrupt(format!("timestamp {ms} out of range at row {i}")))?;
        records.push(OhlcvRecord {
            timestamp,
            open: opens.get(i).ok_or_else(|| null(Field::Open, i))?,
            high: highs.get(i).ok_or_else(|| null(Field::High, i))?,
            low: lows.get(i).ok_or_else(|| null(Field::Low, i))?,
            close: closes.get(i).ok_or_else(|| null(Field::Close, i))?,
            volume: volumes.get(i).ok_or_else(|| null(Field::Volume, i))?,
        });
    }
    records.sort_by_key(|r| r.timestamp);
    Ok(records)
}
