//! Partition key and on-disk layout.
//!
//! Layout: `{root}/symbol={SYMBOL}/year={YYYY}/month={MM}/data.parquet`

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of every partition's data file.
pub const PARTITION_FILE: &str = "data.parquet";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid symbol '{symbol}': {reason}")]
pub struct InvalidSymbol {
    pub symbol: String,
    pub reason: &'static str,
}

/// Check that a symbol can name a single directory and file.
pub fn check_symbol(symbol: &str) -> Result<(), InvalidSymbol> {
    let reason = if symbol.is_empty() {
        "empty"
    } else if symbol.contains(['/', '\\']) {
        "contains a path separator"
    } else if symbol.contains("..") {
        "contains '..'"
    } else if symbol.chars().any(|c| c.is_control() || c == '=') {
        "contains a control character or '='"
    } else {
        return Ok(());
    };
    Err(InvalidSymbol {
        symbol: symbol.to_string(),
        reason,
    })
}

/// `(symbol, year, month)`: where a record lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub symbol: String,
    pub year: i32,
    pub month: u32,
}

impl PartitionKey {
    pub fn new(symbol: impl Into<String>, year: i32, month: u32) -> Self {
        Self {
            symbol: symbol.into(),
            year,
            month,
        }
    }

    /// Key of the month containing `timestamp`.
    pub fn for_timestamp(symbol: &str, timestamp: DateTime<Utc>) -> Self {
        Self::new(symbol, timestamp.year(), timestamp.month())
    }

    /// `symbol={SYMBOL}` directory name.
    pub fn symbol_dir_name(symbol: &str) -> String {
        format!("symbol={symbol}")
    }

    /// Partition directory relative to the store root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(Self::symbol_dir_name(&self.symbol))
            .join(format!("year={:04}", self.year))
            .join(format!("month={:02}", self.month))
    }

    /// Data file path under `root`.
    pub fn data_path(&self, root: &Path) -> PathBuf {
        root.join(self.relative_dir()).join(PARTITION_FILE)
    }

    /// Parse `year=YYYY` / `month=MM` directory names back into a key.
    pub fn from_dir_names(symbol: &str, year_dir: &str, month_dir: &str) -> Option<Self> {
        let year = year_dir.strip_prefix("year=")?.parse::<i32>().ok()?;
        let month = month_dir.strip_prefix("month=")?.parse::<u32>().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self::new(symbol, year, month))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "symbol={}/year={:04}/month={:02}",
            self.symbol, self.year, self.month
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_from_timestamp() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 29, 0, 0, 0).unwrap();
        let key = PartitionKey::for_timestamp("AAPL", ts);
        assert_eq!(key, PartitionKey::new("AAPL", 2023, 12));
    }

    #[test]
    fn layout_is_zero_padded() {
        let key = PartitionKey::new("AAPL", 2024, 1);
        assert_eq!(key.to_string(), "symbol=AAPL/year=2024/month=01");
        assert_eq!(
            key.data_path(Path::new("/lake")),
            PathBuf::from("/lake/symbol=AAPL/year=2024/month=01/data.parquet")
        );
    }

    #[test]
    fn path_like_symbols_are_rejected() {
        assert!(check_symbol("BRK.B").is_ok());
        assert!(check_symbol("^GSPC").is_ok());
        assert!(check_symbol("../X").is_err());
        assert!(check_symbol("A/B").is_err());
        assert!(check_symbol("A\\B").is_err());
        assert!(check_symbol("..").is_err());
        assert!(check_symbol("").is_err());
    }

    #[test]
    fn dir_names_roundtrip() {
        let key = PartitionKey::from_dir_names("SPY", "year=2024", "month=03").unwrap();
        assert_eq!(key, PartitionKey::new("SPY", 2024, 3));
        assert!(PartitionKey::from_dir_names("SPY", "year=2024", "month=13").is_none());
        assert!(PartitionKey::from_dir_names("SPY", "2024", "month=03").is_none());
    }
}
