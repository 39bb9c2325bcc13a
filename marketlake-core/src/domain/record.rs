//! OHLCV record: the canonical daily row persisted by the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One daily OHLCV row for a single symbol.
///
/// `timestamp` is always midnight UTC of the trading day. Prices are finite and
/// non-negative and `volume` is non-negative once a record has passed the
/// validator. The OHLC relationship (`low <= open/close <= high`) is not
/// enforced: providers occasionally violate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl OhlcvRecord {
    /// Calendar day of this record.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Midnight UTC of the given calendar day.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Canonical column of an OHLCV frame, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Timestamp,
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Field {
    /// All columns in the fixed storage order.
    pub const ALL: [Field; 6] = [
        Field::Timestamp,
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
    ];

    /// The four price columns.
    pub const PRICES: [Field; 4] = [Field::Open, Field::High, Field::Low, Field::Close];

    pub fn name(self) -> &'static str {
        match self {
            Field::Timestamp => "timestamp",
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
        }
    }

    /// Match a provider column name against the canonical names.
    ///
    /// Case-insensitive, and accepts the common spellings `date`/`datetime`
    /// for the timestamp column.
    pub fn from_column_name(name: &str) -> Option<Field> {
        let lower = name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "timestamp" | "date" | "datetime" => Some(Field::Timestamp),
            "open" => Some(Field::Open),
            "high" => Some(Field::High),
            "low" => Some(Field::Low),
            "close" => Some(Field::Close),
            "volume" => Some(Field::Volume),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_order_is_fixed() {
        let names: Vec<&str> = Field::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(names, ["timestamp", "open", "high", "low", "close", "volume"]);
    }

    #[test]
    fn column_names_match_case_insensitively() {
        assert_eq!(Field::from_column_name("Date"), Some(Field::Timestamp));
        assert_eq!(Field::from_column_name("CLOSE"), Some(Field::Close));
        assert_eq!(Field::from_column_name(" volume "), Some(Field::Volume));
        assert_eq!(Field::from_column_name("Adj Close"), None);
    }

    #[test]
    fn day_start_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let ts = day_start(date);
        assert_eq!(ts.to_rfc3339(), "2024-01-02T00:00:00+00:00");
    }
}
