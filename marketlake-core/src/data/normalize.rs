//! Normalization: provider-native raw frame → canonical frame.
//!
//! Renames provider columns onto the canonical fields, drops extra columns,
//! reorders to storage order, and coerces cells:
//! - timestamps become midnight UTC of the calendar day they name
//! - prices become `f64`
//! - volume becomes `i64` (integral floats and numeric text are accepted)
//!
//! Coercion is best-effort. A cell that cannot be coerced is kept as
//! `Cell::Invalid` so the validator can report it with its row; nulls are
//! kept as `Cell::Null` for the same reason. Structural problems (required
//! column absent, ragged columns) are provider failures and trigger fallback.

use super::provider::{ProviderFailure, RawFrame, RawValue};
use crate::domain::{day_start, Field, OhlcvRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// A coerced cell of a canonical frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Timestamp(DateTime<Utc>),
    Float(f64),
    Int(i64),
    /// Original value that could not be coerced, rendered for error messages.
    Invalid(String),
}

/// A frame with canonical column names in storage order, one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFrame {
    pub symbol: String,
    pub columns: Vec<(Field, Vec<Cell>)>,
}

impl CanonicalFrame {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            columns: Vec::new(),
        }
    }

    /// Build a fully populated frame from typed records.
    pub fn from_records(symbol: impl Into<String>, records: &[OhlcvRecord]) -> Self {
        let column = |f: fn(&OhlcvRecord) -> Cell| records.iter().map(f).collect::<Vec<_>>();
        Self {
            symbol: symbol.into(),
            columns: vec![
                (Field::Timestamp, column(|r| Cell::Timestamp(r.timestamp))),
                (Field::Open, column(|r| Cell::Float(r.open))),
                (Field::High, column(|r| Cell::Float(r.high))),
                (Field::Low, column(|r| Cell::Float(r.low))),
                (Field::Close, column(|r| Cell::Float(r.close))),
                (Field::Volume, column(|r| Cell::Int(r.volume))),
            ],
        }
    }

    pub fn column(&self, field: Field) -> Option<&[Cell]> {
        self.columns
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, cells)| cells.as_slice())
    }

    pub fn height(&self) -> usize {
        self.columns.iter().map(|(_, c)| c.len()).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }
}

/// Normalize a raw provider frame.
///
/// `aliases` maps provider-specific column names onto canonical fields; any
/// other column matching a canonical name case-insensitively is used as-is.
/// When two columns map to the same field the first one wins.
pub fn normalize(
    symbol: &str,
    raw: RawFrame,
    aliases: &[(&str, Field)],
) -> Result<CanonicalFrame, ProviderFailure> {
    let mut mapped: Vec<(Field, Vec<RawValue>)> = Vec::with_capacity(Field::ALL.len());

    for column in raw.into_columns() {
        let name = column.name.trim();
        let field = aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map(|(_, field)| *field)
            .or_else(|| Field::from_column_name(name));

        if let Some(field) = field {
            if mapped.iter().all(|(f, _)| *f != field) {
                mapped.push((field, column.values));
            }
        }
    }

    let missing: Vec<String> = Field::ALL
        .iter()
        .filter(|field| mapped.iter().all(|(f, _)| f != *field))
        .map(|field| field.name().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ProviderFailure::MissingColumns(missing));
    }

    let height = mapped.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    if let Some((field, values)) = mapped.iter().find(|(_, v)| v.len() != height) {
        return Err(ProviderFailure::Malformed(format!(
            "column '{field}' has {} rows, expected {height}",
            values.len()
        )));
    }
    if height == 0 {
        return Err(ProviderFailure::EmptyPayload);
    }

    mapped.sort_by_key(|(field, _)| *field);

    let columns = mapped
        .into_iter()
        .map(|(field, values)| {
            let cells = values
                .into_iter()
                .map(|value| match field {
                    Field::Timestamp => coerce_timestamp(value),
                    Field::Volume => coerce_volume(value),
                    _ => coerce_price(value),
                })
                .collect();
            (field, cells)
        })
        .collect();

    Ok(CanonicalFrame {
        symbol: symbol.to_string(),
        columns,
    })
}

/// Midnight UTC of the day an epoch value falls on.
fn epoch_day(value: i64) -> Option<DateTime<Utc>> {
    let dt = if value.unsigned_abs() > EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }?;
    Some(day_start(dt.date_naive()))
}

/// Calendar day named by a timestamp string.
///
/// Offset-carrying timestamps keep the day in their own offset: a US close at
/// `2024-01-02T16:00:00-05:00` is the 2nd, not the 2nd-or-3rd depending on UTC.
pub fn parse_day(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.date_naive());
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }
    None
}

fn coerce_timestamp(value: RawValue) -> Cell {
    match value {
        RawValue::Null => Cell::Null,
        RawValue::Int(v) => epoch_day(v)
            .map(Cell::Timestamp)
            .unwrap_or_else(|| Cell::Invalid(v.to_string())),
        RawValue::Float(v) if v.is_finite() && v.fract() == 0.0 => epoch_day(v as i64)
            .map(Cell::Timestamp)
            .unwrap_or_else(|| Cell::Invalid(v.to_string())),
        RawValue::Float(v) => Cell::Invalid(v.to_string()),
        RawValue::Text(s) => parse_day(&s)
            .map(|d| Cell::Timestamp(day_start(d)))
            .unwrap_or(Cell::Invalid(s)),
    }
}

fn coerce_price(value: RawValue) -> Cell {
    match value {
        RawValue::Null => Cell::Null,
        RawValue::Float(v) => Cell::Float(v),
        RawValue::Int(v) => Cell::Float(v as f64),
        RawValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Cell::Float)
            .unwrap_or(Cell::Invalid(s)),
    }
}

fn integral(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn coerce_volume(value: RawValue) -> Cell {
    match value {
        RawValue::Null => Cell::Null,
        RawValue::Int(v) => Cell::Int(v),
        RawValue::Float(v) => integral(v)
            .map(Cell::Int)
            .unwrap_or_else(|| Cell::Invalid(v.to_string())),
        RawValue::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(integral))
                .map(Cell::Int)
                .unwrap_or(Cell::Invalid(s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[&str]) -> Vec<RawValue> {
        values.iter().map(|v| RawValue::Text(v.to_string())).collect()
    }

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        day_start(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn renames_reorders_and_drops_extra_columns() {
        let raw = RawFrame::new()
            .with_column("Volume", text(&["100"]))
            .with_column("Adj Close", text(&["1.0"]))
            .with_column("Close", text(&["10.5"]))
            .with_column("Low", text(&["10"]))
            .with_column("High", text(&["11"]))
            .with_column("Open", text(&["10.2"]))
            .with_column("Date", text(&["2024-01-02"]));

        let frame = normalize("AAPL", raw, &[]).unwrap();
        let fields: Vec<Field> = frame.columns.iter().map(|(f, _)| *f).collect();
        assert_eq!(fields, Field::ALL);
        assert_eq!(frame.column(Field::Timestamp).unwrap()[0], Cell::Timestamp(ymd(2024, 1, 2)));
        assert_eq!(frame.column(Field::Close).unwrap()[0], Cell::Float(10.5));
        assert_eq!(frame.column(Field::Volume).unwrap()[0], Cell::Int(100));
    }

    #[test]
    fn aliases_take_precedence() {
        let raw = RawFrame::new()
            .with_column("timestamp", text(&["2024-01-02"]))
            .with_column("1. open", text(&["1"]))
            .with_column("2. high", text(&["2"]))
            .with_column("3. low", text(&["0.5"]))
            .with_column("4. close", text(&["1.5"]))
            .with_column("5. volume", text(&["10"]));
        let aliases = [
            ("1. open", Field::Open),
            ("2. high", Field::High),
            ("3. low", Field::Low),
            ("4. close", Field::Close),
            ("5. volume", Field::Volume),
        ];
        let frame = normalize("IBM", raw, &aliases).unwrap();
        assert_eq!(frame.height(), 1);
        assert_eq!(frame.column(Field::High).unwrap()[0], Cell::Float(2.0));
    }

    #[test]
    fn missing_columns_fail_structurally() {
        let raw = RawFrame::new()
            .with_column("Date", text(&["2024-01-02"]))
            .with_column("Open", text(&["1"]));
        let err = normalize("AAPL", raw, &[]).unwrap_err();
        assert_eq!(
            err,
            ProviderFailure::MissingColumns(vec![
                "high".into(),
                "low".into(),
                "close".into(),
                "volume".into()
            ])
        );
    }

    #[test]
    fn ragged_columns_are_malformed() {
        let raw = RawFrame::new()
            .with_column("Date", text(&["2024-01-02", "2024-01-03"]))
            .with_column("Open", text(&["1"]))
            .with_column("High", text(&["1", "2"]))
            .with_column("Low", text(&["1", "2"]))
            .with_column("Close", text(&["1", "2"]))
            .with_column("Volume", text(&["1", "2"]));
        assert!(matches!(
            normalize("AAPL", raw, &[]),
            Err(ProviderFailure::Malformed(_))
        ));
    }

    #[test]
    fn epoch_seconds_and_millis_become_days() {
        assert_eq!(coerce_timestamp(RawValue::Int(1704205800)), Cell::Timestamp(ymd(2024, 1, 2)));
        assert_eq!(
            coerce_timestamp(RawValue::Int(1_704_205_800_000)),
            Cell::Timestamp(ymd(2024, 1, 2))
        );
    }

    #[test]
    fn extreme_epoch_values_are_invalid_cells() {
        assert_eq!(
            coerce_timestamp(RawValue::Int(i64::MIN)),
            Cell::Invalid(i64::MIN.to_string())
        );
        assert_eq!(
            coerce_timestamp(RawValue::Int(i64::MAX)),
            Cell::Invalid(i64::MAX.to_string())
        );
    }

    #[test]
    fn offset_timestamps_keep_their_local_day() {
        assert_eq!(
            parse_day("2024-01-02T20:00:00-05:00"),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
        assert_eq!(
            parse_day("2024-01-02 00:00:00-05:00"),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
        assert_eq!(parse_day("01/02/2024"), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_day("yesterday"), None);
    }

    #[test]
    fn bad_cells_are_kept_for_the_validator() {
        assert_eq!(coerce_price(RawValue::Text("n/a".into())), Cell::Invalid("n/a".into()));
        assert_eq!(coerce_volume(RawValue::Float(1.5)), Cell::Invalid("1.5".into()));
        assert_eq!(coerce_volume(RawValue::Text("2.0e3".into())), Cell::Int(2000));
        assert_eq!(coerce_price(RawValue::Null), Cell::Null);
    }
}
