//! Schema validator.
//!
//! Runs four checks in order and stops at the first failure:
//! 1. schema: required columns present, cells of the expected type, prices
//!    finite and non-negative, volume a non-negative integer
//! 2. nulls: no null in any required column
//! 3. duplicates: no timestamp appears twice (checked after sorting)
//! 4. order: timestamps strictly ascending
//!
//! Out-of-order input is sorted, not rejected. Duplicates and nulls are hard
//! failures. The OHLC relationship (`low <= high`) is deliberately not checked.

use super::normalize::{CanonicalFrame, Cell};
use crate::domain::{Field, OhlcvRecord, PartitionKey};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Which check rejected a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Schema,
    Nulls,
    Duplicates,
    Order,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Check::Schema => "schema",
            Check::Nulls => "nulls",
            Check::Duplicates => "duplicates",
            Check::Order => "order",
        })
    }
}

fn fmt_days(timestamps: &[DateTime<Utc>]) -> String {
    timestamps
        .iter()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("schema: frame for '{symbol}' has no rows")]
    Empty { symbol: String },

    #[error("schema: missing required columns: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("schema: column '{column}' row {row}: expected {expected}, found {found}")]
    TypeMismatch {
        column: Field,
        row: usize,
        expected: &'static str,
        found: String,
    },

    #[error("schema: column '{column}' row {row}: {value} is {reason}")]
    InvalidValue {
        column: Field,
        row: usize,
        value: String,
        reason: &'static str,
    },

    #[error("nulls: column '{column}' has nulls at rows {rows:?}")]
    NullValues { column: Field, rows: Vec<usize> },

    #[error("duplicates: duplicate timestamps {}", fmt_days(.timestamps))]
    DuplicateTimestamps { timestamps: Vec<DateTime<Utc>> },

    #[error("order: timestamp {} does not follow {}", .at.format("%Y-%m-%d"), .previous.format("%Y-%m-%d"))]
    NotAscending {
        previous: DateTime<Utc>,
        at: DateTime<Utc>,
    },
}

impl ValidationError {
    pub fn check(&self) -> Check {
        match self {
            ValidationError::Empty { .. }
            | ValidationError::MissingColumns { .. }
            | ValidationError::TypeMismatch { .. }
            | ValidationError::InvalidValue { .. } => Check::Schema,
            ValidationError::NullValues { .. } => Check::Nulls,
            ValidationError::DuplicateTimestamps { .. } => Check::Duplicates,
            ValidationError::NotAscending { .. } => Check::Order,
        }
    }
}

/// A frame that passed every check: one symbol, ascending, unique timestamps.
///
/// Only [`validate`] constructs this type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFrame {
    symbol: String,
    records: Vec<OhlcvRecord>,
}

impl ValidatedFrame {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn records(&self) -> &[OhlcvRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sub-frames grouped by partition key, in ascending key order.
    pub fn partitions(&self) -> Vec<(PartitionKey, &[OhlcvRecord])> {
        let mut out: Vec<(PartitionKey, &[OhlcvRecord])> = Vec::new();
        let mut start = 0;
        for i in 1..=self.records.len() {
            let boundary = i == self.records.len()
                || PartitionKey::for_timestamp(&self.symbol, self.records[i].timestamp)
                    != PartitionKey::for_timestamp(&self.symbol, self.records[start].timestamp);
            if boundary {
                let key = PartitionKey::for_timestamp(&self.symbol, self.records[start].timestamp);
                out.push((key, &self.records[start..i]));
                start = i;
            }
        }
        out
    }
}

fn expected_type(field: Field) -> &'static str {
    match field {
        Field::Timestamp => "UTC timestamp",
        Field::Volume => "non-negative integer",
        _ => "float",
    }
}

fn found_of(cell: &Cell) -> String {
    match cell {
        Cell::Null => "null".into(),
        Cell::Timestamp(t) => format!("timestamp {}", t.to_rfc3339()),
        Cell::Float(v) => format!("float {v}"),
        Cell::Int(v) => format!("int {v}"),
        Cell::Invalid(s) => format!("{s:?}"),
    }
}

/// Check (a): every present cell has the expected type and range.
fn check_schema(frame: &CanonicalFrame) -> Result<(), ValidationError> {
    if frame.is_empty() {
        return Err(ValidationError::Empty {
            symbol: frame.symbol.clone(),
        });
    }

    let missing: Vec<String> = Field::ALL
        .iter()
        .filter(|f| frame.column(**f).is_none())
        .map(|f| f.name().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingColumns { columns: missing });
    }

    for field in Field::ALL {
        let cells = frame.column(field).unwrap_or_default();
        for (row, cell) in cells.iter().enumerate() {
            let mismatch = || ValidationError::TypeMismatch {
                column: field,
                row,
                expected: expected_type(field),
                found: found_of(cell),
            };
            match (field, cell) {
                (_, Cell::Null) => {}
                (Field::Timestamp, Cell::Timestamp(_)) => {}
                (Field::Timestamp, _) => return Err(mismatch()),
                (Field::Volume, Cell::Int(v)) if *v < 0 => {
                    return Err(ValidationError::InvalidValue {
                        column: field,
                        row,
                        value: v.to_string(),
                        reason: "negative",
                    })
                }
                (Field::Volume, Cell::Int(_)) => {}
                (Field::Volume, _) => return Err(mismatch()),
                (_, Cell::Float(v)) if !v.is_finite() => {
                    return Err(ValidationError::InvalidValue {
                        column: field,
                        row,
                        value: v.to_string(),
                        reason: "not finite",
                    })
                }
                (_, Cell::Float(v)) if *v < 0.0 => {
                    return Err(ValidationError::InvalidValue {
                        column: field,
                        row,
                        value: v.to_string(),
                        reason: "negative",
                    })
                }
                (_, Cell::Float(_)) => {}
                (_, _) => return Err(mismatch()),
            }
        }
    }
    Ok(())
}

/// Check (b): no nulls. Rows past the end of a short column count as nulls.
fn check_nulls(frame: &CanonicalFrame) -> Result<(), ValidationError> {
    let height = frame.height();
    for field in Field::ALL {
        let cells = frame.column(field).unwrap_or_default();
        let rows: Vec<usize> = (0..height)
            .filter(|&row| matches!(cells.get(row), None | Some(Cell::Null)))
            .collect();
        if !rows.is_empty() {
            return Err(ValidationError::NullValues { column: field, rows });
        }
    }
    Ok(())
}

/// Assemble typed records. Only called once schema and null checks passed.
fn to_records(frame: &CanonicalFrame) -> Result<Vec<OhlcvRecord>, ValidationError> {
    let height = frame.height();
    let col = |field: Field| frame.column(field).unwrap_or_default();
    let (ts, open, high, low, close, volume) = (
        col(Field::Timestamp),
        col(Field::Open),
        col(Field::High),
        col(Field::Low),
        col(Field::Close),
        col(Field::Volume),
    );

    let price = |cells: &[Cell], field: Field, row: usize| match cells.get(row) {
        Some(Cell::Float(v)) => Ok(*v),
        other => Err(ValidationError::TypeMismatch {
            column: field,
            row,
            expected: expected_type(field),
            found: other.map(found_of).unwrap_or_else(|| "null".into()),
        }),
    };

    (0..height)
        .map(|row| {
            let timestamp = match ts.get(row) {
                Some(Cell::Timestamp(t)) => *t,
                other => {
                    return Err(ValidationError::TypeMismatch {
                        column: Field::Timestamp,
                        row,
                        expected: expected_type(Field::Timestamp),
                        found: other.map(found_of).unwrap_or_else(|| "null".into()),
                    })
                }
            };
            let volume = match volume.get(row) {
                Some(Cell::Int(v)) => *v,
                other => {
                    return Err(ValidationError::TypeMismatch {
                        column: Field::Volume,
                        row,
                        expected: expected_type(Field::Volume),
                        found: other.map(found_of).unwrap_or_else(|| "null".into()),
                    })
                }
            };
            Ok(OhlcvRecord {
                timestamp,
                open: price(open, Field::Open, row)?,
                high: price(high, Field::High, row)?,
                low: price(low, Field::Low, row)?,
                close: price(close, Field::Close, row)?,
                volume,
            })
        })
        .collect()
}

/// Check (c): no duplicate timestamps. Expects sorted input.
fn check_duplicates(records: &[OhlcvRecord]) -> Result<(), ValidationError> {
    let mut dups: Vec<DateTime<Utc>> = Vec::new();
    for w in records.windows(2) {
        if w[0].timestamp == w[1].timestamp && dups.last() != Some(&w[1].timestamp) {
            dups.push(w[1].timestamp);
        }
    }
    if dups.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::DuplicateTimestamps { timestamps: dups })
    }
}

/// Check (d): strictly ascending.
fn check_order(records: &[OhlcvRecord]) -> Result<(), ValidationError> {
    match records.windows(2).find(|w| w[0].timestamp >= w[1].timestamp) {
        Some(w) => Err(ValidationError::NotAscending {
            previous: w[0].timestamp,
            at: w[1].timestamp,
        }),
        None => Ok(()),
    }
}

/// Validate a canonical frame. Either the whole frame passes or nothing does.
pub fn validate(frame: CanonicalFrame) -> Result<ValidatedFrame, ValidationError> {
    check_schema(&frame)?;
    check_nulls(&frame)?;

    let mut records = to_records(&frame)?;
    records.sort_by_key(|r| r.timestamp);

    check_duplicates(&records)?;
    check_order(&records)?;

    Ok(ValidatedFrame {
        symbol: frame.symbol,
        records,
    })
}
