//! On-disk Parquet schema for partition files.
//!
//! Column order and dtypes are fixed so downstream query engines can scan the
//! lake without per-file schema negotiation:
//! `timestamp: Datetime[ms, UTC]`, `open/high/low/close: Float64`, `volume: Int64`.

use crate::domain::Field;
use polars::prelude::{DataFrame, DataType, Field as PolarsField, Schema, TimeUnit};

/// Timezone tag stored on the timestamp column.
pub const TIMEZONE: &str = "UTC";

/// The storage schema contract.
pub struct StorageSchema;

impl StorageSchema {
    pub fn dtype(field: Field) -> DataType {
        match field {
            Field::Timestamp => DataType::Datetime(TimeUnit::Milliseconds, Some(TIMEZONE.into())),
            Field::Volume => DataType::Int64,
            Field::Open | Field::High | Field::Low | Field::Close => DataType::Float64,
        }
    }

    /// Get the canonical partition schema, in storage order.
    pub fn schema() -> Schema {
        Schema::from_iter(
            Field::ALL
                .iter()
                .map(|f| PolarsField::new(f.name().into(), Self::dtype(*f))),
        )
    }

    /// Validate a DataFrame against the schema: same columns, same order, same dtypes.
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let columns = df.get_columns();

        for field in Field::ALL {
            if !columns.iter().any(|c| c.name().as_str() == field.name()) {
                return Err(SchemaError::MissingColumn(field.name().to_string()));
            }
        }

        let actual: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
        let expected: Vec<String> = Field::ALL.iter().map(|f| f.name().to_string()).collect();
        if actual != expected {
            return Err(SchemaError::ColumnOrder { expected, actual });
        }

        for (column, field) in columns.iter().zip(Field::ALL) {
            let expected = Self::dtype(field);
            if column.dtype() != &expected {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected,
                    actual: column.dtype().clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("column order {actual:?} does not match {expected:?}")]
    ColumnOrder {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
