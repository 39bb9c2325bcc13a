//! Data ingestion: provider adapters, normalization, validation, storage.

pub mod alpha_vantage;
pub mod circuit_breaker;
pub mod csv_import;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod validate;
pub mod yahoo;

pub use alpha_vantage::{AlphaVantageProvider, AlphaVantageSettings, OutputSize};
pub use circuit_breaker::CircuitBreaker;
pub use csv_import::{CsvImportProvider, CsvImportSettings};
pub use normalize::{normalize, CanonicalFrame, Cell};
pub use pipeline::{IngestError, IngestProgress, NoProgress, Pipeline, StdoutProgress, SymbolReport};
pub use provider::{
    FailureKind, ProviderAdapter, ProviderFailure, ProviderResult, RawFrame, RawValue, Reliability,
};
pub use resolver::{AttemptFailure, Exhausted, ExhaustionCause, Resolved, Resolver, RetryPolicy};
pub use schema::{SchemaError, StorageSchema};
pub use store::{PartitionInfo, PartitionWrite, PartitionedStore, StoreError, WriteReport};
pub use validate::{validate, Check, ValidatedFrame, ValidationError};
pub use yahoo::{YahooProvider, YahooSettings};
