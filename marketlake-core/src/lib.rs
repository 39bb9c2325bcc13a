//! MarketLake Core: daily OHLCV ingestion into a partitioned Parquet lake.
//!
//! - Provider adapters (Yahoo Finance, Alpha Vantage, local CSV) behind one trait
//! - Resolver walking adapters in priority order with fallback
//! - Normalizer and schema validator producing canonical, sorted, unique records
//! - Store partitioned by `symbol/year/month` with idempotent merge-on-write
//! - Batch pipeline, TOML configuration and run manifests

pub mod config;
pub mod data;
pub mod domain;
pub mod manifest;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a parallel batch shares is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::OhlcvRecord>();
        require_sync::<domain::OhlcvRecord>();
        require_send::<domain::PartitionKey>();
        require_sync::<domain::PartitionKey>();

        require_send::<data::RawFrame>();
        require_sync::<data::RawFrame>();
        require_send::<data::CanonicalFrame>();
        require_sync::<data::CanonicalFrame>();
        require_send::<data::ValidatedFrame>();
        require_sync::<data::ValidatedFrame>();
        require_send::<data::ProviderFailure>();
        require_sync::<data::ProviderFailure>();
        require_send::<data::Exhausted>();
        require_sync::<data::Exhausted>();
        require_send::<data::IngestError>();
        require_sync::<data::IngestError>();

        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
        require_send::<data::AlphaVantageProvider>();
        require_sync::<data::AlphaVantageProvider>();
        require_send::<data::CsvImportProvider>();
        require_sync::<data::CsvImportProvider>();

        require_send::<data::Resolver>();
        require_sync::<data::Resolver>();
        require_send::<data::PartitionedStore>();
        require_sync::<data::PartitionedStore>();
        require_send::<data::Pipeline>();
        require_sync::<data::Pipeline>();

        require_send::<manifest::RunManifest>();
        require_sync::<manifest::RunManifest>();
    }

    /// Adapters are used as trait objects; this breaks if the trait stops being object safe.
    #[test]
    fn provider_adapter_is_object_safe() {
        fn _names(adapters: &[std::sync::Arc<dyn data::ProviderAdapter>]) -> Vec<&str> {
            adapters.iter().map(|a| a.name()).collect()
        }
    }
}
