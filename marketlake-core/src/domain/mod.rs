//! Domain types for MarketLake

pub mod partition;
pub mod record;

pub use partition::{check_symbol, InvalidSymbol, PartitionKey, PARTITION_FILE};
pub use record::{day_start, Field, OhlcvRecord};
