//! Price data: provider traits, Binance source, on-disk cache

pub mod binance;
pub mod cache;
pub mod cached;
pub mod circuit_breaker;
pub mod memory;
pub mod provider;

pub use binance::BinanceProvider;
pub use cache::{CacheStatus, CandleCache, WriteOutcome};
pub use cached::{CachedPriceProvider, DayTally};
pub use circuit_breaker::CircuitBreaker;
pub use memory::MemoryProvider;
pub use provider::{CandleSource, DataError, DataSource, FetchResult, PriceSeriesProvider};
