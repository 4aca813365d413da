//! Signalab Core: signals, candles, trade simulation, price data.
//!
//! This crate contains the per-trade machinery of the backtester:
//! - Domain types (signals, candles, simulation parameters, outcomes)
//! - Signal normalization from raw records
//! - Single-exit trade simulator with a configurable intrabar policy
//! - Laddered-exit simulator (four partial take-profits, trailing stop)
//! - Price series providers: Binance futures klines, Parquet day cache, in-memory

pub mod data;
pub mod domain;
pub mod engine;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared with grid workers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Signal>();
        require_sync::<domain::Signal>();
        require_send::<domain::Candle>();
        require_sync::<domain::Candle>();
        require_send::<domain::CandleSeries>();
        require_sync::<domain::CandleSeries>();
        require_send::<domain::SimulationParams>();
        require_sync::<domain::SimulationParams>();
        require_send::<domain::PositionSpec>();
        require_sync::<domain::PositionSpec>();
        require_send::<domain::TradeOutcome>();
        require_sync::<domain::TradeOutcome>();

        // Engine types
        require_send::<engine::Simulator>();
        require_sync::<engine::Simulator>();
        require_send::<engine::IntrabarPolicy>();
        require_sync::<engine::IntrabarPolicy>();
        require_send::<engine::LadderOutcome>();
        require_sync::<engine::LadderOutcome>();
        require_send::<engine::SimulationError>();
        require_sync::<engine::SimulationError>();

        // Data types
        require_send::<data::CandleCache>();
        require_sync::<data::CandleCache>();
        require_send::<data::CachedPriceProvider>();
        require_sync::<data::CachedPriceProvider>();
        require_send::<data::MemoryProvider>();
        require_sync::<data::MemoryProvider>();
        require_send::<data::BinanceProvider>();
        require_sync::<data::BinanceProvider>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();
    }

    /// Architecture contract: the simulator sees only the signal, one parameter
    /// set and the candle series. No shared mutable state crosses trades.
    #[test]
    fn simulator_is_a_pure_function_of_its_inputs() {
        fn _check_signature(
            sim: &engine::Simulator,
            signal: &domain::Signal,
            params: &domain::SimulationParams,
            series: &domain::CandleSeries,
        ) -> Result<domain::TradeOutcome, engine::SimulationError> {
            sim.simulate(signal, params, series)
        }
    }

    /// Providers are usable as trait objects behind an Arc.
    #[test]
    fn providers_are_object_safe() {
        fn _check(
            provider: std::sync::Arc<dyn data::PriceSeriesProvider>,
            source: std::sync::Arc<dyn data::CandleSource>,
        ) -> (String, String) {
            (provider.name().to_string(), source.name().to_string())
        }
    }
}
