//! Real-time candle aggregation.
//!
//! ```text
//! RealtimeScheduler (1-minute loop, session aware)
//!       │  fetch_recent via ProviderGateway
//!       ▼
//! AggregatorHandle ──mpsc──► aggregator task (owns CandleBook)
//!                                   │  closed candles
//!                                   ▼
//!                              BarStore::upsert_one
//! ```

mod actor;
mod candle;
mod scheduler;

pub use actor::{spawn_aggregator, AggregatorHandle, FlushReport};
pub use candle::{CandleBook, FoldOutcome, OpenCandle};
pub use scheduler::{
    LoopExit, RealtimeHandle, RealtimeOptions, RealtimeScheduler, TickOutcome, TickSummary,
    DEFAULT_TICK_INTERVAL,
};
