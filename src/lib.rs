// ─────────────────────────────────────────────────────────────────────────────
// signal-engine-rs: composite trading signals from public venue data
//
// Four detectors run concurrently (order flow imbalance from the live
// trade stream, whale position tracking, HLP vault sentiment, and funding
// rate anomalies) and a weighted aggregator folds their latest outputs
// into one recommendation per tracked instrument. Read-only: the engine
// never places orders and keeps no on-disk state.
// ─────────────────────────────────────────────────────────────────────────────
pub mod config;
pub mod fields;
pub mod funding;
pub mod hlp;
pub mod orderflow;
pub mod rest;
pub mod signals;
pub mod stats;
pub mod whales;
pub mod ws;

pub use config::SignalWeights;
pub use funding::{FundingAnomalyDetector, FundingSignal};
pub use hlp::{HlpSentiment, HlpSignal};
pub use orderflow::{OrderFlowImbalance, OrderFlowSignal, Side, TradeEvent};
pub use rest::{RestClient, RestError};
pub use signals::{ComponentScores, CompositeSignal, SignalAggregator};
pub use stats::RollingHistory;
pub use whales::{WhaleChangeEvent, WhaleSignal, WhaleTracker};
pub use ws::WsClient;
