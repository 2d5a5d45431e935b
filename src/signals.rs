// ─────────────────────────────────────────────────────────────────────────────
// signals.rs — Weighted composite of the four detectors
//
// Each component is normalized to roughly [-1, 1] and combined by a dot
// product with the configured weights. The HLP and funding components are
// contrarian: heavy vault longs and high positive funding both read as
// crowded-long conditions, so they push the composite short.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{tracked_coins, SignalWeights};
use crate::funding::{FundingAnomalyDetector, FundingSignal};
use crate::hlp::{HlpSentiment, HlpSignal, DIRECTION_LONG, DIRECTION_SHORT};
use crate::orderflow::{OrderFlowImbalance, OrderFlowSignal};
use crate::rest::RestClient;
use crate::stats::now_ts;
use crate::whales::{WhaleSignal, WhaleTracker};

pub const RECO_STRONG_LONG: &str = "STRONG_LONG";
pub const RECO_LEAN_LONG: &str = "LEAN_LONG";
pub const RECO_NEUTRAL: &str = "NEUTRAL";
pub const RECO_LEAN_SHORT: &str = "LEAN_SHORT";
pub const RECO_STRONG_SHORT: &str = "STRONG_SHORT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub orderflow: f64,
    pub whales: f64,
    pub hlp: f64,
    pub funding: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub coin: String,
    pub score: f64,
    pub components: ComponentScores,
    pub recommendation: String,
    pub timestamp: f64,
}

// ─── Normalization ───────────────────────────────────────────────────────────

/// Mean imbalance across every window the detector produced for the coin.
fn orderflow_score(signals: &[&OrderFlowSignal]) -> f64 {
    if signals.is_empty() {
        return 0.0;
    }
    signals.iter().map(|s| s.imbalance).sum::<f64>() / signals.len() as f64
}

fn whale_score(signal: Option<&WhaleSignal>) -> f64 {
    match signal {
        Some(s) => (s.long_pct - s.short_pct) / 100.0,
        None => 0.0,
    }
}

/// Contrarian: the vault fades retail flow, so vault-long is bearish.
fn hlp_score(signal: Option<&HlpSignal>) -> f64 {
    let s = match signal {
        Some(s) => s,
        None => return 0.0,
    };
    let magnitude = (s.z_score.abs() / 2.0).min(1.0);
    if s.direction == DIRECTION_LONG {
        -magnitude
    } else if s.direction == DIRECTION_SHORT {
        magnitude
    } else {
        0.0
    }
}

/// Contrarian: high positive funding means crowded longs.
fn funding_score(signal: Option<&FundingSignal>) -> f64 {
    let s = match signal {
        Some(s) => s,
        None => return 0.0,
    };
    let magnitude = (s.funding_zscore.abs() / 2.0).min(1.0);
    if s.funding_zscore > 0.0 {
        -magnitude
    } else if s.funding_zscore < 0.0 {
        magnitude
    } else {
        0.0
    }
}

fn combine(components: &ComponentScores, weights: &SignalWeights) -> f64 {
    components.orderflow * weights.orderflow
        + components.whales * weights.whales
        + components.hlp * weights.hlp
        + components.funding * weights.funding
}

/// Positive bands take their lower bound inclusively, negative bands their
/// upper bound, so exactly one band matches any score.
fn recommendation(score: f64) -> &'static str {
    if score >= 0.6 {
        RECO_STRONG_LONG
    } else if score >= 0.2 {
        RECO_LEAN_LONG
    } else if score <= -0.6 {
        RECO_STRONG_SHORT
    } else if score <= -0.2 {
        RECO_LEAN_SHORT
    } else {
        RECO_NEUTRAL
    }
}

// ─── Aggregator ──────────────────────────────────────────────────────────────

pub struct SignalAggregator {
    coins: Vec<String>,
    weights: SignalWeights,
    pub orderflow: OrderFlowImbalance,
    pub whales: WhaleTracker,
    pub hlp: HlpSentiment,
    pub funding: FundingAnomalyDetector,
    running: AtomicBool,
}

impl SignalAggregator {
    /// Builds the four detectors around one shared REST client.
    pub fn new(coins: Vec<String>) -> Self {
        let rest = RestClient::shared();
        Self::with_detectors(
            coins.clone(),
            SignalWeights::default(),
            OrderFlowImbalance::new(coins.clone()),
            WhaleTracker::new(coins.clone(), rest.clone()),
            HlpSentiment::new(coins.clone(), rest.clone()),
            FundingAnomalyDetector::new(coins, rest),
        )
    }

    pub fn with_detectors(
        coins: Vec<String>,
        weights: SignalWeights,
        orderflow: OrderFlowImbalance,
        whales: WhaleTracker,
        hlp: HlpSentiment,
        funding: FundingAnomalyDetector,
    ) -> Self {
        Self {
            coins,
            weights,
            orderflow,
            whales,
            hlp,
            funding,
            running: AtomicBool::new(false),
        }
    }

    pub fn tracked(&self) -> &[String] {
        &self.coins
    }

    /// Starts every detector's background work. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Signal aggregator starting for {:?}.", self.coins);
        self.orderflow.start();
        self.whales.start();
        self.hlp.start();
        self.funding.start();
    }

    /// Stops every detector, joining workers with a bounded timeout.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        self.orderflow.stop().await;
        self.whales.stop().await;
        self.hlp.stop().await;
        self.funding.stop().await;
        log::info!("Signal aggregator stopped.");
    }

    /// One composite per tracked coin, regardless of upstream health.
    /// A detector with nothing to say contributes zero.
    pub fn get_composite_signals(&self) -> Vec<CompositeSignal> {
        let now = now_ts();
        let orderflow_signals = self.orderflow.get_signals();
        let whale_signals: HashMap<String, WhaleSignal> = self
            .whales
            .get_signals()
            .into_iter()
            .map(|s| (s.coin.clone(), s))
            .collect();
        let hlp_signals: HashMap<String, HlpSignal> = self
            .hlp
            .get_signals()
            .into_iter()
            .map(|s| (s.coin.clone(), s))
            .collect();
        let funding_signals: HashMap<String, FundingSignal> = self
            .funding
            .get_signals()
            .into_iter()
            .map(|s| (s.coin.clone(), s))
            .collect();

        self.coins
            .iter()
            .map(|coin| {
                let of: Vec<&OrderFlowSignal> =
                    orderflow_signals.iter().filter(|s| &s.coin == coin).collect();
                let components = ComponentScores {
                    orderflow: orderflow_score(&of),
                    whales: whale_score(whale_signals.get(coin)),
                    hlp: hlp_score(hlp_signals.get(coin)),
                    funding: funding_score(funding_signals.get(coin)),
                };
                let score = combine(&components, &self.weights);
                CompositeSignal {
                    coin: coin.clone(),
                    score,
                    recommendation: recommendation(score).to_string(),
                    components,
                    timestamp: now,
                }
            })
            .collect()
    }
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self::new(tracked_coins())
    }
}
