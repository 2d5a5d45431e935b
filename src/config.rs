// ─────────────────────────────────────────────────────────────────────────────
// config.rs — Static parameters for the signal engine
//
// Everything tunable lives here: endpoints, tracked instruments, poll
// cadences, rolling windows, and the composite weights. The engine carries
// no runtime configuration files; the dashboard binary may override the
// tracked-coin list via the TRACKED_COINS env var.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

pub const HYPERLIQUID_REST_URL: &str = "https://api.hyperliquid.xyz/info";
pub const HYPERLIQUID_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

/// The HLP vault address (the venue's house liquidity provider).
pub const HLP_VAULT: &str = "0xdfc24b077bc1425ad1dea75bcb6f8158e10df303";

/// Instruments the engine tracks by default.
pub const TRACKED_COINS: &[&str] = &["ETH", "SOL"];

/// Manually curated whale addresses, merged with the leaderboard bootstrap.
pub const DEFAULT_WHALES: &[&str] = &[];

/// Maximum whale addresses tracked after the leaderboard bootstrap.
pub const MAX_WHALES: usize = 50;

/// Global cap on retained position-change events.
pub const CHANGE_LOG_CAP: usize = 200;

/// How many recent changes ride along on each whale signal.
pub const CHANGES_PER_SIGNAL: usize = 20;

// ─── Poll cadences (seconds) ─────────────────────────────────────────────────

pub const POLL_INTERVAL_POSITIONS_SECS: u64 = 60;
pub const POLL_INTERVAL_FUNDING_SECS: u64 = 300;
pub const POLL_INTERVAL_HLP_SECS: u64 = 300;

/// Rolling windows for order flow imbalance: 5m, 15m, 1h, 4h.
pub const ORDERFLOW_WINDOWS_SECS: &[u64] = &[300, 900, 3600, 14_400];

/// Funding and HLP exposure histories span 7 days.
pub const HISTORY_WINDOW_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Minimum samples before a z-score is meaningful.
pub const ZSCORE_MIN_SAMPLES: usize = 5;

// ─── Transport tuning ────────────────────────────────────────────────────────

pub const REST_MAX_REQUESTS_PER_SEC: f64 = 10.0;
pub const REST_RETRIES: u32 = 3;
pub const REST_BACKOFF_START_SECS: f64 = 0.5;
pub const REST_TIMEOUT_SECS: u64 = 15;

pub const WS_RECONNECT_DELAY_SECS: u64 = 3;
pub const WS_PING_INTERVAL_SECS: u64 = 20;
pub const WS_PING_TIMEOUT_SECS: u64 = 20;

/// Background workers get this long to wind down on stop.
pub const STOP_JOIN_TIMEOUT_SECS: u64 = 5;

/// USD notional at or above which a taker trade counts as "large".
/// A zero threshold disables large-trade counting for that coin.
pub fn large_trade_threshold(coin: &str) -> f64 {
    match coin {
        "ETH" => 50_000.0,
        "SOL" => 25_000.0,
        _ => 0.0,
    }
}

// ─── Composite weights ───────────────────────────────────────────────────────

/// Weights applied to the normalized component scores. They need not sum
/// to 1.0, but the defaults do, keeping the composite in roughly [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeights {
    pub orderflow: f64,
    pub whales: f64,
    pub hlp: f64,
    pub funding: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            orderflow: 0.30,
            whales: 0.25,
            hlp: 0.25,
            funding: 0.20,
        }
    }
}

/// The default tracked-coin list as owned strings.
pub fn tracked_coins() -> Vec<String> {
    TRACKED_COINS.iter().map(|c| c.to_string()).collect()
}
