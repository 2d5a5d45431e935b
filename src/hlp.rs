// ─────────────────────────────────────────────────────────────────────────────
// hlp.rs — Sentiment from the house liquidity-provider vault
//
// The HLP vault systematically takes the other side of user flow, so its
// per-coin notional exposure reads as a contrarian indicator: heavy vault
// longs mean the crowd is selling. Exposure is polled from the vault's
// clearinghouse state and scored against a 7-day rolling history.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::{
    HISTORY_WINDOW_SECS, HLP_VAULT, POLL_INTERVAL_HLP_SECS, STOP_JOIN_TIMEOUT_SECS,
};
use crate::fields;
use crate::rest::RestClient;
use crate::stats::{now_ts, RollingHistory};

pub const DIRECTION_LONG: &str = "LONG";
pub const DIRECTION_SHORT: &str = "SHORT";
pub const DIRECTION_FLAT: &str = "FLAT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlpSignal {
    pub coin: String,
    pub exposure_usd: f64,
    pub z_score: f64,
    pub direction: String,
    pub is_extreme: bool,
    pub timestamp: f64,
}

#[derive(Debug, Default)]
struct HlpInner {
    histories: HashMap<String, RollingHistory>,
    latest: HashMap<String, HlpSignal>,
}

/// Scores one exposure observation against the coin's history (prior
/// samples only), then appends it.
fn record_exposure(inner: &mut HlpInner, coin: &str, exposure: f64, now: f64) {
    let hist = inner
        .histories
        .entry(coin.to_string())
        .or_insert_with(|| RollingHistory::new(HISTORY_WINDOW_SECS));
    let z_score = hist.z_score(exposure);
    hist.push(now, exposure);

    let direction = if exposure > 0.0 {
        DIRECTION_LONG
    } else if exposure < 0.0 {
        DIRECTION_SHORT
    } else {
        DIRECTION_FLAT
    };

    inner.latest.insert(
        coin.to_string(),
        HlpSignal {
            coin: coin.to_string(),
            exposure_usd: exposure,
            z_score,
            direction: direction.to_string(),
            is_extreme: z_score.abs() >= 2.0,
            timestamp: now,
        },
    );
}

pub struct HlpSentiment {
    coins: Vec<String>,
    rest: Arc<RestClient>,
    vault: String,
    inner: Arc<Mutex<HlpInner>>,
    running: AtomicBool,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HlpSentiment {
    pub fn new(coins: Vec<String>, rest: Arc<RestClient>) -> Self {
        Self {
            coins,
            rest,
            vault: HLP_VAULT.to_string(),
            inner: Arc::new(Mutex::new(HlpInner::default())),
            running: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let rest = self.rest.clone();
        let vault = self.vault.clone();
        let coins = self.coins.clone();
        let inner = self.inner.clone();
        let stop = self.stop.clone();
        let notify = self.notify.clone();
        let task = tokio::spawn(async move {
            let interval = Duration::from_secs(POLL_INTERVAL_HLP_SECS);
            while !stop.load(Ordering::SeqCst) {
                poll_once(&rest, &vault, &coins, &inner).await;
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        *self.handle.lock().unwrap() = Some(task);
    }

    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        let handle = self.handle.lock().unwrap().take();
        if let Some(task) = handle {
            if tokio::time::timeout(Duration::from_secs(STOP_JOIN_TIMEOUT_SECS), task)
                .await
                .is_err()
            {
                log::warn!("[HLP] Poller did not stop in time.");
            }
        }
    }

    /// Latest signal per tracked coin, in tracked order.
    pub fn get_signals(&self) -> Vec<HlpSignal> {
        let inner = self.inner.lock().unwrap();
        self.coins
            .iter()
            .filter_map(|coin| inner.latest.get(coin).cloned())
            .collect()
    }
}

/// One poll cycle: vault positions x mid prices → per-coin USD exposure.
/// Either fetch failing abandons the cycle; state is untouched.
async fn poll_once(
    rest: &RestClient,
    vault: &str,
    coins: &[String],
    inner: &Mutex<HlpInner>,
) {
    let now = now_ts();
    let state = match rest.clearinghouse_state(vault).await {
        Ok(s) => s,
        Err(e) => {
            log::warn!("[HLP] clearinghouseState failed: {}", e);
            return;
        }
    };
    let mids_resp = match rest.all_mids().await {
        Ok(m) => m,
        Err(e) => {
            log::warn!("[HLP] allMids failed: {}", e);
            return;
        }
    };

    let positions = fields::positions_from_state(&state);
    let mids = fields::mids_from_response(&mids_resp);

    let mut inner = inner.lock().unwrap();
    for coin in coins {
        let size = positions.get(coin).copied().unwrap_or(0.0);
        let mid = mids.get(coin).copied().unwrap_or(0.0);
        record_exposure(&mut inner, coin, size * mid, now);
    }
}
