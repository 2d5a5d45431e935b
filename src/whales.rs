// ─────────────────────────────────────────────────────────────────────────────
// whales.rs — Position tracking for known large traders
//
// The tracked address set is the configured seed list plus a best-effort
// leaderboard bootstrap that runs in the background. Every poll cycle
// diffs each address's clearinghouse positions against the stored
// baseline and appends a change event per moved instrument.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::{
    CHANGES_PER_SIGNAL, CHANGE_LOG_CAP, DEFAULT_WHALES, MAX_WHALES,
    POLL_INTERVAL_POSITIONS_SECS, STOP_JOIN_TIMEOUT_SECS,
};
use crate::fields;
use crate::rest::RestClient;
use crate::stats::now_ts;

const LEADERBOARD_KINDS: &[&str] = &["leaderboard", "traderLeaderboard", "topTraders"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleChangeEvent {
    pub address: String,
    pub coin: String,
    pub prev_size: f64,
    pub new_size: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleSignal {
    pub coin: String,
    pub long_pct: f64,
    pub short_pct: f64,
    pub recent_changes: Vec<WhaleChangeEvent>,
    pub timestamp: f64,
}

// ─── Baseline state ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WhaleState {
    /// Last known {coin → signed size} per address.
    last_positions: HashMap<String, HashMap<String, f64>>,
    /// Global change log, newest last, capped at CHANGE_LOG_CAP.
    recent_changes: Vec<WhaleChangeEvent>,
}

impl WhaleState {
    /// Diffs a freshly polled position map against the stored baseline and
    /// records one change event per moved coin. A coin that vanished from
    /// the response counts as a move to size 0. The fresh map becomes the
    /// new baseline.
    fn apply_poll(&mut self, address: &str, new_positions: HashMap<String, f64>, now: f64) {
        let prev = self.last_positions.get(address).cloned().unwrap_or_default();

        let mut coins: Vec<&String> = new_positions.keys().collect();
        coins.sort();
        for coin in coins {
            let new_size = new_positions[coin];
            let prev_size = prev.get(coin).copied().unwrap_or(0.0);
            if new_size != prev_size {
                self.recent_changes.push(WhaleChangeEvent {
                    address: address.to_string(),
                    coin: coin.clone(),
                    prev_size,
                    new_size,
                    timestamp: now,
                });
            }
        }

        let mut gone: Vec<String> = prev
            .keys()
            .filter(|coin| !new_positions.contains_key(*coin) && prev[*coin] != 0.0)
            .cloned()
            .collect();
        gone.sort();
        for coin in gone {
            self.recent_changes.push(WhaleChangeEvent {
                address: address.to_string(),
                prev_size: prev[&coin],
                coin,
                new_size: 0.0,
                timestamp: now,
            });
        }

        self.last_positions.insert(address.to_string(), new_positions);
        if self.recent_changes.len() > CHANGE_LOG_CAP {
            let excess = self.recent_changes.len() - CHANGE_LOG_CAP;
            self.recent_changes.drain(..excess);
        }
    }
}

// ─── Leaderboard bootstrap ───────────────────────────────────────────────────

/// The leaderboard response is either a raw array or a wrapper under one
/// of several container keys; entries are address strings or objects.
fn parse_leaderboard(resp: &Value) -> Vec<String> {
    let empty = Vec::new();
    let candidates = if let Some(list) = resp.as_array() {
        list
    } else {
        ["leaders", "entries", "data"]
            .iter()
            .find_map(|key| resp.get(*key).and_then(|v| v.as_array()))
            .unwrap_or(&empty)
    };

    let mut addresses = Vec::new();
    for item in candidates {
        if let Some(addr) = item.as_str() {
            addresses.push(addr.to_string());
        } else if let Some(addr) = fields::text(item, &["address", "user"]) {
            addresses.push(addr.to_string());
        }
    }
    addresses
}

async fn fetch_leaderboard(rest: &RestClient) -> Vec<String> {
    for kind in LEADERBOARD_KINDS {
        match rest.post(json!({"type": kind})).await {
            Ok(resp) => {
                let addresses = parse_leaderboard(&resp);
                if !addresses.is_empty() {
                    log::info!("[WHALES] Leaderboard kind '{}' returned {} addresses.", kind, addresses.len());
                    return addresses;
                }
            }
            Err(e) => {
                log::debug!("[WHALES] Leaderboard kind '{}' failed: {}", kind, e);
            }
        }
    }
    Vec::new()
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

pub struct WhaleTracker {
    coins: Vec<String>,
    rest: Arc<RestClient>,
    whales: Arc<Mutex<Vec<String>>>,
    state: Arc<Mutex<WhaleState>>,
    running: AtomicBool,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WhaleTracker {
    pub fn new(coins: Vec<String>, rest: Arc<RestClient>) -> Self {
        let seed: Vec<String> = DEFAULT_WHALES.iter().map(|a| a.to_string()).collect();
        Self {
            coins,
            rest,
            whales: Arc::new(Mutex::new(seed)),
            state: Arc::new(Mutex::new(WhaleState::default())),
            running: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn add_whale(&self, address: &str) {
        let mut whales = self.whales.lock().unwrap();
        if !whales.iter().any(|a| a == address) {
            whales.push(address.to_string());
        }
    }

    pub fn whale_count(&self) -> usize {
        self.whales.lock().unwrap().len()
    }

    /// Spawns the bootstrap task and the position poll loop. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        // Bootstrap runs off the start path so start never blocks on I/O.
        let rest = self.rest.clone();
        let whales = self.whales.clone();
        let stop = self.stop.clone();
        let bootstrap = tokio::spawn(async move {
            let found = fetch_leaderboard(&rest).await;
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if found.is_empty() {
                log::warn!("[WHALES] Leaderboard bootstrap found nothing; tracking the seed list only.");
                return;
            }
            let mut list = whales.lock().unwrap();
            for addr in found {
                if list.len() >= MAX_WHALES {
                    break;
                }
                if !list.iter().any(|a| *a == addr) {
                    list.push(addr);
                }
            }
            log::info!("[WHALES] Tracking {} addresses after bootstrap.", list.len());
        });

        let rest = self.rest.clone();
        let whales = self.whales.clone();
        let state = self.state.clone();
        let stop = self.stop.clone();
        let notify = self.notify.clone();
        let poller = tokio::spawn(async move {
            let interval = Duration::from_secs(POLL_INTERVAL_POSITIONS_SECS);
            while !stop.load(Ordering::SeqCst) {
                poll_positions(&rest, &whales, &state, &stop).await;
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        let mut handles = self.handles.lock().unwrap();
        handles.push(bootstrap);
        handles.push(poller);
    }

    /// Signals both workers and joins them with a bounded timeout.
    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for task in handles {
            if tokio::time::timeout(Duration::from_secs(STOP_JOIN_TIMEOUT_SECS), task)
                .await
                .is_err()
            {
                log::warn!("[WHALES] Worker did not stop in time.");
            }
        }
    }

    /// Per-coin long/short percentages over whales with a nonzero position,
    /// with the newest change events attached.
    pub fn get_signals(&self) -> Vec<WhaleSignal> {
        let now = now_ts();
        let whales = self.whales.lock().unwrap().clone();
        let state = self.state.lock().unwrap();

        let recent_start = state.recent_changes.len().saturating_sub(CHANGES_PER_SIGNAL);
        let recent: Vec<WhaleChangeEvent> = state.recent_changes[recent_start..].to_vec();

        self.coins
            .iter()
            .map(|coin| {
                let mut long_count = 0u32;
                let mut short_count = 0u32;
                for addr in &whales {
                    let size = state
                        .last_positions
                        .get(addr)
                        .and_then(|p| p.get(coin))
                        .copied()
                        .unwrap_or(0.0);
                    if size > 0.0 {
                        long_count += 1;
                    } else if size < 0.0 {
                        short_count += 1;
                    }
                }
                let total = (long_count + short_count) as f64;
                let (long_pct, short_pct) = if total > 0.0 {
                    (long_count as f64 / total * 100.0, short_count as f64 / total * 100.0)
                } else {
                    (0.0, 0.0)
                };
                WhaleSignal {
                    coin: coin.clone(),
                    long_pct,
                    short_pct,
                    recent_changes: recent.clone(),
                    timestamp: now,
                }
            })
            .collect()
    }
}

async fn poll_positions(
    rest: &RestClient,
    whales: &Mutex<Vec<String>>,
    state: &Mutex<WhaleState>,
    stop: &AtomicBool,
) {
    let now = now_ts();
    let addresses = whales.lock().unwrap().clone();
    for addr in addresses {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match rest.clearinghouse_state(&addr).await {
            Ok(resp) => {
                let positions = fields::positions_from_state(&resp);
                state.lock().unwrap().apply_poll(&addr, positions, now);
            }
            Err(e) => {
                // Skip this address for the cycle; its baseline is untouched.
                log::debug!("[WHALES] clearinghouseState failed for {}: {}", addr, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn positions(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(c, s)| (c.to_string(), *s)).collect()
    }

    #[test]
    fn test_diff_emits_changes_and_replaces_baseline() {
        let mut state = WhaleState::default();
        state.apply_poll("0xA", positions(&[("ETH", 100.0)]), 1.0);
        // The very first poll records the position appearing from 0.
        assert_eq!(state.recent_changes.len(), 1);

        state.apply_poll("0xA", positions(&[("ETH", 150.0), ("SOL", -20.0)]), 2.0);
        let changes: Vec<_> = state.recent_changes[1..].iter().collect();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].coin, "ETH");
        assert_eq!(changes[0].prev_size, 100.0);
        assert_eq!(changes[0].new_size, 150.0);
        assert_eq!(changes[1].coin, "SOL");
        assert_eq!(changes[1].prev_size, 0.0);
        assert_eq!(changes[1].new_size, -20.0);

        let baseline = &state.last_positions["0xA"];
        assert_eq!(baseline["ETH"], 150.0);
        assert_eq!(baseline["SOL"], -20.0);
    }

    #[test]
    fn test_disappeared_position_becomes_zero() {
        let mut state = WhaleState::default();
        state.apply_poll("0xA", positions(&[("ETH", 100.0)]), 1.0);
        state.apply_poll("0xA", positions(&[]), 2.0);

        let last = state.recent_changes.last().unwrap();
        assert_eq!(last.coin, "ETH");
        assert_eq!(last.prev_size, 100.0);
        assert_eq!(last.new_size, 0.0);
        assert!(state.last_positions["0xA"].is_empty());
    }

    #[test]
    fn test_unchanged_positions_emit_nothing() {
        let mut state = WhaleState::default();
        state.apply_poll("0xA", positions(&[("ETH", 100.0)]), 1.0);
        let before = state.recent_changes.len();
        state.apply_poll("0xA", positions(&[("ETH", 100.0)]), 2.0);
        assert_eq!(state.recent_changes.len(), before);
    }

    #[test]
    fn test_change_log_capped() {
        let mut state = WhaleState::default();
        for i in 0..(CHANGE_LOG_CAP + 50) {
            state.apply_poll("0xA", positions(&[("ETH", i as f64 + 1.0)]), i as f64);
        }
        assert_eq!(state.recent_changes.len(), CHANGE_LOG_CAP);
        // Oldest entries were dropped, newest kept.
        assert_eq!(
            state.recent_changes.last().unwrap().new_size,
            (CHANGE_LOG_CAP + 50) as f64
        );
    }

    #[test]
    fn test_parse_leaderboard_shapes() {
        let raw = json!(["0xaaa", "0xbbb"]);
        assert_eq!(parse_leaderboard(&raw), vec!["0xaaa", "0xbbb"]);

        let wrapped = json!({"leaders": [{"address": "0xccc"}, {"user": "0xddd"}, 42]});
        assert_eq!(parse_leaderboard(&wrapped), vec!["0xccc", "0xddd"]);

        let entries = json!({"entries": ["0xeee"]});
        assert_eq!(parse_leaderboard(&entries), vec!["0xeee"]);

        assert!(parse_leaderboard(&json!({"other": []})).is_empty());
    }

    #[test]
    fn test_signal_percentages() {
        let rest = RestClient::shared();
        let tracker = WhaleTracker::new(vec!["ETH".to_string()], rest);
        tracker.add_whale("0xA");
        tracker.add_whale("0xB");
        tracker.add_whale("0xC");
        {
            let mut state = tracker.state.lock().unwrap();
            state.apply_poll("0xA", positions(&[("ETH", 10.0)]), 1.0);
            state.apply_poll("0xB", positions(&[("ETH", -5.0)]), 1.0);
            state.apply_poll("0xC", positions(&[]), 1.0);
        }

        let signals = tracker.get_signals();
        assert_eq!(signals.len(), 1);
        let sig = &signals[0];
        assert_eq!(sig.long_pct, 50.0);
        assert_eq!(sig.short_pct, 50.0);
        assert!(sig.long_pct + sig.short_pct <= 100.0);
    }

    #[test]
    fn test_signal_with_no_positions_is_flat() {
        let rest = RestClient::shared();
        let tracker = WhaleTracker::new(vec!["ETH".to_string()], rest);
        tracker.add_whale("0xA");
        let sig = &tracker.get_signals()[0];
        assert_eq!(sig.long_pct, 0.0);
        assert_eq!(sig.short_pct, 0.0);
    }

    #[test]
    fn test_recent_changes_limited_per_signal() {
        let rest = RestClient::shared();
        let tracker = WhaleTracker::new(vec!["ETH".to_string()], rest);
        {
            let mut state = tracker.state.lock().unwrap();
            for i in 0..40 {
                state.apply_poll("0xA", positions(&[("ETH", i as f64 + 1.0)]), i as f64);
            }
        }
        let sig = &tracker.get_signals()[0];
        assert_eq!(sig.recent_changes.len(), CHANGES_PER_SIGNAL);
        assert_eq!(sig.recent_changes.last().unwrap().new_size, 40.0);
    }

    #[test]
    fn test_add_whale_dedupes() {
        let rest = RestClient::shared();
        let tracker = WhaleTracker::new(vec![], rest);
        tracker.add_whale("0xA");
        tracker.add_whale("0xA");
        assert_eq!(tracker.whale_count(), 1);
    }
}
