// ─────────────────────────────────────────────────────────────────────────────
// funding.rs — Funding-rate and open-interest anomaly detection
//
// metaAndAssetCtxs answers with [metadata, [asset_ctx, ...]] where the
// metadata's universe lists instrument names in the same index order as
// the context array. Funding rates are scored against a 7-day history;
// open interest is compared cycle over cycle.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::{HISTORY_WINDOW_SECS, POLL_INTERVAL_FUNDING_SECS, STOP_JOIN_TIMEOUT_SECS};
use crate::fields;
use crate::rest::RestClient;
use crate::stats::{now_ts, RollingHistory};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSignal {
    pub coin: String,
    pub funding_rate: f64,
    pub funding_zscore: f64,
    pub open_interest: f64,
    pub oi_change_pct: f64,
    pub is_anomaly: bool,
    pub timestamp: f64,
}

#[derive(Debug, Default)]
struct FundingInner {
    histories: HashMap<String, RollingHistory>,
    last_oi: HashMap<String, f64>,
    latest: HashMap<String, FundingSignal>,
}

/// Scores one (funding, oi) observation. Funding is z-scored against the
/// prior history, then appended; OI change is relative to the previous
/// cycle (0 without a prior nonzero value).
fn record_sample(inner: &mut FundingInner, coin: &str, funding_rate: f64, oi: f64, now: f64) {
    let hist = inner
        .histories
        .entry(coin.to_string())
        .or_insert_with(|| RollingHistory::new(HISTORY_WINDOW_SECS));
    let funding_zscore = hist.z_score(funding_rate);
    hist.push(now, funding_rate);

    let oi_change_pct = match inner.last_oi.get(coin) {
        Some(&prev) if prev != 0.0 => ((oi - prev) / prev) * 100.0,
        _ => 0.0,
    };
    inner.last_oi.insert(coin.to_string(), oi);

    let is_anomaly = funding_zscore.abs() >= 2.0 || oi_change_pct.abs() >= 20.0;
    inner.latest.insert(
        coin.to_string(),
        FundingSignal {
            coin: coin.to_string(),
            funding_rate,
            funding_zscore,
            open_interest: oi,
            oi_change_pct,
            is_anomaly,
            timestamp: now,
        },
    );
}

/// Walks a metaAndAssetCtxs response into (coin, funding, oi) triples,
/// aligned by universe index. Unknown shapes yield nothing.
fn parse_asset_ctxs(resp: &Value) -> Vec<(String, f64, f64)> {
    let arr = match resp.as_array() {
        Some(a) if a.len() >= 2 => a,
        _ => return Vec::new(),
    };
    let names: Vec<String> = arr[0]
        .get("universe")
        .and_then(|u| u.as_array())
        .map(|list| {
            list.iter()
                .map(|asset| fields::text(asset, &["name"]).unwrap_or("").to_string())
                .collect()
        })
        .unwrap_or_default();
    let ctxs = match arr[1].as_array() {
        Some(c) => c,
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    for (i, ctx) in ctxs.iter().enumerate() {
        let coin = match names.get(i) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => continue,
        };
        let funding = fields::num(ctx, &["funding", "fundingRate", "fundingRateHourly"]);
        let oi = fields::num(ctx, &["openInterest", "openInterestUsd", "oi"]);
        out.push((coin, funding, oi));
    }
    out
}

pub struct FundingAnomalyDetector {
    coins: Vec<String>,
    rest: Arc<RestClient>,
    inner: Arc<Mutex<FundingInner>>,
    running: AtomicBool,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FundingAnomalyDetector {
    pub fn new(coins: Vec<String>, rest: Arc<RestClient>) -> Self {
        Self {
            coins,
            rest,
            inner: Arc::new(Mutex::new(FundingInner::default())),
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
        let coins = self.coins.clone();
        let inner = self.inner.clone();
        let stop = self.stop.clone();
        let notify = self.notify.clone();
        let task = tokio::spawn(async move {
            let interval = Duration::from_secs(POLL_INTERVAL_FUNDING_SECS);
            while !stop.load(Ordering::SeqCst) {
                poll_once(&rest, &coins, &inner).await;
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
                log::warn!("[FUNDING] Poller did not stop in time.");
            }
        }
    }

    pub fn get_signals(&self) -> Vec<FundingSignal> {
        let inner = self.inner.lock().unwrap();
        self.coins
            .iter()
            .filter_map(|coin| inner.latest.get(coin).cloned())
            .collect()
    }
}

async fn poll_once(rest: &RestClient, coins: &[String], inner: &Mutex<FundingInner>) {
    let now = now_ts();
    let resp = match rest.meta_and_asset_ctxs().await {
        Ok(r) => r,
        Err(e) => {
            log::warn!("[FUNDING] metaAndAssetCtxs failed: {}", e);
            return;
        }
    };
    let mut inner = inner.lock().unwrap();
    for (coin, funding, oi) in parse_asset_ctxs(&resp) {
        if coins.iter().any(|tracked| *tracked == coin) {
            record_sample(&mut inner, &coin, funding, oi, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_funding_zscore_anomaly() {
        let mut inner = FundingInner::default();
        // 10 samples, mean 0.0001, population stddev 0.00005.
        for i in 0..10 {
            let v = if i % 2 == 0 { 0.00005 } else { 0.00015 };
            record_sample(&mut inner, "ETH", v, 1_000.0, i as f64);
        }
        record_sample(&mut inner, "ETH", 0.0003, 1_000.0, 10.0);
        let sig = &inner.latest["ETH"];
        assert!((sig.funding_zscore - 4.0).abs() < 1e-9);
        assert!(sig.is_anomaly);
    }

    #[test]
    fn test_oi_change_pct() {
        let mut inner = FundingInner::default();
        record_sample(&mut inner, "ETH", 0.0001, 1_000.0, 1.0);
        // No previous OI: change is 0.
        assert_eq!(inner.latest["ETH"].oi_change_pct, 0.0);

        record_sample(&mut inner, "ETH", 0.0001, 1_250.0, 2.0);
        assert!((inner.latest["ETH"].oi_change_pct - 25.0).abs() < 1e-9);
        assert!(inner.latest["ETH"].is_anomaly);

        record_sample(&mut inner, "ETH", 0.0001, 1_250.0, 3.0);
        assert_eq!(inner.latest["ETH"].oi_change_pct, 0.0);
    }

    #[test]
    fn test_zero_previous_oi_yields_zero_change() {
        let mut inner = FundingInner::default();
        record_sample(&mut inner, "ETH", 0.0001, 0.0, 1.0);
        record_sample(&mut inner, "ETH", 0.0001, 500.0, 2.0);
        assert_eq!(inner.latest["ETH"].oi_change_pct, 0.0);
    }

    #[test]
    fn test_parse_asset_ctxs_aligns_by_index() {
        let resp = json!([
            {"universe": [{"name": "BTC"}, {"name": "ETH"}, {"name": "SOL"}]},
            [
                {"funding": "0.0001", "openInterest": "1000"},
                {"fundingRate": 0.0002, "oi": 2000},
                {"fundingRateHourly": "-0.0003", "openInterestUsd": "3000"},
            ],
        ]);
        let parsed = parse_asset_ctxs(&resp);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], ("BTC".to_string(), 0.0001, 1_000.0));
        assert_eq!(parsed[1], ("ETH".to_string(), 0.0002, 2_000.0));
        assert_eq!(parsed[2], ("SOL".to_string(), -0.0003, 3_000.0));
    }

    #[test]
    fn test_parse_asset_ctxs_tolerates_bad_shapes() {
        assert!(parse_asset_ctxs(&json!({})).is_empty());
        assert!(parse_asset_ctxs(&json!([{}])).is_empty());
        assert!(parse_asset_ctxs(&json!([{}, "nope"])).is_empty());
        // More contexts than names: the extras are skipped.
        let resp = json!([
            {"universe": [{"name": "BTC"}]},
            [{"funding": 0.1}, {"funding": 0.2}],
        ]);
        assert_eq!(parse_asset_ctxs(&resp).len(), 1);
    }

    #[test]
    fn test_non_numeric_fields_coerce_to_zero() {
        let resp = json!([
            {"universe": [{"name": "ETH"}]},
            [{"funding": "n/a", "openInterest": null}],
        ]);
        let parsed = parse_asset_ctxs(&resp);
        assert_eq!(parsed[0], ("ETH".to_string(), 0.0, 0.0));
    }
}
