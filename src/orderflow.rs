// ─────────────────────────────────────────────────────────────────────────────
// orderflow.rs — Trade-flow imbalance from the live trade stream
//
// Subscribes to `trades` for every tracked coin and keeps a rolling
// per-coin buffer of (timestamp, side, usd) events, trimmed to the largest
// configured window. Signals are computed on demand per (coin, window).
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{large_trade_threshold, ORDERFLOW_WINDOWS_SECS};
use crate::fields;
use crate::stats::now_ts;
use crate::ws::WsClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The venue labels taker sides inconsistently ("B", "Buy",
    /// "Open Long", "A", "Sell"...). Anything starting with a B is a buy.
    pub fn from_label(label: &str) -> Self {
        if label.starts_with('B') || label.starts_with('b') {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradeEvent {
    pub ts: f64,
    pub side: Side,
    pub usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFlowSignal {
    pub coin: String,
    pub window_secs: u64,
    pub imbalance: f64,
    pub large_buy_count: u32,
    pub large_sell_count: u32,
    pub net_large_flow_usd: f64,
    pub timestamp: f64,
}

// ─── Rolling trade buffers ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TradeBuffers {
    trades: HashMap<String, VecDeque<TradeEvent>>,
}

impl TradeBuffers {
    fn push(&mut self, coin: &str, event: TradeEvent) {
        self.trades.entry(coin.to_string()).or_default().push_back(event);
    }

    /// Drops every event older than `now - max_window` from every coin.
    fn trim(&mut self, now: f64, max_window: f64) {
        let cutoff = now - max_window;
        for buffer in self.trades.values_mut() {
            while let Some(front) = buffer.front() {
                if front.ts >= cutoff {
                    break;
                }
                buffer.pop_front();
            }
        }
    }

    fn snapshot(&self, coin: &str) -> Vec<TradeEvent> {
        self.trades.get(coin).map(|b| b.iter().copied().collect()).unwrap_or_default()
    }
}

/// Accumulates one window's worth of events into a signal.
fn window_signal(
    coin: &str,
    events: &[TradeEvent],
    window_secs: u64,
    threshold: f64,
    now: f64,
) -> OrderFlowSignal {
    let cutoff = now - window_secs as f64;
    let mut buy_vol = 0.0;
    let mut sell_vol = 0.0;
    let mut large_buy = 0u32;
    let mut large_sell = 0u32;
    let mut net_large = 0.0;

    for event in events {
        if event.ts < cutoff {
            continue;
        }
        match event.side {
            Side::Buy => buy_vol += event.usd,
            Side::Sell => sell_vol += event.usd,
        }
        if threshold > 0.0 && event.usd >= threshold {
            match event.side {
                Side::Buy => {
                    large_buy += 1;
                    net_large += event.usd;
                }
                Side::Sell => {
                    large_sell += 1;
                    net_large -= event.usd;
                }
            }
        }
    }

    let total = buy_vol + sell_vol;
    let imbalance = if total > 0.0 { (buy_vol - sell_vol) / total } else { 0.0 };

    OrderFlowSignal {
        coin: coin.to_string(),
        window_secs,
        imbalance,
        large_buy_count: large_buy,
        large_sell_count: large_sell,
        net_large_flow_usd: net_large,
        timestamp: now,
    }
}

/// Ingests one inbound WS message into the buffers. Runs synchronously on
/// the WS receive loop, so it only appends and trims.
fn handle_message(coins: &[String], buffers: &Mutex<TradeBuffers>, msg: &Value, now: f64) {
    let channel = fields::text(msg, &["channel", "type"]).unwrap_or("");
    if channel != "trades" {
        return;
    }
    let data = match msg.get("data") {
        Some(d) => d,
        None => return,
    };
    let entries: Vec<&Value> = if let Some(list) = data.as_array() {
        list.iter().collect()
    } else if let Some(list) = data.get("trades").and_then(|t| t.as_array()) {
        list.iter().collect()
    } else {
        return;
    };

    let max_window = *ORDERFLOW_WINDOWS_SECS.iter().max().unwrap_or(&0) as f64;
    let mut buf = buffers.lock().unwrap();
    for trade in entries {
        let coin = match fields::text(trade, &["coin", "symbol"]) {
            Some(c) if coins.iter().any(|tracked| tracked == c) => c.to_string(),
            _ => continue,
        };
        let side = Side::from_label(fields::text(trade, &["side", "dir", "takerSide"]).unwrap_or(""));
        let usd = match fields::opt_num(trade, &["usd"]) {
            Some(v) => v,
            None => {
                fields::num(trade, &["px", "price"]) * fields::num(trade, &["sz", "size", "qty"])
            }
        };
        buf.push(&coin, TradeEvent { ts: now, side, usd });
    }
    buf.trim(now, max_window);
}

// ─── Detector ────────────────────────────────────────────────────────────────

pub struct OrderFlowImbalance {
    coins: Vec<String>,
    buffers: Arc<Mutex<TradeBuffers>>,
    ws: WsClient,
    running: AtomicBool,
}

impl OrderFlowImbalance {
    pub fn new(coins: Vec<String>) -> Self {
        let buffers = Arc::new(Mutex::new(TradeBuffers::default()));
        let handler_coins = coins.clone();
        let handler_buffers = buffers.clone();
        let ws = WsClient::new(move |msg| {
            handle_message(&handler_coins, &handler_buffers, &msg, now_ts());
        });
        Self {
            coins,
            buffers,
            ws,
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ws.start();
        for coin in &self.coins {
            self.ws.subscribe_trades(coin);
        }
        log::info!("Order flow detector subscribed to trades for {} coins.", self.coins.len());
    }

    pub async fn stop(&self) {
        self.ws.stop().await;
    }

    /// One signal per (coin, window). Copies the buffer under the lock and
    /// computes after releasing it.
    pub fn get_signals(&self) -> Vec<OrderFlowSignal> {
        let now = now_ts();
        let snapshots: Vec<(String, Vec<TradeEvent>)> = {
            let buf = self.buffers.lock().unwrap();
            self.coins.iter().map(|c| (c.clone(), buf.snapshot(c))).collect()
        };

        let mut signals = Vec::with_capacity(snapshots.len() * ORDERFLOW_WINDOWS_SECS.len());
        for (coin, events) in &snapshots {
            let threshold = large_trade_threshold(coin);
            for &window in ORDERFLOW_WINDOWS_SECS {
                signals.push(window_signal(coin, events, window, threshold, now));
            }
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(age_secs: f64, side: Side, usd: f64, now: f64) -> TradeEvent {
        TradeEvent { ts: now - age_secs, side, usd }
    }

    #[test]
    fn test_imbalance_math() {
        let now = 1_700_000_000.0;
        let events = vec![
            event(100.0, Side::Buy, 10_000.0, now),
            event(100.0, Side::Sell, 5_000.0, now),
            event(100.0, Side::Buy, 5_000.0, now),
        ];
        let sig = window_signal("ETH", &events, 300, 50_000.0, now);
        assert_eq!(sig.imbalance, 0.5);
        assert_eq!(sig.large_buy_count, 0);
        assert_eq!(sig.large_sell_count, 0);
        assert_eq!(sig.net_large_flow_usd, 0.0);
    }

    #[test]
    fn test_large_trade_counting() {
        let now = 1_700_000_000.0;
        let events = vec![
            event(10.0, Side::Buy, 60_000.0, now),
            event(10.0, Side::Sell, 80_000.0, now),
        ];
        let sig = window_signal("ETH", &events, 300, 50_000.0, now);
        assert_eq!(sig.large_buy_count, 1);
        assert_eq!(sig.large_sell_count, 1);
        assert_eq!(sig.net_large_flow_usd, -20_000.0);
    }

    #[test]
    fn test_zero_threshold_disables_counting() {
        let now = 1_700_000_000.0;
        let events = vec![event(1.0, Side::Buy, 1_000_000.0, now)];
        let sig = window_signal("DOGE", &events, 300, 0.0, now);
        assert_eq!(sig.large_buy_count, 0);
        assert_eq!(sig.net_large_flow_usd, 0.0);
    }

    #[test]
    fn test_empty_window_is_flat() {
        let now = 1_700_000_000.0;
        let sig = window_signal("ETH", &[], 300, 50_000.0, now);
        assert_eq!(sig.imbalance, 0.0);
    }

    #[test]
    fn test_imbalance_bounded() {
        let now = 1_700_000_000.0;
        let events = vec![
            event(5.0, Side::Buy, 123.0, now),
            event(5.0, Side::Buy, 77.0, now),
        ];
        let sig = window_signal("ETH", &events, 300, 0.0, now);
        assert_eq!(sig.imbalance, 1.0);
    }

    #[test]
    fn test_events_outside_window_excluded() {
        let now = 1_700_000_000.0;
        let events = vec![
            event(400.0, Side::Buy, 10_000.0, now),
            event(100.0, Side::Sell, 10_000.0, now),
        ];
        let sig = window_signal("ETH", &events, 300, 0.0, now);
        assert_eq!(sig.imbalance, -1.0);
    }

    #[test]
    fn test_trim_respects_largest_window() {
        let now = 1_700_000_000.0;
        let mut buffers = TradeBuffers::default();
        buffers.push("ETH", event(20_000.0, Side::Buy, 1.0, now));
        buffers.push("ETH", event(10_000.0, Side::Sell, 1.0, now));
        buffers.push("ETH", event(5.0, Side::Buy, 1.0, now));
        let max_window = *ORDERFLOW_WINDOWS_SECS.iter().max().unwrap() as f64;
        buffers.trim(now, max_window);
        let events = buffers.snapshot("ETH");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.ts >= now - max_window));
    }

    #[test]
    fn test_handler_ingests_trade_batches() {
        let coins = vec!["ETH".to_string()];
        let buffers = Mutex::new(TradeBuffers::default());
        let now = 1_700_000_000.0;
        let msg = json!({
            "channel": "trades",
            "data": [
                {"coin": "ETH", "side": "B", "px": "3000", "sz": "2"},
                {"coin": "ETH", "side": "A", "usd": 9_000},
                {"coin": "BTC", "side": "B", "px": "60000", "sz": "1"},
            ],
        });
        handle_message(&coins, &buffers, &msg, now);

        let events = buffers.lock().unwrap().snapshot("ETH");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].side, Side::Buy);
        assert_eq!(events[0].usd, 6_000.0);
        assert_eq!(events[1].side, Side::Sell);
        assert_eq!(events[1].usd, 9_000.0);
        // BTC is not tracked
        assert!(buffers.lock().unwrap().snapshot("BTC").is_empty());
    }

    #[test]
    fn test_handler_accepts_wrapped_trade_list() {
        let coins = vec!["SOL".to_string()];
        let buffers = Mutex::new(TradeBuffers::default());
        let msg = json!({
            "type": "trades",
            "data": {"trades": [{"coin": "SOL", "dir": "Sell", "price": 150, "qty": 10}]},
        });
        handle_message(&coins, &buffers, &msg, 1_700_000_000.0);
        let events = buffers.lock().unwrap().snapshot("SOL");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].side, Side::Sell);
        assert_eq!(events[0].usd, 1_500.0);
    }

    #[test]
    fn test_non_trade_channels_ignored() {
        let coins = vec!["ETH".to_string()];
        let buffers = Mutex::new(TradeBuffers::default());
        let msg = json!({"channel": "l2Book", "data": [{"coin": "ETH", "side": "B", "usd": 1}]});
        handle_message(&coins, &buffers, &msg, 1_700_000_000.0);
        assert!(buffers.lock().unwrap().snapshot("ETH").is_empty());
    }

    #[test]
    fn test_side_labels() {
        assert_eq!(Side::from_label("B"), Side::Buy);
        assert_eq!(Side::from_label("buy"), Side::Buy);
        assert_eq!(Side::from_label("A"), Side::Sell);
        assert_eq!(Side::from_label("Sell"), Side::Sell);
        assert_eq!(Side::from_label(""), Side::Sell);
    }
}
