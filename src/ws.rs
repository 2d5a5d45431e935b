// ─────────────────────────────────────────────────────────────────────────────
// ws.rs — Persistent WebSocket session with reconnect + subscription replay
//
// One connection, one handler. Subscriptions are recorded and re-sent in
// order on every (re)connect; a subscription added while connected goes out
// immediately. Inbound frames are JSON-decoded and handed to the handler
// synchronously from the receive loop; decode failures are dropped.
// ─────────────────────────────────────────────────────────────────────────────
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::config::{
    HYPERLIQUID_WS_URL, STOP_JOIN_TIMEOUT_SECS, WS_PING_INTERVAL_SECS, WS_PING_TIMEOUT_SECS,
    WS_RECONNECT_DELAY_SECS,
};

pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

pub struct WsClient {
    url: String,
    reconnect_delay: Duration,
    handler: MessageHandler,
    subscriptions: Arc<Mutex<Vec<Value>>>,
    sub_tx: UnboundedSender<Value>,
    sub_rx: Mutex<Option<UnboundedReceiver<Value>>>,
    running: AtomicBool,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WsClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self::with_url(HYPERLIQUID_WS_URL, Duration::from_secs(WS_RECONNECT_DELAY_SECS), handler)
    }

    pub fn with_url<F>(url: &str, reconnect_delay: Duration, handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        Self {
            url: url.to_string(),
            reconnect_delay,
            handler: Arc::new(handler),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            sub_tx,
            sub_rx: Mutex::new(Some(sub_rx)),
            running: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    // ─── Subscriptions ───────────────────────────────────────────────────────

    /// Records a subscription object. It is replayed on every connect; if
    /// the session is live it is also sent right away.
    pub fn subscribe(&self, subscription: Value) {
        self.subscriptions.lock().unwrap().push(subscription.clone());
        let _ = self.sub_tx.send(subscription);
    }

    pub fn subscribe_trades(&self, coin: &str) {
        self.subscribe(json!({"type": "trades", "coin": coin}));
    }

    pub fn subscribe_l2_book(&self, coin: &str) {
        self.subscribe(json!({"type": "l2Book", "coin": coin}));
    }

    pub fn subscribe_candle(&self, coin: &str, interval: &str) {
        self.subscribe(json!({"type": "candle", "coin": coin, "interval": interval}));
    }

    pub fn subscribe_active_asset_ctx(&self, coin: Option<&str>) {
        match coin {
            Some(c) => self.subscribe(json!({"type": "activeAssetCtx", "coin": c})),
            None => self.subscribe(json!({"type": "activeAssetCtx"})),
        }
    }

    /// Recorded subscriptions, in send order.
    pub fn subscriptions(&self) -> Vec<Value> {
        self.subscriptions.lock().unwrap().clone()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Spawns the background receive loop. Calling start again is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let rx = match self.sub_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return, // already consumed by a previous start/stop cycle
        };
        let url = self.url.clone();
        let delay = self.reconnect_delay;
        let handler = self.handler.clone();
        let subs = self.subscriptions.clone();
        let stop = self.stop.clone();
        let notify = self.notify.clone();
        let task = tokio::spawn(async move {
            run_loop(url, delay, handler, subs, rx, stop, notify).await;
        });
        *self.handle.lock().unwrap() = Some(task);
    }

    /// Signals the loop to cease (including an in-flight connect) and waits
    /// up to the join timeout. Safe to call more than once.
    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        let handle = self.handle.lock().unwrap().take();
        if let Some(task) = handle {
            if tokio::time::timeout(Duration::from_secs(STOP_JOIN_TIMEOUT_SECS), task)
                .await
                .is_err()
            {
                log::warn!("WS receive loop did not stop in time");
            }
        }
    }
}

async fn run_loop(
    url: String,
    reconnect_delay: Duration,
    handler: MessageHandler,
    subs: Arc<Mutex<Vec<Value>>>,
    mut sub_rx: UnboundedReceiver<Value>,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
) {
    let parsed = match Url::parse(&url) {
        Ok(u) => u,
        Err(e) => {
            log::error!("Invalid WS endpoint {}: {}", url, e);
            return;
        }
    };

    while !stop.load(Ordering::SeqCst) {
        log::info!("Connecting to WS: {}", url);
        let conn = tokio::select! {
            _ = notify.notified() => break,
            conn = connect_async(parsed.clone()) => conn,
        };

        match conn {
            Ok((stream, _)) => {
                log::info!("WS connected.");
                session(stream, &handler, &subs, &mut sub_rx, &stop, &notify).await;
            }
            Err(e) => {
                log::error!("WS connect failed: {}. Retrying in {:?}.", e, reconnect_delay);
            }
        }

        if stop.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = notify.notified() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

async fn session(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    handler: &MessageHandler,
    subs: &Arc<Mutex<Vec<Value>>>,
    sub_rx: &mut UnboundedReceiver<Value>,
    stop: &Arc<AtomicBool>,
    notify: &Arc<Notify>,
) {
    let (mut write, mut read) = stream.split();

    // Drain queued subscribe nudges; the full replay below covers them.
    while sub_rx.try_recv().is_ok() {}

    let recorded = subs.lock().unwrap().clone();
    for sub in &recorded {
        if let Err(e) = send_subscribe(&mut write, sub).await {
            log::error!("Failed to replay subscription: {}", e);
            return;
        }
    }
    if !recorded.is_empty() {
        log::info!("Replayed {} subscriptions.", recorded.len());
    }

    let mut ping = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
    ping.tick().await; // first tick fires immediately
    let dead_after = Duration::from_secs(WS_PING_INTERVAL_SECS + WS_PING_TIMEOUT_SECS);
    let mut last_rx = Instant::now();

    loop {
        // A stop raised while an arm body was running has no waiter to wake.
        if stop.load(Ordering::SeqCst) {
            let _ = write.send(Message::Close(None)).await;
            return;
        }
        tokio::select! {
            _ = notify.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            Some(sub) = sub_rx.recv() => {
                if let Err(e) = send_subscribe(&mut write, &sub).await {
                    log::error!("Failed to send subscription: {}", e);
                    return;
                }
            }
            _ = ping.tick() => {
                if last_rx.elapsed() > dead_after {
                    log::warn!("WS silent for {:?}. Reconnecting.", last_rx.elapsed());
                    return;
                }
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_rx = Instant::now();
                        // Undecodable frames are dropped without comment.
                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                            handler(value);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_rx = Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_rx = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::warn!("WS closed by server. Reconnecting.");
                        return;
                    }
                    Some(Err(e)) => {
                        log::error!("WS error: {}. Reconnecting.", e);
                        return;
                    }
                    Some(Ok(_)) => {
                        last_rx = Instant::now();
                    }
                }
            }
        }
    }
}

async fn send_subscribe<S>(write: &mut S, subscription: &Value) -> Result<(), S::Error>
where
    S: SinkExt<Message> + Unpin,
{
    let msg = json!({"method": "subscribe", "subscription": subscription});
    write.send(Message::Text(msg.to_string())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_handler() -> impl Fn(Value) + Send + Sync + 'static {
        |_| {}
    }

    #[test]
    fn test_subscriptions_recorded_in_order() {
        let ws = WsClient::new(quiet_handler());
        ws.subscribe_trades("ETH");
        ws.subscribe_l2_book("ETH");
        ws.subscribe_candle("SOL", "1m");
        ws.subscribe_active_asset_ctx(None);

        let subs = ws.subscriptions();
        assert_eq!(subs.len(), 4);
        assert_eq!(subs[0]["type"], "trades");
        assert_eq!(subs[0]["coin"], "ETH");
        assert_eq!(subs[1]["type"], "l2Book");
        assert_eq!(subs[2]["type"], "candle");
        assert_eq!(subs[2]["interval"], "1m");
        assert_eq!(subs[3]["type"], "activeAssetCtx");
        assert!(subs[3].get("coin").is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_noop() {
        let ws = WsClient::new(quiet_handler());
        ws.stop().await;
        ws.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_stop_twice() {
        // Unreachable endpoint: the loop cycles through connect failures
        // until stopped. The second start must not spawn a second loop.
        let ws = WsClient::with_url("ws://127.0.0.1:9", Duration::from_millis(20), quiet_handler());
        ws.start();
        ws.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        ws.stop().await;
        ws.stop().await;
        assert!(ws.handle.lock().unwrap().is_none());
    }
}
