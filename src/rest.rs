// ─────────────────────────────────────────────────────────────────────────────
// rest.rs — Rate-limited, retrying client for the venue's /info endpoint
//
// A single POST endpoint accepts typed JSON payloads ({"type": ..., ...})
// and answers with JSON. One method per known payload kind; the raw post
// stays public for heuristic kinds (the whale leaderboard bootstrap probes
// several).
// ─────────────────────────────────────────────────────────────────────────────
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::{
    HYPERLIQUID_REST_URL, REST_BACKOFF_START_SECS, REST_MAX_REQUESTS_PER_SEC, REST_RETRIES,
    REST_TIMEOUT_SECS,
};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum RestError {
    /// Non-success HTTP status from the venue.
    Status(u16),
    /// Socket-level failure or timeout.
    Transport(String),
    /// Body was not valid JSON.
    Decode(String),
}

impl RestError {
    /// 5xx and 429 are worth another attempt; other statuses are terminal.
    fn is_retryable(&self) -> bool {
        match self {
            RestError::Status(code) => *code >= 500 || *code == 429,
            RestError::Transport(_) | RestError::Decode(_) => true,
        }
    }
}

impl std::fmt::Display for RestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestError::Status(code) => write!(f, "HTTP {}", code),
            RestError::Transport(s) => write!(f, "Transport error: {}", s),
            RestError::Decode(s) => write!(f, "Decode error: {}", s),
        }
    }
}

impl std::error::Error for RestError {}

// ─── Rate limiter ────────────────────────────────────────────────────────────

/// Token-spaced limiter: every call waits until at least 1/R seconds have
/// passed since the previous call. The async mutex is held across the
/// pacing sleep, so concurrent callers serialize in acquisition order.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_sec: f64) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(1.0 / max_per_sec),
            last: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct RestClient {
    url: String,
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new(HYPERLIQUID_REST_URL, REST_MAX_REQUESTS_PER_SEC)
    }
}

impl RestClient {
    pub fn new(url: &str, max_rps: f64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.to_string(),
            http,
            limiter: RateLimiter::new(max_rps),
        }
    }

    /// Shared handle for use across several pollers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn attempt(&self, payload: &Value) -> Result<Value, RestError> {
        let resp = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if status >= 400 {
            return Err(RestError::Status(status));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))
    }

    /// Rate-limited POST with retries. Back-off starts at 0.5s and doubles;
    /// the error from the final attempt is surfaced to the caller.
    pub async fn post(&self, payload: Value) -> Result<Value, RestError> {
        self.limiter.wait().await;
        let mut backoff = REST_BACKOFF_START_SECS;
        let mut last_err = RestError::Transport("no attempt made".to_string());
        for attempt in 1..=REST_RETRIES {
            match self.attempt(&payload).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() || attempt == REST_RETRIES {
                        return Err(e);
                    }
                    log::debug!(
                        "REST attempt {}/{} failed ({}), retrying in {:.1}s",
                        attempt,
                        REST_RETRIES,
                        e,
                        backoff
                    );
                    last_err = e;
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    backoff *= 2.0;
                }
            }
        }
        Err(last_err)
    }

    // ─── Typed payload kinds ─────────────────────────────────────────────────

    pub async fn all_mids(&self) -> Result<Value, RestError> {
        self.post(json!({"type": "allMids"})).await
    }

    pub async fn meta_and_asset_ctxs(&self) -> Result<Value, RestError> {
        self.post(json!({"type": "metaAndAssetCtxs"})).await
    }

    pub async fn l2_book(&self, coin: &str) -> Result<Value, RestError> {
        self.post(json!({"type": "l2Book", "coin": coin})).await
    }

    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_time_ms: u64,
        end_time_ms: u64,
    ) -> Result<Value, RestError> {
        self.post(json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin,
                "interval": interval,
                "startTime": start_time_ms,
                "endTime": end_time_ms,
            },
        }))
        .await
    }

    pub async fn clearinghouse_state(&self, user: &str) -> Result<Value, RestError> {
        self.post(json!({"type": "clearinghouseState", "user": user}))
            .await
    }

    pub async fn vault_details(&self, vault: &str) -> Result<Value, RestError> {
        self.post(json!({"type": "vaultDetails", "vaultAddress": vault}))
            .await
    }

    pub async fn user_fills(&self, user: &str) -> Result<Value, RestError> {
        self.post(json!({"type": "userFills", "user": user})).await
    }

    pub async fn user_fills_by_time(
        &self,
        user: &str,
        start_time_ms: u64,
        end_time_ms: u64,
    ) -> Result<Value, RestError> {
        self.post(json!({
            "type": "userFillsByTime",
            "user": user,
            "startTime": start_time_ms,
            "endTime": end_time_ms,
        }))
        .await
    }

    pub async fn historical_orders(&self, user: &str) -> Result<Value, RestError> {
        self.post(json!({"type": "historicalOrders", "user": user}))
            .await
    }

    pub async fn funding_history(
        &self,
        coin: &str,
        start_time_ms: u64,
        end_time_ms: u64,
    ) -> Result<Value, RestError> {
        self.post(json!({
            "type": "fundingHistory",
            "coin": coin,
            "startTime": start_time_ms,
            "endTime": end_time_ms,
        }))
        .await
    }
}
