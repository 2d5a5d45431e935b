// ─────────────────────────────────────────────────────────────────────────────
// signal-dashboard — minimal terminal view over the signal engine
//
// Starts the aggregator, then prints one table row per tracked coin every
// 30 seconds: price, 5m order flow, whale long/short split, HLP and
// funding z-scores, and the composite recommendation. Ctrl-C stops the
// detectors cleanly before exit.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::time::Duration;

use signal_engine::{
    config, fields, FundingSignal, HlpSignal, RestClient, SignalAggregator, WhaleSignal,
};

const REFRESH_SECS: u64 = 30;

fn tracked_coins_from_env() -> Vec<String> {
    match std::env::var("TRACKED_COINS") {
        Ok(raw) => {
            let coins: Vec<String> = raw
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if coins.is_empty() {
                config::tracked_coins()
            } else {
                coins
            }
        }
        Err(_) => config::tracked_coins(),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let coins = tracked_coins_from_env();
    log::info!("signal-dashboard starting for {:?}", coins);

    let aggregator = SignalAggregator::new(coins.clone());
    aggregator.start();

    let rest = RestClient::default();
    println!("Starting signal engine... first signals may take a poll cycle.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(REFRESH_SECS)) => {}
        }
        render(&rest, &aggregator, &coins).await;
    }

    println!("\nStopping signal engine...");
    aggregator.stop().await;
}

async fn render(rest: &RestClient, aggregator: &SignalAggregator, coins: &[String]) {
    let mids = match rest.all_mids().await {
        Ok(resp) => fields::mids_from_response(&resp),
        Err(e) => {
            log::warn!("allMids failed: {}", e);
            HashMap::new()
        }
    };

    let orderflow = aggregator.orderflow.get_signals();
    let whales: HashMap<String, WhaleSignal> = aggregator
        .whales
        .get_signals()
        .into_iter()
        .map(|s| (s.coin.clone(), s))
        .collect();
    let hlp: HashMap<String, HlpSignal> = aggregator
        .hlp
        .get_signals()
        .into_iter()
        .map(|s| (s.coin.clone(), s))
        .collect();
    let funding: HashMap<String, FundingSignal> = aggregator
        .funding
        .get_signals()
        .into_iter()
        .map(|s| (s.coin.clone(), s))
        .collect();
    let composite: HashMap<String, _> = aggregator
        .get_composite_signals()
        .into_iter()
        .map(|s| (s.coin.clone(), s))
        .collect();

    println!("\n{}", "=".repeat(92));
    println!(
        "Perp Signal Engine | {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", "=".repeat(92));
    println!("COIN  PRICE     OFLOW(5m)  WHALES(L/S)     HLP(Z)     FUND(Z)    SCORE  RECO");

    for coin in coins {
        let price = mids.get(coin).copied().unwrap_or(0.0);
        let oflow_5m = orderflow
            .iter()
            .find(|s| &s.coin == coin && s.window_secs == 300)
            .map(|s| s.imbalance)
            .unwrap_or(0.0);
        let whale_str = whales
            .get(coin)
            .map(|s| format!("{:.0}/{:.0}", s.long_pct, s.short_pct))
            .unwrap_or_else(|| "0/0".to_string());
        let hlp_z = hlp.get(coin).map(|s| s.z_score).unwrap_or(0.0);
        let fund_z = funding.get(coin).map(|s| s.funding_zscore).unwrap_or(0.0);
        let (score, reco) = composite
            .get(coin)
            .map(|s| (s.score, s.recommendation.clone()))
            .unwrap_or((0.0, "NEUTRAL".to_string()));

        println!(
            "{:<4}  {:>8.2}  {:>9.4}  {:>12}  {:>7.4}  {:>7.4}  {:>6.4}  {}",
            coin, price, oflow_5m, whale_str, hlp_z, fund_z, score, reco
        );
    }
}
