//! Wires a parsed event envelope into the symbol's state, runs the
//! calculators/detectors, and assembles+publishes a report when the event
//! type warrants it.
//!
//! Grounded on the order book manager's per-symbol processing step
//! (`process_depth_update`): lock the symbol's state, mutate it, decide
//! whether a resync/republish is needed, release the lock.

use crate::anomaly::{self, Anomaly};
use crate::cache::CachePublisher;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::health;
use crate::instrumentation;
use crate::liquidity;
use crate::metrics;
use crate::model::{value_to_decimal, parse_levels, EventEnvelope, EventType};
use crate::registry::{Registry, TradeRecord};
use crate::report;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Engine {
    pub registry: Registry,
    pub cache: Arc<Mutex<CachePublisher>>,
    pub config: Config,
}

impl Engine {
    pub fn new(registry: Registry, cache: CachePublisher, config: Config) -> Self {
        Self { registry, cache: Arc::new(Mutex::new(cache)), config }
    }

    /// Returns whether `symbol` passes the optional allow-list.
    fn symbol_allowed(&self, symbol: &str) -> bool {
        match &self.config.symbols {
            Some(allowed) => allowed.iter().any(|s| s == symbol),
            None => true,
        }
    }

    pub async fn process(&self, envelope: EventEnvelope) -> Result<()> {
        if !self.symbol_allowed(&envelope.symbol) {
            return Ok(());
        }

        let now = Utc::now();
        instrumentation::record_stream_lag(envelope.ts_event, now);

        let state_handle = self.registry.get_or_create(&envelope.symbol, &envelope.venue, now);
        let mut state = state_handle.lock().await;
        state.last_event_time = now;

        let should_assemble = match envelope.event_type {
            EventType::TradeTick => {
                apply_trade_tick(&mut state, &envelope.payload, now)?;
                false
            }
            EventType::OrderBookDepth => {
                apply_depth_snapshot(&mut state, &envelope.payload)?;
                true
            }
            EventType::OrderBookDeltas => {
                apply_deltas(&mut state, &envelope.payload)?;
                true
            }
            EventType::Ticker24h => {
                apply_ticker(&mut state, &envelope.payload)?;
                true
            }
        };

        // An event just arrived, so data is fresh by definition; staleness
        // (degraded/down) is detected between events by `run_health_ticker`.
        let state_mut = &mut *state;
        health::advance(
            &mut state_mut.ingestion_status,
            &mut state_mut.status_changed_at,
            &mut state_mut.degraded_since,
            0,
            now,
        );

        instrumentation::record_event_processed();

        if !should_assemble {
            return Ok(());
        }

        let calc_start = std::time::Instant::now();

        let top_bids = state.book.top_bids();
        let top_asks = state.book.top_asks();

        let anomalies = self.run_detectors(&mut state, &top_bids, &top_asks, now);
        let vacuum_count_anomaly = anomaly::detect_flash_crash_risk(
            &state.anomalies,
            &liquidity::detect_vacuums(
                &top_bids,
                &top_asks,
                &state.liquidity_sample.quantities.iter().copied().collect::<Vec<_>>(),
                self.config.thresholds.vacuum_percentile as usize,
            ),
        );

        let mut all_anomalies: Vec<Anomaly> = anomalies;
        if let Some(a) = vacuum_count_anomaly {
            all_anomalies.push(a);
        }

        let profile = liquidity::volume_profile(
            &state.trade_history.iter().copied().collect::<Vec<_>>(),
            now,
            chrono::Duration::from_std(self.config.report_window).unwrap_or(chrono::Duration::seconds(1800)),
            1.0,
            5,
        );

        let report = report::build(
            &state,
            all_anomalies,
            profile,
            &self.config.thresholds,
            chrono::Duration::from_std(self.config.flow_window).unwrap_or(chrono::Duration::seconds(30)),
            chrono::Duration::from_std(self.config.flow_window).unwrap_or(chrono::Duration::seconds(30)),
            now,
        );

        state.last_report_time = Some(now);
        drop(state);

        instrumentation::record_calc_latency(calc_start.elapsed());
        instrumentation::record_report_age(std::time::Duration::from_millis(report.data_age_ms.max(0) as u64));

        let mut cache = self.cache.lock().await;
        cache.publish(&report).await.map_err(|e| {
            instrumentation::record_error("cache_publisher", e.error_type());
            e
        })
    }

    /// Periodically re-evaluates the ingestion FSM for every known symbol
    /// against wall-clock staleness, independent of event arrival. This is
    /// what actually drives ok -> degraded -> down when a symbol's feed
    /// goes quiet.
    pub async fn run_health_ticker(&self, cancel: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            let now = Utc::now();
            for symbol in self.registry.symbols() {
                let handle = self.registry.get_or_create(&symbol, "", now);
                let mut state = handle.lock().await;
                let data_age_ms = (now - state.last_event_time).num_milliseconds().max(0);
                let state_mut = &mut *state;
                let changed = health::advance(
                    &mut state_mut.ingestion_status,
                    &mut state_mut.status_changed_at,
                    &mut state_mut.degraded_since,
                    data_age_ms,
                    now,
                );
                if changed {
                    match state.ingestion_status {
                        crate::health::IngestionStatus::Ok => info!(symbol = %symbol, "ingestion recovered"),
                        crate::health::IngestionStatus::Degraded => warn!(symbol = %symbol, data_age_ms, "ingestion degraded"),
                        crate::health::IngestionStatus::Down => {
                            instrumentation::record_error("ingestion_health", "down");
                            warn!(symbol = %symbol, data_age_ms, "ingestion down");
                        }
                    }
                }
            }
        }
    }

    fn run_detectors(
        &self,
        state: &mut crate::registry::SymbolState,
        top_bids: &[(Decimal, Decimal)],
        top_asks: &[(Decimal, Decimal)],
        now: chrono::DateTime<Utc>,
    ) -> Vec<Anomaly> {
        let spread = state
            .book
            .best_bid()
            .zip(state.book.best_ask())
            .and_then(|(b, a)| metrics::spread_metrics(b, a));

        if let Some(s) = spread {
            state.anomalies.spread_history.push_back(s.spread_bps);
            if state.anomalies.spread_history.len() > 64 {
                state.anomalies.spread_history.pop_front();
            }
        }

        let net_flow = metrics::net_flow(
            &state.flow,
            now,
            chrono::Duration::from_std(self.config.flow_window).unwrap_or(chrono::Duration::seconds(30)),
        );
        state.anomalies.net_flow_history.push_back(net_flow);
        if state.anomalies.net_flow_history.len() > 64 {
            state.anomalies.net_flow_history.pop_front();
        }

        let mid = spread.map(|s| s.mid_price).unwrap_or(0.0);
        let spread_bps = spread.map(|s| s.spread_bps).unwrap_or(0.0);

        anomaly::update_and_detect_spoofing(
            &mut state.anomalies,
            top_bids,
            top_asks,
            mid,
            spread_bps,
            self.config.thresholds.spoofing_distance_multiplier,
            self.config.thresholds.spoofing_cancel_rate_threshold,
            now,
        )
    }
}

fn get_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn is_buy_side(payload: &Value) -> bool {
    let side = get_str(payload, "side")
        .or_else(|| get_str(payload, "aggressor_side"))
        .unwrap_or("")
        .to_lowercase();
    side.starts_with("buy")
}

fn apply_trade_tick(state: &mut crate::registry::SymbolState, payload: &Value, now: chrono::DateTime<Utc>) -> Result<()> {
    let price = payload
        .get("price")
        .and_then(value_to_decimal)
        .ok_or_else(|| EngineError::InvalidPayload("trade_tick missing price".into()))?;
    let qty = payload
        .get("qty")
        .or_else(|| payload.get("size"))
        .and_then(value_to_decimal)
        .ok_or_else(|| EngineError::InvalidPayload("trade_tick missing qty".into()))?;
    let is_buy = is_buy_side(payload);

    state.last_price = Some(price);
    state.flow.record_event(now);
    state.flow.record_trade(now, qty, is_buy);
    state.flow.trim(now, chrono::Duration::seconds(10), chrono::Duration::seconds(30));

    state.trade_history.push_back(TradeRecord { ts: now, price, qty });
    while let Some(front) = state.trade_history.front() {
        if now - front.ts > chrono::Duration::hours(1) {
            state.trade_history.pop_front();
        } else {
            break;
        }
    }

    let visible_qty = if is_buy {
        state.book.best_ask().map(|(_, q)| q).unwrap_or(Decimal::ZERO)
    } else {
        state.book.best_bid().map(|(_, q)| q).unwrap_or(Decimal::ZERO)
    };

    anomaly::record_fill_and_detect_iceberg(
        &mut state.anomalies,
        price,
        visible_qty,
        now,
        5,
        0.1,
    );

    Ok(())
}

fn apply_depth_snapshot(state: &mut crate::registry::SymbolState, payload: &Value) -> Result<()> {
    let bids = payload
        .get("bids")
        .ok_or_else(|| EngineError::InvalidPayload("order_book_depth missing bids".into()))
        .and_then(parse_levels)?;
    let asks = payload
        .get("asks")
        .ok_or_else(|| EngineError::InvalidPayload("order_book_depth missing asks".into()))
        .and_then(parse_levels)?;

    for (_, qty) in bids.iter().chain(asks.iter()) {
        if let Some(q) = rust_decimal::prelude::ToPrimitive::to_f64(qty) {
            state.liquidity_sample.push(q);
        }
    }

    state.book.apply_snapshot(bids, asks);

    if state.book.is_crossed() {
        warn!(symbol = %state.symbol, "crossed book after snapshot application");
    }
    Ok(())
}

fn apply_deltas(state: &mut crate::registry::SymbolState, payload: &Value) -> Result<()> {
    let bids_upd = payload
        .get("bids_upd")
        .ok_or_else(|| EngineError::InvalidPayload("order_book_deltas missing bids_upd".into()))
        .and_then(parse_levels)?;
    let asks_upd = payload
        .get("asks_upd")
        .ok_or_else(|| EngineError::InvalidPayload("order_book_deltas missing asks_upd".into()))
        .and_then(parse_levels)?;

    for (_, qty) in bids_upd.iter().chain(asks_upd.iter()) {
        if let Some(q) = rust_decimal::prelude::ToPrimitive::to_f64(qty) {
            state.liquidity_sample.push(q);
        }
    }

    state.book.apply_deltas(bids_upd, asks_upd);

    if state.book.is_crossed() {
        info!(symbol = %state.symbol, "transient crossed book after delta application");
    }
    Ok(())
}

fn apply_ticker(state: &mut crate::registry::SymbolState, payload: &Value) -> Result<()> {
    if let Some(v) = payload.get("last_price").and_then(value_to_decimal) {
        state.last_price = Some(v);
    }
    state.change_24h_pct = payload.get("price_change_pct").and_then(value_to_decimal);
    state.high_24h = payload.get("high_24h").and_then(value_to_decimal);
    state.low_24h = payload.get("low_24h").and_then(value_to_decimal);
    state.volume_24h = payload.get("volume_24h").and_then(value_to_decimal);
    Ok(())
}
