//! Report assembly: combines a symbol's current state and freshly computed
//! metrics into the versioned JSON snapshot that gets published.
//!
//! Grounded on the report generator's orchestration shape (fetch -> compute
//! sections -> assemble -> cache) and the per-section `Result`-and-continue
//! pattern from its section types; adapted here from a markdown/section
//! assembly to a single always-all-fields JSON report with invariant
//! validation that omits only the offending sub-object.

use crate::anomaly::Anomaly;
use crate::config::Thresholds;
use crate::health::{is_fresh, IngestionStatus};
use crate::liquidity::{self, VolumeProfile, Wall};
use crate::metrics;
use crate::registry::SymbolState;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::error;

pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingestion {
    pub status: IngestionStatus,
    pub fresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Depth {
    pub top20_bid: Vec<PriceLevel>,
    pub top20_ask: Vec<PriceLevel>,
    pub sum_bid: f64,
    pub sum_ask: f64,
    pub imbalance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Liquidity {
    pub walls: Vec<Wall>,
    pub vacuums: Vec<liquidity::Vacuum>,
    pub profile: Option<VolumeProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub orders_per_sec: f64,
    pub net_flow: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthComponents {
    pub spread: f64,
    pub depth: f64,
    pub balance: f64,
    pub flow: f64,
    pub anomalies: f64,
    pub freshness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub score: f64,
    pub components: HealthComponents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub symbol: String,
    pub venue: String,
    pub generated_at: DateTime<Utc>,
    pub data_age_ms: i64,
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub ingestion: Ingestion,
    pub last_price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    pub spread_bps: Option<f64>,
    pub mid_price: Option<f64>,
    pub micro_price: Option<f64>,
    pub depth: Depth,
    pub liquidity: Option<Liquidity>,
    pub flow: Flow,
    pub anomalies: Vec<Anomaly>,
    pub health: Health,
}

/// Component weights for the health score breakdown. These are this
/// system's own weights, distinct from (and not derived from) the
/// microstructure-health module's spread/liquidity/flow/update-rate weights.
const WEIGHT_SPREAD: f64 = 0.20;
const WEIGHT_DEPTH: f64 = 0.25;
const WEIGHT_BALANCE: f64 = 0.15;
const WEIGHT_FLOW: f64 = 0.15;
const WEIGHT_ANOMALIES: f64 = 0.15;
const WEIGHT_FRESHNESS: f64 = 0.10;

fn score_component(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn health_components(
    fresh: bool,
    spread_bps: Option<f64>,
    sum_bid: f64,
    sum_ask: f64,
    imbalance: f64,
    orders_per_sec: f64,
    anomaly_count: usize,
) -> HealthComponents {
    let spread_component = match spread_bps {
        Some(bps) if bps > 10.0 => 60.0,
        Some(_) => 100.0,
        None => 50.0,
    };
    let depth_component = score_component(((sum_bid + sum_ask) / 2.0).min(100.0));
    let balance_component = score_component((1.0 - imbalance.abs()) * 100.0);
    let flow_component = score_component((orders_per_sec * 10.0).min(100.0));
    let anomalies_component = score_component(100.0 - anomaly_count as f64 * 25.0);
    let freshness_component = if fresh { 100.0 } else { 40.0 };

    HealthComponents {
        spread: spread_component,
        depth: depth_component,
        balance: balance_component,
        flow: flow_component,
        anomalies: anomalies_component,
        freshness: freshness_component,
    }
}

fn weighted_score(components: &HealthComponents) -> f64 {
    let weighted = components.spread * WEIGHT_SPREAD
        + components.depth * WEIGHT_DEPTH
        + components.balance * WEIGHT_BALANCE
        + components.flow * WEIGHT_FLOW
        + components.anomalies * WEIGHT_ANOMALIES
        + components.freshness * WEIGHT_FRESHNESS;
    weighted.clamp(0.0, 100.0)
}

/// Assembles a report from a symbol's current state. `now` is passed in so
/// callers control the instant against which `data_age_ms` is measured.
pub fn build(
    state: &SymbolState,
    anomalies: Vec<Anomaly>,
    profile: Option<VolumeProfile>,
    thresholds: &Thresholds,
    flow_window: chrono::Duration,
    net_flow_window: chrono::Duration,
    now: DateTime<Utc>,
) -> Report {
    let data_age_ms = (now - state.last_event_time).num_milliseconds().max(0);
    let fresh = is_fresh(data_age_ms);

    let top_bids = state.book.top_bids();
    let top_asks = state.book.top_asks();

    let best_bid = state.book.best_bid();
    let best_ask = state.book.best_ask();

    let spread = best_bid.zip(best_ask).and_then(|(b, a)| metrics::spread_metrics(b, a));

    let depth_metrics = metrics::depth_metrics(&top_bids, &top_asks);

    let sample: Vec<f64> = state.liquidity_sample.quantities.iter().copied().collect();
    let walls = liquidity::detect_walls(&top_bids, &top_asks, &sample, thresholds.wall_multiplier, 0.0);
    let vacuums = liquidity::detect_vacuums(&top_bids, &top_asks, &sample, thresholds.vacuum_percentile as usize);

    let orders_per_sec = metrics::orders_per_sec(&state.flow, now, flow_window);
    let net_flow_amount = metrics::net_flow(&state.flow, now, net_flow_window)
        .to_f64()
        .unwrap_or(0.0);

    let mut report_anomalies = anomalies;

    let components = health_components(
        fresh,
        spread.map(|s| s.spread_bps),
        depth_metrics.sum_bid,
        depth_metrics.sum_ask,
        depth_metrics.imbalance,
        orders_per_sec,
        report_anomalies.len(),
    );
    let score = weighted_score(&components);

    let liquidity_block = if !walls.is_empty() || !vacuums.is_empty() || profile.is_some() {
        Some(Liquidity { walls, vacuums, profile })
    } else {
        None
    };

    // Invariant: VAL <= POC <= VAH. Drop the profile (but keep the rest of
    // the report) if a computed profile ever violates this.
    let liquidity_block = liquidity_block.map(|mut l| {
        if let Some(p) = l.profile {
            if !(p.val <= p.poc && p.poc <= p.vah) {
                error!(symbol = %state.symbol, "volume profile violated VAL<=POC<=VAH, omitting");
                l.profile = None;
            }
        }
        l
    });

    // Invariant: best_bid <= micro_price <= best_ask. If violated, drop the
    // price triad rather than publish an inconsistent report.
    let (spread_bps, mid_price, micro_price) = match (spread, best_bid, best_ask) {
        (Some(s), Some((bid, _)), Some((ask, _))) => {
            let bid_f = bid.to_f64().unwrap_or(f64::NEG_INFINITY);
            let ask_f = ask.to_f64().unwrap_or(f64::INFINITY);
            if bid_f <= s.micro_price && s.micro_price <= ask_f {
                (Some(s.spread_bps), Some(s.mid_price), Some(s.micro_price))
            } else {
                error!(symbol = %state.symbol, "micro_price outside best_bid..best_ask, omitting spread block");
                (None, None, None)
            }
        }
        _ => (None, None, None),
    };

    // imbalance in [-1,1] always holds by construction of depth_metrics, but
    // guard it explicitly so a future formula change can't silently violate it.
    if !(-1.0..=1.0).contains(&depth_metrics.imbalance) {
        error!(symbol = %state.symbol, imbalance = depth_metrics.imbalance, "imbalance out of range, clamping");
    }
    let imbalance = depth_metrics.imbalance.clamp(-1.0, 1.0);

    report_anomalies.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));

    Report {
        symbol: state.symbol.clone(),
        venue: state.venue.clone(),
        generated_at: now,
        data_age_ms,
        schema_version: SCHEMA_VERSION.to_string(),
        ingestion: Ingestion { status: state.ingestion_status, fresh },
        last_price: state.last_price.and_then(|d| d.to_f64()),
        change_24h_pct: state.change_24h_pct.and_then(|d| d.to_f64()),
        high_24h: state.high_24h.and_then(|d| d.to_f64()),
        low_24h: state.low_24h.and_then(|d| d.to_f64()),
        volume_24h: state.volume_24h.and_then(|d| d.to_f64()),
        best_bid: best_bid.and_then(|(p, q)| Some(PriceLevel { price: p.to_f64()?, qty: q.to_f64()? })),
        best_ask: best_ask.and_then(|(p, q)| Some(PriceLevel { price: p.to_f64()?, qty: q.to_f64()? })),
        spread_bps,
        mid_price,
        micro_price,
        depth: Depth {
            top20_bid: top_bids
                .iter()
                .filter_map(|(p, q)| Some(PriceLevel { price: p.to_f64()?, qty: q.to_f64()? }))
                .collect(),
            top20_ask: top_asks
                .iter()
                .filter_map(|(p, q)| Some(PriceLevel { price: p.to_f64()?, qty: q.to_f64()? }))
                .collect(),
            sum_bid: depth_metrics.sum_bid,
            sum_ask: depth_metrics.sum_ask,
            imbalance,
        },
        liquidity: liquidity_block,
        flow: Flow { orders_per_sec, net_flow: net_flow_amount },
        anomalies: report_anomalies,
        health: Health { score, components },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::registry::SymbolState;
    use rust_decimal::Decimal;

    #[test]
    fn fresh_report_scenario_s1() {
        let now = Utc::now();
        let mut state = SymbolState::new("BTCUSDT".into(), "binance".into(), now);
        state.book.apply_snapshot(
            vec![(Decimal::new(1000, 1), Decimal::from(2))],
            vec![(Decimal::new(1001, 1), Decimal::from(1))],
        );
        state.last_event_time = now;

        let report = build(&state, vec![], None, &Thresholds::default(), chrono::Duration::seconds(10), chrono::Duration::seconds(30), now);

        assert!(report.ingestion.fresh);
        assert_eq!(report.ingestion.status, IngestionStatus::Ok);
        let bps = report.spread_bps.unwrap();
        assert!((bps - 9.99).abs() < 0.01);
        assert_eq!(report.mid_price.unwrap(), 100.05);
    }

    #[test]
    fn health_score_bounded() {
        let now = Utc::now();
        let state = SymbolState::new("ETHUSDT".into(), "binance".into(), now);
        let report = build(&state, vec![], None, &Thresholds::default(), chrono::Duration::seconds(10), chrono::Duration::seconds(30), now);
        assert!(report.health.score >= 0.0 && report.health.score <= 100.0);
    }

    #[test]
    fn imbalance_always_in_range() {
        let now = Utc::now();
        let mut state = SymbolState::new("BTCUSDT".into(), "binance".into(), now);
        state.book.apply_snapshot(vec![(Decimal::from(100), Decimal::from(1000))], vec![]);
        let report = build(&state, vec![], None, &Thresholds::default(), chrono::Duration::seconds(10), chrono::Duration::seconds(30), now);
        assert!(report.depth.imbalance >= -1.0 && report.depth.imbalance <= 1.0);
    }
}
