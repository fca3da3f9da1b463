//! End-to-end scenario tests exercising the calculators, detectors, and
//! report assembler together the way a single event-processing pass would,
//! without requiring a live Redis/stream connection.

use chrono::{Duration, Utc};
use market_analytics_engine::anomaly;
use market_analytics_engine::config::Thresholds;
use market_analytics_engine::health::{self, IngestionStatus};
use market_analytics_engine::liquidity::Severity;
use market_analytics_engine::model::OrderBook;
use market_analytics_engine::registry::SymbolState;
use market_analytics_engine::report;
use rust_decimal::Decimal;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// S2 — a wall on the bid side should be flagged high severity and push
/// depth imbalance positive.
#[test]
fn s2_imbalance_and_walls() {
    let now = Utc::now();
    let mut state = SymbolState::new("BTCUSDT".into(), "binance".into(), now);

    let mut bids: Vec<(Decimal, Decimal)> = (0..19).map(|i| (dec("100") - Decimal::from(i), Decimal::from(1))).collect();
    bids.push((dec("99"), dec("50")));
    state.book.apply_snapshot(bids, vec![]);

    // Prior samples so P95 sits at 1.0 and the threshold lands at 1.5.
    for _ in 0..30 {
        state.liquidity_sample.push(1.0);
    }

    let report = report::build(&state, vec![], None, &Thresholds::default(), Duration::seconds(10), Duration::seconds(30), now);

    let liquidity = report.liquidity.expect("wall should produce a liquidity block");
    assert_eq!(liquidity.walls.len(), 1);
    assert_eq!(liquidity.walls[0].severity, Severity::High);
    assert_eq!(liquidity.walls[0].price, 99.0);
    assert!(report.depth.imbalance > 0.0);
}

/// S3 — applying the same zero-qty delta twice is idempotent.
#[test]
fn s3_delta_idempotence() {
    let mut book = OrderBook::new();
    book.apply_snapshot(vec![(dec("100"), dec("2"))], vec![]);
    assert_eq!(book.best_bid(), Some((dec("100"), dec("2"))));

    book.apply_deltas(vec![(dec("100"), dec("0"))], vec![]);
    assert_eq!(book.best_bid(), None, "zero qty removes the level");
    let after_first = book.top_bids();

    book.apply_deltas(vec![(dec("100"), dec("0"))], vec![]);
    assert_eq!(book.best_bid(), None, "re-applying the same delta is a no-op");
    assert_eq!(book.top_bids(), after_first);
}

/// S4 — the ingestion FSM degrades, then goes down, purely as a function of
/// elapsed data age, then recovers instantly on the next event.
#[test]
fn s4_degrade_then_recover() {
    let t0 = Utc::now();
    let mut status = IngestionStatus::Ok;
    let mut changed_at = t0;
    let mut degraded_since = None;

    let t3 = t0 + Duration::seconds(3);
    health::advance(&mut status, &mut changed_at, &mut degraded_since, 3000, t3);
    assert_eq!(status, IngestionStatus::Degraded);

    let t5_5 = t0 + Duration::milliseconds(5500);
    health::advance(&mut status, &mut changed_at, &mut degraded_since, 5500, t5_5);
    assert_eq!(status, IngestionStatus::Down);

    // A new event arrives at t=10s; data is fresh again by construction.
    let t10 = t0 + Duration::seconds(10);
    health::advance(&mut status, &mut changed_at, &mut degraded_since, 0, t10);
    assert_eq!(status, IngestionStatus::Ok);
}

/// S5 — a resting order far from mid, updated a few times then repeatedly
/// absent, crosses the cancel-rate threshold at a medium severity.
#[test]
fn s5_spoofing_cancel_rate() {
    use market_analytics_engine::registry::AnomalyHistory;

    let mut history = AnomalyHistory::default();
    let now = Utc::now();
    let far_bid = dec("50");

    for _ in 0..3 {
        anomaly::update_and_detect_spoofing(&mut history, &[(far_bid, dec("1"))], &[], 100.0, 1.0, 3.0, 0.7, now);
    }
    let mut anomalies = Vec::new();
    for _ in 0..8 {
        anomalies = anomaly::update_and_detect_spoofing(&mut history, &[], &[], 100.0, 1.0, 3.0, 0.7, now);
    }

    let found = anomalies.iter().find(|a| a.kind == anomaly::AnomalyType::Spoofing).expect("spoofing anomaly expected");
    // cancel_rate = 8/11 ~= 0.727, below the 0.8 medium-severity threshold.
    assert_eq!(found.severity, Severity::Low);
    let note = found.note.as_deref().unwrap_or_default();
    assert!(note.contains("cancels=8"), "expected 8 cancels, got: {note}");
}

/// S6 — a widened spread plus draining net flow plus a batch of vacuums
/// together cross two of the three flash-crash-risk signals.
#[test]
fn s6_flash_crash_risk() {
    use market_analytics_engine::liquidity::Vacuum;
    use market_analytics_engine::registry::AnomalyHistory;

    let mut history = AnomalyHistory::default();
    for s in [2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 8.5] {
        history.spread_history.push_back(s);
    }
    for f in [-200, -350, -550, -800] {
        history.net_flow_history.push_back(Decimal::from(f));
    }

    let vacuums = vec![
        Vacuum { from: 10.0, to: 9.0, severity: Severity::High },
        Vacuum { from: 20.0, to: 19.0, severity: Severity::High },
        Vacuum { from: 30.0, to: 29.0, severity: Severity::Medium },
        Vacuum { from: 40.0, to: 39.0, severity: Severity::Medium },
    ];

    // Spread and vacuum signals fire (2 of 3); net-flow's total delta is -600,
    // short of the -1000 needed for the third signal, so severity is medium.
    let anomaly = anomaly::detect_flash_crash_risk(&history, &vacuums).expect("flash-crash-risk should fire");
    assert_eq!(anomaly.kind, anomaly::AnomalyType::FlashCrashRisk);
    assert_eq!(anomaly.severity, Severity::Medium);
}
