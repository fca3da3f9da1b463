//! Pure microstructure metric calculators: spread, prices, depth/imbalance,
//! and the flow tracker's rate/net-flow windows.
//!
//! Grounded on `calculate_spread_bps`/`calculate_microprice` from the order
//! book metrics this codebase computed for a single symbol's L1 view;
//! generalized here to the top-20 depth sums the order book maintainer
//! produces.

use crate::registry::FlowTracker;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy)]
pub struct SpreadMetrics {
    pub spread_bps: f64,
    pub mid_price: f64,
    pub micro_price: f64,
}

/// Spread/mid/micro-price, requiring both sides present and not crossed.
pub fn spread_metrics(
    best_bid: (Decimal, Decimal),
    best_ask: (Decimal, Decimal),
) -> Option<SpreadMetrics> {
    let (bid, bid_qty) = best_bid;
    let (ask, ask_qty) = best_ask;
    if bid <= Decimal::ZERO || ask <= bid {
        return None;
    }

    let spread_bps = ((ask - bid) / bid * Decimal::from(10_000)).to_f64()?;
    let mid = (bid + ask) / Decimal::from(2);

    let micro = if bid_qty.is_zero() || ask_qty.is_zero() {
        mid
    } else {
        (ask * bid_qty + bid * ask_qty) / (bid_qty + ask_qty)
    };

    Some(SpreadMetrics {
        spread_bps,
        mid_price: mid.to_f64()?,
        micro_price: micro.to_f64()?,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct DepthMetrics {
    pub sum_bid: f64,
    pub sum_ask: f64,
    pub imbalance: f64,
}

/// Depth sums and imbalance over the top levels passed in.
pub fn depth_metrics(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> DepthMetrics {
    let sum_bid: Decimal = bids.iter().map(|(_, q)| *q).sum();
    let sum_ask: Decimal = asks.iter().map(|(_, q)| *q).sum();
    let total = sum_bid + sum_ask;
    let imbalance = if total.is_zero() {
        0.0
    } else {
        ((sum_bid - sum_ask) / total).to_f64().unwrap_or(0.0)
    };
    DepthMetrics {
        sum_bid: sum_bid.to_f64().unwrap_or(0.0),
        sum_ask: sum_ask.to_f64().unwrap_or(0.0),
        imbalance,
    }
}

/// Events per second over the flow tracker's rate window (default 10s).
pub fn orders_per_sec(flow: &FlowTracker, now: DateTime<Utc>, rate_window: Duration) -> f64 {
    let window_secs = rate_window.num_milliseconds() as f64 / 1000.0;
    if window_secs <= 0.0 {
        return 0.0;
    }
    let count = flow
        .events
        .iter()
        .filter(|e| now - e.ts <= rate_window)
        .count();
    count as f64 / window_secs
}

/// `sum(buy_qty) - sum(sell_qty)` over the net-flow window (default 30s).
pub fn net_flow(flow: &FlowTracker, now: DateTime<Utc>, net_flow_window: Duration) -> Decimal {
    flow.trades
        .iter()
        .filter(|t| now - t.ts <= net_flow_window)
        .fold(Decimal::ZERO, |acc, t| {
            if t.is_buy {
                acc + t.qty
            } else {
                acc - t.qty
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn spread_and_prices_match_fresh_scenario() {
        let m = spread_metrics((dec("100.0"), dec("2.0")), (dec("100.1"), dec("1.0"))).unwrap();
        assert!((m.spread_bps - 9.99).abs() < 0.01);
        assert!((m.mid_price - 100.05).abs() < 1e-9);
        assert!((m.micro_price - 100.0667).abs() < 1e-3);
    }

    #[test]
    fn micro_price_falls_back_to_mid_when_qty_zero() {
        let m = spread_metrics((dec("100"), dec("0")), (dec("101"), dec("5"))).unwrap();
        assert_eq!(m.mid_price, m.micro_price);
    }

    #[test]
    fn crossed_book_returns_none() {
        assert!(spread_metrics((dec("101"), dec("1")), (dec("100"), dec("1"))).is_none());
    }

    #[test]
    fn imbalance_bounded_and_zero_when_empty() {
        let d = depth_metrics(&[], &[]);
        assert_eq!(d.imbalance, 0.0);

        let d = depth_metrics(&[(dec("100"), dec("10"))], &[(dec("101"), dec("2"))]);
        assert!(d.imbalance > 0.0 && d.imbalance <= 1.0);
    }
}
