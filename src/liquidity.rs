//! Liquidity wall/vacuum detection and volume-profile construction.
//!
//! Grounded on the volume profile module's expand-around-POC algorithm
//! (`find_poc_vah_val`); the percentile-based wall/vacuum thresholds below
//! replace that module's median-multiplier thresholds to match this system's
//! exact severity bands.

use crate::registry::TradeRecord;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

const MIN_SAMPLE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wall {
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vacuum {
    pub from: f64,
    pub to: f64,
    pub severity: Severity,
}

fn percentile(sample: &[f64], p: usize) -> Option<f64> {
    if sample.len() < MIN_SAMPLE_SIZE {
        return None;
    }
    let mut data = Data::new(sample.to_vec());
    Some(data.percentile(p))
}

/// Walls on one side: levels at or above `max(P95 * multiplier, minimum)`.
fn detect_walls_one_side(
    levels: &[(Decimal, Decimal)],
    side: Side,
    sample: &[f64],
    multiplier: f64,
    minimum: f64,
) -> Vec<Wall> {
    let Some(p95) = percentile(sample, 95) else {
        return Vec::new();
    };
    let threshold = (p95 * multiplier).max(minimum);
    if threshold <= 0.0 {
        return Vec::new();
    }

    levels
        .iter()
        .filter_map(|(price, qty)| {
            let qty = qty.to_f64()?;
            if qty < threshold {
                return None;
            }
            let severity = if qty >= 3.0 * threshold {
                Severity::High
            } else if qty >= 2.0 * threshold {
                Severity::Medium
            } else {
                Severity::Low
            };
            Some(Wall {
                side,
                price: price.to_f64()?,
                qty,
                severity,
            })
        })
        .collect()
}

pub fn detect_walls(
    bids: &[(Decimal, Decimal)],
    asks: &[(Decimal, Decimal)],
    sample: &[f64],
    multiplier: f64,
    minimum: f64,
) -> Vec<Wall> {
    let mut walls = detect_walls_one_side(bids, Side::Bid, sample, multiplier, minimum);
    walls.extend(detect_walls_one_side(asks, Side::Ask, sample, multiplier, minimum));
    walls
}

/// Runs of >=3 consecutive levels below the P10 threshold, merged when
/// overlapping or adjacent, inheriting the worst severity of the merge.
fn detect_vacuums_one_side(levels: &[(Decimal, Decimal)], sample: &[f64], percentile_rank: usize) -> Vec<Vacuum> {
    let Some(threshold) = percentile(sample, percentile_rank) else {
        return Vec::new();
    };

    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut run_start: Option<usize> = None;
    for (idx, (_, qty)) in levels.iter().enumerate() {
        let qty = qty.to_f64().unwrap_or(0.0);
        if qty < threshold {
            run_start.get_or_insert(idx);
        } else if let Some(start) = run_start.take() {
            if idx - start >= 3 {
                runs.push((start, idx - 1));
            }
        }
    }
    if let Some(start) = run_start {
        if levels.len() - start >= 3 {
            runs.push((start, levels.len() - 1));
        }
    }

    let severity_for_len = |len: usize| {
        if len >= 10 {
            Severity::High
        } else if len >= 6 {
            Severity::Medium
        } else {
            Severity::Low
        }
    };

    let mut vacuums: Vec<Vacuum> = Vec::new();
    for (start, end) in runs {
        let from = levels[start].0.to_f64().unwrap_or(0.0);
        let to = levels[end].0.to_f64().unwrap_or(0.0);
        let severity = severity_for_len(end - start + 1);
        if let Some(last) = vacuums.last_mut() {
            if (from.min(last.from) - from.max(last.to)).abs() <= f64::EPSILON || ranges_touch(last, from, to) {
                last.from = last.from.min(from);
                last.to = last.to.max(to);
                last.severity = worst(last.severity, severity);
                continue;
            }
        }
        vacuums.push(Vacuum { from, to, severity });
    }
    vacuums
}

fn ranges_touch(existing: &Vacuum, from: f64, to: f64) -> bool {
    let lo = existing.from.min(existing.to);
    let hi = existing.from.max(existing.to);
    !(to < lo || from > hi)
}

fn worst(a: Severity, b: Severity) -> Severity {
    use Severity::*;
    match (a, b) {
        (High, _) | (_, High) => High,
        (Medium, _) | (_, Medium) => Medium,
        _ => Low,
    }
}

pub fn detect_vacuums(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)], sample: &[f64], percentile_rank: usize) -> Vec<Vacuum> {
    let mut vacuums = detect_vacuums_one_side(bids, sample, percentile_rank);
    vacuums.extend(detect_vacuums_one_side(asks, sample, percentile_rank));
    vacuums
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub poc: f64,
    pub vah: f64,
    pub val: f64,
}

const MIN_TRADES_FOR_PROFILE: usize = 10;

/// Bins trades into fixed-width buckets, finds the point of control, then
/// expands symmetrically around it (preferring the lower neighbour on a tie)
/// until 70% of volume is covered.
pub fn volume_profile(
    trades: &[TradeRecord],
    now: DateTime<Utc>,
    window: chrono::Duration,
    tick_size: f64,
    bins_per_tick: u32,
) -> Option<VolumeProfile> {
    let recent: Vec<&TradeRecord> = trades.iter().filter(|t| now - t.ts <= window).collect();
    if recent.len() < MIN_TRADES_FOR_PROFILE || tick_size <= 0.0 || bins_per_tick == 0 {
        return None;
    }

    let bin_size = tick_size * bins_per_tick as f64;
    let prices: Vec<f64> = recent.iter().filter_map(|t| t.price.to_f64()).collect();
    let min_price = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_price = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !min_price.is_finite() || !max_price.is_finite() {
        return None;
    }

    let bin_count = (((max_price - min_price) / bin_size).ceil() as usize + 1).max(1);
    let mut volumes = vec![0.0f64; bin_count];
    for t in &recent {
        let price = t.price.to_f64()?;
        let qty = t.qty.to_f64()?;
        let idx = (((price - min_price) / bin_size).floor() as usize).min(bin_count - 1);
        volumes[idx] += qty;
    }

    let total: f64 = volumes.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let poc_idx = volumes
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)?;

    let mut low = poc_idx;
    let mut high = poc_idx;
    let mut covered = volumes[poc_idx];
    let target = total * 0.70;

    while covered < target && (low > 0 || high < bin_count - 1) {
        let lower_vol = if low > 0 { volumes[low - 1] } else { f64::NEG_INFINITY };
        let upper_vol = if high < bin_count - 1 { volumes[high + 1] } else { f64::NEG_INFINITY };

        if lower_vol >= upper_vol && low > 0 {
            low -= 1;
            covered += volumes[low];
        } else if high < bin_count - 1 {
            high += 1;
            covered += volumes[high];
        } else if low > 0 {
            low -= 1;
            covered += volumes[low];
        } else {
            break;
        }
    }

    let bin_mid = |idx: usize| min_price + (idx as f64 + 0.5) * bin_size;

    Some(VolumeProfile {
        poc: bin_mid(poc_idx),
        val: bin_mid(low),
        vah: bin_mid(high),
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
    fn wall_detected_above_threshold() {
        let sample: Vec<f64> = (0..30).map(|_| 1.0).collect();
        let bids = vec![(dec("99"), dec("50"))];
        let walls = detect_walls(&bids, &[], &sample, 1.5, 0.0);
        assert_eq!(walls.len(), 1);
        assert_eq!(walls[0].severity, Severity::High);
    }

    #[test]
    fn insufficient_sample_returns_empty() {
        let sample: Vec<f64> = vec![1.0, 2.0];
        let bids = vec![(dec("99"), dec("50"))];
        assert!(detect_walls(&bids, &[], &sample, 1.5, 0.0).is_empty());
    }

    #[test]
    fn profile_val_le_poc_le_vah() {
        let now = Utc::now();
        let trades: Vec<TradeRecord> = (0..20)
            .map(|i| TradeRecord {
                ts: now,
                price: Decimal::from(100 + (i % 5)),
                qty: Decimal::from(1),
            })
            .collect();
        let profile = volume_profile(&trades, now, chrono::Duration::seconds(1800), 1.0, 5).unwrap();
        assert!(profile.val <= profile.poc);
        assert!(profile.poc <= profile.vah);
    }

    #[test]
    fn profile_requires_minimum_trades() {
        let now = Utc::now();
        let trades: Vec<TradeRecord> = (0..5)
            .map(|_| TradeRecord { ts: now, price: Decimal::from(100), qty: Decimal::from(1) })
            .collect();
        assert!(volume_profile(&trades, now, chrono::Duration::seconds(1800), 1.0, 5).is_none());
    }

    #[test]
    fn vacuum_run_shorter_than_three_not_detected() {
        let sample: Vec<f64> = (0..30).map(|_| 1.0).collect();
        let mut levels: Vec<(Decimal, Decimal)> = (0..10).map(|i| (Decimal::from(i), dec("5"))).collect();
        levels[3].1 = dec("0.5");
        levels[4].1 = dec("0.5");
        assert!(detect_vacuums(&levels, &[], &sample, 10).is_empty());
    }

    #[test]
    fn vacuum_severity_bands_by_run_length() {
        let sample: Vec<f64> = (0..30).map(|_| 1.0).collect();
        // Three below-threshold runs separated by normal levels: lengths 5, 8, 12.
        let mut levels: Vec<(Decimal, Decimal)> = Vec::new();
        for i in 0..5 {
            levels.push((Decimal::from(i), dec("0.5")));
        }
        levels.push((Decimal::from(5), dec("5")));
        for i in 6..14 {
            levels.push((Decimal::from(i), dec("0.5")));
        }
        levels.push((Decimal::from(14), dec("5")));
        for i in 15..27 {
            levels.push((Decimal::from(i), dec("0.5")));
        }

        let vacuums = detect_vacuums(&levels, &[], &sample, 10);
        assert_eq!(vacuums.len(), 3);
        assert_eq!(vacuums[0].severity, Severity::Low);
        assert_eq!(vacuums[1].severity, Severity::Medium);
        assert_eq!(vacuums[2].severity, Severity::High);
    }
}
