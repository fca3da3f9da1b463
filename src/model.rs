//! Event envelope parsing and the order book representation shared by the
//! maintainer, calculators, and detectors.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Decoded event kind. Unknown `type` values surface as `UnknownEventType`
/// before this enum is even constructed (see `EventEnvelope::parse`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TradeTick,
    OrderBookDepth,
    OrderBookDeltas,
    Ticker24h,
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "trade_tick" => Ok(EventType::TradeTick),
            "order_book_depth" => Ok(EventType::OrderBookDepth),
            "order_book_deltas" => Ok(EventType::OrderBookDeltas),
            "ticker_24h" => Ok(EventType::Ticker24h),
            _ => Err(()),
        }
    }
}

/// A decoded inbound event, ready for routing to a symbol worker.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event_type: EventType,
    pub venue: String,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub payload: Value,
}

impl EventEnvelope {
    /// Parses the single `data` field carried by a stream message.
    pub fn parse(data: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(data)
            .map_err(|e| EngineError::MalformedMessage(format!("invalid JSON: {e}")))?;

        let obj = raw
            .as_object()
            .ok_or_else(|| EngineError::MalformedMessage("envelope is not a JSON object".into()))?;

        let type_str = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedMessage("missing `type` field".into()))?;

        let venue = obj
            .get("venue")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedMessage("missing `venue` field".into()))?
            .to_string();

        let symbol = obj
            .get("symbol")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedMessage("missing `symbol` field".into()))?
            .to_uppercase();

        let ts_event = obj
            .get("ts_event")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedMessage("missing `ts_event` field".into()))
            .and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| EngineError::MalformedMessage(format!("invalid ts_event: {e}")))
            })?;

        let payload = obj
            .get("payload")
            .cloned()
            .ok_or_else(|| EngineError::MalformedMessage("missing `payload` field".into()))?;

        let event_type = type_str
            .parse::<EventType>()
            .map_err(|_| EngineError::UnknownEventType(type_str.to_string()))?;

        Ok(Self {
            event_type,
            venue,
            symbol,
            ts_event,
            payload,
        })
    }
}

/// Parses a JSON value that may be a number or a decimal string into a
/// `Decimal`. Both encodings appear across the event types this system
/// ingests, so every payload field reader goes through this.
pub fn value_to_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Level-2 order book for one symbol: sorted bid/ask price ladders truncated
/// to the top `MAX_LEVELS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: BTreeMap<Decimal, Decimal>,
    pub asks: BTreeMap<Decimal, Decimal>,
}

pub const MAX_LEVELS: usize = 20;

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.iter().next_back().map(|(p, q)| (*p, *q))
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.iter().next().map(|(p, q)| (*p, *q))
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    fn set_level(side: &mut BTreeMap<Decimal, Decimal>, price: Decimal, qty: Decimal) {
        if qty.is_zero() || qty.is_sign_negative() {
            side.remove(&price);
        } else {
            side.insert(price, qty);
        }
    }

    /// Replaces both sides wholesale (a full snapshot event) and truncates to
    /// the top 20 levels on each side.
    pub fn apply_snapshot(&mut self, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) {
        self.bids.clear();
        self.asks.clear();
        for (price, qty) in bids {
            if price > Decimal::ZERO && qty > Decimal::ZERO {
                self.bids.insert(price, qty);
            }
        }
        for (price, qty) in asks {
            if price > Decimal::ZERO && qty > Decimal::ZERO {
                self.asks.insert(price, qty);
            }
        }
        self.truncate();
    }

    /// Applies last-write-wins incremental updates; `qty == 0` deletes the
    /// level. Idempotent: re-applying the same update list is a no-op.
    pub fn apply_deltas(&mut self, bids_upd: Vec<(Decimal, Decimal)>, asks_upd: Vec<(Decimal, Decimal)>) {
        for (price, qty) in bids_upd {
            Self::set_level(&mut self.bids, price, qty);
        }
        for (price, qty) in asks_upd {
            Self::set_level(&mut self.asks, price, qty);
        }
        self.truncate();
    }

    fn truncate(&mut self) {
        while self.bids.len() > MAX_LEVELS {
            let lowest = *self.bids.keys().next().unwrap();
            self.bids.remove(&lowest);
        }
        while self.asks.len() > MAX_LEVELS {
            let highest = *self.asks.keys().next_back().unwrap();
            self.asks.remove(&highest);
        }
    }

    /// Top levels, bids descending / asks ascending, for reporting.
    pub fn top_bids(&self) -> Vec<(Decimal, Decimal)> {
        self.bids.iter().rev().map(|(p, q)| (*p, *q)).collect()
    }

    pub fn top_asks(&self) -> Vec<(Decimal, Decimal)> {
        self.asks.iter().map(|(p, q)| (*p, *q)).collect()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `[[price, qty], ...]` or `[{"price": .., "size"|"qty": ..}, ...]`
/// level lists, the two encodings this system's producer may emit.
pub fn parse_levels(v: &Value) -> Result<Vec<(Decimal, Decimal)>> {
    let arr = v
        .as_array()
        .ok_or_else(|| EngineError::InvalidPayload("level list is not an array".into()))?;

    let mut out = Vec::with_capacity(arr.len());
    for level in arr {
        let (price, qty) = if let Some(pair) = level.as_array() {
            if pair.len() != 2 {
                return Err(EngineError::InvalidPayload("level pair must have 2 elements".into()));
            }
            let price = value_to_decimal(&pair[0])
                .ok_or_else(|| EngineError::InvalidPayload("invalid price".into()))?;
            let qty = value_to_decimal(&pair[1])
                .ok_or_else(|| EngineError::InvalidPayload("invalid qty".into()))?;
            (price, qty)
        } else if let Some(obj) = level.as_object() {
            let price = obj
                .get("price")
                .and_then(value_to_decimal)
                .ok_or_else(|| EngineError::InvalidPayload("invalid price".into()))?;
            let qty = obj
                .get("size")
                .or_else(|| obj.get("qty"))
                .and_then(value_to_decimal)
                .ok_or_else(|| EngineError::InvalidPayload("invalid qty".into()))?;
            (price, qty)
        } else {
            return Err(EngineError::InvalidPayload("unrecognised level encoding".into()));
        };
        out.push((price, qty));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_application_is_idempotent() {
        let mut book = OrderBook::new();
        book.apply_snapshot(vec![(Decimal::from(100), Decimal::from(2))], vec![]);
        let delta = vec![(Decimal::from(100), Decimal::ZERO)];
        book.apply_deltas(delta.clone(), vec![]);
        assert!(book.bids.is_empty());
        book.apply_deltas(delta, vec![]);
        assert!(book.bids.is_empty());
    }

    #[test]
    fn truncation_keeps_best_twenty() {
        let mut book = OrderBook::new();
        let bids: Vec<_> = (1..=25)
            .map(|i| (Decimal::from(i), Decimal::from(1)))
            .collect();
        book.apply_snapshot(bids, vec![]);
        assert_eq!(book.bids.len(), 20);
        assert_eq!(book.best_bid().unwrap().0, Decimal::from(25));
    }

    #[test]
    fn top_bids_descending_top_asks_ascending() {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            vec![(Decimal::from(99), Decimal::ONE), (Decimal::from(100), Decimal::ONE)],
            vec![(Decimal::from(101), Decimal::ONE), (Decimal::from(102), Decimal::ONE)],
        );
        let bids = book.top_bids();
        assert_eq!(bids[0].0, Decimal::from(100));
        assert_eq!(bids[1].0, Decimal::from(99));
        let asks = book.top_asks();
        assert_eq!(asks[0].0, Decimal::from(101));
        assert_eq!(asks[1].0, Decimal::from(102));
    }

    #[test]
    fn parse_levels_accepts_both_encodings() {
        let pairs = serde_json::json!([["100.5", 2], [101, "1.5"]]);
        let levels = parse_levels(&pairs).unwrap();
        assert_eq!(levels.len(), 2);

        let objs = serde_json::json!([{"price": "100.5", "size": 2}]);
        let levels = parse_levels(&objs).unwrap();
        assert_eq!(levels.len(), 1);
    }
}
