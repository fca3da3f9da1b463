//! Per-symbol state and the registry that maps symbol -> state.
//!
//! Mirrors the shape of the order book manager this codebase has always used
//! (`Arc<RwLock<HashMap<String, ...>>>` for symbol lookup/creation), but locks
//! only the individual symbol's state during a processing step instead of
//! the whole map, so cross-symbol work is not serialised.

use crate::health::IngestionStatus;
use crate::model::OrderBook;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// One event/trade timestamp in the flow tracker's rolling windows.
#[derive(Debug, Clone, Copy)]
pub struct FlowEvent {
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct TradeFlow {
    pub ts: DateTime<Utc>,
    pub qty: Decimal,
    pub is_buy: bool,
}

#[derive(Debug, Default)]
pub struct FlowTracker {
    pub events: VecDeque<FlowEvent>,
    pub trades: VecDeque<TradeFlow>,
}

impl FlowTracker {
    pub fn record_event(&mut self, ts: DateTime<Utc>) {
        self.events.push_back(FlowEvent { ts });
    }

    pub fn record_trade(&mut self, ts: DateTime<Utc>, qty: Decimal, is_buy: bool) {
        self.trades.push_back(TradeFlow { ts, qty, is_buy });
    }

    /// Drops entries older than the configured windows. Called on every
    /// mutation so the deques never grow past what the widest window needs.
    pub fn trim(&mut self, now: DateTime<Utc>, rate_window: chrono::Duration, net_flow_window: chrono::Duration) {
        while let Some(front) = self.events.front() {
            if now - front.ts > rate_window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        while let Some(front) = self.trades.front() {
            if now - front.ts > net_flow_window {
                self.trades.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A tracked resting order being watched for spoofing: created when a level
/// far from mid is first observed, purged after 30s of silence.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub updates: u32,
    pub cancels: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FillRecord {
    pub ts: DateTime<Utc>,
    pub price: Decimal,
    pub visible_qty: Decimal,
}

#[derive(Debug, Default)]
pub struct AnomalyHistory {
    /// Keyed by (is_bid, price) -> tracked order state.
    pub tracked_orders: HashMap<(bool, Decimal), TrackedOrder>,
    pub fills: VecDeque<FillRecord>,
    pub spread_history: VecDeque<f64>,
    pub net_flow_history: VecDeque<Decimal>,
}

/// Rolling sample of observed level quantities, capped, used for percentile
/// (P95/P10) wall and vacuum thresholds.
#[derive(Debug, Default)]
pub struct LiquiditySample {
    pub quantities: VecDeque<f64>,
}

pub const LIQUIDITY_SAMPLE_CAPACITY: usize = 10_000;

impl LiquiditySample {
    pub fn push(&mut self, qty: f64) {
        if self.quantities.len() >= LIQUIDITY_SAMPLE_CAPACITY {
            self.quantities.pop_front();
        }
        self.quantities.push_back(qty);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradeRecord {
    pub ts: DateTime<Utc>,
    pub price: Decimal,
    pub qty: Decimal,
}

/// The full state this system maintains per symbol.
pub struct SymbolState {
    pub symbol: String,
    pub venue: String,
    pub book: OrderBook,

    pub last_price: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub change_24h_pct: Option<Decimal>,

    pub last_event_time: DateTime<Utc>,
    pub last_report_time: Option<DateTime<Utc>>,

    pub ingestion_status: IngestionStatus,
    pub status_changed_at: DateTime<Utc>,
    pub degraded_since: Option<DateTime<Utc>>,

    pub flow: FlowTracker,
    pub liquidity_sample: LiquiditySample,
    pub trade_history: VecDeque<TradeRecord>,
    pub anomalies: AnomalyHistory,
}

impl SymbolState {
    pub fn new(symbol: String, venue: String, now: DateTime<Utc>) -> Self {
        Self {
            symbol,
            venue,
            book: OrderBook::new(),
            last_price: None,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            change_24h_pct: None,
            last_event_time: now,
            last_report_time: None,
            ingestion_status: IngestionStatus::Ok,
            status_changed_at: now,
            degraded_since: None,
            flow: FlowTracker::default(),
            liquidity_sample: LiquiditySample::default(),
            trade_history: VecDeque::new(),
            anomalies: AnomalyHistory::default(),
        }
    }
}

/// Maps symbol -> its state, created lazily on first event.
#[derive(Clone)]
pub struct Registry {
    states: Arc<RwLock<HashMap<String, Arc<Mutex<SymbolState>>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the symbol's state, creating it if this is the first time it
    /// has been seen.
    pub fn get_or_create(&self, symbol: &str, venue: &str, now: DateTime<Utc>) -> Arc<Mutex<SymbolState>> {
        if let Some(state) = self.states.read().unwrap().get(symbol) {
            return state.clone();
        }
        let mut states = self.states.write().unwrap();
        states
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SymbolState::new(symbol.to_string(), venue.to_string(), now))))
            .clone()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.states.read().unwrap().keys().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
