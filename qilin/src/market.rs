use chrono::{DateTime, Utc};
use derive_more::Constructor;
use qilin_instrument::symbol::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Best bid/ask snapshot for one instrument, with the session statistics the protection gates
/// and cost model consume.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_vol: i64,
    pub ask_vol: i64,
    pub last: Decimal,
    /// Prior trading day's official settlement price (price band anchor).
    pub settle: Decimal,
    /// Average daily volume, in lots.
    pub adv: i64,
    pub ts: DateTime<Utc>,
}

impl Quote {
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    pub fn total_depth(&self) -> i64 {
        self.bid_vol + self.ask_vol
    }
}

/// Market state delivered to the core over `QuoteQ`, one per tick.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct MarketSnapshot {
    pub time: DateTime<Utc>,
    pub quotes: BTreeMap<Symbol, Quote>,
}

impl MarketSnapshot {
    pub fn quote(&self, symbol: &Symbol) -> Option<&Quote> {
        self.quotes.get(symbol)
    }
}

/// Account state passed to strategies alongside the market snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct PortfolioSnapshot {
    pub positions: BTreeMap<Symbol, i64>,
    pub equity: Decimal,
    pub margin_used: Decimal,
}
