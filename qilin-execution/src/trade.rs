use crate::order::id::LocalOrderId;
use chrono::{DateTime, Utc};
use derive_more::{Constructor, From};
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, From)]
pub struct TradeId(pub SmolStr);

impl TradeId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

impl Display for TradeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One fill against a local order, as applied to the position layer.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Trade {
    pub id: TradeId,
    pub local_id: LocalOrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub offset: Offset,
    pub qty: i64,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

impl Trade {
    /// Notional value of this fill given the contract multiplier.
    pub fn notional(&self, multiplier: i64) -> Decimal {
        Decimal::from(self.qty) * self.price * Decimal::from(multiplier)
    }
}

impl Display for Trade {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ symbol: {}, side: {}, offset: {}, qty: {}, price: {} }}",
            self.symbol, self.side, self.offset, self.qty, self.price
        )
    }
}
