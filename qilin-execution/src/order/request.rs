use chrono::{DateTime, Utc};
use derive_more::Constructor;
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An order the core intends to place, before edge gating and pre-trade protection.
///
/// Becomes an [`OrderContext`](super::OrderContext) (with a fresh
/// [`LocalOrderId`](super::id::LocalOrderId)) only after every gate passes.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderIntent {
    pub symbol: Symbol,
    pub side: Side,
    pub offset: Offset,
    pub qty: i64,
    pub price: Decimal,
}

impl OrderIntent {
    /// Notional value at the intended price.
    pub fn notional(&self, multiplier: i64) -> Decimal {
        Decimal::from(self.qty) * self.price * Decimal::from(multiplier)
    }

    /// Signed net-position delta this intent applies to its symbol.
    pub fn signed_qty(&self) -> i64 {
        match self.side {
            Side::Buy => self.qty,
            Side::Sell => -self.qty,
        }
    }

    /// Materialise the accepted intent into an [`OrderContext`](super::OrderContext).
    pub fn into_context(
        self,
        local_id: super::id::LocalOrderId,
        created_at: DateTime<Utc>,
    ) -> super::OrderContext {
        super::OrderContext::new(
            local_id,
            self.symbol,
            self.side,
            self.offset,
            self.qty,
            self.price,
            created_at,
        )
    }
}
