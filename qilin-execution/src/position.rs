use crate::{error::ExecutionError, trade::Trade};
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Two-sided futures position for one symbol.
///
/// China futures brokers report long and short legs independently; `net_qty` is derived.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Position {
    pub symbol: Symbol,
    pub long_qty: i64,
    pub short_qty: i64,
    pub long_avg_cost: Decimal,
    pub short_avg_cost: Decimal,
}

impl Position {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            long_qty: 0,
            short_qty: 0,
            long_avg_cost: Decimal::ZERO,
            short_avg_cost: Decimal::ZERO,
        }
    }

    pub fn net_qty(&self) -> i64 {
        self.long_qty - self.short_qty
    }

    pub fn is_flat(&self) -> bool {
        self.long_qty == 0 && self.short_qty == 0
    }
}

/// Realised profit produced by a closing trade, in money terms.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RealisedPnl {
    pub symbol: Symbol,
    pub qty: i64,
    pub pnl: Decimal,
}

/// Diff row from a local-vs-broker reconciliation: `(symbol, local_net, broker_net)`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PositionDiff {
    pub symbol: Symbol,
    pub local: i64,
    pub broker: i64,
}

/// Result of comparing tracked positions against the broker's authoritative snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ReconcileReport {
    pub diffs: Vec<PositionDiff>,
}

impl ReconcileReport {
    pub fn is_match(&self) -> bool {
        self.diffs.is_empty()
    }
}

/// Hook invoked when a reconciliation detects a mismatch.
pub trait ReconcileHook {
    fn on_mismatch(&self, report: &ReconcileReport);
}

/// Trade-driven position tracking with periodic broker reconciliation.
///
/// Positions are mutated only by applying trades in arrival order within a symbol partition.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    positions: BTreeMap<Symbol, Position>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position for the symbol, flat if never traded.
    pub fn position(&self, symbol: &Symbol) -> Position {
        self.positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol.clone()))
    }

    /// Net quantity for the symbol (long - short).
    pub fn net_qty(&self, symbol: &Symbol) -> i64 {
        self.positions
            .get(symbol)
            .map(Position::net_qty)
            .unwrap_or(0)
    }

    /// Net quantity per symbol, for guardian filtering and reconciliation. Ordered iteration.
    pub fn net_positions(&self) -> BTreeMap<Symbol, i64> {
        self.positions
            .iter()
            .filter(|(_, position)| position.net_qty() != 0)
            .map(|(symbol, position)| (symbol.clone(), position.net_qty()))
            .collect()
    }

    /// Apply one trade.
    ///
    /// Opens increment the directional leg and recompute the weighted average cost. Closes
    /// decrement the opposite leg, consuming against the stored average cost and yielding the
    /// realised PnL (`multiplier` converts price points to money). A close exceeding the tracked
    /// position is rejected with [`ExecutionError::InsufficientPosition`].
    pub fn apply_trade(
        &mut self,
        trade: &Trade,
        multiplier: i64,
    ) -> Result<Option<RealisedPnl>, ExecutionError> {
        let position = self
            .positions
            .entry(trade.symbol.clone())
            .or_insert_with(|| Position::flat(trade.symbol.clone()));

        let qty = Decimal::from(trade.qty);
        let mult = Decimal::from(multiplier);

        match (trade.offset, trade.side) {
            (Offset::Open, Side::Buy) => {
                let held = Decimal::from(position.long_qty);
                position.long_avg_cost =
                    (position.long_avg_cost * held + trade.price * qty) / (held + qty);
                position.long_qty += trade.qty;
                Ok(None)
            }
            (Offset::Open, Side::Sell) => {
                let held = Decimal::from(position.short_qty);
                position.short_avg_cost =
                    (position.short_avg_cost * held + trade.price * qty) / (held + qty);
                position.short_qty += trade.qty;
                Ok(None)
            }
            (Offset::Close | Offset::CloseToday, Side::Sell) => {
                if trade.qty > position.long_qty {
                    return Err(ExecutionError::InsufficientPosition {
                        symbol: trade.symbol.clone(),
                        requested: trade.qty,
                        available: position.long_qty,
                    });
                }
                let pnl = (trade.price - position.long_avg_cost) * qty * mult;
                position.long_qty -= trade.qty;
                if position.long_qty == 0 {
                    position.long_avg_cost = Decimal::ZERO;
                }
                Ok(Some(RealisedPnl {
                    symbol: trade.symbol.clone(),
                    qty: trade.qty,
                    pnl,
                }))
            }
            (Offset::Close | Offset::CloseToday, Side::Buy) => {
                if trade.qty > position.short_qty {
                    return Err(ExecutionError::InsufficientPosition {
                        symbol: trade.symbol.clone(),
                        requested: trade.qty,
                        available: position.short_qty,
                    });
                }
                let pnl = (position.short_avg_cost - trade.price) * qty * mult;
                position.short_qty -= trade.qty;
                if position.short_qty == 0 {
                    position.short_avg_cost = Decimal::ZERO;
                }
                Ok(Some(RealisedPnl {
                    symbol: trade.symbol.clone(),
                    qty: trade.qty,
                    pnl,
                }))
            }
        }
    }

    /// Compare local net positions against the broker's snapshot.
    ///
    /// Any mismatch is reported with `(symbol, local, broker)` tuples and forwarded to the
    /// provided hook.
    pub fn reconcile(
        &self,
        broker: &BTreeMap<Symbol, i64>,
        hook: &impl ReconcileHook,
    ) -> ReconcileReport {
        let mut symbols: Vec<&Symbol> = self.positions.keys().collect();
        for symbol in broker.keys() {
            if !self.positions.contains_key(symbol) {
                symbols.push(symbol);
            }
        }
        symbols.sort();
        symbols.dedup();

        let diffs = symbols
            .into_iter()
            .filter_map(|symbol| {
                let local = self.net_qty(symbol);
                let broker_net = broker.get(symbol).copied().unwrap_or(0);
                (local != broker_net).then(|| PositionDiff {
                    symbol: symbol.clone(),
                    local,
                    broker: broker_net,
                })
            })
            .collect::<Vec<_>>();

        let report = ReconcileReport { diffs };
        if !report.is_match() {
            warn!(diffs = report.diffs.len(), "position reconciliation mismatch");
            hook.on_mismatch(&report);
        }
        report
    }

    /// Overwrite local state with the broker's snapshot.
    ///
    /// Used after disconnect/resync; average costs are unknown to the snapshot and reset to
    /// zero.
    pub fn sync_from_broker(&mut self, broker: &BTreeMap<Symbol, i64>) {
        self.positions.clear();
        for (symbol, net) in broker {
            let mut position = Position::flat(symbol.clone());
            if *net > 0 {
                position.long_qty = *net;
            } else {
                position.short_qty = -net;
            }
            self.positions.insert(symbol.clone(), position);
        }
    }
}
