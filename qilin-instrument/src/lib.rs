#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Qilin-Instrument
//! Qilin-Instrument contains the core Exchange, Symbol and Instrument data structures for the
//! six Chinese futures exchanges, plus the session-scoped [`InstrumentRegistry`](registry::InstrumentRegistry).

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Defines the [`ExchangeId`](exchange::ExchangeId) enum covering the six mainland futures
/// exchanges.
pub mod exchange;

/// Futures contract metadata ([`Instrument`](instrument::Instrument)) and fee definitions.
pub mod instrument;

/// Session-scoped symbol -> [`Instrument`](instrument::Instrument) lookup.
pub mod registry;

/// [`Symbol`](symbol::Symbol) and [`ProductCode`](symbol::ProductCode) new types.
pub mod symbol;

/// [`Side`] of an order or trade - Buy or Sell.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Opposite [`Side`], used when synthesising the closing direction of a position.
    pub fn inverse(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
        )
    }
}

/// Position [`Offset`] flag carried by every China futures order.
///
/// `CloseToday` closes a same-day opened position and usually attracts a different fee (see
/// [`Instrument::close_today_fee_multiplier`](instrument::Instrument)).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    Open,
    Close,
    CloseToday,
}

impl Offset {
    /// True if the order increases exposure rather than reducing it.
    pub fn is_open(self) -> bool {
        matches!(self, Offset::Open)
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Offset::Open => "open",
                Offset::Close => "close",
                Offset::CloseToday => "close_today",
            }
        )
    }
}

pub mod test_utils {
    use crate::{
        exchange::ExchangeId,
        instrument::{FeeKind, Instrument},
        symbol::Symbol,
    };
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;

    /// Construct a plain SHFE-style instrument with sensible defaults for tests.
    pub fn instrument(symbol: &str, tick_size: Decimal, multiplier: i64) -> Instrument {
        Instrument::new(
            Symbol::new(symbol),
            ExchangeId::Shfe,
            tick_size,
            multiplier,
            Decimal::new(10, 2),
            Decimal::new(10, 2),
            Decimal::ONE,
            Decimal::new(5, 2),
            FeeKind::Rate,
            Decimal::new(1, 4),
            true,
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            true,
        )
        .unwrap()
    }
}
