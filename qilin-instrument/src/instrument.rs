use crate::{exchange::ExchangeId, symbol::Symbol};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an exchange charges trading fees for a product.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    /// Fixed fee per lot, `fee_value` is money per contract.
    PerLot,
    /// Proportional fee, `fee_value` is a rate applied to notional.
    Rate,
}

/// Futures contract metadata, loaded at startup and refreshed only on a session boundary.
///
/// Immutable within a trading session.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub exchange: ExchangeId,
    pub tick_size: Decimal,
    pub multiplier: i64,
    pub margin_rate_long: Decimal,
    pub margin_rate_short: Decimal,
    pub close_today_fee_multiplier: Decimal,
    pub price_band_pct: Decimal,
    pub fee_kind: FeeKind,
    pub fee_value: Decimal,
    pub has_night_session: bool,
    pub night_session_end: NaiveTime,
    pub expiry_date: NaiveDate,
    pub is_main: bool,
}

/// Maximum permitted daily price band percentage across all products.
const PRICE_BAND_PCT_MAX: Decimal = Decimal::from_parts(2, 0, 0, false, 1);

impl Instrument {
    /// Construct a validated [`Instrument`].
    ///
    /// Fails if tick_size <= 0, multiplier <= 0, or price_band_pct outside (0, 0.2].
    pub fn new(
        symbol: Symbol,
        exchange: ExchangeId,
        tick_size: Decimal,
        multiplier: i64,
        margin_rate_long: Decimal,
        margin_rate_short: Decimal,
        close_today_fee_multiplier: Decimal,
        price_band_pct: Decimal,
        fee_kind: FeeKind,
        fee_value: Decimal,
        has_night_session: bool,
        night_session_end: NaiveTime,
        expiry_date: NaiveDate,
        is_main: bool,
    ) -> Result<Self, InstrumentError> {
        if tick_size <= Decimal::ZERO {
            return Err(InstrumentError::InvalidSpec {
                symbol: symbol.clone(),
                detail: format!("tick_size {tick_size} must be > 0"),
            });
        }
        if multiplier <= 0 {
            return Err(InstrumentError::InvalidSpec {
                symbol: symbol.clone(),
                detail: format!("multiplier {multiplier} must be > 0"),
            });
        }
        if price_band_pct <= Decimal::ZERO || price_band_pct > PRICE_BAND_PCT_MAX {
            return Err(InstrumentError::InvalidSpec {
                symbol: symbol.clone(),
                detail: format!("price_band_pct {price_band_pct} outside (0, 0.2]"),
            });
        }

        Ok(Self {
            symbol,
            exchange,
            tick_size,
            multiplier,
            margin_rate_long,
            margin_rate_short,
            close_today_fee_multiplier,
            price_band_pct,
            fee_kind,
            fee_value,
            has_night_session,
            night_session_end,
            expiry_date,
            is_main,
        })
    }

    /// Contract multiplier as a [`Decimal`], for notional arithmetic.
    pub fn multiplier_decimal(&self) -> Decimal {
        Decimal::from(self.multiplier)
    }

    /// Notional value of `qty` lots at `price`.
    pub fn notional(&self, qty: i64, price: Decimal) -> Decimal {
        Decimal::from(qty) * price * self.multiplier_decimal()
    }

    /// Margin rate for the given position side.
    pub fn margin_rate(&self, side: crate::Side) -> Decimal {
        match side {
            crate::Side::Buy => self.margin_rate_long,
            crate::Side::Sell => self.margin_rate_short,
        }
    }

    /// Calendar days until contract expiry, negative after expiry.
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum InstrumentError {
    #[error("invalid instrument spec for {symbol}: {detail}")]
    InvalidSpec { symbol: Symbol, detail: String },

    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn spec(tick_size: Decimal, multiplier: i64, band: Decimal) -> Result<Instrument, InstrumentError> {
        Instrument::new(
            Symbol::new("rb2501"),
            ExchangeId::Shfe,
            tick_size,
            multiplier,
            dec!(0.10),
            dec!(0.10),
            Decimal::ONE,
            band,
            FeeKind::Rate,
            dec!(0.0001),
            true,
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            true,
        )
    }

    #[test]
    fn test_instrument_spec_validation() {
        struct TestCase {
            name: &'static str,
            tick_size: Decimal,
            multiplier: i64,
            band: Decimal,
            expected_ok: bool,
        }

        let cases = vec![
            TestCase {
                name: "valid spec",
                tick_size: dec!(1),
                multiplier: 10,
                band: dec!(0.05),
                expected_ok: true,
            },
            TestCase {
                name: "zero tick_size",
                tick_size: dec!(0),
                multiplier: 10,
                band: dec!(0.05),
                expected_ok: false,
            },
            TestCase {
                name: "negative multiplier",
                tick_size: dec!(1),
                multiplier: -5,
                band: dec!(0.05),
                expected_ok: false,
            },
            TestCase {
                name: "band at upper bound is accepted",
                tick_size: dec!(1),
                multiplier: 10,
                band: dec!(0.2),
                expected_ok: true,
            },
            TestCase {
                name: "band above upper bound",
                tick_size: dec!(1),
                multiplier: 10,
                band: dec!(0.21),
                expected_ok: false,
            },
            TestCase {
                name: "zero band",
                tick_size: dec!(1),
                multiplier: 10,
                band: dec!(0),
                expected_ok: false,
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let actual = spec(test.tick_size, test.multiplier, test.band);
            assert_eq!(
                actual.is_ok(),
                test.expected_ok,
                "TC{index} ({}) failed: {actual:?}",
                test.name
            );
        }
    }

    #[test]
    fn test_notional() {
        let instrument = spec(dec!(1), 10, dec!(0.05)).unwrap();
        assert_eq!(instrument.notional(10, dec!(3500)), dec!(350000));
    }

    #[test]
    fn test_days_to_expiry() {
        let instrument = spec(dec!(1), 10, dec!(0.05)).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        assert_eq!(instrument.days_to_expiry(today), 5);
    }
}
