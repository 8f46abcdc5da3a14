use crate::protection::{Gate, GateContext, GateOutcome};
use qilin_execution::order::request::OrderIntent;
use qilin_instrument::instrument::Instrument;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LimitPriceConfig {
    /// Also reject orders priced exactly at the band (queueing at the limit is often a sign of
    /// a runaway signal).
    pub reject_at_band: bool,
}

/// Daily price band computed from the prior settlement price.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
pub struct PriceBand {
    pub up: Decimal,
    pub down: Decimal,
}

impl PriceBand {
    /// Band for one instrument:
    /// `up = floor(settle*(1+pct)/tick)*tick`, `down = ceil(settle*(1-pct)/tick)*tick`.
    pub fn for_instrument(instrument: &Instrument, settle: Decimal) -> Self {
        let tick = instrument.tick_size;
        let pct = instrument.price_band_pct;

        let up = (settle * (Decimal::ONE + pct) / tick).floor() * tick;
        let down = (settle * (Decimal::ONE - pct) / tick).ceil() * tick;

        Self { up, down }
    }

    pub fn contains(&self, price: Decimal) -> bool {
        self.down <= price && price <= self.up
    }
}

/// Rejects orders priced outside (or, if configured, exactly at) the daily price band.
#[derive(Debug, Clone)]
pub struct LimitPriceGate {
    config: LimitPriceConfig,
}

impl LimitPriceGate {
    pub fn new(config: LimitPriceConfig) -> Self {
        Self { config }
    }
}

impl Gate for LimitPriceGate {
    fn name(&self) -> &'static str {
        "limit_price"
    }

    fn check(&mut self, intent: &OrderIntent, ctx: &GateContext<'_>) -> GateOutcome {
        let Some(quote) = ctx.quote else {
            return GateOutcome::reject("NO_SETTLE");
        };

        let band = PriceBand::for_instrument(ctx.instrument, quote.settle);

        if intent.price > band.up {
            return GateOutcome::reject(format!(
                "BEYOND_UP_LIMIT: {} > {}",
                intent.price, band.up
            ));
        }
        if intent.price < band.down {
            return GateOutcome::reject(format!(
                "BEYOND_DOWN_LIMIT: {} < {}",
                intent.price, band.down
            ));
        }
        if self.config.reject_at_band && (intent.price == band.up || intent.price == band.down) {
            return GateOutcome::reject(format!("AT_BAND_LIMIT: {}", intent.price));
        }

        GateOutcome::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::test_utils;
    use chrono::{DateTime, Utc};
    use qilin_instrument::{Offset, Side, symbol::Symbol, test_utils as instrument_utils};
    use rust_decimal_macros::dec;

    #[test]
    fn test_band_from_settle() {
        // settle 3450, pct 0.05, tick 1 => up floor(3622.5)=3622, down ceil(3277.5)=3278
        let instrument = instrument_utils::instrument("rb2501", dec!(1), 10);
        let band = PriceBand::for_instrument(&instrument, dec!(3450));
        assert_eq!(band.up, dec!(3622));
        assert_eq!(band.down, dec!(3278));
    }

    #[test]
    fn test_band_respects_tick_size() {
        // tick 0.2: up = floor(3622.5/0.2)*0.2 = floor(18112.5)*0.2 = 3622.4
        let instrument = instrument_utils::instrument("IF2501", dec!(0.2), 300);
        let band = PriceBand::for_instrument(&instrument, dec!(3450));
        assert_eq!(band.up, dec!(3622.4));
        assert_eq!(band.down, dec!(3278.0));
    }

    fn check(price: Decimal, reject_at_band: bool) -> GateOutcome {
        let instrument = instrument_utils::instrument("rb2501", dec!(1), 10);
        let quote = test_utils::quote(); // settle 3450
        let margin = test_utils::margin_monitor();
        let ctx = GateContext {
            now: DateTime::<Utc>::MIN_UTC,
            instrument: &instrument,
            quote: Some(&quote),
            margin: &margin,
        };
        let intent = OrderIntent::new(Symbol::new("rb2501"), Side::Buy, Offset::Open, 1, price);

        LimitPriceGate::new(LimitPriceConfig { reject_at_band }).check(&intent, &ctx)
    }

    #[test]
    fn test_inside_band_passes() {
        assert!(check(dec!(3500), false).is_pass());
        assert!(check(dec!(3278), false).is_pass());
        assert!(check(dec!(3622), false).is_pass());
    }

    #[test]
    fn test_beyond_band_rejected() {
        assert!(matches!(
            check(dec!(3700), false),
            GateOutcome::Reject { reason } if reason.starts_with("BEYOND_UP_LIMIT")
        ));
        assert!(matches!(
            check(dec!(3000), false),
            GateOutcome::Reject { reason } if reason.starts_with("BEYOND_DOWN_LIMIT")
        ));
    }

    #[test]
    fn test_exact_band_configurable() {
        assert!(matches!(
            check(dec!(3622), true),
            GateOutcome::Reject { reason } if reason.starts_with("AT_BAND_LIMIT")
        ));
        assert!(check(dec!(3621), true).is_pass());
    }
}
