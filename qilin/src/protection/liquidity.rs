use crate::protection::{Gate, GateContext, GateOutcome};
use qilin_execution::order::request::OrderIntent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LiquidityConfig {
    /// Maximum bid/ask spread, in ticks.
    pub max_spread_ticks: i64,
    pub min_bid_vol: i64,
    pub min_ask_vol: i64,
    pub min_total_depth: i64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            max_spread_ticks: 3,
            min_bid_vol: 5,
            min_ask_vol: 5,
            min_total_depth: 20,
        }
    }
}

/// Rejects intents when the order book is too thin or too wide to trade against.
#[derive(Debug, Clone)]
pub struct LiquidityGate {
    config: LiquidityConfig,
}

impl LiquidityGate {
    pub fn new(config: LiquidityConfig) -> Self {
        Self { config }
    }
}

impl Gate for LiquidityGate {
    fn name(&self) -> &'static str {
        "liquidity"
    }

    fn check(&mut self, _intent: &OrderIntent, ctx: &GateContext<'_>) -> GateOutcome {
        let Some(quote) = ctx.quote else {
            return GateOutcome::reject("NO_QUOTE");
        };

        let spread_ticks = quote.spread() / ctx.instrument.tick_size;
        if spread_ticks > Decimal::from(self.config.max_spread_ticks) {
            return GateOutcome::reject(format!(
                "SPREAD_TOO_WIDE: {spread_ticks} ticks > {}",
                self.config.max_spread_ticks
            ));
        }

        if quote.bid_vol < self.config.min_bid_vol {
            return GateOutcome::reject(format!(
                "INSUFFICIENT_BID_VOL: {} < {}",
                quote.bid_vol, self.config.min_bid_vol
            ));
        }

        if quote.ask_vol < self.config.min_ask_vol {
            return GateOutcome::reject(format!(
                "INSUFFICIENT_ASK_VOL: {} < {}",
                quote.ask_vol, self.config.min_ask_vol
            ));
        }

        if quote.total_depth() < self.config.min_total_depth {
            return GateOutcome::reject(format!(
                "INSUFFICIENT_DEPTH: {} < {}",
                quote.total_depth(),
                self.config.min_total_depth
            ));
        }

        GateOutcome::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{market::Quote, protection::test_utils};
    use chrono::{DateTime, Utc};
    use qilin_instrument::{Offset, Side, symbol::Symbol, test_utils as instrument_utils};
    use rust_decimal_macros::dec;

    fn check(quote: Option<&Quote>) -> GateOutcome {
        let instrument = instrument_utils::instrument("rb2501", dec!(1), 10);
        let margin = test_utils::margin_monitor();
        let ctx = GateContext {
            now: DateTime::<Utc>::MIN_UTC,
            instrument: &instrument,
            quote,
            margin: &margin,
        };
        let intent =
            OrderIntent::new(Symbol::new("rb2501"), Side::Buy, Offset::Open, 10, dec!(3500));

        LiquidityGate::new(LiquidityConfig::default()).check(&intent, &ctx)
    }

    #[test]
    fn test_no_quote_rejected() {
        assert_eq!(check(None), GateOutcome::reject("NO_QUOTE"));
    }

    #[test]
    fn test_healthy_book_passes() {
        assert!(check(Some(&test_utils::quote())).is_pass());
    }

    #[test]
    fn test_wide_spread_rejected() {
        let mut quote = test_utils::quote();
        quote.ask = quote.bid + dec!(5);
        assert!(matches!(
            check(Some(&quote)),
            GateOutcome::Reject { reason } if reason.starts_with("SPREAD_TOO_WIDE")
        ));
    }

    #[test]
    fn test_thin_book_rejected() {
        let mut quote = test_utils::quote();
        quote.bid_vol = 2;
        assert!(matches!(
            check(Some(&quote)),
            GateOutcome::Reject { reason } if reason.starts_with("INSUFFICIENT_BID_VOL")
        ));

        let mut quote = test_utils::quote();
        quote.bid_vol = 9;
        quote.ask_vol = 9;
        assert!(matches!(
            check(Some(&quote)),
            GateOutcome::Reject { reason } if reason.starts_with("INSUFFICIENT_DEPTH")
        ));
    }
}
