use crate::protection::{Gate, GateContext, GateOutcome};
use qilin_execution::order::request::OrderIntent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FatFingerConfig {
    pub max_qty: i64,
    pub max_notional: Decimal,
    /// Maximum allowed |price/ref_price - 1|.
    pub max_price_deviation: Decimal,
}

impl Default for FatFingerConfig {
    fn default() -> Self {
        Self {
            max_qty: 100,
            max_notional: Decimal::new(5_000_000, 0),
            max_price_deviation: Decimal::new(3, 2),
        }
    }
}

/// Rejects obviously mis-keyed orders: oversized quantity, oversized notional, or a price far
/// from the reference (last traded) price.
#[derive(Debug, Clone)]
pub struct FatFingerGate {
    config: FatFingerConfig,
}

impl FatFingerGate {
    pub fn new(config: FatFingerConfig) -> Self {
        Self { config }
    }
}

impl Gate for FatFingerGate {
    fn name(&self) -> &'static str {
        "fat_finger"
    }

    fn check(&mut self, intent: &OrderIntent, ctx: &GateContext<'_>) -> GateOutcome {
        if intent.qty > self.config.max_qty {
            return GateOutcome::reject(format!(
                "QTY_EXCEEDS_MAX: {} > {}",
                intent.qty, self.config.max_qty
            ));
        }

        let notional = intent.notional(ctx.instrument.multiplier);
        if notional > self.config.max_notional {
            return GateOutcome::reject(format!(
                "NOTIONAL_EXCEEDS_MAX: {notional} > {}",
                self.config.max_notional
            ));
        }

        if let Some(quote) = ctx.quote {
            let ref_price = quote.last;
            if ref_price > Decimal::ZERO {
                let deviation = (intent.price / ref_price - Decimal::ONE).abs();
                if deviation > self.config.max_price_deviation {
                    return GateOutcome::reject(format!(
                        "PRICE_DEVIATION: {deviation} > {}",
                        self.config.max_price_deviation
                    ));
                }
            }
        }

        GateOutcome::pass()
    }
}
