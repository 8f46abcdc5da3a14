use crate::protection::{Gate, GateContext, GateOutcome};
use qilin_execution::order::request::OrderIntent;

/// Delegates opening intents to [`MarginMonitor::can_open_position`](crate::margin::MarginMonitor::can_open_position).
///
/// Closing intents release margin and always pass.
#[derive(Debug, Clone, Default)]
pub struct MarginGate;

impl MarginGate {
    pub fn new() -> Self {
        Self
    }
}

impl Gate for MarginGate {
    fn name(&self) -> &'static str {
        "margin"
    }

    fn check(&mut self, intent: &OrderIntent, ctx: &GateContext<'_>) -> GateOutcome {
        if !intent.offset.is_open() {
            return GateOutcome::pass();
        }

        let required = intent.notional(ctx.instrument.multiplier)
            * ctx.instrument.margin_rate(intent.side);

        let check = ctx.margin.can_open_position(required);
        if check.allowed {
            GateOutcome::pass()
        } else {
            GateOutcome::reject(format!(
                "MARGIN: {} (projected_level={})",
                check.reason.unwrap_or_default(),
                check.projected_level
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        margin::{MarginConfig, MarginMonitor},
        protection::test_utils,
    };
    use chrono::{DateTime, Utc};
    use qilin_instrument::{Offset, Side, symbol::Symbol, test_utils as instrument_utils};
    use rust_decimal_macros::dec;

    fn check(monitor: &MarginMonitor, offset: Offset, qty: i64) -> GateOutcome {
        let instrument = instrument_utils::instrument("rb2501", dec!(1), 10);
        let quote = test_utils::quote();
        let ctx = GateContext {
            now: DateTime::<Utc>::MIN_UTC,
            instrument: &instrument,
            quote: Some(&quote),
            margin: monitor,
        };
        let intent = OrderIntent::new(Symbol::new("rb2501"), Side::Buy, offset, qty, dec!(3500));

        MarginGate::new().check(&intent, &ctx)
    }

    #[test]
    fn test_open_with_headroom_passes() {
        let mut monitor = MarginMonitor::new(MarginConfig::default());
        monitor.update(dec!(1000000), dec!(100000));
        // 10 lots * 3500 * 10 * 0.10 = 35000 required, plenty available
        assert!(check(&monitor, Offset::Open, 10).is_pass());
    }

    #[test]
    fn test_open_without_headroom_rejected() {
        let mut monitor = MarginMonitor::new(MarginConfig::default());
        monitor.update(dec!(100000), dec!(95000));
        assert!(matches!(
            check(&monitor, Offset::Open, 10),
            GateOutcome::Reject { reason } if reason.starts_with("MARGIN")
        ));
    }

    #[test]
    fn test_close_always_passes() {
        let mut monitor = MarginMonitor::new(MarginConfig::default());
        monitor.update(dec!(100000), dec!(99000));
        assert!(check(&monitor, Offset::Close, 10).is_pass());
        assert!(check(&monitor, Offset::CloseToday, 10).is_pass());
    }
}
