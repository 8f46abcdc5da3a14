use qilin_instrument::instrument::{FeeKind, Instrument};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

/// Base slippage assumption, in ticks, before depth scaling.
const SLIPPAGE_BASE_TICKS: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Impact coefficient for the square-root market impact term.
const IMPACT_COEFFICIENT: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Estimated execution cost of one order, in money terms.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
pub struct CostBreakdown {
    pub fee: Decimal,
    pub slippage: Decimal,
    pub impact: Decimal,
}

impl CostBreakdown {
    pub fn total(&self) -> Decimal {
        self.fee + self.slippage + self.impact
    }
}

/// Fee/slippage/impact estimation and the edge gate.
///
/// All estimates are per-instrument and stateless; the instrument supplies the tick size,
/// multiplier and fee schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostModel;

impl CostModel {
    /// Exchange fee for `qty` lots at `price`.
    ///
    /// `Rate` instruments pay `fee_value * notional`; `PerLot` instruments pay
    /// `fee_value * qty`. Closing a same-day position multiplies by the instrument's
    /// `close_today_fee_multiplier`.
    pub fn fee_estimate(
        &self,
        instrument: &Instrument,
        qty: i64,
        price: Decimal,
        is_close_today: bool,
    ) -> Decimal {
        let base = match instrument.fee_kind {
            FeeKind::Rate => instrument.fee_value * instrument.notional(qty, price),
            FeeKind::PerLot => instrument.fee_value * Decimal::from(qty),
        };

        if is_close_today {
            base * instrument.close_today_fee_multiplier
        } else {
            base
        }
    }

    /// Depth-scaled slippage estimate:
    /// `SLIPPAGE_BASE_TICKS * (1 + qty/max(depth, 1)) * tick * multiplier * qty`.
    pub fn slippage_estimate(&self, instrument: &Instrument, qty: i64, depth: i64) -> Decimal {
        let depth = Decimal::from(depth.max(1));
        let qty = Decimal::from(qty.max(0));

        SLIPPAGE_BASE_TICKS
            * (Decimal::ONE + qty / depth)
            * instrument.tick_size
            * instrument.multiplier_decimal()
            * qty
    }

    /// Square-root market impact estimate:
    /// `0.1 * sqrt(max(qty, 0)/max(adv, 1)) * tick * multiplier * qty`.
    pub fn impact_estimate(&self, instrument: &Instrument, qty: i64, adv: i64) -> Decimal {
        let participation = Decimal::from(qty.max(0)) / Decimal::from(adv.max(1));
        let root = participation.sqrt().unwrap_or(Decimal::ZERO);

        IMPACT_COEFFICIENT
            * root
            * instrument.tick_size
            * instrument.multiplier_decimal()
            * Decimal::from(qty.max(0))
    }

    /// Full cost estimate for an order.
    pub fn estimate(
        &self,
        instrument: &Instrument,
        qty: i64,
        price: Decimal,
        depth: i64,
        adv: i64,
        is_close_today: bool,
    ) -> CostBreakdown {
        CostBreakdown {
            fee: self.fee_estimate(instrument, qty, price, is_close_today),
            slippage: self.slippage_estimate(instrument, qty, depth),
            impact: self.impact_estimate(instrument, qty, adv),
        }
    }

    /// Strict edge gate: the signal's expected edge must exceed total cost.
    pub fn edge_gate(&self, signal_edge: Decimal, total_cost: Decimal) -> bool {
        signal_edge > total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qilin_instrument::{
        exchange::ExchangeId,
        instrument::Instrument,
        symbol::Symbol,
        test_utils,
    };
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal_macros::dec;

    fn rb2501() -> Instrument {
        // tick 1, multiplier 10, fee rate 0.0001
        test_utils::instrument("rb2501", dec!(1), 10)
    }

    fn per_lot_instrument() -> Instrument {
        Instrument::new(
            Symbol::new("m2505"),
            ExchangeId::Dce,
            dec!(1),
            10,
            dec!(0.10),
            dec!(0.10),
            dec!(2),
            dec!(0.05),
            FeeKind::PerLot,
            dec!(1.5),
            true,
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 15).unwrap(),
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_fee_estimate_rate() {
        let model = CostModel;
        // 10 lots at 3500, multiplier 10 => notional 350000, rate 0.0001 => 35
        assert_eq!(
            model.fee_estimate(&rb2501(), 10, dec!(3500), false),
            dec!(35.0000)
        );
    }

    #[test]
    fn test_fee_estimate_per_lot_with_close_today() {
        let model = CostModel;
        assert_eq!(
            model.fee_estimate(&per_lot_instrument(), 10, dec!(3000), false),
            dec!(15.0)
        );
        // close_today multiplier 2
        assert_eq!(
            model.fee_estimate(&per_lot_instrument(), 10, dec!(3000), true),
            dec!(30.0)
        );
    }

    #[test]
    fn test_slippage_estimate() {
        let model = CostModel;
        // 0.5 * (1 + 10/200) * 1 * 10 * 10 = 52.5
        assert_eq!(
            model.slippage_estimate(&rb2501(), 10, 200),
            dec!(52.50)
        );
    }

    #[test]
    fn test_impact_estimate() {
        let model = CostModel;
        // 0.1 * sqrt(10/10000) * 1 * 10 * 10 ~= 0.3162
        let impact = model.impact_estimate(&rb2501(), 10, 10000);
        assert_eq!(impact.round_dp(4), dec!(0.3162));
    }

    #[test]
    fn test_zero_depth_and_adv_clamped() {
        let model = CostModel;
        // depth clamps to 1: 0.5 * (1 + 10/1) * 1 * 10 * 10 = 550
        assert_eq!(model.slippage_estimate(&rb2501(), 10, 0), dec!(550.0));
        // adv clamps to 1: sqrt(10/1)
        let impact = model.impact_estimate(&rb2501(), 10, 0);
        assert_eq!(impact.round_dp(2), dec!(31.62));
    }

    #[test]
    fn test_edge_gate_is_strict() {
        let model = CostModel;
        assert!(model.edge_gate(dec!(200), dec!(88.5)));
        assert!(!model.edge_gate(dec!(88.5), dec!(88.5)));
        assert!(!model.edge_gate(dec!(10), dec!(88.5)));
    }

    #[test]
    fn test_happy_order_total_cost_below_edge() {
        let model = CostModel;
        let breakdown = model.estimate(&rb2501(), 10, dec!(3500), 200, 10000, false);

        assert_eq!(breakdown.fee, dec!(35.0000));
        assert_eq!(breakdown.slippage, dec!(52.50));
        assert!(breakdown.total() < dec!(88.5));
        assert!(model.edge_gate(dec!(200), breakdown.total()));
    }
}
