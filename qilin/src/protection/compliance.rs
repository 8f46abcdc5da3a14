use crate::protection::{Gate, GateContext, GateOutcome};
use chrono::{DateTime, TimeDelta, Utc};
use qilin_execution::order::request::OrderIntent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Maximum report-or-cancel operations within the window.
    pub max_ops: usize,
    /// Regulatory window length, in seconds.
    pub window_secs: i64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            max_ops: 50,
            window_secs: 5,
        }
    }
}

/// Sliding-window counter over order submit and cancel operations.
///
/// Shared between the [`ComplianceGate`] (which blocks submits) and the orchestrator (which
/// records cancels into the same window - emergency cancels are counted but never blocked).
#[derive(Debug)]
pub struct ComplianceThrottle {
    config: ComplianceConfig,
    ops: VecDeque<DateTime<Utc>>,
}

/// Handle shared by the gate and the orchestrator; the core is single-threaded, the mutex only
/// satisfies ownership.
pub type SharedComplianceThrottle = Arc<parking_lot::Mutex<ComplianceThrottle>>;

impl ComplianceThrottle {
    pub fn new(config: ComplianceConfig) -> Self {
        Self {
            config,
            ops: VecDeque::new(),
        }
    }

    pub fn shared(config: ComplianceConfig) -> SharedComplianceThrottle {
        Arc::new(parking_lot::Mutex::new(Self::new(config)))
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = TimeDelta::seconds(self.config.window_secs);
        while let Some(oldest) = self.ops.front() {
            if now - *oldest > window {
                self.ops.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record one report-or-cancel operation.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.prune(now);
        self.ops.push_back(now);
    }

    /// True if admitting one more operation would exceed the cap.
    pub fn would_exceed(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        self.ops.len() + 1 > self.config.max_ops
    }

    /// Window utilisation in [0, 1+] after pruning.
    pub fn utilisation(&mut self, now: DateTime<Utc>) -> Decimal {
        self.prune(now);
        Decimal::from(self.ops.len()) / Decimal::from(self.config.max_ops.max(1))
    }

    pub fn ops_in_window(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.ops.len()
    }
}

/// Regulatory report-cancel frequency gate.
///
/// Rejects a submit that would exceed the cap; logs WARNING at 60% utilisation and CRITICAL at
/// 90%.
#[derive(Debug)]
pub struct ComplianceGate {
    throttle: SharedComplianceThrottle,
}

impl ComplianceGate {
    pub fn new(throttle: SharedComplianceThrottle) -> Self {
        Self { throttle }
    }
}

impl Gate for ComplianceGate {
    fn name(&self) -> &'static str {
        "compliance"
    }

    fn check(&mut self, _intent: &OrderIntent, ctx: &GateContext<'_>) -> GateOutcome {
        let mut throttle = self.throttle.lock();

        if throttle.would_exceed(ctx.now) {
            return GateOutcome::reject("EXCEEDED");
        }

        let utilisation = throttle.utilisation(ctx.now);
        if utilisation >= Decimal::new(9, 1) {
            warn!(%utilisation, "compliance window utilisation CRITICAL");
        } else if utilisation >= Decimal::new(6, 1) {
            warn!(%utilisation, "compliance window utilisation WARNING");
        }

        GateOutcome::pass()
    }

    fn on_accepted(&mut self, _intent: &OrderIntent, ctx: &GateContext<'_>) {
        self.throttle.lock().record(ctx.now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::test_utils;
    use qilin_instrument::{Offset, Side, symbol::Symbol, test_utils as instrument_utils};
    use rust_decimal_macros::dec;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC + TimeDelta::milliseconds(ms)
    }

    fn run(gate: &mut ComplianceGate, now: DateTime<Utc>) -> GateOutcome {
        let instrument = instrument_utils::instrument("rb2501", dec!(1), 10);
        let quote = test_utils::quote();
        let margin = test_utils::margin_monitor();
        let ctx = GateContext {
            now,
            instrument: &instrument,
            quote: Some(&quote),
            margin: &margin,
        };
        let intent =
            OrderIntent::new(Symbol::new("rb2501"), Side::Buy, Offset::Open, 1, dec!(3500));
        let outcome = gate.check(&intent, &ctx);
        if outcome.is_pass() {
            gate.on_accepted(&intent, &ctx);
        }
        outcome
    }

    #[test]
    fn test_fifty_first_op_in_window_rejected() {
        let throttle = ComplianceThrottle::shared(ComplianceConfig::default());
        let mut gate = ComplianceGate::new(throttle);

        // 50 submits inside 4.9 seconds all pass
        for index in 0..50 {
            assert!(
                run(&mut gate, at(index * 98)).is_pass(),
                "op {index} unexpectedly rejected"
            );
        }

        // The 51st within the same 5s window is rejected
        assert_eq!(run(&mut gate, at(4900)), GateOutcome::reject("EXCEEDED"));
    }

    #[test]
    fn test_window_slides() {
        let throttle = ComplianceThrottle::shared(ComplianceConfig {
            max_ops: 2,
            window_secs: 5,
        });
        let mut gate = ComplianceGate::new(throttle);

        assert!(run(&mut gate, at(0)).is_pass());
        assert!(run(&mut gate, at(1000)).is_pass());
        assert!(!run(&mut gate, at(2000)).is_pass());

        // First op leaves the window after 5s
        assert!(run(&mut gate, at(5100)).is_pass());
    }

    #[test]
    fn test_cancels_count_against_the_window() {
        let throttle = ComplianceThrottle::shared(ComplianceConfig {
            max_ops: 3,
            window_secs: 5,
        });
        let mut gate = ComplianceGate::new(throttle.clone());

        // Two cancels recorded by the orchestrator
        throttle.lock().record(at(0));
        throttle.lock().record(at(10));

        assert!(run(&mut gate, at(20)).is_pass());
        assert!(!run(&mut gate, at(30)).is_pass());
    }
}
