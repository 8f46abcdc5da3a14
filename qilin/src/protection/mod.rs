use crate::{margin::MarginMonitor, market::Quote};
use chrono::{DateTime, Utc};
use qilin_execution::order::request::OrderIntent;
use qilin_instrument::instrument::Instrument;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::debug;

pub mod compliance;
pub mod fat_finger;
pub mod limit_price;
pub mod liquidity;
pub mod margin;
pub mod throttle;

pub use compliance::{ComplianceConfig, ComplianceGate, ComplianceThrottle, SharedComplianceThrottle};
pub use fat_finger::{FatFingerConfig, FatFingerGate};
pub use limit_price::{LimitPriceConfig, LimitPriceGate, PriceBand};
pub use liquidity::{LiquidityConfig, LiquidityGate};
pub use margin::MarginGate;
pub use throttle::{ThrottleConfig, ThrottleGate};

/// Read-only state a gate consults when checking an intent.
#[derive(Debug)]
pub struct GateContext<'a> {
    pub now: DateTime<Utc>,
    pub instrument: &'a Instrument,
    pub quote: Option<&'a Quote>,
    pub margin: &'a MarginMonitor,
}

/// Outcome of one gate check; a value, never a panic.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum GateOutcome {
    Pass { adjusted_price: Option<Decimal> },
    Reject { reason: SmolStr },
}

impl GateOutcome {
    pub fn pass() -> Self {
        Self::Pass {
            adjusted_price: None,
        }
    }

    pub fn reject(reason: impl AsRef<str>) -> Self {
        Self::Reject {
            reason: SmolStr::new(reason),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, GateOutcome::Pass { .. })
    }
}

/// One pre-trade protection gate.
///
/// Stateful gates (throttle, compliance) mutate their windows in [`Self::on_accepted`], which
/// the pipeline invokes only after every gate has passed; `check` itself must not consume
/// budget for an order that a later gate rejects.
pub trait Gate {
    fn name(&self) -> &'static str;

    fn check(&mut self, intent: &OrderIntent, ctx: &GateContext<'_>) -> GateOutcome;

    fn on_accepted(&mut self, _intent: &OrderIntent, _ctx: &GateContext<'_>) {}
}

/// Verdict of the full pipeline for one intent.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum ProtectionVerdict {
    Accepted { price: Decimal },
    Rejected { gate: SmolStr, reason: SmolStr },
}

impl ProtectionVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProtectionVerdict::Accepted { .. })
    }
}

/// Ordered composition of gates; the first failing gate short-circuits.
pub struct ProtectionPipeline {
    gates: Vec<Box<dyn Gate>>,
}

impl std::fmt::Debug for ProtectionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionPipeline")
            .field(
                "gates",
                &self.gates.iter().map(|gate| gate.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Configuration for the standard six-gate pipeline, in pipeline order.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProtectionConfig {
    pub liquidity: LiquidityConfig,
    pub fat_finger: FatFingerConfig,
    pub throttle: ThrottleConfig,
    pub limit_price: LimitPriceConfig,
    pub compliance: ComplianceConfig,
}

impl ProtectionPipeline {
    /// Compose an arbitrary ordered gate list.
    pub fn new(gates: Vec<Box<dyn Gate>>) -> Self {
        Self { gates }
    }

    /// The standard pipeline: liquidity, fat-finger, throttle, limit-price, margin, compliance.
    ///
    /// `compliance` is shared so the orchestrator can record cancel operations into the same
    /// regulatory window.
    pub fn standard(config: &ProtectionConfig, compliance: SharedComplianceThrottle) -> Self {
        Self::new(vec![
            Box::new(LiquidityGate::new(config.liquidity.clone())),
            Box::new(FatFingerGate::new(config.fat_finger.clone())),
            Box::new(ThrottleGate::new(config.throttle.clone())),
            Box::new(LimitPriceGate::new(config.limit_price.clone())),
            Box::new(MarginGate::new()),
            Box::new(ComplianceGate::new(compliance)),
        ])
    }

    /// Run the intent through every gate in order.
    ///
    /// The first reject short-circuits and is returned with the gate name. On acceptance every
    /// gate's `on_accepted` is invoked (stateful windows record the order) and the final price
    /// (possibly adjusted) is returned.
    pub fn check(&mut self, intent: &OrderIntent, ctx: &GateContext<'_>) -> ProtectionVerdict {
        let mut price = intent.price;

        for gate in &mut self.gates {
            match gate.check(intent, ctx) {
                GateOutcome::Pass { adjusted_price } => {
                    if let Some(adjusted) = adjusted_price {
                        debug!(
                            gate = gate.name(),
                            %adjusted,
                            "gate adjusted intent price"
                        );
                        price = adjusted;
                    }
                }
                GateOutcome::Reject { reason } => {
                    return ProtectionVerdict::Rejected {
                        gate: SmolStr::new(gate.name()),
                        reason,
                    };
                }
            }
        }

        for gate in &mut self.gates {
            gate.on_accepted(intent, ctx);
        }

        ProtectionVerdict::Accepted { price }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::margin::{MarginConfig, MarginMonitor};
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    pub fn quote() -> Quote {
        Quote::new(
            dec!(3499),
            dec!(3500),
            120,
            150,
            dec!(3500),
            dec!(3450),
            10000,
            DateTime::<Utc>::MIN_UTC,
        )
    }

    pub fn margin_monitor() -> MarginMonitor {
        let mut monitor = MarginMonitor::new(MarginConfig::default());
        monitor.update(dec!(1000000), dec!(100000));
        monitor
    }
}
