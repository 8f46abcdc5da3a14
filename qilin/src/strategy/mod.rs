use crate::{
    audit::replay::feature_hash,
    event::TargetPortfolio,
    market::{MarketSnapshot, PortfolioSnapshot},
};
use qilin_execution::order::id::StrategyId;
use qilin_instrument::symbol::Symbol;
use rust_decimal::Decimal;
use serde_json::Value;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use tracing::debug;

/// One strategy's output for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDecision {
    /// The input feature mapping this decision was computed from; hashed into the audit trail
    /// to prove replay identity.
    pub features: BTreeMap<SmolStr, Decimal>,
    pub target: TargetPortfolio,
    /// Expected edge in money terms per symbol, consumed by the cost-model edge gate. Symbols
    /// without an estimate are not edge-gated.
    pub edges: BTreeMap<Symbol, Decimal>,
}

/// An opaque producer of target portfolios.
///
/// Implementations must be pure functions of their tick inputs (no hidden I/O, no interior
/// clocks) so that replaying the same input tape reproduces the same decisions.
pub trait Strategy {
    fn id(&self) -> StrategyId;

    fn version(&self) -> SmolStr;

    fn on_tick(
        &self,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
    ) -> Option<StrategyDecision>;
}

/// One decision as recorded by the host, feature hash included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRecord {
    pub strategy_id: StrategyId,
    pub strategy_version: SmolStr,
    pub feature_hash: SmolStr,
    pub target: TargetPortfolio,
    pub edges: BTreeMap<Symbol, Decimal>,
}

/// Invokes registered strategies against each market snapshot, in registration order.
pub struct StrategyHost {
    strategies: Vec<Box<dyn Strategy>>,
}

impl std::fmt::Debug for StrategyHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyHost")
            .field(
                "strategies",
                &self
                    .strategies
                    .iter()
                    .map(|strategy| strategy.id())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl StrategyHost {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run every strategy over the snapshot, producing decision records with feature hashes.
    pub fn decide(
        &self,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
    ) -> Vec<DecisionRecord> {
        self.strategies
            .iter()
            .filter_map(|strategy| {
                let decision = strategy.on_tick(market, portfolio)?;

                let features = Value::Object(
                    decision
                        .features
                        .iter()
                        .map(|(name, value)| {
                            (name.to_string(), Value::String(value.to_string()))
                        })
                        .collect(),
                );
                let feature_hash = SmolStr::new(feature_hash(&features));

                debug!(
                    strategy_id = %strategy.id(),
                    %feature_hash,
                    symbols = decision.target.len(),
                    "strategy decision"
                );

                Some(DecisionRecord {
                    strategy_id: strategy.id(),
                    strategy_version: strategy.version(),
                    feature_hash,
                    target: decision.target,
                    edges: decision.edges,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    struct FixedTarget {
        id: &'static str,
        qty: i64,
    }

    impl Strategy for FixedTarget {
        fn id(&self) -> StrategyId {
            StrategyId::new(self.id)
        }

        fn version(&self) -> SmolStr {
            SmolStr::new("1.0.0")
        }

        fn on_tick(
            &self,
            market: &MarketSnapshot,
            _portfolio: &PortfolioSnapshot,
        ) -> Option<StrategyDecision> {
            let quote = market.quote(&Symbol::new("rb2501"))?;
            Some(StrategyDecision {
                features: BTreeMap::from([
                    (SmolStr::new("last"), quote.last),
                    (SmolStr::new("spread"), quote.spread()),
                ]),
                target: BTreeMap::from([(Symbol::new("rb2501"), self.qty)]),
                edges: BTreeMap::from([(Symbol::new("rb2501"), dec!(200))]),
            })
        }
    }

    fn market() -> MarketSnapshot {
        MarketSnapshot::new(
            DateTime::<Utc>::MIN_UTC,
            BTreeMap::from([(
                Symbol::new("rb2501"),
                crate::market::Quote::new(
                    dec!(3499),
                    dec!(3500),
                    120,
                    150,
                    dec!(3500),
                    dec!(3450),
                    10000,
                    DateTime::<Utc>::MIN_UTC,
                ),
            )]),
        )
    }

    fn portfolio() -> PortfolioSnapshot {
        PortfolioSnapshot::new(BTreeMap::new(), dec!(1000000), dec!(100000))
    }

    #[test]
    fn test_decisions_in_registration_order() {
        let host = StrategyHost::new(vec![
            Box::new(FixedTarget { id: "alpha", qty: 5 }),
            Box::new(FixedTarget { id: "beta", qty: -3 }),
        ]);

        let decisions = host.decide(&market(), &portfolio());
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].strategy_id, StrategyId::new("alpha"));
        assert_eq!(decisions[1].strategy_id, StrategyId::new("beta"));
    }

    #[test]
    fn test_feature_hash_deterministic_across_invocations() {
        let host = StrategyHost::new(vec![Box::new(FixedTarget { id: "alpha", qty: 5 })]);

        let first = host.decide(&market(), &portfolio());
        let second = host.decide(&market(), &portfolio());
        assert_eq!(first[0].feature_hash, second[0].feature_hash);
        assert_eq!(first[0].feature_hash.len(), 16);
    }
}
