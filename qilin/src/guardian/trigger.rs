use crate::margin::MarginLevel;
use chrono::{DateTime, TimeDelta, Utc};
use qilin_execution::order::id::LocalOrderId;
use qilin_instrument::symbol::Symbol;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Symbolic guardian event, the alphabet of the mode transition table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    InitSuccess,
    InitFailed,
    QuoteStale,
    OrderStuck,
    PositionDrift,
    LegImbalance,
    MarginWarning,
    MarginCritical,
    LimitConsecutive,
    DeliveryNear,
    DeliveryCritical,
    ManualHalt,
    ComplianceExceeded,
    RecoverOk,
    ManualTakeover,
    ManualRelease,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::InitSuccess => "init_success",
            TriggerEvent::InitFailed => "init_failed",
            TriggerEvent::QuoteStale => "quote_stale",
            TriggerEvent::OrderStuck => "order_stuck",
            TriggerEvent::PositionDrift => "position_drift",
            TriggerEvent::LegImbalance => "leg_imbalance",
            TriggerEvent::MarginWarning => "margin_warning",
            TriggerEvent::MarginCritical => "margin_critical",
            TriggerEvent::LimitConsecutive => "limit_consecutive",
            TriggerEvent::DeliveryNear => "delivery_near",
            TriggerEvent::DeliveryCritical => "delivery_critical",
            TriggerEvent::ManualHalt => "manual_halt",
            TriggerEvent::ComplianceExceeded => "compliance_exceeded",
            TriggerEvent::RecoverOk => "recover_ok",
            TriggerEvent::ManualTakeover => "manual_takeover",
            TriggerEvent::ManualRelease => "manual_release",
        }
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An active order as seen by the stuck-order trigger.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ActiveOrderInfo {
    pub local_id: LocalOrderId,
    pub last_update: DateTime<Utc>,
}

/// Delivery proximity of one held contract.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct DeliveryInfo {
    pub symbol: Symbol,
    pub days_to_delivery: i64,
    pub net_qty: i64,
}

/// Pure data snapshot assembled by the orchestrator each tick and consumed by every trigger.
///
/// Triggers never reach into live state, keeping evaluation pure and replayable.
#[derive(Debug, Clone, Default)]
pub struct GuardianSnapshot {
    pub now: DateTime<Utc>,
    /// Last quote timestamp per symbol.
    pub quote_times: BTreeMap<Symbol, DateTime<Utc>>,
    pub active_orders: Vec<ActiveOrderInfo>,
    /// `(symbol, local_net, broker_net)` from the latest reconciliation.
    pub position_drift: Vec<(Symbol, i64, i64)>,
    /// `pair_id -> near.filled - far.filled`.
    pub pair_imbalances: BTreeMap<SmolStr, i64>,
    pub margin_level: MarginLevel,
    /// Consecutive observations of an order book pinned at the daily band, per symbol.
    pub limit_streaks: BTreeMap<Symbol, u32>,
    pub delivery: Vec<DeliveryInfo>,
}

/// One trigger firing: the table event plus operator-readable detail.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct TriggerFiring {
    pub event: TriggerEvent,
    pub details: SmolStr,
}

impl TriggerFiring {
    fn new(event: TriggerEvent, details: impl AsRef<str>) -> Self {
        Self {
            event,
            details: SmolStr::new(details),
        }
    }
}

/// One pluggable guardian trigger. Evaluation is pure: same snapshot, same answer.
pub trait Trigger {
    fn name(&self) -> &'static str;

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring>;
}

/// Fires `quote_stale` when a watched symbol has no quote or its quote is older than the
/// hard-stale threshold.
#[derive(Debug, Clone)]
pub struct QuoteStaleTrigger {
    pub hard_stale_ms: i64,
    pub watched_symbols: Vec<Symbol>,
}

impl Trigger for QuoteStaleTrigger {
    fn name(&self) -> &'static str {
        "quote_stale"
    }

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring> {
        for symbol in &self.watched_symbols {
            match state.quote_times.get(symbol) {
                None => {
                    return Some(TriggerFiring::new(
                        TriggerEvent::QuoteStale,
                        format!("{symbol}: no quote observed"),
                    ));
                }
                Some(ts) => {
                    let age_ms = (state.now - *ts).num_milliseconds();
                    if age_ms > self.hard_stale_ms {
                        return Some(TriggerFiring::new(
                            TriggerEvent::QuoteStale,
                            format!("{symbol}: quote stale for {age_ms}ms"),
                        ));
                    }
                }
            }
        }
        None
    }
}

/// Fires `order_stuck` when any active order has not progressed within the timeout.
#[derive(Debug, Clone)]
pub struct OrderStuckTrigger {
    pub stuck_timeout_secs: i64,
}

impl Trigger for OrderStuckTrigger {
    fn name(&self) -> &'static str {
        "order_stuck"
    }

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring> {
        let threshold = TimeDelta::seconds(self.stuck_timeout_secs);
        state
            .active_orders
            .iter()
            .find(|order| state.now - order.last_update > threshold)
            .map(|order| {
                TriggerFiring::new(
                    TriggerEvent::OrderStuck,
                    format!("order {} stuck", order.local_id),
                )
            })
    }
}

/// Fires `position_drift` when local and broker net positions diverge beyond tolerance.
#[derive(Debug, Clone)]
pub struct PositionDriftTrigger {
    pub tolerance: i64,
}

impl Trigger for PositionDriftTrigger {
    fn name(&self) -> &'static str {
        "position_drift"
    }

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring> {
        state
            .position_drift
            .iter()
            .find(|(_, local, broker)| (local - broker).abs() > self.tolerance)
            .map(|(symbol, local, broker)| {
                TriggerFiring::new(
                    TriggerEvent::PositionDrift,
                    format!("{symbol}: local {local} vs broker {broker}"),
                )
            })
    }
}

/// Fires `leg_imbalance` when any pair's filled-leg imbalance exceeds the threshold.
#[derive(Debug, Clone)]
pub struct LegImbalanceTrigger {
    pub threshold: i64,
}

impl Trigger for LegImbalanceTrigger {
    fn name(&self) -> &'static str {
        "leg_imbalance"
    }

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring> {
        state
            .pair_imbalances
            .iter()
            .find(|(_, imbalance)| imbalance.abs() > self.threshold)
            .map(|(pair_id, imbalance)| {
                TriggerFiring::new(
                    TriggerEvent::LegImbalance,
                    format!("pair {pair_id}: imbalance {imbalance}"),
                )
            })
    }
}

/// Maps the margin level to `margin_warning` (Warning/Danger) or `margin_critical` (Critical).
#[derive(Debug, Clone, Default)]
pub struct MarginTrigger;

impl Trigger for MarginTrigger {
    fn name(&self) -> &'static str {
        "margin"
    }

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring> {
        match state.margin_level {
            MarginLevel::Safe | MarginLevel::Normal => None,
            MarginLevel::Warning | MarginLevel::Danger => Some(TriggerFiring::new(
                TriggerEvent::MarginWarning,
                format!("margin level {}", state.margin_level),
            )),
            MarginLevel::Critical => Some(TriggerFiring::new(
                TriggerEvent::MarginCritical,
                "margin level critical",
            )),
        }
    }
}

/// Fires `limit_consecutive` after N consecutive observations at the daily price band.
#[derive(Debug, Clone)]
pub struct LimitPriceTrigger {
    pub consecutive_n: u32,
}

impl Trigger for LimitPriceTrigger {
    fn name(&self) -> &'static str {
        "limit_price"
    }

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring> {
        state
            .limit_streaks
            .iter()
            .find(|(_, streak)| **streak >= self.consecutive_n)
            .map(|(symbol, streak)| {
                TriggerFiring::new(
                    TriggerEvent::LimitConsecutive,
                    format!("{symbol}: {streak} consecutive limit observations"),
                )
            })
    }
}

/// Fires `delivery_near` / `delivery_critical` as held contracts approach delivery.
#[derive(Debug, Clone)]
pub struct DeliveryApproachingTrigger {
    pub reduce_days: i64,
    pub halt_days: i64,
}

impl Trigger for DeliveryApproachingTrigger {
    fn name(&self) -> &'static str {
        "delivery"
    }

    fn evaluate(&self, state: &GuardianSnapshot) -> Option<TriggerFiring> {
        let held = state
            .delivery
            .iter()
            .filter(|info| info.net_qty != 0)
            .collect::<Vec<_>>();

        if let Some(info) = held
            .iter()
            .find(|info| info.days_to_delivery <= self.halt_days)
        {
            return Some(TriggerFiring::new(
                TriggerEvent::DeliveryCritical,
                format!("{}: {} days to delivery", info.symbol, info.days_to_delivery),
            ));
        }

        held.iter()
            .find(|info| info.days_to_delivery <= self.reduce_days)
            .map(|info| {
                TriggerFiring::new(
                    TriggerEvent::DeliveryNear,
                    format!("{}: {} days to delivery", info.symbol, info.days_to_delivery),
                )
            })
    }
}

/// Trigger configuration; one registry setting per knob (the consecutive-limit N in
/// particular is a single setting, default 2).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardianTriggerConfig {
    pub quote_stale_ms: i64,
    pub watched_symbols: Vec<Symbol>,
    pub order_stuck_secs: i64,
    pub drift_tolerance: i64,
    pub imbalance_threshold: i64,
    pub limit_consecutive_n: u32,
    pub delivery_reduce_days: i64,
    pub delivery_halt_days: i64,
}

impl Default for GuardianTriggerConfig {
    fn default() -> Self {
        Self {
            quote_stale_ms: 5000,
            watched_symbols: Vec::new(),
            order_stuck_secs: 60,
            drift_tolerance: 0,
            imbalance_threshold: 2,
            limit_consecutive_n: 2,
            delivery_reduce_days: 5,
            delivery_halt_days: 1,
        }
    }
}

/// Ordered list of triggers; evaluation order is configuration-defined and stable.
pub struct TriggerRegistry {
    triggers: Vec<Box<dyn Trigger>>,
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field(
                "triggers",
                &self
                    .triggers
                    .iter()
                    .map(|trigger| trigger.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TriggerRegistry {
    pub fn new(triggers: Vec<Box<dyn Trigger>>) -> Self {
        Self { triggers }
    }

    /// The standard trigger stack in its standard order.
    pub fn standard(config: &GuardianTriggerConfig) -> Self {
        Self::new(vec![
            Box::new(QuoteStaleTrigger {
                hard_stale_ms: config.quote_stale_ms,
                watched_symbols: config.watched_symbols.clone(),
            }),
            Box::new(OrderStuckTrigger {
                stuck_timeout_secs: config.order_stuck_secs,
            }),
            Box::new(PositionDriftTrigger {
                tolerance: config.drift_tolerance,
            }),
            Box::new(LegImbalanceTrigger {
                threshold: config.imbalance_threshold,
            }),
            Box::new(MarginTrigger),
            Box::new(LimitPriceTrigger {
                consecutive_n: config.limit_consecutive_n,
            }),
            Box::new(DeliveryApproachingTrigger {
                reduce_days: config.delivery_reduce_days,
                halt_days: config.delivery_halt_days,
            }),
        ])
    }

    /// Evaluate every trigger in order, collecting firings.
    pub fn evaluate(&self, state: &GuardianSnapshot) -> Vec<TriggerFiring> {
        self.triggers
            .iter()
            .filter_map(|trigger| trigger.evaluate(state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(secs)
    }

    fn snapshot(now: DateTime<Utc>) -> GuardianSnapshot {
        GuardianSnapshot {
            now,
            margin_level: MarginLevel::Safe,
            ..GuardianSnapshot::default()
        }
    }

    #[test]
    fn test_quote_stale_on_absent_and_old_quotes() {
        let trigger = QuoteStaleTrigger {
            hard_stale_ms: 1000,
            watched_symbols: vec![Symbol::new("rb2501")],
        };

        // Absent quote fires
        let state = snapshot(at(10));
        assert_eq!(
            trigger.evaluate(&state).unwrap().event,
            TriggerEvent::QuoteStale
        );

        // Fresh quote is quiet
        let mut state = snapshot(at(10));
        state.quote_times.insert(Symbol::new("rb2501"), at(10));
        assert!(trigger.evaluate(&state).is_none());

        // Old quote fires
        let mut state = snapshot(at(12));
        state.quote_times.insert(Symbol::new("rb2501"), at(10));
        assert!(trigger.evaluate(&state).is_some());
    }

    #[test]
    fn test_order_stuck() {
        let trigger = OrderStuckTrigger {
            stuck_timeout_secs: 30,
        };

        let mut state = snapshot(at(100));
        state.active_orders.push(ActiveOrderInfo {
            local_id: LocalOrderId::random(),
            last_update: at(80),
        });
        assert!(trigger.evaluate(&state).is_none());

        state.active_orders.push(ActiveOrderInfo {
            local_id: LocalOrderId::random(),
            last_update: at(60),
        });
        assert_eq!(
            trigger.evaluate(&state).unwrap().event,
            TriggerEvent::OrderStuck
        );
    }

    #[test]
    fn test_position_drift_tolerance() {
        let trigger = PositionDriftTrigger { tolerance: 1 };

        let mut state = snapshot(at(0));
        state
            .position_drift
            .push((Symbol::new("rb2501"), 10, 9));
        assert!(trigger.evaluate(&state).is_none());

        state
            .position_drift
            .push((Symbol::new("IF2501"), 5, 1));
        assert_eq!(
            trigger.evaluate(&state).unwrap().event,
            TriggerEvent::PositionDrift
        );
    }

    #[test]
    fn test_margin_trigger_levels() {
        struct TestCase {
            level: MarginLevel,
            expected: Option<TriggerEvent>,
        }

        let cases = vec![
            TestCase {
                level: MarginLevel::Safe,
                expected: None,
            },
            TestCase {
                level: MarginLevel::Normal,
                expected: None,
            },
            TestCase {
                level: MarginLevel::Warning,
                expected: Some(TriggerEvent::MarginWarning),
            },
            TestCase {
                level: MarginLevel::Danger,
                expected: Some(TriggerEvent::MarginWarning),
            },
            TestCase {
                level: MarginLevel::Critical,
                expected: Some(TriggerEvent::MarginCritical),
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let mut state = snapshot(at(0));
            state.margin_level = test.level;
            assert_eq!(
                MarginTrigger.evaluate(&state).map(|firing| firing.event),
                test.expected,
                "TC{index} failed for level {}",
                test.level
            );
        }
    }

    #[test]
    fn test_limit_consecutive_default_two() {
        let config = GuardianTriggerConfig::default();
        assert_eq!(config.limit_consecutive_n, 2);

        let trigger = LimitPriceTrigger {
            consecutive_n: config.limit_consecutive_n,
        };

        let mut state = snapshot(at(0));
        state.limit_streaks.insert(Symbol::new("rb2501"), 1);
        assert!(trigger.evaluate(&state).is_none());

        state.limit_streaks.insert(Symbol::new("rb2501"), 2);
        assert_eq!(
            trigger.evaluate(&state).unwrap().event,
            TriggerEvent::LimitConsecutive
        );
    }

    #[test]
    fn test_delivery_critical_preferred_over_near() {
        let trigger = DeliveryApproachingTrigger {
            reduce_days: 5,
            halt_days: 1,
        };

        let mut state = snapshot(at(0));
        state.delivery.push(DeliveryInfo {
            symbol: Symbol::new("rb2501"),
            days_to_delivery: 4,
            net_qty: 3,
        });
        assert_eq!(
            trigger.evaluate(&state).unwrap().event,
            TriggerEvent::DeliveryNear
        );

        state.delivery.push(DeliveryInfo {
            symbol: Symbol::new("m2505"),
            days_to_delivery: 1,
            net_qty: -2,
        });
        assert_eq!(
            trigger.evaluate(&state).unwrap().event,
            TriggerEvent::DeliveryCritical
        );

        // Flat positions never fire
        let mut state = snapshot(at(0));
        state.delivery.push(DeliveryInfo {
            symbol: Symbol::new("rb2501"),
            days_to_delivery: 0,
            net_qty: 0,
        });
        assert!(trigger.evaluate(&state).is_none());
    }

    #[test]
    fn test_registry_preserves_order() {
        let config = GuardianTriggerConfig {
            watched_symbols: vec![Symbol::new("rb2501")],
            ..GuardianTriggerConfig::default()
        };
        let registry = TriggerRegistry::standard(&config);

        let mut state = snapshot(at(100));
        state.margin_level = MarginLevel::Critical;
        // Both quote_stale (no quote) and margin_critical fire; order is registry order
        let firings = registry.evaluate(&state);
        assert_eq!(firings.len(), 2);
        assert_eq!(firings[0].event, TriggerEvent::QuoteStale);
        assert_eq!(firings[1].event, TriggerEvent::MarginCritical);
    }
}
