use crate::protection::{Gate, GateContext, GateOutcome};
use chrono::{DateTime, TimeDelta, Utc};
use qilin_execution::order::request::OrderIntent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum orders within any sliding 60-second window.
    pub max_per_minute: usize,
    /// Minimum spacing between consecutive orders, in seconds.
    pub min_interval_secs: i64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 120,
            min_interval_secs: 0,
        }
    }
}

fn window() -> TimeDelta {
    TimeDelta::seconds(60)
}

/// Sliding-window order rate limiter.
///
/// Rejections carry the wait time in milliseconds until the next order would be admitted.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    config: ThrottleConfig,
    sent: VecDeque<DateTime<Utc>>,
}

impl ThrottleGate {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            sent: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(oldest) = self.sent.front() {
            if now - *oldest > window() {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Gate for ThrottleGate {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn check(&mut self, _intent: &OrderIntent, ctx: &GateContext<'_>) -> GateOutcome {
        self.prune(ctx.now);

        if self.sent.len() >= self.config.max_per_minute {
            let oldest = *self.sent.front().expect("non-empty window");
            let wait_ms = (oldest + window() - ctx.now).num_milliseconds().max(0);
            return GateOutcome::reject(format!("RATE_EXCEEDED: wait_time_ms={wait_ms}"));
        }

        if self.config.min_interval_secs > 0
            && let Some(last) = self.sent.back()
        {
            let elapsed = ctx.now - *last;
            let min_interval = TimeDelta::seconds(self.config.min_interval_secs);
            if elapsed < min_interval {
                let wait_ms = (min_interval - elapsed).num_milliseconds().max(0);
                return GateOutcome::reject(format!("MIN_INTERVAL: wait_time_ms={wait_ms}"));
            }
        }

        GateOutcome::pass()
    }

    fn on_accepted(&mut self, _intent: &OrderIntent, ctx: &GateContext<'_>) {
        self.sent.push_back(ctx.now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::test_utils;
    use qilin_instrument::{Offset, Side, symbol::Symbol, test_utils as instrument_utils};
    use rust_decimal_macros::dec;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(secs)
    }

    fn intent() -> OrderIntent {
        OrderIntent::new(Symbol::new("rb2501"), Side::Buy, Offset::Open, 1, dec!(3500))
    }

    fn run(gate: &mut ThrottleGate, now: DateTime<Utc>) -> GateOutcome {
        let instrument = instrument_utils::instrument("rb2501", dec!(1), 10);
        let quote = test_utils::quote();
        let margin = test_utils::margin_monitor();
        let ctx = GateContext {
            now,
            instrument: &instrument,
            quote: Some(&quote),
            margin: &margin,
        };
        let intent = intent();
        let outcome = gate.check(&intent, &ctx);
        if outcome.is_pass() {
            gate.on_accepted(&intent, &ctx);
        }
        outcome
    }

    #[test]
    fn test_rate_limit_with_wait_time() {
        let mut gate = ThrottleGate::new(ThrottleConfig {
            max_per_minute: 3,
            min_interval_secs: 0,
        });

        assert!(run(&mut gate, at(0)).is_pass());
        assert!(run(&mut gate, at(1)).is_pass());
        assert!(run(&mut gate, at(2)).is_pass());

        let outcome = run(&mut gate, at(3));
        assert!(matches!(
            outcome,
            GateOutcome::Reject { reason } if reason.as_str() == "RATE_EXCEEDED: wait_time_ms=57000"
        ));

        // Window slides: the first order ages out after 60s
        assert!(run(&mut gate, at(61)).is_pass());
    }

    #[test]
    fn test_min_interval() {
        let mut gate = ThrottleGate::new(ThrottleConfig {
            max_per_minute: 100,
            min_interval_secs: 2,
        });

        assert!(run(&mut gate, at(0)).is_pass());
        assert!(matches!(
            run(&mut gate, at(1)),
            GateOutcome::Reject { reason } if reason.starts_with("MIN_INTERVAL")
        ));
        assert!(run(&mut gate, at(2)).is_pass());
    }
}
