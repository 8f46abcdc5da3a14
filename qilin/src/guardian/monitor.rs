use crate::guardian::{
    GuardianFsm, GuardianMode, ModeTransition,
    trigger::{GuardianSnapshot, TriggerFiring, TriggerRegistry},
};
use qilin_execution::order::id::LocalOrderId;
use qilin_instrument::symbol::Symbol;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{info, warn};

/// Action capability the monitor invokes on mode changes.
///
/// The order layer implements this; passing it into [`GuardianMonitor::on_tick`] breaks the
/// guardian -> orders -> events -> guardian cycle - orders never hold a back-reference to the
/// guardian.
pub trait GuardianActionHandler {
    /// Cancel every active order. Returns `(local_id, accepted)` per order.
    fn cancel_all(&mut self) -> Vec<(LocalOrderId, bool)>;

    /// Close every open position. Returns `(symbol, accepted)` per symbol.
    fn flatten_all(&mut self) -> Vec<(Symbol, bool)>;

    /// Operator alerting channel.
    fn send_alert(&mut self, message: &str);
}

/// Outcome of one guardian side-effect action, audited as a guardian event.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ActionOutcome {
    pub action: SmolStr,
    pub outcome: SmolStr,
}

/// Result of one guardian tick.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub mode: GuardianMode,
    pub firings: Vec<TriggerFiring>,
    pub transitions: Vec<ModeTransition>,
    pub actions: Vec<ActionOutcome>,
}

/// Composes the mode FSM, the trigger registry and side-effect actions.
#[derive(Debug)]
pub struct GuardianMonitor {
    fsm: GuardianFsm,
    triggers: TriggerRegistry,
}

impl GuardianMonitor {
    pub fn new(fsm: GuardianFsm, triggers: TriggerRegistry) -> Self {
        Self { fsm, triggers }
    }

    pub fn fsm(&self) -> &GuardianFsm {
        &self.fsm
    }

    pub fn fsm_mut(&mut self) -> &mut GuardianFsm {
        &mut self.fsm
    }

    pub fn mode(&self) -> GuardianMode {
        self.fsm.current_mode()
    }

    /// Evaluate triggers against the snapshot, apply accepted transitions and run side-effect
    /// actions.
    ///
    /// Firings whose event the FSM does not admit in the current mode are recorded but ignored
    /// (eg/ a second `quote_stale` while already in `ReduceOnly`).
    pub fn on_tick(
        &mut self,
        state: &GuardianSnapshot,
        actions: &mut impl GuardianActionHandler,
    ) -> CheckResult {
        let firings = self.triggers.evaluate(state);

        let mut transitions = Vec::new();
        let mut outcomes = Vec::new();

        for firing in &firings {
            if !self.fsm.can_transition(firing.event) {
                continue;
            }

            let transition = match self.fsm.transition(firing.event) {
                Ok(transition) => transition,
                Err(guardian_error) => {
                    warn!(%guardian_error, "guardian transition raced its admission check");
                    continue;
                }
            };

            if transition.transitioned_to_halted() {
                outcomes.push(Self::run_cancel_all(actions));
                actions.send_alert(&format!(
                    "guardian halted: {} ({})",
                    firing.event, firing.details
                ));
                outcomes.push(ActionOutcome {
                    action: SmolStr::new("send_alert"),
                    outcome: SmolStr::new("sent"),
                });
            }

            transitions.push(transition);
        }

        CheckResult {
            mode: self.fsm.current_mode(),
            firings,
            transitions,
            actions: outcomes,
        }
    }

    /// Operator override; runs halt actions when forcing into `Halted`.
    pub fn force_mode(
        &mut self,
        mode: GuardianMode,
        reason: impl AsRef<str>,
        actions: &mut impl GuardianActionHandler,
    ) -> (ModeTransition, Vec<ActionOutcome>) {
        let transition = self.fsm.force_mode(mode, reason);

        let mut outcomes = Vec::new();
        if transition.transitioned_to_halted() {
            outcomes.push(Self::run_cancel_all(actions));
        }

        (transition, outcomes)
    }

    /// Close every open position, eg/ after an operator `flatten` command.
    pub fn flatten_all(&self, actions: &mut impl GuardianActionHandler) -> ActionOutcome {
        let results = actions.flatten_all();
        let failed = results.iter().filter(|(_, accepted)| !accepted).count();
        info!(
            mode = %self.fsm.current_mode(),
            total = results.len(),
            failed,
            "guardian flatten_all completed"
        );

        ActionOutcome {
            action: SmolStr::new("flatten_all"),
            outcome: SmolStr::new(format!("{} symbols, {failed} failed", results.len())),
        }
    }

    fn run_cancel_all(actions: &mut impl GuardianActionHandler) -> ActionOutcome {
        let results = actions.cancel_all();
        let failed = results.iter().filter(|(_, accepted)| !accepted).count();
        info!(
            total = results.len(),
            failed, "guardian cancel_all completed"
        );

        ActionOutcome {
            action: SmolStr::new("cancel_all"),
            outcome: SmolStr::new(format!("{} orders, {failed} failed", results.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        guardian::trigger::{GuardianTriggerConfig, TriggerEvent},
        margin::MarginLevel,
    };
    use chrono::{DateTime, Utc};

    #[derive(Default)]
    struct RecordingActions {
        cancelled: Vec<LocalOrderId>,
        flattened: Vec<Symbol>,
        alerts: Vec<String>,
        active: Vec<LocalOrderId>,
    }

    impl GuardianActionHandler for RecordingActions {
        fn cancel_all(&mut self) -> Vec<(LocalOrderId, bool)> {
            let results = self
                .active
                .iter()
                .map(|local_id| (*local_id, true))
                .collect::<Vec<_>>();
            self.cancelled.extend(self.active.drain(..));
            results
        }

        fn flatten_all(&mut self) -> Vec<(Symbol, bool)> {
            self.flattened.push(Symbol::new("rb2501"));
            vec![(Symbol::new("rb2501"), true)]
        }

        fn send_alert(&mut self, message: &str) {
            self.alerts.push(message.to_string());
        }
    }

    fn monitor(mode: GuardianMode) -> GuardianMonitor {
        GuardianMonitor::new(
            GuardianFsm::with_mode(mode),
            TriggerRegistry::standard(&GuardianTriggerConfig::default()),
        )
    }

    fn snapshot(margin_level: MarginLevel) -> GuardianSnapshot {
        GuardianSnapshot {
            now: DateTime::<Utc>::MIN_UTC,
            margin_level,
            ..GuardianSnapshot::default()
        }
    }

    #[test]
    fn test_quiet_tick_reports_mode_only() {
        let mut monitor = monitor(GuardianMode::Running);
        let mut actions = RecordingActions::default();

        let result = monitor.on_tick(&snapshot(MarginLevel::Safe), &mut actions);
        assert_eq!(result.mode, GuardianMode::Running);
        assert!(result.firings.is_empty());
        assert!(result.transitions.is_empty());
        assert!(result.actions.is_empty());
    }

    #[test]
    fn test_margin_warning_demotes_to_reduce_only() {
        let mut monitor = monitor(GuardianMode::Running);
        let mut actions = RecordingActions::default();

        let result = monitor.on_tick(&snapshot(MarginLevel::Warning), &mut actions);
        assert_eq!(result.mode, GuardianMode::ReduceOnly);
        assert_eq!(result.transitions.len(), 1);
        assert_eq!(
            result.transitions[0].event,
            Some(TriggerEvent::MarginWarning)
        );
        // No halt, no cancel_all
        assert!(result.actions.is_empty());
    }

    #[test]
    fn test_margin_critical_halts_and_cancels_all() {
        let mut monitor = monitor(GuardianMode::Running);
        let mut actions = RecordingActions {
            active: vec![LocalOrderId::random(), LocalOrderId::random()],
            ..RecordingActions::default()
        };

        let result = monitor.on_tick(&snapshot(MarginLevel::Critical), &mut actions);
        assert_eq!(result.mode, GuardianMode::Halted);
        assert_eq!(actions.cancelled.len(), 2);
        assert_eq!(actions.alerts.len(), 1);
        assert!(
            result
                .actions
                .iter()
                .any(|outcome| outcome.action == "cancel_all")
        );
    }

    #[test]
    fn test_unadmitted_firing_recorded_but_ignored() {
        // Already ReduceOnly: a margin_warning firing has no table entry
        let mut monitor = monitor(GuardianMode::ReduceOnly);
        let mut actions = RecordingActions::default();

        let result = monitor.on_tick(&snapshot(MarginLevel::Warning), &mut actions);
        assert_eq!(result.mode, GuardianMode::ReduceOnly);
        assert_eq!(result.firings.len(), 1);
        assert!(result.transitions.is_empty());
    }

    #[test]
    fn test_force_halt_runs_cancel_all() {
        let mut monitor = monitor(GuardianMode::Running);
        let mut actions = RecordingActions {
            active: vec![LocalOrderId::random()],
            ..RecordingActions::default()
        };

        let (transition, outcomes) =
            monitor.force_mode(GuardianMode::Halted, "operator", &mut actions);
        assert!(transition.transitioned_to_halted());
        assert_eq!(actions.cancelled.len(), 1);
        assert_eq!(outcomes.len(), 1);
    }
}
