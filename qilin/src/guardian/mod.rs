use crate::event::TargetPortfolio;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;
use tracing::{info, warn};

pub mod monitor;
pub mod trigger;

pub use monitor::{ActionOutcome, CheckResult, GuardianActionHandler, GuardianMonitor};
pub use trigger::{
    GuardianSnapshot, GuardianTriggerConfig, Trigger, TriggerEvent, TriggerFiring, TriggerRegistry,
};

/// Process-wide operational mode gating every outbound order.
///
/// Only `Running` permits opening new exposure.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianMode {
    Init,
    Running,
    ReduceOnly,
    Halted,
    Manual,
}

impl GuardianMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardianMode::Init => "init",
            GuardianMode::Running => "running",
            GuardianMode::ReduceOnly => "reduce_only",
            GuardianMode::Halted => "halted",
            GuardianMode::Manual => "manual",
        }
    }
}

impl std::fmt::Display for GuardianMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum GuardianError {
    #[error("invalid guardian transition: {event} in mode {from}")]
    InvalidTransition {
        from: GuardianMode,
        event: trigger::TriggerEvent,
    },
}

/// Record of one applied mode change.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ModeTransition {
    pub prev: GuardianMode,
    pub current: GuardianMode,
    /// The table event that drove the change, absent for operator overrides.
    pub event: Option<trigger::TriggerEvent>,
    pub reason: SmolStr,
}

impl ModeTransition {
    /// True only if the previous mode was not `Halted` and the new mode is.
    pub fn transitioned_to_halted(&self) -> bool {
        self.current == GuardianMode::Halted && self.prev != GuardianMode::Halted
    }
}

/// Operational-mode state machine, driven by trigger events per the fixed transition table.
#[derive(Debug, Clone)]
pub struct GuardianFsm {
    mode: GuardianMode,
}

impl Default for GuardianFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardianFsm {
    pub fn new() -> Self {
        Self {
            mode: GuardianMode::Init,
        }
    }

    pub fn with_mode(mode: GuardianMode) -> Self {
        Self { mode }
    }

    pub fn current_mode(&self) -> GuardianMode {
        self.mode
    }

    /// Only `Running` permits opening new exposure.
    pub fn is_open_allowed(&self) -> bool {
        self.mode == GuardianMode::Running
    }

    fn next_mode(mode: GuardianMode, event: trigger::TriggerEvent) -> Option<GuardianMode> {
        use GuardianMode::*;
        use trigger::TriggerEvent::*;

        match (mode, event) {
            (Init, InitSuccess) => Some(Running),
            (Init, InitFailed) => Some(Halted),
            (
                Running,
                QuoteStale | OrderStuck | PositionDrift | LegImbalance | MarginWarning
                | LimitConsecutive | DeliveryNear,
            ) => Some(ReduceOnly),
            (Running, ManualHalt | MarginCritical | ComplianceExceeded | DeliveryCritical) => {
                Some(Halted)
            }
            (ReduceOnly, RecoverOk) => Some(Running),
            (ReduceOnly, ManualHalt | MarginCritical) => Some(Halted),
            (Halted, ManualTakeover) => Some(Manual),
            (Manual, ManualRelease) => Some(Running),
            _ => None,
        }
    }

    /// True if the table admits `event` in the current mode.
    pub fn can_transition(&self, event: trigger::TriggerEvent) -> bool {
        Self::next_mode(self.mode, event).is_some()
    }

    /// Apply a table transition.
    pub fn transition(
        &mut self,
        event: trigger::TriggerEvent,
    ) -> Result<ModeTransition, GuardianError> {
        let Some(next) = Self::next_mode(self.mode, event) else {
            return Err(GuardianError::InvalidTransition {
                from: self.mode,
                event,
            });
        };

        let prev = self.mode;
        self.mode = next;
        info!(%prev, current = %next, %event, "guardian mode transition");

        Ok(ModeTransition {
            prev,
            current: next,
            event: Some(event),
            reason: SmolStr::new(event.as_str()),
        })
    }

    /// Operator override bypassing the table. Always produces an auditable transition carrying
    /// the supplied reason.
    pub fn force_mode(&mut self, mode: GuardianMode, reason: impl AsRef<str>) -> ModeTransition {
        let prev = self.mode;
        self.mode = mode;
        warn!(%prev, current = %mode, reason = reason.as_ref(), "guardian mode forced");

        ModeTransition {
            prev,
            current: mode,
            event: None,
            reason: SmolStr::new(reason),
        }
    }

    /// Filter a strategy target portfolio according to the current mode.
    ///
    /// * `Init` / `Halted` / `Manual`: no changes permitted - the current portfolio is returned.
    /// * `Running`: the target passes through unchanged.
    /// * `ReduceOnly`: per symbol, the target is clamped so position magnitude never grows and
    ///   sign never flips.
    pub fn filter_target_portfolio(
        &self,
        target: &TargetPortfolio,
        current: &TargetPortfolio,
    ) -> TargetPortfolio {
        match self.mode {
            GuardianMode::Init | GuardianMode::Halted | GuardianMode::Manual => current.clone(),
            GuardianMode::Running => target.clone(),
            GuardianMode::ReduceOnly => {
                let mut filtered = TargetPortfolio::new();
                for symbol in target.keys().chain(current.keys()) {
                    let t = target.get(symbol).copied().unwrap_or(0);
                    let c = current.get(symbol).copied().unwrap_or(0);

                    let clamped = if c == 0 {
                        0
                    } else if c > 0 {
                        t.clamp(0, c)
                    } else {
                        t.clamp(c, 0)
                    };
                    filtered.insert(symbol.clone(), clamped);
                }
                filtered
            }
        }
    }
}
