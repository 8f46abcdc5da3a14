use chrono::{DateTime, Utc};
use qilin_execution::order::{OrderState, id::LocalOrderId, id::StrategyId};
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Net target position per symbol, as produced by a strategy and filtered by the guardian.
///
/// `BTreeMap` so every user-visible iteration is ordered.
pub type TargetPortfolio = BTreeMap<Symbol, i64>;

/// Audit event union persisted to the append-only JSONL log.
///
/// Every event carries `ts`, `run_id` and `exec_id`; the `event_type` tag uses the
/// `decision* / order_state* / trade* / exec* / guardian* / pnl*` prefixes relied on by the
/// replay verifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub run_id: SmolStr,
    pub exec_id: SmolStr,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    /// One strategy decision for one tick cycle.
    Decision {
        strategy_id: StrategyId,
        strategy_version: SmolStr,
        feature_hash: SmolStr,
        target_portfolio: TargetPortfolio,
    },
    /// One applied order FSM transition.
    OrderState {
        local_id: LocalOrderId,
        symbol: Symbol,
        prev: OrderState,
        new: OrderState,
        input: SmolStr,
    },
    /// One fill applied to the position layer.
    Trade {
        trade_id: SmolStr,
        local_id: LocalOrderId,
        symbol: Symbol,
        side: Side,
        offset: Offset,
        qty: i64,
        price: Decimal,
    },
    /// An order intent rejected by a protection gate.
    ExecProtectionReject {
        symbol: Symbol,
        gate: SmolStr,
        reason: SmolStr,
    },
    /// An order intent rejected by the cost-model edge gate.
    ExecEdgeReject {
        symbol: Symbol,
        signal_edge: Decimal,
        total_cost: Decimal,
    },
    /// A gateway callback whose identifier never bound within the reconciliation window.
    ExecOrphan { link: SmolStr, detail: SmolStr },
    /// An order submit intent pushed to the gateway.
    ExecSubmit {
        local_id: LocalOrderId,
        symbol: Symbol,
        side: Side,
        offset: Offset,
        qty: i64,
        price: Decimal,
    },
    /// A guardian mode transition (table-driven or forced).
    GuardianMode {
        prev: SmolStr,
        current: SmolStr,
        event: SmolStr,
        reason: SmolStr,
    },
    /// A guardian trigger firing observed this tick.
    GuardianTrigger { event: SmolStr, details: SmolStr },
    /// Outcome of a guardian side-effect action (cancel_all, flatten_all, send_alert).
    GuardianAction { action: SmolStr, outcome: SmolStr },
    /// Realised PnL produced by a closing trade.
    Pnl {
        symbol: Symbol,
        qty: i64,
        realised: Decimal,
    },
}

impl EventKind {
    /// The `event_type` tag this kind serialises under.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::Decision { .. } => "decision",
            EventKind::OrderState { .. } => "order_state",
            EventKind::Trade { .. } => "trade",
            EventKind::ExecProtectionReject { .. } => "exec_protection_reject",
            EventKind::ExecEdgeReject { .. } => "exec_edge_reject",
            EventKind::ExecOrphan { .. } => "exec_orphan",
            EventKind::ExecSubmit { .. } => "exec_submit",
            EventKind::GuardianMode { .. } => "guardian_mode",
            EventKind::GuardianTrigger { .. } => "guardian_trigger",
            EventKind::GuardianAction { .. } => "guardian_action",
            EventKind::Pnl { .. } => "pnl",
        }
    }
}

/// Mints correlation identifiers and stamps events.
///
/// `run_id` spans one process invocation; `exec_id` spans one decision cycle and is re-minted by
/// [`Self::begin_cycle`]. Both are always non-empty by construction.
#[derive(Debug, Clone)]
pub struct AuditContext {
    run_id: SmolStr,
    cycle: u64,
    exec_id: SmolStr,
}

impl AuditContext {
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    pub fn with_run_id(run_id: Uuid) -> Self {
        let run_id = SmolStr::new(run_id.simple().to_string());
        let exec_id = SmolStr::new(format!("{}-0", &run_id[..8]));
        Self {
            run_id,
            cycle: 0,
            exec_id,
        }
    }

    pub fn run_id(&self) -> &SmolStr {
        &self.run_id
    }

    pub fn exec_id(&self) -> &SmolStr {
        &self.exec_id
    }

    /// Advance to the next decision cycle, minting a fresh `exec_id`.
    pub fn begin_cycle(&mut self) -> &SmolStr {
        self.cycle += 1;
        self.exec_id = SmolStr::new(format!("{}-{}", &self.run_id[..8], self.cycle));
        &self.exec_id
    }

    /// Stamp an event with the current correlation identifiers.
    pub fn event(&self, ts: DateTime<Utc>, kind: EventKind) -> Event {
        Event {
            ts,
            run_id: self.run_id.clone(),
            exec_id: self.exec_id.clone(),
            kind,
        }
    }
}

impl Default for AuditContext {
    fn default() -> Self {
        Self::new()
    }
}
