use crate::{
    channel::{UnboundedRx, UnboundedTx, unbounded},
    clock::EngineClock,
    cost::CostModel,
    event::{AuditContext, Event},
    guardian::{GuardianFsm, GuardianMode, GuardianMonitor, GuardianTriggerConfig, TriggerRegistry},
    margin::{MarginConfig, MarginMonitor},
    market::{MarketSnapshot, Quote},
    pair::PairExecutor,
    protection::{ComplianceThrottle, ProtectionConfig, ProtectionPipeline, SharedComplianceThrottle},
    shutdown::ExitReason,
    strategy::StrategyHost,
};
use chrono::{DateTime, Utc};
use qilin_execution::{gateway::{GatewayEvent, GatewayRequest}, timeout::TimeoutConfig};
use qilin_instrument::{registry::InstrumentRegistry, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod cycle;
pub mod layer;

pub use cycle::CycleSummary;
pub use layer::{LayerEvent, OrderLayer};

/// Operator command delivered to the core loop.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Shutdown,
    ForceMode { mode: GuardianMode, reason: String },
    FlattenAll,
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub timeouts: TimeoutConfig,
    pub protection: ProtectionConfig,
    pub guardian: GuardianTriggerConfig,
    pub margin: MarginConfig,
    /// Pair-leg imbalance threshold, in lots.
    pub imbalance_threshold: i64,
    /// Late-binding window for gateway callbacks with unknown identifiers, in seconds.
    pub reconcile_window_secs: i64,
    /// Account equity seeded at startup (the gateway owns the authoritative figure).
    pub initial_equity: Decimal,
    /// Core loop yield between ticks, in milliseconds (bounded at 10).
    pub tick_yield_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            protection: ProtectionConfig::default(),
            guardian: GuardianTriggerConfig::default(),
            margin: MarginConfig::default(),
            imbalance_threshold: 2,
            reconcile_window_secs: 30,
            initial_equity: Decimal::new(1_000_000, 0),
            tick_yield_ms: 10,
        }
    }
}

/// Queue ends handed to the I/O workers surrounding the core.
#[derive(Debug)]
pub struct OrchestratorHandles {
    /// Market snapshots in (`QuoteQ`).
    pub quote_tx: UnboundedTx<MarketSnapshot>,
    /// Gateway callbacks in (`GatewayEventQ`).
    pub gateway_tx: UnboundedTx<GatewayEvent>,
    /// Operator commands in.
    pub command_tx: UnboundedTx<Command>,
    /// Order intents out (`OrderOutQ`).
    pub order_rx: UnboundedRx<GatewayRequest>,
    /// Audit events out (`AuditQ`), owned by the writer worker.
    pub audit_rx: UnboundedRx<Event>,
}

/// The single-threaded core event loop: market input -> strategy -> guardian -> protection ->
/// execution -> audit.
///
/// All mutable state (registries, FSMs, positions, guardian mode) is partitioned to this struct;
/// I/O workers communicate exclusively via the queues in [`OrchestratorHandles`].
#[derive(Debug)]
pub struct Orchestrator<Clock> {
    pub(crate) clock: Clock,
    pub(crate) config: OrchestratorConfig,
    pub(crate) instruments: InstrumentRegistry,
    pub(crate) audit: AuditContext,
    pub(crate) audit_tx: UnboundedTx<Event>,
    pub(crate) quote_rx: UnboundedRx<MarketSnapshot>,
    pub(crate) gateway_rx: UnboundedRx<GatewayEvent>,
    pub(crate) command_rx: UnboundedRx<Command>,
    pub(crate) layer: OrderLayer,
    pub(crate) cost: CostModel,
    pub(crate) protection: ProtectionPipeline,
    pub(crate) margin: MarginMonitor,
    pub(crate) guardian: GuardianMonitor,
    pub(crate) pairs: PairExecutor,
    pub(crate) strategies: StrategyHost,
    pub(crate) equity: Decimal,
    pub(crate) last_quotes: BTreeMap<Symbol, Quote>,
    pub(crate) quote_times: BTreeMap<Symbol, DateTime<Utc>>,
    pub(crate) limit_streaks: BTreeMap<Symbol, u32>,
    pub(crate) last_drift: Vec<(Symbol, i64, i64)>,
    pub(crate) saw_snapshot: bool,
    pub(crate) needs_broker_sync: bool,
    pub(crate) pending_exit: Option<ExitReason>,
}

impl<Clock> Orchestrator<Clock>
where
    Clock: EngineClock,
{
    /// Wire up the orchestrator and return the queue ends for its I/O workers.
    pub fn new(
        clock: Clock,
        config: OrchestratorConfig,
        instruments: InstrumentRegistry,
        strategies: StrategyHost,
    ) -> (Self, OrchestratorHandles) {
        let (quote_tx, quote_rx) = unbounded();
        let (gateway_tx, gateway_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        let (order_tx, order_rx) = unbounded();
        let (audit_tx, audit_rx) = unbounded();

        let compliance: SharedComplianceThrottle =
            ComplianceThrottle::shared(config.protection.compliance.clone());
        let protection = ProtectionPipeline::standard(&config.protection, compliance.clone());
        let layer = OrderLayer::new(config.timeouts, order_tx, compliance);

        let guardian = GuardianMonitor::new(
            GuardianFsm::new(),
            TriggerRegistry::standard(&config.guardian),
        );
        let margin = MarginMonitor::new(config.margin);
        let pairs = PairExecutor::new(config.imbalance_threshold);
        let equity = config.initial_equity;

        let orchestrator = Self {
            clock,
            config,
            instruments,
            audit: AuditContext::new(),
            audit_tx,
            quote_rx,
            gateway_rx,
            command_rx,
            layer,
            cost: CostModel,
            protection,
            margin,
            guardian,
            pairs,
            strategies,
            equity,
            last_quotes: BTreeMap::new(),
            quote_times: BTreeMap::new(),
            limit_streaks: BTreeMap::new(),
            last_drift: Vec::new(),
            saw_snapshot: false,
            needs_broker_sync: false,
            pending_exit: None,
        };

        let handles = OrchestratorHandles {
            quote_tx,
            gateway_tx,
            command_tx,
            order_rx,
            audit_rx,
        };

        (orchestrator, handles)
    }

    pub fn mode(&self) -> GuardianMode {
        self.guardian.mode()
    }

    /// Replace the run identifier before the first cycle.
    ///
    /// A replay run reuses the original run's identifier so that normalised event sequences
    /// hash identically.
    pub fn set_run_id(&mut self, run_id: uuid::Uuid) {
        self.audit = AuditContext::with_run_id(run_id);
    }

    pub fn run_id(&self) -> &smol_str::SmolStr {
        self.audit.run_id()
    }

    pub fn layer(&self) -> &OrderLayer {
        &self.layer
    }

    pub fn pairs(&self) -> &PairExecutor {
        &self.pairs
    }

    /// Mark initialisation complete, entering `Running`.
    pub fn init_success(&mut self) -> Result<(), crate::guardian::GuardianError> {
        let transition = self
            .guardian
            .fsm_mut()
            .transition(crate::guardian::TriggerEvent::InitSuccess)?;
        let now = self.clock.time();
        self.audit_mode_transition(&transition, now);
        Ok(())
    }

    /// Mark initialisation failed, entering `Halted`.
    pub fn init_failed(&mut self) -> Result<(), crate::guardian::GuardianError> {
        let transition = self
            .guardian
            .fsm_mut()
            .transition(crate::guardian::TriggerEvent::InitFailed)?;
        let now = self.clock.time();
        self.audit_mode_transition(&transition, now);
        Ok(())
    }
}
