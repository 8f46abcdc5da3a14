use crate::{
    channel::Tx,
    clock::EngineClock,
    engine::{
        Command, Orchestrator,
        layer::{ActionCtx, LayerEvent, margin_used_estimate},
    },
    error::CoreError,
    event::EventKind,
    guardian::{ActionOutcome, GuardianMode, ModeTransition, TriggerEvent, TriggerFiring},
    market::{MarketSnapshot, PortfolioSnapshot, Quote},
    protection::{GateContext, PriceBand, ProtectionVerdict},
    shutdown::ExitReason,
    strategy::DecisionRecord,
};
use chrono::{DateTime, TimeDelta, Utc};
use qilin_execution::{
    gateway::GatewayEvent,
    order::request::OrderIntent,
    position::{Position, ReconcileHook, ReconcileReport},
};
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

/// Summary of one drain-per-tick cycle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CycleSummary {
    pub mode: GuardianMode,
    pub decisions: usize,
    pub submits: usize,
    pub rejects: usize,
    pub exit: Option<ExitReason>,
}

enum IntentOutcome {
    Submitted(qilin_execution::order::id::LocalOrderId),
    EdgeRejected,
    ProtectionRejected,
    Skipped,
}

struct LogReconcileHook;

impl ReconcileHook for LogReconcileHook {
    fn on_mismatch(&self, report: &ReconcileReport) {
        warn!(diffs = report.diffs.len(), "broker reconciliation mismatch");
    }
}

impl<Clock> Orchestrator<Clock>
where
    Clock: EngineClock,
{
    /// Run cycles until a shutdown condition, yielding between ticks.
    ///
    /// Fatal faults (audit queue gone) halt deterministically; order-scoped faults are logged
    /// and survived.
    pub fn run(&mut self) -> ExitReason {
        info!(run_id = %self.audit.run_id(), "orchestrator running");

        let exit = loop {
            match self.run_cycle() {
                Ok(summary) => {
                    if let Some(exit) = summary.exit {
                        break exit;
                    }
                }
                Err(core_error) if core_error.is_fatal() => {
                    error!(%core_error, "fatal core error - halting");
                    break ExitReason::Generic;
                }
                Err(core_error) => {
                    warn!(%core_error, "core error");
                }
            }

            let yield_ms = self.config.tick_yield_ms.min(10);
            std::thread::sleep(std::time::Duration::from_millis(yield_ms));
        };

        info!(exit_code = exit.code(), "orchestrator shutting down");
        exit
    }

    /// One drain-per-tick cycle: pull everything available, fire timeouts, evaluate the
    /// guardian, process decisions, push outputs.
    pub fn run_cycle(&mut self) -> Result<CycleSummary, CoreError> {
        let now = self.clock.time();
        self.audit.begin_cycle();
        self.saw_snapshot = false;

        self.process_commands(now)?;
        self.process_gateway_events(now)?;
        self.process_quotes();

        self.layer.tick_timeouts(now);
        self.layer.flush_buffered(
            &self.instruments,
            now,
            TimeDelta::seconds(self.config.reconcile_window_secs),
        );
        self.flush_layer_events(now)?;

        self.update_margin(now)?;
        self.guardian_tick(now)?;
        self.process_pair_hedges(now)?;

        let (decisions, submits, rejects) = if self.saw_snapshot {
            self.process_decisions(now)?
        } else {
            (0, 0, 0)
        };

        Ok(CycleSummary {
            mode: self.guardian.mode(),
            decisions,
            submits,
            rejects,
            exit: self.pending_exit,
        })
    }

    fn process_commands(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        for command in self.command_rx.drain() {
            match command {
                Command::Shutdown => {
                    info!("shutdown command received");
                    self.pending_exit.get_or_insert(ExitReason::Success);
                }
                Command::ForceMode { mode, reason } => {
                    let mut actions = ActionCtx::new(&mut self.layer, &self.last_quotes, now);
                    let (transition, outcomes) =
                        self.guardian.force_mode(mode, &reason, &mut actions);
                    self.audit_mode_transition(&transition, now);
                    self.audit_action_outcomes(&outcomes, now);
                    self.flush_layer_events(now)?;
                }
                Command::FlattenAll => {
                    let mut actions = ActionCtx::new(&mut self.layer, &self.last_quotes, now);
                    let outcome = self.guardian.flatten_all(&mut actions);
                    self.audit_action_outcomes(std::slice::from_ref(&outcome), now);
                    self.flush_layer_events(now)?;
                }
            }
        }
        Ok(())
    }

    fn process_gateway_events(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        for event in self.gateway_rx.drain() {
            match event {
                GatewayEvent::PositionSnapshot { positions } => {
                    if self.needs_broker_sync {
                        info!("syncing positions from broker snapshot");
                        self.layer.positions_mut().sync_from_broker(&positions);
                        self.needs_broker_sync = false;
                        self.last_drift.clear();
                    } else {
                        let report = self
                            .layer
                            .positions()
                            .reconcile(&positions, &LogReconcileHook);
                        self.last_drift = report
                            .diffs
                            .iter()
                            .map(|diff| (diff.symbol.clone(), diff.local, diff.broker))
                            .collect();
                    }
                }
                GatewayEvent::Disconnected { detail } => {
                    warn!(%detail, "gateway disconnected");
                    self.needs_broker_sync = true;
                    if self.guardian.fsm().can_transition(TriggerEvent::ManualHalt) {
                        let mut actions =
                            ActionCtx::new(&mut self.layer, &self.last_quotes, now);
                        let (transition, outcomes) = self.guardian.force_mode(
                            GuardianMode::Halted,
                            format!("gateway disconnected: {detail}"),
                            &mut actions,
                        );
                        self.audit_mode_transition(&transition, now);
                        self.audit_action_outcomes(&outcomes, now);
                    }
                }
                order_scoped => {
                    self.layer
                        .handle_gateway_event(order_scoped, &self.instruments, now);
                }
            }
            self.flush_layer_events(now)?;
        }
        Ok(())
    }

    fn process_quotes(&mut self) {
        for snapshot in self.quote_rx.drain() {
            self.saw_snapshot = true;
            for (symbol, quote) in snapshot.quotes {
                self.quote_times.insert(symbol.clone(), quote.ts);
                self.update_limit_streak(&symbol, &quote);
                self.last_quotes.insert(symbol, quote);
            }
        }
    }

    fn update_limit_streak(&mut self, symbol: &Symbol, quote: &Quote) {
        let Some(instrument) = self.instruments.get(symbol) else {
            return;
        };
        let band = PriceBand::for_instrument(instrument, quote.settle);

        let streak = self.limit_streaks.entry(symbol.clone()).or_insert(0);
        if quote.last >= band.up || quote.last <= band.down {
            *streak += 1;
        } else {
            *streak = 0;
        }
    }

    fn update_margin(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let margin_used =
            margin_used_estimate(self.layer.positions(), &self.last_quotes, &self.instruments);

        if let Some(alert) = self.margin.update(self.equity, margin_used) {
            self.push_audit(
                EventKind::GuardianAction {
                    action: SmolStr::new("margin_alert"),
                    outcome: SmolStr::new(format!(
                        "{} -> {} usage={}",
                        alert.prev, alert.current, alert.usage
                    )),
                },
                now,
            )?;
        }
        Ok(())
    }

    fn guardian_tick(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let snapshot = self.guardian_snapshot(now);

        let mut actions = ActionCtx::new(&mut self.layer, &self.last_quotes, now);
        let result = self.guardian.on_tick(&snapshot, &mut actions);

        self.audit_firings(&result.firings, now)?;
        for transition in &result.transitions {
            self.audit_mode_transition(transition, now);
            if transition.event == Some(TriggerEvent::ComplianceExceeded) {
                self.pending_exit
                    .get_or_insert(ExitReason::ReportCancelExceed);
            }
        }
        self.audit_action_outcomes(&result.actions, now);
        self.flush_layer_events(now)?;
        Ok(())
    }

    fn guardian_snapshot(&self, now: DateTime<Utc>) -> crate::guardian::GuardianSnapshot {
        let active_orders = self
            .layer
            .active_orders()
            .map(|fsm| crate::guardian::trigger::ActiveOrderInfo {
                local_id: fsm.local_id(),
                last_update: fsm.ctx().last_update,
            })
            .collect();

        let delivery = self
            .layer
            .positions()
            .net_positions()
            .into_iter()
            .filter_map(|(symbol, net_qty)| {
                let instrument = self.instruments.get(&symbol)?;
                Some(crate::guardian::trigger::DeliveryInfo {
                    days_to_delivery: instrument.days_to_expiry(now.date_naive()),
                    symbol,
                    net_qty,
                })
            })
            .collect();

        crate::guardian::GuardianSnapshot {
            now,
            quote_times: self.quote_times.clone(),
            active_orders,
            position_drift: self.last_drift.clone(),
            pair_imbalances: self.pairs.legs().imbalances(),
            margin_level: self.margin.level(),
            limit_streaks: self.limit_streaks.clone(),
            delivery,
        }
    }

    fn process_decisions(&mut self, now: DateTime<Utc>) -> Result<(usize, usize, usize), CoreError> {
        let market = MarketSnapshot::new(now, self.last_quotes.clone());
        let portfolio = PortfolioSnapshot::new(
            self.layer.positions().net_positions(),
            self.equity,
            margin_used_estimate(self.layer.positions(), &self.last_quotes, &self.instruments),
        );

        let records = self.strategies.decide(&market, &portfolio);
        let decisions = records.len();
        let mut submits = 0;
        let mut rejects = 0;

        for record in records {
            // The DecisionEvent is always emitted before any order state it causes
            self.push_audit(
                EventKind::Decision {
                    strategy_id: record.strategy_id.clone(),
                    strategy_version: record.strategy_version.clone(),
                    feature_hash: record.feature_hash.clone(),
                    target_portfolio: record.target.clone(),
                },
                now,
            )?;

            let (cycle_submits, cycle_rejects) = self.execute_decision(&record, now)?;
            submits += cycle_submits;
            rejects += cycle_rejects;
        }

        Ok((decisions, submits, rejects))
    }

    fn execute_decision(
        &mut self,
        record: &DecisionRecord,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize), CoreError> {
        let current = self.layer.positions().net_positions();
        let filtered = self
            .guardian
            .fsm()
            .filter_target_portfolio(&record.target, &current);

        let mut submits = 0;
        let mut rejects = 0;

        for (symbol, target_net) in &filtered {
            let current_net = current.get(symbol).copied().unwrap_or(0);
            let delta = target_net - current_net;
            if delta == 0 {
                continue;
            }

            let Some(quote) = self.last_quotes.get(symbol) else {
                debug!(%symbol, "no quote for target delta, skipping");
                continue;
            };

            let position = self.layer.positions().position(symbol);
            let intents = plan_intents(symbol, &position, delta, quote);
            let edge = record.edges.get(symbol).copied();

            for intent in intents {
                match self.process_intent(intent, edge, now)? {
                    IntentOutcome::Submitted(_) => submits += 1,
                    IntentOutcome::EdgeRejected | IntentOutcome::ProtectionRejected => {
                        rejects += 1
                    }
                    IntentOutcome::Skipped => {}
                }
            }
        }

        Ok((submits, rejects))
    }

    fn process_intent(
        &mut self,
        mut intent: OrderIntent,
        edge: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<IntentOutcome, CoreError> {
        let Some(instrument) = self.instruments.get(&intent.symbol) else {
            warn!(symbol = %intent.symbol, "intent for unknown instrument");
            return Ok(IntentOutcome::Skipped);
        };
        let quote = self.last_quotes.get(&intent.symbol);

        // Edge gate: expected edge must strictly cover estimated cost
        if let (Some(edge), Some(quote)) = (edge, quote) {
            let breakdown = self.cost.estimate(
                instrument,
                intent.qty,
                intent.price,
                quote.total_depth(),
                quote.adv,
                intent.offset == Offset::CloseToday,
            );
            let total_cost = breakdown.total();
            if !self.cost.edge_gate(edge, total_cost) {
                self.push_audit(
                    EventKind::ExecEdgeReject {
                        symbol: intent.symbol.clone(),
                        signal_edge: edge,
                        total_cost,
                    },
                    now,
                )?;
                return Ok(IntentOutcome::EdgeRejected);
            }
        }

        let ctx = GateContext {
            now,
            instrument,
            quote,
            margin: &self.margin,
        };

        match self.protection.check(&intent, &ctx) {
            ProtectionVerdict::Rejected { gate, reason } => {
                self.push_audit(
                    EventKind::ExecProtectionReject {
                        symbol: intent.symbol.clone(),
                        gate: gate.clone(),
                        reason: reason.clone(),
                    },
                    now,
                )?;

                if gate == "compliance" && reason == "EXCEEDED" {
                    self.compliance_breach(now)?;
                }
                Ok(IntentOutcome::ProtectionRejected)
            }
            ProtectionVerdict::Accepted { price } => {
                intent.price = price;
                let (symbol, side, offset, qty) = (
                    intent.symbol.clone(),
                    intent.side,
                    intent.offset,
                    intent.qty,
                );

                match self.layer.submit(intent, now) {
                    Ok(local_id) => {
                        self.push_audit(
                            EventKind::ExecSubmit {
                                local_id,
                                symbol,
                                side,
                                offset,
                                qty,
                                price,
                            },
                            now,
                        )?;
                        self.flush_layer_events(now)?;
                        Ok(IntentOutcome::Submitted(local_id))
                    }
                    Err(execution_error) => {
                        warn!(%execution_error, "order submission failed");
                        Ok(IntentOutcome::Skipped)
                    }
                }
            }
        }
    }

    /// Begin a two-leg pair execution, submitting both legs through the full gate pipeline.
    ///
    /// Refused outside `Running`: starting a pair opens exposure on both legs.
    pub fn start_pair(
        &mut self,
        pair_id: crate::pair::PairId,
        near_symbol: Symbol,
        far_symbol: Symbol,
        near_side: Side,
        far_side: Side,
        qty: i64,
    ) -> Result<(), CoreError> {
        if !self.guardian.fsm().is_open_allowed() {
            warn!(%pair_id, mode = %self.guardian.mode(), "pair start refused: opening not allowed");
            return Ok(());
        }

        let now = self.clock.time();
        let near_price = match self.crossing_price(&near_symbol, near_side) {
            Some(price) => price,
            None => {
                warn!(symbol = %near_symbol, "pair start refused: no quote for near leg");
                return Ok(());
            }
        };
        let Some(far_price) = self.crossing_price(&far_symbol, far_side) else {
            warn!(symbol = %far_symbol, "pair start refused: no quote for far leg");
            return Ok(());
        };

        let legs = self.pairs.start_pair(
            pair_id,
            near_symbol,
            far_symbol,
            near_side,
            far_side,
            qty,
            near_price,
            far_price,
        )?;

        for (leg_id, intent) in legs {
            if let IntentOutcome::Submitted(local_id) = self.process_intent(intent, None, now)? {
                self.pairs.bind_order(local_id, leg_id)?;
            }
        }
        Ok(())
    }

    fn crossing_price(&self, symbol: &Symbol, side: Side) -> Option<Decimal> {
        self.last_quotes.get(symbol).map(|quote| match side {
            Side::Buy => quote.ask,
            Side::Sell => quote.bid,
        })
    }

    /// Issue corrective orders for imbalanced pairs, gated by guardian mode and deduplicated
    /// while a previous hedge is still working.
    fn process_pair_hedges(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mode = self.guardian.mode();

        for pair_id in self.pairs.pair_ids() {
            if let Some(local_id) = self.pairs.pending_hedge(&pair_id) {
                let still_active = self
                    .layer
                    .order(&local_id)
                    .map(|fsm| fsm.state().is_active())
                    .unwrap_or(false);
                if still_active {
                    continue;
                }
                self.pairs.clear_pending_hedge(&pair_id);
            }

            let Some(hedge) = self.pairs.hedge_suggestion(&pair_id, mode)? else {
                continue;
            };
            let Some(price) = self.crossing_price(&hedge.symbol, hedge.side) else {
                continue;
            };

            let intent = OrderIntent::new(
                hedge.symbol.clone(),
                hedge.side,
                hedge.offset,
                hedge.qty,
                price,
            );
            if let IntentOutcome::Submitted(local_id) = self.process_intent(intent, None, now)? {
                if hedge.offset == Offset::Close {
                    self.pairs.bind_reduction(local_id, hedge.leg_id.clone())?;
                } else {
                    self.pairs.bind_order(local_id, hedge.leg_id.clone())?;
                }
                self.pairs.set_pending_hedge(pair_id, local_id);
            }
        }
        Ok(())
    }

    /// Regulatory cap breached: halt, cancel everything, and mark the orderly-shutdown exit
    /// code.
    fn compliance_breach(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self
            .guardian
            .fsm()
            .can_transition(TriggerEvent::ComplianceExceeded)
        {
            return Ok(());
        }

        let firing = TriggerFiring {
            event: TriggerEvent::ComplianceExceeded,
            details: SmolStr::new("report-cancel cap exceeded"),
        };
        self.audit_firings(std::slice::from_ref(&firing), now)?;

        let transition = match self
            .guardian
            .fsm_mut()
            .transition(TriggerEvent::ComplianceExceeded)
        {
            Ok(transition) => transition,
            Err(guardian_error) => {
                warn!(%guardian_error, "compliance transition refused");
                return Ok(());
            }
        };
        self.audit_mode_transition(&transition, now);

        let mut actions = ActionCtx::new(&mut self.layer, &self.last_quotes, now);
        use crate::guardian::GuardianActionHandler;
        let cancelled = actions.cancel_all();
        let failed = cancelled.iter().filter(|(_, accepted)| !accepted).count();
        self.audit_action_outcomes(
            &[ActionOutcome {
                action: SmolStr::new("cancel_all"),
                outcome: SmolStr::new(format!("{} orders, {failed} failed", cancelled.len())),
            }],
            now,
        );
        self.flush_layer_events(now)?;

        self.pending_exit
            .get_or_insert(ExitReason::ReportCancelExceed);
        Ok(())
    }

    pub(crate) fn audit_mode_transition(&mut self, transition: &ModeTransition, now: DateTime<Utc>) {
        let kind = EventKind::GuardianMode {
            prev: SmolStr::new(transition.prev.as_str()),
            current: SmolStr::new(transition.current.as_str()),
            event: SmolStr::new(
                transition
                    .event
                    .map(|event| event.as_str())
                    .unwrap_or("force_mode"),
            ),
            reason: transition.reason.clone(),
        };
        if self.audit_tx.send(self.audit.event(now, kind)).is_err() {
            // Fatal path is picked up by the next push_audit; keep this infallible for callers
            error!("audit queue dropped while recording mode transition");
        }
    }

    fn audit_firings(&mut self, firings: &[TriggerFiring], now: DateTime<Utc>) -> Result<(), CoreError> {
        for firing in firings {
            self.push_audit(
                EventKind::GuardianTrigger {
                    event: SmolStr::new(firing.event.as_str()),
                    details: firing.details.clone(),
                },
                now,
            )?;
        }
        Ok(())
    }

    fn audit_action_outcomes(&mut self, outcomes: &[ActionOutcome], now: DateTime<Utc>) {
        for outcome in outcomes {
            let kind = EventKind::GuardianAction {
                action: outcome.action.clone(),
                outcome: outcome.outcome.clone(),
            };
            if self.audit_tx.send(self.audit.event(now, kind)).is_err() {
                error!("audit queue dropped while recording action outcome");
            }
        }
    }

    fn flush_layer_events(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        for layer_event in self.layer.drain_pending() {
            let kind = match layer_event {
                LayerEvent::Transition { transition, symbol } => EventKind::OrderState {
                    local_id: transition.local_id,
                    symbol,
                    prev: transition.prev,
                    new: transition.next,
                    input: SmolStr::new(&transition.input),
                },
                LayerEvent::TradeApplied(trade) => {
                    if let Err(pair_error) =
                        self.pairs.on_fill(trade.local_id, trade.qty, trade.price)
                    {
                        warn!(%pair_error, "pair fill routing failed");
                    }
                    EventKind::Trade {
                        trade_id: trade.id.0.clone(),
                        local_id: trade.local_id,
                        symbol: trade.symbol,
                        side: trade.side,
                        offset: trade.offset,
                        qty: trade.qty,
                        price: trade.price,
                    }
                }
                LayerEvent::Pnl(realised) => EventKind::Pnl {
                    symbol: realised.symbol,
                    qty: realised.qty,
                    realised: realised.pnl,
                },
                LayerEvent::Orphan(report) => EventKind::ExecOrphan {
                    link: SmolStr::new(report.link.to_string()),
                    detail: SmolStr::new(format!(
                        "buffered at {}, expired at {}",
                        report.received_at, report.expired_at
                    )),
                },
            };
            self.push_audit(kind, now)?;
        }
        Ok(())
    }

    fn push_audit(&mut self, kind: EventKind, ts: DateTime<Utc>) -> Result<(), CoreError> {
        self.audit_tx
            .send(self.audit.event(ts, kind))
            .map_err(CoreError::from)
    }
}

/// Plan the order intents realising a signed net-position delta.
///
/// Closes against the opposite leg come first, then opens for the remainder. Buys cross at the
/// ask, sells at the bid.
fn plan_intents(symbol: &Symbol, position: &Position, delta: i64, quote: &Quote) -> Vec<OrderIntent> {
    let mut intents = Vec::new();

    if delta > 0 {
        let close_qty = delta.min(position.short_qty);
        if close_qty > 0 {
            intents.push(OrderIntent::new(
                symbol.clone(),
                Side::Buy,
                Offset::Close,
                close_qty,
                quote.ask,
            ));
        }
        let open_qty = delta - close_qty;
        if open_qty > 0 {
            intents.push(OrderIntent::new(
                symbol.clone(),
                Side::Buy,
                Offset::Open,
                open_qty,
                quote.ask,
            ));
        }
    } else {
        let close_qty = (-delta).min(position.long_qty);
        if close_qty > 0 {
            intents.push(OrderIntent::new(
                symbol.clone(),
                Side::Sell,
                Offset::Close,
                close_qty,
                quote.bid,
            ));
        }
        let open_qty = -delta - close_qty;
        if open_qty > 0 {
            intents.push(OrderIntent::new(
                symbol.clone(),
                Side::Sell,
                Offset::Open,
                open_qty,
                quote.bid,
            ));
        }
    }

    intents
}
