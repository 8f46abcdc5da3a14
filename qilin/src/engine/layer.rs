use crate::{
    channel::{Tx, UnboundedTx},
    guardian::GuardianActionHandler,
    market::Quote,
    protection::SharedComplianceThrottle,
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use qilin_execution::{
    error::ExecutionError,
    gateway::{GatewayEvent, GatewayRequest},
    order::{
        OrderFsm, OrderInput, OrderTransition,
        id::{LocalOrderId, OrderRef},
        registry::{OrderRegistry, OrphanOrderReport},
        request::OrderIntent,
    },
    position::{PositionTracker, RealisedPnl},
    timeout::{TimeoutConfig, TimeoutKind, TimeoutManager},
    trade::Trade,
};
use qilin_instrument::{Offset, Side, registry::InstrumentRegistry, symbol::Symbol};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Order-layer occurrence pending audit, drained by the orchestrator in generation order.
#[derive(Debug, Clone)]
pub enum LayerEvent {
    Transition {
        transition: OrderTransition,
        symbol: Symbol,
    },
    TradeApplied(Trade),
    Pnl(RealisedPnl),
    Orphan(OrphanOrderReport),
}

/// The order side of the core: FSMs, identifier registry, timeouts, positions and the outbound
/// gateway queue.
///
/// Owns every [`OrderFsm`] (and therefore every order context); everything else references
/// orders by [`LocalOrderId`].
#[derive(Debug)]
pub struct OrderLayer {
    orders: FnvHashMap<LocalOrderId, OrderFsm>,
    /// Insertion order, for deterministic iteration over the FnvHashMap contents.
    order_seq: Vec<LocalOrderId>,
    registry: OrderRegistry,
    timeouts: TimeoutManager,
    positions: PositionTracker,
    order_tx: UnboundedTx<GatewayRequest>,
    compliance: SharedComplianceThrottle,
    pending: Vec<LayerEvent>,
    next_order_ref: u64,
    next_trade_seq: u64,
}

impl OrderLayer {
    pub fn new(
        timeouts: TimeoutConfig,
        order_tx: UnboundedTx<GatewayRequest>,
        compliance: SharedComplianceThrottle,
    ) -> Self {
        Self {
            orders: FnvHashMap::default(),
            order_seq: Vec::new(),
            registry: OrderRegistry::new(),
            timeouts: TimeoutManager::new(timeouts),
            positions: PositionTracker::default(),
            order_tx,
            compliance,
            pending: Vec::new(),
            next_order_ref: 1,
            next_trade_seq: 1,
        }
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PositionTracker {
        &mut self.positions
    }

    pub fn order(&self, local_id: &LocalOrderId) -> Option<&OrderFsm> {
        self.orders.get(local_id)
    }

    /// Active orders in creation order.
    pub fn active_orders(&self) -> impl Iterator<Item = &OrderFsm> {
        self.order_seq
            .iter()
            .filter_map(|local_id| self.orders.get(local_id))
            .filter(|fsm| fsm.state().is_active())
    }

    pub fn active_order_count(&self) -> usize {
        self.active_orders().count()
    }

    /// Occurrences generated since the last drain, in generation order.
    pub fn drain_pending(&mut self) -> Vec<LayerEvent> {
        std::mem::take(&mut self.pending)
    }

    fn allocate_order_ref(&mut self) -> OrderRef {
        let order_ref = OrderRef::new(format!("{}", self.next_order_ref));
        self.next_order_ref += 1;
        order_ref
    }

    /// Create an order from an accepted intent and push its submit request to the gateway.
    ///
    /// The broker order_ref is client-assigned at submission and bound immediately; the
    /// exchange id binds on ACK. An ACK deadline is registered.
    pub fn submit(
        &mut self,
        intent: OrderIntent,
        now: DateTime<Utc>,
    ) -> Result<LocalOrderId, ExecutionError> {
        let local_id = LocalOrderId::random();
        let order_ref = self.allocate_order_ref();

        let mut ctx = intent.into_context(local_id, now);
        ctx.order_ref = Some(order_ref.clone());
        let symbol = ctx.symbol.clone();

        let mut fsm = OrderFsm::new(ctx);
        let transition = fsm.apply(OrderInput::Submit, now)?;

        self.registry.bind_order_ref(order_ref.clone(), local_id)?;
        self.timeouts.register(local_id, TimeoutKind::Ack, now);

        let request = {
            let ctx = fsm.ctx();
            GatewayRequest::Submit {
                local_id,
                symbol: ctx.symbol.clone(),
                side: ctx.side,
                offset: ctx.offset,
                qty: ctx.qty,
                price: ctx.price,
                order_ref,
            }
        };

        self.orders.insert(local_id, fsm);
        self.order_seq.push(local_id);

        if self.order_tx.send(request).is_err() {
            warn!(%local_id, "gateway request queue dropped");
        }

        self.pending.push(LayerEvent::Transition { transition, symbol });
        Ok(local_id)
    }

    /// Apply one FSM input to an order, maintaining timeout registrations.
    pub fn apply_input(
        &mut self,
        local_id: LocalOrderId,
        input: OrderInput,
        now: DateTime<Utc>,
    ) -> Result<OrderTransition, ExecutionError> {
        let fsm = self
            .orders
            .get_mut(&local_id)
            .ok_or_else(|| ExecutionError::UnknownId(local_id.to_string()))?;

        let symbol = fsm.ctx().symbol.clone();
        let transition = fsm.apply(input, now)?;

        use qilin_execution::order::OrderState::*;
        match transition.next {
            Acked => {
                self.timeouts.cancel(local_id, TimeoutKind::Ack);
                self.timeouts.register(local_id, TimeoutKind::Fill, now);
            }
            PendingCancel => {
                self.timeouts.register(local_id, TimeoutKind::Cancel, now);
            }
            Filled | Cancelled | Rejected | Error => {
                self.timeouts.cancel_all_for_order(local_id);
            }
            _ => {}
        }

        if !transition.is_noop() {
            self.pending.push(LayerEvent::Transition {
                transition: transition.clone(),
                symbol,
            });
        }
        Ok(transition)
    }

    /// Request cancellation of one order, preferring the exchange id key.
    ///
    /// The cancel is a report-or-cancel operation and is recorded against the compliance
    /// window (counted, never blocked - cancels reduce risk).
    pub fn request_cancel(
        &mut self,
        local_id: LocalOrderId,
        now: DateTime<Utc>,
    ) -> Result<bool, ExecutionError> {
        let Some(fsm) = self.orders.get(&local_id) else {
            return Err(ExecutionError::UnknownId(local_id.to_string()));
        };
        let Some(key) = OrderRegistry::cancel_key(fsm.ctx()) else {
            debug!(%local_id, "no cancel key yet (order not acked)");
            return Ok(false);
        };

        self.apply_input(local_id, OrderInput::CancelRequest, now)?;
        self.compliance.lock().record(now);

        if self
            .order_tx
            .send(GatewayRequest::Cancel { local_id, key })
            .is_err()
        {
            warn!(%local_id, "gateway request queue dropped");
        }
        Ok(true)
    }

    /// Fire expired deadlines into the owning FSMs.
    pub fn tick_timeouts(&mut self, now: DateTime<Utc>) {
        for (local_id, kind) in self.timeouts.tick(now) {
            let input = match kind {
                TimeoutKind::Ack => OrderInput::AckTimeout,
                TimeoutKind::Fill => OrderInput::FillTimeout,
                TimeoutKind::Cancel => OrderInput::CancelTimeout,
            };

            match self.apply_input(local_id, input, now) {
                Ok(transition) if transition.is_noop() => {
                    warn!(%local_id, %kind, "timeout signalled without transition");
                }
                Ok(transition) if transition.next == qilin_execution::order::OrderState::Error => {
                    warn!(
                        %local_id,
                        execution_error = %ExecutionError::TimeoutExpired(kind),
                        "deadline expired without gateway callback"
                    );
                }
                Ok(_) => {}
                Err(execution_error) => {
                    warn!(%local_id, %kind, %execution_error, "timeout input rejected");
                }
            }
        }
    }

    /// Process one gateway callback.
    ///
    /// Unknown identifiers are buffered for late binding; [`Self::flush_buffered`] re-resolves
    /// them each tick.
    pub fn handle_gateway_event(
        &mut self,
        event: GatewayEvent,
        instruments: &InstrumentRegistry,
        now: DateTime<Utc>,
    ) {
        let Some(link) = event.link() else {
            return;
        };

        let Some(local_id) = self.registry.resolve(&link) else {
            self.registry.buffer_unknown(link, event, now);
            return;
        };

        self.dispatch_resolved(local_id, event, instruments, now);
    }

    fn dispatch_resolved(
        &mut self,
        local_id: LocalOrderId,
        event: GatewayEvent,
        instruments: &InstrumentRegistry,
        now: DateTime<Utc>,
    ) {
        match event {
            GatewayEvent::Ack {
                order_ref,
                exchange_id,
                front_id,
                session_id,
            } => {
                if let Err(execution_error) = self
                    .registry
                    .bind_exchange_id(exchange_id.clone(), local_id)
                {
                    warn!(%local_id, %execution_error, "exchange id bind conflict");
                    return;
                }
                if let Err(execution_error) = self.apply_input(
                    local_id,
                    OrderInput::Ack {
                        order_ref,
                        exchange_id,
                        front_id,
                        session_id,
                    },
                    now,
                ) {
                    warn!(%local_id, %execution_error, "ack rejected by order fsm");
                }
            }
            GatewayEvent::Reject { code, message, .. } => {
                if let Err(execution_error) =
                    self.apply_input(local_id, OrderInput::Reject { code, message }, now)
                {
                    warn!(%local_id, %execution_error, "reject rejected by order fsm");
                }
            }
            GatewayEvent::Trade {
                trade_id,
                qty,
                price,
                time,
                ..
            } => {
                let Some(fsm) = self.orders.get(&local_id) else {
                    return;
                };
                let remaining = fsm.ctx().qty_remaining();
                let input = if qty >= remaining {
                    OrderInput::FullFill { qty, price }
                } else {
                    OrderInput::PartialFill { qty, price }
                };

                let (symbol, side, offset) = {
                    let ctx = fsm.ctx();
                    (ctx.symbol.clone(), ctx.side, ctx.offset)
                };

                if let Err(execution_error) = self.apply_input(local_id, input, now) {
                    warn!(%local_id, %execution_error, "fill rejected by order fsm");
                    return;
                }

                let trade = Trade::new(trade_id, local_id, symbol.clone(), side, offset, qty, price, time);
                let multiplier = instruments
                    .get(&symbol)
                    .map(|instrument| instrument.multiplier)
                    .unwrap_or(1);

                match self.positions.apply_trade(&trade, multiplier) {
                    Ok(realised) => {
                        self.pending.push(LayerEvent::TradeApplied(trade));
                        if let Some(realised) = realised {
                            self.pending.push(LayerEvent::Pnl(realised));
                        }
                    }
                    Err(execution_error) => {
                        warn!(%local_id, %execution_error, "trade rejected by position tracker");
                        self.pending.push(LayerEvent::TradeApplied(trade));
                    }
                }
            }
            GatewayEvent::Cancelled { .. } => {
                if let Err(execution_error) =
                    self.apply_input(local_id, OrderInput::Cancelled, now)
                {
                    warn!(%local_id, %execution_error, "cancelled rejected by order fsm");
                }
            }
            GatewayEvent::PositionSnapshot { .. } | GatewayEvent::Disconnected { .. } => {}
        }
    }

    /// Re-resolve buffered callbacks; expire the rest into orphan reports.
    pub fn flush_buffered(
        &mut self,
        instruments: &InstrumentRegistry,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) {
        let (resolved, orphans) = self.registry.flush_buffered(now, window);
        for (local_id, event) in resolved {
            self.dispatch_resolved(local_id, event, instruments, now);
        }
        for orphan in orphans {
            self.pending.push(LayerEvent::Orphan(orphan));
        }
    }

    /// Synthesise a trade id for internally generated fills (tests, simulation).
    pub fn next_trade_id(&mut self) -> u64 {
        let seq = self.next_trade_seq;
        self.next_trade_seq += 1;
        seq
    }
}

/// Per-tick view implementing the guardian's action capability over the order layer.
///
/// Constructed by the orchestrator from disjoint borrows; the order layer itself never holds a
/// reference back to the guardian.
pub struct ActionCtx<'a> {
    pub layer: &'a mut OrderLayer,
    pub quotes: &'a BTreeMap<Symbol, Quote>,
    pub now: DateTime<Utc>,
    pub alerts: Vec<String>,
}

impl std::fmt::Debug for ActionCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCtx").field("now", &self.now).finish()
    }
}

impl<'a> ActionCtx<'a> {
    pub fn new(
        layer: &'a mut OrderLayer,
        quotes: &'a BTreeMap<Symbol, Quote>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            layer,
            quotes,
            now,
            alerts: Vec::new(),
        }
    }
}

impl GuardianActionHandler for ActionCtx<'_> {
    fn cancel_all(&mut self) -> Vec<(LocalOrderId, bool)> {
        let active: Vec<LocalOrderId> = self
            .layer
            .active_orders()
            .map(|fsm| fsm.local_id())
            .collect();

        active
            .into_iter()
            .map(|local_id| {
                let accepted = self
                    .layer
                    .request_cancel(local_id, self.now)
                    .unwrap_or(false);
                (local_id, accepted)
            })
            .collect()
    }

    fn flatten_all(&mut self) -> Vec<(Symbol, bool)> {
        let nets = self.layer.positions().net_positions();

        nets.into_iter()
            .map(|(symbol, net)| {
                let Some(quote) = self.quotes.get(&symbol) else {
                    warn!(%symbol, "flatten_all: no quote, skipping");
                    return (symbol, false);
                };

                // Closing a long sells at the bid; closing a short buys at the ask
                let (side, price) = if net > 0 {
                    (Side::Sell, quote.bid)
                } else {
                    (Side::Buy, quote.ask)
                };
                let intent =
                    OrderIntent::new(symbol.clone(), side, Offset::Close, net.abs(), price);

                let accepted = self.layer.submit(intent, self.now).is_ok();
                if accepted {
                    // Flatten bypasses the gate pipeline but still counts as a report op
                    self.layer.compliance.lock().record(self.now);
                }
                (symbol, accepted)
            })
            .collect()
    }

    fn send_alert(&mut self, message: &str) {
        warn!(alert = message, "guardian alert");
        self.alerts.push(message.to_string());
    }
}

/// Compute margin in use from tracked positions at last prices.
pub fn margin_used_estimate(
    positions: &PositionTracker,
    quotes: &BTreeMap<Symbol, Quote>,
    instruments: &InstrumentRegistry,
) -> Decimal {
    let mut total = Decimal::ZERO;
    for (symbol, quote) in quotes {
        let Some(instrument) = instruments.get(symbol) else {
            continue;
        };
        let position = positions.position(symbol);
        let price = quote.last;
        let mult = instrument.multiplier_decimal();

        total += Decimal::from(position.long_qty) * price * mult * instrument.margin_rate_long;
        total += Decimal::from(position.short_qty) * price * mult * instrument.margin_rate_short;
    }
    total
}
