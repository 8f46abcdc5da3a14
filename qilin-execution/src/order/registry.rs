use crate::{
    error::ExecutionError,
    gateway::{CancelKey, GatewayEvent, OrderLink},
    order::OrderContext,
    order::id::{ExchangeOrderId, LocalOrderId, OrderRef},
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Gateway callback buffered because its identifier was not yet bound.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BufferedCallback {
    pub link: OrderLink,
    pub event: GatewayEvent,
    pub received_at: DateTime<Utc>,
}

/// Report for a buffered callback whose identifier never bound within the reconciliation window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrphanOrderReport {
    pub link: OrderLink,
    pub event: GatewayEvent,
    pub received_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Non-owning `order_ref <-> local_id <-> exchange_id` mappings.
///
/// Order contexts live inside their [`OrderFsm`](super::OrderFsm); the registry only resolves
/// identifiers. Callbacks referencing unknown identifiers are buffered for one reconciliation
/// window (late binding) before being surfaced as [`OrphanOrderReport`]s.
#[derive(Debug, Clone, Default)]
pub struct OrderRegistry {
    by_order_ref: FnvHashMap<OrderRef, LocalOrderId>,
    by_exchange_id: FnvHashMap<ExchangeOrderId, LocalOrderId>,
    buffered: Vec<BufferedCallback>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a broker `order_ref` to a local order.
    ///
    /// A conflicting existing binding fails with [`ExecutionError::DuplicateId`]; rebinding the
    /// same pair is a no-op (gateways replay ACKs after reconnect).
    pub fn bind_order_ref(
        &mut self,
        order_ref: OrderRef,
        local_id: LocalOrderId,
    ) -> Result<(), ExecutionError> {
        match self.by_order_ref.get(&order_ref) {
            Some(existing) if *existing != local_id => Err(ExecutionError::DuplicateId(format!(
                "order_ref {order_ref} already bound to {existing}"
            ))),
            _ => {
                self.by_order_ref.insert(order_ref, local_id);
                Ok(())
            }
        }
    }

    /// Bind an exchange-assigned order id to a local order. Same conflict semantics as
    /// [`Self::bind_order_ref`].
    pub fn bind_exchange_id(
        &mut self,
        exchange_id: ExchangeOrderId,
        local_id: LocalOrderId,
    ) -> Result<(), ExecutionError> {
        match self.by_exchange_id.get(&exchange_id) {
            Some(existing) if *existing != local_id => Err(ExecutionError::DuplicateId(format!(
                "exchange_id {exchange_id} already bound to {existing}"
            ))),
            _ => {
                self.by_exchange_id.insert(exchange_id, local_id);
                Ok(())
            }
        }
    }

    /// Resolve a callback identifier to the owning local order, if bound.
    pub fn resolve(&self, link: &OrderLink) -> Option<LocalOrderId> {
        match link {
            OrderLink::Ref(order_ref) => self.by_order_ref.get(order_ref).copied(),
            OrderLink::Exchange(exchange_id) => self.by_exchange_id.get(exchange_id).copied(),
        }
    }

    /// Preferred cancel key for an order: `exchange_id` when assigned, else
    /// `(front_id, order_ref)`.
    pub fn cancel_key(ctx: &OrderContext) -> Option<CancelKey> {
        if let Some(exchange_id) = &ctx.exchange_id {
            return Some(CancelKey::ExchangeId(exchange_id.clone()));
        }
        match (&ctx.order_ref, ctx.front_id) {
            (Some(order_ref), Some(front_id)) => Some(CancelKey::OrderRef {
                front_id,
                order_ref: order_ref.clone(),
            }),
            _ => None,
        }
    }

    /// Buffer a callback whose identifier is not yet bound (late binding).
    pub fn buffer_unknown(&mut self, link: OrderLink, event: GatewayEvent, now: DateTime<Utc>) {
        warn!(%link, "buffering gateway callback for unknown order id");
        self.buffered.push(BufferedCallback {
            link,
            event,
            received_at: now,
        });
    }

    /// Re-resolve buffered callbacks.
    ///
    /// Returns callbacks that now resolve (to be replayed into the order layer) and orphan
    /// reports for those older than the reconciliation `window`.
    pub fn flush_buffered(
        &mut self,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> (Vec<(LocalOrderId, GatewayEvent)>, Vec<OrphanOrderReport>) {
        let mut resolved = Vec::new();
        let mut orphans = Vec::new();

        let by_order_ref = &self.by_order_ref;
        let by_exchange_id = &self.by_exchange_id;

        self.buffered.retain(|buffered| {
            if let Some(local_id) = match &buffered.link {
                OrderLink::Ref(order_ref) => by_order_ref.get(order_ref).copied(),
                OrderLink::Exchange(exchange_id) => by_exchange_id.get(exchange_id).copied(),
            } {
                resolved.push((local_id, buffered.event.clone()));
                return false;
            }

            if now - buffered.received_at > window {
                orphans.push(OrphanOrderReport {
                    link: buffered.link.clone(),
                    event: buffered.event.clone(),
                    received_at: buffered.received_at,
                    expired_at: now,
                });
                return false;
            }

            true
        });

        (resolved, orphans)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }
}
