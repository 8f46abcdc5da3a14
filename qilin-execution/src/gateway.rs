use crate::{
    order::id::{ExchangeOrderId, LocalOrderId, OrderRef},
    trade::TradeId,
};
use chrono::{DateTime, Utc};
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier a gateway callback uses to reference an order.
///
/// ACKs carry the broker `order_ref`; trade and cancel callbacks may carry either.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLink {
    Ref(OrderRef),
    Exchange(ExchangeOrderId),
}

impl std::fmt::Display for OrderLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderLink::Ref(order_ref) => write!(f, "order_ref={order_ref}"),
            OrderLink::Exchange(exchange_id) => write!(f, "exchange_id={exchange_id}"),
        }
    }
}

/// Key used to cancel a working order.
///
/// Preference: by `exchange_id` when the exchange has assigned one, else by
/// `(front_id, order_ref)`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelKey {
    ExchangeId(ExchangeOrderId),
    OrderRef { front_id: i64, order_ref: OrderRef },
}

/// Outbound request from the core to the gateway I/O worker (`OrderOutQ`).
///
/// Correlation is by `local_id`; the binary wire format is the gateway's concern.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayRequest {
    Submit {
        local_id: LocalOrderId,
        symbol: Symbol,
        side: Side,
        offset: Offset,
        qty: i64,
        price: Decimal,
        order_ref: OrderRef,
    },
    Cancel {
        local_id: LocalOrderId,
        key: CancelKey,
    },
}

impl GatewayRequest {
    pub fn local_id(&self) -> LocalOrderId {
        match self {
            GatewayRequest::Submit { local_id, .. } | GatewayRequest::Cancel { local_id, .. } => {
                *local_id
            }
        }
    }
}

/// Inbound gateway callback delivered to the core (`GatewayEventQ`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEvent {
    Ack {
        order_ref: OrderRef,
        exchange_id: ExchangeOrderId,
        front_id: i64,
        session_id: i64,
    },
    Reject {
        order_ref: OrderRef,
        code: i64,
        message: String,
    },
    Trade {
        trade_id: TradeId,
        link: OrderLink,
        qty: i64,
        price: Decimal,
        time: DateTime<Utc>,
    },
    Cancelled {
        link: OrderLink,
    },
    PositionSnapshot {
        positions: BTreeMap<Symbol, i64>,
    },
    Disconnected {
        detail: String,
    },
}

impl GatewayEvent {
    /// The order link this callback references, if it is order-scoped.
    pub fn link(&self) -> Option<OrderLink> {
        match self {
            GatewayEvent::Ack { order_ref, .. } | GatewayEvent::Reject { order_ref, .. } => {
                Some(OrderLink::Ref(order_ref.clone()))
            }
            GatewayEvent::Trade { link, .. } | GatewayEvent::Cancelled { link } => {
                Some(link.clone())
            }
            GatewayEvent::PositionSnapshot { .. } | GatewayEvent::Disconnected { .. } => None,
        }
    }
}
