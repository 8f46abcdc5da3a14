use crate::{
    error::ExecutionError,
    order::id::{ExchangeOrderId, LocalOrderId, OrderRef},
};
use chrono::{DateTime, Utc};
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod id;
pub mod registry;
pub mod request;

/// Lifecycle state of a single order.
///
/// Terminal states ({Filled, Cancelled, Rejected, Error}) admit no further transitions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    PendingNew,
    Submitted,
    Acked,
    Partial,
    Filled,
    PendingCancel,
    Cancelled,
    Rejected,
    Error,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Error
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingNew => "PENDING_NEW",
            OrderState::Submitted => "SUBMITTED",
            OrderState::Acked => "ACKED",
            OrderState::Partial => "PARTIAL",
            OrderState::Filled => "FILLED",
            OrderState::PendingCancel => "PENDING_CANCEL",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Rejected => "REJECTED",
            OrderState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input event driving the per-order state machine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderInput {
    Submit,
    Ack {
        order_ref: OrderRef,
        exchange_id: ExchangeOrderId,
        front_id: i64,
        session_id: i64,
    },
    Reject {
        code: i64,
        message: String,
    },
    PartialFill {
        qty: i64,
        price: Decimal,
    },
    FullFill {
        qty: i64,
        price: Decimal,
    },
    CancelRequest,
    Cancelled,
    AckTimeout,
    FillTimeout,
    CancelTimeout,
}

impl OrderInput {
    pub fn name(&self) -> &'static str {
        match self {
            OrderInput::Submit => "submit",
            OrderInput::Ack { .. } => "ack",
            OrderInput::Reject { .. } => "reject",
            OrderInput::PartialFill { .. } => "partial_fill",
            OrderInput::FullFill { .. } => "full_fill",
            OrderInput::CancelRequest => "cancel_request",
            OrderInput::Cancelled => "cancelled",
            OrderInput::AckTimeout => "ack_timeout",
            OrderInput::FillTimeout => "fill_timeout",
            OrderInput::CancelTimeout => "cancel_timeout",
        }
    }
}

/// Mutable per-order bookkeeping owned by the [`OrderFsm`].
///
/// Broker/exchange identifiers are absent at creation and populated by gateway ACK callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderContext {
    pub local_id: LocalOrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub offset: Offset,
    pub qty: i64,
    pub price: Decimal,
    pub order_ref: Option<OrderRef>,
    pub exchange_id: Option<ExchangeOrderId>,
    pub front_id: Option<i64>,
    pub session_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub filled_qty: i64,
    pub avg_fill_price: Decimal,
    pub last_update: DateTime<Utc>,
}

impl OrderContext {
    pub fn new(
        local_id: LocalOrderId,
        symbol: Symbol,
        side: Side,
        offset: Offset,
        qty: i64,
        price: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local_id,
            symbol,
            side,
            offset,
            qty,
            price,
            order_ref: None,
            exchange_id: None,
            front_id: None,
            session_id: None,
            created_at,
            filled_qty: 0,
            avg_fill_price: Decimal::ZERO,
            last_update: created_at,
        }
    }

    pub fn qty_remaining(&self) -> i64 {
        self.qty - self.filled_qty
    }

    /// Accumulate a fill, maintaining the volume-weighted average fill price.
    fn apply_fill(&mut self, qty: i64, price: Decimal) {
        let filled = Decimal::from(self.filled_qty);
        let incoming = Decimal::from(qty);
        self.avg_fill_price =
            (self.avg_fill_price * filled + price * incoming) / (filled + incoming);
        self.filled_qty += qty;
    }
}

/// Record of one applied state transition, reported to the audit log.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderTransition {
    pub local_id: LocalOrderId,
    pub prev: OrderState,
    pub next: OrderState,
    pub input: String,
}

impl OrderTransition {
    /// True if the input was accepted but produced no state change (eg/ a signalled
    /// `fill_timeout` while `Partial`).
    pub fn is_noop(&self) -> bool {
        self.prev == self.next
    }
}

/// Per-order state machine.
///
/// Exclusively owns its [`OrderContext`]; the registry and pair executor reference orders by
/// [`LocalOrderId`] only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderFsm {
    ctx: OrderContext,
    state: OrderState,
}

impl OrderFsm {
    /// Create a new order in `PendingNew`, ready for a `Submit` input.
    pub fn new(ctx: OrderContext) -> Self {
        Self {
            ctx,
            state: OrderState::PendingNew,
        }
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn ctx(&self) -> &OrderContext {
        &self.ctx
    }

    pub fn local_id(&self) -> LocalOrderId {
        self.ctx.local_id
    }

    /// Apply an input event, returning the transition or failing with
    /// [`ExecutionError::InvalidTransition`].
    ///
    /// Invariant preserved: `filled_qty <= qty`; a fill that would overflow the order quantity
    /// is rejected without mutating state.
    pub fn apply(
        &mut self,
        input: OrderInput,
        now: DateTime<Utc>,
    ) -> Result<OrderTransition, ExecutionError> {
        let prev = self.state;

        let next = match (self.state, &input) {
            (OrderState::PendingNew, OrderInput::Submit) => OrderState::Submitted,

            (
                OrderState::Submitted,
                OrderInput::Ack {
                    order_ref,
                    exchange_id,
                    front_id,
                    session_id,
                },
            ) => {
                self.ctx.order_ref = Some(order_ref.clone());
                self.ctx.exchange_id = Some(exchange_id.clone());
                self.ctx.front_id = Some(*front_id);
                self.ctx.session_id = Some(*session_id);
                OrderState::Acked
            }
            (OrderState::Submitted, OrderInput::Reject { .. }) => OrderState::Rejected,
            (OrderState::Submitted, OrderInput::AckTimeout) => OrderState::Error,

            (
                OrderState::Acked | OrderState::Partial | OrderState::PendingCancel,
                OrderInput::PartialFill { qty, price },
            ) => {
                self.checked_fill(*qty, *price)?;
                if self.ctx.qty_remaining() == 0 {
                    OrderState::Filled
                } else {
                    OrderState::Partial
                }
            }
            (
                OrderState::Acked | OrderState::Partial | OrderState::PendingCancel,
                OrderInput::FullFill { qty, price },
            ) => {
                self.checked_fill(*qty, *price)?;
                OrderState::Filled
            }

            (OrderState::Acked | OrderState::Partial, OrderInput::CancelRequest) => {
                OrderState::PendingCancel
            }

            // fill_timeout is signalled without a transition while fills may still arrive
            (OrderState::Partial | OrderState::PendingCancel, OrderInput::FillTimeout) => prev,

            (OrderState::PendingCancel, OrderInput::Cancelled) => OrderState::Cancelled,
            (OrderState::PendingCancel, OrderInput::CancelTimeout) => OrderState::Error,

            (state, input) => {
                return Err(ExecutionError::InvalidTransition {
                    state,
                    input: input.name().to_string(),
                });
            }
        };

        self.state = next;
        self.ctx.last_update = now;

        Ok(OrderTransition {
            local_id: self.ctx.local_id,
            prev,
            next,
            input: input.name().to_string(),
        })
    }

    fn checked_fill(&mut self, qty: i64, price: Decimal) -> Result<(), ExecutionError> {
        if qty <= 0 || self.ctx.filled_qty + qty > self.ctx.qty {
            return Err(ExecutionError::FillExceedsQuantity {
                local_id: self.ctx.local_id,
                qty: self.ctx.qty,
                filled: self.ctx.filled_qty,
                fill: qty,
            });
        }
        self.ctx.apply_fill(qty, price);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fsm(qty: i64) -> OrderFsm {
        OrderFsm::new(OrderContext::new(
            LocalOrderId::random(),
            Symbol::new("rb2501"),
            Side::Buy,
            Offset::Open,
            qty,
            dec!(3500),
            DateTime::<Utc>::MIN_UTC,
        ))
    }

    fn ack() -> OrderInput {
        OrderInput::Ack {
            order_ref: OrderRef::new("1"),
            exchange_id: ExchangeOrderId::new("E1"),
            front_id: 1,
            session_id: 100,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC
    }

    #[test]
    fn test_order_fsm_transitions() {
        struct TestCase {
            name: &'static str,
            inputs: Vec<OrderInput>,
            expected: OrderState,
        }

        let cases = vec![
            TestCase {
                name: "submit then ack",
                inputs: vec![OrderInput::Submit, ack()],
                expected: OrderState::Acked,
            },
            TestCase {
                name: "reject after submit",
                inputs: vec![
                    OrderInput::Submit,
                    OrderInput::Reject {
                        code: 22,
                        message: "insufficient margin".to_string(),
                    },
                ],
                expected: OrderState::Rejected,
            },
            TestCase {
                name: "ack timeout errors the order",
                inputs: vec![OrderInput::Submit, OrderInput::AckTimeout],
                expected: OrderState::Error,
            },
            TestCase {
                name: "partial then full fill",
                inputs: vec![
                    OrderInput::Submit,
                    ack(),
                    OrderInput::PartialFill {
                        qty: 4,
                        price: dec!(3500),
                    },
                    OrderInput::FullFill {
                        qty: 6,
                        price: dec!(3501),
                    },
                ],
                expected: OrderState::Filled,
            },
            TestCase {
                name: "partial fills accumulating to qty promote to filled",
                inputs: vec![
                    OrderInput::Submit,
                    ack(),
                    OrderInput::PartialFill {
                        qty: 4,
                        price: dec!(3500),
                    },
                    OrderInput::PartialFill {
                        qty: 6,
                        price: dec!(3500),
                    },
                ],
                expected: OrderState::Filled,
            },
            TestCase {
                name: "cancel while partial",
                inputs: vec![
                    OrderInput::Submit,
                    ack(),
                    OrderInput::PartialFill {
                        qty: 4,
                        price: dec!(3500),
                    },
                    OrderInput::CancelRequest,
                    OrderInput::Cancelled,
                ],
                expected: OrderState::Cancelled,
            },
            TestCase {
                name: "fill arrives while cancel in flight",
                inputs: vec![
                    OrderInput::Submit,
                    ack(),
                    OrderInput::CancelRequest,
                    OrderInput::PartialFill {
                        qty: 10,
                        price: dec!(3500),
                    },
                ],
                expected: OrderState::Filled,
            },
            TestCase {
                name: "cancel timeout errors the order",
                inputs: vec![
                    OrderInput::Submit,
                    ack(),
                    OrderInput::CancelRequest,
                    OrderInput::CancelTimeout,
                ],
                expected: OrderState::Error,
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let mut fsm = fsm(10);
            for input in &test.inputs {
                fsm.apply(input.clone(), now()).unwrap();
            }
            assert_eq!(
                fsm.state(),
                test.expected,
                "TC{index} ({}) failed",
                test.name
            );
        }
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        struct TestCase {
            name: &'static str,
            setup: Vec<OrderInput>,
            invalid: OrderInput,
        }

        let cases = vec![
            TestCase {
                name: "fill before ack",
                setup: vec![OrderInput::Submit],
                invalid: OrderInput::PartialFill {
                    qty: 1,
                    price: dec!(3500),
                },
            },
            TestCase {
                name: "ack before submit",
                setup: vec![],
                invalid: ack(),
            },
            TestCase {
                name: "terminal state admits nothing",
                setup: vec![
                    OrderInput::Submit,
                    OrderInput::Reject {
                        code: 1,
                        message: "no".to_string(),
                    },
                ],
                invalid: OrderInput::Submit,
            },
            TestCase {
                name: "cancel before ack",
                setup: vec![OrderInput::Submit],
                invalid: OrderInput::CancelRequest,
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let mut fsm = fsm(10);
            for input in &test.setup {
                fsm.apply(input.clone(), now()).unwrap();
            }
            let state_before = fsm.state();
            let result = fsm.apply(test.invalid.clone(), now());
            assert!(
                matches!(result, Err(ExecutionError::InvalidTransition { .. })),
                "TC{index} ({}) expected InvalidTransition, got {result:?}",
                test.name
            );
            assert_eq!(
                fsm.state(),
                state_before,
                "TC{index} ({}) mutated state on invalid input",
                test.name
            );
        }
    }

    #[test]
    fn test_fill_overflow_rejected_without_mutation() {
        let mut fsm = fsm(10);
        fsm.apply(OrderInput::Submit, now()).unwrap();
        fsm.apply(ack(), now()).unwrap();
        fsm.apply(
            OrderInput::PartialFill {
                qty: 8,
                price: dec!(3500),
            },
            now(),
        )
        .unwrap();

        let result = fsm.apply(
            OrderInput::PartialFill {
                qty: 5,
                price: dec!(3500),
            },
            now(),
        );
        assert!(matches!(
            result,
            Err(ExecutionError::FillExceedsQuantity { .. })
        ));
        assert_eq!(fsm.ctx().filled_qty, 8);
        assert_eq!(fsm.state(), OrderState::Partial);
    }

    #[test]
    fn test_weighted_avg_fill_price() {
        let mut fsm = fsm(10);
        fsm.apply(OrderInput::Submit, now()).unwrap();
        fsm.apply(ack(), now()).unwrap();
        fsm.apply(
            OrderInput::PartialFill {
                qty: 4,
                price: dec!(3500),
            },
            now(),
        )
        .unwrap();
        fsm.apply(
            OrderInput::FullFill {
                qty: 6,
                price: dec!(3510),
            },
            now(),
        )
        .unwrap();

        assert_eq!(fsm.ctx().filled_qty, 10);
        assert_eq!(fsm.ctx().avg_fill_price, dec!(3506));
    }

    #[test]
    fn test_fill_timeout_signalled_without_transition() {
        let mut fsm = fsm(10);
        fsm.apply(OrderInput::Submit, now()).unwrap();
        fsm.apply(ack(), now()).unwrap();
        fsm.apply(
            OrderInput::PartialFill {
                qty: 2,
                price: dec!(3500),
            },
            now(),
        )
        .unwrap();

        let transition = fsm.apply(OrderInput::FillTimeout, now()).unwrap();
        assert!(transition.is_noop());
        assert_eq!(fsm.state(), OrderState::Partial);
    }
}
