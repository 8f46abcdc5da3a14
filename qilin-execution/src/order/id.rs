use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use uuid::Uuid;

/// Process-unique order identifier, assigned at order creation and never reused.
///
/// Correlates gateway requests and callbacks with the owning
/// [`OrderFsm`](super::OrderFsm).
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct LocalOrderId(pub Uuid);

impl LocalOrderId {
    /// Generate a fresh random `LocalOrderId`.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Broker-local order reference, unique per `(front_id, session_id)`.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct OrderRef(pub SmolStr);

impl OrderRef {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Exchange-assigned order identifier, unique per exchange per trading day.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct ExchangeOrderId(pub SmolStr);

impl ExchangeOrderId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Identifier of the strategy that originated an order or decision.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct StrategyId(pub SmolStr);

impl StrategyId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }

    pub fn unknown() -> Self {
        Self::new("unknown")
    }
}
