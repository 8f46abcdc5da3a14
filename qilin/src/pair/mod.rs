use crate::guardian::GuardianMode;
use fnv::FnvHashMap;
use qilin_execution::order::{id::LocalOrderId, request::OrderIntent};
use qilin_instrument::{Offset, Side, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// Identifier for one two-leg calendar-spread execution.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct PairId(pub SmolStr);

impl PairId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic leg identifier: `{pair_id}_near` or `{pair_id}_far`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct LegId(pub SmolStr);

impl LegId {
    pub fn for_role(pair_id: &PairId, role: LegRole) -> Self {
        Self(SmolStr::new(format!("{pair_id}_{role}")))
    }
}

impl std::fmt::Display for LegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRole {
    Near,
    Far,
}

impl std::fmt::Display for LegRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                LegRole::Near => "near",
                LegRole::Far => "far",
            }
        )
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Pending,
    Submitted,
    Partial,
    Filled,
    Cancelled,
    Failed,
}

/// One side of a pair execution.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Leg {
    pub leg_id: LegId,
    pub pair_id: PairId,
    pub role: LegRole,
    pub symbol: Symbol,
    pub side: Side,
    pub target_qty: i64,
    pub filled_qty: i64,
    pub avg_price: Decimal,
    pub status: LegStatus,
}

impl Leg {
    fn new(pair_id: &PairId, role: LegRole, symbol: Symbol, side: Side, target_qty: i64) -> Self {
        Self {
            leg_id: LegId::for_role(pair_id, role),
            pair_id: pair_id.clone(),
            role,
            symbol,
            side,
            target_qty,
            filled_qty: 0,
            avg_price: Decimal::ZERO,
            status: LegStatus::Pending,
        }
    }

    pub fn qty_remaining(&self) -> i64 {
        self.target_qty - self.filled_qty
    }

    fn apply_fill(&mut self, qty: i64, price: Decimal) {
        let filled = Decimal::from(self.filled_qty);
        let incoming = Decimal::from(qty);
        self.avg_price = (self.avg_price * filled + price * incoming) / (filled + incoming);
        self.filled_qty += qty;
        self.status = if self.filled_qty >= self.target_qty {
            LegStatus::Filled
        } else {
            LegStatus::Partial
        };
    }
}

/// The two legs of one pair.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PairPosition {
    pub pair_id: PairId,
    pub near: Leg,
    pub far: Leg,
}

impl PairPosition {
    /// `near.filled_qty - far.filled_qty`.
    pub fn imbalance(&self) -> i64 {
        self.near.filled_qty - self.far.filled_qty
    }
}

/// Imbalance measurement for one pair.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ImbalanceReport {
    pub pair_id: PairId,
    pub imbalance: i64,
    pub is_imbalanced: bool,
}

/// Corrective order suggestion; the executor prices it from the live quote at submission.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct HedgeOrder {
    pub pair_id: PairId,
    pub leg_id: LegId,
    pub symbol: Symbol,
    pub side: Side,
    pub offset: Offset,
    pub qty: i64,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum PairError {
    #[error("unknown pair: {0}")]
    UnknownPair(PairId),

    #[error("unknown leg: {0}")]
    UnknownLeg(LegId),

    #[error("pair {0} already exists")]
    DuplicatePair(PairId),
}

/// Pair legs, imbalance detection and hedge-order synthesis.
#[derive(Debug, Clone)]
pub struct LegManager {
    pairs: FnvHashMap<PairId, PairPosition>,
    imbalance_threshold: i64,
}

impl LegManager {
    pub fn new(imbalance_threshold: i64) -> Self {
        Self {
            pairs: FnvHashMap::default(),
            imbalance_threshold,
        }
    }

    /// Create the two legs of a pair with deterministic leg ids.
    pub fn create_pair(
        &mut self,
        pair_id: PairId,
        near_symbol: Symbol,
        far_symbol: Symbol,
        near_side: Side,
        far_side: Side,
        qty: i64,
    ) -> Result<&PairPosition, PairError> {
        if self.pairs.contains_key(&pair_id) {
            return Err(PairError::DuplicatePair(pair_id));
        }

        let pair = PairPosition {
            near: Leg::new(&pair_id, LegRole::Near, near_symbol, near_side, qty),
            far: Leg::new(&pair_id, LegRole::Far, far_symbol, far_side, qty),
            pair_id: pair_id.clone(),
        };

        Ok(self.pairs.entry(pair_id).or_insert(pair))
    }

    pub fn pair(&self, pair_id: &PairId) -> Result<&PairPosition, PairError> {
        self.pairs
            .get(pair_id)
            .ok_or_else(|| PairError::UnknownPair(pair_id.clone()))
    }

    fn leg_mut(&mut self, leg_id: &LegId) -> Result<&mut Leg, PairError> {
        self.pairs
            .values_mut()
            .find_map(|pair| {
                if pair.near.leg_id == *leg_id {
                    Some(&mut pair.near)
                } else if pair.far.leg_id == *leg_id {
                    Some(&mut pair.far)
                } else {
                    None
                }
            })
            .ok_or_else(|| PairError::UnknownLeg(leg_id.clone()))
    }

    /// True if some pair owns the leg.
    pub fn contains_leg(&self, leg_id: &LegId) -> bool {
        self.pairs
            .values()
            .any(|pair| pair.near.leg_id == *leg_id || pair.far.leg_id == *leg_id)
    }

    /// Mark a leg submitted.
    pub fn mark_submitted(&mut self, leg_id: &LegId) -> Result<(), PairError> {
        self.leg_mut(leg_id)?.status = LegStatus::Submitted;
        Ok(())
    }

    /// Mark a leg cancelled or failed.
    pub fn mark_status(&mut self, leg_id: &LegId, status: LegStatus) -> Result<(), PairError> {
        self.leg_mut(leg_id)?.status = status;
        Ok(())
    }

    /// Apply a fill to a leg, updating filled quantity, weighted average price and status.
    pub fn update_leg(
        &mut self,
        leg_id: &LegId,
        qty: i64,
        price: Decimal,
    ) -> Result<LegStatus, PairError> {
        let leg = self.leg_mut(leg_id)?;
        leg.apply_fill(qty, price);
        Ok(leg.status)
    }

    /// Apply a reducing fill (a corrective close on an over-filled leg), shrinking the filled
    /// quantity.
    pub fn reduce_leg(&mut self, leg_id: &LegId, qty: i64) -> Result<LegStatus, PairError> {
        let leg = self.leg_mut(leg_id)?;
        leg.filled_qty = (leg.filled_qty - qty).max(0);
        leg.status = if leg.filled_qty >= leg.target_qty {
            LegStatus::Filled
        } else if leg.filled_qty > 0 {
            LegStatus::Partial
        } else {
            LegStatus::Pending
        };
        Ok(leg.status)
    }

    /// Current imbalance for a pair.
    pub fn check_imbalance(&self, pair_id: &PairId) -> Result<ImbalanceReport, PairError> {
        let pair = self.pair(pair_id)?;
        let imbalance = pair.imbalance();
        Ok(ImbalanceReport {
            pair_id: pair_id.clone(),
            imbalance,
            is_imbalanced: imbalance.abs() > self.imbalance_threshold,
        })
    }

    /// Imbalance per pair, for the guardian snapshot. Ordered iteration.
    pub fn imbalances(&self) -> BTreeMap<SmolStr, i64> {
        self.pairs
            .iter()
            .map(|(pair_id, pair)| (pair_id.0.clone(), pair.imbalance()))
            .collect()
    }

    /// Synthesise a corrective order on whichever leg is behind, or `None` when balanced.
    pub fn get_hedge_order(&self, pair_id: &PairId) -> Result<Option<HedgeOrder>, PairError> {
        let pair = self.pair(pair_id)?;
        let imbalance = pair.imbalance();
        if imbalance == 0 {
            return Ok(None);
        }

        // The lagging leg catches up to the leader
        let lagging = if imbalance > 0 { &pair.far } else { &pair.near };
        Ok(Some(HedgeOrder {
            pair_id: pair_id.clone(),
            leg_id: lagging.leg_id.clone(),
            symbol: lagging.symbol.clone(),
            side: lagging.side,
            offset: Offset::Open,
            qty: imbalance.abs(),
        }))
    }
}

/// Orchestrates the two legs of a pair through the order layer.
///
/// References orders by [`LocalOrderId`] only; the order FSMs own their contexts.
#[derive(Debug, Clone)]
pub struct PairExecutor {
    legs: LegManager,
    order_legs: FnvHashMap<LocalOrderId, LegId>,
    reducing_orders: fnv::FnvHashSet<LocalOrderId>,
    pending_hedges: FnvHashMap<PairId, LocalOrderId>,
}

impl PairExecutor {
    pub fn new(imbalance_threshold: i64) -> Self {
        Self {
            legs: LegManager::new(imbalance_threshold),
            order_legs: FnvHashMap::default(),
            reducing_orders: fnv::FnvHashSet::default(),
            pending_hedges: FnvHashMap::default(),
        }
    }

    pub fn legs(&self) -> &LegManager {
        &self.legs
    }

    /// Pair ids in deterministic order.
    pub fn pair_ids(&self) -> Vec<PairId> {
        let mut ids: Vec<PairId> = self.legs.pairs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The in-flight corrective order for a pair, if one was issued.
    pub fn pending_hedge(&self, pair_id: &PairId) -> Option<LocalOrderId> {
        self.pending_hedges.get(pair_id).copied()
    }

    /// Record an issued corrective order so the next tick does not duplicate it.
    pub fn set_pending_hedge(&mut self, pair_id: PairId, local_id: LocalOrderId) {
        self.pending_hedges.insert(pair_id, local_id);
    }

    /// Clear the hedge guard, eg/ when its order reached a terminal state.
    pub fn clear_pending_hedge(&mut self, pair_id: &PairId) {
        self.pending_hedges.remove(pair_id);
    }

    /// Create a pair and produce the two submit intents, both priced by the caller's quotes.
    pub fn start_pair(
        &mut self,
        pair_id: PairId,
        near_symbol: Symbol,
        far_symbol: Symbol,
        near_side: Side,
        far_side: Side,
        qty: i64,
        near_price: Decimal,
        far_price: Decimal,
    ) -> Result<Vec<(LegId, OrderIntent)>, PairError> {
        let pair = self.legs.create_pair(
            pair_id,
            near_symbol.clone(),
            far_symbol.clone(),
            near_side,
            far_side,
            qty,
        )?;
        let near_leg = pair.near.leg_id.clone();
        let far_leg = pair.far.leg_id.clone();

        Ok(vec![
            (
                near_leg,
                OrderIntent::new(near_symbol, near_side, Offset::Open, qty, near_price),
            ),
            (
                far_leg,
                OrderIntent::new(far_symbol, far_side, Offset::Open, qty, far_price),
            ),
        ])
    }

    /// Associate a submitted order with its leg and mark the leg submitted.
    pub fn bind_order(&mut self, local_id: LocalOrderId, leg_id: LegId) -> Result<(), PairError> {
        self.legs.mark_submitted(&leg_id)?;
        self.order_legs.insert(local_id, leg_id);
        Ok(())
    }

    /// Associate a corrective close order with the leg it reduces.
    ///
    /// Unlike [`Self::bind_order`] this leaves the leg status untouched at submission.
    pub fn bind_reduction(
        &mut self,
        local_id: LocalOrderId,
        leg_id: LegId,
    ) -> Result<(), PairError> {
        if !self.legs.contains_leg(&leg_id) {
            return Err(PairError::UnknownLeg(leg_id));
        }
        self.order_legs.insert(local_id, leg_id);
        self.reducing_orders.insert(local_id);
        Ok(())
    }

    /// Route a fill on a bound order to its leg. Unknown orders are not pair legs.
    pub fn on_fill(
        &mut self,
        local_id: LocalOrderId,
        qty: i64,
        price: Decimal,
    ) -> Result<Option<LegStatus>, PairError> {
        let Some(leg_id) = self.order_legs.get(&local_id).cloned() else {
            return Ok(None);
        };
        let status = if self.reducing_orders.contains(&local_id) {
            self.legs.reduce_leg(&leg_id, qty)?
        } else {
            self.legs.update_leg(&leg_id, qty, price)?
        };
        info!(%leg_id, qty, %price, ?status, "pair leg fill applied");
        Ok(Some(status))
    }

    /// Suggest the corrective order for an imbalanced pair, gated by guardian mode.
    ///
    /// * `Running`: the lagging leg is opened up to the leader (increases exposure).
    /// * `ReduceOnly`: opening is not permitted; the excess on the leading leg is closed
    ///   instead, which reduces exposure.
    /// * `Init` / `Halted` / `Manual`: no corrective orders at all.
    pub fn hedge_suggestion(
        &self,
        pair_id: &PairId,
        mode: GuardianMode,
    ) -> Result<Option<HedgeOrder>, PairError> {
        let report = self.legs.check_imbalance(pair_id)?;
        if !report.is_imbalanced {
            return Ok(None);
        }

        match mode {
            GuardianMode::Running => self.legs.get_hedge_order(pair_id),
            GuardianMode::ReduceOnly => {
                let pair = self.legs.pair(pair_id)?;
                let leading = if report.imbalance > 0 {
                    &pair.near
                } else {
                    &pair.far
                };
                Ok(Some(HedgeOrder {
                    pair_id: pair_id.clone(),
                    leg_id: leading.leg_id.clone(),
                    symbol: leading.symbol.clone(),
                    side: leading.side.inverse(),
                    offset: Offset::Close,
                    qty: report.imbalance.abs(),
                }))
            }
            GuardianMode::Init | GuardianMode::Halted | GuardianMode::Manual => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn executor_with_pair(threshold: i64) -> (PairExecutor, PairId) {
        let mut executor = PairExecutor::new(threshold);
        let pair_id = PairId::new("rb_cal_01");
        executor
            .start_pair(
                pair_id.clone(),
                Symbol::new("rb2501"),
                Symbol::new("rb2505"),
                Side::Buy,
                Side::Sell,
                10,
                dec!(3500),
                dec!(3550),
            )
            .unwrap();
        (executor, pair_id)
    }

    #[test]
    fn test_deterministic_leg_ids() {
        let (executor, pair_id) = executor_with_pair(2);
        let pair = executor.legs().pair(&pair_id).unwrap();

        assert_eq!(pair.near.leg_id.0, "rb_cal_01_near");
        assert_eq!(pair.far.leg_id.0, "rb_cal_01_far");
        assert_eq!(pair.near.side, Side::Buy);
        assert_eq!(pair.far.side, Side::Sell);
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let (mut executor, pair_id) = executor_with_pair(2);
        let result = executor.start_pair(
            pair_id,
            Symbol::new("rb2501"),
            Symbol::new("rb2505"),
            Side::Buy,
            Side::Sell,
            10,
            dec!(3500),
            dec!(3550),
        );
        assert!(matches!(result, Err(PairError::DuplicatePair(_))));
    }

    #[test]
    fn test_leg_fill_accumulates_weighted_avg() {
        let (mut executor, pair_id) = executor_with_pair(2);
        let near_leg = LegId::for_role(&pair_id, LegRole::Near);
        let near_order = LocalOrderId::random();
        executor.bind_order(near_order, near_leg).unwrap();

        assert_eq!(
            executor.on_fill(near_order, 4, dec!(3500)).unwrap(),
            Some(LegStatus::Partial)
        );
        assert_eq!(
            executor.on_fill(near_order, 6, dec!(3510)).unwrap(),
            Some(LegStatus::Filled)
        );

        let pair = executor.legs().pair(&pair_id).unwrap();
        assert_eq!(pair.near.filled_qty, 10);
        assert_eq!(pair.near.avg_price, dec!(3506));
    }

    #[test]
    fn test_imbalance_detection() {
        let (mut executor, pair_id) = executor_with_pair(2);
        let near_order = LocalOrderId::random();
        executor
            .bind_order(near_order, LegId::for_role(&pair_id, LegRole::Near))
            .unwrap();

        executor.on_fill(near_order, 2, dec!(3500)).unwrap();
        let report = executor.legs().check_imbalance(&pair_id).unwrap();
        assert_eq!(report.imbalance, 2);
        assert!(!report.is_imbalanced);

        executor.on_fill(near_order, 3, dec!(3500)).unwrap();
        let report = executor.legs().check_imbalance(&pair_id).unwrap();
        assert_eq!(report.imbalance, 5);
        assert!(report.is_imbalanced);
    }

    #[test]
    fn test_hedge_opens_lagging_leg_when_running() {
        let (mut executor, pair_id) = executor_with_pair(2);
        let near_order = LocalOrderId::random();
        executor
            .bind_order(near_order, LegId::for_role(&pair_id, LegRole::Near))
            .unwrap();
        executor.on_fill(near_order, 5, dec!(3500)).unwrap();

        let hedge = executor
            .hedge_suggestion(&pair_id, GuardianMode::Running)
            .unwrap()
            .unwrap();
        assert_eq!(hedge.leg_id, LegId::for_role(&pair_id, LegRole::Far));
        assert_eq!(hedge.symbol, Symbol::new("rb2505"));
        assert_eq!(hedge.side, Side::Sell);
        assert_eq!(hedge.offset, Offset::Open);
        assert_eq!(hedge.qty, 5);
    }

    #[test]
    fn test_hedge_closes_leading_leg_when_reduce_only() {
        let (mut executor, pair_id) = executor_with_pair(2);
        let near_order = LocalOrderId::random();
        executor
            .bind_order(near_order, LegId::for_role(&pair_id, LegRole::Near))
            .unwrap();
        executor.on_fill(near_order, 5, dec!(3500)).unwrap();

        let hedge = executor
            .hedge_suggestion(&pair_id, GuardianMode::ReduceOnly)
            .unwrap()
            .unwrap();
        // Leading near leg (long) is reduced, never the lagging leg opened
        assert_eq!(hedge.leg_id, LegId::for_role(&pair_id, LegRole::Near));
        assert_eq!(hedge.side, Side::Sell);
        assert_eq!(hedge.offset, Offset::Close);
        assert_eq!(hedge.qty, 5);
    }

    #[test]
    fn test_no_hedge_when_halted_or_balanced() {
        let (mut executor, pair_id) = executor_with_pair(2);

        // Balanced pair: nothing to do in any mode
        assert!(
            executor
                .hedge_suggestion(&pair_id, GuardianMode::Running)
                .unwrap()
                .is_none()
        );

        let near_order = LocalOrderId::random();
        executor
            .bind_order(near_order, LegId::for_role(&pair_id, LegRole::Near))
            .unwrap();
        executor.on_fill(near_order, 5, dec!(3500)).unwrap();

        assert!(
            executor
                .hedge_suggestion(&pair_id, GuardianMode::Halted)
                .unwrap()
                .is_none()
        );
    }
}
