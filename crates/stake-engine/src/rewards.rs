//! Reward Distribution Engine
//!
//! Splits realized returns into the protocol fee, the staker portion (which
//! accrues to every liquid token holder through the exchange rate) and the
//! operator portion. Operators are paid in proportion to their weight; those
//! homed on the counterpart domain are paid through `RewardCredit` messages.
//!
//! The secondary stream is a plain percentage split of each deposit and never
//! touches the ledger.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stake_types::{mul_div, Amount, Domain, ProtocolConfig, Pubkey, BASIS_POINTS, PERCENT};

use crate::error::StakeError;

/// Claimable balance streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClaimStream {
    /// Protocol fees and operator shares of validator returns
    Primary,
    /// Secondary reward token
    Secondary,
    /// Exit payouts delivered from the counterpart domain
    Exit,
}

/// An operator and its share of operator rewards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorShare {
    pub operator: Pubkey,
    /// Domain the operator is paid on
    pub home: Domain,
    /// Relative weight, usually delegated value
    pub weight: u64,
}

/// Source of the current operator set
pub trait OperatorDirectory: Send + Sync {
    fn operators(&self) -> Vec<OperatorShare>;
}

/// Operator set held in memory
#[derive(Default)]
pub struct StaticOperatorDirectory {
    operators: RwLock<Vec<OperatorShare>>,
}

impl StaticOperatorDirectory {
    pub fn new(operators: Vec<OperatorShare>) -> Self {
        Self {
            operators: RwLock::new(operators),
        }
    }

    /// Add an operator or update its weight and home
    pub fn upsert(&self, share: OperatorShare) {
        let mut operators = self.operators.write();
        match operators.iter_mut().find(|o| o.operator == share.operator) {
            Some(existing) => *existing = share,
            None => operators.push(share),
        }
    }

    pub fn remove(&self, operator: &Pubkey) -> bool {
        let mut operators = self.operators.write();
        let before = operators.len();
        operators.retain(|o| o.operator != *operator);
        operators.len() != before
    }
}

impl OperatorDirectory for StaticOperatorDirectory {
    fn operators(&self) -> Vec<OperatorShare> {
        self.operators.read().clone()
    }
}

/// Immutable record of one primary distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEpochRecord {
    pub epoch_id: u64,
    /// Oracle record whose finalization produced the return
    pub source_record: u64,
    pub gross_return: Amount,
    pub protocol_fee: Amount,
    pub staker_portion: Amount,
    pub operator_portion: Amount,
    /// Part of `operator_portion` credited on this domain
    pub local_operator_portion: Amount,
    /// Part of `operator_portion` forwarded to the counterpart
    pub cross_domain_operator_portion: Amount,
    pub created_at: u64,
}

/// A computed distribution, not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochPlan {
    pub record: RewardEpochRecord,
    pub treasury: Pubkey,
    pub local_credits: Vec<(Pubkey, Amount)>,
    pub remote_credits: Vec<(Pubkey, Amount)>,
}

/// A computed secondary split, not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryPlan {
    pub staker_recipient: Pubkey,
    pub staker_amount: Amount,
    pub operator_credits: Vec<(Pubkey, Amount)>,
}

/// Reward epochs and claimable balances for one domain
#[derive(Debug, Default)]
pub struct RewardEngine {
    epochs: Vec<RewardEpochRecord>,
    claimable: BTreeMap<(ClaimStream, Pubkey), Amount>,
}

impl RewardEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the split of a realized return
    pub fn plan_epoch(
        &self,
        source_record: u64,
        gross_return: Amount,
        config: &ProtocolConfig,
        operators: &[OperatorShare],
        local: Domain,
        height: u64,
    ) -> Result<EpochPlan, StakeError> {
        if gross_return == 0 {
            return Err(StakeError::InvalidAmount(gross_return));
        }

        let protocol_fee = mul_div(gross_return, config.fee_basis_points as Amount, BASIS_POINTS)
            .ok_or(StakeError::ArithmeticOverflow)?;
        let net = gross_return - protocol_fee;

        let operators = active_operators(operators);
        let operator_portion = if operators.is_empty() {
            0
        } else {
            mul_div(net, config.operator_share_basis_points as Amount, BASIS_POINTS)
                .ok_or(StakeError::ArithmeticOverflow)?
        };
        let staker_portion = net - operator_portion;

        let mut local_credits = Vec::new();
        let mut remote_credits = Vec::new();
        for (share, amount) in split_by_weight(operator_portion, &operators)? {
            if amount == 0 {
                continue;
            }
            if share.home == local {
                local_credits.push((share.operator, amount));
            } else {
                remote_credits.push((share.operator, amount));
            }
        }

        let local_operator_portion = local_credits.iter().map(|(_, a)| a).sum();
        let cross_domain_operator_portion = remote_credits.iter().map(|(_, a)| a).sum();

        Ok(EpochPlan {
            record: RewardEpochRecord {
                epoch_id: self.epochs.len() as u64 + 1,
                source_record,
                gross_return,
                protocol_fee,
                staker_portion,
                operator_portion,
                local_operator_portion,
                cross_domain_operator_portion,
                created_at: height,
            },
            treasury: config.treasury,
            local_credits,
            remote_credits,
        })
    }

    /// Apply the local credits of a plan and store its record. Remote credits
    /// and the staker portion are applied by the caller.
    pub fn commit_epoch(&mut self, plan: &EpochPlan) -> u64 {
        if plan.record.protocol_fee > 0 {
            self.credit(ClaimStream::Primary, plan.treasury, plan.record.protocol_fee);
        }
        for (operator, amount) in &plan.local_credits {
            self.credit(ClaimStream::Primary, *operator, *amount);
        }
        self.epochs.push(plan.record.clone());
        plan.record.epoch_id
    }

    /// Compute the fixed-percentage split of a secondary reward deposit
    pub fn plan_secondary(
        &self,
        amount: Amount,
        config: &ProtocolConfig,
        operators: &[OperatorShare],
    ) -> Result<SecondaryPlan, StakeError> {
        if amount == 0 {
            return Err(StakeError::InvalidAmount(amount));
        }

        let operators = active_operators(operators);
        let mut staker_amount = mul_div(amount, config.secondary_staker_percent as Amount, PERCENT)
            .ok_or(StakeError::ArithmeticOverflow)?;
        if operators.is_empty() {
            staker_amount = amount;
        }

        let operator_credits = split_by_weight(amount - staker_amount, &operators)?
            .into_iter()
            .filter(|(_, a)| *a > 0)
            .map(|(share, a)| (share.operator, a))
            .collect();

        Ok(SecondaryPlan {
            staker_recipient: config.secondary_staker_recipient,
            staker_amount,
            operator_credits,
        })
    }

    pub fn commit_secondary(&mut self, plan: &SecondaryPlan) {
        if plan.staker_amount > 0 {
            self.credit(ClaimStream::Secondary, plan.staker_recipient, plan.staker_amount);
        }
        for (operator, amount) in &plan.operator_credits {
            self.credit(ClaimStream::Secondary, *operator, *amount);
        }
    }

    /// Add to a claimable balance
    pub fn credit(&mut self, stream: ClaimStream, account: Pubkey, amount: Amount) {
        let balance = self.claimable.entry((stream, account)).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Take the full claimable balance
    pub fn claim(&mut self, stream: ClaimStream, account: &Pubkey) -> Result<Amount, StakeError> {
        match self.claimable.remove(&(stream, *account)) {
            Some(amount) if amount > 0 => Ok(amount),
            _ => Err(StakeError::NothingToClaim),
        }
    }

    pub fn claimable(&self, stream: ClaimStream, account: &Pubkey) -> Amount {
        self.claimable.get(&(stream, *account)).copied().unwrap_or(0)
    }

    pub fn epoch(&self, epoch_id: u64) -> Option<&RewardEpochRecord> {
        epoch_id
            .checked_sub(1)
            .and_then(|index| self.epochs.get(index as usize))
    }

    pub fn epochs(&self) -> &[RewardEpochRecord] {
        &self.epochs
    }

    pub fn claimable_balances(&self) -> &BTreeMap<(ClaimStream, Pubkey), Amount> {
        &self.claimable
    }

    pub fn restore(
        &mut self,
        epochs: Vec<RewardEpochRecord>,
        claimable: BTreeMap<(ClaimStream, Pubkey), Amount>,
    ) {
        self.epochs = epochs;
        self.claimable = claimable;
    }
}

fn active_operators(operators: &[OperatorShare]) -> Vec<&OperatorShare> {
    operators.iter().filter(|o| o.weight > 0).collect()
}

/// Split `amount` by weight. The last operator takes the rounding remainder.
fn split_by_weight<'a>(
    amount: Amount,
    operators: &[&'a OperatorShare],
) -> Result<Vec<(&'a OperatorShare, Amount)>, StakeError> {
    let total_weight: Amount = operators.iter().map(|o| o.weight as Amount).sum();
    if amount == 0 || total_weight == 0 {
        return Ok(Vec::new());
    }

    let mut remaining = amount;
    let mut shares = Vec::with_capacity(operators.len());
    for (i, share) in operators.iter().enumerate() {
        let portion = if i + 1 == operators.len() {
            remaining
        } else {
            mul_div(amount, share.weight as Amount, total_weight)
                .ok_or(StakeError::ArithmeticOverflow)?
        };
        remaining -= portion;
        shares.push((*share, portion));
    }
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(home: Domain, weight: u64) -> OperatorShare {
        OperatorShare {
            operator: Pubkey::new_unique(),
            home,
            weight,
        }
    }

    #[test]
    fn test_primary_split() {
        let engine = RewardEngine::new();
        let config = ProtocolConfig::default();
        let local = operator(Domain::L1, 3);
        let remote = operator(Domain::L2, 1);

        let plan = engine
            .plan_epoch(1, 10_000, &config, &[local.clone(), remote.clone()], Domain::L1, 5)
            .unwrap();

        // 10% fee, then 5% of the net to operators
        assert_eq!(plan.record.protocol_fee, 1_000);
        assert_eq!(plan.record.operator_portion, 450);
        assert_eq!(plan.record.staker_portion, 8_550);
        assert_eq!(plan.local_credits, vec![(local.operator, 337)]);
        assert_eq!(plan.remote_credits, vec![(remote.operator, 113)]);
        assert_eq!(
            plan.record.protocol_fee + plan.record.staker_portion + plan.record.operator_portion,
            plan.record.gross_return
        );
    }

    #[test]
    fn test_no_operators_folds_into_stakers() {
        let engine = RewardEngine::new();
        let plan = engine
            .plan_epoch(1, 1_000, &ProtocolConfig::default(), &[], Domain::L1, 0)
            .unwrap();
        assert_eq!(plan.record.operator_portion, 0);
        assert_eq!(plan.record.staker_portion, 900);
    }

    #[test]
    fn test_commit_credits_treasury_and_local_operators() {
        let mut engine = RewardEngine::new();
        let config = ProtocolConfig {
            treasury: Pubkey::new_unique(),
            ..Default::default()
        };
        let local = operator(Domain::L1, 1);

        let plan = engine
            .plan_epoch(4, 10_000, &config, &[local.clone()], Domain::L1, 0)
            .unwrap();
        assert_eq!(engine.commit_epoch(&plan), 1);

        assert_eq!(engine.claimable(ClaimStream::Primary, &config.treasury), 1_000);
        assert_eq!(engine.claimable(ClaimStream::Primary, &local.operator), 450);
        assert_eq!(engine.epoch(1).unwrap().source_record, 4);
    }

    #[test]
    fn test_secondary_split() {
        let mut engine = RewardEngine::new();
        let config = ProtocolConfig {
            secondary_staker_recipient: Pubkey::new_unique(),
            ..Default::default()
        };
        let a = operator(Domain::L2, 1);
        let b = operator(Domain::L2, 1);

        let plan = engine.plan_secondary(1_001, &config, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(plan.staker_amount, 920);
        assert_eq!(plan.operator_credits, vec![(a.operator, 40), (b.operator, 41)]);

        engine.commit_secondary(&plan);
        assert_eq!(
            engine.claimable(ClaimStream::Secondary, &config.secondary_staker_recipient),
            920
        );
    }

    #[test]
    fn test_claim_is_full_and_once() {
        let mut engine = RewardEngine::new();
        let account = Pubkey::new_unique();
        engine.credit(ClaimStream::Primary, account, 5);
        engine.credit(ClaimStream::Primary, account, 7);

        assert_eq!(engine.claim(ClaimStream::Primary, &account), Ok(12));
        assert_eq!(
            engine.claim(ClaimStream::Primary, &account),
            Err(StakeError::NothingToClaim)
        );
        // Streams are separate
        assert_eq!(
            engine.claim(ClaimStream::Secondary, &account),
            Err(StakeError::NothingToClaim)
        );
    }

    #[test]
    fn test_directory_upsert() {
        let directory = StaticOperatorDirectory::default();
        let mut share = operator(Domain::L1, 1);
        directory.upsert(share.clone());
        share.weight = 9;
        directory.upsert(share.clone());

        assert_eq!(directory.operators(), vec![share.clone()]);
        assert!(directory.remove(&share.operator));
        assert!(directory.operators().is_empty());
    }
}
