//! Oracle Validation Pipeline
//!
//! Admits validator balance snapshots in three stages:
//!
//! 1. Integrity: authorized submitter, strictly increasing sequence, no
//!    record still awaiting resolution. Failure rejects the call outright.
//! 2. Sanity: the implied change since the last finalized snapshot must stay
//!    inside the configured bounds. Failure holds the record as `Pending` for
//!    an admin and pauses the engine.
//! 3. Finality: an `Accepted` record becomes `Finalized` once its block is
//!    irreversible on the origin chain. Only then does value move.
//!
//! Preparing and committing a finalization are separate steps so the engine
//! can validate every downstream effect before anything changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stake_types::{Amount, BlockReference, ProtocolConfig, Pubkey, BASIS_POINTS};

use crate::error::StakeError;

/// Origin chain headers kept for reorg detection
const MAX_TRACKED_HEADERS: usize = 4_096;

/// Lifecycle of a submitted snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Rejected,
    Pending,
    Accepted,
    Finalized,
}

/// Snapshot as submitted by an oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleReport {
    /// Total validator balance at `block_reference`
    pub reported_balance: Amount,
    pub block_reference: BlockReference,
    pub sequence_number: u64,
}

/// A stored snapshot and its disposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStateRecord {
    pub id: u64,
    pub reported_balance: Amount,
    pub block_reference: BlockReference,
    pub sequence_number: u64,
    pub submitter: Pubkey,
    pub status: RecordStatus,
    /// Change implied against the last finalized snapshot plus principal moves
    pub delta: i128,
    /// Net principal moved into validators before this snapshot was taken
    pub principal_at_submit: i128,
    /// Local height at submission
    pub submitted_at: u64,
    /// Local height of the last status change
    pub updated_at: u64,
}

/// Result of a submission that passed integrity checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub record_id: u64,
    pub status: RecordStatus,
    pub delta: i128,
    /// Set when the record was held for failing the sanity bound
    pub sanity_violation: Option<String>,
}

/// Result of an admin approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveOutcome {
    pub status: RecordStatus,
    /// Older accepted record rejected in favor of the approved one
    pub superseded: Option<u64>,
}

/// Finality of an origin chain block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finality {
    Final,
    NotYet,
    /// The block is no longer on the canonical chain
    Orphaned,
}

/// What finalizing a record will do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizePlan {
    Finalize {
        record_id: u64,
        /// Positive change after repaying carried losses
        realized_return: Amount,
        /// Carried losses after this record
        unrecovered_loss: Amount,
    },
    /// The record's block was reorged out; reject it
    Orphan { record_id: u64 },
}

/// Local view of the origin chain used for finality decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginChainView {
    /// Canonical hash per observed height
    canonical: BTreeMap<u64, [u8; 32]>,
    /// Highest observed height
    tip: u64,
    /// Height attested final by an external source
    attested_finalized: u64,
}

impl OriginChainView {
    /// Record a canonical header. A different hash at a known height is a
    /// reorg: headers from that height up are replaced.
    pub fn observe_block(&mut self, height: u64, hash: [u8; 32]) {
        match self.canonical.get(&height) {
            Some(existing) if *existing != hash => {
                tracing::warn!("Origin chain reorg detected at height {}", height);
                self.canonical.split_off(&height);
                self.canonical.insert(height, hash);
                self.tip = height;
            }
            _ => {
                self.canonical.insert(height, hash);
                self.tip = self.tip.max(height);
            }
        }

        while self.canonical.len() > MAX_TRACKED_HEADERS {
            self.canonical.pop_first();
        }
    }

    /// Record externally attested finality. Never moves backwards.
    pub fn attest_finalized(&mut self, height: u64) {
        self.attested_finalized = self.attested_finalized.max(height);
    }

    /// Decide finality by attestation or confirmation depth
    pub fn finality(&self, block: &BlockReference, confirmation_depth: u64) -> Finality {
        let known = self.canonical.get(&block.height);
        if matches!(known, Some(hash) if *hash != block.hash) {
            return Finality::Orphaned;
        }
        if block.height <= self.attested_finalized {
            return Finality::Final;
        }
        let deep_enough = self.tip >= block.height.saturating_add(confirmation_depth);
        if deep_enough && known.is_some() {
            return Finality::Final;
        }
        Finality::NotYet
    }

    pub fn tip(&self) -> u64 {
        self.tip
    }

    pub fn attested_finalized(&self) -> u64 {
        self.attested_finalized
    }
}

/// Last finalized snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedSnapshot {
    pub record_id: u64,
    pub sequence_number: u64,
    pub balance: Amount,
}

/// Accounting that is not derivable from the record table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleAccounting {
    /// Principal moved into (+) or out of (-) validators since the last
    /// finalized snapshot
    pub net_principal: i128,
    /// Losses not yet earned back
    pub unrecovered_loss: Amount,
    pub chain: OriginChainView,
}

/// Oracle pipeline for one submission stream
#[derive(Debug, Default)]
pub struct OraclePipeline {
    /// Every record that passed integrity checks (append-only)
    records: Vec<ValidatorStateRecord>,
    /// Highest sequence number stored
    stream_head: Option<u64>,
    last_finalized: Option<FinalizedSnapshot>,
    /// Record that is Accepted but not yet finalized
    accepted: Option<u64>,
    /// Record held Pending for admin disposition
    held: Option<u64>,
    accounting: OracleAccounting,
}

impl OraclePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value the next snapshot is compared against
    fn baseline(&self) -> i128 {
        let finalized = self.last_finalized.map(|s| s.balance).unwrap_or(0) as i128;
        finalized + self.accounting.net_principal
    }

    /// Admit a snapshot. The caller has already checked authorization.
    pub fn submit(
        &mut self,
        report: OracleReport,
        submitter: Pubkey,
        config: &ProtocolConfig,
        height: u64,
    ) -> Result<SubmitOutcome, StakeError> {
        if let Some(head) = self.stream_head {
            if report.sequence_number <= head {
                return Err(StakeError::NonMonotonicSequence {
                    got: report.sequence_number,
                    head,
                });
            }
        }
        if let Some(id) = self.held {
            return Err(StakeError::OutstandingRecord(id));
        }

        let reported =
            i128::try_from(report.reported_balance).map_err(|_| StakeError::ArithmeticOverflow)?;
        let baseline = self.baseline();
        let delta = reported - baseline;

        // Out of bound snapshots are held even beside an accepted record
        let sanity_violation = check_sanity(delta, baseline, config).err();
        let status = match (&sanity_violation, self.accepted) {
            (Some(_), _) => RecordStatus::Pending,
            (None, Some(id)) => return Err(StakeError::OutstandingRecord(id)),
            (None, None) => RecordStatus::Accepted,
        };

        let id = self.records.len() as u64 + 1;
        self.records.push(ValidatorStateRecord {
            id,
            reported_balance: report.reported_balance,
            block_reference: report.block_reference,
            sequence_number: report.sequence_number,
            submitter,
            status,
            delta,
            principal_at_submit: self.accounting.net_principal,
            submitted_at: height,
            updated_at: height,
        });
        self.stream_head = Some(report.sequence_number);
        match status {
            RecordStatus::Pending => self.held = Some(id),
            _ => self.accepted = Some(id),
        }

        Ok(SubmitOutcome {
            record_id: id,
            status,
            delta,
            sanity_violation: sanity_violation.map(|e| e.to_string()),
        })
    }

    /// Admin: move a held record to `Accepted`. An older accepted record
    /// that has not been finalized is superseded and rejected. Repeating on
    /// an accepted or finalized record is a no-op.
    pub fn approve(&mut self, id: u64, height: u64) -> Result<ApproveOutcome, StakeError> {
        let status = self.record(id).ok_or(StakeError::UnknownRecord(id))?.status;
        match status {
            RecordStatus::Pending => {
                let superseded = self.accepted.take();
                if let Some(older) = superseded {
                    let record = self.record_mut(older)?;
                    record.status = RecordStatus::Rejected;
                    record.updated_at = height;
                }
                let record = self.record_mut(id)?;
                record.status = RecordStatus::Accepted;
                record.updated_at = height;
                self.held = None;
                self.accepted = Some(id);
                Ok(ApproveOutcome {
                    status: RecordStatus::Accepted,
                    superseded,
                })
            }
            RecordStatus::Accepted | RecordStatus::Finalized => Ok(ApproveOutcome {
                status,
                superseded: None,
            }),
            RecordStatus::Rejected => Err(StakeError::InvalidRecordState { id, status }),
        }
    }

    /// Admin: discard a record that has not been finalized. Repeating on a
    /// rejected record is a no-op.
    pub fn reject(&mut self, id: u64, height: u64) -> Result<RecordStatus, StakeError> {
        let record = self.record_mut(id)?;
        match record.status {
            RecordStatus::Pending | RecordStatus::Accepted => {
                record.status = RecordStatus::Rejected;
                record.updated_at = height;
                self.release(id);
                Ok(RecordStatus::Rejected)
            }
            RecordStatus::Rejected => Ok(RecordStatus::Rejected),
            RecordStatus::Finalized => Err(StakeError::InvalidRecordState {
                id,
                status: RecordStatus::Finalized,
            }),
        }
    }

    /// Decide what finalizing `id` would do without changing anything
    pub fn prepare_finalize(
        &self,
        id: u64,
        config: &ProtocolConfig,
    ) -> Result<FinalizePlan, StakeError> {
        let record = self.record(id).ok_or(StakeError::UnknownRecord(id))?;
        if record.status != RecordStatus::Accepted {
            return Err(StakeError::InvalidRecordState {
                id,
                status: record.status,
            });
        }

        match self
            .accounting
            .chain
            .finality(&record.block_reference, config.finalization_block_number_delta)
        {
            Finality::NotYet => Err(StakeError::NotFinal {
                id,
                height: record.block_reference.height,
            }),
            Finality::Orphaned => Ok(FinalizePlan::Orphan { record_id: id }),
            Finality::Final => {
                let loss = self.accounting.unrecovered_loss;
                let (realized_return, unrecovered_loss) = if record.delta >= 0 {
                    let gain =
                        Amount::try_from(record.delta).map_err(|_| StakeError::ArithmeticOverflow)?;
                    let repaid = gain.min(loss);
                    (gain - repaid, loss - repaid)
                } else {
                    let lost = record.delta.unsigned_abs();
                    (
                        0,
                        loss.checked_add(lost).ok_or(StakeError::ArithmeticOverflow)?,
                    )
                };
                Ok(FinalizePlan::Finalize {
                    record_id: id,
                    realized_return,
                    unrecovered_loss,
                })
            }
        }
    }

    /// Apply a plan from `prepare_finalize`
    pub fn commit_finalize(&mut self, plan: &FinalizePlan, height: u64) {
        match *plan {
            FinalizePlan::Finalize {
                record_id,
                unrecovered_loss,
                ..
            } => {
                let Some(record) = self.records.get_mut(record_id as usize - 1) else {
                    return;
                };
                record.status = RecordStatus::Finalized;
                record.updated_at = height;
                let (delta, principal) = (record.delta, record.principal_at_submit);

                self.accounting.net_principal -= principal;
                self.accounting.unrecovered_loss = unrecovered_loss;
                self.last_finalized = Some(FinalizedSnapshot {
                    record_id,
                    sequence_number: record.sequence_number,
                    balance: record.reported_balance,
                });
                self.release(record_id);

                // A held record was measured against the previous baseline
                if let Some(held) = self.held {
                    if let Some(record) = self.records.get_mut(held as usize - 1) {
                        record.delta -= delta;
                        record.principal_at_submit -= principal;
                    }
                }
            }
            FinalizePlan::Orphan { record_id } => {
                if let Some(record) = self.records.get_mut(record_id as usize - 1) {
                    record.status = RecordStatus::Rejected;
                    record.updated_at = height;
                }
                self.release(record_id);
            }
        }
    }

    fn release(&mut self, id: u64) {
        if self.accepted == Some(id) {
            self.accepted = None;
        }
        if self.held == Some(id) {
            self.held = None;
        }
    }

    /// Track principal sent to validators
    pub fn note_principal_deposited(&mut self, amount: Amount) -> Result<(), StakeError> {
        let amount = principal_amount(amount)?;
        self.accounting.net_principal = self
            .accounting
            .net_principal
            .checked_add(amount)
            .ok_or(StakeError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Track principal withdrawn from validators
    pub fn note_principal_withdrawn(&mut self, amount: Amount) -> Result<(), StakeError> {
        let amount = principal_amount(amount)?;
        self.accounting.net_principal = self
            .accounting
            .net_principal
            .checked_sub(amount)
            .ok_or(StakeError::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn observe_block(&mut self, height: u64, hash: [u8; 32]) {
        self.accounting.chain.observe_block(height, hash);
    }

    pub fn attest_finalized(&mut self, height: u64) {
        self.accounting.chain.attest_finalized(height);
    }

    pub fn record(&self, id: u64) -> Option<&ValidatorStateRecord> {
        id.checked_sub(1)
            .and_then(|index| self.records.get(index as usize))
    }

    fn record_mut(&mut self, id: u64) -> Result<&mut ValidatorStateRecord, StakeError> {
        id.checked_sub(1)
            .and_then(|index| self.records.get_mut(index as usize))
            .ok_or(StakeError::UnknownRecord(id))
    }

    pub fn records(&self) -> &[ValidatorStateRecord] {
        &self.records
    }

    pub fn last_finalized(&self) -> Option<FinalizedSnapshot> {
        self.last_finalized
    }

    /// Record accepted and awaiting finality
    pub fn accepted(&self) -> Option<u64> {
        self.accepted
    }

    /// Record held for admin disposition
    pub fn held(&self) -> Option<u64> {
        self.held
    }

    pub fn stream_head(&self) -> Option<u64> {
        self.stream_head
    }

    pub fn accounting(&self) -> &OracleAccounting {
        &self.accounting
    }

    /// Rebuild from persisted records and accounting
    pub fn restore(&mut self, records: Vec<ValidatorStateRecord>, accounting: OracleAccounting) {
        self.stream_head = records.iter().map(|r| r.sequence_number).max();
        self.last_finalized = records
            .iter()
            .filter(|r| r.status == RecordStatus::Finalized)
            .max_by_key(|r| r.sequence_number)
            .map(|r| FinalizedSnapshot {
                record_id: r.id,
                sequence_number: r.sequence_number,
                balance: r.reported_balance,
            });
        let latest = |status: RecordStatus| {
            records
                .iter()
                .filter(|r| r.status == status)
                .map(|r| r.id)
                .max()
        };
        self.accepted = latest(RecordStatus::Accepted);
        self.held = latest(RecordStatus::Pending);
        self.records = records;
        self.accounting = accounting;
    }
}

fn principal_amount(amount: Amount) -> Result<i128, StakeError> {
    if amount == 0 {
        return Err(StakeError::InvalidAmount(amount));
    }
    i128::try_from(amount).map_err(|_| StakeError::ArithmeticOverflow)
}

/// Check a delta against the absolute and relative bounds
fn check_sanity(delta: i128, baseline: i128, config: &ProtocolConfig) -> Result<(), StakeError> {
    let magnitude = delta.unsigned_abs();
    let baseline = Amount::try_from(baseline.max(0)).unwrap_or(0);
    let exceeded = || StakeError::SanityBoundExceeded { delta, baseline };

    if magnitude > config.max_absolute_delta {
        return Err(exceeded());
    }
    if baseline > 0 {
        let scaled = magnitude
            .checked_mul(BASIS_POINTS)
            .ok_or_else(exceeded)?;
        let allowed = baseline
            .checked_mul(config.max_relative_delta_bps as Amount)
            .unwrap_or(Amount::MAX);
        if scaled > allowed {
            return Err(exceeded());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stake_types::UNITS_PER_TOKEN as T;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            max_absolute_delta: 2 * T,
            max_relative_delta_bps: 500,
            finalization_block_number_delta: 10,
            ..Default::default()
        }
    }

    fn report(seq: u64, balance: Amount, height: u64) -> OracleReport {
        OracleReport {
            reported_balance: balance,
            block_reference: BlockReference::new(height, [height as u8; 32]),
            sequence_number: seq,
        }
    }

    fn finalize(pipeline: &mut OraclePipeline, id: u64) -> FinalizePlan {
        let plan = pipeline.prepare_finalize(id, &config()).unwrap();
        pipeline.commit_finalize(&plan, 0);
        plan
    }

    fn confirm(pipeline: &mut OraclePipeline, height: u64) {
        pipeline.observe_block(height, [height as u8; 32]);
        pipeline.observe_block(height + 10, [(height + 10) as u8; 32]);
    }

    #[test]
    fn test_sequence_must_increase() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();

        pipeline.submit(report(5, 32 * T, 1), submitter, &config(), 0).unwrap();
        assert_eq!(
            pipeline.submit(report(4, 32 * T, 1), submitter, &config(), 0),
            Err(StakeError::NonMonotonicSequence { got: 4, head: 5 })
        );
        assert_eq!(pipeline.records().len(), 1);
    }

    #[test]
    fn test_one_outstanding_record() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();

        pipeline.submit(report(1, 32 * T, 1), submitter, &config(), 0).unwrap();
        assert_eq!(
            pipeline.submit(report(2, 32 * T, 2), submitter, &config(), 0),
            Err(StakeError::OutstandingRecord(1))
        );
    }

    #[test]
    fn test_sanity_failure_holds_record() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();

        let outcome = pipeline
            .submit(report(1, 35 * T, 1), Pubkey::new_unique(), &config(), 0)
            .unwrap();
        assert_eq!(outcome.status, RecordStatus::Pending);
        assert!(outcome.sanity_violation.is_some());

        assert_eq!(pipeline.approve(1, 1).unwrap().status, RecordStatus::Accepted);
        // Repeat is a no-op
        assert_eq!(pipeline.approve(1, 2).unwrap().status, RecordStatus::Accepted);
        assert_eq!(pipeline.accepted(), Some(1));
        assert_eq!(pipeline.held(), None);
    }

    #[test]
    fn test_out_of_bound_record_held_beside_accepted() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();

        pipeline.submit(report(5, 32 * T + T / 2, 1), submitter, &config(), 0).unwrap();
        let held = pipeline
            .submit(report(6, 40 * T, 2), submitter, &config(), 0)
            .unwrap();
        assert_eq!(held.status, RecordStatus::Pending);
        assert!(held.sanity_violation.is_some());
        assert_eq!((pipeline.accepted(), pipeline.held()), (Some(1), Some(2)));

        // Nothing more is admitted while a record is held
        assert_eq!(
            pipeline.submit(report(7, 40 * T, 3), submitter, &config(), 0),
            Err(StakeError::OutstandingRecord(2))
        );

        // Approval supersedes the older accepted record
        let outcome = pipeline.approve(2, 3).unwrap();
        assert_eq!(outcome.superseded, Some(1));
        assert_eq!(pipeline.record(1).unwrap().status, RecordStatus::Rejected);
        assert_eq!(pipeline.accepted(), Some(2));
        assert!(matches!(
            pipeline.prepare_finalize(1, &config()),
            Err(StakeError::InvalidRecordState { .. })
        ));
    }

    #[test]
    fn test_held_record_rebased_when_accepted_finalizes() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();

        pipeline.submit(report(1, 33 * T, 1), submitter, &config(), 0).unwrap();
        let held = pipeline
            .submit(report(2, 40 * T, 20), submitter, &config(), 0)
            .unwrap();
        assert_eq!(held.delta, (8 * T) as i128);

        confirm(&mut pipeline, 1);
        finalize(&mut pipeline, 1);
        assert_eq!(pipeline.accepted(), None);
        assert_eq!(pipeline.held(), Some(2));

        // Now measured against the 33.0 snapshot
        let record = pipeline.record(2).unwrap();
        assert_eq!(record.delta, (7 * T) as i128);
        assert_eq!(record.principal_at_submit, 0);

        pipeline.approve(2, 5).unwrap();
        confirm(&mut pipeline, 20);
        assert_eq!(
            finalize(&mut pipeline, 2),
            FinalizePlan::Finalize {
                record_id: 2,
                realized_return: 7 * T,
                unrecovered_loss: 0
            }
        );
    }

    #[test]
    fn test_relative_bound() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(10 * T).unwrap();

        // 1.0 on a baseline of 10.0 is 10%, above the 5% bound
        let outcome = pipeline
            .submit(report(1, 11 * T, 1), Pubkey::new_unique(), &config(), 0)
            .unwrap();
        assert_eq!(outcome.status, RecordStatus::Pending);
    }

    #[test]
    fn test_finalize_waits_for_depth() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        pipeline
            .submit(report(1, 33 * T, 100), Pubkey::new_unique(), &config(), 0)
            .unwrap();

        pipeline.observe_block(100, [100u8; 32]);
        pipeline.observe_block(105, [105u8; 32]);
        assert_eq!(
            pipeline.prepare_finalize(1, &config()),
            Err(StakeError::NotFinal { id: 1, height: 100 })
        );

        pipeline.observe_block(110, [110u8; 32]);
        assert_eq!(
            finalize(&mut pipeline, 1),
            FinalizePlan::Finalize {
                record_id: 1,
                realized_return: T,
                unrecovered_loss: 0
            }
        );
        assert_eq!(pipeline.record(1).unwrap().status, RecordStatus::Finalized);
        assert_eq!(pipeline.accounting().net_principal, 0);

        // Second attempt fails on state
        assert!(matches!(
            pipeline.prepare_finalize(1, &config()),
            Err(StakeError::InvalidRecordState { .. })
        ));
    }

    #[test]
    fn test_attested_finality() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        pipeline
            .submit(report(1, 32 * T, 50), Pubkey::new_unique(), &config(), 0)
            .unwrap();

        pipeline.attest_finalized(50);
        assert!(matches!(
            pipeline.prepare_finalize(1, &config()).unwrap(),
            FinalizePlan::Finalize { .. }
        ));
    }

    #[test]
    fn test_orphaned_record_rejected() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        pipeline
            .submit(report(1, 32 * T, 20), Pubkey::new_unique(), &config(), 0)
            .unwrap();

        pipeline.observe_block(20, [0xEE; 32]);
        let plan = pipeline.prepare_finalize(1, &config()).unwrap();
        assert_eq!(plan, FinalizePlan::Orphan { record_id: 1 });
        pipeline.commit_finalize(&plan, 3);

        assert_eq!(pipeline.record(1).unwrap().status, RecordStatus::Rejected);
        assert_eq!(pipeline.accepted(), None);
    }

    #[test]
    fn test_losses_carried_forward() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();

        pipeline.submit(report(1, 31 * T, 1), submitter, &config(), 0).unwrap();
        confirm(&mut pipeline, 1);
        finalize(&mut pipeline, 1);
        assert_eq!(pipeline.accounting().unrecovered_loss, T);

        // Earning back the loss is not a return
        pipeline.submit(report(2, 32 * T + T / 2, 20), submitter, &config(), 0).unwrap();
        confirm(&mut pipeline, 20);
        assert_eq!(
            finalize(&mut pipeline, 2),
            FinalizePlan::Finalize {
                record_id: 2,
                realized_return: T / 2,
                unrecovered_loss: 0
            }
        );
    }

    #[test]
    fn test_principal_moves_are_not_returns() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();

        pipeline.submit(report(1, 32 * T, 1), submitter, &config(), 0).unwrap();
        confirm(&mut pipeline, 1);
        finalize(&mut pipeline, 1);

        pipeline.note_principal_deposited(32 * T).unwrap();
        let outcome = pipeline
            .submit(report(2, 64 * T + T / 10, 20), submitter, &config(), 0)
            .unwrap();
        assert_eq!(outcome.status, RecordStatus::Accepted);
        assert_eq!(outcome.delta, (T / 10) as i128);
    }

    #[test]
    fn test_reject_then_resubmit() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();

        pipeline.submit(report(1, 40 * T, 1), submitter, &config(), 0).unwrap();
        assert_eq!(pipeline.reject(1, 1).unwrap(), RecordStatus::Rejected);
        assert_eq!(pipeline.reject(1, 2).unwrap(), RecordStatus::Rejected);
        assert!(pipeline.approve(1, 2).is_err());

        let outcome = pipeline
            .submit(report(2, 32 * T, 2), submitter, &config(), 0)
            .unwrap();
        assert_eq!(outcome.status, RecordStatus::Accepted);
    }

    #[test]
    fn test_restore_rebuilds_cursor() {
        let mut pipeline = OraclePipeline::new();
        pipeline.note_principal_deposited(32 * T).unwrap();
        let submitter = Pubkey::new_unique();
        pipeline.submit(report(3, 32 * T, 1), submitter, &config(), 0).unwrap();
        confirm(&mut pipeline, 1);
        finalize(&mut pipeline, 1);
        pipeline.submit(report(4, 32 * T, 30), submitter, &config(), 0).unwrap();

        let mut restored = OraclePipeline::new();
        restored.restore(pipeline.records().to_vec(), pipeline.accounting().clone());

        assert_eq!(restored.stream_head(), Some(4));
        assert_eq!(restored.accepted(), Some(2));
        assert_eq!(restored.held(), None);
        assert_eq!(restored.last_finalized().unwrap().sequence_number, 3);
    }
}
