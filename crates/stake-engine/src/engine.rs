//! Domain Engine
//!
//! One engine per domain composes the ledger, oracle pipeline, reward engine,
//! exit queue, pause state and message channel behind a single write lock.
//! Every mutating entry point follows the same shape:
//!
//! 1. authorize the caller and snapshot the config (no lock held)
//! 2. take the write lock and check the pause state
//! 3. validate every effect the call will have
//! 4. apply them
//!
//! Nothing is applied before step 3 finishes, so a failed call leaves the
//! engine exactly as it found it.

use std::sync::Arc;

use async_trait::async_trait;
use message_bridge::{
    ChannelError, ClaimReceipt, CrossDomainMessage, DeliveryError, Inbox, MessageProof,
    MessageSink, MessageSource, Outbox, ProofVerifier,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stake_types::{Amount, Domain, Payload, ProtocolConfig, Pubkey};
use tokio::sync::broadcast;

use crate::{
    auth::{ensure_authorized, Authorizer, Permission},
    error::StakeError,
    ledger::{ExchangeRateLedger, LedgerSnapshot},
    oracle::{
        FinalizePlan, OracleAccounting, OraclePipeline, OracleReport, RecordStatus, SubmitOutcome,
        ValidatorStateRecord,
    },
    pause::{Operation, PauseReason, PauseState},
    rewards::{ClaimStream, OperatorDirectory, RewardEngine, RewardEpochRecord},
    unstake::{AllocationOutcome, RequestInfo, UnstakeQueue, UnstakeRequest},
};

/// A funding request received from the counterpart's exit queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRequestRecord {
    pub origin: Domain,
    pub nonce: u64,
    pub amount: Amount,
    pub received_at: u64,
}

/// Result of finalizing an oracle record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    pub record_id: u64,
    pub status: RecordStatus,
    pub realized_return: Amount,
    /// Reward epoch created for a positive return
    pub epoch_id: Option<u64>,
    /// Nonces of `RewardCredit` messages sent to the counterpart
    pub credit_messages: Vec<u64>,
}

/// How a claimed exit was paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitPayment {
    /// Credited to the requestor's `Exit` balance on this domain
    Local,
    /// Sent to the requestor's home domain as an `ExitPayout` message
    Remote { nonce: u64 },
}

/// Result of claiming an exit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitSettlement {
    pub request_id: u64,
    pub recipient: Pubkey,
    pub value: Amount,
    pub payment: ExitPayment,
}

/// Pause flags as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseStatus {
    pub paused: bool,
    pub reason: Option<PauseReason>,
    pub operations: Vec<Operation>,
}

/// Everything needed to rebuild an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineExport {
    pub domain: Domain,
    pub height: u64,
    pub ledger: ExchangeRateLedger,
    pub records: Vec<ValidatorStateRecord>,
    pub accounting: OracleAccounting,
    pub epochs: Vec<RewardEpochRecord>,
    pub claimable: Vec<(ClaimStream, Pubkey, Amount)>,
    pub requests: Vec<UnstakeRequest>,
    pub carried_liquidity: Amount,
    pub pause: PauseState,
    pub messages: Vec<CrossDomainMessage>,
    pub receipts: Vec<ClaimReceipt>,
    pub fund_requests: Vec<FundRequestRecord>,
}

/// State guarded by the engine lock
struct DomainState {
    /// Local chain height
    height: u64,
    ledger: ExchangeRateLedger,
    oracle: OraclePipeline,
    rewards: RewardEngine,
    queue: UnstakeQueue,
    pause: PauseState,
    outbox: Outbox,
    inbox: Inbox,
    fund_requests: Vec<FundRequestRecord>,
}

impl DomainState {
    fn new(domain: Domain) -> Self {
        Self {
            height: 0,
            ledger: ExchangeRateLedger::new(),
            oracle: OraclePipeline::new(),
            rewards: RewardEngine::new(),
            queue: UnstakeQueue::new(),
            pause: PauseState::default(),
            outbox: Outbox::new(domain),
            inbox: Inbox::new(domain),
            fund_requests: Vec::new(),
        }
    }

    /// Burn and queue an exit, or change nothing
    fn queue_exit(
        &mut self,
        config: &ProtocolConfig,
        requestor: Pubkey,
        home: Domain,
        token_amount: Amount,
    ) -> Result<u64, StakeError> {
        let value_owed = self.ledger.preview_burn(&requestor, token_amount)?;
        UnstakeQueue::check_create(value_owed, config)?;

        self.ledger.burn(&requestor, token_amount)?;
        self.queue
            .create(requestor, home, token_amount, value_owed, self.height, config)
    }
}

/// Staking engine for one domain
pub struct DomainEngine {
    domain: Domain,
    state: RwLock<DomainState>,
    config: RwLock<Arc<ProtocolConfig>>,
    authorizer: Arc<dyn Authorizer>,
    verifier: Arc<dyn ProofVerifier>,
    operators: Arc<dyn OperatorDirectory>,
}

impl DomainEngine {
    pub fn new(
        domain: Domain,
        config: ProtocolConfig,
        authorizer: Arc<dyn Authorizer>,
        verifier: Arc<dyn ProofVerifier>,
        operators: Arc<dyn OperatorDirectory>,
    ) -> Result<Self, StakeError> {
        config.validate()?;

        Ok(Self {
            domain,
            state: RwLock::new(DomainState::new(domain)),
            config: RwLock::new(Arc::new(config)),
            authorizer,
            verifier,
            operators,
        })
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<ProtocolConfig> {
        self.config.read().clone()
    }

    fn authorize(&self, caller: &Pubkey, permission: Permission) -> Result<(), StakeError> {
        ensure_authorized(self.authorizer.as_ref(), caller, permission)
    }

    // ---- Height ----

    pub fn height(&self) -> u64 {
        self.state.read().height
    }

    /// Move the local height forward. Lower heights are ignored.
    pub fn set_height(&self, height: u64) -> u64 {
        let mut state = self.state.write();
        state.height = state.height.max(height);
        state.height
    }

    /// Advance the local height by one block
    pub fn advance_height(&self) -> u64 {
        let mut state = self.state.write();
        state.height = state.height.saturating_add(1);
        state.height
    }

    // ---- Deposits ----

    /// Mint liquid tokens for value this domain has received
    pub fn deposit(
        &self,
        caller: &Pubkey,
        recipient: Pubkey,
        value: Amount,
    ) -> Result<Amount, StakeError> {
        self.authorize(caller, Permission::Depositor)?;
        let config = self.config();

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::Deposit)?;
        let tokens = state.ledger.mint(recipient, value, config.supply_cap)?;

        tracing::info!(
            "{} deposit of {} minted {} tokens for {}",
            self.domain,
            value,
            tokens,
            recipient
        );
        Ok(tokens)
    }

    /// Forward value received here to the counterpart, which mints for it
    pub fn bridge_deposit(
        &self,
        caller: &Pubkey,
        recipient: Pubkey,
        value: Amount,
    ) -> Result<u64, StakeError> {
        self.authorize(caller, Permission::Depositor)?;
        if value == 0 {
            return Err(StakeError::InvalidAmount(value));
        }
        let payload = encode(&Payload::Mint { recipient, value })?;

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::Deposit)?;
        let nonce = state.outbox.send(payload)?;

        tracing::info!(
            "{} forwarded deposit of {} for {} as message {}",
            self.domain,
            value,
            recipient,
            nonce
        );
        Ok(nonce)
    }

    /// Record principal moved into validators
    pub fn record_principal_deposit(&self, caller: &Pubkey, amount: Amount) -> Result<(), StakeError> {
        self.authorize(caller, Permission::Depositor)?;

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::PrincipalUpdate)?;
        state.oracle.note_principal_deposited(amount)
    }

    /// Record principal withdrawn from validators
    pub fn record_principal_withdrawal(
        &self,
        caller: &Pubkey,
        amount: Amount,
    ) -> Result<(), StakeError> {
        self.authorize(caller, Permission::Depositor)?;

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::PrincipalUpdate)?;
        state.oracle.note_principal_withdrawn(amount)
    }

    // ---- Oracle ----

    /// Submit a validator balance snapshot. A sanity failure stores the
    /// record as `Pending` and pauses the engine; the call still succeeds.
    pub fn submit_oracle_report(
        &self,
        caller: &Pubkey,
        report: OracleReport,
    ) -> Result<SubmitOutcome, StakeError> {
        self.authorize(caller, Permission::OracleSubmitter)?;
        let config = self.config();

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.pause.ensure_active(Operation::OracleSubmit)?;

        let outcome = state.oracle.submit(report, *caller, &config, state.height)?;
        match &outcome.sanity_violation {
            Some(violation) => {
                tracing::warn!(
                    "{} oracle record {} held for review: {}",
                    self.domain,
                    outcome.record_id,
                    violation
                );
                state.pause.pause(
                    format!("oracle record {}: {}", outcome.record_id, violation),
                    state.height,
                );
                tracing::warn!("{} engine paused", self.domain);
            }
            None => tracing::info!(
                "{} oracle record {} accepted (seq {}, delta {})",
                self.domain,
                outcome.record_id,
                report.sequence_number,
                outcome.delta
            ),
        }
        Ok(outcome)
    }

    /// Record a canonical origin chain header
    pub fn observe_origin_block(
        &self,
        caller: &Pubkey,
        height: u64,
        hash: [u8; 32],
    ) -> Result<(), StakeError> {
        self.authorize(caller, Permission::OracleSubmitter)?;
        self.state.write().oracle.observe_block(height, hash);
        Ok(())
    }

    /// Record externally attested origin chain finality
    pub fn attest_origin_finality(&self, caller: &Pubkey, height: u64) -> Result<(), StakeError> {
        self.authorize(caller, Permission::OracleSubmitter)?;
        self.state.write().oracle.attest_finalized(height);
        Ok(())
    }

    /// Admin: accept a held record
    pub fn approve_record(&self, caller: &Pubkey, record_id: u64) -> Result<RecordStatus, StakeError> {
        self.authorize(caller, Permission::Admin)?;

        let mut state = self.state.write();
        let height = state.height;
        let outcome = state.oracle.approve(record_id, height)?;
        tracing::info!("{} oracle record {} approved", self.domain, record_id);
        if let Some(older) = outcome.superseded {
            tracing::warn!(
                "{} oracle record {} superseded by record {}",
                self.domain,
                older,
                record_id
            );
        }
        Ok(outcome.status)
    }

    /// Admin: discard a record that has not been finalized
    pub fn reject_record(&self, caller: &Pubkey, record_id: u64) -> Result<RecordStatus, StakeError> {
        self.authorize(caller, Permission::Admin)?;

        let mut state = self.state.write();
        let height = state.height;
        let status = state.oracle.reject(record_id, height)?;
        tracing::info!("{} oracle record {} rejected", self.domain, record_id);
        Ok(status)
    }

    /// Finalize an accepted record once its block is irreversible. Anyone may
    /// call this; a second attempt fails on the record state.
    pub fn finalize_record(&self, record_id: u64) -> Result<FinalizeOutcome, StakeError> {
        let config = self.config();
        let operators = self.operators.operators();

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.pause.ensure_active(Operation::OracleFinalize)?;
        let height = state.height;

        let plan = state.oracle.prepare_finalize(record_id, &config)?;
        let realized_return = match plan {
            FinalizePlan::Finalize {
                realized_return, ..
            } => realized_return,
            FinalizePlan::Orphan { .. } => 0,
        };

        let epoch = if realized_return > 0 {
            Some(state.rewards.plan_epoch(
                record_id,
                realized_return,
                &config,
                &operators,
                self.domain,
                height,
            )?)
        } else {
            None
        };

        let mut credit_payloads = Vec::new();
        if let Some(epoch) = &epoch {
            for (operator, amount) in &epoch.remote_credits {
                credit_payloads.push(encode(&Payload::RewardCredit {
                    epoch_id: epoch.record.epoch_id,
                    operator: *operator,
                    amount: *amount,
                })?);
            }
            state.outbox.check_capacity(credit_payloads.len())?;
            if epoch.record.staker_portion > 0 {
                state.ledger.check_value_increase(epoch.record.staker_portion)?;
            }
        }

        // Everything is validated; apply
        let mut epoch_id = None;
        if let Some(epoch) = &epoch {
            if epoch.record.staker_portion > 0 {
                state.ledger.record_value_increase(epoch.record.staker_portion)?;
            }
            epoch_id = Some(state.rewards.commit_epoch(epoch));
        }
        state.oracle.commit_finalize(&plan, height);
        let mut credit_messages = Vec::with_capacity(credit_payloads.len());
        for payload in credit_payloads {
            credit_messages.push(state.outbox.send(payload)?);
        }

        let status = state
            .oracle
            .record(record_id)
            .map(|r| r.status)
            .unwrap_or(RecordStatus::Finalized);
        match plan {
            FinalizePlan::Finalize { .. } => tracing::info!(
                "{} oracle record {} finalized, realized return {}",
                self.domain,
                record_id,
                realized_return
            ),
            FinalizePlan::Orphan { .. } => tracing::warn!(
                "{} oracle record {} orphaned by origin chain reorg",
                self.domain,
                record_id
            ),
        }

        Ok(FinalizeOutcome {
            record_id,
            status,
            realized_return,
            epoch_id,
            credit_messages,
        })
    }

    // ---- Rewards ----

    /// Split a secondary reward deposit between stakers and operators
    pub fn distribute_secondary(&self, caller: &Pubkey, amount: Amount) -> Result<(), StakeError> {
        self.authorize(caller, Permission::Depositor)?;
        let config = self.config();
        let operators = self.operators.operators();

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::RewardDistribute)?;
        let plan = state.rewards.plan_secondary(amount, &config, &operators)?;
        state.rewards.commit_secondary(&plan);

        tracing::info!(
            "{} distributed {} secondary rewards ({} to stakers)",
            self.domain,
            amount,
            plan.staker_amount
        );
        Ok(())
    }

    /// Take the caller's full claimable balance in a stream
    pub fn claim_rewards(&self, caller: &Pubkey, stream: ClaimStream) -> Result<Amount, StakeError> {
        let mut state = self.state.write();
        state.pause.ensure_active(Operation::RewardClaim)?;
        let amount = state.rewards.claim(stream, caller)?;

        tracing::info!("{} {} claimed {} from {:?}", self.domain, caller, amount, stream);
        Ok(amount)
    }

    pub fn claimable(&self, stream: ClaimStream, account: &Pubkey) -> Amount {
        self.state.read().rewards.claimable(stream, account)
    }

    pub fn epoch(&self, epoch_id: u64) -> Option<RewardEpochRecord> {
        self.state.read().rewards.epoch(epoch_id).cloned()
    }

    // ---- Exits ----

    /// Burn the caller's tokens at the current rate and queue the exit
    pub fn request_unstake(&self, caller: &Pubkey, token_amount: Amount) -> Result<u64, StakeError> {
        let config = self.config();

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::UnstakeCreate)?;
        let id = state.queue_exit(&config, *caller, self.domain, token_amount)?;

        tracing::info!(
            "{} unstake request {} queued for {}",
            self.domain,
            id,
            caller
        );
        Ok(id)
    }

    /// Ask the counterpart to burn the caller's tokens and queue an exit
    pub fn bridge_unstake(&self, caller: &Pubkey, token_amount: Amount) -> Result<u64, StakeError> {
        if token_amount == 0 {
            return Err(StakeError::InvalidAmount(token_amount));
        }
        let payload = encode(&Payload::Unstake {
            requestor: *caller,
            token_amount,
        })?;

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::UnstakeCreate)?;
        let nonce = state.outbox.send(payload)?;

        tracing::info!(
            "{} forwarded unstake of {} tokens for {} as message {}",
            self.domain,
            token_amount,
            caller,
            nonce
        );
        Ok(nonce)
    }

    /// Allocate queued exits against newly available liquidity
    pub fn allocate(&self, caller: &Pubkey, available: Amount) -> Result<AllocationOutcome, StakeError> {
        self.authorize(caller, Permission::Allocator)?;

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.pause.ensure_active(Operation::UnstakeAllocate)?;
        let outcome = state.queue.allocate(available, state.height)?;

        tracing::info!(
            "{} allocated {} exits ({} carried)",
            self.domain,
            outcome.allocated.len(),
            outcome.carried
        );
        Ok(outcome)
    }

    /// Pay out an allocated, eligible exit. Anyone may call this; the value
    /// always goes to the requestor.
    pub fn claim_unstake(&self, request_id: u64) -> Result<ExitSettlement, StakeError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.pause.ensure_active(Operation::UnstakeClaim)?;
        let height = state.height;

        let request = state.queue.check_claim(request_id, height)?.clone();
        state.ledger.check_settle_exit(request.value_owed)?;

        let payout = if request.home == self.domain {
            None
        } else {
            state.outbox.check_capacity(1)?;
            Some(encode(&Payload::ExitPayout {
                request_id,
                recipient: request.requestor,
                value: request.value_owed,
            })?)
        };

        state.ledger.settle_exit(request.value_owed)?;
        state.queue.mark_claimed(request_id, height)?;
        let payment = match payout {
            None => {
                state
                    .rewards
                    .credit(ClaimStream::Exit, request.requestor, request.value_owed);
                ExitPayment::Local
            }
            Some(payload) => ExitPayment::Remote {
                nonce: state.outbox.send(payload)?,
            },
        };

        tracing::info!(
            "{} unstake request {} claimed: {} to {}",
            self.domain,
            request_id,
            request.value_owed,
            request.requestor
        );
        Ok(ExitSettlement {
            request_id,
            recipient: request.requestor,
            value: request.value_owed,
            payment,
        })
    }

    pub fn request_info(&self, request_id: u64) -> Option<RequestInfo> {
        self.state.read().queue.request_info(request_id)
    }

    pub fn unstake_request(&self, request_id: u64) -> Option<UnstakeRequest> {
        self.state.read().queue.get(request_id).cloned()
    }

    /// Queued exit value not covered by carried liquidity
    pub fn shortfall(&self) -> Amount {
        self.state.read().queue.shortfall()
    }

    /// Ask the counterpart for liquidity covering the current shortfall
    pub fn request_funding(&self, caller: &Pubkey) -> Result<u64, StakeError> {
        self.authorize(caller, Permission::Allocator)?;

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::FundRequest)?;
        let amount = state.queue.shortfall();
        if amount == 0 {
            return Err(StakeError::InvalidAmount(amount));
        }
        let nonce = state.outbox.send(encode(&Payload::FundRequest { amount })?)?;

        tracing::info!("{} requested {} exit funding", self.domain, amount);
        Ok(nonce)
    }

    /// Release liquidity to the counterpart's exit queue
    pub fn send_queue_funding(&self, caller: &Pubkey, amount: Amount) -> Result<u64, StakeError> {
        self.authorize(caller, Permission::Allocator)?;
        if amount == 0 {
            return Err(StakeError::InvalidAmount(amount));
        }
        let payload = encode(&Payload::QueueFunding { amount })?;

        let mut state = self.state.write();
        state.pause.ensure_active(Operation::UnstakeAllocate)?;
        let nonce = state.outbox.send(payload)?;

        tracing::info!("{} sent {} exit funding", self.domain, amount);
        Ok(nonce)
    }

    pub fn fund_requests(&self) -> Vec<FundRequestRecord> {
        self.state.read().fund_requests.clone()
    }

    // ---- Messages ----

    /// Claim a message sent by the counterpart and apply its payload exactly
    /// once. A failed claim leaves the message claimable, except for exit
    /// and funding requests that can never apply: those are consumed with a
    /// receipt carrying the reason.
    pub fn claim_message(
        &self,
        message: &CrossDomainMessage,
        proof: &MessageProof,
    ) -> Result<ClaimReceipt, StakeError> {
        self.verifier
            .verify(message.origin, message.nonce, &message.payload, proof)?;
        let config = self.config();

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.inbox.check_claimable(message)?;
        state.pause.ensure_active(Operation::MessageClaim)?;

        let payload = Payload::from_bytes(&message.payload)
            .map_err(|e| StakeError::MalformedPayload(e.to_string()))?;
        state.pause.ensure_active(payload_operation(&payload))?;

        let receipt = match self.dispatch(state, &config, message, &payload) {
            Ok(()) => state.inbox.mark_claimed(message, state.height)?,
            Err(e) if is_final_failure(&payload, &e) => {
                tracing::warn!(
                    "{} dropped {} message {} ({}): {}",
                    self.domain,
                    message.origin,
                    message.nonce,
                    payload.kind(),
                    e
                );
                return Ok(state.inbox.mark_failed(message, state.height, e.to_string())?);
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            "{} claimed {} message {} ({})",
            self.domain,
            message.origin,
            message.nonce,
            payload.kind()
        );
        Ok(receipt)
    }

    fn dispatch(
        &self,
        state: &mut DomainState,
        config: &ProtocolConfig,
        message: &CrossDomainMessage,
        payload: &Payload,
    ) -> Result<(), StakeError> {
        match payload {
            Payload::Mint { recipient, value } => {
                state.ledger.mint(*recipient, *value, config.supply_cap)?;
            }
            Payload::RewardCredit {
                operator, amount, ..
            } => {
                if *amount == 0 {
                    return Err(StakeError::InvalidAmount(*amount));
                }
                state.rewards.credit(ClaimStream::Primary, *operator, *amount);
            }
            Payload::QueueFunding { amount } => {
                state.queue.allocate(*amount, state.height)?;
            }
            Payload::Unstake {
                requestor,
                token_amount,
            } => {
                state.queue_exit(config, *requestor, message.origin, *token_amount)?;
            }
            Payload::ExitPayout {
                recipient, value, ..
            } => {
                if *value == 0 {
                    return Err(StakeError::InvalidAmount(*value));
                }
                state.rewards.credit(ClaimStream::Exit, *recipient, *value);
            }
            Payload::FundRequest { amount } => {
                if *amount == 0 {
                    return Err(StakeError::InvalidAmount(*amount));
                }
                state.fund_requests.push(FundRequestRecord {
                    origin: message.origin,
                    nonce: message.nonce,
                    amount: *amount,
                    received_at: state.height,
                });
                tracing::info!(
                    "{} received funding request for {} from {}",
                    self.domain,
                    amount,
                    message.origin
                );
            }
        }
        Ok(())
    }

    pub fn outbox_message(&self, nonce: u64) -> Option<CrossDomainMessage> {
        self.state.read().outbox.get(nonce).cloned()
    }

    pub fn is_message_claimed(&self, origin: Domain, nonce: u64) -> bool {
        self.state.read().inbox.is_claimed(origin, nonce)
    }

    pub fn message_receipt(&self, origin: Domain, nonce: u64) -> Option<ClaimReceipt> {
        self.state.read().inbox.receipt(origin, nonce).cloned()
    }

    // ---- Admin ----

    pub fn pause(&self, caller: &Pubkey, reason: &str) -> Result<(), StakeError> {
        self.authorize(caller, Permission::Admin)?;

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.pause.pause(reason, state.height);
        tracing::warn!("{} engine paused by {}: {}", self.domain, caller, reason);
        Ok(())
    }

    /// Clear the global pause. Returns false if it was not set.
    pub fn unpause(&self, caller: &Pubkey) -> Result<bool, StakeError> {
        self.authorize(caller, Permission::Admin)?;

        let cleared = self.state.write().pause.unpause();
        if cleared {
            tracing::warn!("{} engine unpaused by {}", self.domain, caller);
        }
        Ok(cleared)
    }

    pub fn set_operation_paused(
        &self,
        caller: &Pubkey,
        operation: Operation,
        paused: bool,
    ) -> Result<(), StakeError> {
        self.authorize(caller, Permission::Admin)?;

        self.state.write().pause.set_operation_paused(operation, paused);
        tracing::warn!("{} {:?} paused = {}", self.domain, operation, paused);
        Ok(())
    }

    /// Swap in a new configuration snapshot. Operations already running keep
    /// the snapshot they started with.
    pub fn update_config(&self, caller: &Pubkey, config: ProtocolConfig) -> Result<(), StakeError> {
        self.authorize(caller, Permission::Admin)?;
        config.validate()?;

        *self.config.write() = Arc::new(config);
        tracing::info!("{} configuration updated", self.domain);
        Ok(())
    }

    // ---- Queries ----

    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.state.read().ledger.snapshot()
    }

    pub fn exchange_rate(&self) -> Amount {
        self.state.read().ledger.exchange_rate()
    }

    pub fn balance_of(&self, holder: &Pubkey) -> Amount {
        self.state.read().ledger.balance_of(holder)
    }

    pub fn oracle_record(&self, record_id: u64) -> Option<ValidatorStateRecord> {
        self.state.read().oracle.record(record_id).cloned()
    }

    pub fn pause_status(&self) -> PauseStatus {
        let state = self.state.read();
        PauseStatus {
            paused: state.pause.is_paused(),
            reason: state.pause.reason().cloned(),
            operations: state.pause.paused_operations().copied().collect(),
        }
    }

    // ---- Persistence ----

    /// Copy out every table
    pub fn export(&self) -> EngineExport {
        let state = self.state.read();
        EngineExport {
            domain: self.domain,
            height: state.height,
            ledger: state.ledger.clone(),
            records: state.oracle.records().to_vec(),
            accounting: state.oracle.accounting().clone(),
            epochs: state.rewards.epochs().to_vec(),
            claimable: state
                .rewards
                .claimable_balances()
                .iter()
                .map(|((stream, account), amount)| (*stream, *account, *amount))
                .collect(),
            requests: state.queue.requests().to_vec(),
            carried_liquidity: state.queue.carried_liquidity(),
            pause: state.pause.clone(),
            messages: state.outbox.messages().cloned().collect(),
            receipts: state.inbox.receipts().cloned().collect(),
            fund_requests: state.fund_requests.clone(),
        }
    }

    /// Replace all state with a previous export
    pub fn restore(&self, export: EngineExport) -> Result<(), StakeError> {
        if export.domain != self.domain {
            return Err(ChannelError::WrongDomain {
                origin: export.domain,
                receiver: self.domain,
            }
            .into());
        }

        let mut state = DomainState::new(self.domain);
        state.height = export.height;
        state.ledger = export.ledger;
        state.oracle.restore(export.records, export.accounting);
        state.rewards.restore(
            export.epochs,
            export
                .claimable
                .into_iter()
                .map(|(stream, account, amount)| ((stream, account), amount))
                .collect(),
        );
        state.queue.restore(export.requests, export.carried_liquidity);
        state.pause = export.pause;
        state.inbox.restore(export.receipts);
        state.fund_requests = export.fund_requests;

        // Keep the live outbox so relayer subscriptions survive a restore
        let mut current = self.state.write();
        let mut outbox = std::mem::replace(&mut current.outbox, Outbox::new(self.domain));
        outbox.restore(export.messages);
        state.outbox = outbox;
        *current = state;

        tracing::info!(
            "{} engine restored at height {} ({} records, {} exits)",
            self.domain,
            current.height,
            current.oracle.records().len(),
            current.queue.len()
        );
        Ok(())
    }
}

fn encode(payload: &Payload) -> Result<Vec<u8>, StakeError> {
    payload
        .to_bytes()
        .map_err(|e| StakeError::MalformedPayload(e.to_string()))
}

/// Dispatch failures that retrying can never fix. Only requests are consumed
/// on such a failure; value-carrying payloads stay claimable.
fn is_final_failure(payload: &Payload, error: &StakeError) -> bool {
    matches!(payload, Payload::Unstake { .. } | Payload::FundRequest { .. })
        && matches!(
            error,
            StakeError::InsufficientBalance { .. }
                | StakeError::BelowMinimum { .. }
                | StakeError::InvalidAmount(_)
        )
}

/// Operation whose pause flag also gates a delivered payload
fn payload_operation(payload: &Payload) -> Operation {
    match payload {
        Payload::Mint { .. } => Operation::Deposit,
        Payload::RewardCredit { .. } => Operation::RewardDistribute,
        Payload::QueueFunding { .. } => Operation::UnstakeAllocate,
        Payload::Unstake { .. } => Operation::UnstakeCreate,
        Payload::ExitPayout { .. } => Operation::UnstakeClaim,
        Payload::FundRequest { .. } => Operation::FundRequest,
    }
}

impl MessageSource for DomainEngine {
    fn subscribe(&self) -> broadcast::Receiver<CrossDomainMessage> {
        self.state.read().outbox.subscribe()
    }

    fn pending(&self) -> Vec<CrossDomainMessage> {
        self.state.read().outbox.pending()
    }

    fn messages_from(&self, from: u64) -> Vec<CrossDomainMessage> {
        self.state.read().outbox.messages_from(from)
    }

    fn acknowledge(&self, nonce: u64) {
        self.state.write().outbox.acknowledge(nonce);
    }
}

#[async_trait]
impl MessageSink for DomainEngine {
    async fn deliver(
        &self,
        message: CrossDomainMessage,
        proof: MessageProof,
    ) -> Result<(), DeliveryError> {
        match self.claim_message(&message, &proof) {
            Ok(_) => Ok(()),
            Err(StakeError::Channel(ChannelError::AlreadyClaimed { .. })) => {
                Err(DeliveryError::AlreadyClaimed)
            }
            Err(e) => Err(DeliveryError::Rejected(e.to_string())),
        }
    }

    fn is_claimed(&self, origin: Domain, nonce: u64) -> bool {
        self.is_message_claimed(origin, nonce)
    }
}
