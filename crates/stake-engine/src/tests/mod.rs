//! Engine-level tests
//!
//! Shared harness: an L1 and an L2 engine wired the way the node wires them,
//! with one account holding every permission.


use std::sync::Arc;

use ed25519_dalek::SigningKey;
use message_bridge::{
    AttestationVerifier, Attester, CrossDomainMessage, MessageProof, Relayer, RelayerConfig,
};
use rand::rngs::OsRng;
use stake_types::{Amount, BlockReference, Domain, ProtocolConfig, Pubkey, UNITS_PER_TOKEN};

use crate::{
    auth::{Permission, RoleStore},
    engine::{DomainEngine, FinalizeOutcome},
    oracle::{OracleReport, SubmitOutcome},
    rewards::StaticOperatorDirectory,
};

pub(crate) const T: Amount = UNITS_PER_TOKEN;

/// No fees, wide sanity bounds, short delays
pub(crate) fn test_config() -> ProtocolConfig {
    ProtocolConfig {
        fee_basis_points: 0,
        operator_share_basis_points: 0,
        min_unstake_value: T / 10,
        blocks_to_finalize: 10,
        finalization_block_number_delta: 4,
        max_absolute_delta: 100 * T,
        max_relative_delta_bps: 10_000,
        ..Default::default()
    }
}

pub(crate) fn report(sequence_number: u64, reported_balance: Amount, height: u64) -> OracleReport {
    OracleReport {
        reported_balance,
        block_reference: BlockReference::new(height, block_hash(height)),
        sequence_number,
    }
}

fn block_hash(height: u64) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&height.to_le_bytes());
    hash
}

pub(crate) struct Harness {
    /// Holds every permission on both domains
    pub admin: Pubkey,
    pub l1: Arc<DomainEngine>,
    pub l2: Arc<DomainEngine>,
    pub operators: Arc<StaticOperatorDirectory>,
    l1_key: SigningKey,
    l2_key: SigningKey,
}

impl Harness {
    pub fn new(config: ProtocolConfig) -> Self {
        let admin = Pubkey::new_unique();
        let roles = Arc::new(
            RoleStore::new()
                .with(admin, Permission::Admin)
                .with(admin, Permission::OracleSubmitter)
                .with(admin, Permission::Allocator)
                .with(admin, Permission::Depositor),
        );
        let operators = Arc::new(StaticOperatorDirectory::default());

        let l1_key = SigningKey::generate(&mut OsRng);
        let l2_key = SigningKey::generate(&mut OsRng);
        let verifier = Arc::new(
            AttestationVerifier::new()
                .with_key(Domain::L1, l1_key.verifying_key())
                .with_key(Domain::L2, l2_key.verifying_key()),
        );

        let engine = |domain| {
            Arc::new(
                DomainEngine::new(
                    domain,
                    config.clone(),
                    roles.clone(),
                    verifier.clone(),
                    operators.clone(),
                )
                .unwrap(),
            )
        };

        Self {
            admin,
            l1: engine(Domain::L1),
            l2: engine(Domain::L2),
            operators,
            l1_key,
            l2_key,
        }
    }

    pub fn engine(&self, domain: Domain) -> &Arc<DomainEngine> {
        match domain {
            Domain::L1 => &self.l1,
            Domain::L2 => &self.l2,
        }
    }

    pub fn attester(&self, domain: Domain) -> Attester {
        let key = match domain {
            Domain::L1 => self.l1_key.clone(),
            Domain::L2 => self.l2_key.clone(),
        };
        Attester::new(domain, key)
    }

    pub fn proof(&self, message: &CrossDomainMessage) -> MessageProof {
        self.attester(message.origin).attest(message).unwrap()
    }

    /// Relayer carrying messages from `origin` to its counterpart
    pub fn relayer(&self, origin: Domain) -> Relayer {
        Relayer::new(
            self.engine(origin).clone(),
            self.engine(origin.counterpart()).clone(),
            self.attester(origin),
            RelayerConfig::default(),
        )
    }

    /// Submit a snapshot and make its block final
    pub fn submit_and_finalize(
        &self,
        engine: &DomainEngine,
        sequence_number: u64,
        balance: Amount,
        height: u64,
    ) -> (SubmitOutcome, FinalizeOutcome) {
        let submitted = engine
            .submit_oracle_report(&self.admin, report(sequence_number, balance, height))
            .unwrap();
        self.confirm_block(engine, height);
        let finalized = engine.finalize_record(submitted.record_id).unwrap();
        (submitted, finalized)
    }

    /// Observe `height` and enough blocks on top of it to be final
    pub fn confirm_block(&self, engine: &DomainEngine, height: u64) {
        let depth = engine.config().finalization_block_number_delta;
        engine
            .observe_origin_block(&self.admin, height, block_hash(height))
            .unwrap();
        engine
            .observe_origin_block(&self.admin, height + depth, block_hash(height + depth))
            .unwrap();
    }
}
