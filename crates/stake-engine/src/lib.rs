//! Stake Engine - accounting core for L2 liquid staking
//!
//! This crate provides one engine per domain:
//! - Exchange-rate ledger for the liquid claim token
//! - Oracle pipeline admitting validator balance snapshots
//! - Reward distribution to the protocol, stakers and operators
//! - FIFO exit queue gated on liquidity and time
//! - Message claim dispatch on top of the message bridge
//! - sled persistence

pub mod auth;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod pause;
pub mod persistence;
pub mod rewards;
pub mod unstake;

#[cfg(test)]
mod tests;

pub use auth::{ensure_authorized, Authorizer, Permission, RoleStore};
pub use engine::{
    DomainEngine, EngineExport, ExitPayment, ExitSettlement, FinalizeOutcome, FundRequestRecord,
    PauseStatus,
};
pub use error::{ErrorKind, StakeError};
pub use ledger::{ExchangeRateLedger, LedgerSnapshot};
pub use oracle::{
    ApproveOutcome, Finality, FinalizePlan, OracleAccounting, OraclePipeline, OracleReport,
    OriginChainView,
    RecordStatus, SubmitOutcome, ValidatorStateRecord,
};
pub use pause::{Operation, PauseReason, PauseState};
pub use persistence::{EngineMetadata, EnginePersistence, PersistentStore};
pub use rewards::{
    ClaimStream, OperatorDirectory, OperatorShare, RewardEngine, RewardEpochRecord,
    StaticOperatorDirectory,
};
pub use unstake::{AllocationOutcome, RequestInfo, RequestState, UnstakeQueue, UnstakeRequest};
