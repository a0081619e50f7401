//! RPC Methods - JSON-RPC method handlers
//!
//! Amounts are rendered as decimal strings since they are tracked as u128.

use std::{str::FromStr, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use message_bridge::{CrossDomainMessage, MessageProof, MessageSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stake_engine::{
    ClaimStream, DomainEngine, ErrorKind, ExitSettlement, FinalizeOutcome, PauseStatus,
    RequestState, StakeError, ValidatorStateRecord,
};
use stake_types::{Domain, Pubkey};

/// RPC context shared across handlers
pub struct RpcContext {
    pub l1: Arc<DomainEngine>,
    pub l2: Arc<DomainEngine>,
}

impl RpcContext {
    pub fn new(l1: Arc<DomainEngine>, l2: Arc<DomainEngine>) -> Self {
        Self { l1, l2 }
    }

    pub fn engine(&self, domain: Domain) -> &Arc<DomainEngine> {
        match domain {
            Domain::L1 => &self.l1,
            Domain::L2 => &self.l2,
        }
    }
}

// ============ Request/Response Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayMessageRequest {
    pub origin: Domain,
    pub nonce: u64,
    /// Base64 encoded payload
    pub payload: String,
    /// Base64 encoded attester signature
    pub proof: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerInfo {
    pub domain: Domain,
    pub height: u64,
    pub total_controlled_value: String,
    pub reserved_for_exits: String,
    pub liquid_token_supply: String,
    pub exchange_rate: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfoResponse {
    pub state: RequestState,
    pub value_owed: String,
    pub eligible_block: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessageResponse {
    pub origin: Domain,
    pub nonce: u64,
    /// Base64 encoded payload
    pub payload: String,
    pub claimed_on_counterpart: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessageResponse {
    pub destination: Domain,
    pub nonce: u64,
    pub claimed_at: u64,
    /// Why the payload was consumed without effect, if it was
    pub dispatch_error: Option<String>,
}

// ============ RPC Handlers ============

/// Handle getLedger RPC method
pub fn handle_get_ledger(ctx: &RpcContext, domain: Domain) -> Result<LedgerInfo, RpcError> {
    let engine = ctx.engine(domain);
    let snapshot = engine.ledger_snapshot();
    Ok(LedgerInfo {
        domain,
        height: engine.height(),
        total_controlled_value: snapshot.total_controlled_value.to_string(),
        reserved_for_exits: snapshot.reserved_for_exits.to_string(),
        liquid_token_supply: snapshot.liquid_token_supply.to_string(),
        exchange_rate: snapshot.exchange_rate.to_string(),
    })
}

/// Handle getBalance RPC method
pub fn handle_get_balance(ctx: &RpcContext, domain: Domain, holder: &str) -> Result<String, RpcError> {
    let holder = parse_pubkey(holder)?;
    Ok(ctx.engine(domain).balance_of(&holder).to_string())
}

/// Handle getClaimable RPC method
pub fn handle_get_claimable(
    ctx: &RpcContext,
    domain: Domain,
    stream: &str,
    account: &str,
) -> Result<String, RpcError> {
    let stream = parse_stream(stream)?;
    let account = parse_pubkey(account)?;
    Ok(ctx.engine(domain).claimable(stream, &account).to_string())
}

/// Handle getRequestInfo RPC method
pub fn handle_get_request_info(
    ctx: &RpcContext,
    domain: Domain,
    request_id: u64,
) -> Result<Option<RequestInfoResponse>, RpcError> {
    Ok(ctx
        .engine(domain)
        .request_info(request_id)
        .map(|info| RequestInfoResponse {
            state: info.state,
            value_owed: info.value_owed.to_string(),
            eligible_block: info.eligible_block,
        }))
}

/// Handle getOracleRecord RPC method
pub fn handle_get_oracle_record(
    ctx: &RpcContext,
    domain: Domain,
    record_id: u64,
) -> Result<Option<ValidatorStateRecord>, RpcError> {
    Ok(ctx.engine(domain).oracle_record(record_id))
}

/// Handle getPauseStatus RPC method
pub fn handle_get_pause_status(ctx: &RpcContext, domain: Domain) -> Result<PauseStatus, RpcError> {
    Ok(ctx.engine(domain).pause_status())
}

/// Handle getOutboxMessage RPC method
pub fn handle_get_outbox_message(
    ctx: &RpcContext,
    origin: Domain,
    nonce: u64,
) -> Result<Option<OutboxMessageResponse>, RpcError> {
    let claimed = ctx
        .engine(origin.counterpart())
        .is_message_claimed(origin, nonce);
    Ok(ctx
        .engine(origin)
        .outbox_message(nonce)
        .map(|message| OutboxMessageResponse {
            origin,
            nonce,
            payload: BASE64.encode(&message.payload),
            claimed_on_counterpart: claimed,
        }))
}

/// Handle finalizeRecord RPC method
pub fn handle_finalize_record(
    ctx: &RpcContext,
    domain: Domain,
    record_id: u64,
) -> Result<FinalizeOutcome, RpcError> {
    Ok(ctx.engine(domain).finalize_record(record_id)?)
}

/// Handle claimUnstake RPC method
pub fn handle_claim_unstake(
    ctx: &RpcContext,
    domain: Domain,
    request_id: u64,
) -> Result<ExitSettlement, RpcError> {
    Ok(ctx.engine(domain).claim_unstake(request_id)?)
}

/// Handle relayMessage RPC method. Claims the message on the counterpart of
/// its origin, then acknowledges it on the origin outbox.
pub fn handle_relay_message(
    ctx: &RpcContext,
    params: RelayMessageRequest,
) -> Result<RelayMessageResponse, RpcError> {
    let payload = BASE64
        .decode(&params.payload)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 payload".to_string()))?;
    let signature = BASE64
        .decode(&params.proof)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 proof".to_string()))?;

    let message = CrossDomainMessage::new(params.origin, params.nonce, payload);
    let destination = params.origin.counterpart();
    let receipt = ctx
        .engine(destination)
        .claim_message(&message, &MessageProof { signature })?;
    ctx.engine(params.origin).acknowledge(params.nonce);

    Ok(RelayMessageResponse {
        destination,
        nonce: receipt.nonce,
        claimed_at: receipt.claimed_at,
        dispatch_error: receipt.dispatch_error,
    })
}

/// Handle getHealth RPC method
pub fn handle_get_health() -> Result<String, RpcError> {
    Ok("ok".to_string())
}

// ============ Param Parsing ============

pub fn parse_domain(value: &str) -> Result<Domain, RpcError> {
    Domain::from_str(value).map_err(RpcError::InvalidParams)
}

pub fn parse_pubkey(value: &str) -> Result<Pubkey, RpcError> {
    Pubkey::from_str(value).map_err(|_| RpcError::InvalidParams("Invalid pubkey".to_string()))
}

pub fn parse_stream(value: &str) -> Result<ClaimStream, RpcError> {
    match value.to_ascii_lowercase().as_str() {
        "primary" => Ok(ClaimStream::Primary),
        "secondary" => Ok(ClaimStream::Secondary),
        "exit" => Ok(ClaimStream::Exit),
        other => Err(RpcError::InvalidParams(format!("Unknown claim stream: {}", other))),
    }
}

pub fn to_json<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::InternalError(e.to_string()))
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error(transparent)]
    Engine(#[from] StakeError),
}

impl RpcError {
    /// Map error to JSON-RPC error code. Engine failures use the
    /// implementation-defined range, one code per error kind.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidParams(_) => -32602,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InternalError(_) => -32603,
            RpcError::Engine(e) => match e.kind() {
                ErrorKind::ValidationFailure => -32001,
                ErrorKind::SanityFailure => -32002,
                ErrorKind::StateConflict => -32003,
                ErrorKind::ResourceExhausted => -32004,
                ErrorKind::ConfigurationError => -32005,
            },
        }
    }
}
