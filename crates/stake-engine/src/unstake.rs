//! Unstake Request Queue
//!
//! Exits lock their value at burn time and are paid strictly in creation
//! order once liquidity covers them in full. Requests are never removed.

use serde::{Deserialize, Serialize};
use stake_types::{Amount, Domain, ProtocolConfig, Pubkey};

use crate::error::StakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Queued,
    Allocated,
    Claimed,
}

/// One exit request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeRequest {
    pub id: u64,
    pub requestor: Pubkey,
    /// Domain the payout is delivered on
    pub home: Domain,
    pub liquid_token_amount_burned: Amount,
    /// Value locked at the burn-time rate
    pub value_owed: Amount,
    pub block_created: u64,
    /// First height at which the request can be claimed
    pub eligible_block: u64,
    pub state: RequestState,
    pub allocated_at: Option<u64>,
    pub claimed_at: Option<u64>,
}

/// Read-only view of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub state: RequestState,
    pub value_owed: Amount,
    pub eligible_block: u64,
}

/// Result of an allocation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    /// Requests moved to `Allocated`, in order
    pub allocated: Vec<u64>,
    /// Value assigned to them
    pub consumed: Amount,
    /// Liquidity left over for the next pass
    pub carried: Amount,
}

/// FIFO exit queue for one domain
#[derive(Debug, Default)]
pub struct UnstakeQueue {
    requests: Vec<UnstakeRequest>,
    /// Index of the first request still `Queued`
    cursor: usize,
    /// Liquidity not yet assigned to a request
    carried_liquidity: Amount,
}

impl UnstakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that an exit owing `value_owed` may be queued
    pub fn check_create(value_owed: Amount, config: &ProtocolConfig) -> Result<(), StakeError> {
        if value_owed == 0 {
            return Err(StakeError::InvalidAmount(value_owed));
        }
        if value_owed < config.min_unstake_value {
            return Err(StakeError::BelowMinimum {
                owed: value_owed,
                minimum: config.min_unstake_value,
            });
        }
        Ok(())
    }

    /// Queue an exit for tokens already burned
    pub fn create(
        &mut self,
        requestor: Pubkey,
        home: Domain,
        tokens_burned: Amount,
        value_owed: Amount,
        height: u64,
        config: &ProtocolConfig,
    ) -> Result<u64, StakeError> {
        Self::check_create(value_owed, config)?;

        let id = self.requests.len() as u64 + 1;
        self.requests.push(UnstakeRequest {
            id,
            requestor,
            home,
            liquid_token_amount_burned: tokens_burned,
            value_owed,
            block_created: height,
            eligible_block: height.saturating_add(config.blocks_to_finalize),
            state: RequestState::Queued,
            allocated_at: None,
            claimed_at: None,
        });
        Ok(id)
    }

    /// Add liquidity and allocate queued requests in creation order. Stops at
    /// the first request the pool cannot cover in full.
    pub fn allocate(&mut self, available: Amount, height: u64) -> Result<AllocationOutcome, StakeError> {
        let mut pool = self
            .carried_liquidity
            .checked_add(available)
            .ok_or(StakeError::ArithmeticOverflow)?;

        let mut outcome = AllocationOutcome::default();
        while let Some(request) = self.requests.get_mut(self.cursor) {
            if request.value_owed > pool {
                break;
            }
            pool -= request.value_owed;
            request.state = RequestState::Allocated;
            request.allocated_at = Some(height);
            outcome.allocated.push(request.id);
            outcome.consumed += request.value_owed;
            self.cursor += 1;
        }

        self.carried_liquidity = pool;
        outcome.carried = pool;
        Ok(outcome)
    }

    /// Check that `id` can be claimed at `height`
    pub fn check_claim(&self, id: u64, height: u64) -> Result<&UnstakeRequest, StakeError> {
        let request = self.get(id).ok_or(StakeError::UnknownRequest(id))?;
        match request.state {
            RequestState::Queued => Err(StakeError::NotAllocated(id)),
            RequestState::Claimed => Err(StakeError::InvalidRequestState {
                id,
                state: RequestState::Claimed,
            }),
            RequestState::Allocated if height < request.eligible_block => {
                Err(StakeError::TooEarly {
                    id,
                    eligible_block: request.eligible_block,
                    current: height,
                })
            }
            RequestState::Allocated => Ok(request),
        }
    }

    /// Move a checked request to `Claimed`
    pub fn mark_claimed(&mut self, id: u64, height: u64) -> Result<UnstakeRequest, StakeError> {
        self.check_claim(id, height)?;
        let request = self
            .requests
            .get_mut(id as usize - 1)
            .ok_or(StakeError::UnknownRequest(id))?;
        request.state = RequestState::Claimed;
        request.claimed_at = Some(height);
        Ok(request.clone())
    }

    pub fn get(&self, id: u64) -> Option<&UnstakeRequest> {
        id.checked_sub(1)
            .and_then(|index| self.requests.get(index as usize))
    }

    pub fn request_info(&self, id: u64) -> Option<RequestInfo> {
        self.get(id).map(|r| RequestInfo {
            state: r.state,
            value_owed: r.value_owed,
            eligible_block: r.eligible_block,
        })
    }

    /// Value owed to requests still waiting for liquidity
    pub fn queued_value(&self) -> Amount {
        self.requests[self.cursor..]
            .iter()
            .map(|r| r.value_owed)
            .sum()
    }

    /// Queued value not covered by carried liquidity
    pub fn shortfall(&self) -> Amount {
        self.queued_value().saturating_sub(self.carried_liquidity)
    }

    pub fn carried_liquidity(&self) -> Amount {
        self.carried_liquidity
    }

    pub fn requests(&self) -> &[UnstakeRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn restore(&mut self, requests: Vec<UnstakeRequest>, carried_liquidity: Amount) {
        self.cursor = requests
            .iter()
            .position(|r| r.state == RequestState::Queued)
            .unwrap_or(requests.len());
        self.requests = requests;
        self.carried_liquidity = carried_liquidity;
    }
}
