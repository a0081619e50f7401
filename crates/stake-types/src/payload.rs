//! Cross-domain instructions
//!
//! The message bridge treats payloads as opaque bytes. These are the
//! instructions the domain engines encode into them.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

use crate::Amount;

/// Instruction carried by a cross-domain message
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Value received on the sending domain; mint liquid tokens for it
    Mint { recipient: Pubkey, value: Amount },

    /// Operator reward earned on the sending domain, credited on the receiver
    RewardCredit {
        epoch_id: u64,
        operator: Pubkey,
        amount: Amount,
    },

    /// Liquidity released for queued exits
    QueueFunding { amount: Amount },

    /// Exit request made on the sending domain; burn and queue on the receiver
    Unstake { requestor: Pubkey, token_amount: Amount },

    /// A claimed exit owed to an account homed on the receiver
    ExitPayout {
        request_id: u64,
        recipient: Pubkey,
        value: Amount,
    },

    /// The sender's exit queue needs this much more liquidity
    FundRequest { amount: Amount },
}

impl Payload {
    /// Encode for the message bridge
    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    /// Decode a delivered payload
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Mint { .. } => "mint",
            Payload::RewardCredit { .. } => "reward_credit",
            Payload::QueueFunding { .. } => "queue_funding",
            Payload::Unstake { .. } => "unstake",
            Payload::ExitPayout { .. } => "exit_payout",
            Payload::FundRequest { .. } => "fund_request",
        }
    }
}
