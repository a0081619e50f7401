//! Shared types for L1/L2 liquid staking integration
//!
//! Types in this crate cross the domain boundary (borsh on the wire, serde on
//! disk and over RPC), so both domain engines and the message bridge depend on
//! them.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod payload;

pub use config::{ConfigError, ProtocolConfig};
pub use payload::Payload;
pub use solana_program::pubkey::Pubkey;

/// Amounts are tracked in gwei, the unit validator balances are reported in
pub type Amount = u128;

/// Base units per whole token
pub const UNITS_PER_TOKEN: Amount = 1_000_000_000;

/// Fixed-point scale for exchange rates (1e18 = 1.0)
pub const RATE_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Denominator for basis point parameters
pub const BASIS_POINTS: u128 = 10_000;

/// Denominator for percentage parameters
pub const PERCENT: u128 = 100;

/// One of the two independently operated chains
#[derive(
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
pub enum Domain {
    /// Primary chain where validators are staked
    L1,
    /// Secondary chain where users contribute value
    L2,
}

impl Domain {
    /// The other domain
    pub fn counterpart(self) -> Self {
        match self {
            Domain::L1 => Domain::L2,
            Domain::L2 => Domain::L1,
        }
    }

    /// Single byte tag used in message digests and storage keys
    pub fn tag(self) -> u8 {
        match self {
            Domain::L1 => 1,
            Domain::L2 => 2,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::L1 => write!(f, "L1"),
            Domain::L2 => write!(f, "L2"),
        }
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L1" => Ok(Domain::L1),
            "L2" => Ok(Domain::L2),
            other => Err(format!("unknown domain: {}", other)),
        }
    }
}

/// A block on the origin chain that an oracle snapshot was taken at
#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
pub struct BlockReference {
    /// Block height
    pub height: u64,
    /// Block hash at that height
    pub hash: [u8; 32],
}

impl BlockReference {
    pub fn new(height: u64, hash: [u8; 32]) -> Self {
        Self { height, hash }
    }
}

/// Multiply then divide without intermediate overflow for the value ranges we
/// track. Returns `None` on division by zero or if the product overflows.
pub fn mul_div(a: Amount, b: Amount, denominator: Amount) -> Option<Amount> {
    if denominator == 0 {
        return None;
    }
    a.checked_mul(b).map(|product| product / denominator)
}
