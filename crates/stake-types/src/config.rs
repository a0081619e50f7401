//! Protocol Parameters
//!
//! Every tunable number the engines read lives here. A config is validated
//! once and then shared immutably; changing a parameter means building a new
//! snapshot and swapping it in.

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;
use thiserror::Error;

use crate::{Amount, BASIS_POINTS, PERCENT, UNITS_PER_TOKEN};

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{parameter} = {value} is outside the valid range {range}")]
    OutOfRange {
        parameter: &'static str,
        value: String,
        range: &'static str,
    },
}

/// Protocol parameters for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Protocol fee taken from gross returns, in basis points [0, 10000]
    pub fee_basis_points: u16,
    /// Share of net returns paid to operators, in basis points [0, 10000]
    pub operator_share_basis_points: u16,
    /// Staker share of the secondary reward stream, in percent [0, 100]
    pub secondary_staker_percent: u8,
    /// Ceiling on liquid token supply (> 0)
    pub supply_cap: Amount,
    /// Smallest exit an unstake request may owe
    pub min_unstake_value: Amount,
    /// Blocks an unstake request waits before it can be claimed (>= 1)
    pub blocks_to_finalize: u64,
    /// Confirmation depth before an oracle snapshot is final (>= 1)
    pub finalization_block_number_delta: u64,
    /// Largest tolerated absolute change between finalized snapshots (> 0)
    pub max_absolute_delta: Amount,
    /// Largest tolerated relative change, in basis points [1, 10000]
    pub max_relative_delta_bps: u16,
    /// Receives protocol fees
    pub treasury: Pubkey,
    /// Receives the staker share of the secondary stream
    pub secondary_staker_recipient: Pubkey,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            fee_basis_points: 1_000,
            operator_share_basis_points: 500,
            secondary_staker_percent: 92,
            supply_cap: 10_000_000 * UNITS_PER_TOKEN,
            min_unstake_value: UNITS_PER_TOKEN / 10,
            blocks_to_finalize: 7_200,
            finalization_block_number_delta: 64,
            max_absolute_delta: 1_000 * UNITS_PER_TOKEN,
            max_relative_delta_bps: 100,
            treasury: Pubkey::default(),
            secondary_staker_recipient: Pubkey::default(),
        }
    }
}

impl ProtocolConfig {
    /// Check every parameter against its documented range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fee_basis_points as u128 > BASIS_POINTS {
            return Err(out_of_range("fee_basis_points", self.fee_basis_points, "[0, 10000]"));
        }
        if self.operator_share_basis_points as u128 > BASIS_POINTS {
            return Err(out_of_range(
                "operator_share_basis_points",
                self.operator_share_basis_points,
                "[0, 10000]",
            ));
        }
        if self.secondary_staker_percent as u128 > PERCENT {
            return Err(out_of_range(
                "secondary_staker_percent",
                self.secondary_staker_percent,
                "[0, 100]",
            ));
        }
        if self.supply_cap == 0 {
            return Err(out_of_range("supply_cap", self.supply_cap, "(0, max]"));
        }
        if self.blocks_to_finalize == 0 {
            return Err(out_of_range("blocks_to_finalize", self.blocks_to_finalize, "[1, max]"));
        }
        if self.finalization_block_number_delta == 0 {
            return Err(out_of_range(
                "finalization_block_number_delta",
                self.finalization_block_number_delta,
                "[1, max]",
            ));
        }
        if self.max_absolute_delta == 0 {
            return Err(out_of_range("max_absolute_delta", self.max_absolute_delta, "(0, max]"));
        }
        if self.max_relative_delta_bps == 0 || self.max_relative_delta_bps as u128 > BASIS_POINTS {
            return Err(out_of_range(
                "max_relative_delta_bps",
                self.max_relative_delta_bps,
                "[1, 10000]",
            ));
        }
        Ok(())
    }

    /// Operator share of the secondary stream, in percent
    pub fn secondary_operator_percent(&self) -> u8 {
        (PERCENT as u8).saturating_sub(self.secondary_staker_percent)
    }
}

fn out_of_range(parameter: &'static str, value: impl ToString, range: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        parameter,
        value: value.to_string(),
        range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ProtocolConfig::default().validate().is_ok());
        assert_eq!(ProtocolConfig::default().secondary_operator_percent(), 8);
    }

    #[test]
    fn test_fee_out_of_range_rejected() {
        let config = ProtocolConfig {
            fee_basis_points: 10_001,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { parameter: "fee_basis_points", .. }
        ));
    }

    #[test]
    fn test_zero_relative_bound_rejected() {
        let config = ProtocolConfig {
            max_relative_delta_bps: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ProtocolConfig = serde_json::from_str(r#"{"fee_basis_points": 0}"#).unwrap();
        assert_eq!(config.fee_basis_points, 0);
        assert_eq!(config.secondary_staker_percent, 92);
    }
}
