//! Exchange-Rate Ledger
//!
//! Holds aggregate controlled value and liquid token supply. The rate is
//! always derived from the accumulators, never stored.
//!
//! Burning redeems at the pre-burn rate and moves the redeemed value into
//! `reserved_for_exits`: it stays controlled until an exit is actually paid,
//! but it no longer backs outstanding tokens. Both mint and burn round down,
//! so neither can lower the rate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stake_types::{mul_div, Amount, Pubkey, RATE_PRECISION};

use crate::error::StakeError;

/// Liquid token accounting for one domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateLedger {
    /// Value controlled by the protocol, including value owed to exits
    total_controlled_value: Amount,
    /// Value redeemed by burns and not yet paid out
    reserved_for_exits: Amount,
    /// Liquid tokens outstanding
    liquid_token_supply: Amount,
    /// Per-holder token balances
    balances: BTreeMap<Pubkey, Amount>,
}

/// Read-only view of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_controlled_value: Amount,
    pub reserved_for_exits: Amount,
    pub liquid_token_supply: Amount,
    /// Exchange rate scaled by `RATE_PRECISION`
    pub exchange_rate: Amount,
}

impl ExchangeRateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value backing outstanding tokens
    pub fn backing_value(&self) -> Amount {
        self.total_controlled_value - self.reserved_for_exits
    }

    /// Value per token, scaled by `RATE_PRECISION`. 1:1 while supply is zero.
    pub fn exchange_rate(&self) -> Amount {
        if self.liquid_token_supply == 0 {
            return RATE_PRECISION;
        }
        mul_div(self.backing_value(), RATE_PRECISION, self.liquid_token_supply)
            .unwrap_or(Amount::MAX)
    }

    /// Add validated returns. Raises the rate for every holder.
    pub fn record_value_increase(&mut self, amount: Amount) -> Result<(), StakeError> {
        self.check_value_increase(amount)?;
        self.total_controlled_value += amount;
        Ok(())
    }

    /// Check that `record_value_increase(amount)` would succeed
    pub fn check_value_increase(&self, amount: Amount) -> Result<(), StakeError> {
        if amount == 0 {
            return Err(StakeError::InvalidAmount(amount));
        }
        self.total_controlled_value
            .checked_add(amount)
            .ok_or(StakeError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Tokens that `value` would mint right now
    pub fn preview_mint(&self, value: Amount, supply_cap: Amount) -> Result<Amount, StakeError> {
        if value == 0 {
            return Err(StakeError::InvalidAmount(value));
        }

        let tokens = if self.liquid_token_supply == 0 {
            value
        } else {
            mul_div(value, self.liquid_token_supply, self.backing_value())
                .ok_or(StakeError::ArithmeticOverflow)?
        };
        if tokens == 0 {
            return Err(StakeError::InvalidAmount(value));
        }

        let resulting = self
            .liquid_token_supply
            .checked_add(tokens)
            .ok_or(StakeError::ArithmeticOverflow)?;
        if resulting > supply_cap {
            return Err(StakeError::SupplyCapExceeded {
                resulting,
                cap: supply_cap,
            });
        }
        self.total_controlled_value
            .checked_add(value)
            .ok_or(StakeError::ArithmeticOverflow)?;

        Ok(tokens)
    }

    /// Mint tokens for value already received by this domain
    pub fn mint(
        &mut self,
        recipient: Pubkey,
        value: Amount,
        supply_cap: Amount,
    ) -> Result<Amount, StakeError> {
        let tokens = self.preview_mint(value, supply_cap)?;

        self.total_controlled_value += value;
        self.liquid_token_supply += tokens;
        *self.balances.entry(recipient).or_default() += tokens;

        Ok(tokens)
    }

    /// Value that burning `tokens` from `holder` would redeem right now
    pub fn preview_burn(&self, holder: &Pubkey, tokens: Amount) -> Result<Amount, StakeError> {
        if tokens == 0 {
            return Err(StakeError::InvalidAmount(tokens));
        }
        let available = self.balance_of(holder);
        if available < tokens {
            return Err(StakeError::InsufficientBalance {
                available,
                requested: tokens,
            });
        }
        mul_div(tokens, self.backing_value(), self.liquid_token_supply)
            .ok_or(StakeError::ArithmeticOverflow)
    }

    /// Burn tokens at the current rate. The redeemed value is reserved for
    /// the exit and leaves the ledger only through `settle_exit`.
    pub fn burn(&mut self, holder: &Pubkey, tokens: Amount) -> Result<Amount, StakeError> {
        let value = self.preview_burn(holder, tokens)?;

        if let Some(balance) = self.balances.get_mut(holder) {
            *balance -= tokens;
            if *balance == 0 {
                self.balances.remove(holder);
            }
        }
        self.liquid_token_supply -= tokens;
        self.reserved_for_exits += value;

        Ok(value)
    }

    /// Check that `settle_exit(value)` would succeed
    pub fn check_settle_exit(&self, value: Amount) -> Result<(), StakeError> {
        if value > self.reserved_for_exits {
            return Err(StakeError::InsufficientBalance {
                available: self.reserved_for_exits,
                requested: value,
            });
        }
        Ok(())
    }

    /// Release reserved value to a paid exit
    pub fn settle_exit(&mut self, value: Amount) -> Result<(), StakeError> {
        self.check_settle_exit(value)?;
        self.reserved_for_exits -= value;
        self.total_controlled_value -= value;
        Ok(())
    }

    pub fn total_controlled_value(&self) -> Amount {
        self.total_controlled_value
    }

    pub fn reserved_for_exits(&self) -> Amount {
        self.reserved_for_exits
    }

    pub fn liquid_token_supply(&self) -> Amount {
        self.liquid_token_supply
    }

    /// Token balance of a holder
    pub fn balance_of(&self, holder: &Pubkey) -> Amount {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    /// Number of holders with a non-zero balance
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            total_controlled_value: self.total_controlled_value,
            reserved_for_exits: self.reserved_for_exits,
            liquid_token_supply: self.liquid_token_supply,
            exchange_rate: self.exchange_rate(),
        }
    }
}
