//! Balance table with a hard supply ceiling and a single minter

use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use drip_common::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// One whole token in base units (18 decimals).
pub const ONE_TOKEN: Amount = 1_000_000_000_000_000_000;

/// Static token description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Global ceiling on minted supply, in base units
    pub max_supply: Amount,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: "Faucet Token".to_string(),
            symbol: "FTK".to_string(),
            decimals: 18,
            max_supply: 1_000_000 * ONE_TOKEN,
        }
    }
}

/// Token ledger.
///
/// Holds every account balance and delegated allowance. Absent accounts read
/// as zero and come into existence on first credit. Invariant:
/// `sum(balances) == total_supply <= metadata.max_supply`.
#[derive(Debug, Clone)]
pub struct TokenLedger {
    address: Address,
    metadata: TokenMetadata,
    faucet: Address,
    total_supply: Amount,
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
}

impl TokenLedger {
    /// Create an empty ledger at `address` whose only minter is `faucet`.
    pub fn new(address: Address, metadata: TokenMetadata, faucet: Address) -> Self {
        info!(
            "Token ledger {} created ({}), minter {}, max supply {}",
            address, metadata.symbol, faucet, metadata.max_supply
        );
        Self {
            address,
            metadata,
            faucet,
            total_supply: 0,
            balances: HashMap::new(),
            allowances: HashMap::new(),
        }
    }

    /// Rebuild a ledger from persisted balances and allowances.
    ///
    /// Total supply is recomputed from the balances and must respect the
    /// ceiling.
    pub fn restore<B, A>(
        address: Address,
        metadata: TokenMetadata,
        faucet: Address,
        balances: B,
        allowances: A,
    ) -> LedgerResult<Self>
    where
        B: IntoIterator<Item = (Address, Amount)>,
        A: IntoIterator<Item = ((Address, Address), Amount)>,
    {
        let balances: HashMap<Address, Amount> = balances.into_iter().collect();
        let mut total_supply: Amount = 0;
        for amount in balances.values() {
            total_supply = total_supply.checked_add(*amount).ok_or_else(|| {
                LedgerError::InconsistentState("balance sum overflows".to_string())
            })?;
        }
        if total_supply > metadata.max_supply {
            return Err(LedgerError::InconsistentState(format!(
                "restored supply {} exceeds ceiling {}",
                total_supply, metadata.max_supply
            )));
        }

        debug!("Restored ledger {} with supply {}", address, total_supply);

        Ok(Self {
            address,
            metadata,
            faucet,
            total_supply,
            balances,
            allowances: allowances.into_iter().collect(),
        })
    }

    /// Identity of this ledger
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn metadata(&self) -> &TokenMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn symbol(&self) -> &str {
        &self.metadata.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.metadata.decimals
    }

    pub fn max_supply(&self) -> Amount {
        self.metadata.max_supply
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// The only identity allowed to mint
    pub fn faucet(&self) -> Address {
        self.faucet
    }

    /// Amount still mintable before the ceiling is hit
    pub fn supply_headroom(&self) -> Amount {
        self.metadata.max_supply - self.total_supply
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    /// Mint `amount` to `to`. Only the faucet may call this.
    pub fn mint(&mut self, caller: &Address, to: &Address, amount: Amount) -> LedgerResult<LedgerEvent> {
        if *caller != self.faucet {
            return Err(LedgerError::Unauthorized { caller: *caller });
        }
        if to.is_zero() {
            return Err(LedgerError::InvalidReceiver(*to));
        }

        let available = self.supply_headroom();
        if amount > available {
            return Err(LedgerError::SupplyExceeded {
                requested: amount,
                available,
            });
        }

        // Cannot overflow: a balance is bounded by total supply, itself bounded by the ceiling.
        *self.balances.entry(*to).or_insert(0) += amount;
        self.total_supply += amount;

        debug!("Minted {} to {}, supply now {}", amount, to, self.total_supply);

        Ok(LedgerEvent::Transfer {
            from: Address::ZERO,
            to: *to,
            amount,
        })
    }

    /// Move `amount` from `from` to `to`. A zero amount succeeds trivially.
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> LedgerResult<LedgerEvent> {
        check_endpoints(from, to)?;

        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                available,
                required: amount,
            });
        }

        if from != to {
            self.balances.insert(*from, available - amount);
            *self.balances.entry(*to).or_insert(0) += amount;
        }

        debug!("Transferred {} from {} to {}", amount, from, to);

        Ok(LedgerEvent::Transfer {
            from: *from,
            to: *to,
            amount,
        })
    }

    /// Set the allowance of `spender` over `owner`'s tokens, replacing any prior value.
    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) -> LedgerEvent {
        self.allowances.insert((*owner, *spender), amount);

        debug!("Approved {} for {} to spend {}", spender, owner, amount);

        LedgerEvent::Approval {
            owner: *owner,
            spender: *spender,
            amount,
        }
    }

    /// Spend `spender`'s allowance to move `amount` from `from` to `to`.
    ///
    /// Both the allowance and the balance are checked before anything is
    /// written. Emits the reduced `Approval` followed by the `Transfer`.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        check_endpoints(from, to)?;

        let allowed = self.allowance(from, spender);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                available: allowed,
                required: amount,
            });
        }

        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                available,
                required: amount,
            });
        }

        let approval = self.approve(from, spender, allowed - amount);
        let transfer = self.transfer(from, to, amount)?;
        Ok(vec![approval, transfer])
    }
}

/// The zero address only ever appears as the source of a mint.
fn check_endpoints(from: &Address, to: &Address) -> LedgerResult<()> {
    if from.is_zero() {
        return Err(LedgerError::InvalidSender(*from));
    }
    if to.is_zero() {
        return Err(LedgerError::InvalidReceiver(*to));
    }
    Ok(())
}
