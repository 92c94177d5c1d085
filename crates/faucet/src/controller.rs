//! Claim authorization and minting rules.
//!
//! The controller owns the per-address claim records and the faucet
//! configuration (admin, bound token, pause flag). A claim re-checks every
//! rule, mints through the bound ledger, and only then updates the claim
//! record, so a rejected mint leaves nothing behind.

use crate::error::{FaucetError, FaucetResult};
use crate::events::Event;
use drip_common::{Address, Amount, Timestamp};
use drip_token::{LedgerError, LedgerEvent, LedgerResult, TokenLedger, ONE_TOKEN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Mint capability the controller needs from a ledger
pub trait Minter {
    /// Identity of the ledger, compared against the bound token
    fn address(&self) -> Address;

    fn mint(&mut self, minter: &Address, to: &Address, amount: Amount) -> LedgerResult<LedgerEvent>;
}

impl Minter for TokenLedger {
    fn address(&self) -> Address {
        TokenLedger::address(self)
    }

    fn mint(&mut self, minter: &Address, to: &Address, amount: Amount) -> LedgerResult<LedgerEvent> {
        TokenLedger::mint(self, minter, to, amount)
    }
}

/// Distribution rules, fixed at deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRules {
    /// Grant per claim
    pub faucet_amount: Amount,
    /// Minimum seconds between two claims by one address
    pub cooldown_secs: u64,
    /// Lifetime cap per address
    pub max_claim_amount: Amount,
}

impl Default for ClaimRules {
    fn default() -> Self {
        Self {
            faucet_amount: 100 * ONE_TOKEN,
            cooldown_secs: 24 * 60 * 60,
            max_claim_amount: 1_000 * ONE_TOKEN,
        }
    }
}

impl ClaimRules {
    pub fn validate(&self) -> FaucetResult<()> {
        if self.faucet_amount == 0 {
            return Err(FaucetError::InvalidConfig("faucet amount must be positive".to_string()));
        }
        if self.faucet_amount > self.max_claim_amount {
            return Err(FaucetError::InvalidConfig(format!(
                "faucet amount {} exceeds lifetime cap {}",
                self.faucet_amount, self.max_claim_amount
            )));
        }
        Ok(())
    }
}

/// Per-address claim history. Absent addresses read as `ClaimRecord::default()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Time of the last successful claim, 0 if never claimed
    pub last_claim_at: Timestamp,
    /// Cumulative amount granted
    pub total_claimed: Amount,
}

impl ClaimRecord {
    pub fn has_claimed(&self) -> bool {
        self.last_claim_at != 0
    }
}

/// Admin-controlled configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetState {
    pub admin: Address,
    /// Bound ledger, set once
    pub token: Option<Address>,
    pub is_paused: bool,
}

impl FaucetState {
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            token: None,
            is_paused: false,
        }
    }
}

/// Faucet controller
#[derive(Debug, Clone)]
pub struct FaucetController {
    address: Address,
    rules: ClaimRules,
    state: FaucetState,
    claims: HashMap<Address, ClaimRecord>,
}

impl FaucetController {
    /// Create a controller with no bound token.
    ///
    /// `address` is the controller's own identity, the one the ledger accepts
    /// as minter.
    pub fn new(address: Address, admin: Address, rules: ClaimRules) -> FaucetResult<Self> {
        Self::restore(address, rules, FaucetState::new(admin), HashMap::new())
    }

    /// Rebuild a controller from persisted state
    pub fn restore(
        address: Address,
        rules: ClaimRules,
        state: FaucetState,
        claims: HashMap<Address, ClaimRecord>,
    ) -> FaucetResult<Self> {
        rules.validate()?;
        if let Some((address, record)) = claims
            .iter()
            .find(|(_, record)| record.total_claimed > rules.max_claim_amount)
        {
            return Err(FaucetError::InvalidConfig(format!(
                "claim record for {} exceeds lifetime cap: {}",
                address, record.total_claimed
            )));
        }

        Ok(Self {
            address,
            rules,
            state,
            claims,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn rules(&self) -> &ClaimRules {
        &self.rules
    }

    pub fn state(&self) -> &FaucetState {
        &self.state
    }

    pub fn admin(&self) -> Address {
        self.state.admin
    }

    pub fn token(&self) -> Option<Address> {
        self.state.token
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused
    }

    pub fn claim_record(&self, address: &Address) -> ClaimRecord {
        self.claims.get(address).copied().unwrap_or_default()
    }

    pub fn last_claim_at(&self, address: &Address) -> Timestamp {
        self.claim_record(address).last_claim_at
    }

    pub fn total_claimed(&self, address: &Address) -> Amount {
        self.claim_record(address).total_claimed
    }

    /// Number of addresses that have claimed at least once
    pub fn claimant_count(&self) -> usize {
        self.claims.len()
    }

    /// Amount `address` may still receive over its lifetime
    pub fn remaining_allowance(&self, address: &Address) -> Amount {
        self.rules
            .max_claim_amount
            .saturating_sub(self.total_claimed(address))
    }

    /// Earliest time `address` may claim again, `None` if it never claimed
    pub fn next_claim_at(&self, address: &Address) -> Option<Timestamp> {
        let record = self.claim_record(address);
        record
            .has_claimed()
            .then(|| record.last_claim_at.saturating_add(self.rules.cooldown_secs))
    }

    /// Seconds left on the cooldown of `address` at `now`.
    ///
    /// A clock that went backwards counts as no time elapsed, so this never
    /// exceeds the configured cooldown.
    pub fn cooldown_remaining(&self, address: &Address, now: Timestamp) -> u64 {
        let record = self.claim_record(address);
        if !record.has_claimed() {
            return 0;
        }
        let elapsed = now.saturating_sub(record.last_claim_at);
        self.rules.cooldown_secs.saturating_sub(elapsed)
    }

    /// Advisory eligibility: pause, cooldown and lifetime cap.
    ///
    /// Supply headroom is not considered; `request_tokens` re-runs every check.
    pub fn can_claim(&self, address: &Address, now: Timestamp) -> bool {
        !address.is_zero()
            && self.ensure_not_paused().is_ok()
            && self.ensure_cooldown_elapsed(address, now).is_ok()
            && self.grant_for(address).is_ok()
    }

    /// Claim on behalf of `caller` at `now`, minting through `ledger`.
    ///
    /// Returns the ledger `Transfer` followed by `TokensClaimed`.
    pub fn request_tokens<M: Minter>(
        &mut self,
        caller: &Address,
        now: Timestamp,
        ledger: &mut M,
    ) -> FaucetResult<Vec<Event>> {
        self.ensure_not_paused()?;

        let token = self.state.token.ok_or(FaucetError::TokenNotConfigured)?;
        if ledger.address() != token {
            return Err(FaucetError::TokenMismatch {
                expected: token,
                actual: ledger.address(),
            });
        }

        if caller.is_zero() {
            return Err(FaucetError::InvalidAddress("claimant cannot be the zero address".to_string()));
        }

        if let Err(e) = self.ensure_cooldown_elapsed(caller, now) {
            warn!("Claim by {} rejected: {}", caller, e);
            return Err(e);
        }

        let amount = match self.grant_for(caller) {
            Ok(amount) => amount,
            Err(e) => {
                warn!("Claim by {} rejected: {}", caller, e);
                return Err(e);
            }
        };

        let transfer = ledger
            .mint(&self.address, caller, amount)
            .map_err(|e| match e {
                LedgerError::SupplyExceeded { requested, available } => {
                    warn!("Claim by {} rejected: supply exhausted", caller);
                    FaucetError::SupplyExceeded { requested, available }
                }
                other => FaucetError::Ledger(other),
            })?;

        // The mint committed; the record update below cannot fail.
        let record = self.claims.entry(*caller).or_default();
        record.last_claim_at = now;
        record.total_claimed += amount;

        info!(
            "Claim by {}: granted {}, lifetime total {}",
            caller, amount, record.total_claimed
        );

        Ok(vec![
            transfer.into(),
            Event::TokensClaimed {
                recipient: *caller,
                amount,
                timestamp: now,
            },
        ])
    }

    /// Pause or resume claims. Admin only.
    pub fn set_paused(&mut self, caller: &Address, paused: bool) -> FaucetResult<Event> {
        self.ensure_admin(caller)?;

        self.state.is_paused = paused;
        info!("Faucet {}", if paused { "paused" } else { "resumed" });

        Ok(Event::FaucetPaused { paused })
    }

    /// Bind the ledger this faucet mints through. Admin only, once.
    pub fn set_token(&mut self, caller: &Address, token: Address) -> FaucetResult<Event> {
        self.ensure_admin(caller)?;

        if let Some(existing) = self.state.token {
            return Err(FaucetError::AlreadyConfigured(existing));
        }
        if token.is_zero() {
            return Err(FaucetError::InvalidAddress("token cannot be the zero address".to_string()));
        }

        self.state.token = Some(token);
        info!("Token {} bound to faucet {}", token, self.address);

        Ok(Event::TokenConfigured { token })
    }

    fn ensure_admin(&self, caller: &Address) -> FaucetResult<()> {
        if *caller != self.state.admin {
            warn!("Unauthorized admin call from {}", caller);
            return Err(FaucetError::Unauthorized { caller: *caller });
        }
        Ok(())
    }

    fn ensure_not_paused(&self) -> FaucetResult<()> {
        if self.state.is_paused {
            return Err(FaucetError::FaucetPaused);
        }
        Ok(())
    }

    fn ensure_cooldown_elapsed(&self, address: &Address, now: Timestamp) -> FaucetResult<()> {
        let remaining_secs = self.cooldown_remaining(address, now);
        if remaining_secs > 0 {
            return Err(FaucetError::CooldownActive { remaining_secs });
        }
        Ok(())
    }

    /// Grant for the next claim: the per-claim amount, or whatever is left
    /// of the lifetime cap if that is smaller.
    fn grant_for(&self, address: &Address) -> FaucetResult<Amount> {
        let remaining = self.remaining_allowance(address);
        if remaining == 0 {
            return Err(FaucetError::LifetimeLimitReached);
        }

        let amount = self.rules.faucet_amount.min(remaining);
        debug!("Next grant for {}: {} of {} remaining", address, amount, remaining);
        Ok(amount)
    }
}
