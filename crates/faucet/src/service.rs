//! Faucet service core logic.
//!
//! Owns the controller and the ledger behind a single lock so every
//! transition is applied one at a time. A transition runs in memory, its
//! changes and events are committed to the database in one transaction, and
//! only then are the events published. If the commit fails the in-memory
//! state is rebuilt from the database.

use crate::clock::Clock;
use crate::controller::{ClaimRecord, FaucetController, FaucetState};
use crate::database::{Changeset, Deployment, FaucetDatabase, StoredState};
use crate::error::{FaucetError, FaucetResult};
use crate::events::{Event, EventPublisher, EventRecord, EventSubscriber};
use drip_common::{Address, Amount, Timestamp};
use drip_token::{TokenLedger, TokenMetadata};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Controller and ledger, mutated together
struct FaucetCore {
    controller: FaucetController,
    ledger: TokenLedger,
}

impl FaucetCore {
    fn fresh(deployment: &Deployment, admin: Address) -> FaucetResult<Self> {
        Ok(Self {
            controller: FaucetController::new(deployment.faucet, admin, deployment.rules)?,
            ledger: TokenLedger::new(deployment.token, deployment.metadata.clone(), deployment.faucet),
        })
    }

    fn restore(stored: StoredState) -> FaucetResult<Self> {
        let StoredState {
            deployment,
            state,
            claims,
            balances,
            allowances,
        } = stored;

        Ok(Self {
            controller: FaucetController::restore(deployment.faucet, deployment.rules, state, claims)?,
            ledger: TokenLedger::restore(
                deployment.token,
                deployment.metadata,
                deployment.faucet,
                balances,
                allowances,
            )?,
        })
    }

    /// Current values of everything the given events touched
    fn changeset_for(&self, events: &[Event]) -> Changeset {
        let mut changeset = Changeset::default();

        for event in events {
            match event {
                Event::Transfer { from, to, .. } => {
                    for address in [from, to] {
                        if !address.is_zero() && !changeset.balances.iter().any(|(a, _)| a == address) {
                            changeset.balances.push((*address, self.ledger.balance_of(address)));
                        }
                    }
                }
                Event::Approval { owner, spender, .. } => {
                    changeset
                        .allowances
                        .push(((*owner, *spender), self.ledger.allowance(owner, spender)));
                }
                Event::TokensClaimed { recipient, .. } => {
                    changeset
                        .claims
                        .push((*recipient, self.controller.claim_record(recipient)));
                }
                Event::FaucetPaused { .. } | Event::TokenConfigured { .. } => {
                    changeset.state = Some(self.controller.state().clone());
                }
            }
        }

        changeset
    }
}

/// Faucet service
pub struct FaucetService {
    database: Arc<FaucetDatabase>,
    clock: Arc<dyn Clock>,
    core: Mutex<FaucetCore>,
    publisher: EventPublisher,
}

impl FaucetService {
    /// Create a fresh faucet and ledger with no token bound yet.
    ///
    /// The ledger is created with the faucet as its minter; the admin still
    /// has to bind it with [`FaucetService::set_token`].
    pub fn deploy(
        deployment: Deployment,
        admin: Address,
        database: FaucetDatabase,
        clock: Arc<dyn Clock>,
        event_capacity: usize,
    ) -> FaucetResult<Self> {
        if database.has_deployment()? {
            return Err(FaucetError::InvalidConfig(
                "database already holds a deployment".to_string(),
            ));
        }

        let core = FaucetCore::fresh(&deployment, admin)?;
        database.commit(&Changeset {
            deployment: Some(deployment.clone()),
            state: Some(core.controller.state().clone()),
            ..Changeset::default()
        })?;

        info!(
            "Deployed faucet {} with token {} (admin {})",
            deployment.faucet, deployment.token, admin
        );

        Ok(Self::from_parts(database, clock, core, event_capacity))
    }

    /// Deploy and bind the token in one go, as a fresh network would.
    pub async fn bootstrap(
        deployment: Deployment,
        admin: Address,
        database: FaucetDatabase,
        clock: Arc<dyn Clock>,
        event_capacity: usize,
    ) -> FaucetResult<Self> {
        let token = deployment.token;
        let service = Self::deploy(deployment, admin, database, clock, event_capacity)?;
        service.set_token(&admin, token).await?;
        Ok(service)
    }

    /// Reopen a previously deployed faucet
    pub fn open(database: FaucetDatabase, clock: Arc<dyn Clock>, event_capacity: usize) -> FaucetResult<Self> {
        let stored = database.load()?.ok_or_else(|| {
            FaucetError::InvalidConfig("no faucet deployed in this database".to_string())
        })?;
        let core = FaucetCore::restore(stored)?;

        Ok(Self::from_parts(database, clock, core, event_capacity))
    }

    fn from_parts(
        database: FaucetDatabase,
        clock: Arc<dyn Clock>,
        core: FaucetCore,
        event_capacity: usize,
    ) -> Self {
        Self {
            database: Arc::new(database),
            clock,
            core: Mutex::new(core),
            publisher: EventPublisher::new(event_capacity),
        }
    }

    /// Run one transition under the lock, persist it, then publish its events.
    async fn execute<T, F>(&self, operation: F) -> FaucetResult<T>
    where
        F: FnOnce(&mut FaucetCore, Timestamp) -> FaucetResult<(T, Vec<Event>)>,
    {
        let mut core = self.core.lock().await;
        let now = self.clock.now();

        let (value, events) = operation(&mut *core, now)?;

        let mut changeset = core.changeset_for(&events);
        let persisted = self
            .record_events(&mut changeset, events, now)
            .and_then(|_| self.database.commit(&changeset));

        if let Err(e) = persisted {
            error!("Failed to persist transition: {}", e);
            match self.database.load() {
                Ok(Some(stored)) => match FaucetCore::restore(stored) {
                    Ok(restored) => *core = restored,
                    Err(reload) => error!("Failed to restore state after commit failure: {}", reload),
                },
                Ok(None) => error!("Deployment vanished from database"),
                Err(reload) => error!("Failed to reload state after commit failure: {}", reload),
            }
            return Err(e);
        }
        drop(core);

        for record in changeset.events {
            self.publisher.publish(record);
        }

        Ok(value)
    }

    fn record_events(&self, changeset: &mut Changeset, events: Vec<Event>, now: Timestamp) -> FaucetResult<()> {
        for event in events {
            changeset.events.push(EventRecord {
                sequence: self.database.next_event_sequence()?,
                timestamp: now,
                event,
            });
        }
        Ok(())
    }

    /// Claim tokens for `caller`
    pub async fn request_tokens(&self, caller: &Address) -> FaucetResult<ClaimReceipt> {
        self.execute(|core, now| {
            let events = core.controller.request_tokens(caller, now, &mut core.ledger)?;
            let record = core.controller.claim_record(caller);

            let amount = events
                .iter()
                .find_map(|event| match event {
                    Event::TokensClaimed { amount, .. } => Some(*amount),
                    _ => None,
                })
                .unwrap_or_default();

            let receipt = ClaimReceipt {
                recipient: *caller,
                amount,
                timestamp: now,
                total_claimed: record.total_claimed,
                remaining_allowance: core.controller.remaining_allowance(caller),
                balance: core.ledger.balance_of(caller),
            };
            Ok((receipt, events))
        })
        .await
    }

    /// Pause or resume claims. Admin only.
    pub async fn set_paused(&self, caller: &Address, paused: bool) -> FaucetResult<()> {
        self.execute(|core, _| {
            let event = core.controller.set_paused(caller, paused)?;
            Ok(((), vec![event]))
        })
        .await
    }

    /// Bind the ledger to the faucet. Admin only, once.
    pub async fn set_token(&self, caller: &Address, token: Address) -> FaucetResult<()> {
        self.execute(|core, _| {
            let event = core.controller.set_token(caller, token)?;
            Ok(((), vec![event]))
        })
        .await
    }

    pub async fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> FaucetResult<()> {
        self.execute(|core, _| {
            let event = core.ledger.transfer(from, to, amount)?;
            Ok(((), vec![event.into()]))
        })
        .await
    }

    pub async fn approve(&self, owner: &Address, spender: &Address, amount: Amount) -> FaucetResult<()> {
        self.execute(|core, _| {
            let event = core.ledger.approve(owner, spender, amount);
            Ok(((), vec![event.into()]))
        })
        .await
    }

    pub async fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> FaucetResult<()> {
        self.execute(|core, _| {
            let events = core.ledger.transfer_from(spender, from, to, amount)?;
            Ok(((), events.into_iter().map(Event::from).collect()))
        })
        .await
    }

    /// Advisory eligibility check at the current time
    pub async fn can_claim(&self, address: &Address) -> bool {
        let now = self.clock.now();
        self.core.lock().await.controller.can_claim(address, now)
    }

    pub async fn remaining_allowance(&self, address: &Address) -> Amount {
        self.core.lock().await.controller.remaining_allowance(address)
    }

    pub async fn claim_record(&self, address: &Address) -> ClaimRecord {
        self.core.lock().await.controller.claim_record(address)
    }

    /// Seconds until `address` may claim again
    pub async fn cooldown_remaining(&self, address: &Address) -> u64 {
        let now = self.clock.now();
        self.core.lock().await.controller.cooldown_remaining(address, now)
    }

    /// Earliest time `address` may claim again, `None` if it never claimed
    pub async fn next_claim_at(&self, address: &Address) -> Option<Timestamp> {
        self.core.lock().await.controller.next_claim_at(address)
    }

    pub async fn balance_of(&self, address: &Address) -> Amount {
        self.core.lock().await.ledger.balance_of(address)
    }

    pub async fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.core.lock().await.ledger.allowance(owner, spender)
    }

    pub async fn total_supply(&self) -> Amount {
        self.core.lock().await.ledger.total_supply()
    }

    pub async fn faucet_state(&self) -> FaucetState {
        self.core.lock().await.controller.state().clone()
    }

    pub async fn token_metadata(&self) -> TokenMetadata {
        self.core.lock().await.ledger.metadata().clone()
    }

    /// Per-address report for clients rendering eligibility and countdowns
    pub async fn account(&self, address: &Address) -> AccountStatus {
        let now = self.clock.now();
        let core = self.core.lock().await;
        let record = core.controller.claim_record(address);

        AccountStatus {
            address: *address,
            balance: core.ledger.balance_of(address),
            can_claim: core.controller.can_claim(address, now),
            last_claim_at: record.last_claim_at,
            total_claimed: record.total_claimed,
            remaining_allowance: core.controller.remaining_allowance(address),
            cooldown_remaining: core.controller.cooldown_remaining(address, now),
            next_claim_at: core.controller.next_claim_at(address),
        }
    }

    /// Get faucet status
    pub async fn get_status(&self) -> FaucetResult<FaucetStatus> {
        // Statistics are read under the lock so they match the supply.
        let core = self.core.lock().await;
        let stats = self.database.get_statistics()?;
        let state = core.controller.state();
        let rules = core.controller.rules();

        Ok(FaucetStatus {
            faucet: core.controller.address(),
            admin: state.admin,
            token: state.token,
            is_paused: state.is_paused,
            token_name: core.ledger.name().to_string(),
            token_symbol: core.ledger.symbol().to_string(),
            decimals: core.ledger.decimals(),
            faucet_amount: rules.faucet_amount,
            cooldown_secs: rules.cooldown_secs,
            max_claim_amount: rules.max_claim_amount,
            total_supply: core.ledger.total_supply(),
            max_supply: core.ledger.max_supply(),
            total_claims: stats.total_claims,
            unique_claimers: stats.unique_claimers,
            total_distributed: stats.total_distributed,
        })
    }

    /// Successful claims by `address`, newest first
    pub fn claim_history(&self, address: &Address) -> FaucetResult<Vec<EventRecord>> {
        self.database.claim_history(address)
    }

    /// Most recent events, newest first
    pub fn recent_events(&self, limit: usize) -> FaucetResult<Vec<EventRecord>> {
        self.database.recent_events(limit)
    }

    /// Live feed of committed events, optionally only those involving `address`
    pub fn subscribe(&self, address: Option<Address>) -> EventSubscriber {
        self.publisher.subscribe(address)
    }
}

/// Result of a successful claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub recipient: Address,
    pub amount: Amount,
    pub timestamp: Timestamp,
    pub total_claimed: Amount,
    pub remaining_allowance: Amount,
    pub balance: Amount,
}

/// Per-address view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub address: Address,
    pub balance: Amount,
    pub can_claim: bool,
    pub last_claim_at: Timestamp,
    pub total_claimed: Amount,
    pub remaining_allowance: Amount,
    pub cooldown_remaining: u64,
    pub next_claim_at: Option<Timestamp>,
}

/// Faucet status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetStatus {
    pub faucet: Address,
    pub admin: Address,
    pub token: Option<Address>,
    pub is_paused: bool,
    pub token_name: String,
    pub token_symbol: String,
    pub decimals: u8,
    pub faucet_amount: Amount,
    pub cooldown_secs: u64,
    pub max_claim_amount: Amount,
    pub total_supply: Amount,
    pub max_supply: Amount,
    pub total_claims: u64,
    pub unique_claimers: u64,
    pub total_distributed: Amount,
}
