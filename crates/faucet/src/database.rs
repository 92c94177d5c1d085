//! Faucet database: durable ledger, claim records and event log

use crate::controller::{ClaimRecord, ClaimRules, FaucetState};
use crate::error::{FaucetError, FaucetResult};
use crate::events::{Event, EventRecord};
use drip_common::{Address, Amount, ADDRESS_LENGTH};
use drip_token::TokenMetadata;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError, Transactional};
use sled::{Db, IVec, Tree};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

const DEPLOYMENT_KEY: &[u8] = b"deployment";
const STATE_KEY: &[u8] = b"state";

/// Fixed identities and rules of a faucet/ledger pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Controller identity, the ledger's minter
    pub faucet: Address,
    /// Ledger identity
    pub token: Address,
    pub rules: ClaimRules,
    pub metadata: TokenMetadata,
}

/// Writes produced by one transition, committed atomically
#[derive(Debug, Default)]
pub struct Changeset {
    pub deployment: Option<Deployment>,
    pub state: Option<FaucetState>,
    pub claims: Vec<(Address, ClaimRecord)>,
    pub balances: Vec<(Address, Amount)>,
    pub allowances: Vec<((Address, Address), Amount)>,
    pub events: Vec<EventRecord>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.deployment.is_none()
            && self.state.is_none()
            && self.claims.is_empty()
            && self.balances.is_empty()
            && self.allowances.is_empty()
            && self.events.is_empty()
    }
}

/// Everything needed to rebuild the controller and the ledger
#[derive(Debug)]
pub struct StoredState {
    pub deployment: Deployment,
    pub state: FaucetState,
    pub claims: HashMap<Address, ClaimRecord>,
    pub balances: Vec<(Address, Amount)>,
    pub allowances: Vec<((Address, Address), Amount)>,
}

/// Pre-encoded key/value pairs, so the transaction closure cannot fail on serialization
#[derive(Default)]
struct EncodedChangeset {
    meta: Vec<(&'static [u8], Vec<u8>)>,
    claims: Vec<(Vec<u8>, Vec<u8>)>,
    balances: Vec<(Vec<u8>, Vec<u8>)>,
    allowances: Vec<(Vec<u8>, Vec<u8>)>,
    events: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Faucet database
pub struct FaucetDatabase {
    db: Db,
    /// Tree for ledger balances
    balances: Tree,
    /// Tree for ledger allowances, keyed by owner || spender
    allowances: Tree,
    /// Tree for per-address claim records
    claims: Tree,
    /// Tree for deployment and configuration
    meta: Tree,
    /// Tree for the append-only event log
    events: Tree,
    #[cfg(test)]
    commit_fault: std::sync::atomic::AtomicBool,
}

impl FaucetDatabase {
    /// Create or open faucet database
    pub fn new(path: &str) -> FaucetResult<Self> {
        info!("Opening faucet database at: {}", path);

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024) // 64MB cache
            .open()?;

        Self::from_db(db)
    }

    /// In-memory database removed on drop
    pub fn temporary() -> FaucetResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> FaucetResult<Self> {
        Ok(Self {
            balances: db.open_tree("balances")?,
            allowances: db.open_tree("allowances")?,
            claims: db.open_tree("claims")?,
            meta: db.open_tree("meta")?,
            events: db.open_tree("events")?,
            db,
            #[cfg(test)]
            commit_fault: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn has_deployment(&self) -> FaucetResult<bool> {
        Ok(self.meta.contains_key(DEPLOYMENT_KEY)?)
    }

    /// Next event log position; strictly increasing across restarts
    pub fn next_event_sequence(&self) -> FaucetResult<u64> {
        Ok(self.db.generate_id()?)
    }

    /// Apply a changeset in a single transaction across all trees and flush it
    pub fn commit(&self, changeset: &Changeset) -> FaucetResult<()> {
        if changeset.is_empty() {
            return Ok(());
        }

        #[cfg(test)]
        {
            if self.commit_fault.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(FaucetError::InternalError("injected commit failure".to_string()));
            }
        }

        let encoded = encode(changeset)?;

        let result: Result<(), TransactionError<()>> = (
            &self.balances,
            &self.allowances,
            &self.claims,
            &self.meta,
            &self.events,
        )
            .transaction(
                |(balances, allowances, claims, meta, events)| -> ConflictableTransactionResult<(), ()> {
                    for (key, value) in &encoded.balances {
                        balances.insert(key.as_slice(), value.as_slice())?;
                    }
                    for (key, value) in &encoded.allowances {
                        allowances.insert(key.as_slice(), value.as_slice())?;
                    }
                    for (key, value) in &encoded.claims {
                        claims.insert(key.as_slice(), value.as_slice())?;
                    }
                    for (key, value) in &encoded.meta {
                        meta.insert(*key, value.as_slice())?;
                    }
                    for (key, value) in &encoded.events {
                        events.insert(key.as_slice(), value.as_slice())?;
                    }
                    Ok(())
                },
            );

        result.map_err(|e| match e {
            TransactionError::Abort(()) => FaucetError::InternalError("transaction aborted".to_string()),
            TransactionError::Storage(err) => FaucetError::DatabaseError(err),
        })?;

        self.db.flush()?;

        debug!(
            "Committed {} claim(s), {} balance(s), {} allowance(s), {} event(s)",
            changeset.claims.len(),
            changeset.balances.len(),
            changeset.allowances.len(),
            changeset.events.len()
        );

        Ok(())
    }

    /// Make the next non-empty commit fail before anything is written
    #[cfg(test)]
    pub(crate) fn fail_next_commit(&self) {
        self.commit_fault.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Load the persisted faucet, or `None` if nothing was deployed yet
    pub fn load(&self) -> FaucetResult<Option<StoredState>> {
        let deployment: Deployment = match self.meta.get(DEPLOYMENT_KEY)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => return Ok(None),
        };

        let state: FaucetState = match self.meta.get(STATE_KEY)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => {
                return Err(FaucetError::InternalError(
                    "deployment present without faucet state".to_string(),
                ))
            }
        };

        let mut claims = HashMap::new();
        for item in self.claims.iter() {
            let (key, value) = item?;
            claims.insert(decode_address(&key)?, bincode::deserialize(&value)?);
        }

        let mut balances = Vec::new();
        for item in self.balances.iter() {
            let (key, value) = item?;
            balances.push((decode_address(&key)?, decode_amount(&value)?));
        }

        let mut allowances = Vec::new();
        for item in self.allowances.iter() {
            let (key, value) = item?;
            if key.len() != 2 * ADDRESS_LENGTH {
                return Err(FaucetError::InternalError("Invalid allowance key".to_string()));
            }
            let owner = decode_address(&key[..ADDRESS_LENGTH])?;
            let spender = decode_address(&key[ADDRESS_LENGTH..])?;
            allowances.push(((owner, spender), decode_amount(&value)?));
        }

        info!(
            "Loaded faucet {}: {} claimant(s), {} holder(s)",
            deployment.faucet,
            claims.len(),
            balances.len()
        );

        Ok(Some(StoredState {
            deployment,
            state,
            claims,
            balances,
            allowances,
        }))
    }

    /// Successful claims by `address`, newest first
    pub fn claim_history(&self, address: &Address) -> FaucetResult<Vec<EventRecord>> {
        let mut records = Vec::new();

        for item in self.events.iter().rev() {
            let (_, value) = item?;
            let record: EventRecord = bincode::deserialize(&value)?;
            if matches!(&record.event, Event::TokensClaimed { recipient, .. } if recipient == address) {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Most recent events, newest first
    pub fn recent_events(&self, limit: usize) -> FaucetResult<Vec<EventRecord>> {
        let mut records = Vec::new();

        for item in self.events.iter().rev().take(limit) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }

    /// Get statistics
    pub fn get_statistics(&self) -> FaucetResult<FaucetStatistics> {
        let mut total_claims = 0u64;
        let mut total_distributed: Amount = 0;
        let mut claimants = HashSet::new();

        for item in self.events.iter() {
            let (_, value) = item?;
            let record: EventRecord = bincode::deserialize(&value)?;
            if let Event::TokensClaimed { recipient, amount, .. } = record.event {
                total_claims += 1;
                total_distributed = total_distributed.saturating_add(amount);
                claimants.insert(recipient);
            }
        }

        Ok(FaucetStatistics {
            total_claims,
            unique_claimers: claimants.len() as u64,
            total_distributed,
        })
    }
}

/// Faucet statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetStatistics {
    pub total_claims: u64,
    pub unique_claimers: u64,
    pub total_distributed: Amount,
}

fn encode(changeset: &Changeset) -> FaucetResult<EncodedChangeset> {
    let mut encoded = EncodedChangeset::default();

    if let Some(deployment) = &changeset.deployment {
        encoded.meta.push((DEPLOYMENT_KEY, bincode::serialize(deployment)?));
    }
    if let Some(state) = &changeset.state {
        encoded.meta.push((STATE_KEY, bincode::serialize(state)?));
    }
    for (address, record) in &changeset.claims {
        encoded.claims.push((address.as_bytes().to_vec(), bincode::serialize(record)?));
    }
    for (address, amount) in &changeset.balances {
        encoded.balances.push((address.as_bytes().to_vec(), amount.to_be_bytes().to_vec()));
    }
    for ((owner, spender), amount) in &changeset.allowances {
        let mut key = Vec::with_capacity(2 * ADDRESS_LENGTH);
        key.extend_from_slice(owner.as_bytes());
        key.extend_from_slice(spender.as_bytes());
        encoded.allowances.push((key, amount.to_be_bytes().to_vec()));
    }
    for record in &changeset.events {
        encoded.events.push((record.sequence.to_be_bytes().to_vec(), bincode::serialize(record)?));
    }

    Ok(encoded)
}

fn decode_address(bytes: &[u8]) -> FaucetResult<Address> {
    Address::from_slice(bytes).map_err(|e| FaucetError::InternalError(format!("Invalid address key: {}", e)))
}

fn decode_amount(bytes: &IVec) -> FaucetResult<Amount> {
    let raw: [u8; 16] = bytes
        .as_ref()
        .try_into()
        .map_err(|_| FaucetError::InternalError("Invalid amount format".to_string()))?;
    Ok(Amount::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> Deployment {
        Deployment {
            faucet: Address::from_low_u64(0xfa),
            token: Address::from_low_u64(0x70),
            rules: ClaimRules::default(),
            metadata: TokenMetadata::default(),
        }
    }

    fn claimed(db: &FaucetDatabase, recipient: Address, amount: Amount, timestamp: u64) -> EventRecord {
        EventRecord {
            sequence: db.next_event_sequence().unwrap(),
            timestamp,
            event: Event::TokensClaimed {
                recipient,
                amount,
                timestamp,
            },
        }
    }

    #[test]
    fn test_empty_database_has_no_deployment() {
        let db = FaucetDatabase::temporary().unwrap();
        assert!(!db.has_deployment().unwrap());
        assert!(db.load().unwrap().is_none());
    }

    #[test]
    fn test_commit_and_load() {
        let db = FaucetDatabase::temporary().unwrap();
        let alice = Address::from_low_u64(1);
        let bob = Address::from_low_u64(2);
        let record = ClaimRecord {
            last_claim_at: 100,
            total_claimed: 50,
        };

        let changeset = Changeset {
            deployment: Some(deployment()),
            state: Some(FaucetState::new(Address::from_low_u64(0xad))),
            claims: vec![(alice, record)],
            balances: vec![(alice, 50), (bob, 0)],
            allowances: vec![((alice, bob), 7)],
            events: vec![claimed(&db, alice, 50, 100)],
        };
        db.commit(&changeset).unwrap();

        let stored = db.load().unwrap().unwrap();
        assert_eq!(stored.deployment, deployment());
        assert_eq!(stored.state.admin, Address::from_low_u64(0xad));
        assert_eq!(stored.claims.get(&alice), Some(&record));
        assert!(stored.balances.contains(&(alice, 50)));
        assert!(stored.balances.contains(&(bob, 0)));
        assert_eq!(stored.allowances, vec![((alice, bob), 7)]);
    }

    #[test]
    fn test_history_and_statistics() {
        let db = FaucetDatabase::temporary().unwrap();
        let alice = Address::from_low_u64(1);
        let bob = Address::from_low_u64(2);

        let events = vec![
            claimed(&db, alice, 100, 10),
            claimed(&db, bob, 100, 20),
            claimed(&db, alice, 100, 30),
        ];
        db.commit(&Changeset {
            events,
            ..Changeset::default()
        })
        .unwrap();

        let history = db.claim_history(&alice).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, 30);
        assert_eq!(history[1].timestamp, 10);

        let recent = db.recent_events(1).unwrap();
        assert_eq!(recent[0].timestamp, 30);

        let stats = db.get_statistics().unwrap();
        assert_eq!(
            stats,
            FaucetStatistics {
                total_claims: 3,
                unique_claimers: 2,
                total_distributed: 300,
            }
        );
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db");
        let path = path.to_str().unwrap();

        {
            let db = FaucetDatabase::new(path).unwrap();
            db.commit(&Changeset {
                deployment: Some(deployment()),
                state: Some(FaucetState::new(Address::from_low_u64(0xad))),
                ..Changeset::default()
            })
            .unwrap();
        }

        let db = FaucetDatabase::new(path).unwrap();
        assert!(db.has_deployment().unwrap());
        assert_eq!(db.load().unwrap().unwrap().deployment, deployment());
    }
}
