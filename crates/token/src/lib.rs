//! Bounded-mint token ledger.
//!
//! Balances and delegated allowances for a single fungible token whose total
//! supply can never exceed a fixed ceiling. Exactly one identity, the faucet,
//! may mint.

pub mod error;
pub mod events;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use events::LedgerEvent;
pub use ledger::{TokenLedger, TokenMetadata, ONE_TOKEN};
