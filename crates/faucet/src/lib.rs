//! Token faucet for test networks.
//!
//! Hands out a fixed amount of a capped token to any address, subject to:
//! - a cooldown between claims by the same address
//! - a lifetime cap per address
//! - the token's supply ceiling
//! - an admin-controlled pause switch
//!
//! State is kept in a sled database and every committed transition is
//! published to live subscribers.

pub mod clock;
pub mod config;
pub mod controller;
pub mod database;
pub mod error;
pub mod events;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FaucetConfig;
pub use controller::{ClaimRecord, ClaimRules, FaucetController, FaucetState, Minter};
pub use database::{Changeset, Deployment, FaucetDatabase, FaucetStatistics};
pub use error::{FaucetError, FaucetResult};
pub use events::{Event, EventPublisher, EventRecord, EventSubscriber};
pub use service::{AccountStatus, ClaimReceipt, FaucetService, FaucetStatus};
