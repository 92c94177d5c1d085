//! Error types for the faucet

use drip_common::{Address, Amount};
use drip_token::LedgerError;
use thiserror::Error;

/// Faucet errors.
///
/// Every variant aborts the whole operation; nothing is partially applied.
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Faucet is paused")]
    FaucetPaused,

    #[error("Token not configured")]
    TokenNotConfigured,

    #[error("Token already configured: {0}")]
    AlreadyConfigured(Address),

    #[error("Ledger {actual} is not the bound token {expected}")]
    TokenMismatch { expected: Address, actual: Address },

    #[error("Cooldown period not elapsed: try again in {remaining_secs} seconds")]
    CooldownActive { remaining_secs: u64 },

    #[error("Lifetime claim limit reached")]
    LifetimeLimitReached,

    #[error("Supply ceiling exceeded: requested {requested}, available {available}")]
    SupplyExceeded { requested: Amount, available: Amount },

    #[error("Unauthorized: {caller} is not the admin")]
    Unauthorized { caller: Address },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl FaucetError {
    /// Stable machine-readable code a caller can branch on
    pub fn code(&self) -> &'static str {
        match self {
            FaucetError::FaucetPaused => "FAUCET_PAUSED",
            FaucetError::TokenNotConfigured => "TOKEN_NOT_CONFIGURED",
            FaucetError::AlreadyConfigured(_) => "ALREADY_CONFIGURED",
            FaucetError::TokenMismatch { .. } => "TOKEN_MISMATCH",
            FaucetError::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            FaucetError::LifetimeLimitReached => "LIFETIME_LIMIT_REACHED",
            FaucetError::SupplyExceeded { .. } => "SUPPLY_EXCEEDED",
            FaucetError::Unauthorized { .. } => "UNAUTHORIZED",
            FaucetError::InvalidAddress(_) => "INVALID_ADDRESS",
            FaucetError::InvalidConfig(_) => "INVALID_CONFIG",
            FaucetError::Ledger(err) => err.code(),
            FaucetError::DatabaseError(_) => "DATABASE_ERROR",
            FaucetError::Serialization(_) => "SERIALIZATION_ERROR",
            FaucetError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors a user can clear by waiting or by the admin unpausing
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            FaucetError::CooldownActive { .. }
                | FaucetError::LifetimeLimitReached
                | FaucetError::FaucetPaused
        )
    }
}

impl From<bincode::Error> for FaucetError {
    fn from(err: bincode::Error) -> Self {
        FaucetError::Serialization(err.to_string())
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
