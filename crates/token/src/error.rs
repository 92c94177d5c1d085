//! Error types for the token ledger

use drip_common::{Address, Amount};
use thiserror::Error;

/// Ledger errors. Every failure leaves balances, allowances and supply untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Unauthorized: {caller} is not the minter")]
    Unauthorized { caller: Address },

    #[error("Supply ceiling exceeded: requested {requested}, available {available}")]
    SupplyExceeded { requested: Amount, available: Amount },

    #[error("Invalid receiver: {0}")]
    InvalidReceiver(Address),

    #[error("Invalid sender: {0}")]
    InvalidSender(Address),

    #[error("Insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: Amount, required: Amount },

    #[error("Insufficient allowance: have {available}, need {required}")]
    InsufficientAllowance { available: Amount, required: Amount },

    #[error("Inconsistent ledger state: {0}")]
    InconsistentState(String),
}

impl LedgerError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Unauthorized { .. } => "UNAUTHORIZED",
            LedgerError::SupplyExceeded { .. } => "SUPPLY_EXCEEDED",
            LedgerError::InvalidReceiver(_) => "INVALID_RECEIVER",
            LedgerError::InvalidSender(_) => "INVALID_SENDER",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::InsufficientAllowance { .. } => "INSUFFICIENT_ALLOWANCE",
            LedgerError::InconsistentState(_) => "INCONSISTENT_STATE",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
