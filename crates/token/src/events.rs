use drip_common::{Address, Amount};
use serde::{Deserialize, Serialize};

/// Events emitted by ledger operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// Balance movement; mints use the zero address as `from`
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    /// Allowance overwritten
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
}
