//! Shared building blocks for the drip workspace: the address type, logging
//! setup and configuration file loading.

pub mod types;
pub mod utils;

pub use types::{Address, AddressError, Amount, Timestamp, ADDRESS_LENGTH};
