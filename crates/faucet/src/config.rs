//! Faucet configuration

use crate::controller::ClaimRules;
use crate::database::Deployment;
use crate::error::{FaucetError, FaucetResult};
use drip_common::utils::config::load_config;
use drip_common::utils::logging::LoggingConfig;
use drip_common::{Address, Amount};
use drip_token::TokenMetadata;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default identity of the faucet controller (the ledger's minter)
pub const DEFAULT_FAUCET_ADDRESS: u64 = 0xFA0CE7;
/// Default identity of the token ledger
pub const DEFAULT_TOKEN_ADDRESS: u64 = 0xF7C;

// 10^38 is the largest power of ten a u128 holds.
const MAX_DECIMALS: u8 = 38;

/// Faucet service configuration.
///
/// Amounts are decimal strings in base units so that 18-decimal values
/// survive every config format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Database path
    pub db_path: String,

    /// Admin identity; required when deploying
    pub admin: Option<String>,

    /// Identity of the faucet controller
    pub faucet_address: String,

    /// Identity of the token ledger
    pub token_address: String,

    /// Amount granted per claim
    pub faucet_amount: String,

    /// Cooldown period between claims for the same address (seconds)
    pub cooldown_secs: u64,

    /// Maximum amount per address over its lifetime
    pub max_claim_amount: String,

    /// Token name
    pub token_name: String,

    /// Token symbol
    pub token_symbol: String,

    /// Token decimals
    pub token_decimals: u8,

    /// Supply ceiling
    pub max_supply: String,

    /// Buffered events per subscriber before it starts lagging
    pub event_channel_capacity: usize,

    /// Logging
    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        let rules = ClaimRules::default();
        let metadata = TokenMetadata::default();
        Self {
            db_path: "./faucet_data".to_string(),
            admin: None,
            faucet_address: Address::from_low_u64(DEFAULT_FAUCET_ADDRESS).to_string(),
            token_address: Address::from_low_u64(DEFAULT_TOKEN_ADDRESS).to_string(),
            faucet_amount: rules.faucet_amount.to_string(), // 100 FTK
            cooldown_secs: rules.cooldown_secs,             // 24 hours
            max_claim_amount: rules.max_claim_amount.to_string(), // 1000 FTK
            token_name: metadata.name,
            token_symbol: metadata.symbol,
            token_decimals: metadata.decimals,
            max_supply: metadata.max_supply.to_string(), // 1,000,000 FTK
            event_channel_capacity: 1024,
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from a config file (TOML, JSON or YAML), then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        let mut config: FaucetConfig =
            load_config(path).map_err(|e| FaucetError::InvalidConfig(format!("{:#}", e)))?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("DRIP_DB_PATH") {
            self.db_path = db_path;
        }

        if let Ok(admin) = std::env::var("DRIP_ADMIN") {
            self.admin = Some(admin);
        }

        if let Ok(addr) = std::env::var("DRIP_FAUCET_ADDRESS") {
            self.faucet_address = addr;
        }

        if let Ok(addr) = std::env::var("DRIP_TOKEN_ADDRESS") {
            self.token_address = addr;
        }

        if let Ok(amount) = std::env::var("DRIP_FAUCET_AMOUNT") {
            self.faucet_amount = amount;
        }

        if let Ok(cooldown) = std::env::var("DRIP_COOLDOWN_SECS") {
            self.cooldown_secs = parse_secs_or_keep("DRIP_COOLDOWN_SECS", &cooldown, self.cooldown_secs);
        }

        if let Ok(max_amount) = std::env::var("DRIP_MAX_CLAIM_AMOUNT") {
            self.max_claim_amount = max_amount;
        }

        if let Ok(max_supply) = std::env::var("DRIP_MAX_SUPPLY") {
            self.max_supply = max_supply;
        }

        if let Ok(level) = std::env::var("DRIP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Get address cooldown duration
    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Parsed and validated claim rules
    pub fn rules(&self) -> FaucetResult<ClaimRules> {
        let rules = ClaimRules {
            faucet_amount: parse_amount("faucet_amount", &self.faucet_amount)?,
            cooldown_secs: self.cooldown_secs,
            max_claim_amount: parse_amount("max_claim_amount", &self.max_claim_amount)?,
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Parsed token metadata
    pub fn token_metadata(&self) -> FaucetResult<TokenMetadata> {
        if self.token_decimals > MAX_DECIMALS {
            return Err(FaucetError::InvalidConfig(format!(
                "token decimals {} above {}",
                self.token_decimals, MAX_DECIMALS
            )));
        }
        Ok(TokenMetadata {
            name: self.token_name.clone(),
            symbol: self.token_symbol.clone(),
            decimals: self.token_decimals,
            max_supply: parse_amount("max_supply", &self.max_supply)?,
        })
    }

    pub fn admin_address(&self) -> FaucetResult<Address> {
        let admin = self
            .admin
            .as_deref()
            .ok_or_else(|| FaucetError::InvalidConfig("admin address is required".to_string()))?;
        parse_address("admin", admin)
    }

    /// Everything needed to stand up a fresh faucet and ledger pair
    pub fn deployment(&self) -> FaucetResult<Deployment> {
        let deployment = Deployment {
            faucet: parse_address("faucet_address", &self.faucet_address)?,
            token: parse_address("token_address", &self.token_address)?,
            rules: self.rules()?,
            metadata: self.token_metadata()?,
        };

        if deployment.faucet == deployment.token {
            return Err(FaucetError::InvalidConfig(
                "faucet and token must have distinct addresses".to_string(),
            ));
        }
        if deployment.rules.faucet_amount > deployment.metadata.max_supply {
            return Err(FaucetError::InvalidConfig(format!(
                "faucet amount {} exceeds max supply {}",
                deployment.rules.faucet_amount, deployment.metadata.max_supply
            )));
        }

        Ok(deployment)
    }
}

fn parse_secs_or_keep(name: &str, value: &str, current: u64) -> u64 {
    match value.trim().parse() {
        Ok(secs) => secs,
        Err(e) => {
            warn!("Ignoring {}={:?} ({}), keeping {}s", name, value, e, current);
            current
        }
    }
}

fn parse_amount(field: &str, value: &str) -> FaucetResult<Amount> {
    value
        .trim()
        .replace('_', "")
        .parse::<Amount>()
        .map_err(|e| FaucetError::InvalidConfig(format!("{}: {} ({})", field, value, e)))
}

fn parse_address(field: &str, value: &str) -> FaucetResult<Address> {
    value
        .parse::<Address>()
        .map_err(|e| FaucetError::InvalidAddress(format!("{}: {}", field, e)))
}

/// Render a base-unit amount as whole tokens, e.g. `100.5 FTK`
pub fn format_amount(amount: Amount, metadata: &TokenMetadata) -> String {
    let unit: Amount = 10u128.pow(metadata.decimals.into());
    let whole = amount / unit;
    let fraction = amount % unit;
    if fraction == 0 {
        return format!("{} {}", whole, metadata.symbol);
    }
    let digits = format!("{:0width$}", fraction, width = metadata.decimals as usize);
    format!("{}.{} {}", whole, digits.trim_end_matches('0'), metadata.symbol)
}

/// Parse a whole-token amount such as `2.5` into base units
pub fn parse_token_amount(value: &str, decimals: u8) -> FaucetResult<Amount> {
    let invalid = || FaucetError::InvalidConfig(format!("invalid token amount: {}", value));
    let (whole, fraction) = match value.trim().split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value.trim(), ""),
    };
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(invalid());
    }
    if fraction.len() > decimals as usize {
        return Err(invalid());
    }

    let unit: Amount = 10u128.pow(decimals.into());
    let whole: Amount = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let fraction: Amount = if fraction.is_empty() {
        0
    } else {
        let scale = 10u128.pow((decimals as usize - fraction.len()) as u32);
        fraction.parse::<Amount>().map_err(|_| invalid())? * scale
    };

    whole
        .checked_mul(unit)
        .and_then(|base| base.checked_add(fraction))
        .ok_or_else(invalid)
}
