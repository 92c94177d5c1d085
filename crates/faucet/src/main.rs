//! `drip` command line

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use drip_common::utils::logging::init_logging;
use drip_common::Address;
use drip_faucet::config::{format_amount, parse_token_amount};
use drip_faucet::{FaucetConfig, FaucetDatabase, FaucetError, FaucetService, SystemClock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Token faucet CLI
#[derive(Parser, Debug)]
#[command(name = "drip", author, version, about = "Test-network token faucet", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database path
    #[arg(long, value_name = "DIR")]
    db_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy the faucet and its token, then bind them
    Init {
        /// Admin address, overrides the config
        #[arg(long)]
        admin: Option<Address>,
    },
    /// Claim tokens for an address
    Claim { address: Address },
    /// Whether an address may claim right now
    CanClaim { address: Address },
    /// Amount an address may still claim over its lifetime
    AllowanceLeft { address: Address },
    /// Full claim status of an address
    Account { address: Address },
    /// Token balance of an address
    Balance { address: Address },
    /// Stop all claims
    Pause {
        #[arg(long)]
        caller: Address,
    },
    /// Resume claims
    Unpause {
        #[arg(long)]
        caller: Address,
    },
    /// Move tokens, amount in whole tokens (e.g. 2.5)
    Transfer {
        #[arg(long)]
        from: Address,
        to: Address,
        amount: String,
    },
    /// Let a spender move tokens on behalf of an owner
    Approve {
        #[arg(long)]
        owner: Address,
        spender: Address,
        amount: String,
    },
    /// Move tokens using an allowance
    TransferFrom {
        #[arg(long)]
        spender: Address,
        from: Address,
        to: Address,
        amount: String,
    },
    /// Amount a spender may still move for an owner
    Allowance { owner: Address, spender: Address },
    /// Faucet configuration and totals
    Status,
    /// Past claims of an address
    History { address: Address },
    /// Most recent events
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FaucetConfig::from_file(path)?,
        None => FaucetConfig::from_env(),
    };

    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    // Keep the guard so file logs are flushed on exit.
    let _guard = init_logging(&config.logging).map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    if let Err(e) = run(cli.command, config).await {
        match e.downcast_ref::<FaucetError>() {
            Some(faucet_error) => error!("{} ({})", faucet_error, faucet_error.code()),
            None => error!("{:#}", e),
        }
        return Err(e);
    }

    Ok(())
}

async fn run(command: Commands, config: FaucetConfig) -> anyhow::Result<()> {
    let database = FaucetDatabase::new(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    let clock = Arc::new(SystemClock);

    if let Commands::Init { admin } = command {
        let admin = match admin {
            Some(admin) => admin,
            None => config.admin_address()?,
        };
        let deployment = config.deployment()?;
        info!("Rules: {:?}", deployment.rules);

        let service =
            FaucetService::bootstrap(deployment, admin, database, clock, config.event_channel_capacity).await?;
        return print(&service.get_status().await?);
    }

    let service = FaucetService::open(database, clock, config.event_channel_capacity)
        .context("run `drip init` first")?;
    let metadata = service.token_metadata().await;
    let amount = |value: &str| parse_token_amount(value, metadata.decimals);

    match command {
        Commands::Init { .. } => Err(anyhow!("faucet already deployed at {}", config.db_path)),
        Commands::Claim { address } => {
            let receipt = service.request_tokens(&address).await?;
            info!(
                "Sent {} to {} (balance {})",
                format_amount(receipt.amount, &metadata),
                address,
                format_amount(receipt.balance, &metadata)
            );
            print(&receipt)
        }
        Commands::CanClaim { address } => print(&service.can_claim(&address).await),
        Commands::AllowanceLeft { address } => print(&service.remaining_allowance(&address).await),
        Commands::Account { address } => print(&service.account(&address).await),
        Commands::Balance { address } => print(&service.balance_of(&address).await),
        Commands::Pause { caller } => {
            service.set_paused(&caller, true).await?;
            print(&service.faucet_state().await)
        }
        Commands::Unpause { caller } => {
            service.set_paused(&caller, false).await?;
            print(&service.faucet_state().await)
        }
        Commands::Transfer { from, to, amount: value } => {
            service.transfer(&from, &to, amount(&value)?).await?;
            print(&service.balance_of(&from).await)
        }
        Commands::Approve { owner, spender, amount: value } => {
            service.approve(&owner, &spender, amount(&value)?).await?;
            print(&service.allowance(&owner, &spender).await)
        }
        Commands::TransferFrom {
            spender,
            from,
            to,
            amount: value,
        } => {
            service.transfer_from(&spender, &from, &to, amount(&value)?).await?;
            print(&service.allowance(&from, &spender).await)
        }
        Commands::Allowance { owner, spender } => print(&service.allowance(&owner, &spender).await),
        Commands::Status => print(&service.get_status().await?),
        Commands::History { address } => print(&service.claim_history(&address)?),
        Commands::Events { limit } => print(&service.recent_events(limit)?),
    }
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
