//! Tollgate operator console.
//!
//! Drives the fee-bearing asset, its fee collection and claims, and the
//! stake/redeem treasury against a local, file-backed ledger.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod keys;
mod ledger;

use commands::Context;
use config::CliConfig;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Fee-bearing asset, fee claims and 1:1 treasury wrapper")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default ~/.tollgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Signing keypair file, overrides the configured one
    #[arg(short, long, global = true)]
    key: Option<PathBuf>,

    /// Ledger file, overrides the configured one
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a keypair file
    Keygen {
        /// Output path (default: the configured keypair path)
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },

    /// Print the address of the signing keypair
    Address,

    /// Print a derived address
    Derive {
        /// fee-config | escrow | extra-metas | treasury | wrapper-mint | vault | token-account
        kind: String,
        /// Mint (or base mint for treasury kinds)
        #[arg(long)]
        mint: String,
        /// Treasury authority or token account owner (default: signer)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Create an empty ledger file
    InitLedger {
        #[arg(long)]
        force: bool,
    },

    /// Create a mint; the signer becomes mint authority
    CreateMint {
        #[arg(long, default_value = "9")]
        decimals: u8,
        /// Total transfer fee in basis points
        #[arg(long, default_value = "0")]
        fee_bps: u16,
        /// Cap on the fee withheld from one transfer, in smallest units
        #[arg(long, default_value_t = u64::MAX)]
        max_fee: u64,
        /// Install the fee transfer hook and hand withheld fees to the fee config
        #[arg(long)]
        fee_bearing: bool,
        /// Keypair file for the new mint (default: generated, not saved)
        #[arg(long)]
        mint_key: Option<PathBuf>,
    },

    /// Create the signer's (or --owner's) token account for a mint
    CreateAccount {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        owner: Option<String>,
    },

    /// Mint new units to an owner's token account
    MintTo {
        #[arg(long)]
        mint: String,
        /// Receiving owner
        #[arg(long)]
        to: String,
        /// Amount in whole units, e.g. 12.5
        amount: String,
    },

    /// Transfer from the signer's token account to another owner's
    Transfer {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        to: String,
        amount: String,
    },

    /// Create the fee config, escrow and extra account list of a mint
    InitFees {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        holders_bps: u16,
        #[arg(long)]
        marketing_bps: u16,
        #[arg(long)]
        liquidity_bps: u16,
        /// Holders pool token account
        #[arg(long)]
        holders: String,
        /// Marketing token account
        #[arg(long)]
        marketing: String,
        /// Liquidity token account
        #[arg(long)]
        liquidity: String,
    },

    /// Rotate recipient token accounts; run sync-metas afterwards
    SetRecipients {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        holders: String,
        #[arg(long)]
        marketing: String,
        #[arg(long)]
        liquidity: String,
    },

    /// Rebuild the transfer hook's extra account list from the fee config
    SyncMetas {
        #[arg(long)]
        mint: String,
    },

    /// Sweep withheld fees into the escrow
    Collect {
        #[arg(long)]
        mint: String,
    },

    /// Claim a category's fees into its registered recipient
    Claim {
        #[arg(long)]
        mint: String,
        /// marketing | liquidity | holders
        #[arg(long)]
        category: String,
        amount: String,
    },

    /// Pay the holders pool out pro-rata, one claim per holder
    ClaimHolders {
        #[arg(long)]
        mint: String,
        /// Print the allocation without submitting
        #[arg(long)]
        dry_run: bool,
    },

    /// Print a holder snapshot
    Holders {
        #[arg(long)]
        mint: String,
    },

    /// Show and reconcile claims whose confirmation is unknown
    PendingClaims,

    /// Show the fee config and escrow of a mint
    FeeStatus {
        #[arg(long)]
        mint: String,
    },

    /// Create a treasury over a base mint; the signer is its authority
    CreateTreasury {
        #[arg(long)]
        base_mint: String,
    },

    /// Deposit base asset and receive wrapper asset 1:1
    Stake {
        #[arg(long)]
        treasury: String,
        amount: String,
    },

    /// Burn wrapper asset and receive base asset 1:1
    Redeem {
        #[arg(long)]
        treasury: String,
        amount: String,
    },

    /// Show vault balance against wrapper supply
    TreasuryStatus {
        #[arg(long)]
        treasury: String,
    },

    /// Dump an account
    Account {
        address: String,
        /// Print the fixed-layout bytes as base64
        #[arg(long)]
        raw: bool,
    },

    /// Print recent ledger events
    Events {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;
    let ctx = Context::new(config, cli.key, cli.ledger);

    match cli.command {
        Commands::Keygen { out, force } => commands::keygen(&ctx, out, force),
        Commands::Address => commands::address(&ctx),
        Commands::Derive { kind, mint, owner } => commands::derive(&ctx, &kind, &mint, owner),
        Commands::InitLedger { force } => commands::init_ledger(&ctx, force),
        Commands::CreateMint {
            decimals,
            fee_bps,
            max_fee,
            fee_bearing,
            mint_key,
        } => commands::create_mint(&ctx, decimals, fee_bps, max_fee, fee_bearing, mint_key),
        Commands::CreateAccount { mint, owner } => commands::create_account(&ctx, &mint, owner),
        Commands::MintTo { mint, to, amount } => commands::mint_to(&ctx, &mint, &to, &amount),
        Commands::Transfer { mint, to, amount } => commands::transfer(&ctx, &mint, &to, &amount),
        Commands::InitFees {
            mint,
            holders_bps,
            marketing_bps,
            liquidity_bps,
            holders,
            marketing,
            liquidity,
        } => commands::init_fees(
            &ctx,
            &mint,
            [holders_bps, marketing_bps, liquidity_bps],
            [&holders, &marketing, &liquidity],
        ),
        Commands::SetRecipients {
            mint,
            holders,
            marketing,
            liquidity,
        } => commands::set_recipients(&ctx, &mint, [&holders, &marketing, &liquidity]),
        Commands::SyncMetas { mint } => commands::sync_metas(&ctx, &mint),
        Commands::Collect { mint } => commands::collect(&ctx, &mint),
        Commands::Claim {
            mint,
            category,
            amount,
        } => commands::claim(&ctx, &mint, &category, &amount),
        Commands::ClaimHolders { mint, dry_run } => commands::claim_holders(&ctx, &mint, dry_run),
        Commands::Holders { mint } => commands::holders(&ctx, &mint),
        Commands::PendingClaims => commands::pending_claims(&ctx),
        Commands::FeeStatus { mint } => commands::fee_status(&ctx, &mint),
        Commands::CreateTreasury { base_mint } => commands::create_treasury(&ctx, &base_mint),
        Commands::Stake { treasury, amount } => commands::stake(&ctx, &treasury, &amount),
        Commands::Redeem { treasury, amount } => commands::redeem(&ctx, &treasury, &amount),
        Commands::TreasuryStatus { treasury } => commands::treasury_status(&ctx, &treasury),
        Commands::Account { address, raw } => commands::account(&ctx, &address, raw),
        Commands::Events { limit } => commands::events(&ctx, limit),
    }
}
