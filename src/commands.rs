use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use tracing::{info, warn};

use tollgate_core::address::{
    extra_account_metas_address, fee_config_address, fee_escrow_address, programs,
    token_account_address, treasury_address, treasury_vault_address, wrapper_mint_address,
};
use tollgate_core::claim::{self, ClaimJournal};
use tollgate_core::client::{read_record, require_record, submit_with_retry};
use tollgate_core::collect::load_fee_state;
use tollgate_core::fee_config::{FeeCategory, FeeRates, FeeRecipients};
use tollgate_core::hook::ExtraAccountMetaList;
use tollgate_core::holders::{default_exceptions, HolderSnapshot};
use tollgate_core::operation::{Confirmation, Operation};
use tollgate_core::token::TransferFee;
use tollgate_core::treasury::{self, Treasury};
use tollgate_core::units::{format_ui_amount, parse_ui_amount};
use tollgate_core::{Address, AssetLedger, Keypair, LocalClient, Signer, TollError};

use crate::config::CliConfig;
use crate::keys::{load_keypair, write_keypair};
use crate::ledger::{FileJournal, LedgerStore};

pub struct Context {
    config: CliConfig,
    key_path: PathBuf,
    store: LedgerStore,
}

impl Context {
    pub fn new(config: CliConfig, key: Option<PathBuf>, ledger: Option<PathBuf>) -> Self {
        let key_path = key.unwrap_or_else(|| config.keypair_path.clone());
        let store = LedgerStore::new(ledger.unwrap_or_else(|| config.ledger_path.clone()));
        Self {
            config,
            key_path,
            store,
        }
    }

    fn signer(&self) -> Result<Keypair> {
        load_keypair(&self.key_path)
    }

    fn journal(&self) -> Result<FileJournal> {
        FileJournal::open(&self.config.claim_journal_path)
    }

    /// Run `f` against the ledger and persist whatever committed, even when `f` fails part way.
    fn with_ledger<T>(&self, f: impl FnOnce(&mut LocalClient) -> Result<T>) -> Result<T> {
        let mut client = self.store.open()?;
        let height = client.ledger().meta.height;
        let result = f(&mut client);
        if client.ledger().meta.height != height {
            self.store.save(&client)?;
        }
        result
    }

    fn submit(&self, operation: Operation, signers: &[&dyn Signer]) -> Result<Confirmation> {
        let retry = self.config.retry();
        self.with_ledger(|client| Ok(submit_with_retry(client, &operation, signers, retry)?))
    }
}

fn parse_address(input: &str, what: &str) -> Result<Address> {
    input
        .parse::<Address>()
        .with_context(|| format!("invalid {what}"))
}

fn owner_or_signer(ctx: &Context, owner: Option<String>) -> Result<Address> {
    match owner {
        Some(owner) => parse_address(&owner, "owner"),
        None => Ok(ctx.signer()?.address()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ui_amount(client: &LocalClient, mint: &Address, input: &str) -> Result<u64> {
    let decimals = client.ledger().mint(mint)?.decimals;
    Ok(parse_ui_amount(input, decimals)?)
}

pub fn keygen(ctx: &Context, out: Option<PathBuf>, force: bool) -> Result<()> {
    let path = out.unwrap_or_else(|| ctx.key_path.clone());
    let keypair = Keypair::generate();
    write_keypair(&path, &keypair, force)?;
    info!(path = %path.display(), "keypair written");
    println!("{}", keypair.address());
    Ok(())
}

pub fn address(ctx: &Context) -> Result<()> {
    println!("{}", ctx.signer()?.address());
    Ok(())
}

pub fn derive(ctx: &Context, kind: &str, mint: &str, owner: Option<String>) -> Result<()> {
    let mint = parse_address(mint, "mint")?;
    let derived = match kind {
        "fee-config" => fee_config_address(&mint)?,
        "escrow" => fee_escrow_address(&mint)?,
        "extra-metas" => extra_account_metas_address(&mint)?,
        "treasury" => treasury_address(&mint, &owner_or_signer(ctx, owner)?)?,
        "wrapper-mint" => wrapper_mint_address(&treasury_address(&mint, &owner_or_signer(ctx, owner)?)?)?,
        "vault" => treasury_vault_address(&treasury_address(&mint, &owner_or_signer(ctx, owner)?)?)?,
        "token-account" => token_account_address(&owner_or_signer(ctx, owner)?, &mint)?,
        other => bail!("unknown derived address kind {other:?}"),
    };
    println!("{derived}");
    Ok(())
}

pub fn init_ledger(ctx: &Context, force: bool) -> Result<()> {
    ctx.store.init(force)?;
    println!("{}", ctx.store.path().display());
    Ok(())
}

pub fn create_mint(
    ctx: &Context,
    decimals: u8,
    fee_bps: u16,
    max_fee: u64,
    fee_bearing: bool,
    mint_key: Option<PathBuf>,
) -> Result<()> {
    let authority = ctx.signer()?;
    let mint = match mint_key {
        Some(path) if path.exists() => load_keypair(&path)?,
        Some(path) => {
            let keypair = Keypair::generate();
            write_keypair(&path, &keypair, false)?;
            keypair
        }
        None => Keypair::generate(),
    };
    if fee_bps > 0 && !fee_bearing {
        warn!("fees withheld by a mint without --fee-bearing can never be swept");
    }
    let fee_config = fee_config_address(&mint.address())?;
    let operation = Operation::CreateMint {
        mint: mint.address(),
        decimals,
        mint_authority: authority.address(),
        transfer_fee: TransferFee {
            basis_points: fee_bps,
            maximum_fee: max_fee,
        },
        withdraw_withheld_authority: fee_bearing.then_some(fee_config),
        transfer_hook_program: fee_bearing.then(programs::fee_program),
    };
    ctx.submit(operation, &[&mint, &authority])?;
    println!("{}", mint.address());
    Ok(())
}

pub fn create_account(ctx: &Context, mint: &str, owner: Option<String>) -> Result<()> {
    let payer = ctx.signer()?;
    let mint = parse_address(mint, "mint")?;
    let owner = match owner {
        Some(owner) => parse_address(&owner, "owner")?,
        None => payer.address(),
    };
    let operation = Operation::CreateTokenAccount {
        owner,
        mint,
        payer: payer.address(),
    };
    match ctx.submit(operation, &[&payer]) {
        Ok(_) => {}
        Err(err) => match err.downcast_ref::<TollError>() {
            Some(TollError::AlreadyInitialized { account }) => {
                info!(%account, "token account already exists");
            }
            _ => return Err(err),
        },
    }
    println!("{}", token_account_address(&owner, &mint)?);
    Ok(())
}

pub fn mint_to(ctx: &Context, mint: &str, to: &str, amount: &str) -> Result<()> {
    let authority = ctx.signer()?;
    let mint = parse_address(mint, "mint")?;
    let destination = token_account_address(&parse_address(to, "recipient")?, &mint)?;
    let retry = ctx.config.retry();
    let confirmation = ctx.with_ledger(|client| {
        let amount = ui_amount(client, &mint, amount)?;
        let operation = Operation::MintTo {
            mint,
            destination,
            amount,
        };
        Ok(submit_with_retry(client, &operation, &[&authority], retry)?)
    })?;
    print_json(&confirmation)
}

pub fn transfer(ctx: &Context, mint: &str, to: &str, amount: &str) -> Result<()> {
    let owner = ctx.signer()?;
    let mint = parse_address(mint, "mint")?;
    let source = token_account_address(&owner.address(), &mint)?;
    let destination = token_account_address(&parse_address(to, "recipient")?, &mint)?;
    let retry = ctx.config.retry();
    let confirmation = ctx.with_ledger(|client| {
        let record = client.ledger().mint(&mint)?;
        let amount = parse_ui_amount(amount, record.decimals)?;
        let extra_accounts = if record.transfer_hook_program.is_some() {
            let metas_at = extra_account_metas_address(&mint)?;
            read_record::<ExtraAccountMetaList>(&*client, &metas_at)?
                .map(|list| list.addresses())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let operation = Operation::Transfer {
            source,
            destination,
            mint,
            amount,
            decimals: record.decimals,
            extra_accounts,
        };
        Ok(submit_with_retry(client, &operation, &[&owner], retry)?)
    })?;
    print_json(&confirmation)
}

fn recipients(accounts: [&String; 3]) -> Result<FeeRecipients> {
    Ok(FeeRecipients {
        holders: parse_address(accounts[0], "holders recipient")?,
        marketing: parse_address(accounts[1], "marketing recipient")?,
        liquidity: parse_address(accounts[2], "liquidity recipient")?,
    })
}

pub fn init_fees(ctx: &Context, mint: &str, bps: [u16; 3], accounts: [&String; 3]) -> Result<()> {
    let authority = ctx.signer()?;
    let mint = parse_address(mint, "mint")?;
    let rates = FeeRates {
        holders: bps[0],
        marketing: bps[1],
        liquidity: bps[2],
    };
    rates.validate()?;
    let operation = Operation::InitializeFeeConfig {
        mint,
        authority: authority.address(),
        rates,
        recipients: recipients(accounts)?,
    };
    match ctx.submit(operation, &[&authority]) {
        Ok(_) => {}
        Err(err) => match err.downcast_ref::<TollError>() {
            Some(TollError::AlreadyInitialized { account }) => {
                warn!(%account, "fee config already initialized; nothing changed");
            }
            _ => return Err(err),
        },
    }
    println!("{}", fee_config_address(&mint)?);
    Ok(())
}

pub fn set_recipients(ctx: &Context, mint: &str, accounts: [&String; 3]) -> Result<()> {
    let authority = ctx.signer()?;
    let mint = parse_address(mint, "mint")?;
    let operation = Operation::SetFeeRecipients {
        mint,
        authority: authority.address(),
        recipients: recipients(accounts)?,
    };
    ctx.submit(operation, &[&authority])?;
    warn!("transfers fail until `tollgate sync-metas` rebuilds the extra account list");
    Ok(())
}

pub fn sync_metas(ctx: &Context, mint: &str) -> Result<()> {
    let authority = ctx.signer()?;
    let operation = Operation::SyncExtraAccountMetas {
        mint: parse_address(mint, "mint")?,
        authority: authority.address(),
    };
    let confirmation = ctx.submit(operation, &[&authority])?;
    print_json(&confirmation)
}

pub fn collect(ctx: &Context, mint: &str) -> Result<()> {
    let authority = ctx.signer()?;
    let mint = parse_address(mint, "mint")?;
    let options = ctx.config.collect_options();
    let report = ctx.with_ledger(|client| {
        Ok(tollgate_core::collect::collect(client, &mint, &authority, options)?)
    })?;
    print_json(&report)
}

pub fn claim(ctx: &Context, mint: &str, category: &str, amount: &str) -> Result<()> {
    let authority = ctx.signer()?;
    let mint = parse_address(mint, "mint")?;
    let category: FeeCategory = category.parse()?;
    let mut journal = ctx.journal()?;
    let retry = ctx.config.retry();
    let confirmation = ctx.with_ledger(|client| {
        let amount = ui_amount(client, &mint, amount)?;
        Ok(claim::claim(
            client,
            &mut journal,
            &authority,
            &mint,
            category,
            amount,
            retry,
        )?)
    })?;
    print_json(&confirmation)
}

fn snapshot(ctx: &Context, client: &LocalClient, mint: &Address) -> Result<HolderSnapshot> {
    let (config_at, config, _) = load_fee_state(client, mint)?;
    let mut exceptions = default_exceptions(&config_at, &config);
    exceptions.extend(ctx.config.exceptions()?);
    Ok(HolderSnapshot::capture(client, mint, &exceptions)?)
}

#[derive(Serialize)]
struct Allocation {
    token_account: Address,
    owner: Address,
    amount: u64,
}

pub fn claim_holders(ctx: &Context, mint: &str, dry_run: bool) -> Result<()> {
    let mint = parse_address(mint, "mint")?;
    if dry_run {
        let client = ctx.store.open()?;
        let snapshot = snapshot(ctx, &client, &mint)?;
        let pool = load_fee_state(&client, &mint)?.1.unclaimed(FeeCategory::Holders);
        let allocation: Vec<Allocation> = snapshot
            .allocate(pool)?
            .into_iter()
            .map(|(holder, amount)| Allocation {
                token_account: holder.token_account,
                owner: holder.owner,
                amount,
            })
            .collect();
        return print_json(&allocation);
    }

    let authority = ctx.signer()?;
    let mut journal = ctx.journal()?;
    let retry = ctx.config.retry();
    let report = ctx.with_ledger(|client| {
        let snapshot = snapshot(ctx, client, &mint)?;
        Ok(claim::claim_holders(
            client,
            &mut journal,
            &authority,
            &snapshot,
            retry,
        )?)
    })?;
    if !report.failed.is_empty() {
        warn!(
            failed = report.failed.len(),
            "some holder claims failed; rerun claim-holders to pay the remainder"
        );
    }
    print_json(&report)
}

pub fn holders(ctx: &Context, mint: &str) -> Result<()> {
    let mint = parse_address(mint, "mint")?;
    let client = ctx.store.open()?;
    print_json(&snapshot(ctx, &client, &mint)?)
}

#[derive(Serialize)]
struct PendingReport {
    reconcile: claim::ReconcileReport,
    still_pending: Vec<claim::PendingClaim>,
}

pub fn pending_claims(ctx: &Context) -> Result<()> {
    let mut journal = ctx.journal()?;
    let client = ctx.store.open()?;
    let reconcile = claim::reconcile(&client, &mut journal)?;
    print_json(&PendingReport {
        reconcile,
        still_pending: journal.claims().pending(),
    })
}

#[derive(Serialize)]
struct FeeStatus {
    fee_config: Address,
    config: tollgate_core::FeeConfig,
    escrow_balance: u64,
    escrow_balance_ui: String,
}

pub fn fee_status(ctx: &Context, mint: &str) -> Result<()> {
    let mint = parse_address(mint, "mint")?;
    let client = ctx.store.open()?;
    let (fee_config, config, escrow) = load_fee_state(&client, &mint)?;
    let decimals = client.ledger().mint(&mint)?.decimals;
    print_json(&FeeStatus {
        fee_config,
        config,
        escrow_balance: escrow.amount,
        escrow_balance_ui: format_ui_amount(escrow.amount, decimals),
    })
}

#[derive(Serialize)]
struct TreasuryView {
    treasury: Address,
    record: Treasury,
}

pub fn create_treasury(ctx: &Context, base_mint: &str) -> Result<()> {
    let authority = ctx.signer()?;
    let base_mint = parse_address(base_mint, "base mint")?;
    let retry = ctx.config.retry();
    let (treasury, record) = ctx.with_ledger(|client| {
        Ok(treasury::create_treasury_idempotent(
            client, &base_mint, &authority, retry,
        )?)
    })?;
    print_json(&TreasuryView { treasury, record })
}

pub fn stake(ctx: &Context, treasury: &str, amount: &str) -> Result<()> {
    let user = ctx.signer()?;
    let at = parse_address(treasury, "treasury")?;
    let retry = ctx.config.retry();
    let confirmation = ctx.with_ledger(|client| {
        let record: Treasury = require_record(&*client, &at)?;
        let amount = ui_amount(client, &record.base_mint, amount)?;
        Ok(treasury::stake(client, &at, &user, amount, retry)?)
    })?;
    print_json(&confirmation)
}

pub fn redeem(ctx: &Context, treasury: &str, amount: &str) -> Result<()> {
    let user = ctx.signer()?;
    let at = parse_address(treasury, "treasury")?;
    let retry = ctx.config.retry();
    let confirmation = ctx.with_ledger(|client| {
        let record: Treasury = require_record(&*client, &at)?;
        let amount = ui_amount(client, &record.wrapper_mint, amount)?;
        Ok(treasury::redeem(client, &at, &user, amount, retry)?)
    })?;
    print_json(&confirmation)
}

pub fn treasury_status(ctx: &Context, treasury: &str) -> Result<()> {
    let at = parse_address(treasury, "treasury")?;
    let client = ctx.store.open()?;
    let status = treasury::peg_status(&client, &at)?;
    if !status.holds() {
        warn!(treasury = %at, "peg does not hold");
    }
    print_json(&status)
}

pub fn account(ctx: &Context, address: &str, raw: bool) -> Result<()> {
    let address = parse_address(address, "address")?;
    let client = ctx.store.open()?;
    if raw {
        let bytes = client
            .ledger()
            .read_account(&address)?
            .with_context(|| format!("no account at {address}"))?;
        println!("{}", general_purpose::STANDARD.encode(bytes));
        return Ok(());
    }
    match client.ledger().account(&address) {
        Some(data) => print_json(data),
        None => bail!("no account at {address}"),
    }
}

pub fn events(ctx: &Context, limit: usize) -> Result<()> {
    let client = ctx.store.open()?;
    let events = client.ledger().events();
    let start = events.len().saturating_sub(limit);
    print_json(&events[start..])
}
