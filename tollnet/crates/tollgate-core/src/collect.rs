//! Sweep withheld fees from holder accounts into the escrow.

use serde::Serialize;
use tracing::{debug, info};

use crate::address::{fee_config_address, Address};
use crate::client::{read_record, submit_with_retry, LedgerClient, RetryPolicy};
use crate::error::{Result, TollError};
use crate::fee_config::{FeeConfig, FeeSplit};
use crate::identity::Signer;
use crate::ledger::LedgerEvent;
use crate::math;
use crate::operation::Operation;
use crate::token::TokenAccountRecord;

pub const DEFAULT_BATCH_SIZE: usize = 24;

#[derive(Clone, Copy, Debug)]
pub struct CollectOptions {
    /// Source accounts per sweep operation.
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CollectReport {
    pub mint: Address,
    pub accounts_swept: usize,
    pub batches: usize,
    /// Escrow balance after minus before.
    pub swept_total: u64,
    pub split: FeeSplit,
    pub fee_config: FeeConfig,
}

/// Load the fee config of `mint` together with its escrow account.
pub fn load_fee_state(
    client: &impl LedgerClient,
    mint: &Address,
) -> Result<(Address, FeeConfig, TokenAccountRecord)> {
    let config_at = fee_config_address(mint)?;
    let config: FeeConfig = read_record(client, &config_at)?
        .ok_or_else(|| TollError::mismatch(config_at, "fee config is not initialized"))?;
    let escrow: TokenAccountRecord = read_record(client, &config.escrow)?
        .ok_or_else(|| TollError::mismatch(config.escrow, "fee escrow account does not exist"))?;
    if escrow.mint != *mint || escrow.owner != config_at {
        return Err(TollError::mismatch(
            config.escrow,
            "fee escrow does not belong to the mint",
        ));
    }
    Ok((config_at, config, escrow))
}

/// Sweep every account of `mint` with a positive withheld amount.
///
/// Each batch is its own atomic operation, so an interrupted run leaves the
/// remaining accounts for the next one.
pub fn collect(
    client: &mut impl LedgerClient,
    mint: &Address,
    authority: &dyn Signer,
    options: CollectOptions,
) -> Result<CollectReport> {
    let (_, _, escrow) = load_fee_state(client, mint)?;
    let escrow_before = escrow.amount;

    let sources: Vec<Address> = client
        .token_accounts_by_mint(mint)?
        .into_iter()
        .filter(|(_, account)| account.withheld_amount > 0)
        .map(|(address, account)| {
            debug!(account = %address, withheld = account.withheld_amount, "withheld fee found");
            address
        })
        .collect();

    let mut batches = 0;
    let mut events_split = FeeSplit::default();
    for batch in sources.chunks(options.batch_size.max(1)) {
        let operation = Operation::SweepWithheld {
            mint: *mint,
            authority: authority.address(),
            sources: batch.to_vec(),
        };
        let confirmation = submit_with_retry(client, &operation, &[authority], options.retry)?;
        for event in &confirmation.events {
            if let LedgerEvent::FeesSwept { split, .. } = event {
                events_split.accumulate(split)?;
            }
        }
        batches += 1;
    }

    let (_, fee_config, escrow) = load_fee_state(client, mint)?;
    let swept_total = math::sub(escrow.amount, escrow_before, "swept total")?;
    info!(
        %mint,
        accounts = sources.len(),
        batches,
        swept_total,
        "withheld fees collected"
    );
    Ok(CollectReport {
        mint: *mint,
        accounts_swept: sources.len(),
        batches,
        swept_total,
        split: events_split,
        fee_config,
    })
}
