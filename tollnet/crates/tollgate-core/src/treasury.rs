//! Stake/redeem vault keeping a wrapper asset pegged 1:1 to a base asset.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::address::{token_account_address, treasury_address, Address};
use crate::client::{read_record, require_record, submit_with_retry, LedgerClient, RetryPolicy};
use crate::error::{Result, TollError};
use crate::identity::Signer;
use crate::operation::{Confirmation, Operation};
use crate::records::Record;
use crate::token::{MintRecord, TokenAccountRecord};

/// Immutable after creation; lives at `[b"treasury", base_mint, authority]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Treasury {
    pub authority: Address,
    pub base_mint: Address,
    /// Holds deposited base asset; owned by the treasury address.
    pub base_vault: Address,
    /// Mint authority is the treasury address.
    pub wrapper_mint: Address,
}

impl Record for Treasury {
    const NAME: &'static str = "Treasury";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegStatus {
    pub vault_amount: u64,
    pub wrapper_supply: u64,
}

impl PegStatus {
    pub fn holds(&self) -> bool {
        self.vault_amount == self.wrapper_supply
    }
}

pub fn create_treasury(
    client: &mut impl LedgerClient,
    base_mint: &Address,
    authority: &dyn Signer,
    retry: RetryPolicy,
) -> Result<(Address, Treasury)> {
    let operation = Operation::CreateTreasury {
        base_mint: *base_mint,
        authority: authority.address(),
    };
    submit_with_retry(client, &operation, &[authority], retry)?;
    let at = treasury_address(base_mint, &authority.address())?;
    let treasury: Treasury = require_record(client, &at)?;
    info!(treasury = %at, wrapper_mint = %treasury.wrapper_mint, "treasury created");
    Ok((at, treasury))
}

/// Like [`create_treasury`], but an existing treasury for the same key is returned as-is.
pub fn create_treasury_idempotent(
    client: &mut impl LedgerClient,
    base_mint: &Address,
    authority: &dyn Signer,
    retry: RetryPolicy,
) -> Result<(Address, Treasury)> {
    match create_treasury(client, base_mint, authority, retry) {
        Err(TollError::AlreadyInitialized { account }) => {
            let treasury = require_record(client, &account)?;
            Ok((account, treasury))
        }
        other => other,
    }
}

pub fn stake(
    client: &mut impl LedgerClient,
    treasury: &Address,
    user: &dyn Signer,
    amount: u64,
    retry: RetryPolicy,
) -> Result<Confirmation> {
    let record: Treasury = require_record(client, treasury)?;
    let source = token_account_address(&user.address(), &record.base_mint)?;
    let available = read_record::<TokenAccountRecord>(client, &source)?
        .map(|account| account.amount)
        .unwrap_or_default();
    if available < amount {
        return Err(TollError::InsufficientFunds {
            account: source,
            requested: amount,
            available,
        });
    }
    let operation = Operation::Stake {
        treasury: *treasury,
        user: user.address(),
        amount,
    };
    submit_with_retry(client, &operation, &[user], retry)
}

pub fn redeem(
    client: &mut impl LedgerClient,
    treasury: &Address,
    user: &dyn Signer,
    amount: u64,
    retry: RetryPolicy,
) -> Result<Confirmation> {
    let record: Treasury = require_record(client, treasury)?;
    let source = token_account_address(&user.address(), &record.wrapper_mint)?;
    let available = read_record::<TokenAccountRecord>(client, &source)?
        .map(|account| account.amount)
        .unwrap_or_default();
    if available < amount {
        return Err(TollError::InsufficientFunds {
            account: source,
            requested: amount,
            available,
        });
    }
    let operation = Operation::Redeem {
        treasury: *treasury,
        user: user.address(),
        amount,
    };
    submit_with_retry(client, &operation, &[user], retry)
}

pub fn peg_status(client: &impl LedgerClient, treasury: &Address) -> Result<PegStatus> {
    let record: Treasury = require_record(client, treasury)?;
    let vault: TokenAccountRecord = require_record(client, &record.base_vault)?;
    let wrapper: MintRecord = require_record(client, &record.wrapper_mint)?;
    Ok(PegStatus {
        vault_amount: vault.amount,
        wrapper_supply: wrapper.supply,
    })
}
