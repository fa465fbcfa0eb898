//! Transfer hook of the fee-bearing asset.
//!
//! The hook only validates. The withheld fee is computed and retained by the
//! ledger; the hook checks that the extra accounts a transfer carries are the
//! ones registered for the mint and that the registration still matches the
//! live [`FeeConfig`].

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::Address;
use crate::error::{Result, TollError};
use crate::fee_config::{FeeCategory, FeeConfig};
use crate::records::Record;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ExtraAccountMeta {
    pub address: Address,
    pub is_writable: bool,
}

/// Accounts every transfer of `mint` must carry, at `[b"extra-account-metas", mint]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ExtraAccountMetaList {
    pub mint: Address,
    pub accounts: Vec<ExtraAccountMeta>,
}

impl Record for ExtraAccountMetaList {
    const NAME: &'static str = "ExtraAccountMetaList";
}

impl ExtraAccountMetaList {
    /// FeeConfig, escrow, then the recipient of each category in [`FeeCategory::ALL`] order.
    pub fn for_fee_config(fee_config_address: Address, config: &FeeConfig) -> Self {
        let mut accounts = vec![
            ExtraAccountMeta {
                address: fee_config_address,
                is_writable: false,
            },
            ExtraAccountMeta {
                address: config.escrow,
                is_writable: false,
            },
        ];
        accounts.extend(FeeCategory::ALL.iter().map(|category| ExtraAccountMeta {
            address: config.recipient(*category),
            is_writable: false,
        }));
        Self {
            mint: config.mint,
            accounts,
        }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|meta| meta.address).collect()
    }
}

/// What the hook observes about a transfer.
#[derive(Clone, Copy, Debug)]
pub struct HookTransfer {
    pub source: Address,
    pub destination: Address,
    pub mint: Address,
    pub amount: u64,
}

/// Validate one transfer. Fails with `ConfigMismatch`, which is not retryable.
pub fn execute(
    transfer: &HookTransfer,
    registered: &ExtraAccountMetaList,
    fee_config_address: Address,
    config: &FeeConfig,
    supplied: &[Address],
) -> Result<()> {
    if registered.mint != transfer.mint || config.mint != transfer.mint {
        return Err(TollError::mismatch(
            transfer.mint,
            "hook accounts belong to a different mint",
        ));
    }
    let expected = ExtraAccountMetaList::for_fee_config(fee_config_address, config);
    if registered.accounts != expected.accounts {
        return Err(TollError::mismatch(
            transfer.mint,
            "extra account metas are stale relative to the fee config",
        ));
    }
    let registered_addresses = registered.addresses();
    if supplied.len() != registered_addresses.len() {
        return Err(TollError::mismatch(
            transfer.mint,
            format!(
                "transfer carries {} extra accounts, {} required",
                supplied.len(),
                registered_addresses.len()
            ),
        ));
    }
    if let Some((got, _)) = supplied
        .iter()
        .zip(&registered_addresses)
        .find(|(got, want)| got != want)
    {
        return Err(TollError::mismatch(
            *got,
            "extra account does not match the registered list",
        ));
    }
    debug!(
        source = %transfer.source,
        destination = %transfer.destination,
        amount = transfer.amount,
        "transfer hook accepted"
    );
    Ok(())
}
