//! Asset mint and token account records.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::math::{self, MAX_BASIS_POINTS};
use crate::records::Record;

/// Transfer fee installed on a mint.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct TransferFee {
    /// Total fee in basis points (0..=10_000).
    pub basis_points: u16,
    /// Absolute cap on the amount withheld from a single transfer.
    pub maximum_fee: u64,
}

impl TransferFee {
    pub const NONE: TransferFee = TransferFee {
        basis_points: 0,
        maximum_fee: 0,
    };

    /// `min(amount * bps / 10_000, maximum_fee)`
    pub fn withheld_for(&self, amount: u64) -> Result<u64> {
        Ok(math::bps_of(amount, self.basis_points)?.min(self.maximum_fee))
    }

    pub fn is_valid(&self) -> bool {
        self.basis_points <= MAX_BASIS_POINTS
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MintRecord {
    pub decimals: u8,
    pub supply: u64,
    /// `None` freezes supply forever.
    pub mint_authority: Option<Address>,
    pub transfer_fee: TransferFee,
    /// Who may sweep withheld amounts out of holder accounts.
    pub withdraw_withheld_authority: Option<Address>,
    /// Program invoked on every transfer, if any.
    pub transfer_hook_program: Option<Address>,
}

impl Record for MintRecord {
    const NAME: &'static str = "Mint";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TokenAccountRecord {
    pub mint: Address,
    pub owner: Address,
    /// Spendable balance.
    pub amount: u64,
    /// Fee retained on this account by incoming transfers, not yet swept.
    pub withheld_amount: u64,
}

impl TokenAccountRecord {
    pub fn new(mint: Address, owner: Address) -> Self {
        Self {
            mint,
            owner,
            amount: 0,
            withheld_amount: 0,
        }
    }
}

impl Record for TokenAccountRecord {
    const NAME: &'static str = "TokenAccount";
}
