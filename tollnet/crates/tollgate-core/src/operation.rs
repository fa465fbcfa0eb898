//! Signed operations submitted to the ledger runtime.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::{Result, TollError};
use crate::fee_config::{FeeCategory, FeeRates, FeeRecipients};
use crate::identity::{serde_hex, Signature, Signer};
use crate::ledger::LedgerEvent;
use crate::token::TransferFee;

/// Digest of a recent height and its state root. Operations carrying an expired token never commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingToken(#[serde(with = "serde_hex")] pub [u8; 32]);

impl fmt::Debug for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderingToken({}..)", &hex::encode(self.0)[..12])
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(#[serde(with = "serde_hex")] pub [u8; 32]);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({}..)", &hex::encode(self.0)[..12])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Signed by `mint` (fresh keypair) and `mint_authority`.
    CreateMint {
        mint: Address,
        decimals: u8,
        mint_authority: Address,
        transfer_fee: TransferFee,
        withdraw_withheld_authority: Option<Address>,
        transfer_hook_program: Option<Address>,
    },
    /// Associated account of (`owner`, `mint`), paid for by `payer`.
    CreateTokenAccount {
        owner: Address,
        mint: Address,
        payer: Address,
    },
    MintTo {
        mint: Address,
        destination: Address,
        amount: u64,
    },
    Transfer {
        source: Address,
        destination: Address,
        mint: Address,
        amount: u64,
        decimals: u8,
        extra_accounts: Vec<Address>,
    },
    InitializeFeeConfig {
        mint: Address,
        authority: Address,
        rates: FeeRates,
        recipients: FeeRecipients,
    },
    SetFeeRecipients {
        mint: Address,
        authority: Address,
        recipients: FeeRecipients,
    },
    SyncExtraAccountMetas {
        mint: Address,
        authority: Address,
    },
    SweepWithheld {
        mint: Address,
        authority: Address,
        sources: Vec<Address>,
    },
    ClaimFee {
        mint: Address,
        authority: Address,
        category: FeeCategory,
        destination: Address,
        amount: u64,
    },
    CreateTreasury {
        base_mint: Address,
        authority: Address,
    },
    Stake {
        treasury: Address,
        user: Address,
        amount: u64,
    },
    Redeem {
        treasury: Address,
        user: Address,
        amount: u64,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateMint { .. } => "create_mint",
            Operation::CreateTokenAccount { .. } => "create_token_account",
            Operation::MintTo { .. } => "mint_to",
            Operation::Transfer { .. } => "transfer",
            Operation::InitializeFeeConfig { .. } => "initialize_fee_config",
            Operation::SetFeeRecipients { .. } => "set_fee_recipients",
            Operation::SyncExtraAccountMetas { .. } => "sync_extra_account_metas",
            Operation::SweepWithheld { .. } => "sweep_withheld",
            Operation::ClaimFee { .. } => "claim_fee",
            Operation::CreateTreasury { .. } => "create_treasury",
            Operation::Stake { .. } => "stake",
            Operation::Redeem { .. } => "redeem",
        }
    }
}

/// An operation bound to an ordering token and signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub operation: Operation,
    pub ordering_token: OrderingToken,
    pub signatures: Vec<(Address, Signature)>,
}

impl Submission {
    pub fn message(operation: &Operation, ordering_token: &OrderingToken) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&(operation, ordering_token))?)
    }

    pub fn sign(
        operation: Operation,
        ordering_token: OrderingToken,
        signers: &[&dyn Signer],
    ) -> Result<Self> {
        let message = Self::message(&operation, &ordering_token)?;
        let signatures = signers
            .iter()
            .map(|signer| (signer.address(), signer.sign(&message)))
            .collect();
        Ok(Self {
            operation,
            ordering_token,
            signatures,
        })
    }

    /// Identifies the exact signed message; resigning with a new token yields a new id.
    pub fn id(&self) -> Result<OperationId> {
        let message = Self::message(&self.operation, &self.ordering_token)?;
        Ok(OperationId(Sha256::digest(&message).into()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: OperationId,
    pub height: u64,
    pub events: Vec<LedgerEvent>,
}

impl OperationId {
    pub fn from_hex(input: &str) -> Result<Self> {
        let bytes = hex::decode(input.trim()).map_err(|e| TollError::Codec(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TollError::Codec("operation id must be 32 bytes".into()))?;
        Ok(OperationId(bytes))
    }
}
