//! Fixtures shared by unit tests.

use crate::address::{extra_account_metas_address, fee_config_address, programs, token_account_address, Address};
use crate::error::Result;
use crate::fee_config::{FeeRates, FeeRecipients};
use crate::hook::ExtraAccountMetaList;
use crate::identity::{Keypair, Signer};
use crate::ledger::{AccountData, LocalLedger};
use crate::operation::{Confirmation, Operation, Submission};
use crate::token::TransferFee;

pub(crate) fn rates_for(bps: u16) -> FeeRates {
    let holders = bps / 2;
    let marketing = bps * 2 / 5;
    FeeRates {
        holders,
        marketing,
        liquidity: bps - holders - marketing,
    }
}

/// A fee-bearing mint with an initialized fee config and three recipients.
pub(crate) struct FeeMintFixture {
    pub ledger: LocalLedger,
    pub admin: Keypair,
    pub mint: Address,
    pub recipients: FeeRecipients,
}

impl FeeMintFixture {
    pub fn new(bps: u16) -> Self {
        let mut ledger = LocalLedger::new();
        let admin = Keypair::generate();
        let mint = Keypair::generate();
        let mint_address = mint.address();
        apply(
            &mut ledger,
            Operation::CreateMint {
                mint: mint_address,
                decimals: 9,
                mint_authority: admin.address(),
                transfer_fee: TransferFee {
                    basis_points: bps,
                    maximum_fee: u64::MAX,
                },
                withdraw_withheld_authority: Some(fee_config_address(&mint_address).unwrap()),
                transfer_hook_program: Some(programs::fee_program()),
            },
            &[&mint, &admin],
        )
        .unwrap();

        let mut recipient = || {
            let owner = Keypair::generate();
            apply(
                &mut ledger,
                Operation::CreateTokenAccount {
                    owner: owner.address(),
                    mint: mint_address,
                    payer: admin.address(),
                },
                &[&admin],
            )
            .unwrap();
            token_account_address(&owner.address(), &mint_address).unwrap()
        };
        let recipients = FeeRecipients {
            holders: recipient(),
            marketing: recipient(),
            liquidity: recipient(),
        };
        apply(
            &mut ledger,
            Operation::InitializeFeeConfig {
                mint: mint_address,
                authority: admin.address(),
                rates: rates_for(bps),
                recipients,
            },
            &[&admin],
        )
        .unwrap();

        Self {
            ledger,
            admin,
            mint: mint_address,
            recipients,
        }
    }

    /// New holder with a token account funded by minting `amount`.
    pub fn holder(&mut self, amount: u64) -> (Keypair, Address) {
        let owner = Keypair::generate();
        apply(
            &mut self.ledger,
            Operation::CreateTokenAccount {
                owner: owner.address(),
                mint: self.mint,
                payer: owner.address(),
            },
            &[&owner],
        )
        .unwrap();
        let account = token_account_address(&owner.address(), &self.mint).unwrap();
        if amount > 0 {
            apply(
                &mut self.ledger,
                Operation::MintTo {
                    mint: self.mint,
                    destination: account,
                    amount,
                },
                &[&self.admin],
            )
            .unwrap();
        }
        (owner, account)
    }

    pub fn extra_accounts(&self) -> Vec<Address> {
        let at = extra_account_metas_address(&self.mint).unwrap();
        match self.ledger.account(&at) {
            Some(AccountData::ExtraAccountMetas(list)) => ExtraAccountMetaList::addresses(list),
            _ => Vec::new(),
        }
    }

    pub fn transfer_submission(
        &self,
        from: &(Keypair, Address),
        to: &(Keypair, Address),
        amount: u64,
    ) -> Submission {
        Submission::sign(
            Operation::Transfer {
                source: from.1,
                destination: to.1,
                mint: self.mint,
                amount,
                decimals: 9,
                extra_accounts: self.extra_accounts(),
            },
            self.ledger.ordering_token(),
            &[&from.0],
        )
        .unwrap()
    }

    pub fn transfer(
        &mut self,
        from: &(Keypair, Address),
        to: &(Keypair, Address),
        amount: u64,
    ) -> Result<Confirmation> {
        let submission = self.transfer_submission(from, to, amount);
        self.ledger.apply(&submission)
    }
}

pub(crate) fn apply(
    ledger: &mut LocalLedger,
    operation: Operation,
    signers: &[&dyn Signer],
) -> Result<Confirmation> {
    let submission = Submission::sign(operation, ledger.ordering_token(), signers)?;
    ledger.apply(&submission)
}
