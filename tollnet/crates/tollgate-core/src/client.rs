//! Ledger-access client consumed by the engines.
//!
//! Engines take a `&mut impl LedgerClient` on every call; nothing in the core
//! keeps a process-wide client.

use tracing::warn;

use crate::address::{find_derived_address, Address};
use crate::error::{Result, TollError};
use crate::identity::Signer;
use crate::ledger::{AssetLedger, LocalLedger};
use crate::operation::{Confirmation, Operation, OperationId, OrderingToken, Submission};
use crate::records::Record;
use crate::token::TokenAccountRecord;

pub trait LedgerClient {
    fn ordering_token(&self) -> Result<OrderingToken>;
    fn is_ordering_token_recent(&self, token: &OrderingToken) -> Result<bool>;

    /// Hand a signed submission to the ledger.
    fn send(&mut self, submission: &Submission) -> Result<Confirmation>;

    /// Confirmation of an operation that committed, if any.
    fn operation_status(&self, id: &OperationId) -> Result<Option<Confirmation>>;

    /// Fixed-layout account bytes, `None` when nothing lives at `address`.
    fn read_account(&self, address: &Address) -> Result<Option<Vec<u8>>>;

    fn token_accounts_by_mint(&self, mint: &Address) -> Result<Vec<(Address, TokenAccountRecord)>>;

    fn derive_address(&self, seeds: &[&[u8]], program: &Address) -> Result<Address> {
        Ok(find_derived_address(seeds, program)?.0)
    }

    fn submit(&mut self, operation: Operation, signers: &[&dyn Signer]) -> Result<Confirmation> {
        let submission = Submission::sign(operation, self.ordering_token()?, signers)?;
        self.send(&submission)
    }
}

/// Client over an in-process [`LocalLedger`].
#[derive(Debug, Default)]
pub struct LocalClient {
    ledger: LocalLedger,
}

impl LocalClient {
    pub fn new(ledger: LocalLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &LocalLedger {
        &self.ledger
    }

    pub fn into_ledger(self) -> LocalLedger {
        self.ledger
    }
}

impl LedgerClient for LocalClient {
    fn ordering_token(&self) -> Result<OrderingToken> {
        Ok(self.ledger.ordering_token())
    }

    fn is_ordering_token_recent(&self, token: &OrderingToken) -> Result<bool> {
        Ok(self.ledger.is_ordering_token_recent(token))
    }

    fn send(&mut self, submission: &Submission) -> Result<Confirmation> {
        self.ledger.apply(submission)
    }

    fn operation_status(&self, id: &OperationId) -> Result<Option<Confirmation>> {
        Ok(self.ledger.operation_status(id).cloned())
    }

    fn read_account(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        self.ledger.read_account(address)
    }

    fn token_accounts_by_mint(&self, mint: &Address) -> Result<Vec<(Address, TokenAccountRecord)>> {
        Ok(AssetLedger::token_accounts_by_mint(&self.ledger, mint))
    }
}

pub fn read_record<T: Record>(client: &impl LedgerClient, address: &Address) -> Result<Option<T>> {
    client
        .read_account(address)?
        .map(|bytes| T::from_account_bytes(address, &bytes))
        .transpose()
}

pub fn require_record<T: Record>(client: &impl LedgerClient, address: &Address) -> Result<T> {
    read_record(client, address)?.ok_or(TollError::UnknownAccount { account: *address })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Send, treating "already applied" as success when the ledger holds its confirmation.
pub fn send_reconciled(client: &mut impl LedgerClient, submission: &Submission) -> Result<Confirmation> {
    match client.send(submission) {
        Err(TollError::DuplicateOperation { id }) => {
            match client.operation_status(&submission.id()?)? {
                Some(confirmation) => Ok(confirmation),
                None => Err(TollError::DuplicateOperation { id }),
            }
        }
        other => other,
    }
}

/// Sign and send, re-signing with a fresh ordering token after transient failures.
///
/// A submission that failed transiently can no longer commit once its token
/// has expired, so a re-signed copy never double-applies.
pub fn submit_with_retry(
    client: &mut impl LedgerClient,
    operation: &Operation,
    signers: &[&dyn Signer],
    policy: RetryPolicy,
) -> Result<Confirmation> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let submission = Submission::sign(operation.clone(), client.ordering_token()?, signers)?;
        match send_reconciled(client, &submission) {
            Err(err) if err.is_retryable() && attempt < attempts => {
                if let Some(confirmation) = client.operation_status(&submission.id()?)? {
                    return Ok(confirmation);
                }
                warn!(
                    operation = operation.name(),
                    attempt,
                    error = %err,
                    "transient submission failure, retrying"
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::address::programs;
    use crate::identity::Keypair;
    use crate::token::{MintRecord, TransferFee};

    /// Fails the first `failures` sends without touching the ledger.
    pub(crate) struct FlakyClient {
        pub inner: LocalClient,
        pub failures: u32,
        pub sends: u32,
    }

    impl LedgerClient for FlakyClient {
        fn ordering_token(&self) -> Result<OrderingToken> {
            self.inner.ordering_token()
        }

        fn is_ordering_token_recent(&self, token: &OrderingToken) -> Result<bool> {
            self.inner.is_ordering_token_recent(token)
        }

        fn send(&mut self, submission: &Submission) -> Result<Confirmation> {
            self.sends += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err(TollError::TransientSubmissionFailure {
                    reason: "ordering token expired".into(),
                });
            }
            self.inner.send(submission)
        }

        fn operation_status(&self, id: &OperationId) -> Result<Option<Confirmation>> {
            self.inner.operation_status(id)
        }

        fn read_account(&self, address: &Address) -> Result<Option<Vec<u8>>> {
            self.inner.read_account(address)
        }

        fn token_accounts_by_mint(
            &self,
            mint: &Address,
        ) -> Result<Vec<(Address, TokenAccountRecord)>> {
            self.inner.token_accounts_by_mint(mint)
        }
    }

    fn create_mint(mint: &Keypair, admin: &Keypair) -> Operation {
        Operation::CreateMint {
            mint: mint.address(),
            decimals: 6,
            mint_authority: admin.address(),
            transfer_fee: TransferFee::NONE,
            withdraw_withheld_authority: None,
            transfer_hook_program: None,
        }
    }

    #[test]
    fn retry_resigns_after_transient_failures() {
        let (admin, mint) = (Keypair::generate(), Keypair::generate());
        let mut client = FlakyClient {
            inner: LocalClient::default(),
            failures: 2,
            sends: 0,
        };
        let confirmation = submit_with_retry(
            &mut client,
            &create_mint(&mint, &admin),
            &[&mint, &admin],
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(client.sends, 3);
        assert_eq!(confirmation.height, 1);
        let record: MintRecord = require_record(&client, &mint.address()).unwrap();
        assert_eq!(record.decimals, 6);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let (admin, mint) = (Keypair::generate(), Keypair::generate());
        let mut client = FlakyClient {
            inner: LocalClient::default(),
            failures: 5,
            sends: 0,
        };
        let err = submit_with_retry(
            &mut client,
            &create_mint(&mint, &admin),
            &[&mint, &admin],
            RetryPolicy { max_attempts: 2 },
        )
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.sends, 2);
        assert!(read_record::<MintRecord>(&client, &mint.address()).unwrap().is_none());
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let admin = Keypair::generate();
        let mut client = FlakyClient {
            inner: LocalClient::default(),
            failures: 0,
            sends: 0,
        };
        let err = submit_with_retry(
            &mut client,
            &Operation::CreateTreasury {
                base_mint: Address::from_label("missing"),
                authority: admin.address(),
            },
            &[&admin],
            RetryPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TollError::UnknownAccount { .. }));
        assert_eq!(client.sends, 1);
    }

    #[test]
    fn resending_a_committed_submission_returns_its_confirmation() {
        let (admin, mint) = (Keypair::generate(), Keypair::generate());
        let mut client = LocalClient::default();
        let submission =
            Submission::sign(create_mint(&mint, &admin), client.ordering_token().unwrap(), &[
                &mint, &admin,
            ])
            .unwrap();
        let first = send_reconciled(&mut client, &submission).unwrap();
        let again = send_reconciled(&mut client, &submission).unwrap();
        assert_eq!(first, again);
        assert_eq!(client.ledger().meta.height, 1);
    }

    #[test]
    fn derive_address_matches_free_function() {
        let client = LocalClient::default();
        let seeds: [&[u8]; 2] = [b"fee-config", b"mint"];
        assert_eq!(
            client.derive_address(&seeds, &programs::fee_program()).unwrap(),
            find_derived_address(&seeds, &programs::fee_program()).unwrap().0
        );
    }
}
