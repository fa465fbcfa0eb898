//! Fee claims out of the escrow, single-recipient and pro-rata to holders.
//!
//! Reapplying a committed claim would pay twice. Every signed claim is written
//! to a [`ClaimJournal`] before it is sent and cleared once its fate is known:
//! confirmed, rejected, or unable to commit because its ordering token expired.
//! A claim still in flight is resent byte-for-byte, never re-signed, so the
//! ledger's replay guard collapses any duplicate.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::address::Address;
use crate::client::{send_reconciled, LedgerClient, RetryPolicy};
use crate::collect::load_fee_state;
use crate::error::{Result, TollError};
use crate::fee_config::FeeCategory;
use crate::holders::HolderSnapshot;
use crate::identity::Signer;
use crate::operation::{Confirmation, Operation, OperationId, Submission};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub mint: Address,
    pub category: FeeCategory,
    pub destination: Address,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    pub request: ClaimRequest,
    pub submission: Submission,
}

/// Where submitted-but-unconfirmed claims are remembered.
pub trait ClaimJournal {
    fn pending(&self) -> Vec<PendingClaim>;
    fn record(&mut self, claim: PendingClaim) -> Result<()>;
    fn clear(&mut self, id: &OperationId) -> Result<()>;
}

/// In-memory journal; serializable so callers can persist it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaims {
    entries: Vec<PendingClaim>,
}

impl PendingClaims {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl ClaimJournal for PendingClaims {
    fn pending(&self) -> Vec<PendingClaim> {
        self.entries.clone()
    }

    fn record(&mut self, claim: PendingClaim) -> Result<()> {
        self.entries.push(claim);
        Ok(())
    }

    fn clear(&mut self, id: &OperationId) -> Result<()> {
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if entry.submission.id()? != *id {
                kept.push(entry.clone());
            }
        }
        self.entries = kept;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub confirmed: Vec<Confirmation>,
    pub expired: usize,
    pub in_flight: usize,
}

/// Resolve journal entries against the ledger.
pub fn reconcile(client: &impl LedgerClient, journal: &mut impl ClaimJournal) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for entry in journal.pending() {
        let id = entry.submission.id()?;
        if let Some(confirmation) = client.operation_status(&id)? {
            journal.clear(&id)?;
            report.confirmed.push(confirmation);
        } else if !client.is_ordering_token_recent(&entry.submission.ordering_token)? {
            journal.clear(&id)?;
            report.expired += 1;
        } else {
            report.in_flight += 1;
        }
    }
    Ok(report)
}

/// Claim `amount` of `category` into its registered recipient account.
pub fn claim(
    client: &mut impl LedgerClient,
    journal: &mut impl ClaimJournal,
    authority: &dyn Signer,
    mint: &Address,
    category: FeeCategory,
    amount: u64,
    retry: RetryPolicy,
) -> Result<Confirmation> {
    let (_, config, _) = load_fee_state(client, mint)?;
    let request = ClaimRequest {
        mint: *mint,
        category,
        destination: config.recipient(category),
        amount,
    };
    claim_to(client, journal, authority, request, retry)
}

pub fn claim_to(
    client: &mut impl LedgerClient,
    journal: &mut impl ClaimJournal,
    authority: &dyn Signer,
    request: ClaimRequest,
    retry: RetryPolicy,
) -> Result<Confirmation> {
    reconcile(client, journal)?;
    if let Some(entry) = journal.pending().into_iter().find(|p| p.request == request) {
        return resend(client, journal, &entry);
    }

    let (_, config, _) = load_fee_state(client, &request.mint)?;
    let available = config.unclaimed(request.category);
    if request.amount > available {
        return Err(TollError::InsufficientUnclaimedBalance {
            category: request.category,
            requested: request.amount,
            available,
        });
    }
    if request.category != FeeCategory::Holders
        && request.destination != config.recipient(request.category)
    {
        return Err(TollError::mismatch(
            request.destination,
            format!("not the registered {} recipient", request.category),
        ));
    }

    let operation = Operation::ClaimFee {
        mint: request.mint,
        authority: authority.address(),
        category: request.category,
        destination: request.destination,
        amount: request.amount,
    };
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let submission = Submission::sign(operation.clone(), client.ordering_token()?, &[authority])?;
        let id = submission.id()?;
        journal.record(PendingClaim {
            request,
            submission: submission.clone(),
        })?;
        match send_reconciled(client, &submission) {
            Ok(confirmation) => {
                journal.clear(&id)?;
                info!(
                    category = %request.category,
                    destination = %request.destination,
                    amount = request.amount,
                    "fee claimed"
                );
                return Ok(confirmation);
            }
            Err(err) if err.is_retryable() => {
                if let Some(confirmation) = client.operation_status(&id)? {
                    journal.clear(&id)?;
                    return Ok(confirmation);
                }
                if client.is_ordering_token_recent(&submission.ordering_token)? {
                    // may still land; keep it journaled for the next reconcile
                    return Err(err);
                }
                journal.clear(&id)?;
                if attempt >= attempts {
                    return Err(err);
                }
                warn!(attempt, error = %err, "claim did not commit, re-signing");
                attempt += 1;
            }
            Err(err) => {
                journal.clear(&id)?;
                return Err(err);
            }
        }
    }
}

fn resend(
    client: &mut impl LedgerClient,
    journal: &mut impl ClaimJournal,
    entry: &PendingClaim,
) -> Result<Confirmation> {
    let id = entry.submission.id()?;
    info!(%id, "resending in-flight claim");
    match send_reconciled(client, &entry.submission) {
        Err(err) if err.is_retryable() => Err(err),
        other => {
            journal.clear(&id)?;
            other
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HolderPayout {
    pub owner: Address,
    pub token_account: Address,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HolderPayoutFailure {
    pub token_account: Address,
    pub amount: u64,
    pub kind: &'static str,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct HolderPayoutReport {
    /// Holders accumulator when the batch started.
    pub pool: u64,
    pub paid: Vec<HolderPayout>,
    /// Holders whose pro-rata amount floors to zero.
    pub skipped: Vec<Address>,
    pub failed: Vec<HolderPayoutFailure>,
}

impl HolderPayoutReport {
    pub fn total_paid(&self) -> u64 {
        self.paid.iter().map(|p| p.amount).sum()
    }
}

/// Pay the holders accumulator out pro-rata, one independent claim per holder.
///
/// Not atomic: a failed claim is reported and the batch moves on, and whatever
/// stays in the accumulator can be paid by a later run.
pub fn claim_holders(
    client: &mut impl LedgerClient,
    journal: &mut impl ClaimJournal,
    authority: &dyn Signer,
    snapshot: &HolderSnapshot,
    retry: RetryPolicy,
) -> Result<HolderPayoutReport> {
    let (_, config, _) = load_fee_state(client, &snapshot.mint)?;
    let pool = config.unclaimed(FeeCategory::Holders);
    let mut report = HolderPayoutReport {
        pool,
        ..HolderPayoutReport::default()
    };

    for (holder, amount) in snapshot.allocate(pool)? {
        if amount == 0 {
            report.skipped.push(holder.token_account);
            continue;
        }
        let request = ClaimRequest {
            mint: snapshot.mint,
            category: FeeCategory::Holders,
            destination: holder.token_account,
            amount,
        };
        match claim_to(client, journal, authority, request, retry) {
            Ok(_) => report.paid.push(HolderPayout {
                owner: holder.owner,
                token_account: holder.token_account,
                amount,
            }),
            Err(err) => {
                warn!(
                    token_account = %holder.token_account,
                    amount,
                    error = %err,
                    "holder claim failed"
                );
                report.failed.push(HolderPayoutFailure {
                    token_account: holder.token_account,
                    amount,
                    kind: err.kind(),
                    error: err.to_string(),
                });
            }
        }
    }
    info!(
        pool,
        paid = report.paid.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "holder payout batch finished"
    );
    Ok(report)
}
