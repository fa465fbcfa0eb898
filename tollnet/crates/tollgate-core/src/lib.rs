//! Core protocol of the tollgate fee-bearing asset.
//!
//! Three pieces sit on top of a small ledger model:
//!
//! * [`hook`]: the transfer hook that every transfer of the fee-bearing asset
//!   passes through. The ledger withholds the fee on the receiving account.
//! * [`collect`] and [`claim`]: sweeping withheld fees into a per-mint escrow,
//!   apportioning them across the holders/marketing/liquidity accumulators of
//!   the [`fee_config::FeeConfig`], and paying them out again.
//! * [`treasury`]: a stake/redeem vault that keeps a wrapper asset pegged 1:1
//!   to the asset deposited in it.
//!
//! Engines reach the ledger only through a [`client::LedgerClient`] passed on
//! every call. [`ledger::LocalLedger`] is the in-process runtime used by tests
//! and by the CLI.

pub mod address;
pub mod claim;
pub mod client;
pub mod collect;
pub mod fee_config;
pub mod holders;
pub mod hook;
pub mod identity;
pub mod ledger;
pub mod math;
pub mod operation;
pub mod records;
pub mod token;
pub mod treasury;
pub mod units;

mod error;

#[cfg(test)]
mod test_support;

pub use address::Address;
pub use client::{LedgerClient, LocalClient, RetryPolicy};
pub use error::{Result, TollError};
pub use fee_config::{FeeCategory, FeeConfig};
pub use identity::{Keypair, Signer};
pub use ledger::{AssetLedger, LocalLedger};
pub use operation::{Confirmation, Operation, Submission};
