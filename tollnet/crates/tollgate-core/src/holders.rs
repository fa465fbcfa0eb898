//! Point-in-time holder snapshots for pro-rata payouts. Never authoritative.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::client::LedgerClient;
use crate::error::Result;
use crate::fee_config::{FeeCategory, FeeConfig};
use crate::math;
use crate::token::TokenAccountRecord;

/// Shares are fixed point with this denominator.
pub const SHARE_SCALE: u64 = 1_000_000_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub owner: Address,
    pub token_account: Address,
    pub amount: u64,
    /// `amount / total_eligible_supply`, scaled by [`SHARE_SCALE`].
    pub share: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderSnapshot {
    pub mint: Address,
    pub total_eligible_supply: u64,
    pub holders: Vec<Holder>,
}

impl HolderSnapshot {
    /// Build from token accounts, dropping other mints and any account whose
    /// address or owner is in `exceptions`.
    pub fn from_accounts(
        mint: &Address,
        accounts: impl IntoIterator<Item = (Address, TokenAccountRecord)>,
        exceptions: &BTreeSet<Address>,
    ) -> Result<Self> {
        let eligible: Vec<(Address, TokenAccountRecord)> = accounts
            .into_iter()
            .filter(|(address, record)| {
                record.mint == *mint
                    && !exceptions.contains(address)
                    && !exceptions.contains(&record.owner)
            })
            .collect();
        let total_eligible_supply = eligible.iter().try_fold(0u64, |acc, (_, record)| {
            math::add(acc, record.amount, "eligible supply")
        })?;

        let mut holders = Vec::with_capacity(eligible.len());
        for (token_account, record) in eligible {
            let share = if total_eligible_supply == 0 {
                0
            } else {
                math::mul_div_floor(record.amount, SHARE_SCALE, total_eligible_supply)?
            };
            holders.push(Holder {
                owner: record.owner,
                token_account,
                amount: record.amount,
                share,
            });
        }
        holders.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.token_account.cmp(&b.token_account)));
        Ok(Self {
            mint: *mint,
            total_eligible_supply,
            holders,
        })
    }

    pub fn capture(
        client: &impl LedgerClient,
        mint: &Address,
        exceptions: &BTreeSet<Address>,
    ) -> Result<Self> {
        Self::from_accounts(mint, client.token_accounts_by_mint(mint)?, exceptions)
    }

    /// Pro-rata amounts of `pool`, floored; the sum never exceeds `pool`.
    pub fn allocate(&self, pool: u64) -> Result<Vec<(&Holder, u64)>> {
        self.holders
            .iter()
            .map(|holder| {
                let amount = if self.total_eligible_supply == 0 {
                    0
                } else {
                    math::mul_div_floor(pool, holder.amount, self.total_eligible_supply)?
                };
                Ok((holder, amount))
            })
            .collect()
    }

    pub fn total_share(&self) -> u64 {
        self.holders.iter().map(|h| h.share).sum()
    }
}

/// Accounts that never take part in holder payouts: the fee config itself,
/// its escrow, the category recipients and the administrator.
pub fn default_exceptions(fee_config_address: &Address, config: &FeeConfig) -> BTreeSet<Address> {
    let mut exceptions: BTreeSet<Address> = FeeCategory::ALL
        .iter()
        .map(|category| config.recipient(*category))
        .collect();
    exceptions.insert(*fee_config_address);
    exceptions.insert(config.escrow);
    exceptions.insert(config.authority);
    exceptions
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn account(mint: &Address, owner: &str, amount: u64) -> (Address, TokenAccountRecord) {
        let mut record = TokenAccountRecord::new(*mint, Address::from_label(owner));
        record.amount = amount;
        (Address::from_label(&format!("{owner}-account")), record)
    }

    #[test]
    fn exceptions_match_account_or_owner() {
        let mint = Address::from_label("mint");
        let accounts = vec![
            account(&mint, "alice", 300),
            account(&mint, "bob", 100),
            account(&mint, "treasury", 1_000),
            account(&mint, "pool", 5_000),
            account(&Address::from_label("other"), "carol", 50),
        ];
        let exceptions: BTreeSet<Address> = [
            Address::from_label("treasury"),
            Address::from_label("pool-account"),
        ]
        .into_iter()
        .collect();
        let snapshot = HolderSnapshot::from_accounts(&mint, accounts, &exceptions).unwrap();
        assert_eq!(snapshot.total_eligible_supply, 400);
        assert_eq!(snapshot.holders.len(), 2);
        assert_eq!(snapshot.holders[0].amount, 300);
        assert_eq!(snapshot.holders[0].share, 750_000_000);
        assert_eq!(snapshot.holders[1].share, 250_000_000);
    }

    #[test]
    fn empty_supply_yields_zero_shares() {
        let mint = Address::from_label("mint");
        let snapshot = HolderSnapshot::from_accounts(
            &mint,
            vec![account(&mint, "alice", 0), account(&mint, "bob", 0)],
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(snapshot.total_eligible_supply, 0);
        assert!(snapshot.holders.iter().all(|h| h.share == 0));
        assert!(snapshot.allocate(1_000).unwrap().iter().all(|(_, a)| *a == 0));
    }

    #[test]
    fn allocation_floors_per_holder() {
        let mint = Address::from_label("mint");
        let snapshot = HolderSnapshot::from_accounts(
            &mint,
            vec![
                account(&mint, "a", 1),
                account(&mint, "b", 1),
                account(&mint, "c", 1),
            ],
            &BTreeSet::new(),
        )
        .unwrap();
        let amounts: Vec<u64> = snapshot.allocate(100).unwrap().into_iter().map(|(_, a)| a).collect();
        assert_eq!(amounts, vec![33, 33, 33]);
    }

    proptest! {
        #[test]
        fn shares_sum_to_one_within_rounding(amounts in proptest::collection::vec(0u64..u64::MAX / 64, 1..40)) {
            let mint = Address::from_label("mint");
            let accounts = amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| account(&mint, &format!("h{i}"), *amount));
            let snapshot = HolderSnapshot::from_accounts(&mint, accounts, &BTreeSet::new()).unwrap();
            let total = snapshot.total_share();
            if snapshot.total_eligible_supply > 0 {
                prop_assert!(total <= SHARE_SCALE);
                prop_assert!(SHARE_SCALE - total <= snapshot.holders.len() as u64);
            } else {
                prop_assert_eq!(total, 0);
            }
            let pool = 1_000_000u64;
            let paid: u64 = snapshot.allocate(pool).unwrap().iter().map(|(_, a)| a).sum();
            prop_assert!(paid <= pool);
        }
    }
}
