//! Per-mint fee configuration and its accumulator transitions.
//!
//! `credit_collection` and `debit_claim` are pure functions of the record as
//! it stood immediately before the operation; nothing here caches escrow or
//! accumulator values between operations.

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Result, TollError};
use crate::math::{self, MAX_BASIS_POINTS};
use crate::records::Record;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FeeCategory {
    Holders,
    Marketing,
    Liquidity,
}

impl FeeCategory {
    pub const ALL: [FeeCategory; 3] = [
        FeeCategory::Holders,
        FeeCategory::Marketing,
        FeeCategory::Liquidity,
    ];

    /// Receives the rounding remainder of every split.
    pub const REMAINDER: FeeCategory = FeeCategory::Holders;

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeCategory::Holders => "holders",
            FeeCategory::Marketing => "marketing",
            FeeCategory::Liquidity => "liquidity",
        }
    }
}

impl fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeCategory {
    type Err = TollError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "holders" => Ok(FeeCategory::Holders),
            "marketing" => Ok(FeeCategory::Marketing),
            "liquidity" => Ok(FeeCategory::Liquidity),
            other => Err(TollError::InvalidFeeConfig(format!(
                "unknown fee category {other:?}"
            ))),
        }
    }
}

/// Basis-point rates per category.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct FeeRates {
    pub holders: u16,
    pub marketing: u16,
    pub liquidity: u16,
}

impl FeeRates {
    pub fn total(&self) -> u32 {
        u32::from(self.holders) + u32::from(self.marketing) + u32::from(self.liquidity)
    }

    pub fn get(&self, category: FeeCategory) -> u16 {
        match category {
            FeeCategory::Holders => self.holders,
            FeeCategory::Marketing => self.marketing,
            FeeCategory::Liquidity => self.liquidity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total() > u32::from(MAX_BASIS_POINTS) {
            return Err(TollError::InvalidFeeConfig(format!(
                "category rates sum to {} basis points, above {MAX_BASIS_POINTS}",
                self.total()
            )));
        }
        Ok(())
    }
}

/// Destination token accounts per category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FeeRecipients {
    pub holders: Address,
    pub marketing: Address,
    pub liquidity: Address,
}

impl FeeRecipients {
    pub fn get(&self, category: FeeCategory) -> Address {
        match category {
            FeeCategory::Holders => self.holders,
            FeeCategory::Marketing => self.marketing,
            FeeCategory::Liquidity => self.liquidity,
        }
    }
}

/// Amounts apportioned to each category by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub holders: u64,
    pub marketing: u64,
    pub liquidity: u64,
}

impl FeeSplit {
    pub fn get(&self, category: FeeCategory) -> u64 {
        match category {
            FeeCategory::Holders => self.holders,
            FeeCategory::Marketing => self.marketing,
            FeeCategory::Liquidity => self.liquidity,
        }
    }

    fn get_mut(&mut self, category: FeeCategory) -> &mut u64 {
        match category {
            FeeCategory::Holders => &mut self.holders,
            FeeCategory::Marketing => &mut self.marketing,
            FeeCategory::Liquidity => &mut self.liquidity,
        }
    }

    pub fn total(&self) -> u64 {
        self.holders
            .saturating_add(self.marketing)
            .saturating_add(self.liquidity)
    }

    pub fn accumulate(&mut self, other: &FeeSplit) -> Result<()> {
        for category in FeeCategory::ALL {
            let slot = self.get_mut(category);
            *slot = math::add(*slot, other.get(category), "fee split total")?;
        }
        Ok(())
    }
}

/// Split `swept_total` by `rates`, floor per category, remainder to [`FeeCategory::REMAINDER`].
pub fn split_by_rates(rates: &FeeRates, swept_total: u64) -> Result<FeeSplit> {
    let total_bps = u64::from(rates.total());
    let mut split = FeeSplit::default();
    if total_bps == 0 {
        *split.get_mut(FeeCategory::REMAINDER) = swept_total;
        return Ok(split);
    }
    for category in FeeCategory::ALL {
        *split.get_mut(category) =
            math::mul_div_floor(swept_total, u64::from(rates.get(category)), total_bps)?;
    }
    // at most 2 units from three floors
    let remainder = math::sub(swept_total, split.total(), "fee split remainder")?;
    let slot = split.get_mut(FeeCategory::REMAINDER);
    *slot = math::add(*slot, remainder, "fee split remainder")?;
    Ok(split)
}

/// One per mint, at `[b"fee-config", mint]` under the fee program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FeeConfig {
    pub authority: Address,
    pub mint: Address,
    pub escrow: Address,
    pub fee_percent_holders: u16,
    pub fee_percent_marketing: u16,
    pub fee_percent_liquidity: u16,
    pub recipient_token_account_holders: Address,
    pub recipient_token_account_marketing: Address,
    pub recipient_token_account_liquidity: Address,
    pub unclaimed_fee_holders: u64,
    pub unclaimed_fee_marketing: u64,
    pub unclaimed_fee_liquidity: u64,
    /// Lifetime total swept into escrow and then claimed out of it.
    pub fee_collected: u64,
    /// Swept into escrow and still held there.
    pub fee_not_collected: u64,
}

impl Record for FeeConfig {
    const NAME: &'static str = "FeeConfig";
}

impl FeeConfig {
    pub fn new(
        authority: Address,
        mint: Address,
        escrow: Address,
        rates: FeeRates,
        recipients: FeeRecipients,
    ) -> Result<Self> {
        rates.validate()?;
        Ok(Self {
            authority,
            mint,
            escrow,
            fee_percent_holders: rates.holders,
            fee_percent_marketing: rates.marketing,
            fee_percent_liquidity: rates.liquidity,
            recipient_token_account_holders: recipients.holders,
            recipient_token_account_marketing: recipients.marketing,
            recipient_token_account_liquidity: recipients.liquidity,
            unclaimed_fee_holders: 0,
            unclaimed_fee_marketing: 0,
            unclaimed_fee_liquidity: 0,
            fee_collected: 0,
            fee_not_collected: 0,
        })
    }

    pub fn rates(&self) -> FeeRates {
        FeeRates {
            holders: self.fee_percent_holders,
            marketing: self.fee_percent_marketing,
            liquidity: self.fee_percent_liquidity,
        }
    }

    pub fn recipients(&self) -> FeeRecipients {
        FeeRecipients {
            holders: self.recipient_token_account_holders,
            marketing: self.recipient_token_account_marketing,
            liquidity: self.recipient_token_account_liquidity,
        }
    }

    pub fn recipient(&self, category: FeeCategory) -> Address {
        self.recipients().get(category)
    }

    pub fn total_basis_points(&self) -> u32 {
        self.rates().total()
    }

    pub fn unclaimed(&self, category: FeeCategory) -> u64 {
        match category {
            FeeCategory::Holders => self.unclaimed_fee_holders,
            FeeCategory::Marketing => self.unclaimed_fee_marketing,
            FeeCategory::Liquidity => self.unclaimed_fee_liquidity,
        }
    }

    fn unclaimed_mut(&mut self, category: FeeCategory) -> &mut u64 {
        match category {
            FeeCategory::Holders => &mut self.unclaimed_fee_holders,
            FeeCategory::Marketing => &mut self.unclaimed_fee_marketing,
            FeeCategory::Liquidity => &mut self.unclaimed_fee_liquidity,
        }
    }

    pub fn total_unclaimed(&self) -> Result<u64> {
        FeeCategory::ALL.iter().try_fold(0u64, |acc, c| {
            math::add(acc, self.unclaimed(*c), "total unclaimed")
        })
    }

    pub fn split(&self, swept_total: u64) -> Result<FeeSplit> {
        split_by_rates(&self.rates(), swept_total)
    }

    /// Record a sweep of `swept_total` into escrow.
    pub fn credit_collection(&self, swept_total: u64) -> Result<(FeeConfig, FeeSplit)> {
        let split = self.split(swept_total)?;
        let mut next = self.clone();
        for category in FeeCategory::ALL {
            let slot = next.unclaimed_mut(category);
            *slot = math::add(*slot, split.get(category), "unclaimed fee accumulator")?;
        }
        next.fee_not_collected = math::add(next.fee_not_collected, swept_total, "fee_not_collected")?;
        next.check_conservation()?;
        Ok((next, split))
    }

    /// Record a claim of `amount` out of `category`.
    pub fn debit_claim(&self, category: FeeCategory, amount: u64) -> Result<FeeConfig> {
        let available = self.unclaimed(category);
        if amount > available {
            return Err(TollError::InsufficientUnclaimedBalance {
                category,
                requested: amount,
                available,
            });
        }
        let mut next = self.clone();
        *next.unclaimed_mut(category) = available - amount;
        next.fee_collected = math::add(next.fee_collected, amount, "fee_collected")?;
        next.fee_not_collected = math::sub(next.fee_not_collected, amount, "fee_not_collected")?;
        next.check_conservation()?;
        Ok(next)
    }

    pub fn with_recipients(&self, recipients: FeeRecipients) -> FeeConfig {
        let mut next = self.clone();
        next.recipient_token_account_holders = recipients.holders;
        next.recipient_token_account_marketing = recipients.marketing;
        next.recipient_token_account_liquidity = recipients.liquidity;
        next
    }

    /// `fee_not_collected == Σ unclaimed_fee_*`
    pub fn check_conservation(&self) -> Result<()> {
        let unclaimed = self.total_unclaimed()?;
        if unclaimed != self.fee_not_collected {
            return Err(TollError::mismatch(
                self.mint,
                format!(
                    "fee_not_collected {} != unclaimed total {unclaimed}",
                    self.fee_not_collected
                ),
            ));
        }
        Ok(())
    }
}
