use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Result, TollError};

pub const ADDRESS_LEN: usize = 32;
pub const MAX_SEED_LEN: usize = 32;
pub const MAX_SEEDS: usize = 16;

const DERIVED_ADDRESS_MARKER: &[u8] = b"ProgramDerivedAddress";

/// 32-byte account identity, rendered as base58.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Deterministic address for a well-known label (program ids, test fixtures).
    pub fn from_label(label: &str) -> Self {
        Self(Sha256::digest(label.as_bytes()).into())
    }

    pub fn to_bytes(self) -> [u8; ADDRESS_LEN] {
        self.0
    }

    /// True when the bytes decode to an ed25519 point, i.e. a key could sign for it.
    pub fn is_on_curve(&self) -> bool {
        VerifyingKey::from_bytes(&self.0).is_ok()
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = TollError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let malformed = |reason: String| TollError::MalformedAddress {
            input: s.to_string(),
            reason,
        };
        if trimmed.is_empty() {
            return Err(malformed("empty".into()));
        }
        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| malformed(e.to_string()))?;
        let bytes: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| malformed(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = <String as Deserialize>::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

/// Well-known program identities that own derived addresses.
pub mod programs {
    use super::Address;

    pub fn token_program() -> Address {
        Address::from_label("tollgate:token-program")
    }

    pub fn fee_program() -> Address {
        Address::from_label("tollgate:fee-program")
    }

    pub fn wrapper_program() -> Address {
        Address::from_label("tollgate:wrapper-program")
    }
}

/// Seed tags. One scheme for every derived record: `(tag, key[, authority])`.
pub mod seeds {
    pub const FEE_CONFIG: &[u8] = b"fee-config";
    pub const FEE_ESCROW: &[u8] = b"fee-escrow";
    pub const EXTRA_ACCOUNT_METAS: &[u8] = b"extra-account-metas";
    pub const TREASURY: &[u8] = b"treasury";
    pub const WRAPPER_MINT: &[u8] = b"wrapper-mint";
    pub const TREASURY_VAULT: &[u8] = b"treasury-vault";
    pub const TOKEN_ACCOUNT: &[u8] = b"token";
}

/// Compute the derived address for an explicit bump. `None` when the hash
/// lands on the curve.
pub fn create_derived_address(
    seeds: &[&[u8]],
    bump: u8,
    program: &Address,
) -> Result<Option<Address>> {
    if seeds.len() + 1 > MAX_SEEDS {
        return Err(TollError::Codec(format!(
            "at most {} seeds allowed, got {}",
            MAX_SEEDS - 1,
            seeds.len()
        )));
    }
    let mut hasher = Sha256::new();
    for seed in seeds {
        if seed.len() > MAX_SEED_LEN {
            return Err(TollError::Codec(format!(
                "seed of {} bytes exceeds {MAX_SEED_LEN}",
                seed.len()
            )));
        }
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program.as_ref());
    hasher.update(DERIVED_ADDRESS_MARKER);
    let candidate = Address(hasher.finalize().into());
    if candidate.is_on_curve() {
        Ok(None)
    } else {
        Ok(Some(candidate))
    }
}

/// Search bumps from 255 downwards for the first off-curve address.
pub fn find_derived_address(seeds: &[&[u8]], program: &Address) -> Result<(Address, u8)> {
    for bump in (0..=u8::MAX).rev() {
        if let Some(address) = create_derived_address(seeds, bump, program)? {
            return Ok((address, bump));
        }
    }
    Err(TollError::Codec("no off-curve bump for seeds".into()))
}

pub fn fee_config_seeds(mint: &Address) -> [&[u8]; 2] {
    [seeds::FEE_CONFIG, mint.as_ref()]
}

pub fn fee_escrow_seeds(mint: &Address) -> [&[u8]; 2] {
    [seeds::FEE_ESCROW, mint.as_ref()]
}

pub fn extra_account_metas_seeds(mint: &Address) -> [&[u8]; 2] {
    [seeds::EXTRA_ACCOUNT_METAS, mint.as_ref()]
}

pub fn treasury_seeds<'a>(base_mint: &'a Address, authority: &'a Address) -> [&'a [u8]; 3] {
    [seeds::TREASURY, base_mint.as_ref(), authority.as_ref()]
}

pub fn wrapper_mint_seeds(treasury: &Address) -> [&[u8]; 2] {
    [seeds::WRAPPER_MINT, treasury.as_ref()]
}

pub fn treasury_vault_seeds(treasury: &Address) -> [&[u8]; 2] {
    [seeds::TREASURY_VAULT, treasury.as_ref()]
}

pub fn token_account_seeds<'a>(owner: &'a Address, mint: &'a Address) -> [&'a [u8]; 3] {
    [owner.as_ref(), seeds::TOKEN_ACCOUNT, mint.as_ref()]
}

pub fn fee_config_address(mint: &Address) -> Result<Address> {
    Ok(find_derived_address(&fee_config_seeds(mint), &programs::fee_program())?.0)
}

pub fn fee_escrow_address(mint: &Address) -> Result<Address> {
    Ok(find_derived_address(&fee_escrow_seeds(mint), &programs::fee_program())?.0)
}

pub fn extra_account_metas_address(mint: &Address) -> Result<Address> {
    Ok(find_derived_address(&extra_account_metas_seeds(mint), &programs::fee_program())?.0)
}

pub fn treasury_address(base_mint: &Address, authority: &Address) -> Result<Address> {
    Ok(find_derived_address(
        &treasury_seeds(base_mint, authority),
        &programs::wrapper_program(),
    )?
    .0)
}

pub fn wrapper_mint_address(treasury: &Address) -> Result<Address> {
    Ok(find_derived_address(&wrapper_mint_seeds(treasury), &programs::wrapper_program())?.0)
}

pub fn treasury_vault_address(treasury: &Address) -> Result<Address> {
    Ok(find_derived_address(&treasury_vault_seeds(treasury), &programs::wrapper_program())?.0)
}

/// The canonical token account an owner holds for a mint.
pub fn token_account_address(owner: &Address, mint: &Address) -> Result<Address> {
    Ok(find_derived_address(&token_account_seeds(owner, mint), &programs::token_program())?.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_round_trip_and_rejects_garbage() {
        let addr = Address::from_label("alice");
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);

        assert!(matches!(
            "not-base58-0OIl".parse::<Address>(),
            Err(TollError::MalformedAddress { .. })
        ));
        assert!(matches!(
            bs58::encode([7u8; 31]).into_string().parse::<Address>(),
            Err(TollError::MalformedAddress { .. })
        ));
        assert!(matches!(
            "   ".parse::<Address>(),
            Err(TollError::MalformedAddress { .. })
        ));
    }

    #[test]
    fn derived_addresses_are_deterministic_and_off_curve() {
        let mint = Address::from_label("mint");
        let a = fee_config_address(&mint).unwrap();
        let b = fee_config_address(&mint).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_on_curve());
        assert_ne!(a, fee_escrow_address(&mint).unwrap());
        assert_ne!(a, extra_account_metas_address(&mint).unwrap());
    }

    #[test]
    fn treasury_derivation_includes_authority() {
        let base = Address::from_label("base");
        let one = treasury_address(&base, &Address::from_label("admin-1")).unwrap();
        let two = treasury_address(&base, &Address::from_label("admin-2")).unwrap();
        assert_ne!(one, two);
        assert_ne!(
            wrapper_mint_address(&one).unwrap(),
            treasury_vault_address(&one).unwrap()
        );
    }

    #[test]
    fn oversized_seed_is_rejected() {
        let long = [0u8; 33];
        let err = find_derived_address(&[&long], &programs::fee_program()).unwrap_err();
        assert!(matches!(err, TollError::Codec(_)));
    }

    #[test]
    fn serde_uses_base58_strings() {
        let addr = Address::from_label("bob");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
