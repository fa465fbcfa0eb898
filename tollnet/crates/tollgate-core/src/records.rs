//! Fixed-layout account encoding: 8-byte discriminator followed by the borsh body.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::{Result, TollError};

pub const DISCRIMINATOR_LEN: usize = 8;

pub trait Record: BorshSerialize + BorshDeserialize + Sized {
    const NAME: &'static str;

    fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        let digest = Sha256::digest(format!("account:{}", Self::NAME).as_bytes());
        let mut out = [0u8; DISCRIMINATOR_LEN];
        out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
        out
    }

    fn to_account_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Self::discriminator().to_vec();
        BorshSerialize::serialize(self, &mut bytes)?;
        Ok(bytes)
    }

    /// Decode, failing with `ConfigMismatch` when `address` holds another record type.
    fn from_account_bytes(address: &Address, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DISCRIMINATOR_LEN || bytes[..DISCRIMINATOR_LEN] != Self::discriminator() {
            return Err(TollError::mismatch(
                *address,
                format!("account does not hold a {} record", Self::NAME),
            ));
        }
        let mut body = &bytes[DISCRIMINATOR_LEN..];
        let record = <Self as BorshDeserialize>::deserialize(&mut body)?;
        if !body.is_empty() {
            return Err(TollError::Codec(format!(
                "{} trailing bytes after {} record at {address}",
                body.len(),
                Self::NAME
            )));
        }
        Ok(record)
    }
}
