use crate::error::{Result, TollError};

/// 10_000 basis points == 100%.
pub const MAX_BASIS_POINTS: u16 = 10_000;

/// floor(a * b / c) computed in u128.
pub fn mul_div_floor(a: u64, b: u64, c: u64) -> Result<u64> {
    if c == 0 {
        return Err(TollError::MathOverflow("mul_div_floor: division by zero"));
    }
    let z = u128::from(a)
        .checked_mul(u128::from(b))
        .ok_or(TollError::MathOverflow("mul_div_floor: multiplication"))?
        / u128::from(c);
    u64::try_from(z).map_err(|_| TollError::MathOverflow("mul_div_floor: conversion"))
}

/// floor(amount * bps / 10_000)
pub fn bps_of(amount: u64, bps: u16) -> Result<u64> {
    mul_div_floor(amount, u64::from(bps), u64::from(MAX_BASIS_POINTS))
}

pub fn add(a: u64, b: u64, what: &'static str) -> Result<u64> {
    a.checked_add(b).ok_or(TollError::MathOverflow(what))
}

pub fn sub(a: u64, b: u64, what: &'static str) -> Result<u64> {
    a.checked_sub(b).ok_or(TollError::MathOverflow(what))
}
