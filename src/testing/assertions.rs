//! Token Test Assertions
//!
//! Exact-amount checks for token flows. Token quantities are compared as full
//! `U256` values: no tolerance and no float conversion.

use crate::evm::chain::TokenChain;
use crate::evm::client::ChainClient;
use alloy::primitives::U256;
use eyre::{eyre, Result};

/// Assert that two token amounts are identical
pub fn assert_amount_eq(what: &str, actual: U256, expected: U256) -> Result<()> {
    if actual != expected {
        return Err(eyre!(
            "{} mismatch: expected {}, got {}",
            what,
            expected,
            actual
        ));
    }
    Ok(())
}

/// Assert that a balance increased by exactly `expected_increase`
pub fn assert_balance_increased(
    balance_before: U256,
    balance_after: U256,
    expected_increase: U256,
) -> Result<()> {
    let actual_increase = balance_after.checked_sub(balance_before).ok_or_else(|| {
        eyre!(
            "Balance decreased: before {}, after {}",
            balance_before,
            balance_after
        )
    })?;

    if actual_increase != expected_increase {
        return Err(eyre!(
            "Balance increase mismatch: expected {}, got {} (before: {}, after: {})",
            expected_increase,
            actual_increase,
            balance_before,
            balance_after
        ));
    }
    Ok(())
}

/// Assert that a balance decreased by exactly `expected_decrease`
pub fn assert_balance_decreased(
    balance_before: U256,
    balance_after: U256,
    expected_decrease: U256,
) -> Result<()> {
    let actual_decrease = balance_before.checked_sub(balance_after).ok_or_else(|| {
        eyre!(
            "Balance increased: before {}, after {}",
            balance_before,
            balance_after
        )
    })?;

    if actual_decrease != expected_decrease {
        return Err(eyre!(
            "Balance decrease mismatch: expected {}, got {} (before: {}, after: {})",
            expected_decrease,
            actual_decrease,
            balance_before,
            balance_after
        ));
    }
    Ok(())
}

/// Assert that every nonce lock taken on `client` has been released
pub fn assert_no_leaked_lock<C: TokenChain>(client: &ChainClient<C>) -> Result<()> {
    let (acquired, released) = client.lock_counts();
    if acquired != released {
        return Err(eyre!(
            "Nonce lock leaked: acquired {} times, released {} times",
            acquired,
            released
        ));
    }
    if client.is_locked() {
        return Err(eyre!("Session is still locked"));
    }
    Ok(())
}
