//! ERC20 Token Operations
//!
//! Deploy, mint, approve and handler funding for bridge tests and scripts, all
//! driven through a [`ChainClient`] session. Every nonce-consuming phase locks
//! the session on its own and releases it before the next phase begins.
//!
//! Multi-phase operations are not transactional: if a later phase fails, the
//! earlier ones stay on-chain (e.g. a deployed token that was never minted).

use crate::config::FundNonceMode;
use crate::error::{Result, TokenOpsError};
use crate::evm::chain::{TokenChain, TokenInfo};
use crate::evm::client::{ChainClient, Confirm, Submitted};
use alloy::primitives::{Address, U256};
use tracing::{info, warn};

/// Deploy a token, mint `amount` to the operator and approve `handler` for it
///
/// Returns the new token's address. The token is deployed with an empty name
/// and symbol.
pub async fn deploy_mint_approve<C: TokenChain>(
    client: &ChainClient<C>,
    handler: Address,
    amount: U256,
) -> Result<Address> {
    let chain = client.chain();

    // Deploy
    let deployed = client
        .transact("deploy", Confirm::Wait, |opts| async move {
            let (token, tx_hash) = chain.deploy_token(&opts, "", "").await?;
            Ok(Submitted::new(tx_hash, token))
        })
        .await?;

    let mut token = deployed.output;
    if let Some(actual) = deployed.receipt.and_then(|r| r.contract_address) {
        if actual != token {
            warn!(
                predicted = %token,
                actual = %actual,
                "Deployed address differs from prediction, using receipt"
            );
            token = actual;
        }
    }
    info!(token = %token, tx_hash = %deployed.tx_hash, "ERC20 token deployed");

    // Mint: the approve phase re-locks and re-reads the pending nonce, so no wait
    let minted = client
        .transact("mint", Confirm::NoWait, |opts| async move {
            let tx_hash = chain.mint(&opts, token, opts.from, amount).await?;
            Ok(Submitted::new(tx_hash, ()))
        })
        .await?;
    info!(token = %token, amount = %amount, tx_hash = %minted.tx_hash, "Minted to operator");

    // Approve
    let approved = client
        .transact("approve", Confirm::Wait, |opts| async move {
            let tx_hash = chain.approve(&opts, token, handler, amount).await?;
            Ok(Submitted::new(tx_hash, ()))
        })
        .await?;
    info!(
        token = %token,
        handler = %handler,
        amount = %amount,
        tx_hash = %approved.tx_hash,
        "Handler approved"
    );

    Ok(token)
}

/// Grant `spender` an allowance of `amount` on `token`
///
/// An amount of zero clears any previous allowance.
pub async fn approve<C: TokenChain>(
    client: &ChainClient<C>,
    token: Address,
    spender: Address,
    amount: U256,
) -> Result<()> {
    let approved = client
        .transact("approve", Confirm::Wait, |opts| async move {
            client.bind_contract("token", token).await?;
            let tx_hash = client
                .chain()
                .approve(&opts, token, spender, amount)
                .await?;
            Ok(Submitted::new(tx_hash, ()))
        })
        .await?;

    info!(
        token = %token,
        spender = %spender,
        amount = %amount,
        tx_hash = %approved.tx_hash,
        "Allowance approved"
    );
    Ok(())
}

/// Token balance of `account`; a read-only call that takes no lock
pub async fn get_balance<C: TokenChain>(
    client: &ChainClient<C>,
    token: Address,
    account: Address,
) -> Result<U256> {
    client.bind_contract("token", token).await?;
    client
        .chain()
        .balance_of(client.call_opts(), token, account)
        .await
}

/// Allowance `owner` has granted `spender` on `token`
pub async fn get_allowance<C: TokenChain>(
    client: &ChainClient<C>,
    token: Address,
    owner: Address,
    spender: Address,
) -> Result<U256> {
    client.bind_contract("token", token).await?;
    client
        .chain()
        .allowance(client.call_opts(), token, owner, spender)
        .await
}

/// Name, symbol and decimals of `token`
pub async fn get_token_info<C: TokenChain>(
    client: &ChainClient<C>,
    token: Address,
) -> Result<TokenInfo> {
    client.bind_contract("token", token).await?;
    client.chain().token_info(client.call_opts(), token).await
}

/// Approve `handler` for `amount` of `token`, then have it pull the funds into
/// its reserve
///
/// If the approval fails, no funding transaction is sent.
pub async fn fund_handler<C: TokenChain>(
    client: &ChainClient<C>,
    handler: Address,
    token: Address,
    amount: U256,
) -> Result<()> {
    approve(client, token, handler, amount).await?;

    client.bind_contract("handler", handler).await?;
    let chain = client.chain();

    let tx_hash = match client.fund_nonce_mode() {
        FundNonceMode::Guarded => {
            let funded = client
                .transact("fundERC20", Confirm::Wait, |opts| async move {
                    let tx_hash = chain
                        .fund_erc20(&opts, handler, token, opts.from, amount)
                        .await?;
                    Ok(Submitted::new(tx_hash, ()))
                })
                .await?;
            funded.tx_hash
        }
        FundNonceMode::Unguarded => {
            // Nonce left by the approval, plus one; races any other user of the account
            let opts = client.bump_nonce().await?;
            let tx_hash = chain
                .fund_erc20(&opts, handler, token, opts.from, amount)
                .await?;
            client.wait_for_tx(tx_hash).await?;
            tx_hash
        }
    };

    info!(
        handler = %handler,
        token = %token,
        amount = %amount,
        tx_hash = %tx_hash,
        "Handler funded"
    );
    Ok(())
}

/// Parse a decimal token amount in the smallest denomination
///
/// Zero is accepted, as it is by the contracts.
pub fn parse_amount(raw: &str) -> Result<U256> {
    raw.trim()
        .parse::<U256>()
        .map_err(|e| TokenOpsError::Config(format!("invalid token amount '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_no_leaked_lock, MockCall, MockChain};
    use std::time::Duration;

    fn operator() -> Address {
        Address::repeat_byte(0x0a)
    }

    fn handler() -> Address {
        Address::repeat_byte(0x4d)
    }

    fn client_with_mode(mode: FundNonceMode) -> ChainClient<MockChain> {
        let chain = MockChain::new();
        chain.add_handler(handler());
        ChainClient::new(chain, operator())
            .with_confirmation(Duration::from_millis(100), Duration::from_millis(5))
            .with_fund_nonce_mode(mode)
    }

    fn client() -> ChainClient<MockChain> {
        client_with_mode(FundNonceMode::Guarded)
    }

    #[tokio::test]
    async fn test_deploy_mint_approve() {
        let client = client();
        let amount = U256::from(1_000_000u64);

        let token = deploy_mint_approve(&client, handler(), amount).await.unwrap();

        assert!(!token.is_zero());
        assert_eq!(token, operator().create(0));
        assert_eq!(get_balance(&client, token, operator()).await.unwrap(), amount);
        assert_eq!(
            get_allowance(&client, token, operator(), handler())
                .await
                .unwrap(),
            amount
        );

        let nonces: Vec<u64> = client.chain().submissions().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
        assert_eq!(client.lock_counts(), (3, 3));
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_deploy_mint_approve_with_zero_amount() {
        let client = client();

        let token = deploy_mint_approve(&client, handler(), U256::ZERO)
            .await
            .unwrap();

        assert_eq!(get_balance(&client, token, operator()).await.unwrap(), U256::ZERO);
        assert_eq!(client.chain().submitted(MockCall::Approve), 1);
    }

    #[tokio::test]
    async fn test_deploy_failure_grants_nothing() {
        let client = client();
        client.chain().revert(MockCall::Deploy);

        let err = deploy_mint_approve(&client, handler(), U256::from(10))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Reverted { .. }));
        assert_eq!(client.chain().submitted(MockCall::Mint), 0);
        assert_eq!(client.chain().submitted(MockCall::Approve), 0);
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_mint_failure_leaves_deployed_token() {
        let client = client();
        client.chain().reject(MockCall::Mint);

        let err = deploy_mint_approve(&client, handler(), U256::from(10))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Submission { action: "mint", .. }));
        // No rollback: the token from the first phase is still live
        let token = operator().create(0);
        assert!(client.chain().is_token(token));
        assert_eq!(client.chain().allowance_of(token, operator(), handler()), U256::ZERO);
        assert_eq!(client.lock_counts(), (2, 2));
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_approve_failure_in_deploy_flow() {
        let client = client();
        client.chain().revert(MockCall::Approve);

        let err = deploy_mint_approve(&client, handler(), U256::from(10))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Reverted { .. }));
        let token = operator().create(0);
        assert_eq!(client.chain().allowance_of(token, operator(), handler()), U256::ZERO);
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_approve_exact_large_amount() {
        let client = client();
        let token = client.chain().deploy_existing_token(operator());
        let spender = Address::repeat_byte(0x33);
        let amount = U256::MAX - U256::from(12345u64);

        approve(&client, token, spender, amount).await.unwrap();

        assert_eq!(
            get_allowance(&client, token, operator(), spender)
                .await
                .unwrap(),
            amount
        );
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_approve_zero_clears_allowance() {
        let client = client();
        let token = client.chain().deploy_existing_token(operator());
        let spender = Address::repeat_byte(0x33);

        approve(&client, token, spender, U256::from(500u64)).await.unwrap();
        approve(&client, token, spender, U256::ZERO).await.unwrap();

        assert_eq!(
            get_allowance(&client, token, operator(), spender)
                .await
                .unwrap(),
            U256::ZERO
        );
        assert_eq!(client.lock_counts(), (2, 2));
    }

    #[tokio::test]
    async fn test_approve_binding_failure_releases_lock() {
        let client = client();

        let err = approve(&client, Address::ZERO, handler(), U256::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenOpsError::Binding { kind: "token", .. }));

        let not_a_contract = Address::repeat_byte(0x99);
        let err = approve(&client, not_a_contract, handler(), U256::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenOpsError::Binding { .. }));

        assert_eq!(client.chain().submitted(MockCall::Approve), 0);
        assert_eq!(client.lock_counts(), (2, 2));
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_approve_lock_failure() {
        let client = client();
        let token = client.chain().deploy_existing_token(operator());
        client.chain().fail_nonce_lookup(true);

        let err = approve(&client, token, handler(), U256::from(1))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Lock(_)));
        assert_eq!(client.chain().submitted(MockCall::Approve), 0);
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_approve_confirmation_timeout_releases_lock() {
        let client = client();
        let token = client.chain().deploy_existing_token(operator());
        client.chain().hold(MockCall::Approve);

        let err = approve(&client, token, handler(), U256::from(1))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Timeout { .. }));
        assert!(err.is_confirmation_failure());
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_get_balance_unminted_account_is_zero() {
        let client = client();
        let token = client.chain().deploy_existing_token(operator());

        let balance = get_balance(&client, token, Address::repeat_byte(0x55))
            .await
            .unwrap();

        assert_eq!(balance, U256::ZERO);
        // Reads never lock or consume a nonce
        assert_eq!(client.lock_counts(), (0, 0));
        assert!(client.chain().submissions().is_empty());
    }

    #[tokio::test]
    async fn test_get_balance_failures() {
        let client = client();
        let token = client.chain().deploy_existing_token(operator());

        let err = get_balance(&client, Address::ZERO, operator()).await.unwrap_err();
        assert!(matches!(err, TokenOpsError::Binding { .. }));

        client.chain().set_rpc_down(true);
        assert!(get_balance(&client, token, operator()).await.is_err());

        let client = client.with_contract_code_check(false);
        let err = get_balance(&client, token, operator()).await.unwrap_err();
        assert!(matches!(err, TokenOpsError::Call { call: "balanceOf", .. }));
    }

    #[tokio::test]
    async fn test_get_token_info() {
        let client = client();
        let token = deploy_mint_approve(&client, handler(), U256::from(1u64))
            .await
            .unwrap();

        let info = get_token_info(&client, token).await.unwrap();
        assert_eq!(info.address, token);
        assert_eq!(info.name, "");
        assert_eq!(info.symbol, "");
        assert_eq!(info.decimals, 18);
    }

    #[tokio::test]
    async fn test_fund_handler_moves_exact_amount() {
        let client = client();
        let amount = U256::from(1_000_000u64);
        let token = deploy_mint_approve(&client, handler(), amount).await.unwrap();

        let operator_before = get_balance(&client, token, operator()).await.unwrap();
        let reserve_before = get_balance(&client, token, handler()).await.unwrap();

        fund_handler(&client, handler(), token, amount).await.unwrap();

        let operator_after = get_balance(&client, token, operator()).await.unwrap();
        let reserve_after = get_balance(&client, token, handler()).await.unwrap();

        crate::testing::assert_balance_decreased(operator_before, operator_after, amount).unwrap();
        crate::testing::assert_balance_increased(reserve_before, reserve_after, amount).unwrap();
        assert_eq!(client.chain().submitted(MockCall::FundErc20), 1);
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_fund_handler_skips_fund_when_approve_fails() {
        let client = client();
        let token = deploy_mint_approve(&client, handler(), U256::from(100u64))
            .await
            .unwrap();
        client.chain().reject(MockCall::Approve);

        let err = fund_handler(&client, handler(), token, U256::from(100u64))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Submission { action: "approve", .. }));
        assert_eq!(client.chain().submitted(MockCall::FundErc20), 0);
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_fund_handler_skips_fund_when_approve_reverts() {
        let client = client();
        let token = deploy_mint_approve(&client, handler(), U256::from(100u64))
            .await
            .unwrap();
        client.chain().revert(MockCall::Approve);

        assert!(fund_handler(&client, handler(), token, U256::from(100u64))
            .await
            .is_err());
        assert_eq!(client.chain().submitted(MockCall::FundErc20), 0);
    }

    #[tokio::test]
    async fn test_fund_handler_unknown_handler() {
        let client = client();
        let token = deploy_mint_approve(&client, handler(), U256::from(100u64))
            .await
            .unwrap();

        let err = fund_handler(&client, Address::repeat_byte(0xee), token, U256::from(1u64))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Binding { kind: "handler", .. }));
        assert_eq!(client.chain().submitted(MockCall::FundErc20), 0);
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_fund_handler_reverts_on_insufficient_balance() {
        let client = client();
        let token = deploy_mint_approve(&client, handler(), U256::from(10u64))
            .await
            .unwrap();

        let err = fund_handler(&client, handler(), token, U256::from(11u64))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Reverted { .. }));
        assert_eq!(
            get_balance(&client, token, handler()).await.unwrap(),
            U256::ZERO
        );
        assert_no_leaked_lock(&client).unwrap();
    }

    #[tokio::test]
    async fn test_fund_handler_unguarded_matches_legacy_nonce() {
        let client = client_with_mode(FundNonceMode::Unguarded);
        let amount = U256::from(1_000_000u64);
        let token = deploy_mint_approve(&client, handler(), amount).await.unwrap();

        fund_handler(&client, handler(), token, amount).await.unwrap();

        let submissions = client.chain().submissions();
        let approve_nonce = submissions
            .iter()
            .rev()
            .find(|tx| tx.call == MockCall::Approve)
            .map(|tx| tx.nonce)
            .unwrap();
        let fund = submissions.last().unwrap();
        assert_eq!(fund.call, MockCall::FundErc20);
        assert_eq!(fund.nonce, approve_nonce + 1);

        assert_eq!(get_balance(&client, token, handler()).await.unwrap(), amount);
        // The fund phase takes no nonce lock: 3 for deploy/mint/approve, 1 for approve
        assert_eq!(client.lock_counts(), (4, 4));
    }

    #[tokio::test]
    async fn test_fund_handler_unguarded_races_foreign_sender() {
        let client = client_with_mode(FundNonceMode::Unguarded);
        let token = deploy_mint_approve(&client, handler(), U256::from(50u64))
            .await
            .unwrap();
        // Another process sends from the operator account between approve and fund
        client.chain().inject_foreign_tx_after(MockCall::Approve);

        let err = fund_handler(&client, handler(), token, U256::from(50u64))
            .await
            .unwrap_err();

        assert!(matches!(err, TokenOpsError::Submission { action: "fundERC20", .. }));
        assert!(err.to_string().contains("nonce too low"));
    }

    #[tokio::test]
    async fn test_fund_handler_guarded_survives_foreign_sender() {
        let client = client();
        let token = deploy_mint_approve(&client, handler(), U256::from(50u64))
            .await
            .unwrap();
        client.chain().inject_foreign_tx_after(MockCall::Approve);

        fund_handler(&client, handler(), token, U256::from(50u64))
            .await
            .unwrap();

        assert_eq!(
            get_balance(&client, token, handler()).await.unwrap(),
            U256::from(50u64)
        );
        assert_eq!(client.lock_counts(), (5, 5));
    }

    #[tokio::test]
    async fn test_concurrent_operations_serialize_nonces() {
        let client = client();
        let token = client.chain().deploy_existing_token(operator());

        let spenders: Vec<Address> = (1u8..=8).map(Address::repeat_byte).collect();
        let approvals = spenders
            .iter()
            .map(|spender| approve(&client, token, *spender, U256::from(7u64)));
        let results = futures::future::join_all(approvals).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let mut nonces: Vec<u64> = client.chain().submissions().iter().map(|tx| tx.nonce).collect();
        nonces.sort_unstable();
        assert_eq!(nonces, (0..8).collect::<Vec<u64>>());
        assert_no_leaked_lock(&client).unwrap();
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000000").unwrap(), U256::from(1_000_000u64));
        assert_eq!(parse_amount(" 0 ").unwrap(), U256::ZERO);
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("1.5").is_err());
    }
}
