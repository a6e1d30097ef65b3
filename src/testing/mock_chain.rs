//! In-memory EVM stand-in
//!
//! [`MockChain`] keeps an ERC20 ledger and handler reserves in memory and
//! mines every accepted transaction immediately. It enforces the pending nonce
//! of each sender, so a session that tracks its nonce wrongly gets the same
//! "nonce too low/high" rejection a real node would give.
//!
//! Failure injection:
//! - [`MockChain::reject`]: the node refuses the submission (no nonce consumed)
//! - [`MockChain::revert`]: the transaction is mined but reverts
//! - [`MockChain::hold`]: the transaction is accepted but never mined
//! - [`MockChain::inject_foreign_tx_after`]: another process using the same
//!   account sends a transaction right after the given call

use crate::error::{Result, TokenOpsError};
use crate::evm::chain::{TokenChain, TokenInfo, TxReceiptSummary};
use crate::evm::client::{CallOpts, TxOpts};
use alloy::primitives::{keccak256, Address, TxHash, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Transaction kinds the mock understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Deploy,
    Mint,
    Approve,
    FundErc20,
}

/// A transaction accepted by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub call: MockCall,
    pub from: Address,
    pub nonce: u64,
    pub tx_hash: TxHash,
}

#[derive(Debug, Default)]
struct MockState {
    nonces: HashMap<Address, u64>,
    /// token -> deployer (minter)
    tokens: HashMap<Address, Address>,
    handlers: HashSet<Address>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    receipts: HashMap<TxHash, TxReceiptSummary>,
    submissions: Vec<SubmittedTx>,
    rejected: HashSet<MockCall>,
    reverted: HashSet<MockCall>,
    held: HashSet<MockCall>,
    foreign_after: HashSet<MockCall>,
    fail_nonce_lookup: bool,
    rpc_down: bool,
    tx_counter: u64,
    contract_counter: u64,
}

/// In-memory [`TokenChain`]
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from other assertions
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Fixtures
    // =========================================================================

    /// Place an already deployed token owned (and mintable) by `deployer`
    ///
    /// Does not consume a nonce.
    pub fn deploy_existing_token(&self, deployer: Address) -> Address {
        let mut state = self.state();
        let address = state.next_contract_address();
        state.tokens.insert(address, deployer);
        address
    }

    /// Register a handler contract
    pub fn add_handler(&self, handler: Address) {
        self.state().handlers.insert(handler);
    }

    pub fn set_balance(&self, token: Address, account: Address, amount: U256) {
        self.state().balances.insert((token, account), amount);
    }

    pub fn set_pending_nonce(&self, account: Address, nonce: u64) {
        self.state().nonces.insert(account, nonce);
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    pub fn reject(&self, call: MockCall) {
        self.state().rejected.insert(call);
    }

    pub fn revert(&self, call: MockCall) {
        self.state().reverted.insert(call);
    }

    pub fn hold(&self, call: MockCall) {
        self.state().held.insert(call);
    }

    pub fn inject_foreign_tx_after(&self, call: MockCall) {
        self.state().foreign_after.insert(call);
    }

    pub fn fail_nonce_lookup(&self, fail: bool) {
        self.state().fail_nonce_lookup = fail;
    }

    /// Make every RPC fail as if the endpoint were unreachable
    pub fn set_rpc_down(&self, down: bool) {
        self.state().rpc_down = down;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn submissions(&self) -> Vec<SubmittedTx> {
        self.state().submissions.clone()
    }

    /// Number of accepted transactions of kind `call`
    pub fn submitted(&self, call: MockCall) -> usize {
        self.state()
            .submissions
            .iter()
            .filter(|tx| tx.call == call)
            .count()
    }

    pub fn balance(&self, token: Address, account: Address) -> U256 {
        self.state().balance(token, account)
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.state().allowance(token, owner, spender)
    }

    pub fn is_token(&self, address: Address) -> bool {
        self.state().tokens.contains_key(&address)
    }

    pub fn pending_nonce_of(&self, account: Address) -> u64 {
        self.state().nonces.get(&account).copied().unwrap_or(0)
    }

    /// Accept a transaction, run `effect` unless it reverts, and record its receipt
    fn accept<F>(
        &self,
        call: MockCall,
        action: &'static str,
        opts: &TxOpts,
        effect: F,
    ) -> Result<(TxHash, Option<Address>)>
    where
        F: FnOnce(&mut MockState) -> std::result::Result<Option<Address>, String>,
    {
        let mut state = self.state();

        if state.rpc_down {
            return Err(TokenOpsError::submission(action, "connection refused"));
        }
        if state.rejected.contains(&call) {
            return Err(TokenOpsError::submission(action, "transaction rejected by node"));
        }

        let expected = state.nonces.get(&opts.from).copied().unwrap_or(0);
        match opts.nonce {
            Some(nonce) if nonce < expected => {
                return Err(TokenOpsError::submission(
                    action,
                    format!("nonce too low: next nonce {}, tx nonce {}", expected, nonce),
                ));
            }
            Some(nonce) if nonce > expected => {
                return Err(TokenOpsError::submission(
                    action,
                    format!("nonce too high: next nonce {}, tx nonce {}", expected, nonce),
                ));
            }
            _ => {}
        }

        state.nonces.insert(opts.from, expected + 1);
        state.tx_counter += 1;
        let tx_hash = keccak256(state.tx_counter.to_be_bytes());

        state.submissions.push(SubmittedTx {
            call,
            from: opts.from,
            nonce: expected,
            tx_hash,
        });

        if state.foreign_after.remove(&call) {
            state.nonces.insert(opts.from, expected + 2);
        }

        if state.held.contains(&call) {
            return Ok((tx_hash, None));
        }

        let outcome = if state.reverted.contains(&call) {
            Err("forced revert".to_string())
        } else {
            effect(&mut *state)
        };

        let (success, contract_address) = match outcome {
            Ok(address) => (true, address),
            Err(_) => (false, None),
        };
        state.receipts.insert(
            tx_hash,
            TxReceiptSummary {
                tx_hash,
                success,
                contract_address,
            },
        );

        Ok((tx_hash, contract_address))
    }
}

impl MockState {
    fn next_contract_address(&mut self) -> Address {
        self.contract_counter += 1;
        let digest = keccak256(format!("mock-contract-{}", self.contract_counter));
        Address::from_slice(&digest[12..])
    }

    fn balance(&self, token: Address, account: Address) -> U256 {
        self.balances
            .get(&(token, account))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn require_token(&self, token: Address) -> std::result::Result<Address, String> {
        self.tokens
            .get(&token)
            .copied()
            .ok_or_else(|| format!("no token at {}", token))
    }
}

#[async_trait]
impl TokenChain for MockChain {
    async fn pending_nonce(&self, account: Address) -> Result<u64> {
        let state = self.state();
        if state.rpc_down || state.fail_nonce_lookup {
            return Err(TokenOpsError::call(
                "eth_getTransactionCount",
                "connection refused",
            ));
        }
        Ok(state.nonces.get(&account).copied().unwrap_or(0))
    }

    async fn code_exists(&self, address: Address) -> Result<bool> {
        let state = self.state();
        if state.rpc_down {
            return Err(TokenOpsError::call("eth_getCode", "connection refused"));
        }
        Ok(state.tokens.contains_key(&address) || state.handlers.contains(&address))
    }

    async fn deploy_token(
        &self,
        opts: &TxOpts,
        _name: &str,
        _symbol: &str,
    ) -> Result<(Address, TxHash)> {
        let deployer = opts.from;
        let nonce = opts.nonce.unwrap_or_else(|| self.pending_nonce_of(deployer));
        let predicted = deployer.create(nonce);

        let (tx_hash, _) = self.accept(MockCall::Deploy, "deploy", opts, |state| {
            state.tokens.insert(predicted, deployer);
            Ok(Some(predicted))
        })?;

        Ok((predicted, tx_hash))
    }

    async fn mint(&self, opts: &TxOpts, token: Address, to: Address, amount: U256) -> Result<TxHash> {
        let minter = opts.from;
        let (tx_hash, _) = self.accept(MockCall::Mint, "mint", opts, |state| {
            let deployer = state.require_token(token)?;
            if deployer != minter {
                return Err("ERC20PresetMinterPauser: must have minter role to mint".into());
            }
            let balance = state.balance(token, to);
            let credited = balance
                .checked_add(amount)
                .ok_or_else(|| "balance overflow".to_string())?;
            state.balances.insert((token, to), credited);
            Ok(None)
        })?;
        Ok(tx_hash)
    }

    async fn approve(
        &self,
        opts: &TxOpts,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash> {
        let owner = opts.from;
        let (tx_hash, _) = self.accept(MockCall::Approve, "approve", opts, |state| {
            state.require_token(token)?;
            state.allowances.insert((token, owner, spender), amount);
            Ok(None)
        })?;
        Ok(tx_hash)
    }

    async fn fund_erc20(
        &self,
        opts: &TxOpts,
        handler: Address,
        token: Address,
        from: Address,
        amount: U256,
    ) -> Result<TxHash> {
        let (tx_hash, _) = self.accept(MockCall::FundErc20, "fundERC20", opts, |state| {
            if !state.handlers.contains(&handler) {
                return Err(format!("no handler at {}", handler));
            }
            state.require_token(token)?;

            let allowance = state.allowance(token, from, handler);
            if allowance < amount {
                return Err("ERC20: insufficient allowance".into());
            }
            let balance = state.balance(token, from);
            if balance < amount {
                return Err("ERC20: transfer amount exceeds balance".into());
            }

            let reserve = state.balance(token, handler);
            state
                .allowances
                .insert((token, from, handler), allowance - amount);
            state.balances.insert((token, from), balance - amount);
            state.balances.insert((token, handler), reserve + amount);
            Ok(None)
        })?;
        Ok(tx_hash)
    }

    async fn balance_of(&self, _opts: &CallOpts, token: Address, account: Address) -> Result<U256> {
        let state = self.state();
        if state.rpc_down {
            return Err(TokenOpsError::call("balanceOf", "connection refused"));
        }
        state
            .require_token(token)
            .map_err(|e| TokenOpsError::call("balanceOf", e))?;
        Ok(state.balance(token, account))
    }

    async fn allowance(
        &self,
        _opts: &CallOpts,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256> {
        let state = self.state();
        if state.rpc_down {
            return Err(TokenOpsError::call("allowance", "connection refused"));
        }
        state
            .require_token(token)
            .map_err(|e| TokenOpsError::call("allowance", e))?;
        Ok(state.allowance(token, owner, spender))
    }

    async fn token_info(&self, _opts: &CallOpts, token: Address) -> Result<TokenInfo> {
        let state = self.state();
        if state.rpc_down {
            return Err(TokenOpsError::call("name", "connection refused"));
        }
        state
            .require_token(token)
            .map_err(|e| TokenOpsError::call("name", e))?;
        // Tokens are always deployed with empty name and symbol
        Ok(TokenInfo {
            address: token,
            name: String::new(),
            symbol: String::new(),
            decimals: 18,
        })
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceiptSummary>> {
        let state = self.state();
        if state.rpc_down {
            return Err(TokenOpsError::Confirmation {
                tx_hash,
                reason: "connection refused".into(),
            });
        }
        Ok(state.receipts.get(&tx_hash).copied())
    }
}
