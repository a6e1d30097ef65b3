//! EVM chain access for the token helpers
//!
//! [`TokenChain`] is the seam between the nonce-managed session and the node:
//! it submits already-sequenced transactions and performs read-only calls. It
//! never picks a nonce itself. [`EvmChain`] implements it over an alloy HTTP
//! provider with the operator wallet attached.

use crate::config::TokenOpsConfig;
use crate::error::{Result, TokenOpsError};
use crate::evm::client::{CallOpts, TxOpts};
use crate::evm::contracts::{ContractArtifact, ERC20Handler, ERC20PresetMinterPauser};
use alloy::{
    contract::{CallBuilder, CallDecoder},
    eips::BlockId,
    network::{Ethereum, EthereumWallet, Network, TransactionBuilder},
    primitives::{Address, TxHash, U256},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
    transports::{
        http::{Client, Http},
        Transport,
    },
};
use async_trait::async_trait;
use tracing::{debug, info};

/// The parts of a transaction receipt the token helpers care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceiptSummary {
    pub tx_hash: TxHash,
    /// Execution status (false when the transaction reverted)
    pub success: bool,
    /// Set for contract creation transactions
    pub contract_address: Option<Address>,
}

/// Token metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Transaction submission and read access to an EVM chain
///
/// Submission methods return as soon as the node accepts the transaction;
/// confirmation is the session's job.
#[async_trait]
pub trait TokenChain: Send + Sync {
    /// Pending transaction count of `account`
    async fn pending_nonce(&self, account: Address) -> Result<u64>;

    /// Whether `address` carries contract code
    async fn code_exists(&self, address: Address) -> Result<bool>;

    /// Deploy a new ERC20PresetMinterPauser
    ///
    /// Returns the address the contract will live at together with the
    /// creation transaction hash.
    async fn deploy_token(&self, opts: &TxOpts, name: &str, symbol: &str)
        -> Result<(Address, TxHash)>;

    async fn mint(&self, opts: &TxOpts, token: Address, to: Address, amount: U256)
        -> Result<TxHash>;

    async fn approve(
        &self,
        opts: &TxOpts,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash>;

    /// Ask `handler` to pull `amount` of `token` from `from` into its reserve
    async fn fund_erc20(
        &self,
        opts: &TxOpts,
        handler: Address,
        token: Address,
        from: Address,
        amount: U256,
    ) -> Result<TxHash>;

    async fn balance_of(&self, opts: &CallOpts, token: Address, account: Address)
        -> Result<U256>;

    async fn allowance(
        &self,
        opts: &CallOpts,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256>;

    async fn token_info(&self, opts: &CallOpts, token: Address) -> Result<TokenInfo>;

    /// Receipt of `tx_hash`, `None` while the transaction is not yet mined
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceiptSummary>>;
}

/// alloy-backed [`TokenChain`]
pub struct EvmChain<P> {
    provider: P,
    operator: Address,
    chain_id: u64,
    token_artifact: Option<ContractArtifact>,
}

/// Connect to the configured RPC endpoint with the operator wallet attached
///
/// The provider fills gas and chain id; nonces always come from the session.
pub fn connect(config: &TokenOpsConfig) -> Result<EvmChain<impl Provider<Http<Client>> + Clone>> {
    let signer: PrivateKeySigner = config
        .private_key
        .expose()
        .parse()
        .map_err(|e| TokenOpsError::Config(format!("Invalid private key: {}", e)))?;

    let operator = signer.address();
    let wallet = EthereumWallet::from(signer);

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(wallet)
        .on_http(
            config
                .rpc_url
                .parse()
                .map_err(|e| TokenOpsError::Config(format!("Invalid RPC URL: {}", e)))?,
        );

    let token_artifact = config
        .token_artifact
        .as_deref()
        .map(ContractArtifact::from_file)
        .transpose()?;

    info!(
        rpc_url = %config.rpc_url,
        chain_id = config.chain_id,
        operator = %operator,
        has_token_artifact = token_artifact.is_some(),
        "Created EVM token chain"
    );

    Ok(EvmChain {
        provider,
        operator,
        chain_id: config.chain_id,
        token_artifact,
    })
}

impl<P> EvmChain<P> {
    /// Wrap an existing provider whose wallet signs for `operator`
    pub fn new(provider: P, operator: Address, chain_id: u64) -> Self {
        Self {
            provider,
            operator,
            chain_id,
            token_artifact: None,
        }
    }

    pub fn with_token_artifact(mut self, artifact: ContractArtifact) -> Self {
        self.token_artifact = Some(artifact);
        self
    }

    /// Address of the signing account
    pub fn operator(&self) -> Address {
        self.operator
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P> EvmChain<P>
where
    P: Provider<Http<Client>>,
{
    async fn submit(
        &self,
        action: &'static str,
        tx: TransactionRequest,
        opts: &TxOpts,
    ) -> Result<TxHash> {
        let tx = apply_tx_opts(tx, opts);
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| TokenOpsError::submission(action, e))?;

        let tx_hash = *pending.tx_hash();
        debug!(action, nonce = ?opts.nonce, tx_hash = %tx_hash, "Transaction submitted");
        Ok(tx_hash)
    }

    async fn send_call<C: SolCall>(
        &self,
        action: &'static str,
        to: Address,
        call: C,
        opts: &TxOpts,
    ) -> Result<TxHash> {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(call.abi_encode());
        self.submit(action, tx, opts).await
    }
}

fn apply_tx_opts(mut tx: TransactionRequest, opts: &TxOpts) -> TransactionRequest {
    tx = tx.with_from(opts.from);
    if let Some(nonce) = opts.nonce {
        tx = tx.with_nonce(nonce);
    }
    if let Some(gas_limit) = opts.gas_limit {
        tx = tx.with_gas_limit(gas_limit);
    }
    if let Some(gas_price) = opts.gas_price {
        tx = tx.with_gas_price(gas_price);
    }
    tx
}

fn apply_call_opts<T, P, D, N>(
    mut call: CallBuilder<T, P, D, N>,
    opts: &CallOpts,
) -> CallBuilder<T, P, D, N>
where
    T: Transport + Clone,
    P: Provider<T, N>,
    D: CallDecoder,
    N: Network,
{
    if let Some(from) = opts.from {
        call = call.from(from);
    }
    if let Some(block) = opts.block {
        call = call.block(BlockId::number(block));
    }
    call
}

#[async_trait]
impl<P> TokenChain for EvmChain<P>
where
    P: Provider<Http<Client>, Ethereum> + Send + Sync,
{
    async fn pending_nonce(&self, account: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(|e| TokenOpsError::call("eth_getTransactionCount", e))
    }

    async fn code_exists(&self, address: Address) -> Result<bool> {
        let code = self
            .provider
            .get_code_at(address)
            .await
            .map_err(|e| TokenOpsError::call("eth_getCode", e))?;
        Ok(!code.is_empty())
    }

    async fn deploy_token(
        &self,
        opts: &TxOpts,
        name: &str,
        symbol: &str,
    ) -> Result<(Address, TxHash)> {
        let artifact = self.token_artifact.as_ref().ok_or_else(|| {
            TokenOpsError::Artifact("no ERC20PresetMinterPauser artifact configured".into())
        })?;
        let nonce = opts.nonce.ok_or_else(|| {
            TokenOpsError::submission("deploy", "deployment requires a locked nonce")
        })?;

        let tx = TransactionRequest::default().with_deploy_code(artifact.token_deploy_code(name, symbol));
        let tx_hash = self.submit("deploy", tx, opts).await?;

        Ok((opts.from.create(nonce), tx_hash))
    }

    async fn mint(
        &self,
        opts: &TxOpts,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash> {
        let call = ERC20PresetMinterPauser::mintCall { to, amount };
        self.send_call("mint", token, call, opts).await
    }

    async fn approve(
        &self,
        opts: &TxOpts,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash> {
        let call = ERC20PresetMinterPauser::approveCall { spender, amount };
        self.send_call("approve", token, call, opts).await
    }

    async fn fund_erc20(
        &self,
        opts: &TxOpts,
        handler: Address,
        token: Address,
        from: Address,
        amount: U256,
    ) -> Result<TxHash> {
        let call = ERC20Handler::fundERC20Call {
            tokenAddress: token,
            owner: from,
            amount,
        };
        self.send_call("fundERC20", handler, call, opts).await
    }

    async fn balance_of(&self, opts: &CallOpts, token: Address, account: Address) -> Result<U256> {
        let contract = ERC20PresetMinterPauser::new(token, &self.provider);
        let balance = apply_call_opts(contract.balanceOf(account), opts)
            .call()
            .await
            .map_err(|e| TokenOpsError::call("balanceOf", e))?;
        Ok(balance._0)
    }

    async fn allowance(
        &self,
        opts: &CallOpts,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256> {
        let contract = ERC20PresetMinterPauser::new(token, &self.provider);
        let allowance = apply_call_opts(contract.allowance(owner, spender), opts)
            .call()
            .await
            .map_err(|e| TokenOpsError::call("allowance", e))?;
        Ok(allowance._0)
    }

    async fn token_info(&self, opts: &CallOpts, token: Address) -> Result<TokenInfo> {
        let contract = ERC20PresetMinterPauser::new(token, &self.provider);

        let (name, symbol, decimals) = tokio::try_join!(
            async {
                apply_call_opts(contract.name(), opts)
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| TokenOpsError::call("name", e))
            },
            async {
                apply_call_opts(contract.symbol(), opts)
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| TokenOpsError::call("symbol", e))
            },
            async {
                apply_call_opts(contract.decimals(), opts)
                    .call()
                    .await
                    .map(|r| r._0)
                    .map_err(|e| TokenOpsError::call("decimals", e))
            }
        )?;

        Ok(TokenInfo {
            address: token,
            name,
            symbol,
            decimals,
        })
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceiptSummary>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| TokenOpsError::Confirmation {
                tx_hash,
                reason: e.to_string(),
            })?;

        Ok(receipt.map(|r| TxReceiptSummary {
            tx_hash,
            success: r.status(),
            contract_address: r.contract_address,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_tx_opts() {
        let from = Address::repeat_byte(0xaa);
        let opts = TxOpts {
            from,
            nonce: Some(7),
            gas_limit: Some(300_000),
            gas_price: None,
        };

        let tx = apply_tx_opts(TransactionRequest::default(), &opts);
        assert_eq!(tx.from, Some(from));
        assert_eq!(tx.nonce, Some(7));
        assert_eq!(tx.gas, Some(300_000));
        assert_eq!(tx.gas_price, None);
    }

    #[test]
    fn test_connect_rejects_bad_key() {
        let config = TokenOpsConfig::new("http://localhost:8545", 31337, "not-a-key");
        assert!(matches!(connect(&config), Err(TokenOpsError::Config(_))));
    }

    #[test]
    fn test_connect_without_artifact() {
        let config = TokenOpsConfig::new(
            "http://localhost:8545",
            31337,
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        );
        // Building the provider does not touch the network
        let chain = connect(&config).unwrap();
        assert_eq!(
            chain.operator(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        assert_eq!(chain.chain_id(), 31337);
    }
}
