//! EVM Chain Support Module
//!
//! Token and bridge handler helpers for EVM-compatible chains.
//!
//! ## Submodules
//!
//! - `chain` - `TokenChain` seam and its alloy-backed implementation
//! - `client` - Nonce-managed operator session and confirmation waits
//! - `contracts` - Token and handler bindings using alloy sol! macro
//! - `tokens` - Deploy/mint/approve, balance reads and handler funding

pub mod chain;
pub mod client;
pub mod contracts;
pub mod tokens;

// Re-export commonly used items
pub use chain::{connect, EvmChain, TokenChain, TokenInfo, TxReceiptSummary};
pub use client::{CallOpts, ChainClient, Completed, Confirm, NonceGuard, Submitted, TxOpts};
pub use contracts::{ContractArtifact, ERC20Handler, ERC20PresetMinterPauser};
pub use tokens::{
    approve, deploy_mint_approve, fund_handler, get_allowance, get_balance, get_token_info,
    parse_amount,
};
