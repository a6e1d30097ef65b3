//! Bridge Token Ops: ERC20 helpers for CL8Y bridge tests and scripts
//!
//! Deploys an ERC20PresetMinterPauser token, mints supply to the operator,
//! approves a bridge handler and funds the handler's reserve, all from one
//! operator account whose nonce is tracked by a locked session.
//!
//! - **Config** - Environment-driven session configuration
//! - **Errors** - Lock, binding, submission, confirmation and call failures
//! - **EVM Module** - Contract bindings, chain access, nonce session, token ops
//! - **Testing Module** - In-memory chain and exact-amount assertions
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_token_ops::{evm, TokenOpsConfig};
//!
//! let config = TokenOpsConfig::load()?;
//! let chain = evm::connect(&config)?;
//! let operator = chain.operator();
//! let client = evm::ChainClient::from_config(chain, operator, &config);
//!
//! let token = evm::deploy_mint_approve(&client, handler, amount).await?;
//! evm::fund_handler(&client, handler, token, amount).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `testing` - Expose `MockChain` and assertion helpers to other crates

pub mod config;
pub mod error;
pub mod evm;
pub mod redact;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{FundNonceMode, GasConfig, TokenOpsConfig};
pub use error::{Result, TokenOpsError};
