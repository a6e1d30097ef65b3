//! Testing Utilities Module
//!
//! Helpers for exercising the token operations without a node, and shared
//! assertions for tests that do run against one.
//!
//! ## Submodules
//!
//! - `mock_chain` - In-memory ERC20 ledger and handler implementing `TokenChain`
//! - `assertions` - Exact-amount and lock-discipline assertions

pub mod assertions;
pub mod mock_chain;

// Re-export commonly used items
pub use assertions::*;
pub use mock_chain::*;
