//! Nonce-managed EVM session
//!
//! [`ChainClient`] owns the operator's transaction options behind an async
//! mutex. Every nonce-consuming phase locks the session, refreshes the nonce
//! from the pending transaction count, submits, optionally waits for the
//! receipt, and releases the lock when its [`NonceGuard`] is dropped. The
//! guard makes release unconditional: early returns through `?` unlock too.

use crate::config::{
    FundNonceMode, GasConfig, TokenOpsConfig, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
use crate::error::{Result, TokenOpsError};
use crate::evm::chain::{TokenChain, TxReceiptSummary};
use alloy::primitives::{Address, TxHash};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Options for nonce-consuming transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOpts {
    /// Sending account
    pub from: Address,
    /// Nonce tracked by the session (`None` until the first lock)
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

impl TxOpts {
    pub fn new(from: Address) -> Self {
        Self {
            from,
            nonce: None,
            gas_limit: None,
            gas_price: None,
        }
    }
}

/// Options for read-only calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOpts {
    pub from: Option<Address>,
    /// Block to read at (latest when unset)
    pub block: Option<u64>,
}

/// Whether a phase waits for its receipt before releasing the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    Wait,
    NoWait,
}

/// A transaction accepted by the node, plus whatever the submitter produced
#[derive(Debug, Clone)]
pub struct Submitted<T> {
    pub tx_hash: TxHash,
    pub output: T,
}

impl<T> Submitted<T> {
    pub fn new(tx_hash: TxHash, output: T) -> Self {
        Self { tx_hash, output }
    }
}

/// Outcome of a scoped [`ChainClient::transact`] phase
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub tx_hash: TxHash,
    pub output: T,
    /// Present when the phase waited for confirmation
    pub receipt: Option<TxReceiptSummary>,
}

#[derive(Debug, Default)]
struct LockCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Exclusive, nonce-refreshed access to the session
///
/// Dropping the guard unlocks the session.
pub struct NonceGuard<'a> {
    session: MutexGuard<'a, TxOpts>,
    counters: &'a LockCounters,
}

impl NonceGuard<'_> {
    /// The nonce refreshed when the lock was taken
    pub fn nonce(&self) -> Option<u64> {
        self.session.nonce
    }

    /// Snapshot of the transaction options for submission
    pub fn opts(&self) -> TxOpts {
        *self.session
    }

    /// Release the session explicitly
    pub fn unlock(self) {}
}

impl Deref for NonceGuard<'_> {
    type Target = TxOpts;

    fn deref(&self) -> &TxOpts {
        &self.session
    }
}

impl DerefMut for NonceGuard<'_> {
    fn deref_mut(&mut self) -> &mut TxOpts {
        &mut self.session
    }
}

impl Drop for NonceGuard<'_> {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        debug!(nonce = ?self.session.nonce, "Nonce lock released");
    }
}

/// Operator session shared by all token operations
pub struct ChainClient<C> {
    chain: C,
    session: Mutex<TxOpts>,
    call_opts: CallOpts,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    fund_nonce_mode: FundNonceMode,
    verify_contract_code: bool,
    cancel: CancellationToken,
    counters: LockCounters,
}

impl<C: TokenChain> ChainClient<C> {
    /// Create a session for `operator` with default confirmation settings
    pub fn new(chain: C, operator: Address) -> Self {
        Self {
            chain,
            session: Mutex::new(TxOpts::new(operator)),
            call_opts: CallOpts {
                from: Some(operator),
                block: None,
            },
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            fund_nonce_mode: FundNonceMode::default(),
            verify_contract_code: true,
            cancel: CancellationToken::new(),
            counters: LockCounters::default(),
        }
    }

    /// Create a session using the timing, gas and nonce settings of `config`
    pub fn from_config(chain: C, operator: Address, config: &TokenOpsConfig) -> Self {
        Self::new(chain, operator)
            .with_confirmation(config.confirmation_timeout, config.poll_interval)
            .with_gas(config.gas)
            .with_fund_nonce_mode(config.fund_nonce_mode)
            .with_contract_code_check(config.verify_contract_code)
    }

    pub fn with_confirmation(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_gas(mut self, gas: GasConfig) -> Self {
        let session = self.session.get_mut();
        session.gas_limit = gas.gas_limit;
        session.gas_price = gas.gas_price;
        self
    }

    pub fn with_fund_nonce_mode(mut self, mode: FundNonceMode) -> Self {
        self.fund_nonce_mode = mode;
        self
    }

    pub fn with_contract_code_check(mut self, verify: bool) -> Self {
        self.verify_contract_code = verify;
        self
    }

    /// Cancelling `token` aborts pending lock acquisitions and confirmation waits
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn call_opts(&self) -> &CallOpts {
        &self.call_opts
    }

    pub fn fund_nonce_mode(&self) -> FundNonceMode {
        self.fund_nonce_mode
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Snapshot of the session's transaction options
    pub async fn tx_opts(&self) -> TxOpts {
        *self.session.lock().await
    }

    /// Whether a phase currently holds the session
    pub fn is_locked(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// `(acquired, released)` nonce lock counts since creation
    pub fn lock_counts(&self) -> (u64, u64) {
        (
            self.counters.acquired.load(Ordering::SeqCst),
            self.counters.released.load(Ordering::SeqCst),
        )
    }

    /// Take exclusive use of the session and refresh its nonce from the chain
    pub async fn lock_nonce_and_update(&self) -> Result<NonceGuard<'_>> {
        let session = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(TokenOpsError::Lock("cancelled while waiting for the session".into()));
            }
            session = self.session.lock() => session,
        };
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let mut guard = NonceGuard {
            session,
            counters: &self.counters,
        };

        let nonce = self
            .chain
            .pending_nonce(guard.from)
            .await
            .map_err(|e| TokenOpsError::Lock(format!("nonce refresh failed: {}", e)))?;
        guard.nonce = Some(nonce);

        debug!(from = %guard.from, nonce, "Nonce locked");
        Ok(guard)
    }

    /// Advance the tracked nonce by one without holding the session across submission
    ///
    /// Only used by the unguarded `fund_handler` path. The session is locked just
    /// long enough to bump and copy the options.
    pub async fn bump_nonce(&self) -> Result<TxOpts> {
        let mut session = self.session.lock().await;
        let nonce = session.nonce.ok_or_else(|| {
            TokenOpsError::Lock("no tracked nonce to advance; lock the session first".into())
        })?;
        session.nonce = Some(nonce + 1);
        debug!(nonce = nonce + 1, "Nonce advanced without lock");
        Ok(*session)
    }

    /// Block until `tx_hash` is mined, it reverts, the timeout elapses, or the
    /// session is cancelled
    pub async fn wait_for_tx(&self, tx_hash: TxHash) -> Result<TxReceiptSummary> {
        let deadline = Instant::now() + self.confirmation_timeout;

        loop {
            if let Some(receipt) = self.chain.receipt(tx_hash).await? {
                if !receipt.success {
                    warn!(tx_hash = %tx_hash, "Transaction reverted");
                    return Err(TokenOpsError::Reverted { tx_hash });
                }
                debug!(tx_hash = %tx_hash, "Transaction confirmed");
                return Ok(receipt);
            }

            if Instant::now() >= deadline {
                warn!(
                    tx_hash = %tx_hash,
                    timeout = ?self.confirmation_timeout,
                    "Transaction not confirmed in time"
                );
                return Err(TokenOpsError::Timeout {
                    tx_hash,
                    timeout: self.confirmation_timeout,
                });
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(TokenOpsError::Cancelled { tx_hash });
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Run one nonce-consuming phase: lock, submit, optionally wait, unlock
    ///
    /// `submit` receives the options carrying the freshly locked nonce. The lock
    /// is released on every exit path.
    pub async fn transact<T, F, Fut>(
        &self,
        action: &'static str,
        confirm: Confirm,
        submit: F,
    ) -> Result<Completed<T>>
    where
        F: FnOnce(TxOpts) -> Fut,
        Fut: Future<Output = Result<Submitted<T>>>,
    {
        let guard = self.lock_nonce_and_update().await?;

        let submitted = submit(guard.opts()).await?;
        debug!(action, nonce = ?guard.nonce(), tx_hash = %submitted.tx_hash, "Phase submitted");

        let receipt = match confirm {
            Confirm::Wait => Some(self.wait_for_tx(submitted.tx_hash).await?),
            Confirm::NoWait => None,
        };

        guard.unlock();

        Ok(Completed {
            tx_hash: submitted.tx_hash,
            output: submitted.output,
            receipt,
        })
    }

    /// Check that `address` can be bound as a `kind` contract
    pub async fn bind_contract(&self, kind: &'static str, address: Address) -> Result<()> {
        if address.is_zero() {
            return Err(TokenOpsError::Binding {
                kind,
                address,
                reason: "zero address".into(),
            });
        }

        if self.verify_contract_code {
            let has_code = self
                .chain
                .code_exists(address)
                .await
                .map_err(|e| TokenOpsError::Binding {
                    kind,
                    address,
                    reason: e.to_string(),
                })?;
            if !has_code {
                return Err(TokenOpsError::Binding {
                    kind,
                    address,
                    reason: "no contract code at address".into(),
                });
            }
        }

        Ok(())
    }
}
