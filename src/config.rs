//! Token ops configuration
//!
//! Loaded from the environment (optionally seeded from a `.env` file), the same
//! way the bridge services load theirs.

use crate::redact::Redacted;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default upper bound on a single confirmation wait
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Default receipt polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How `fund_handler` sequences the nonce for its `fundERC20` transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FundNonceMode {
    /// Take the session lock and refresh the nonce, like every other phase
    #[default]
    Guarded,
    /// Legacy behaviour: bump the nonce left by the approval by one and submit
    /// without holding the session lock across submission and wait
    Unguarded,
}

impl FromStr for FundNonceMode {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guarded" => Ok(FundNonceMode::Guarded),
            "unguarded" | "legacy" => Ok(FundNonceMode::Unguarded),
            other => Err(eyre!(
                "Invalid FUND_NONCE_MODE '{}', expected 'guarded' or 'unguarded'",
                other
            )),
        }
    }
}

/// Optional gas overrides applied to every submitted transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasConfig {
    /// Fixed gas limit (estimated by the provider when unset)
    pub gas_limit: Option<u64>,
    /// Fixed legacy gas price in wei (filled by the provider when unset)
    pub gas_price: Option<u128>,
}

/// Configuration for a token ops session
#[derive(Debug, Clone)]
pub struct TokenOpsConfig {
    /// EVM RPC URL (e.g. "http://localhost:8545")
    pub rpc_url: String,
    /// Native chain ID (e.g. 31337 for Anvil)
    pub chain_id: u64,
    /// Operator private key (hex, with or without 0x prefix)
    pub private_key: Redacted<String>,
    /// Compiled ERC20PresetMinterPauser artifact used for deployment
    pub token_artifact: Option<PathBuf>,
    /// Upper bound on a single confirmation wait
    pub confirmation_timeout: Duration,
    /// Receipt polling interval
    pub poll_interval: Duration,
    pub gas: GasConfig,
    pub fund_nonce_mode: FundNonceMode,
    /// Check that bound contract addresses carry code
    pub verify_contract_code: bool,
}

impl TokenOpsConfig {
    /// Create a config with default timing and gas settings
    pub fn new(rpc_url: impl Into<String>, chain_id: u64, private_key: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            private_key: Redacted(private_key.into()),
            token_artifact: None,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            gas: GasConfig::default(),
            fund_nonce_mode: FundNonceMode::default(),
            verify_contract_code: true,
        }
    }

    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded .env from {:?}", path);
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = get("EVM_RPC_URL").ok_or_else(|| eyre!("EVM_RPC_URL required"))?;
        url::Url::parse(&rpc_url).wrap_err("Invalid EVM_RPC_URL")?;

        let chain_id = get("EVM_CHAIN_ID")
            .ok_or_else(|| eyre!("EVM_CHAIN_ID required"))?
            .trim()
            .parse()
            .map_err(|_| eyre!("Invalid EVM_CHAIN_ID"))?;

        let private_key = get("EVM_PRIVATE_KEY").ok_or_else(|| eyre!("EVM_PRIVATE_KEY required"))?;

        let mut config = Self::new(rpc_url, chain_id, private_key);

        config.token_artifact = get("TOKEN_ARTIFACT_PATH").map(PathBuf::from);

        if let Some(ms) = parse_opt::<u64>(&get, "CONFIRMATION_TIMEOUT_MS")? {
            config.confirmation_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_opt::<u64>(&get, "POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }

        config.gas = GasConfig {
            gas_limit: parse_opt(&get, "GAS_LIMIT")?,
            gas_price: parse_opt(&get, "GAS_PRICE")?,
        };

        if let Some(mode) = get("FUND_NONCE_MODE") {
            config.fund_nonce_mode = mode.parse()?;
        }
        if let Some(verify) = parse_opt::<bool>(&get, "VERIFY_CONTRACT_CODE")? {
            config.verify_contract_code = verify;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_token_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_artifact = Some(path.into());
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_gas(mut self, gas: GasConfig) -> Self {
        self.gas = gas;
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

    /// Reject settings that would make every confirmation wait fail
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than zero"));
        }
        if self.confirmation_timeout < self.poll_interval {
            return Err(eyre!(
                "CONFIRMATION_TIMEOUT_MS ({:?}) must not be shorter than POLL_INTERVAL_MS ({:?})",
                self.confirmation_timeout,
                self.poll_interval
            ));
        }
        Ok(())
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| eyre!("Invalid {}: '{}'", key, raw)),
        None => Ok(None),
    }
}
