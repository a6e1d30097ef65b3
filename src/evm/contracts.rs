//! ERC20 token and bridge handler ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. The token follows
//! OpenZeppelin's `ERC20PresetMinterPauser`; the handler is the bridge's
//! `ERC20Handler`, of which only the reserve funding entry point is needed here.
//!
//! Deploy bytecode is not embedded: it is read from a compiled artifact
//! (Foundry or Hardhat/Truffle JSON) at runtime.

use crate::error::{Result, TokenOpsError};
use alloy::primitives::Bytes;
use alloy::sol;
use alloy::sol_types::SolValue;
use serde::Deserialize;
use std::path::Path;

sol! {
    /// OpenZeppelin ERC20PresetMinterPauser (the subset used by the token helpers)
    #[derive(Debug)]
    #[sol(rpc)]
    contract ERC20PresetMinterPauser {
        constructor(string memory name, string memory symbol);

        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);

        function mint(address to, uint256 amount) external;
        function approve(address spender, uint256 amount) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }

    /// Bridge ERC20 handler: custodies token reserves for cross-chain transfers
    #[derive(Debug)]
    #[sol(rpc)]
    contract ERC20Handler {
        /// Pull `amount` of `tokenAddress` from `owner` into the handler's reserve
        function fundERC20(address tokenAddress, address owner, uint256 amount) external;
    }
}

/// Bytecode section of a compiled contract artifact
///
/// Foundry nests the hex under `bytecode.object`; Hardhat and Truffle store it
/// directly as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    Nested { object: String },
    Flat(String),
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    #[serde(rename = "contractName")]
    contract_name: Option<String>,
    bytecode: ArtifactBytecode,
}

/// Creation bytecode loaded from a compiled artifact
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub contract_name: Option<String>,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// Load from an artifact JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TokenOpsError::Artifact(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse an artifact JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawArtifact = serde_json::from_str(json)
            .map_err(|e| TokenOpsError::Artifact(format!("invalid artifact JSON: {}", e)))?;

        let hex_code = match raw.bytecode {
            ArtifactBytecode::Nested { object } => object,
            ArtifactBytecode::Flat(code) => code,
        };
        let hex_code = hex_code.trim();
        let hex_code = hex_code.strip_prefix("0x").unwrap_or(hex_code);

        if hex_code.is_empty() {
            return Err(TokenOpsError::Artifact(
                "artifact has empty bytecode (abstract contract or interface?)".into(),
            ));
        }
        // Unlinked library placeholders look like __$...$__
        if hex_code.contains("__") {
            return Err(TokenOpsError::Artifact(
                "artifact bytecode has unlinked library references".into(),
            ));
        }

        let bytecode = hex::decode(hex_code)
            .map_err(|e| TokenOpsError::Artifact(format!("invalid bytecode hex: {}", e)))?;

        Ok(Self {
            contract_name: raw.contract_name,
            bytecode: bytecode.into(),
        })
    }

    /// Creation code followed by the ABI-encoded `(name, symbol)` constructor arguments
    pub fn token_deploy_code(&self, name: &str, symbol: &str) -> Bytes {
        let args = (name.to_string(), symbol.to_string()).abi_encode_params();
        let mut code = self.bytecode.to_vec();
        code.extend_from_slice(&args);
        code.into()
    }
}
