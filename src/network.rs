//! Network definitions and known token deployments.
//!
//! This module defines the networks the paygate accepts payment on,
//! and provides statically known USDC deployments per network.
//!
//! The EIP-712 `name` differs between the two deployments of the same token:
//! the payload's signature is domain-separated over the token contract's
//! registered name, so advertising the wrong name makes an otherwise-valid
//! signature fail verification at the facilitator.

use alloy_primitives::address;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::types::EvmAddress;

/// Supported Ethereum-compatible networks.
///
/// Used to differentiate between testnet and mainnet environments for the x402 protocol.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Network {
    /// Base Sepolia testnet (chain ID 84532).
    #[default]
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::BaseSepolia => write!(f, "base-sepolia"),
            Network::Base => write!(f, "base"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetworkError(String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base-sepolia" => Ok(Network::BaseSepolia),
            "base" => Ok(Network::Base),
            other => Err(UnknownNetworkError(other.to_string())),
        }
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[Network::BaseSepolia, Network::Base]
    }

    /// EIP-155 chain ID of the network.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::BaseSepolia => 84532,
            Network::Base => 8453,
        }
    }

    /// The canonical USDC deployment on this network.
    pub fn usdc(&self) -> &'static UsdcDeployment {
        UsdcDeployment::by_network(*self)
    }

    /// Fixed gas-limit hint advertised in payment requirements, if any.
    ///
    /// Gas estimation on Base Sepolia is unreliable for ERC-3009 transfers, so
    /// the testnet deployment carries an elevated fixed limit.
    pub fn gas_limit_hint(&self) -> Option<u64> {
        match self {
            Network::BaseSepolia => Some(200_000),
            Network::Base => None,
        }
    }
}

/// Metadata required to identify a token in EIP-712 typed data signatures.
///
/// These values must match exactly what the token contract returns from `name()`
/// and `version()`: they feed the EIP-712 domain separator of
/// `transferWithAuthorization` messages, and a mismatch invalidates signatures.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenDeploymentEip712 {
    pub name: &'static str,
    pub version: &'static str,
}

/// Describes a specific deployed USDC instance, including metadata
/// required for value formatting and EIP-712 signing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct UsdcDeployment {
    pub network: Network,
    pub address: EvmAddress,
    pub decimals: u8,
    pub eip712: TokenDeploymentEip712,
}

static USDC_BASE: UsdcDeployment = UsdcDeployment {
    network: Network::Base,
    address: EvmAddress(address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")),
    decimals: 6,
    eip712: TokenDeploymentEip712 {
        name: "USD Coin",
        version: "2",
    },
};

static USDC_BASE_SEPOLIA: UsdcDeployment = UsdcDeployment {
    network: Network::BaseSepolia,
    address: EvmAddress(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
    decimals: 6,
    eip712: TokenDeploymentEip712 {
        name: "USDC",
        version: "2",
    },
};

impl UsdcDeployment {
    /// The USDC deployment on the given network.
    pub fn by_network(network: Network) -> &'static UsdcDeployment {
        match network {
            Network::Base => &USDC_BASE,
            Network::BaseSepolia => &USDC_BASE_SEPOLIA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_kebab_names() {
        assert_eq!(
            serde_json::to_string(&Network::BaseSepolia).unwrap(),
            "\"base-sepolia\""
        );
        let network: Network = serde_json::from_str("\"base\"").unwrap();
        assert_eq!(network, Network::Base);
    }

    #[test]
    fn deployments_differ_between_networks() {
        let mainnet = Network::Base.usdc();
        let testnet = Network::BaseSepolia.usdc();
        assert_ne!(mainnet.address, testnet.address);
        assert_eq!(mainnet.eip712.name, "USD Coin");
        assert_eq!(testnet.eip712.name, "USDC");
        assert_eq!(mainnet.eip712.version, testnet.eip712.version);
    }

    #[test]
    fn gas_limit_hint_is_testnet_only() {
        assert_eq!(Network::BaseSepolia.gas_limit_hint(), Some(200_000));
        assert_eq!(Network::Base.gas_limit_hint(), None);
    }
}
