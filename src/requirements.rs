//! Construction of the canonical [`PaymentRequirements`] for an attempt.
//!
//! One [`RequirementsTemplate`] is built at startup from configuration; per
//! attempt it is stamped into a concrete [`PaymentRequirements`] value. The
//! same value must then flow into the challenge, the verify call, and the
//! settle call — facilitators reject attempts whose verify and settle
//! requirements differ.

use serde_json::json;
use url::Url;

use crate::network::Network;
use crate::types::{
    EvmAddress, MoneyAmount, MoneyAmountParseError, PaymentRequirements, Scheme, TokenAmount,
};

/// Advertised upper bound, in seconds, for the whole decode→verify→settle
/// sequence of one attempt.
pub const MAX_TIMEOUT_SECONDS: u64 = 60;

/// Static description of the protected resource, advertised in requirements.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    /// Full URL of the protected resource.
    pub url: Url,
    /// Human-readable description of what the payment grants access to.
    pub description: String,
    /// MIME type of the protected resource.
    pub mime_type: String,
    /// Free-form metadata echoed in the requirements.
    pub metadata: Option<serde_json::Value>,
}

/// Startup-time template for per-attempt payment requirements.
///
/// Price scaling happens once here, so `build` is infallible on the request path.
#[derive(Debug, Clone)]
pub struct RequirementsTemplate {
    network: Network,
    max_amount_required: TokenAmount,
    pay_to: EvmAddress,
    resource: ResourceInfo,
}

impl RequirementsTemplate {
    /// Creates a template for the given network, price, and destination.
    ///
    /// Fails if the configured price carries more precision than the token
    /// supports (USDC has 6 decimal places).
    pub fn try_new(
        network: Network,
        price: &MoneyAmount,
        pay_to: EvmAddress,
        resource: ResourceInfo,
    ) -> Result<Self, MoneyAmountParseError> {
        let deployment = network.usdc();
        let max_amount_required = price.as_token_amount(deployment.decimals as u32)?;
        Ok(Self {
            network,
            max_amount_required,
            pay_to,
            resource,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Stamps the template into the requirements for one attempt.
    ///
    /// When the client's payload is available, its `authorization.to` address
    /// takes precedence over the configured destination: the facilitator
    /// derives `payTo` from the authorization independently, and echoing the
    /// same address guarantees byte-for-byte agreement between the two sides.
    pub fn build(&self, authorization_to: Option<EvmAddress>) -> PaymentRequirements {
        let deployment = self.network.usdc();
        let mut extra = json!({
            "name": deployment.eip712.name,
            "version": deployment.eip712.version,
        });
        if let Some(gas_limit) = self.network.gas_limit_hint() {
            extra["gasLimit"] = json!(gas_limit.to_string());
        }
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: self.network,
            max_amount_required: self.max_amount_required,
            resource: self.resource.url.clone(),
            description: self.resource.description.clone(),
            mime_type: self.resource.mime_type.clone(),
            output_schema: None,
            pay_to: authorization_to.unwrap_or(self.pay_to),
            max_timeout_seconds: MAX_TIMEOUT_SECONDS,
            asset: deployment.address,
            extra: Some(extra),
            metadata: self.resource.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(network: Network) -> RequirementsTemplate {
        RequirementsTemplate::try_new(
            network,
            &MoneyAmount::parse("0.01").unwrap(),
            "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
                .parse()
                .unwrap(),
            ResourceInfo {
                url: "https://api.example.com/premium".parse().unwrap(),
                description: "Premium content".to_string(),
                mime_type: "application/json".to_string(),
                metadata: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn scales_price_to_base_units() {
        let requirements = template(Network::BaseSepolia).build(None);
        assert_eq!(requirements.max_amount_required.to_string(), "10000");
        assert_eq!(requirements.max_timeout_seconds, MAX_TIMEOUT_SECONDS);
    }

    #[test]
    fn network_selects_asset_and_eip712_name() {
        let testnet = template(Network::BaseSepolia).build(None);
        let mainnet = template(Network::Base).build(None);
        assert_eq!(testnet.extra.as_ref().unwrap()["name"], "USDC");
        assert_eq!(mainnet.extra.as_ref().unwrap()["name"], "USD Coin");
        assert_ne!(testnet.asset, mainnet.asset);
    }

    #[test]
    fn gas_limit_hint_only_on_testnet() {
        let testnet = template(Network::BaseSepolia).build(None);
        let mainnet = template(Network::Base).build(None);
        assert_eq!(testnet.extra.as_ref().unwrap()["gasLimit"], "200000");
        assert!(mainnet.extra.as_ref().unwrap().get("gasLimit").is_none());
    }

    #[test]
    fn authorization_destination_overrides_configured() {
        let other: EvmAddress = "0xdAcD51A54883eb67D95FAEb2BBfdC4a9a6BD2a3B"
            .parse()
            .unwrap();
        let template = template(Network::BaseSepolia);
        assert_eq!(template.build(Some(other)).pay_to, other);
        assert_ne!(template.build(None).pay_to, other);
    }

    #[test]
    fn builds_are_identical_across_calls() {
        let template = template(Network::BaseSepolia);
        let first = serde_json::to_string(&template.build(None)).unwrap();
        let second = serde_json::to_string(&template.build(None)).unwrap();
        assert_eq!(first, second);
    }
}
