//! Configuration module for the paygate server.
//!
//! Configuration is loaded once during startup through the fallible
//! [`Config::load`]; nothing here panics at module load. Secrets stay out of
//! the config file via [`LiteralOrEnv`] env-var references.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::facilitator_client::FacilitatorSettings;
use crate::network::Network;
use crate::policy::SettlementPolicy;
use crate::requirements::ResourceInfo;
use crate::types::{EvmAddress, MoneyAmount};

/// CLI arguments for the paygate server.
#[derive(Parser, Debug)]
#[command(name = "x402-paygate")]
#[command(about = "x402 payment-gated resource server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"`
/// - Simple env var: `"$PAY_TO_ADDRESS"`
/// - Braced env var: `"${PAY_TO_ADDRESS}"`
///
/// The wrapper implements `Deref` to provide transparent access to the inner type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    /// Get a reference to the inner value
    pub fn inner(&self) -> &T {
        &self.0
    }

    /// Consume the wrapper and return the inner value
    pub fn into_inner(self) -> T {
        self.0
    }

    /// Parse environment variable syntax from a string.
    /// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if s.starts_with("${") && s.ends_with('}') {
            // ${VAR} syntax
            Some(s[2..s.len() - 1].to_string())
        } else if s.starts_with('$') && s.len() > 1 {
            // $VAR syntax - extract until first non-alphanumeric/underscore character
            let var_name = &s[1..];
            if var_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(var_name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // Check if it's an environment variable reference
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?
        } else {
            s
        };

        // Parse the value as type T
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;

        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables,
/// then to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default)]
    network: Network,
    /// Destination address payments are made out to, unless the client's
    /// authorization names its own destination.
    pay_to: LiteralOrEnv<EvmAddress>,
    #[serde(default = "config_defaults::default_price")]
    price: LiteralOrEnv<MoneyAmount>,
    #[serde(default)]
    settlement_policy: SettlementPolicy,
    resource: ResourceConfig,
    #[serde(default)]
    facilitator: FacilitatorConfig,
}

/// Configuration of the protected resource.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    /// Public URL of the protected resource, advertised in payment requirements.
    pub url: LiteralOrEnv<Url>,
    /// Upstream URL access grants point at. Defaults to `url`.
    #[serde(default)]
    pub access_url: Option<LiteralOrEnv<Url>>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "config_defaults::default_mime_type")]
    pub mime_type: String,
    /// How long issued access URLs stay valid, in seconds.
    #[serde(default = "config_defaults::default_grant_ttl")]
    pub grant_ttl_seconds: u64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Facilitator connection configuration. Which fields are present determines
/// the binding strategy adopted at startup (see
/// [`crate::facilitator_client::select_binding`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacilitatorConfig {
    #[serde(default)]
    pub url: Option<LiteralOrEnv<Url>>,
    #[serde(default)]
    pub api_key_id: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub api_key_secret: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub bearer_token: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub verify_url: Option<LiteralOrEnv<Url>>,
    #[serde(default)]
    pub settle_url: Option<LiteralOrEnv<Url>>,
}

impl FacilitatorConfig {
    /// Resolves the configuration into plain facilitator settings.
    pub fn settings(&self) -> FacilitatorSettings {
        FacilitatorSettings {
            url: self.url.as_ref().map(|u| u.inner().clone()),
            api_key_id: self.api_key_id.as_ref().map(|s| s.inner().clone()),
            api_key_secret: self.api_key_secret.as_ref().map(|s| s.inner().clone()),
            bearer_token: self.bearer_token.as_ref().map(|s| s.inner().clone()),
            verify_url: self.verify_url.as_ref().map(|u| u.inner().clone()),
            settle_url: self.settle_url.as_ref().map(|u| u.inner().clone()),
        }
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;

    use super::LiteralOrEnv;
    use crate::types::MoneyAmount;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PRICE: &str = "0.01";

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    /// Returns the default price of one access.
    pub fn default_price() -> LiteralOrEnv<MoneyAmount> {
        LiteralOrEnv::from_literal(MoneyAmount::parse(DEFAULT_PRICE).unwrap())
    }

    pub fn default_mime_type() -> String {
        "application/json".to_string()
    }

    pub fn default_grant_ttl() -> u64 {
        300
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    /// Get the port value.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the host value as an IpAddr.
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// The network payments are accepted on.
    pub fn network(&self) -> Network {
        self.network
    }

    /// The configured destination address.
    pub fn pay_to(&self) -> EvmAddress {
        *self.pay_to.inner()
    }

    /// The configured price of one access.
    pub fn price(&self) -> &MoneyAmount {
        self.price.inner()
    }

    /// The configured settlement policy.
    pub fn settlement_policy(&self) -> SettlementPolicy {
        self.settlement_policy
    }

    /// The advertised resource description.
    pub fn resource_info(&self) -> ResourceInfo {
        ResourceInfo {
            url: self.resource.url.inner().clone(),
            description: self.resource.description.clone(),
            mime_type: self.resource.mime_type.clone(),
            metadata: self.resource.metadata.clone(),
        }
    }

    /// The URL access grants point at.
    pub fn access_url(&self) -> Url {
        self.resource
            .access_url
            .as_ref()
            .map(|u| u.inner().clone())
            .unwrap_or_else(|| self.resource.url.inner().clone())
    }

    /// How long issued access URLs stay valid, in seconds.
    pub fn grant_ttl_seconds(&self) -> u64 {
        self.resource.grant_ttl_seconds
    }

    /// The resolved facilitator settings.
    pub fn facilitator(&self) -> FacilitatorSettings {
        self.facilitator.settings()
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `./config.json` (if it exists)
    ///
    /// Values not present in the config file will be resolved via
    /// environment variables or defaults during deserialization.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "port": 9000,
                "network": "base",
                "pay_to": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
                "price": "$0.05",
                "settlement_policy": "strict",
                "resource": {
                    "url": "https://api.example.com/premium",
                    "description": "Premium content",
                    "grant_ttl_seconds": 120
                },
                "facilitator": {
                    "url": "https://facilitator.example/"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.network(), Network::Base);
        assert_eq!(config.price().to_string(), "0.05");
        assert_eq!(config.settlement_policy(), SettlementPolicy::Strict);
        assert_eq!(config.grant_ttl_seconds(), 120);
        assert!(config.facilitator().url.is_some());
    }

    #[test]
    fn defaults_apply_when_fields_absent() {
        let config: Config = serde_json::from_str(
            r#"{
                "pay_to": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
                "resource": { "url": "https://api.example.com/premium" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.network(), Network::BaseSepolia);
        assert_eq!(config.price().to_string(), "0.01");
        assert_eq!(config.settlement_policy(), SettlementPolicy::Lenient);
        assert_eq!(config.resource_info().mime_type, "application/json");
        assert_eq!(config.access_url().as_str(), "https://api.example.com/premium");
    }

    #[test]
    fn resolves_env_var_references() {
        unsafe {
            std::env::set_var("PAYGATE_TEST_PAY_TO", "0xdAcD51A54883eb67D95FAEb2BBfdC4a9a6BD2a3B");
        }
        let config: Config = serde_json::from_str(
            r#"{
                "pay_to": "$PAYGATE_TEST_PAY_TO",
                "resource": { "url": "https://api.example.com/premium" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.pay_to().to_string(),
            "0xdAcD51A54883eb67D95FAEb2BBfdC4a9a6BD2a3B"
        );
        unsafe {
            std::env::remove_var("PAYGATE_TEST_PAY_TO");
        }
    }

    #[test]
    fn missing_env_var_is_an_error() {
        let result: Result<Config, _> = serde_json::from_str(
            r#"{
                "pay_to": "$PAYGATE_TEST_UNSET_VAR",
                "resource": { "url": "https://api.example.com/premium" }
            }"#,
        );
        assert!(result.is_err());
    }
}
