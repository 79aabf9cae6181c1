use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::ensure;
use anyhow::Context;
use config::FileFormat;
use keeper_registry::BatchChainClient;
use keeper_registry::ChainClient;
use keeper_registry::Registry;
use lazy_static_include::*;
use redact::Secret;
use serde_derive::Deserialize;
use tracing::debug;
use url::Url;

lazy_static_include_str! {
    DEFAULT_CONFIG => "src/config/default.toml",
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub rpc: RpcConfig,
    pub registry: RegistryConfig,
    pub node: NodeConfig,
    pub prometheus: PrometheusConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RpcConfig {
    /// Node endpoint. May carry credentials, hence kept out of the logs.
    pub url: Secret<String>,
}

impl RpcConfig {
    pub fn url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(self.url.expose_secret()).context("parsing RPC URL")?;
        ensure!(
            matches!(url.scheme(), "ws" | "wss" | "http" | "https"),
            "Unsupported RPC URL scheme. scheme: {}",
            url.scheme(),
        );
        Ok(url)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.url.expose_secret().is_empty(), "RPC URL is required");
        self.url()?;
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub address: String,
    pub batch_size: usize,
    pub max_concurrent_batches: Option<usize>,
}

impl RegistryConfig {
    pub fn address(&self) -> anyhow::Result<Address> {
        self.address
            .parse::<Address>()
            .with_context(|| format!("parsing registry address `{}`", self.address))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.address.is_empty(), "Registry address is required");
        ensure!(!self.address()?.is_zero(), "Registry address can not be zero");
        ensure!(self.batch_size > 0, "Batch size must be positive");
        ensure!(
            self.max_concurrent_batches != Some(0),
            "Max concurrent batches must be positive"
        );
        Ok(())
    }

    /// Builds the registry reader on top of `client`.
    pub fn build<C: ChainClient>(
        &self,
        client: Arc<C>,
    ) -> anyhow::Result<Registry<C>> {
        let mut batch_client = BatchChainClient::new(client, self.batch_size);
        if let Some(max) = self.max_concurrent_batches {
            batch_client = batch_client.with_max_concurrent_batches(max);
        }

        Registry::new(self.address()?, batch_client).context("creating registry")
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Seconds without a completed round before the node reports itself dead.
    pub liveness_check_interval: u64,
    pub health_port: u16,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PrometheusConfig {
    pub port: u16,
}

impl Config {
    /// Layers the embedded defaults, the optional local file and the
    /// environment, in that order.
    pub fn load(local_file: Option<String>) -> anyhow::Result<Config> {
        let mut config_builder = config::Config::builder();
        config_builder =
            config_builder.add_source(config::File::from_str(&DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(local_file) = local_file {
            debug!("Loading local configuration from {}", local_file);
            config_builder = config_builder.add_source(config::File::with_name(&local_file));
        }

        config_builder
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()
            .context("Could not load configuration")?
            .try_deserialize()
            .context("Could not deserialize configuration")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.rpc.validate()?;
        self.registry.validate()?;
        ensure!(
            self.node.liveness_check_interval > 0,
            "Liveness check interval must be positive"
        );
        Ok(())
    }
}
