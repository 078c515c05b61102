//! Shared application context
//!
//! One context object owns the shared clients, the store, and the breaker
//! registry, and is handed to each component at construction. There are no
//! process-wide mutable globals.

use std::sync::Arc;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use tracing::info;

use crate::breaker::BreakerRegistry;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::TradeStore;

/// Shared singletons for every component
pub struct AppContext {
    pub config: Config,
    pub http: reqwest::Client,
    pub rpc: Arc<RpcClient>,
    pub store: TradeStore,
    pub breakers: Arc<BreakerRegistry>,
}

impl AppContext {
    /// Build the context: HTTP client, RPC client, store (schema created),
    /// and breaker registry (persisted state restored).
    pub async fn init(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.aggregator.http_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
            config.rpc.endpoint.clone(),
            Duration::from_millis(config.rpc.timeout_ms),
            CommitmentConfig::confirmed(),
        ));

        let store = TradeStore::connect(&config.storage.database_url).await?;
        let breakers = Arc::new(BreakerRegistry::new(config.breakers.clone()));

        info!("application context initialized");
        Ok(Self {
            config,
            http,
            rpc,
            store,
            breakers,
        })
    }
}
