//! Error types for the trading engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("Wallet keypair not loaded")]
    KeypairUnavailable,

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    // Aggregator errors
    #[error("Aggregator request failed: {0}")]
    AggregatorRequest(String),

    #[error("Aggregator returned status {status}: {body}")]
    AggregatorStatus { status: u16, body: String },

    #[error("Invalid quote response: {0}")]
    InvalidQuote(String),

    #[error("Invalid swap response: {0}")]
    InvalidSwapResponse(String),

    // Trading errors
    #[error("Transaction decode failed: {0}")]
    TransactionDecode(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    #[error("Trade {0} is already executing")]
    TradeInFlight(i64),

    #[error("Trade rejected by validation: {0}")]
    ValidationRefused(String),

    // Confirmation errors
    #[error("Confirmation timeout for signature {signature} after {attempts} attempts")]
    ConfirmationTimeout { signature: String, attempts: u32 },

    #[error("Transaction failed on-chain: {0}")]
    TransactionFailed(String),

    // Position errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Open position already exists for {0}")]
    PositionAlreadyOpen(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Trade not found: {0}")]
    TradeNotFound(i64),

    #[error("Invalid trade status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    // Circuit breaker errors
    #[error("Circuit breaker active: {0}")]
    BreakerActive(String),

    #[error("Breaker state persistence failed: {0}")]
    BreakerPersistence(String),

    // Price feed errors
    #[error("No price available for {0}")]
    PriceUnavailable(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Rpc(_)
            | Error::RpcTimeout(_)
            | Error::RpcConnection(_)
            | Error::AggregatorRequest(_)
            | Error::TransactionSend(_) => true,
            // 5xx from the aggregator is transient; 4xx is a logic error
            Error::AggregatorStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error indicates broken infrastructure rather than a
    /// failed trade. Infrastructure errors bump the global breaker; trade
    /// failures bump component/strategy/token breakers only.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::KeypairUnavailable | Error::Storage(_) | Error::BreakerPersistence(_)
        )
    }

    /// Check if this error is a validation refusal (no breaker increment)
    pub fn is_validation_refusal(&self) -> bool {
        matches!(
            self,
            Error::ValidationRefused(_)
                | Error::PositionNotFound(_)
                | Error::PositionAlreadyOpen(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
