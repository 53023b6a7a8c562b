use thiserror::Error;

/// Reasons a tick or engine construction is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("asset not in configured universe: {0}")]
    UnknownAsset(String),

    #[error("invalid price for {asset}: {price}")]
    InvalidPrice { asset: String, price: f64 },

    #[error("asset universe is empty")]
    EmptyUniverse,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed feed payload: {0}")]
    Malformed(String),

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("socket error: {0}")]
    Socket(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot universe {found:?} does not match configured universe {expected:?}")]
    UniverseMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}
