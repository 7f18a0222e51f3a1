//! Error types for the unlisted share market

use thiserror::Error;

/// Main error type for the negotiation and settlement engine
#[derive(Error, Debug)]
pub enum MarketError {
    // Input validation errors
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    // Negotiation errors
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Not your turn: {0}")]
    NotYourTurn(String),

    #[error("Concurrent modification of {record}: expected version {expected}, found {found}")]
    ConcurrentModification {
        record: String,
        expected: u64,
        found: u64,
    },

    #[error("Listing not active: {0}")]
    ListingNotActive(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Lookup errors
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // State persistence errors
    #[error("State corruption detected: {0}")]
    StateCorruption(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Transport errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MarketError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        MarketError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code carried in error replies
    pub fn code(&self) -> &str {
        match self {
            MarketError::InvalidPrice(_) => "invalid_price",
            MarketError::InvalidQuantity(_) => "invalid_quantity",
            MarketError::InvalidTransition(_) => "invalid_transition",
            MarketError::NotYourTurn(_) => "not_your_turn",
            MarketError::ConcurrentModification { .. } => "concurrent_modification",
            MarketError::ListingNotActive(_) => "listing_not_active",
            MarketError::Unauthorized(_) => "unauthorized",
            MarketError::NotFound { .. } => "not_found",
            MarketError::StateCorruption(_) => "state_corruption",
            MarketError::Configuration(_) => "configuration",
            MarketError::Network(_) => "network",
            MarketError::Protocol(_) => "protocol",
            MarketError::Remote { code, .. } => code.as_str(),
            MarketError::Io(_) => "io",
            MarketError::Json(_) => "json",
        }
    }
}

/// Result type alias for market operations
pub type Result<T> = std::result::Result<T, MarketError>;
