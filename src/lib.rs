//! Unlisted Share Market
//!
//! Negotiation and settlement engine for peer-to-peer trading of unlisted
//! company shares:
//! - fee-adjusted price visibility for each side of a trade
//! - a turn-taking bid/offer state machine with counter-offer rounds
//! - two-phase confirmation that issues a deal with per-role verification
//!   codes for relationship-manager-mediated completion

pub mod cli;
pub mod config;
pub mod error;
pub mod listing;
pub mod negotiation;
pub mod notify;
pub mod pricing;
pub mod server;
pub mod settlement;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::MarketConfig;
pub use error::{MarketError, Result};
pub use listing::{Listing, ListingStatus, WithdrawReason};
pub use negotiation::{
    AcceptancePolicy, ActionOutcome, BidCommand, BidOffer, BidStatus, NegotiationEngine,
    NegotiationView,
};
pub use pricing::{PriceBreakdown, PricingTranslator};
pub use settlement::{Deal, DealStatus, DealView, DealViewer};
pub use store::{InMemoryMarketStore, ListingStore, MarketStore};
pub use types::{BidID, DealID, Direction, ListingID, Side, UserID};
