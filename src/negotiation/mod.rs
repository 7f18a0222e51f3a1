//! Negotiation of bids/offers against listings

pub mod bid;
pub mod engine;
pub mod types;

pub use bid::BidOffer;
pub use engine::NegotiationEngine;
pub use types::{
    AcceptancePolicy, ActionOutcome, BidCommand, BidStatus, CounterRound, NegotiationView,
    Transition, ViewEntry,
};
