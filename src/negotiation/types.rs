//! Negotiation types and state machine vocabulary

use crate::types::{BidID, DealID, ListingID, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Lifecycle of a bid/offer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    /// Placed by the counterparty, waiting on the listing owner
    Pending,
    /// At least one counter round exists
    Countered,
    /// Closed by single-sided acceptance (immediate policy)
    Accepted,
    /// One side accepted, waiting on the other side's confirmation
    PendingConfirmation,
    /// Both sides agreed
    Confirmed,
    Rejected,
    Expired,
    Cancelled,
}

impl BidStatus {
    /// Check if the bid can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BidStatus::Accepted
                | BidStatus::Confirmed
                | BidStatus::Rejected
                | BidStatus::Expired
                | BidStatus::Cancelled
        )
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Check if the bid produced a deal
    pub fn is_settled(self) -> bool {
        matches!(self, BidStatus::Accepted | BidStatus::Confirmed)
    }

    /// Bids in these states put their listing into `negotiating`
    pub fn is_in_negotiation(self) -> bool {
        matches!(self, BidStatus::Countered | BidStatus::PendingConfirmation)
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BidStatus::Pending => "pending",
            BidStatus::Countered => "countered",
            BidStatus::Accepted => "accepted",
            BidStatus::PendingConfirmation => "pending_confirmation",
            BidStatus::Confirmed => "confirmed",
            BidStatus::Rejected => "rejected",
            BidStatus::Expired => "expired",
            BidStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// One entry of a bid's counter-offer history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRound {
    /// 1-based, strictly increasing
    pub round: u32,
    pub authored_by: Side,
    /// Raw price as entered by the author
    pub price: Decimal,
    pub quantity: u64,
    pub message: Option<String>,
    pub timestamp: SystemTime,
}

/// How mutual agreement is reached once one side accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Acceptance moves to `pending_confirmation`; the other side must confirm
    TwoPhase,
    /// Acceptance closes the deal at once
    Immediate,
}

impl FromStr for AcceptancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "two_phase" | "two-phase" => Ok(AcceptancePolicy::TwoPhase),
            "immediate" | "single_sided" => Ok(AcceptancePolicy::Immediate),
            other => Err(format!("unknown acceptance policy '{}'", other)),
        }
    }
}

/// An action a party (or the expiry timer) takes against a bid
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BidCommand {
    Accept,
    Reject,
    Counter {
        price: Decimal,
        quantity: u64,
        #[serde(default)]
        message: Option<String>,
    },
    Confirm,
    Cancel,
    Expire,
}

impl BidCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BidCommand::Accept => "accept",
            BidCommand::Reject => "reject",
            BidCommand::Counter { .. } => "counter",
            BidCommand::Confirm => "confirm",
            BidCommand::Cancel => "cancel",
            BidCommand::Expire => "expire",
        }
    }
}

/// What a successfully validated command does to a bid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: BidStatus,
    pub to: BidStatus,
    /// Round appended by a counter
    pub round: Option<u32>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.round.is_none()
    }

    /// Check if this transition must create a deal
    pub fn settles(&self) -> bool {
        !self.from.is_settled() && self.to.is_settled()
    }
}

/// Result of an action, returned to the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub bid_id: BidID,
    pub status: BidStatus,
    pub round: Option<u32>,
    pub deal_id: Option<DealID>,
    /// Version after the action; pass it back to detect concurrent writers
    pub version: u64,
}

/// One price point as a given viewer is allowed to see it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEntry {
    /// 0 for the opening bid, then the counter round number
    pub round: u32,
    pub authored_by: Side,
    pub price: Decimal,
    pub quantity: u64,
    pub own: bool,
    pub message: Option<String>,
    pub timestamp: SystemTime,
}

/// Fee-adjusted negotiation history for one viewer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationView {
    pub bid_id: BidID,
    pub listing_id: ListingID,
    pub viewer: Side,
    pub status: BidStatus,
    /// Side allowed to act next; `None` once the bid is terminal
    pub next_actor: Option<Side>,
    pub your_turn: bool,
    pub entries: Vec<ViewEntry>,
    /// Latest terms as this viewer sees them
    pub current_price: Decimal,
    pub current_quantity: u64,
    pub deal_id: Option<DealID>,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(BidStatus::Confirmed.is_terminal());
        assert!(BidStatus::Accepted.is_terminal());
        assert!(BidStatus::Confirmed.is_settled());
        assert!(!BidStatus::Rejected.is_settled());
        assert!(BidStatus::PendingConfirmation.is_open());
        assert!(BidStatus::Countered.is_in_negotiation());
        assert!(!BidStatus::Pending.is_in_negotiation());
    }

    #[test]
    fn test_status_display_matches_serde() {
        let status = BidStatus::PendingConfirmation;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, format!("\"{}\"", status));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("two_phase".parse::<AcceptancePolicy>(), Ok(AcceptancePolicy::TwoPhase));
        assert_eq!("immediate".parse::<AcceptancePolicy>(), Ok(AcceptancePolicy::Immediate));
        assert!("whenever".parse::<AcceptancePolicy>().is_err());
    }

    #[test]
    fn test_transition_settles() {
        let settle = Transition {
            from: BidStatus::PendingConfirmation,
            to: BidStatus::Confirmed,
            round: None,
        };
        assert!(settle.settles());

        let noop = Transition {
            from: BidStatus::Rejected,
            to: BidStatus::Rejected,
            round: None,
        };
        assert!(noop.is_noop());
        assert!(!noop.settles());
    }

    #[test]
    fn test_command_serialization() {
        let json = r#"{"action":"counter","price":"110","quantity":50}"#;
        let command: BidCommand = serde_json::from_str(json).unwrap();
        assert_eq!(command.name(), "counter");
    }
}
