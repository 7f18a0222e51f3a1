//! A single bid/offer and the rules that move it between states

use crate::error::{MarketError, Result};
use crate::listing::Listing;
use crate::pricing::PricingTranslator;
use crate::types::{BidID, DealID, Direction, ListingID, Side, UserID};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::types::{AcceptancePolicy, BidCommand, BidStatus, CounterRound, Transition};

/// A counterparty's proposal against a listing, with its negotiation history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidOffer {
    pub id: BidID,
    pub listing_id: ListingID,
    /// Direction of the parent listing; fixes which side each party is on
    pub direction: Direction,
    pub counterparty_id: UserID,
    /// Opening terms, never changed
    pub original_price: Decimal,
    pub original_quantity: u64,
    /// Note sent with the opening bid
    #[serde(default)]
    pub opening_message: Option<String>,
    /// Latest terms, tracking the newest round
    pub price: Decimal,
    pub quantity: u64,
    pub status: BidStatus,
    counter_history: Vec<CounterRound>,
    pub created_at: SystemTime,
    pub last_action_at: SystemTime,
    pub buyer_accepted_at: Option<SystemTime>,
    pub seller_accepted_at: Option<SystemTime>,
    pub deal_id: Option<DealID>,
    pub status_reason: Option<String>,
    /// Optimistic concurrency counter, bumped by the store on every write
    pub version: u64,
}

impl BidOffer {
    /// Create a new pending bid against `listing`
    pub fn new(
        listing: &Listing,
        counterparty_id: UserID,
        price: Decimal,
        quantity: u64,
        now: SystemTime,
    ) -> Self {
        Self {
            id: BidID::generate(),
            listing_id: listing.id.clone(),
            direction: listing.direction,
            counterparty_id,
            original_price: price,
            original_quantity: quantity,
            opening_message: None,
            price,
            quantity,
            status: BidStatus::Pending,
            counter_history: Vec::new(),
            created_at: now,
            last_action_at: now,
            buyer_accepted_at: None,
            seller_accepted_at: None,
            deal_id: None,
            status_reason: None,
            version: 0,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.opening_message = message.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn counter_history(&self) -> &[CounterRound] {
        &self.counter_history
    }

    pub fn owner_side(&self) -> Side {
        self.direction.owner_side()
    }

    pub fn counterparty_side(&self) -> Side {
        self.direction.counterparty_side()
    }

    /// Author of the newest terms: the latest round, or the counterparty who
    /// placed the bid when no round exists yet
    pub fn last_author(&self) -> Side {
        self.counter_history
            .last()
            .map(|round| round.authored_by)
            .unwrap_or_else(|| self.counterparty_side())
    }

    /// Side that has accepted and is waiting on the other, if any
    pub fn acceptor(&self) -> Option<Side> {
        match (self.buyer_accepted_at, self.seller_accepted_at) {
            (Some(_), None) => Some(Side::Buyer),
            (None, Some(_)) => Some(Side::Seller),
            _ => None,
        }
    }

    /// Side permitted to act next
    pub fn next_actor(&self) -> Option<Side> {
        match self.status {
            BidStatus::Pending | BidStatus::Countered => Some(self.last_author().opposite()),
            BidStatus::PendingConfirmation => self.acceptor().map(Side::opposite),
            _ => None,
        }
    }

    /// Apply `command` issued by `side`.
    ///
    /// Everything is validated before the first field is written, so an error
    /// leaves the bid untouched.
    pub fn apply(
        &mut self,
        side: Side,
        command: &BidCommand,
        policy: AcceptancePolicy,
        now: SystemTime,
    ) -> Result<Transition> {
        let from = self.status;

        if let BidCommand::Expire = command {
            return Ok(self.expire(now));
        }
        if from.is_terminal() {
            return Err(MarketError::InvalidTransition(format!(
                "cannot {} bid {}: it is already {}",
                command.name(),
                self.id,
                from
            )));
        }

        match command {
            BidCommand::Cancel => self.cancel(side, now),
            BidCommand::Accept => self.accept(side, policy, now),
            BidCommand::Reject => self.reject(side, now),
            BidCommand::Counter {
                price,
                quantity,
                message,
            } => self.counter(side, *price, *quantity, message.clone(), now),
            BidCommand::Confirm => self.confirm(side, now),
            BidCommand::Expire => Ok(self.expire(now)),
        }
    }

    fn ensure_turn(&self, side: Side, action: &str) -> Result<()> {
        match self.next_actor() {
            Some(next) if next == side => Ok(()),
            Some(next) => Err(MarketError::NotYourTurn(format!(
                "{} cannot {} bid {}: waiting on the {}",
                side, action, self.id, next
            ))),
            None => Err(MarketError::InvalidTransition(format!(
                "bid {} is {} and accepts no further actions",
                self.id, self.status
            ))),
        }
    }

    fn expire(&mut self, now: SystemTime) -> Transition {
        let from = self.status;
        if from.is_terminal() {
            return Transition { from, to: from, round: None };
        }
        self.status = BidStatus::Expired;
        self.status_reason = Some("no activity before the bid expired".to_string());
        self.last_action_at = now;
        Transition { from, to: BidStatus::Expired, round: None }
    }

    fn cancel(&mut self, side: Side, now: SystemTime) -> Result<Transition> {
        if side != self.counterparty_side() {
            return Err(MarketError::Unauthorized(format!(
                "only the {} who placed bid {} may cancel it",
                self.counterparty_side(),
                self.id
            )));
        }
        if self.status != BidStatus::Pending {
            return Err(MarketError::InvalidTransition(format!(
                "bid {} can only be cancelled while pending, it is {}",
                self.id, self.status
            )));
        }

        let from = self.status;
        self.status = BidStatus::Cancelled;
        self.status_reason = Some("withdrawn by its author".to_string());
        self.last_action_at = now;
        Ok(Transition { from, to: BidStatus::Cancelled, round: None })
    }

    fn accept(&mut self, side: Side, policy: AcceptancePolicy, now: SystemTime) -> Result<Transition> {
        if self.status == BidStatus::PendingConfirmation {
            return Err(MarketError::InvalidTransition(format!(
                "bid {} is already accepted and waits on confirmation",
                self.id
            )));
        }
        self.ensure_turn(side, "accept")?;

        let from = self.status;
        let to = match policy {
            AcceptancePolicy::TwoPhase => BidStatus::PendingConfirmation,
            AcceptancePolicy::Immediate => BidStatus::Accepted,
        };
        self.mark_accepted(side, now);
        if policy == AcceptancePolicy::Immediate {
            // The acting side's acceptance binds the other side's standing terms
            self.mark_accepted(side.opposite(), now);
        }
        self.status = to;
        self.last_action_at = now;
        Ok(Transition { from, to, round: None })
    }

    fn confirm(&mut self, side: Side, now: SystemTime) -> Result<Transition> {
        if self.status != BidStatus::PendingConfirmation {
            return Err(MarketError::InvalidTransition(format!(
                "bid {} is {}; confirm is only valid after acceptance",
                self.id, self.status
            )));
        }
        self.ensure_turn(side, "confirm")?;

        let from = self.status;
        self.mark_accepted(side, now);
        self.status = BidStatus::Confirmed;
        self.last_action_at = now;
        Ok(Transition { from, to: BidStatus::Confirmed, round: None })
    }

    fn reject(&mut self, side: Side, now: SystemTime) -> Result<Transition> {
        self.ensure_turn(side, "reject")?;

        let from = self.status;
        self.status = BidStatus::Rejected;
        self.status_reason = Some(format!("rejected by the {}", side));
        self.last_action_at = now;
        Ok(Transition { from, to: BidStatus::Rejected, round: None })
    }

    fn counter(
        &mut self,
        side: Side,
        price: Decimal,
        quantity: u64,
        message: Option<String>,
        now: SystemTime,
    ) -> Result<Transition> {
        if self.status == BidStatus::PendingConfirmation {
            return Err(MarketError::InvalidTransition(format!(
                "bid {} is accepted; confirm or reject it instead of countering",
                self.id
            )));
        }
        self.ensure_turn(side, "counter")?;
        PricingTranslator::validate_price(price)?;
        if quantity == 0 {
            return Err(MarketError::InvalidQuantity(
                "counter quantity must be at least 1".to_string(),
            ));
        }

        let from = self.status;
        let round = self.counter_history.last().map(|r| r.round).unwrap_or(0) + 1;
        self.counter_history.push(CounterRound {
            round,
            authored_by: side,
            price,
            quantity,
            message,
            timestamp: now,
        });
        self.price = price;
        self.quantity = quantity;
        self.status = BidStatus::Countered;
        self.last_action_at = now;
        Ok(Transition { from, to: BidStatus::Countered, round: Some(round) })
    }

    fn mark_accepted(&mut self, side: Side, now: SystemTime) {
        match side {
            Side::Buyer => self.buyer_accepted_at = Some(now),
            Side::Seller => self.seller_accepted_at = Some(now),
        }
    }

    /// Force-close an open bid on behalf of the engine (sibling settled, listing withdrawn)
    pub fn force_cancel(&mut self, reason: &str, now: SystemTime) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BidStatus::Cancelled;
        self.status_reason = Some(reason.to_string());
        self.last_action_at = now;
        true
    }
}
