//! Listings: standing sell asks and buy bids owned by one user

use crate::error::{MarketError, Result};
use crate::negotiation::BidStatus;
use crate::pricing::PricingTranslator;
use crate::types::{Direction, ListingID, Side, UserID};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Lifecycle of a listing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Negotiating,
    Sold,
    Cancelled,
    Expired,
}

impl ListingStatus {
    pub fn is_accepting_bids(self) -> bool {
        matches!(self, ListingStatus::Active | ListingStatus::Negotiating)
    }

    pub fn is_closed(self) -> bool {
        !self.is_accepting_bids()
    }
}

/// Why an owner takes a listing off the board
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawReason {
    /// Owner is no longer interested
    OwnerCancelled,
    /// Owner completed the trade outside the platform
    SoldElsewhere,
}

impl WithdrawReason {
    pub fn listing_status(self) -> ListingStatus {
        match self {
            WithdrawReason::OwnerCancelled => ListingStatus::Cancelled,
            WithdrawReason::SoldElsewhere => ListingStatus::Sold,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            WithdrawReason::OwnerCancelled => "listing cancelled by owner",
            WithdrawReason::SoldElsewhere => "listing sold elsewhere",
        }
    }
}

/// A sell ask or buy bid as supplied by the listing store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingID,
    pub direction: Direction,
    pub owner_id: UserID,
    pub company_ref: String,
    /// Price the owner entered, before any fee adjustment
    pub ask_price: Decimal,
    pub quantity: u64,
    pub min_lot: u64,
    pub status: ListingStatus,
    pub boost_expiry: Option<SystemTime>,
    pub created_at: SystemTime,
}

impl Listing {
    /// Create a new active listing, checking `quantity >= min_lot >= 1`
    pub fn new(
        direction: Direction,
        owner_id: UserID,
        company_ref: impl Into<String>,
        ask_price: Decimal,
        quantity: u64,
        min_lot: u64,
    ) -> Result<Self> {
        PricingTranslator::validate_price(ask_price)?;
        if min_lot == 0 {
            return Err(MarketError::InvalidQuantity(
                "minimum lot must be at least 1".to_string(),
            ));
        }
        if quantity < min_lot {
            return Err(MarketError::InvalidQuantity(format!(
                "quantity {} is below the minimum lot {}",
                quantity, min_lot
            )));
        }

        Ok(Self {
            id: ListingID::generate(),
            direction,
            owner_id,
            company_ref: company_ref.into(),
            ask_price,
            quantity,
            min_lot,
            status: ListingStatus::Active,
            boost_expiry: None,
            created_at: SystemTime::now(),
        })
    }

    pub fn owner_side(&self) -> Side {
        self.direction.owner_side()
    }

    pub fn counterparty_side(&self) -> Side {
        self.direction.counterparty_side()
    }

    /// Check a proposed quantity against the lot bounds of this listing
    pub fn check_lot(&self, quantity: u64) -> Result<()> {
        if quantity < self.min_lot {
            return Err(MarketError::InvalidQuantity(format!(
                "minimum lot size is {} shares, got {}",
                self.min_lot, quantity
            )));
        }
        if quantity > self.quantity {
            return Err(MarketError::InvalidQuantity(format!(
                "maximum available is {} shares, got {}",
                self.quantity, quantity
            )));
        }
        Ok(())
    }

    pub fn is_boosted(&self, now: SystemTime) -> bool {
        self.boost_expiry.map(|until| until > now).unwrap_or(false)
    }
}

/// Status a listing should carry given the statuses of its bids.
///
/// Closed listings keep their status; open ones are `negotiating` while any
/// bid is mid-negotiation and `active` otherwise.
pub fn derive_listing_status<'a>(
    current: ListingStatus,
    bids: impl IntoIterator<Item = &'a BidStatus>,
) -> ListingStatus {
    if current.is_closed() {
        return current;
    }
    if bids.into_iter().any(|status| status.is_in_negotiation()) {
        ListingStatus::Negotiating
    } else {
        ListingStatus::Active
    }
}
