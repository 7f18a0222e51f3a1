//! Settlement: turning a settled bid into a deal with verification codes

pub mod codes;
pub mod deal;

pub use codes::{DealCodes, VerificationCode, CODE_ALPHABET};
pub use deal::{Deal, DealStatus, DealView, DealViewer, RmNote};

use crate::error::{MarketError, Result};
use crate::listing::Listing;
use crate::negotiation::BidOffer;
use crate::pricing::PricingTranslator;
use crate::types::Direction;
use std::time::SystemTime;

use codes::DealTerms;
use deal::NewDeal;

/// Builds deal records for settled bids
#[derive(Clone, Debug)]
pub struct SettlementIssuer {
    pricing: PricingTranslator,
    code_length: usize,
}

impl SettlementIssuer {
    pub fn new(pricing: PricingTranslator, code_length: usize) -> Self {
        Self {
            pricing,
            code_length,
        }
    }

    /// Create the deal for `bid`, which must already be settled.
    ///
    /// Only builds the record; the caller commits it together with the bid so
    /// a retry finds the existing deal instead of issuing a second one.
    pub fn issue(&self, bid: &BidOffer, listing: &Listing, now: SystemTime) -> Result<Deal> {
        if !bid.status.is_settled() {
            return Err(MarketError::InvalidTransition(format!(
                "bid {} is {} and cannot be settled",
                bid.id, bid.status
            )));
        }
        if bid.listing_id != listing.id {
            return Err(MarketError::StateCorruption(format!(
                "bid {} does not belong to listing {}",
                bid.id, listing.id
            )));
        }

        let (buyer_id, seller_id) = match listing.direction {
            Direction::Sell => (bid.counterparty_id.clone(), listing.owner_id.clone()),
            Direction::Buy => (listing.owner_id.clone(), bid.counterparty_id.clone()),
        };
        let breakdown = self.pricing.settlement_breakdown(bid.price, bid.quantity)?;
        let terms_hash = codes::terms_hash(&DealTerms {
            listing_id: &listing.id,
            bid_id: &bid.id,
            buyer_id: &buyer_id,
            seller_id: &seller_id,
            base_price: breakdown.base_price,
            quantity: breakdown.quantity,
        });

        Ok(Deal::open(
            NewDeal {
                listing_id: listing.id.clone(),
                bid_id: bid.id.clone(),
                direction: listing.direction,
                buyer_id,
                seller_id,
                base_price: breakdown.base_price,
                agreed_price: breakdown.buyer_pays_per_share,
                seller_receives_per_share: breakdown.seller_receives_per_share,
                platform_fee: breakdown.platform_fee_total,
                quantity: breakdown.quantity,
                total_amount: breakdown.total_amount,
                codes: DealCodes::issue(self.code_length)?,
                terms_hash,
                buyer_accepted_at: bid.buyer_accepted_at,
                seller_accepted_at: bid.seller_accepted_at,
            },
            now,
        ))
    }
}
