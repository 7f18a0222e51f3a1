//! Deal records and the relationship-manager completion workflow

use crate::error::{MarketError, Result};
use crate::types::{BidID, DealID, Direction, Hash, ListingID, UserID};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use super::codes::{DealCodes, VerificationCode};

/// Offline completion stages of a deal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    PendingRmContact,
    RmContacted,
    DocumentsPending,
    PaymentPending,
    Completed,
    Cancelled,
}

impl DealStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DealStatus::Completed | DealStatus::Cancelled)
    }

    /// Next stage in the straight-line sequence
    pub fn next(self) -> Option<DealStatus> {
        match self {
            DealStatus::PendingRmContact => Some(DealStatus::RmContacted),
            DealStatus::RmContacted => Some(DealStatus::DocumentsPending),
            DealStatus::DocumentsPending => Some(DealStatus::PaymentPending),
            DealStatus::PaymentPending => Some(DealStatus::Completed),
            DealStatus::Completed | DealStatus::Cancelled => None,
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DealStatus::PendingRmContact => "pending_rm_contact",
            DealStatus::RmContacted => "rm_contacted",
            DealStatus::DocumentsPending => "documents_pending",
            DealStatus::PaymentPending => "payment_pending",
            DealStatus::Completed => "completed",
            DealStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// One relationship-manager note, tagged with the stage it was written for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmNote {
    pub stage: DealStatus,
    pub note: String,
    pub at: SystemTime,
}

/// Who is looking at a deal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealViewer {
    Buyer,
    Seller,
    RelationshipManager,
}

/// Durable record of a settled bid
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealID,
    pub listing_id: ListingID,
    pub bid_id: BidID,
    pub direction: Direction,
    pub buyer_id: UserID,
    pub seller_id: UserID,
    /// Raw final figure before fees
    pub base_price: Decimal,
    /// Buyer-facing per-share price, `base_price * (1 + f)`
    pub agreed_price: Decimal,
    pub seller_receives_per_share: Decimal,
    /// Platform fee over the whole deal
    pub platform_fee: Decimal,
    pub quantity: u64,
    /// `agreed_price * quantity`
    pub total_amount: Decimal,
    codes: DealCodes,
    pub terms_hash: Hash,
    pub status: DealStatus,
    rm_notes: Vec<RmNote>,
    pub deal_accepted_at: SystemTime,
    pub buyer_accepted_at: Option<SystemTime>,
    pub seller_accepted_at: Option<SystemTime>,
    pub rm_contacted_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub cancelled_at: Option<SystemTime>,
    pub cancel_reason: Option<String>,
    pub version: u64,
}

/// A deal as one viewer is allowed to see it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealView {
    pub deal_id: DealID,
    pub listing_id: ListingID,
    pub viewer: DealViewer,
    pub status: DealStatus,
    /// Per-share price from the viewer's side of the money flow
    pub price_per_share: Decimal,
    pub quantity: u64,
    /// Amount the viewer pays (buyer), receives (seller), or the deal total (RM)
    pub amount: Decimal,
    pub buyer_code: Option<String>,
    pub seller_code: Option<String>,
    pub rm_code: String,
    pub notes: Vec<RmNote>,
    pub terms_hash: String,
}

/// Everything needed to build a deal, assembled by the issuer
pub(crate) struct NewDeal {
    pub listing_id: ListingID,
    pub bid_id: BidID,
    pub direction: Direction,
    pub buyer_id: UserID,
    pub seller_id: UserID,
    pub base_price: Decimal,
    pub agreed_price: Decimal,
    pub seller_receives_per_share: Decimal,
    pub platform_fee: Decimal,
    pub quantity: u64,
    pub total_amount: Decimal,
    pub codes: DealCodes,
    pub terms_hash: Hash,
    pub buyer_accepted_at: Option<SystemTime>,
    pub seller_accepted_at: Option<SystemTime>,
}

impl Deal {
    pub(crate) fn open(new: NewDeal, now: SystemTime) -> Self {
        Self {
            id: DealID::generate(),
            listing_id: new.listing_id,
            bid_id: new.bid_id,
            direction: new.direction,
            buyer_id: new.buyer_id,
            seller_id: new.seller_id,
            base_price: new.base_price,
            agreed_price: new.agreed_price,
            seller_receives_per_share: new.seller_receives_per_share,
            platform_fee: new.platform_fee,
            quantity: new.quantity,
            total_amount: new.total_amount,
            codes: new.codes,
            terms_hash: new.terms_hash,
            status: DealStatus::PendingRmContact,
            rm_notes: Vec::new(),
            deal_accepted_at: now,
            buyer_accepted_at: new.buyer_accepted_at,
            seller_accepted_at: new.seller_accepted_at,
            rm_contacted_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            version: 0,
        }
    }

    pub fn codes(&self) -> &DealCodes {
        &self.codes
    }

    pub fn rm_notes(&self) -> &[RmNote] {
        &self.rm_notes
    }

    /// Move the deal to `stage`.
    ///
    /// Relaxed ordering lets any open stage jump to any other; strict ordering
    /// only allows the next stage or cancellation. Completed and cancelled
    /// deals never move again.
    pub fn advance(
        &mut self,
        stage: DealStatus,
        notes: Option<String>,
        strict: bool,
        now: SystemTime,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(MarketError::InvalidTransition(format!(
                "deal {} is already {}",
                self.id, self.status
            )));
        }
        if stage == self.status {
            return Err(MarketError::InvalidTransition(format!(
                "deal {} is already at {}",
                self.id, stage
            )));
        }
        if strict && stage != DealStatus::Cancelled && self.status.next() != Some(stage) {
            return Err(MarketError::InvalidTransition(format!(
                "deal {} cannot move from {} to {}",
                self.id, self.status, stage
            )));
        }
        // Relaxed mode still never walks back to the opening stage
        if stage == DealStatus::PendingRmContact {
            return Err(MarketError::InvalidTransition(format!(
                "deal {} cannot return to {}",
                self.id, stage
            )));
        }

        match stage {
            DealStatus::RmContacted => self.rm_contacted_at = Some(now),
            DealStatus::Completed => self.completed_at = Some(now),
            DealStatus::Cancelled => {
                self.cancelled_at = Some(now);
                self.cancel_reason = notes.clone();
            }
            _ => {}
        }
        if let Some(note) = notes.filter(|n| !n.trim().is_empty()) {
            self.rm_notes.push(RmNote {
                stage,
                note,
                at: now,
            });
        }
        self.status = stage;
        Ok(())
    }

    /// Check a code a party presented to the RM
    pub fn verify_code(&self, holder: DealViewer, presented: &str) -> bool {
        let code: &VerificationCode = match holder {
            DealViewer::Buyer => &self.codes.buyer,
            DealViewer::Seller => &self.codes.seller,
            DealViewer::RelationshipManager => &self.codes.rm,
        };
        code.matches(presented)
    }

    /// Render the deal for `viewer`; parties see only their own code and the RM's
    pub fn view(&self, viewer: DealViewer) -> DealView {
        let (price_per_share, amount, buyer_code, seller_code) = match viewer {
            DealViewer::Buyer => (
                self.agreed_price,
                self.total_amount,
                Some(self.codes.buyer.to_string()),
                None,
            ),
            DealViewer::Seller => (
                self.seller_receives_per_share,
                self.total_amount - self.platform_fee,
                None,
                Some(self.codes.seller.to_string()),
            ),
            DealViewer::RelationshipManager => (
                self.agreed_price,
                self.total_amount,
                Some(self.codes.buyer.to_string()),
                Some(self.codes.seller.to_string()),
            ),
        };

        DealView {
            deal_id: self.id.clone(),
            listing_id: self.listing_id.clone(),
            viewer,
            status: self.status,
            price_per_share,
            quantity: self.quantity,
            amount,
            buyer_code,
            seller_code,
            rm_code: self.codes.rm.to_string(),
            notes: self.rm_notes.clone(),
            terms_hash: self.terms_hash.to_hex(),
        }
    }
}
