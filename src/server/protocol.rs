//! Wire messages: one JSON object per line in each direction

use crate::error::{MarketError, Result};
use crate::listing::{Listing, WithdrawReason};
use crate::negotiation::{ActionOutcome, NegotiationView};
use crate::settlement::{DealStatus, DealView, DealViewer};
use crate::types::{BidID, DealID, Direction, ListingID, Side, UserID};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Request envelope, tagged by `op`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RegisterListing {
        direction: Direction,
        owner_id: UserID,
        company_ref: String,
        price: Decimal,
        quantity: u64,
        min_lot: u64,
    },
    GetListing {
        listing_id: ListingID,
    },
    WithdrawListing {
        listing_id: ListingID,
        owner_id: UserID,
        reason: WithdrawReason,
    },
    BoostListing {
        listing_id: ListingID,
        owner_id: UserID,
    },
    PlaceBid {
        listing_id: ListingID,
        counterparty_id: UserID,
        price: Decimal,
        quantity: u64,
        #[serde(default)]
        message: Option<String>,
    },
    Accept {
        bid_id: BidID,
        role: Side,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    Reject {
        bid_id: BidID,
        role: Side,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    Counter {
        bid_id: BidID,
        role: Side,
        price: Decimal,
        quantity: u64,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    Confirm {
        bid_id: BidID,
        role: Side,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    CancelBid {
        bid_id: BidID,
        role: Side,
    },
    NegotiationView {
        bid_id: BidID,
        viewer: Side,
    },
    Settle {
        bid_id: BidID,
    },
    MarkDealStage {
        deal_id: DealID,
        stage: DealStatus,
        #[serde(default)]
        notes: Option<String>,
    },
    DealView {
        deal_id: DealID,
        viewer: DealViewer,
    },
    VerifyCode {
        deal_id: DealID,
        holder: DealViewer,
        code: String,
    },
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::RegisterListing { .. } => "register_listing",
            Request::GetListing { .. } => "get_listing",
            Request::WithdrawListing { .. } => "withdraw_listing",
            Request::BoostListing { .. } => "boost_listing",
            Request::PlaceBid { .. } => "place_bid",
            Request::Accept { .. } => "accept",
            Request::Reject { .. } => "reject",
            Request::Counter { .. } => "counter",
            Request::Confirm { .. } => "confirm",
            Request::CancelBid { .. } => "cancel_bid",
            Request::NegotiationView { .. } => "negotiation_view",
            Request::Settle { .. } => "settle",
            Request::MarkDealStage { .. } => "mark_deal_stage",
            Request::DealView { .. } => "deal_view",
            Request::VerifyCode { .. } => "verify_code",
        }
    }
}

/// Successful reply payload, tagged by `kind`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    ListingRegistered { listing_id: ListingID },
    Listing { listing: Listing },
    ListingWithdrawn { cancelled: Vec<BidID> },
    ListingBoosted { until: SystemTime },
    BidPlaced { bid_id: BidID },
    Outcome { outcome: ActionOutcome },
    NegotiationView { view: NegotiationView },
    Settled { deal_id: DealID, bid_id: BidID },
    Deal { view: DealView },
    CodeChecked { valid: bool },
}

/// Reply envelope, tagged by `status`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { reply: Reply },
    Error { code: String, message: String },
}

impl Response {
    pub fn error(err: &MarketError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn into_result(self) -> Result<Reply> {
        match self {
            Response::Ok { reply } => Ok(reply),
            Response::Error { code, message } => Err(MarketError::Remote { code, message }),
        }
    }
}

impl From<Result<Reply>> for Response {
    fn from(result: Result<Reply>) -> Self {
        match result {
            Ok(reply) => Response::Ok { reply },
            Err(e) => Response::error(&e),
        }
    }
}
