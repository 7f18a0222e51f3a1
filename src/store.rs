//! Persistence seams for listings, bids and deals
//!
//! Writes go through [`WriteBatch`]: every operation in a batch is validated
//! against the current records first and only then applied, under a single
//! critical section, so readers never observe half of a transition.

use crate::error::{MarketError, Result};
use crate::listing::{derive_listing_status, Listing, ListingStatus};
use crate::negotiation::BidOffer;
use crate::settlement::Deal;
use crate::types::{BidID, DealID, ListingID};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::debug;

/// The slice of the listing store the engine consumes
pub trait ListingStore: Send + Sync {
    fn get_listing(&self, listing_id: &ListingID) -> Result<Listing>;

    fn set_listing_status(&self, listing_id: &ListingID, status: ListingStatus) -> Result<()>;
}

/// Full record store used by the engine
pub trait MarketStore: ListingStore {
    fn insert_listing(&self, listing: Listing) -> Result<()>;

    fn load_bid(&self, bid_id: &BidID) -> Result<BidOffer>;

    fn bids_for_listing(&self, listing_id: &ListingID) -> Result<Vec<BidOffer>>;

    /// Every bid not yet in a terminal state
    fn open_bids(&self) -> Result<Vec<BidOffer>>;

    fn load_deal(&self, deal_id: &DealID) -> Result<Deal>;

    fn deal_for_bid(&self, bid_id: &BidID) -> Result<Option<Deal>>;

    /// Apply every operation of `batch` or none of them
    fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;
}

/// One write inside a batch
#[derive(Clone, Debug)]
pub enum WriteOp {
    /// New bid; the parent listing must be accepting bids
    InsertBid(BidOffer),
    /// Replace a bid read at `expected_version`
    UpdateBid {
        bid: BidOffer,
        expected_version: u64,
    },
    /// Cancel every open bid on the listing except `winner`
    CancelOpenSiblings {
        listing_id: ListingID,
        winner: BidID,
        reason: String,
        at: SystemTime,
    },
    /// Cancel every open bid on the listing
    CancelOpenBids {
        listing_id: ListingID,
        reason: String,
        at: SystemTime,
    },
    /// New deal; refused if the bid already has one
    InsertDeal(Deal),
    UpdateDeal {
        deal: Deal,
        expected_version: u64,
    },
    SetListingStatus {
        listing_id: ListingID,
        status: ListingStatus,
    },
    /// Recompute an open listing's status from its bids
    RefreshListingStatus(ListingID),
    BoostListing {
        listing_id: ListingID,
        until: SystemTime,
    },
}

/// Ordered group of writes committed atomically
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// What a committed batch changed besides the records it named
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Bids force-cancelled by sibling or listing-wide cancellation
    pub cancelled: Vec<BidID>,
    /// Final status of the last listing the batch touched
    pub listing_status: Option<ListingStatus>,
    /// Version now stored for each bid the batch inserted or updated
    pub bid_versions: Vec<(BidID, u64)>,
}

impl CommitReceipt {
    pub fn bid_version(&self, bid_id: &BidID) -> Option<u64> {
        self.bid_versions
            .iter()
            .rev()
            .find(|(id, _)| id == bid_id)
            .map(|(_, version)| *version)
    }
}

#[derive(Default)]
struct Records {
    listings: HashMap<ListingID, Listing>,
    bids: HashMap<BidID, BidOffer>,
    bids_by_listing: HashMap<ListingID, Vec<BidID>>,
    deals: HashMap<DealID, Deal>,
    deal_by_bid: HashMap<BidID, DealID>,
}

impl Records {
    fn listing(&self, listing_id: &ListingID) -> Result<&Listing> {
        self.listings
            .get(listing_id)
            .ok_or_else(|| MarketError::not_found("listing", listing_id))
    }

    fn listing_bids(&self, listing_id: &ListingID) -> impl Iterator<Item = &BidOffer> {
        self.bids_by_listing
            .get(listing_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.bids.get(id))
    }

    fn validate(&self, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::InsertBid(bid) => {
                if self.bids.contains_key(&bid.id) {
                    return Err(MarketError::ConcurrentModification {
                        record: bid.id.to_string(),
                        expected: 0,
                        found: self.bids[&bid.id].version,
                    });
                }
                let listing = self.listing(&bid.listing_id)?;
                if !listing.status.is_accepting_bids() {
                    return Err(MarketError::ListingNotActive(format!(
                        "listing {} is {:?}",
                        listing.id, listing.status
                    )));
                }
            }
            WriteOp::UpdateBid {
                bid,
                expected_version,
            } => {
                let stored = self
                    .bids
                    .get(&bid.id)
                    .ok_or_else(|| MarketError::not_found("bid", &bid.id))?;
                if stored.version != *expected_version {
                    return Err(MarketError::ConcurrentModification {
                        record: bid.id.to_string(),
                        expected: *expected_version,
                        found: stored.version,
                    });
                }
                // A second settled bid on one listing means we lost a race
                if bid.status.is_settled() && !stored.status.is_settled() {
                    if let Some(winner) = self
                        .listing_bids(&bid.listing_id)
                        .find(|other| other.id != bid.id && other.status.is_settled())
                    {
                        return Err(MarketError::ConcurrentModification {
                            record: format!("listing {} (settled by {})", bid.listing_id, winner.id),
                            expected: *expected_version,
                            found: stored.version,
                        });
                    }
                }
            }
            WriteOp::InsertDeal(deal) => {
                if let Some(existing) = self.deal_by_bid.get(&deal.bid_id) {
                    return Err(MarketError::ConcurrentModification {
                        record: format!("deal for bid {} ({})", deal.bid_id, existing),
                        expected: 0,
                        found: 1,
                    });
                }
            }
            WriteOp::UpdateDeal {
                deal,
                expected_version,
            } => {
                let stored = self
                    .deals
                    .get(&deal.id)
                    .ok_or_else(|| MarketError::not_found("deal", &deal.id))?;
                if stored.version != *expected_version {
                    return Err(MarketError::ConcurrentModification {
                        record: deal.id.to_string(),
                        expected: *expected_version,
                        found: stored.version,
                    });
                }
            }
            WriteOp::CancelOpenBids { listing_id, .. } => {
                self.listing(listing_id)?;
                if let Some(settled) = self
                    .listing_bids(listing_id)
                    .find(|bid| bid.status.is_settled())
                {
                    return Err(MarketError::InvalidTransition(format!(
                        "listing {} already has a settled bid {}",
                        listing_id, settled.id
                    )));
                }
            }
            WriteOp::CancelOpenSiblings { listing_id, .. }
            | WriteOp::SetListingStatus { listing_id, .. }
            | WriteOp::RefreshListingStatus(listing_id)
            | WriteOp::BoostListing { listing_id, .. } => {
                self.listing(listing_id)?;
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: WriteOp, receipt: &mut CommitReceipt) {
        match op {
            WriteOp::InsertBid(mut bid) => {
                bid.version = 0;
                receipt.bid_versions.push((bid.id.clone(), bid.version));
                self.bids_by_listing
                    .entry(bid.listing_id.clone())
                    .or_default()
                    .push(bid.id.clone());
                self.bids.insert(bid.id.clone(), bid);
            }
            WriteOp::UpdateBid {
                mut bid,
                expected_version,
            } => {
                bid.version = expected_version + 1;
                receipt.bid_versions.push((bid.id.clone(), bid.version));
                self.bids.insert(bid.id.clone(), bid);
            }
            WriteOp::CancelOpenSiblings {
                listing_id,
                winner,
                reason,
                at,
            } => self.cancel_open(&listing_id, Some(&winner), &reason, at, receipt),
            WriteOp::CancelOpenBids {
                listing_id,
                reason,
                at,
            } => self.cancel_open(&listing_id, None, &reason, at, receipt),
            WriteOp::InsertDeal(mut deal) => {
                deal.version = 0;
                self.deal_by_bid.insert(deal.bid_id.clone(), deal.id.clone());
                self.deals.insert(deal.id.clone(), deal);
            }
            WriteOp::UpdateDeal {
                mut deal,
                expected_version,
            } => {
                deal.version = expected_version + 1;
                self.deals.insert(deal.id.clone(), deal);
            }
            WriteOp::SetListingStatus { listing_id, status } => {
                if let Some(listing) = self.listings.get_mut(&listing_id) {
                    listing.status = status;
                    receipt.listing_status = Some(status);
                }
            }
            WriteOp::RefreshListingStatus(listing_id) => {
                let current = match self.listings.get(&listing_id) {
                    Some(listing) => listing.status,
                    None => return,
                };
                let statuses: Vec<_> = self.listing_bids(&listing_id).map(|b| b.status).collect();
                let status = derive_listing_status(current, &statuses);
                if let Some(listing) = self.listings.get_mut(&listing_id) {
                    listing.status = status;
                }
                receipt.listing_status = Some(status);
            }
            WriteOp::BoostListing { listing_id, until } => {
                if let Some(listing) = self.listings.get_mut(&listing_id) {
                    listing.boost_expiry = Some(until);
                    receipt.listing_status = Some(listing.status);
                }
            }
        }
    }

    fn cancel_open(
        &mut self,
        listing_id: &ListingID,
        keep: Option<&BidID>,
        reason: &str,
        at: SystemTime,
        receipt: &mut CommitReceipt,
    ) {
        let ids = self.bids_by_listing.get(listing_id).cloned().unwrap_or_default();
        for id in ids {
            if Some(&id) == keep {
                continue;
            }
            if let Some(bid) = self.bids.get_mut(&id) {
                if bid.force_cancel(reason, at) {
                    bid.version += 1;
                    receipt.cancelled.push(id);
                }
            }
        }
    }
}

/// Store that keeps every record in process memory
#[derive(Default)]
pub struct InMemoryMarketStore {
    records: Mutex<Records>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| MarketError::StateCorruption("market store lock poisoned".to_string()))
    }
}

impl ListingStore for InMemoryMarketStore {
    fn get_listing(&self, listing_id: &ListingID) -> Result<Listing> {
        self.records()?.listing(listing_id).cloned()
    }

    fn set_listing_status(&self, listing_id: &ListingID, status: ListingStatus) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::SetListingStatus {
            listing_id: listing_id.clone(),
            status,
        });
        self.commit(batch).map(|_| ())
    }
}

impl MarketStore for InMemoryMarketStore {
    fn insert_listing(&self, listing: Listing) -> Result<()> {
        let mut records = self.records()?;
        if records.listings.contains_key(&listing.id) {
            return Err(MarketError::InvalidTransition(format!(
                "listing {} already exists",
                listing.id
            )));
        }
        records.listings.insert(listing.id.clone(), listing);
        Ok(())
    }

    fn load_bid(&self, bid_id: &BidID) -> Result<BidOffer> {
        self.records()?
            .bids
            .get(bid_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("bid", bid_id))
    }

    fn bids_for_listing(&self, listing_id: &ListingID) -> Result<Vec<BidOffer>> {
        let records = self.records()?;
        records.listing(listing_id)?;
        Ok(records.listing_bids(listing_id).cloned().collect())
    }

    fn open_bids(&self) -> Result<Vec<BidOffer>> {
        Ok(self
            .records()?
            .bids
            .values()
            .filter(|bid| bid.status.is_open())
            .cloned()
            .collect())
    }

    fn load_deal(&self, deal_id: &DealID) -> Result<Deal> {
        self.records()?
            .deals
            .get(deal_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("deal", deal_id))
    }

    fn deal_for_bid(&self, bid_id: &BidID) -> Result<Option<Deal>> {
        let records = self.records()?;
        Ok(records
            .deal_by_bid
            .get(bid_id)
            .and_then(|id| records.deals.get(id))
            .cloned())
    }

    fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let mut records = self.records()?;
        for op in batch.ops() {
            records.validate(op)?;
        }

        let mut receipt = CommitReceipt::default();
        let count = batch.ops.len();
        for op in batch.ops {
            records.apply(op, &mut receipt);
        }
        debug!(ops = count, cancelled = receipt.cancelled.len(), "Committed write batch");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::BidStatus;
    use crate::types::{Direction, UserID};
    use rust_decimal_macros::dec;

    fn store_with_listing() -> (InMemoryMarketStore, Listing) {
        let store = InMemoryMarketStore::new();
        let listing =
            Listing::new(Direction::Sell, UserID::from("seller"), "ACME", dec!(100), 100, 10)
                .unwrap();
        store.insert_listing(listing.clone()).unwrap();
        (store, listing)
    }

    fn insert_bid(store: &InMemoryMarketStore, listing: &Listing, buyer: &str) -> BidOffer {
        let bid = BidOffer::new(listing, UserID::from(buyer), dec!(100), 20, SystemTime::now());
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertBid(bid.clone()));
        store.commit(batch).unwrap();
        bid
    }

    #[test]
    fn test_update_bumps_version() {
        let (store, listing) = store_with_listing();
        let bid = insert_bid(&store, &listing, "b1");

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpdateBid {
            bid: bid.clone(),
            expected_version: 0,
        });
        let receipt = store.commit(batch).unwrap();
        assert_eq!(receipt.bid_version(&bid.id), Some(1));
        assert_eq!(store.load_bid(&bid.id).unwrap().version, 1);
    }

    #[test]
    fn test_stale_version_rejected_without_side_effects() {
        let (store, listing) = store_with_listing();
        let bid = insert_bid(&store, &listing, "b1");
        let sibling = insert_bid(&store, &listing, "b2");

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::CancelOpenSiblings {
                listing_id: listing.id.clone(),
                winner: bid.id.clone(),
                reason: "sold".to_string(),
                at: SystemTime::now(),
            })
            .push(WriteOp::UpdateBid {
                bid: bid.clone(),
                expected_version: 7,
            });

        let err = store.commit(batch).unwrap_err();
        assert!(matches!(err, MarketError::ConcurrentModification { .. }));
        // Nothing from the failed batch is visible
        assert_eq!(store.load_bid(&sibling.id).unwrap().status, BidStatus::Pending);
    }

    #[test]
    fn test_cancel_open_siblings() {
        let (store, listing) = store_with_listing();
        let winner = insert_bid(&store, &listing, "b1");
        let loser = insert_bid(&store, &listing, "b2");

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::CancelOpenSiblings {
            listing_id: listing.id.clone(),
            winner: winner.id.clone(),
            reason: "sold".to_string(),
            at: SystemTime::now(),
        });
        let receipt = store.commit(batch).unwrap();

        assert_eq!(receipt.cancelled, vec![loser.id.clone()]);
        assert_eq!(store.load_bid(&winner.id).unwrap().status, BidStatus::Pending);
        let loser = store.load_bid(&loser.id).unwrap();
        assert_eq!(loser.status, BidStatus::Cancelled);
        assert_eq!(loser.version, 1);
    }

    #[test]
    fn test_closed_listing_refuses_bids() {
        let (store, listing) = store_with_listing();
        store
            .set_listing_status(&listing.id, ListingStatus::Cancelled)
            .unwrap();

        let bid = BidOffer::new(&listing, UserID::from("b1"), dec!(100), 20, SystemTime::now());
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertBid(bid));
        assert!(matches!(
            store.commit(batch),
            Err(MarketError::ListingNotActive(_))
        ));
    }

    #[test]
    fn test_refresh_listing_status() {
        let (store, listing) = store_with_listing();
        let mut bid = insert_bid(&store, &listing, "b1");
        bid.status = BidStatus::Countered;

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::UpdateBid {
                bid,
                expected_version: 0,
            })
            .push(WriteOp::RefreshListingStatus(listing.id.clone()));
        let receipt = store.commit(batch).unwrap();

        assert_eq!(receipt.listing_status, Some(ListingStatus::Negotiating));
        assert_eq!(
            store.get_listing(&listing.id).unwrap().status,
            ListingStatus::Negotiating
        );
    }

    #[test]
    fn test_unknown_records() {
        let store = InMemoryMarketStore::new();
        assert!(matches!(
            store.load_bid(&BidID::from("missing")),
            Err(MarketError::NotFound { kind: "bid", .. })
        ));
        assert!(store.deal_for_bid(&BidID::from("missing")).unwrap().is_none());
    }
}
