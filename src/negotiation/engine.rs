//! Negotiation engine: the request-facing surface over bids, listings and deals

use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::listing::{Listing, ListingStatus, WithdrawReason};
use crate::notify::{EventType, LogNotifier, NegotiationEvent, NotificationSink};
use crate::pricing::PricingTranslator;
use crate::settlement::{Deal, DealStatus, DealView, DealViewer, SettlementIssuer};
use crate::store::{CommitReceipt, InMemoryMarketStore, MarketStore, WriteBatch, WriteOp};
use crate::types::{BidID, DealID, ListingID, Side, UserID};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::bid::BidOffer;
use super::types::{
    AcceptancePolicy, ActionOutcome, BidCommand, BidStatus, NegotiationView, Transition, ViewEntry,
};

/// Negotiation engine shared by every request handler
#[derive(Clone)]
pub struct NegotiationEngine {
    store: Arc<dyn MarketStore>,
    pricing: PricingTranslator,
    issuer: SettlementIssuer,
    notifier: Arc<dyn NotificationSink>,
    policy: AcceptancePolicy,
    bid_ttl: Duration,
    strict_deal_stages: bool,
    boost_duration: Duration,
}

impl NegotiationEngine {
    /// Create a new engine over `store`, announcing transitions to `notifier`
    pub fn new(
        config: &MarketConfig,
        store: Arc<dyn MarketStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let pricing = PricingTranslator::new(config.fee_rate)?;

        Ok(Self {
            store,
            pricing,
            issuer: SettlementIssuer::new(pricing, config.code_length),
            notifier,
            policy: config.acceptance_policy,
            bid_ttl: config.bid_ttl,
            strict_deal_stages: config.strict_deal_stages,
            boost_duration: config.boost_duration,
        })
    }

    /// Engine over a fresh in-memory store that logs its events
    pub fn in_memory(config: &MarketConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(InMemoryMarketStore::new()),
            Arc::new(LogNotifier),
        )
    }

    pub fn pricing(&self) -> &PricingTranslator {
        &self.pricing
    }

    pub fn policy(&self) -> AcceptancePolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn MarketStore> {
        &self.store
    }

    pub fn register_listing(&self, listing: Listing) -> Result<ListingID> {
        let listing_id = listing.id.clone();
        tracing::info!(
            listing_id = %listing_id,
            direction = ?listing.direction,
            price = %listing.ask_price,
            quantity = listing.quantity,
            "Registering listing"
        );
        self.store.insert_listing(listing)?;
        Ok(listing_id)
    }

    pub fn get_listing(&self, listing_id: &ListingID) -> Result<Listing> {
        self.store.get_listing(listing_id)
    }

    /// Take a listing off the board and cancel its open bids.
    ///
    /// Unknown or already-closed listings succeed without cancelling anything.
    pub fn withdraw_listing(
        &self,
        listing_id: &ListingID,
        owner_id: &UserID,
        reason: WithdrawReason,
    ) -> Result<Vec<BidID>> {
        let listing = match self.store.get_listing(listing_id) {
            Ok(listing) => listing,
            Err(MarketError::NotFound { .. }) => {
                tracing::debug!(listing_id = %listing_id, "Withdraw of unknown listing ignored");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        if &listing.owner_id != owner_id {
            return Err(MarketError::Unauthorized(format!(
                "{} does not own listing {}",
                owner_id, listing_id
            )));
        }
        if listing.status.is_closed() {
            return Ok(Vec::new());
        }
        let bids = self.store.bids_for_listing(listing_id)?;
        if let Some(settled) = bids.iter().find(|bid| bid.status.is_settled()) {
            return Err(MarketError::InvalidTransition(format!(
                "listing {} already has a settled bid {}",
                listing_id, settled.id
            )));
        }

        let now = SystemTime::now();
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::CancelOpenBids {
                listing_id: listing_id.clone(),
                reason: reason.describe().to_string(),
                at: now,
            })
            .push(WriteOp::SetListingStatus {
                listing_id: listing_id.clone(),
                status: reason.listing_status(),
            });
        let receipt = self.store.commit(batch)?;

        tracing::info!(
            listing_id = %listing_id,
            reason = ?reason,
            cancelled = receipt.cancelled.len(),
            "Listing withdrawn"
        );
        self.notifier.notify(
            NegotiationEvent::new(EventType::ListingWithdrawn, listing_id.clone(), now)
                .by(listing.owner_side()),
        );
        self.announce_cancelled(listing_id, &receipt, now);
        Ok(receipt.cancelled)
    }

    /// Raise a listing's visibility for the configured boost window
    pub fn boost_listing(&self, listing_id: &ListingID, owner_id: &UserID) -> Result<SystemTime> {
        let listing = self.store.get_listing(listing_id)?;
        if &listing.owner_id != owner_id {
            return Err(MarketError::Unauthorized(format!(
                "{} does not own listing {}",
                owner_id, listing_id
            )));
        }
        if !listing.status.is_accepting_bids() {
            return Err(MarketError::ListingNotActive(format!(
                "listing {} is {:?}",
                listing_id, listing.status
            )));
        }

        let now = SystemTime::now();
        let until = now.checked_add(self.boost_duration).ok_or_else(|| {
            MarketError::Configuration(format!(
                "boost of {}s runs past the representable time range",
                self.boost_duration.as_secs()
            ))
        })?;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::BoostListing {
            listing_id: listing_id.clone(),
            until,
        });
        self.store.commit(batch)?;

        self.notifier.notify(
            NegotiationEvent::new(EventType::ListingBoosted, listing_id.clone(), now)
                .by(listing.owner_side()),
        );
        Ok(until)
    }

    /// Place a new bid/offer against a listing
    pub fn place_bid(
        &self,
        listing_id: &ListingID,
        counterparty_id: UserID,
        price: Decimal,
        quantity: u64,
    ) -> Result<BidID> {
        self.place_bid_with_message(listing_id, counterparty_id, price, quantity, None)
    }

    /// Place a bid carrying an opening note for the listing owner
    pub fn place_bid_with_message(
        &self,
        listing_id: &ListingID,
        counterparty_id: UserID,
        price: Decimal,
        quantity: u64,
        message: Option<String>,
    ) -> Result<BidID> {
        PricingTranslator::validate_price(price)?;
        let listing = self.store.get_listing(listing_id)?;
        if !listing.status.is_accepting_bids() {
            return Err(MarketError::ListingNotActive(format!(
                "listing {} is {:?}",
                listing_id, listing.status
            )));
        }
        if listing.owner_id == counterparty_id {
            return Err(MarketError::Unauthorized(
                "cannot bid on your own listing".to_string(),
            ));
        }
        listing.check_lot(quantity)?;
        self.pricing.check_terms(price, quantity)?;

        let now = SystemTime::now();
        let bid =
            BidOffer::new(&listing, counterparty_id, price, quantity, now).with_message(message);
        let bid_id = bid.id.clone();
        let side = bid.counterparty_side();

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::InsertBid(bid))
            .push(WriteOp::RefreshListingStatus(listing_id.clone()));
        self.store.commit(batch)?;

        tracing::info!(
            bid_id = %bid_id,
            listing_id = %listing_id,
            side = %side,
            price = %price,
            quantity,
            "Bid placed"
        );
        self.notifier.notify(
            NegotiationEvent::new(EventType::BidPlaced, listing_id.clone(), now)
                .bid(bid_id.clone())
                .by(side),
        );
        Ok(bid_id)
    }

    pub fn accept(&self, bid_id: &BidID, side: Side) -> Result<ActionOutcome> {
        self.act(bid_id, side, &BidCommand::Accept, None)
    }

    pub fn reject(&self, bid_id: &BidID, side: Side) -> Result<ActionOutcome> {
        self.act(bid_id, side, &BidCommand::Reject, None)
    }

    pub fn counter(
        &self,
        bid_id: &BidID,
        side: Side,
        price: Decimal,
        quantity: u64,
        message: Option<String>,
    ) -> Result<ActionOutcome> {
        let command = BidCommand::Counter {
            price,
            quantity,
            message,
        };
        self.act(bid_id, side, &command, None)
    }

    pub fn confirm(&self, bid_id: &BidID, side: Side) -> Result<ActionOutcome> {
        self.act(bid_id, side, &BidCommand::Confirm, None)
    }

    /// Withdraw a still-pending bid; only its author may do this.
    ///
    /// Cancelling a bid that does not exist succeeds without writing anything.
    pub fn cancel_bid(&self, bid_id: &BidID, side: Side) -> Result<ActionOutcome> {
        match self.act(bid_id, side, &BidCommand::Cancel, None) {
            Err(MarketError::NotFound { kind: "bid", .. }) => {
                tracing::debug!(bid_id = %bid_id, "Cancel of unknown bid ignored");
                Ok(ActionOutcome {
                    bid_id: bid_id.clone(),
                    status: BidStatus::Cancelled,
                    round: None,
                    deal_id: None,
                    version: 0,
                })
            }
            result => result,
        }
    }

    /// Expire one bid; already-terminal bids are left as they are
    pub fn expire(&self, bid_id: &BidID) -> Result<ActionOutcome> {
        self.execute(bid_id, None, &BidCommand::Expire, None, SystemTime::now())
    }

    /// Apply `command` as `side`.
    ///
    /// With `expected_version` set the action fails with `ConcurrentModification`
    /// unless the bid is still at that version.
    pub fn act(
        &self,
        bid_id: &BidID,
        side: Side,
        command: &BidCommand,
        expected_version: Option<u64>,
    ) -> Result<ActionOutcome> {
        self.execute(bid_id, Some(side), command, expected_version, SystemTime::now())
    }

    fn execute(
        &self,
        bid_id: &BidID,
        actor: Option<Side>,
        command: &BidCommand,
        expected_version: Option<u64>,
        now: SystemTime,
    ) -> Result<ActionOutcome> {
        let mut bid = self.store.load_bid(bid_id)?;
        let read_version = bid.version;
        if let Some(expected) = expected_version {
            if expected != read_version {
                return Err(MarketError::ConcurrentModification {
                    record: bid_id.to_string(),
                    expected,
                    found: read_version,
                });
            }
        }
        let listing = self.store.get_listing(&bid.listing_id)?;

        // Expiry ignores the acting side
        let side = actor.unwrap_or_else(|| bid.owner_side());
        let transition = match bid.apply(side, command, self.policy, now) {
            Ok(transition) => transition,
            Err(e) => {
                tracing::warn!(
                    bid_id = %bid_id,
                    side = %side,
                    action = command.name(),
                    code = e.code(),
                    "Action refused: {}",
                    e
                );
                return Err(e);
            }
        };
        if let BidCommand::Counter {
            price, quantity, ..
        } = command
        {
            listing.check_lot(*quantity)?;
            self.pricing.check_terms(*price, *quantity)?;
        }

        if transition.is_noop() {
            return Ok(ActionOutcome {
                bid_id: bid.id,
                status: bid.status,
                round: None,
                deal_id: bid.deal_id,
                version: read_version,
            });
        }

        let mut batch = WriteBatch::new();
        let mut deal_id = None;
        if transition.settles() {
            let deal = self.issuer.issue(&bid, &listing, now)?;
            deal_id = Some(deal.id.clone());
            bid.deal_id = Some(deal.id.clone());
            push_settlement(&mut batch, &bid, read_version, deal, now);
        } else {
            batch
                .push(WriteOp::UpdateBid {
                    bid: bid.clone(),
                    expected_version: read_version,
                })
                .push(WriteOp::RefreshListingStatus(bid.listing_id.clone()));
        }

        let receipt = match self.store.commit(batch) {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::debug!(bid_id = %bid_id, action = command.name(), "Commit refused: {}", e);
                return Err(e);
            }
        };

        tracing::info!(
            bid_id = %bid_id,
            listing_id = %bid.listing_id,
            from = %transition.from,
            to = %transition.to,
            side = ?actor,
            "Bid transition"
        );
        self.announce(&bid, &transition, actor, &receipt, now);

        Ok(ActionOutcome {
            version: receipt.bid_version(&bid.id).unwrap_or(read_version + 1),
            bid_id: bid.id,
            status: bid.status,
            round: transition.round,
            deal_id,
        })
    }

    /// Expire every open bid idle for longer than the bid TTL
    pub fn expire_stale(&self, now: SystemTime) -> Result<usize> {
        let mut expired = 0;
        for bid in self.store.open_bids()? {
            let idle = now
                .duration_since(bid.last_action_at)
                .unwrap_or(Duration::ZERO);
            if idle < self.bid_ttl {
                continue;
            }
            match self.execute(&bid.id, None, &BidCommand::Expire, Some(bid.version), now) {
                Ok(outcome) if outcome.status == BidStatus::Expired => expired += 1,
                Ok(_) => {}
                // Someone acted on it since the scan; next sweep re-checks
                Err(MarketError::ConcurrentModification { .. }) => {
                    tracing::debug!(bid_id = %bid.id, "Skipping bid modified during sweep");
                }
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            tracing::info!("Expired {} stale bids", expired);
        }
        Ok(expired)
    }

    /// Negotiation history with every price as `viewer` may see it
    pub fn negotiation_view(&self, bid_id: &BidID, viewer: Side) -> Result<NegotiationView> {
        let bid = self.store.load_bid(bid_id)?;
        let opening_author = bid.counterparty_side();

        let mut entries = Vec::with_capacity(bid.counter_history().len() + 1);
        entries.push(ViewEntry {
            round: 0,
            authored_by: opening_author,
            price: self
                .pricing
                .visible_price(bid.original_price, opening_author, viewer)?,
            quantity: bid.original_quantity,
            own: opening_author == viewer,
            message: bid.opening_message.clone(),
            timestamp: bid.created_at,
        });
        for round in bid.counter_history() {
            entries.push(ViewEntry {
                round: round.round,
                authored_by: round.authored_by,
                price: self
                    .pricing
                    .visible_price(round.price, round.authored_by, viewer)?,
                quantity: round.quantity,
                own: round.authored_by == viewer,
                message: round.message.clone(),
                timestamp: round.timestamp,
            });
        }

        let next_actor = bid.next_actor();
        Ok(NegotiationView {
            current_price: self
                .pricing
                .visible_price(bid.price, bid.last_author(), viewer)?,
            current_quantity: bid.quantity,
            bid_id: bid.id,
            listing_id: bid.listing_id,
            viewer,
            status: bid.status,
            next_actor,
            your_turn: next_actor == Some(viewer),
            entries,
            deal_id: bid.deal_id,
            version: bid.version,
        })
    }

    /// Deal for a settled bid, creating it if it does not exist yet
    pub fn settle(&self, bid_id: &BidID) -> Result<Deal> {
        if let Some(deal) = self.store.deal_for_bid(bid_id)? {
            return Ok(deal);
        }

        let mut bid = self.store.load_bid(bid_id)?;
        if !bid.status.is_settled() {
            return Err(MarketError::InvalidTransition(format!(
                "bid {} is {} and has not been agreed by both sides",
                bid_id, bid.status
            )));
        }
        let listing = self.store.get_listing(&bid.listing_id)?;
        let now = SystemTime::now();
        let read_version = bid.version;
        let deal = self.issuer.issue(&bid, &listing, now)?;
        bid.deal_id = Some(deal.id.clone());

        let mut batch = WriteBatch::new();
        push_settlement(&mut batch, &bid, read_version, deal.clone(), now);
        match self.store.commit(batch) {
            Ok(receipt) => {
                tracing::info!(bid_id = %bid_id, deal_id = %deal.id, "Deal issued");
                let transition = Transition {
                    from: bid.status,
                    to: bid.status,
                    round: None,
                };
                self.announce(&bid, &transition, None, &receipt, now);
                Ok(deal)
            }
            // Lost the race to another settle call; return the winner's deal
            Err(MarketError::ConcurrentModification { .. }) => self
                .store
                .deal_for_bid(bid_id)?
                .ok_or_else(|| MarketError::not_found("deal for bid", bid_id)),
            Err(e) => Err(e),
        }
    }

    /// Relationship-manager stage write, optionally with a note
    pub fn mark_deal_stage(
        &self,
        deal_id: &DealID,
        stage: DealStatus,
        notes: Option<String>,
    ) -> Result<Deal> {
        let mut deal = self.store.load_deal(deal_id)?;
        let read_version = deal.version;
        let from = deal.status;
        let now = SystemTime::now();
        deal.advance(stage, notes, self.strict_deal_stages, now)?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpdateDeal {
            deal: deal.clone(),
            expected_version: read_version,
        });
        self.store.commit(batch)?;
        deal.version = read_version + 1;

        tracing::info!(deal_id = %deal_id, from = %from, to = %stage, "Deal stage changed");
        self.notifier.notify(
            NegotiationEvent::new(EventType::DealStageChanged, deal.listing_id.clone(), now)
                .bid(deal.bid_id.clone())
                .deal(deal.id.clone()),
        );
        Ok(deal)
    }

    pub fn mark_deal_contacted(&self, deal_id: &DealID, notes: Option<String>) -> Result<Deal> {
        self.mark_deal_stage(deal_id, DealStatus::RmContacted, notes)
    }

    pub fn deal_view(&self, deal_id: &DealID, viewer: DealViewer) -> Result<DealView> {
        Ok(self.store.load_deal(deal_id)?.view(viewer))
    }

    /// Check a verification code a party read out to the relationship manager
    pub fn verify_code(&self, deal_id: &DealID, holder: DealViewer, code: &str) -> Result<bool> {
        let deal = self.store.load_deal(deal_id)?;
        let valid = deal.verify_code(holder, code);
        if valid {
            tracing::info!(deal_id = %deal_id, holder = ?holder, "Verification code accepted");
        } else {
            tracing::warn!(deal_id = %deal_id, holder = ?holder, "Verification code mismatch");
        }
        Ok(valid)
    }

    fn announce(
        &self,
        bid: &BidOffer,
        transition: &Transition,
        actor: Option<Side>,
        receipt: &CommitReceipt,
        now: SystemTime,
    ) {
        if transition.from != transition.to || transition.round.is_some() {
            let mut event =
                NegotiationEvent::new(EventType::for_status(transition.to), bid.listing_id.clone(), now)
                    .bid(bid.id.clone());
            if let Some(side) = actor {
                event = event.by(side);
            }
            self.notifier.notify(event);
        }
        if let Some(deal_id) = &bid.deal_id {
            self.notifier.notify(
                NegotiationEvent::new(EventType::DealCreated, bid.listing_id.clone(), now)
                    .bid(bid.id.clone())
                    .deal(deal_id.clone()),
            );
        }
        self.announce_cancelled(&bid.listing_id, receipt, now);
    }

    fn announce_cancelled(&self, listing_id: &ListingID, receipt: &CommitReceipt, now: SystemTime) {
        for cancelled in &receipt.cancelled {
            self.notifier.notify(
                NegotiationEvent::new(EventType::Cancelled, listing_id.clone(), now)
                    .bid(cancelled.clone()),
            );
        }
    }
}

/// Writes that settle `bid`: the bid itself, sibling cancellation, the deal and
/// the listing status, all in one batch
fn push_settlement(
    batch: &mut WriteBatch,
    bid: &BidOffer,
    read_version: u64,
    deal: Deal,
    now: SystemTime,
) {
    batch
        .push(WriteOp::UpdateBid {
            bid: bid.clone(),
            expected_version: read_version,
        })
        .push(WriteOp::CancelOpenSiblings {
            listing_id: bid.listing_id.clone(),
            winner: bid.id.clone(),
            reason: "another bid on this listing was agreed".to_string(),
            at: now,
        })
        .push(WriteOp::InsertDeal(deal))
        .push(WriteOp::SetListingStatus {
            listing_id: bid.listing_id.clone(),
            status: ListingStatus::Sold,
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use crate::types::Direction;
    use rust_decimal_macros::dec;

    fn engine() -> NegotiationEngine {
        NegotiationEngine::in_memory(&MarketConfig::default()).unwrap()
    }

    fn sell_listing(engine: &NegotiationEngine) -> ListingID {
        let listing =
            Listing::new(Direction::Sell, UserID::from("seller"), "ACME", dec!(100), 100, 10)
                .unwrap();
        engine.register_listing(listing).unwrap()
    }

    #[test]
    fn test_place_bid_validation() {
        let engine = engine();
        let listing_id = sell_listing(&engine);

        let err = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(0), 20)
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidPrice(_)));

        let err = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 5)
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidQuantity(_)));

        let err = engine
            .place_bid(&listing_id, UserID::from("seller"), dec!(100), 20)
            .unwrap_err();
        assert!(matches!(err, MarketError::Unauthorized(_)));

        let err = engine
            .place_bid(&ListingID::from("nope"), UserID::from("buyer"), dec!(100), 20)
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound { .. }));
    }

    #[test]
    fn test_counter_respects_min_lot() {
        let engine = engine();
        let listing_id = sell_listing(&engine);
        let bid_id = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 20)
            .unwrap();

        let err = engine
            .counter(&bid_id, Side::Seller, dec!(110), 5, None)
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidQuantity(_)));
        assert_eq!(
            engine.store().load_bid(&bid_id).unwrap().status,
            BidStatus::Pending
        );
    }

    #[test]
    fn test_listing_status_follows_bids() {
        let engine = engine();
        let listing_id = sell_listing(&engine);
        let bid_id = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 20)
            .unwrap();

        engine.counter(&bid_id, Side::Seller, dec!(110), 20, None).unwrap();
        assert_eq!(
            engine.get_listing(&listing_id).unwrap().status,
            ListingStatus::Negotiating
        );

        engine.reject(&bid_id, Side::Buyer).unwrap();
        assert_eq!(
            engine.get_listing(&listing_id).unwrap().status,
            ListingStatus::Active
        );
    }

    #[test]
    fn test_expected_version_guard() {
        let engine = engine();
        let listing_id = sell_listing(&engine);
        let bid_id = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 20)
            .unwrap();

        let outcome = engine
            .act(&bid_id, Side::Seller, &BidCommand::Accept, Some(0))
            .unwrap();
        assert_eq!(outcome.version, 1);

        let err = engine
            .act(&bid_id, Side::Buyer, &BidCommand::Confirm, Some(0))
            .unwrap_err();
        assert!(matches!(err, MarketError::ConcurrentModification { .. }));
    }

    #[test]
    fn test_negotiation_view_applies_fee() {
        let engine = engine();
        let listing_id = sell_listing(&engine);
        let bid_id = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 20)
            .unwrap();
        engine
            .counter(&bid_id, Side::Seller, dec!(110), 20, Some("firm".into()))
            .unwrap();

        let seller = engine.negotiation_view(&bid_id, Side::Seller).unwrap();
        assert_eq!(seller.entries[0].price, dec!(98));
        assert_eq!(seller.entries[1].price, dec!(110));
        assert!(seller.entries[1].own);
        assert!(!seller.your_turn);

        let buyer = engine.negotiation_view(&bid_id, Side::Buyer).unwrap();
        assert_eq!(buyer.entries[0].price, dec!(100));
        assert_eq!(buyer.entries[1].price, dec!(112.2));
        assert_eq!(buyer.current_price, dec!(112.2));
        assert_eq!(buyer.entries[1].message.as_deref(), Some("firm"));
        assert!(buyer.your_turn);
    }

    #[test]
    fn test_withdraw_listing() {
        let engine = engine();
        let listing_id = sell_listing(&engine);
        let bid_id = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 20)
            .unwrap();

        let err = engine
            .withdraw_listing(&listing_id, &UserID::from("buyer"), WithdrawReason::OwnerCancelled)
            .unwrap_err();
        assert!(matches!(err, MarketError::Unauthorized(_)));

        let cancelled = engine
            .withdraw_listing(&listing_id, &UserID::from("seller"), WithdrawReason::SoldElsewhere)
            .unwrap();
        assert_eq!(cancelled, vec![bid_id.clone()]);
        assert_eq!(
            engine.get_listing(&listing_id).unwrap().status,
            ListingStatus::Sold
        );

        // Repeat and unknown listings are quiet successes
        assert!(engine
            .withdraw_listing(&listing_id, &UserID::from("seller"), WithdrawReason::OwnerCancelled)
            .unwrap()
            .is_empty());
        assert!(engine
            .withdraw_listing(&ListingID::from("gone"), &UserID::from("seller"), WithdrawReason::OwnerCancelled)
            .unwrap()
            .is_empty());

        let err = engine
            .place_bid(&listing_id, UserID::from("late"), dec!(100), 20)
            .unwrap_err();
        assert!(matches!(err, MarketError::ListingNotActive(_)));
    }

    #[test]
    fn test_boost_listing() {
        let engine = engine();
        let listing_id = sell_listing(&engine);
        let until = engine
            .boost_listing(&listing_id, &UserID::from("seller"))
            .unwrap();
        let listing = engine.get_listing(&listing_id).unwrap();
        assert_eq!(listing.boost_expiry, Some(until));
        assert!(listing.is_boosted(SystemTime::now()));

        let err = engine
            .boost_listing(&listing_id, &UserID::from("buyer"))
            .unwrap_err();
        assert!(matches!(err, MarketError::Unauthorized(_)));
    }

    #[test]
    fn test_boost_window_is_bounded() {
        let config = MarketConfig {
            boost_duration: Duration::from_secs(u64::MAX),
            ..MarketConfig::default()
        };
        assert!(matches!(
            NegotiationEngine::in_memory(&config),
            Err(MarketError::Configuration(_))
        ));

        let engine = NegotiationEngine::in_memory(&MarketConfig {
            boost_duration: crate::config::MAX_WINDOW,
            ..MarketConfig::default()
        })
        .unwrap();
        let listing_id = sell_listing(&engine);
        let until = engine
            .boost_listing(&listing_id, &UserID::from("seller"))
            .unwrap();
        assert!(until > SystemTime::now());
    }

    #[test]
    fn test_expire_stale_sweep() {
        let engine = engine();
        let listing_id = sell_listing(&engine);
        let bid_id = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 20)
            .unwrap();

        assert_eq!(engine.expire_stale(SystemTime::now()).unwrap(), 0);

        let later = SystemTime::now() + MarketConfig::default().bid_ttl + Duration::from_secs(1);
        assert_eq!(engine.expire_stale(later).unwrap(), 1);
        assert_eq!(
            engine.store().load_bid(&bid_id).unwrap().status,
            BidStatus::Expired
        );
        // Sweeping again finds nothing
        assert_eq!(engine.expire_stale(later).unwrap(), 0);
        assert_eq!(engine.expire(&bid_id).unwrap().status, BidStatus::Expired);
    }

    #[test]
    fn test_events_emitted_on_settlement() {
        let (notifier, mut events) = ChannelNotifier::new();
        let engine = NegotiationEngine::new(
            &MarketConfig::default(),
            Arc::new(InMemoryMarketStore::new()),
            Arc::new(notifier),
        )
        .unwrap();
        let listing_id = sell_listing(&engine);
        let bid_id = engine
            .place_bid(&listing_id, UserID::from("buyer"), dec!(100), 20)
            .unwrap();
        engine.accept(&bid_id, Side::Seller).unwrap();
        engine.confirm(&bid_id, Side::Buyer).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.event_type);
        }
        assert_eq!(
            kinds,
            vec![
                EventType::BidPlaced,
                EventType::Accepted,
                EventType::Confirmed,
                EventType::DealCreated
            ]
        );
    }
}
