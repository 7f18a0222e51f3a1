//! Transition events handed to the notification dispatcher

use crate::negotiation::BidStatus;
use crate::types::{BidID, DealID, ListingID, Side};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Kind of state change being announced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BidPlaced,
    Countered,
    Accepted,
    Confirmed,
    Rejected,
    Cancelled,
    Expired,
    DealCreated,
    DealStageChanged,
    ListingWithdrawn,
    ListingBoosted,
}

impl EventType {
    /// Event announcing that a bid entered `status`
    pub fn for_status(status: BidStatus) -> Self {
        match status {
            BidStatus::Pending => EventType::BidPlaced,
            BidStatus::Countered => EventType::Countered,
            BidStatus::Accepted | BidStatus::PendingConfirmation => EventType::Accepted,
            BidStatus::Confirmed => EventType::Confirmed,
            BidStatus::Rejected => EventType::Rejected,
            BidStatus::Expired => EventType::Expired,
            BidStatus::Cancelled => EventType::Cancelled,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationEvent {
    pub event_type: EventType,
    pub listing_id: ListingID,
    pub bid_id: Option<BidID>,
    /// `None` when the engine itself acted (expiry, sibling cancellation)
    pub acting_role: Option<Side>,
    pub deal_id: Option<DealID>,
    pub at: SystemTime,
}

impl NegotiationEvent {
    pub fn new(event_type: EventType, listing_id: ListingID, at: SystemTime) -> Self {
        Self {
            event_type,
            listing_id,
            bid_id: None,
            acting_role: None,
            deal_id: None,
            at,
        }
    }

    pub fn bid(mut self, bid_id: BidID) -> Self {
        self.bid_id = Some(bid_id);
        self
    }

    pub fn by(mut self, role: Side) -> Self {
        self.acting_role = Some(role);
        self
    }

    pub fn deal(mut self, deal_id: DealID) -> Self {
        self.deal_id = Some(deal_id);
        self
    }
}

/// Receiver of transition events. Delivery is fire-and-forget and must not fail
/// the transition that produced the event.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: NegotiationEvent);
}

/// Forwards events into an unbounded tokio channel
#[derive(Clone)]
pub struct ChannelNotifier {
    event_tx: mpsc::UnboundedSender<NegotiationEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NegotiationEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, event: NegotiationEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("Notification receiver dropped; event discarded");
        }
    }
}

/// Writes events to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, event: NegotiationEvent) {
        tracing::info!(
            event = ?event.event_type,
            listing_id = %event.listing_id,
            bid_id = ?event.bid_id,
            role = ?event.acting_role,
            "Negotiation event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut events) = ChannelNotifier::new();
        let listing_id = ListingID::from("lst_1");

        notifier.notify(
            NegotiationEvent::new(EventType::Countered, listing_id.clone(), SystemTime::now())
                .bid(BidID::from("bid_1"))
                .by(Side::Seller),
        );

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Countered);
        assert_eq!(event.listing_id, listing_id);
        assert_eq!(event.acting_role, Some(Side::Seller));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (notifier, events) = ChannelNotifier::new();
        drop(events);
        notifier.notify(NegotiationEvent::new(
            EventType::Expired,
            ListingID::from("lst_1"),
            SystemTime::now(),
        ));
    }

    #[test]
    fn test_event_for_status() {
        assert_eq!(
            EventType::for_status(BidStatus::PendingConfirmation),
            EventType::Accepted
        );
        assert_eq!(EventType::for_status(BidStatus::Confirmed), EventType::Confirmed);
    }
}
