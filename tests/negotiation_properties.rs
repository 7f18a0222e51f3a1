//! Property-based tests for the negotiation state machine
//!
//! Random action sequences from both sides are thrown at bids to check the
//! invariants that must hold whatever order parties act in.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::time::SystemTime;
use unlisted_market::{
    AcceptancePolicy, BidCommand, BidOffer, BidStatus, Direction, Listing, MarketConfig,
    MarketError, MarketStore, NegotiationEngine, PricingTranslator, Side, UserID,
};

// PROPERTY TEST STRATEGIES

fn side_strategy() -> impl Strategy<Value = Side> {
    prop::bool::ANY.prop_map(|b| if b { Side::Buyer } else { Side::Seller })
}

/// Prices between 0.01 and 1000.00
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=100_000).prop_map(|cents| Decimal::new(cents, 2))
}

/// Party actions; expiry is left to the sweeper
fn command_strategy() -> impl Strategy<Value = BidCommand> {
    prop_oneof![
        Just(BidCommand::Accept),
        Just(BidCommand::Reject),
        Just(BidCommand::Confirm),
        Just(BidCommand::Cancel),
        (price_strategy(), 1u64..=1000).prop_map(|(price, quantity)| BidCommand::Counter {
            price,
            quantity,
            message: None,
        }),
    ]
}

/// Positive prices across the whole decimal range, up to `Decimal::MAX`
fn huge_price_strategy() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        Just(Decimal::MAX),
        (any::<u32>(), any::<u32>(), any::<u32>(), 0u32..=28)
            .prop_map(|(lo, mid, hi, scale)| Decimal::from_parts(lo, mid, hi, false, scale)),
    ]
    .prop_filter("price must be positive", |price| *price > Decimal::ZERO)
}

fn policy_strategy() -> impl Strategy<Value = AcceptancePolicy> {
    prop_oneof![
        Just(AcceptancePolicy::TwoPhase),
        Just(AcceptancePolicy::Immediate)
    ]
}

fn listing(direction: Direction) -> Listing {
    Listing::new(direction, UserID::from("owner"), "ACME", Decimal::new(100, 0), 1000, 1).unwrap()
}

// PROPERTY TESTS
proptest! {
    /// Property: history only ever grows, rounds strictly increase, and a
    /// refused action leaves the bid exactly as it was
    #[test]
    fn prop_history_is_append_only(
        sell in prop::bool::ANY,
        policy in policy_strategy(),
        actions in prop::collection::vec((side_strategy(), command_strategy()), 1..40),
    ) {
        let direction = if sell { Direction::Sell } else { Direction::Buy };
        let listing = listing(direction);
        let now = SystemTime::now();
        let mut bid = BidOffer::new(&listing, UserID::from("counterparty"), Decimal::new(100, 0), 10, now);

        for (side, command) in actions {
            let before = bid.clone();
            let result = bid.apply(side, &command, policy, now);

            if result.is_err() {
                prop_assert_eq!(&bid, &before);
            }
            prop_assert!(bid.counter_history().starts_with(before.counter_history()));
            prop_assert!(bid
                .counter_history()
                .windows(2)
                .all(|pair| pair[0].round < pair[1].round));
            prop_assert_eq!(bid.original_price, Decimal::new(100, 0));
        }
    }

    /// Property: the author of the latest terms can never accept, reject or
    /// counter next; the other side always can while the bid is open
    #[test]
    fn prop_turn_taking(
        policy in policy_strategy(),
        actions in prop::collection::vec((side_strategy(), command_strategy()), 1..40),
    ) {
        let listing = listing(Direction::Sell);
        let now = SystemTime::now();
        let mut bid = BidOffer::new(&listing, UserID::from("counterparty"), Decimal::new(100, 0), 10, now);

        for (side, command) in actions {
            let open_turn = matches!(bid.status, BidStatus::Pending | BidStatus::Countered);
            let turn_action = matches!(
                command,
                BidCommand::Accept | BidCommand::Reject | BidCommand::Counter { .. }
            );
            let last_author = bid.last_author();
            let result = bid.apply(side, &command, policy, now);

            if open_turn && turn_action {
                if side == last_author {
                    prop_assert!(matches!(result, Err(MarketError::NotYourTurn(_))));
                } else {
                    prop_assert!(result.is_ok());
                }
            }
        }
    }

    /// Property: however actions interleave across sibling bids, at most one
    /// bid on a listing settles, and once one does every sibling is closed
    #[test]
    fn prop_at_most_one_settled_bid(
        policy in policy_strategy(),
        actions in prop::collection::vec((0usize..3, side_strategy(), command_strategy()), 1..60),
    ) {
        let engine = NegotiationEngine::in_memory(&MarketConfig {
            acceptance_policy: policy,
            ..MarketConfig::default()
        })
        .unwrap();
        let listing_id = engine.register_listing(listing(Direction::Sell)).unwrap();
        let bids: Vec<_> = ["b1", "b2", "b3"]
            .iter()
            .map(|buyer| {
                engine
                    .place_bid(&listing_id, UserID::from(*buyer), Decimal::new(100, 0), 10)
                    .unwrap()
            })
            .collect();

        for (index, side, command) in actions {
            let _ = engine.act(&bids[index], side, &command, None);

            let stored: Vec<_> = bids
                .iter()
                .map(|id| engine.store().load_bid(id).unwrap())
                .collect();
            let settled: Vec<_> = stored.iter().filter(|b| b.status.is_settled()).collect();
            prop_assert!(settled.len() <= 1);

            if let Some(winner) = settled.first() {
                prop_assert!(stored.iter().all(|b| b.status.is_terminal()));
                prop_assert!(winner.deal_id.is_some());
                prop_assert_eq!(
                    engine.settle(&winner.id).unwrap().id,
                    winner.deal_id.clone().unwrap()
                );
            }
        }
    }

    /// Property: own figures are never adjusted, and counterparty figures always
    /// move in the direction of the money flow
    #[test]
    fn prop_fee_direction(price in price_strategy(), fee_bps in 0i64..1000) {
        let pricing = PricingTranslator::new(Decimal::new(fee_bps, 4)).unwrap();

        for side in [Side::Buyer, Side::Seller] {
            prop_assert_eq!(pricing.visible_price(price, side, side).unwrap(), price);
        }
        prop_assert!(pricing.visible_price(price, Side::Buyer, Side::Seller).unwrap() <= price);
        prop_assert!(pricing.visible_price(price, Side::Seller, Side::Buyer).unwrap() >= price);

        let breakdown = pricing.settlement_breakdown(price, 7).unwrap();
        prop_assert_eq!(
            breakdown.total_amount - breakdown.seller_receives_per_share * Decimal::from(7u64),
            breakdown.platform_fee_total
        );
    }

    /// Property: terms of any size either come back as a structured error at
    /// placement, or can be viewed by both sides and settled without failing
    #[test]
    fn prop_oversized_terms_never_escape_validation(
        price in huge_price_strategy(),
        quantity in prop_oneof![1u64..=1000, any::<u64>().prop_map(|q| q.max(1))],
    ) {
        let engine = NegotiationEngine::in_memory(&MarketConfig::default()).unwrap();
        let listing = Listing::new(
            Direction::Sell,
            UserID::from("owner"),
            "ACME",
            Decimal::new(100, 0),
            u64::MAX,
            1,
        )
        .unwrap();
        let listing_id = engine.register_listing(listing).unwrap();

        match engine.place_bid(&listing_id, UserID::from("buyer"), price, quantity) {
            Ok(bid_id) => {
                prop_assert!(engine.negotiation_view(&bid_id, Side::Seller).is_ok());
                prop_assert!(engine.negotiation_view(&bid_id, Side::Buyer).is_ok());
                prop_assert!(engine.accept(&bid_id, Side::Seller).is_ok());
                let outcome = engine.confirm(&bid_id, Side::Buyer).unwrap();
                prop_assert_eq!(outcome.status, BidStatus::Confirmed);
                prop_assert!(outcome.deal_id.is_some());
            }
            Err(e) => prop_assert!(
                matches!(e, MarketError::InvalidPrice(_) | MarketError::InvalidQuantity(_)),
                "unexpected error {:?}",
                e
            ),
        }
    }
}
