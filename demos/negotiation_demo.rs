//! Client/server demo: a seller and two buyers negotiate over TCP
//!
//! Starts an in-process market server, then drives it with one client per
//! party: listing, competing bids, counter-offers, two-phase confirmation,
//! and the relationship-manager walk through the deal stages.
//!
//! Run with: cargo run --example negotiation_demo

use rust_decimal_macros::dec;
use unlisted_market::server::{MarketClient, MarketServer, Reply, Request};
use unlisted_market::{
    DealStatus, DealViewer, Direction, MarketConfig, NegotiationEngine, Side, UserID,
};

fn banner(title: &str) {
    println!("┌─────────────────────────────────────────────┐");
    println!("│ {:<44}│", title);
    println!("└─────────────────────────────────────────────┘");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info,unlisted_market=debug")
        .init();

    let engine = NegotiationEngine::in_memory(&MarketConfig::default())?;
    let server = MarketServer::bind("127.0.0.1:0", engine).await?;
    let addr = server.local_addr()?.to_string();
    tokio::spawn(server.run());
    println!("📡 Market server on {}\n", addr);

    let mut seller = MarketClient::connect(&addr).await?;
    let mut buyer = MarketClient::connect(&addr).await?;
    let mut rival = MarketClient::connect(&addr).await?;

    banner("Listing");
    let listing_id = match seller
        .request(&Request::RegisterListing {
            direction: Direction::Sell,
            owner_id: UserID::from("asha"),
            company_ref: "Acme Unlisted Pvt Ltd".to_string(),
            price: dec!(110),
            quantity: 500,
            min_lot: 25,
        })
        .await?
    {
        Reply::ListingRegistered { listing_id } => listing_id,
        other => anyhow::bail!("unexpected reply {:?}", other),
    };
    println!("   ✅ Listed 500 shares at 110: {}\n", listing_id);

    banner("Bids");
    let bid_id = match buyer
        .request(&Request::PlaceBid {
            listing_id: listing_id.clone(),
            counterparty_id: UserID::from("ravi"),
            price: dec!(100),
            quantity: 50,
            message: Some("Can close within a week".to_string()),
        })
        .await?
    {
        Reply::BidPlaced { bid_id } => bid_id,
        other => anyhow::bail!("unexpected reply {:?}", other),
    };
    rival
        .request(&Request::PlaceBid {
            listing_id: listing_id.clone(),
            counterparty_id: UserID::from("meera"),
            price: dec!(95),
            quantity: 25,
            message: None,
        })
        .await?;
    println!("   ✅ Two bids placed; following {}\n", bid_id);

    banner("Negotiation");
    for (client, role, price) in [
        (&mut seller, Side::Seller, dec!(110)),
        (&mut buyer, Side::Buyer, dec!(105)),
    ] {
        client
            .request(&Request::Counter {
                bid_id: bid_id.clone(),
                role,
                price,
                quantity: 50,
                message: None,
                expected_version: None,
            })
            .await?;
        println!("   💬 {} countered at {}", role, price);
    }

    for viewer in [Side::Buyer, Side::Seller] {
        if let Reply::NegotiationView { view } = seller
            .request(&Request::NegotiationView {
                bid_id: bid_id.clone(),
                viewer,
            })
            .await?
        {
            println!("   👁  {} sees the latest terms at {}", viewer, view.current_price);
        }
    }
    println!();

    banner("Acceptance");
    seller
        .request(&Request::Accept {
            bid_id: bid_id.clone(),
            role: Side::Seller,
            expected_version: None,
        })
        .await?;
    let deal_id = match buyer
        .request(&Request::Confirm {
            bid_id: bid_id.clone(),
            role: Side::Buyer,
            expected_version: None,
        })
        .await?
    {
        Reply::Outcome { outcome } => match outcome.deal_id {
            Some(deal_id) => deal_id,
            None => anyhow::bail!("confirmation did not produce a deal"),
        },
        other => anyhow::bail!("unexpected reply {:?}", other),
    };
    println!("   ✅ Deal {} created\n", deal_id);

    banner("Settlement");
    for (client, viewer) in [
        (&mut buyer, DealViewer::Buyer),
        (&mut seller, DealViewer::Seller),
    ] {
        if let Reply::Deal { view } = client
            .request(&Request::DealView {
                deal_id: deal_id.clone(),
                viewer,
            })
            .await?
        {
            println!(
                "   🧾 {:?}: {} x {} = {}",
                viewer, view.price_per_share, view.quantity, view.amount
            );
        }
    }

    for stage in [
        DealStatus::RmContacted,
        DealStatus::DocumentsPending,
        DealStatus::PaymentPending,
        DealStatus::Completed,
    ] {
        seller
            .request(&Request::MarkDealStage {
                deal_id: deal_id.clone(),
                stage,
                notes: None,
            })
            .await?;
        println!("   📌 Deal moved to {}", stage);
    }

    println!("\n✅ Demo complete");
    Ok(())
}
