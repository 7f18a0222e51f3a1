//! Market application wiring configuration, engine, server and sweeper

use crate::config::MarketConfig;
use crate::error::Result;
use crate::listing::Listing;
use crate::negotiation::{NegotiationEngine, NegotiationView};
use crate::notify::LogNotifier;
use crate::pricing::PricingTranslator;
use crate::server::{spawn_expiry_sweeper, MarketServer};
use crate::settlement::{DealStatus, DealViewer};
use crate::store::InMemoryMarketStore;
use crate::types::{Direction, Side, UserID};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// Main market application
#[derive(Clone)]
pub struct MarketApp {
    config: MarketConfig,
    engine: NegotiationEngine,
}

impl MarketApp {
    /// Create the application over an in-memory store
    pub fn new(config: MarketConfig) -> Result<Self> {
        let engine = NegotiationEngine::new(
            &config,
            Arc::new(InMemoryMarketStore::new()),
            Arc::new(LogNotifier),
        )?;
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    /// Bind the server, start the expiry sweeper and serve until stopped
    pub async fn serve(&self) -> Result<()> {
        let server = MarketServer::bind(&self.config.listen_addr, self.engine.clone()).await?;
        let sweeper = spawn_expiry_sweeper(self.engine.clone(), self.config.sweep_interval);

        tracing::info!(
            fee_rate = %self.config.fee_rate,
            policy = ?self.config.acceptance_policy,
            "Market server starting"
        );
        let result = server.run().await;
        sweeper.abort();
        result
    }

    /// Walk one listing through a full negotiation and settlement, logging each
    /// step as both sides see it
    pub fn run_demo(&self) -> Result<()> {
        let engine = &self.engine;
        let seller = UserID::from("seller_demo");

        let listing = Listing::new(
            Direction::Sell,
            seller,
            "Acme Unlisted Pvt Ltd",
            dec!(110),
            500,
            25,
        )?;
        let listing_id = engine.register_listing(listing)?;

        let bid_id = engine.place_bid_with_message(
            &listing_id,
            UserID::from("buyer_demo"),
            dec!(100),
            50,
            Some("Can close within a week".to_string()),
        )?;
        let rival = engine.place_bid(&listing_id, UserID::from("buyer_rival"), dec!(95), 25)?;
        log_view(&engine.negotiation_view(&bid_id, Side::Seller)?);

        engine.counter(&bid_id, Side::Seller, dec!(110), 50, Some("Best I can do".to_string()))?;
        log_view(&engine.negotiation_view(&bid_id, Side::Buyer)?);

        engine.counter(&bid_id, Side::Buyer, dec!(105), 50, None)?;
        engine.accept(&bid_id, Side::Seller)?;
        let outcome = engine.confirm(&bid_id, Side::Buyer)?;
        tracing::info!("Bid {} is {}; rival bid {} cancelled", bid_id, outcome.status, rival);

        let deal = engine.settle(&bid_id)?;
        for viewer in [DealViewer::Buyer, DealViewer::Seller] {
            let view = engine.deal_view(&deal.id, viewer)?;
            tracing::info!(
                "{:?} sees {} x {} = {} (code {:?}, RM code {})",
                viewer,
                view.price_per_share,
                view.quantity,
                view.amount,
                view.buyer_code.or(view.seller_code),
                view.rm_code
            );
        }

        let mut deal =
            engine.mark_deal_contacted(&deal.id, Some("Both parties reached by phone".to_string()))?;
        for stage in [
            DealStatus::DocumentsPending,
            DealStatus::PaymentPending,
            DealStatus::Completed,
        ] {
            deal = engine.mark_deal_stage(&deal.id, stage, None)?;
        }
        tracing::info!("Deal {} finished as {}", deal.id, deal.status);
        Ok(())
    }

    /// Print how `price` entered by `author` is shown to each side
    pub fn price_table(&self, price: Decimal, author: Side, fee_rate: Option<Decimal>) -> Result<()> {
        let pricing = PricingTranslator::new(fee_rate.unwrap_or(self.config.fee_rate))?;
        PricingTranslator::validate_price(price)?;
        for viewer in [Side::Buyer, Side::Seller] {
            println!(
                "{:<6} sees {}",
                viewer.to_string(),
                pricing.visible_price(price, author, viewer)?.normalize()
            );
        }
        Ok(())
    }
}

fn log_view(view: &NegotiationView) {
    for entry in &view.entries {
        tracing::info!(
            "[{} view] round {} by {}: {} x {}{}",
            view.viewer,
            entry.round,
            entry.authored_by,
            entry.price,
            entry.quantity,
            if entry.own { " (yours)" } else { "" }
        );
    }
}
