//! JSON-lines TCP server in front of the negotiation engine

use crate::error::{MarketError, Result};
use crate::listing::Listing;
use crate::negotiation::{ActionOutcome, BidCommand, NegotiationEngine};
use crate::settlement::DealViewer;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};

use super::protocol::{Reply, Request, Response};

/// Longest request line accepted from a client
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Accepts connections and answers one response per request line
pub struct MarketServer {
    engine: NegotiationEngine,
    listener: TcpListener,
}

impl MarketServer {
    /// Bind the listening socket
    pub async fn bind(addr: &str, engine: NegotiationEngine) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MarketError::Network(format!("cannot bind {}: {}", addr, e)))?;
        Ok(Self { engine, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        tracing::info!("Market server listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::info!("New connection from {}", addr);
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(engine, stream).await {
                            tracing::debug!("Connection {} ended: {}", addr, e);
                        } else {
                            tracing::debug!("Connection {} closed", addr);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn serve_connection(engine: NegotiationEngine, stream: TcpStream) -> Result<()> {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        let line = line.map_err(|e| MarketError::Network(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let op = request.op();
                let result = dispatch(&engine, request);
                if let Err(e) = &result {
                    tracing::debug!(op, code = e.code(), "Request failed: {}", e);
                }
                Response::from(result)
            }
            Err(e) => Response::error(&MarketError::Protocol(format!("malformed request: {}", e))),
        };

        let encoded = serde_json::to_string(&response)?;
        lines
            .send(encoded)
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;
    }
    Ok(())
}

/// Route one request to the engine
pub fn dispatch(engine: &NegotiationEngine, request: Request) -> Result<Reply> {
    match request {
        Request::RegisterListing {
            direction,
            owner_id,
            company_ref,
            price,
            quantity,
            min_lot,
        } => {
            let listing = Listing::new(direction, owner_id, company_ref, price, quantity, min_lot)?;
            let listing_id = engine.register_listing(listing)?;
            Ok(Reply::ListingRegistered { listing_id })
        }
        Request::GetListing { listing_id } => Ok(Reply::Listing {
            listing: engine.get_listing(&listing_id)?,
        }),
        Request::WithdrawListing {
            listing_id,
            owner_id,
            reason,
        } => Ok(Reply::ListingWithdrawn {
            cancelled: engine.withdraw_listing(&listing_id, &owner_id, reason)?,
        }),
        Request::BoostListing {
            listing_id,
            owner_id,
        } => Ok(Reply::ListingBoosted {
            until: engine.boost_listing(&listing_id, &owner_id)?,
        }),
        Request::PlaceBid {
            listing_id,
            counterparty_id,
            price,
            quantity,
            message,
        } => Ok(Reply::BidPlaced {
            bid_id: engine.place_bid_with_message(
                &listing_id,
                counterparty_id,
                price,
                quantity,
                message,
            )?,
        }),
        Request::Accept {
            bid_id,
            role,
            expected_version,
        } => outcome(engine.act(&bid_id, role, &BidCommand::Accept, expected_version)),
        Request::Reject {
            bid_id,
            role,
            expected_version,
        } => outcome(engine.act(&bid_id, role, &BidCommand::Reject, expected_version)),
        Request::Counter {
            bid_id,
            role,
            price,
            quantity,
            message,
            expected_version,
        } => {
            let command = BidCommand::Counter {
                price,
                quantity,
                message,
            };
            outcome(engine.act(&bid_id, role, &command, expected_version))
        }
        Request::Confirm {
            bid_id,
            role,
            expected_version,
        } => outcome(engine.act(&bid_id, role, &BidCommand::Confirm, expected_version)),
        Request::CancelBid { bid_id, role } => outcome(engine.cancel_bid(&bid_id, role)),
        Request::NegotiationView { bid_id, viewer } => Ok(Reply::NegotiationView {
            view: engine.negotiation_view(&bid_id, viewer)?,
        }),
        Request::Settle { bid_id } => {
            let deal = engine.settle(&bid_id)?;
            Ok(Reply::Settled {
                deal_id: deal.id,
                bid_id: deal.bid_id,
            })
        }
        Request::MarkDealStage {
            deal_id,
            stage,
            notes,
        } => {
            let deal = engine.mark_deal_stage(&deal_id, stage, notes)?;
            Ok(Reply::Deal {
                view: deal.view(DealViewer::RelationshipManager),
            })
        }
        Request::DealView { deal_id, viewer } => Ok(Reply::Deal {
            view: engine.deal_view(&deal_id, viewer)?,
        }),
        Request::VerifyCode {
            deal_id,
            holder,
            code,
        } => Ok(Reply::CodeChecked {
            valid: engine.verify_code(&deal_id, holder, &code)?,
        }),
    }
}

fn outcome(result: Result<ActionOutcome>) -> Result<Reply> {
    result.map(|outcome| Reply::Outcome { outcome })
}

/// Periodically expire idle bids
pub fn spawn_expiry_sweeper(engine: NegotiationEngine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.expire_stale(SystemTime::now()) {
                tracing::error!("Expiry sweep failed: {}", e);
            }
        }
    })
}
