//! Request/response surface over TCP

pub mod client;
pub mod protocol;
pub mod server;

pub use client::MarketClient;
pub use protocol::{Reply, Request, Response};
pub use server::{dispatch, spawn_expiry_sweeper, MarketServer};
