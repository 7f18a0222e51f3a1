//! Async client for the market server

use crate::error::{MarketError, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use super::protocol::{Reply, Request, Response};
use super::server::MAX_LINE_LENGTH;

/// One connection to a market server; requests are answered in order
pub struct MarketClient {
    lines: Framed<TcpStream, LinesCodec>,
}

impl MarketClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MarketError::Network(format!("cannot connect to {}: {}", addr, e)))?;
        Ok(Self {
            lines: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        })
    }

    /// Send a request and wait for its reply; error replies become
    /// [`MarketError::Remote`]
    pub async fn request(&mut self, request: &Request) -> Result<Reply> {
        self.lines
            .send(serde_json::to_string(request)?)
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        let line = self
            .lines
            .next()
            .await
            .ok_or_else(|| MarketError::Network("server closed the connection".to_string()))?
            .map_err(|e| MarketError::Network(e.to_string()))?;

        let response: Response = serde_json::from_str(&line)
            .map_err(|e| MarketError::Protocol(format!("malformed reply: {}", e)))?;
        response.into_result()
    }
}
