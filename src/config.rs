//! Engine configuration

use crate::error::{MarketError, Result};
use crate::negotiation::AcceptancePolicy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Shortest verification code the issuer will hand out
pub const MIN_CODE_LENGTH: usize = 6;

/// Upper bound on every configured time window (ten years)
pub const MAX_WINDOW: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Configuration for the negotiation and settlement engine
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Platform fee rate applied to counterparty prices (0.02 = 2%)
    pub fee_rate: Decimal,
    /// How mutual agreement is reached
    pub acceptance_policy: AcceptancePolicy,
    /// Idle time after which an open bid is swept to `expired`
    pub bid_ttl: Duration,
    /// Period of the expiry sweep
    pub sweep_interval: Duration,
    /// Length of each verification code
    pub code_length: usize,
    /// Only allow deals to move one stage forward at a time
    pub strict_deal_stages: bool,
    /// How long a listing boost lasts
    pub boost_duration: Duration,
    /// Address the request server binds to
    pub listen_addr: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.02),
            acceptance_policy: AcceptancePolicy::TwoPhase,
            bid_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            code_length: MIN_CODE_LENGTH,
            strict_deal_stages: false,
            boost_duration: Duration::from_secs(24 * 60 * 60),
            listen_addr: "127.0.0.1:9400".to_string(),
        }
    }
}

impl MarketConfig {
    /// Build a configuration from `MARKET_*` environment variables, falling back
    /// to defaults for anything unset
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            fee_rate: parse_var("MARKET_FEE_RATE", defaults.fee_rate)?,
            acceptance_policy: parse_var("MARKET_ACCEPTANCE_POLICY", defaults.acceptance_policy)?,
            bid_ttl: secs_var("MARKET_BID_TTL_SECS", defaults.bid_ttl)?,
            sweep_interval: secs_var("MARKET_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            code_length: parse_var("MARKET_CODE_LENGTH", defaults.code_length)?,
            strict_deal_stages: env::var("MARKET_STRICT_DEAL_STAGES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.strict_deal_stages),
            boost_duration: secs_var("MARKET_BOOST_SECS", defaults.boost_duration)?,
            listen_addr: env::var("MARKET_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err(MarketError::Configuration(format!(
                "fee rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        if self.code_length < MIN_CODE_LENGTH {
            return Err(MarketError::Configuration(format!(
                "verification codes must be at least {} characters, got {}",
                MIN_CODE_LENGTH, self.code_length
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(MarketError::Configuration(
                "sweep interval must be non-zero".to_string(),
            ));
        }
        for (name, window) in [
            ("bid TTL", self.bid_ttl),
            ("sweep interval", self.sweep_interval),
            ("boost duration", self.boost_duration),
        ] {
            if window > MAX_WINDOW {
                return Err(MarketError::Configuration(format!(
                    "{} of {}s exceeds the {}s limit",
                    name,
                    window.as_secs(),
                    MAX_WINDOW.as_secs()
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MarketError::Configuration(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}
