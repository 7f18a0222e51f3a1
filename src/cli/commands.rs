//! CLI command definitions

use crate::negotiation::AcceptancePolicy;
use crate::types::Side;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(name = "unlisted-market")]
#[command(about = "Negotiation and settlement engine for unlisted share trades", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the market server
    Serve {
        /// Address to listen on (overrides MARKET_LISTEN_ADDR)
        #[arg(short, long)]
        listen: Option<String>,

        /// Platform fee rate, e.g. 0.02 (overrides MARKET_FEE_RATE)
        #[arg(short, long)]
        fee_rate: Option<Decimal>,

        /// Acceptance policy (overrides MARKET_ACCEPTANCE_POLICY)
        #[arg(short, long, value_enum)]
        policy: Option<PolicyArg>,

        /// Only allow deals to advance one stage at a time
        #[arg(long)]
        strict_deal_stages: bool,
    },

    /// Run a scripted negotiation against an in-process engine
    Demo,

    /// Show how a price is presented to each side
    Price {
        /// Raw price as entered by its author
        price: Decimal,

        /// Side that entered the price
        #[arg(short, long, value_enum)]
        author: RoleArg,

        /// Fee rate to apply (defaults to the configured rate)
        #[arg(short, long)]
        fee_rate: Option<Decimal>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleArg {
    Buyer,
    Seller,
}

impl From<RoleArg> for Side {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Buyer => Side::Buyer,
            RoleArg::Seller => Side::Seller,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyArg {
    TwoPhase,
    Immediate,
}

impl From<PolicyArg> for AcceptancePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::TwoPhase => AcceptancePolicy::TwoPhase,
            PolicyArg::Immediate => AcceptancePolicy::Immediate,
        }
    }
}
