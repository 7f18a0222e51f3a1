//! Unlisted share market binary

use clap::Parser;
use unlisted_market::cli::{Cli, Commands, MarketApp};
use unlisted_market::config::MarketConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = MarketConfig::from_env()?;

    match cli.command {
        Commands::Serve {
            listen,
            fee_rate,
            policy,
            strict_deal_stages,
        } => {
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(fee_rate) = fee_rate {
                config.fee_rate = fee_rate;
            }
            if let Some(policy) = policy {
                config.acceptance_policy = policy.into();
            }
            config.strict_deal_stages |= strict_deal_stages;
            config.validate()?;

            tracing::info!("Starting market server on {}", config.listen_addr);
            let app = MarketApp::new(config)?;

            tokio::select! {
                result = app.serve() => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                }
            }
        }

        Commands::Demo => {
            let app = MarketApp::new(config)?;
            app.run_demo()?;
        }

        Commands::Price {
            price,
            author,
            fee_rate,
        } => {
            let app = MarketApp::new(config)?;
            app.price_table(price, author.into(), fee_rate)?;
        }
    }

    Ok(())
}
