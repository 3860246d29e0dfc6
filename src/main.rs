use clap::Parser;
use tracing_subscriber::EnvFilter;

use churnwatch::{config::Config, server};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("churnwatch=info,tower_http=info")),
        )
        .init();

    if let Err(err) = server::run(config).await {
        tracing::error!("Error: {:#}", err);
        std::process::exit(1);
    }
}
