//! Token Scout - multi-provider token discovery and scoring

use anyhow::Result;

use token_scout::adapters::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (API keys go here, not in the config file)
    dotenvy::dotenv().ok();

    let app = cli::init();
    cli::execute(app).await
}
