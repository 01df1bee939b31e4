use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use dify_relay::config::Config;
use dify_relay::dify::DifyClient;
use dify_relay::server::{serve_on, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let state = AppState::new(DifyClient::new(
        config.dify_api_url.as_str(),
        config.dify_api_key.as_str(),
    ));

    let (_, server) = serve_on(config.listen_addr, state).await?;
    server.await?;

    Ok(())
}
