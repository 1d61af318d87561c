use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use palaver::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ServerConfig::from_args(env::args().skip(1)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.message());
            eprintln!("usage: palaver [-port <port>] [-log-level <debug|info|warn|error>]");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!(port = %config.port, "starting chat server");

    let server = ChatServer::new(config);
    server.run().await?;

    Ok(())
}
