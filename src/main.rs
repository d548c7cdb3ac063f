use anyhow::Context;
use gcal_mcp::{Config, Server, Transport, transport};
use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol under the stdio transport, so logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    tracing::debug!(?config, "loaded configuration");

    let server = Server::new(&config)?;

    match config.transport {
        Transport::Stdio => {
            tracing::info!("serving MCP over stdio");
            let service = server.serve(stdio()).await?;
            service.waiting().await?;
        }
        Transport::Http => {
            let address = config.bind_address();
            let listener = TcpListener::bind(&address)
                .await
                .with_context(|| format!("failed to bind {address}"))?;
            tracing::info!(
                address = %listener.local_addr()?,
                path = %config.path,
                "serving MCP over streamable HTTP"
            );

            let shutdown = CancellationToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            tracing::info!("received interrupt, shutting down");
                            shutdown.cancel();
                        }
                        Err(err) => tracing::warn!("unable to listen for interrupt: {err}"),
                    }
                }
            });

            transport::serve(listener, transport::router(server, &config.path), shutdown).await?;
        }
    }

    Ok(())
}
