use crate::{Result, Server};
use rmcp::transport::{
    StreamableHttpService, streamable_http_server::session::local::LocalSessionManager,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Mounts the streamable HTTP endpoint at `path`. Every MCP session gets its
/// own clone of `server`, so the token cache is shared between sessions.
pub fn router(server: Server, path: &str) -> axum::Router {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    match path.trim_end_matches('/') {
        "" => axum::Router::new().fallback_service(service),
        path => axum::Router::new().nest_service(path, service),
    }
}

/// Serves `router` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
