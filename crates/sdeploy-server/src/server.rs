use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use sdeploy_store::ReleaseResolver;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::HandlerChain;
use crate::proxy::StreamingProxy;
use crate::redirect::RedirectHandler;
use crate::router::{build_redirect_router, build_router};
use crate::static_site::StaticSite;
use crate::tls::load_server_config;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTPS front end: the API proxy (when configured) followed by the static
/// site of the active release.
pub struct DeployServer {
    config: ServerConfig,
    chain: HandlerChain,
    shutdown: CancellationToken,
}

impl DeployServer {
    pub fn new(
        config: ServerConfig,
        releases: Arc<dyn ReleaseResolver>,
        shutdown: CancellationToken,
    ) -> ServerResult<Self> {
        let mut chain = HandlerChain::new();
        if let Some(settings) = &config.proxy {
            let proxy = StreamingProxy::new(settings, shutdown.clone())?;
            tracing::info!(prefix = %settings.path_prefix, origin = %proxy.origin(), "API proxy enabled");
            chain.push(Arc::new(proxy));
        }
        chain.push(Arc::new(StaticSite::new(releases)));
        Ok(Self { config, chain, shutdown })
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.chain.clone())
    }

    /// Bind the configured HTTPS address and serve until shutdown.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.https_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve TLS connections from `listener` until the shutdown token fires,
    /// then give open connections the grace period to finish.
    pub async fn serve_on(self, listener: TcpListener) -> ServerResult<()> {
        let acceptor = TlsAcceptor::from(load_server_config(&self.config.tls)?);
        let app = self.router();
        let grace = self.config.shutdown_grace();
        let tracker = TaskTracker::new();

        tracing::info!(addr = %listener.local_addr()?, handlers = ?self.chain.names(), "HTTPS listening");

        loop {
            let (tcp, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };
            tracker.spawn(serve_connection(
                tcp,
                peer,
                acceptor.clone(),
                app.clone(),
                self.shutdown.clone(),
                grace,
            ));
        }

        drop(listener);
        tracker.close();
        tracing::info!(open = tracker.len(), "HTTPS listener closed, draining connections");
        if tokio::time::timeout(grace + Duration::from_secs(1), tracker.wait()).await.is_err() {
            tracing::warn!("connections still open after grace period");
        }
        Ok(())
    }
}

async fn serve_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    app: axum::Router,
    shutdown: CancellationToken,
    grace: Duration,
) {
    let handshake = tokio::select! {
        _ = shutdown.cancelled() => return,
        result = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp)) => result,
    };
    let stream = match handshake {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(%peer, "TLS handshake timed out");
            return;
        }
    };

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(app));
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
        }
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            match tokio::time::timeout(grace, conn.as_mut()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(%peer, error = %e, "connection closed with error"),
                Err(_) => tracing::debug!(%peer, "connection dropped after grace period"),
            }
        }
    }
}

/// Run the plain-HTTP redirect listener until shutdown.
pub async fn serve_redirect(
    addr: SocketAddr,
    redirect: RedirectHandler,
    shutdown: CancellationToken,
) -> ServerResult<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP redirect listening");
    axum::serve(listener, build_redirect_router(redirect))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))
}
