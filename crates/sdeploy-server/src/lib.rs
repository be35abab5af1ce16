//! HTTPS front end for sdeploy.
//!
//! Serves the active release of a [`sdeploy_store::ReleaseStore`] over TLS,
//! optionally forwarding an API prefix to a local backend with streaming
//! support, and optionally redirecting plain HTTP to HTTPS.

pub mod config;
pub mod error;
pub mod handler;
pub mod headers;
pub mod proxy;
pub mod redirect;
pub mod router;
pub mod server;
pub mod static_site;
pub mod tls;

pub use config::{ProxyConfig, RedirectConfig, ServerConfig, TlsConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerChain, RequestHandler};
pub use proxy::StreamingProxy;
pub use redirect::RedirectHandler;
pub use server::{serve_redirect, DeployServer};
pub use static_site::StaticSite;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use sdeploy_store::ReleaseStore;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    fn dist(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let dist = dir.join(name);
        fs::create_dir_all(dist.join("assets")).unwrap();
        fs::write(dist.join("index.html"), body).unwrap();
        fs::write(dist.join("assets/app.js"), "console.log('app')").unwrap();
        dist
    }

    fn app(store: Arc<ReleaseStore>) -> axum::Router {
        DeployServer::new(ServerConfig::default(), store, CancellationToken::new())
            .unwrap()
            .router()
    }

    async fn get(app: &axum::Router, path: &str) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn no_active_release_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReleaseStore::open(dir.path().join(".sdeploy")).unwrap());
        let (status, headers, _) = get(&app(store), "/").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers["x-frame-options"], "DENY");
    }

    #[tokio::test]
    async fn serves_active_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReleaseStore::open(dir.path().join(".sdeploy")).unwrap());
        store.create_release(&dist(dir.path(), "dist", "v1")).unwrap();
        let app = app(store);

        let (status, headers, body) = get(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "v1");
        assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
        assert_eq!(headers["content-security-policy"], crate::headers::CONTENT_SECURITY_POLICY);

        let (status, _, body) = get(&app, "/assets/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log('app')");

        let (status, _, body) = get(&app, "/dashboard/settings").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "v1");

        let (status, _, _) = get(&app, "/missing.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_cannot_reach_state_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReleaseStore::open(dir.path().join(".sdeploy")).unwrap());
        store.create_release(&dist(dir.path(), "dist", "v1")).unwrap();
        let app = app(store);
        for path in ["/../../state/current-release.json", "/%2e%2e/%2e%2e/state/deploy-history.json"] {
            let (status, _, body) = get(&app, path).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
            assert!(!body.contains("release"));
        }
    }

    #[tokio::test]
    async fn pointer_switch_and_rollback_take_effect_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReleaseStore::open(dir.path().join(".sdeploy")).unwrap());
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        store.create_release_at(&dist(dir.path(), "one", "v1"), t1).unwrap();
        let app = app(Arc::clone(&store));
        assert_eq!(get(&app, "/").await.2, "v1");

        store.create_release_at(&dist(dir.path(), "two", "v2"), t2).unwrap();
        assert_eq!(get(&app, "/").await.2, "v2");

        store.rollback(1).unwrap();
        assert_eq!(get(&app, "/").await.2, "v1");
    }

    #[tokio::test]
    async fn non_get_methods_are_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReleaseStore::open(dir.path().join(".sdeploy")).unwrap());
        store.create_release(&dist(dir.path(), "dist", "v1")).unwrap();
        let response = app(store)
            .oneshot(Request::builder().method("POST").uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn head_has_no_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReleaseStore::open(dir.path().join(".sdeploy")).unwrap());
        store.create_release(&dist(dir.path(), "dist", "v1")).unwrap();
        let response = app(store)
            .oneshot(Request::builder().method("HEAD").uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }
}
