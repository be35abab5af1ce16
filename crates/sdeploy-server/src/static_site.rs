//! Serves files from whichever release is active at the moment a request
//! arrives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use sdeploy_store::ReleaseResolver;
use tower::util::ServiceExt;
use tower_http::services::ServeFile;

use crate::handler::{not_found, RequestHandler};

const INDEX_FILE: &str = "index.html";

pub struct StaticSite {
    releases: Arc<dyn ReleaseResolver>,
}

impl StaticSite {
    pub fn new(releases: Arc<dyn ReleaseResolver>) -> Self {
        Self { releases }
    }
}

#[async_trait]
impl RequestHandler for StaticSite {
    fn name(&self) -> &'static str {
        "static"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(*request.method(), Method::GET | Method::HEAD)
    }

    async fn handle(&self, request: Request) -> Response {
        let Some(segments) = decode_segments(request.uri().path()) else {
            return not_found();
        };

        let releases = Arc::clone(&self.releases);
        let lookup = tokio::task::spawn_blocking(move || {
            releases
                .active_release_path()
                .map(|root| resolve_file(&root, &segments))
        })
        .await;

        let file = match lookup {
            Ok(Ok(Some(file))) => file,
            Ok(Ok(None)) => return not_found(),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "active release unavailable");
                return (StatusCode::SERVICE_UNAVAILABLE, "No active release").into_response();
            }
            Err(e) => {
                tracing::error!(error = %e, "release lookup task failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        match ServeFile::new(file).oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        }
    }
}

/// Split a request path into decoded segments, dropping empty and `.` parts.
///
/// `None` for anything that could step outside the release directory.
pub fn decode_segments(path: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    for raw in path.split('/') {
        let segment = urlencoding::decode(raw).ok()?;
        match segment.as_ref() {
            "" | "." => continue,
            ".." => return None,
            s if s.contains(['/', '\\', '\0']) => return None,
            s => segments.push(s.to_string()),
        }
    }
    Some(segments)
}

/// Map decoded segments to a file inside `root`.
///
/// Directories resolve to their `index.html`. Extensionless paths that match
/// nothing fall back to the root `index.html` so client-side routes load.
pub fn resolve_file(root: &Path, segments: &[String]) -> Option<PathBuf> {
    let target = segments.iter().fold(root.to_path_buf(), |p, s| p.join(s));
    if target.is_file() {
        return Some(target);
    }
    if target.is_dir() {
        let index = target.join(INDEX_FILE);
        if index.is_file() {
            return Some(index);
        }
    }
    match segments.last() {
        Some(last) if last.contains('.') => None,
        _ => {
            let index = root.join(INDEX_FILE);
            index.is_file().then_some(index)
        }
    }
}
