use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::{HeaderValue, LOCATION};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::handler::RequestHandler;

/// Answers every request with a permanent redirect to the HTTPS listener,
/// keeping method, path and query.
#[derive(Clone, Debug)]
pub struct RedirectHandler {
    public_host: String,
    https_port: u16,
}

impl RedirectHandler {
    pub fn new(public_host: impl Into<String>, https_port: u16) -> Self {
        Self { public_host: public_host.into(), https_port }
    }

    pub fn location(&self, path_and_query: &str) -> String {
        format!("https://{}:{}{}", self.public_host, self.https_port, path_and_query)
    }
}

#[async_trait]
impl RequestHandler for RedirectHandler {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn can_handle(&self, _request: &Request) -> bool {
        true
    }

    async fn handle(&self, request: Request) -> Response {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        match HeaderValue::from_str(&self.location(target)) {
            Ok(location) => (StatusCode::PERMANENT_REDIRECT, [(LOCATION, location)]).into_response(),
            Err(_) => StatusCode::BAD_REQUEST.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn keeps_path_and_query() {
        let handler = RedirectHandler::new("localhost", 5443);
        let request = Request::builder()
            .method("POST")
            .uri("/login?next=%2Fhome")
            .body(Body::empty())
            .unwrap();
        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "https://localhost:5443/login?next=%2Fhome");
    }

    #[test]
    fn location_for_root() {
        let handler = RedirectHandler::new("example.test", 8443);
        assert_eq!(handler.location("/"), "https://example.test:8443/");
    }
}
