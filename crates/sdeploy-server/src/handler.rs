use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// One stage of request routing.
///
/// The HTTPS listener consults its handlers in order and the first whose
/// `can_handle` accepts the request produces the response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    fn can_handle(&self, request: &Request) -> bool;

    async fn handle(&self, request: Request) -> Response;
}

/// Ordered list of handlers. Unmatched requests get a plain 404.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.push(handler);
        self
    }

    pub fn push(&mut self, handler: Arc<dyn RequestHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn select(&self, request: &Request) -> Option<&Arc<dyn RequestHandler>> {
        self.handlers.iter().find(|h| h.can_handle(request))
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        match self.select(&request) {
            Some(handler) => {
                tracing::trace!(handler = handler.name(), path = %request.uri().path(), "dispatch");
                handler.handle(request).await
            }
            None => not_found(),
        }
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain").field("handlers", &self.names()).finish()
    }
}

pub(crate) fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    struct Prefix(&'static str, &'static str);

    #[async_trait]
    impl RequestHandler for Prefix {
        fn name(&self) -> &'static str {
            self.1
        }

        fn can_handle(&self, request: &Request) -> bool {
            request.uri().path().starts_with(self.0)
        }

        async fn handle(&self, _request: Request) -> Response {
            (StatusCode::OK, self.1).into_response()
        }
    }

    fn request(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn first_match_wins() {
        let chain = HandlerChain::new()
            .with(Arc::new(Prefix("/api/", "api")))
            .with(Arc::new(Prefix("/", "site")));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.select(&request("/api/v1/x")).unwrap().name(), "api");
        assert_eq!(chain.select(&request("/about")).unwrap().name(), "site");
    }

    #[tokio::test]
    async fn unmatched_is_not_found() {
        let chain = HandlerChain::new().with(Arc::new(Prefix("/api/", "api")));
        let response = chain.dispatch(request("/index.html")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_chain() {
        let chain = HandlerChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.dispatch(request("/")).await.status(), StatusCode::NOT_FOUND);
    }
}
