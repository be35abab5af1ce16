use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::handler::HandlerChain;
use crate::headers::apply_security_headers;
use crate::redirect::RedirectHandler;

/// Router for the HTTPS listener: every request goes through `chain`, and
/// every response carries the security headers.
pub fn build_router(chain: HandlerChain) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(Arc::new(chain))
        .layer(middleware::map_response(apply_security_headers))
        .layer(TraceLayer::new_for_http())
}

/// Router for the plain-HTTP listener.
pub fn build_redirect_router(redirect: RedirectHandler) -> Router {
    let chain = HandlerChain::new().with(Arc::new(redirect));
    Router::new()
        .fallback(dispatch)
        .with_state(Arc::new(chain))
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(State(chain): State<Arc<HandlerChain>>, request: Request) -> Response {
    chain.dispatch(request).await
}
