//! Session metrics: the periodic collector and the WebSocket hub it
//! feeds

pub mod collector;
pub mod hub;

use axum::{body::Body, http::Request, middleware::Next, response::Response};

/// Count every HTTP request passing through the router
pub async fn track_requests(req: Request<Body>, next: Next) -> Response {
    metrics::counter!("auth.http.requests").increment(1);
    next.run(req).await
}
