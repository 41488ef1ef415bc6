//! HTTP surface
//!
//! The server is headless except for three small things: a readiness
//! probe, the bunq OAuth routes (mounted by the caller) and an opaque
//! `/graphql/` endpoint served by the read-model deployment in front of
//! this process; here it only answers that it is not this binary's job.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

pub fn health_router() -> Router {
    Router::new().route("/health/ready", get(|| async { "OK" }))
}

pub fn graphql_router() -> Router {
    Router::new().route(
        "/graphql/",
        post(|| async {
            (
                StatusCode::NOT_IMPLEMENTED,
                "the GraphQL read model is served by a separate deployment",
            )
        }),
    )
}
