//! JSON:API routes for every declared resource.
//! One parameterized route per shape; handlers look the resource up by path segment.
//! Relationship paths go through a wildcard and are split by the handler.

use crate::handlers::{collection, member, relationship};
use crate::state::Engine;
use crate::store::Persistence;
use axum::{routing::any, Router};
use tower_http::limit::RequestBodyLimitLayer;

pub fn jsonapi_routes<P: Persistence>(engine: Engine<P>) -> Router {
    let limit = engine.settings().body_limit;
    Router::new()
        .route("/:resource", any(collection::<P>))
        .route("/:resource/:id", any(member::<P>))
        .route("/:resource/:id/*rest", any(relationship::<P>))
        .layer(RequestBodyLimitLayer::new(limit))
        .with_state(engine)
}
