//! HTTP handlers for resource, relationship and related-resource routes.

pub mod has_many;
pub mod has_one;
pub mod relationship;
pub mod resource;

pub use relationship::relationship;
pub use resource::{collection, member};

use crate::action::{ActionArgs, BoundAction, Ctx, Normalized, Options};
use crate::config::Action;
use crate::error::ApiError;
use crate::model::Linkage;
use crate::resource::ResourceDef;
use crate::store::Persistence;
use axum::http::Method;

/// Result of a relationship write, before any response is rendered.
/// Sideloads only look at `updated`.
#[derive(Debug, Default)]
pub(crate) struct WriteOutcome {
    pub updated: bool,
    /// Linkage to answer with, when the write could tell.
    pub linkage: Option<Linkage>,
    pub options: Options,
}

pub(crate) fn not_implemented(action: Action) -> ApiError {
    ApiError::MethodNotAllowed(format!("Action `{action}' is not implemented on this route"))
}

pub(crate) fn unsupported_method(method: &Method) -> ApiError {
    ApiError::MethodNotAllowed(format!("{method} is not supported on this route"))
}

/// Authorization first, then implementation.
pub(crate) async fn authorized<'a, P: Persistence>(
    ctx: &Ctx<P>,
    action: Action,
    bound: Option<&'a BoundAction<P>>,
) -> Result<&'a BoundAction<P>, ApiError> {
    ctx.ensure_can(action).await?;
    bound.ok_or_else(|| not_implemented(action))
}

/// Runs a mutating helper in the request transaction.
pub(crate) async fn run_write<P: Persistence>(
    ctx: &Ctx<P>,
    bound: &BoundAction<P>,
    args: ActionArgs,
) -> Result<Normalized, ApiError> {
    ctx.engine()
        .transaction(ctx, bound.action, || bound.invoke(ctx, args))
        .await
}

/// Loads the resource named by a member path and pins it on the context.
pub(crate) async fn resolve<P: Persistence>(
    ctx: &Ctx<P>,
    def: &ResourceDef<P>,
    id: &str,
) -> Result<Normalized, ApiError> {
    let missing = || ApiError::not_found(format!("Resource `{}/{}' not found", def.path, id));
    if !def.id_matches(id) {
        return Err(missing());
    }
    let resolver = def.resolver().ok_or_else(|| not_implemented(Action::Show))?;
    let found = resolver.invoke(ctx, ActionArgs::Id(id.to_string())).await?;
    let Some(model) = found.model(0) else {
        return Err(missing());
    };
    ctx.set_resource(Some(model.clone()));
    Ok(found)
}
