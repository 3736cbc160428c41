//! To-many relationship writes: `clear`, `replace`, `merge`, `subtract`.

use super::{authorized, not_implemented, run_write, WriteOutcome};
use crate::action::{ActionArgs, Ctx, Normalized};
use crate::config::Action;
use crate::error::ApiError;
use crate::model::{Identifier, Linkage};
use crate::resource::RelationshipDef;
use crate::store::Persistence;

/// Identifiers of a to-many relationship document.
pub(crate) fn identifiers<P: Persistence>(rel: &RelationshipDef<P>, linkage: Linkage) -> Result<Vec<Identifier>, ApiError> {
    match linkage {
        Linkage::Many(ids) => Ok(ids),
        Linkage::One(_) => Err(ApiError::bad_request(format!(
            "Relationship `{}' is to-many; data must be an array",
            rel.path
        ))),
    }
}

fn outcome<P: Persistence>(rel: &RelationshipDef<P>, written: Normalized) -> WriteOutcome {
    WriteOutcome {
        updated: written.flag(0),
        linkage: written.model(0).and_then(|m| m.linkage(&rel.name)).cloned(),
        options: written.options,
    }
}

/// PATCH: full replacement. An empty set clears; without a `replace` helper a
/// non-empty set is cleared then merged.
pub(crate) async fn replace<P: Persistence>(
    ctx: &Ctx<P>,
    rel: &RelationshipDef<P>,
    ids: Vec<Identifier>,
) -> Result<WriteOutcome, ApiError> {
    if ids.is_empty() && rel.implements(Action::Clear) {
        let bound = authorized(ctx, Action::Clear, rel.bound(Action::Clear)).await?;
        return Ok(outcome(rel, run_write(ctx, bound, ActionArgs::None).await?));
    }
    if let Some(bound) = rel.bound(Action::Replace) {
        ctx.ensure_can(Action::Replace).await?;
        return Ok(outcome(rel, run_write(ctx, bound, ActionArgs::Identifiers(ids)).await?));
    }
    let (Some(clear), Some(merge)) = (rel.bound(Action::Clear), rel.bound(Action::Merge)) else {
        ctx.ensure_can(Action::Replace).await?;
        return Err(not_implemented(Action::Replace));
    };
    ctx.ensure_can(Action::Clear).await?;
    ctx.ensure_can(Action::Merge).await?;
    let engine = ctx.engine();
    let (cleared, merged) = engine
        .transaction(ctx, Action::Replace, || async move {
            let cleared = clear.invoke(ctx, ActionArgs::None).await?;
            let merged = merge.invoke(ctx, ActionArgs::Identifiers(ids)).await?;
            Ok((cleared, merged))
        })
        .await?;
    let updated = cleared.flag(0) || merged.flag(0);
    let mut out = outcome(rel, merged);
    out.updated = updated;
    out.options = cleared.options.merge(out.options);
    Ok(out)
}

/// POST: add members.
pub(crate) async fn merge<P: Persistence>(
    ctx: &Ctx<P>,
    rel: &RelationshipDef<P>,
    ids: Vec<Identifier>,
) -> Result<WriteOutcome, ApiError> {
    let bound = authorized(ctx, Action::Merge, rel.bound(Action::Merge)).await?;
    Ok(outcome(rel, run_write(ctx, bound, ActionArgs::Identifiers(ids)).await?))
}

/// DELETE: remove members.
pub(crate) async fn subtract<P: Persistence>(
    ctx: &Ctx<P>,
    rel: &RelationshipDef<P>,
    ids: Vec<Identifier>,
) -> Result<WriteOutcome, ApiError> {
    let bound = authorized(ctx, Action::Subtract, rel.bound(Action::Subtract)).await?;
    Ok(outcome(rel, run_write(ctx, bound, ActionArgs::Identifiers(ids)).await?))
}
