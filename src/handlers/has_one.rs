//! To-one relationship writes: `prune` on null linkage, `graft` otherwise.

use super::{authorized, run_write, WriteOutcome};
use crate::action::{ActionArgs, Ctx};
use crate::config::Action;
use crate::error::ApiError;
use crate::model::Linkage;
use crate::resource::RelationshipDef;
use crate::store::Persistence;

pub(crate) async fn write<P: Persistence>(
    ctx: &Ctx<P>,
    rel: &RelationshipDef<P>,
    linkage: Linkage,
) -> Result<WriteOutcome, ApiError> {
    let (action, args) = match &linkage {
        Linkage::One(None) => (Action::Prune, ActionArgs::None),
        Linkage::One(Some(rio)) => (Action::Graft, ActionArgs::Identifier(rio.clone())),
        Linkage::Many(_) => {
            return Err(ApiError::bad_request(format!(
                "Relationship `{}' is to-one; data must be null or a resource identifier",
                rel.path
            )))
        }
    };
    let bound = authorized(ctx, action, rel.bound(action)).await?;
    let written = run_write(ctx, bound, args).await?;
    let updated = written.flag(0);
    let linkage = written
        .model(0)
        .and_then(|m| m.linkage(&rel.name))
        .cloned()
        .or(Some(linkage));
    Ok(WriteOutcome {
        updated,
        linkage,
        options: written.options,
    })
}
