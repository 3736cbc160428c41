//! Replays the relationships of a create/update payload as relationship writes
//! inside the parent's transaction.

use crate::action::Ctx;
use crate::config::{Action, Scope};
use crate::error::ApiError;
use crate::handlers::{has_many, has_one};
use crate::model::parse_linkage;
use crate::resource::ResourceDef;
use crate::store::Persistence;
use serde_json::Value;

/// Runs each relationship of `relationships`, in payload order, as the parent action.
///
/// To-one data grafts or prunes. To-many data merges under `create` and replaces
/// under `update`. The first failure aborts with [`ApiError::Sideload`] carrying the
/// sub-dispatch's status and errors; the caller's transaction then rolls back.
pub async fn dispatch_relationship_requests<P: Persistence>(
    ctx: &Ctx<P>,
    def: &ResourceDef<P>,
    relationships: &[(String, Value)],
    acting_as: Action,
) -> Result<(), ApiError> {
    for (name, body) in relationships {
        tracing::debug!(resource = %def.name, relationship = %name, acting_as = %acting_as, "sideload");
        if let Err(err) = dispatch(ctx, def, name, body, acting_as).await {
            let status = err.status();
            tracing::debug!(relationship = %name, status = status.as_u16(), "sideload failed");
            return Err(match err {
                ApiError::Sideload { .. } => err,
                other => ApiError::Sideload {
                    status,
                    errors: other.error_objects(),
                },
            });
        }
    }
    Ok(())
}

async fn dispatch<P: Persistence>(
    ctx: &Ctx<P>,
    def: &ResourceDef<P>,
    name: &str,
    body: &Value,
    acting_as: Action,
) -> Result<(), ApiError> {
    let rel = def
        .relationship(name)
        .ok_or_else(|| ApiError::not_found(format!("Unknown relationship `{name}' on `{}'", def.path)))?;
    let sub = ctx.sideload(rel.scope, &rel.name, body.clone(), acting_as);
    let linkage = parse_linkage(body)?;
    match rel.scope {
        Scope::HasOne => {
            has_one::write(&sub, rel, linkage).await?;
        }
        _ => {
            let ids = has_many::identifiers(rel, linkage)?;
            if acting_as == Action::Create {
                has_many::merge(&sub, rel, ids).await?;
            } else {
                has_many::replace(&sub, rel, ids).await?;
            }
        }
    }
    Ok(())
}
