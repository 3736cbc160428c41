//! `/{resource}/{id}/relationships/{rel}` (linkage) and `/{resource}/{id}/{rel}` (related resources).

use super::{authorized, has_many, has_one, not_implemented, resolve, unsupported_method, WriteOutcome};
use crate::action::{ActionArgs, Ctx, Options};
use crate::config::{Action, Scope};
use crate::error::ApiError;
use crate::extractors::JsonApiRequest;
use crate::model::{parse_linkage, Linkage};
use crate::resource::{RelationshipDef, ResourceDef};
use crate::response;
use crate::state::Engine;
use crate::store::Persistence;
use axum::{
    extract::{Path, State},
    http::Method,
    response::Response,
};

/// Which document a relationship path serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target<'a> {
    Linkage(&'a str),
    Related(&'a str),
}

fn parse_rest(rest: &str) -> Option<Target<'_>> {
    let rest = rest.trim_matches('/');
    match rest.split_once('/') {
        Some(("relationships", rel)) if !rel.is_empty() && !rel.contains('/') => Some(Target::Linkage(rel)),
        None if !rest.is_empty() && rest != "relationships" => Some(Target::Related(rest)),
        _ => None,
    }
}

pub async fn relationship<P: Persistence>(
    State(engine): State<Engine<P>>,
    Path((segment, id, rest)): Path<(String, String, String)>,
    req: Result<JsonApiRequest, ApiError>,
) -> Response {
    let result = async {
        let req = req?;
        let def = engine.resource_by_path(&segment)?;
        let target = parse_rest(&rest).ok_or_else(|| ApiError::not_found(format!("No route for `{rest}'")))?;
        let rel_path = match target {
            Target::Linkage(r) | Target::Related(r) => r,
        };
        let rel = def
            .relationship_by_path(rel_path)
            .ok_or_else(|| ApiError::not_found(format!("Unknown relationship `{rel_path}'")))?;
        let method = req.method.clone();
        let ctx = Ctx::new(engine.clone(), &def.name, req.headers, req.query, req.document);
        resolve(&ctx, def, &id).await?;
        if matches!(method, Method::HEAD | Method::OPTIONS) {
            return Ok(response::allow(&verbs(def, rel, target)));
        }
        let rel_ctx = ctx.for_relationship(rel.scope, &rel.name);
        match (target, method) {
            (Target::Related(_), Method::GET) => related(&rel_ctx, rel).await,
            (Target::Linkage(_), Method::GET) => show_linkage(&ctx, &rel_ctx, rel).await,
            (Target::Linkage(_), method) => {
                let outcome = write_linkage(&rel_ctx, rel, &method).await?;
                reply(&rel_ctx, def, rel, &id, outcome).await
            }
            (Target::Related(_), other) => Err(unsupported_method(&other)),
        }
    }
    .await;
    engine.respond(result)
}

fn verbs<P: Persistence>(def: &ResourceDef<P>, rel: &RelationshipDef<P>, target: Target<'_>) -> Vec<&'static str> {
    let read = match rel.scope {
        Scope::HasOne => Action::Pluck,
        _ => Action::Fetch,
    };
    let Target::Linkage(_) = target else {
        return if rel.implements(read) { vec!["GET"] } else { Vec::new() };
    };
    let mut verbs = Vec::new();
    if def.implements(Action::Show) {
        verbs.push("GET");
    }
    match rel.scope {
        Scope::HasOne => {
            if rel.implements(Action::Prune) || rel.implements(Action::Graft) {
                verbs.push("PATCH");
            }
        }
        _ => {
            if rel.implements(Action::Clear) || rel.implements(Action::Replace) {
                verbs.push("PATCH");
            }
            if rel.implements(Action::Merge) {
                verbs.push("POST");
            }
            if rel.implements(Action::Subtract) {
                verbs.push("DELETE");
            }
        }
    }
    verbs
}

async fn write_linkage<P: Persistence>(
    ctx: &Ctx<P>,
    rel: &RelationshipDef<P>,
    method: &Method,
) -> Result<WriteOutcome, ApiError> {
    match (rel.scope, method) {
        (Scope::HasOne, &Method::PATCH) => {
            let linkage = parse_linkage(ctx.document())?;
            has_one::write(ctx, rel, linkage).await
        }
        (Scope::HasMany, &Method::PATCH) => {
            let ids = has_many::identifiers(rel, parse_linkage(ctx.document())?)?;
            has_many::replace(ctx, rel, ids).await
        }
        (Scope::HasMany, &Method::POST) => {
            let ids = has_many::identifiers(rel, parse_linkage(ctx.document())?)?;
            has_many::merge(ctx, rel, ids).await
        }
        (Scope::HasMany, &Method::DELETE) => {
            let ids = has_many::identifiers(rel, parse_linkage(ctx.document())?)?;
            has_many::subtract(ctx, rel, ids).await
        }
        _ => Err(unsupported_method(method)),
    }
}

/// Linkage read through `pluck`/`fetch`, when the caller may run it.
async fn derive_linkage<P: Persistence>(
    ctx: &Ctx<P>,
    rel: &RelationshipDef<P>,
) -> Result<Option<(Linkage, Options)>, ApiError> {
    let read = match rel.scope {
        Scope::HasOne => Action::Pluck,
        _ => Action::Fetch,
    };
    let Some(bound) = rel.bound(read) else {
        return Ok(None);
    };
    if !ctx.can(read).await? {
        return Ok(None);
    }
    let found = bound.invoke(ctx, ActionArgs::None).await?;
    let linkage = match rel.scope {
        Scope::HasOne => {
            let (model, options) = found.into_model(0);
            (Linkage::One(model.map(|m| m.identifier())), options)
        }
        _ => {
            let (models, options) = found.into_collection(0);
            (Linkage::Many(models.iter().map(|m| m.identifier()).collect()), options)
        }
    };
    Ok(Some(linkage))
}

/// `GET .../relationships/{rel}`: needs `show` on the parent.
async fn show_linkage<P: Persistence>(
    ctx: &Ctx<P>,
    rel_ctx: &Ctx<P>,
    rel: &RelationshipDef<P>,
) -> Result<Response, ApiError> {
    ctx.ensure_can(Action::Show).await?;
    let parent = ctx
        .resource()
        .ok_or_else(|| ApiError::not_found("Parent resource not found"))?;
    let (linkage, options) = match parent.linkage(&rel.name) {
        Some(linkage) => (linkage.clone(), Options::default()),
        None => derive_linkage(rel_ctx, rel)
            .await?
            .ok_or_else(|| not_implemented(Action::Show))?,
    };
    let body = ctx
        .engine()
        .render_linkage(&parent.identifier(), &rel.name, &linkage, options);
    Ok(response::ok(body))
}

/// Answer to a top-level relationship write: linkage when updated, else meta or 204.
/// Without linkage from the helper, the parent is reloaded and asked again.
async fn reply<P: Persistence>(
    ctx: &Ctx<P>,
    def: &ResourceDef<P>,
    rel: &RelationshipDef<P>,
    id: &str,
    outcome: WriteOutcome,
) -> Result<Response, ApiError> {
    let engine = ctx.engine();
    if outcome.updated {
        let found = match outcome.linkage {
            Some(linkage) => Some((linkage, Options::default())),
            None => {
                resolve(ctx, def, id).await?;
                let stored = ctx.resource().and_then(|p| p.linkage(&rel.name).cloned());
                match stored {
                    Some(linkage) => Some((linkage, Options::default())),
                    None => derive_linkage(ctx, rel).await?,
                }
            }
        };
        if let Some((linkage, read_options)) = found {
            let parent = ctx
                .resource()
                .ok_or_else(|| ApiError::not_found("Parent resource not found"))?;
            let options = read_options.merge(outcome.options);
            let body = engine.render_linkage(&parent.identifier(), &rel.name, &linkage, options);
            return Ok(response::ok(body));
        }
    }
    if outcome.options.meta.is_some() {
        let body = engine.render_model(ctx, ctx.resource_name(), None, outcome.options).await?;
        return Ok(response::ok(body));
    }
    Ok(response::no_content())
}

/// `GET /{resource}/{id}/{rel}`: the related resource(s) in full.
async fn related<P: Persistence>(ctx: &Ctx<P>, rel: &RelationshipDef<P>) -> Result<Response, ApiError> {
    let engine = ctx.engine();
    let related_type = rel.related_type.as_deref().unwrap_or_default();
    match rel.scope {
        Scope::HasOne => {
            let bound = authorized(ctx, Action::Pluck, rel.bound(Action::Pluck)).await?;
            let (model, options) = bound.invoke(ctx, ActionArgs::None).await?.into_model(0);
            let body = engine.render_model(ctx, related_type, model.as_ref(), options).await?;
            Ok(response::ok(body))
        }
        _ => {
            let bound = authorized(ctx, Action::Fetch, rel.bound(Action::Fetch)).await?;
            ctx.query()
                .check_whitelists(Action::Fetch, ctx.action_config(Action::Fetch)?)?;
            let page = ctx.query().page_request(engine.settings())?;
            let (models, options) = bound.invoke(ctx, ActionArgs::None).await?.into_collection(0);
            let self_path = match ctx.resource() {
                Some(parent) => engine.href(&format!(
                    "/{}/{}/{}",
                    crate::case::dasherize(&parent.kind),
                    parent.id,
                    rel.path
                )),
                None => engine.href(&format!("/{}", rel.path)),
            };
            let (models, links) = ctx.query().filter_sort_page(models, page, &self_path);
            let options = options.merge(Options {
                links,
                ..Default::default()
            });
            let body = engine.render_models(ctx, related_type, &models, options).await?;
            Ok(response::ok(body))
        }
    }
}
