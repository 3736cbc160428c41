//! Collection and member handlers: list, show, create, update, destroy.

use super::{authorized, not_implemented, resolve, run_write, unsupported_method};
use crate::action::{ActionArgs, Ctx, IdPolicy, Options};
use crate::case::dedasherize;
use crate::config::Action;
use crate::error::ApiError;
use crate::extractors::JsonApiRequest;
use crate::model::{Model, ResourceObject};
use crate::resource::ResourceDef;
use crate::response;
use crate::sideload::dispatch_relationship_requests;
use crate::state::Engine;
use crate::store::Persistence;
use axum::{
    extract::{Path, State},
    http::Method,
    response::Response,
};
use std::collections::BTreeSet;

/// `/{resource}`: GET lists, POST creates, HEAD/OPTIONS advertise.
pub async fn collection<P: Persistence>(
    State(engine): State<Engine<P>>,
    Path(segment): Path<String>,
    req: Result<JsonApiRequest, ApiError>,
) -> Response {
    let result = async {
        let req = req?;
        let def = engine.resource_by_path(&segment)?;
        let method = req.method.clone();
        let ctx = Ctx::new(engine.clone(), &def.name, req.headers, req.query, req.document);
        match method {
            Method::GET => list(&ctx, def).await,
            Method::POST => create(&ctx, def).await,
            Method::HEAD | Method::OPTIONS => Ok(response::allow(&collection_verbs(&ctx, def))),
            other => Err(unsupported_method(&other)),
        }
    }
    .await;
    engine.respond(result)
}

/// `/{resource}/{id}`: GET shows, PATCH updates, DELETE destroys.
pub async fn member<P: Persistence>(
    State(engine): State<Engine<P>>,
    Path((segment, id)): Path<(String, String)>,
    req: Result<JsonApiRequest, ApiError>,
) -> Response {
    let result = async {
        let req = req?;
        let def = engine.resource_by_path(&segment)?;
        let method = req.method.clone();
        let ctx = Ctx::new(engine.clone(), &def.name, req.headers, req.query, req.document);
        match method {
            Method::GET => show(&ctx, def, &id).await,
            Method::PATCH => update(&ctx, def, &id).await,
            Method::DELETE => destroy(&ctx, def, &id).await,
            Method::HEAD | Method::OPTIONS => {
                resolve(&ctx, def, &id).await?;
                Ok(response::allow(&member_verbs(def)))
            }
            other => Err(unsupported_method(&other)),
        }
    }
    .await;
    engine.respond(result)
}

fn collection_verbs<P: Persistence>(ctx: &Ctx<P>, def: &ResourceDef<P>) -> Vec<&'static str> {
    if ctx.query().ids_filter().is_some() {
        let readable = def.implements(Action::ShowMany) || def.implements(Action::Show);
        return if readable { vec!["GET"] } else { Vec::new() };
    }
    let mut verbs = Vec::new();
    if def.implements(Action::Index) {
        verbs.push("GET");
    }
    if def.implements(Action::Create) {
        verbs.push("POST");
    }
    verbs
}

fn member_verbs<P: Persistence>(def: &ResourceDef<P>) -> Vec<&'static str> {
    [
        (Action::Show, "GET"),
        (Action::Update, "PATCH"),
        (Action::Destroy, "DELETE"),
    ]
    .into_iter()
    .filter(|(action, _)| def.implements(*action))
    .map(|(_, verb)| verb)
    .collect()
}

async fn list<P: Persistence>(ctx: &Ctx<P>, def: &ResourceDef<P>) -> Result<Response, ApiError> {
    if let Some(ids) = ctx.query().ids_filter() {
        return show_many(ctx, def, ids).await;
    }
    let engine = ctx.engine();
    let bound = authorized(ctx, Action::Index, def.bound(Action::Index)).await?;
    ctx.query()
        .check_whitelists(Action::Index, ctx.action_config(Action::Index)?)?;
    let page = ctx.query().page_request(engine.settings())?;

    let (models, options) = bound.invoke(ctx, ActionArgs::None).await?.into_collection(0);
    let self_path = engine.href(&format!("/{}", def.path));
    let (models, links) = ctx.query().filter_sort_page(models, page, &self_path);
    let options = options.merge(Options {
        links,
        ..Default::default()
    });
    let body = engine.render_models(ctx, &def.name, &models, options).await?;
    Ok(response::ok(body))
}

/// `GET /{resource}?filter[id]=a,b`: one `show_many` call, or one `show` per id.
/// Either way the caller needs `show`.
async fn show_many<P: Persistence>(
    ctx: &Ctx<P>,
    def: &ResourceDef<P>,
    ids: Vec<String>,
) -> Result<Response, ApiError> {
    let engine = ctx.engine();
    ctx.ensure_can(Action::Show).await?;
    let (models, options) = if let Some(bound) = def.bound(Action::ShowMany) {
        ctx.ensure_can(Action::ShowMany).await?;
        let (models, options) = bound
            .invoke(ctx, ActionArgs::Ids(ids.clone()))
            .await?
            .into_collection(0);
        let found: BTreeSet<&str> = models.iter().map(|m| m.id.as_str()).collect();
        let missing: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !found.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(ApiError::not_found(format!(
                "Resource(s) `{}' not found: {}",
                def.path,
                missing.join(",")
            )));
        }
        (models, options)
    } else {
        let show = def.resolver().ok_or_else(|| not_implemented(Action::Show))?;
        let mut models = Vec::with_capacity(ids.len());
        let mut options = Options::default();
        for id in ids {
            let not_found = || ApiError::not_found(format!("Resource `{}/{}' not found", def.path, id));
            if !def.id_matches(&id) {
                return Err(not_found());
            }
            let (model, opts) = show.invoke(ctx, ActionArgs::Id(id.clone())).await?.into_model(0);
            models.push(model.ok_or_else(not_found)?);
            options = options.merge(opts);
        }
        (models, options)
    };
    let body = engine.render_models(ctx, &def.name, &models, options).await?;
    Ok(response::ok(body))
}

async fn show<P: Persistence>(ctx: &Ctx<P>, def: &ResourceDef<P>, id: &str) -> Result<Response, ApiError> {
    let resolved = resolve(ctx, def, id).await?;
    ctx.ensure_can(Action::Show).await?;
    let (model, options) = match (&def.find, def.bound(Action::Show)) {
        (Some(_), Some(show)) => show
            .invoke(ctx, ActionArgs::Id(id.to_string()))
            .await?
            .into_model(0),
        _ => resolved.into_model(0),
    };
    let model = model.ok_or_else(|| ApiError::not_found(format!("Resource `{}/{}' not found", def.path, id)))?;
    let body = ctx
        .engine()
        .render_model(ctx, &def.name, Some(&model), options)
        .await?;
    Ok(response::ok(body))
}

fn primary_data(doc: &serde_json::Value) -> Result<ResourceObject, ApiError> {
    ResourceObject::from_document(doc)?
        .ok_or_else(|| ApiError::bad_request("Request document must have a primary `data' object"))
}

fn check_type<P: Persistence>(def: &ResourceDef<P>, data: &ResourceObject) -> Result<(), ApiError> {
    let matches = data
        .kind
        .as_deref()
        .map_or(false, |k| k == def.path || dedasherize(k) == def.name);
    if matches {
        Ok(())
    } else {
        Err(ApiError::conflict("Resource type in payload does not match endpoint"))
    }
}

async fn create<P: Persistence>(ctx: &Ctx<P>, def: &ResourceDef<P>) -> Result<Response, ApiError> {
    let engine = ctx.engine();
    let bound = authorized(ctx, Action::Create, def.bound(Action::Create)).await?;
    let data = primary_data(ctx.document())?;
    check_type(def, &data)?;

    let client_id = data.id.clone();
    let args = match (bound.id_policy(), &client_id) {
        (IdPolicy::Server, Some(_)) => return Err(ApiError::forbidden("Client-generated ID not supported")),
        (IdPolicy::Client, None) => return Err(ApiError::forbidden("Client-generated ID not provided")),
        (_, id) => ActionArgs::Attributes {
            attributes: data.attributes.clone(),
            id: id.clone(),
        },
    };
    let relationships = &data.relationships;

    let (model, options) = engine
        .transaction(ctx, Action::Create, || async move {
            let created = bound.invoke(ctx, args).await?;
            let model = created.model(1).or_else(|| created.model(0)).cloned();
            let id = created.id(0).or_else(|| client_id.clone());
            let parent = match (&model, id) {
                (Some(m), _) => m.clone(),
                (None, Some(id)) if client_id.is_some() => Model::new(def.name.clone(), id),
                _ => return Err(ApiError::unexpected_return(Action::Create)),
            };
            ctx.set_resource(Some(parent));
            dispatch_relationship_requests(ctx, def, relationships, Action::Create).await?;
            run_validate(ctx, def, Action::Create).await?;
            Ok((model, created.options))
        })
        .await?;

    match model {
        Some(model) => {
            let body = engine.render_model(ctx, &def.name, Some(&model), options).await?;
            Ok(response::created(body))
        }
        None => meta_or_no_content(ctx, def, options).await,
    }
}

async fn update<P: Persistence>(ctx: &Ctx<P>, def: &ResourceDef<P>, id: &str) -> Result<Response, ApiError> {
    let engine = ctx.engine();
    resolve(ctx, def, id).await?;
    let bound = authorized(ctx, Action::Update, def.bound(Action::Update)).await?;
    let data = primary_data(ctx.document())?;
    check_type(def, &data)?;
    if data.id.as_deref() != Some(id) {
        return Err(ApiError::conflict("Resource ID in payload does not match endpoint"));
    }
    let args = ActionArgs::Attributes {
        attributes: data.attributes.clone(),
        id: None,
    };
    let relationships = &data.relationships;

    let (model, options) = engine
        .transaction(ctx, Action::Update, || async move {
            let (model, options) = bound.invoke(ctx, args).await?.into_model(0);
            if let Some(model) = &model {
                ctx.set_resource(Some(model.clone()));
            }
            dispatch_relationship_requests(ctx, def, relationships, Action::Update).await?;
            run_validate(ctx, def, Action::Update).await?;
            Ok((model, options))
        })
        .await?;

    match model {
        Some(model) => {
            let body = engine.render_model(ctx, &def.name, Some(&model), options).await?;
            Ok(response::ok(body))
        }
        None => meta_or_no_content(ctx, def, options).await,
    }
}

async fn destroy<P: Persistence>(ctx: &Ctx<P>, def: &ResourceDef<P>, id: &str) -> Result<Response, ApiError> {
    resolve(ctx, def, id).await?;
    let bound = authorized(ctx, Action::Destroy, def.bound(Action::Destroy)).await?;
    let destroyed = run_write(ctx, bound, ActionArgs::None).await?;
    meta_or_no_content(ctx, def, destroyed.options).await
}

/// The resource's `validate` hook, after the helper and its sideloads.
async fn run_validate<P: Persistence>(ctx: &Ctx<P>, def: &ResourceDef<P>, action: Action) -> Result<(), ApiError> {
    let Some(validate) = &def.validate else {
        return Ok(());
    };
    validate(ctx.clone(), ActionArgs::None)
        .await
        .map_err(|e| ctx.engine().classify(action, e))
}

/// 200 with a meta-only document when the helper returned meta, 204 otherwise.
async fn meta_or_no_content<P: Persistence>(
    ctx: &Ctx<P>,
    def: &ResourceDef<P>,
    options: Options,
) -> Result<Response, ApiError> {
    if options.meta.is_none() {
        return Ok(response::no_content());
    }
    let body = ctx.engine().render_model(ctx, &def.name, None, options).await?;
    Ok(response::ok(body))
}
