//! In-memory blog used by the integration tests.
//!
//! Callers identify with `X-User: <author id>`; `admin` is a superuser.
//! Authors may edit themselves; posts belong to their author.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use jsonapi_sdk::reconcile::{self, SetOp};
use jsonapi_sdk::store::{MemoryError, MemoryJoinSet};
use jsonapi_sdk::{
    Action, ActionArgs, ApiError, Ctx, Engine, ExceptionClass, Exceptions, FieldError, HelperError, Identifier, Linkage,
    MemoryStore, Model, RoleSet, Settings,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tower::ServiceExt;

pub const MIME: &str = "application/vnd.api+json";

#[derive(Debug, thiserror::Error)]
#[error("{field} {message}")]
pub struct Invalid {
    pub field: String,
    pub message: String,
}

impl Invalid {
    fn new(field: &str, message: &str) -> Self {
        Invalid {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

type Blog = Ctx<MemoryStore>;

pub fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed(Model::new("authors", "1").attr("name", "Ada"));
    store.seed(Model::new("authors", "2").attr("name", "Brian"));
    store.seed(Model::new("tags", "1").attr("name", "rust"));
    store.seed(Model::new("tags", "2").attr("name", "http"));
    store.seed(Model::new("tags", "3").attr("name", "sql").attr("locked", true));
    store.seed(
        Model::new("posts", "hello-world")
            .attr("title", "Hello, world")
            .has_one("author", Some(Identifier::new("authors", "1")))
            .has_many("tags", vec![Identifier::new("tags", "1")]),
    );
    store.seed(
        Model::new("posts", "second")
            .attr("title", "Second")
            .has_one("author", Some(Identifier::new("authors", "2")))
            .has_many("tags", Vec::new()),
    );
    store
}

fn exceptions() -> Exceptions {
    Exceptions::default()
        .not_found(ExceptionClass::matching::<MemoryError, _>(|e| {
            matches!(e, MemoryError::NotFound { .. })
        }))
        .conflict(ExceptionClass::matching::<MemoryError, _>(|e| {
            matches!(e, MemoryError::Duplicate { .. })
        }))
        .validation(ExceptionClass::of::<Invalid>())
        .validation_formatter(|err| {
            err.downcast_ref::<Invalid>()
                .map(|i| vec![FieldError::new(Some(&i.field), i.message.clone())])
                .unwrap_or_default()
        })
}

fn user(ctx: &Blog) -> Option<String> {
    ctx.headers()
        .get("x-user")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn author_of(post: &Model) -> Option<&Identifier> {
    match post.linkage("author") {
        Some(Linkage::One(Some(author))) => Some(author),
        _ => None,
    }
}

fn current(ctx: &Blog) -> Result<std::sync::Arc<Model>, HelperError> {
    ctx.resource().ok_or_else(|| HelperError::msg("resource not resolved"))
}

/// Post as stored, with its author attached for `include=author`.
fn post_view(store: &MemoryStore, post: Model) -> Model {
    let author = author_of(&post).and_then(|a| store.get("authors", &a.id));
    post.with_related("author", author.into_iter().collect(), false)
}

/// Locked tags are only attached or detached by superusers.
async fn reconcile_tags(ctx: Blog, op: SetOp, ids: Vec<Identifier>) -> Result<bool, HelperError> {
    let post = current(&ctx)?;
    let superuser = ctx.has_role("superuser").await?;
    let locked: BTreeSet<Identifier> = ctx
        .store()
        .all("tags")
        .into_iter()
        .filter(|t| t.attribute("locked") == Some(&Value::Bool(true)))
        .map(|t| t.identifier())
        .collect();
    let set = MemoryJoinSet::new(post.identifier(), "tags");
    let mut tx = ctx.tx().await?;
    let delta = reconcile::apply(&set, &mut *tx, op, &ids, |t| superuser || !locked.contains(t)).await?;
    Ok(!delta.is_empty())
}

/// `RUST_LOG=jsonapi_sdk=debug cargo test` shows dispatch and sideload steps.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine(store: MemoryStore) -> Engine<MemoryStore> {
    init_tracing();
    let settings = Settings {
        progname: "blog".into(),
        ..Settings::default()
    }
    .with_exceptions(exceptions());

    Engine::builder(store)
        .settings(settings)
        .role(|ctx: Blog| async move {
            let mut roles = RoleSet::new();
            let Some(user) = user(&ctx) else {
                return Ok(roles);
            };
            roles.insert("logged_in");
            if user == "admin" {
                roles.insert("superuser");
            }
            if let Some(resource) = ctx.resource() {
                let mine = match resource.kind.as_str() {
                    "authors" => resource.id == user,
                    "posts" => author_of(&resource).map_or(false, |a| a.id == user),
                    _ => false,
                };
                if mine {
                    roles.insert("owner");
                }
            }
            Ok::<_, HelperError>(roles)
        })
        .resource("authors", |r| {
            r.find(|ctx: Blog, id| async move {
                let store = ctx.store();
                let author = store.get("authors", &id).map(|a| {
                    let me = a.identifier();
                    let posts = store
                        .all("posts")
                        .into_iter()
                        .filter(|p| author_of(p) == Some(&me))
                        .collect();
                    a.with_related("posts", posts, true)
                });
                Ok::<_, HelperError>(author)
            });
            r.index(|ctx: Blog, ()| async move { Ok::<_, HelperError>(ctx.store().all("authors")) })
                .filter_by(["name"])
                .sort_by(["name"]);
            r.create(|ctx: Blog, attributes: Map<String, Value>| async move {
                let mut tx = ctx.tx().await?;
                let id = tx.next_id("authors");
                let mut model = Model::new("authors", id.clone());
                model.attributes = attributes;
                tx.insert(model.clone())?;
                Ok::<_, HelperError>((id, model))
            })
            .roles(["superuser"]);
            r.update(|ctx: Blog, attributes| async move {
                let author = current(&ctx)?;
                let mut tx = ctx.tx().await?;
                let row = tx.fetch_mut("authors", &author.id)?;
                row.attributes.extend(attributes);
                Ok::<_, HelperError>(row.clone())
            })
            .roles(["owner", "superuser"])
            .before(|ctx: Blog, args: ActionArgs| async move {
                let ActionArgs::Attributes { attributes, .. } = args else {
                    return Ok::<_, HelperError>(());
                };
                if attributes.contains_key("admin") && !ctx.has_role("superuser").await? {
                    return Err(HelperError::from(ApiError::forbidden("Only superusers may grant admin")));
                }
                Ok(())
            });
            r.destroy(|ctx: Blog, ()| async move {
                let author = current(&ctx)?;
                ctx.tx().await?.remove("authors", &author.id)?;
                Ok::<_, HelperError>(())
            })
            .roles(["superuser"]);
            r.has_many("posts", |rel| {
                rel.related("posts");
                rel.fetch(|ctx: Blog, ()| async move {
                    let author = current(&ctx)?.identifier();
                    let posts = ctx
                        .store()
                        .all("posts")
                        .into_iter()
                        .filter(|p| author_of(p) == Some(&author))
                        .collect::<Vec<_>>();
                    Ok::<_, HelperError>(posts)
                })
                .roles(["logged_in"]);
            });
        })
        .resource("posts", |r| {
            r.id_pattern("[a-z0-9-]+");
            r.find(|ctx: Blog, id| async move {
                let store = ctx.store().clone();
                Ok::<_, HelperError>(store.get("posts", &id).map(|p| post_view(&store, p)))
            });
            r.index(|ctx: Blog, ()| async move {
                let store = ctx.store().clone();
                let posts: Vec<Model> = store
                    .all("posts")
                    .into_iter()
                    .map(|p| post_view(&store, p))
                    .collect();
                Ok::<_, HelperError>(posts)
            })
            .filter_by(["title"])
            .sort_by(["title"]);
            r.show_many(|ctx: Blog, ids: Vec<String>| async move {
                let posts: Vec<Model> = ids.iter().filter_map(|id| ctx.store().get("posts", id)).collect();
                Ok::<_, HelperError>(posts)
            });
            r.create(|ctx: Blog, (attributes, id): (Map<String, Value>, String)| async move {
                let mut model = Model::new("posts", id.clone())
                    .has_one("author", None)
                    .has_many("tags", Vec::new());
                model.attributes = attributes;
                ctx.tx().await?.insert(model.clone())?;
                Ok::<_, HelperError>((id, model))
            })
            .roles(["logged_in"]);
            r.update(|ctx: Blog, attributes| async move {
                let post = current(&ctx)?;
                let mut tx = ctx.tx().await?;
                let row = tx.fetch_mut("posts", &post.id)?;
                row.attributes.extend(attributes);
                Ok::<_, HelperError>(row.clone())
            })
            .roles(["owner", "superuser"]);
            r.destroy(|ctx: Blog, ()| async move {
                let post = current(&ctx)?;
                ctx.tx().await?.remove("posts", &post.id)?;
                Ok::<_, HelperError>(())
            })
            .roles(["owner", "superuser"]);
            r.validate(|ctx: Blog| async move {
                let post = current(&ctx)?;
                let tx = ctx.tx().await?;
                let row = tx.fetch("posts", &post.id)?;
                let title = row.attribute("title").and_then(Value::as_str).unwrap_or("");
                if title.trim().is_empty() {
                    return Err(HelperError::from(Invalid::new("title", "must not be blank")));
                }
                if author_of(row).is_none() {
                    return Err(HelperError::from(Invalid::new("author", "must be present")));
                }
                Ok::<_, HelperError>(())
            });
            r.has_one("author", |rel| {
                rel.related("authors");
                rel.pluck(|ctx: Blog, ()| async move {
                    let post = current(&ctx)?;
                    let author = author_of(&post).and_then(|a| ctx.store().get("authors", &a.id));
                    Ok::<_, HelperError>(author)
                });
                rel.graft(|ctx: Blog, author: Identifier| async move {
                    let post = current(&ctx)?;
                    let mut tx = ctx.tx().await?;
                    tx.fetch(&author.kind, &author.id)?;
                    let row = tx.fetch_mut("posts", &post.id)?;
                    let updated = author_of(row) != Some(&author);
                    row.relationships.entry("author".into()).or_default().data =
                        Some(Linkage::One(Some(author)));
                    Ok::<_, HelperError>(updated)
                })
                .roles(["superuser"])
                .sideload_on([Action::Create]);
            });
            r.has_many("tags", |rel| {
                rel.related("tags");
                rel.fetch(|ctx: Blog, ()| async move {
                    let post = current(&ctx)?;
                    let tags = match post.linkage("tags") {
                        Some(Linkage::Many(ids)) => ids
                            .iter()
                            .filter_map(|t| ctx.store().get("tags", &t.id))
                            .collect(),
                        _ => Vec::new(),
                    };
                    Ok::<_, HelperError>(tags)
                })
                .sort_by(["name"]);
                rel.replace(|ctx: Blog, ids| reconcile_tags(ctx, SetOp::Replace, ids))
                    .roles(["owner", "superuser"])
                    .sideload_on([Action::Create, Action::Update]);
                rel.merge(|ctx: Blog, ids| reconcile_tags(ctx, SetOp::Merge, ids))
                    .roles(["owner", "superuser"])
                    .sideload_on([Action::Create]);
                rel.subtract(|ctx: Blog, ids| reconcile_tags(ctx, SetOp::Subtract, ids))
                    .roles(["owner", "superuser"]);
            });
        })
        .resource("comments", |r| {
            r.find(|ctx: Blog, id| async move { Ok::<_, HelperError>(ctx.store().get("comments", &id)) });
            r.index(|ctx: Blog, ()| async move { Ok::<_, HelperError>(ctx.store().all("comments")) });
            r.create(|ctx: Blog, attributes: Map<String, Value>| async move {
                let mut tx = ctx.tx().await?;
                let id = tx.next_id("comments");
                let mut model = Model::new("comments", id.clone()).has_one("post", None);
                model.attributes = attributes;
                tx.insert(model.clone())?;
                Ok::<_, HelperError>((id, model))
            })
            .roles(["logged_in"]);
            r.has_one("post", |rel| {
                rel.related("posts");
                rel.graft(|ctx: Blog, post: Identifier| async move {
                    let comment = current(&ctx)?;
                    let mut tx = ctx.tx().await?;
                    tx.fetch(&post.kind, &post.id)?;
                    let row = tx.fetch_mut("comments", &comment.id)?;
                    row.relationships.entry("post".into()).or_default().data = Some(Linkage::One(Some(post)));
                    // Posted together with the comment, or moved later.
                    row.attributes
                        .insert("posted_with_comment".into(), Value::Bool(ctx.is_sideloaded()));
                    Ok::<_, HelperError>(true)
                })
                .roles(["superuser"])
                .sideload_on([Action::Create]);
            });
        })
        .resource("tags", |r| {
            r.find(|ctx: Blog, id| async move { Ok::<_, HelperError>(ctx.store().get("tags", &id)) });
            r.index(|ctx: Blog, ()| async move { Ok::<_, HelperError>(ctx.store().all("tags")) });
            r.has_many("posts", |rel| {
                rel.related("posts");
                rel.fetch(|ctx: Blog, ()| async move {
                    let tag = current(&ctx)?.identifier();
                    let posts = ctx
                        .store()
                        .all("posts")
                        .into_iter()
                        .filter(|p| matches!(p.linkage("tags"), Some(Linkage::Many(ids)) if ids.contains(&tag)))
                        .collect::<Vec<_>>();
                    Ok::<_, HelperError>(posts)
                })
                .roles(["logged_in"]);
            });
        })
        .build()
        .expect("blog engine")
}

pub fn app(store: MemoryStore) -> Router {
    engine(store).router()
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn error_titles(&self) -> Vec<String> {
        self.body["errors"]
            .as_array()
            .map(|errs| {
                errs.iter()
                    .filter_map(|e| e["title"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::ACCEPT, MIME);
    if let Some(user) = user {
        builder = builder.header("x-user", user);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, MIME)
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, req: Request<Body>) -> Reply {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply { status, headers, body }
}

pub async fn call(app: &Router, method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Reply {
    send(app, request(method, uri, user, body)).await
}
