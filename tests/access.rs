//! Role checks that span more than one action.

mod common;

use axum::{http::Method, http::StatusCode, Router};
use common::call;
use jsonapi_sdk::{Ctx, Engine, HelperError, MemoryStore, Model, RoleSet};

/// `show` is restricted; `show_many` declares no roles of its own.
fn secrets() -> Router {
    let store = MemoryStore::new();
    store.seed(Model::new("secrets", "1").attr("v", "classified"));
    Engine::builder(store)
        .role(|ctx: Ctx<MemoryStore>| async move {
            let mut roles = RoleSet::new();
            if ctx.headers().get("x-user").map_or(false, |u| u == "admin") {
                roles.insert("superuser");
            }
            Ok::<_, HelperError>(roles)
        })
        .resource("secrets", |r| {
            r.find(|ctx: Ctx<MemoryStore>, id| async move { Ok::<_, HelperError>(ctx.store().get("secrets", &id)) });
            r.show(|ctx: Ctx<MemoryStore>, id| async move { Ok::<_, HelperError>(ctx.store().get("secrets", &id)) })
                .roles(["superuser"]);
            r.show_many(|ctx: Ctx<MemoryStore>, ids: Vec<String>| async move {
                let found: Vec<Model> = ids.iter().filter_map(|id| ctx.store().get("secrets", id)).collect();
                Ok::<_, HelperError>(found)
            });
        })
        .build()
        .expect("secrets engine")
        .router()
}

#[tokio::test]
async fn filter_id_needs_show_roles() {
    let app = secrets();

    let reply = call(&app, Method::GET, "/secrets/1", None, None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = call(&app, Method::GET, "/secrets?filter[id]=1", None, None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert!(reply.body.get("data").is_none());

    let reply = call(&app, Method::GET, "/secrets?filter[id]=1", Some("admin"), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"][0]["attributes"]["v"], "classified");
}
