//! Content negotiation, method override and the common routes.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{app, send, seeded, MIME};
use jsonapi_sdk::{common_routes, Ctx, Engine, HelperError, MemoryStore, Model, Settings};
use serde_json::{json, Map, Value};

fn patch_title(title: &str) -> String {
    json!({"data": {"type": "posts", "id": "hello-world", "attributes": {"title": title}}}).to_string()
}

#[tokio::test]
async fn unacceptable_accept_is_406() {
    let app = app(seeded());
    let req = Request::get("/posts")
        .header(header::ACCEPT, "text/html")
        .body(Body::empty())
        .unwrap();

    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(reply.headers[header::CONTENT_TYPE], MIME);
}

#[tokio::test]
async fn missing_accept_is_fine() {
    let app = app(seeded());
    let req = Request::get("/posts").body(Body::empty()).unwrap();

    assert_eq!(send(&app, req).await.status, StatusCode::OK);
}

#[tokio::test]
async fn wrong_content_type_is_415() {
    let app = app(seeded());

    for content_type in ["application/json", "application/vnd.api+json; ext=bulk"] {
        let req = Request::patch("/posts/hello-world")
            .header(header::CONTENT_TYPE, content_type)
            .header("x-user", "1")
            .body(Body::from(patch_title("x")))
            .unwrap();
        assert_eq!(send(&app, req).await.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}

#[tokio::test]
async fn malformed_json_is_400() {
    let app = app(seeded());
    let req = Request::post("/comments")
        .header(header::CONTENT_TYPE, MIME)
        .header("x-user", "1")
        .body(Body::from("{\"data\": "))
        .unwrap();

    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["errors"].is_array());
}

#[tokio::test]
async fn post_with_override_header_is_a_patch() {
    let store = seeded();
    let app = app(store.clone());
    let req = Request::post("/posts/hello-world")
        .header(header::CONTENT_TYPE, MIME)
        .header("x-http-method-override", "PATCH")
        .header("x-user", "1")
        .body(Body::from(patch_title("Overridden")))
        .unwrap();

    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(store.get("posts", "hello-world").unwrap().attributes["title"], "Overridden");
}

#[tokio::test]
async fn health_route() {
    let app = common_routes();
    let req = Request::builder()
        .method(Method::GET)
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
}

#[tokio::test]
async fn oversized_body_is_413() {
    let app = Engine::builder(MemoryStore::new())
        .settings(Settings {
            body_limit: 64,
            ..Settings::default()
        })
        .resource("notes", |r| {
            r.find(|ctx: Ctx<MemoryStore>, id| async move { Ok::<_, HelperError>(ctx.store().get("notes", &id)) });
            r.create(|_ctx: Ctx<MemoryStore>, attributes: Map<String, Value>| async move {
                let mut note = Model::new("notes", "1");
                note.attributes = attributes;
                Ok::<_, HelperError>(("1".to_string(), note))
            });
        })
        .build()
        .unwrap()
        .router();
    let body = json!({"data": {"type": "notes", "attributes": {"text": "x".repeat(256)}}});
    // No Content-Length: the limit trips while the body is read.
    let req = Request::post("/notes")
        .header(header::CONTENT_TYPE, MIME)
        .body(Body::from(body.to_string()))
        .unwrap();

    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(reply.error_titles(), vec!["Payload Too Large"]);
}
