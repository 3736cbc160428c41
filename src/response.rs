//! Response helpers: JSON:API documents, empty responses and `Allow` discovery.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

pub const MIME_TYPE: &str = "application/vnd.api+json";

pub fn document(status: StatusCode, body: Value) -> Response {
    (status, [(header::CONTENT_TYPE, MIME_TYPE)], Json(body)).into_response()
}

pub fn ok(body: Value) -> Response {
    document(StatusCode::OK, body)
}

/// 201, with `Location` taken from `data.links.self` when present.
pub fn created(body: Value) -> Response {
    let location = body
        .pointer("/data/links/self")
        .and_then(Value::as_str)
        .and_then(|s| HeaderValue::from_str(s).ok());
    let mut resp = document(StatusCode::CREATED, body);
    if let Some(location) = location {
        resp.headers_mut().insert(header::LOCATION, location);
    }
    resp
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// 200 with an empty body and `Allow: GET,POST`.
pub fn allow(verbs: &[&str]) -> Response {
    let mut resp = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&verbs.join(",")) {
        resp.headers_mut().insert(header::ALLOW, value);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn created_sets_location_from_self_link() {
        let resp = created(json!({"data": {"type": "posts", "id": "1", "links": {"self": "/posts/1"}}}));
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()[header::LOCATION], "/posts/1");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], MIME_TYPE);
    }

    #[test]
    fn allow_lists_verbs_without_spaces() {
        let resp = allow(&["GET", "PATCH", "DELETE"]);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ALLOW], "GET,PATCH,DELETE");
    }
}
