//! JSON:API request extractor: content negotiation, method override and body parsing.

use crate::error::ApiError;
use crate::query::QueryParams;
use crate::response::MIME_TYPE;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, HeaderMap, Method, StatusCode},
};
use serde_json::Value;

pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";

/// A negotiated request: effective method, headers, parsed query and document.
#[derive(Clone, Debug)]
pub struct JsonApiRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub query: QueryParams,
    /// `Value::Null` when the request has no body.
    pub document: Value,
}

/// `POST` with `X-HTTP-Method-Override: PATCH` is a `PATCH`; nothing else is overridden.
pub fn effective_method(method: &Method, headers: &HeaderMap) -> Method {
    let overridden = headers
        .get(METHOD_OVERRIDE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("PATCH"))
        .unwrap_or(false);
    if *method == Method::POST && overridden {
        Method::PATCH
    } else {
        method.clone()
    }
}

/// Media type and parameter names of a header value like `a/b; charset=utf-8`.
fn media_type(raw: &str) -> (String, Vec<String>) {
    let mut parts = raw.split(';');
    let essence = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let params = parts
        .filter_map(|p| p.split('=').next())
        .map(|k| k.trim().to_ascii_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    (essence, params)
}

/// 406 unless `Accept` is absent or admits the JSON:API media type without extra parameters.
pub fn check_accept(headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(accept) = headers.get(header::ACCEPT) else {
        return Ok(());
    };
    let accept = accept
        .to_str()
        .map_err(|_| ApiError::NotAcceptable("Unreadable Accept header".into()))?;
    let acceptable = accept.split(',').map(media_type).any(|(essence, params)| {
        let plain = params.iter().all(|p| p == "q");
        match essence.as_str() {
            "*/*" | "application/*" => true,
            e => e == MIME_TYPE && plain,
        }
    });
    if acceptable {
        Ok(())
    } else {
        Err(ApiError::NotAcceptable(format!("Responses are only available as {MIME_TYPE}")))
    }
}

/// 415 when a body is sent as anything but the JSON:API media type (charset allowed).
pub fn check_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let (essence, params) = media_type(raw);
    if essence != MIME_TYPE {
        return Err(ApiError::UnsupportedType(format!("Request bodies must be {MIME_TYPE}")));
    }
    if let Some(p) = params.iter().find(|p| *p != "charset") {
        return Err(ApiError::UnsupportedType(format!("Media type parameter `{p}' is not supported")));
    }
    Ok(())
}

pub fn parse_document(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|_| ApiError::bad_request("Malformed JSON in the request body"))
}

#[async_trait]
impl<S> FromRequest<S> for JsonApiRequest
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = effective_method(req.method(), req.headers());
        let headers = req.headers().clone();
        check_accept(&headers)?;
        let query = QueryParams::from_uri(req.uri())?;

        let body = Bytes::from_request(req, state).await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::PayloadTooLarge(e.body_text())
            } else {
                ApiError::bad_request(format!("Unreadable request body: {e}"))
            }
        })?;
        let document = if body.is_empty() {
            Value::Null
        } else {
            check_content_type(&headers)?;
            parse_document(&body)?
        };
        Ok(JsonApiRequest {
            method,
            headers,
            query,
            document,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_static(v));
        }
        h
    }

    #[test]
    fn only_post_to_patch_is_overridden() {
        let h = headers(&[(METHOD_OVERRIDE_HEADER, "patch")]);
        assert_eq!(effective_method(&Method::POST, &h), Method::PATCH);
        assert_eq!(effective_method(&Method::GET, &h), Method::GET);
        let h = headers(&[(METHOD_OVERRIDE_HEADER, "DELETE")]);
        assert_eq!(effective_method(&Method::POST, &h), Method::POST);
    }

    #[test]
    fn accept_negotiation() {
        assert!(check_accept(&HeaderMap::new()).is_ok());
        assert!(check_accept(&headers(&[("accept", "application/vnd.api+json")])).is_ok());
        assert!(check_accept(&headers(&[("accept", "text/html, */*;q=0.1")])).is_ok());
        assert!(matches!(
            check_accept(&headers(&[("accept", "text/html")])),
            Err(ApiError::NotAcceptable(_))
        ));
        assert!(check_accept(&headers(&[("accept", "application/vnd.api+json; ext=bulk")])).is_err());
    }

    #[test]
    fn content_type_allows_only_charset() {
        assert!(check_content_type(&headers(&[("content-type", "application/vnd.api+json")])).is_ok());
        assert!(check_content_type(&headers(&[(
            "content-type",
            "application/vnd.api+json; charset=utf-8"
        )]))
        .is_ok());
        assert!(matches!(
            check_content_type(&headers(&[("content-type", "application/json")])),
            Err(ApiError::UnsupportedType(_))
        ));
        assert!(check_content_type(&headers(&[(
            "content-type",
            "application/vnd.api+json; profile=x"
        )]))
        .is_err());
    }

    #[test]
    fn malformed_json_is_bad_request() {
        assert!(matches!(parse_document(b"{nope"), Err(ApiError::BadRequest(_))));
        assert_eq!(parse_document(b"  ").unwrap(), Value::Null);
    }
}
