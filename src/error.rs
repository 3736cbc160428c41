//! Typed errors, the protocol error taxonomy and HTTP mapping.

use crate::case::dasherize;
use crate::config::{Action, Scope};
use crate::response::MIME_TYPE;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Errors raised while declaring resources, before the first request is served.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown or invalid action `{0}`")]
    UnknownAction(String),
    #[error("action `{action}` cannot be declared on a {scope} route")]
    WrongScope { action: Action, scope: Scope },
    #[error("option `{option}` is not accepted by action `{action}`")]
    UnsupportedOption { action: Action, option: &'static str },
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    #[error("unknown relationship: {resource}/{relationship}")]
    UnknownRelationship { resource: String, relationship: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("invalid id pattern for {resource}: {source}")]
    InvalidIdPattern {
        resource: String,
        #[source]
        source: regex::Error,
    },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// One `(field, message)` tuple of a validation failure. A `None` field points at `/data`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(field: Option<&str>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Request-time errors. Every variant maps to exactly one HTTP status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("not acceptable: {0}")]
    NotAcceptable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("unprocessable entity ({} field errors)", .0.len())]
    UnprocessableEntity(Vec<FieldError>),
    /// A sideloaded relationship write failed; carries the sub-dispatch's status and error objects.
    #[error("sideload failed with status {status}")]
    Sideload {
        status: StatusCode,
        errors: Vec<ErrorObject>,
    },
    /// The route declaration is wrong (bad return shape from an action helper), not the request.
    #[error("action helper: {0}")]
    ActionHelper(String),
    #[error("{title}: {detail}")]
    Internal { title: String, detail: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    pub fn forbidden(detail: impl Into<String>) -> Self {
        ApiError::Forbidden(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        ApiError::NotFound(detail.into())
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        ApiError::Conflict(detail.into())
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        ApiError::BadRequest(detail.into())
    }

    pub(crate) fn unexpected_return(action: Action) -> Self {
        ApiError::ActionHelper(format!("Unexpected return value(s) from `{}' action helper", action))
    }

    /// Unclassified failure: 500 with a title derived from the error's type name.
    pub fn internal(err: &HelperError) -> Self {
        ApiError::Internal {
            title: title_from_type_name(err.type_name()),
            detail: err.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Sideload { status, .. } => *status,
            ApiError::ActionHelper(_) | ApiError::Internal { .. } | ApiError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn title(&self) -> String {
        match self {
            ApiError::BadRequest(_) => "Bad Request".into(),
            ApiError::Forbidden(_) => "Forbidden".into(),
            ApiError::NotFound(_) => "Not Found".into(),
            ApiError::MethodNotAllowed(_) => "Method Not Allowed".into(),
            ApiError::NotAcceptable(_) => "Not Acceptable".into(),
            ApiError::Conflict(_) => "Conflict".into(),
            ApiError::UnsupportedType(_) => "Unsupported Type".into(),
            ApiError::PayloadTooLarge(_) => "Payload Too Large".into(),
            ApiError::UnprocessableEntity(_) => "Unprocessable Entity".into(),
            ApiError::Sideload { .. } => "Sideload Error".into(),
            ApiError::ActionHelper(_) => "Action Helper Error".into(),
            ApiError::Internal { title, .. } => title.clone(),
            ApiError::Config(_) => "Config Error".into(),
        }
    }

    fn detail(&self) -> Option<String> {
        let detail = match self {
            ApiError::BadRequest(d)
            | ApiError::Forbidden(d)
            | ApiError::NotFound(d)
            | ApiError::MethodNotAllowed(d)
            | ApiError::NotAcceptable(d)
            | ApiError::Conflict(d)
            | ApiError::UnsupportedType(d)
            | ApiError::PayloadTooLarge(d)
            | ApiError::ActionHelper(d) => d.clone(),
            ApiError::Internal { detail, .. } => detail.clone(),
            ApiError::Config(e) => e.to_string(),
            ApiError::UnprocessableEntity(_) | ApiError::Sideload { .. } => String::new(),
        };
        Some(detail).filter(|d| !d.is_empty())
    }

    /// Error objects for the `errors` member of the response document.
    pub fn error_objects(&self) -> Vec<ErrorObject> {
        let status = self.status().as_u16().to_string();
        match self {
            ApiError::Sideload { errors, .. } => errors.clone(),
            ApiError::UnprocessableEntity(tuples) => tuples
                .iter()
                .map(|t| {
                    let pointer = match &t.field {
                        Some(field) => format!("/data/attributes/{}", dasherize(field)),
                        None => "/data".to_string(),
                    };
                    ErrorObject::new(self.title(), Some(t.message.clone()), Some(status.clone()))
                        .with_pointer(pointer)
                })
                .collect(),
            _ => vec![ErrorObject::new(self.title(), self.detail(), Some(status))],
        }
    }
}

/// A JSON:API error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorSource {
    pub pointer: String,
}

impl ErrorObject {
    pub fn new(title: String, detail: Option<String>, status: Option<String>) -> Self {
        ErrorObject {
            id: uuid::Uuid::new_v4().to_string(),
            title: Some(title),
            detail,
            status,
            source: None,
        }
    }

    pub fn with_pointer(mut self, pointer: String) -> Self {
        self.source = Some(ErrorSource { pointer });
        self
    }
}

/// Plain errors document, used when no engine serializer is at hand (extractor rejections).
pub fn errors_document(errors: &[ErrorObject]) -> serde_json::Value {
    serde_json::json!({ "errors": errors })
}

pub(crate) fn log_error(progname: &str, err: &ApiError, objects: &[ErrorObject]) {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(progname = %progname, status = status.as_u16(), errors = ?objects, "{}", err);
    } else {
        tracing::warn!(progname = %progname, status = status.as_u16(), errors = ?objects, "{}", err);
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let objects = self.error_objects();
        log_error("jsonapi", &self, &objects);
        (
            self.status(),
            [(header::CONTENT_TYPE, MIME_TYPE)],
            Json(errors_document(&objects)),
        )
            .into_response()
    }
}

/// Error returned by action helpers, hooks and role resolvers.
///
/// Any `std::error::Error` converts into it with `?`; the concrete type stays reachable
/// through [`HelperError::downcast_ref`] so the exception classes can match it.
pub struct HelperError {
    inner: Box<dyn StdError + Send + Sync + 'static>,
    type_name: &'static str,
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

impl HelperError {
    /// Ad-hoc error from a message. Classified as an unknown error.
    pub fn msg(message: impl fmt::Display) -> Self {
        HelperError {
            inner: Box::new(Message(message.to_string())),
            type_name: "UnknownError",
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn get_ref(&self) -> &(dyn StdError + 'static) {
        &*self.inner
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// Takes an `ApiError` back out, if that is what the helper raised.
    pub fn into_api_error(self) -> Result<ApiError, HelperError> {
        let type_name = self.type_name;
        match self.inner.downcast::<ApiError>() {
            Ok(api) => Ok(*api),
            Err(inner) => Err(HelperError { inner, type_name }),
        }
    }
}

impl<E> From<E> for HelperError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        HelperError {
            inner: Box::new(err),
            type_name: std::any::type_name::<E>(),
        }
    }
}

impl fmt::Debug for HelperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperError")
            .field("type", &self.type_name)
            .field("error", &self.inner)
            .finish()
    }
}

impl fmt::Display for HelperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

/// "demo_app::ValidationFailed" -> "Validation Failed"
pub fn title_from_type_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let last = base.rsplit("::").next().unwrap_or(base);
    let mut out = String::with_capacity(last.len() + 4);
    for (i, c) in last.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct RecordInvalid;

    #[test]
    fn title_splits_camel_case_type_names() {
        assert_eq!(title_from_type_name("demo_app::model::RecordInvalid"), "Record Invalid");
        assert_eq!(title_from_type_name("Error"), "Error");
        assert_eq!(title_from_type_name("a::Wrapper<b::Inner>"), "Wrapper");
    }

    #[test]
    fn helper_error_keeps_type_for_downcast() {
        let err: HelperError = RecordInvalid.into();
        assert!(err.is::<RecordInvalid>());
        assert!(err.type_name().ends_with("RecordInvalid"));
        assert_eq!(ApiError::internal(&err).title(), "Record Invalid");
    }

    #[test]
    fn api_error_survives_the_helper_boundary() {
        let err: HelperError = ApiError::forbidden("admins only").into();
        let api = err.into_api_error().unwrap();
        assert_eq!(api.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unprocessable_entity_points_at_dasherized_attributes() {
        let err = ApiError::UnprocessableEntity(vec![
            FieldError::new(Some("display_name"), "is too long"),
            FieldError::new(None, "is invalid"),
        ]);
        let objects = err.error_objects();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].source.as_ref().unwrap().pointer, "/data/attributes/display-name");
        assert_eq!(objects[1].source.as_ref().unwrap().pointer, "/data");
        assert_eq!(objects[0].status.as_deref(), Some("422"));
    }

    #[test]
    fn sideload_errors_keep_inner_objects() {
        let inner = ApiError::forbidden("nope").error_objects();
        let err = ApiError::Sideload {
            status: StatusCode::FORBIDDEN,
            errors: inner.clone(),
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_objects(), inner);
    }
}
