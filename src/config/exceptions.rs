//! Exception classes: how helper errors map onto the protocol taxonomy.

use crate::config::types::Action;
use crate::error::{ApiError, FieldError, HelperError};
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

type Matcher = dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync;

/// Turns a validation error into `(field, message)` tuples.
pub type ValidationFormatter = Arc<dyn Fn(&HelperError) -> Vec<FieldError> + Send + Sync>;

/// One class of helper errors, matched by concrete type and an optional predicate.
#[derive(Clone)]
pub struct ExceptionClass {
    name: &'static str,
    matcher: Arc<Matcher>,
}

impl fmt::Debug for ExceptionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExceptionClass").field(&self.name).finish()
    }
}

impl ExceptionClass {
    /// Every error of type `E`.
    pub fn of<E: StdError + 'static>() -> Self {
        ExceptionClass {
            name: std::any::type_name::<E>(),
            matcher: Arc::new(|err| err.is::<E>()),
        }
    }

    /// Errors of type `E` for which `pred` holds, e.g. one sqlx error kind.
    pub fn matching<E, F>(pred: F) -> Self
    where
        E: StdError + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        ExceptionClass {
            name: std::any::type_name::<E>(),
            matcher: Arc::new(move |err| err.downcast_ref::<E>().map_or(false, &pred)),
        }
    }

    pub fn matches(&self, err: &HelperError) -> bool {
        (self.matcher)(err.get_ref())
    }
}

#[derive(Clone, Default)]
pub struct Exceptions {
    pub not_found: Vec<ExceptionClass>,
    pub conflict: Vec<ExceptionClass>,
    pub validation: Vec<ExceptionClass>,
    pub validation_formatter: Option<ValidationFormatter>,
}

impl fmt::Debug for Exceptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exceptions")
            .field("not_found", &self.not_found)
            .field("conflict", &self.conflict)
            .field("validation", &self.validation)
            .field("validation_formatter", &self.validation_formatter.is_some())
            .finish()
    }
}

impl Exceptions {
    pub fn not_found(mut self, class: ExceptionClass) -> Self {
        self.not_found.push(class);
        self
    }

    pub fn conflict(mut self, class: ExceptionClass) -> Self {
        self.conflict.push(class);
        self
    }

    pub fn validation(mut self, class: ExceptionClass) -> Self {
        self.validation.push(class);
        self
    }

    pub fn validation_formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(&HelperError) -> Vec<FieldError> + Send + Sync + 'static,
    {
        self.validation_formatter = Some(Arc::new(f));
        self
    }

    /// Classifies a helper error raised while running `action`.
    ///
    /// `ApiError`s pass through. Conflicts are only translated for `conflict_actions`;
    /// anything unmatched becomes a 500 titled after the error's type.
    pub fn classify(
        &self,
        action: Action,
        conflict_actions: &BTreeSet<Action>,
        err: HelperError,
    ) -> ApiError {
        let err = match err.into_api_error() {
            Ok(api) => return api,
            Err(err) => err,
        };
        let any = |classes: &[ExceptionClass]| classes.iter().any(|c| c.matches(&err));

        if any(&self.not_found) {
            return ApiError::NotFound(err.to_string());
        }
        if conflict_actions.contains(&action) && any(&self.conflict) {
            return ApiError::Conflict(err.to_string());
        }
        if any(&self.validation) {
            let mut tuples = self
                .validation_formatter
                .as_ref()
                .map(|f| f(&err))
                .unwrap_or_default();
            if tuples.is_empty() {
                tuples.push(FieldError::new(None, err.to_string()));
            }
            return ApiError::UnprocessableEntity(tuples);
        }
        ApiError::internal(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[derive(Debug, thiserror::Error)]
    #[error("record not found")]
    struct RecordNotFound;

    #[derive(Debug, thiserror::Error)]
    #[error("duplicate key {0}")]
    struct UniqueViolation(String);

    #[derive(Debug, thiserror::Error)]
    #[error("invalid record")]
    struct RecordInvalid(Vec<(String, String)>);

    fn exceptions() -> Exceptions {
        Exceptions::default()
            .not_found(ExceptionClass::of::<RecordNotFound>())
            .conflict(ExceptionClass::matching::<UniqueViolation, _>(|e| e.0 != "ignored"))
            .validation(ExceptionClass::of::<RecordInvalid>())
            .validation_formatter(|err| {
                err.downcast_ref::<RecordInvalid>()
                    .map(|e| e.0.iter().map(|(f, m)| FieldError::new(Some(f.as_str()), m.clone())).collect())
                    .unwrap_or_default()
            })
    }

    fn status(action: Action, err: HelperError) -> StatusCode {
        exceptions()
            .classify(action, &Action::default_conflict_actions(), err)
            .status()
    }

    #[test]
    fn not_found_class_maps_to_404() {
        assert_eq!(status(Action::Show, RecordNotFound.into()), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_only_for_eligible_actions() {
        let dup = || -> HelperError { UniqueViolation("title".into()).into() };
        assert_eq!(status(Action::Create, dup()), StatusCode::CONFLICT);
        assert_eq!(status(Action::Replace, dup()), StatusCode::CONFLICT);
        assert_eq!(status(Action::Destroy, dup()), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status(Action::Create, UniqueViolation("ignored".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_uses_formatter_with_fallback() {
        let api = exceptions().classify(
            Action::Update,
            &Action::default_conflict_actions(),
            RecordInvalid(vec![("title".into(), "can't be blank".into())]).into(),
        );
        match api {
            ApiError::UnprocessableEntity(t) => assert_eq!(t[0].field.as_deref(), Some("title")),
            other => panic!("unexpected {other:?}"),
        }

        let api = exceptions().classify(
            Action::Update,
            &Action::default_conflict_actions(),
            RecordInvalid(vec![]).into(),
        );
        match api {
            ApiError::UnprocessableEntity(t) => {
                assert_eq!(t, vec![FieldError::new(None, "invalid record")])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn api_errors_pass_through() {
        assert_eq!(
            status(Action::Destroy, ApiError::forbidden("no").into()),
            StatusCode::FORBIDDEN
        );
    }
}
