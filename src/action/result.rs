//! What action helpers return, and how it is normalized to a fixed shape per action.

use crate::config::Action;
use crate::error::ApiError;
use crate::model::{Identifier, Model};
use serde_json::{Map, Value};

/// Response options a helper may attach to its result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options {
    /// Default include paths, used when the client sends none.
    pub include: Option<Vec<String>>,
    /// Include path prefixes never to serialize.
    pub exclude: Vec<String>,
    pub meta: Option<Map<String, Value>>,
    pub links: Map<String, Value>,
}

impl Options {
    pub fn meta(mut self, meta: Value) -> Self {
        if let Value::Object(m) = meta {
            self.meta = Some(m);
        }
        self
    }

    pub fn include<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn link(mut self, name: &str, href: impl Into<String>) -> Self {
        self.links.insert(name.to_string(), Value::String(href.into()));
        self
    }

    /// Later options win key by key.
    pub fn merge(mut self, other: Options) -> Self {
        if other.include.is_some() {
            self.include = other.include;
        }
        self.exclude.extend(other.exclude);
        if let Some(theirs) = other.meta {
            self.meta.get_or_insert_with(Map::new).extend(theirs);
        }
        self.links.extend(other.links);
        self
    }
}

/// One positional value of a helper result.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Id(String),
    Model(Model),
    Collection(Vec<Model>),
}

impl Payload {
    fn is_model(&self) -> bool {
        matches!(self, Payload::Model(_))
    }
}

/// Raw helper result before normalization.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionResult {
    /// A single value; padded with nulls to the action's arity.
    Scalar(Payload),
    /// Positional values plus optional options; must match the arity.
    Tuple(Vec<Payload>, Option<Options>),
    /// Options alone; values are all null.
    Options(Options),
}

impl From<()> for ActionResult {
    fn from(_: ()) -> Self {
        ActionResult::Scalar(Payload::Null)
    }
}

impl From<bool> for ActionResult {
    fn from(v: bool) -> Self {
        ActionResult::Scalar(Payload::Bool(v))
    }
}

impl From<Model> for ActionResult {
    fn from(v: Model) -> Self {
        ActionResult::Scalar(Payload::Model(v))
    }
}

impl From<Option<Model>> for ActionResult {
    fn from(v: Option<Model>) -> Self {
        ActionResult::Scalar(v.map_or(Payload::Null, Payload::Model))
    }
}

impl From<Vec<Model>> for ActionResult {
    fn from(v: Vec<Model>) -> Self {
        ActionResult::Scalar(Payload::Collection(v))
    }
}

impl From<Options> for ActionResult {
    fn from(v: Options) -> Self {
        ActionResult::Options(v)
    }
}

impl<T: Into<ActionResult>> From<(T, Options)> for ActionResult {
    fn from((v, opts): (T, Options)) -> Self {
        match v.into() {
            ActionResult::Scalar(p) => ActionResult::Tuple(vec![p], Some(opts)),
            ActionResult::Tuple(values, None) => ActionResult::Tuple(values, Some(opts)),
            ActionResult::Tuple(values, Some(first)) => {
                ActionResult::Tuple(values, Some(first.merge(opts)))
            }
            ActionResult::Options(first) => ActionResult::Options(first.merge(opts)),
        }
    }
}

/// `create` result: the new id and the created model.
impl From<(String, Model)> for ActionResult {
    fn from((id, model): (String, Model)) -> Self {
        ActionResult::Tuple(vec![Payload::Id(id), Payload::Model(model)], None)
    }
}

/// `create` result when the model may not be available.
impl From<(String, Option<Model>)> for ActionResult {
    fn from((id, model): (String, Option<Model>)) -> Self {
        ActionResult::Tuple(
            vec![Payload::Id(id), model.map_or(Payload::Null, Payload::Model)],
            None,
        )
    }
}

impl From<(String, Model, Options)> for ActionResult {
    fn from((id, model, opts): (String, Model, Options)) -> Self {
        ActionResult::Tuple(vec![Payload::Id(id), Payload::Model(model)], Some(opts))
    }
}

/// Helper result with exactly `action.arity()` values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Normalized {
    pub values: Vec<Payload>,
    pub options: Options,
}

impl Normalized {
    fn get(&self, i: usize) -> Option<&Payload> {
        self.values.get(i)
    }

    pub fn model(&self, i: usize) -> Option<&Model> {
        match self.get(i) {
            Some(Payload::Model(m)) => Some(m),
            _ => None,
        }
    }

    pub fn into_model(self, i: usize) -> (Option<Model>, Options) {
        let Normalized { values, options } = self;
        match values.into_iter().nth(i) {
            Some(Payload::Model(m)) => (Some(m), options),
            _ => (None, options),
        }
    }

    pub fn into_collection(self, i: usize) -> (Vec<Model>, Options) {
        let Normalized { values, options } = self;
        match values.into_iter().nth(i) {
            Some(Payload::Collection(c)) => (c, options),
            Some(Payload::Model(m)) => (vec![m], options),
            _ => (Vec::new(), options),
        }
    }

    /// Id at `i`; a model yields its own id.
    pub fn id(&self, i: usize) -> Option<String> {
        match self.get(i) {
            Some(Payload::Id(id)) => Some(id.clone()),
            Some(Payload::Model(m)) => Some(m.id.clone()),
            _ => None,
        }
    }

    /// Truthiness at `i`: `true`, any id or any model.
    pub fn flag(&self, i: usize) -> bool {
        match self.get(i) {
            Some(Payload::Bool(b)) => *b,
            Some(Payload::Id(_)) | Some(Payload::Model(_)) => true,
            Some(Payload::Collection(c)) => !c.is_empty(),
            Some(Payload::Null) | None => false,
        }
    }
}

/// Checks a helper result against the arity table of `action`.
pub fn normalize(action: Action, result: ActionResult) -> Result<Normalized, ApiError> {
    let arity = action.arity();
    match result {
        ActionResult::Scalar(v) => {
            let values: Vec<Payload> = std::iter::once(fold(action, v))
                .chain(std::iter::once(Payload::Null))
                .take(arity)
                .collect();
            Ok(Normalized {
                values,
                options: Options::default(),
            })
        }
        ActionResult::Options(options) => Ok(Normalized {
            values: vec![Payload::Null; arity],
            options,
        }),
        ActionResult::Tuple(mut values, options) => {
            // A flat list of models for a collection action is one collection.
            if action.returns_collection() && values.len() > 1 && values.iter().all(Payload::is_model) {
                let models: Vec<Model> = values
                    .drain(..)
                    .filter_map(|p| match p {
                        Payload::Model(m) => Some(m),
                        _ => None,
                    })
                    .collect();
                values.push(Payload::Collection(models));
            }
            if values.len() != arity {
                return Err(ApiError::unexpected_return(action));
            }
            let values = values.into_iter().map(|v| fold(action, v)).collect();
            Ok(Normalized {
                values,
                options: options.unwrap_or_default(),
            })
        }
    }
}

fn fold(action: Action, v: Payload) -> Payload {
    match v {
        Payload::Model(m) if action.returns_collection() => Payload::Collection(vec![m]),
        other => other,
    }
}

/// Identifiers of a collection, used for linkage.
pub fn identifiers(models: &[Model]) -> Vec<Identifier> {
    models.iter().map(Model::identifier).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_pads_to_arity() {
        let n = normalize(Action::Create, Model::new("posts", "1").into()).unwrap();
        assert_eq!(n.values.len(), 2);
        assert!(n.model(0).is_some());
        assert_eq!(n.values[1], Payload::Null);

        let n = normalize(Action::Show, Model::new("posts", "1").into()).unwrap();
        assert_eq!(n.values.len(), 1);
    }

    #[test]
    fn bare_options_are_meta_only() {
        let n = normalize(Action::Destroy, Options::default().meta(json!({"ok": true})).into()).unwrap();
        assert_eq!(n.values, vec![Payload::Null]);
        assert_eq!(n.options.meta.unwrap()["ok"], true);
    }

    #[test]
    fn flat_models_fold_into_a_collection() {
        let result = ActionResult::Tuple(
            vec![
                Payload::Model(Model::new("tags", "1")),
                Payload::Model(Model::new("tags", "2")),
            ],
            None,
        );
        let (models, _) = normalize(Action::Index, result).unwrap().into_collection(0);
        assert_eq!(models.len(), 2);
    }

    #[test]
    fn wrong_tuple_length_is_a_helper_error() {
        let result = ActionResult::Tuple(vec![Payload::Bool(true), Payload::Bool(false)], None);
        let err = normalize(Action::Merge, result).unwrap_err();
        assert!(matches!(err, ApiError::ActionHelper(_)));
    }

    #[test]
    fn create_tuple_with_options() {
        let result: ActionResult =
            (String::from("7"), Model::new("posts", "7"), Options::default().link("x", "/x")).into();
        let n = normalize(Action::Create, result).unwrap();
        assert_eq!(n.id(0).as_deref(), Some("7"));
        assert!(n.model(1).is_some());
        assert!(n.options.links.contains_key("x"));
    }

    #[test]
    fn flags() {
        let n = normalize(Action::Graft, true.into()).unwrap();
        assert!(n.flag(0));
        let n = normalize(Action::Graft, ().into()).unwrap();
        assert!(!n.flag(0));
        let n = normalize(Action::Merge, (false, Options::default().meta(json!({"a": 1}))).into()).unwrap();
        assert!(!n.flag(0));
        assert!(n.options.meta.is_some());
    }
}
