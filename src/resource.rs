//! Resource declarations: bound helpers per action, relationships, and the builder DSL.

use crate::action::binder::{handler, hook, Hook};
use crate::action::{ActionArgs, ActionResult, BoundAction, Ctx, FromArgs, IdPolicy};
use crate::case::dasherize;
use crate::config::{Action, ActionOptions, ResourceOutline, Scope};
use crate::error::{ConfigError, HelperError};
use crate::model::Identifier;
use crate::roles::Role;
use crate::store::Persistence;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::future::Future;

pub struct RelationshipDef<P: Persistence> {
    pub name: String,
    /// Dasherized path segment.
    pub path: String,
    pub scope: Scope,
    pub related_type: Option<String>,
    pub(crate) actions: BTreeMap<Action, BoundAction<P>>,
}

impl<P: Persistence> RelationshipDef<P> {
    pub fn bound(&self, action: Action) -> Option<&BoundAction<P>> {
        self.actions.get(&action)
    }

    pub fn implements(&self, action: Action) -> bool {
        self.actions.contains_key(&action)
    }
}

pub struct ResourceDef<P: Persistence> {
    pub name: String,
    pub path: String,
    pub(crate) id_pattern: Option<Regex>,
    pub(crate) actions: BTreeMap<Action, BoundAction<P>>,
    pub(crate) find: Option<BoundAction<P>>,
    pub(crate) validate: Option<Hook<P>>,
    pub(crate) relationships: BTreeMap<String, RelationshipDef<P>>,
}

impl<P: Persistence> ResourceDef<P> {
    pub fn bound(&self, action: Action) -> Option<&BoundAction<P>> {
        self.actions.get(&action)
    }

    /// `show` is implemented by a `show` helper or, failing that, the finder.
    pub fn implements(&self, action: Action) -> bool {
        self.actions.contains_key(&action) || (action == Action::Show && self.find.is_some())
    }

    pub fn id_matches(&self, id: &str) -> bool {
        self.id_pattern.as_ref().map_or(true, |re| re.is_match(id))
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef<P>> {
        self.relationships.get(name)
    }

    pub fn relationship_by_path(&self, path: &str) -> Option<&RelationshipDef<P>> {
        self.relationships.values().find(|r| r.path == path)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipDef<P>> {
        self.relationships.values()
    }

    /// Helper used to load the resource named in a member path.
    pub(crate) fn resolver(&self) -> Option<&BoundAction<P>> {
        self.find.as_ref().or_else(|| self.actions.get(&Action::Show))
    }
}

/// Fluent access to the options of one bound action.
pub struct ActionSetter<'a, P: Persistence> {
    bound: &'a mut BoundAction<P>,
    opts: &'a mut ActionOptions,
}

impl<'a, P: Persistence> ActionSetter<'a, P> {
    pub fn roles<I, R>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        *self.opts = std::mem::take(self.opts).roles(roles);
        self
    }

    pub fn sideload_on(self, parents: impl IntoIterator<Item = Action>) -> Self {
        *self.opts = std::mem::take(self.opts).sideload_on(parents);
        self
    }

    pub fn filter_by<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.opts = std::mem::take(self.opts).filter_by(fields);
        self
    }

    pub fn sort_by<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.opts = std::mem::take(self.opts).sort_by(fields);
        self
    }

    /// Runs before the helper with the same arguments; an error short-circuits the action.
    pub fn before<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Ctx<P>, ActionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HelperError>> + Send + 'static,
    {
        self.bound.set_before(hook(f));
        self
    }
}

fn bind<'a, P, A, F, Fut, R>(
    actions: &'a mut BTreeMap<Action, BoundAction<P>>,
    options: &'a mut BTreeMap<Action, ActionOptions>,
    action: Action,
    f: F,
) -> ActionSetter<'a, P>
where
    P: Persistence,
    A: FromArgs,
    F: Fn(Ctx<P>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
    R: Into<ActionResult>,
{
    let bound = BoundAction::new(action, handler(action, f)).with_id_policy(A::ID_POLICY);
    let bound = match actions.entry(action) {
        Entry::Occupied(mut e) => {
            e.insert(bound);
            e.into_mut()
        }
        Entry::Vacant(e) => e.insert(bound),
    };
    ActionSetter {
        bound,
        opts: options.entry(action).or_default(),
    }
}

/// Declares one resource: `engine_builder.resource("posts", |r| { r.show(...); })`.
pub struct ResourceBuilder<P: Persistence> {
    name: String,
    path: String,
    id_pattern: Option<String>,
    actions: BTreeMap<Action, BoundAction<P>>,
    options: BTreeMap<Action, ActionOptions>,
    find: Option<BoundAction<P>>,
    validate: Option<Hook<P>>,
    relationships: Vec<RelationshipBuilder<P>>,
}

impl<P: Persistence> ResourceBuilder<P> {
    pub(crate) fn new(name: &str) -> Self {
        ResourceBuilder {
            name: name.to_string(),
            path: dasherize(name),
            id_pattern: None,
            actions: BTreeMap::new(),
            options: BTreeMap::new(),
            find: None,
            validate: None,
            relationships: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overrides the path segment (defaults to the dasherized name).
    pub fn path(&mut self, segment: &str) -> &mut Self {
        self.path = segment.trim_matches('/').to_string();
        self
    }

    /// Constrains `{id}`; non-matching ids are 404.
    pub fn id_pattern(&mut self, pattern: &str) -> &mut Self {
        self.id_pattern = Some(pattern.to_string());
        self
    }

    /// Access options for an action, with or without a helper.
    pub fn configure(&mut self, action: Action, opts: ActionOptions) -> &mut Self {
        self.options.insert(action, opts);
        self
    }

    /// Loads the resource named by a member path. `show` falls back to it.
    pub fn find<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Ctx<P>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
        R: Into<ActionResult>,
    {
        self.find = Some(BoundAction::new(Action::Show, handler(Action::Show, f)));
        self
    }

    pub fn index<F, Fut, R>(&mut self, f: F) -> ActionSetter<'_, P>
    where
        F: Fn(Ctx<P>, ()) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
        R: Into<ActionResult>,
    {
        bind(&mut self.actions, &mut self.options, Action::Index, f)
    }

    pub fn show<F, Fut, R>(&mut self, f: F) -> ActionSetter<'_, P>
    where
        F: Fn(Ctx<P>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
        R: Into<ActionResult>,
    {
        bind(&mut self.actions, &mut self.options, Action::Show, f)
    }

    pub fn show_many<F, Fut, R>(&mut self, f: F) -> ActionSetter<'_, P>
    where
        F: Fn(Ctx<P>, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
        R: Into<ActionResult>,
    {
        bind(&mut self.actions, &mut self.options, Action::ShowMany, f)
    }

    /// `A` is `Map<String, Value>` for server-generated ids or
    /// `(Map<String, Value>, String)` to accept client-generated ones.
    pub fn create<A, F, Fut, R>(&mut self, f: F) -> ActionSetter<'_, P>
    where
        A: FromArgs,
        F: Fn(Ctx<P>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
        R: Into<ActionResult>,
    {
        bind(&mut self.actions, &mut self.options, Action::Create, f)
    }

    pub fn update<F, Fut, R>(&mut self, f: F) -> ActionSetter<'_, P>
    where
        F: Fn(Ctx<P>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
        R: Into<ActionResult>,
    {
        bind(&mut self.actions, &mut self.options, Action::Update, f)
    }

    pub fn destroy<F, Fut, R>(&mut self, f: F) -> ActionSetter<'_, P>
    where
        F: Fn(Ctx<P>, ()) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
        R: Into<ActionResult>,
    {
        bind(&mut self.actions, &mut self.options, Action::Destroy, f)
    }

    /// Runs after `create`/`update` and their sideloads, inside the transaction.
    pub fn validate<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Ctx<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HelperError>> + Send + 'static,
    {
        self.validate = Some(hook(move |ctx, _args| f(ctx)));
        self
    }

    pub fn has_one(&mut self, name: &str, f: impl FnOnce(&mut RelationshipBuilder<P>)) -> &mut Self {
        self.relationship(name, Scope::HasOne, f)
    }

    pub fn has_many(&mut self, name: &str, f: impl FnOnce(&mut RelationshipBuilder<P>)) -> &mut Self {
        self.relationship(name, Scope::HasMany, f)
    }

    fn relationship(
        &mut self,
        name: &str,
        scope: Scope,
        f: impl FnOnce(&mut RelationshipBuilder<P>),
    ) -> &mut Self {
        let mut rel = RelationshipBuilder::new(name, scope);
        f(&mut rel);
        self.relationships.push(rel);
        self
    }

    pub(crate) fn outline(&self) -> ResourceOutline {
        let mut outline = ResourceOutline {
            name: self.name.clone(),
            path_segment: self.path.clone(),
            id_pattern: self.id_pattern.clone(),
            ..Default::default()
        };
        for rel in &self.relationships {
            let entry = (rel.name.clone(), rel.related_type.clone());
            match rel.scope {
                Scope::HasOne => outline.has_one.push(entry),
                _ => outline.has_many.push(entry),
            }
            for action in rel.actions.keys() {
                outline.bound.push((rel.scope, rel.name.clone(), *action));
            }
        }
        outline
    }

    /// Code declarations, as (relationship, action, options).
    pub(crate) fn declarations(&self) -> Vec<(Option<(Scope, String)>, Action, ActionOptions)> {
        let mut out: Vec<_> = self
            .options
            .iter()
            .map(|(a, o)| (None, *a, o.clone()))
            .collect();
        for rel in &self.relationships {
            for (action, opts) in &rel.options {
                out.push((Some((rel.scope, rel.name.clone())), *action, opts.clone()));
            }
        }
        out
    }

    /// Whether anything needs a resolved member resource.
    fn needs_resolver(&self) -> bool {
        self.actions
            .keys()
            .any(|a| matches!(a, Action::Update | Action::Destroy))
            || self.relationships.iter().any(|r| !r.actions.is_empty())
    }

    pub(crate) fn into_def(self, id_pattern: Option<Regex>) -> Result<ResourceDef<P>, ConfigError> {
        if self.needs_resolver() && self.find.is_none() && !self.actions.contains_key(&Action::Show) {
            return Err(ConfigError::Validation(format!(
                "`{}` has member actions but neither a finder nor a show helper",
                self.name
            )));
        }
        let relationships = self
            .relationships
            .into_iter()
            .map(|r| {
                (
                    r.name.clone(),
                    RelationshipDef {
                        path: dasherize(&r.name),
                        name: r.name,
                        scope: r.scope,
                        related_type: r.related_type,
                        actions: r.actions,
                    },
                )
            })
            .collect();
        Ok(ResourceDef {
            name: self.name,
            path: self.path,
            id_pattern,
            actions: self.actions,
            find: self.find,
            validate: self.validate,
            relationships,
        })
    }
}

/// Declares one relationship of a resource.
pub struct RelationshipBuilder<P: Persistence> {
    name: String,
    scope: Scope,
    related_type: Option<String>,
    actions: BTreeMap<Action, BoundAction<P>>,
    options: BTreeMap<Action, ActionOptions>,
}

macro_rules! relationship_action {
    ($(#[$doc:meta])* $method:ident, $action:expr, $arg:ty) => {
        $(#[$doc])*
        pub fn $method<F, Fut, R>(&mut self, f: F) -> ActionSetter<'_, P>
        where
            F: Fn(Ctx<P>, $arg) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
            R: Into<ActionResult>,
        {
            bind(&mut self.actions, &mut self.options, $action, f)
        }
    };
}

impl<P: Persistence> RelationshipBuilder<P> {
    fn new(name: &str, scope: Scope) -> Self {
        RelationshipBuilder {
            name: name.to_string(),
            scope,
            related_type: None,
            actions: BTreeMap::new(),
            options: BTreeMap::new(),
        }
    }

    /// Resource type on the other end; used to walk include paths.
    pub fn related(&mut self, kind: &str) -> &mut Self {
        self.related_type = Some(kind.to_string());
        self
    }

    pub fn configure(&mut self, action: Action, opts: ActionOptions) -> &mut Self {
        self.options.insert(action, opts);
        self
    }

    relationship_action!(
        /// Reads the related resource (to-one).
        pluck, Action::Pluck, ()
    );
    relationship_action!(prune, Action::Prune, ());
    relationship_action!(graft, Action::Graft, Identifier);
    relationship_action!(
        /// Reads the related collection (to-many).
        fetch, Action::Fetch, ()
    );
    relationship_action!(clear, Action::Clear, ());
    relationship_action!(replace, Action::Replace, Vec<Identifier>);
    relationship_action!(merge, Action::Merge, Vec<Identifier>);
    relationship_action!(subtract, Action::Subtract, Vec<Identifier>);
}

impl<P: Persistence> ResourceDef<P> {
    /// Id policy of the bound `create`.
    pub fn create_id_policy(&self) -> Option<IdPolicy> {
        self.bound(Action::Create).map(BoundAction::id_policy)
    }
}
