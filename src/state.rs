//! Shared engine state for all routes: declarations, frozen config, store and serializer.

use crate::action::{BoxFuture, Ctx, Options, RoleResolver};
use crate::config::{
    compile_id_pattern, validate, Action, ConfigTree, FrozenConfig, PolicyDocument, Scope,
    Settings, Target,
};
use crate::error::{log_error, ApiError, ConfigError, HelperError};
use crate::model::{Identifier, Linkage, Model};
use crate::resource::{ResourceBuilder, ResourceDef};
use crate::roles::RoleSet;
use crate::serializer::{DocumentOptions, DocumentSerializer, Serializer};
use crate::store::Persistence;
use axum::response::Response;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

struct EngineInner<P: Persistence> {
    store: P,
    settings: Settings,
    config: FrozenConfig,
    resources: BTreeMap<String, ResourceDef<P>>,
    serializer: Arc<dyn Serializer>,
    role_resolver: RoleResolver<P>,
}

/// Cheap to clone; every request handler holds one.
pub struct Engine<P: Persistence>(Arc<EngineInner<P>>);

impl<P: Persistence> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Engine(self.0.clone())
    }
}

impl<P: Persistence> Engine<P> {
    pub fn builder(store: P) -> EngineBuilder<P> {
        EngineBuilder::new(store)
    }

    pub fn store(&self) -> &P {
        &self.0.store
    }

    pub fn settings(&self) -> &Settings {
        &self.0.settings
    }

    pub fn config(&self) -> &FrozenConfig {
        &self.0.config
    }

    pub fn serializer(&self) -> &dyn Serializer {
        &*self.0.serializer
    }

    pub fn role_resolver(&self) -> RoleResolver<P> {
        self.0.role_resolver.clone()
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDef<P>> {
        self.0.resources.get(name)
    }

    pub fn resource_by_path(&self, segment: &str) -> Result<&ResourceDef<P>, ApiError> {
        self.0
            .resources
            .values()
            .find(|r| r.path == segment)
            .ok_or_else(|| ApiError::not_found(format!("Unknown resource `{segment}'")))
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceDef<P>> {
        self.0.resources.values()
    }

    /// Maps a helper error raised while running `action` onto the error taxonomy.
    pub fn classify(&self, action: Action, err: HelperError) -> ApiError {
        let settings = &self.0.settings;
        settings
            .exceptions
            .classify(action, &settings.conflict_actions, err)
    }

    /// Runs `f` inside the request's transaction, opening one if none is active.
    /// Only the outermost call commits or rolls back.
    pub(crate) async fn transaction<T, F, Fut>(&self, ctx: &Ctx<P>, action: Action, f: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if ctx.in_transaction() {
            return f().await;
        }
        let tx = self
            .store()
            .begin()
            .await
            .map_err(|e| self.classify(action, e))?;
        *ctx.session().lock().await = Some(tx);

        let out = f().await;
        let Some(tx) = ctx.session().lock().await.take() else {
            return out;
        };
        match out {
            Ok(value) => {
                self.store()
                    .commit(tx)
                    .await
                    .map_err(|e| self.classify(action, e))?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(action = %action, status = err.status().as_u16(), "rolling back");
                if let Err(rb) = self.store().rollback(tx).await {
                    tracing::error!(action = %action, error = %rb, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Error response: logged once, serialized by the engine's serializer.
    pub fn error_response(&self, err: &ApiError) -> Response {
        let objects = err.error_objects();
        log_error(&self.0.settings.progname, err, &objects);
        crate::response::document(err.status(), self.serializer().errors(&objects))
    }

    pub(crate) fn respond(&self, result: Result<Response, ApiError>) -> Response {
        result.unwrap_or_else(|err| self.error_response(&err))
    }

    /// Includes the caller may see: client or helper-default paths, minus excluded prefixes,
    /// minus paths through relationships whose `fetch`/`pluck` the caller may not run.
    pub(crate) async fn readable_includes(
        &self,
        ctx: &Ctx<P>,
        resource: &str,
        options: &Options,
    ) -> Result<Vec<String>, ApiError> {
        let mut included = ctx.query().effective_includes(options);
        let mut roles: Option<RoleSet> = None;
        let mut keep = Vec::with_capacity(included.len());
        for path in included.drain(..) {
            let mut cursor = Some(resource.to_string());
            let mut readable = true;
            for term in path.split('.') {
                let Some(def) = cursor.as_deref().and_then(|c| self.resource(c)) else {
                    break;
                };
                let Some(rel) = def.relationship(term) else {
                    readable = false;
                    break;
                };
                let (target, action) = match rel.scope {
                    Scope::HasOne => (Target::HasOne(&def.name, &rel.name), Action::Pluck),
                    _ => (Target::HasMany(&def.name, &rel.name), Action::Fetch),
                };
                let required = &self.config().lookup(target, action)?.roles;
                if !required.is_empty() {
                    if roles.is_none() {
                        roles = Some(ctx.roles().await?);
                    }
                    if !roles.as_ref().map_or(false, |r| required.intersects(r)) {
                        readable = false;
                        break;
                    }
                }
                cursor = rel.related_type.clone();
            }
            if readable {
                keep.push(path);
            }
        }
        Ok(keep)
    }

    pub(crate) async fn document_options(
        &self,
        ctx: &Ctx<P>,
        resource: &str,
        options: Options,
    ) -> Result<DocumentOptions, ApiError> {
        let include = self.readable_includes(ctx, resource, &options).await?;
        Ok(DocumentOptions {
            include,
            fields: ctx.query().fields.clone(),
            meta: options.meta,
            links: options.links,
        })
    }

    pub(crate) async fn render_model(
        &self,
        ctx: &Ctx<P>,
        resource: &str,
        model: Option<&Model>,
        options: Options,
    ) -> Result<serde_json::Value, ApiError> {
        let opts = self.document_options(ctx, resource, options).await?;
        Ok(self.serializer().model(model, &opts))
    }

    pub(crate) async fn render_models(
        &self,
        ctx: &Ctx<P>,
        resource: &str,
        models: &[Model],
        options: Options,
    ) -> Result<serde_json::Value, ApiError> {
        let opts = self.document_options(ctx, resource, options).await?;
        Ok(self.serializer().models(models, &opts))
    }

    pub(crate) fn render_linkage(
        &self,
        parent: &Identifier,
        rel: &str,
        linkage: &Linkage,
        options: Options,
    ) -> serde_json::Value {
        let opts = DocumentOptions {
            meta: options.meta,
            links: options.links,
            ..Default::default()
        };
        self.serializer().linkage(parent, rel, linkage, &opts)
    }

    /// All JSON:API routes, with this engine as state.
    pub fn router(&self) -> axum::Router {
        crate::routes::jsonapi_routes(self.clone())
    }

    /// Link prefix for page links: base URL plus `path`.
    pub(crate) fn href(&self, path: &str) -> String {
        format!("{}{}", self.0.settings.base_url, path)
    }
}

/// Collects declarations; [`EngineBuilder::build`] validates and freezes them.
///
/// Configuration is applied in a fixed order: code defaults, policy defaults,
/// code declarations, then per-resource policy entries.
pub struct EngineBuilder<P: Persistence> {
    store: P,
    settings: Settings,
    serializer: Option<Arc<dyn Serializer>>,
    role_resolver: Option<RoleResolver<P>>,
    defaults: Vec<(Scope, Action, crate::config::ActionOptions)>,
    policy: Option<PolicyDocument>,
    resources: Vec<ResourceBuilder<P>>,
}

impl<P: Persistence> EngineBuilder<P> {
    pub fn new(store: P) -> Self {
        EngineBuilder {
            store,
            settings: Settings::default(),
            serializer: None,
            role_resolver: None,
            defaults: Vec::new(),
            policy: None,
            resources: Vec::new(),
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Computes the caller's roles, at most once per request.
    pub fn role<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Ctx<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RoleSet, HelperError>> + Send + 'static,
    {
        self.role_resolver = Some(Arc::new(
            move |ctx: Ctx<P>| -> BoxFuture<'static, Result<RoleSet, HelperError>> { Box::pin(f(ctx)) },
        ));
        self
    }

    /// Template for every resource or relationship entry of `scope`.
    pub fn default_action(mut self, scope: Scope, action: Action, opts: crate::config::ActionOptions) -> Self {
        self.defaults.push((scope, action, opts));
        self
    }

    pub fn policy(mut self, policy: PolicyDocument) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn resource(mut self, name: &str, f: impl FnOnce(&mut ResourceBuilder<P>)) -> Self {
        let mut builder = ResourceBuilder::new(name);
        f(&mut builder);
        self.resources.push(builder);
        self
    }

    pub fn build(self) -> Result<Engine<P>, ConfigError> {
        self.settings.validate()?;
        let mut tree = ConfigTree::new();
        for (scope, action, opts) in self.defaults {
            tree.set_default(scope, action, opts)?;
        }
        if let Some(policy) = &self.policy {
            policy.apply_defaults(&mut tree)?;
        }

        for res in &self.resources {
            tree.config_for(res.name());
            let outline = res.outline();
            for (rel, _) in &outline.has_one {
                tree.has_one_for(res.name(), rel);
            }
            for (rel, _) in &outline.has_many {
                tree.has_many_for(res.name(), rel);
            }
            for (rel, action, opts) in res.declarations() {
                let target = match &rel {
                    None => Target::Resource(res.name()),
                    Some((Scope::HasOne, r)) => Target::HasOne(res.name(), r),
                    Some((_, r)) => Target::HasMany(res.name(), r),
                };
                tree.declare(target, action, opts)?;
            }
        }
        if let Some(policy) = &self.policy {
            policy.apply_resources(&mut tree)?;
        }

        let outlines: Vec<_> = self.resources.iter().map(ResourceBuilder::outline).collect();
        validate(&outlines, &tree)?;

        let mut resources = BTreeMap::new();
        for (res, outline) in self.resources.into_iter().zip(outlines) {
            let id_pattern = outline
                .id_pattern
                .as_deref()
                .map(|p| compile_id_pattern(&outline.name, p))
                .transpose()?;
            let def = res.into_def(id_pattern)?;
            if resources.contains_key(&def.name) {
                return Err(ConfigError::Validation(format!("resource `{}` declared twice", def.name)));
            }
            resources.insert(def.name.clone(), def);
        }

        let serializer = self.serializer.unwrap_or_else(|| {
            Arc::new(DocumentSerializer::new(
                self.settings.base_url.clone(),
                self.settings.jsonapi_version.clone(),
            ))
        });
        let role_resolver = self.role_resolver.unwrap_or_else(|| {
            Arc::new(|_ctx: Ctx<P>| -> BoxFuture<'static, Result<RoleSet, HelperError>> {
                Box::pin(std::future::ready(Ok(RoleSet::new())))
            })
        });
        tracing::info!(resources = resources.len(), "jsonapi engine configured");
        Ok(Engine(Arc::new(EngineInner {
            store: self.store,
            settings: self.settings,
            config: tree.freeze(),
            resources,
            serializer,
            role_resolver,
        })))
    }
}
