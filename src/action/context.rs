//! Request context handed to every helper, hook and role resolver.

use crate::action::BoxFuture;
use crate::config::{Action, ActionConfig, Scope, Target};
use crate::error::{ApiError, HelperError};
use crate::model::Model;
use crate::query::QueryParams;
use crate::roles::{authorized, RoleSet};
use crate::state::Engine;
use crate::store::{Persistence, Session};
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::{MappedMutexGuard, MutexGuard, OnceCell};

/// Computes the caller's roles. Runs at most once per request; must not call [`Ctx::roles`].
pub type RoleResolver<P> =
    Arc<dyn Fn(Ctx<P>) -> BoxFuture<'static, Result<RoleSet, HelperError>> + Send + Sync>;

pub(crate) struct RequestContext<P: Persistence> {
    engine: Engine<P>,
    resource_name: String,
    relationship: Option<(Scope, String)>,
    headers: Arc<HeaderMap>,
    query: Arc<QueryParams>,
    document: Arc<Value>,
    resource: RwLock<Option<Arc<Model>>>,
    roles: Arc<OnceCell<RoleSet>>,
    session: Session<P>,
    acting_as: Option<Action>,
}

/// Cheap to clone; all clones see the same resolved resource, roles and transaction.
pub struct Ctx<P: Persistence>(Arc<RequestContext<P>>);

impl<P: Persistence> Clone for Ctx<P> {
    fn clone(&self) -> Self {
        Ctx(self.0.clone())
    }
}

impl<P: Persistence> Ctx<P> {
    pub(crate) fn new(
        engine: Engine<P>,
        resource_name: &str,
        headers: HeaderMap,
        query: QueryParams,
        document: Value,
    ) -> Self {
        Ctx(Arc::new(RequestContext {
            engine,
            resource_name: resource_name.to_string(),
            relationship: None,
            headers: Arc::new(headers),
            query: Arc::new(query),
            document: Arc::new(document),
            resource: RwLock::new(None),
            roles: Arc::new(OnceCell::new()),
            session: crate::store::new_session::<P>(),
            acting_as: None,
        }))
    }

    /// Same request, scoped to one relationship of the resource.
    pub(crate) fn for_relationship(&self, scope: Scope, rel: &str) -> Self {
        self.derive(scope, rel, self.0.document.clone(), self.0.acting_as)
    }

    /// Sub-dispatch of a sideloaded relationship: shares roles, resource and transaction.
    pub(crate) fn sideload(&self, scope: Scope, rel: &str, body: Value, parent: Action) -> Self {
        self.derive(scope, rel, Arc::new(body), Some(parent))
    }

    fn derive(&self, scope: Scope, rel: &str, document: Arc<Value>, acting_as: Option<Action>) -> Self {
        let inner = &self.0;
        Ctx(Arc::new(RequestContext {
            engine: inner.engine.clone(),
            resource_name: inner.resource_name.clone(),
            relationship: Some((scope, rel.to_string())),
            headers: inner.headers.clone(),
            query: inner.query.clone(),
            document,
            resource: RwLock::new(self.resource()),
            roles: inner.roles.clone(),
            session: inner.session.clone(),
            acting_as,
        }))
    }

    pub fn engine(&self) -> &Engine<P> {
        &self.0.engine
    }

    pub fn store(&self) -> &P {
        self.0.engine.store()
    }

    pub fn resource_name(&self) -> &str {
        &self.0.resource_name
    }

    pub fn relationship(&self) -> Option<&str> {
        self.0.relationship.as_ref().map(|(_, r)| r.as_str())
    }

    /// The resource resolved from the path, or created by `create`.
    pub fn resource(&self) -> Option<Arc<Model>> {
        match self.0.resource.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_resource(&self, model: Option<Model>) {
        let value = model.map(Arc::new);
        match self.0.resource.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.0.headers
    }

    pub fn query(&self) -> &QueryParams {
        &self.0.query
    }

    /// The parsed request document (`Value::Null` without a body).
    pub fn document(&self) -> &Value {
        &self.0.document
    }

    /// Whether this call is a sideloaded relationship write.
    pub fn is_sideloaded(&self) -> bool {
        self.0.acting_as.is_some()
    }

    /// Parent action a sideload runs under.
    pub fn acting_as(&self) -> Option<Action> {
        self.0.acting_as
    }

    /// The caller's roles, resolved once per request.
    pub async fn roles(&self) -> Result<RoleSet, ApiError> {
        let resolver = self.0.engine.role_resolver();
        self.0
            .roles
            .get_or_try_init(|| resolver(self.clone()))
            .await
            .cloned()
            .map_err(|e| e.into_api_error().unwrap_or_else(|e| ApiError::internal(&e)))
    }

    pub async fn has_role(&self, role: &str) -> Result<bool, ApiError> {
        Ok(self.roles().await?.contains(role))
    }

    fn target(&self) -> Target<'_> {
        match &self.0.relationship {
            None => Target::Resource(&self.0.resource_name),
            Some((Scope::HasOne, rel)) => Target::HasOne(&self.0.resource_name, rel),
            Some((_, rel)) => Target::HasMany(&self.0.resource_name, rel),
        }
    }

    pub(crate) fn action_config(&self, action: Action) -> Result<&ActionConfig, ApiError> {
        Ok(self.0.engine.config().lookup(self.target(), action)?)
    }

    /// Whether the caller may run `action` here: no roles required, a shared role,
    /// or a sideload under a parent action listed in `sideload_on`.
    pub async fn can(&self, action: Action) -> Result<bool, ApiError> {
        let cfg = self.action_config(action)?;
        if cfg.roles.is_empty() {
            return Ok(true);
        }
        if let Some(parent) = self.0.acting_as {
            if cfg.sideload_on.contains(&parent) {
                return Ok(true);
            }
        }
        let required = cfg.roles.clone();
        Ok(authorized(&required, &self.roles().await?))
    }

    pub(crate) async fn ensure_can(&self, action: Action) -> Result<(), ApiError> {
        if self.can(action).await? {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "You are not authorized to perform this action ({})",
                action
            )))
        }
    }

    pub(crate) fn session(&self) -> &Session<P> {
        &self.0.session
    }

    pub fn in_transaction(&self) -> bool {
        self.0
            .session
            .try_lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true)
    }

    /// The ambient transaction. Hold the guard only for the statements that need it.
    pub async fn tx(&self) -> Result<MappedMutexGuard<'_, P::Tx>, HelperError> {
        let guard = self.0.session.lock().await;
        MutexGuard::try_map(guard, |slot| slot.as_mut())
            .map_err(|_| HelperError::msg("no transaction is active"))
    }
}
