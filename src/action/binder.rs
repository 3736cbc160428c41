//! Binds typed async helpers to actions behind one calling convention.

use crate::action::result::{normalize, ActionResult, Normalized};
use crate::action::{BoxFuture, Ctx};
use crate::config::Action;
use crate::error::{ApiError, HelperError};
use crate::model::Identifier;
use crate::store::Persistence;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Arguments of one helper call.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionArgs {
    None,
    Id(String),
    Ids(Vec<String>),
    Attributes {
        attributes: Map<String, Value>,
        id: Option<String>,
    },
    Identifier(Identifier),
    Identifiers(Vec<Identifier>),
}

impl ActionArgs {
    fn describe(&self) -> &'static str {
        match self {
            ActionArgs::None => "no arguments",
            ActionArgs::Id(_) => "an id",
            ActionArgs::Ids(_) => "a list of ids",
            ActionArgs::Attributes { id: None, .. } => "attributes",
            ActionArgs::Attributes { id: Some(_), .. } => "attributes and an id",
            ActionArgs::Identifier(_) => "a resource identifier",
            ActionArgs::Identifiers(_) => "resource identifiers",
        }
    }
}

/// Typed view of [`ActionArgs`] a helper closure accepts.
pub trait FromArgs: Sized + Send + 'static {
    /// For `create`: whether this argument shape takes a client-generated id.
    const ID_POLICY: IdPolicy = IdPolicy::Server;

    fn from_args(args: ActionArgs) -> Option<Self>;
}

impl FromArgs for () {
    fn from_args(args: ActionArgs) -> Option<Self> {
        matches!(args, ActionArgs::None).then_some(())
    }
}

impl FromArgs for String {
    fn from_args(args: ActionArgs) -> Option<Self> {
        match args {
            ActionArgs::Id(id) => Some(id),
            _ => None,
        }
    }
}

impl FromArgs for Vec<String> {
    fn from_args(args: ActionArgs) -> Option<Self> {
        match args {
            ActionArgs::Ids(ids) => Some(ids),
            _ => None,
        }
    }
}

impl FromArgs for Map<String, Value> {
    fn from_args(args: ActionArgs) -> Option<Self> {
        match args {
            ActionArgs::Attributes { attributes, id: None } => Some(attributes),
            _ => None,
        }
    }
}

impl FromArgs for (Map<String, Value>, String) {
    const ID_POLICY: IdPolicy = IdPolicy::Client;

    fn from_args(args: ActionArgs) -> Option<Self> {
        match args {
            ActionArgs::Attributes {
                attributes,
                id: Some(id),
            } => Some((attributes, id)),
            _ => None,
        }
    }
}

impl FromArgs for Identifier {
    fn from_args(args: ActionArgs) -> Option<Self> {
        match args {
            ActionArgs::Identifier(rio) => Some(rio),
            _ => None,
        }
    }
}

impl FromArgs for Vec<Identifier> {
    fn from_args(args: ActionArgs) -> Option<Self> {
        match args {
            ActionArgs::Identifiers(rios) => Some(rios),
            _ => None,
        }
    }
}

pub type Handler<P> = Arc<
    dyn Fn(Ctx<P>, ActionArgs) -> BoxFuture<'static, Result<ActionResult, HelperError>> + Send + Sync,
>;

pub type Hook<P> =
    Arc<dyn Fn(Ctx<P>, ActionArgs) -> BoxFuture<'static, Result<(), HelperError>> + Send + Sync>;

/// Whether `create` takes the id from the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdPolicy {
    Server,
    Client,
}

fn mismatch<T: Send + 'static>(action: Action, args: &ActionArgs) -> BoxFuture<'static, Result<T, HelperError>> {
    let err = ApiError::ActionHelper(format!(
        "Unexpected block signature for `{}' action helper: called with {}",
        action,
        args.describe()
    ));
    Box::pin(std::future::ready(Err(err.into())))
}

/// Wraps a typed helper into a [`Handler`].
pub fn handler<P, A, F, Fut, R>(action: Action, f: F) -> Handler<P>
where
    P: Persistence,
    A: FromArgs,
    F: Fn(Ctx<P>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HelperError>> + Send + 'static,
    R: Into<ActionResult>,
{
    Arc::new(
        move |ctx: Ctx<P>, args: ActionArgs| -> BoxFuture<'static, Result<ActionResult, HelperError>> {
            let described = args.clone();
            match A::from_args(args) {
                Some(a) => {
                    let fut = f(ctx, a);
                    Box::pin(async move { fut.await.map(Into::into) })
                }
                None => mismatch(action, &described),
            }
        },
    )
}

/// Wraps a `before_<action>` hook; it sees the raw arguments.
pub fn hook<P, F, Fut>(f: F) -> Hook<P>
where
    P: Persistence,
    F: Fn(Ctx<P>, ActionArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HelperError>> + Send + 'static,
{
    Arc::new(
        move |ctx: Ctx<P>, args: ActionArgs| -> BoxFuture<'static, Result<(), HelperError>> {
            Box::pin(f(ctx, args))
        },
    )
}

pub struct BoundAction<P: Persistence> {
    pub action: Action,
    handler: Handler<P>,
    before: Option<Hook<P>>,
    id_policy: IdPolicy,
}

impl<P: Persistence> Clone for BoundAction<P> {
    fn clone(&self) -> Self {
        BoundAction {
            action: self.action,
            handler: self.handler.clone(),
            before: self.before.clone(),
            id_policy: self.id_policy,
        }
    }
}

impl<P: Persistence> BoundAction<P> {
    pub fn new(action: Action, handler: Handler<P>) -> Self {
        BoundAction {
            action,
            handler,
            before: None,
            id_policy: IdPolicy::Server,
        }
    }

    pub(crate) fn with_id_policy(mut self, policy: IdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    pub(crate) fn set_before(&mut self, hook: Hook<P>) {
        self.before = Some(hook);
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }

    /// Runs the hook and the helper, then classifies errors and normalizes the result.
    pub async fn invoke(&self, ctx: &Ctx<P>, args: ActionArgs) -> Result<Normalized, ApiError> {
        let engine = ctx.engine();
        tracing::debug!(
            resource = %ctx.resource_name(),
            relationship = ?ctx.relationship(),
            action = %self.action,
            sideloaded = ctx.is_sideloaded(),
            "invoke action helper"
        );
        if let Some(before) = &self.before {
            before(ctx.clone(), args.clone())
                .await
                .map_err(|e| engine.classify(self.action, e))?;
        }
        let result = (self.handler)(ctx.clone(), args)
            .await
            .map_err(|e| engine.classify(self.action, e))?;
        normalize(self.action, result)
    }
}
