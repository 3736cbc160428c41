//! Action helpers: binding, invocation and the per-request context they run in.

pub mod binder;
pub mod context;
pub mod result;

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use binder::{ActionArgs, BoundAction, FromArgs, IdPolicy};
pub use context::{Ctx, RoleResolver};
pub use result::{normalize, ActionResult, Normalized, Options, Payload};
