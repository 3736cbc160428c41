//! JSON:API SDK: declarative resource actions with roles, relationship routes and
//! transactional sideloading on axum.

pub mod action;
pub mod case;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod model;
pub mod query;
pub mod reconcile;
pub mod resource;
pub mod response;
pub mod roles;
pub mod routes;
pub mod serializer;
pub mod sideload;
pub mod sql;
pub mod state;
pub mod store;

pub use action::{ActionArgs, ActionResult, Ctx, Options, Payload};
pub use config::{
    load_policy_file, parse_policy, Action, ActionOptions, ExceptionClass, Exceptions,
    PolicyDocument, Scope, Settings,
};
pub use error::{ApiError, ConfigError, ErrorObject, FieldError, HelperError};
pub use model::{Identifier, Linkage, Model};
pub use reconcile::SetOp;
pub use resource::{RelationshipBuilder, ResourceBuilder};
pub use roles::{Role, RoleSet};
pub use routes::{common_routes, jsonapi_routes};
pub use serializer::{DocumentOptions, DocumentSerializer, Serializer};
pub use state::{Engine, EngineBuilder};
pub use store::{
    configure_exceptions, ensure_database_exists, MemoryStore, Persistence, PgStore, RelatedSet,
};
