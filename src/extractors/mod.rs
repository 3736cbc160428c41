pub mod request;

pub use request::{effective_method, JsonApiRequest, METHOD_OVERRIDE_HEADER};
