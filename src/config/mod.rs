pub mod exceptions;
pub mod loader;
pub mod settings;
pub mod tree;
pub mod types;
pub mod validator;

pub use exceptions::*;
pub use loader::*;
pub use settings::*;
pub use tree::*;
pub use types::*;
pub use validator::*;
