pub mod loader;
pub mod schema;

pub use loader::{load_from_env, load_from_lookup};
pub use schema::{LogFormat, ServiceConfig};
