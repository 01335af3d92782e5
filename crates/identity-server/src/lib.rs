pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod validate;

pub use config::ServerConfig;
pub use error::ApiError;
pub use handlers::AppState;
pub use server::{build_router, start, ServerHandle};
