pub mod auth;
pub mod dirs;
pub mod handlers;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    pub auth: std::sync::Arc<auth::Authenticator>,
}

pub use server::{
    build_router, read_secret_file, resolve_data_dir, resolve_jwt_secret, run, ServerConfig,
};
