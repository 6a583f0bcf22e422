use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::{require_admin, Authenticator},
    handlers::{
        health, list_contacts, list_offers, login, respond_contact, respond_offer, submit_contact,
        submit_offer,
    },
    store::Store,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub cors_origins: Option<String>,
    /// Set `GAVEL_ADMIN_ISSUANCE=true` to let `POST /login` mint admin tokens.
    /// Off by default; the gate itself still accepts externally issued tokens.
    pub admin_issuance_enabled: bool,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    /// Bound on a single storage operation ($GAVEL_STORE_TIMEOUT_SECS).
    pub store_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("GAVEL_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("GAVEL_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("GAVEL_DATA_DIR").ok().map(PathBuf::from),
            cors_origins: std::env::var("GAVEL_CORS_ORIGINS").ok(),
            admin_issuance_enabled: std::env::var("GAVEL_ADMIN_ISSUANCE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            admin_email: std::env::var("GAVEL_ADMIN_EMAIL").ok(),
            admin_password: std::env::var("GAVEL_ADMIN_PASSWORD").ok(),
            store_timeout: Duration::from_secs(
                std::env::var("GAVEL_STORE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

/// Read a signing secret from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_secret_file(path: &std::path::Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read secret file: {}", path.display()))?;
    let secret = content.trim().to_string();
    if secret.is_empty() {
        anyhow::bail!("secret file is empty: {}", path.display());
    }
    Ok(secret)
}

/// Resolve the token-signing secret from `GAVEL_JWT_SECRET_FILE` (preferred)
/// or `GAVEL_JWT_SECRET`. Absence is a startup-time fatal error — there is no
/// runtime default.
pub fn resolve_jwt_secret() -> Result<String> {
    if let Ok(path) = std::env::var("GAVEL_JWT_SECRET_FILE") {
        let secret = read_secret_file(std::path::Path::new(&path))?;
        if std::env::var("GAVEL_JWT_SECRET").is_ok() {
            tracing::warn!("both GAVEL_JWT_SECRET and GAVEL_JWT_SECRET_FILE are set; using file");
        }
        return Ok(secret);
    }
    std::env::var("GAVEL_JWT_SECRET")
        .context("GAVEL_JWT_SECRET or GAVEL_JWT_SECRET_FILE environment variable is required")
}

/// Resolve the data directory, creating it if needed.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Build the application router. Public submission routes and the admin
/// review routes share paths but only the latter sit behind the auth gate.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/contact", post(submit_contact))
        .route("/offers", post(submit_offer))
        .route("/login", post(login));

    let admin = Router::new()
        .route("/contact", get(list_contacts))
        .route("/contact/{id}/response", post(respond_contact))
        .route("/offers", get(list_offers))
        .route("/offers/{id}/response", post(respond_offer))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new().merge(public).merge(admin).with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let jwt_secret = resolve_jwt_secret()?;

    if cfg.admin_issuance_enabled && (cfg.admin_email.is_none() || cfg.admin_password.is_none()) {
        anyhow::bail!(
            "GAVEL_ADMIN_EMAIL and GAVEL_ADMIN_PASSWORD are required \
             when GAVEL_ADMIN_ISSUANCE is enabled"
        );
    }

    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join("gavel.db");
    let store = Store::open_with_timeout(&db_path, cfg.store_timeout).context("open store")?;

    if cfg.admin_issuance_enabled {
        info!("admin credential issuance enabled");
    } else {
        info!("admin credential issuance disabled — /login will refuse");
    }

    let auth = Arc::new(Authenticator::new(
        &jwt_secret,
        cfg.admin_issuance_enabled,
        cfg.admin_email,
        cfg.admin_password,
    ));

    let state = AppState { store, auth };

    let app = build_router(state)
        .layer(build_cors(cfg.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "gavel server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
