use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Query;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use sessionguard::config::EngineConfig;
use sessionguard::middleware::{self as sm, SessionHandle, SessionLayerState};
use sessionguard::store::MemoryStore;

/// Minimal demo server exercising the engine over real HTTP. Not a
/// deliverable in its own right — it exists so the wiring in `middleware.rs`
/// can be driven by hand with `curl` during development.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().unwrap_or_else(|e| {
        eprintln!("config error: {e}, using defaults");
        EngineConfig::default()
    });

    sessionguard::logging::init_logging("info")?;
    info!("starting sessionguard-demo v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(MemoryStore::new());
    store.clone().start_cleanup_task(60);

    let layer_state = Arc::new(SessionLayerState::new(Arc::new(config), store));

    let app = Router::new()
        .route("/", get(whoami))
        .route("/set", get(set_value))
        .route("/regenerate", post(regenerate))
        .route("/logout", post(logout))
        .route("/csrf", get(issue_csrf))
        .route("/csrf/verify", post(verify_csrf))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    layer_state,
                    sm::session_middleware,
                )),
        );

    let addr = "127.0.0.1:3000";
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{}", addr);

    // `ConnectInfo<SocketAddr>` must be inserted into request extensions for
    // the middleware's peer-address fallback (used for IP binding when no
    // proxy header is present) to ever see anything but `0.0.0.0`.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down");
    })
    .await?;

    Ok(())
}

async fn whoami(session: SessionHandle) -> impl IntoResponse {
    let engine = session.engine();
    Json(json!({
        "data": engine.get("u").ok().flatten(),
    }))
}

#[derive(Deserialize)]
struct SetQuery {
    value: i64,
}

async fn set_value(session: SessionHandle, Query(query): Query<SetQuery>) -> impl IntoResponse {
    let mut engine = session.engine();
    match engine.set("u", Value::from(query.value)) {
        Ok(()) => Json(json!({ "ok": true })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}

async fn regenerate(session: SessionHandle) -> impl IntoResponse {
    let mut engine = session.engine();
    match engine.regenerate_id() {
        Ok(()) => Json(json!({ "ok": true })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}

async fn logout(session: SessionHandle) -> impl IntoResponse {
    let mut engine = session.engine();
    match engine.destroy() {
        Ok(()) => Json(json!({ "ok": true })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}

async fn issue_csrf(session: SessionHandle) -> impl IntoResponse {
    let mut engine = session.engine();
    match engine.generate_csrf_token() {
        Ok(token) => Json(json!({ "token": token.raw() })),
        Err(err) => Json(json!({ "error": err.to_string() })),
    }
}

#[derive(Deserialize)]
struct CsrfQuery {
    token: String,
}

async fn verify_csrf(session: SessionHandle, Query(query): Query<CsrfQuery>) -> impl IntoResponse {
    let engine = session.engine();
    match engine.is_csrf_token_valid(&query.token) {
        Ok(valid) => Json(json!({ "valid": valid })),
        Err(err) => Json(json!({ "error": err.to_string() })),
    }
}
