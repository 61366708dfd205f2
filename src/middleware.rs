//! Adapts `SessionEngine` to an Axum request/response pipeline.
//!
//! Mirrors the shape of the handler-chain middleware this workspace already
//! uses (`async fn(Request, Next) -> Response`), plus an extractor so
//! handlers can reach the per-request engine without threading it through
//! every function signature.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::header::{self, HeaderValue};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::config::EngineConfig;
use crate::cookie::CookieEmitter;
use crate::engine::{extract_cookie_value, SessionEngine};
use crate::fingerprint::RequestMeta;
use crate::store::Store;

/// Shared, immutable per-application state the middleware closes over.
/// Built once at startup and handed to `axum::middleware::from_fn_with_state`.
pub struct SessionLayerState {
    config: Arc<EngineConfig>,
    store: Arc<dyn Store>,
    emitter: CookieEmitter,
}

impl SessionLayerState {
    pub fn new(config: Arc<EngineConfig>, store: Arc<dyn Store>) -> Self {
        let emitter = CookieEmitter::new(&config.cookie);
        Self {
            config,
            store,
            emitter,
        }
    }
}

/// Request-extension handle to the engine bound to the current request.
/// Cloning shares the same underlying engine instance — handlers don't get
/// their own copy.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<SessionEngine>>);

impl SessionHandle {
    pub fn engine(&self) -> MutexGuard<'_, SessionEngine> {
        self.0.lock().expect("session engine mutex poisoned")
    }
}

impl<S> FromRequestParts<S> for SessionHandle
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "session middleware not installed"))
    }
}

/// Runs `start` before the handler sees the request and `commit` after the
/// handler returns, attaching `Set-Cookie` to the outgoing response. A
/// construction or store failure short-circuits with `500` rather than
/// letting the handler run against an uninitialized engine.
pub async fn session_middleware(
    State(state): State<Arc<SessionLayerState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_str = |name: &'static str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let cookie_header = header_str(header::COOKIE.as_str());
    let user_agent = header_str(header::USER_AGENT.as_str());
    let forwarded_for = header_str("x-forwarded-for");
    let client_ip_header = header_str("client-ip");
    let real_ip_header = header_str("x-real-ip");
    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string());

    let meta = RequestMeta {
        forwarded_for: forwarded_for.as_deref(),
        client_ip_header: client_ip_header.as_deref(),
        real_ip_header: real_ip_header.as_deref(),
        peer_addr: peer_addr.as_deref(),
        user_agent: user_agent.as_deref(),
    };

    let mut engine = match SessionEngine::new(state.config.clone(), state.store.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            tracing::error!(error = %err, "failed to construct session engine");
            return (StatusCode::INTERNAL_SERVER_ERROR, "session engine unavailable").into_response_from_middleware();
        }
    };

    let cookie_value = cookie_header
        .as_deref()
        .and_then(|header| extract_cookie_value(Some(header), &state.config.cookie.name))
        .map(str::to_string);

    if let Err(err) = engine.start(&meta, cookie_value.as_deref()) {
        tracing::error!(error = %err, "session start failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "session start failed").into_response_from_middleware();
    }

    let handle = Arc::new(Mutex::new(engine));
    request.extensions_mut().insert(SessionHandle(handle.clone()));

    let mut response = next.run(request).await;

    let commit_result = handle
        .lock()
        .expect("session engine mutex poisoned")
        .commit(&state.emitter);

    match commit_result {
        Ok(Some(cookie_value)) => match HeaderValue::from_str(&cookie_value) {
            Ok(value) => {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            Err(err) => {
                tracing::error!(error = %err, "built an unencodable Set-Cookie header value");
            }
        },
        Ok(None) => {}
        Err(err) => {
            tracing::error!(error = %err, "session commit failed");
        }
    }

    response
}

/// Small shim so the early-return error paths above read like ordinary
/// `IntoResponse` conversions without pulling in `axum::response::IntoResponse`
/// just for a tuple.
trait IntoMiddlewareResponse {
    fn into_response_from_middleware(self) -> Response;
}

impl IntoMiddlewareResponse for (StatusCode, &'static str) {
    fn into_response_from_middleware(self) -> Response {
        use axum::response::IntoResponse;
        self.into_response()
    }
}
