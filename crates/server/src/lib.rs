use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_lite::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use skyhaven_engine::{
    Catalog, GameConfig, GameError, GameSession, IslandStore, ProductionScheduler, SqliteStore,
};
use skyhaven_protocol::{
    BuildingType, BuildingTypeInfo, GridPos, IslandSnapshot, IslandUpdate, ResourceAmount,
};
use std::convert::Infallible;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};


#[derive(Clone)]
pub struct AppState {
    pub session: Arc<GameSession>,
}

/// Everything `serve` needs besides the listen address.
pub struct ServerOptions {
    pub db_path: PathBuf,
    pub config: GameConfig,
    pub catalog: Catalog,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/catalog", get(catalog))
        .route("/api/island", get(island))
        .route("/api/island/buildings", post(construct))
        .route("/api/island/buildings/{id}", delete(demolish))
        .route("/api/island/buildings/{id}/upgrade", post(upgrade))
        .route("/api/island/rename", post(rename))
        .route("/api/island/preview", post(preview))
        .route("/api/island/candidates/{kind}", get(candidates))
        .route("/api/island/reconcile", post(reconcile))
        .route("/api/events", get(events))
        .with_state(Arc::new(state))
        // Local security: allow only loopback + Tailscale by default.
        .layer(middleware::from_fn(ip_allowlist))
        // Never `Access-Control-Allow-Origin: *`: any page in the browser could
        // otherwise spend this island's resources.
        .layer(local_only_cors())
}

async fn health() -> &'static str {
    "ok"
}

async fn catalog(State(state): State<Arc<AppState>>) -> Json<Vec<BuildingTypeInfo>> {
    Json(state.session.catalog().iter().cloned().collect())
}

async fn island(State(state): State<Arc<AppState>>) -> Json<IslandSnapshot> {
    Json(state.session.snapshot())
}

#[derive(Debug, Deserialize)]
struct PlacementInput {
    #[serde(rename = "type")]
    kind: String,
    position: GridPos,
}

#[derive(Debug, Deserialize)]
struct RenameInput {
    name: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct PreviewOutput {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn construct(
    State(state): State<Arc<AppState>>,
    Json(input): Json<PlacementInput>,
) -> Result<Json<IslandSnapshot>, ApiError> {
    let kind: BuildingType = input.kind.parse().map_err(GameError::from)?;
    Ok(Json(state.session.construct(kind, input.position)?))
}

async fn upgrade(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IslandSnapshot>, ApiError> {
    Ok(Json(state.session.upgrade(&id)?))
}

async fn demolish(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IslandSnapshot>, ApiError> {
    Ok(Json(state.session.demolish(&id)?))
}

async fn rename(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RenameInput>,
) -> Result<Json<IslandSnapshot>, ApiError> {
    Ok(Json(state.session.rename_island(&input.name)?))
}

async fn preview(
    State(state): State<Arc<AppState>>,
    Json(input): Json<PlacementInput>,
) -> Json<PreviewOutput> {
    let verdict = input
        .kind
        .parse::<BuildingType>()
        .map_err(GameError::from)
        .and_then(|kind| state.session.can_place(kind, input.position));
    Json(match verdict {
        Ok(()) => PreviewOutput {
            ok: true,
            reason: None,
            message: None,
        },
        Err(err) => PreviewOutput {
            ok: false,
            reason: Some(err.error_code()),
            message: Some(err.to_string()),
        },
    })
}

async fn candidates(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<GridPos>>, ApiError> {
    let kind: BuildingType = kind.parse().map_err(GameError::from)?;
    Ok(Json(state.session.candidate_positions(kind)?))
}

async fn reconcile(State(state): State<Arc<AppState>>) -> Result<Json<IslandSnapshot>, ApiError> {
    Ok(Json(state.session.reconcile()?))
}

async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.session.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(update) => return Some((Ok::<_, Infallible>(update_event(&update)), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The next update carries a full snapshot, so the client catches up.
                    warn!(skipped, "events.lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn update_event(update: &IslandUpdate) -> Event {
    let data = serde_json::to_string(update).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .event(&update.event)
        .id(update.rev.to_string())
        .data(data)
}

/// A `GameError` on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub GameError);

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    shortfall: Option<ResourceAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<IslandSnapshot>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GameError::NotFound { .. } => StatusCode::NOT_FOUND,
            GameError::InsufficientResources { .. } => StatusCode::CONFLICT,
            GameError::PersistenceFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let (shortfall, snapshot) = match &self.0 {
            GameError::InsufficientResources { shortfall, .. } => (Some(*shortfall), None),
            GameError::PersistenceFailed { snapshot, .. } => (None, Some(snapshot.as_ref().clone())),
            _ => (None, None),
        };
        let body = ErrorBody {
            error: self.0.error_code(),
            message: self.0.to_string(),
            shortfall,
            snapshot,
        };
        (status, Json(body)).into_response()
    }
}

pub async fn serve(addr: SocketAddr, options: ServerOptions) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "skyhaven.listening");
    serve_listener(listener, options, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    options: ServerOptions,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let store: Arc<dyn IslandStore> = Arc::new(SqliteStore::new(options.db_path));
    let session = Arc::new(GameSession::load(
        Arc::new(options.catalog),
        store,
        &options.config,
    )?);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let production = ProductionScheduler::new(session.clone(), options.config.tick_interval())
        .spawn(async move {
            let _ = stop_rx.await;
        });

    let app = build_router(AppState { session });
    let addr = listener.local_addr()?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    let _ = stop_tx.send(());
    let _ = production.await;
    served?;
    Ok(addr)
}

async fn ip_allowlist(
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let ip = peer.ip();
    if is_allowed_peer_ip(ip) {
        return next.run(req).await;
    }
    warn!(%ip, "request.forbidden");
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

fn is_allowed_peer_ip(ip: IpAddr) -> bool {
    if ip.is_loopback() {
        return true;
    }

    // Tailscale CGNAT range (100.64.0.0/10).
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 100 && (64..=127).contains(&o[1])
        }
        IpAddr::V6(_v6) => false,
    }
}

fn local_only_cors() -> CorsLayer {
    use axum::http::header;
    use axum::http::HeaderValue;
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            is_allowed_local_origin(origin)
        }))
}

fn is_allowed_local_origin(origin: &axum::http::HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };
    is_http_origin_for_host(s, "localhost") || is_http_origin_for_host(s, "127.0.0.1")
}

fn is_http_origin_for_host(origin: &str, host: &str) -> bool {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = origin.strip_prefix(scheme) {
            if let Some(after) = rest.strip_prefix(host) {
                // Origin is just scheme://host[:port]
                return after.is_empty() || after.starts_with(':');
            }
        }
    }
    false
}
