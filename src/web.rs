use crate::{
    config::{Config, QueryConfig},
    semantic::{EngineError, EngineState, IndexReport, SearchHit, SemanticEngine},
};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use url::Url;

/// Transport-level settings derived from `Config`.
#[derive(Clone, Debug)]
pub struct WebSettings {
    pub image_dir: PathBuf,
    pub public_base_url: String,
    pub score_precision: u32,
    pub allowed_origins: Vec<String>,
    pub query: QueryConfig,
}

impl WebSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            image_dir: PathBuf::from(&config.image_dir),
            public_base_url: config.server.public_base_url.clone(),
            score_precision: config.server.score_precision,
            allowed_origins: config.server.allowed_origins.clone(),
            query: config.query.clone(),
        }
    }
}

struct SharedState {
    engine: Arc<SemanticEngine>,
    settings: WebSettings,
}

pub fn router(engine: Arc<SemanticEngine>, settings: WebSettings) -> Router {
    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let image_dir = settings.image_dir.clone();
    let shared_state = Arc::new(SharedState { engine, settings });

    Router::new()
        .nest_service("/images", tower_http::services::ServeDir::new(image_dir))
        .route("/search", post(search))
        .route("/health", get(health))
        .route("/reindex", post(reindex))
        .layer(cors)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(engine: Arc<SemanticEngine>, config: Config) -> anyhow::Result<()> {
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        log::warn!("shutting down");
    }

    let listen_addr = config.server.listen_addr.clone();
    let app = router(engine, WebSettings::from_config(&config));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    log::info!("listening on {listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(engine: Arc<SemanticEngine>, config: Config) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(engine, config).await })
}

#[derive(Debug)]
struct HttpError(EngineError);

// Tell axum how to convert `EngineError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            EngineError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            EngineError::NotReady(_) | EngineError::EmptyIndex => StatusCode::SERVICE_UNAVAILABLE,
            _ => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<EngineError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Signed so that zero and negative values reach validation
    #[serde(default)]
    pub top_k: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub image_path: String,
    pub similarity_score: f64,
}

impl SearchResultItem {
    fn from_hit(hit: SearchHit, settings: &WebSettings) -> Self {
        Self {
            image_path: image_url(&hit.identifier, settings),
            similarity_score: round_score(hit.score, settings.score_precision),
        }
    }
}

/// Public URL of an indexed image: the base URL plus its path relative to
/// the served directory, one percent-encoded segment per component.
/// Identifiers outside the directory fall back to the bare file name.
fn image_url(identifier: &str, settings: &WebSettings) -> String {
    let path = Path::new(identifier);
    let segments: Vec<String> = match path.strip_prefix(&settings.image_dir) {
        Ok(relative) => relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect(),
        Err(_) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .into_iter()
            .collect(),
    };

    match Url::parse(&settings.public_base_url) {
        Ok(mut url) => {
            if let Ok(mut path_segments) = url.path_segments_mut() {
                path_segments.pop_if_empty().extend(&segments);
            }
            url.to_string()
        }
        Err(e) => {
            log::warn!("public_base_url {:?} is not a URL: {e}", settings.public_base_url);
            format!("{}{}", settings.public_base_url, segments.join("/"))
        }
    }
}

fn round_score(score: f32, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (score as f64 * factor).round() / factor
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResultItem>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let top_k = state.settings.query.resolve_top_k(payload.top_k)?;

    tokio::task::block_in_place(move || {
        let hits = state.engine.search(&payload.query, top_k)?;
        Ok(Json(
            hits.into_iter()
                .map(|hit| SearchResultItem::from_hit(hit, &state.settings))
                .collect(),
        ))
    })
}

/// Rebuild the index from the configured directory and swap it in.
/// Searches keep being answered from the previous index meanwhile.
async fn reindex(State(state): State<Arc<SharedState>>) -> Result<Json<IndexReport>, HttpError> {
    tokio::task::block_in_place(move || {
        let report = state.engine.reindex(&state.settings.image_dir)?;
        Ok(Json(report))
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub state: EngineState,
    pub indexed: usize,
    pub dimensions: usize,
}

async fn health(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    let engine = &state.engine;
    let status = if engine.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            state: engine.state(),
            indexed: engine.indexed_count(),
            dimensions: engine.dimensions(),
        }),
    )
}
