use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::case_page::CasePages;
use crate::core::alerts::gate::DecisionGate;
use crate::core::alerts::model::Factor;
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::Settings;
use crate::core::notify::dispatcher::{DeliveryPath, VoiceDispatcher};
use crate::core::pipeline::AlertPipeline;
use crate::core::scoring::model::{FeatureMap, LinearRiskModel, RiskModel, ScoreError};
use crate::core::storage::store::AlertStore;

/// Startup failures. Everything after startup is handled per request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load model: {0}")]
    Model(#[from] ScoreError),
    #[error("failed to register templates: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Per-request failures, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unprocessable(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(d) => (StatusCode::BAD_REQUEST, d),
            ApiError::Unprocessable(d) => (StatusCode::UNPROCESSABLE_ENTITY, d),
            ApiError::NotFound(d) => (StatusCode::NOT_FOUND, d),
            ApiError::Internal(d) => (StatusCode::INTERNAL_SERVER_ERROR, d),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    model: Arc<dyn RiskModel>,
    pipeline: Arc<AlertPipeline>,
    pages: Arc<CasePages>,
    voice_path: DeliveryPath,
    top_k: usize,
}

impl AppState {
    pub fn new(
        model: Arc<dyn RiskModel>,
        pipeline: Arc<AlertPipeline>,
        pages: Arc<CasePages>,
        voice_path: DeliveryPath,
        top_k: usize,
    ) -> Self {
        Self {
            model,
            pipeline,
            pages,
            voice_path,
            top_k,
        }
    }

    /// Wire up store, gate, dispatcher and model from settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let model = LinearRiskModel::load(&settings.model_path)?;
        info!("Model loaded successfully from {:?}", settings.model_path);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(
            AlertStore::open(
                settings.redis_url.as_deref(),
                settings.cooldown_window(),
                clock.clone(),
            )
            .await,
        );
        let dispatcher = Arc::new(VoiceDispatcher::new(
            &settings.ami,
            settings.tts_command.clone(),
        ));
        let voice_path = dispatcher.path();
        let gate = DecisionGate::new(settings.risk_threshold, store.clone());
        info!(
            "Alerting at risk >= {:.2} with a {} minute cooldown",
            gate.threshold(),
            store.cooldown_window().num_minutes()
        );
        let pipeline = AlertPipeline::new(gate, store, dispatcher, clock)
            .with_strict_cooldown(settings.strict_cooldown)
            .with_detached_dispatch(settings.detach_dispatch);

        Ok(Self::new(
            Arc::new(model),
            Arc::new(pipeline),
            Arc::new(CasePages::new()?),
            voice_path,
            settings.top_k_factors,
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub patient_ref_token: String,
    pub features: FeatureMap,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub risk: f64,
    pub top_factors: Vec<Factor>,
    pub alerted: bool,
    pub alert_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/score", post(score_patient))
        .route("/case/:alert_id", get(view_case))
        .with_state(state)
}

async fn score_patient(
    State(state): State<AppState>,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let token = request.patient_ref_token.trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest("patient_ref_token must not be empty".to_string()));
    }

    let score = state
        .model
        .score(&request.features, state.top_k)
        .map_err(|e| match e {
            ScoreError::NonNumeric(_) => ApiError::Unprocessable(format!("Scoring failed: {}", e)),
            other => {
                error!("Scoring failed: {}", other);
                ApiError::Internal(format!("Scoring failed: {}", other))
            }
        })?;

    let outcome = state
        .pipeline
        .process(token, score.probability, score.top_factors.clone())
        .await;

    Ok(Json(ScoreResponse {
        risk: score.probability,
        top_factors: score.top_factors,
        alerted: outcome.alerted(),
        alert_id: outcome.alert.map(|a| a.alert_id),
    }))
}

async fn view_case(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Html<String>, ApiError> {
    let Some(alert) = state.pipeline.store().get_alert(&alert_id).await else {
        return Err(ApiError::NotFound("Case not found".to_string()));
    };
    state.pages.render(&alert).map(Html).map_err(|e| {
        error!("Rendering case {} failed: {}", alert_id, e);
        ApiError::Internal("Failed to render case".to_string())
    })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "model_loaded": true,
        "store_mode": state.pipeline.store().mode(),
        "voice_mode": state.voice_path.as_str(),
    }))
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "ML VoIP Alert System",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /score": "Score patient for cardiac risk",
            "GET /case/{alert_id}": "View case details",
            "GET /health": "Health check",
            "GET /": "This information",
        }
    }))
}

pub async fn run() -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load();
    let state = AppState::from_settings(&settings).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: settings.bind_addr.clone(),
            source,
        })?;
    info!("Application startup complete, listening on {}", settings.bind_addr);

    axum::serve(listener, app).await.map_err(AppError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AmiSettings;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    // One feature; risk = sigmoid(x - 2), so x = 4.5 scores ~0.92.
    const MODEL: &str = r#"{
        "intercept": -2.0,
        "features": [{"name": "oldpeak", "weight": 1.0, "mean": 0.0, "scale": 1.0}]
    }"#;

    fn state() -> AppState {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(AlertStore::in_memory(chrono::Duration::minutes(30), clock.clone()));
        let dispatcher = Arc::new(VoiceDispatcher::new(&AmiSettings::default(), None));
        let gate = DecisionGate::new(0.80, store.clone());
        let pipeline = AlertPipeline::new(gate, store, dispatcher, clock);
        AppState::new(
            Arc::new(LinearRiskModel::from_json(MODEL).unwrap()),
            Arc::new(pipeline),
            Arc::new(CasePages::new().unwrap()),
            DeliveryPath::Simulated,
            3,
        )
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn score_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/score")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_score_triggers_then_cools_down() {
        let app = router(state());

        let (status, body) = send(
            &app,
            score_request(serde_json::json!({
                "patient_ref_token": "pt_1",
                "features": {"oldpeak": 4.5}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let first: ScoreResponse = serde_json::from_slice(&body).unwrap();
        assert!(first.risk > 0.9);
        assert!(first.alerted);
        assert_eq!(first.top_factors.len(), 1);
        let alert_id = first.alert_id.unwrap();

        let (_, body) = send(
            &app,
            score_request(serde_json::json!({
                "patient_ref_token": "pt_1",
                "features": {"oldpeak": 4.5}
            })),
        )
        .await;
        let second: ScoreResponse = serde_json::from_slice(&body).unwrap();
        assert!(!second.alerted);
        assert!(second.alert_id.is_none());

        let (status, body) = send(&app, get(&format!("/case/{}", alert_id))).await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(body).unwrap();
        assert!(html.contains(&alert_id));
        assert!(!html.contains("pt_1"));
    }

    #[tokio::test]
    async fn test_low_risk_is_not_alerted() {
        let app = router(state());
        let (status, body) = send(
            &app,
            score_request(serde_json::json!({
                "patient_ref_token": "pt_2",
                "features": {"oldpeak": 0.5}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let response: ScoreResponse = serde_json::from_slice(&body).unwrap();
        assert!(!response.alerted);
    }

    #[tokio::test]
    async fn test_rejects_empty_token_and_bad_features() {
        let app = router(state());

        let (status, _) = send(
            &app,
            score_request(serde_json::json!({"patient_ref_token": " ", "features": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            score_request(serde_json::json!({
                "patient_ref_token": "pt_3",
                "features": {"oldpeak": "steep"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let detail: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(detail["detail"].as_str().unwrap().contains("oldpeak"));
    }

    #[tokio::test]
    async fn test_unknown_case_is_404() {
        let app = router(state());
        let (status, body) = send(&app, get("/case/alrt_ffffffff")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let detail: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(detail["detail"], "Case not found");
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let app = router(state());

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["store_mode"], "fallback");
        assert_eq!(health["voice_mode"], "simulated");

        let (status, body) = send(&app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        let root: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(root["endpoints"].is_object());
    }
}
