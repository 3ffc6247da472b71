use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Json, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    analysis,
    app_state::{AppState, Status},
    chat::{self, ConversationView, FeedbackOutcome},
    compose::{self, GeneratedText},
    error::AppError,
    ingest::{DocumentKind, SourceDocument},
    models::{ChatMessage, Feedback, HumanizationConfig, ScoreBand, StyleProfile},
};

// Tope de subida de documentos; el extractor `Bytes` de axum limita a 2 MB por defecto.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// --- Payloads y respuestas de la API ---

#[derive(Deserialize)]
pub struct TextSamplePayload {
    text: String,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    filename: String,
}

#[derive(Deserialize)]
pub struct ChatPayload {
    message: String,
}

#[derive(Deserialize)]
pub struct FeedbackPayload {
    index: usize,
    feedback: Feedback,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePayload {
    topic: String,
    #[serde(default = "default_word_count")]
    word_count: u32,
    #[serde(default = "default_creativity")]
    creativity: f64,
}

fn default_word_count() -> u32 {
    350
}

fn default_creativity() -> f64 {
    0.9
}

#[derive(Deserialize)]
pub struct RewritePayload {
    text: String,
}

/// Perfil vigente con los datos de la sesión que lo acompañan en la vista.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    #[serde(flatten)]
    profile: StyleProfile,
    score_band: ScoreBand,
    doc_count: usize,
    created_at: Option<DateTime<Utc>>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/samples/text", post(submit_text_handler))
        .route(
            "/api/samples/file",
            post(submit_file_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/analysis/retry", post(retry_handler))
        .route("/api/profile", get(profile_handler))
        .route("/api/profile/system-prompt", get(system_prompt_handler))
        .route("/api/session/reset", post(reset_handler))
        .route("/api/chat", get(chat_view_handler).post(chat_send_handler))
        .route("/api/chat/feedback", post(chat_feedback_handler))
        .route("/api/chat/clear", post(chat_clear_handler))
        .route(
            "/api/chat/humanization",
            get(humanization_get_handler).put(humanization_put_handler),
        )
        .route("/api/generate", post(generate_handler))
        .route("/api/rewrite", post(rewrite_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn profile_view(state: &AppState) -> Result<ProfileView, AppError> {
    let session = state.session.lock().unwrap();
    let profile = session.require_profile()?.clone();
    Ok(ProfileView {
        score_band: profile.score_band(),
        profile,
        doc_count: session.corpus().len(),
        created_at: session.profile_created_at(),
    })
}

// --- Handlers: análisis ---

#[axum::debug_handler]
async fn submit_text_handler(
    State(state): State<AppState>,
    Json(payload): Json<TextSamplePayload>,
) -> Result<Json<ProfileView>, AppError> {
    analysis::submit_text(&state, payload.text).await?;
    Ok(Json(profile_view(&state)?))
}

#[axum::debug_handler]
async fn submit_file_handler(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProfileView>, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let kind = DocumentKind::detect(&query.filename, content_type)?;
    info!("Documento recibido: '{}' ({} bytes).", query.filename, body.len());

    let doc = SourceDocument {
        filename: query.filename,
        kind,
        bytes: body.to_vec(),
    };
    analysis::submit_document(&state, doc).await?;
    Ok(Json(profile_view(&state)?))
}

#[axum::debug_handler]
async fn retry_handler(State(state): State<AppState>) -> Result<Json<ProfileView>, AppError> {
    analysis::retry(&state).await?;
    Ok(Json(profile_view(&state)?))
}

#[axum::debug_handler]
async fn profile_handler(State(state): State<AppState>) -> Result<Json<ProfileView>, AppError> {
    Ok(Json(profile_view(&state)?))
}

/// Prompt de sistema en texto plano, listo para el portapapeles.
#[axum::debug_handler]
async fn system_prompt_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let prompt = profile_view(&state)?.profile.system_prompt;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        prompt,
    ))
}

#[axum::debug_handler]
async fn reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.session.lock().unwrap().reset();
    state.set_status(false, "Sesión reiniciada.");
    (StatusCode::OK, Json(json!({ "message": "Sesión reiniciada." })))
}

// --- Handlers: chat ---

#[axum::debug_handler]
async fn chat_view_handler(State(state): State<AppState>) -> Json<ConversationView> {
    Json(chat::view(&state))
}

#[axum::debug_handler]
async fn chat_send_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatMessage>, AppError> {
    Ok(Json(chat::send(&state, &payload.message).await?))
}

#[axum::debug_handler]
async fn chat_feedback_handler(
    State(state): State<AppState>,
    Json(payload): Json<FeedbackPayload>,
) -> Result<Json<FeedbackOutcome>, AppError> {
    let outcome = chat::feedback(
        &state,
        payload.index,
        payload.feedback,
        payload.comment.as_deref(),
    )
    .await?;
    Ok(Json(outcome))
}

#[axum::debug_handler]
async fn chat_clear_handler(State(state): State<AppState>) -> Json<ConversationView> {
    Json(chat::clear(&state))
}

#[axum::debug_handler]
async fn humanization_get_handler(State(state): State<AppState>) -> Json<HumanizationConfig> {
    Json(chat::view(&state).humanization)
}

#[axum::debug_handler]
async fn humanization_put_handler(
    State(state): State<AppState>,
    Json(config): Json<HumanizationConfig>,
) -> Json<HumanizationConfig> {
    Json(chat::set_humanization(&state, config))
}

// --- Handlers: generador y espejo ---

#[axum::debug_handler]
async fn generate_handler(
    State(state): State<AppState>,
    Json(payload): Json<GeneratePayload>,
) -> Result<Json<GeneratedText>, AppError> {
    let text = compose::generate(
        &state,
        &payload.topic,
        payload.word_count,
        payload.creativity,
    )
    .await?;
    Ok(Json(text))
}

#[axum::debug_handler]
async fn rewrite_handler(
    State(state): State<AppState>,
    Json(payload): Json<RewritePayload>,
) -> Result<Json<GeneratedText>, AppError> {
    Ok(Json(compose::rewrite(&state, &payload.text).await?))
}

// --- Estado y apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use tokio_test::{assert_err, assert_ok};
    use tower::ServiceExt;

    use super::*;
    use crate::analysis::fixtures::profile_json;
    use crate::app_state::test_state;
    use crate::llm::mock::MockModel;

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        assert_ok!(axum::body::to_bytes(response.into_body(), usize::MAX).await).to_vec()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn text_sample_returns_profile_view() {
        let model = Arc::new(MockModel::new());
        model.enqueue(profile_json(15));
        let app = create_router(test_state(model));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/samples/text",
                json!({ "text": "p".repeat(120) }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let view = body_json(response).await;
        assert_eq!(view["personaName"], "Académico Obsesivo");
        assert_eq!(view["writingScore"], 100);
        assert_eq!(view["scoreBand"], "Erudito");
        assert_eq!(view["docCount"], 1);
        assert_eq!(view["keyTraits"].as_array().map(Vec::len), Some(15));
        assert!(view["createdAt"].is_string());
    }

    #[tokio::test]
    async fn short_sample_is_a_bad_request() {
        let model = Arc::new(MockModel::new());
        let app = create_router(test_state(model.clone()));

        let response = app
            .oneshot(json_request("POST", "/api/samples/text", json!({ "text": "corto" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("insuficiente"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn plain_text_upload_is_analysed() {
        let model = Arc::new(MockModel::new());
        model.enqueue(profile_json(15));
        let state = test_state(model.clone());
        let app = create_router(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/api/samples/file?filename=cuento.txt")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("Había una vez un texto lo bastante largo para pasar el umbral."))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(model.last_request().message.contains("Había una vez"));
        assert_eq!(state.session.lock().unwrap().corpus().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_upload_is_rejected_before_parsing() {
        let model = Arc::new(MockModel::new());
        let app = create_router(test_state(model.clone()));

        let request = Request::builder()
            .method("POST")
            .uri("/api/samples/file?filename=novela.docx")
            .body(Body::from(vec![0u8; 64]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn corrupt_pdf_is_unprocessable() {
        let model = Arc::new(MockModel::new());
        let app = create_router(test_state(model.clone()));

        let request = Request::builder()
            .method("POST")
            .uri("/api/samples/file?filename=roto.pdf")
            .header(header::CONTENT_TYPE, "application/pdf")
            .body(Body::from("esto no es un pdf"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn profile_routes_conflict_without_profile() {
        let model = Arc::new(MockModel::new());
        let app = create_router(test_state(model));

        for uri in ["/api/profile", "/api/profile/system-prompt"] {
            let response = app.clone().oneshot(empty_request("GET", uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::CONFLICT);
        }
        let response = app
            .oneshot(json_request("POST", "/api/chat", json!({ "message": "hola" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn system_prompt_is_exported_as_plain_text() {
        let model = Arc::new(MockModel::new());
        model.enqueue(profile_json(15));
        let state = test_state(model);
        assert_ok!(analysis::submit_text(&state, "q".repeat(70)).await);
        let app = create_router(state);

        let response = app
            .oneshot(empty_request("GET", "/api/profile/system-prompt"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(text.starts_with("<author_neural_pattern>"));
        assert!(text.contains(crate::prompts::ENFORCEMENT_LAYER.trim()));
    }

    #[tokio::test]
    async fn chat_and_feedback_round_trip() {
        let model = Arc::new(MockModel::new());
        model.enqueue(profile_json(15));
        let state = test_state(model.clone());
        assert_ok!(analysis::submit_text(&state, "q".repeat(70)).await);
        let app = create_router(state);

        model.enqueue("Respuesta con estilo.");
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/chat", json!({ "message": "hola" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["role"], "model");

        model.enqueue("Respuesta corregida.");
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/chat/feedback",
                json!({ "index": 1, "feedback": "negative", "comment": "más breve" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = body_json(response).await;
        assert_eq!(outcome["outcome"], "regenerated");
        assert_eq!(outcome["message"]["content"], "Respuesta corregida.");

        let response = app.oneshot(empty_request("GET", "/api/chat")).await.unwrap();
        let conversation = body_json(response).await;
        assert_eq!(conversation["messages"].as_array().map(Vec::len), Some(2));
        assert_eq!(conversation["corrections"][0], "más breve");
    }

    #[tokio::test]
    async fn humanization_can_be_replaced() {
        let model = Arc::new(MockModel::new());
        let app = create_router(test_state(model));

        let toggles = json!({
            "burstiness": false,
            "imperfections": true,
            "personalTouch": false,
            "culturalContext": true,
            "antiRepetition": false
        });
        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/chat/humanization", toggles.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(empty_request("GET", "/api/chat/humanization"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, toggles);
    }

    #[tokio::test]
    async fn generate_applies_defaults_and_reports_word_count() {
        let model = Arc::new(MockModel::new());
        model.enqueue(profile_json(15));
        let state = test_state(model.clone());
        assert_ok!(analysis::submit_text(&state, "q".repeat(70)).await);
        let app = create_router(state);

        model.enqueue("uno dos tres cuatro");
        let response = app
            .oneshot(json_request("POST", "/api/generate", json!({ "topic": "la lluvia" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["wordCount"], 4);
        let req = model.last_request();
        assert_eq!(req.temperature, 0.9);
        assert!(req.message.contains("350 palabras"));
    }

    #[tokio::test]
    async fn reset_clears_the_session() {
        let model = Arc::new(MockModel::new());
        model.enqueue(profile_json(15));
        let state = test_state(model);
        assert_ok!(analysis::submit_text(&state, "q".repeat(70)).await);
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(empty_request("POST", "/api/session/reset"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(state.session.lock().unwrap().corpus().is_empty());
        assert_err!(profile_view(&state));
        let response = app.oneshot(empty_request("GET", "/api/status")).await.unwrap();
        assert_eq!(body_json(response).await["is_busy"], false);
    }

    #[tokio::test]
    async fn shutdown_fires_the_signal_once() {
        let model = Arc::new(MockModel::new());
        let config = crate::config::AppConfig::from_lookup(|_| None).unwrap();
        let (state, mut shutdown_rx) =
            AppState::new(config, model, Arc::new(crate::prompts::FixedLens(0)));
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(empty_request("POST", "/api/shutdown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_ok!(shutdown_rx.try_recv());

        let response = app.oneshot(empty_request("POST", "/api/shutdown")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
