//! Taxonomía de errores de dominio y su traducción a respuestas HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm::LlmError;
use crate::session::Surface;

#[derive(Debug, Error)]
pub enum AppError {
    /// El espécimen no alcanza la longitud mínima.
    #[error("El espécimen es insuficiente para una autopsia válida ({actual} de {min} caracteres mínimos).")]
    SampleTooShort { actual: usize, min: usize },

    #[error("Formato no soportado. Usa PDF o TXT.")]
    UnsupportedFormat { filename: String },

    #[error("{0}")]
    InvalidInput(String),

    /// PDF corrupto o cifrado.
    #[error("No se pudo leer el documento. Asegúrate de que no esté corrupto o protegido con contraseña.")]
    DocumentUnreadable { reason: String },

    #[error("Todavía no hay un perfil de estilo. Analiza un texto primero.")]
    NoProfile,

    #[error("Ya hay una operación de {0} en curso.")]
    Busy(Surface),

    /// La sesión se reinició mientras la llamada estaba en vuelo.
    #[error("La sesión se reinició; la respuesta se ha descartado.")]
    SessionReset,

    #[error("No se pudo diseccionar el estilo. El texto podría ser insuficiente o el servicio está saturado.")]
    AnalysisFailed(#[source] LlmError),

    #[error("Error en la transmutación del ADN literario.")]
    GenerationFailed(#[source] LlmError),

    #[error("Error al generar la respuesta. Por favor intenta de nuevo.")]
    ChatFailed(#[source] LlmError),

    #[error("{0}")]
    Feedback(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SampleTooShort { .. }
            | Self::UnsupportedFormat { .. }
            | Self::InvalidInput(_)
            | Self::Feedback(_) => StatusCode::BAD_REQUEST,
            Self::DocumentUnreadable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NoProfile | Self::Busy(_) | Self::SessionReset => StatusCode::CONFLICT,
            Self::AnalysisFailed(_) | Self::GenerationFailed(_) | Self::ChatFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
