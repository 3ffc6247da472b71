//! Generador y espejo: producen texto nuevo o reescrito con el prompt del perfil.
//!
//! Ninguna de las dos superficies toca el historial del chat ni las
//! correcciones acumuladas en él; siempre usan el prompt original del perfil.

use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    error::AppError,
    llm::CompletionRequest,
    prompts,
    session::{self, Surface},
};

pub const WORD_COUNT_RANGE: RangeInclusive<u32> = 50..=2000;
pub const CREATIVITY_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const REWRITE_TEMPERATURE: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedText {
    pub text: String,
    pub word_count: usize,
}

impl GeneratedText {
    fn new(text: String) -> Self {
        let text = text.trim().to_string();
        let word_count = text.split_whitespace().count();
        Self { text, word_count }
    }
}

/// Escribe un texto original sobre `topic` con la voz del perfil.
pub async fn generate(
    state: &AppState,
    topic: &str,
    word_count: u32,
    creativity: f64,
) -> Result<GeneratedText, AppError> {
    if topic.trim().is_empty() {
        return Err(AppError::InvalidInput("Indica un tema para el texto.".to_string()));
    }
    if !WORD_COUNT_RANGE.contains(&word_count) {
        return Err(AppError::InvalidInput(format!(
            "La extensión debe estar entre {} y {} palabras.",
            WORD_COUNT_RANGE.start(),
            WORD_COUNT_RANGE.end()
        )));
    }
    if !CREATIVITY_RANGE.contains(&creativity) {
        return Err(AppError::InvalidInput(format!(
            "La creatividad debe estar entre {} y {}.",
            CREATIVITY_RANGE.start(),
            CREATIVITY_RANGE.end()
        )));
    }

    let prompt = prompts::generation_prompt(topic, word_count);
    info!("Generando ~{} palabras (creatividad {:.2}).", word_count, creativity);
    run(state, Surface::Generator, prompt, creativity).await
}

/// Reescribe `text` con el estilo del perfil conservando su contenido.
pub async fn rewrite(state: &AppState, text: &str) -> Result<GeneratedText, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidInput("No hay texto que reescribir.".to_string()));
    }
    run(state, Surface::Mirror, prompts::rewrite_prompt(text), REWRITE_TEMPERATURE).await
}

async fn run(
    state: &AppState,
    surface: Surface,
    prompt: String,
    temperature: f64,
) -> Result<GeneratedText, AppError> {
    let guard = session::acquire(&state.session, surface)?;
    let request = {
        let session = state.session.lock().unwrap();
        let profile = session.require_profile()?;
        let mut request = CompletionRequest::new(&state.config.llm_chat_model, prompt);
        request.system = profile.system_prompt.clone();
        request.temperature = temperature;
        request
    };

    let result = state.llm.complete(&request).await;

    if state.session.lock().unwrap().epoch() != guard.epoch() {
        warn!("Se descarta un resultado de {} tras reiniciar la sesión.", surface);
        return Err(AppError::SessionReset);
    }

    result.map(GeneratedText::new).map_err(|e| {
        warn!("Fallo en {}: {}", surface, e);
        AppError::GenerationFailed(e)
    })
}
