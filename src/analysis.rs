//! Análisis de estilo: del corpus acumulado a un `StyleProfile`.
//!
//! Flujo:
//!   1. Validación del espécimen (sin llamadas de red si es demasiado corto).
//!   2. Alta en el corpus de la sesión.
//!   3. Concatenación del corpus con separadores y recorte al presupuesto.
//!   4. Prompt forense con un marco analítico y esquema de respuesta.
//!   5. Parseo, normalización y capa de ejecución prioritaria.
//!   6. Instalación del perfil, salvo que la sesión se haya reiniciado.

use tracing::{info, warn};

use crate::{
    app_state::AppState,
    config::AppConfig,
    error::AppError,
    ingest::{self, SourceDocument},
    llm::{CompletionRequest, LanguageModel, LlmError},
    models::{KeyTrait, StyleMetrics, StyleProfile, TraitImpact},
    prompts::{self, LensSelector, ProfileDraft},
    session::{self, Surface},
};

/// Separador entre documentos del corpus.
pub const DOCUMENT_SEPARATOR: &str = "\n\n*** SIGUIENTE DOCUMENTO ***\n\n";

const ANALYSIS_TEMPERATURE: f64 = 0.7;

/// Une el corpus y lo recorta a `max_chars` caracteres.
pub fn build_corpus_text(corpus: &[String], max_chars: usize) -> String {
    let joined = corpus.join(DOCUMENT_SEPARATOR);
    match joined.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => joined[..byte_idx].to_string(),
        None => joined,
    }
}

/// Quita los bloques de código Markdown con los que a veces responde el modelo.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn to_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Añade la capa de ejecución prioritaria exactamente una vez, al final.
pub fn enforce_system_prompt(prompt: &str) -> String {
    let base = prompt.replace(prompts::ENFORCEMENT_LAYER, "");
    format!("{}{}", base.trim_end(), prompts::ENFORCEMENT_LAYER)
}

/// Convierte la respuesta JSON del modelo en un perfil ya normalizado.
pub fn parse_profile(raw: &str) -> Result<StyleProfile, LlmError> {
    let draft: ProfileDraft = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| LlmError::MalformedJson(e.to_string()))?;

    if draft.system_prompt.trim().is_empty() {
        return Err(LlmError::MalformedJson("systemPrompt vacío".to_string()));
    }
    if draft.key_traits.is_empty() {
        return Err(LlmError::MalformedJson("keyTraits vacío".to_string()));
    }
    if draft.key_traits.len() < prompts::MIN_KEY_TRAITS {
        warn!(
            "El modelo devolvió {} rasgos (se pidieron al menos {}).",
            draft.key_traits.len(),
            prompts::MIN_KEY_TRAITS
        );
    }

    let metrics = draft.metrics.map(|m| StyleMetrics {
        complexity: to_score(m.complexity),
        formality: to_score(m.formality),
        emotionality: to_score(m.emotionality),
        sarcasm: to_score(m.sarcasm),
        creativity: to_score(m.creativity),
    });

    let key_traits = draft
        .key_traits
        .into_iter()
        .map(|t| KeyTrait {
            name: t.name,
            description: t.description,
            example: t.example,
            impact: t.impact.as_deref().and_then(TraitImpact::parse),
        })
        .collect();

    Ok(StyleProfile {
        persona_name: draft.persona_name,
        writing_level: draft.writing_level,
        writing_score: to_score(draft.writing_score),
        metrics,
        summary: draft.summary,
        key_traits,
        system_prompt: enforce_system_prompt(&draft.system_prompt),
    })
}

/// Lanza el análisis forense sobre todo el corpus.
pub async fn analyze_corpus(
    llm: &dyn LanguageModel,
    lens: &dyn LensSelector,
    cfg: &AppConfig,
    corpus: &[String],
) -> Result<StyleProfile, AppError> {
    let text = build_corpus_text(corpus, cfg.limits.max_corpus_chars);
    let lens = prompts::pick_lens(lens);
    info!(
        "Analizando corpus de {} documentos ({} caracteres) con el marco {}.",
        corpus.len(),
        text.chars().count(),
        lens.name
    );

    let mut request =
        CompletionRequest::new(&cfg.llm_analysis_model, prompts::analysis_prompt(&text, lens));
    request.temperature = ANALYSIS_TEMPERATURE;
    request.response_schema = Some(prompts::profile_schema());

    let raw = llm.complete(&request).await.map_err(AppError::AnalysisFailed)?;
    parse_profile(&raw).map_err(|e| {
        warn!("No se pudo interpretar el análisis: {}", e);
        AppError::AnalysisFailed(e)
    })
}

/// Espécimen pegado como texto.
pub async fn submit_text(state: &AppState, text: String) -> Result<StyleProfile, AppError> {
    ingest::validate_sample(&text, state.config.limits.min_sample_chars)?;
    let guard = session::acquire(&state.session, Surface::Analysis)?;
    commit_and_analyze(state, &guard, text).await
}

/// Espécimen subido como fichero (PDF o texto plano).
pub async fn submit_document(
    state: &AppState,
    doc: SourceDocument,
) -> Result<StyleProfile, AppError> {
    let guard = session::acquire(&state.session, Surface::Analysis)?;

    state.set_status(true, format!("Escaneando tejido de '{}'...", doc.filename));
    let extracted = ingest::extract_text(doc).await;
    let text = match extracted.and_then(|text| {
        ingest::validate_sample(&text, state.config.limits.min_sample_chars).map(|_| text)
    }) {
        Ok(text) => text,
        Err(err) => {
            state.set_status(false, err.to_string());
            return Err(err);
        }
    };

    commit_and_analyze(state, &guard, text).await
}

/// Repite el análisis sobre el corpus actual, sin añadir nada.
pub async fn retry(state: &AppState) -> Result<StyleProfile, AppError> {
    let guard = session::acquire(&state.session, Surface::Analysis)?;
    let corpus = state.session.lock().unwrap().corpus().to_vec();
    if corpus.is_empty() {
        return Err(AppError::InvalidInput(
            "No hay ningún texto en el corpus que analizar.".to_string(),
        ));
    }
    run_analysis(state, &guard, corpus).await
}

async fn commit_and_analyze(
    state: &AppState,
    guard: &session::BusyGuard,
    text: String,
) -> Result<StyleProfile, AppError> {
    let corpus = {
        let mut session = state.session.lock().unwrap();
        if session.epoch() != guard.epoch() {
            return Err(AppError::SessionReset);
        }
        session.push_sample(text);
        session.corpus().to_vec()
    };
    run_analysis(state, guard, corpus).await
}

async fn run_analysis(
    state: &AppState,
    guard: &session::BusyGuard,
    corpus: Vec<String>,
) -> Result<StyleProfile, AppError> {
    state.set_status(true, "Analizando vicios, muletillas y genialidades subconscientes...");

    let result = analyze_corpus(
        state.llm.as_ref(),
        state.lens.as_ref(),
        &state.config,
        &corpus,
    )
    .await;

    let mut session = state.session.lock().unwrap();
    if session.epoch() != guard.epoch() {
        warn!("Se descarta un análisis que terminó después de reiniciar la sesión.");
        return Err(AppError::SessionReset);
    }

    match result {
        Ok(profile) => {
            info!(
                "Perfil '{}' generado a partir de {} documentos.",
                profile.persona_name,
                corpus.len()
            );
            session.install_profile(profile.clone());
            state.set_status(false, "Análisis completado.");
            Ok(profile)
        }
        Err(err) => {
            state.set_status(false, err.to_string());
            Err(err)
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    /// Respuesta de análisis válida con `traits` rasgos.
    pub fn profile_json(traits: usize) -> String {
        let traits: Vec<_> = (0..traits)
            .map(|i| {
                serde_json::json!({
                    "name": format!("Rasgo {i}"),
                    "description": "d",
                    "example": "e",
                    "impact": if i % 2 == 0 { "vice" } else { "virtud" }
                })
            })
            .collect();
        serde_json::json!({
            "personaName": "Académico Obsesivo",
            "writingLevel": "C1",
            "writingScore": 142.6,
            "metrics": {"complexity": 80, "formality": 55.4, "emotionality": -3,
                        "sarcasm": 20, "creativity": 64},
            "summary": "Resumen.",
            "keyTraits": traits,
            "systemPrompt": "<author_neural_pattern>x</author_neural_pattern>"
        })
        .to_string()
    }
}
