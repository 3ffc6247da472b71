//! Probador de estilo conversacional.
//!
//! Cada turno viaja con una ventana de los mensajes más recientes, el prompt
//! vigente de la conversación y las directivas de humanización activas. Un
//! feedback negativo endurece el prompt, descarta la respuesta rechazada y
//! vuelve a pedirla con el prompt corregido.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    config::AppConfig,
    error::AppError,
    llm::{ChatTurn, CompletionRequest},
    models::{ChatMessage, Feedback, HumanizationConfig, Role},
    prompts,
    session::{self, Conversation, Surface},
};

// Temperatura alta para imprevisibilidad humana; top_p recorta la cola.
const CHAT_TEMPERATURE: f64 = 1.25;
const CHAT_TOP_P: f64 = 0.90;
const CHAT_PRESENCE_PENALTY: f64 = 0.1;
const CHAT_FREQUENCY_PENALTY: f64 = 0.2;

/// Resultado de marcar un turno del modelo.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum FeedbackOutcome {
    /// Sólo se etiquetó el mensaje.
    Labeled { index: usize },
    /// El turno se descartó y se generó uno nuevo con el prompt corregido.
    Regenerated { index: usize, message: ChatMessage },
}

/// Construye la petición a partir de la conversación, cuyo último mensaje
/// debe ser el turno de usuario que se envía.
fn build_request(cfg: &AppConfig, conversation: &Conversation) -> CompletionRequest {
    let messages = &conversation.messages;
    let start = messages.len().saturating_sub(cfg.limits.chat_window);
    let window = &messages[start..];
    let (last, previous) = match window.split_last() {
        Some(split) => split,
        None => return CompletionRequest::new(&cfg.llm_chat_model, ""),
    };

    let mut request = CompletionRequest::new(&cfg.llm_chat_model, last.content.clone());
    request.system = format!(
        "{}{}",
        conversation.active_prompt,
        prompts::humanization_directives(&conversation.humanization)
    );
    request.temperature = CHAT_TEMPERATURE;
    request.top_p = CHAT_TOP_P;
    request.presence_penalty = Some(CHAT_PRESENCE_PENALTY);
    request.frequency_penalty = Some(CHAT_FREQUENCY_PENALTY);
    request.history = previous
        .iter()
        .map(|m| ChatTurn {
            role: m.role,
            content: m.content.clone(),
        })
        .collect();
    request
}

/// Envía un turno de usuario y devuelve la respuesta del modelo.
pub async fn send(state: &AppState, text: &str) -> Result<ChatMessage, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::InvalidInput("El mensaje está vacío.".to_string()));
    }

    let guard = session::acquire(&state.session, Surface::Chat)?;
    let (conversation_id, request) = {
        let mut session = state.session.lock().unwrap();
        session.require_profile()?;
        session.conversation.messages.push(ChatMessage::user(text));
        (
            session.conversation.id,
            build_request(&state.config, &session.conversation),
        )
    };

    let result = state.llm.complete(&request).await;

    let mut session = state.session.lock().unwrap();
    if session.epoch() != guard.epoch() || session.conversation.id != conversation_id {
        warn!("Se descarta una respuesta de chat de una conversación ya cerrada.");
        return Err(AppError::SessionReset);
    }

    let conversation = &mut session.conversation;
    match result {
        Ok(reply) => {
            let message = ChatMessage::model(reply);
            conversation.messages.push(message.clone());
            Ok(message)
        }
        Err(e) => {
            if conversation.messages.last().map(|m| m.role) == Some(Role::User) {
                conversation.messages.pop();
            }
            warn!("Error en el chat: {}", e);
            Err(AppError::ChatFailed(e))
        }
    }
}

/// Marca el turno `index` del modelo. El feedback negativo requiere un comentario.
pub async fn feedback(
    state: &AppState,
    index: usize,
    kind: Feedback,
    comment: Option<&str>,
) -> Result<FeedbackOutcome, AppError> {
    match kind {
        Feedback::Positive => {
            let mut session = state.session.lock().unwrap();
            let message = model_turn_mut(&mut session.conversation, index)?;
            message.feedback = Some(Feedback::Positive);
            Ok(FeedbackOutcome::Labeled { index })
        }
        Feedback::Negative => {
            let comment = comment.map(str::trim).unwrap_or("");
            if comment.is_empty() {
                return Err(AppError::Feedback(
                    "Describe qué falló en la respuesta para poder corregirla.".to_string(),
                ));
            }
            regenerate(state, index, comment).await
        }
    }
}

async fn regenerate(
    state: &AppState,
    index: usize,
    comment: &str,
) -> Result<FeedbackOutcome, AppError> {
    let guard = session::acquire(&state.session, Surface::Chat)?;
    let (conversation_id, request) = {
        let mut session = state.session.lock().unwrap();
        let conversation = &mut session.conversation;
        model_turn_mut(conversation, index)?;
        if index == 0 || conversation.messages[index - 1].role != Role::User {
            return Err(AppError::Feedback(
                "La respuesta rechazada no sigue a ningún mensaje del usuario.".to_string(),
            ));
        }

        conversation
            .active_prompt
            .push_str(&prompts::feedback_constraint(comment));
        conversation.corrections.push(comment.to_string());
        conversation.messages.truncate(index);
        info!(
            "Corrección #{} aplicada al prompt; regenerando el turno {}.",
            conversation.corrections.len(),
            index
        );
        (conversation.id, build_request(&state.config, conversation))
    };

    let result = state.llm.complete(&request).await;

    let mut session = state.session.lock().unwrap();
    if session.epoch() != guard.epoch() || session.conversation.id != conversation_id {
        warn!("Se descarta una regeneración de una conversación ya cerrada.");
        return Err(AppError::SessionReset);
    }

    match result {
        Ok(reply) => {
            let message = ChatMessage::model(reply);
            session.conversation.messages.push(message.clone());
            Ok(FeedbackOutcome::Regenerated { index, message })
        }
        Err(e) => {
            warn!("La regeneración correctiva falló: {}", e);
            Err(AppError::ChatFailed(e))
        }
    }
}

fn model_turn_mut(
    conversation: &mut Conversation,
    index: usize,
) -> Result<&mut ChatMessage, AppError> {
    match conversation.messages.get_mut(index) {
        Some(message) if message.role == Role::Model => Ok(message),
        Some(_) => Err(AppError::Feedback(format!(
            "El mensaje {index} no es una respuesta del modelo."
        ))),
        None => Err(AppError::Feedback(format!("No existe el mensaje {index}."))),
    }
}

/// Vista serializable de la conversación.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub corrections: Vec<String>,
    pub humanization: HumanizationConfig,
}

pub fn view(state: &AppState) -> ConversationView {
    let session = state.session.lock().unwrap();
    let conversation = &session.conversation;
    ConversationView {
        id: conversation.id,
        messages: conversation.messages.clone(),
        corrections: conversation.corrections.clone(),
        humanization: conversation.humanization,
    }
}

/// Abre una conversación nueva con el prompt original del perfil.
pub fn clear(state: &AppState) -> ConversationView {
    state.session.lock().unwrap().restart_conversation();
    view(state)
}

pub fn set_humanization(state: &AppState, config: HumanizationConfig) -> HumanizationConfig {
    let mut session = state.session.lock().unwrap();
    session.conversation.humanization = config;
    config
}
