//! Estado de la sesión: corpus acumulado, perfil vigente y conversación de prueba.
//!
//! Todo el estado vive detrás de un único `Mutex` que nunca se mantiene
//! bloqueado durante una llamada al LLM. Cada superficie admite una sola
//! llamada en vuelo (`BusyGuard`) y las respuestas que llegan después de un
//! reinicio se descartan comparando la `epoch`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ChatMessage, HumanizationConfig, StyleProfile};

pub type SharedSession = Arc<Mutex<Session>>;

/// Superficies de interacción que lanzan llamadas al LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Analysis,
    Chat,
    Generator,
    Mirror,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Analysis => "análisis",
            Self::Chat => "chat",
            Self::Generator => "generación",
            Self::Mirror => "reescritura",
        };
        f.write_str(name)
    }
}

/// Conversación del probador de estilo.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub messages: Vec<ChatMessage>,
    /// Prompt de sistema vigente: el del perfil más las correcciones acumuladas.
    pub active_prompt: String,
    pub corrections: Vec<String>,
    pub humanization: HumanizationConfig,
}

impl Conversation {
    pub fn new(base_prompt: &str, humanization: HumanizationConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            active_prompt: base_prompt.to_string(),
            corrections: Vec::new(),
            humanization,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    corpus: Vec<String>,
    profile: Option<StyleProfile>,
    profile_created_at: Option<DateTime<Utc>>,
    pub conversation: Conversation,
    epoch: u64,
    busy: HashMap<Surface, u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            corpus: Vec::new(),
            profile: None,
            profile_created_at: None,
            conversation: Conversation::new("", HumanizationConfig::default()),
            epoch: 0,
            busy: HashMap::new(),
        }
    }
}

impl Session {
    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn corpus(&self) -> &[String] {
        &self.corpus
    }

    /// Añade un espécimen al corpus (sólo se vacía con `reset`).
    pub fn push_sample(&mut self, text: String) {
        self.corpus.push(text);
    }

    #[cfg(test)]
    pub fn profile(&self) -> Option<&StyleProfile> {
        self.profile.as_ref()
    }

    pub fn profile_created_at(&self) -> Option<DateTime<Utc>> {
        self.profile_created_at
    }

    pub fn require_profile(&self) -> Result<&StyleProfile, AppError> {
        self.profile.as_ref().ok_or(AppError::NoProfile)
    }

    /// Sustituye el perfil y abre una conversación nueva sobre su prompt.
    pub fn install_profile(&mut self, profile: StyleProfile) {
        let humanization = self.conversation.humanization;
        self.conversation = Conversation::new(&profile.system_prompt, humanization);
        self.profile = Some(profile);
        self.profile_created_at = Some(Utc::now());
    }

    /// Vuelve a empezar la conversación con el prompt del perfil vigente.
    pub fn restart_conversation(&mut self) {
        let base = self
            .profile
            .as_ref()
            .map(|p| p.system_prompt.as_str())
            .unwrap_or("");
        self.conversation = Conversation::new(base, self.conversation.humanization);
    }

    /// Borra corpus, perfil y conversación. Las llamadas en vuelo quedan huérfanas.
    pub fn reset(&mut self) {
        self.corpus.clear();
        self.profile = None;
        self.profile_created_at = None;
        self.conversation = Conversation::new("", self.conversation.humanization);
        self.busy.clear();
        self.epoch += 1;
        info!("Sesión reiniciada (epoch {}).", self.epoch);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_busy(&self, surface: Surface) -> bool {
        self.busy.contains_key(&surface)
    }

    #[cfg(test)]
    pub fn any_busy(&self) -> bool {
        !self.busy.is_empty()
    }

    fn release(&mut self, surface: Surface, epoch: u64) {
        if self.busy.get(&surface) == Some(&epoch) {
            self.busy.remove(&surface);
        }
    }
}

/// Marca una superficie como ocupada mientras vive; se libera al soltarse.
///
/// Nunca debe soltarse con el `Mutex` de la sesión bloqueado por el mismo hilo.
#[derive(Debug)]
pub struct BusyGuard {
    session: SharedSession,
    surface: Surface,
    epoch: u64,
}

impl BusyGuard {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.lock() {
            session.release(self.surface, self.epoch);
        }
    }
}

pub fn acquire(session: &SharedSession, surface: Surface) -> Result<BusyGuard, AppError> {
    let mut guard = session.lock().unwrap();
    if guard.is_busy(surface) {
        return Err(AppError::Busy(surface));
    }
    let epoch = guard.epoch;
    guard.busy.insert(surface, epoch);
    Ok(BusyGuard {
        session: session.clone(),
        surface,
        epoch,
    })
}
