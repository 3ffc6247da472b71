//! Modelos de dominio (perfil de estilo, mensajes de chat y configuración de humanización).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Valoración de un rasgo dentro del estilo del autor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraitImpact {
    Virtue,
    Vice,
    Neutral,
}

impl TraitImpact {
    /// Interpreta la etiqueta que devuelve el modelo, en inglés o en español.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "virtue" | "virtud" => Some(Self::Virtue),
            "vice" | "vicio" => Some(Self::Vice),
            "neutral" | "neutro" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Rasgo estilístico atomizado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTrait {
    /// Nombre técnico del rasgo atomizado.
    pub name: String,
    /// Análisis detallado.
    pub description: String,
    /// Fragmento literal del texto fuente.
    pub example: String,
    /// Virtud, vicio o rasgo neutro.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<TraitImpact>,
}

/// Ejes del radar estilístico, cada uno de 0 a 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleMetrics {
    pub complexity: u8,
    pub formality: u8,
    pub emotionality: u8,
    pub sarcasm: u8,
    pub creativity: u8,
}

/// Huella lingüística inferida de un corpus.
///
/// Se crea una vez por análisis; un corpus mayor produce un perfil nuevo en
/// lugar de modificar el existente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleProfile {
    /// Nombre evocativo del perfil de estilo.
    pub persona_name: String,
    /// Clasificación del nivel de escritura.
    pub writing_level: String,
    /// Puntaje de complejidad del 0 al 100.
    pub writing_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StyleMetrics>,
    /// Resumen ejecutivo del análisis.
    pub summary: String,
    /// Lista exhaustiva de rasgos técnicos.
    pub key_traits: Vec<KeyTrait>,
    /// Prompt maestro estructurado con etiquetas XML.
    pub system_prompt: String,
}

/// Franja legible del `writing_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreBand {
    Coloquial,
    Moderado,
    Erudito,
}

impl StyleProfile {
    pub fn score_band(&self) -> ScoreBand {
        match self.writing_score {
            0..=39 => ScoreBand::Coloquial,
            40..=69 => ScoreBand::Moderado,
            _ => ScoreBand::Erudito,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self::new(Role::Model, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            feedback: None,
            created_at: Utc::now(),
        }
    }
}

/// Interruptores de las instrucciones de evasión que se añaden al chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanizationConfig {
    pub burstiness: bool,
    pub imperfections: bool,
    pub personal_touch: bool,
    pub cultural_context: bool,
    pub anti_repetition: bool,
}

impl Default for HumanizationConfig {
    fn default() -> Self {
        Self {
            burstiness: true,
            imperfections: false,
            personal_touch: true,
            cultural_context: false,
            anti_repetition: true,
        }
    }
}
