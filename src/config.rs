//! Carga y gestión de configuración de la aplicación (servidor + LLM + límites).

use std::env;
use std::str::FromStr;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    fn default_analysis_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Gemini => "gemini-2.5-pro",
        }
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.5-flash",
        }
    }
}

/// Límites que protegen al LLM de muestras inválidas o demasiado grandes.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Longitud mínima (en caracteres) de un espécimen válido.
    pub min_sample_chars: usize,
    /// Presupuesto de caracteres del corpus enviado al análisis.
    pub max_corpus_chars: usize,
    /// Número de mensajes recientes que viajan en cada turno de chat.
    pub chat_window: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_sample_chars: 50,
            max_corpus_chars: 500_000,
            chat_window: 15,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_analysis_model: String,
    pub llm_chat_model: String,

    pub limits: Limits,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());
        let open_browser = match lookup("OPEN_BROWSER") {
            Some(v) => parse_bool("OPEN_BROWSER", &v)?,
            None => true,
        };

        let llm_provider_str = lookup("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_analysis_model = lookup("LLM_ANALYSIS_MODEL")
            .unwrap_or_else(|| llm_provider.default_analysis_model().to_string());
        let llm_chat_model = lookup("LLM_CHAT_MODEL")
            .unwrap_or_else(|| llm_provider.default_chat_model().to_string());

        let defaults = Limits::default();
        let limits = Limits {
            min_sample_chars: parse_or("MIN_SAMPLE_CHARS", &lookup, defaults.min_sample_chars)?,
            max_corpus_chars: parse_or("MAX_CORPUS_CHARS", &lookup, defaults.max_corpus_chars)?,
            chat_window: parse_or("CHAT_WINDOW", &lookup, defaults.chat_window)?,
        };

        if limits.chat_window == 0 {
            return Err(anyhow!("CHAT_WINDOW debe ser mayor que cero"));
        }
        if limits.max_corpus_chars < limits.min_sample_chars {
            return Err(anyhow!(
                "MAX_CORPUS_CHARS ({}) no puede ser menor que MIN_SAMPLE_CHARS ({})",
                limits.max_corpus_chars,
                limits.min_sample_chars
            ));
        }

        Ok(Self {
            server_addr,
            open_browser,
            llm_provider,
            llm_analysis_model,
            llm_chat_model,
            limits,
        })
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "si" | "sí" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(anyhow!("Valor booleano inválido para {key}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:3322");
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAI);
        assert_eq!(cfg.llm_analysis_model, "gpt-4o");
        assert_eq!(cfg.llm_chat_model, "gpt-4o-mini");
        assert_eq!(cfg.limits.min_sample_chars, 50);
        assert_eq!(cfg.limits.max_corpus_chars, 500_000);
        assert_eq!(cfg.limits.chat_window, 15);
        assert!(cfg.open_browser);
    }

    #[test]
    fn gemini_provider_switches_default_models() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("LLM_PROVIDER", "Gemini")])).unwrap();
        assert_eq!(cfg.llm_provider, LlmProvider::Gemini);
        assert_eq!(cfg.llm_analysis_model, "gemini-2.5-pro");
        assert_eq!(cfg.llm_chat_model, "gemini-2.5-flash");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("CHAT_WINDOW", "8"),
            ("MIN_SAMPLE_CHARS", "120"),
            ("LLM_CHAT_MODEL", "gpt-4.1-mini"),
            ("OPEN_BROWSER", "no"),
        ]))
        .unwrap();
        assert_eq!(cfg.limits.chat_window, 8);
        assert_eq!(cfg.limits.min_sample_chars, 120);
        assert_eq!(cfg.llm_chat_model, "gpt-4.1-mini");
        assert!(!cfg.open_browser);
    }

    #[test]
    fn rejects_unknown_provider_and_bad_numbers() {
        assert!(AppConfig::from_lookup(lookup_from(&[("LLM_PROVIDER", "ollama")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("CHAT_WINDOW", "muchos")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("CHAT_WINDOW", "0")])).is_err());
    }
}
