//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Se implementan OpenAI y Gemini; ambos reciben la misma petición de chat.

use std::env;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::{Chat, Message};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{AppConfig, LlmProvider};
use crate::models::Role;

const RESPONSE_SCHEMA_NAME: &str = "style_profile";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("respuesta vacía del modelo")]
    EmptyResponse,

    #[error("JSON mal formado en la respuesta: {0}")]
    MalformedJson(String),

    #[error("error del proveedor LLM: {0}")]
    Provider(String),
}

/// Turno previo de una conversación.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Petición genérica de completado/chat.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub temperature: f64,
    pub top_p: f64,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub history: Vec<ChatTurn>,
    pub message: String,
    /// Si existe, el modelo debe devolver un JSON que cumpla este esquema.
    pub response_schema: Option<Value>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: String::new(),
            temperature: 1.0,
            top_p: 0.95,
            presence_penalty: None,
            frequency_penalty: None,
            history: Vec::new(),
            message: message.into(),
            response_schema: None,
        }
    }

    /// Instrucción de sistema final, con el esquema anexado si se pidió salida estructurada.
    pub fn system_instruction(&self) -> String {
        match &self.response_schema {
            Some(schema) => format!(
                "{}\n\nLa respuesta DEBE ser un único objeto JSON válido que cumpla este JSON Schema. \
No incluyas explicaciones, solo el JSON.\n{}",
                self.system, schema
            )
            .trim_start()
            .to_string(),
            None => self.system.clone(),
        }
    }
}

/// Servicio de texto del que dependen el análisis, el chat, la generación y el espejo.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Gestor de LLMs respaldado por Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración y comprueba que la
    /// credencial del proveedor esté disponible.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let key_var = match cfg.llm_provider {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        };
        if env::var(key_var).map(|v| v.trim().is_empty()).unwrap_or(true) {
            return Err(anyhow!("Falta {key_var} en el entorno"));
        }

        Ok(Self {
            provider: cfg.llm_provider.clone(),
        })
    }

    async fn complete_with_openai(&self, req: &CompletionRequest) -> Result<String, LlmError> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();

        let agent = client
            .agent(&req.model)
            .preamble(&req.system_instruction())
            .temperature(req.temperature)
            .additional_params(openai_params(req))
            .build();

        agent
            .chat(Message::user(req.message.clone()), to_rig_history(&req.history))
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))
    }

    async fn complete_with_gemini(&self, req: &CompletionRequest) -> Result<String, LlmError> {
        use rig::client::CompletionClient as _;
        use rig::providers::gemini;

        let client = gemini::Client::from_env();

        let agent = client
            .agent(&req.model)
            .preamble(&req.system_instruction())
            .temperature(req.temperature)
            .additional_params(gemini_params(req))
            .build();

        agent
            .chat(Message::user(req.message.clone()), to_rig_history(&req.history))
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))
    }
}

/// Parámetros extra de OpenAI: muestreo y, si se pidió, salida con esquema.
fn openai_params(req: &CompletionRequest) -> Value {
    let mut params = json!({ "top_p": req.top_p });
    if let Some(p) = req.presence_penalty {
        params["presence_penalty"] = json!(p);
    }
    if let Some(p) = req.frequency_penalty {
        params["frequency_penalty"] = json!(p);
    }
    if let Some(schema) = &req.response_schema {
        params["response_format"] = json!({
            "type": "json_schema",
            "json_schema": { "name": RESPONSE_SCHEMA_NAME, "schema": schema },
        });
    }
    params
}

/// `generationConfig` de Gemini: muestreo y, si se pidió, `responseSchema`.
fn gemini_params(req: &CompletionRequest) -> Value {
    let mut generation_config = json!({ "topP": req.top_p });
    if let Some(p) = req.presence_penalty {
        generation_config["presencePenalty"] = json!(p);
    }
    if let Some(p) = req.frequency_penalty {
        generation_config["frequencyPenalty"] = json!(p);
    }
    if let Some(schema) = &req.response_schema {
        generation_config["responseMimeType"] = json!("application/json");
        generation_config["responseSchema"] = gemini_schema(schema);
    }
    json!({ "generationConfig": generation_config })
}

/// Adapta un JSON Schema al subconjunto OpenAPI que acepta Gemini: resuelve
/// las `$ref` locales, quita las claves que no admite y expresa los tipos
/// opcionales con `nullable`.
fn gemini_schema(schema: &Value) -> Value {
    let defs = schema
        .get("$defs")
        .or_else(|| schema.get("definitions"))
        .cloned()
        .unwrap_or(Value::Null);
    sanitize_schema(schema, &defs)
}

fn sanitize_schema(node: &Value, defs: &Value) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(target) = map.get("$ref").and_then(Value::as_str) {
                let name = target.rsplit('/').next().unwrap_or(target);
                let mut resolved = sanitize_schema(defs.get(name).unwrap_or(&Value::Null), defs);
                if let (Value::Object(out), Some(desc)) = (&mut resolved, map.get("description")) {
                    out.insert("description".to_string(), desc.clone());
                }
                return resolved;
            }

            for key in ["anyOf", "oneOf"] {
                if let Some(Value::Array(variants)) = map.get(key) {
                    let non_null: Vec<&Value> = variants.iter().filter(|v| !is_null_type(v)).collect();
                    if non_null.len() == 1 && variants.len() == 2 {
                        let mut inner = sanitize_schema(non_null[0], defs);
                        if let Value::Object(out) = &mut inner {
                            out.insert("nullable".to_string(), Value::Bool(true));
                            if let Some(desc) = map.get("description") {
                                out.insert("description".to_string(), desc.clone());
                            }
                        }
                        return inner;
                    }
                }
            }

            let mut out = serde_json::Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "$schema" | "$defs" | "definitions" | "default" | "title" | "format" => {}
                    "properties" => {
                        let props = value
                            .as_object()
                            .map(|props| {
                                props
                                    .iter()
                                    .map(|(name, prop)| (name.clone(), sanitize_schema(prop, defs)))
                                    .collect()
                            })
                            .unwrap_or_default();
                        out.insert(key.clone(), Value::Object(props));
                    }
                    "type" => match value {
                        Value::Array(types) => {
                            let concrete: Vec<&Value> =
                                types.iter().filter(|t| t.as_str() != Some("null")).collect();
                            if let Some(first) = concrete.first() {
                                out.insert("type".to_string(), (*first).clone());
                            }
                            if concrete.len() < types.len() {
                                out.insert("nullable".to_string(), Value::Bool(true));
                            }
                        }
                        other => {
                            out.insert("type".to_string(), other.clone());
                        }
                    },
                    _ => {
                        out.insert(key.clone(), sanitize_schema(value, defs));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize_schema(v, defs)).collect()),
        other => other.clone(),
    }
}

fn is_null_type(node: &Value) -> bool {
    node.get("type").and_then(Value::as_str) == Some("null")
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!(
            "Llamada a {:?}/{} con {} turnos de historial",
            self.provider,
            request.model,
            request.history.len()
        );

        let result = match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(request).await,
            LlmProvider::Gemini => self.complete_with_gemini(request).await,
        };

        match result {
            Ok(text) if text.trim().is_empty() => Err(LlmError::EmptyResponse),
            Ok(text) => Ok(text),
            Err(e) => {
                error!("Fallo del proveedor {:?}: {}", self.provider, e);
                Err(e)
            }
        }
    }
}

fn to_rig_history(history: &[ChatTurn]) -> Vec<Message> {
    history
        .iter()
        .map(|turn| match turn.role {
            Role::User => Message::user(turn.content.clone()),
            Role::Model => Message::assistant(turn.content.clone()),
        })
        .collect()
}

#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    type Hook = Box<dyn Fn(&CompletionRequest) + Send + Sync>;

    /// Modelo de prueba: registra cada petición y devuelve respuestas en cola (FIFO).
    #[derive(Default)]
    pub struct MockModel {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
        hook: Mutex<Option<Hook>>,
    }

    impl MockModel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn enqueue(&self, text: impl Into<String>) {
            self.responses.lock().unwrap().push_back(Ok(text.into()));
        }

        pub fn enqueue_error(&self, err: LlmError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        /// Se ejecuta durante cada llamada, con la petición "en vuelo".
        pub fn on_call(&self, hook: impl Fn(&CompletionRequest) + Send + Sync + 'static) {
            *self.hook.lock().unwrap() = Some(Box::new(hook));
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> CompletionRequest {
            self.requests
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("no se registró ninguna petición")
        }
    }

    #[async_trait]
    impl LanguageModel for MockModel {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(hook) = self.hook.lock().unwrap().as_ref() {
                hook(request);
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::Provider("mock: sin respuesta configurada".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_appended_to_system_instruction() {
        let mut req = CompletionRequest::new("m", "hola");
        assert_eq!(req.system_instruction(), "");

        req.system = "Eres un analista.".into();
        req.response_schema = Some(json!({"type": "object"}));
        let system = req.system_instruction();
        assert!(system.starts_with("Eres un analista."));
        assert!(system.ends_with(r#"{"type":"object"}"#));
    }

    #[test]
    fn history_roles_map_to_rig_messages() {
        let history = vec![
            ChatTurn { role: Role::User, content: "hola".into() },
            ChatTurn { role: Role::Model, content: "buenas".into() },
        ];
        let messages = to_rig_history(&history);
        assert_eq!(messages.len(), 2);
        let as_json = |m: &Message| serde_json::to_value(m).unwrap();
        assert_eq!(as_json(&messages[0]), as_json(&Message::user("hola")));
        assert_eq!(as_json(&messages[1]), as_json(&Message::assistant("buenas")));
    }

    fn structured_request() -> CompletionRequest {
        let mut req = CompletionRequest::new("m", "analiza");
        req.presence_penalty = Some(0.1);
        req.response_schema = Some(crate::prompts::profile_schema());
        req
    }

    #[test]
    fn openai_requests_json_schema_output() {
        let params = openai_params(&structured_request());
        assert_eq!(params["top_p"], 0.95);
        assert_eq!(params["presence_penalty"], 0.1);
        assert_eq!(params["response_format"]["type"], "json_schema");
        assert_eq!(params["response_format"]["json_schema"]["name"], RESPONSE_SCHEMA_NAME);
        assert_eq!(
            params["response_format"]["json_schema"]["schema"],
            crate::prompts::profile_schema()
        );

        let plain = openai_params(&CompletionRequest::new("m", "hola"));
        assert!(plain.get("response_format").is_none());
        assert!(plain.get("presence_penalty").is_none());
    }

    #[test]
    fn gemini_requests_schema_in_generation_config() {
        let params = gemini_params(&structured_request());
        let config = &params["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["presencePenalty"], 0.1);

        let schema = &config["responseSchema"];
        let text = schema.to_string();
        for forbidden in ["$ref", "$defs", "$schema", "\"null\""] {
            assert!(!text.contains(forbidden), "{forbidden} en {text}");
        }
        let props = &schema["properties"];
        assert_eq!(props["keyTraits"]["type"], "array");
        assert_eq!(props["keyTraits"]["items"]["properties"]["name"]["type"], "string");
        assert_eq!(props["keyTraits"]["items"]["properties"]["impact"]["nullable"], true);
        assert_eq!(props["metrics"]["nullable"], true);
        assert_eq!(props["metrics"]["properties"]["complexity"]["type"], "number");

        let plain = gemini_params(&CompletionRequest::new("m", "hola"));
        assert!(plain["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn gemini_schema_resolves_refs_and_nullables() {
        let schema = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": "Raiz",
            "type": "object",
            "properties": {
                "title": { "type": ["string", "null"], "default": null },
                "child": {
                    "description": "hijo",
                    "anyOf": [{ "$ref": "#/$defs/Child" }, { "type": "null" }]
                }
            },
            "required": ["child"],
            "$defs": {
                "Child": { "type": "object", "properties": { "n": { "type": "number", "format": "double" } } }
            }
        });

        assert_eq!(
            gemini_schema(&schema),
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "nullable": true },
                    "child": {
                        "type": "object",
                        "properties": { "n": { "type": "number" } },
                        "nullable": true,
                        "description": "hijo"
                    }
                },
                "required": ["child"]
            })
        );
    }

    #[tokio::test]
    async fn mock_replays_queue_then_fails() {
        let mock = mock::MockModel::new();
        mock.enqueue("uno");
        let req = CompletionRequest::new("m", "x");
        assert_eq!(mock.complete(&req).await.unwrap(), "uno");
        assert!(mock.complete(&req).await.is_err());
        assert_eq!(mock.call_count(), 2);
    }
}
