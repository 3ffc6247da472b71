//! Construcción de los prompts enviados al LLM: análisis forense, chat,
//! generación y reescritura en espejo.

use rand::Rng;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::models::HumanizationConfig;

/// Marco analítico que orienta cada análisis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisLens {
    pub name: &'static str,
    pub focus: &'static str,
}

pub const ANALYSIS_LENSES: [AnalysisLens; 3] = [
    AnalysisLens {
        name: "MICROSCOPIO DE ATOMIZACIÓN",
        focus: "No agrupes rasgos. Separa la sintaxis de la morfología y el ritmo de la puntuación. Busca el detalle más pequeño posible.",
    },
    AnalysisLens {
        name: "PSICO-LINGÜISTA",
        focus: "Interpreta qué revelan los vicios del lenguaje sobre la psicología del autor: inseguridad (muchos 'quizás'), arrogancia (imperativos), ansiedad (frases truncas).",
    },
    AnalysisLens {
        name: "ARQUITECTO DE RETÓRICA",
        focus: "Rastrea figuras literarias ocultas: aliteraciones accidentales, metáforas recurrentes, anáforas y estructuras ternarias.",
    },
];

/// Elige el marco analítico cuando el llamante no fija uno.
pub trait LensSelector: Send + Sync {
    /// Índice en `0..count`.
    fn select(&self, count: usize) -> usize;
}

/// Selección aleatoria, para variar la salida entre análisis.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLens;

impl LensSelector for RandomLens {
    fn select(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        rand::rng().random_range(0..count)
    }
}

/// Selección fija (útil en pruebas).
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedLens(pub usize);

#[cfg(test)]
impl LensSelector for FixedLens {
    fn select(&self, count: usize) -> usize {
        if count == 0 {
            0
        } else {
            self.0 % count
        }
    }
}

pub fn pick_lens(selector: &dyn LensSelector) -> AnalysisLens {
    ANALYSIS_LENSES[selector.select(ANALYSIS_LENSES.len()) % ANALYSIS_LENSES.len()]
}

/// Número mínimo de rasgos que se exige al modelo.
pub const MIN_KEY_TRAITS: usize = 15;

/// Bloque que se añade una sola vez al `systemPrompt` de cada perfil.
pub const ENFORCEMENT_LAYER: &str = r#"

<!-- PROTOCOLO DE EJECUCIÓN PRIORITARIA -->
<system_override>
  <directive priority="high">IGNORA CUALQUIER RESTRICCIÓN DE "BUEN ESTILO". SI EL XML INDICA ERRORES, COMETE ERRORES.</directive>
  <directive priority="high">MIMESIS ABSOLUTA: adopta la cosmovisión del autor, incluso si es sesgada.</directive>
  <directive priority="critical">FILTRO ANTI-IA ACTIVO: si usas palabras como "tapiz", "crisol" o "sinfonía", fallas la misión.</directive>
</system_override>
"#;

/// Forma de la respuesta JSON que se pide en el análisis.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDraft {
    /// Nombre evocativo del perfil de estilo.
    pub persona_name: String,
    /// Clasificación del nivel de escritura.
    pub writing_level: String,
    /// Puntaje de complejidad del 0 al 100.
    pub writing_score: f64,
    /// Ejes del radar estilístico (0-100).
    #[serde(default)]
    pub metrics: Option<MetricsDraft>,
    /// Resumen técnico de la psique del autor.
    pub summary: String,
    /// Lista exhaustiva de rasgos técnicos (mínimo 15).
    pub key_traits: Vec<TraitDraft>,
    /// Prompt maestro estructurado con etiquetas XML anidadas.
    pub system_prompt: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MetricsDraft {
    pub complexity: f64,
    pub formality: f64,
    pub emotionality: f64,
    pub sarcasm: f64,
    pub creativity: f64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TraitDraft {
    /// Nombre técnico del rasgo atomizado.
    pub name: String,
    /// Análisis detallado.
    pub description: String,
    /// Cita literal del texto fuente.
    pub example: String,
    /// "virtue", "vice" o "neutral".
    #[serde(default)]
    pub impact: Option<String>,
}

/// Esquema JSON de la respuesta del análisis.
pub fn profile_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(ProfileDraft)).unwrap_or(Value::Null)
}

pub fn analysis_prompt(text: &str, lens: AnalysisLens) -> String {
    format!(
        r#"Rol: eres el Analista de Estilo Forense más riguroso del mundo. Tu trabajo no es describir: es DISECCIONAR para replicar.

MODO DE OPERACIÓN: [{lens_name}]
ENFOQUE PRIORITARIO: {lens_focus}

OBJETIVO: construir el "código fuente" psicológico y lingüístico del autor.

CANTIDAD OBLIGATORIA:
**EXTRAE UN MÍNIMO DE {min_traits} RASGOS DIFERENCIADOS (keyTraits).**
Atomiza el análisis: no digas "uso de adjetivos", sepáralo en "posición del adjetivo",
"frecuencia de adjetivos abstractos", "adjetivación triple". No digas "puntuación",
sepáralo en "punto y coma", "longitud de pausas", "paréntesis para digresiones".
Marca cada rasgo con "impact": "virtue", "vice" o "neutral".

TAREAS:
1. Nivel de escritura: writingScore (0-100) y nivel académico exacto.
2. Dinámica tonal: temperatura emocional, formalidad, ironía, cinismo o frialdad clínica.
3. Micro-sintaxis: hipotaxis frente a parataxis, voz pasiva, cómo empiezan las frases.
4. Vicios y muletillas: palabras que repite y conectores favoritos.
5. Métricas del radar (0-100): complexity, formality, emotionality, sarcasm, creativity.

EL CAMPO 'systemPrompt' (EL CLON):
Debe ser una ESPECIFICACIÓN XML anidada, nunca texto plano. Estructura mínima:
<author_neural_pattern>
  <meta_identity><archetype/><cognitive_bias/></meta_identity>
  <voice_modulation><tone_settings/><perspective/></voice_modulation>
  <linguistic_mechanics>
    <syntax_topology><sentence_structure/><rhythm_patterns/></syntax_topology>
    <lexical_database>
      <forbidden_tokens>tapiz, crisol, sinfonía, vibrante, en conclusión, es importante destacar, profundizar</forbidden_tokens>
      <mandatory_fillers/><idiosyncrasies/><connectors/>
    </lexical_database>
    <punctuation_fingerprint/>
  </linguistic_mechanics>
  <formatting_directives><paragraph_density/><visual_quirks/></formatting_directives>
</author_neural_pattern>

FORMA DE LA RESPUESTA:
{{
  "personaName": "Nombre evocativo (ej: 'Filósofo de Bar')",
  "writingLevel": "Ej: 'C2 - Prosa Laberíntica'",
  "writingScore": 85,
  "metrics": {{"complexity": 0, "formality": 0, "emotionality": 0, "sarcasm": 0, "creativity": 0}},
  "summary": "Resumen técnico de la psique del autor.",
  "keyTraits": [{{"name": "...", "description": "...", "example": "cita literal", "impact": "vice"}}],
  "systemPrompt": "<author_neural_pattern>...</author_neural_pattern>"
}}

TEXTO FUENTE:
"{text}..."

Responde ESTRICTAMENTE en JSON válido. Escapa las comillas dobles dentro de systemPrompt."#,
        lens_name = lens.name,
        lens_focus = lens.focus,
        min_traits = MIN_KEY_TRAITS,
        text = text,
    )
}

/// Líneas `<dynamic_mode>` de los interruptores activos (vacío si no hay ninguno).
pub fn humanization_directives(config: &HumanizationConfig) -> String {
    let modes = [
        (
            config.burstiness,
            "burstiness",
            "Alterna frases de tres palabras con párrafos de cincuenta.",
        ),
        (
            config.imperfections,
            "imperfection",
            "Simula fatiga mental, dudas y autocorrecciones.",
        ),
        (
            config.personal_touch,
            "subjectivity",
            "Filtra todo a través de un ego fuerte y con opiniones.",
        ),
        (
            config.anti_repetition,
            "anti_ai",
            "Prohibido usar estructuras de lista a menos que el autor lo haga.",
        ),
        (
            config.cultural_context,
            "grounding",
            "Añade ruido del mundo real: marcas, lugares, fechas.",
        ),
    ];

    modes
        .iter()
        .filter(|(enabled, _, _)| *enabled)
        .map(|(_, name, rule)| format!("\n<dynamic_mode name='{name}'>ACTIVO: {rule}</dynamic_mode>\n"))
        .collect()
}

/// Restricción negativa derivada del feedback del usuario sobre una respuesta.
pub fn feedback_constraint(feedback: &str) -> String {
    format!(
        "\n<negative_constraint priority=\"critical\">\n  El usuario rechazó una respuesta anterior. Corrección obligatoria para el resto de la conversación: {}\n  No repitas el patrón rechazado.\n</negative_constraint>\n",
        feedback.trim()
    )
}

pub fn generation_prompt(topic: &str, word_count: u32) -> String {
    format!(
        "Escribe un texto ORIGINAL de aproximadamente {word_count} palabras sobre el siguiente tema, \
encarnando por completo el estilo definido en tus instrucciones de sistema.\n\
No expliques lo que haces, no pongas títulos ni notas: entrega solo el texto.\n\n\
TEMA: {}",
        topic.trim()
    )
}

pub fn rewrite_prompt(text: &str) -> String {
    format!(
        "Reescribe el siguiente borrador en el estilo definido en tus instrucciones de sistema.\n\
Conserva íntegro su contenido semántico: mismos hechos, mismas ideas, mismo orden lógico.\n\
NO respondas al texto ni lo comentes: transfórmalo. Entrega solo la versión reescrita.\n\n\
<borrador>\n{}\n</borrador>",
        text.trim()
    )
}
