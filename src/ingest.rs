//! Extracción de texto de los especímenes subidos (PDF o texto plano).
//!
//! Los PDF se muestrean página a página con `sampler`; cualquier fallo de
//! lectura aborta la extracción completa, nunca se devuelve texto parcial.

use mime_guess::MimeGuess;
use tokio::task;
use tracing::{info, warn};

use crate::{error::AppError, sampler};

/// Tipo declarado de un documento subido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    /// Decide el tipo a partir del `Content-Type` declarado o, si no es
    /// concluyente, de la extensión del nombre de fichero.
    pub fn detect(filename: &str, content_type: Option<&str>) -> Result<Self, AppError> {
        let declared = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

        let essence = match declared {
            Some(ct) => ct,
            None => MimeGuess::from_path(filename)
                .first_raw()
                .unwrap_or("")
                .to_string(),
        };

        match essence.as_str() {
            "application/pdf" => Ok(Self::Pdf),
            "text/plain" | "text/markdown" => Ok(Self::PlainText),
            _ => Err(AppError::UnsupportedFormat {
                filename: filename.to_string(),
            }),
        }
    }
}

/// Documento recibido del usuario. Efímero: se consume al extraer su texto.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

/// Acceso página a página a un documento estructurado.
pub trait PagedDocument {
    fn page_count(&self) -> usize;

    /// Texto de la página `page` (base 1).
    fn page_text(&self, page: usize) -> Result<String, AppError>;
}

/// Páginas de un PDF decodificadas con `pdf-extract`.
pub struct PdfPages {
    pages: Vec<String>,
}

impl PdfPages {
    pub fn parse(bytes: &[u8]) -> Result<Self, AppError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
            AppError::DocumentUnreadable {
                reason: e.to_string(),
            }
        })?;
        Ok(Self { pages })
    }
}

impl PagedDocument for PdfPages {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String, AppError> {
        page.checked_sub(1)
            .and_then(|idx| self.pages.get(idx))
            .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .ok_or_else(|| AppError::DocumentUnreadable {
                reason: format!("la página {page} no existe"),
            })
    }
}

/// Normaliza cualquier espécimen aceptado a un único bloque de texto.
pub async fn extract_text(doc: SourceDocument) -> Result<String, AppError> {
    match doc.kind {
        DocumentKind::PlainText => match String::from_utf8(doc.bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                // Los bytes inválidos (p. ej. Windows-1252) se sustituyen por U+FFFD.
                warn!(
                    "'{}' no es UTF-8 válido ({}); se decodifica con reemplazo.",
                    doc.filename,
                    e.utf8_error()
                );
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        },
        DocumentKind::Pdf => {
            let filename = doc.filename;
            let bytes = doc.bytes;
            // pdf-extract es síncrono y puede entrar en pánico con PDFs raros.
            let parsed = task::spawn_blocking(move || PdfPages::parse(&bytes))
                .await
                .map_err(|e| AppError::DocumentUnreadable {
                    reason: format!("el parser de PDF falló: {e}"),
                })?;

            let pdf = match parsed {
                Ok(pdf) => pdf,
                Err(err) => {
                    warn!("No se pudo leer el PDF {}: {:?}", filename, err);
                    return Err(err);
                }
            };
            extract_sampled(&pdf, &filename)
        }
    }
}

/// Aplica el muestreo de páginas y une el texto resultante.
pub fn extract_sampled(doc: &dyn PagedDocument, name: &str) -> Result<String, AppError> {
    let total = doc.page_count();
    if total == 0 {
        return Err(AppError::DocumentUnreadable {
            reason: "el documento no tiene páginas".to_string(),
        });
    }

    let selected = sampler::select_pages(total);
    info!(
        "Muestreo inteligente de '{}': extrayendo {} de {} páginas.",
        name,
        selected.len(),
        total
    );

    let pages = selected
        .into_iter()
        .map(|page| doc.page_text(page).map(|text| (page, text)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(sampler::join_pages(&pages))
}

/// Rechaza especímenes por debajo de la longitud mínima.
pub fn validate_sample(text: &str, min_chars: usize) -> Result<(), AppError> {
    let actual = text.trim().chars().count();
    if actual < min_chars {
        return Err(AppError::SampleTooShort {
            actual,
            min: min_chars,
        });
    }
    Ok(())
}
