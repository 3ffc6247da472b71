//! Muestreo inteligente de páginas para documentos largos.
//!
//! Un documento de hasta `FULL_READ_LIMIT` páginas se lee entero. Por encima,
//! se leen el gancho (primeras páginas), el núcleo (páginas centrales) y el
//! desenlace (últimas páginas), de modo que el texto enviado al LLM queda
//! acotado sin perder la voz final del autor.

use std::collections::BTreeSet;

/// Máximo de páginas que se leen sin muestrear.
pub const FULL_READ_LIMIT: usize = 15;

/// Páginas de cada tramo (inicio, centro y final).
const SEGMENT_PAGES: usize = 5;

/// Marca visible entre dos páginas no contiguas.
pub const GAP_MARKER: &str = "[...HUECO EN EL MANUSCRITO...]";

/// Devuelve los números de página (base 1) a extraer, en orden estrictamente ascendente.
pub fn select_pages(total: usize) -> Vec<usize> {
    if total <= FULL_READ_LIMIT {
        return (1..=total).collect();
    }

    let half = SEGMENT_PAGES / 2;
    let mid = total / 2;
    let mut pages = BTreeSet::new();

    pages.extend(1..=SEGMENT_PAGES);
    pages.extend(mid.saturating_sub(half).max(1)..=(mid + half).min(total));
    pages.extend((total + 1 - SEGMENT_PAGES)..=total);

    pages.into_iter().collect()
}

/// Une el texto de las páginas seleccionadas con saltos de párrafo, marcando
/// los tramos elididos entre páginas que no son contiguas.
pub fn join_pages(pages: &[(usize, String)]) -> String {
    let mut out = String::new();
    let mut previous: Option<usize> = None;

    for (number, text) in pages {
        if let Some(prev) = previous {
            if *number != prev + 1 {
                out.push_str(GAP_MARKER);
                out.push_str("\n\n");
            }
        }
        out.push_str(text.trim());
        out.push_str("\n\n");
        previous = Some(*number);
    }

    out.trim().to_string()
}
