//! PDF text extraction with section detection.
//!
//! Primary path is lopdf's layout-aware text extraction; when that yields
//! nothing (scanned or oddly-encoded PDFs), a raw scan over the content
//! stream string operands is tried. Extraction is capped to a page budget
//! and is never fatal: failures surface as warnings on the owning job.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use lamina_common::config::ExtractConfig;
use lamina_common::{LaminaError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Canonical sections recognized in extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Abstract,
    Introduction,
    Methods,
    Results,
    Discussion,
    Conclusion,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Abstract => "abstract",
            Section::Introduction => "introduction",
            Section::Methods => "methods",
            Section::Results => "results",
            Section::Discussion => "discussion",
            Section::Conclusion => "conclusion",
        }
    }

    fn from_heading(heading: &str) -> Option<Self> {
        let h = heading.to_lowercase();
        if h.contains("abstract") {
            Some(Section::Abstract)
        } else if h.contains("introduction") || h.contains("background") {
            Some(Section::Introduction)
        } else if h.contains("method") || h.contains("material") {
            Some(Section::Methods)
        } else if h.contains("result") {
            Some(Section::Results)
        } else if h.contains("discussion") {
            Some(Section::Discussion)
        } else if h.contains("conclusion") {
            Some(Section::Conclusion)
        } else {
            None
        }
    }
}

/// Extracted plain text plus best-effort canonical sections.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub full_text: String,
    pub sections: BTreeMap<Section, String>,
}

/// Extract text from the first `page_budget` pages of a PDF.
/// Synchronous; call through `tokio::task::spawn_blocking`.
pub fn extract_pdf_text(pdf_path: &Path, cfg: &ExtractConfig) -> Result<Extraction> {
    let doc = lopdf::Document::load(pdf_path)
        .map_err(|e| LaminaError::Storage(format!("cannot load PDF: {e}")))?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().take(cfg.page_budget).collect();

    let mut full_text = String::new();
    for &page in &page_numbers {
        if let Ok(text) = doc.extract_text(&[page]) {
            full_text.push_str(&text);
            full_text.push('\n');
        }
    }

    if full_text.trim().is_empty() {
        debug!("primary extraction empty, falling back to content-stream scan");
        full_text = scan_content_streams(&doc, &page_numbers);
    }

    let sections = detect_sections(&full_text);
    Ok(Extraction { full_text, sections })
}

/// Fallback: pull string operands straight out of each page's content
/// stream. Loses layout but salvages text lopdf's extractor misses.
fn scan_content_streams(doc: &lopdf::Document, page_numbers: &[u32]) -> String {
    let pages = doc.get_pages();
    let mut out = String::new();
    for page in page_numbers {
        let Some(&page_id) = pages.get(page) else { continue };
        let Ok(data) = doc.get_page_content(page_id) else { continue };
        let Ok(content) = lopdf::content::Content::decode(&data) else { continue };
        for op in &content.operations {
            match op.operator.as_str() {
                "Tj" | "'" | "\"" => {
                    for operand in &op.operands {
                        push_string_operand(operand, &mut out);
                    }
                }
                "TJ" => {
                    for operand in &op.operands {
                        if let lopdf::Object::Array(items) = operand {
                            for item in items {
                                push_string_operand(item, &mut out);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        out.push('\n');
    }
    out
}

fn push_string_operand(obj: &lopdf::Object, out: &mut String) {
    if let lopdf::Object::String(bytes, _) = obj {
        out.push_str(&String::from_utf8_lossy(bytes));
        out.push(' ');
    }
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^\s*(?:\d+\.?\s*)?(abstract|background|introduction|materials and methods|methods?|results|discussion|conclusions?)\b",
        )
        .expect("heading regex")
    })
}

/// Best-effort scan for canonical headings; each section spans from its
/// heading to the next detected heading. Pure over text, so sections can be
/// re-derived from a persisted `fulltext.txt` on resume.
pub fn detect_sections(text: &str) -> BTreeMap<Section, String> {
    let mut hits: Vec<(usize, Section)> = Vec::new();
    for m in heading_regex().find_iter(text) {
        if let Some(section) = Section::from_heading(m.as_str()) {
            hits.push((m.start(), section));
        }
    }

    let mut sections = BTreeMap::new();
    for (i, &(start, section)) in hits.iter().enumerate() {
        let end = hits.get(i + 1).map(|&(next, _)| next).unwrap_or(text.len());
        sections.entry(section).or_insert_with(|| text[start..end].trim().to_string());
    }
    sections
}

/// Render detected sections into one translatable block, in canonical order.
pub fn sections_to_text(sections: &BTreeMap<Section, String>) -> String {
    sections
        .values()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "A Study of Lumbar Fusion\n\
        Abstract\nWe report outcomes of fusion surgery.\n\
        1. Introduction\nFusion is widely used.\n\
        2. Materials and Methods\nWe reviewed 120 cases.\n\
        3. Results\nFusion succeeded in 92%.\n\
        Discussion\nThese results align with prior work.\n\
        Conclusions\nFusion remains effective.\n\
        References\n[1] Prior work.";

    #[test]
    fn test_detect_sections_full() {
        let sections = detect_sections(ARTICLE);
        assert_eq!(sections.len(), 6);
        assert!(sections[&Section::Abstract].contains("outcomes of fusion"));
        assert!(sections[&Section::Introduction].contains("widely used"));
        assert!(sections[&Section::Methods].contains("120 cases"));
        assert!(sections[&Section::Results].contains("92%"));
        assert!(sections[&Section::Discussion].contains("prior work"));
        assert!(sections[&Section::Conclusion].contains("remains effective"));
        // Sections are substrings up to the next heading.
        assert!(!sections[&Section::Abstract].contains("Introduction"));
    }

    #[test]
    fn test_absent_sections_are_absent() {
        let sections = detect_sections("Introduction\nOnly an intro here.");
        assert_eq!(sections.len(), 1);
        assert!(sections.contains_key(&Section::Introduction));
    }

    #[test]
    fn test_case_insensitive_headings() {
        let sections = detect_sections("ABSTRACT\nShouting abstract.\nRESULTS\nLoud results.");
        assert!(sections.contains_key(&Section::Abstract));
        assert!(sections.contains_key(&Section::Results));
    }

    #[test]
    fn test_no_headings_yields_empty_map() {
        assert!(detect_sections("Just some prose without structure.").is_empty());
    }

    #[test]
    fn test_sections_to_text_order() {
        let sections = detect_sections(ARTICLE);
        let text = sections_to_text(&sections);
        let abs = text.find("outcomes of fusion").unwrap();
        let concl = text.find("remains effective").unwrap();
        assert!(abs < concl);
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = extract_pdf_text(Path::new("/nonexistent/x.pdf"), &ExtractConfig::default());
        assert!(err.is_err());
    }
}
