//! Active-content removal for PDF uploads.
//!
//! Strips everything that can execute, phone home, or carry hidden payloads
//! while leaving page content streams untouched:
//!
//! * trailer `/Info` and `/ID`
//! * catalog `/OpenAction`, `/AA`, `/AcroForm`, `/Metadata`
//! * the `/JavaScript` and `/EmbeddedFiles` name trees
//! * page `/Annots` and `/AA`
//!
//! Objects left unreachable afterwards are pruned. Running the sanitizer on
//! its own output removes nothing further.
//!
//! lopdf parsing is CPU-bound, so the async entry point runs inside
//! `spawn_blocking`.

use crate::error::{DocstoreError, SanitizeError};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::Path;
use tracing::debug;

const TRAILER_KEYS: &[&str] = &["Info", "ID"];
const CATALOG_KEYS: &[&str] = &["OpenAction", "AA", "AcroForm", "Metadata"];
const NAME_TREE_KEYS: &[&str] = &["JavaScript", "EmbeddedFiles"];
const PAGE_KEYS: &[&str] = &["Annots", "AA"];

/// Whether files with this (lower-cased) extension go through the sanitizer.
/// Everything else is stored as uploaded.
pub fn is_sanitizable(extension: &str) -> bool {
    extension.eq_ignore_ascii_case("pdf")
}

/// What a sanitize pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub pages: usize,
    /// Removed entries, e.g. `catalog/OpenAction` or `page 2/Annots`.
    pub removed: Vec<String>,
    /// Objects dropped because nothing referenced them any more.
    pub pruned: usize,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty() && self.pruned == 0
    }
}

/// Sanitize an in-memory PDF and return the rewritten bytes.
pub fn sanitize_bytes(input: &[u8]) -> Result<(Vec<u8>, SanitizeReport), SanitizeError> {
    let mut doc = Document::load_mem(input).map_err(|e| malformed(format!("unparsable PDF: {e}")))?;

    if doc.trailer.has(b"Encrypt") {
        return Err(malformed("encrypted documents are not accepted"));
    }

    let mut report = SanitizeReport::default();
    strip(&mut doc.trailer, TRAILER_KEYS, "trailer", &mut report);

    let root = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| malformed("trailer has no /Root reference"))?;
    let names_ref = {
        let catalog = dict_mut(&mut doc, root).ok_or_else(|| malformed("catalog is not a dictionary"))?;
        strip(catalog, CATALOG_KEYS, "catalog", &mut report);
        match catalog.get_mut(b"Names") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(names)) => {
                strip(names, NAME_TREE_KEYS, "names", &mut report);
                None
            }
            _ => None,
        }
    };
    if let Some(id) = names_ref {
        if let Some(names) = dict_mut(&mut doc, id) {
            strip(names, NAME_TREE_KEYS, "names", &mut report);
        }
    }

    let pages = doc.get_pages();
    report.pages = pages.len();
    for (number, id) in pages {
        if let Some(page) = dict_mut(&mut doc, id) {
            strip(page, PAGE_KEYS, &format!("page {number}"), &mut report);
        }
    }

    report.pruned = doc.prune_objects().len();

    let mut out = Vec::with_capacity(input.len());
    doc.save_to(&mut out)
        .map_err(|e| malformed(format!("cannot re-serialise document: {e}")))?;
    Ok((out, report))
}

/// Sanitize the file at `src` into `dst`.
pub async fn sanitize_file(src: &Path, dst: &Path) -> Result<SanitizeReport, DocstoreError> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<SanitizeReport, DocstoreError> {
        let input = std::fs::read(&src).map_err(|source| DocstoreError::Staging {
            path: src.clone(),
            source,
        })?;
        let (output, report) = sanitize_bytes(&input)?;
        std::fs::write(&dst, &output).map_err(|source| DocstoreError::Staging {
            path: dst.clone(),
            source,
        })?;
        debug!(
            pages = report.pages,
            removed = report.removed.len(),
            pruned = report.pruned,
            "document sanitized"
        );
        Ok(report)
    })
    .await
    .map_err(|e| DocstoreError::Internal(format!("Sanitize task panicked: {}", e)))?
}

fn dict_mut(doc: &mut Document, id: ObjectId) -> Option<&mut Dictionary> {
    doc.get_object_mut(id).and_then(Object::as_dict_mut).ok()
}

fn strip(dict: &mut Dictionary, keys: &[&str], scope: &str, report: &mut SanitizeReport) {
    for key in keys {
        if dict.remove(key.as_bytes()).is_some() {
            report.removed.push(format!("{scope}/{key}"));
        }
    }
}

fn malformed(detail: impl Into<String>) -> SanitizeError {
    SanitizeError::MalformedInput {
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    /// One-page document with an OpenAction, an annotation and an Info dict.
    fn active_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
        let annot_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Annots" => vec![annot_id.into()],
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let js_id = doc.add_object(dictionary! {
            "S" => "JavaScript",
            "JS" => Object::string_literal("app.alert(1)"),
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "OpenAction" => js_id,
        });
        let info_id = doc.add_object(dictionary! { "Producer" => Object::string_literal("x") });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn removes_active_content_and_keeps_pages() {
        let (out, report) = sanitize_bytes(&active_pdf()).unwrap();
        assert_eq!(report.pages, 1);
        assert!(report.removed.contains(&"catalog/OpenAction".to_string()));
        assert!(report.removed.contains(&"trailer/Info".to_string()));
        assert!(report.removed.contains(&"page 1/Annots".to_string()));
        assert!(report.pruned >= 3, "annotation, action and info become unreachable");

        let doc = Document::load_mem(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        assert!(!doc.trailer.has(b"Info"));
    }

    /// Text pages in Courier, plus a link annotation and an OpenAction.
    fn text_pdf(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let annot_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "Annots" => vec![annot_id.into()],
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            kids.push(page_id.into());
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let js_id = doc.add_object(dictionary! {
            "S" => "JavaScript",
            "JS" => Object::string_literal("app.alert(1)"),
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "OpenAction" => js_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn page_texts(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .keys()
            .map(|n| doc.extract_text(&[*n]).unwrap())
            .collect()
    }

    #[test]
    fn second_pass_changes_nothing() {
        let (once, first) = sanitize_bytes(&text_pdf(&["Alpha page", "Bravo page"])).unwrap();
        assert!(first.removed.contains(&"page 2/Annots".to_string()));

        let (twice, second) = sanitize_bytes(&once).unwrap();
        assert!(second.is_clean(), "second pass removed {:?}", second.removed);

        let texts = page_texts(&once);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("Alpha page"), "got: {texts:?}");
        assert!(texts[1].contains("Bravo page"), "got: {texts:?}");
        assert_eq!(page_texts(&twice), texts);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = sanitize_bytes(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, SanitizeError::MalformedInput { .. }));
    }

    #[test]
    fn only_pdf_is_sanitizable() {
        assert!(is_sanitizable("pdf"));
        assert!(is_sanitizable("PDF"));
        assert!(!is_sanitizable("txt"));
    }
}
