use crate::error::ExtractError;
use crate::models::DocumentKind;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::warn;

// Zip-bomb guard for the decompressed word/document.xml entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const DOCX_BODY_ENTRY: &str = "word/document.xml";

pub trait TextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

#[derive(Debug, Default, Clone, Copy)]
pub struct DocxExtractor;

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let document = Document::load(path).map_err(|error| extraction(path, error))?;

        let pages = document
            .get_pages()
            .into_keys()
            .map(|page_no| (page_no, document.extract_text(&[page_no])))
            .collect();
        join_pages(path, pages)
    }
}

// Pages without text (scans, blank pages) contribute nothing. A page that
// fails to decode is dropped on its own; only a document where every page
// fails is an error.
fn join_pages<E: fmt::Display>(
    path: &Path,
    pages: Vec<(u32, Result<String, E>)>,
) -> Result<String, ExtractError> {
    let total = pages.len();
    let mut failed = 0usize;
    let mut last_error = None;
    let mut texts = Vec::new();

    for (page_no, result) in pages {
        match result {
            Ok(text) if !text.trim().is_empty() => texts.push(text.trim_end().to_string()),
            Ok(_) => {}
            Err(error) => {
                warn!(path = %path.display(), page = page_no, error = %error, "skipping unreadable pdf page");
                failed += 1;
                last_error = Some(format!("page {page_no}: {error}"));
            }
        }
    }

    if total > 0 && failed == total {
        let details = last_error.unwrap_or_else(|| "no readable pages".to_string());
        return Err(extraction(path, details));
    }

    Ok(texts.join("\n\n"))
}

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).map_err(|error| extraction(path, error))?;

        let entry = archive
            .by_name(DOCX_BODY_ENTRY)
            .map_err(|error| extraction(path, format!("{DOCX_BODY_ENTRY}: {error}")))?;
        let mut xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|error| extraction(path, error))?;
        if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(extraction(
                path,
                format!("{DOCX_BODY_ENTRY} exceeds {MAX_XML_ENTRY_BYTES} bytes"),
            ));
        }

        docx_body_text(&xml).map_err(|details| extraction(path, details))
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
        String::from_utf8(bytes.to_vec()).map_err(|error| extraction(path, error))
    }
}

pub fn extractor_for(kind: DocumentKind) -> &'static dyn TextExtractor {
    match kind {
        DocumentKind::Pdf => &LopdfExtractor,
        DocumentKind::Docx => &DocxExtractor,
        DocumentKind::Text => &PlainTextExtractor,
    }
}

pub fn extract_document(path: &Path) -> Result<(DocumentKind, String), ExtractError> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| {
        ExtractError::UnsupportedType(
            path.extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
        )
    })?;
    let text = extractor_for(kind).extract(path)?;
    Ok((kind, text))
}

fn extraction(path: &Path, details: impl ToString) -> ExtractError {
    ExtractError::Extraction {
        path: path.to_path_buf(),
        details: details.to_string(),
    }
}

fn docx_body_text(xml: &[u8]) -> Result<String, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    let mut run_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"t" => in_text = true,
                b"r" => run_depth += 1,
                _ => {}
            },
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => run_depth = run_depth.saturating_sub(1),
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Empty(element)) => match element.local_name().as_ref() {
                // Tab stops in paragraph properties share the element name, so
                // only tabs inside a run count as text.
                b"tab" if run_depth > 0 => out.push('\t'),
                b"br" | b"cr" if run_depth > 0 => out.push('\n'),
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text.unescape().map_err(|error| error.to_string())?;
                out.push_str(&unescaped);
            }
            Ok(Event::CData(data)) if in_text => {
                out.push_str(&String::from_utf8_lossy(&data));
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(error.to_string()),
            _ => {}
        }
        buf.clear();
    }

    let trimmed = out.trim_end_matches('\n').len();
    out.truncate(trimmed);
    Ok(out)
}
