//! Plain-text extraction for uploaded documents.
//!
//! Uploads arrive as bytes plus a content type. Plain text and Markdown
//! pass through (after UTF-8 validation); PDF goes through `pdf-extract`;
//! DOCX is unzipped and its `w:t` runs are collected, one line per `w:p`
//! paragraph so the chunker can see paragraph boundaries.

use std::io::Read;
use std::path::Path;

use docent_core::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("content is not valid UTF-8")]
    NotUtf8,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

impl From<ExtractError> for Error {
    fn from(err: ExtractError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

/// Guess a content type from a file extension. Unknown extensions are
/// treated as plain text.
pub fn content_type_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        _ => MIME_TEXT,
    }
}

/// Extract plain UTF-8 text from `bytes`.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    // Ignore parameters such as `; charset=utf-8`.
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        MIME_TEXT | MIME_MARKDOWN | "text/x-markdown" => String::from_utf8(bytes.to_vec())
            .map_err(|_| ExtractError::NotUtf8),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(mime)),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                    current.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => current.push('\t'),
            Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => {
                let text = current.trim();
                if !text.is_empty() {
                    paragraphs.push(text.to_string());
                }
                current.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(extract_text(b"hello", "text/plain; charset=utf-8").unwrap(), "hello");
        assert_eq!(extract_text(b"# Title", MIME_MARKDOWN).unwrap(), "# Title");
        assert!(matches!(
            extract_text(&[0xff, 0xfe], MIME_TEXT),
            Err(ExtractError::NotUtf8)
        ));
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
        assert!(matches!(Error::from(err), Error::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_pdf_and_docx() {
        assert!(matches!(extract_text(b"not a pdf", MIME_PDF), Err(ExtractError::Pdf(_))));
        assert!(matches!(extract_text(b"not a zip", MIME_DOCX), Err(ExtractError::Docx(_))));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>First </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second &amp; last.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = extract_text(&docx_with(xml), MIME_DOCX).unwrap();
        assert_eq!(text, "First paragraph.\n\nSecond & last.");
    }

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path(Path::new("a/b.PDF")), MIME_PDF);
        assert_eq!(content_type_for_path(Path::new("notes.md")), MIME_MARKDOWN);
        assert_eq!(content_type_for_path(Path::new("x.docx")), MIME_DOCX);
        assert_eq!(content_type_for_path(Path::new("Makefile")), MIME_TEXT);
    }
}
