//! Resume text extraction.
//!
//! Uploaded documents are reduced to their non-blank, trimmed lines. Problems
//! never fail the request: they come back as a single explanatory line so the
//! chat can still show something to the user.

use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

pub mod handlers;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}. Please upload .docx, .pdf, or .txt.")]
    Unsupported(String),

    #[error("Error reading file {file_name} ({ext}): {message}")]
    Read {
        file_name: String,
        ext: String,
        message: String,
    },
}

/// Extracts the text lines of `file_name`.
pub fn extract(file_name: &str, bytes: &[u8]) -> Vec<String> {
    match try_extract(file_name, bytes) {
        Ok(lines) => lines,
        Err(e) => {
            warn!(file_name, "Document extraction failed: {e}");
            vec![e.to_string()]
        }
    }
}

fn try_extract(file_name: &str, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let ext = extension(file_name);
    let text = match ext.as_str() {
        "txt" => String::from_utf8_lossy(bytes).into_owned(),
        "pdf" => pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Read {
            file_name: file_name.to_string(),
            ext: ext.clone(),
            message: e.to_string(),
        })?,
        "docx" => docx_text(bytes).map_err(|message| ExtractError::Read {
            file_name: file_name.to_string(),
            ext: ext.clone(),
            message,
        })?,
        _ => return Err(ExtractError::Unsupported(ext)),
    };
    Ok(non_blank_lines(&text))
}

static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").expect("Invalid regex"));
static TEXT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:t(?: [^>]*)?>([^<]*)</w:t>").expect("Invalid regex"));

/// Joins the text runs of each paragraph in `word/document.xml`, one paragraph per line.
fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    let paragraphs: Vec<String> = PARAGRAPH
        .find_iter(&xml)
        .map(|p| {
            TEXT_RUN
                .captures_iter(p.as_str())
                .map(|run| unescape_xml(&run[1]))
                .collect::<String>()
        })
        .collect();
    Ok(paragraphs.join("\n"))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

fn non_blank_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txt_lines_are_trimmed_and_blanks_dropped() {
        let lines = extract("resume.TXT", b"  Jane Doe  \n\n\tRust engineer\r\n   \n");
        assert_eq!(lines, vec!["Jane Doe", "Rust engineer"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_rejected() {
        let lines = extract("notes.txt", b"caf\xff\nok");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "ok");
    }

    #[test]
    fn test_unsupported_extension_returns_single_error_line() {
        let lines = extract("resume.odt", b"PK...");
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0],
            "Unsupported file type: odt. Please upload .docx, .pdf, or .txt."
        );

        let lines = extract("README", b"hello");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Unsupported file type"));
    }

    fn docx(document_xml: &str) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:t>Jane</w:t></w:r><w:r><w:t xml:space="preserve"> Doe</w:t></w:r></w:p>
<w:p/>
<w:p><w:r><w:t>   </w:t></w:r></w:p>
<w:p><w:r><w:t>Rust &amp; Go engineer</w:t></w:r></w:p>
</w:body></w:document>"#;
        let lines = extract("resume.docx", &docx(xml));
        assert_eq!(lines, vec!["Jane Doe", "Rust & Go engineer"]);
    }

    #[test]
    fn test_corrupt_docx_returns_single_error_line() {
        let lines = extract("resume.docx", b"PK not really a zip");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error reading file resume.docx (docx)"));
    }

    #[test]
    fn test_corrupt_pdf_returns_single_error_line() {
        let lines = extract("resume.pdf", b"definitely not a pdf");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error reading file resume.pdf (pdf)"));
    }
}
