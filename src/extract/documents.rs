//! Document format detection and text decoding.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::DecodeError;

const MIME_PDF: &str = "application/pdf";
const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Upper bound on a single decompressed archive member.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    /// txt, csv, json, xml
    PlainText,
}

impl DocumentFormat {
    /// Format implied by a URL path's extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.to_lowercase();
        let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
        match ext {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "xlsx" => Some(Self::Xlsx),
            "txt" | "csv" | "json" | "xml" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            MIME_PDF => Some(Self::Pdf),
            MIME_DOCX => Some(Self::Docx),
            MIME_PPTX => Some(Self::Pptx),
            MIME_XLSX => Some(Self::Xlsx),
            "text/plain" | "text/csv" | "application/json" | "application/xml" | "text/xml" => {
                Some(Self::PlainText)
            }
            _ => None,
        }
    }

    /// Identify the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if let Some(kind) = infer::get(bytes) {
            return Self::from_mime(kind.mime_type());
        }
        looks_like_text(bytes).then_some(Self::PlainText)
    }

    /// Settle on a format. When the URL hint and the declared type agree
    /// that wins; otherwise the bytes decide.
    pub fn resolve(hint: Option<Self>, content_type: Option<&str>, bytes: &[u8]) -> Option<Self> {
        let declared = content_type.and_then(Self::from_mime);
        match (hint, declared) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => Self::sniff(bytes).or(declared).or(hint),
        }
    }
}

fn looks_like_text(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte character cut at the window edge
        Err(e) => e.error_len().is_none(),
    }
}

/// Decode a document body to plain text.
pub fn decode(bytes: &[u8], format: DocumentFormat) -> Result<String, DecodeError> {
    let text = match format {
        DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| DecodeError::Pdf(e.to_string()))?,
        DocumentFormat::Docx => ooxml_text(bytes, |name| name == "word/document.xml")?,
        DocumentFormat::Pptx => ooxml_text(bytes, |name| {
            name.starts_with("ppt/slides/slide") && name.ends_with(".xml")
        })?,
        DocumentFormat::Xlsx => ooxml_text(bytes, |name| {
            name == "xl/sharedStrings.xml"
                || (name.starts_with("xl/worksheets/sheet") && name.ends_with(".xml"))
        })?,
        DocumentFormat::PlainText => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(text)
}

/// Decode on the blocking pool; decoder panics surface as errors.
pub async fn decode_blocking(
    bytes: Vec<u8>,
    format: DocumentFormat,
) -> Result<String, DecodeError> {
    tokio::task::spawn_blocking(move || decode(&bytes, format))
        .await
        .map_err(|e| DecodeError::Worker(e.to_string()))?
}

/// Concatenate the text runs of every archive member selected by `wanted`.
fn ooxml_text(bytes: &[u8], wanted: impl Fn(&str) -> bool) -> Result<String, DecodeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| wanted(n))
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(DecodeError::Unsupported(
            "archive has no text parts".to_string(),
        ));
    }
    names.sort_by_key(|n| member_number(n));

    let mut out = String::new();
    for name in names {
        let mut xml = Vec::new();
        archive
            .by_name(&name)?
            .take(MAX_ENTRY_BYTES)
            .read_to_end(&mut xml)?;
        let text = xml_text_runs(&xml)?;
        if !text.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&text);
        }
    }
    Ok(out)
}

/// slide12.xml => 12, so slides and sheets read in order.
fn member_number(name: &str) -> (u32, String) {
    let digits: String = name
        .trim_end_matches(".xml")
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    (digits.parse().unwrap_or(0), name.to_string())
}

/// Text inside `<*:t>` elements; paragraph and shared-string ends become spaces.
fn xml_text_runs(xml: &[u8]) -> Result<String, DecodeError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(t) if in_text => {
                out.push_str(&t.unescape()?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" | b"si" | b"c" => {
                    if !out.ends_with(' ') && !out.is_empty() {
                        out.push(' ');
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path("/files/Report.PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_path("/a/b.csv"), Some(DocumentFormat::PlainText));
        assert_eq!(DocumentFormat::from_path("/a/b.html"), None);
        assert_eq!(DocumentFormat::from_path("/a/b"), None);
    }

    #[test]
    fn test_resolve_prefers_bytes_on_disagreement() {
        let pdf = b"%PDF-1.7\n1 0 obj";
        // URL says .txt, server says html, bytes say PDF
        assert_eq!(
            DocumentFormat::resolve(Some(DocumentFormat::PlainText), Some("text/html"), pdf),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::resolve(Some(DocumentFormat::Pdf), Some(MIME_PDF), b"garbage"),
            Some(DocumentFormat::Pdf)
        );
    }

    #[test]
    fn test_sniff_text() {
        assert_eq!(DocumentFormat::sniff(b"a,b,c\n1,2,3\n"), Some(DocumentFormat::PlainText));
        assert_eq!(DocumentFormat::sniff(&[0u8, 1, 2, 3]), None);
    }

    #[test]
    fn test_decode_plain_text_lossy() {
        let text = decode(b"cotton \xff yields", DocumentFormat::PlainText).unwrap();
        assert!(text.starts_with("cotton"));
        assert!(text.ends_with("yields"));
    }

    #[test]
    fn test_decode_docx_runs() {
        let doc = r#"<?xml version="1.0"?><w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Cotton</w:t></w:r><w:r><w:t xml:space="preserve"> harvest</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p></w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        assert_eq!(
            decode(&bytes, DocumentFormat::Docx).unwrap(),
            "Cotton harvest Second & last"
        );
    }

    #[test]
    fn test_decode_pptx_in_slide_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#,
                t
            )
        };
        let s1 = slide("one");
        let s2 = slide("two");
        let s10 = slide("ten");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        assert_eq!(decode(&bytes, DocumentFormat::Pptx).unwrap(), "one two ten");
    }

    #[test]
    fn test_decode_xlsx_shared_strings() {
        let strings = r#"<sst><si><t>Region</t></si><si><t>Cotton</t></si></sst>"#;
        let bytes = zip_with(&[("xl/sharedStrings.xml", strings)]);
        assert_eq!(decode(&bytes, DocumentFormat::Xlsx).unwrap(), "Region Cotton");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode(b"not a zip", DocumentFormat::Docx),
            Err(DecodeError::Zip(_))
        ));
        assert!(matches!(
            decode(b"not a pdf", DocumentFormat::Pdf),
            Err(DecodeError::Pdf(_))
        ));
        let bytes = zip_with(&[("other.xml", "<a/>")]);
        assert!(matches!(
            decode(&bytes, DocumentFormat::Docx),
            Err(DecodeError::Unsupported(_))
        ));
    }
}
