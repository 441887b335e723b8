use crate::error::IngestError;
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    /// 0-based page number.
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: u32,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub info: DocumentInfo,
    pub pages: Vec<PageText>,
}

pub trait PageExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PageExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let page_map = document.get_pages();

        let mut pages = Vec::new();
        for (page_no, page_id) in &page_map {
            let number = page_no.saturating_sub(1);
            let layout = match document.extract_text(&[*page_no]) {
                Ok(text) if !text.trim().is_empty() => Some(text),
                Ok(_) => {
                    debug!(page = number, "layout extraction returned no text, using raw page text");
                    None
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        page = number,
                        %error,
                        "layout extraction failed, using raw page text"
                    );
                    None
                }
            };
            let Some(text) = layout.or_else(|| raw_page_text(&document, *page_id)) else {
                continue;
            };
            pages.push(PageText { number, text });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(ExtractedDocument {
            info: DocumentInfo {
                title: info_field(&document, b"Title"),
                author: info_field(&document, b"Author"),
                page_count: page_map.len() as u32,
            },
            pages,
        })
    }
}

/// Text operands of the page's content stream, one line per text operator.
fn raw_page_text(document: &Document, page_id: ObjectId) -> Option<String> {
    let bytes = document.get_page_content(page_id).ok()?;
    let content = Content::decode(&bytes).ok()?;

    let mut lines = Vec::new();
    for operation in &content.operations {
        match operation.operator.as_str() {
            "Tj" | "'" | "\"" => {
                let text = operation
                    .operands
                    .iter()
                    .filter_map(string_operand)
                    .collect::<String>();
                lines.push(text);
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operation.operands.first() {
                    lines.push(items.iter().filter_map(string_operand).collect());
                }
            }
            _ => {}
        }
    }

    let text = lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn string_operand(object: &Object) -> Option<String> {
    match object {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

fn info_field(document: &Document, key: &[u8]) -> Option<String> {
    let info = document.trailer.get(b"Info").ok()?;
    let dictionary = match info {
        Object::Reference(id) => document.get_object(*id).ok()?.as_dict().ok()?,
        Object::Dictionary(dictionary) => dictionary,
        _ => return None,
    };
    let value = match dictionary.get(key).ok()? {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        _ => return None,
    };
    let value = value.trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// PDF text strings are UTF-16BE with a BOM or single-byte otherwise.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&byte| byte as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Stream};
    use tempfile::tempdir;

    /// One-page document whose content stream carries `operations`.
    fn single_page(operations: Vec<Operation>) -> (Document, ObjectId) {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = document.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content { operations }.encode().unwrap();
        let content_id = document.add_object(Stream::new(dictionary! {}, content));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);
        (document, page_id)
    }

    #[test]
    fn raw_page_text_reads_text_operators() {
        let (document, page_id) = single_page(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("Metodologia aplicada")]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Resultados"),
                    120.into(),
                    Object::string_literal(" finais"),
                ])],
            ),
            Operation::new("ET", vec![]),
        ]);

        assert_eq!(
            raw_page_text(&document, page_id).as_deref(),
            Some("Metodologia aplicada\nResultados finais")
        );
    }

    #[test]
    fn raw_page_text_is_none_without_text_operators() {
        let (document, page_id) = single_page(vec![
            Operation::new("m", vec![0.into(), 0.into()]),
            Operation::new("l", vec![100.into(), 100.into()]),
            Operation::new("S", vec![]),
        ]);

        assert_eq!(raw_page_text(&document, page_id), None);
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let bytes = [0xFE, 0xFF, 0x00, b'M', 0x00, 0xE9, 0x00, b't'];
        assert_eq!(decode_pdf_string(&bytes), "Mét");
    }

    #[test]
    fn single_byte_strings_are_latin1() {
        assert_eq!(decode_pdf_string(b"Introdu\xe7\xe3o"), "Introdução");
    }

    #[test]
    fn unreadable_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = LopdfExtractor.extract(&path);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}
