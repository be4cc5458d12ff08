#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docgen_server::convert::{ConversionError, PdfConverter};
use docgen_server::fetch::{FetchError, FetchedTemplate, TemplateLocator, TemplateSource};
use docgen_server::generate::DocumentService;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const S_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

pub fn zip_package(parts: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in parts {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn read_part(package: &[u8], name: &str) -> String {
    let mut archive = ZipArchive::new(Cursor::new(package)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    content
}

pub fn part_names(package: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(package)).unwrap();
    archive.file_names().map(str::to_owned).collect()
}

/// Body XML wrapped into a minimal `word/document.xml`.
pub fn document_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{W_NS}"><w:body>{body}</w:body></w:document>"#
    )
}

/// One paragraph per entry, each with a single run.
pub fn paragraphs(texts: &[&str]) -> String {
    texts
        .iter()
        .map(|text| format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>"))
        .collect()
}

pub fn docx(body: &str) -> Vec<u8> {
    docx_with_parts(body, &[])
}

pub fn docx_with_parts(body: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let document = document_xml(body);
    let mut parts = vec![
        (
            "[Content_Types].xml",
            r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#,
        ),
        ("word/document.xml", document.as_str()),
    ];
    parts.extend_from_slice(extra);
    zip_package(&parts)
}

/// Text of every `<w:t>` in the main document part, concatenated.
pub fn docx_text(package: &[u8]) -> String {
    let xml = read_part(package, "word/document.xml");
    let mut text = String::new();
    let mut rest = xml.as_str();
    while let Some(open) = rest.find("<w:t") {
        let after = &rest[open..];
        let Some(gt) = after.find('>') else { break };
        if after[..gt].ends_with('/') || !(after[4..].starts_with('>') || after[4..].starts_with(' ')) {
            rest = &after[gt + 1..];
            continue;
        }
        let body = &after[gt + 1..];
        let close = body.find("</w:t>").unwrap_or(body.len());
        text.push_str(&body[..close]);
        rest = &body[close..];
    }
    text
}

/// Minimal workbook. `sheets` holds the sheet data XML of each worksheet.
pub fn xlsx(shared_strings: &[&str], sheets: &[&str], active_tab: usize) -> Vec<u8> {
    let sheet_entries: String = (1..=sheets.len())
        .map(|i| format!(r#"<sheet name="Sheet{i}" sheetId="{i}" r:id="rId{i}"/>"#))
        .collect();
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="{S_NS}" xmlns:r="{R_NS}"><bookViews><workbookView activeTab="{active_tab}"/></bookViews><sheets>{sheet_entries}</sheets></workbook>"#
    );
    let relationships: String = (1..=sheets.len())
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{i}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{i}.xml"/>"#
            )
        })
        .collect();
    let rels = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{relationships}</Relationships>"#
    );
    let items: String = shared_strings
        .iter()
        .map(|text| format!("<si><t>{text}</t></si>"))
        .collect();
    let shared = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><sst xmlns="{S_NS}" count="{n}" uniqueCount="{n}">{items}</sst>"#,
        n = shared_strings.len()
    );
    let sheet_xml: Vec<(String, String)> = sheets
        .iter()
        .enumerate()
        .map(|(i, data)| {
            (
                format!("xl/worksheets/sheet{}.xml", i + 1),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="{S_NS}"><sheetData>{data}</sheetData></worksheet>"#
                ),
            )
        })
        .collect();

    let mut parts: Vec<(&str, &str)> = vec![
        ("xl/workbook.xml", workbook.as_str()),
        ("xl/_rels/workbook.xml.rels", rels.as_str()),
        ("xl/sharedStrings.xml", shared.as_str()),
    ];
    for (name, xml) in &sheet_xml {
        parts.push((name.as_str(), xml.as_str()));
    }
    zip_package(&parts)
}

/// Texts of the `<t>` elements in an inline-string cell, keyed by cell reference.
pub fn inline_cells(sheet_xml: &str) -> HashMap<String, String> {
    let mut cells = HashMap::new();
    let mut rest = sheet_xml;
    while let Some(open) = rest.find("<c r=\"") {
        let after = &rest[open + 6..];
        let reference = &after[..after.find('"').unwrap()];
        let cell_end = after.find("</c>").unwrap_or(after.len());
        let cell = &after[..cell_end];
        if cell.contains("t=\"inlineStr\"") {
            if let Some(t_open) = cell.find("<t") {
                let body = &cell[t_open..];
                let start = body.find('>').unwrap() + 1;
                let end = body.find("</t>").unwrap();
                cells.insert(reference.to_string(), body[start..end].to_string());
            }
        }
        rest = &after[cell_end..];
    }
    cells
}

/// Template source that serves fixed bytes under a fixed file name.
pub struct StaticSource {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub requests: AtomicUsize,
}

impl StaticSource {
    pub fn new(filename: &str, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            bytes,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TemplateSource for StaticSource {
    async fn fetch_template(&self, locator: &TemplateLocator) -> Result<FetchedTemplate, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match locator {
            TemplateLocator::LocalFile(name) if name == "missing.docx" => {
                Err(FetchError::NotFound(name.clone()))
            }
            _ => Ok(FetchedTemplate::new(self.bytes.clone(), self.filename.clone())),
        }
    }
}

/// Converter that wraps the input in a fake PDF header, or fails when asked to.
pub struct FakeConverter {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeConverter {
    pub fn working() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PdfConverter for FakeConverter {
    async fn convert_to_pdf(&self, document: Vec<u8>, _extension: &str) -> Result<Vec<u8>, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ConversionError::Exit {
                code: 77,
                stderr: "conversion refused".to_string(),
            });
        }
        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.extend_from_slice(&document[..document.len().min(4)]);
        Ok(pdf)
    }
}

pub fn service(source: Arc<StaticSource>, converter: Arc<FakeConverter>) -> DocumentService {
    DocumentService::new(source, converter)
}
