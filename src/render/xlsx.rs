//! XLSX rendering by literal `{{ key }}` substitution in the active worksheet.
//!
//! Only the active sheet is processed; other sheets are copied verbatim. A shared-string
//! cell whose text changes is rewritten as an inline string, so the shared string table
//! (and every other sheet referencing it) stays untouched. Placeholders without a
//! matching key are left as they are.

use std::borrow::Cow;
use std::collections::HashMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;

use super::context::FlattenedContext;
use super::{package, RenderError};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

const PLACEHOLDER_OPEN: &str = "{{ ";
const PLACEHOLDER_CLOSE: &str = " }}";

/// Renders the active worksheet of an XLSX template.
pub fn render_xlsx(template: &[u8], context: &FlattenedContext) -> Result<Vec<u8>, RenderError> {
    let mut archive = package::open(template)?;

    let sheet_part = active_sheet_part(&mut archive)?;
    log::debug!("[render_xlsx] active worksheet: {sheet_part}");

    let sheet_xml = package::read_part(&mut archive, &sheet_part)?
        .ok_or_else(|| RenderError::invalid(format!("worksheet {sheet_part} is missing")))?;
    let shared_strings = match package::read_part(&mut archive, SHARED_STRINGS_PART)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let rendered = render_sheet(&sheet_xml, &shared_strings, context)?;

    let mut replacements = HashMap::new();
    replacements.insert(sheet_part, rendered);
    package::write_with_replacements(&mut archive, &replacements)
}

/// Replaces every `{{ key }}` whose key is present in `context`.
pub fn fill_placeholders<'a>(text: &'a str, context: &FlattenedContext) -> Cow<'a, str> {
    if !text.contains(PLACEHOLDER_OPEN) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut changed = false;

    while let Some(open) = rest.find(PLACEHOLDER_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + PLACEHOLDER_OPEN.len()..];

        let replacement = after_open.find(PLACEHOLDER_CLOSE).and_then(|close| {
            context
                .get(&after_open[..close])
                .map(|value| (cell_text(value), close + PLACEHOLDER_CLOSE.len()))
        });

        match replacement {
            Some((value, consumed)) => {
                out.push_str(&value);
                rest = &after_open[consumed..];
                changed = true;
            }
            None => {
                out.push_str(PLACEHOLDER_OPEN);
                rest = after_open;
            }
        }
    }
    out.push_str(rest);

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Cell text for a flattened value: strings as is, `null` as empty, the rest as JSON.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn invalid_xml(part: &str, error: impl std::fmt::Display) -> RenderError {
    RenderError::invalid(format!("malformed {part}: {error}"))
}

fn attribute(element: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, RenderError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| RenderError::invalid(format!("bad attribute: {e}")))?;
        if attr.key.local_name().as_ref() == local {
            let value = attr
                .unescape_value()
                .map_err(|e| RenderError::invalid(format!("bad attribute value: {e}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn active_sheet_part(archive: &mut package::Archive<'_>) -> Result<String, RenderError> {
    let workbook = package::read_part(archive, WORKBOOK_PART)?
        .ok_or_else(|| RenderError::invalid(format!("{WORKBOOK_PART} is missing")))?;
    let (active_tab, relationship_ids) = parse_workbook(&workbook)?;

    let relationship_id = relationship_ids
        .get(active_tab)
        .or_else(|| relationship_ids.first())
        .ok_or_else(|| RenderError::invalid("workbook has no worksheets"))?;

    let rels = package::read_part(archive, WORKBOOK_RELS_PART)?
        .ok_or_else(|| RenderError::invalid(format!("{WORKBOOK_RELS_PART} is missing")))?;
    let target = relationship_target(&rels, relationship_id)?.ok_or_else(|| {
        RenderError::invalid(format!("worksheet relationship {relationship_id} is missing"))
    })?;

    Ok(resolve_target(&target))
}

/// Active tab index and the relationship id of every sheet, in workbook order.
pub(crate) fn parse_workbook(xml: &str) -> Result<(usize, Vec<String>), RenderError> {
    let mut reader = Reader::from_str(xml);
    let mut active_tab = None;
    let mut relationship_ids = Vec::new();

    loop {
        match reader.read_event().map_err(|e| invalid_xml(WORKBOOK_PART, e))? {
            Event::Start(element) | Event::Empty(element) => match element.local_name().as_ref() {
                b"workbookView" if active_tab.is_none() => {
                    active_tab = Some(
                        attribute(&element, b"activeTab")?
                            .and_then(|tab| tab.parse().ok())
                            .unwrap_or(0),
                    );
                }
                b"sheet" => {
                    if let Some(id) = attribute(&element, b"id")? {
                        relationship_ids.push(id);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((active_tab.unwrap_or(0), relationship_ids))
}

fn relationship_target(xml: &str, id: &str) -> Result<Option<String>, RenderError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().map_err(|e| invalid_xml(WORKBOOK_RELS_PART, e))? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"Relationship" =>
            {
                if attribute(&element, b"Id")?.as_deref() == Some(id) {
                    return attribute(&element, b"Target");
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// Plain text of every `<si>` entry; phonetic runs are skipped.
pub(crate) fn parse_shared_strings(xml: &str) -> Result<Vec<String>, RenderError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event().map_err(|e| invalid_xml(SHARED_STRINGS_PART, e))? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                b"rPh" => phonetic_depth += 1,
                _ => {}
            },
            Event::Empty(element) if element.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_text = false,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                _ => {}
            },
            Event::Text(text) if in_text && phonetic_depth == 0 => {
                let text = text.unescape().map_err(|e| invalid_xml(SHARED_STRINGS_PART, e))?;
                if let Some(current) = current.as_mut() {
                    current.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
}

/// A text cell buffered between `<c>` and `</c>`.
struct PendingCell<'a> {
    start: BytesStart<'a>,
    kind: CellKind,
    events: Vec<Event<'a>>,
    raw: String,
    in_value: bool,
    in_text: bool,
    phonetic_depth: usize,
}

impl<'a> PendingCell<'a> {
    fn new(start: BytesStart<'a>, kind: CellKind) -> Self {
        Self {
            events: vec![Event::Start(start.clone())],
            start,
            kind,
            raw: String::new(),
            in_value: false,
            in_text: false,
            phonetic_depth: 0,
        }
    }

    fn observe(&mut self, event: &Event<'a>, part: &str) -> Result<(), RenderError> {
        match event {
            Event::Start(element) => match element.local_name().as_ref() {
                b"v" => self.in_value = true,
                b"t" => self.in_text = true,
                b"rPh" => self.phonetic_depth += 1,
                _ => {}
            },
            Event::End(element) => match element.local_name().as_ref() {
                b"v" => self.in_value = false,
                b"t" => self.in_text = false,
                b"rPh" => self.phonetic_depth = self.phonetic_depth.saturating_sub(1),
                _ => {}
            },
            Event::Text(text) => {
                let wanted = match self.kind {
                    CellKind::Shared => self.in_value,
                    CellKind::Inline => self.in_text && self.phonetic_depth == 0,
                };
                if wanted {
                    let text = text.unescape().map_err(|e| invalid_xml(part, e))?;
                    self.raw.push_str(&text);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text<'s>(&'s self, shared_strings: &'s [String]) -> Option<&'s str> {
        match self.kind {
            CellKind::Shared => self
                .raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|index| shared_strings.get(index))
                .map(String::as_str),
            CellKind::Inline => Some(self.raw.as_str()),
        }
    }
}

fn text_cell_kind(element: &BytesStart<'_>) -> Result<Option<CellKind>, RenderError> {
    Ok(match attribute(element, b"t")?.as_deref() {
        Some("s") => Some(CellKind::Shared),
        Some("inlineStr") => Some(CellKind::Inline),
        _ => None,
    })
}

fn render_sheet(
    xml: &str,
    shared_strings: &[String],
    context: &FlattenedContext,
) -> Result<String, RenderError> {
    const PART: &str = "worksheet";

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut pending: Option<PendingCell<'_>> = None;
    let mut replaced = 0usize;

    loop {
        let event = reader.read_event().map_err(|e| invalid_xml(PART, e))?;

        if let Some(cell) = pending.as_mut() {
            let closes_cell = matches!(&event, Event::End(end) if end.local_name().as_ref() == b"c");
            cell.observe(&event, PART)?;
            cell.events.push(event);
            if closes_cell {
                if let Some(cell) = pending.take() {
                    replaced += usize::from(flush_cell(&mut writer, cell, shared_strings, context)?);
                }
            }
            continue;
        }

        match event {
            Event::Start(element) if element.local_name().as_ref() == b"c" => {
                match text_cell_kind(&element)? {
                    Some(kind) => pending = Some(PendingCell::new(element, kind)),
                    None => write(&mut writer, Event::Start(element))?,
                }
            }
            Event::Eof => break,
            other => write(&mut writer, other)?,
        }
    }

    log::debug!("[render_xlsx] substituted placeholders in {replaced} cells");
    String::from_utf8(writer.into_inner())
        .map_err(|e| RenderError::invalid(format!("rendered worksheet is not UTF-8: {e}")))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), RenderError> {
    writer
        .write_event(event)
        .map_err(|e| RenderError::invalid(format!("cannot write worksheet: {e}")))
}

/// Writes a buffered cell, rewritten as an inline string when its text changed.
fn flush_cell(
    writer: &mut Writer<Vec<u8>>,
    cell: PendingCell<'_>,
    shared_strings: &[String],
    context: &FlattenedContext,
) -> Result<bool, RenderError> {
    let filled = cell
        .text(shared_strings)
        .and_then(|text| match fill_placeholders(text, context) {
            Cow::Owned(filled) => Some(filled),
            Cow::Borrowed(_) => None,
        });

    let Some(filled) = filled else {
        for event in cell.events {
            write(writer, event)?;
        }
        return Ok(false);
    };

    let qualified = |local: &str| match cell.start.name().prefix() {
        Some(prefix) => format!("{}:{local}", String::from_utf8_lossy(prefix.as_ref())),
        None => local.to_string(),
    };

    let cell_name = String::from_utf8_lossy(cell.start.name().as_ref()).into_owned();
    let mut start = BytesStart::new(cell_name.clone());
    for attr in cell.start.attributes() {
        let attr = attr.map_err(|e| RenderError::invalid(format!("bad cell attribute: {e}")))?;
        if attr.key.local_name().as_ref() != b"t" {
            start.push_attribute(attr);
        }
    }
    start.push_attribute(("t", "inlineStr"));

    let inline_name = qualified("is");
    let text_name = qualified("t");
    let mut text_start = BytesStart::new(text_name.clone());
    text_start.push_attribute(("xml:space", "preserve"));

    write(writer, Event::Start(start))?;
    write(writer, Event::Start(BytesStart::new(inline_name.clone())))?;
    write(writer, Event::Start(text_start))?;
    write(writer, Event::Text(BytesText::new(&filled)))?;
    write(writer, Event::End(BytesEnd::new(text_name)))?;
    write(writer, Event::End(BytesEnd::new(inline_name)))?;
    write(writer, Event::End(BytesEnd::new(cell_name)))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> FlattenedContext {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_fill_placeholders() {
        let ctx = context(&[("name", json!("Alice")), ("act.details.0.qty", json!(3))]);
        assert_eq!(fill_placeholders("Hello {{ name }}", &ctx), "Hello Alice");
        assert_eq!(
            fill_placeholders("{{ name }}: {{ act.details.0.qty }} pcs", &ctx),
            "Alice: 3 pcs"
        );
    }

    #[test]
    fn test_unmatched_placeholders_stay_verbatim() {
        let ctx = context(&[("name", json!("Alice"))]);
        let text = "{{ missing }} and {{name}}";
        assert!(matches!(fill_placeholders(text, &ctx), Cow::Borrowed(_)));
        assert_eq!(
            fill_placeholders("{{ missing {{ name }}", &ctx),
            "{{ missing Alice"
        );
    }

    #[test]
    fn test_replacement_values_are_not_rescanned() {
        let ctx = context(&[("a", json!("{{ b }}")), ("b", json!("x"))]);
        assert_eq!(fill_placeholders("{{ a }}", &ctx), "{{ b }}");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!("text")), "text");
        assert_eq!(cell_text(&json!(2.5)), "2.5");
        assert_eq!(cell_text(&json!(true)), "true");
        assert_eq!(cell_text(&Value::Null), "");
    }

    #[test]
    fn test_parse_workbook_active_tab() {
        let xml = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
            <bookViews><workbookView activeTab="1"/></bookViews>
            <sheets><sheet name="A" sheetId="1" r:id="rId1"/><sheet name="B" sheetId="2" r:id="rId2"/></sheets>
        </workbook>"#;
        let (active, ids) = parse_workbook(xml).unwrap();
        assert_eq!(active, 1);
        assert_eq!(ids, vec!["rId1".to_string(), "rId2".to_string()]);
    }

    #[test]
    fn test_parse_shared_strings_rich_text() {
        let xml = r#"<sst><si><t>plain</t></si><si><r><t>Hello </t></r><r><t>{{ name }}</t></r><rPh><t>x</t></rPh></si><si/></sst>"#;
        let strings = parse_shared_strings(xml).unwrap();
        assert_eq!(strings, vec!["plain", "Hello {{ name }}", ""]);
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }
}
