mod common;

use common::{inline_cells, read_part, xlsx};
use docgen_server::render::{flatten, normalize, render, render_xlsx, RenderError};
use serde_json::json;

const ROW: &str = concat!(
    r#"<row r="1">"#,
    r#"<c r="A1" t="s"><v>0</v></c>"#,
    r#"<c r="B1" t="s"><v>1</v></c>"#,
    r#"<c r="C1" s="3" t="s"><v>2</v></c>"#,
    r#"<c r="D1"><v>42</v></c>"#,
    r#"<c r="E1" t="inlineStr"><is><t>Inline {{ name }}</t></is></c>"#,
    r#"<c r="F1" t="s"><v>3</v></c>"#,
    r#"</row>"#
);

const STRINGS: [&str; 4] = [
    "Hello {{ name }}",
    "{{ missing }}",
    "Total: {{ act.items.0.qty }} pcs, paid {{ act.paid }}",
    "plain",
];

#[test]
fn test_placeholders_are_substituted() {
    let template = xlsx(&STRINGS, &[ROW], 0);
    let data = json!({"name": "Alice", "act": {"items": [{"qty": 3}], "paid": true}});

    let output = render("xlsx", &template, &data).unwrap();
    let sheet = read_part(&output, "xl/worksheets/sheet1.xml");
    let cells = inline_cells(&sheet);

    assert_eq!(cells.get("A1").map(String::as_str), Some("Hello Alice"));
    assert_eq!(cells.get("C1").map(String::as_str), Some("Total: 3 pcs, paid true"));
    assert_eq!(cells.get("E1").map(String::as_str), Some("Inline Alice"));
    assert!(sheet.contains(r#"<c r="C1" s="3" t="inlineStr">"#));
}

#[test]
fn test_unmatched_placeholders_are_left_verbatim() {
    let template = xlsx(&STRINGS, &[ROW], 0);
    let output = render("xlsx", &template, &json!({"name": "Alice"})).unwrap();
    let sheet = read_part(&output, "xl/worksheets/sheet1.xml");
    let cells = inline_cells(&sheet);

    assert!(sheet.contains(r#"<c r="B1" t="s"><v>1</v></c>"#));
    assert_eq!(
        cells.get("C1").map(String::as_str),
        None,
        "C1 has no resolvable placeholder and keeps its shared string"
    );
    assert!(sheet.contains(r#"<c r="F1" t="s"><v>3</v></c>"#));
    assert!(sheet.contains(r#"<c r="D1"><v>42</v></c>"#));
}

#[test]
fn test_shared_strings_are_not_modified() {
    let template = xlsx(&STRINGS, &[ROW], 0);
    let output = render("xlsx", &template, &json!({"name": "Alice"})).unwrap();
    assert_eq!(
        read_part(&output, "xl/sharedStrings.xml"),
        read_part(&template, "xl/sharedStrings.xml")
    );
}

#[test]
fn test_only_active_sheet_is_rendered() {
    let first = r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#;
    let second = r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#;
    let template = xlsx(&STRINGS, &[first, second], 1);

    let output = render("xlsx", &template, &json!({"name": "Alice"})).unwrap();
    assert_eq!(
        read_part(&output, "xl/worksheets/sheet1.xml"),
        read_part(&template, "xl/worksheets/sheet1.xml")
    );
    let cells = inline_cells(&read_part(&output, "xl/worksheets/sheet2.xml"));
    assert_eq!(cells.get("A1").map(String::as_str), Some("Hello Alice"));
}

#[test]
fn test_values_are_stringified_and_escaped() {
    let row = r#"<row r="1"><c r="A1" t="inlineStr"><is><t>{{ n }}|{{ x }}|{{ none }}|{{ who }}</t></is></c></row>"#;
    let template = xlsx(&[], &[row], 0);
    let data = json!({"n": 2.5, "x": -7, "none": null, "who": "R&D <team>"});

    let output = render("xlsx", &template, &data).unwrap();
    let sheet = read_part(&output, "xl/worksheets/sheet1.xml");
    assert!(sheet.contains("2.5|-7||R&amp;D &lt;team&gt;"));
}

#[test]
fn test_date_fields_are_formatted_before_substitution() {
    let row = r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Due {{ invoice.due_date }}</t></is></c></row>"#;
    let template = xlsx(&[], &[row], 0);
    let context = flatten(&normalize(&json!({"invoice": {"due_date": "15/03/2024"}})));

    let output = render_xlsx(&template, &context).unwrap();
    let cells = inline_cells(&read_part(&output, "xl/worksheets/sheet1.xml"));
    assert_eq!(cells.get("A1").map(String::as_str), Some("Due 15.03.2024"));
}

#[test]
fn test_non_zip_bytes_are_invalid_template() {
    let result = render("xlsx", b"definitely not a workbook", &json!({"name": "Alice"}));
    assert!(matches!(result, Err(RenderError::InvalidTemplateOrData(_))));
}

#[test]
fn test_workbook_without_sheets_is_invalid_template() {
    let package = common::zip_package(&[("xl/workbook.xml", "<workbook><sheets/></workbook>")]);
    let result = render("xlsx", &package, &json!({}));
    assert!(matches!(result, Err(RenderError::InvalidTemplateOrData(_))));
}
