//! DOCX rendering.
//!
//! Word parts are Jinja templates once the XML noise Word inserts into tag markers has
//! been removed. Rendering happens in three passes over each part:
//!
//! 1. [`join_split_tags`] re-joins `{{ }}`, `{% %}` and `{# #}` markers that Word split
//!    across runs, dropping the XML between the delimiters.
//! 2. [`hoist_structural_tags`] replaces the paragraph, table row, table cell or run
//!    around a `{%p %}`, `{%tr %}`, `{%tc %}` or `{%r %}` tag with a plain `{% %}` tag.
//! 3. The result is evaluated by `minijinja` against the normalized context.

use std::collections::HashMap;
use std::fmt::Write as _;

use minijinja::value::ValueKind;
use minijinja::{Environment, Error, ErrorKind, Output, State, Value};

use super::context::NormalizedContext;
use super::{dates, package, scope, RenderError};

const MAIN_PART: &str = "word/document.xml";

/// Structural tag prefix and the element it replaces.
const STRUCTURAL_TAGS: [(&str, &str); 4] = [("tr", "w:tr"), ("tc", "w:tc"), ("p", "w:p"), ("r", "w:r")];

const LINE_BREAK: &str = r#"</w:t><w:br/><w:t xml:space="preserve">"#;

/// Renders a DOCX template with the given context.
pub fn render_docx(template: &[u8], context: &NormalizedContext) -> Result<Vec<u8>, RenderError> {
    let mut archive = package::open(template)?;
    let parts: Vec<String> = package::part_names(&archive)
        .into_iter()
        .filter(|name| is_template_part(name))
        .collect();

    if !parts.iter().any(|name| name == MAIN_PART) {
        return Err(RenderError::invalid(format!("{MAIN_PART} is missing")));
    }

    let env = template_environment();
    let scope = scope::template_scope(context);
    let mut rendered = HashMap::with_capacity(parts.len());

    for name in parts {
        let Some(xml) = package::read_part(&mut archive, &name)? else {
            continue;
        };
        log::debug!("[render_docx] rendering part {name}");
        let source = prepare_part(&xml)?;
        let output = env
            .render_str(&source, scope.clone())
            .map_err(|e| RenderError::invalid(format!("{name}: {}", describe(&e))))?;
        rendered.insert(name, output);
    }

    package::write_with_replacements(&mut archive, &rendered)
}

fn is_template_part(name: &str) -> bool {
    let Some(file) = name.strip_prefix("word/") else {
        return false;
    };
    if file.contains('/') || !file.ends_with(".xml") {
        return false;
    }
    file == "document.xml"
        || file == "footnotes.xml"
        || file == "endnotes.xml"
        || file.starts_with("header")
        || file.starts_with("footer")
}

fn template_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_formatter(xml_formatter);
    env.add_filter("format_date", format_date_filter);
    env
}

/// Turns a Word XML part into template source.
pub(crate) fn prepare_part(xml: &str) -> Result<String, RenderError> {
    let joined = join_split_tags(xml);
    let hoisted = hoist_structural_tags(joined)?;
    Ok(hoisted.replace("<w:t>", r#"<w:t xml:space="preserve">"#))
}

enum Piece<'a> {
    Char(char),
    Markup(&'a str),
}

fn split_pieces(xml: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(open) = rest.find('<') {
        pieces.extend(rest[..open].chars().map(Piece::Char));
        let close = rest[open..].find('>').map_or(rest.len(), |i| open + i + 1);
        pieces.push(Piece::Markup(&rest[open..close]));
        rest = &rest[close..];
    }
    pieces.extend(rest.chars().map(Piece::Char));
    pieces
}

fn next_char(pieces: &[Piece<'_>], from: usize) -> Option<(usize, char)> {
    pieces[from.min(pieces.len())..]
        .iter()
        .enumerate()
        .find_map(|(offset, piece)| match piece {
            Piece::Char(c) => Some((from + offset, *c)),
            Piece::Markup(_) => None,
        })
}

/// Re-joins template tags that Word split across runs.
pub(crate) fn join_split_tags(xml: &str) -> String {
    let pieces = split_pieces(xml);
    let mut out = String::with_capacity(xml.len());
    let mut i = 0;

    while i < pieces.len() {
        match pieces[i] {
            Piece::Markup(markup) => {
                out.push_str(markup);
                i += 1;
            }
            Piece::Char('{') => match next_char(&pieces, i + 1) {
                Some((opener_at, opener @ ('{' | '%' | '#'))) => {
                    let closer = if opener == '{' { '}' } else { opener };
                    match read_tag_body(&pieces, opener_at + 1, closer) {
                        Some((body, resume)) => {
                            out.push('{');
                            out.push(opener);
                            out.push_str(&clean_expression(&body));
                            out.push(closer);
                            out.push('}');
                            i = resume;
                        }
                        None => {
                            out.push('{');
                            i += 1;
                        }
                    }
                }
                _ => {
                    out.push('{');
                    i += 1;
                }
            },
            Piece::Char(c) => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Collects tag text up to `closer` + `}`, returning it and the index after the tag.
fn read_tag_body(pieces: &[Piece<'_>], from: usize, closer: char) -> Option<(String, usize)> {
    let mut body = String::new();
    let mut cursor = from;
    while let Some((at, c)) = next_char(pieces, cursor) {
        if c == closer {
            if let Some((end, '}')) = next_char(pieces, at + 1) {
                return Some((body, end + 1));
            }
        }
        body.push(c);
        cursor = at + 1;
    }
    None
}

/// Undoes XML escaping and Word's typographic quotes inside a tag.
fn clean_expression(body: &str) -> String {
    let cleaned = body
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"");
    index_segments(&cleaned)
}

/// Rewrites numeric attribute segments (`a.b.0`) as subscripts (`a.b[0]`).
///
/// String literals and number literals such as `1.5` are left alone.
pub(crate) fn index_segments(expression: &str) -> String {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = String::with_capacity(expression.len());
    let mut quote: Option<char> = None;
    let mut in_ident = false;
    let mut after_operand = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        if c == '.' && after_operand {
            let digits_end = chars[i + 1..]
                .iter()
                .position(|d| !d.is_ascii_digit())
                .map_or(chars.len(), |offset| i + 1 + offset);
            let terminated = chars
                .get(digits_end)
                .map_or(true, |next| !(next.is_alphanumeric() || *next == '_'));
            if digits_end > i + 1 && terminated {
                out.push('[');
                out.extend(&chars[i + 1..digits_end]);
                out.push(']');
                in_ident = false;
                i = digits_end;
                continue;
            }
        }

        if c == '"' || c == '\'' {
            quote = Some(c);
            in_ident = false;
            after_operand = false;
        } else {
            in_ident = if in_ident {
                c.is_alphanumeric() || c == '_'
            } else {
                c.is_alphabetic() || c == '_'
            };
            after_operand = in_ident || c == ']' || c == ')';
        }
        out.push(c);
        i += 1;
    }

    out
}

/// Replaces the element enclosing each structural tag with a plain statement tag.
pub(crate) fn hoist_structural_tags(mut xml: String) -> Result<String, RenderError> {
    for (prefix, element) in STRUCTURAL_TAGS {
        let opener = format!("{{%{prefix} ");
        let closing_tag = format!("</{element}>");

        while let Some(start) = xml.find(&opener) {
            let tag_end = xml[start..]
                .find("%}")
                .map(|i| start + i + 2)
                .ok_or_else(|| RenderError::invalid(format!("unterminated {{%{prefix} tag")))?;
            let statement = xml[start + opener.len()..tag_end - 2].trim().to_string();

            let element_start = find_element_start(&xml[..start], element).ok_or_else(|| {
                RenderError::invalid(format!("{{%{prefix} {statement} %}} is not inside <{element}>"))
            })?;
            let element_end = xml[tag_end..]
                .find(&closing_tag)
                .map(|i| tag_end + i + closing_tag.len())
                .ok_or_else(|| {
                    RenderError::invalid(format!("{{%{prefix} {statement} %}} has no closing </{element}>"))
                })?;

            xml.replace_range(element_start..element_end, &format!("{{% {statement} %}}"));
        }
    }
    Ok(xml)
}

/// Finds the last opening `<element>` or `<element ...>` in `haystack`.
fn find_element_start(haystack: &str, element: &str) -> Option<usize> {
    let needle = format!("<{element}");
    let mut end = haystack.len();
    while let Some(pos) = haystack[..end].rfind(&needle) {
        let rest = &haystack[pos + needle.len()..];
        let is_open_tag = rest.starts_with('>')
            || (rest.starts_with(' ') && !rest[..rest.find('>').unwrap_or(rest.len())].ends_with('/'));
        if is_open_tag {
            return Some(pos);
        }
        end = pos;
    }
    None
}

/// Writes values XML-escaped; newlines become Word line breaks.
fn xml_formatter(out: &mut Output<'_>, _state: &State<'_, '_>, value: &Value) -> Result<(), Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(());
    }
    let text = value.to_string();
    let text = if value.is_safe() { text } else { escape_run_text(&text) };
    out.write_str(&text)
        .map_err(|_| Error::new(ErrorKind::WriteFailure, "failed to write rendered value"))
}

fn escape_run_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\n' => escaped.push_str(LINE_BREAK),
            '\r' => {}
            other => escaped.push(other),
        }
    }
    escaped
}

/// `{{ value|format_date }}`: same parsing rules as automatic date fields.
fn format_date_filter(value: Value) -> Value {
    let formatted = match value.as_str() {
        Some(text) => dates::format_date_text(text),
        None if value.kind() == ValueKind::Number => {
            f64::try_from(value.clone()).ok().and_then(dates::format_epoch)
        }
        None => None,
    };
    formatted.map(Value::from).unwrap_or(value)
}

fn describe(error: &Error) -> String {
    match error.line() {
        Some(line) => format!("{} (line {line})", error),
        None => error.to_string(),
    }
}
