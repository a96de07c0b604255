//! Worksheet cell parsing and in-place value rewriting.

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};

use super::WorkbookError;
use crate::pipeline::mapping::{CellRef, CellValue};

/// Parse an A1 reference (`B12`, `$B$12`) into 1-based coordinates.
pub fn parse_a1(reference: &str) -> Option<CellRef> {
    let reference = reference.replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .bytes()
        .try_fold(0u32, |acc, b| {
            acc.checked_mul(26)?
                .checked_add(u32::from(b.to_ascii_uppercase() - b'A' + 1))
        })?;
    let row: u32 = digits.parse().ok()?;
    (row > 0).then_some(CellRef::new(row, col))
}

/// Cell as stored: resolved text and its `cellXfs` index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCell {
    pub text: String,
    pub style: usize,
    /// Shared or inline string. Numbers, booleans and formula results are not.
    pub is_text: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Boolean,
    Other,
}

fn cell_kind(t: Option<&str>) -> CellKind {
    match t {
        Some("s") => CellKind::Shared,
        Some("inlineStr") => CellKind::Inline,
        Some("b") => CellKind::Boolean,
        _ => CellKind::Other,
    }
}

fn attribute(reader: &XmlReader<&[u8]>, e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(std::result::Result::ok)
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.decode_and_unescape_value(reader).ok())
        .map(|v| v.to_string())
}

/// Every cell with a reference in `<sheetData>`, text resolved.
pub fn parse_cells(xml: &str, shared: &[String]) -> BTreeMap<CellRef, RawCell> {
    let mut cells = BTreeMap::new();
    let mut reader = XmlReader::from_str(xml);

    let mut buf = Vec::new();
    let mut current: Option<(CellRef, usize, CellKind)> = None;
    let mut text = String::new();
    let mut in_value = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    current = start_cell(&reader, &e);
                    text.clear();
                }
                b"v" | b"t" if current.is_some() => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                if let Some((cell, style, _)) = start_cell(&reader, &e) {
                    cells.insert(
                        cell,
                        RawCell {
                            text: String::new(),
                            style,
                            is_text: false,
                        },
                    );
                }
            }
            Ok(Event::Text(e)) if in_value => {
                if let Ok(chunk) = e.unescape() {
                    text.push_str(&chunk);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some((cell, style, kind)) = current.take() {
                        let resolved = match kind {
                            CellKind::Shared => text
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared.get(i).cloned())
                                .unwrap_or_default(),
                            CellKind::Boolean => {
                                if text.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()
                            }
                            CellKind::Inline | CellKind::Other => std::mem::take(&mut text),
                        };
                        cells.insert(
                            cell,
                            RawCell {
                                text: resolved,
                                style,
                                is_text: matches!(kind, CellKind::Shared | CellKind::Inline),
                            },
                        );
                    }
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    cells
}

fn start_cell(reader: &XmlReader<&[u8]>, e: &BytesStart<'_>) -> Option<(CellRef, usize, CellKind)> {
    let cell = parse_a1(&attribute(reader, e, b"r")?)?;
    let style = attribute(reader, e, b"s")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let kind = cell_kind(attribute(reader, e, b"t").as_deref());
    Some((cell, style, kind))
}

// ──────────────────────────────────────────────
// Rewriting
// ──────────────────────────────────────────────

/// Stream the worksheet through, replacing the value of every cell in `writes`.
///
/// The replaced `<c>` keeps its `r` and `s` attributes; any formula, cached
/// value and type are dropped. Everything else is copied event for event.
/// Returns the new XML and the cells that were not found.
pub fn rewrite_cells(
    xml: &str,
    writes: &BTreeMap<CellRef, CellValue>,
    part: &str,
) -> Result<(Vec<u8>, Vec<CellRef>), WorkbookError> {
    let xml_error = |e: quick_xml::Error| WorkbookError::Xml {
        part: part.to_string(),
        detail: e.to_string(),
    };

    let mut reader = XmlReader::from_str(xml);
    let mut writer = XmlWriter::new(Cursor::new(Vec::with_capacity(xml.len())));
    let mut remaining: BTreeMap<CellRef, &CellValue> = writes.iter().map(|(k, v)| (*k, v)).collect();

    let mut skip_depth = 0usize;
    loop {
        let event = reader.read_event().map_err(xml_error)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                let target = attribute(&reader, e, b"r")
                    .and_then(|r| parse_a1(&r))
                    .and_then(|cell| remaining.remove(&cell).map(|value| (cell, value)));
                match target {
                    Some((_, value)) => {
                        let style = attribute(&reader, e, b"s");
                        let reference = attribute(&reader, e, b"r").unwrap_or_default();
                        write_cell(&mut writer, &reference, style.as_deref(), value)
                            .map_err(xml_error)?;
                        if matches!(event, Event::Start(_)) {
                            skip_depth = 1;
                        }
                    }
                    None => writer.write_event(event.clone()).map_err(xml_error)?,
                }
            }
            Event::Eof => break,
            other => writer.write_event(other).map_err(xml_error)?,
        }
    }

    let missing = remaining.into_keys().collect();
    Ok((writer.into_inner().into_inner(), missing))
}

fn write_cell<W: std::io::Write>(
    writer: &mut XmlWriter<W>,
    reference: &str,
    style: Option<&str>,
    value: &CellValue,
) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new("c");
    start.push_attribute(("r", reference));
    if let Some(style) = style {
        start.push_attribute(("s", style));
    }
    match value {
        CellValue::Text(text) => {
            start.push_attribute(("t", "inlineStr"));
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            let mut t = BytesStart::new("t");
            if text.trim() != text {
                t.push_attribute(("xml:space", "preserve"));
            }
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new("t")))?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
        }
        CellValue::Number(n) => {
            writer.write_event(Event::Start(start))?;
            write_value(writer, &n.to_string())?;
        }
        CellValue::Bool(b) => {
            start.push_attribute(("t", "b"));
            writer.write_event(Event::Start(start))?;
            write_value(writer, if *b { "1" } else { "0" })?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

fn write_value<W: std::io::Write>(writer: &mut XmlWriter<W>, text: &str) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new("v")))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new("v")))?;
    Ok(())
}
