//! Shared strings and font styles.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;

use crate::pipeline::mapping::FontStyle;

fn attribute(reader: &XmlReader<&[u8]>, e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(std::result::Result::ok)
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.decode_and_unescape_value(reader).ok())
        .map(|v| v.to_string())
}

// ──────────────────────────────────────────────
// Shared strings
// ──────────────────────────────────────────────

/// Text of every `<si>` entry; rich-text runs are concatenated, phonetic runs
/// (`<rPh>`) are ignored.
pub fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut reader = XmlReader::from_str(xml);

    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" if !in_phonetic => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Text(e)) if in_text => {
                if let (Some(text), Ok(chunk)) = (current.as_mut(), e.unescape()) {
                    text.push_str(&chunk);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    strings
}

// ──────────────────────────────────────────────
// Styles
// ──────────────────────────────────────────────

/// Fonts plus the `cellXfs` → font mapping from `styles.xml`.
#[derive(Debug, Clone, Default)]
pub struct StyleTable {
    fonts: Vec<FontStyle>,
    xf_fonts: Vec<usize>,
}

impl StyleTable {
    pub fn parse(xml: &str) -> Self {
        let mut table = StyleTable::default();
        let mut reader = XmlReader::from_str(xml);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut in_fonts = false;
        let mut in_cell_xfs = false;
        let mut font: Option<FontStyle> = None;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"fonts" => in_fonts = true,
                    b"cellXfs" => in_cell_xfs = true,
                    b"font" if in_fonts => font = Some(FontStyle::default()),
                    b"xf" if in_cell_xfs => table.xf_fonts.push(xf_font(&reader, &e)),
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"font" if in_fonts => table.fonts.push(FontStyle::default()),
                    b"b" => {
                        if let Some(font) = font.as_mut() {
                            font.bold = attribute(&reader, &e, b"val")
                                .map_or(true, |v| v != "0" && v != "false");
                        }
                    }
                    b"color" => {
                        if let Some(font) = font.as_mut() {
                            font.color = attribute(&reader, &e, b"rgb");
                        }
                    }
                    b"xf" if in_cell_xfs => table.xf_fonts.push(xf_font(&reader, &e)),
                    _ => {}
                },
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"fonts" => in_fonts = false,
                    b"cellXfs" => in_cell_xfs = false,
                    b"font" => table.fonts.extend(font.take()),
                    _ => {}
                },
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
            buf.clear();
        }
        table
    }

    /// Font for a cell's `s` (cellXfs index); default font when unknown.
    pub fn font_for(&self, style_index: usize) -> FontStyle {
        self.xf_fonts
            .get(style_index)
            .and_then(|font_id| self.fonts.get(*font_id))
            .cloned()
            .unwrap_or_default()
    }
}

fn xf_font(reader: &XmlReader<&[u8]>, e: &BytesStart<'_>) -> usize {
    attribute(reader, e, b"fontId")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
