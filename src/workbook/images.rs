//! Embedded picture extraction.
//!
//! Pictures of the active sheet are ordered top-left to bottom-right by their
//! anchor cell, assigned an origin from the anchor column, numbered per origin
//! from 1, normalized to PNG and written as `{origin}_image_{n}.png`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;

use super::package::{parse_relationships, rels_path_for, resolve_target};
use super::{Workbook, WorkbookError};
use crate::pipeline::context::RunLog;
use crate::pipeline::routing::{ImageOrigin, IMAGE_DELIMITER};
use crate::pipeline::sector::Sector;

/// A picture anchored in the drawing part (0-based cell coordinates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureAnchor {
    pub col: u32,
    pub row: u32,
    pub rel_id: String,
}

/// Origin for a picture anchored at a 0-based column.
pub fn origin_for_column(col: u32) -> ImageOrigin {
    match col {
        0..=3 => ImageOrigin::Sector(Sector::Alpha),
        4..=7 => ImageOrigin::Sector(Sector::Beta),
        8..=11 => ImageOrigin::Sector(Sector::Gamma),
        12..=17 => ImageOrigin::VoiceTest,
        _ => ImageOrigin::Unknown,
    }
}

/// `<xdr:pic>` elements with their `from` anchor and blip relationship id.
pub fn parse_drawing(xml: &str) -> Vec<PictureAnchor> {
    let mut pictures = Vec::new();
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);

    #[derive(PartialEq)]
    enum Field {
        None,
        Col,
        Row,
    }

    let mut buf = Vec::new();
    let mut in_from = false;
    let mut field = Field::None;
    let mut col = 0u32;
    let mut row = 0u32;
    let mut rel_id: Option<String> = None;
    let mut in_pic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => match e.local_name().as_ref() {
                b"twoCellAnchor" | b"oneCellAnchor" | b"absoluteAnchor" => {
                    col = 0;
                    row = 0;
                    rel_id = None;
                }
                b"from" => in_from = true,
                b"col" if in_from => field = Field::Col,
                b"row" if in_from => field = Field::Row,
                b"pic" => in_pic = true,
                b"blip" if in_pic => {
                    for attr in e.attributes().filter_map(std::result::Result::ok) {
                        if attr.key.local_name().as_ref() == b"embed" {
                            rel_id = attr
                                .decode_and_unescape_value(&reader)
                                .ok()
                                .map(|v| v.to_string());
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if field != Field::None => {
                let value = e
                    .unescape()
                    .ok()
                    .and_then(|t| t.trim().parse().ok())
                    .unwrap_or(0);
                match field {
                    Field::Col => col = value,
                    Field::Row => row = value,
                    Field::None => {}
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"from" => in_from = false,
                b"col" | b"row" => field = Field::None,
                b"pic" => {
                    in_pic = false;
                    if let Some(rel_id) = rel_id.take() {
                        pictures.push(PictureAnchor { col, row, rel_id });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    pictures
}

/// Raw picture bytes with their anchor.
#[derive(Debug, Clone)]
pub struct Picture {
    pub anchor: PictureAnchor,
    pub part: String,
    pub data: Vec<u8>,
}

impl Workbook {
    /// Pictures of the active sheet, in drawing order.
    pub fn pictures(&self) -> Result<Vec<Picture>, WorkbookError> {
        let sheet_rels = rels_path_for(&self.sheet_part);
        let Some(rels_xml) = self.package.get(&sheet_rels) else {
            return Ok(Vec::new());
        };
        let rels_xml = std::str::from_utf8(rels_xml).map_err(|e| WorkbookError::Xml {
            part: sheet_rels.clone(),
            detail: e.to_string(),
        })?;

        let mut pictures = Vec::new();
        let mut drawings: Vec<String> = parse_relationships(rels_xml)
            .into_values()
            .map(|target| resolve_target(&self.sheet_part, &target))
            .filter(|part| part.contains("/drawings/") && part.ends_with(".xml"))
            .collect();
        drawings.sort();

        for drawing in drawings {
            let drawing_xml = self.package.get_str(&drawing)?;
            let media: HashMap<String, String> = self
                .package
                .get(&rels_path_for(&drawing))
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .map(parse_relationships)
                .unwrap_or_default();

            for anchor in parse_drawing(drawing_xml) {
                let Some(target) = media.get(&anchor.rel_id) else {
                    tracing::warn!(rel_id = %anchor.rel_id, drawing = %drawing, "Picture relationship not found");
                    continue;
                };
                let part = resolve_target(&drawing, target);
                let data = self
                    .package
                    .get(&part)
                    .ok_or_else(|| WorkbookError::MissingPart(part.clone()))?
                    .to_vec();
                pictures.push(Picture { anchor, part, data });
            }
        }
        Ok(pictures)
    }
}

/// Write every picture of the active sheet to `out_dir` as PNG.
///
/// A picture that cannot be decoded keeps its number (so later positions are
/// not shifted) and is logged as an error.
pub fn extract_images(
    workbook: &Workbook,
    out_dir: &Path,
    log: &mut RunLog,
) -> Result<Vec<PathBuf>, WorkbookError> {
    std::fs::create_dir_all(out_dir)?;
    let mut pictures = workbook.pictures()?;
    if pictures.is_empty() {
        log.warn("No images found in workbook");
        return Ok(Vec::new());
    }
    pictures.sort_by_key(|p| (p.anchor.row, p.anchor.col));

    let mut counters: HashMap<&'static str, u32> = HashMap::new();
    let mut saved = Vec::with_capacity(pictures.len());
    for picture in pictures {
        let origin = origin_for_column(picture.anchor.col).as_str();
        let counter = counters.entry(origin).or_insert(0);
        *counter += 1;
        let name = format!("{origin}{IMAGE_DELIMITER}{counter}.png");
        let path = out_dir.join(&name);

        match image::load_from_memory(&picture.data)
            .and_then(|img| img.save_with_format(&path, image::ImageFormat::Png))
        {
            Ok(()) => {
                log.info(format!(
                    "Extracted {name} (anchor row {}, col {})",
                    picture.anchor.row + 1,
                    picture.anchor.col
                ));
                saved.push(path);
            }
            Err(e) => log.error(format!("Failed to save {name} from {}: {e}", picture.part)),
        }
    }
    Ok(saved)
}
