//! `.xlsx` workbook access: active sheet cells, fonts, embedded pictures and
//! value write-back.
//!
//! The package is held in memory as raw parts. Saving rewrites only the active
//! worksheet part; every other part (styles, drawings, media, formulas on other
//! sheets) is copied byte for byte.

pub mod images;
pub mod package;
pub mod styles;
pub mod worksheet;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use thiserror::Error;

use crate::pipeline::mapping::{CellRef, CellValue, CellView, Sheet};
use package::{parse_relationships, rels_path_for, resolve_target, Package};
use styles::{parse_shared_strings, StyleTable};
use worksheet::{parse_cells, rewrite_cells, RawCell};

pub use images::extract_images;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const STYLES_PART: &str = "xl/styles.xml";

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a valid xlsx package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Malformed part {part}: {detail}")]
    Xml { part: String, detail: String },

    #[error("Missing package part: {0}")]
    MissingPart(String),

    #[error("Workbook has no worksheets")]
    NoSheets,
}

/// An opened workbook positioned on its active sheet.
#[derive(Debug)]
pub struct Workbook {
    package: Package,
    sheet_part: String,
    sheet_name: String,
    cells: BTreeMap<CellRef, RawCell>,
    styles: StyleTable,
    pending: BTreeMap<CellRef, CellValue>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let _span = tracing::info_span!("workbook_open", path = %path.display()).entered();
        let package = Package::read(path)?;

        let (sheet_name, sheet_part) = active_sheet(&package)?;
        let shared = match package.get(SHARED_STRINGS_PART) {
            Some(_) => parse_shared_strings(package.get_str(SHARED_STRINGS_PART)?),
            None => Vec::new(),
        };
        let styles = match package.get(STYLES_PART) {
            Some(_) => StyleTable::parse(package.get_str(STYLES_PART)?),
            None => StyleTable::default(),
        };
        let cells = parse_cells(package.get_str(&sheet_part)?, &shared);

        tracing::info!(
            sheet = %sheet_name,
            part = %sheet_part,
            cells = cells.len(),
            "Workbook opened"
        );
        Ok(Self {
            package,
            sheet_part,
            sheet_name,
            cells,
            styles,
            pending: BTreeMap::new(),
        })
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn pending_writes(&self) -> &BTreeMap<CellRef, CellValue> {
        &self.pending
    }

    /// Write the package with pending values to `dest`.
    ///
    /// The archive is assembled in a temporary file beside `dest` and renamed
    /// over it, so an interrupted save never leaves a truncated workbook.
    /// Returns pending cells that had no `<c>` element in the sheet.
    pub fn save(&self, dest: &Path) -> Result<Vec<CellRef>, WorkbookError> {
        let _span = tracing::info_span!(
            "workbook_save",
            dest = %dest.display(),
            writes = self.pending.len()
        )
        .entered();

        let (sheet_xml, missing) = rewrite_cells(
            self.package.get_str(&self.sheet_part)?,
            &self.pending,
            &self.sheet_part,
        )?;
        let mut replacements = HashMap::new();
        replacements.insert(self.sheet_part.clone(), sheet_xml);

        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        self.package.write(tmp.as_file_mut(), &replacements)?;
        tmp.persist(dest).map_err(|e| WorkbookError::Io(e.error))?;

        for cell in &missing {
            tracing::warn!(cell = %cell, "Staged value has no cell element; not written");
        }
        tracing::info!(written = self.pending.len() - missing.len(), "Workbook saved");
        Ok(missing)
    }
}

impl Sheet for Workbook {
    fn max_row(&self) -> u32 {
        self.cells.keys().map(|c| c.row).max().unwrap_or(0)
    }

    fn cell(&self, cell: CellRef) -> Option<CellView> {
        let raw = self.cells.get(&cell)?;
        let (text, is_text) = match self.pending.get(&cell) {
            Some(value) => (value.to_string(), matches!(value, CellValue::Text(_))),
            None => (raw.text.clone(), raw.is_text),
        };
        if text.is_empty() {
            return None;
        }
        Some(CellView {
            text,
            is_text,
            font: self.styles.font_for(raw.style),
        })
    }

    fn set_value(&mut self, cell: CellRef, value: CellValue) {
        self.pending.insert(cell, value);
    }
}

/// Name and part path of the sheet selected in the first `workbookView`
/// (`activeTab`, default 0).
fn active_sheet(package: &Package) -> Result<(String, String), WorkbookError> {
    let xml = package.get_str(WORKBOOK_PART)?;
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);

    let mut active_tab: Option<usize> = None;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => match e.local_name().as_ref() {
                b"workbookView" if active_tab.is_none() => {
                    active_tab = Some(
                        e.attributes()
                            .filter_map(std::result::Result::ok)
                            .find(|a| a.key.as_ref() == b"activeTab")
                            .and_then(|a| a.decode_and_unescape_value(&reader).ok())
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0),
                    );
                }
                b"sheet" => {
                    let mut name = String::new();
                    let mut rel_id = String::new();
                    for attr in e.attributes().filter_map(std::result::Result::ok) {
                        let value = attr
                            .decode_and_unescape_value(&reader)
                            .map(|v| v.to_string())
                            .unwrap_or_default();
                        match attr.key.local_name().as_ref() {
                            b"name" => name = value,
                            b"id" => rel_id = value,
                            _ => {}
                        }
                    }
                    sheets.push((name, rel_id));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(WorkbookError::Xml {
                    part: WORKBOOK_PART.to_string(),
                    detail: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    let index = active_tab.unwrap_or(0);
    let (name, rel_id) = sheets
        .get(index)
        .or_else(|| sheets.first())
        .cloned()
        .ok_or(WorkbookError::NoSheets)?;

    let rels = parse_relationships(package.get_str(&rels_path_for(WORKBOOK_PART))?);
    let target = rels.get(&rel_id).ok_or_else(|| WorkbookError::Xml {
        part: rels_path_for(WORKBOOK_PART),
        detail: format!("no relationship {rel_id} for sheet {name}"),
    })?;
    Ok((name, resolve_target(WORKBOOK_PART, target)))
}
