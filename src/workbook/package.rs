//! Raw access to the zip package and its relationship parts.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::WorkbookError;

/// One part of the package, kept in archive order.
#[derive(Debug, Clone)]
pub struct PackagePart {
    pub name: String,
    pub data: Vec<u8>,
}

/// In-memory copy of every part of an `.xlsx` package.
#[derive(Debug, Clone, Default)]
pub struct Package {
    parts: Vec<PackagePart>,
}

impl Package {
    pub fn read(path: &Path) -> Result<Self, WorkbookError> {
        let file = std::fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut parts = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            parts.push(PackagePart {
                name: entry.name().to_string(),
                data,
            });
        }
        Ok(Self { parts })
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.data.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Result<&str, WorkbookError> {
        let data = self
            .get(name)
            .ok_or_else(|| WorkbookError::MissingPart(name.to_string()))?;
        std::str::from_utf8(data).map_err(|e| WorkbookError::Xml {
            part: name.to_string(),
            detail: e.to_string(),
        })
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    /// Write every part to `writer`, substituting `replacements` by name.
    pub fn write<W: Write + std::io::Seek>(
        &self,
        writer: W,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> Result<(), WorkbookError> {
        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for part in &self.parts {
            zip.start_file(part.name.as_str(), options)?;
            let data = replacements.get(&part.name).unwrap_or(&part.data);
            zip.write_all(data)?;
        }
        zip.finish()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_parts(parts: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            parts: parts
                .into_iter()
                .map(|(name, data)| PackagePart {
                    name: name.to_string(),
                    data,
                })
                .collect(),
        }
    }
}

// ──────────────────────────────────────────────
// Relationships
// ──────────────────────────────────────────────

/// Relationship part for `part` (`xl/workbook.xml` → `xl/_rels/workbook.xml.rels`).
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the directory of its source part.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// `Id → Target` map of a `.rels` part.
pub fn parse_relationships(xml: &str) -> HashMap<String, String> {
    let mut relationships = HashMap::new();
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = None;
                    let mut target = None;
                    for attr in e.attributes().filter_map(std::result::Result::ok) {
                        match attr.key.as_ref() {
                            b"Id" => {
                                id = attr.decode_and_unescape_value(&reader).ok().map(|v| v.to_string())
                            }
                            b"Target" => {
                                target = attr.decode_and_unescape_value(&reader).ok().map(|v| v.to_string())
                            }
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(target)) = (id, target) {
                        relationships.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    relationships
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_path_sits_next_to_part() {
        assert_eq!(rels_path_for("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
        assert_eq!(
            rels_path_for("xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
    }

    #[test]
    fn targets_resolve_relative_and_absolute() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../drawings/drawing1.xml"),
            "xl/drawings/drawing1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
    }

    #[test]
    fn relationships_map_ids_to_targets() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://x/image" Target="../media/image1.png"/>
  <Relationship Id="rId2" Type="http://x/image" Target="../media/image2.jpeg"/>
</Relationships>"#;
        let rels = parse_relationships(xml);
        assert_eq!(rels.len(), 2);
        assert_eq!(rels["rId2"], "../media/image2.jpeg");
    }

    #[test]
    fn write_round_trips_parts_with_replacement() {
        let package = Package::from_parts(vec![
            ("a.xml", b"<a/>".to_vec()),
            ("b.xml", b"<b/>".to_vec()),
        ]);
        let mut replacements = HashMap::new();
        replacements.insert("b.xml".to_string(), b"<b>new</b>".to_vec());

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        package
            .write(std::fs::File::create(&path).unwrap(), &replacements)
            .unwrap();

        let reread = Package::read(&path).unwrap();
        assert_eq!(reread.part_names().collect::<Vec<_>>(), vec!["a.xml", "b.xml"]);
        assert_eq!(reread.get("a.xml"), Some(&b"<a/>"[..]));
        assert_eq!(reread.get_str("b.xml").unwrap(), "<b>new</b>");
        assert!(matches!(
            reread.get_str("missing.xml"),
            Err(WorkbookError::MissingPart(_))
        ));
    }
}
