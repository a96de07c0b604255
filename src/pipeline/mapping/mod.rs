//! Write-back of run data into marked worksheet cells.
//!
//! A marked cell (non-empty string, bold, red font) holds a bracket-path expression. The
//! scan collects every marked cell, resolves each expression against a frozen
//! snapshot of the run, and stages the result. Writes are applied only after the
//! scan, so no resolution ever observes another cell's new value.

pub mod expression;
pub mod resolve;
pub mod sheet;

pub use expression::*;
pub use resolve::*;
pub use sheet::*;

use serde_json::{Map, Value};

use crate::config;
use crate::pipeline::context::{RunContext, RunLog};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MappingSummary {
    pub marked: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

/// A cell write decided during the scan, applied afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedWrite {
    pub cell: CellRef,
    pub expression: String,
    pub value: CellValue,
    pub unresolved: Option<Unresolved>,
}

pub struct MappingEngine {
    max_column: u32,
    sentinel: String,
}

impl Default for MappingEngine {
    fn default() -> Self {
        Self {
            max_column: config::MAPPING_MAX_COLUMN,
            sentinel: config::UNRESOLVED_SENTINEL.to_string(),
        }
    }
}

impl MappingEngine {
    pub fn new(max_column: u32, sentinel: &str) -> Self {
        Self {
            max_column,
            sentinel: sentinel.to_string(),
        }
    }

    /// Resolve every marked cell against `ctx` and write the results.
    pub fn apply<S: Sheet>(&self, sheet: &mut S, ctx: &mut RunContext) -> MappingSummary {
        let resolver = SnapshotResolver::from_context(ctx);
        self.apply_with(sheet, &resolver, &mut ctx.log)
    }

    pub fn apply_with<S: Sheet, R: Resolve>(
        &self,
        sheet: &mut S,
        resolver: &R,
        log: &mut RunLog,
    ) -> MappingSummary {
        let _span = tracing::info_span!("mapping", max_row = sheet.max_row()).entered();
        let staged = self.scan(sheet, resolver);

        let mut summary = MappingSummary {
            marked: staged.len(),
            ..Default::default()
        };
        for write in staged {
            match &write.unresolved {
                None => {
                    summary.resolved += 1;
                    log.info(format!("{}: {} -> {}", write.cell, write.expression, write.value));
                }
                Some(reason) => {
                    summary.unresolved += 1;
                    log.warn(format!(
                        "{}: {} unresolved ({reason}), wrote {}",
                        write.cell, write.expression, self.sentinel
                    ));
                }
            }
            sheet.set_value(write.cell, write.value);
        }

        log.info(format!(
            "Mapping complete: {} marked cell(s), {} resolved, {} unresolved",
            summary.marked, summary.resolved, summary.unresolved
        ));
        summary
    }

    /// Read-only pass: collect and resolve marked cells, row-major.
    pub fn scan<S: Sheet, R: Resolve>(&self, sheet: &S, resolver: &R) -> Vec<StagedWrite> {
        let mut staged = Vec::new();
        for row in 1..=sheet.max_row() {
            for col in 1..=self.max_column {
                let cell = CellRef::new(row, col);
                let Some(view) = sheet.cell(cell) else {
                    continue;
                };
                if !view.is_text || view.text.trim().is_empty() || !view.font.is_marker() {
                    continue;
                }
                let expression = strip_quotes(&view.text).to_string();
                let (value, unresolved) = match resolver.resolve(&expression) {
                    Ok(value) => (to_cell_value(&value), None),
                    Err(reason) => (CellValue::Text(self.sentinel.clone()), Some(reason)),
                };
                staged.push(StagedWrite {
                    cell,
                    expression,
                    value,
                    unresolved,
                });
            }
        }
        staged
    }
}

/// Scalars are written directly; composites as canonical JSON text.
pub fn to_cell_value(value: &Value) -> CellValue {
    match value {
        Value::Bool(b) => CellValue::Bool(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) => CellValue::Number(f),
            None => CellValue::Text(n.to_string()),
        },
        Value::String(s) => CellValue::Text(s.clone()),
        Value::Null => CellValue::Text(String::new()),
        Value::Array(_) | Value::Object(_) => CellValue::Text(canonical_json(value)),
    }
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::sheet::memory::MemorySheet;
    use super::*;
    use crate::pipeline::context::LogLevel;
    use crate::pipeline::schema::{ServiceData, SpeedTestData};
    use crate::pipeline::sector::Sector;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::Path;

    fn context() -> RunContext {
        let mut ctx = RunContext::new(Path::new("/tmp/fieldsheet-test"));
        ctx.set_service(
            Sector::Alpha,
            ServiceData {
                nr5g_rsrp: Some(-85.0),
                nr_band: Some(78.0),
                ..Default::default()
            },
        );
        ctx.insert_speed_test(
            Sector::Beta,
            "beta_image_4",
            SpeedTestData {
                download_mbps: Some(250.5),
                ping_ms: Some(18.0),
                ..Default::default()
            },
        );
        ctx.compute_averages();
        ctx
    }

    #[test]
    fn writes_scalars_and_sentinel() {
        let mut sheet = MemorySheet::default()
            .marker((2, 2), "alpha_service['nr5g_rsrp']")
            .marker((3, 2), "beta_speedtest['beta_image_3']['download_mbps']")
            .marker((4, 2), "'Beta_SpeedTest[\"beta_image_4\"][\"Download Mbps\"]'")
            .with((5, 2), "alpha_service['nr_band']", true, Some("FF000000"))
            .with((6, 2), "Label", false, None);
        let mut ctx = context();

        let summary = MappingEngine::default().apply(&mut sheet, &mut ctx);

        assert_eq!(
            summary,
            MappingSummary {
                marked: 3,
                resolved: 2,
                unresolved: 1
            }
        );
        assert_eq!(
            sheet.writes,
            vec![
                (CellRef::new(2, 2), CellValue::Number(-85.0)),
                (CellRef::new(3, 2), CellValue::Text("NULL".into())),
                (CellRef::new(4, 2), CellValue::Number(250.5)),
            ]
        );
        assert_eq!(sheet.text(5, 2), Some("alpha_service['nr_band']"));
        assert!(ctx.log.contains(LogLevel::Warn, "B3: beta_speedtest"));
        assert!(ctx.log.contains(LogLevel::Info, "B2: alpha_service['nr5g_rsrp'] -> -85"));
    }

    #[test]
    fn marked_cells_never_keep_expression_text() {
        let mut sheet = MemorySheet::default()
            .marker((1, 1), "not an expression")
            .marker((1, 3), "gamma_service['lte_pci']")
            .marker((2, 16), "average['alpha']['download_mbps']");
        let mut ctx = context();

        MappingEngine::default().apply(&mut sheet, &mut ctx);

        assert_eq!(sheet.text(1, 1), Some("NULL"));
        assert_eq!(sheet.text(1, 3), Some("NULL"));
        assert_eq!(sheet.text(2, 16), Some("NULL"));
    }

    #[test]
    fn styled_numbers_are_not_markers() {
        let mut sheet = MemorySheet::default()
            .marked_number((2, 2), -85.0)
            .marker((3, 2), "alpha_service['nr_band']");

        let summary = MappingEngine::default().apply(&mut sheet, &mut context());

        assert_eq!(summary.marked, 1);
        assert_eq!(sheet.writes, vec![(CellRef::new(3, 2), CellValue::Number(78.0))]);
        assert_eq!(sheet.text(2, 2), Some("-85"));
    }

    #[test]
    fn columns_beyond_p_are_not_scanned() {
        let mut sheet = MemorySheet::default().marker((1, 17), "alpha_service['nr_band']");
        let summary = MappingEngine::default().apply(&mut sheet, &mut context());
        assert_eq!(summary.marked, 0);
        assert!(sheet.writes.is_empty());
    }

    #[test]
    fn composites_are_written_as_canonical_json() {
        let mut sheet = MemorySheet::default().marker((1, 1), "beta_speedtest['beta_image_4']");
        MappingEngine::default().apply(&mut sheet, &mut context());
        assert_eq!(
            sheet.writes[0].1,
            CellValue::Text(
                r#"{"download_mbps":250.5,"jitter_ms":null,"ping_ms":18.0,"upload_mbps":null}"#
                    .into()
            )
        );
    }

    #[test]
    fn all_writes_happen_after_the_scan() {
        // B1 resolves to text that is itself a valid expression in a marked cell.
        let resolver = SnapshotResolver::new(json!({
            "a": "b",
            "b": 7
        }));
        let mut sheet = MemorySheet::default().marker((1, 1), "a").marker((1, 2), "b");
        let mut log = RunLog::default();

        MappingEngine::default().apply_with(&mut sheet, &resolver, &mut log);

        assert!(!sheet.read_after_write.get());
        assert_eq!(sheet.text(1, 1), Some("b"));
        assert_eq!(sheet.text(1, 2), Some("7"));
    }

    #[test]
    fn scan_is_stable_across_repeated_runs() {
        let sheet = MemorySheet::default()
            .marker((1, 1), "alpha_service['nr_band']")
            .marker((2, 1), "average['beta']['ping_ms']");
        let resolver = SnapshotResolver::from_context(&context());
        let engine = MappingEngine::default();
        assert_eq!(engine.scan(&sheet, &resolver), engine.scan(&sheet, &resolver));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"z": 1, "a": {"d": [ {"y": 1, "b": 2} ], "c": true}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":true,"d":[{"b":2,"y":1}]},"z":1}"#
        );
    }
}
