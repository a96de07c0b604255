//! Run orchestration: workbook → images → routing → extraction → averages →
//! mapping → single save.
//!
//! Every run owns a fresh [`RunContext`] and a temporary working directory that
//! is removed when the run ends. Only an unreadable workbook, an empty picture
//! set or a failed save end a run early; everything else degrades to absent
//! records and NULL cells.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::pipeline::context::{RunContext, RunLog};
use crate::pipeline::diagnostic;
use crate::pipeline::extraction::{ExtractionEngine, ExtractionSummary, PipelineProviders};
use crate::pipeline::mapping::{CellRef, MappingEngine, MappingSummary};
use crate::pipeline::routing;
use crate::pipeline::transport::ModelClient;
use crate::workbook::{extract_images, Workbook, WorkbookError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Cannot create working directory: {0}")]
    WorkingDir(#[source] std::io::Error),

    #[error("Cannot open workbook {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: WorkbookError,
    },

    #[error("Image extraction failed: {0}")]
    Images(#[source] WorkbookError),

    #[error("No images could be extracted from the workbook")]
    NoImages,

    #[error("Cannot save workbook to {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: WorkbookError,
    },
}

/// Counters for a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub output: PathBuf,
    pub images: usize,
    pub skipped: usize,
    pub records: usize,
    pub extraction: ExtractionSummary,
    pub mapping: MappingSummary,
    /// Staged values with no cell element in the sheet.
    pub unwritten: Vec<CellRef>,
}

/// Result of one run plus its log, available whether or not the run succeeded.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub log: RunLog,
    pub result: Result<RunReport, ProcessingError>,
}

pub struct RunProcessor {
    client: Arc<dyn ModelClient>,
    providers: PipelineProviders,
    pacing: Duration,
    mapping: MappingEngine,
    dump_base: Option<PathBuf>,
}

impl RunProcessor {
    pub fn new(client: Arc<dyn ModelClient>, providers: PipelineProviders, pacing: Duration) -> Self {
        Self {
            client,
            providers,
            pacing,
            mapping: MappingEngine::default(),
            dump_base: None,
        }
    }

    /// Base directory for diagnostic dumps (a per-run subdirectory is created).
    pub fn with_dump_base(mut self, base: Option<PathBuf>) -> Self {
        self.dump_base = base;
        self
    }

    /// Process `input` and save the result to `output` (or back to `input`).
    pub fn process(&self, input: &Path, output: Option<&Path>) -> RunOutcome {
        let workdir = match tempfile::Builder::new().prefix("fieldsheet-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                let mut log = RunLog::default();
                log.error(format!("Cannot create working directory: {e}"));
                return RunOutcome {
                    run_id: Uuid::new_v4(),
                    log,
                    result: Err(ProcessingError::WorkingDir(e)),
                };
            }
        };

        let mut ctx = RunContext::new(workdir.path());
        let _span = tracing::info_span!(
            "run",
            run_id = %ctx.run_id,
            input = %input.display()
        )
        .entered();
        let dump_dir = self
            .dump_base
            .as_deref()
            .and_then(|base| diagnostic::dump_dir_for(base, &ctx.run_id));

        let result = self.run_stages(input, output.unwrap_or(input), &mut ctx, dump_dir.clone());
        if let Err(e) = &result {
            ctx.log.error(format!("Run aborted: {e}"));
        }

        if let Some(dir) = &dump_dir {
            diagnostic::dump(dir, "snapshot.json", format!("{:#}", ctx.snapshot()));
            diagnostic::dump(dir, "run.log", ctx.log.render());
        }

        RunOutcome {
            run_id: ctx.run_id,
            log: std::mem::take(&mut ctx.log),
            result,
        }
    }

    fn run_stages(
        &self,
        input: &Path,
        dest: &Path,
        ctx: &mut RunContext,
        dump_dir: Option<PathBuf>,
    ) -> Result<RunReport, ProcessingError> {
        ctx.log.info(format!("Opening workbook {}", input.display()));
        let mut workbook = Workbook::open(input).map_err(|source| ProcessingError::Open {
            path: input.to_path_buf(),
            source,
        })?;
        ctx.log.info(format!("Active sheet: {}", workbook.sheet_name()));

        let image_dir = ctx.working_dir().join("images");
        let images =
            extract_images(&workbook, &image_dir, &mut ctx.log).map_err(ProcessingError::Images)?;
        if images.is_empty() {
            return Err(ProcessingError::NoImages);
        }
        ctx.log.info(format!("{} image(s) extracted", images.len()));

        let plan = routing::route(&images, &mut ctx.log);

        let engine = ExtractionEngine::new(self.client.clone(), self.providers.clone(), self.pacing)
            .with_dump_dir(dump_dir);
        let extraction = engine.run(&plan, ctx);

        ctx.compute_averages();
        ctx.log.info(format!("{} record(s) collected", ctx.record_count()));

        let mapping = self.mapping.apply(&mut workbook, ctx);

        let unwritten = workbook.save(dest).map_err(|source| ProcessingError::Save {
            path: dest.to_path_buf(),
            source,
        })?;
        for cell in &unwritten {
            ctx.log.warn(format!("{cell}: value staged but the cell does not exist"));
        }
        ctx.log.info(format!("Saved {}", dest.display()));

        Ok(RunReport {
            output: dest.to_path_buf(),
            images: images.len(),
            skipped: plan.skipped.len(),
            records: ctx.record_count(),
            extraction,
            mapping,
            unwritten,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::LogLevel;
    use crate::pipeline::extraction::{ServiceReader, StageProviders};
    use crate::pipeline::mapping::Sheet;
    use crate::pipeline::transport::mock::{CallKind, ScriptedModelClient};
    use crate::pipeline::transport::{Credential, Provider};
    use crate::workbook::testing::{png_bytes, WorkbookFixture};
    use pretty_assertions::assert_eq;

    const SERVICE_JSON: &str = r#"{"nr_arfcn": 630000, "nr_band": 78, "nr_pci": 101, "nr_bw": 100,
        "nr5g_rsrp": -85, "nr5g_rsrq": -11, "nr5g_sinr": 18, "lte_band": 3, "lte_earfcn": 1300,
        "lte_pci": 7, "lte_bw": 20, "lte_rsrp": -90, "lte_rsrq": -9, "lte_sinr": 12}"#;
    const SPEED_JSON: &str =
        r#"{"download_mbps": 412.7, "upload_mbps": 38.1, "ping_ms": 14, "jitter_ms": 2}"#;

    fn provider(name: &str) -> Provider {
        Provider::new(name, "https://api.test/v1", Credential::new("test-key"), name).unwrap()
    }

    fn providers() -> PipelineProviders {
        let stage = |prefix: &str| StageProviders {
            vision: provider(&format!("{prefix}-vision")),
            reasoning: provider(&format!("{prefix}-reasoning")),
            ocr: None,
        };
        PipelineProviders {
            service: stage("service"),
            speed: stage("speed"),
            video: stage("video"),
            voice: stage("voice"),
            service_reader: ServiceReader::Vision,
        }
    }

    fn processor(client: &Arc<ScriptedModelClient>) -> RunProcessor {
        RunProcessor::new(client.clone(), providers(), Duration::ZERO)
    }

    fn report_fixture() -> WorkbookFixture {
        WorkbookFixture::new()
            .picture(0, 0, png_bytes())
            .picture(1, 0, png_bytes())
            .picture(2, 0, png_bytes())
            .text(1, 5, "RSRP")
            .marker(1, 6, "alpha_service['nr5g_rsrp']")
            .marker(2, 6, "alpha_speedtest['alpha_image_3']['Download Mbps']")
            .marker(3, 6, "average['alpha']['download_mbps']")
            .marker(4, 6, "gamma_service['nr_band']")
    }

    #[test]
    fn full_run_fills_marked_cells() {
        let tmp = tempfile::tempdir().unwrap();
        let input = report_fixture().write(tmp.path());
        let output = tmp.path().join("filled.xlsx");
        let client = Arc::new(ScriptedModelClient::replies(&[
            "NR-ARFCN 630000 Band n78 PCI 101 RSRP -85",
            "LTE EARFCN 1300 Band 3 PCI 7",
            SERVICE_JSON,
            SPEED_JSON,
        ]));

        let outcome = processor(&client).process(&input, Some(&output));
        let report = outcome.result.unwrap();

        assert_eq!(report.images, 3);
        assert_eq!(report.records, 2);
        assert_eq!(report.extraction.succeeded, 2);
        assert_eq!(report.extraction.fast_path, 1);
        assert_eq!(
            report.mapping,
            MappingSummary {
                marked: 4,
                resolved: 3,
                unresolved: 1
            }
        );
        assert!(report.unwritten.is_empty());

        let kinds: Vec<(String, CallKind)> = client
            .calls()
            .into_iter()
            .map(|c| (c.provider, c.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("service-vision".to_string(), CallKind::Chat),
                ("service-vision".to_string(), CallKind::Chat),
                ("service-reasoning".to_string(), CallKind::Chat),
                ("speed-vision".to_string(), CallKind::Chat),
            ]
        );

        let filled = Workbook::open(&output).unwrap();
        let text = |row, col| filled.cell(CellRef::new(row, col)).map(|c| c.text);
        assert_eq!(text(1, 5).as_deref(), Some("RSRP"));
        assert_eq!(text(1, 6).as_deref(), Some("-85"));
        assert_eq!(text(2, 6).as_deref(), Some("412.7"));
        assert_eq!(text(3, 6).as_deref(), Some("412.7"));
        assert_eq!(text(4, 6).as_deref(), Some("NULL"));
        assert!(outcome.log.contains(LogLevel::Info, "Saved"));
    }

    #[test]
    fn model_failures_degrade_to_null_cells() {
        let tmp = tempfile::tempdir().unwrap();
        let input = report_fixture().write(tmp.path());
        let client = Arc::new(ScriptedModelClient::new(vec![Err(401); 8]));

        let outcome = processor(&client).process(&input, None);
        let report = outcome.result.unwrap();

        assert_eq!(report.records, 0);
        assert_eq!(report.output, input);
        assert_eq!(report.mapping.unresolved, 4);
        let saved = Workbook::open(&input).unwrap();
        assert_eq!(
            saved.cell(CellRef::new(1, 6)).map(|c| c.text).as_deref(),
            Some("NULL")
        );
        assert!(outcome.log.count(LogLevel::Error) >= 2);
    }

    #[test]
    fn workbook_without_pictures_ends_the_run_unsaved() {
        let tmp = tempfile::tempdir().unwrap();
        let input = WorkbookFixture::new()
            .marker(1, 1, "alpha_service['nr_band']")
            .write(tmp.path());
        let output = tmp.path().join("never.xlsx");
        let client = Arc::new(ScriptedModelClient::replies(&[]));

        let outcome = processor(&client).process(&input, Some(&output));

        assert!(matches!(outcome.result, Err(ProcessingError::NoImages)));
        assert!(!output.exists());
        assert_eq!(client.call_count(), 0);
        assert!(outcome.log.contains(LogLevel::Error, "Run aborted"));
    }

    #[test]
    fn unreadable_workbook_ends_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("broken.xlsx");
        std::fs::write(&input, b"not a zip").unwrap();
        let client = Arc::new(ScriptedModelClient::replies(&[]));

        let outcome = processor(&client).process(&input, None);

        assert!(matches!(outcome.result, Err(ProcessingError::Open { .. })));
        assert_eq!(std::fs::read(&input).unwrap(), b"not a zip");
    }

    #[test]
    fn dump_writes_snapshot_and_log() {
        let tmp = tempfile::tempdir().unwrap();
        let input = WorkbookFixture::new()
            .picture(0, 20, png_bytes())
            .marker(1, 1, "voice_test")
            .write(tmp.path());
        let dumps = tmp.path().join("dumps");
        let client = Arc::new(ScriptedModelClient::replies(&[]));

        let outcome = processor(&client)
            .with_dump_base(Some(dumps.clone()))
            .process(&input, None);

        assert!(outcome.result.is_ok());
        let run_dir = dumps.join(outcome.run_id.to_string());
        let snapshot: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("snapshot.json")).unwrap())
                .unwrap();
        assert!(snapshot.get("voice_test").is_some());
        let log = std::fs::read_to_string(run_dir.join("run.log")).unwrap();
        assert!(log.contains("unknown_image_1"));
    }
}
