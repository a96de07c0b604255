//! Vision → reasoning extraction with null-driven escalation.
//!
//! Service pairs: both screenshots are read independently, merged under labelled
//! headers and structured by one reasoning pass.
//!
//! Single images: one vision pass asking for JSON; accepted locally only when
//! every field is present, otherwise plain OCR + reasoning with the explicit
//! schema. Failures never abort the run: the record is absent and the reason is
//! in the run log.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::pacing::Pacer;
use super::prompts;
use super::{ExtractionError, PipelineProviders, ServiceReader};
use crate::pipeline::context::{RunContext, RunLog};
use crate::pipeline::diagnostic;
use crate::pipeline::routing::{DispatchPlan, RoutedImage, ServicePair, SingleKind};
use crate::pipeline::schema::{
    Category, Record, ServiceData, SpeedTestData, VideoTestData, VoiceCallData,
};
use crate::pipeline::transport::{
    clean_json_response, ChatMessage, ChatRequest, EncodedImage, ModelClient, Provider,
    EMPTY_OBJECT,
};

/// Counters for one extraction pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Single images accepted straight from the first vision pass.
    pub fast_path: usize,
    /// Single images that needed plain OCR + reasoning.
    pub escalated: usize,
}

/// A single-image record and whether it needed escalation.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<R> {
    pub record: R,
    pub escalated: bool,
}

/// Why the local fast path did not accept a vision output.
#[derive(Debug, Clone, PartialEq)]
pub enum FastPathMiss {
    NoJson,
    Invalid(String),
    Nulls(Vec<&'static str>),
}

impl std::fmt::Display for FastPathMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoJson => f.write_str("no JSON object in vision output"),
            Self::Invalid(reason) => write!(f, "vision JSON invalid: {reason}"),
            Self::Nulls(fields) => write!(f, "null fields: {}", fields.join(", ")),
        }
    }
}

/// Local, API-free parse of a vision output. Accepts only complete records.
pub fn try_fast_path<R: Record>(vision_output: &str) -> Result<R, FastPathMiss> {
    let cleaned = clean_json_response(vision_output);
    if cleaned == EMPTY_OBJECT {
        return Err(FastPathMiss::NoJson);
    }
    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| FastPathMiss::Invalid(e.to_string()))?;
    let record = R::validate(&value).map_err(|e| FastPathMiss::Invalid(e.to_string()))?;
    let nulls = record.null_fields();
    if nulls.is_empty() {
        Ok(record)
    } else {
        Err(FastPathMiss::Nulls(nulls))
    }
}

/// Clean, parse and validate a reasoning output. The raw text is kept on failure.
pub fn parse_record<R: Record>(raw: &str) -> Result<R, ExtractionError> {
    let cleaned = clean_json_response(raw);
    if cleaned == EMPTY_OBJECT {
        return Err(ExtractionError::rejected("no JSON object in output", raw));
    }
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| ExtractionError::rejected(format!("invalid JSON: {e}"), raw))?;
    R::validate(&value).map_err(|e| ExtractionError::rejected(e, raw))
}

fn describe_nulls(nulls: &[&str]) -> String {
    if nulls.is_empty() {
        "complete".to_string()
    } else {
        format!("null fields: {}", nulls.join(", "))
    }
}

// ──────────────────────────────────────────────
// ExtractionEngine
// ──────────────────────────────────────────────

pub struct ExtractionEngine {
    client: Arc<dyn ModelClient>,
    providers: PipelineProviders,
    pacer: Mutex<Pacer>,
    dump_dir: Option<PathBuf>,
}

impl ExtractionEngine {
    pub fn new(client: Arc<dyn ModelClient>, providers: PipelineProviders, pacing: Duration) -> Self {
        Self {
            client,
            providers,
            pacer: Mutex::new(Pacer::new(pacing)),
            dump_dir: None,
        }
    }

    /// Write raw stage outputs under `dir` (see [`diagnostic`]).
    pub fn with_dump_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dump_dir = dir;
        self
    }

    /// Process a whole plan: service pairs first (sector order), then single
    /// images in input order. Records land in `ctx`; failures are logged.
    pub fn run(&self, plan: &DispatchPlan, ctx: &mut RunContext) -> ExtractionSummary {
        let _span = tracing::info_span!(
            "extraction",
            run_id = %ctx.run_id,
            service_pairs = plan.service.len(),
            singles = plan.singles.len(),
        )
        .entered();
        let mut summary = ExtractionSummary::default();

        for pair in &plan.service {
            let label = format!("{}_service", pair.sector);
            match self.extract_service(pair, ctx) {
                Ok(record) => {
                    ctx.log.info(format!(
                        "{label}: service record stored ({})",
                        describe_nulls(&record.null_fields())
                    ));
                    ctx.set_service(pair.sector, record);
                    summary.succeeded += 1;
                }
                Err(e) => {
                    ctx.log.error(format!("{label}: extraction failed: {e}"));
                    summary.failed += 1;
                }
            }
        }

        for task in &plan.singles {
            let id = task.image.id.as_str();
            let stored = match task.kind {
                SingleKind::SpeedTest(sector) => self
                    .single::<SpeedTestData>(&task.image, ctx, &mut summary)
                    .map(|r| ctx.insert_speed_test(sector, id, r)),
                SingleKind::VideoTest(sector) => self
                    .single::<VideoTestData>(&task.image, ctx, &mut summary)
                    .map(|r| ctx.insert_video_test(sector, id, r)),
                SingleKind::Voice => self
                    .single::<VoiceCallData>(&task.image, ctx, &mut summary)
                    .map(|r| ctx.insert_voice_test(id, r)),
            };
            if stored.is_some() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            fast_path = summary.fast_path,
            escalated = summary.escalated,
            "Extraction complete"
        );
        summary
    }

    fn single<R: Record>(
        &self,
        image: &RoutedImage,
        ctx: &mut RunContext,
        summary: &mut ExtractionSummary,
    ) -> Option<R> {
        match self.extract_single::<R>(image, ctx) {
            Ok(extracted) => {
                if extracted.escalated {
                    summary.escalated += 1;
                } else {
                    summary.fast_path += 1;
                }
                ctx.log.info(format!(
                    "{}: {} record stored ({})",
                    image.id,
                    R::CATEGORY,
                    describe_nulls(&extracted.record.null_fields())
                ));
                Some(extracted.record)
            }
            Err(e) => {
                ctx.log.error(format!("{}: extraction failed: {e}", image.id));
                None
            }
        }
    }

    // ── Service pair-merge ──────────────────────

    /// Read both screenshots of a sector and merge them with one reasoning pass.
    pub fn extract_service(
        &self,
        pair: &ServicePair,
        ctx: &mut RunContext,
    ) -> Result<ServiceData, ExtractionError> {
        let label = format!("{}_service", pair.sector);
        let _span = tracing::info_span!("extract_service", sector = %pair.sector).entered();
        ctx.log.info(format!(
            "{label}: reading service screenshots ({:?} reader)",
            self.providers.service_reader
        ));

        let mut sections = Vec::with_capacity(2);
        let mut any_text = false;
        for (index, slot) in [(1, pair.first.as_ref()), (2, pair.second.as_ref())] {
            let text = match slot {
                Some(image) => match self.read_service_image(image, &mut ctx.log) {
                    Ok(text) => {
                        ctx.log.info(format!(
                            "{label}: screenshot {index} ({}) read, {} chars",
                            image.id,
                            text.trim().len()
                        ));
                        text
                    }
                    Err(e) => {
                        ctx.log.warn(format!(
                            "{label}: screenshot {index} ({}) unreadable: {e}",
                            image.id
                        ));
                        String::new()
                    }
                },
                None => {
                    ctx.log.warn(format!("{label}: screenshot {index} missing"));
                    String::new()
                }
            };
            any_text |= !text.trim().is_empty();
            self.dump(&label, &format!("screenshot-{index}"), &text);
            sections.push(format!(
                "{}\n{}",
                prompts::screenshot_header(index, slot.map(|image| image.id.as_str())),
                text.trim()
            ));
        }

        if !any_text {
            return Err(ExtractionError::EmptyOutput {
                stage: "service read",
            });
        }

        let merged = sections.join("\n\n");
        self.dump(&label, "merged", &merged);
        let reasoning = &self.providers.service.reasoning;
        ctx.log.info(format!(
            "{label}: merging pair with reasoning model {}",
            reasoning.model()
        ));
        self.reason::<ServiceData>(reasoning, &merged, &label, &mut ctx.log)
    }

    fn read_service_image(
        &self,
        image: &RoutedImage,
        log: &mut RunLog,
    ) -> Result<String, ExtractionError> {
        let encoded = encode(image)?;
        match self.providers.service_reader {
            ServiceReader::Vision => {
                let vision = &self.providers.service.vision;
                self.chat(
                    vision,
                    vision_request(vision, prompts::SERVICE_VISION_PROMPT, &encoded),
                    log,
                )
            }
            ServiceReader::Ocr => {
                let ocr = self
                    .providers
                    .service
                    .ocr
                    .as_ref()
                    .ok_or(ExtractionError::MissingOcrProvider(Category::Service))?;
                self.pace(ocr);
                Ok(self.client.ocr(ocr, &encoded, log)?)
            }
        }
    }

    // ── Single-image escalation ─────────────────

    /// Vision pass, local fast path, then plain OCR + reasoning when any field
    /// is missing.
    pub fn extract_single<R: Record>(
        &self,
        image: &RoutedImage,
        ctx: &mut RunContext,
    ) -> Result<Extracted<R>, ExtractionError> {
        let id = image.id.as_str();
        let _span =
            tracing::info_span!("extract_single", image_id = id, category = %R::CATEGORY)
                .entered();
        let stage = self.providers.for_category(R::CATEGORY);
        let encoded = encode(image)?;

        ctx.log.info(format!("{id}: vision stage ({})", stage.vision.model()));
        let vision = self.chat(
            &stage.vision,
            vision_request(&stage.vision, &prompts::vision_prompt::<R>(), &encoded),
            &mut ctx.log,
        )?;
        self.dump(id, "vision", &vision);

        match try_fast_path::<R>(&vision) {
            Ok(record) => {
                ctx.log.info(format!("{id}: fast path accepted, all fields present"));
                return Ok(Extracted {
                    record,
                    escalated: false,
                });
            }
            Err(miss) => ctx.log.info(format!("{id}: escalating ({miss})")),
        }

        let text = self.chat(
            &stage.vision,
            vision_request(&stage.vision, prompts::PLAIN_OCR_PROMPT, &encoded),
            &mut ctx.log,
        )?;
        self.dump(id, "ocr", &text);
        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyOutput { stage: "plain OCR" });
        }

        ctx.log.info(format!(
            "{id}: plain OCR read {} chars, structuring with {}",
            text.trim().len(),
            stage.reasoning.model()
        ));
        let record = self.reason::<R>(&stage.reasoning, &text, id, &mut ctx.log)?;
        Ok(Extracted {
            record,
            escalated: true,
        })
    }

    // ── Model calls ─────────────────────────────

    fn reason<R: Record>(
        &self,
        provider: &Provider,
        text: &str,
        label: &str,
        log: &mut RunLog,
    ) -> Result<R, ExtractionError> {
        let request = ChatRequest::new(
            provider.model(),
            vec![
                ChatMessage::system(prompts::REASONING_SYSTEM_PROMPT),
                ChatMessage::user(&prompts::reasoning_prompt::<R>(text)),
            ],
        )
        .json_object();
        let raw = self.chat(provider, request, log)?;
        self.dump(label, "reasoning", &raw);
        parse_record::<R>(&raw)
    }

    fn chat(
        &self,
        provider: &Provider,
        request: ChatRequest,
        log: &mut RunLog,
    ) -> Result<String, ExtractionError> {
        self.pace(provider);
        Ok(self.client.chat(provider, &request, log)?)
    }

    fn pace(&self, provider: &Provider) {
        if let Ok(mut pacer) = self.pacer.lock() {
            pacer.wait(&provider.capability_key());
        }
    }

    fn dump(&self, label: &str, stage: &str, text: &str) {
        if let Some(dir) = &self.dump_dir {
            diagnostic::dump(dir, &diagnostic::stage_file(label, stage), text);
        }
    }
}

fn encode(image: &RoutedImage) -> Result<EncodedImage, ExtractionError> {
    EncodedImage::from_path(&image.path).map_err(|source| ExtractionError::ImageRead {
        path: image.path.clone(),
        source,
    })
}

fn vision_request(provider: &Provider, prompt: &str, image: &EncodedImage) -> ChatRequest {
    ChatRequest::new(
        provider.model(),
        vec![
            ChatMessage::system(prompts::VISION_SYSTEM_PROMPT),
            ChatMessage::user_with_image(prompt, image),
        ],
    )
}
