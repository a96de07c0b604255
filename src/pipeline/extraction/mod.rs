pub mod engine;
pub mod pacing;
pub mod prompts;

pub use engine::*;
pub use pacing::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::schema::Category;
use crate::pipeline::transport::{Provider, TransportError};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Could not read image {}: {source}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model call failed: {0}")]
    Transport(#[from] TransportError),

    #[error("{stage} stage produced no usable text")]
    EmptyOutput { stage: &'static str },

    #[error("Reasoning output rejected ({reason}); raw content: {raw}")]
    Rejected { reason: String, raw: String },

    #[error("No OCR provider configured for the {0} pipeline")]
    MissingOcrProvider(Category),
}

impl ExtractionError {
    pub(crate) fn rejected(reason: impl std::fmt::Display, raw: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            raw: raw.to_string(),
        }
    }
}

// ──────────────────────────────────────────────
// Provider wiring
// ──────────────────────────────────────────────

/// How the two service-mode screenshots of a sector are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceReader {
    #[default]
    Vision,
    Ocr,
}

/// Provider pair (plus optional OCR endpoint) for one category pipeline.
#[derive(Debug, Clone)]
pub struct StageProviders {
    pub vision: Provider,
    pub reasoning: Provider,
    pub ocr: Option<Provider>,
}

#[derive(Debug, Clone)]
pub struct PipelineProviders {
    pub service: StageProviders,
    pub speed: StageProviders,
    pub video: StageProviders,
    pub voice: StageProviders,
    pub service_reader: ServiceReader,
}

impl PipelineProviders {
    pub fn for_category(&self, category: Category) -> &StageProviders {
        match category {
            Category::Service => &self.service,
            Category::SpeedTest => &self.speed,
            Category::VideoTest => &self.video,
            Category::VoiceCall => &self.voice,
        }
    }
}
