//! Wire types for the model provider endpoints.
//!
//! Chat completions follow the OpenAI-compatible contract (messages with inline
//! base64 `image_url` parts, optional `response_format`). OCR endpoints take a
//! single inline image and return a list of text detections.

use std::path::Path;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Chat completions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// 0.0 for deterministic extraction.
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            response_format: None,
            temperature: 0.0,
        }
    }

    /// Ask the provider to return a single JSON object.
    pub fn json_object(mut self) -> Self {
        self.response_format = Some(ResponseFormat::json_object());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    /// User turn carrying a text instruction followed by one inline image.
    pub fn user_with_image(text: &str, image: &EncodedImage) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: text.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                },
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

// ──────────────────────────────────────────────
// OCR endpoint
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OcrRequest {
    pub input: Vec<OcrInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

impl OcrRequest {
    pub fn for_image(image: &EncodedImage) -> Self {
        Self {
            input: vec![OcrInput {
                kind: "image_url".into(),
                url: image.data_url(),
            }],
        }
    }
}

/// Flatten an OCR response into a newline-joined text blob.
///
/// Understands line/token detections (`data[].text_detections[].text_prediction.text`)
/// and flat `text` fields at either the item or the top level.
pub fn flatten_ocr_response(response: &serde_json::Value) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(items) = response.get("data").and_then(|d| d.as_array()) {
        for item in items {
            if let Some(detections) = item.get("text_detections").and_then(|d| d.as_array()) {
                for detection in detections {
                    let text = detection
                        .get("text_prediction")
                        .and_then(|p| p.get("text"))
                        .or_else(|| detection.get("text"))
                        .and_then(|t| t.as_str());
                    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
                        lines.push(text.to_string());
                    }
                }
            } else if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                if !text.trim().is_empty() {
                    lines.push(text.trim().to_string());
                }
            }
        }
    }

    if lines.is_empty() {
        if let Some(text) = response.get("text").and_then(|t| t.as_str()) {
            return text.trim().to_string();
        }
    }

    lines.join("\n")
}

// ──────────────────────────────────────────────
// Inline images
// ──────────────────────────────────────────────

/// Image bytes ready for inline transport as a base64 data URL.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub mime: String,
    pub base64: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], mime: &str) -> Self {
        Self {
            mime: mime.to_string(),
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Read and encode an image file; the MIME type is guessed from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mime = mime_guess::from_path(path).first_or(mime_guess::mime::IMAGE_PNG);
        Ok(Self::from_bytes(&bytes, mime.essence_str()))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }

    /// Size of the base64 payload in bytes.
    pub fn payload_len(&self) -> usize {
        self.base64.len()
    }
}
