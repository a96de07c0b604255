//! Typed record definitions for each screenshot category.
//!
//! Every field is optional: a record is either absent (extraction failed) or
//! present with a mix of observed and `None` fields. The field tables double as
//! the machine-readable contract embedded in reasoning prompts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::mapping::normalize_key;

// ──────────────────────────────────────────────
// Categories & field specs
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Service,
    SpeedTest,
    VideoTest,
    VoiceCall,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::SpeedTest => "speed_test",
            Self::VideoTest => "video_test",
            Self::VoiceCall => "voice_call",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

const fn number(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Number,
        description,
    }
}

const fn text(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text,
        description,
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("field '{field}' expected {expected}, found {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("record shape mismatch: {0}")]
    Shape(String),
}

// ──────────────────────────────────────────────
// Record trait
// ──────────────────────────────────────────────

/// A schema category. Validation is generic over the field table.
pub trait Record: Sized + Clone + Serialize + DeserializeOwned {
    const CATEGORY: Category;
    const FIELDS: &'static [FieldSpec];

    /// Validate an untyped JSON value into this record.
    ///
    /// Missing or `null` keys become `None`. Numeric fields accept numbers or
    /// numeric strings; text fields accept strings. Anything else rejects the
    /// whole record.
    fn validate(value: &Value) -> Result<Self, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject(json_type(value)))?;

        let mut normalized = Map::new();
        for spec in Self::FIELDS {
            let raw = lookup_field(object, spec.name).unwrap_or(&Value::Null);
            normalized.insert(spec.name.to_string(), coerce(spec, raw)?);
        }

        serde_json::from_value(Value::Object(normalized))
            .map_err(|e| ValidationError::Shape(e.to_string()))
    }

    /// Names of fields that were not observed.
    fn null_fields(&self) -> Vec<&'static str> {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        Self::FIELDS
            .iter()
            .filter(|spec| value.get(spec.name).map_or(true, Value::is_null))
            .map(|spec| spec.name)
            .collect()
    }

    /// Property map for prompts: `{field: {"type": [...], "description": ...}}`.
    fn schema_json() -> Value {
        let properties: Map<String, Value> = Self::FIELDS
            .iter()
            .map(|spec| {
                let ty = match spec.kind {
                    FieldKind::Number => "number",
                    FieldKind::Text => "string",
                };
                (
                    spec.name.to_string(),
                    serde_json::json!({
                        "type": [ty, "null"],
                        "description": spec.description,
                    }),
                )
            })
            .collect();
        Value::Object(properties)
    }
}

/// Exact key first, then a normalized match ("Download Mbps" → download_mbps).
fn lookup_field<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).or_else(|| {
        let wanted = normalize_key(name);
        object
            .iter()
            .find(|(key, _)| normalize_key(key) == wanted)
            .map(|(_, value)| value)
    })
}

fn coerce(spec: &FieldSpec, raw: &Value) -> Result<Value, ValidationError> {
    let wrong = |expected: &'static str| ValidationError::WrongType {
        field: spec.name,
        expected,
        found: json_type(raw).to_string(),
    };

    match (spec.kind, raw) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldKind::Number, Value::Number(n)) => match n.as_f64() {
            Some(f) if f.is_finite() => Ok(raw.clone()),
            _ => Err(wrong("a finite number")),
        },
        (FieldKind::Number, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| wrong("a number"))
        }
        (FieldKind::Number, _) => Err(wrong("a number")),
        (FieldKind::Text, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::String(trimmed.to_string()))
            }
        }
        (FieldKind::Text, _) => Err(wrong("a string")),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ──────────────────────────────────────────────
// Categories
// ──────────────────────────────────────────────

/// 5G-NR and 4G-LTE radio parameters from the two service-mode screenshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceData {
    pub nr_arfcn: Option<f64>,
    pub nr_band: Option<f64>,
    pub nr_pci: Option<f64>,
    pub nr_bw: Option<f64>,
    pub nr5g_rsrp: Option<f64>,
    pub nr5g_rsrq: Option<f64>,
    pub nr5g_sinr: Option<f64>,
    pub lte_band: Option<f64>,
    pub lte_earfcn: Option<f64>,
    pub lte_pci: Option<f64>,
    pub lte_bw: Option<f64>,
    pub lte_rsrp: Option<f64>,
    pub lte_rsrq: Option<f64>,
    pub lte_sinr: Option<f64>,
}

impl Record for ServiceData {
    const CATEGORY: Category = Category::Service;
    const FIELDS: &'static [FieldSpec] = &[
        number("nr_arfcn", "5G NR absolute radio frequency channel number (NR-ARFCN)"),
        number("nr_band", "5G NR band number, digits only (n78 -> 78)"),
        number("nr_pci", "5G NR physical cell id"),
        number("nr_bw", "5G NR channel bandwidth in MHz"),
        number("nr5g_rsrp", "5G NR reference signal received power in dBm (negative)"),
        number("nr5g_rsrq", "5G NR reference signal received quality in dB (negative)"),
        number("nr5g_sinr", "5G NR signal to interference plus noise ratio in dB"),
        number("lte_band", "LTE band number, digits only (B3 -> 3)"),
        number("lte_earfcn", "LTE E-UTRA absolute radio frequency channel number (EARFCN)"),
        number("lte_pci", "LTE physical cell id"),
        number("lte_bw", "LTE channel bandwidth in MHz"),
        number("lte_rsrp", "LTE reference signal received power in dBm (negative)"),
        number("lte_rsrq", "LTE reference signal received quality in dB (negative)"),
        number("lte_sinr", "LTE signal to interference plus noise ratio in dB"),
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestData {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
}

impl Record for SpeedTestData {
    const CATEGORY: Category = Category::SpeedTest;
    const FIELDS: &'static [FieldSpec] = &[
        number("download_mbps", "download throughput in Mbps"),
        number("upload_mbps", "upload throughput in Mbps"),
        number("ping_ms", "ping / latency in milliseconds"),
        number("jitter_ms", "jitter in milliseconds"),
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoTestData {
    pub max_resolution: Option<String>,
    pub load_time_ms: Option<f64>,
    pub buffering_percentage: Option<f64>,
}

impl Record for VideoTestData {
    const CATEGORY: Category = Category::VideoTest;
    const FIELDS: &'static [FieldSpec] = &[
        text("max_resolution", "highest resolution reached, e.g. \"1080p\" or \"4K\""),
        number("load_time_ms", "initial load / start-up time in milliseconds"),
        number("buffering_percentage", "share of playback spent buffering, in percent"),
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceCallData {
    pub phone_number: Option<String>,
    pub call_duration_seconds: Option<f64>,
    pub call_status: Option<String>,
    pub time: Option<String>,
}

impl Record for VoiceCallData {
    const CATEGORY: Category = Category::VoiceCall;
    const FIELDS: &'static [FieldSpec] = &[
        text("phone_number", "dialled or displayed phone number exactly as shown"),
        number("call_duration_seconds", "call duration in seconds (\"1:30\" -> 90)"),
        text("call_status", "call state as shown, e.g. \"Connected\", \"Ended\", \"Failed\""),
        text("time", "clock time or timestamp shown for the call"),
    ];
}
