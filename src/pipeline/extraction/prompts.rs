//! Prompt builders for the vision and reasoning stages.

use crate::pipeline::schema::{Category, Record};

// ──────────────────────────────────────────────
// Vision stage
// ──────────────────────────────────────────────

pub const VISION_SYSTEM_PROMPT: &str = "\
You are a specialist in cellular network field-test screenshots. \
You read values exactly as displayed. You never guess, estimate, or fill in values \
that are not visible on the screen.";

/// Service-mode screenshots are transcribed, not structured: the reasoning
/// stage merges both panels of a sector.
pub const SERVICE_VISION_PROMPT: &str = "\
This is a service-mode (engineering) screenshot from a phone on a 5G NR / LTE network.\n\
Transcribe every label and value you can see, one `label: value` pair per line, \
keeping units and signs exactly as shown. Include NR-ARFCN, NR band, PCI, bandwidth, \
SS-RSRP, SS-RSRQ, SS-SINR for the NR panel and EARFCN, band, PCI, bandwidth, RSRP, \
RSRQ, SINR for the LTE panel when present.\n\
Do not summarize and do not invent values that are not on screen.";

/// Plain OCR used on escalation: read everything, no schema bias.
pub const PLAIN_OCR_PROMPT: &str = "\
Read all visible text in this image exactly as shown, line by line, from top to bottom. \
Keep numbers, units, punctuation and signs. Do not interpret, summarize, or format the \
output as JSON.";

fn vocabulary(category: Category) -> &'static str {
    match category {
        Category::Service => "NR-ARFCN, EARFCN, band, PCI, bandwidth, RSRP, RSRQ, SINR",
        Category::SpeedTest => {
            "download and upload throughput (Mbps), ping / latency (ms), jitter (ms) \
             as shown by a speed-test app such as Ookla Speedtest or nPerf"
        }
        Category::VideoTest => {
            "video playback test results: maximum resolution reached (e.g. 1080p, 4K), \
             initial load or start-up time (ms), buffering or stall percentage"
        }
        Category::VoiceCall => {
            "a phone call screen or call log: dialled number, call duration, \
             call state (connected, ended, failed, dropped), time of the call"
        }
    }
}

/// Category prompt for the first vision pass; asks for a JSON object directly so
/// the local fast path can accept it without a reasoning call.
pub fn vision_prompt<R: Record>() -> String {
    let keys: Vec<&str> = R::FIELDS.iter().map(|f| f.name).collect();
    format!(
        "This screenshot shows {vocabulary}.\n\
         Return exactly one JSON object with these keys: {keys}.\n\
         Numbers must be plain JSON numbers without units. \
         Use null for any value that is not visible.",
        vocabulary = vocabulary(R::CATEGORY),
        keys = keys.join(", "),
    )
}

// ──────────────────────────────────────────────
// Reasoning stage
// ──────────────────────────────────────────────

pub const REASONING_SYSTEM_PROMPT: &str = "\
You convert raw text read from cellular field-test screenshots into one JSON object. \
You output JSON only. You never invent values: a field that is not present in the text \
is null.";

fn category_rules(category: Category) -> &'static str {
    match category {
        Category::Service => {
            "- The text comes from two screenshots of the same sector; merge them into ONE record.\n\
             - NR fields come from the 5G / NR panel, LTE fields from the LTE / 4G panel.\n\
             - Band numbers are digits only: n78 -> 78, B3 -> 3.\n\
             - RSRP and RSRQ are negative values in dBm / dB.\n\
             - Bandwidth is in MHz."
        }
        Category::SpeedTest => {
            "- Strip units from numbers: \"412.7 Mbps\" -> 412.7.\n\
             - Convert Kbps to Mbps and Gbps to Mbps.\n\
             - ping_ms is the idle latency when several latencies are shown."
        }
        Category::VideoTest => {
            "- max_resolution is a string such as \"1080p\", \"720p\" or \"4K\".\n\
             - Convert seconds to milliseconds for load_time_ms: \"1.2 s\" -> 1200.\n\
             - buffering_percentage is a plain number: \"3%\" -> 3."
        }
        Category::VoiceCall => {
            "- Durations are seconds: \"1:30\" -> 90, \"01:02:03\" -> 3723.\n\
             - phone_number is copied exactly as shown, as a string.\n\
             - call_status is the state as shown, e.g. \"Connected\", \"Ended\", \"Failed\".\n\
             - time is the clock time or timestamp shown, as a string."
        }
    }
}

/// Reasoning prompt with the explicit schema and category rules.
pub fn reasoning_prompt<R: Record>(text: &str) -> String {
    let schema = serde_json::to_string_pretty(&R::schema_json()).unwrap_or_default();
    format!(
        "Category: {category}\n\n\
         SCHEMA (every key must be present, value or null):\n{schema}\n\n\
         RULES:\n{rules}\n\
         - Never invent values; use null when a value is not in the text.\n\n\
         <screenshot_text>\n{text}\n</screenshot_text>\n\n\
         Return exactly one JSON object matching the schema.",
        category = R::CATEGORY,
        rules = category_rules(R::CATEGORY),
    )
}

/// Labelled section header for one screenshot of a merged service pair.
pub fn screenshot_header(index: usize, image_id: Option<&str>) -> String {
    format!(
        "=== SCREENSHOT {index} ({}) ===",
        image_id.unwrap_or("missing")
    )
}
