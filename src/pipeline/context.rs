//! Per-run aggregate of extracted records and the run log.
//!
//! Created fresh for every processing run and passed explicitly (`&mut`) to each
//! component. Data slots are written only by the extraction engine; both engines
//! append to the log. Nothing survives the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::schema::{ServiceData, SpeedTestData, VideoTestData, VoiceCallData};
use super::sector::{Sector, SectorTable};

// ──────────────────────────────────────────────
// Run log
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {:<5} {}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.level.label(),
            self.message
        )
    }
}

/// Append-only, timestamped record of everything a run did.
///
/// Every entry is mirrored to `tracing` under the `run` target.
#[derive(Debug, Default)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "run", "{message}");
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "run", "{message}");
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(target: "run", "{message}");
        self.push(LogLevel::Error, message);
    }

    fn push(&mut self, level: LogLevel, message: String) {
        self.entries.push(LogEntry {
            at: Local::now(),
            level,
            message,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// True if any entry at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    /// One line per entry.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ──────────────────────────────────────────────
// RunContext
// ──────────────────────────────────────────────

/// Derived averages: `average[<sector>][<field>]`.
pub type AverageTable = BTreeMap<String, BTreeMap<String, Option<f64>>>;

#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    working_dir: PathBuf,
    service: SectorTable<Option<ServiceData>>,
    speed_tests: SectorTable<IndexMap<String, SpeedTestData>>,
    video_tests: SectorTable<IndexMap<String, VideoTestData>>,
    voice_tests: IndexMap<String, VoiceCallData>,
    averages: AverageTable,
    pub log: RunLog,
}

impl RunContext {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            working_dir: working_dir.to_path_buf(),
            service: SectorTable::default(),
            speed_tests: SectorTable::default(),
            video_tests: SectorTable::default(),
            voice_tests: IndexMap::new(),
            averages: AverageTable::new(),
            log: RunLog::default(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn service(&self, sector: Sector) -> Option<&ServiceData> {
        self.service[sector].as_ref()
    }

    pub fn set_service(&mut self, sector: Sector, data: ServiceData) {
        self.service[sector] = Some(data);
    }

    pub fn speed_tests(&self, sector: Sector) -> &IndexMap<String, SpeedTestData> {
        &self.speed_tests[sector]
    }

    pub fn insert_speed_test(&mut self, sector: Sector, image_id: &str, data: SpeedTestData) {
        self.speed_tests[sector].insert(image_id.to_string(), data);
    }

    pub fn video_tests(&self, sector: Sector) -> &IndexMap<String, VideoTestData> {
        &self.video_tests[sector]
    }

    pub fn insert_video_test(&mut self, sector: Sector, image_id: &str, data: VideoTestData) {
        self.video_tests[sector].insert(image_id.to_string(), data);
    }

    pub fn voice_tests(&self) -> &IndexMap<String, VoiceCallData> {
        &self.voice_tests
    }

    pub fn insert_voice_test(&mut self, image_id: &str, data: VoiceCallData) {
        self.voice_tests.insert(image_id.to_string(), data);
    }

    pub fn averages(&self) -> &AverageTable {
        &self.averages
    }

    /// Number of records currently held (service + speed + video + voice).
    pub fn record_count(&self) -> usize {
        let service = self.service.iter().filter(|(_, s)| s.is_some()).count();
        let speed: usize = self.speed_tests.iter().map(|(_, m)| m.len()).sum();
        let video: usize = self.video_tests.iter().map(|(_, m)| m.len()).sum();
        service + speed + video + self.voice_tests.len()
    }

    /// Recompute per-sector averages over observed (non-null) values only.
    pub fn compute_averages(&mut self) {
        let mut table = AverageTable::new();
        for sector in Sector::ALL {
            let speeds = &self.speed_tests[sector];
            let videos = &self.video_tests[sector];
            let mut row = BTreeMap::new();
            row.insert(
                "download_mbps".into(),
                mean(speeds.values().filter_map(|s| s.download_mbps)),
            );
            row.insert(
                "upload_mbps".into(),
                mean(speeds.values().filter_map(|s| s.upload_mbps)),
            );
            row.insert("ping_ms".into(), mean(speeds.values().filter_map(|s| s.ping_ms)));
            row.insert(
                "jitter_ms".into(),
                mean(speeds.values().filter_map(|s| s.jitter_ms)),
            );
            row.insert(
                "load_time_ms".into(),
                mean(videos.values().filter_map(|v| v.load_time_ms)),
            );
            row.insert(
                "buffering_percentage".into(),
                mean(videos.values().filter_map(|v| v.buffering_percentage)),
            );
            table.insert(sector.as_str().to_string(), row);
        }
        self.averages = table;
    }

    /// Structured view used for expression resolution.
    ///
    /// Top-level names: `{sector}_service`, `{sector}_speedtest`,
    /// `{sector}_video`, `voice_test`, `average`. An absent service record is
    /// `null`.
    pub fn snapshot(&self) -> Value {
        let mut root = Map::new();
        for sector in Sector::ALL {
            root.insert(
                format!("{sector}_service"),
                to_value(&self.service[sector]),
            );
        }
        for sector in Sector::ALL {
            root.insert(
                format!("{sector}_speedtest"),
                to_value(&self.speed_tests[sector]),
            );
        }
        for sector in Sector::ALL {
            root.insert(format!("{sector}_video"), to_value(&self.video_tests[sector]));
        }
        root.insert("voice_test".into(), to_value(&self.voice_tests));
        root.insert("average".into(), to_value(&self.averages));
        Value::Object(root)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
