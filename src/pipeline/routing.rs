//! Deterministic image routing.
//!
//! An image identifier (`{sector}_image_{n}`) fully determines which pipeline
//! handles the image. Classification never looks at pixels, so a whole run can be
//! planned and tested without a single model call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::context::RunLog;
use super::sector::{Sector, SectorTable};

/// Separator between origin and sequence number in an image identifier.
pub const IMAGE_DELIMITER: &str = "_image_";

// ──────────────────────────────────────────────
// Identifier parsing
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    Sector(Sector),
    VoiceTest,
    Unknown,
}

impl ImageOrigin {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "voicetest" => Some(Self::VoiceTest),
            "unknown" => Some(Self::Unknown),
            other => Sector::parse(other).map(Self::Sector),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sector(sector) => sector.as_str(),
            Self::VoiceTest => "voicetest",
            Self::Unknown => "unknown",
        }
    }
}

/// Parsed `{origin}_image_{suffix}` identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageId {
    pub origin: ImageOrigin,
    pub suffix: u32,
}

impl ImageId {
    /// Split at the last delimiter; both halves must be well formed.
    pub fn parse(identifier: &str) -> Option<Self> {
        let (origin, suffix) = identifier.rsplit_once(IMAGE_DELIMITER)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            origin: ImageOrigin::parse(origin)?,
            suffix: suffix.parse().ok()?,
        })
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{IMAGE_DELIMITER}{}", self.origin.as_str(), self.suffix)
    }
}

// ──────────────────────────────────────────────
// Classification
// ──────────────────────────────────────────────

/// Position of an image inside its sector's service pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSlot {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unparsable,
    UnknownSector,
    UnmatchedSuffix(u32),
    Duplicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unparsable => f.write_str("identifier does not match {sector}_image_{n}"),
            Self::UnknownSector => f.write_str("image is not anchored in any sector"),
            Self::UnmatchedSuffix(n) => write!(f, "no pipeline handles image number {n}"),
            Self::Duplicate => f.write_str("identifier already routed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Service { sector: Sector, slot: PairSlot },
    SpeedTest(Sector),
    VideoTest(Sector),
    Voice,
    Skip(SkipReason),
}

/// Pure routing decision for one identifier (file stem).
pub fn classify(identifier: &str) -> Route {
    let Some(id) = ImageId::parse(identifier) else {
        return Route::Skip(SkipReason::Unparsable);
    };
    let sector = match id.origin {
        ImageOrigin::VoiceTest => return Route::Voice,
        ImageOrigin::Unknown => return Route::Skip(SkipReason::UnknownSector),
        ImageOrigin::Sector(sector) => sector,
    };
    match id.suffix {
        1 => Route::Service {
            sector,
            slot: PairSlot::First,
        },
        2 => Route::Service {
            sector,
            slot: PairSlot::Second,
        },
        3..=7 => Route::SpeedTest(sector),
        8 => Route::VideoTest(sector),
        other => Route::Skip(SkipReason::UnmatchedSuffix(other)),
    }
}

// ──────────────────────────────────────────────
// Dispatch plan
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RoutedImage {
    pub id: String,
    pub path: PathBuf,
}

/// Both service screenshots of one sector; at least one side is present.
#[derive(Debug, Clone, PartialEq)]
pub struct ServicePair {
    pub sector: Sector,
    pub first: Option<RoutedImage>,
    pub second: Option<RoutedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleKind {
    SpeedTest(Sector),
    VideoTest(Sector),
    Voice,
}

impl SingleKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SpeedTest(_) => "speed test",
            Self::VideoTest(_) => "video test",
            Self::Voice => "voice call",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleTask {
    pub kind: SingleKind,
    pub image: RoutedImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub identifier: String,
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Default, PartialEq)]
pub struct DispatchPlan {
    /// Service pairs in sector order.
    pub service: Vec<ServicePair>,
    /// Speed/video/voice tasks in input order.
    pub singles: Vec<SingleTask>,
    pub skipped: Vec<Skipped>,
}

impl DispatchPlan {
    /// Images accounted for by the plan (routed or skipped).
    pub fn image_count(&self) -> usize {
        let paired: usize = self
            .service
            .iter()
            .map(|p| usize::from(p.first.is_some()) + usize::from(p.second.is_some()))
            .sum();
        paired + self.singles.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.service.is_empty() && self.singles.is_empty()
    }
}

fn identifier_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Route every image to exactly one outcome. Skips are logged as warnings.
pub fn route(images: &[PathBuf], log: &mut RunLog) -> DispatchPlan {
    let mut plan = DispatchPlan::default();
    let mut pairs: SectorTable<[Option<RoutedImage>; 2]> = SectorTable::default();
    let mut seen = HashSet::new();

    for path in images {
        let identifier = identifier_of(path);
        let route = if seen.insert(identifier.clone()) {
            classify(&identifier)
        } else {
            Route::Skip(SkipReason::Duplicate)
        };
        let image = RoutedImage {
            id: identifier.clone(),
            path: path.clone(),
        };

        match route {
            Route::Service { sector, slot } => {
                let index = match slot {
                    PairSlot::First => 0,
                    PairSlot::Second => 1,
                };
                log.info(format!("Routed {identifier} -> {sector} service"));
                pairs[sector][index] = Some(image);
            }
            Route::SpeedTest(sector) => push_single(&mut plan, log, SingleKind::SpeedTest(sector), image),
            Route::VideoTest(sector) => push_single(&mut plan, log, SingleKind::VideoTest(sector), image),
            Route::Voice => push_single(&mut plan, log, SingleKind::Voice, image),
            Route::Skip(reason) => {
                log.warn(format!("Skipping {}: {reason}", path.display()));
                plan.skipped.push(Skipped {
                    identifier,
                    path: path.clone(),
                    reason,
                });
            }
        }
    }

    for sector in Sector::ALL {
        let [first, second] = std::mem::take(&mut pairs[sector]);
        if first.is_none() && second.is_none() {
            continue;
        }
        if first.is_none() || second.is_none() {
            log.warn(format!("{sector} service pair is incomplete; merging the available screenshot"));
        }
        plan.service.push(ServicePair {
            sector,
            first,
            second,
        });
    }

    log.info(format!(
        "Routing complete: {} service pair(s), {} single image(s), {} skipped",
        plan.service.len(),
        plan.singles.len(),
        plan.skipped.len()
    ));
    plan
}

fn push_single(plan: &mut DispatchPlan, log: &mut RunLog, kind: SingleKind, image: RoutedImage) {
    log.info(format!("Routed {} -> {}", image.id, kind.label()));
    plan.singles.push(SingleTask { kind, image });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::LogLevel;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| PathBuf::from(format!("/work/images/{n}.png")))
            .collect()
    }

    #[test]
    fn classify_examples() {
        assert_eq!(classify("alpha_image_4"), Route::SpeedTest(Sector::Alpha));
        assert_eq!(classify("gamma_image_8"), Route::VideoTest(Sector::Gamma));
        assert_eq!(classify("voicetest_image_1"), Route::Voice);
        assert_eq!(
            classify("beta_image_9"),
            Route::Skip(SkipReason::UnmatchedSuffix(9))
        );
        assert_eq!(classify("weird_name"), Route::Skip(SkipReason::Unparsable));
    }

    #[test]
    fn service_slots_by_suffix() {
        assert_eq!(
            classify("beta_image_1"),
            Route::Service {
                sector: Sector::Beta,
                slot: PairSlot::First
            }
        );
        assert_eq!(
            classify("beta_image_2"),
            Route::Service {
                sector: Sector::Beta,
                slot: PairSlot::Second
            }
        );
        for n in 3..=7 {
            assert_eq!(classify(&format!("gamma_image_{n}")), Route::SpeedTest(Sector::Gamma));
        }
    }

    #[test]
    fn voicetest_wins_regardless_of_suffix() {
        assert_eq!(classify("voicetest_image_8"), Route::Voice);
        assert_eq!(classify("voicetest_image_42"), Route::Voice);
    }

    #[test]
    fn malformed_identifiers_are_unparsable() {
        for bad in [
            "",
            "alpha_image_",
            "alpha_image_x",
            "alpha_image_-1",
            "delta_image_3",
            "Alpha_image_3",
            "alpha-image-3",
        ] {
            assert_eq!(classify(bad), Route::Skip(SkipReason::Unparsable), "{bad}");
        }
    }

    #[test]
    fn unknown_sector_is_skipped() {
        assert_eq!(classify("unknown_image_3"), Route::Skip(SkipReason::UnknownSector));
    }

    #[test]
    fn identifier_round_trips_through_display() {
        let id = ImageId::parse("voicetest_image_12").unwrap();
        assert_eq!(id.origin, ImageOrigin::VoiceTest);
        assert_eq!(id.to_string(), "voicetest_image_12");
    }

    #[test]
    fn every_image_gets_exactly_one_outcome() {
        let input = paths(&[
            "gamma_image_1",
            "alpha_image_3",
            "alpha_image_2",
            "voicetest_image_1",
            "alpha_image_1",
            "beta_image_9",
            "weird_name",
            "beta_image_8",
            "alpha_image_3",
        ]);
        let mut log = RunLog::default();
        let plan = route(&input, &mut log);

        assert_eq!(plan.image_count(), input.len());
        let sectors: Vec<Sector> = plan.service.iter().map(|p| p.sector).collect();
        assert_eq!(sectors, vec![Sector::Alpha, Sector::Gamma]);
        assert!(plan.service[0].first.is_some() && plan.service[0].second.is_some());
        assert!(plan.service[1].second.is_none());

        let singles: Vec<&str> = plan.singles.iter().map(|t| t.image.id.as_str()).collect();
        assert_eq!(singles, vec!["alpha_image_3", "voicetest_image_1", "beta_image_8"]);

        let reasons: Vec<SkipReason> = plan.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::UnmatchedSuffix(9),
                SkipReason::Unparsable,
                SkipReason::Duplicate
            ]
        );
    }

    #[test]
    fn skips_are_observable_in_the_log() {
        let mut log = RunLog::default();
        route(&paths(&["beta_image_9", "weird_name"]), &mut log);
        assert!(log.contains(LogLevel::Warn, "beta_image_9"));
        assert!(log.contains(LogLevel::Warn, "weird_name"));
    }

    #[test]
    fn routing_is_deterministic() {
        let input = paths(&["beta_image_1", "beta_image_5", "voicetest_image_2"]);
        let a = route(&input, &mut RunLog::default());
        let b = route(&input, &mut RunLog::default());
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
