//! Run diagnostic dump: writes raw stage outputs to disk.
//!
//! Disabled unless `FIELDSHEET_DUMP_DIR` is set (or a directory is configured).
//!
//! **Output structure**:
//! ```text
//! {dump_dir}/{run_id}/
//!   alpha_service-vision-1.txt
//!   alpha_service-merged.txt
//!   alpha_service-reasoning.txt
//!   alpha_image_4-vision.txt
//!   alpha_image_4-ocr.txt
//!   alpha_image_4-reasoning.txt
//!   snapshot.json
//!   run.log
//! ```

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Environment variable that enables the dump.
pub const DUMP_DIR_ENV: &str = "FIELDSHEET_DUMP_DIR";

// ──────────────────────────────────────────────
// Dump directory resolution
// ──────────────────────────────────────────────

/// Resolve the base dump directory.
///
/// Priority:
/// 1. `FIELDSHEET_DUMP_DIR` env var
/// 2. `configured` (from the config file)
/// 3. `None` (disabled)
pub fn resolve_base_dir(configured: Option<&Path>) -> Option<PathBuf> {
    match std::env::var(DUMP_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Some(PathBuf::from(dir)),
        _ => configured.map(Path::to_path_buf),
    }
}

/// Returns the dump directory for a run under `base`.
///
/// Creates the directory tree. Returns `None` (with a warning) if directory
/// creation fails; never blocks the pipeline.
pub fn dump_dir_for(base: &Path, run_id: &Uuid) -> Option<PathBuf> {
    let dir = base.join(run_id.to_string());

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Diagnostic dump: failed to create directory"
        );
        return None;
    }

    Some(dir)
}

/// File name for one stage output of one image (or sector pair).
pub fn stage_file(image_id: &str, stage: &str) -> String {
    format!("{image_id}-{stage}.txt")
}

/// Write one artifact under `dir`. Failures are traced and swallowed.
pub fn dump(dir: &Path, filename: &str, contents: impl AsRef<[u8]>) {
    let path = dir.join(filename);
    let contents = contents.as_ref();
    match std::fs::write(&path, contents) {
        Ok(()) => tracing::debug!(path = %path.display(), bytes = contents.len(), "Dump written"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Dump skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_dir_for_creates_run_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let dir = dump_dir_for(tmp.path(), &run_id).unwrap();

        assert!(dir.exists());
        assert!(dir.ends_with(run_id.to_string()));
    }

    #[test]
    fn stage_file_names_image_and_stage() {
        assert_eq!(stage_file("alpha_image_4", "ocr"), "alpha_image_4-ocr.txt");
    }

    #[test]
    fn configured_dir_used_when_env_unset() {
        if std::env::var(DUMP_DIR_ENV).is_ok() {
            return;
        }
        assert_eq!(resolve_base_dir(None), None);
        assert_eq!(
            resolve_base_dir(Some(Path::new("/tmp/dumps"))),
            Some(PathBuf::from("/tmp/dumps"))
        );
    }

    #[test]
    fn dump_writes_contents_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        dump(tmp.path(), "raw.txt", "Download 412.7 Mbps");

        let content = std::fs::read_to_string(tmp.path().join("raw.txt")).unwrap();
        assert_eq!(content, "Download 412.7 Mbps");
    }

    #[test]
    fn dump_into_missing_directory_is_ignored() {
        let dir = Path::new("/nonexistent/fieldsheet/dump");
        dump(dir, "run.log", "data");
        assert!(!dir.exists());
    }
}
