pub mod context; // Per-run records, averages and run log
pub mod diagnostic; // Stage output dump (FIELDSHEET_DUMP_DIR)
pub mod extraction;
pub mod mapping; // Marked-cell write-back
pub mod processor; // Run orchestration
pub mod routing;
pub mod schema;
pub mod sector;
pub mod transport; // Provider calls with timeout escalation
