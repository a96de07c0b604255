//! Command-line front end.
//!
//! Two commands:
//! 1. `process`: full run over one workbook
//! 2. `route`: dry-run routing of a directory of extracted images

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::pipeline::context::RunLog;
use crate::pipeline::diagnostic;
use crate::pipeline::processor::RunProcessor;
use crate::pipeline::routing::{self, DispatchPlan};
use crate::pipeline::transport::TransportClient;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

#[derive(Debug, Parser)]
#[command(name = "fieldsheet", version, about = "Fill a field-test report workbook from its embedded screenshots")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract, read and map every screenshot of a workbook.
    Process {
        /// Workbook (.xlsx) holding the screenshots and marked cells.
        input: PathBuf,
        /// Save to this path instead of overwriting the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Also write the run log to this file.
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Show how images named `{sector}_image_{n}` would be routed. No model calls.
    Route {
        dir: PathBuf,
    },
}

pub fn execute(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Process {
            input,
            output,
            config,
            log_file,
        } => process(&input, output.as_deref(), config.as_deref(), log_file.as_deref()),
        Command::Route { dir } => route(&dir),
    }
}

fn process(input: &Path, output: Option<&Path>, config: Option<&Path>, log_file: Option<&Path>) -> ExitCode {
    let config = match AppConfig::load(config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let providers = match config.providers() {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let client = match TransportClient::http(config.retry_policy()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let processor = RunProcessor::new(Arc::new(client), providers, config.pacing())
        .with_dump_base(diagnostic::resolve_base_dir(config.dump_dir.as_deref()));
    let outcome = processor.process(input, output);

    print!("{}", outcome.log.render());
    if let Some(path) = log_file {
        write_log(path, &outcome.log);
    }

    match outcome.result {
        Ok(report) => {
            println!(
                "Done: {} image(s), {} record(s), {}/{} marked cell(s) resolved -> {}",
                report.images,
                report.records,
                report.mapping.resolved,
                report.mapping.marked,
                report.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn write_log(path: &Path, log: &RunLog) {
    if let Err(e) = std::fs::write(path, log.render()) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to write run log");
    }
}

fn route(dir: &Path) -> ExitCode {
    let images = match list_images(dir) {
        Ok(images) => images,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", dir.display());
            return ExitCode::FAILURE;
        }
    };
    let mut log = RunLog::default();
    let plan = routing::route(&images, &mut log);
    print!("{}", describe_plan(&plan));
    ExitCode::SUCCESS
}

/// Image files directly under `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

pub fn describe_plan(plan: &DispatchPlan) -> String {
    let mut out = String::new();
    for pair in &plan.service {
        let slot = |image: Option<&routing::RoutedImage>| {
            image.map_or_else(|| "(missing)".to_string(), |i| i.id.clone())
        };
        out.push_str(&format!(
            "{}_service: {} + {}\n",
            pair.sector,
            slot(pair.first.as_ref()),
            slot(pair.second.as_ref())
        ));
    }
    for task in &plan.singles {
        out.push_str(&format!("{}: {}\n", task.image.id, task.kind.label()));
    }
    for skipped in &plan.skipped {
        out.push_str(&format!("{}: skipped ({})\n", skipped.identifier, skipped.reason));
    }
    out
}
