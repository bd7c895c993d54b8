pub mod config;
pub mod errors;
pub mod interrupt;
pub mod logging;
pub mod provenance;
pub mod refresh;
pub mod runtime;
pub mod snapshot;
pub mod tool;
pub mod types;

use clap::{error::ErrorKind, Parser};
use config::{absolutize, lexical_normalize, load_config, CliOverrides};
use errors::RefreshError;
use logging::{append_run_log, clear_run_logger, init_run_logger, JsonlLogger};
use refresh::refresh_recording;
use runtime::ProductionRuntime;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "update-recording")]
#[command(version)]
#[command(about = "Update recording data relative to a specific path")]
pub struct Cli {
    /// Where to make recording relative to
    pub scratch_dir: PathBuf,
    /// code-map checkout to refresh (defaults to the one this tool is built in)
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// TOML file overriding layout, snapshot and logging settings
    #[arg(long)]
    pub layout: Option<PathBuf>,
}

pub fn run() -> Result<i32, RefreshError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| RefreshError::Io(e.to_string()))?;
    let interrupt = interrupt::install_interrupt_handler()?;
    let runtime = ProductionRuntime::with_interrupt(interrupt);
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, RefreshError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(RefreshError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        project_root: cli.project_root.clone(),
        layout_path: cli.layout.clone(),
    };
    let (cfg, layout) = load_config(&overrides, cwd)?;

    let mut logger = JsonlLogger::new(absolutize(&layout.project_root, &cfg.logging.path));
    logger.max_payload_bytes = cfg.logging.max_payload_bytes;
    logger.budget_bytes = cfg.logging.budget_bytes;
    init_run_logger(logger);

    let scratch_dir = lexical_normalize(&absolutize(cwd, &cli.scratch_dir));
    let result = refresh_recording(
        runtime.process_runner.as_ref(),
        &layout,
        &cfg.snapshot,
        &scratch_dir,
    );
    if let Err(error) = &result {
        append_run_log(
            "error",
            "refresh.failed",
            json!({
                "scratch_dir": scratch_dir.display().to_string(),
                "error": error.to_string()
            }),
        );
    }
    clear_run_logger();
    result.map(|_| 0)
}
