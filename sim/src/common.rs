//! Common utility functions for the command line application.
//!
//! This module contains:
//! - Logger initialization. `main` calls it once the configuration is loaded, so the
//!   config's `logging` section applies unless `--log-level`/`--log-file` override it.
//!   The sweep logs one line per trial and algorithm (APE/RPE or the failure reason).
//! - Path validation for the reference trajectory, input bag and output directories

use std::error::Error;
use std::path::{Path, PathBuf};

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Validate that an input file exists.
///
/// # Errors
/// Returns an error if the path does not exist or is not a regular file.
pub fn validate_input_file(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input file '{}' does not exist.", input.display()).into());
    }
    if !input.is_file() {
        return Err(format!("Input path '{}' is not a file.", input.display()).into());
    }
    Ok(())
}

/// Validate an output directory, creating it if needed.
///
/// # Errors
/// Returns an error if the path exists but is not a directory, or if creation fails.
pub fn validate_output_dir(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.exists() && !output.is_dir() {
        return Err(format!("Output path '{}' is not a directory.", output.display()).into());
    }
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}
