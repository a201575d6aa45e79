use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use time::macros::format_description;

/// Start the file logger for one run:
/// `<log_dir>/<YYYY-MM-DD_HH-MM-SS>+<output file name>.log`.
pub fn init_file_logger(log_dir: &Path, output: &Path) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let out_file_name = output
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.json".to_string());
    let log_path = log_dir.join(format!("{timestamp}+{out_file_name}.log"));

    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("failed to create log file {}", log_path.display()))?;

    WriteLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new()
            .set_time_format_custom(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .build(),
        log_file,
    )
    .context("failed to initialise file logger")?;

    log::info!("Program started");
    Ok(log_path)
}

pub fn progress_bar(len: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
    )?);
    Ok(bar)
}
