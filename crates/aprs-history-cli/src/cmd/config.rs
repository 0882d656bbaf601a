//! `aprs-history config`: show the effective configuration.

use std::path::Path;

use anyhow::Result;
use aprs_history_core::config::Settings;
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, render};

/// Arguments for `aprs-history config`.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Debug, Serialize)]
struct EffectiveConfig<'a> {
    source: String,
    file_found: bool,
    settings: &'a Settings,
}

/// Execute `aprs-history config`.
///
/// JSON output wraps the settings with where they came from; the other
/// modes print YAML that can be saved as a starting configuration file.
pub fn run_config(
    _args: &ConfigArgs,
    config_path: &Path,
    settings: &Settings,
    output: OutputMode,
) -> Result<()> {
    let payload = EffectiveConfig {
        source: config_path.display().to_string(),
        file_found: config_path.exists(),
        settings,
    };
    let yaml = settings.to_yaml()?;

    render(output, &payload, |payload, w| {
        if !payload.file_found {
            writeln!(w, "# {} not found, showing defaults", payload.source)?;
        }
        w.write_all(yaml.as_bytes())
    })
}
