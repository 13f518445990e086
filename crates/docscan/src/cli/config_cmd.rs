//! `config` subcommand: show the pipeline configuration and its file path,
//! optionally writing it out.

use std::path::Path;

use serde::Serialize;

use super::{
    PipelineConfig, Result, ScanError, kv, kv_indent, kv_width, load_config, print_json,
};

#[derive(Serialize)]
struct ConfigOutput {
    config_file: Option<String>,
    config_file_exists: bool,
    settings: PipelineConfig,
}

pub(super) fn cmd_config(json: bool, save: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = load_config(custom_path)?;
    let config_path = custom_path
        .map(|p| p.to_path_buf())
        .or_else(PipelineConfig::path);

    if save {
        let Some(path) = &config_path else {
            return Err(ScanError::Config("no config directory to save to".into()));
        };
        config.save_to(path)?;
        log::info!("saved config to {}", path.display());
    }
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());

    if json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
        });
    }

    let w = kv_width(
        &["Config file:"],
        &[
            "buffers:",
            "buffer_size:",
            "queued_reads:",
            "retry_budget:",
            "retry_delay_ms:",
            "poll_interval_us:",
            "complain_on_adf_error:",
            "complain_on_fsu_error:",
            "mode:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    let model_default = |v: Option<String>| v.unwrap_or_else(|| "(model default)".to_string());
    println!("Settings:");
    kv_indent("buffers:", model_default(config.buffers.map(|v| v.to_string())), w);
    kv_indent(
        "buffer_size:",
        model_default(config.buffer_size.map(|v| v.to_string())),
        w,
    );
    kv_indent(
        "queued_reads:",
        model_default(config.queued_reads.map(|v| v.to_string())),
        w,
    );
    kv_indent(
        "retry_budget:",
        model_default(config.retry_budget.map(|v| v.to_string())),
        w,
    );
    kv_indent(
        "retry_delay_ms:",
        model_default(config.retry_delay_ms.map(|v| v.to_string())),
        w,
    );
    kv_indent("poll_interval_us:", config.poll_interval_us, w);
    kv_indent(
        "complain_on_adf_error:",
        model_default(config.complain_on_adf_error.map(|v| v.to_string())),
        w,
    );
    kv_indent(
        "complain_on_fsu_error:",
        model_default(config.complain_on_fsu_error.map(|v| v.to_string())),
        w,
    );
    kv_indent("mode:", config.mode, w);
    Ok(())
}
