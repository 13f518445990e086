//! CLI subcommands: model table, sense lookup, config, simulated and real scans.

mod config_cmd;
mod models;
#[cfg(target_os = "linux")]
mod scan;
mod sense;
mod simulate;

use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::sync::atomic::Ordering;

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::{ACTIVE_SCAN, RUNNING};
pub(super) use docscan_lib::config::{AcquisitionMode, PipelineConfig};
pub(super) use docscan_lib::error::{Result, ScanError};
pub(super) use docscan_lib::models::{self as model_table, ModelProfile};
pub(super) use docscan_lib::{DeviceOutcome, ItemShape, ReadStatus, ScanConfig, Scanner};

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{key:<width$}{value}", width = w);
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ScanError::Config(format!("JSON output: {e}")))?;
    println!("{text}");
    Ok(())
}

/// Load the pipeline config from `custom_path` or the platform default,
/// logging parse warnings and rejecting invalid values.
pub(super) fn load_config(custom_path: Option<&Path>) -> Result<PipelineConfig> {
    let (config, warnings) = match custom_path {
        Some(p) => PipelineConfig::load_from(p),
        None => PipelineConfig::load_with_warnings(),
    };
    for w in &warnings {
        log::warn!("{w}");
    }
    if let Err(errors) = config.validate() {
        let msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ScanError::Config(msg));
    }
    Ok(config)
}

pub(super) fn lookup_model(name: &str) -> Result<&'static ModelProfile> {
    model_table::find_model(name).ok_or_else(|| {
        let known = model_table::MODELS
            .iter()
            .map(|m| m.name)
            .collect::<Vec<_>>()
            .join(", ");
        ScanError::Config(format!("unknown model \"{name}\" (known: {known})"))
    })
}

// ── Acquisition ──

#[derive(Serialize)]
pub(super) struct ItemReport {
    pub index: usize,
    pub item: String,
    pub shape: ItemShape,
    pub bytes: u64,
    pub file: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ScanOutput {
    pub model: String,
    pub device: String,
    pub complete: bool,
    pub items: Vec<ItemReport>,
}

/// File name for item `index`: "03-front-section-1.raw".
fn item_file_name(index: usize, item: &str, shape: &ItemShape) -> String {
    let slug: String = item
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let ext = match shape.format {
        docscan_lib::FrameFormat::Text => "xml",
        _ => "raw",
    };
    format!("{index:02}-{slug}.{ext}")
}

/// Run one batch to completion, writing each item to `out_dir` when given.
///
/// Ctrl+C cancels the batch; the `Cancelled` outcome is returned as an error.
pub(super) fn acquire(
    scanner: &mut Scanner,
    job: ScanConfig,
    chunk: usize,
    out_dir: Option<&Path>,
) -> Result<Vec<ItemReport>> {
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)?;
    }
    scanner.start_batch(job)?;
    *ACTIVE_SCAN.lock().unwrap_or_else(PoisonError::into_inner) = Some(scanner.cancel_handle());

    let mut reports = Vec::new();
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        let shape = scanner.get_current_item_shape()?;
        let item = scanner
            .current_item()
            .map(|i| i.to_string())
            .unwrap_or_default();
        let index = reports.len();
        let path: Option<PathBuf> =
            out_dir.map(|d| d.join(item_file_name(index, &item, &shape)));
        let mut data = Vec::new();
        log::info!("reading {item}: {shape:?}");

        let status = loop {
            if !RUNNING.load(Ordering::SeqCst) {
                scanner.cancel();
            }
            let (n, status) = scanner.read(&mut buf)?;
            data.extend_from_slice(&buf[..n]);
            if status != ReadStatus::Good {
                break status;
            }
        };

        if let Some(p) = &path {
            std::fs::write(p, &data)?;
        }
        reports.push(ItemReport {
            index,
            item,
            shape,
            bytes: data.len() as u64,
            file: path.map(|p| p.display().to_string()),
        });
        if status == ReadStatus::EndOfBatch {
            return Ok(reports);
        }
    }
}

pub(super) fn print_reports(reports: &[ItemReport]) {
    let w = kv_width(&[], &["Shape:", "Bytes:", "File:"]);
    for r in reports {
        println!("[{}] {}", r.index + 1, r.item);
        let lines = r
            .shape
            .lines
            .map_or_else(|| "?".to_string(), |l| l.to_string());
        kv_indent(
            "Shape:",
            format_args!(
                "{:?} {}-bit, {} px x {} lines, {} bytes/line",
                r.shape.format,
                r.shape.depth,
                r.shape.pixels_per_line,
                lines,
                r.shape.bytes_per_line
            ),
            w,
        );
        kv_indent("Bytes:", r.bytes, w);
        if let Some(f) = &r.file {
            kv_indent("File:", f, w);
        }
    }
}

// ── Commands ──

#[derive(Subcommand)]
pub enum Command {
    /// List supported scanner models and their capabilities
    Models,

    /// Translate a sense key/ASC/ASCQ triple the way a model's driver does
    Sense {
        /// Model name (e.g. "JX-250")
        model: String,
        /// Sense key (hex, e.g. 0x03)
        #[arg(value_parser = parse_byte)]
        key: u8,
        /// Additional sense code (hex)
        #[arg(value_parser = parse_byte)]
        asc: u8,
        /// Additional sense code qualifier (hex)
        #[arg(value_parser = parse_byte)]
        ascq: u8,
        /// Set the end-of-medium bit
        #[arg(long)]
        eom: bool,
        /// Set the incorrect-length bit
        #[arg(long)]
        ili: bool,
        /// Treat feeder and film-unit conditions as warnings
        #[arg(long)]
        lenient: bool,
    },

    /// Show the pipeline configuration and file paths
    Config {
        /// Write the effective settings back to the config file
        #[arg(long)]
        save: bool,
    },

    /// Run a scan job against the simulated scanner
    Simulate {
        /// Scan job file (TOML)
        #[arg(long)]
        job: PathBuf,
        /// Model to simulate
        #[arg(long, default_value = "COPISCAN II 6338")]
        model: String,
        /// Directory to write each item to
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Bytes requested per read call
        #[arg(long, default_value_t = 32 * 1024)]
        chunk: usize,
        /// Producer placement: auto, inline or overlapped
        #[arg(long)]
        mode: Option<AcquisitionMode>,
        /// Page length used when the job leaves `lines` unset
        #[arg(long, default_value_t = 100)]
        lines: u32,
    },

    /// Scan from a SCSI generic device
    #[cfg(target_os = "linux")]
    Scan {
        /// SCSI generic device node (e.g. /dev/sg2)
        #[arg(long)]
        device: String,
        /// Model name; detected from INQUIRY when omitted
        #[arg(long)]
        model: Option<String>,
        /// Scan job file (TOML)
        #[arg(long)]
        job: PathBuf,
        /// Directory to write each item to
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Bytes requested per read call
        #[arg(long, default_value_t = 32 * 1024)]
        chunk: usize,
        /// Producer placement: auto, inline or overlapped
        #[arg(long)]
        mode: Option<AcquisitionMode>,
    },
}

fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let t = s.trim();
    let hex = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    u8::from_str_radix(hex, 16).map_err(|e| format!("invalid byte \"{s}\": {e}"))
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Models => models::cmd_models(json),
        Command::Sense {
            model,
            key,
            asc,
            ascq,
            eom,
            ili,
            lenient,
        } => sense::cmd_sense(
            &model,
            sense::Triple { key, asc, ascq },
            eom,
            ili,
            lenient,
            json,
        ),
        Command::Config { save } => config_cmd::cmd_config(json, save, config_path),
        Command::Simulate {
            job,
            model,
            out_dir,
            chunk,
            mode,
            lines,
        } => simulate::cmd_simulate(
            simulate::SimulateArgs {
                job: &job,
                model: &model,
                out_dir: out_dir.as_deref(),
                chunk,
                mode,
                default_lines: lines,
            },
            config_path,
            json,
        ),
        #[cfg(target_os = "linux")]
        Command::Scan {
            device,
            model,
            job,
            out_dir,
            chunk,
            mode,
        } => scan::cmd_scan(
            scan::ScanArgs {
                device: &device,
                model: model.as_deref(),
                job: &job,
                out_dir: out_dir.as_deref(),
                chunk,
                mode,
            },
            config_path,
            json,
        ),
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn kv_width_top_only() {
        let w = kv_width(&["Short:", "Longer key:"], &[]);
        assert_eq!(w, 13);
    }

    #[test]
    fn kv_width_indent_drives_width() {
        let w = kv_width(&["A:"], &["Very long indent key:"]);
        assert_eq!(w, 25);
    }

    #[test]
    fn parse_byte_accepts_prefixed_and_bare_hex() {
        assert_eq!(parse_byte("0x0B"), Ok(0x0B));
        assert_eq!(parse_byte("80"), Ok(0x80));
        assert_eq!(parse_byte("ff"), Ok(0xFF));
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("zz").is_err());
    }

    #[test]
    fn item_files_are_numbered_and_typed() {
        let text = ItemShape::text(10);
        assert_eq!(
            item_file_name(4, "transmit bar/patch codes", &text),
            "04-transmit-bar-patch-codes.xml"
        );
        let job = ScanConfig::default();
        let image = ItemShape::image(
            &job,
            docscan_lib::reshape::ReshapeMode::Identity,
            1728,
            None,
        );
        assert_eq!(item_file_name(0, "front page", &image), "00-front-page.raw");
    }
}

#[cfg(test)]
mod acquire_tests {
    use super::*;
    use docscan_lib::SimulatedScanner;
    use docscan_lib::protocol::READ_TYPE_FRONT;

    #[test]
    fn acquire_exposes_the_scanner_cancel_flag() {
        let sim = SimulatedScanner::new("COPISCAN II 6338");
        sim.set_stream(READ_TYPE_FRONT, 0, vec![3u8; 10]);
        let profile = lookup_model("COPISCAN II 6338").unwrap();
        let mut scanner = Scanner::new(Box::new(sim), profile, &PipelineConfig::default());

        let reports = acquire(&mut scanner, ScanConfig::default(), 64, None).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].bytes, 10);

        let flag = ACTIVE_SCAN
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap();
        assert!(!scanner.cancel_handle().is_requested());
        flag.request();
        assert!(scanner.cancel_handle().is_requested());
    }
}
