//! `scan` subcommand: acquire from a Linux SCSI generic device.

use std::path::Path;

use docscan_lib::transport::ScsiDevice;
use docscan_lib::transport::linux::SgDevice;

use super::{
    AcquisitionMode, Result, ScanConfig, ScanError, ScanOutput, Scanner, acquire, load_config,
    lookup_model, model_table, print_json, print_reports,
};

pub(super) struct ScanArgs<'a> {
    pub device: &'a str,
    pub model: Option<&'a str>,
    pub job: &'a Path,
    pub out_dir: Option<&'a Path>,
    pub chunk: usize,
    pub mode: Option<AcquisitionMode>,
}

pub(super) fn cmd_scan(args: ScanArgs<'_>, config_path: Option<&Path>, json: bool) -> Result<()> {
    let job = ScanConfig::load_from(args.job)?;
    let mut config = load_config(config_path)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    let dev = SgDevice::open(args.device)?;
    let info = dev.info().clone();
    let profile = match args.model {
        Some(name) => lookup_model(name)?,
        None => model_table::detect_model(&info.vendor, &info.product).ok_or_else(|| {
            ScanError::Config(format!(
                "{}: unsupported scanner \"{} {}\" (use --model to force one)",
                args.device, info.vendor, info.product
            ))
        })?,
    };
    log::info!(
        "{}: {} {} as {}",
        args.device,
        info.vendor,
        info.product,
        profile.name
    );

    let mut scanner = Scanner::new(Box::new(dev), profile, &config);
    let items = acquire(&mut scanner, job, args.chunk, args.out_dir)?;

    if json {
        return print_json(&ScanOutput {
            model: profile.name.to_string(),
            device: info.path,
            complete: true,
            items,
        });
    }
    println!("{} on {}", profile.name, args.device);
    println!();
    print_reports(&items);
    Ok(())
}
