//! `simulate` subcommand: run a scan job against the in-process scanner.

use std::path::Path;

use docscan_lib::SimulatedScanner;

use super::{
    AcquisitionMode, Result, ScanConfig, ScanOutput, Scanner, acquire, load_config, lookup_model,
    print_json, print_reports,
};

pub(super) struct SimulateArgs<'a> {
    pub job: &'a Path,
    pub model: &'a str,
    pub out_dir: Option<&'a Path>,
    pub chunk: usize,
    pub mode: Option<AcquisitionMode>,
    pub default_lines: u32,
}

pub(super) fn cmd_simulate(
    args: SimulateArgs<'_>,
    config_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let profile = lookup_model(args.model)?;
    let job = ScanConfig::load_from(args.job)?;
    let mut config = load_config(config_path)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    let sim = SimulatedScanner::new(profile.name);
    sim.feed_job(profile, &job, args.default_lines);
    let log = sim.log();
    let mut scanner = Scanner::new(Box::new(sim), profile, &config);

    let items = acquire(&mut scanner, job, args.chunk, args.out_dir)?;
    log::info!("simulated device saw {} command(s)", log.len());

    if json {
        return print_json(&ScanOutput {
            model: profile.name.to_string(),
            device: format!("sim:{}", profile.name),
            complete: true,
            items,
        });
    }
    println!("Simulated {} ({} commands)", profile.name, log.len());
    println!();
    print_reports(&items);
    Ok(())
}
