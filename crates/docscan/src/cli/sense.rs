//! `sense` subcommand: show how a model's sense table reads a triple.

use serde::Serialize;

use docscan_lib::protocol::build_sense;
use docscan_lib::sense::{ComplainPolicy, hex_dump, translate};

use super::{DeviceOutcome, Result, kv, kv_width, lookup_model, print_json};

pub(super) struct Triple {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

#[derive(Serialize)]
struct SenseOutput {
    model: String,
    family: String,
    sense: String,
    outcome: String,
    description: String,
    terminal: bool,
}

pub(super) fn cmd_sense(
    model: &str,
    t: Triple,
    eom: bool,
    ili: bool,
    lenient: bool,
    json: bool,
) -> Result<()> {
    let profile = lookup_model(model)?;
    let mut raw = build_sense(t.key, t.asc, t.ascq);
    if eom {
        raw[2] |= 0x40;
    }
    if ili {
        raw[2] |= 0x20;
    }
    let policy = if lenient {
        ComplainPolicy {
            adf: false,
            fsu: false,
        }
    } else {
        profile.caps.complain
    };
    let outcome: DeviceOutcome = translate(&raw, profile.family, policy).outcome;

    if json {
        return print_json(&SenseOutput {
            model: profile.name.to_string(),
            family: profile.family.to_string(),
            sense: hex_dump(&raw),
            outcome: format!("{outcome:?}"),
            description: outcome.to_string(),
            terminal: outcome.is_terminal(),
        });
    }

    let w = kv_width(&["Model:", "Sense:", "Outcome:", "Ends batch:"], &[]);
    kv("Model:", format_args!("{} ({})", profile.name, profile.family), w);
    kv("Sense:", hex_dump(&raw), w);
    kv("Outcome:", &outcome, w);
    kv("Ends batch:", if outcome.is_terminal() { "yes" } else { "no" }, w);
    Ok(())
}
