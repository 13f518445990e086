//! `models` subcommand: list supported scanners and their capabilities.

use super::{Result, kv_indent, kv_width, model_table, print_json};

pub(super) fn cmd_models(json: bool) -> Result<()> {
    let models = &model_table::MODELS;

    if json {
        return print_json(models);
    }

    let w = kv_width(&[], &["Inquiry:", "Sense table:", "Pipeline:", "Features:"]);
    for m in models.iter() {
        println!("{}", m.name);
        kv_indent("Inquiry:", format_args!("{} / {}", m.vendor, m.product), w);
        kv_indent("Sense table:", m.family, w);
        let caps = &m.caps;
        let pipeline = if caps.overlapped {
            format!(
                "overlapped, {} queued reads, {} x {} KiB buffers",
                caps.queued_reads,
                caps.buffer_count,
                caps.buffer_size / 1024
            )
        } else {
            format!(
                "inline, {} x {} KiB buffers",
                caps.buffer_count,
                caps.buffer_size / 1024
            )
        };
        kv_indent("Pipeline:", pipeline, w);
        let mut features = Vec::new();
        if m.duplex {
            features.push("duplex");
        }
        if m.sections_and_codes {
            features.push("sections, thumbnails, bar/patch codes");
        }
        if m.layout.packed_4bpp {
            features.push("4-bit gray");
        }
        if features.is_empty() {
            features.push("simplex only");
        }
        kv_indent("Features:", features.join(", "), w);
        println!();
    }
    Ok(())
}
