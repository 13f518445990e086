//! Per-model command sequences: setup before a scan, abort after a cancel,
//! and the READ command for each item.
//!
//! Sequences are plain data so they can be inspected in tests and replayed
//! by the scanner facade through the transport.

use crate::job::{ColorMode, ScanConfig, Section};
use crate::models::{CommandSet, ModelProfile};
use crate::protocol::{
    self, BATCH_ABORT, BATCH_DISABLE, BATCH_ENABLE, NUM_SECTIONS, OBJECT_LOAD, OBJECT_UNLOAD,
    PAGE_BARCODE_PARAM1, PAGE_BARCODE_PRIORITY, PAGE_ICON, PAGE_MEASUREMENT, PAGE_TIMEOUT,
    SECTION_BLOCK_LEN, UNIT_INCH, UNIT_POINT, WINDOW_DESCRIPTOR_LEN, WINDOW_HEADER_LEN,
};
use crate::readlist::{ItemKind, ReadItem, Side};

/// Page length assumed when the job leaves it to the feeder: 14 inches.
const MAX_PAGE_LENGTH: u32 = 14_000;

/// One command of a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCommand {
    pub label: &'static str,
    pub cdb: Vec<u8>,
    pub data: Vec<u8>,
    /// Failures are logged and the sequence continues.
    pub ignore_errors: bool,
}

impl SetupCommand {
    fn new(label: &'static str, cdb: &[u8], data: Vec<u8>) -> Self {
        SetupCommand {
            label,
            cdb: cdb.to_vec(),
            data,
            ignore_errors: false,
        }
    }

    fn lenient(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    fn mode_page(label: &'static str, code: u8, params: [u8; 6]) -> Self {
        let page = protocol::mode_page(code, params);
        Self::new(label, &protocol::mode_select(page.len()), page.to_vec())
    }
}

// ── Window blocks ──

/// Image composition byte of the window descriptor.
fn composition(job: &ScanConfig) -> u8 {
    match job.mode {
        ColorMode::Lineart => 0,
        ColorMode::Gray => 2,
        ColorMode::Color => 5,
    }
}

/// Header + descriptor with geometry in thousandths of an inch.
fn window_descriptor(job: &ScanConfig, window_id: u8, batch_mode: u8, desc_len: usize) -> Vec<u8> {
    let width = job.pixels_per_line as u64 * 1000 / u64::from(job.resolution.max(1));
    let length = job
        .lines
        .map(|l| (l as u64 * 1000 / u64::from(job.resolution.max(1))) as u32)
        .unwrap_or(MAX_PAGE_LENGTH);

    let mut buf = vec![0u8; WINDOW_HEADER_LEN + desc_len];
    buf[6..8].copy_from_slice(&(desc_len as u16).to_be_bytes());
    let d = &mut buf[WINDOW_HEADER_LEN..];
    d[0] = window_id;
    d[1] = u8::from(job.autoborder);
    d[2..4].copy_from_slice(&job.resolution.to_be_bytes());
    d[4..6].copy_from_slice(&job.resolution.to_be_bytes());
    d[14..18].copy_from_slice(&(width as u32).to_be_bytes());
    d[18..22].copy_from_slice(&length.to_be_bytes());
    d[25] = composition(job);
    d[26] = job.bit_depth();
    d[29] = 3;
    d[43] = batch_mode;
    buf
}

/// Bell+Howell SET WINDOW block: descriptor plus all eight section blocks.
pub fn bell_howell_window(job: &ScanConfig, batch_mode: u8) -> Vec<u8> {
    let sections_len = NUM_SECTIONS as usize * SECTION_BLOCK_LEN;
    let mut buf = window_descriptor(job, 0, batch_mode, WINDOW_DESCRIPTOR_LEN + sections_len);
    for (i, s) in job.sections.iter().enumerate() {
        let off = WINDOW_HEADER_LEN + WINDOW_DESCRIPTOR_LEN + i * SECTION_BLOCK_LEN;
        write_section(&mut buf[off..off + SECTION_BLOCK_LEN], s);
    }
    buf
}

fn write_section(block: &mut [u8], s: &Section) {
    block[0..4].copy_from_slice(&s.left.to_be_bytes());
    block[4..8].copy_from_slice(&s.top.to_be_bytes());
    block[8..12].copy_from_slice(&s.width.to_be_bytes());
    block[12..16].copy_from_slice(&s.length.to_be_bytes());
}

fn set_window(label: &'static str, data: Vec<u8>) -> SetupCommand {
    SetupCommand::new(label, &protocol::set_window(data.len()), data)
}

// ── Sequences ──

/// Commands that prepare the device and start the scan.
pub fn setup_sequence(profile: &ModelProfile, job: &ScanConfig) -> Vec<SetupCommand> {
    match profile.command_set {
        CommandSet::BellHowell => bell_howell_setup(job),
        CommandSet::Matsushita => matsushita_setup(job),
        CommandSet::Sharp => vec![
            SetupCommand::new("test unit ready", &protocol::test_unit_ready(), vec![]),
            set_window(
                "set window",
                window_descriptor(job, 0, BATCH_DISABLE, WINDOW_DESCRIPTOR_LEN),
            ),
            SetupCommand::new("start scan", &protocol::start_scan(false), vec![]),
        ],
    }
}

fn bell_howell_setup(job: &ScanConfig) -> Vec<SetupCommand> {
    let mut seq = Vec::new();

    // Clear a batch left running by an earlier session.
    if job.batch {
        seq.push(set_window("batch abort", bell_howell_window(job, BATCH_ABORT)).lenient());
    }

    seq.push(SetupCommand::mode_page(
        "measurement unit: inch/1000",
        PAGE_MEASUREMENT,
        [UNIT_INCH, 0, 0x03, 0xE8, 0, 0],
    ));
    let batch_mode = if job.batch { BATCH_ENABLE } else { BATCH_DISABLE };
    seq.push(set_window("set window", bell_howell_window(job, batch_mode)));

    // GET WINDOW answers in pixels from here on.
    seq.push(SetupCommand::mode_page(
        "measurement unit: pixel",
        PAGE_MEASUREMENT,
        [UNIT_POINT, 0, 0, 1, 0, 0],
    ));
    seq.push(SetupCommand::mode_page(
        "timeouts",
        PAGE_TIMEOUT,
        [job.timeout_manual, job.timeout_adf, 0, 0, 0, 0],
    ));

    if job.icons_enabled() {
        let [wh, wl] = job.icon_width.to_be_bytes();
        let [lh, ll] = job.icon_length.to_be_bytes();
        seq.push(SetupCommand::mode_page("icon size", PAGE_ICON, [wh, wl, lh, ll, 0, 0]));
    }

    if job.barcodes_enabled() {
        let mut priority = [0u8; 6];
        for (slot, id) in priority.iter_mut().zip(job.barcode_ids()) {
            *slot = id;
        }
        seq.push(SetupCommand::mode_page(
            "barcode priority",
            PAGE_BARCODE_PRIORITY,
            priority,
        ));
        let search = &job.barcode_search;
        let [hh, hl] = search.min_bar_height.to_be_bytes();
        let [th, tl] = search.search_timeout.to_be_bytes();
        seq.push(SetupCommand::mode_page(
            "barcode search",
            PAGE_BARCODE_PARAM1,
            [hh, hl, search.search_count, search.search_mode.code(), th, tl],
        ));
    }

    seq.extend(continuation_sequence(job));
    seq
}

fn matsushita_setup(job: &ScanConfig) -> Vec<SetupCommand> {
    let mut sides = vec![Side::Front];
    if job.duplex {
        sides.push(Side::Back);
    }
    let mut seq: Vec<SetupCommand> = sides
        .into_iter()
        .map(|side| {
            let label = match side {
                Side::Front => "set window: front",
                Side::Back => "set window: back",
            };
            set_window(
                label,
                window_descriptor(job, side.page_byte(), BATCH_DISABLE, WINDOW_DESCRIPTOR_LEN),
            )
        })
        .collect();
    seq.push(SetupCommand::new(
        "start scan",
        &protocol::start_scan(job.duplex),
        vec![],
    ));
    seq
}

/// Start the next sheet of a running batch: optional feeder check, then START SCAN.
pub fn continuation_sequence(job: &ScanConfig) -> Vec<SetupCommand> {
    let mut seq = Vec::new();
    if job.check_adf {
        seq.push(SetupCommand::new(
            "object position: load",
            &protocol::object_position(OBJECT_LOAD),
            vec![],
        ));
    }
    seq.push(SetupCommand::new(
        "start scan",
        &protocol::start_scan(job.duplex),
        vec![],
    ));
    seq
}

/// Commands that stop an in-flight scan. Errors are logged, never surfaced.
pub fn abort_sequence(profile: &ModelProfile, job: &ScanConfig) -> Vec<SetupCommand> {
    match profile.command_set {
        CommandSet::BellHowell if job.batch => {
            vec![set_window("batch abort", bell_howell_window(job, BATCH_ABORT)).lenient()]
        }
        CommandSet::BellHowell => Vec::new(),
        CommandSet::Matsushita => {
            vec![SetupCommand::new("reset window", &protocol::set_window(0), vec![]).lenient()]
        }
        CommandSet::Sharp => {
            let mut seq = vec![
                SetupCommand::new("wait ready", &protocol::test_unit_ready(), vec![]).lenient(),
                SetupCommand::new("read abort", &protocol::read_abort(), vec![]).lenient(),
            ];
            if profile.unload_on_abort {
                seq.push(
                    SetupCommand::new(
                        "object position: unload",
                        &protocol::object_position(OBJECT_UNLOAD),
                        vec![],
                    )
                    .lenient(),
                );
            }
            seq
        }
    }
}

/// READ SCANNED DATA for `len` bytes of `item`, in the model's addressing.
pub fn read_command(profile: &ModelProfile, item: &ReadItem, len: usize) -> [u8; 10] {
    let len = len as u32;
    match profile.command_set {
        CommandSet::BellHowell => protocol::read_scanned_data(item.raw_code, 0, len),
        CommandSet::Matsushita => {
            let side = item.side().map(Side::page_byte).unwrap_or(0);
            protocol::read_scanned_data(0, side, len)
        }
        CommandSet::Sharp => protocol::read_scanned_data(0, 0, len),
    }
}

/// GET WINDOW for an image item's side, when the model answers it.
pub fn geometry_query(profile: &ModelProfile, item: &ReadItem) -> Option<[u8; 10]> {
    if profile.command_set != CommandSet::BellHowell {
        return None;
    }
    match item.kind {
        ItemKind::ImagePlane(side) => Some(protocol::get_window(
            side.window_id(),
            WINDOW_HEADER_LEN + WINDOW_DESCRIPTOR_LEN,
        )),
        _ => None,
    }
}
