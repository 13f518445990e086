//! Model profiles: capabilities and native data layouts per scanner model.
//!
//! Each profile names the sense table family, the command dialect used for
//! setup and abort, the buffer/queue defaults for the acquisition pipeline
//! and the byte layout quirks of the raster data. Unknown devices get `None`
//! from `detect_model()`; callers may still drive them with an explicit
//! profile chosen by name.

use std::time::Duration;

use serde::Serialize;

use crate::sense::{ComplainPolicy, SenseFamily};

/// Command dialect: how a scan is set up, how reads are addressed and how
/// an in-flight scan is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandSet {
    /// Read types in CDB byte 2; sections, icons and codes; batch abort via SET WINDOW.
    BellHowell,
    /// Page side in CDB byte 5; abort by resetting the window.
    Matsushita,
    /// Single image stream; abort via READ with the abort flag, then unload.
    Sharp,
}

/// Pipeline defaults for a model. Overridable from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Capabilities {
    /// Largest transfer a single command may request.
    pub max_transfer: usize,
    pub buffer_count: usize,
    pub buffer_size: usize,
    /// Read commands kept outstanding in overlapped mode.
    pub queued_reads: usize,
    /// Busy retries per command before giving up.
    pub retry_budget: u32,
    #[serde(skip)]
    pub retry_delay: Duration,
    #[serde(skip)]
    pub complain: ComplainPolicy,
    /// Run the producer on its own thread unless told otherwise.
    pub overlapped: bool,
    /// Delay between GET WINDOW polls while border detection runs.
    #[serde(skip)]
    pub autoborder_delay: Duration,
}

/// How the device lays out raster bytes compared to the canonical order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NativeLayout {
    /// 1-bit data arrives LSB-first.
    pub bit_reversed_lineart: bool,
    /// 4-bit gray arrives two samples per byte, low nibble first.
    pub packed_4bpp: bool,
    /// Colour lines arrive as R, G and B planes instead of interleaved pixels.
    pub plane_separated_color: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelProfile {
    pub name: &'static str,
    /// INQUIRY vendor identification (trimmed).
    pub vendor: &'static str,
    /// INQUIRY product identification prefix.
    pub product: &'static str,
    pub family: SenseFamily,
    pub command_set: CommandSet,
    pub caps: Capabilities,
    pub layout: NativeLayout,
    pub duplex: bool,
    /// Section windows, thumbnails and bar/patch code decoding.
    pub sections_and_codes: bool,
    /// Eject the sheet after an abort.
    pub unload_on_abort: bool,
}

// ── Bell+Howell ──

static COPISCAN_II: ModelProfile = ModelProfile {
    name: "COPISCAN II 6338",
    vendor: "B&H",
    product: "COPISCAN II",
    family: SenseFamily::BellHowell,
    command_set: CommandSet::BellHowell,
    caps: Capabilities {
        max_transfer: 64 * 1024,
        buffer_count: 4,
        buffer_size: 32 * 1024,
        queued_reads: 1,
        retry_budget: 20,
        retry_delay: Duration::from_millis(50),
        complain: ComplainPolicy {
            adf: true,
            fsu: true,
        },
        overlapped: false,
        autoborder_delay: Duration::from_secs(1),
    },
    layout: NativeLayout {
        bit_reversed_lineart: false,
        packed_4bpp: false,
        plane_separated_color: false,
    },
    duplex: true,
    sections_and_codes: true,
    unload_on_abort: false,
};

// ── Panasonic ──

static KV_SS25: ModelProfile = ModelProfile {
    name: "KV-SS25",
    vendor: "K.M.E.",
    product: "KV-SS25",
    family: SenseFamily::Matsushita,
    command_set: CommandSet::Matsushita,
    caps: Capabilities {
        max_transfer: 0x8000,
        buffer_count: 4,
        buffer_size: 0x8000,
        queued_reads: 1,
        retry_budget: 60,
        retry_delay: Duration::from_secs(1),
        complain: ComplainPolicy {
            adf: true,
            fsu: true,
        },
        overlapped: false,
        autoborder_delay: Duration::from_secs(1),
    },
    layout: NativeLayout {
        bit_reversed_lineart: true,
        packed_4bpp: true,
        plane_separated_color: false,
    },
    duplex: true,
    sections_and_codes: false,
    unload_on_abort: false,
};

// ── Sharp ──

/// Sharp defaults: 12 buffers of 128 KiB, two queued reads, 50 busy retries at 10 ms.
const SHARP_CAPS: Capabilities = Capabilities {
    max_transfer: 128 * 1024,
    buffer_count: 12,
    buffer_size: 128 * 1024,
    queued_reads: 2,
    retry_budget: 50,
    retry_delay: Duration::from_millis(10),
    complain: ComplainPolicy {
        adf: true,
        fsu: true,
    },
    overlapped: true,
    autoborder_delay: Duration::from_secs(1),
};

const SHARP_PLANAR: NativeLayout = NativeLayout {
    bit_reversed_lineart: false,
    packed_4bpp: false,
    plane_separated_color: true,
};

static JX_250: ModelProfile = ModelProfile {
    name: "JX-250",
    vendor: "SHARP",
    product: "JX-250",
    family: SenseFamily::SharpJx250,
    command_set: CommandSet::Sharp,
    caps: SHARP_CAPS,
    layout: SHARP_PLANAR,
    duplex: false,
    sections_and_codes: false,
    unload_on_abort: true,
};

static JX_320: ModelProfile = ModelProfile {
    name: "JX-320",
    vendor: "SHARP",
    product: "JX-320",
    family: SenseFamily::SharpJx250,
    command_set: CommandSet::Sharp,
    caps: SHARP_CAPS,
    layout: NativeLayout {
        bit_reversed_lineart: false,
        packed_4bpp: false,
        plane_separated_color: false,
    },
    duplex: false,
    sections_and_codes: false,
    unload_on_abort: false,
};

static JX_330: ModelProfile = ModelProfile {
    name: "JX-330",
    vendor: "SHARP",
    product: "JX-330",
    family: SenseFamily::SharpJx250,
    command_set: CommandSet::Sharp,
    caps: SHARP_CAPS,
    layout: NativeLayout {
        bit_reversed_lineart: false,
        packed_4bpp: false,
        plane_separated_color: false,
    },
    duplex: false,
    sections_and_codes: false,
    unload_on_abort: true,
};

static JX_350: ModelProfile = ModelProfile {
    name: "JX-350",
    vendor: "SHARP",
    product: "JX-350",
    family: SenseFamily::SharpJx250,
    command_set: CommandSet::Sharp,
    caps: SHARP_CAPS,
    layout: SHARP_PLANAR,
    duplex: false,
    sections_and_codes: false,
    unload_on_abort: true,
};

static JX_610: ModelProfile = ModelProfile {
    name: "JX-610",
    vendor: "SHARP",
    product: "JX-610",
    family: SenseFamily::SharpJx610,
    command_set: CommandSet::Sharp,
    caps: SHARP_CAPS,
    layout: NativeLayout {
        bit_reversed_lineart: false,
        packed_4bpp: false,
        plane_separated_color: false,
    },
    duplex: false,
    sections_and_codes: false,
    unload_on_abort: false,
};

/// All known profiles, in display order.
pub static MODELS: [&ModelProfile; 7] = [
    &COPISCAN_II,
    &KV_SS25,
    &JX_250,
    &JX_320,
    &JX_330,
    &JX_350,
    &JX_610,
];

/// Look up a profile from INQUIRY vendor/product strings.
pub fn detect_model(vendor: &str, product: &str) -> Option<&'static ModelProfile> {
    let vendor = vendor.trim();
    let product = product.trim();
    MODELS
        .iter()
        .copied()
        .find(|m| m.vendor.eq_ignore_ascii_case(vendor) && product.starts_with(m.product))
}

/// Look up a profile by its display name (case-insensitive).
pub fn find_model(name: &str) -> Option<&'static ModelProfile> {
    let name = name.trim();
    MODELS
        .iter()
        .copied()
        .find(|m| m.name.eq_ignore_ascii_case(name) || m.product.eq_ignore_ascii_case(name))
}
