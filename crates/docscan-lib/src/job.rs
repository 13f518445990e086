//! Scan job description: what to acquire from one sheet (or batch of sheets).
//!
//! A `ScanConfig` is what an option manager hands to `start_batch`. It is a
//! serde type so jobs can be written as TOML files:
//!
//! ```toml
//! mode = "lineart"
//! resolution = 200
//! pixels_per_line = 1728
//! lines = 2200
//! duplex = true
//! barcodes = ["code39", "code128"]
//!
//! [[sections]]
//! left = 500
//! top = 500
//! width = 3000
//! length = 1000
//! flags = ["front-image", "front-barcode"]
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codes::symbology_id;
use crate::error::{Result, ScanError};
use crate::models::{CommandSet, ModelProfile};
use crate::protocol::{MAX_SEARCH_BARS, NUM_SECTIONS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    #[default]
    Lineart,
    Gray,
    Color,
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorMode::Lineart => write!(f, "lineart"),
            ColorMode::Gray => write!(f, "gray"),
            ColorMode::Color => write!(f, "color"),
        }
    }
}

/// What a section window produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionFlag {
    FrontImage,
    BackImage,
    FrontBarcode,
    BackBarcode,
    FrontPatchcode,
    BackPatchcode,
}

/// A rectangular sub-window of the page. Geometry in thousandths of an inch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub length: u32,
    #[serde(default)]
    pub flags: Vec<SectionFlag>,
}

impl Section {
    pub fn has(&self, flag: SectionFlag) -> bool {
        self.flags.contains(&flag)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    #[default]
    HorizVert,
    Horizontal,
    Vertical,
    VertHoriz,
}

impl SearchMode {
    /// Device code for the barcode parameter page.
    pub fn code(self) -> u8 {
        match self {
            SearchMode::HorizVert => 9,
            SearchMode::Horizontal => 1,
            SearchMode::Vertical => 2,
            SearchMode::VertHoriz => 6,
        }
    }
}

/// Barcode search parameters (mode page 0x31).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeSearch {
    /// Minimum bar height, thousandths of an inch.
    #[serde(default)]
    pub min_bar_height: u16,
    /// Codes to look for per search area (1..=7).
    #[serde(default = "default_search_count")]
    pub search_count: u8,
    #[serde(default)]
    pub search_mode: SearchMode,
    /// Search timeout in milliseconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout: u16,
}

fn default_search_count() -> u8 {
    3
}
fn default_search_timeout() -> u16 {
    10_000
}

impl Default for BarcodeSearch {
    fn default() -> Self {
        BarcodeSearch {
            min_bar_height: 0,
            search_count: default_search_count(),
            search_mode: SearchMode::HorizVert,
            search_timeout: default_search_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub mode: ColorMode,

    /// Bits per sample. Lineart is always 1.
    #[serde(default = "default_depth")]
    pub depth: u8,

    /// Dots per inch, both axes.
    #[serde(default = "default_resolution")]
    pub resolution: u16,

    pub pixels_per_line: u32,

    /// Page length in lines. `None` when the feeder detects the length.
    #[serde(default)]
    pub lines: Option<u32>,

    #[serde(default)]
    pub duplex: bool,

    /// Keep the feeder running across sheets; each `start_batch` takes the next sheet.
    #[serde(default)]
    pub batch: bool,

    /// Load a sheet with OBJECT POSITION before starting, failing if the feeder is empty.
    #[serde(default)]
    pub check_adf: bool,

    /// Ask the device to find the page border; image shapes come from GET WINDOW.
    #[serde(default)]
    pub autoborder: bool,

    /// Thumbnail width/length in pixels. Either below 8 disables thumbnails.
    #[serde(default)]
    pub icon_width: u16,
    #[serde(default)]
    pub icon_length: u16,

    #[serde(default)]
    pub sections: Vec<Section>,

    /// Barcode symbologies to search for, in priority order. Empty disables barcodes.
    #[serde(default)]
    pub barcodes: Vec<String>,

    #[serde(default)]
    pub patchcodes: bool,

    #[serde(default)]
    pub barcode_search: BarcodeSearch,

    /// Paper feed timeouts in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_adf: u8,
    #[serde(default = "default_timeout")]
    pub timeout_manual: u8,
}

fn default_depth() -> u8 {
    8
}
fn default_resolution() -> u16 {
    200
}
fn default_timeout() -> u8 {
    15
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            mode: ColorMode::Lineart,
            depth: 1,
            resolution: default_resolution(),
            pixels_per_line: 1728,
            lines: None,
            duplex: false,
            batch: false,
            check_adf: false,
            autoborder: false,
            icon_width: 0,
            icon_length: 0,
            sections: Vec::new(),
            barcodes: Vec::new(),
            patchcodes: false,
            barcode_search: BarcodeSearch::default(),
            timeout_adf: default_timeout(),
            timeout_manual: default_timeout(),
        }
    }
}

impl ScanConfig {
    /// Effective sample depth: lineart forces 1 bit.
    pub fn bit_depth(&self) -> u8 {
        match self.mode {
            ColorMode::Lineart => 1,
            _ => self.depth,
        }
    }

    pub fn icons_enabled(&self) -> bool {
        self.icon_width >= 8 && self.icon_length >= 8
    }

    pub fn barcodes_enabled(&self) -> bool {
        !self.barcodes.is_empty()
    }

    /// Barcode symbology ids for the priority page; unknown names are skipped.
    pub fn barcode_ids(&self) -> Vec<u8> {
        self.barcodes
            .iter()
            .filter_map(|name| symbology_id(name))
            .take(MAX_SEARCH_BARS)
            .collect()
    }

    /// Read a job from a TOML file. Fields left out take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("job file {}: {e}", path.display())))
    }

    /// Check the job against what the model can do. The message becomes an
    /// `InvalidRequest` outcome.
    pub fn validate(&self, profile: &ModelProfile) -> std::result::Result<(), String> {
        if self.pixels_per_line == 0 {
            return Err("pixels_per_line must be non-zero".into());
        }
        if self.lines == Some(0) {
            return Err("lines must be non-zero when given".into());
        }
        if self.resolution == 0 {
            return Err("resolution must be non-zero".into());
        }
        match (self.mode, self.depth) {
            (ColorMode::Lineart, _) => {}
            (ColorMode::Gray, 1 | 4 | 8) => {}
            (ColorMode::Color, 1 | 8) => {}
            (mode, depth) => return Err(format!("depth {depth} not supported in {mode} mode")),
        }
        if self.mode == ColorMode::Gray && self.depth == 4 && !profile.layout.packed_4bpp {
            return Err(format!("{} has no 4-bit gray mode", profile.name));
        }
        if self.duplex && !profile.duplex {
            return Err(format!("{} cannot scan duplex", profile.name));
        }
        if self.batch && profile.command_set != CommandSet::BellHowell {
            return Err(format!("{} has no batch mode", profile.name));
        }
        if self.mode == ColorMode::Color
            && self.depth == 1
            && profile.command_set != CommandSet::Sharp
        {
            return Err(format!("{} has no bi-level colour mode", profile.name));
        }
        // Sharp devices never report a short final read, so the length must be known.
        if profile.command_set == CommandSet::Sharp && self.lines.is_none() {
            return Err(format!("{} needs the page length in lines", profile.name));
        }

        let wants_extras = !self.sections.is_empty()
            || self.icons_enabled()
            || self.barcodes_enabled()
            || self.patchcodes;
        if wants_extras && !profile.sections_and_codes {
            return Err(format!(
                "{} supports neither sections, thumbnails nor bar/patch codes",
                profile.name
            ));
        }

        if self.sections.len() > NUM_SECTIONS as usize {
            return Err(format!(
                "{} sections requested, at most {NUM_SECTIONS} allowed",
                self.sections.len()
            ));
        }
        for (i, s) in self.sections.iter().enumerate() {
            if s.width == 0 || s.length == 0 {
                return Err(format!("section {} has an empty window", i + 1));
            }
        }

        if self.barcodes.len() > MAX_SEARCH_BARS {
            return Err(format!(
                "{} barcode symbologies requested, at most {MAX_SEARCH_BARS} allowed",
                self.barcodes.len()
            ));
        }
        for name in &self.barcodes {
            if symbology_id(name).is_none() {
                return Err(format!("unknown barcode symbology \"{name}\""));
            }
        }
        if !(1..=7).contains(&self.barcode_search.search_count) {
            return Err(format!(
                "barcode search count {} out of range 1..=7",
                self.barcode_search.search_count
            ));
        }
        Ok(())
    }
}
