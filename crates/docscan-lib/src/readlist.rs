//! Read-list sequencer: what one scan yields, in delivery order.
//!
//! A single START SCAN on a Bell+Howell device can produce up to 56 separate
//! things to read: page images, section images, thumbnails and decoded
//! bar/patch codes. The sequencer expands a job into an ordered list of
//! [`ReadItem`]s once, then walks a cursor through it as the caller reads.
//!
//! Ordering rules:
//! 1. front image, then each section flagged for a front image
//! 2. with duplex: back image, then each section flagged for a back image
//! 3. thumbnails (front, then back with duplex) when both icon sides are >= 8
//! 4. barcode results: the whole page when no sections are defined,
//!    otherwise each section flagged for barcodes
//! 5. patch code results, by the same rule
//! 6. the decoded-codes document, only if step 4 or 5 added anything
//!
//! Every image-bearing item precedes every code item.

use std::fmt;

use serde::Serialize;

use crate::job::{ColorMode, ScanConfig, SectionFlag};
use crate::protocol::{
    self, ICON_HEADER_LEN, IconHeader, READ_TYPE_BACK, READ_TYPE_BACK_BARCODE,
    READ_TYPE_BACK_ICON, READ_TYPE_BACK_PATCHCODE, READ_TYPE_FRONT, READ_TYPE_FRONT_BARCODE,
    READ_TYPE_FRONT_ICON, READ_TYPE_FRONT_PATCHCODE, READ_TYPE_SENDBARFILE,
};
use crate::reshape::ReshapeMode;

// ── Items ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Side {
    Front,
    Back,
}

impl Side {
    /// Window identifier used by SET/GET WINDOW.
    pub fn window_id(self) -> u8 {
        match self {
            Side::Front => 0,
            Side::Back => 1,
        }
    }

    /// Page side qualifier in READ byte 5 on Panasonic devices.
    pub fn page_byte(self) -> u8 {
        match self {
            Side::Front => 0x00,
            Side::Back => 0x80,
        }
    }

    fn pick(self, front: u8, back: u8) -> u8 {
        match self {
            Side::Front => front,
            Side::Back => back,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Front => write!(f, "front"),
            Side::Back => write!(f, "back"),
        }
    }
}

/// What an item carries. Section numbers are 1-based; 0 means the whole page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    ImagePlane(Side),
    SectionImage(u8, Side),
    Thumbnail(Side),
    BarcodeResult(u8, Side),
    PatchResult(u8, Side),
    DecodedCodesFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadItem {
    pub kind: ItemKind,
    /// Read type code sent to the device (Bell+Howell encoding).
    pub raw_code: u8,
}

impl ReadItem {
    pub fn new(kind: ItemKind) -> Self {
        let raw_code = match kind {
            ItemKind::ImagePlane(side) => side.pick(READ_TYPE_FRONT, READ_TYPE_BACK),
            ItemKind::SectionImage(n, side) => side.pick(READ_TYPE_FRONT, READ_TYPE_BACK) + n,
            ItemKind::Thumbnail(side) => side.pick(READ_TYPE_FRONT_ICON, READ_TYPE_BACK_ICON),
            ItemKind::BarcodeResult(n, side) => {
                side.pick(READ_TYPE_FRONT_BARCODE, READ_TYPE_BACK_BARCODE) + n
            }
            ItemKind::PatchResult(n, side) => {
                side.pick(READ_TYPE_FRONT_PATCHCODE, READ_TYPE_BACK_PATCHCODE) + n
            }
            ItemKind::DecodedCodesFile => READ_TYPE_SENDBARFILE,
        };
        ReadItem { kind, raw_code }
    }

    /// Items whose bytes go through the ring buffers.
    pub fn has_image_data(&self) -> bool {
        protocol::has_image_data(self.raw_code)
    }

    /// Bar/patch code items: decoded into the codes document, never served directly.
    pub fn is_code_result(&self) -> bool {
        matches!(
            self.kind,
            ItemKind::BarcodeResult(..) | ItemKind::PatchResult(..)
        )
    }

    pub fn side(&self) -> Option<Side> {
        match self.kind {
            ItemKind::ImagePlane(s)
            | ItemKind::SectionImage(_, s)
            | ItemKind::Thumbnail(s)
            | ItemKind::BarcodeResult(_, s)
            | ItemKind::PatchResult(_, s) => Some(s),
            ItemKind::DecodedCodesFile => None,
        }
    }
}

impl fmt::Display for ReadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", protocol::read_type_name(self.raw_code))
    }
}

/// Expand a job into its ordered read list.
pub fn build_read_list(job: &ScanConfig) -> Vec<ReadItem> {
    let mut items = Vec::new();
    let mut sides = vec![Side::Front];
    if job.duplex {
        sides.push(Side::Back);
    }
    let numbered = || job.sections.iter().zip(1u8..);

    for &side in &sides {
        items.push(ReadItem::new(ItemKind::ImagePlane(side)));
        let flag = match side {
            Side::Front => SectionFlag::FrontImage,
            Side::Back => SectionFlag::BackImage,
        };
        for (section, n) in numbered() {
            if section.has(flag) {
                items.push(ReadItem::new(ItemKind::SectionImage(n, side)));
            }
        }
    }

    if job.icons_enabled() {
        for &side in &sides {
            items.push(ReadItem::new(ItemKind::Thumbnail(side)));
        }
    }

    let image_count = items.len();
    let mut add_codes = |enabled: bool,
                         make: fn(u8, Side) -> ItemKind,
                         front: SectionFlag,
                         back: SectionFlag| {
        if !enabled {
            return;
        }
        if job.sections.is_empty() {
            for &side in &sides {
                items.push(ReadItem::new(make(0, side)));
            }
            return;
        }
        for (section, n) in numbered() {
            if section.has(front) {
                items.push(ReadItem::new(make(n, Side::Front)));
            }
            if job.duplex && section.has(back) {
                items.push(ReadItem::new(make(n, Side::Back)));
            }
        }
    };
    add_codes(
        job.barcodes_enabled(),
        ItemKind::BarcodeResult,
        SectionFlag::FrontBarcode,
        SectionFlag::BackBarcode,
    );
    add_codes(
        job.patchcodes,
        ItemKind::PatchResult,
        SectionFlag::FrontPatchcode,
        SectionFlag::BackPatchcode,
    );

    if items.len() > image_count {
        items.push(ReadItem::new(ItemKind::DecodedCodesFile));
    }
    items
}

// ── Batch cursor ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    BatchBuilt,
    ItemActive,
    ItemExhausted,
    BatchDone,
}

/// Ordered items plus the cursor of the one being read.
#[derive(Debug, Clone)]
pub struct ScanBatch {
    items: Vec<ReadItem>,
    cursor: usize,
    state: SequencerState,
}

impl ScanBatch {
    pub fn new(items: Vec<ReadItem>) -> Self {
        let state = if items.is_empty() {
            SequencerState::BatchDone
        } else {
            SequencerState::BatchBuilt
        };
        ScanBatch {
            items,
            cursor: 0,
            state,
        }
    }

    pub fn items(&self) -> &[ReadItem] {
        &self.items
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&ReadItem> {
        match self.state {
            SequencerState::BatchDone => None,
            _ => self.items.get(self.cursor),
        }
    }

    pub fn activate(&mut self) {
        if self.state != SequencerState::BatchDone {
            self.state = SequencerState::ItemActive;
        }
    }

    pub fn exhaust(&mut self) {
        if self.state == SequencerState::ItemActive {
            self.state = SequencerState::ItemExhausted;
        }
    }

    /// Move past the current item. Returns the next one, or `None` at the end.
    pub fn advance(&mut self) -> Option<ReadItem> {
        if self.state == SequencerState::BatchDone {
            return None;
        }
        self.cursor += 1;
        match self.items.get(self.cursor) {
            Some(item) => {
                self.state = SequencerState::BatchBuilt;
                Some(*item)
            }
            None => {
                self.state = SequencerState::BatchDone;
                None
            }
        }
    }

    /// Consecutive code items starting at the cursor.
    pub fn pending_code_items(&self) -> Vec<ReadItem> {
        self.items[self.cursor.min(self.items.len())..]
            .iter()
            .take_while(|i| i.is_code_result())
            .copied()
            .collect()
    }

    /// Skip the cursor past `n` items without serving them.
    pub fn skip(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.items.len());
        if self.cursor >= self.items.len() {
            self.state = SequencerState::BatchDone;
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == SequencerState::BatchDone
    }
}

// ── Item shape ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Gray,
    Rgb,
    Text,
}

/// What the caller will receive for the current item, after reshaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ItemShape {
    pub format: FrameFormat,
    pub depth: u8,
    pub pixels_per_line: u32,
    /// `None` when the device decides where the page ends.
    pub lines: Option<u32>,
    pub bytes_per_line: u32,
}

impl ItemShape {
    /// Raster shape for a page or section of `pixels` x `lines`.
    pub fn image(job: &ScanConfig, mode: ReshapeMode, pixels: u32, lines: Option<u32>) -> Self {
        let format = match job.mode {
            ColorMode::Color => FrameFormat::Rgb,
            _ => FrameFormat::Gray,
        };
        let depth = mode.output_depth(job.bit_depth());
        let channels = if format == FrameFormat::Rgb { 3 } else { 1 };
        let bits = u64::from(pixels) * channels * u64::from(depth);
        ItemShape {
            format,
            depth,
            pixels_per_line: pixels,
            lines,
            bytes_per_line: bits.div_ceil(8) as u32,
        }
    }

    /// Thumbnail shape from the header the device sends ahead of it.
    pub fn thumbnail(header: &IconHeader) -> Self {
        let bytes_per_line = if header.icon_width_bytes > 0 {
            header.icon_width_bytes
        } else {
            header.icon_width.div_ceil(8)
        };
        ItemShape {
            format: FrameFormat::Gray,
            depth: 1,
            pixels_per_line: header.icon_width,
            lines: Some(header.icon_length),
            bytes_per_line,
        }
    }

    /// A text document of `len` bytes, delivered as a single line.
    pub fn text(len: usize) -> Self {
        ItemShape {
            format: FrameFormat::Text,
            depth: 8,
            pixels_per_line: len as u32,
            lines: Some(1),
            bytes_per_line: len as u32,
        }
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.lines
            .map(|l| u64::from(l) * u64::from(self.bytes_per_line))
    }
}

/// Convert thousandths of an inch to pixels at `resolution` dpi.
pub fn thousandths_to_pixels(value: u32, resolution: u16) -> u32 {
    (u64::from(value) * u64::from(resolution) / 1000) as u32
}

/// Pixel geometry of a section image: `(pixels per line, lines)`.
pub fn section_geometry(job: &ScanConfig, section: u8) -> Option<(u32, u32)> {
    let s = job.sections.get(usize::from(section).checked_sub(1)?)?;
    Some((
        thousandths_to_pixels(s.width, job.resolution),
        thousandths_to_pixels(s.length, job.resolution),
    ))
}

/// Bytes of the thumbnail header that precede icon data.
pub const THUMBNAIL_HEADER_LEN: usize = ICON_HEADER_LEN;
