//! Device-native raster layouts to canonical sample order.
//!
//! Canonical order is what the image consumer promises: 1-bit data MSB-first,
//! 8-bit samples, colour pixel-interleaved (R, G, B). Some devices deliver
//! something else:
//!
//! - Panasonic KV-SS lineart is LSB-first.
//! - Panasonic 4-bit gray packs two samples per byte, low nibble first.
//! - Sharp JX-250/350 colour sends each line as an R run, a G run and a B run.
//! - Sharp bi-level colour sends three 1-bit planes per line.
//!
//! A [`Reshaper`] is built once per item and fed ring buffer payloads in
//! order. Transfers need not end on a line boundary, so line-based modes keep
//! the tail of an incomplete line until the next call.

use crate::job::{ColorMode, ScanConfig};
use crate::models::NativeLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReshapeMode {
    Identity,
    BitReverse1bpp,
    /// Two samples per byte, low nibble first, each scaled by 17.
    Expand4bppTo8bpp,
    /// `n` 8-bit planes per line, interleaved into `n`-sample pixels.
    DeinterlacePlanes(usize),
    /// `n` 1-bit planes per line (MSB first), expanded to 0x00/0xFF samples.
    DeinterlaceBitPlanes(usize),
}

impl ReshapeMode {
    /// Pick the transform for a job on a device with the given layout.
    pub fn select(layout: &NativeLayout, job: &ScanConfig) -> Self {
        match (job.mode, job.bit_depth()) {
            (ColorMode::Color, 1) => ReshapeMode::DeinterlaceBitPlanes(3),
            (ColorMode::Color, _) if layout.plane_separated_color => {
                ReshapeMode::DeinterlacePlanes(3)
            }
            (_, 1) if layout.bit_reversed_lineart => ReshapeMode::BitReverse1bpp,
            (ColorMode::Gray, 4) if layout.packed_4bpp => ReshapeMode::Expand4bppTo8bpp,
            _ => ReshapeMode::Identity,
        }
    }

    /// Sample depth after reshaping, given the depth the device sends.
    pub fn output_depth(self, native_depth: u8) -> u8 {
        match self {
            ReshapeMode::Expand4bppTo8bpp | ReshapeMode::DeinterlaceBitPlanes(_) => 8,
            _ => native_depth,
        }
    }

    /// Bytes per device line for `pixels` pixels, given the canonical line size.
    pub fn native_bytes_per_line(self, pixels: usize, output_bytes_per_line: usize) -> usize {
        match self {
            ReshapeMode::Identity | ReshapeMode::BitReverse1bpp => output_bytes_per_line,
            ReshapeMode::Expand4bppTo8bpp => pixels.div_ceil(2),
            ReshapeMode::DeinterlacePlanes(n) => n * pixels,
            ReshapeMode::DeinterlaceBitPlanes(n) => n * pixels.div_ceil(8),
        }
    }

    fn is_bytewise(self) -> bool {
        matches!(self, ReshapeMode::Identity | ReshapeMode::BitReverse1bpp)
    }
}

// ── Bit reversal ──

const fn build_reverse_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).reverse_bits();
        i += 1;
    }
    table
}

/// `BIT_REVERSE[b]` is `b` with its bit order mirrored.
pub static BIT_REVERSE: [u8; 256] = build_reverse_table();

pub fn reverse_bits_in_place(data: &mut [u8]) {
    for b in data {
        *b = BIT_REVERSE[*b as usize];
    }
}

// ── Line transforms ──

fn expand_4bpp(line: &[u8], pixels: usize, out: &mut Vec<u8>) {
    let start = out.len();
    for &b in line {
        out.push((b & 0x0f) * 17);
        out.push((b >> 4) * 17);
    }
    // Odd widths carry a pad nibble at the end of each line.
    out.truncate(start + pixels);
}

fn deinterlace_planes(line: &[u8], pixels: usize, n: usize, out: &mut Vec<u8>) {
    out.reserve(n * pixels);
    for px in 0..pixels {
        for plane in 0..n {
            out.push(line[plane * pixels + px]);
        }
    }
}

fn deinterlace_bit_planes(line: &[u8], pixels: usize, n: usize, out: &mut Vec<u8>) {
    let plane_len = pixels.div_ceil(8);
    out.reserve(n * pixels);
    for px in 0..pixels {
        let mask = 0x80u8 >> (px % 8);
        for plane in 0..n {
            let byte = line[plane * plane_len + px / 8];
            out.push(if byte & mask != 0 { 0xff } else { 0x00 });
        }
    }
}

/// Inverse of [`ReshapeMode::DeinterlacePlanes`]: pixel-interleaved lines
/// back to plane runs. Used to build device-native test data.
pub fn interlace_planes(data: &[u8], pixels: usize, n: usize) -> Vec<u8> {
    let line_len = n * pixels;
    let mut out = Vec::with_capacity(data.len());
    for line in data.chunks_exact(line_len) {
        for plane in 0..n {
            out.extend(line.iter().skip(plane).step_by(n));
        }
    }
    out
}

// ── Reshaper ──

#[derive(Debug)]
pub struct Reshaper {
    mode: ReshapeMode,
    pixels: usize,
    native_line: usize,
    carry: Vec<u8>,
}

impl Reshaper {
    pub fn new(mode: ReshapeMode, pixels: usize, native_line: usize) -> Self {
        debug_assert!(mode.is_bytewise() || native_line > 0);
        Reshaper {
            mode,
            pixels,
            native_line: native_line.max(1),
            carry: Vec::new(),
        }
    }

    /// Declare the item's total device length. It has to be whole lines.
    pub fn with_expected_len(self, expected: Option<u64>) -> Self {
        if let Some(len) = expected
            && !self.mode.is_bytewise()
        {
            debug_assert_eq!(
                len % self.native_line as u64,
                0,
                "{:?}: {len} bytes is not a whole number of {}-byte lines",
                self.mode,
                self.native_line
            );
        }
        self
    }

    pub fn mode(&self) -> ReshapeMode {
        self.mode
    }

    /// Reshape `input`, appending canonical bytes to `out`.
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) {
        match self.mode {
            ReshapeMode::Identity => out.extend_from_slice(input),
            ReshapeMode::BitReverse1bpp => {
                out.extend(input.iter().map(|&b| BIT_REVERSE[b as usize]))
            }
            _ => self.push_lines(input, out),
        }
    }

    fn push_lines(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if !self.carry.is_empty() {
            let need = self.native_line - self.carry.len();
            let take = need.min(input.len());
            self.carry.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.carry.len() < self.native_line {
                return;
            }
            let line = std::mem::take(&mut self.carry);
            self.line(&line, out);
        }
        let mut lines = input.chunks_exact(self.native_line);
        for line in &mut lines {
            self.line(line, out);
        }
        self.carry.extend_from_slice(lines.remainder());
    }

    fn line(&self, line: &[u8], out: &mut Vec<u8>) {
        match self.mode {
            ReshapeMode::Expand4bppTo8bpp => expand_4bpp(line, self.pixels, out),
            ReshapeMode::DeinterlacePlanes(n) => deinterlace_planes(line, self.pixels, n, out),
            ReshapeMode::DeinterlaceBitPlanes(n) => {
                deinterlace_bit_planes(line, self.pixels, n, out)
            }
            ReshapeMode::Identity | ReshapeMode::BitReverse1bpp => out.extend_from_slice(line),
        }
    }

    /// Bytes held back waiting for the rest of their line.
    pub fn carried(&self) -> usize {
        self.carry.len()
    }

    /// End of item. A partial line left over means the line size was
    /// configured wrong: debug builds panic, release builds drop the bytes
    /// and return how many were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.carry.len();
        debug_assert_eq!(
            dropped, 0,
            "{:?}: item ended {dropped} bytes into a {}-byte line",
            self.mode, self.native_line
        );
        if dropped > 0 {
            log::warn!(
                "{:?}: item ended {dropped} bytes into a {}-byte line",
                self.mode,
                self.native_line
            );
        }
        self.carry.clear();
        dropped
    }
}
