//! Decoded bar/patch code records and the document built from them.
//!
//! The scanner decodes codes itself and hands back fixed 200-byte records,
//! one per READ, until it reports "code not found". The pipeline collects
//! them into a small XML document that is served as the last item of a batch.

use std::fmt::Write as _;

use crate::protocol::{self, CODE_DATA_LEN, CODE_LEN_OFFSET, CODE_RECORD_LEN, get_u16};

/// Barcode symbologies in device id order. Id 0 disables a priority slot.
pub const SYMBOLOGIES: [&str; 15] = [
    "none",
    "ean-8",
    "ean-13",
    "reserved-ean-add",
    "code39",
    "code2-5-interleaved",
    "code2-5-3lines-matrix",
    "code2-5-3lines-datalogic",
    "code2-5-5lines-industrial",
    "patchcode",
    "codabar",
    "codabar-with-start-stop",
    "code39ascii",
    "code128",
    "code2-5-5lines-iata",
];

/// Records read per code item before giving up on a "not found" reply.
pub const MAX_RECORDS_PER_ITEM: usize = 100;

const MM_PER_INCH: f64 = 25.4;
/// Margin in mm added around the reported code rectangle.
const DECODE_FUDGE_MM: f64 = 1.0;
const FALLBACK_RESOLUTION: f64 = 200.0;

pub fn symbology_id(name: &str) -> Option<u8> {
    SYMBOLOGIES
        .iter()
        .position(|s| s.eq_ignore_ascii_case(name.trim()))
        .filter(|&i| i > 0)
        .map(|i| i as u8)
}

pub fn symbology_name(id: u16) -> &'static str {
    match id as usize {
        i if i > 0 && i < SYMBOLOGIES.len() => SYMBOLOGIES[i],
        _ => "unknown",
    }
}

pub fn orientation_name(code: u16) -> &'static str {
    match code {
        0 | 7 => "vertical upwards",
        1 | 2 => "horizontal right",
        3 | 4 => "vertical downwards",
        5 | 6 => "horizontal left",
        _ => "unknown",
    }
}

// ── Record ──

/// A corner of the code's location, in device pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

/// One decoded code as returned by READ on a code read type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRecord {
    pub symbology: u16,
    pub status: u16,
    pub orientation: u16,
    /// Corners in record order: A (bottom left), B (top left),
    /// C (bottom right), D (top right).
    pub corners: [Point; 4],
    pub search_time: u16,
    pub data: Vec<u8>,
}

impl CodeRecord {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < CODE_RECORD_LEN {
            return None;
        }
        let mut corners = [Point::default(); 4];
        for (i, c) in corners.iter_mut().enumerate() {
            let off = 8 + i * 4;
            c.x = get_u16(&raw[off..off + 2]);
            c.y = get_u16(&raw[off + 2..off + 4]);
        }
        let len = (raw[CODE_LEN_OFFSET] as usize).min(CODE_DATA_LEN - 1);
        let payload = &raw[CODE_LEN_OFFSET + 1..CODE_LEN_OFFSET + 1 + len];
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        Some(CodeRecord {
            symbology: get_u16(&raw[2..4]),
            status: get_u16(&raw[4..6]),
            orientation: get_u16(&raw[6..8]),
            corners,
            search_time: get_u16(&raw[24..26]),
            data: payload[..end].to_vec(),
        })
    }

    /// Reported payload length (the length byte, not the trimmed data).
    pub fn reported_len(raw: &[u8]) -> usize {
        raw.get(CODE_LEN_OFFSET).copied().unwrap_or(0) as usize
    }

    /// Axis-aligned bounding box over all four corners: `(x, y, w, l)` in pixels.
    pub fn bounding_box(&self) -> (u16, u16, u16, u16) {
        let xs = self.corners.iter().map(|c| c.x);
        let ys = self.corners.iter().map(|c| c.y);
        let min_x = xs.clone().min().unwrap_or(0);
        let max_x = xs.max().unwrap_or(0);
        let min_y = ys.clone().min().unwrap_or(0);
        let max_y = ys.max().unwrap_or(0);
        (min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Bounding box in millimetres with the decode margin applied.
    pub fn rectangle_mm(&self, resolution: f64) -> (f64, f64, f64, f64) {
        let res = if resolution <= 0.0 {
            log::warn!(
                "bad resolution value {resolution}, replacing with {FALLBACK_RESOLUTION}"
            );
            FALLBACK_RESOLUTION
        } else {
            resolution
        };
        let (x, y, w, l) = self.bounding_box();
        let to_mm = |v: u16| f64::from(v) * MM_PER_INCH / res;
        (
            (to_mm(x) - DECODE_FUDGE_MM).max(0.0),
            (to_mm(y) - DECODE_FUDGE_MM).max(0.0),
            to_mm(w) + DECODE_FUDGE_MM * 4.0,
            to_mm(l) + DECODE_FUDGE_MM * 4.0,
        )
    }
}

// ── Document ──

/// Accumulates `<barcode>` entries for the decoded-codes item.
#[derive(Debug, Clone, Default)]
pub struct CodesDocument {
    body: String,
    count: usize,
}

impl CodesDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one record found under `read_type` (a code read type + section).
    pub fn push(&mut self, read_type: u8, raw_len: usize, rec: &CodeRecord, resolution: f64) {
        let (x, y, w, l) = rec.rectangle_mm(resolution);
        let [a, b, c, d] = rec.corners;
        let out = &mut self.body;
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "<barcode>\n <section>{}</section>\n <type>{}</type>\n <status-flag>{}</status-flag>\n",
            protocol::read_type_name(read_type),
            symbology_name(rec.symbology),
            rec.status
        );
        let _ = write!(
            out,
            " <orientation>{}</orientation>\n <location>\n",
            orientation_name(rec.orientation)
        );
        let _ = writeln!(out, "  <tl><x>{}</x><y>{}</y></tl>", b.x, b.y);
        let _ = writeln!(out, "  <tr><x>{}</x><y>{}</y></tr>", d.x, d.y);
        let _ = writeln!(out, "  <bl><x>{}</x><y>{}</y></bl>", a.x, a.y);
        let _ = write!(out, "  <br><x>{}</x><y>{}</y></br>\n </location>\n", c.x, c.y);
        let _ = writeln!(out, " <rectangle>{w:.2}x{l:.2}+{x:.2}+{y:.2}</rectangle>");
        let _ = write!(
            out,
            " <search-time>{}</search-time>\n <length>{}</length>\n",
            rec.search_time, raw_len
        );
        let _ = write!(
            out,
            " <data>{}</data>\n</barcode>\n",
            escape(&String::from_utf8_lossy(&rec.data))
        );
        self.count += 1;
    }

    pub fn finish(&self) -> Vec<u8> {
        format!("<xml-stream>\n{}</xml-stream>\n", self.body).into_bytes()
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}
