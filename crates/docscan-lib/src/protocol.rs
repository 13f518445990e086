//! SCSI command constants and wire layouts for document scanners.
//!
//! Opcodes, read-type codes and page layouts follow the Bell+Howell Copiscan
//! command set; Sharp JX and Panasonic KV-SS devices use the same opcodes with
//! a subset of the fields. All multi-byte fields are big-endian.
//!
//! ## Read type encoding
//!
//! READ SCANNED DATA carries a data type code in CDB byte 2:
//! - `0x80` front page, `0x81..=0x88` front sections 1..8
//! - `0x90` back page, `0x91..=0x98` back sections 1..8
//! - `0xA0`/`0xB0` front/back barcodes (+section), `0xC0`/`0xD0` patch codes
//! - `0x89`/`0x99` front/back thumbnail (icon)
//! - `0xBB` is not sent to the device; it names the decoded-codes document

// ── Opcodes ──

pub const TEST_UNIT_READY: u8 = 0x00;
pub const MODE_SELECT: u8 = 0x15;
pub const START_SCAN: u8 = 0x1B;
pub const SET_WINDOW: u8 = 0x24;
pub const GET_WINDOW: u8 = 0x25;
/// READ(10), called READ SCANNED DATA in scanner manuals.
pub const READ_SCANNED_DATA: u8 = 0x28;
pub const OBJECT_POSITION: u8 = 0x31;

// ── Read type codes ──

pub const READ_TYPE_FRONT: u8 = 0x80;
pub const READ_TYPE_BACK: u8 = 0x90;
pub const READ_TYPE_FRONT_BARCODE: u8 = 0xA0;
pub const READ_TYPE_BACK_BARCODE: u8 = 0xB0;
pub const READ_TYPE_FRONT_PATCHCODE: u8 = 0xC0;
pub const READ_TYPE_BACK_PATCHCODE: u8 = 0xD0;
pub const READ_TYPE_FRONT_ICON: u8 = 0x89;
pub const READ_TYPE_BACK_ICON: u8 = 0x99;
/// Pseudo read type for the decoded bar/patch code document.
pub const READ_TYPE_SENDBARFILE: u8 = 0xBB;

/// Number of section windows a page can carry.
pub const NUM_SECTIONS: u8 = 8;

/// Whether a read type code yields raster data (pages, sections, icons).
pub fn has_image_data(code: u8) -> bool {
    (READ_TYPE_FRONT..=READ_TYPE_BACK_ICON).contains(&code)
}

/// Human-readable name of a read type code, used in logs and the codes document.
pub fn read_type_name(code: u8) -> String {
    let in_sections = |base: u8| code > base && code <= base + NUM_SECTIONS;
    match code {
        READ_TYPE_FRONT => "front page".into(),
        READ_TYPE_BACK => "back page".into(),
        READ_TYPE_FRONT_BARCODE => "front page barcode".into(),
        READ_TYPE_BACK_BARCODE => "back page barcode".into(),
        READ_TYPE_FRONT_PATCHCODE => "front page patchcode".into(),
        READ_TYPE_BACK_PATCHCODE => "back page patchcode".into(),
        READ_TYPE_FRONT_ICON => "front page icon".into(),
        READ_TYPE_BACK_ICON => "back page icon".into(),
        READ_TYPE_SENDBARFILE => "transmit bar/patch codes".into(),
        c if in_sections(READ_TYPE_FRONT) => format!("front section {}", c - READ_TYPE_FRONT),
        c if in_sections(READ_TYPE_BACK) => format!("back section {}", c - READ_TYPE_BACK),
        c if in_sections(READ_TYPE_FRONT_BARCODE) => {
            format!("front barcode section {}", c - READ_TYPE_FRONT_BARCODE)
        }
        c if in_sections(READ_TYPE_BACK_BARCODE) => {
            format!("back barcode section {}", c - READ_TYPE_BACK_BARCODE)
        }
        c if in_sections(READ_TYPE_FRONT_PATCHCODE) => {
            format!("front patchcode section {}", c - READ_TYPE_FRONT_PATCHCODE)
        }
        c if in_sections(READ_TYPE_BACK_PATCHCODE) => {
            format!("back patchcode section {}", c - READ_TYPE_BACK_PATCHCODE)
        }
        _ => "unknown".into(),
    }
}

// ── Mode pages ──

pub const PAGE_MEASUREMENT: u8 = 0x03;
pub const PAGE_TIMEOUT: u8 = 0x20;
pub const PAGE_ICON: u8 = 0x21;
pub const PAGE_BARCODE_PRIORITY: u8 = 0x30;
pub const PAGE_BARCODE_PARAM1: u8 = 0x31;

/// Basic measurement unit: inch. Paired with a divisor of 1000 for SET WINDOW.
pub const UNIT_INCH: u8 = 0x00;
/// Basic measurement unit: device pixel (point). Used while reading.
pub const UNIT_POINT: u8 = 0x02;

/// Mode parameter header (4 bytes) + page code + length + 6 parameter bytes.
pub const MODE_PAGE_LEN: usize = 12;

/// Barcode symbologies that may be placed in the priority page, in table order.
pub const MAX_SEARCH_BARS: usize = 6;

// ── SET WINDOW ──

pub const BATCH_DISABLE: u8 = 0x00;
pub const BATCH_ENABLE: u8 = 0x01;
pub const BATCH_TERMINATE: u8 = 0x02;
pub const BATCH_ABORT: u8 = 0x03;

/// Window parameter header length preceding the descriptor.
pub const WINDOW_HEADER_LEN: usize = 8;
/// Window descriptor without section blocks.
pub const WINDOW_DESCRIPTOR_LEN: usize = 64;
/// One section block: ulx, uly, width, length (4 bytes each) + compression + 6 reserved.
pub const SECTION_BLOCK_LEN: usize = 24;

/// GET WINDOW retries while waiting for automatic border detection.
pub const AUTOBORDER_TRIES: u32 = 100;

// ── OBJECT POSITION ──

pub const OBJECT_UNLOAD: u8 = 0x00;
pub const OBJECT_LOAD: u8 = 0x01;

// ── Sense data ──

/// Maximum sense block length requested from the host adapter.
pub const SENSE_LEN: usize = 32;

pub const SENSE_NO_SENSE: u8 = 0x00;
pub const SENSE_RECOVERED_ERROR: u8 = 0x01;
pub const SENSE_NOT_READY: u8 = 0x02;
pub const SENSE_MEDIUM_ERROR: u8 = 0x03;
pub const SENSE_HARDWARE_ERROR: u8 = 0x04;
pub const SENSE_ILLEGAL_REQUEST: u8 = 0x05;
pub const SENSE_UNIT_ATTENTION: u8 = 0x06;
pub const SENSE_VENDOR_SPECIFIC: u8 = 0x09;
pub const SENSE_ABORTED_COMMAND: u8 = 0x0B;

/// Fixed-format sense block fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    /// Response code with the VALID bit masked off (0x70 current, 0x71 deferred).
    pub response_code: u8,
    /// VALID bit: the information field is meaningful.
    pub valid: bool,
    pub key: u8,
    /// End of medium.
    pub eom: bool,
    /// Incorrect length indicator (short transfer).
    pub ili: bool,
    /// Information field (bytes 3..7). For short reads: bytes not transferred.
    pub information: u32,
    pub additional_len: u8,
    /// `None` when the block is too short to carry ASC/ASCQ.
    pub asc: Option<u8>,
    pub ascq: Option<u8>,
}

impl SenseData {
    /// Parse a fixed-format sense block. Returns `None` if fewer than 3 bytes.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 3 {
            return None;
        }
        let information = if raw.len() >= 7 {
            u32::from_be_bytes([raw[3], raw[4], raw[5], raw[6]])
        } else {
            0
        };
        let additional_len = raw.get(7).copied().unwrap_or(0);
        Some(SenseData {
            response_code: raw[0] & 0x7F,
            valid: raw[0] & 0x80 != 0,
            key: raw[2] & 0x0F,
            eom: raw[2] & 0x40 != 0,
            ili: raw[2] & 0x20 != 0,
            information,
            additional_len,
            asc: raw.get(12).copied(),
            ascq: raw.get(13).copied(),
        })
    }

    /// Total length the device claims for this block (`7 + additional length`).
    pub fn reported_len(&self) -> usize {
        7 + self.additional_len as usize
    }

    /// Residue (untransferred bytes) when the information field is valid.
    pub fn residue(&self) -> Option<u32> {
        self.valid.then_some(self.information)
    }
}

/// Build an 18-byte fixed-format sense block. Used by the simulator and tests.
pub fn build_sense(key: u8, asc: u8, ascq: u8) -> Vec<u8> {
    let mut s = vec![0u8; 18];
    s[0] = 0x70;
    s[2] = key & 0x0F;
    s[7] = 10;
    s[12] = asc;
    s[13] = ascq;
    s
}

/// Sense block for a short read: ILI set, VALID set, information = residue.
pub fn build_short_read_sense(residue: u32) -> Vec<u8> {
    let mut s = build_sense(SENSE_NO_SENSE, 0x00, 0x05);
    s[0] |= 0x80;
    s[2] |= 0x20;
    s[3..7].copy_from_slice(&residue.to_be_bytes());
    s
}

// ── Big-endian helpers ──

pub fn put_u24(dst: &mut [u8], v: u32) {
    dst[0] = (v >> 16) as u8;
    dst[1] = (v >> 8) as u8;
    dst[2] = v as u8;
}

pub fn get_u24(src: &[u8]) -> u32 {
    (src[0] as u32) << 16 | (src[1] as u32) << 8 | src[2] as u32
}

pub fn get_u16(src: &[u8]) -> u16 {
    u16::from_be_bytes([src[0], src[1]])
}

pub fn get_u32(src: &[u8]) -> u32 {
    u32::from_be_bytes([src[0], src[1], src[2], src[3]])
}

// ── CDB builders ──

pub fn test_unit_ready() -> [u8; 6] {
    [TEST_UNIT_READY, 0, 0, 0, 0, 0]
}

/// READ SCANNED DATA: data type code in byte 2, side qualifier in byte 5,
/// 24-bit transfer length in bytes 6..9.
pub fn read_scanned_data(read_type: u8, side: u8, len: u32) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = READ_SCANNED_DATA;
    cdb[2] = read_type;
    cdb[5] = side;
    put_u24(&mut cdb[6..9], len);
    cdb
}

/// READ with the abort flag in byte 5, telling the device to drop the current scan.
pub fn read_abort() -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = READ_SCANNED_DATA;
    cdb[5] = 0x02;
    cdb
}

pub fn object_position(action: u8) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = OBJECT_POSITION;
    cdb[1] = action;
    cdb
}

/// START SCAN for one or two sides.
pub fn start_scan(duplex: bool) -> [u8; 8] {
    let mut cdb = [0u8; 8];
    cdb[0] = START_SCAN;
    cdb[4] = if duplex { 2 } else { 1 };
    cdb[7] = 1;
    cdb
}

/// MODE SELECT with the page-format bit set. The page goes out as the data block.
pub fn mode_select(param_len: usize) -> [u8; 6] {
    [MODE_SELECT, 0x10, 0, 0, param_len as u8, 0]
}

/// Build a mode parameter list: zeroed 4-byte header, page code, length 6, params.
pub fn mode_page(page_code: u8, params: [u8; 6]) -> [u8; MODE_PAGE_LEN] {
    let mut page = [0u8; MODE_PAGE_LEN];
    page[4] = page_code;
    page[5] = 0x06;
    page[6..].copy_from_slice(&params);
    page
}

pub fn set_window(param_len: usize) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = SET_WINDOW;
    put_u24(&mut cdb[6..9], param_len as u32);
    cdb
}

/// GET WINDOW for window 0 (front) or 1 (back); window id in byte 5.
pub fn get_window(window_id: u8, param_len: usize) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = GET_WINDOW;
    cdb[5] = window_id;
    put_u24(&mut cdb[6..9], param_len as u32);
    cdb
}

// ── Window descriptor ──

/// Fields of a window descriptor block that the pipeline reads back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowGeometry {
    pub window_id: u8,
    /// Non-zero once automatic border detection has completed.
    pub autoborder: u8,
    pub x_res: u16,
    pub y_res: u16,
    pub ulx: u32,
    pub uly: u32,
    pub width: u32,
    pub length: u32,
}

impl WindowGeometry {
    /// Parse the descriptor following the 8-byte window parameter header.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let d = data.get(WINDOW_HEADER_LEN..WINDOW_HEADER_LEN + 22)?;
        Some(WindowGeometry {
            window_id: d[0],
            autoborder: d[1],
            x_res: get_u16(&d[2..4]),
            y_res: get_u16(&d[4..6]),
            ulx: get_u32(&d[6..10]),
            uly: get_u32(&d[10..14]),
            width: get_u32(&d[14..18]),
            length: get_u32(&d[18..22]),
        })
    }

    /// Serialize into a header + descriptor block (no sections).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; WINDOW_HEADER_LEN + WINDOW_DESCRIPTOR_LEN];
        buf[6..8].copy_from_slice(&(WINDOW_DESCRIPTOR_LEN as u16).to_be_bytes());
        let d = &mut buf[WINDOW_HEADER_LEN..];
        d[0] = self.window_id;
        d[1] = self.autoborder;
        d[2..4].copy_from_slice(&self.x_res.to_be_bytes());
        d[4..6].copy_from_slice(&self.y_res.to_be_bytes());
        d[6..10].copy_from_slice(&self.ulx.to_be_bytes());
        d[10..14].copy_from_slice(&self.uly.to_be_bytes());
        d[14..18].copy_from_slice(&self.width.to_be_bytes());
        d[18..22].copy_from_slice(&self.length.to_be_bytes());
        buf
    }
}

// ── Thumbnail header ──

/// Length of the header preceding thumbnail pixel data.
pub const ICON_HEADER_LEN: usize = 32;

/// Thumbnail header: true dimensions of the icon that follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IconHeader {
    pub window_width: u32,
    pub window_length: u32,
    pub icon_width: u32,
    pub icon_width_bytes: u32,
    pub icon_length: u32,
    pub bit_ordering: u8,
    pub data_len: u32,
}

impl IconHeader {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < ICON_HEADER_LEN {
            return None;
        }
        Some(IconHeader {
            window_width: get_u32(&raw[0..4]),
            window_length: get_u32(&raw[4..8]),
            icon_width: get_u32(&raw[8..12]),
            icon_width_bytes: get_u32(&raw[12..16]),
            icon_length: get_u32(&raw[16..20]),
            bit_ordering: raw[20],
            data_len: get_u32(&raw[28..32]),
        })
    }

    pub fn to_bytes(&self) -> [u8; ICON_HEADER_LEN] {
        let mut b = [0u8; ICON_HEADER_LEN];
        b[0..4].copy_from_slice(&self.window_width.to_be_bytes());
        b[4..8].copy_from_slice(&self.window_length.to_be_bytes());
        b[8..12].copy_from_slice(&self.icon_width.to_be_bytes());
        b[12..16].copy_from_slice(&self.icon_width_bytes.to_be_bytes());
        b[16..20].copy_from_slice(&self.icon_length.to_be_bytes());
        b[20] = self.bit_ordering;
        b[28..32].copy_from_slice(&self.data_len.to_be_bytes());
        b
    }
}

// ── Decoded code record ──

/// Length of one decoded bar/patch code record.
pub const CODE_RECORD_LEN: usize = 200;
/// Maximum payload bytes in a code record.
pub const CODE_DATA_LEN: usize = 160;
/// Offset of the payload length byte; payload follows it.
pub const CODE_LEN_OFFSET: usize = 39;
