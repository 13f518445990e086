//! Integration tests: whole batches through the public API against the
//! simulated scanner.
//!
//! Each test drives `start_batch` → `get_current_item_shape` → `read` until
//! `EndOfBatch` (or an error) and checks the bytes delivered and the command
//! log the simulator recorded.

use std::thread;
use std::time::Duration;

use docscan_lib::job::{Section, SectionFlag};
use docscan_lib::protocol::{self, IconHeader, WindowGeometry};
use docscan_lib::readlist::{ItemKind, Side};
use docscan_lib::reshape::interlace_planes;
use docscan_lib::transport::sim::code_record;
use docscan_lib::{
    ColorMode, DeviceOutcome, FrameFormat, ReadStatus, ScanConfig, Scanner, SimulatedScanner,
    find_model,
};

const BH: &str = "COPISCAN II 6338";

/// Scanner over `sim` with no retry/poll delays and a small ring.
fn open(sim: SimulatedScanner, model: &str, buffer_size: usize) -> Scanner {
    let profile = find_model(model).unwrap();
    let mut caps = profile.caps;
    caps.retry_delay = Duration::ZERO;
    caps.autoborder_delay = Duration::ZERO;
    caps.buffer_count = 4;
    caps.buffer_size = buffer_size;
    Scanner::with_capabilities(Box::new(sim), profile, caps, Duration::from_micros(50))
}

/// Read the current item to its end, `chunk` bytes at a time.
fn drain_item(s: &mut Scanner, chunk: usize) -> (Vec<u8>, ReadStatus) {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let (n, status) = s.read(&mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
        if status != ReadStatus::Good {
            return (out, status);
        }
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

// ── Single items ──

#[test]
fn simplex_page_with_unknown_length() {
    let sim = SimulatedScanner::new(BH);
    let page = pattern(216 * 37 + 5, 1);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, page.clone());
    let mut s = open(sim, BH, 1000);

    s.start_batch(ScanConfig::default()).unwrap();
    let shape = s.get_current_item_shape().unwrap();
    assert_eq!(shape.format, FrameFormat::Gray);
    assert_eq!(shape.depth, 1);
    assert_eq!(shape.bytes_per_line, 216);
    assert_eq!(shape.lines, None);

    let (data, status) = drain_item(&mut s, 333);
    assert_eq!(status, ReadStatus::EndOfBatch);
    assert_eq!(data, page);
}

#[test]
fn known_length_stops_at_page_end() {
    let sim = SimulatedScanner::new(BH);
    let page = pattern(216 * 4, 2);
    let mut stream = page.clone();
    stream.extend(vec![0xEE; 500]);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, stream);
    let mut s = open(sim, BH, 300);

    s.start_batch(ScanConfig {
        lines: Some(4),
        ..ScanConfig::default()
    })
    .unwrap();
    let (data, status) = drain_item(&mut s, 4096);
    assert_eq!(status, ReadStatus::EndOfBatch);
    assert_eq!(data.len(), 216 * 4);
    assert_eq!(data, page);
}

#[test]
fn end_of_batch_is_sticky() {
    let sim = SimulatedScanner::new(BH);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, vec![0x55; 20]);
    let mut s = open(sim, BH, 64);
    s.start_batch(ScanConfig::default()).unwrap();
    drain_item(&mut s, 64);
    for _ in 0..3 {
        assert_eq!(s.read(&mut [0u8; 16]).unwrap(), (0, ReadStatus::EndOfBatch));
    }
    assert!(matches!(
        s.get_current_item_shape(),
        Err(DeviceOutcome::InvalidRequest(_))
    ));
}

// ── Ordering ──

#[test]
fn duplex_sections_and_codes_in_list_order() {
    let sim = SimulatedScanner::new(BH);
    sim.set_stream(0x80, 0, pattern(50, 1));
    sim.set_stream(0x81, 0, pattern(25 * 100, 2));
    sim.set_stream(0x90, 0, pattern(70, 3));
    sim.push_code_record(
        0xA1,
        code_record(13, 0, 1, [(0, 0), (0, 40), (90, 40), (90, 0)], 12, b"4711"),
    );
    let log = sim.log();
    let mut s = open(sim, BH, 256);

    s.start_batch(ScanConfig {
        duplex: true,
        barcodes: vec!["code128".into()],
        sections: vec![Section {
            left: 0,
            top: 0,
            width: 1000,
            length: 500,
            flags: vec![SectionFlag::FrontImage, SectionFlag::FrontBarcode],
        }],
        ..ScanConfig::default()
    })
    .unwrap();

    let expected: Vec<u8> = s.read_list().iter().map(|i| i.raw_code).collect();
    assert_eq!(expected, vec![0x80, 0x81, 0x90, 0xA1, 0xBB]);

    let mut delivered = Vec::new();
    let mut sizes = Vec::new();
    loop {
        let shape = s.get_current_item_shape().unwrap();
        let item = s.current_item().unwrap();
        if let ItemKind::SectionImage(1, Side::Front) = item.kind {
            assert_eq!((shape.pixels_per_line, shape.lines), (200, Some(100)));
        }
        delivered.push(item.raw_code);
        let (data, status) = drain_item(&mut s, 100);
        sizes.push(data.len());
        if status == ReadStatus::EndOfBatch {
            let xml = String::from_utf8(data).unwrap();
            assert!(xml.contains("<type>code128</type>"));
            assert!(xml.contains("<data>4711</data>"));
            break;
        }
    }
    // Code results are folded into the codes document.
    assert_eq!(delivered, vec![0x80, 0x81, 0x90, 0xBB]);
    assert_eq!(&sizes[..3], &[50, 2500, 70]);

    let reads: Vec<u8> = log.reads().iter().map(|r| r.0).collect();
    let first_code = reads.iter().position(|&t| t == 0xA1).unwrap();
    assert!(reads[..first_code].iter().all(|&t| protocol::has_image_data(t)));
}

#[test]
fn thumbnail_served_after_images() {
    let sim = SimulatedScanner::new(BH);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, pattern(40, 9));
    let header = IconHeader {
        window_width: 1728,
        window_length: 2200,
        icon_width: 64,
        icon_width_bytes: 8,
        icon_length: 16,
        bit_ordering: 0,
        data_len: 128,
    };
    let icon = pattern(128, 4);
    sim.set_icon(protocol::READ_TYPE_FRONT_ICON, header, icon.clone());
    let mut s = open(sim, BH, 64);

    s.start_batch(ScanConfig {
        icon_width: 64,
        icon_length: 16,
        ..ScanConfig::default()
    })
    .unwrap();
    let (page, status) = drain_item(&mut s, 64);
    assert_eq!((page.len(), status), (40, ReadStatus::EndOfItem));

    let shape = s.get_current_item_shape().unwrap();
    assert_eq!(shape.bytes_per_line, 8);
    assert_eq!(shape.lines, Some(16));
    let (data, status) = drain_item(&mut s, 50);
    assert_eq!(status, ReadStatus::EndOfBatch);
    assert_eq!(data, icon);
}

#[test]
fn autoborder_shape_comes_from_window() {
    let sim = SimulatedScanner::new(BH);
    sim.set_window_geometry(
        0,
        WindowGeometry {
            width: 800,
            length: 3,
            ..WindowGeometry::default()
        },
    );
    sim.set_autoborder_delay(4);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, pattern(300, 5));
    let log = sim.log();
    let mut s = open(sim, BH, 128);

    s.start_batch(ScanConfig {
        autoborder: true,
        ..ScanConfig::default()
    })
    .unwrap();
    let shape = s.get_current_item_shape().unwrap();
    assert_eq!(shape.pixels_per_line, 800);
    assert_eq!(shape.bytes_per_line, 100);
    assert_eq!(shape.lines, Some(3));
    assert_eq!(
        log.opcodes()
            .iter()
            .filter(|&&op| op == protocol::GET_WINDOW)
            .count(),
        5
    );
    let (data, _) = drain_item(&mut s, 1024);
    assert_eq!(data, pattern(300, 5));
}

// ── Reshaping ──

#[test]
fn packed_4bpp_gray_doubles() {
    let sim = SimulatedScanner::new("KV-SS25");
    sim.set_stream(0, 0x00, vec![0x21; 100]);
    let mut s = open(sim, "KV-SS25", 0x8000);

    s.start_batch(ScanConfig {
        mode: ColorMode::Gray,
        depth: 4,
        pixels_per_line: 200,
        lines: Some(1),
        ..ScanConfig::default()
    })
    .unwrap();
    let shape = s.get_current_item_shape().unwrap();
    assert_eq!((shape.depth, shape.bytes_per_line), (8, 200));
    let (data, status) = drain_item(&mut s, 1000);
    assert_eq!(status, ReadStatus::EndOfBatch);
    assert_eq!(data.len(), 200);
    assert!(data.chunks(2).all(|p| p == [0x11, 0x22]));
}

#[test]
fn reversed_lineart_ends_on_end_of_medium() {
    let sim = SimulatedScanner::new("KV-SS25");
    sim.set_stream(0, 0x00, vec![0b0000_0001; 216 * 3]);
    let mut s = open(sim, "KV-SS25", 0x8000);

    s.start_batch(ScanConfig::default()).unwrap();
    let (data, status) = drain_item(&mut s, 100);
    assert_eq!(status, ReadStatus::EndOfBatch);
    assert_eq!(data.len(), 216 * 3);
    assert!(data.iter().all(|&b| b == 0b1000_0000));
}

// ── Overlapped reads ──

#[test]
fn queued_planar_color() {
    let sim = SimulatedScanner::new("JX-250");
    let (ppl, lines) = (40usize, 25u32);
    let rgb = pattern(ppl * 3 * lines as usize, 7);
    sim.set_stream(0, 0, interlace_planes(&rgb, ppl, 3));
    let log = sim.log();
    let mut s = open(sim, "JX-250", 120 * 2);

    s.start_batch(ScanConfig {
        mode: ColorMode::Color,
        depth: 8,
        pixels_per_line: ppl as u32,
        lines: Some(lines),
        ..ScanConfig::default()
    })
    .unwrap();
    let shape = s.get_current_item_shape().unwrap();
    assert_eq!(shape.format, FrameFormat::Rgb);
    let (data, status) = drain_item(&mut s, 77);
    assert_eq!(status, ReadStatus::EndOfBatch);
    assert_eq!(data, rgb);
    assert!(log.reads().iter().all(|&(_, _, len)| len as usize % 120 == 0));
}

#[test]
fn sharp_requires_page_length() {
    let mut s = open(SimulatedScanner::new("JX-610"), "JX-610", 1024);
    assert!(matches!(
        s.start_batch(ScanConfig::default()),
        Err(DeviceOutcome::InvalidRequest(_))
    ));
}

// ── Errors and retries ──

#[test]
fn busy_is_retried() {
    let sim = SimulatedScanner::new(BH);
    sim.inject_busy(3);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, vec![1; 10]);
    let mut s = open(sim, BH, 64);
    s.start_batch(ScanConfig::default()).unwrap();
    let (data, _) = drain_item(&mut s, 64);
    assert_eq!(data.len(), 10);
}

#[test]
fn busy_beyond_budget_fails() {
    let sim = SimulatedScanner::new(BH);
    sim.inject_busy(1000);
    let profile = find_model(BH).unwrap();
    let mut caps = profile.caps;
    caps.retry_delay = Duration::ZERO;
    caps.retry_budget = 2;
    let mut s = Scanner::with_capabilities(Box::new(sim), profile, caps, Duration::ZERO);
    assert!(matches!(
        s.start_batch(ScanConfig::default()),
        Err(DeviceOutcome::IoError(_))
    ));
}

#[test]
fn device_error_ends_batch() {
    let sim = SimulatedScanner::new(BH);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, vec![0; 4096]);
    sim.fail_read_after(2, protocol::build_sense(0x03, 0x00, 0x00));
    let log = sim.log();
    let mut s = open(sim, BH, 100);
    s.start_batch(ScanConfig::default()).unwrap();

    let mut buf = [0u8; 64];
    let err = loop {
        match s.read(&mut buf) {
            Ok((n, ReadStatus::Good)) => assert!(n > 0),
            Ok(other) => panic!("unexpected {other:?}"),
            Err(e) => break e,
        }
    };
    assert_eq!(err, DeviceOutcome::Jammed);
    let issued = log.len();
    assert!(matches!(
        s.read(&mut buf),
        Err(DeviceOutcome::InvalidRequest(_))
    ));
    assert_eq!(log.len(), issued);
}

// ── Cancellation ──

#[test]
fn cancel_mid_item_stops_device() {
    let sim = SimulatedScanner::new(BH);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, vec![0; 10_000]);
    let log = sim.log();
    let mut s = open(sim, BH, 100);
    s.start_batch(ScanConfig::default()).unwrap();
    let mut buf = [0u8; 150];
    assert_eq!(s.read(&mut buf).unwrap(), (150, ReadStatus::Good));

    let issued = log.len();
    s.cancel();
    assert_eq!(s.read(&mut buf), Err(DeviceOutcome::Cancelled));
    assert!(matches!(
        s.read(&mut buf),
        Err(DeviceOutcome::InvalidRequest(_))
    ));
    assert_eq!(log.len(), issued);
}

#[test]
fn cancel_handle_from_another_thread() {
    let sim = SimulatedScanner::new("JX-250").with_read_delay(Duration::from_millis(2));
    sim.set_stream(0, 0, vec![0; 1_000_000]);
    let log = sim.log();
    let mut s = open(sim, "JX-250", 1000);
    s.start_batch(ScanConfig {
        lines: Some(5000),
        pixels_per_line: 1600,
        ..ScanConfig::default()
    })
    .unwrap();

    let handle = s.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.request();
    });
    let mut buf = [0u8; 512];
    let err = loop {
        match s.read(&mut buf) {
            Ok((_, ReadStatus::Good)) => {}
            Ok(other) => panic!("unexpected {other:?}"),
            Err(e) => break e,
        }
    };
    canceller.join().unwrap();
    assert_eq!(err, DeviceOutcome::Cancelled);

    // Abort sequence ends the command stream: ready, read abort, unload.
    let ops = log.opcodes();
    assert_eq!(
        &ops[ops.len() - 3..],
        &[
            protocol::TEST_UNIT_READY,
            protocol::READ_SCANNED_DATA,
            protocol::OBJECT_POSITION
        ]
    );
}

#[test]
fn cancel_without_batch_is_a_no_op() {
    let sim = SimulatedScanner::new(BH);
    let log = sim.log();
    let mut s = open(sim, BH, 64);
    s.cancel();
    assert!(log.is_empty());
}

// ── Batch mode ──

#[test]
fn batch_continues_with_start_scan_only() {
    let sim = SimulatedScanner::new(BH);
    sim.set_stream(protocol::READ_TYPE_FRONT, 0, pattern(216 * 4, 3));
    let log = sim.log();
    let mut s = open(sim, BH, 1024);
    let job = ScanConfig {
        batch: true,
        lines: Some(2),
        ..ScanConfig::default()
    };

    s.start_batch(job.clone()).unwrap();
    let (first, _) = drain_item(&mut s, 4096);
    let before = log.len();
    s.start_batch(job).unwrap();
    let setup: Vec<u8> = log.opcodes()[before..]
        .iter()
        .copied()
        .take_while(|&op| op != protocol::GET_WINDOW)
        .collect();
    assert_eq!(setup, vec![protocol::START_SCAN]);
    let (second, status) = drain_item(&mut s, 4096);
    assert_eq!(status, ReadStatus::EndOfBatch);
    assert_eq!([first, second].concat(), pattern(216 * 4, 3));
}
