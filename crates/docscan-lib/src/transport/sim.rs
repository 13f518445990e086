//! In-process simulated scanner for tests and the `simulate` command.
//!
//! Serves one byte stream per `(read type, side)` pair, decoded bar/patch
//! code records, thumbnail data and window geometry. Busy completions and
//! sense faults can be injected; every command that reaches the device is
//! recorded in a [`SimLog`] that stays readable after the scanner has been
//! moved into a pipeline.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Completion, DeviceInfo, Result, ScsiDevice, ScsiStatus, Token, TransportError};
use crate::job::ScanConfig;
use crate::models::{CommandSet, ModelProfile, find_model};
use crate::protocol::{self, WindowGeometry, build_sense, build_short_read_sense};
use crate::readlist::{ItemKind, ItemShape, build_read_list, section_geometry};
use crate::reshape::ReshapeMode;
use crate::setup::read_command;

/// How the device reports a read that ran past the end of its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortRead {
    /// ILI + residue in the information field.
    Residue,
    /// EOM + ILI + residue: end of page.
    EndOfMedium,
}

#[derive(Debug, Default)]
struct SimState {
    streams: HashMap<(u8, u8), VecDeque<u8>>,
    code_records: HashMap<u8, VecDeque<Vec<u8>>>,
    windows: [WindowGeometry; 2],
    /// GET WINDOW polls answered with the auto-border bit still clear.
    autoborder_pending: u32,
    busy: u32,
    faults: VecDeque<Vec<u8>>,
    /// Fail the read after this many successful data reads.
    read_fault: Option<(u32, Vec<u8>)>,
    reads: u32,
    commands: Vec<Vec<u8>>,
    data_out: Vec<(u8, Vec<u8>)>,
    /// Queued commands run when submitted; their results wait here for reap.
    queue: VecDeque<(Token, Completion, Vec<u8>)>,
    next_token: Token,
}

/// Read-only view of what the simulated device has seen.
#[derive(Debug, Clone)]
pub struct SimLog(Arc<Mutex<SimState>>);

impl SimLog {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every CDB issued, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state().commands.clone()
    }

    /// Opcode of every command issued, in order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.state().commands.iter().map(|c| c[0]).collect()
    }

    /// Data-out blocks sent with commands of the given opcode.
    pub fn data_out(&self, opcode: u8) -> Vec<Vec<u8>> {
        self.state()
            .data_out
            .iter()
            .filter(|(op, _)| *op == opcode)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// READ SCANNED DATA commands, as `(read type, side, length)`.
    pub fn reads(&self) -> Vec<(u8, u8, u32)> {
        self.state()
            .commands
            .iter()
            .filter(|c| c[0] == protocol::READ_SCANNED_DATA && c.len() >= 9)
            .map(|c| (c[2], c[5], protocol::get_u24(&c[6..9])))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().commands.is_empty()
    }
}

pub struct SimulatedScanner {
    info: DeviceInfo,
    short_read: ShortRead,
    queue_depth: usize,
    read_delay: Duration,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedScanner {
    /// A simulator answering INQUIRY like the named model. Unknown names get
    /// Bell+Howell behaviour.
    pub fn new(model: &str) -> Self {
        let profile = find_model(model);
        let (vendor, product) = profile
            .map(|p| (p.vendor.to_string(), p.product.to_string()))
            .unwrap_or_else(|| ("SIM".into(), model.to_string()));
        let short_read = match profile.map(|p| p.command_set) {
            Some(CommandSet::Matsushita) => ShortRead::EndOfMedium,
            _ => ShortRead::Residue,
        };
        let queue_depth = match profile {
            Some(p) if p.caps.overlapped => 8,
            _ => 1,
        };
        SimulatedScanner {
            info: DeviceInfo {
                path: format!("sim:{model}"),
                vendor,
                product,
            },
            short_read,
            queue_depth,
            read_delay: Duration::ZERO,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self) -> SimLog {
        SimLog(Arc::clone(&self.state))
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Sleep this long in every data read, to keep a producer thread busy.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Append bytes to the stream served for `(read type, side)`.
    pub fn set_stream(&self, read_type: u8, side: u8, data: Vec<u8>) {
        self.state()
            .streams
            .entry((read_type, side))
            .or_default()
            .extend(data);
    }

    /// Queue a thumbnail: 32-byte header followed by `data`.
    pub fn set_icon(&self, read_type: u8, header: protocol::IconHeader, data: Vec<u8>) {
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend(data);
        self.set_stream(read_type, 0, bytes);
    }

    /// Queue one 200-byte decoded code record for a barcode/patch read type.
    pub fn push_code_record(&self, read_type: u8, record: Vec<u8>) {
        self.state()
            .code_records
            .entry(read_type)
            .or_default()
            .push_back(record);
    }

    pub fn set_window_geometry(&self, window_id: u8, geometry: WindowGeometry) {
        self.state().windows[(window_id & 1) as usize] = geometry;
    }

    /// Answer this many GET WINDOW polls before border detection completes.
    pub fn set_autoborder_delay(&self, polls: u32) {
        self.state().autoborder_pending = polls;
    }

    /// Answer the next `count` commands with BUSY status.
    pub fn inject_busy(&self, count: u32) {
        self.state().busy = count;
    }

    /// Answer the next command with CHECK CONDITION and this sense block.
    pub fn inject_sense(&self, sense: Vec<u8>) {
        self.state().faults.push_back(sense);
    }

    /// Let `reads` data reads succeed, then fail the next one with `sense`.
    pub fn fail_read_after(&self, reads: u32, sense: Vec<u8>) {
        self.state().read_fault = Some((reads, sense));
    }

    /// Load synthetic data for every item `job` will read: a gradient for
    /// images, a header plus checkerboard for thumbnails and one record per
    /// code item. Pages of unknown length get `default_lines` lines.
    pub fn feed_job(&self, profile: &ModelProfile, job: &ScanConfig, default_lines: u32) {
        let mode = ReshapeMode::select(&profile.layout, job);
        for item in build_read_list(job) {
            let cdb = read_command(profile, &item, 0);
            let key = (cdb[2], cdb[5]);
            match item.kind {
                ItemKind::ImagePlane(_) | ItemKind::SectionImage(..) => {
                    let (ppl, lines) = match item.kind {
                        ItemKind::SectionImage(n, _) => match section_geometry(job, n) {
                            Some((ppl, lines)) => (ppl, lines),
                            None => continue,
                        },
                        _ => (job.pixels_per_line, job.lines.unwrap_or(default_lines)),
                    };
                    let shape = ItemShape::image(job, mode, ppl, Some(lines));
                    let line =
                        mode.native_bytes_per_line(ppl as usize, shape.bytes_per_line as usize);
                    let data = (0..lines as usize * line)
                        .map(|i| ((i / line + i % line) & 0xFF) as u8)
                        .collect();
                    self.set_stream(key.0, key.1, data);
                }
                ItemKind::Thumbnail(_) => {
                    let width = u32::from(job.icon_width);
                    let length = u32::from(job.icon_length);
                    let width_bytes = width.div_ceil(8);
                    let header = protocol::IconHeader {
                        window_width: job.pixels_per_line,
                        window_length: job.lines.unwrap_or(default_lines),
                        icon_width: width,
                        icon_width_bytes: width_bytes,
                        icon_length: length,
                        bit_ordering: 0,
                        data_len: width_bytes * length,
                    };
                    let data = (0..width_bytes * length)
                        .map(|i| if (i / width_bytes) % 2 == 0 { 0xAA } else { 0x55 })
                        .collect();
                    self.set_icon(key.0, header, data);
                }
                ItemKind::BarcodeResult(..) | ItemKind::PatchResult(..) => {
                    let symbology = if matches!(item.kind, ItemKind::PatchResult(..)) {
                        9
                    } else {
                        job.barcode_ids().first().copied().map_or(4, u16::from)
                    };
                    let data = format!("SIM-{:02X}", item.raw_code);
                    self.push_code_record(
                        item.raw_code,
                        code_record(
                            symbology,
                            0,
                            1,
                            [(100, 100), (100, 300), (600, 300), (600, 100)],
                            25,
                            data.as_bytes(),
                        ),
                    );
                }
                ItemKind::DecodedCodesFile => {}
            }
        }
    }

    fn short_read_sense(&self, residue: u32) -> Vec<u8> {
        let mut s = build_short_read_sense(residue);
        if self.short_read == ShortRead::EndOfMedium {
            s[2] |= 0x40;
            s[13] = 0x00;
        }
        s
    }

    fn process(&self, cdb: &[u8], data_out: &[u8], data_in: &mut [u8]) -> Completion {
        let is_read = cdb[0] == protocol::READ_SCANNED_DATA;
        if is_read && !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }

        let mut st = self.state();
        if st.busy > 0 {
            st.busy -= 1;
            return Completion {
                transferred: 0,
                status: ScsiStatus::Busy,
            };
        }
        if let Some(sense) = st.faults.pop_front() {
            return check_condition(0, sense);
        }
        if !data_out.is_empty() {
            st.data_out.push((cdb[0], data_out.to_vec()));
        }

        match cdb[0] {
            protocol::READ_SCANNED_DATA => self.read(&mut st, cdb, data_in),
            protocol::GET_WINDOW => {
                let id = (cdb[5] & 1) as usize;
                let mut g = st.windows[id];
                g.window_id = id as u8;
                if st.autoborder_pending > 0 {
                    st.autoborder_pending -= 1;
                    g.autoborder = 0;
                } else {
                    g.autoborder = 1;
                }
                let bytes = g.to_bytes();
                let n = bytes.len().min(data_in.len());
                data_in[..n].copy_from_slice(&bytes[..n]);
                Completion::good(n)
            }
            _ => Completion::good(0),
        }
    }

    fn read(&self, st: &mut SimState, cdb: &[u8], dest: &mut [u8]) -> Completion {
        let read_type = cdb[2];
        let side = cdb[5];
        let len = dest.len();

        // Abort flag: drop everything still buffered.
        if side == 0x02 && len == 0 {
            st.streams.clear();
            st.code_records.clear();
            return Completion::good(0);
        }

        if let Some((after, sense)) = st.read_fault.clone()
            && st.reads >= after
        {
            st.read_fault = None;
            return check_condition(0, sense);
        }
        st.reads += 1;

        if is_code_read(read_type) {
            return match st.code_records.get_mut(&read_type).and_then(|q| q.pop_front()) {
                Some(record) => {
                    let n = record.len().min(len);
                    dest[..n].copy_from_slice(&record[..n]);
                    Completion::good(n)
                }
                None => check_condition(0, build_sense(0x0B, 0x80, 0x02)),
            };
        }

        let stream = st.streams.entry((read_type, side)).or_default();
        let n = stream.len().min(len);
        for (d, b) in dest.iter_mut().zip(stream.drain(..n)) {
            *d = b;
        }
        if n < len {
            check_condition(n, self.short_read_sense((len - n) as u32))
        } else {
            Completion::good(n)
        }
    }
}

fn check_condition(transferred: usize, sense: Vec<u8>) -> Completion {
    Completion {
        transferred,
        status: ScsiStatus::CheckCondition(sense),
    }
}

fn is_code_read(read_type: u8) -> bool {
    (protocol::READ_TYPE_FRONT_BARCODE..protocol::READ_TYPE_BACK_PATCHCODE + 16)
        .contains(&read_type)
        && read_type != protocol::READ_TYPE_SENDBARFILE
}

impl ScsiDevice for SimulatedScanner {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn execute(&mut self, cdb: &[u8], data_out: &[u8], data_in: &mut [u8]) -> Result<Completion> {
        if cdb.is_empty() {
            return Err(TransportError::CommandFailed("execute: empty CDB".into()));
        }
        self.state().commands.push(cdb.to_vec());
        Ok(self.process(cdb, data_out, data_in))
    }

    fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    fn submit(&mut self, cdb: &[u8], len: usize) -> Result<Token> {
        if self.queue_depth <= 1 {
            return Err(TransportError::QueueUnsupported);
        }
        let mut st = self.state();
        if st.queue.len() >= self.queue_depth {
            return Err(TransportError::CommandFailed(format!(
                "submit: queue full ({} outstanding)",
                st.queue.len()
            )));
        }
        st.commands.push(cdb.to_vec());
        let token = st.next_token;
        st.next_token += 1;
        drop(st);

        let mut data = vec![0u8; len];
        let completion = self.process(cdb, &[], &mut data);
        self.state().queue.push_back((token, completion, data));
        Ok(token)
    }

    fn reap(&mut self, token: Token, dest: &mut [u8]) -> Result<Completion> {
        let mut st = self.state();
        match st.queue.front() {
            Some((t, _, _)) if *t == token => {}
            Some(_) if st.queue.iter().any(|(t, _, _)| *t == token) => {
                return Err(TransportError::CommandFailed(format!(
                    "reap: token {token} is not the oldest outstanding command"
                )));
            }
            _ => return Err(TransportError::UnknownToken(token)),
        }
        let Some((_, completion, data)) = st.queue.pop_front() else {
            return Err(TransportError::UnknownToken(token));
        };
        let n = completion.transferred.min(data.len()).min(dest.len());
        dest[..n].copy_from_slice(&data[..n]);
        Ok(completion)
    }

    fn flush(&mut self) -> Result<()> {
        self.state().queue.clear();
        Ok(())
    }
}

/// Build a decoded code record as the device returns it.
pub fn code_record(
    symbology: u16,
    status: u16,
    orientation: u16,
    corners: [(u16, u16); 4],
    search_time: u16,
    data: &[u8],
) -> Vec<u8> {
    let mut r = vec![0u8; protocol::CODE_RECORD_LEN];
    r[2..4].copy_from_slice(&symbology.to_be_bytes());
    r[4..6].copy_from_slice(&status.to_be_bytes());
    r[6..8].copy_from_slice(&orientation.to_be_bytes());
    for (i, (x, y)) in corners.iter().enumerate() {
        let off = 8 + i * 4;
        r[off..off + 2].copy_from_slice(&x.to_be_bytes());
        r[off + 2..off + 4].copy_from_slice(&y.to_be_bytes());
    }
    r[24..26].copy_from_slice(&search_time.to_be_bytes());
    let n = data.len().min(protocol::CODE_DATA_LEN);
    r[protocol::CODE_LEN_OFFSET] = n as u8;
    r[protocol::CODE_LEN_OFFSET + 1..protocol::CODE_LEN_OFFSET + 1 + n].copy_from_slice(&data[..n]);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{READ_TYPE_FRONT, READ_TYPE_FRONT_BARCODE, read_scanned_data};

    #[test]
    fn stream_is_served_in_order() {
        let mut sim = SimulatedScanner::new("COPISCAN II 6338");
        sim.set_stream(READ_TYPE_FRONT, 0, vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        let c = sim
            .execute(&read_scanned_data(READ_TYPE_FRONT, 0, 3), &[], &mut buf)
            .unwrap();
        assert_eq!(c, Completion::good(3));
        assert_eq!(buf, [1, 2, 3]);

        let c = sim
            .execute(&read_scanned_data(READ_TYPE_FRONT, 0, 3), &[], &mut buf)
            .unwrap();
        assert_eq!(c.transferred, 2);
        assert!(matches!(c.status, ScsiStatus::CheckCondition(_)));
        assert_eq!(&buf[..2], &[4, 5]);
    }

    #[test]
    fn code_reads_end_with_not_found() {
        let mut sim = SimulatedScanner::new("COPISCAN II 6338");
        let rec = code_record(4, 0, 0, [(1, 2), (3, 4), (5, 6), (7, 8)], 12, b"ABC");
        sim.push_code_record(READ_TYPE_FRONT_BARCODE, rec.clone());
        let mut buf = vec![0u8; protocol::CODE_RECORD_LEN];
        let c = sim
            .execute(
                &read_scanned_data(READ_TYPE_FRONT_BARCODE, 0, 200),
                &[],
                &mut buf,
            )
            .unwrap();
        assert_eq!(c, Completion::good(200));
        assert_eq!(buf, rec);
        let c = sim
            .execute(
                &read_scanned_data(READ_TYPE_FRONT_BARCODE, 0, 200),
                &[],
                &mut buf,
            )
            .unwrap();
        assert_eq!(
            c.status,
            ScsiStatus::CheckCondition(build_sense(0x0B, 0x80, 0x02))
        );
    }

    #[test]
    fn log_survives_move() {
        let sim = SimulatedScanner::new("JX-250");
        let log = sim.log();
        let mut boxed: Box<dyn ScsiDevice> = Box::new(sim);
        boxed
            .execute(&protocol::test_unit_ready(), &[], &mut [])
            .unwrap();
        assert_eq!(log.opcodes(), vec![protocol::TEST_UNIT_READY]);
    }

    #[test]
    fn queue_rejects_out_of_order_reap() {
        let mut sim = SimulatedScanner::new("JX-250");
        let a = sim.submit(&read_scanned_data(0, 0, 1), 1).unwrap();
        let b = sim.submit(&read_scanned_data(0, 0, 1), 1).unwrap();
        let mut buf = [0u8; 1];
        assert!(sim.reap(b, &mut buf).is_err());
        assert!(sim.reap(a, &mut buf).is_ok());
        assert!(sim.reap(b, &mut buf).is_ok());
        assert!(matches!(
            sim.reap(b, &mut buf),
            Err(TransportError::UnknownToken(_))
        ));
    }

    #[test]
    fn sync_only_models_refuse_submit() {
        let mut sim = SimulatedScanner::new("KV-SS25");
        assert!(matches!(
            sim.submit(&read_scanned_data(0, 0, 1), 1),
            Err(TransportError::QueueUnsupported)
        ));
    }

    #[test]
    fn feed_job_fills_every_item() {
        let profile = find_model("COPISCAN II 6338").unwrap();
        let job = ScanConfig {
            duplex: true,
            lines: Some(4),
            icon_width: 16,
            icon_length: 8,
            patchcodes: true,
            ..ScanConfig::default()
        };
        let sim = SimulatedScanner::new(profile.name);
        sim.feed_job(profile, &job, 100);
        let st = sim.state();
        assert_eq!(st.streams[&(0x80, 0)].len(), 216 * 4);
        assert_eq!(st.streams[&(0x90, 0)].len(), 216 * 4);
        assert_eq!(st.streams[&(0x89, 0)].len(), protocol::ICON_HEADER_LEN + 16);
        assert_eq!(st.code_records[&0xC0].len(), 1);
        assert_eq!(st.code_records[&0xD0].len(), 1);
    }

    #[test]
    fn feed_job_uses_model_addressing() {
        let profile = find_model("KV-SS25").unwrap();
        let job = ScanConfig {
            duplex: true,
            ..ScanConfig::default()
        };
        let sim = SimulatedScanner::new(profile.name);
        sim.feed_job(profile, &job, 10);
        let st = sim.state();
        assert_eq!(st.streams[&(0, 0x00)].len(), 2160);
        assert_eq!(st.streams[&(0, 0x80)].len(), 2160);
    }

    #[test]
    fn autoborder_bit_set_after_delay() {
        let mut sim = SimulatedScanner::new("COPISCAN II 6338");
        sim.set_autoborder_delay(2);
        let mut buf = vec![0u8; 8 + 64];
        for expected in [0, 0, 1] {
            sim.execute(&protocol::get_window(0, buf.len()), &[], &mut buf)
                .unwrap();
            assert_eq!(WindowGeometry::parse(&buf).unwrap().autoborder, expected);
        }
    }
}
